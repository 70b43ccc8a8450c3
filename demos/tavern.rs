/// Tavern demo — a scripted evening at the Brass Tankard.
///
/// Walks the story programmatically: navigation, flagged options,
/// an external event, and a snapshot round trip.
///
/// Run with: cargo run --example tavern

use story_engine::core::story::{Passage, Story};
use story_engine::schema::value::Value;

fn show(passage: &Passage) {
    if let Some(ref title) = passage.title {
        println!("-- {} --", title);
    }
    println!("{}", passage.text);
    for choice in &passage.choices {
        println!("  [{}] {}", choice.id, choice.text);
    }
    println!();
}

fn main() {
    let mut story = Story::load_from_yaml(std::path::Path::new("demos/tavern.yaml"))
        .expect("Failed to load the tavern story");

    println!("=== {} ===\n", story.title);
    let passage = story.begin().expect("Failed to enter the taproom");
    show(&passage);

    // Two rounds of ale; the notification sees the freshly mutated count.
    for _ in 0..2 {
        let result = story.choose("ale").expect("Failed to buy a round");
        if let Some(notification) = result.notification {
            println!("* {}", notification);
        }
    }
    println!();

    // Into the snug; the once-flagged secret is only tradeable once.
    let result = story.choose("snug").expect("Failed to reach the snug");
    show(&result.passage.expect("The snug should render"));

    let result = story.choose("whisper").expect("Failed to trade the secret");
    if let Some(notification) = result.notification {
        println!("* {}\n", notification);
    }

    // An external event fires against the current section.
    let message = story
        .trigger("last_call", &[Value::Int(10)])
        .expect("Failed to trigger last call");
    println!("* {}\n", message);

    // Snapshot, then keep playing; restoring rewinds to the snapshot.
    let snapshot = story.state().expect("Failed to snapshot");
    let result = story.choose("back").expect("Failed to return");
    show(&result.passage.expect("The taproom should render"));

    story
        .restore_state(&snapshot)
        .expect("Failed to restore the snapshot");
    let passage = story.visit("snug").expect("Failed to re-enter the snug");
    println!("(restored and re-entered)");
    show(&passage);

    // The secret stays traded across the restore.
    assert!(passage.choices.iter().all(|c| c.id != "whisper"));

    let result = story.choose("back").expect("Failed to return");
    show(&result.passage.expect("The taproom should render"));
}
