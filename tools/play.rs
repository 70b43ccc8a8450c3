/// Play — interactive shell for walking through YAML stories.
///
/// Usage: play --story <file> [--state <file>]
///
/// Commands:
///   <n>                      — pick the n-th listed choice
///   goto <id>                — enter a section directly
///   trigger <id> [args...]   — fire an external event
///   save <file> / load <file> — write or read a state snapshot
///   vars                     — dump the serialized state
///   restart                  — discard state, back to the entry
///   help                     — list commands
///   quit                     — exit

use std::io::{self, BufRead, Write};
use std::path::Path;

use story_engine::core::story::{Passage, Story};
use story_engine::schema::value::Value;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut story_path = None;
    let mut state_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--story" if i + 1 < args.len() => {
                i += 1;
                story_path = Some(args[i].clone());
            }
            "--state" if i + 1 < args.len() => {
                i += 1;
                state_path = Some(args[i].clone());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(story_path) = story_path else {
        print_usage();
        std::process::exit(1);
    };

    let mut story = match Story::load_from_yaml(Path::new(&story_path)) {
        Ok(story) => story,
        Err(e) => {
            eprintln!("Failed to load story: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(ref path) = state_path {
        match std::fs::read(path) {
            Ok(blob) => {
                if let Err(e) = story.restore_state(&blob) {
                    eprintln!("Failed to restore state: {}", e);
                }
            }
            Err(e) => eprintln!("Failed to read state file: {}", e),
        }
    }

    println!("=== {} ===", story.title);
    let mut passage = match story.begin() {
        Ok(passage) => passage,
        Err(e) => {
            eprintln!("Failed to enter the story: {}", e);
            std::process::exit(1);
        }
    };
    print_passage(&passage);

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts[0] {
            "quit" | "exit" => break,
            "help" => print_usage(),
            "restart" => match story.restart() {
                Ok(next) => {
                    passage = next;
                    print_passage(&passage);
                }
                Err(e) => eprintln!("restart failed: {}", e),
            },
            "goto" if parts.len() == 2 => match story.visit(parts[1]) {
                Ok(next) => {
                    passage = next;
                    print_passage(&passage);
                }
                Err(e) => eprintln!("goto failed: {}", e),
            },
            "trigger" if parts.len() >= 2 => {
                let args: Vec<Value> = parts[2..].iter().map(|raw| parse_value(raw)).collect();
                match story.trigger(parts[1], &args) {
                    Ok(message) if !message.is_empty() => println!("* {}", message),
                    Ok(_) => {}
                    Err(e) => eprintln!("trigger failed: {}", e),
                }
            }
            "save" if parts.len() == 2 => match story.state() {
                Ok(blob) => match std::fs::write(parts[1], blob) {
                    Ok(()) => println!("saved to {}", parts[1]),
                    Err(e) => eprintln!("save failed: {}", e),
                },
                Err(e) => eprintln!("snapshot failed: {}", e),
            },
            "load" if parts.len() == 2 => match std::fs::read(parts[1]) {
                Ok(blob) => match story.restore_state(&blob) {
                    Ok(()) => println!("state restored; use goto to re-enter a section"),
                    Err(e) => eprintln!("restore failed: {}", e),
                },
                Err(e) => eprintln!("load failed: {}", e),
            },
            "vars" => match story.state() {
                Ok(blob) => println!("{}", String::from_utf8_lossy(&blob)),
                Err(e) => eprintln!("snapshot failed: {}", e),
            },
            _ => match parts[0].parse::<usize>() {
                Ok(n) if n >= 1 && n <= passage.choices.len() => {
                    let id = passage.choices[n - 1].id.clone();
                    match story.choose(&id) {
                        Ok(result) => {
                            if let Some(confirm) = result.confirm {
                                println!("? {}", confirm);
                            }
                            if let Some(notification) = result.notification {
                                println!("* {}", notification);
                            }
                            if let Some(next) = result.passage {
                                passage = next;
                                print_passage(&passage);
                            }
                        }
                        Err(e) => eprintln!("choice failed: {}", e),
                    }
                }
                _ => eprintln!("Unknown command: {} (try 'help')", line),
            },
        }
    }
}

fn print_passage(passage: &Passage) {
    println!();
    if let Some(ref title) = passage.title {
        println!("-- {} --", title);
    }
    println!("{}", passage.text);
    for (i, choice) in passage.choices.iter().enumerate() {
        println!("  {}. {}", i + 1, choice.text);
    }
}

/// Integers and floats pass through as numbers, everything else as text.
fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(x) = raw.parse::<f64>() {
        return Value::Float(x);
    }
    Value::Str(raw.to_string())
}

fn print_usage() {
    println!("Usage: play --story <file> [--state <file>]");
    println!();
    println!("Commands:");
    println!("  <n>                       pick the n-th listed choice");
    println!("  goto <id>                 enter a section directly");
    println!("  trigger <id> [args...]    fire an external event");
    println!("  save <file> / load <file> write or read a state snapshot");
    println!("  vars                      dump the serialized state");
    println!("  restart                   discard state, back to the entry");
    println!("  help                      list commands");
    println!("  quit                      exit");
}
