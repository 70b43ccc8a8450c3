/// Story orchestration — template merge, navigation, events, persistence.
///
/// Composes the scopes, sections, choices and dispatcher behind the
/// load/navigate/serialize contract the presentation layer consumes.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::choice::{Choice, NavTarget};
use crate::core::dispatch::{DispatchError, Dispatcher, Hook};
use crate::core::scope::{ScopeError, ScopeManager};
use crate::core::section::Section;
use crate::schema::definition::{
    DefinitionError, OptionDef, SectionDef, StoryDefinition,
};
use crate::schema::value::Value;

/// Bound on chained `jump` redirects within one navigation.
const MAX_REDIRECTS: usize = 16;

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("no section named '{0}'")]
    MissingSection(String),
    #[error("no option named '{0}' in section '{1}'")]
    MissingOption(String, String),
    #[error("option '{0}' is not available right now")]
    UnavailableChoice(String),
    #[error("no section has been visited yet")]
    NoCurrentSection,
    #[error("redirect chain exceeded {0} jumps")]
    RedirectLoop(usize),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// A rendered view of a section: materialized text plus the choices
/// that are visible right now, in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub section_id: String,
    pub title: Option<String>,
    pub text: String,
    pub choices: Vec<PassageChoice>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassageChoice {
    pub id: String,
    pub text: String,
}

/// What playing a choice produced.
#[derive(Debug, Clone)]
pub struct ChoiceResult {
    /// Notification to show the player, already interpolated.
    pub notification: Option<String>,
    /// Confirmation text; effects are applied, acknowledgement is the
    /// caller's business.
    pub confirm: Option<String>,
    /// The freshly entered passage when the choice navigated; `None`
    /// means the session stayed on the current section as rendered.
    pub passage: Option<Passage>,
}

/// One loaded narrative session.
pub struct Story {
    pub title: String,
    pub system: Option<String>,
    sections: FxHashMap<String, Section>,
    entry: String,
    current: Option<String>,
    globals: BTreeMap<String, Value>,
    init: Option<String>,
    scopes: ScopeManager,
    dispatcher: Dispatcher,
}

impl Story {
    /// Parse a YAML story source and construct the session.
    pub fn from_yaml(input: &str) -> Result<Story, StoryError> {
        let definition = StoryDefinition::parse_yaml(input)?;
        Self::from_definition(&definition)
    }

    /// Load a YAML story file and construct the session.
    pub fn load_from_yaml(path: &std::path::Path) -> Result<Story, StoryError> {
        let definition = StoryDefinition::load_from_yaml(path)?;
        Self::from_definition(&definition)
    }

    /// Construct a session from a parsed definition.
    ///
    /// Resolves option-set templates into concrete per-section choice
    /// lists, seeds the global tier, runs init code once, and registers
    /// events and hooks. Any failure here is fatal: no partial Story is
    /// ever returned.
    pub fn from_definition(definition: &StoryDefinition) -> Result<Story, StoryError> {
        let mut scopes = ScopeManager::new()?;
        let mut sections = FxHashMap::default();

        for section_def in &definition.sections {
            let merged = merge_options(section_def, &definition.templates)?;
            let mut choices = Vec::with_capacity(merged.len());
            for option_def in &merged {
                choices.push(Choice::from_def(&section_def.id, option_def)?);
            }
            scopes.register_section(&section_def.id);
            sections.insert(
                section_def.id.clone(),
                Section::from_def(section_def, choices)?,
            );
        }

        let entry = definition
            .sections
            .first()
            .map(|s| s.id.clone())
            .ok_or(DefinitionError::NoSections)?;

        let mut dispatcher = Dispatcher::default();
        for (id, event_def) in &definition.events {
            dispatcher.register_event(id, event_def.clone());
        }
        for (name, code) in &definition.hooks {
            let hook = Hook::parse(name)
                .ok_or_else(|| DefinitionError::UnknownHook(name.clone()))?;
            dispatcher.register_hook(hook, code.clone());
        }

        let mut story = Story {
            title: definition.title.clone(),
            system: definition.system.clone(),
            sections,
            entry,
            current: None,
            globals: definition.vars.clone(),
            init: definition.init.clone(),
            scopes,
            dispatcher,
        };
        story.seed_globals()?;
        info!("loaded story '{}'", story.title);
        Ok(story)
    }

    /// The canonical entry section id.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// The section visited most recently, if any.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn section(&self, id: &str) -> Result<&Section, StoryError> {
        self.sections
            .get(id)
            .ok_or_else(|| StoryError::MissingSection(id.to_string()))
    }

    /// Read access to the variable tiers, for embedders and tools.
    pub fn scopes(&self) -> &ScopeManager {
        &self.scopes
    }

    pub fn scopes_mut(&mut self) -> &mut ScopeManager {
        &mut self.scopes
    }

    /// Enter the entry section. Equivalent to `visit(entry())`.
    pub fn begin(&mut self) -> Result<Passage, StoryError> {
        let entry = self.entry.clone();
        self.visit(&entry)
    }

    /// Enter a section and return its rendered passage.
    ///
    /// A `jump` written by the section's run-code (or the post-visit
    /// hook) redirects before anything is shown; chains are bounded.
    pub fn visit(&mut self, id: &str) -> Result<Passage, StoryError> {
        let mut target = id.to_string();
        for _ in 0..MAX_REDIRECTS {
            let section = self
                .sections
                .get(&target)
                .ok_or_else(|| StoryError::MissingSection(target.clone()))?;
            let text = section.visit(&mut self.scopes)?;
            self.dispatcher
                .fire(Hook::PostVisit, &mut self.scopes, Some(&target));
            match self.scopes.take_jump()? {
                Some(next) => {
                    debug!("redirect from '{}' to '{}'", target, next);
                    match next.as_str() {
                        "restart" => return self.restart(),
                        "self" => {}
                        _ => target = next,
                    }
                }
                None => {
                    self.current = Some(target.clone());
                    return self.render_passage(&target, text);
                }
            }
        }
        Err(StoryError::RedirectLoop(MAX_REDIRECTS))
    }

    /// Execute a choice of the current section.
    ///
    /// Fires the post-option hook after execution, then resolves
    /// navigation with the documented precedence: `jump` override from
    /// run-code or hook, then the option's own goto, then stay.
    pub fn choose(&mut self, choice_id: &str) -> Result<ChoiceResult, StoryError> {
        let current = self.current.clone().ok_or(StoryError::NoCurrentSection)?;
        let section = self
            .sections
            .get(&current)
            .ok_or_else(|| StoryError::MissingSection(current.clone()))?;
        let choice = section.choice(choice_id).ok_or_else(|| {
            StoryError::MissingOption(choice_id.to_string(), current.clone())
        })?;

        self.scopes.bind(Some(&current))?;
        if !choice.is_available(&self.scopes, &current)? {
            return Err(StoryError::UnavailableChoice(choice_id.to_string()));
        }

        let outcome = choice.execute(&mut self.scopes, &current)?;
        self.dispatcher
            .fire(Hook::PostOption, &mut self.scopes, Some(&current));

        let target = match self.scopes.take_jump()? {
            Some(jump) => match jump.as_str() {
                "restart" => NavTarget::Restart,
                "self" => NavTarget::Section(current.clone()),
                _ => NavTarget::Section(jump),
            },
            None => outcome.target,
        };

        let passage = match target {
            NavTarget::Stay => None,
            NavTarget::Restart => Some(self.restart()?),
            NavTarget::Section(next) => Some(self.visit(&next)?),
        };

        Ok(ChoiceResult {
            notification: outcome.notification,
            confirm: outcome.confirm,
            passage,
        })
    }

    /// Invoke a named external event against the current section context.
    pub fn trigger(&mut self, event_id: &str, args: &[Value]) -> Result<String, StoryError> {
        let current = self.current.clone();
        Ok(self
            .dispatcher
            .trigger(event_id, args, &mut self.scopes, current.as_deref())?)
    }

    /// Discard all persisted state and re-enter the canonical entry
    /// section: globals reseeded, init re-run, counters and consumption
    /// markers cleared.
    pub fn restart(&mut self) -> Result<Passage, StoryError> {
        info!("restarting '{}'", self.title);
        self.scopes.reset()?;
        self.current = None;
        self.seed_globals()?;
        let entry = self.entry.clone();
        self.visit(&entry)
    }

    /// Serialize the session state. Call between operations only; the
    /// blob then always reflects fully committed effects.
    pub fn state(&self) -> Result<Vec<u8>, StoryError> {
        Ok(self.scopes.snapshot()?)
    }

    /// Replace the session state from a serialized blob.
    pub fn restore_state(&mut self, blob: &[u8]) -> Result<(), StoryError> {
        self.scopes.restore(blob)?;
        Ok(())
    }

    fn seed_globals(&mut self) -> Result<(), StoryError> {
        for (name, value) in &self.globals {
            self.scopes.set_global(name, value)?;
        }
        if let Some(init) = &self.init {
            self.scopes.exec(init, "init", None)?;
        }
        Ok(())
    }

    fn render_passage(&mut self, id: &str, text: String) -> Result<Passage, StoryError> {
        let section = self
            .sections
            .get(id)
            .ok_or_else(|| StoryError::MissingSection(id.to_string()))?;
        self.scopes.bind(Some(id))?;
        let mut choices = Vec::new();
        for choice in &section.choices {
            if choice.is_available(&self.scopes, id)? {
                choices.push(PassageChoice {
                    id: choice.id.clone(),
                    text: choice.text.render(&self.scopes),
                });
            }
        }
        Ok(Passage {
            section_id: id.to_string(),
            title: section.title.clone(),
            text,
            choices,
        })
    }
}

/// Merge a section's own options with its included templates.
///
/// Section-defined ids always win; template options that are not
/// overridden append in include-list order. Listing the same template
/// twice collapses to a single merge.
fn merge_options(
    section: &SectionDef,
    templates: &BTreeMap<String, Vec<OptionDef>>,
) -> Result<Vec<OptionDef>, DefinitionError> {
    let mut merged = section.options.clone();
    let mut included: Vec<&str> = Vec::new();
    for name in &section.include {
        if included.contains(&name.as_str()) {
            continue;
        }
        included.push(name);
        let template = templates.get(name).ok_or_else(|| {
            DefinitionError::UnknownTemplate(section.id.clone(), name.clone())
        })?;
        for option in template {
            if merged.iter().all(|existing| existing.id != option.id) {
                merged.push(option.clone());
            }
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATED: &str = r#"
title: Merge Test
templates:
  exits:
    leave: ["Leave", hallway]
    rest: ["Rest", camp]
sections:
  armory:
    text: "Racks of steel."
    include: [exits, exits]
    options:
      leave: ["Sneak out", tunnels]
  library:
    text: "Dust and vellum."
    include: [exits]
  hallway:
    text: "A long hallway."
  camp:
    text: "A quiet camp."
  tunnels:
    text: "Dark tunnels."
"#;

    #[test]
    fn template_merge_section_keys_win() {
        let story = Story::from_yaml(TEMPLATED).unwrap();
        let armory = story.section("armory").unwrap();
        let leave = armory.choice("leave").unwrap();
        // Overridden by the section, pointing at tunnels, not hallway.
        assert_eq!(
            leave.target,
            Some(crate::core::choice::Goto::Section("tunnels".to_string()))
        );
        // Non-overridden template option included as-is.
        assert!(armory.choice("rest").is_some());
    }

    #[test]
    fn template_merge_is_idempotent() {
        let story = Story::from_yaml(TEMPLATED).unwrap();
        // `exits` is listed twice for armory; ids must not duplicate.
        let armory = story.section("armory").unwrap();
        assert_eq!(armory.choices.len(), 2);
    }

    #[test]
    fn same_template_diverges_per_section() {
        let story = Story::from_yaml(TEMPLATED).unwrap();
        let armory_leave = story.section("armory").unwrap().choice("leave").unwrap();
        let library_leave = story.section("library").unwrap().choice("leave").unwrap();
        assert_ne!(armory_leave.target, library_leave.target);
    }

    #[test]
    fn unknown_template_is_fatal() {
        let yaml = r#"
title: T
sections:
  start:
    text: "Hi."
    include: [ghost]
"#;
        assert!(matches!(
            Story::from_yaml(yaml),
            Err(StoryError::Definition(DefinitionError::UnknownTemplate(_, _)))
        ));
    }

    #[test]
    fn unknown_hook_is_fatal() {
        let yaml = r#"
title: T
sections:
  start:
    text: "Hi."
hooks:
  pre_breakfast: "x = 1"
"#;
        assert!(matches!(
            Story::from_yaml(yaml),
            Err(StoryError::Definition(DefinitionError::UnknownHook(_)))
        ));
    }

    #[test]
    fn entry_is_first_section() {
        let story = Story::from_yaml(TEMPLATED).unwrap();
        assert_eq!(story.entry(), "armory");
    }

    #[test]
    fn init_runs_once_at_load() {
        let yaml = r#"
title: T
vars:
  gold: 10
init: "gold = gold * 2"
sections:
  start:
    text: "{gold} gold."
"#;
        let mut story = Story::from_yaml(yaml).unwrap();
        let passage = story.begin().unwrap();
        assert_eq!(passage.text, "20 gold.");
    }

    #[test]
    fn missing_section_reported() {
        let mut story = Story::from_yaml(TEMPLATED).unwrap();
        assert!(matches!(
            story.visit("nowhere"),
            Err(StoryError::MissingSection(_))
        ));
        // The session survives; a valid visit still works.
        assert!(story.visit("camp").is_ok());
    }

    #[test]
    fn missing_option_reported() {
        let mut story = Story::from_yaml(TEMPLATED).unwrap();
        story.begin().unwrap();
        assert!(matches!(
            story.choose("nothing"),
            Err(StoryError::MissingOption(_, _))
        ));
    }

    #[test]
    fn choose_before_visit_is_an_error() {
        let mut story = Story::from_yaml(TEMPLATED).unwrap();
        assert!(matches!(
            story.choose("leave"),
            Err(StoryError::NoCurrentSection)
        ));
    }

    #[test]
    fn run_code_jump_redirects_visit() {
        let yaml = r#"
title: T
sections:
  start:
    text: "Never shown."
    run: "jump = 'cellar'"
  cellar:
    text: "You land in the cellar."
"#;
        let mut story = Story::from_yaml(yaml).unwrap();
        let passage = story.begin().unwrap();
        assert_eq!(passage.section_id, "cellar");
        assert_eq!(passage.text, "You land in the cellar.");
        // Both sections were actually entered.
        assert_eq!(story.scopes().visits("start").unwrap(), 1);
        assert_eq!(story.scopes().visits("cellar").unwrap(), 1);
    }

    #[test]
    fn redirect_loops_are_bounded() {
        let yaml = r#"
title: T
sections:
  ping:
    text: "ping"
    run: "jump = 'pong'"
  pong:
    text: "pong"
    run: "jump = 'ping'"
"#;
        let mut story = Story::from_yaml(yaml).unwrap();
        assert!(matches!(
            story.begin(),
            Err(StoryError::RedirectLoop(_))
        ));
    }

    #[test]
    fn hook_jump_outranks_option_goto() {
        let yaml = r#"
title: T
sections:
  start:
    text: "Crossroads."
    options:
      east: ["Go east", east]
  east:
    text: "East road."
  trap:
    text: "A trapdoor swallows you."
hooks:
  post_option: "if sprung then jump = 'trap' end"
"#;
        let mut story = Story::from_yaml(yaml).unwrap();
        story.begin().unwrap();

        // Hook quiet: the option's own goto wins.
        let result = story.choose("east").unwrap();
        assert_eq!(result.passage.unwrap().section_id, "east");

        // Arm the hook: its jump now outranks the goto.
        let mut story = Story::from_yaml(yaml).unwrap();
        story.begin().unwrap();
        story
            .scopes_mut()
            .set_global("sprung", &Value::Bool(true))
            .unwrap();
        let result = story.choose("east").unwrap();
        assert_eq!(result.passage.unwrap().section_id, "trap");
    }
}
