/// Section lifecycle — entry, run-code, visit counting, text materialization.

use std::collections::BTreeMap;
use tracing::debug;

use crate::core::choice::Choice;
use crate::core::interp::Template;
use crate::core::scope::{ScopeError, ScopeManager};
use crate::schema::definition::{DefinitionError, SectionDef};
use crate::schema::value::Value;

/// One narrative node. Created at load time, never destroyed during a
/// session; all mutable state lives in the section tier of the scopes.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: String,
    pub title: Option<String>,
    pub text: Template,
    pub run: Option<String>,
    /// Variable defaults applied lazily on the first visit.
    pub vars: BTreeMap<String, Value>,
    /// Insertion order is display order.
    pub choices: Vec<Choice>,
}

impl Section {
    /// Build a section from its definition and an already-merged choice
    /// list.
    pub fn from_def(def: &SectionDef, choices: Vec<Choice>) -> Result<Section, DefinitionError> {
        let text = Template::parse(&def.text)
            .map_err(|e| DefinitionError::Template(def.id.clone(), e.to_string()))?;
        Ok(Section {
            id: def.id.clone(),
            title: def.title.clone(),
            text,
            run: def.run.clone(),
            vars: def.vars.clone(),
            choices,
        })
    }

    pub fn choice(&self, id: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }

    /// Enter the section and return its materialized text.
    ///
    /// Side effects in strict order: clear the ephemeral tier, increment
    /// the visit counter, apply first-visit variable defaults (never
    /// overwriting restored values), execute run-code, render the text.
    /// A run-code fault aborts the visit after the counter bump; nothing
    /// further is computed.
    pub fn visit(&self, scopes: &mut ScopeManager) -> Result<String, ScopeError> {
        scopes.clear_ephemeral();
        let visits = scopes.bump_visits(&self.id)?;
        debug!("visit {} of '{}'", visits, self.id);
        if visits == 1 {
            scopes.seed_section_defaults(&self.id, &self.vars)?;
        }
        if let Some(run) = &self.run {
            let label = format!("section:{}", self.id);
            scopes.exec(run, &label, Some(&self.id))?;
        }
        scopes.bind(Some(&self.id))?;
        Ok(self.text.render(scopes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definition::OptionDef;

    fn section_def(id: &str, text: &str) -> SectionDef {
        SectionDef {
            id: id.to_string(),
            title: None,
            text: text.to_string(),
            run: None,
            vars: BTreeMap::new(),
            include: Vec::new(),
            options: Vec::new(),
        }
    }

    fn scopes_for(id: &str) -> ScopeManager {
        let mut scopes = ScopeManager::new().unwrap();
        scopes.register_section(id);
        scopes
    }

    #[test]
    fn visit_increments_counter() {
        let section = Section::from_def(&section_def("start", "Hi."), Vec::new()).unwrap();
        let mut scopes = scopes_for("start");

        section.visit(&mut scopes).unwrap();
        assert_eq!(scopes.visits("start").unwrap(), 1);
        section.visit(&mut scopes).unwrap();
        assert_eq!(scopes.visits("start").unwrap(), 2);
    }

    #[test]
    fn defaults_applied_once_and_never_reapplied() {
        let mut def = section_def("start", "Mood: {section.mood}");
        def.vars
            .insert("mood".to_string(), Value::Str("calm".to_string()));
        def.run = Some("section.mood = 'shaken'".to_string());
        let section = Section::from_def(&def, Vec::new()).unwrap();
        let mut scopes = scopes_for("start");

        assert_eq!(section.visit(&mut scopes).unwrap(), "Mood: shaken");
        // Second visit must not reset the mutated value back to "calm".
        assert_eq!(section.visit(&mut scopes).unwrap(), "Mood: shaken");
    }

    #[test]
    fn defaults_do_not_overwrite_restored_values() {
        let mut def = section_def("start", "{section.mood}");
        def.vars
            .insert("mood".to_string(), Value::Str("calm".to_string()));
        let section = Section::from_def(&def, Vec::new()).unwrap();
        let mut scopes = scopes_for("start");
        scopes
            .set_section_var("start", "mood", Value::Str("restored".to_string()))
            .unwrap();

        assert_eq!(section.visit(&mut scopes).unwrap(), "restored");
    }

    #[test]
    fn ephemeral_cleared_at_visit_start() {
        let section =
            Section::from_def(&section_def("start", "{temp.left or 'gone'}"), Vec::new())
                .unwrap();
        let mut scopes = scopes_for("start");
        scopes.set_ephemeral("left", Value::Str("over".to_string()));

        assert_eq!(section.visit(&mut scopes).unwrap(), "gone");
    }

    #[test]
    fn run_code_sees_all_tiers_and_counter() {
        let mut def = section_def("start", "{trail}");
        def.run = Some("trail = (trail or '') .. section_id .. visits".to_string());
        let section = Section::from_def(&def, Vec::new()).unwrap();
        let mut scopes = scopes_for("start");

        assert_eq!(section.visit(&mut scopes).unwrap(), "start1");
        assert_eq!(section.visit(&mut scopes).unwrap(), "start1start2");
    }

    #[test]
    fn faulting_run_aborts_after_counter_bump() {
        let mut def = section_def("start", "never rendered");
        def.run = Some("error('collapse')".to_string());
        let section = Section::from_def(&def, Vec::new()).unwrap();
        let mut scopes = scopes_for("start");

        assert!(section.visit(&mut scopes).is_err());
        assert_eq!(scopes.visits("start").unwrap(), 1);
    }

    #[test]
    fn choice_lookup_by_id() {
        let def = OptionDef {
            id: "go".to_string(),
            text: "Go".to_string(),
            target: None,
            condition: None,
            run: None,
            notify: None,
            confirm: None,
            hidden: false,
            flags: Vec::new(),
        };
        let choices = vec![Choice::from_def("start", &def).unwrap()];
        let section = Section::from_def(&section_def("start", "Hi."), choices).unwrap();
        assert!(section.choice("go").is_some());
        assert!(section.choice("missing").is_none());
    }
}
