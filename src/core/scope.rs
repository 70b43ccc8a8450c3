/// Tiered variable scopes: global, per-section, ephemeral.
///
/// The global tier lives in the script engine's environment and this
/// manager holds the only handle to it. The section and ephemeral tiers
/// live here and are published to scripts as the `section` and `temp`
/// tables around every execution, then harvested back.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

use crate::core::script::{LuaEngine, ScriptError};
use crate::schema::value::Value;

/// Name the bound section's variables are published under.
pub const SECTION_TABLE: &str = "section";
/// Name the ephemeral tier is published under.
pub const TEMP_TABLE: &str = "temp";
/// Read-only visit counter of the bound section.
pub const VISITS_NAME: &str = "visits";
/// Read-only id of the bound section.
pub const SECTION_ID_NAME: &str = "section_id";
/// Writable pending-navigation override consulted by the orchestrator.
pub const JUMP_NAME: &str = "jump";

const RESERVED: &[&str] = &[
    SECTION_TABLE,
    TEMP_TABLE,
    VISITS_NAME,
    SECTION_ID_NAME,
    JUMP_NAME,
];

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("unknown section '{0}'")]
    UnknownSection(String),
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
    #[error("state encode error: {0}")]
    Encode(#[from] ron::Error),
    #[error("state decode error: {0}")]
    Decode(#[from] ron::error::SpannedError),
    #[error("state blob is not UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Persistent per-section state: the variable namespace, the visit
/// counter, and the consumption markers of once-flagged options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionScope {
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub visits: u64,
    #[serde(default)]
    pub chosen: BTreeSet<String>,
}

/// The serialized state layout. Ephemeral values never appear here.
#[derive(Debug, Serialize, Deserialize)]
struct StateSnapshot {
    globals: BTreeMap<String, Value>,
    sections: BTreeMap<String, SectionScope>,
}

/// Owns the script engine and mediates every read and write between the
/// engine's global environment and the three variable tiers.
pub struct ScopeManager {
    engine: LuaEngine,
    sections: FxHashMap<String, SectionScope>,
    ephemeral: BTreeMap<String, Value>,
}

impl ScopeManager {
    pub fn new() -> Result<ScopeManager, ScopeError> {
        Ok(ScopeManager {
            engine: LuaEngine::new()?,
            sections: FxHashMap::default(),
            ephemeral: BTreeMap::new(),
        })
    }

    /// Declare a section-tier namespace. Idempotent.
    pub fn register_section(&mut self, id: &str) {
        self.sections.entry(id.to_string()).or_default();
    }

    pub fn knows_section(&self, id: &str) -> bool {
        self.sections.contains_key(id)
    }

    // --- global tier -----------------------------------------------------

    pub fn get_global(&self, name: &str) -> Result<Value, ScopeError> {
        Ok(self.engine.get_global(name)?)
    }

    pub fn set_global(&self, name: &str, value: &Value) -> Result<(), ScopeError> {
        Ok(self.engine.set_global(name, value)?)
    }

    /// Invoke a named script function. Part of the bridge surface for
    /// embedding applications; the engine itself never calls it.
    pub fn call_named(&self, name: &str, args: &[Value]) -> Result<Value, ScopeError> {
        Ok(self.engine.call_named(name, args)?)
    }

    // --- section tier ----------------------------------------------------

    pub fn get_section_var(&self, id: &str, name: &str) -> Result<Value, ScopeError> {
        let scope = self.section_scope(id)?;
        Ok(scope.vars.get(name).cloned().unwrap_or(Value::Nil))
    }

    pub fn set_section_var(
        &mut self,
        id: &str,
        name: &str,
        value: Value,
    ) -> Result<(), ScopeError> {
        let scope = self.section_scope_mut(id)?;
        scope.vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Apply first-visit defaults without overwriting values that are
    /// already present (e.g. restored from a prior session).
    pub fn seed_section_defaults(
        &mut self,
        id: &str,
        defaults: &BTreeMap<String, Value>,
    ) -> Result<(), ScopeError> {
        let scope = self.section_scope_mut(id)?;
        for (name, value) in defaults {
            scope.vars.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Ok(())
    }

    pub fn visits(&self, id: &str) -> Result<u64, ScopeError> {
        Ok(self.section_scope(id)?.visits)
    }

    /// Increment and return the section's visit counter.
    pub fn bump_visits(&mut self, id: &str) -> Result<u64, ScopeError> {
        let scope = self.section_scope_mut(id)?;
        scope.visits += 1;
        Ok(scope.visits)
    }

    pub fn mark_chosen(&mut self, id: &str, option_id: &str) -> Result<(), ScopeError> {
        let scope = self.section_scope_mut(id)?;
        scope.chosen.insert(option_id.to_string());
        Ok(())
    }

    pub fn was_chosen(&self, id: &str, option_id: &str) -> Result<bool, ScopeError> {
        Ok(self.section_scope(id)?.chosen.contains(option_id))
    }

    // --- ephemeral tier --------------------------------------------------

    pub fn get_ephemeral(&self, name: &str) -> Value {
        self.ephemeral.get(name).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_ephemeral(&mut self, name: &str, value: Value) {
        self.ephemeral.insert(name.to_string(), value);
    }

    pub fn clear_ephemeral(&mut self) {
        self.ephemeral.clear();
    }

    // --- script execution ------------------------------------------------

    /// Execute a code fragment with the given section bound, then harvest
    /// tier mutations back out of the environment.
    pub fn exec(
        &mut self,
        code: &str,
        label: &str,
        section: Option<&str>,
    ) -> Result<Value, ScopeError> {
        self.bind(section)?;
        let result = self.engine.execute(code, label);
        self.sync(section)?;
        Ok(result?)
    }

    /// Evaluate an expression against the current scope view without
    /// rebinding. Callers bind once per operation via `bind`.
    pub fn eval_bound(&self, code: &str, label: &str) -> Result<Value, ScopeError> {
        Ok(self.engine.execute(code, label)?)
    }

    /// Publish the ephemeral tier and the given section's namespace into
    /// the script environment, along with the reserved read-only values.
    pub fn bind(&mut self, section: Option<&str>) -> Result<(), ScopeError> {
        self.engine
            .set_global(TEMP_TABLE, &Value::Map(self.ephemeral.clone()))?;
        match section {
            Some(id) => {
                let scope = self.section_scope(id)?;
                let vars = scope.vars.clone();
                let visits = scope.visits;
                self.engine
                    .set_global(SECTION_TABLE, &Value::Map(vars))?;
                self.engine
                    .set_global(VISITS_NAME, &Value::Int(visits as i64))?;
                self.engine
                    .set_global(SECTION_ID_NAME, &Value::Str(id.to_string()))?;
            }
            None => {
                self.engine.set_global(SECTION_TABLE, &Value::Nil)?;
                self.engine.set_global(VISITS_NAME, &Value::Nil)?;
                self.engine.set_global(SECTION_ID_NAME, &Value::Nil)?;
            }
        }
        Ok(())
    }

    /// Harvest the published tables back into the Rust-side tiers.
    pub fn sync(&mut self, section: Option<&str>) -> Result<(), ScopeError> {
        match self.engine.get_global(TEMP_TABLE)? {
            Value::Map(entries) => self.ephemeral = entries,
            Value::Nil => {}
            other => warn!(
                "script replaced the '{}' table with a {}; keeping prior values",
                TEMP_TABLE,
                other.type_name()
            ),
        }
        if let Some(id) = section {
            match self.engine.get_global(SECTION_TABLE)? {
                Value::Map(entries) => {
                    self.section_scope_mut(id)?.vars = entries;
                }
                Value::Nil => {}
                other => warn!(
                    "script replaced the '{}' table with a {}; keeping prior values",
                    SECTION_TABLE,
                    other.type_name()
                ),
            }
        }
        Ok(())
    }

    /// Read and clear the pending-navigation override.
    pub fn take_jump(&mut self) -> Result<Option<String>, ScopeError> {
        let value = self.engine.get_global(JUMP_NAME)?;
        if !matches!(value, Value::Nil) {
            self.engine.set_global(JUMP_NAME, &Value::Nil)?;
        }
        match value {
            Value::Nil => Ok(None),
            Value::Str(target) => Ok(Some(target)),
            other => {
                warn!(
                    "'{}' set to a {}; expected a section id, ignoring",
                    JUMP_NAME,
                    other.type_name()
                );
                Ok(None)
            }
        }
    }

    // --- persistence -----------------------------------------------------

    /// Serialize the global and section tiers. Stable: identical state
    /// always produces an identical blob, and the ephemeral tier is never
    /// included.
    pub fn snapshot(&self) -> Result<Vec<u8>, ScopeError> {
        let mut globals = self.engine.get_all_globals()?;
        for name in RESERVED {
            globals.remove(*name);
        }
        let sections = self
            .sections
            .iter()
            .map(|(id, scope)| (id.clone(), scope.clone()))
            .collect();
        let snapshot = StateSnapshot { globals, sections };
        Ok(ron::to_string(&snapshot)?.into_bytes())
    }

    /// Replace the global and section tiers from a snapshot blob.
    ///
    /// The ephemeral tier is empty afterwards. Snapshot entries for
    /// sections the current story does not define are skipped.
    pub fn restore(&mut self, blob: &[u8]) -> Result<(), ScopeError> {
        let text = std::str::from_utf8(blob)?;
        let snapshot: StateSnapshot = ron::from_str(text)?;

        self.engine.clear_globals()?;
        for (name, value) in &snapshot.globals {
            self.engine.set_global(name, value)?;
        }

        for scope in self.sections.values_mut() {
            *scope = SectionScope::default();
        }
        for (id, scope) in snapshot.sections {
            match self.sections.get_mut(&id) {
                Some(slot) => *slot = scope,
                None => warn!("snapshot names unknown section '{}'; skipped", id),
            }
        }

        self.ephemeral.clear();
        Ok(())
    }

    /// Discard everything story-defined: globals, section namespaces,
    /// counters, markers, ephemeral values. Registered section ids remain.
    pub fn reset(&mut self) -> Result<(), ScopeError> {
        self.engine.clear_globals()?;
        for scope in self.sections.values_mut() {
            *scope = SectionScope::default();
        }
        self.ephemeral.clear();
        Ok(())
    }

    fn section_scope(&self, id: &str) -> Result<&SectionScope, ScopeError> {
        self.sections
            .get(id)
            .ok_or_else(|| ScopeError::UnknownSection(id.to_string()))
    }

    fn section_scope_mut(&mut self, id: &str) -> Result<&mut SectionScope, ScopeError> {
        self.sections
            .get_mut(id)
            .ok_or_else(|| ScopeError::UnknownSection(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes_with(ids: &[&str]) -> ScopeManager {
        let mut scopes = ScopeManager::new().unwrap();
        for id in ids {
            scopes.register_section(id);
        }
        scopes
    }

    #[test]
    fn unknown_section_is_an_error() {
        let mut scopes = scopes_with(&["start"]);
        assert!(scopes.get_section_var("nowhere", "x").is_err());
        assert!(scopes
            .set_section_var("nowhere", "x", Value::Int(1))
            .is_err());
        assert!(scopes.get_section_var("start", "x").is_ok());
    }

    #[test]
    fn section_writes_from_script_are_harvested() {
        let mut scopes = scopes_with(&["start"]);
        scopes
            .exec("section.mood = 'dark'\ntemp.step = 3", "test", Some("start"))
            .unwrap();
        assert_eq!(
            scopes.get_section_var("start", "mood").unwrap(),
            Value::Str("dark".to_string())
        );
        assert_eq!(scopes.get_ephemeral("step"), Value::Int(3));
    }

    #[test]
    fn tiers_are_distinct_namespaces() {
        let mut scopes = scopes_with(&["start"]);
        scopes.set_global("x", &Value::Int(1)).unwrap();
        scopes
            .set_section_var("start", "x", Value::Int(2))
            .unwrap();
        scopes.set_ephemeral("x", Value::Int(3));
        assert_eq!(scopes.get_global("x").unwrap(), Value::Int(1));
        assert_eq!(
            scopes.get_section_var("start", "x").unwrap(),
            Value::Int(2)
        );
        assert_eq!(scopes.get_ephemeral("x"), Value::Int(3));
    }

    #[test]
    fn reserved_values_visible_to_scripts() {
        let mut scopes = scopes_with(&["start"]);
        scopes.bump_visits("start").unwrap();
        let result = scopes
            .exec("return visits .. ':' .. section_id", "test", Some("start"))
            .unwrap();
        assert_eq!(result, Value::Str("1:start".to_string()));
    }

    #[test]
    fn seed_defaults_never_overwrite() {
        let mut scopes = scopes_with(&["start"]);
        scopes
            .set_section_var("start", "mood", Value::Str("restored".to_string()))
            .unwrap();
        let defaults = BTreeMap::from([
            ("mood".to_string(), Value::Str("default".to_string())),
            ("fresh".to_string(), Value::Int(1)),
        ]);
        scopes.seed_section_defaults("start", &defaults).unwrap();
        assert_eq!(
            scopes.get_section_var("start", "mood").unwrap(),
            Value::Str("restored".to_string())
        );
        assert_eq!(
            scopes.get_section_var("start", "fresh").unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn take_jump_reads_and_clears() {
        let mut scopes = scopes_with(&["start"]);
        assert_eq!(scopes.take_jump().unwrap(), None);
        scopes.exec("jump = 'cellar'", "test", None).unwrap();
        assert_eq!(scopes.take_jump().unwrap(), Some("cellar".to_string()));
        assert_eq!(scopes.take_jump().unwrap(), None);
    }

    #[test]
    fn snapshot_round_trip_is_lossless_and_stable() {
        let mut scopes = scopes_with(&["start", "cellar"]);
        scopes.set_global("gold", &Value::Int(10)).unwrap();
        scopes
            .set_global("name", &Value::Str("Brynn".to_string()))
            .unwrap();
        scopes
            .set_section_var("cellar", "lit", Value::Bool(true))
            .unwrap();
        scopes.bump_visits("cellar").unwrap();
        scopes.mark_chosen("cellar", "light_lamp").unwrap();

        let first = scopes.snapshot().unwrap();
        scopes.restore(&first).unwrap();
        let second = scopes.snapshot().unwrap();
        assert_eq!(first, second);

        assert_eq!(scopes.get_global("gold").unwrap(), Value::Int(10));
        assert_eq!(scopes.visits("cellar").unwrap(), 1);
        assert!(scopes.was_chosen("cellar", "light_lamp").unwrap());
    }

    #[test]
    fn ephemeral_never_persisted() {
        let mut scopes = scopes_with(&["start"]);
        scopes.set_ephemeral("secret", Value::Str("hush".to_string()));
        let blob = scopes.snapshot().unwrap();
        let text = std::str::from_utf8(&blob).unwrap();
        assert!(!text.contains("hush"));

        scopes.restore(&blob).unwrap();
        assert_eq!(scopes.get_ephemeral("secret"), Value::Nil);
    }

    #[test]
    fn reserved_names_never_persisted() {
        let mut scopes = scopes_with(&["start"]);
        scopes.bump_visits("start").unwrap();
        scopes.exec("gold = 5", "test", Some("start")).unwrap();
        let blob = scopes.snapshot().unwrap();
        let text = std::str::from_utf8(&blob).unwrap();
        assert!(!text.contains("section_id"));
        assert!(!text.contains("temp"));
    }

    #[test]
    fn restore_replaces_globals_entirely() {
        let mut scopes = scopes_with(&["start"]);
        scopes.set_global("gold", &Value::Int(10)).unwrap();
        let blob = scopes.snapshot().unwrap();

        scopes.set_global("gold", &Value::Int(99)).unwrap();
        scopes.set_global("stray", &Value::Bool(true)).unwrap();
        scopes.restore(&blob).unwrap();

        assert_eq!(scopes.get_global("gold").unwrap(), Value::Int(10));
        assert_eq!(scopes.get_global("stray").unwrap(), Value::Nil);
    }

    #[test]
    fn restore_skips_unknown_sections() {
        let mut scopes = scopes_with(&["start", "attic"]);
        scopes.bump_visits("attic").unwrap();
        let blob = scopes.snapshot().unwrap();

        let mut narrower = scopes_with(&["start"]);
        narrower.restore(&blob).unwrap();
        assert!(narrower.get_section_var("attic", "x").is_err());
    }

    #[test]
    fn reset_discards_everything() {
        let mut scopes = scopes_with(&["start"]);
        scopes.set_global("gold", &Value::Int(10)).unwrap();
        scopes.bump_visits("start").unwrap();
        scopes.mark_chosen("start", "once_option").unwrap();
        scopes.reset().unwrap();

        assert_eq!(scopes.get_global("gold").unwrap(), Value::Nil);
        assert_eq!(scopes.visits("start").unwrap(), 0);
        assert!(!scopes.was_chosen("start", "once_option").unwrap());
    }
}
