/// Event and hook dispatch — externally triggered handlers plus the
/// fixed lifecycle callbacks.

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::scope::{ScopeError, ScopeManager};
use crate::schema::definition::EventDef;
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no event named '{0}'")]
    UnknownEvent(String),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// The fixed registry of lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Fires after every choice execution, whether or not it navigates.
    PostOption,
    /// Fires after every section's text is materialized.
    PostVisit,
}

impl Hook {
    pub fn parse(name: &str) -> Option<Hook> {
        match name {
            "post_option" => Some(Hook::PostOption),
            "post_visit" => Some(Hook::PostVisit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Hook::PostOption => "post_option",
            Hook::PostVisit => "post_visit",
        }
    }
}

/// Invokes named event handlers and lifecycle hooks.
#[derive(Debug, Default)]
pub struct Dispatcher {
    events: FxHashMap<String, EventDef>,
    hooks: FxHashMap<Hook, String>,
}

impl Dispatcher {
    pub fn register_event(&mut self, id: &str, def: EventDef) {
        self.events.insert(id.to_string(), def);
    }

    pub fn register_hook(&mut self, hook: Hook, code: String) {
        self.hooks.insert(hook, code);
    }

    /// Invoke a named event handler and return its user-facing message.
    ///
    /// Positional arguments are bound as fresh ephemeral values under the
    /// handler's declared parameter names; unsupplied parameters read as
    /// nil. The handler runs with full global and section access against
    /// whichever section is current. A nil result coerces to the empty
    /// string.
    pub fn trigger(
        &self,
        id: &str,
        args: &[Value],
        scopes: &mut ScopeManager,
        current: Option<&str>,
    ) -> Result<String, DispatchError> {
        let handler = self
            .events
            .get(id)
            .ok_or_else(|| DispatchError::UnknownEvent(id.to_string()))?;
        debug!("trigger '{}' with {} args", id, args.len());

        scopes.clear_ephemeral();
        for (param, arg) in handler.params.iter().zip(args) {
            scopes.set_ephemeral(param, arg.clone());
        }

        let label = format!("event:{}", id);
        let result = scopes.exec(&handler.run, &label, current)?;
        Ok(match result {
            Value::Nil => String::new(),
            Value::Str(message) => message,
            other => other.to_string(),
        })
    }

    /// Fire a lifecycle hook. Hooks receive no arguments and return no
    /// value; only side effects matter, including a `jump` write. Script
    /// faults are isolated and logged, never fatal.
    pub fn fire(&self, hook: Hook, scopes: &mut ScopeManager, current: Option<&str>) {
        let Some(code) = self.hooks.get(&hook) else {
            return;
        };
        let label = format!("hook:{}", hook.name());
        if let Err(e) = scopes.exec(code, &label, current) {
            warn!("hook '{}' failed: {}", hook.name(), e);
        }
    }
}
