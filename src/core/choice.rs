/// Choice evaluation — visibility flags, conditions, and execution.

use tracing::{debug, warn};

use crate::core::interp::Template;
use crate::core::scope::{ScopeError, ScopeManager};
use crate::schema::definition::{ChoiceFlag, DefinitionError, OptionDef};

/// A parsed navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goto {
    /// The reserved `self` token: re-enter the option's own section.
    Current,
    /// The reserved `restart` token: discard all state, back to the entry.
    Restart,
    Section(String),
}

impl Goto {
    pub fn parse(target: &str) -> Goto {
        match target {
            "self" => Goto::Current,
            "restart" => Goto::Restart,
            _ => Goto::Section(target.to_string()),
        }
    }
}

/// Where the session goes after a choice resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavTarget {
    /// No navigation; the current section stays as rendered.
    Stay,
    /// Enter the named section (possibly the current one again).
    Section(String),
    /// Discard all persisted state and re-enter the canonical entry.
    Restart,
}

/// The result of executing a choice. Navigation itself is resolved by
/// the orchestrator, which also weighs the pending-jump override.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOutcome {
    /// Confirmation text to surface to the player. Effects are already
    /// applied; gating is the presentation layer's call.
    pub confirm: Option<String>,
    /// Notification produced after run-code, so it sees fresh values.
    pub notification: Option<String>,
    pub target: NavTarget,
}

/// One selectable option of a section.
///
/// Choices merged in from templates are shared definitions, so per-play
/// state (the once-consumption marker) lives in the section tier, never
/// here.
#[derive(Debug, Clone)]
pub struct Choice {
    pub id: String,
    pub text: Template,
    pub target: Option<Goto>,
    pub condition: Option<String>,
    pub run: Option<String>,
    pub notify: Option<Template>,
    pub confirm: Option<Template>,
    pub hidden: bool,
    pub once: bool,
    pub first: bool,
    pub not_first: bool,
}

impl Choice {
    pub fn from_def(owner: &str, def: &OptionDef) -> Result<Choice, DefinitionError> {
        let parse = |field: &str, source: &str| {
            Template::parse(source).map_err(|e| {
                DefinitionError::Template(
                    format!("{}.{}.{}", owner, def.id, field),
                    e.to_string(),
                )
            })
        };
        Ok(Choice {
            id: def.id.clone(),
            text: parse("text", &def.text)?,
            target: def.target.as_deref().map(Goto::parse),
            condition: def.condition.clone(),
            run: def.run.clone(),
            notify: def.notify.as_deref().map(|t| parse("notify", t)).transpose()?,
            confirm: def
                .confirm
                .as_deref()
                .map(|t| parse("confirm", t))
                .transpose()?,
            hidden: def.hidden,
            once: def.flags.contains(&ChoiceFlag::Once),
            first: def.flags.contains(&ChoiceFlag::First),
            not_first: def.flags.contains(&ChoiceFlag::NotFirst),
        })
    }

    /// Decide whether this choice is offered right now.
    ///
    /// The guards short-circuit in a fixed order (hidden, consumed
    /// `once`, `first`, `not_first`) before the visibility condition is
    /// evaluated, so a hidden choice never executes script code. A
    /// condition that faults counts as false.
    ///
    /// Expects the section to be bound; the caller binds once per render
    /// pass.
    pub fn is_available(
        &self,
        scopes: &ScopeManager,
        section_id: &str,
    ) -> Result<bool, ScopeError> {
        if self.hidden {
            return Ok(false);
        }
        if self.once && scopes.was_chosen(section_id, &self.id)? {
            return Ok(false);
        }
        let visits = scopes.visits(section_id)?;
        if self.first && visits != 1 {
            return Ok(false);
        }
        if self.not_first && visits <= 1 {
            return Ok(false);
        }
        match &self.condition {
            None => Ok(true),
            Some(condition) => match scopes.eval_bound(condition, "condition") {
                Ok(value) => Ok(value.truthy()),
                Err(e) => {
                    warn!(
                        "condition for '{}.{}' failed, hiding option: {}",
                        section_id, self.id, e
                    );
                    Ok(false)
                }
            },
        }
    }

    /// Execute this choice's side effects.
    ///
    /// Run-code executes exactly once; a script fault aborts the whole
    /// call before any navigation or notification is computed. The
    /// once-consumption marker is set unconditionally after run-code,
    /// whether or not navigation follows.
    pub fn execute(
        &self,
        scopes: &mut ScopeManager,
        section_id: &str,
    ) -> Result<ChoiceOutcome, ScopeError> {
        debug!("executing '{}.{}'", section_id, self.id);
        if let Some(run) = &self.run {
            let label = format!("option:{}.{}", section_id, self.id);
            scopes.exec(run, &label, Some(section_id))?;
        }
        if self.once {
            scopes.mark_chosen(section_id, &self.id)?;
        }

        // Rebind so notify/confirm see the post-run state of every tier.
        scopes.bind(Some(section_id))?;
        let notification = self.notify.as_ref().map(|t| t.render(scopes));
        let confirm = self.confirm.as_ref().map(|t| t.render(scopes));

        let target = match &self.target {
            None => NavTarget::Stay,
            Some(Goto::Current) => NavTarget::Section(section_id.to_string()),
            Some(Goto::Restart) => NavTarget::Restart,
            Some(Goto::Section(id)) => NavTarget::Section(id.clone()),
        };

        Ok(ChoiceOutcome {
            confirm,
            notification,
            target,
        })
    }
}
