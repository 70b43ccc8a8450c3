/// Story definition model — YAML loading and option-shape normalization.

use serde::Deserialize;
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use super::value::{yaml_scalar_key, Value};

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("story has no sections")]
    NoSections,
    #[error("section '{0}': {1}")]
    BadSection(String, String),
    #[error("option '{0}.{1}': {2}")]
    BadOption(String, String, String),
    #[error("section '{0}' includes unknown template '{1}'")]
    UnknownTemplate(String, String),
    #[error("unknown hook '{0}'")]
    UnknownHook(String),
    #[error("template parse error in {0}: {1}")]
    Template(String, String),
}

/// Visibility/consumption flags an option may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceFlag {
    /// Consumed permanently once executed.
    Once,
    /// Only offered on the section's first visit.
    First,
    /// Only offered from the second visit on.
    NotFirst,
}

/// A normalized option definition. The short form `[text, goto]` and the
/// long mapping form collapse into this one shape at parse time.
#[derive(Debug, Clone)]
pub struct OptionDef {
    pub id: String,
    pub text: String,
    /// The `goto` field of the source form.
    pub target: Option<String>,
    pub condition: Option<String>,
    pub run: Option<String>,
    pub notify: Option<String>,
    pub confirm: Option<String>,
    pub hidden: bool,
    pub flags: Vec<ChoiceFlag>,
}

#[derive(Debug, Clone)]
pub struct SectionDef {
    pub id: String,
    pub title: Option<String>,
    pub text: String,
    pub run: Option<String>,
    pub vars: BTreeMap<String, Value>,
    /// Option-set templates merged into this section's options.
    pub include: Vec<String>,
    /// Definition order is display order.
    pub options: Vec<OptionDef>,
}

#[derive(Debug, Clone)]
pub struct EventDef {
    /// Names the positional trigger arguments bind to.
    pub params: Vec<String>,
    pub run: String,
}

/// A complete parsed story definition.
///
/// Section order follows the document; the first section is the canonical
/// entry point.
#[derive(Debug, Clone)]
pub struct StoryDefinition {
    pub title: String,
    pub system: Option<String>,
    pub vars: BTreeMap<String, Value>,
    pub init: Option<String>,
    pub sections: Vec<SectionDef>,
    pub templates: BTreeMap<String, Vec<OptionDef>>,
    pub events: BTreeMap<String, EventDef>,
    pub hooks: BTreeMap<String, String>,
}

// YAML deserialization helpers — the document shape differs from the
// internal types, so intermediate structs do the first pass.

#[derive(Debug, Deserialize)]
struct RawStory {
    title: String,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    vars: Mapping,
    #[serde(default)]
    init: Option<String>,
    #[serde(default)]
    sections: Mapping,
    #[serde(default)]
    templates: Mapping,
    #[serde(default)]
    events: BTreeMap<String, RawEvent>,
    #[serde(default)]
    hooks: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    run: Option<String>,
    #[serde(default)]
    vars: Mapping,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    options: Mapping,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOption {
    Short(String, String),
    Long {
        text: String,
        #[serde(default, rename = "goto")]
        target: Option<String>,
        #[serde(default, rename = "if")]
        condition: Option<String>,
        #[serde(default)]
        run: Option<String>,
        #[serde(default)]
        notify: Option<String>,
        #[serde(default)]
        confirm: Option<String>,
        #[serde(default)]
        hidden: bool,
        #[serde(default)]
        flags: Vec<ChoiceFlag>,
    },
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    params: Vec<String>,
    run: String,
}

impl StoryDefinition {
    /// Load a story definition from a YAML file.
    pub fn load_from_yaml(path: &Path) -> Result<StoryDefinition, DefinitionError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_yaml(&contents)
    }

    /// Parse a story definition from a YAML string.
    ///
    /// Merge anchors (`<<`) are resolved by the document layer before the
    /// structural pass, so authors can share option blocks with plain YAML
    /// anchors in addition to the engine's named templates.
    pub fn parse_yaml(input: &str) -> Result<StoryDefinition, DefinitionError> {
        let mut doc: YamlValue = serde_yaml::from_str(input)?;
        doc.apply_merge()?;
        let raw: RawStory = serde_yaml::from_value(doc)?;

        if raw.sections.is_empty() {
            return Err(DefinitionError::NoSections);
        }

        let mut sections = Vec::with_capacity(raw.sections.len());
        for (key, node) in &raw.sections {
            let id = yaml_scalar_key(key)
                .ok_or_else(|| DefinitionError::BadSection(format!("{:?}", key), "non-scalar section id".to_string()))?;
            let raw_section: RawSection = serde_yaml::from_value(node.clone())
                .map_err(|e| DefinitionError::BadSection(id.clone(), e.to_string()))?;
            sections.push(SectionDef {
                options: parse_options(&id, &raw_section.options)?,
                vars: parse_vars(&raw_section.vars),
                id,
                title: raw_section.title,
                text: raw_section.text,
                run: raw_section.run,
                include: raw_section.include,
            });
        }

        let mut templates = BTreeMap::new();
        for (key, node) in &raw.templates {
            let name = yaml_scalar_key(key)
                .ok_or_else(|| DefinitionError::BadSection(format!("{:?}", key), "non-scalar template name".to_string()))?;
            let options: Mapping = serde_yaml::from_value(node.clone())
                .map_err(|e| DefinitionError::BadSection(name.clone(), e.to_string()))?;
            templates.insert(name.clone(), parse_options(&name, &options)?);
        }

        let events = raw
            .events
            .into_iter()
            .map(|(id, e)| {
                (
                    id,
                    EventDef {
                        params: e.params,
                        run: e.run,
                    },
                )
            })
            .collect();

        Ok(StoryDefinition {
            title: raw.title,
            system: raw.system,
            vars: parse_vars(&raw.vars),
            init: raw.init,
            sections,
            templates,
            events,
            hooks: raw.hooks,
        })
    }
}

fn parse_vars(vars: &Mapping) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, node) in vars {
        if let Some(name) = yaml_scalar_key(key) {
            out.insert(name, Value::from_yaml(node));
        }
    }
    out
}

fn parse_options(owner: &str, options: &Mapping) -> Result<Vec<OptionDef>, DefinitionError> {
    let mut out = Vec::with_capacity(options.len());
    for (key, node) in options {
        let id = yaml_scalar_key(key).ok_or_else(|| {
            DefinitionError::BadOption(
                owner.to_string(),
                format!("{:?}", key),
                "non-scalar option id".to_string(),
            )
        })?;
        let raw: RawOption = serde_yaml::from_value(node.clone()).map_err(|e| {
            DefinitionError::BadOption(owner.to_string(), id.clone(), e.to_string())
        })?;
        out.push(match raw {
            RawOption::Short(text, target) => OptionDef {
                id,
                text,
                target: Some(target),
                condition: None,
                run: None,
                notify: None,
                confirm: None,
                hidden: false,
                flags: Vec::new(),
            },
            RawOption::Long {
                text,
                target,
                condition,
                run,
                notify,
                confirm,
                hidden,
                flags,
            } => OptionDef {
                id,
                text,
                target,
                condition,
                run,
                notify,
                confirm,
                hidden,
                flags,
            },
        });
    }
    Ok(out)
}
