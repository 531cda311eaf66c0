//! Per-section configuration tables.
//!
//! A [`TableBuilder`] walks the prepared lines of a configuration file, picks
//! out the allow-listed section headings, and collects the entries below each
//! one until a heading at the same depth or shallower closes the section.

use std::path::Path;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::lines::{
    EntryError, heading_depth, heading_title, parse_entry, prepare_lines, section_heading_depth,
};

/// Deepest heading that can open a section.
pub const MAX_SECTION_DEPTH: usize = 2;

/// Section titles documented by default.
pub const DEFAULT_SECTIONS: &[&str] = &[
    "Train settings",
    "Segmentation train settings",
    "Classification train settings",
    "Val/Test settings",
    "Predict settings",
    "Visualize settings",
    "Export settings",
    "Hyperparameters",
    "Augmentation",
    "Segmentation Augmentations",
    "Classification Augmentations",
    "Custom config.yaml",
    "Tracker",
];

/// Error type for table building.
#[derive(Debug, thiserror::Error)]
pub enum DocsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Malformed entry ({reason}): {line}")]
    MalformedEntry { line: String, reason: EntryError },
}

pub type Result<T> = std::result::Result<T, DocsError>;

/// A documented configuration key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    /// Default value, typed as YAML.
    pub value: Value,
    #[serde(rename = "type")]
    pub type_name: String,
    pub desc: String,
}

/// A nested group opened by a deeper heading inside a section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigGroup {
    pub title: String,
    pub depth: usize,
    pub nodes: Vec<ConfigNode>,
}

/// One item in a section: a key or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigNode {
    Entry(ConfigEntry),
    Group(ConfigGroup),
}

/// One documented section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigTable {
    pub name: String,
    /// Heading depth of the section title.
    pub depth: usize,
    pub nodes: Vec<ConfigNode>,
}

impl ConfigTable {
    /// All entries in document order, including those in nested groups.
    pub fn entries(&self) -> Vec<&ConfigEntry> {
        let mut out = Vec::new();
        collect_entries(&self.nodes, &mut out);
        out
    }

    /// Look up an entry by key anywhere in the section.
    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries().into_iter().find(|e| e.key == key)
    }

    /// Number of entries, including nested ones.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The section as a nested mapping:
    /// `{name: {key: {value, type, desc}, group: {key: ...}}}`.
    pub fn to_value(&self) -> Value {
        let mut outer = Mapping::new();
        outer.insert(
            Value::String(self.name.clone()),
            Value::Mapping(nodes_to_mapping(&self.nodes)),
        );
        Value::Mapping(outer)
    }
}

fn collect_entries<'a>(nodes: &'a [ConfigNode], out: &mut Vec<&'a ConfigEntry>) {
    for node in nodes {
        match node {
            ConfigNode::Entry(entry) => out.push(entry),
            ConfigNode::Group(group) => collect_entries(&group.nodes, out),
        }
    }
}

fn nodes_to_mapping(nodes: &[ConfigNode]) -> Mapping {
    let mut map = Mapping::new();
    for node in nodes {
        match node {
            ConfigNode::Entry(entry) => {
                let mut fields = Mapping::new();
                fields.insert("value".into(), entry.value.clone());
                fields.insert("type".into(), entry.type_name.clone().into());
                fields.insert("desc".into(), entry.desc.clone().into());
                map.insert(entry.key.clone().into(), Value::Mapping(fields));
            }
            ConfigNode::Group(group) => {
                map.insert(
                    group.title.clone().into(),
                    Value::Mapping(nodes_to_mapping(&group.nodes)),
                );
            }
        }
    }
    map
}

/// Builds [`ConfigTable`]s from a configuration file.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    sections: Vec<String>,
    max_section_depth: usize,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self {
            sections: DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect(),
            max_section_depth: MAX_SECTION_DEPTH,
        }
    }
}

impl TableBuilder {
    /// Create a builder with the default section allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the section allow-list.
    pub fn with_sections<I, S>(mut self, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections = sections.into_iter().map(Into::into).collect();
        self
    }

    /// The section titles this builder documents.
    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    /// Read a configuration file and build its tables.
    pub fn build_file(&self, path: &Path) -> Result<Vec<ConfigTable>> {
        let text = std::fs::read_to_string(path)?;
        tracing::debug!("Building config tables from {}", path.display());
        self.build(&text)
    }

    /// Parse the YAML defaults out of `text`, then build its tables.
    pub fn build(&self, text: &str) -> Result<Vec<ConfigTable>> {
        let defaults = match serde_yaml::from_str::<Value>(text)? {
            Value::Mapping(map) => map,
            _ => Mapping::new(),
        };
        self.build_with_defaults(&defaults, text)
    }

    /// Build tables from an already-parsed key-to-default mapping and the raw text.
    pub fn build_with_defaults(&self, defaults: &Mapping, text: &str) -> Result<Vec<ConfigTable>> {
        let lines = prepare_lines(text);
        let mut tables = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let Some(depth) = section_heading_depth(line, self.max_section_depth) else {
                continue;
            };
            let title = heading_title(line);
            if !self.sections.iter().any(|s| s == title) {
                continue;
            }

            let nodes = collect_section(&lines[idx + 1..], depth, defaults)?;
            tracing::debug!("Section '{}': {} top-level nodes", title, nodes.len());
            tables.push(ConfigTable {
                name: title.to_string(),
                depth,
                nodes,
            });
        }

        tracing::info!("Built {} config tables", tables.len());
        Ok(tables)
    }
}

/// Collect entries following a section heading of `depth` until the section closes.
fn collect_section(lines: &[String], depth: usize, defaults: &Mapping) -> Result<Vec<ConfigNode>> {
    let mut stack = vec![ConfigGroup {
        title: String::new(),
        depth,
        nodes: Vec::new(),
    }];

    for line in lines {
        let n = heading_depth(line);
        if n == 0 {
            let entry = to_entry(line, defaults)?;
            if let Some(group) = stack.last_mut() {
                group.nodes.push(ConfigNode::Entry(entry));
            }
            continue;
        }
        if n <= depth {
            break;
        }
        while stack.len() > 1 && stack.last().is_some_and(|g| g.depth >= n) {
            close_group(&mut stack);
        }
        stack.push(ConfigGroup {
            title: heading_title(line).to_string(),
            depth: n,
            nodes: Vec::new(),
        });
    }

    while stack.len() > 1 {
        close_group(&mut stack);
    }
    Ok(stack.pop().map(|root| root.nodes).unwrap_or_default())
}

/// Pop the innermost group into its parent.
fn close_group(stack: &mut Vec<ConfigGroup>) {
    if let Some(group) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.nodes.push(ConfigNode::Group(group));
        }
    }
}

fn to_entry(line: &str, defaults: &Mapping) -> Result<ConfigEntry> {
    let raw = parse_entry(line).map_err(|reason| DocsError::MalformedEntry {
        line: line.to_string(),
        reason,
    })?;

    let value = match defaults.get(raw.key.as_str()) {
        Some(v) => v.clone(),
        None => serde_yaml::from_str(&raw.raw_value)
            .unwrap_or_else(|_| Value::String(raw.raw_value.clone())),
    };

    Ok(ConfigEntry {
        key: raw.key,
        value,
        type_name: raw.type_name,
        desc: raw.description,
    })
}
