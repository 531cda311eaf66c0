//! Markdown rendering of config tables.

use std::fmt::Write;

use serde_yaml::Value;

use crate::table::{ConfigEntry, ConfigNode, ConfigTable};

const HEADER: &str = "| Key | Value | Type | Description |\n|-----|-------|------|-------------|\n";

/// Render one section as a Markdown heading followed by its tables.
///
/// Nested groups get their own heading one level below their parent.
pub fn to_markdown(table: &ConfigTable) -> String {
    let mut out = String::new();
    render_nodes(&mut out, &table.name, 2, &table.nodes);
    out
}

/// Render every table, separated by blank lines.
pub fn tables_to_markdown(tables: &[ConfigTable]) -> String {
    tables
        .iter()
        .map(to_markdown)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_nodes(out: &mut String, title: &str, level: usize, nodes: &[ConfigNode]) {
    let _ = writeln!(out, "{} {}\n", "#".repeat(level.min(6)), title);

    let entries: Vec<&ConfigEntry> = nodes
        .iter()
        .filter_map(|n| match n {
            ConfigNode::Entry(e) => Some(e),
            ConfigNode::Group(_) => None,
        })
        .collect();
    if !entries.is_empty() {
        out.push_str(HEADER);
        for entry in entries {
            let _ = writeln!(
                out,
                "| `{}` | `{}` | `{}` | {} |",
                entry.key,
                escape(&value_text(&entry.value)),
                escape(&entry.type_name),
                escape(&entry.desc)
            );
        }
        out.push('\n');
    }

    for node in nodes {
        if let ConfigNode::Group(group) = node {
            render_nodes(out, &group.title, level + 1, &group.nodes);
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn escape(text: &str) -> String {
    text.replace('|', "\\|")
}
