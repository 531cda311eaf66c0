//! sightline-docs: configuration documentation tables
//!
//! Turns a comment-annotated YAML defaults file into structured tables:
//! - Line grammar for headings and `key: value  # (type) description` entries
//! - Section collection driven by heading depth
//! - Markdown rendering for the documentation site

pub mod lines;
pub mod render;
pub mod table;

pub use lines::{EntryError, RawEntry};
pub use render::{tables_to_markdown, to_markdown};
pub use table::{
    ConfigEntry, ConfigGroup, ConfigNode, ConfigTable, DEFAULT_SECTIONS, DocsError,
    MAX_SECTION_DEPTH, TableBuilder,
};
