//! Line-level grammar for comment-annotated configuration files.
//!
//! The grammar is fixed:
//! - headings are `#`, `##`, ... followed by a space and a title
//! - entries are `key: value  # (type) description`
//!
//! Everything here operates on a single prepared line.

/// Why an entry line could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("missing '# ' comment separator")]
    MissingComment,
    #[error("missing ': ' key separator")]
    MissingKeySeparator,
}

/// A parsed `key: value  # (type) description` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub key: String,
    /// The value text as written, trimmed.
    pub raw_value: String,
    pub type_name: String,
    pub description: String,
}

/// Drop blank lines and strip spaces and dashes from both ends of the rest.
pub fn prepare_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim_matches(|c| c == ' ' || c == '-'))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Number of `#` characters in the first space-separated token.
///
/// Entry lines have depth 0 because their first token is the key.
pub fn heading_depth(line: &str) -> usize {
    line.split(' ')
        .next()
        .map(|token| token.matches('#').count())
        .unwrap_or(0)
}

/// Depth of `line` if it is a heading of at most `max_depth` levels.
///
/// A heading of depth N starts with exactly N `#` characters followed by a space.
pub fn section_heading_depth(line: &str, max_depth: usize) -> Option<usize> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > max_depth {
        return None;
    }
    line[hashes..].starts_with(' ').then_some(hashes)
}

/// Heading text with the markers removed.
pub fn heading_title(line: &str) -> &str {
    line.trim_matches(|c| c == '#' || c == ' ' || c == '-')
}

/// Parse an entry line into key, raw value, type and description.
pub fn parse_entry(line: &str) -> Result<RawEntry, EntryError> {
    let (entry, comment) = line.split_once("# ").ok_or(EntryError::MissingComment)?;
    let (key, raw_value) = entry
        .split_once(": ")
        .ok_or(EntryError::MissingKeySeparator)?;

    // Links never survive into the tables and bare colons would read as mappings.
    let comment = comment
        .split("http")
        .next()
        .unwrap_or_default()
        .replace(':', " -");
    let (type_name, description) = extract_type(&comment);

    Ok(RawEntry {
        key: key.trim().to_string(),
        raw_value: raw_value.trim().to_string(),
        type_name,
        description,
    })
}

/// Split a comment into its first parenthesized type and the trailing description.
pub fn extract_type(comment: &str) -> (String, String) {
    match (comment.find('('), comment.find(')')) {
        (Some(open), Some(close)) if open < close => {
            let type_name = comment[open..close]
                .trim_matches(|c| c == '(' || c == ')')
                .replace('|', "or")
                .replace("optional", "")
                .replace(", ", "");
            (
                type_name.trim().to_string(),
                comment[close + 1..].trim().to_string(),
            )
        }
        _ => (String::new(), comment.trim().to_string()),
    }
}
