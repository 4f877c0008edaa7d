//! Keyfile configuration store.
//!
//! A keyfile is a sequence of `[group]` sections holding `key=value`
//! entries. Blank lines and lines starting with `#` are ignored. Lists are
//! comma separated; booleans accept `true/false`, `yes/no` and `1/0`.
//! Every parsed group and key remembers its line so that errors can be
//! reported against the source file.
//!
//! Values are escaped when written: `\\`, `\n`, `\r` and `\t` stand for
//! a backslash, newline, carriage return and tab, and `\s` for a leading
//! space. A value therefore always occupies exactly one line. Unknown
//! escapes are kept as written, so regular expressions such as `\.` read
//! back unchanged.

use crate::config::types::{KeyfileError, Position};
use log::warn;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// How strictly a key must (or must not) be present
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// May be present or absent
    Optional,
    /// Must be present
    Required,
    /// Must not be present
    Disallowed,
    /// Accepted with a warning; will be removed in the future
    Deprecated,
    /// Accepted with a warning and ignored
    Obsolete,
}

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    key: String,
    value: String,
    line: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
struct Group {
    name: String,
    line: Option<usize>,
    entries: Vec<Entry>,
}

impl Group {
    fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

/// Ordered group/key/value store
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Keyfile {
    source: Option<PathBuf>,
    groups: Vec<Group>,
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("static key pattern is valid")
    })
}

/// Parse a keyfile boolean
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Escape a value for writing on a single line
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (index, c) in value.chars().enumerate() {
        match c {
            ' ' if index == 0 => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('s') => out.push(' '),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Split a comma-separated keyfile list, dropping empty items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl Keyfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and parse a keyfile from disk
    pub fn read(path: &Path) -> Result<Self, KeyfileError> {
        let text = std::fs::read_to_string(path).map_err(|source| KeyfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, Some(path))
    }

    /// Parse keyfile text; `source` is only used for error positions
    pub fn parse(text: &str, source: Option<&Path>) -> Result<Self, KeyfileError> {
        let mut keyfile = Keyfile {
            source: source.map(Path::to_path_buf),
            groups: Vec::new(),
        };

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let pos = Position {
                file: keyfile.source.clone(),
                line: Some(line),
            };
            let content = raw.trim_start();
            let trimmed = content.trim_end();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| KeyfileError::InvalidLine {
                    pos: pos.clone(),
                    text: raw.to_string(),
                })?;
                if name.is_empty() || name.contains(['[', ']']) {
                    return Err(KeyfileError::InvalidGroup {
                        pos,
                        group: name.to_string(),
                    });
                }
                if keyfile.has_group(name) {
                    return Err(KeyfileError::DuplicateGroup {
                        pos,
                        group: name.to_string(),
                    });
                }
                keyfile.groups.push(Group {
                    name: name.to_string(),
                    line: Some(line),
                    entries: Vec::new(),
                });
                continue;
            }

            // Only the space around '=' is insignificant
            let (key, value) = content.split_once('=').ok_or_else(|| KeyfileError::InvalidLine {
                pos: pos.clone(),
                text: raw.to_string(),
            })?;
            let key = key.trim_end();
            let value = unescape_value(value.trim_start());

            if !key_pattern().is_match(key) {
                return Err(KeyfileError::InvalidKey {
                    pos,
                    key: key.to_string(),
                });
            }

            let group = keyfile.groups.last_mut().ok_or_else(|| KeyfileError::NoGroup {
                pos: pos.clone(),
                key: key.to_string(),
            })?;
            if group.entry(key).is_some() {
                return Err(KeyfileError::DuplicateKey {
                    pos,
                    group: group.name.clone(),
                    key: key.to_string(),
                });
            }
            group.entries.push(Entry {
                key: key.to_string(),
                value,
                line: Some(line),
            });
        }

        Ok(keyfile)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn group(&self, group: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == group)
    }

    fn group_mut(&mut self, group: &str) -> &mut Group {
        let index = match self.groups.iter().position(|g| g.name == group) {
            Some(index) => index,
            None => {
                self.groups.push(Group {
                    name: group.to_string(),
                    line: None,
                    entries: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index]
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.group(group).is_some()
    }

    pub fn has_key(&self, group: &str, key: &str) -> bool {
        self.get_value(group, key).is_some()
    }

    /// Keys of a group, in file order
    pub fn keys(&self, group: &str) -> Vec<&str> {
        self.group(group)
            .map(|g| g.entries.iter().map(|e| e.key.as_str()).collect())
            .unwrap_or_default()
    }

    /// Position of a key, falling back to its group's position
    pub fn position(&self, group: &str, key: Option<&str>) -> Position {
        let group = self.group(group);
        let line = match (group, key) {
            (Some(g), Some(k)) => g.entry(k).and_then(|e| e.line).or(g.line),
            (Some(g), None) => g.line,
            (None, _) => None,
        };
        Position {
            file: self.source.clone(),
            line,
        }
    }

    pub fn get_value(&self, group: &str, key: &str) -> Option<&str> {
        self.group(group)
            .and_then(|g| g.entry(key))
            .map(|e| e.value.as_str())
    }

    pub fn get_bool(&self, group: &str, key: &str) -> Result<Option<bool>, KeyfileError> {
        match self.get_value(group, key) {
            None => Ok(None),
            Some(value) => parse_bool(value)
                .map(Some)
                .ok_or_else(|| self.invalid_value(group, key, value)),
        }
    }

    pub fn get_list(&self, group: &str, key: &str) -> Option<Vec<String>> {
        self.get_value(group, key).map(split_list)
    }

    /// Fetch a value after validating its presence against `priority`
    pub fn get_checked(
        &self,
        group: &str,
        key: &str,
        priority: Priority,
    ) -> Result<Option<&str>, KeyfileError> {
        let value = self.get_value(group, key);
        self.check_priority(group, key, priority, value.is_some())?;
        Ok(value)
    }

    /// Validate presence of a key against its priority
    ///
    /// Missing required and present disallowed keys are errors; deprecated
    /// and obsolete keys only warn.
    pub fn check_priority(
        &self,
        group: &str,
        key: &str,
        priority: Priority,
        present: bool,
    ) -> Result<(), KeyfileError> {
        match (priority, present) {
            (Priority::Required, false) => Err(KeyfileError::MissingKey {
                pos: self.position(group, None),
                group: group.to_string(),
                key: key.to_string(),
            }),
            (Priority::Disallowed, true) => Err(KeyfileError::DisallowedKey {
                pos: self.position(group, Some(key)),
                group: group.to_string(),
                key: key.to_string(),
            }),
            (Priority::Deprecated, true) => {
                warn!(
                    "{}[{}]: {}: this key is deprecated and will be removed in the future",
                    self.position(group, Some(key)),
                    group,
                    key
                );
                Ok(())
            }
            (Priority::Obsolete, true) => {
                warn!(
                    "{}[{}]: {}: this key has been removed and no longer has any effect",
                    self.position(group, Some(key)),
                    group,
                    key
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn invalid_value(&self, group: &str, key: &str, value: &str) -> KeyfileError {
        KeyfileError::InvalidValue {
            pos: self.position(group, Some(key)),
            group: group.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn set_value(&mut self, group: &str, key: &str, value: impl Into<String>) {
        let value = value.into();
        let group = self.group_mut(group);
        match group.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.value = value,
            None => group.entries.push(Entry {
                key: key.to_string(),
                value,
                line: None,
            }),
        }
    }

    pub fn set_bool(&mut self, group: &str, key: &str, value: bool) {
        self.set_value(group, key, if value { "true" } else { "false" });
    }

    pub fn set_list<S: AsRef<str>>(&mut self, group: &str, key: &str, values: &[S]) {
        let joined = values
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        self.set_value(group, key, joined);
    }

    pub fn remove_key(&mut self, group: &str, key: &str) {
        if let Some(g) = self.groups.iter_mut().find(|g| g.name == group) {
            g.entries.retain(|e| e.key != key);
        }
    }

    pub fn remove_group(&mut self, group: &str) {
        self.groups.retain(|g| g.name != group);
    }
}

impl fmt::Display for Keyfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, group) in self.groups.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", group.name)?;
            for entry in &group.entries {
                writeln!(f, "{}={}", entry.key, escape_value(&entry.value))?;
            }
        }
        Ok(())
    }
}
