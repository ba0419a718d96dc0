//! A minimal desktop-entry parser, covering what identity derivation and
//! desktop integration need from the format.
//!
//! Reference: <https://specifications.freedesktop.org/desktop-entry-spec/latest/ar01s03.html>

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A parsed desktop-entry file: an ordered list of named groups, each a
/// key-value mapping.
#[derive(Debug)]
pub struct DesktopFile {
    groups: Vec<Group>,
}

#[derive(Debug)]
pub struct Group {
    name: String,
    entries: HashMap<String, String>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl DesktopFile {
    /// Parse a desktop-entry document.
    ///
    /// Lines are trimmed before interpretation: `#` lines and blank lines
    /// are comments, `[name]` opens a group, everything else must be a
    /// `key = value` pair inside a group. Keys are restricted to
    /// `[A-Za-z0-9-]`; duplicate keys within a group and duplicate group
    /// names are rejected.
    pub fn parse(content: &str) -> Result<DesktopFile> {
        let mut groups: Vec<Group> = Vec::new();

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if groups.iter().any(|g| g.name == name) {
                    return Err(Error::DesktopParse(format!("duplicate group '{name}'")));
                }
                groups.push(Group { name: name.to_string(), entries: HashMap::new() });
                continue;
            }

            let group = groups.last_mut().ok_or_else(|| {
                Error::DesktopParse(format!("entry before any group header: '{line}'"))
            })?;
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::DesktopParse(format!(
                    "expected key value pair separated by '=': '{line}'"
                ))
            })?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(Error::DesktopParse(format!("invalid key '{key}'")));
            }
            if group.entries.contains_key(key) {
                return Err(Error::DesktopParse(format!(
                    "duplicate key '{key}' in group '{}'",
                    group.name
                )));
            }
            group.entries.insert(key.to_string(), value.to_string());
        }

        Ok(DesktopFile { groups })
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }
}
