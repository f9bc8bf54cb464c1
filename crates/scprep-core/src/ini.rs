//! Minimal INI document for `sssd.conf` and systemd unit files.
//!
//! Keeps section and key order and passes comments, blank lines and
//! value-less keys through untouched, so editing one section of an existing
//! file leaves the rest of it as the administrator wrote it.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    lines: Vec<Line>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Self {
        let mut doc = Self::default();
        for raw in input.lines() {
            let trimmed = raw.trim();
            if let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                doc.sections.push(Section {
                    name: name.trim().to_owned(),
                    lines: Vec::new(),
                });
                continue;
            }

            let line = match parse_entry(trimmed) {
                Some((key, value)) => Line::Entry { key, value },
                None => Line::Raw(raw.to_owned()),
            };
            match (doc.sections.last_mut(), line) {
                (Some(section), line) => section.lines.push(line),
                (None, _) => doc.preamble.push(raw.to_owned()),
            }
        }
        doc
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    /// Add an empty section at the end unless one with this name exists.
    pub fn ensure_section(&mut self, name: &str) {
        if !self.has_section(name) {
            self.sections.push(Section {
                name: name.to_owned(),
                lines: Vec::new(),
            });
        }
    }

    /// Set `key` in `section`, creating either as needed. An existing key
    /// keeps its position.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.ensure_section(section);
        let value = value.into();
        let Some(section) = self.sections.iter_mut().find(|s| s.name == section) else {
            return;
        };
        for line in &mut section.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value;
                    return;
                }
            }
        }
        // Keep trailing blank lines after the new entry.
        let at = section
            .lines
            .iter()
            .rposition(|l| !matches!(l, Line::Raw(r) if r.trim().is_empty()))
            .map_or(0, |i| i + 1);
        section.lines.insert(
            at,
            Line::Entry {
                key: key.to_owned(),
                value,
            },
        );
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.lines.iter().find_map(|l| match l {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }
}

fn parse_entry(line: &str) -> Option<(String, String)> {
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_owned(), value.trim().to_owned()))
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.preamble {
            writeln!(f, "{line}")?;
        }
        let mut needs_gap = self
            .preamble
            .last()
            .is_some_and(|l| !l.trim().is_empty());
        for section in &self.sections {
            if needs_gap {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for line in &section.lines {
                match line {
                    Line::Entry { key, value } => writeln!(f, "{key} = {value}")?,
                    Line::Raw(raw) => writeln!(f, "{raw}")?,
                }
            }
            needs_gap = !matches!(section.lines.last(), Some(Line::Raw(r)) if r.trim().is_empty());
        }
        Ok(())
    }
}
