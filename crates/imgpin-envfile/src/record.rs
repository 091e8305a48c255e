//! ---
//! imgpin_section: "03-service-state"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service environment files and the image-key naming convention."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, trace};

/// Errors raised while reading or writing an environment file.
#[derive(Debug, thiserror::Error)]
pub enum EnvFileError {
    #[error("environment file {} not found", .path.display())]
    NotFound { path: PathBuf },
    #[error("i/o error on environment file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{}:{line}: expected KEY=value", .path.display())]
    Malformed { path: PathBuf, line: usize },
    #[error("{}:{line}: continuation line without a preceding key", .path.display())]
    OrphanContinuation { path: PathBuf, line: usize },
}

/// Where the parser stands relative to `\` line continuations.
enum Continuation {
    None,
    Key(String),
    Orphan,
}

/// One physical slot of the file as it is written back.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry(String),
    Verbatim(String),
}

/// Ordered `KEY=value` mapping loaded from one file.
///
/// The record remembers the mapping as it was last loaded or written so the
/// caller can skip writing when nothing changed. A line ending in `\` carries
/// on into the next line; the marker stays part of the value so writing the
/// record back reproduces the file. Comment and blank lines keep their place
/// on write; keys added after load are appended at the end.
#[derive(Debug, Clone)]
pub struct EnvRecord {
    path: PathBuf,
    entries: IndexMap<String, String>,
    persisted: IndexMap<String, String>,
    layout: Vec<Line>,
}

impl EnvRecord {
    pub fn load(path: &Path) -> Result<Self, EnvFileError> {
        let raw = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                EnvFileError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                EnvFileError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let (entries, layout) = parse(path, &raw)?;
        debug!(path = %path.display(), entries = entries.len(), "loaded environment file");
        trace!(path = %path.display(), ?entries, "environment contents");
        Ok(Self {
            path: path.to_path_buf(),
            persisted: entries.clone(),
            entries,
            layout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Insert or replace a value; new keys are appended at the end.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when keys or values differ from the last load or write.
    pub fn has_changes(&self) -> bool {
        // IndexMap equality ignores order.
        self.entries != self.persisted
    }

    /// Write back to the file the record was loaded from.
    pub fn write(&mut self) -> Result<(), EnvFileError> {
        let path = self.path.clone();
        self.write_to(&path)
    }

    pub fn write_to(&mut self, path: &Path) -> Result<(), EnvFileError> {
        let layout = self.settled_layout();
        fs::write(path, render(&layout, &self.entries)).map_err(|source| EnvFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.layout = layout;
        self.persisted = self.entries.clone();
        debug!(path = %path.display(), "wrote environment file");
        Ok(())
    }

    /// Loaded layout without removed keys, followed by keys added since.
    fn settled_layout(&self) -> Vec<Line> {
        let mut layout: Vec<Line> = self
            .layout
            .iter()
            .filter(|line| match line {
                Line::Entry(key) => self.entries.contains_key(key),
                Line::Verbatim(_) => true,
            })
            .cloned()
            .collect();
        for key in self.entries.keys() {
            if !self.layout.contains(&Line::Entry(key.clone())) {
                layout.push(Line::Entry(key.clone()));
            }
        }
        layout
    }
}

fn render(layout: &[Line], entries: &IndexMap<String, String>) -> String {
    layout
        .iter()
        .filter_map(|line| match line {
            Line::Entry(key) => entries.get(key).map(|value| format!("{key}={value}")),
            Line::Verbatim(text) => Some(text.clone()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

type Parsed = (IndexMap<String, String>, Vec<Line>);

fn parse(path: &Path, raw: &str) -> Result<Parsed, EnvFileError> {
    let mut entries: IndexMap<String, String> = IndexMap::new();
    let mut layout = Vec::new();
    let mut state = Continuation::None;

    for (index, line) in raw.lines().enumerate() {
        let number = index + 1;
        let continues = line.ends_with('\\');
        state = match state {
            Continuation::Key(key) => {
                if let Some(value) = entries.get_mut(&key) {
                    value.push('\n');
                    value.push_str(line);
                }
                if continues {
                    Continuation::Key(key)
                } else {
                    Continuation::None
                }
            }
            Continuation::Orphan => {
                return Err(EnvFileError::OrphanContinuation {
                    path: path.to_path_buf(),
                    line: number,
                });
            }
            Continuation::None => {
                let trimmed = line.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    layout.push(Line::Verbatim(line.to_owned()));
                    if continues {
                        Continuation::Orphan
                    } else {
                        Continuation::None
                    }
                } else if let Some((key, value)) = line.split_once('=') {
                    if entries.insert(key.to_owned(), value.to_owned()).is_none() {
                        layout.push(Line::Entry(key.to_owned()));
                    }
                    if continues {
                        Continuation::Key(key.to_owned())
                    } else {
                        Continuation::None
                    }
                } else if continues {
                    // Reported on the following line.
                    Continuation::Orphan
                } else {
                    return Err(EnvFileError::Malformed {
                        path: path.to_path_buf(),
                        line: number,
                    });
                }
            }
        };
    }
    Ok((entries, layout))
}
