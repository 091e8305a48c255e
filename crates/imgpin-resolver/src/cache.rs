//! ---
//! imgpin_section: "04-digest-resolution"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Tag to digest resolution through the registry tool and a persisted cache."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::inspector::{RegistryInspector, ResolutionError};

/// One cached resolution. Both fields must be present for the entry to count.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Unix seconds at which `result` was looked up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl CacheEntry {
    fn fresh_result(&self, now: f64, duration: Duration) -> Option<(&str, f64)> {
        let (result, time) = (self.result.as_deref()?, self.time?);
        let age = now - time;
        (age <= duration.as_secs_f64()).then_some((result, age))
    }
}

/// Image reference to digest cache backed by a JSON file.
///
/// The whole file is rewritten after every lookup that reached the registry.
#[derive(Debug)]
pub struct DigestCache {
    path: PathBuf,
    duration: Duration,
    inspector: RegistryInspector,
    entries: BTreeMap<String, CacheEntry>,
}

impl DigestCache {
    /// Load the cache file at `path`; a missing file starts an empty cache.
    pub fn open(path: impl Into<PathBuf>, duration: Duration, inspector: RegistryInspector) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable digest cache");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "digest cache opened");
        Self {
            path,
            duration,
            inspector,
            entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry(&self, reference: &str) -> Option<&CacheEntry> {
        self.entries.get(reference)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&mut self, reference: &str) -> Result<String, ResolutionError> {
        self.resolve_at(reference, unix_now())
    }

    /// Resolve as if the current time were `now` (unix seconds).
    pub fn resolve_at(&mut self, reference: &str, now: f64) -> Result<String, ResolutionError> {
        if let Some(entry) = self.entries.get(reference) {
            match entry.fresh_result(now, self.duration) {
                Some((result, age)) => {
                    debug!(reference, result, age_secs = age as u64, "resolved from cache");
                    return Ok(result.to_owned());
                }
                None => debug!(reference, "cache entry expired or incomplete"),
            }
        }

        let result = self.inspector.inspect(reference)?;
        self.entries.insert(
            reference.to_owned(),
            CacheEntry {
                result: Some(result.clone()),
                time: Some(now),
            },
        );
        if let Err(err) = self.persist() {
            warn!(path = %self.path.display(), error = %err, "could not write digest cache");
        }
        Ok(result)
    }

    fn persist(&self) -> io::Result<()> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.entries
            .serialize(&mut serializer)
            .map_err(io::Error::other)?;
        fs::write(&self.path, buffer)
    }
}

/// Entries that do not deserialize are dropped one by one; only an unreadable
/// file or a non-object document discards the whole cache.
fn load_entries(path: &Path) -> io::Result<BTreeMap<String, CacheEntry>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err),
    };
    let values: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&raw).map_err(io::Error::other)?;
    let entries = values
        .into_iter()
        .filter_map(|(reference, value)| match serde_json::from_value::<CacheEntry>(value) {
            Ok(entry) => Some((reference, entry)),
            Err(err) => {
                debug!(reference, error = %err, "dropping malformed cache entry");
                None
            }
        })
        .collect();
    Ok(entries)
}

fn unix_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
}
