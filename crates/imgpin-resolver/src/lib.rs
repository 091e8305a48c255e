//! ---
//! imgpin_section: "04-digest-resolution"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Tag to digest resolution through the registry tool and a persisted cache."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Registry lookups are rate limited upstream, so every resolution goes
//! through [`DigestCache`], which answers from a JSON file while entries are
//! younger than the configured duration.

pub mod cache;
pub mod inspector;

pub use cache::{CacheEntry, DigestCache};
pub use inspector::{RegistryInspector, ResolutionError};
