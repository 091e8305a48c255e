//! ---
//! imgpin_section: "03-service-state"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service environment files and the image-key naming convention."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::record::EnvRecord;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\}").unwrap_or_else(|err| panic!("placeholder pattern: {err}"))
});

/// Replace `${VAR}` placeholders with values of the same record.
///
/// Placeholders naming a key the record does not hold are left as written.
/// The process environment is never consulted.
pub fn interpolate<'a>(value: &'a str, record: &EnvRecord) -> Cow<'a, str> {
    PLACEHOLDER.replace_all(value, |caps: &Captures<'_>| {
        record
            .get(&caps[1])
            .map(str::to_owned)
            .unwrap_or_else(|| caps[0].to_owned())
    })
}
