//! ---
//! imgpin_section: "03-service-state"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service environment files and the image-key naming convention."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Compose environment files as ordered, change-tracked records.

pub mod image_key;
pub mod interpolate;
pub mod record;

pub use image_key::{ImageKey, ImageKeyKind};
pub use interpolate::interpolate;
pub use record::{EnvFileError, EnvRecord};
