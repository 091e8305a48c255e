//! ---
//! imgpin_section: "03-service-state"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service environment files and the image-key naming convention."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! `SERVICE_<name>_IMAGE_TAGGED` / `SERVICE_<name>_IMAGE_HASHED` key pairs.
use std::fmt;

const PREFIX: &str = "SERVICE_";
const TAGGED_SUFFIX: &str = "_IMAGE_TAGGED";
const HASHED_SUFFIX: &str = "_IMAGE_HASHED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKeyKind {
    /// Mutable reference chosen by the operator, e.g. `redis:7`.
    Tagged,
    /// Digest reference written by imgpin.
    Hashed,
}

impl ImageKeyKind {
    fn suffix(self) -> &'static str {
        match self {
            ImageKeyKind::Tagged => TAGGED_SUFFIX,
            ImageKeyKind::Hashed => HASHED_SUFFIX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    name: String,
    kind: ImageKeyKind,
}

impl ImageKey {
    /// Recognise an environment key following the image naming convention.
    ///
    /// The embedded name must be non-empty and must not itself contain either
    /// suffix.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(PREFIX)?;
        let (name, kind) = if let Some(name) = rest.strip_suffix(TAGGED_SUFFIX) {
            (name, ImageKeyKind::Tagged)
        } else if let Some(name) = rest.strip_suffix(HASHED_SUFFIX) {
            (name, ImageKeyKind::Hashed)
        } else {
            return None;
        };
        if name.is_empty() || name.contains(TAGGED_SUFFIX) || name.contains(HASHED_SUFFIX) {
            return None;
        }
        Some(Self {
            name: name.to_owned(),
            kind,
        })
    }

    pub fn tagged(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ImageKeyKind::Tagged,
        }
    }

    pub fn hashed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ImageKeyKind::Hashed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ImageKeyKind {
        self.kind
    }

    /// The other half of the tagged/hashed pair.
    pub fn counterpart(&self) -> Self {
        let kind = match self.kind {
            ImageKeyKind::Tagged => ImageKeyKind::Hashed,
            ImageKeyKind::Hashed => ImageKeyKind::Tagged,
        };
        Self {
            name: self.name.clone(),
            kind,
        }
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}{}", self.name, self.kind.suffix())
    }
}
