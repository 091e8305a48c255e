//! ---
//! imgpin_section: "01-core-functionality"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Shared primitives for settings, logging and run status."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Typed process settings resolved from `IMGPIN_*` environment variables, an
//! optional JSON config file and schema defaults, in that order of priority.
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Prefix shared by every environment variable the loader reads.
pub const ENV_PREFIX: &str = "IMGPIN_";

const CONFIG_FILE: &str = "CONFIG_FILE";

/// How a service is restarted once new images are pulled.
///
/// Unknown values are kept rather than rejected at load time; the orchestrator
/// reports them per service as a restart failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartMethod {
    Compose,
    SystemdSystem,
    SystemdUser,
    Unknown(String),
}

impl RestartMethod {
    pub fn is_known(&self) -> bool {
        !matches!(self, RestartMethod::Unknown(_))
    }

    /// Whether the service manager must be addressed in the user session.
    pub fn is_user_scoped(&self) -> bool {
        matches!(self, RestartMethod::SystemdUser)
    }
}

impl FromStr for RestartMethod {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "compose" => RestartMethod::Compose,
            "systemd-system" => RestartMethod::SystemdSystem,
            "systemd-user" => RestartMethod::SystemdUser,
            other => RestartMethod::Unknown(other.to_owned()),
        })
    }
}

impl fmt::Display for RestartMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartMethod::Compose => f.write_str("compose"),
            RestartMethod::SystemdSystem => f.write_str("systemd-system"),
            RestartMethod::SystemdUser => f.write_str("systemd-user"),
            RestartMethod::Unknown(value) => f.write_str(value),
        }
    }
}

/// Effective configuration of one imgpin run.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    pub verbosity: u64,
    pub services_root: PathBuf,
    pub services_filter: String,
    pub services_exclude: String,
    pub compose_tool: String,
    pub container_tool: String,
    pub registry_tool: String,
    pub registry_transport: String,
    pub snapshot_tool: String,
    pub service_manager: String,
    pub service_stop_start: bool,
    #[serde_as(as = "DisplayFromStr")]
    pub stop_start_method: RestartMethod,
    pub service_snapshot: bool,
    pub service_pull: bool,
    pub prune_images: bool,
    pub compose_file_name: String,
    pub env_file_name: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cache_duration: Duration,
    pub cache_location: PathBuf,
    pub config_file: Option<PathBuf>,
    #[serde_as(as = "DisplayFromStr")]
    pub log_format: LogFormat,
    pub log_directory: Option<PathBuf>,
}

/// Errors raised while resolving [`Settings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(
        "setting {name} is required but not set; set the IMGPIN_{name} environment variable \
         or the {name} entry of a JSON config file"
    )]
    Missing { name: &'static str },
    #[error("could not interpret setting {name} = {value:?} (from {origin}): {reason}")]
    Invalid {
        name: String,
        value: String,
        origin: String,
        reason: String,
    },
    #[error("config file {} does not exist", .path.display())]
    ConfigFileMissing { path: PathBuf },
    #[error("could not read config file {}: {source}", .path.display())]
    ConfigFileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file {}: {source}", .path.display())]
    ConfigFileParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("config file {} must contain a JSON object of setting names and values", .path.display())]
    ConfigFileNotObject { path: PathBuf },
    #[error("unknown setting {name} in config file {}; known settings: {known}", .path.display())]
    UnknownSetting {
        name: String,
        path: PathBuf,
        known: String,
    },
    #[error("config file {} must not set CONFIG_FILE", .path.display())]
    NestedConfigFile { path: PathBuf },
    #[error("setting {name} did not resolve to a {expected} value")]
    Schema {
        name: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
enum Fallback {
    Required,
    Value(&'static str),
    Computed(fn() -> String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Path,
    Bool,
    Unsigned,
    Restart,
    Format,
}

#[derive(Debug, Clone, Copy)]
struct SettingDef {
    name: &'static str,
    fallback: Fallback,
    kind: Kind,
}

const fn setting(name: &'static str, fallback: Fallback, kind: Kind) -> SettingDef {
    SettingDef {
        name,
        fallback,
        kind,
    }
}

fn default_cache_location() -> String {
    std::env::temp_dir()
        .join("imgpin_cache.json")
        .to_string_lossy()
        .into_owned()
}

const SCHEMA: &[SettingDef] = &[
    setting("VERBOSITY", Fallback::Value("1"), Kind::Unsigned),
    setting("SERVICES_ROOT", Fallback::Required, Kind::Path),
    setting("SERVICES_FILTER", Fallback::Value(""), Kind::Text),
    setting("SERVICES_EXCLUDE", Fallback::Value(""), Kind::Text),
    setting("COMPOSE_TOOL", Fallback::Value("podman-compose"), Kind::Text),
    setting("CONTAINER_TOOL", Fallback::Value("podman"), Kind::Text),
    setting("REGISTRY_TOOL", Fallback::Value("skopeo"), Kind::Text),
    setting("REGISTRY_TRANSPORT", Fallback::Value("docker"), Kind::Text),
    setting("SNAPSHOT_TOOL", Fallback::Value("snapper"), Kind::Text),
    setting("SERVICE_MANAGER", Fallback::Value("systemctl"), Kind::Text),
    setting("SERVICE_STOP_START", Fallback::Value("true"), Kind::Bool),
    setting("STOP_START_METHOD", Fallback::Value("compose"), Kind::Restart),
    setting("SERVICE_SNAPSHOT", Fallback::Value("true"), Kind::Bool),
    setting("SERVICE_PULL", Fallback::Value("true"), Kind::Bool),
    setting("PRUNE_IMAGES", Fallback::Value("true"), Kind::Bool),
    setting("COMPOSE_FILE_NAME", Fallback::Value("compose.yml"), Kind::Text),
    setting("ENV_FILE_NAME", Fallback::Value(".env"), Kind::Text),
    setting("CACHE_DURATION", Fallback::Value("3600"), Kind::Unsigned),
    setting(
        "CACHE_LOCATION",
        Fallback::Computed(default_cache_location),
        Kind::Path,
    ),
    setting(CONFIG_FILE, Fallback::Value(""), Kind::Path),
    setting("LOG_FORMAT", Fallback::Value("pretty"), Kind::Format),
    setting("LOG_DIRECTORY", Fallback::Value(""), Kind::Path),
];

#[derive(Debug, Clone, PartialEq)]
enum SettingValue {
    Text(String),
    Path(Option<PathBuf>),
    Bool(bool),
    Unsigned(u64),
    Restart(RestartMethod),
    Format(LogFormat),
}

#[derive(Debug, Clone)]
enum Origin {
    Environment,
    File(PathBuf),
    Default,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Environment => f.write_str("environment"),
            Origin::File(path) => write!(f, "config file {}", path.display()),
            Origin::Default => f.write_str("default"),
        }
    }
}

/// Names of every known setting, in schema order.
pub fn setting_names() -> impl Iterator<Item = &'static str> {
    SCHEMA.iter().map(|def| def.name)
}

impl Settings {
    /// Resolve settings from the process environment.
    ///
    /// `config_override` takes precedence over `IMGPIN_CONFIG_FILE`.
    pub fn load(config_override: Option<&Path>) -> Result<Self, SettingsError> {
        Self::from_vars(std::env::vars(), config_override)
    }

    /// Resolve settings from an explicit set of environment variables.
    pub fn from_vars<I, K, V>(vars: I, config_override: Option<&Path>) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let env: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.as_ref()
                    .strip_prefix(ENV_PREFIX)
                    .map(|name| (name.to_owned(), value.into()))
            })
            .collect();

        let config_path = match config_override {
            Some(path) => Some(path.to_path_buf()),
            None => env
                .get(CONFIG_FILE)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };
        let file_values = match &config_path {
            Some(path) => read_config_file(path)?,
            None => HashMap::new(),
        };

        let mut resolved: IndexMap<&'static str, SettingValue> = IndexMap::new();
        for def in SCHEMA {
            let (raw, origin) = if def.name == CONFIG_FILE {
                let raw = config_path
                    .as_ref()
                    .map(|path| path.to_string_lossy().into_owned());
                (raw, Origin::Environment)
            } else if let Some(value) = env.get(def.name) {
                (Some(value.clone()), Origin::Environment)
            } else if let Some(value) = file_values.get(def.name) {
                let path = config_path.clone().unwrap_or_default();
                (Some(value.clone()), Origin::File(path))
            } else {
                let raw = match def.fallback {
                    Fallback::Required => None,
                    Fallback::Value(value) => Some(value.to_owned()),
                    Fallback::Computed(compute) => Some(compute()),
                };
                (raw, Origin::Default)
            };

            let value = match raw {
                Some(raw) => validate(def, &raw, &origin)?,
                None if def.name == CONFIG_FILE => SettingValue::Path(None),
                None => return Err(SettingsError::Missing { name: def.name }),
            };
            if matches!(def.fallback, Fallback::Required)
                && matches!(value, SettingValue::Path(None))
            {
                return Err(SettingsError::Missing { name: def.name });
            }
            resolved.insert(def.name, value);
        }

        let settings = Resolved(resolved).into_settings()?;
        debug!(config_file = ?settings.config_file, "settings resolved");
        Ok(settings)
    }
}

fn read_config_file(path: &Path) -> Result<HashMap<&'static str, String>, SettingsError> {
    if !path.is_file() {
        return Err(SettingsError::ConfigFileMissing {
            path: path.to_path_buf(),
        });
    }
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::ConfigFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: serde_json::Value =
        serde_json::from_str(&raw).map_err(|source| SettingsError::ConfigFileParse {
            path: path.to_path_buf(),
            source,
        })?;
    let serde_json::Value::Object(entries) = parsed else {
        return Err(SettingsError::ConfigFileNotObject {
            path: path.to_path_buf(),
        });
    };

    let mut values = HashMap::new();
    for (name, value) in entries {
        if name == CONFIG_FILE {
            return Err(SettingsError::NestedConfigFile {
                path: path.to_path_buf(),
            });
        }
        let Some(def) = SCHEMA.iter().find(|def| def.name == name) else {
            return Err(SettingsError::UnknownSetting {
                name,
                path: path.to_path_buf(),
                known: setting_names().collect::<Vec<_>>().join(", "),
            });
        };
        let text = match value {
            serde_json::Value::String(text) => text,
            serde_json::Value::Bool(flag) => flag.to_string(),
            serde_json::Value::Number(number) => number.to_string(),
            other => {
                return Err(SettingsError::Invalid {
                    name,
                    value: other.to_string(),
                    origin: Origin::File(path.to_path_buf()).to_string(),
                    reason: "expected a string, boolean or number".to_owned(),
                })
            }
        };
        values.insert(def.name, text);
    }
    Ok(values)
}

fn validate(def: &SettingDef, raw: &str, origin: &Origin) -> Result<SettingValue, SettingsError> {
    let invalid = |reason: String| SettingsError::Invalid {
        name: def.name.to_owned(),
        value: raw.to_owned(),
        origin: origin.to_string(),
        reason,
    };
    match def.kind {
        Kind::Text => Ok(SettingValue::Text(raw.to_owned())),
        Kind::Path => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(SettingValue::Path(None))
            } else {
                Ok(SettingValue::Path(Some(PathBuf::from(trimmed))))
            }
        }
        Kind::Bool => parse_bool(raw).map(SettingValue::Bool).ok_or_else(|| {
            invalid("valid values are true/false, 1/0, yes/no (not case sensitive)".to_owned())
        }),
        Kind::Unsigned => raw
            .trim()
            .parse::<u64>()
            .map(SettingValue::Unsigned)
            .map_err(|err| invalid(format!("expected a non-negative integer: {err}"))),
        Kind::Restart => {
            let method = match raw.trim().parse::<RestartMethod>() {
                Ok(method) => method,
                Err(never) => match never {},
            };
            Ok(SettingValue::Restart(method))
        }
        Kind::Format => raw
            .parse::<LogFormat>()
            .map(SettingValue::Format)
            .map_err(invalid),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

struct Resolved(IndexMap<&'static str, SettingValue>);

impl Resolved {
    fn get(&self, name: &'static str) -> Option<&SettingValue> {
        self.0.get(name)
    }

    fn text(&self, name: &'static str) -> Result<String, SettingsError> {
        match self.get(name) {
            Some(SettingValue::Text(value)) => Ok(value.clone()),
            _ => Err(SettingsError::Schema {
                name,
                expected: "text",
            }),
        }
    }

    fn path(&self, name: &'static str) -> Result<Option<PathBuf>, SettingsError> {
        match self.get(name) {
            Some(SettingValue::Path(value)) => Ok(value.clone()),
            _ => Err(SettingsError::Schema {
                name,
                expected: "path",
            }),
        }
    }

    fn required_path(&self, name: &'static str) -> Result<PathBuf, SettingsError> {
        self.path(name)?.ok_or(SettingsError::Missing { name })
    }

    fn flag(&self, name: &'static str) -> Result<bool, SettingsError> {
        match self.get(name) {
            Some(SettingValue::Bool(value)) => Ok(*value),
            _ => Err(SettingsError::Schema {
                name,
                expected: "boolean",
            }),
        }
    }

    fn unsigned(&self, name: &'static str) -> Result<u64, SettingsError> {
        match self.get(name) {
            Some(SettingValue::Unsigned(value)) => Ok(*value),
            _ => Err(SettingsError::Schema {
                name,
                expected: "unsigned",
            }),
        }
    }

    fn restart(&self, name: &'static str) -> Result<RestartMethod, SettingsError> {
        match self.get(name) {
            Some(SettingValue::Restart(value)) => Ok(value.clone()),
            _ => Err(SettingsError::Schema {
                name,
                expected: "restart method",
            }),
        }
    }

    fn format(&self, name: &'static str) -> Result<LogFormat, SettingsError> {
        match self.get(name) {
            Some(SettingValue::Format(value)) => Ok(*value),
            _ => Err(SettingsError::Schema {
                name,
                expected: "log format",
            }),
        }
    }

    fn into_settings(self) -> Result<Settings, SettingsError> {
        Ok(Settings {
            verbosity: self.unsigned("VERBOSITY")?,
            services_root: self.required_path("SERVICES_ROOT")?,
            services_filter: self.text("SERVICES_FILTER")?,
            services_exclude: self.text("SERVICES_EXCLUDE")?,
            compose_tool: self.text("COMPOSE_TOOL")?,
            container_tool: self.text("CONTAINER_TOOL")?,
            registry_tool: self.text("REGISTRY_TOOL")?,
            registry_transport: self.text("REGISTRY_TRANSPORT")?,
            snapshot_tool: self.text("SNAPSHOT_TOOL")?,
            service_manager: self.text("SERVICE_MANAGER")?,
            service_stop_start: self.flag("SERVICE_STOP_START")?,
            stop_start_method: self.restart("STOP_START_METHOD")?,
            service_snapshot: self.flag("SERVICE_SNAPSHOT")?,
            service_pull: self.flag("SERVICE_PULL")?,
            prune_images: self.flag("PRUNE_IMAGES")?,
            compose_file_name: self.text("COMPOSE_FILE_NAME")?,
            env_file_name: self.text("ENV_FILE_NAME")?,
            cache_duration: Duration::from_secs(self.unsigned("CACHE_DURATION")?),
            cache_location: self.required_path("CACHE_LOCATION")?,
            config_file: self.path(CONFIG_FILE)?,
            log_format: self.format("LOG_FORMAT")?,
            log_directory: self.path("LOG_DIRECTORY")?,
        })
    }
}
