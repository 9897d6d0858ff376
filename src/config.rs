use crate::error::DavyError;
use crate::host::HostEnv;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const DEFAULT_IMAGE: &str = "davy-sandbox:latest";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub version: u32,
    pub image: String,
    pub container_prefix: String,
    pub claude_auth: ClaudeAuthSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClaudeAuthSettings {
    pub volume_prefix: String,
    pub volume_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            image: DEFAULT_IMAGE.to_string(),
            container_prefix: "davy".to_string(),
            claude_auth: ClaudeAuthSettings::default(),
        }
    }
}

impl Default for ClaudeAuthSettings {
    fn default() -> Self {
        Self {
            volume_prefix: "davy-claude-auth".to_string(),
            volume_version: "v1".to_string(),
        }
    }
}

pub fn config_path(host: &HostEnv) -> PathBuf {
    host.config_dir().join("config.yaml")
}

pub fn read_settings_from_str(content: &str) -> Result<Settings, DavyError> {
    let settings: Settings = serde_yaml::from_str(content)?;
    if settings.version != 1 {
        return Err(DavyError::Config(format!(
            "unsupported config version {}",
            settings.version
        )));
    }
    validate_settings(&settings)?;
    Ok(settings)
}

/// Reads the settings file, falling back to defaults when it does not exist.
pub fn load_settings(path: &Path) -> Result<Settings, DavyError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)?;
    read_settings_from_str(&content).map_err(|err| match err {
        DavyError::Config(message) => {
            DavyError::Config(format!("{message} (in {})", path.display()))
        }
        other => other,
    })
}

fn validate_settings(settings: &Settings) -> Result<(), DavyError> {
    if settings.image.trim().is_empty() {
        return Err(DavyError::Config("image must be non-empty".to_string()));
    }
    if !is_name_component(&settings.container_prefix) {
        return Err(DavyError::Config(format!(
            "container_prefix '{}' must be non-empty and contain only [A-Za-z0-9_.-]",
            settings.container_prefix
        )));
    }
    for (field, value) in [
        ("claude_auth.volume_prefix", &settings.claude_auth.volume_prefix),
        (
            "claude_auth.volume_version",
            &settings.claude_auth.volume_version,
        ),
    ] {
        if !is_name_component(value) {
            return Err(DavyError::Config(format!(
                "{field} '{value}' must be non-empty and contain only [A-Za-z0-9_.-]"
            )));
        }
    }
    Ok(())
}

fn is_name_component(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Writes the default settings file unless one exists. Returns whether it was created.
pub fn init_settings(path: &Path) -> Result<bool, DavyError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_YAML)?;
    Ok(true)
}
