use crate::error::DavyError;
use crate::resolve::KeySource;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub const DEFAULT_SSH_PORT: &str = "222";
/// Environment variable carrying the base64 key payload into the container.
pub const AUTH_KEYS_ENV: &str = "DAVY_SSH_AUTH_KEYS_B64";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshProvision {
    pub port: u16,
    pub keys: Vec<String>,
    pub payload: String,
}

impl SshProvision {
    pub fn build(port: u16, source: &KeySource) -> Result<Self, DavyError> {
        let keys = collect_authorized_keys(source)?;
        let payload = encode_keys(&keys);
        Ok(Self {
            port,
            keys,
            payload,
        })
    }
}

pub fn parse_ssh_port(raw: &str) -> Result<u16, DavyError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DavyError::InvalidSshPort(raw.to_string()));
    }
    match trimmed.parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(DavyError::InvalidSshPort(raw.to_string())),
    }
}

pub fn collect_authorized_keys(source: &KeySource) -> Result<Vec<String>, DavyError> {
    let files: Vec<&Path> = match source {
        KeySource::Override(path) => vec![path.as_path()],
        KeySource::Aggregate(paths) => paths.iter().map(|p| p.as_path()).collect(),
    };

    let mut contents = Vec::with_capacity(files.len());
    for path in files {
        let content = fs::read_to_string(path).map_err(|err| {
            DavyError::Config(format!(
                "failed to read SSH keys from {}: {err}",
                path.display()
            ))
        })?;
        contents.push(content);
    }

    let keys = dedupe_key_lines(contents.iter().map(String::as_str));
    if keys.is_empty() {
        return Err(DavyError::NoSshKeys);
    }
    Ok(keys)
}

/// Trimmed, non-empty lines across all inputs, first occurrence wins.
pub fn dedupe_key_lines<'a>(contents: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for content in contents {
        for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if seen.insert(line) {
                keys.push(line.to_string());
            }
        }
    }
    keys
}

pub fn encode_keys(keys: &[String]) -> String {
    STANDARD.encode(format!("{}\n", keys.join("\n")))
}
