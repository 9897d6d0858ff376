use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DavyError {
    #[error("config error: {0}")]
    Config(String),
    #[error("project dir not found: {}", .0.display())]
    ProjectDirMissing(PathBuf),
    #[error("{0}")]
    DockerfileMissing(String),
    #[error("invalid SSH port '{0}': expected an integer between 1 and 65535")]
    InvalidSshPort(String),
    #[error("no SSH public keys found. Add ~/.ssh/*.pub or set DAVY_SSH_AUTHORIZED_KEYS_FILE")]
    NoSshKeys,
    #[error("image '{0}' not found (and --no-build was set)")]
    ImageNotFound(String),
    #[error("{label} mount source not found: {}", .path.display())]
    AuthSourceMissing { label: String, path: PathBuf },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("docker executable not found while running `{command}`. Install Docker and ensure `docker` is on your PATH.")]
    DockerNotFound { command: String },
    #[error("process error: {message}")]
    Process { message: String, status_code: i32 },
}

impl DavyError {
    /// Process exit code for this error. Subprocess failures carry the
    /// child's own status so callers see exactly what docker returned.
    pub fn exit_code(&self) -> i32 {
        match self {
            DavyError::Config(_) => 2,
            DavyError::ProjectDirMissing(_) => 3,
            DavyError::DockerfileMissing(_) => 4,
            DavyError::InvalidSshPort(_) => 5,
            DavyError::NoSshKeys => 6,
            DavyError::ImageNotFound(_) => 7,
            DavyError::AuthSourceMissing { .. } => 8,
            DavyError::DockerNotFound { .. } => 127,
            DavyError::Process { status_code, .. } if *status_code != 0 => *status_code,
            _ => 1,
        }
    }
}
