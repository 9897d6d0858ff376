//! Precedence chains for host resources whose location is ambiguous:
//! the Dockerfile, the Docker socket and the authorized-keys source.
//! Each chain stops at the first stage that matches.

use crate::error::DavyError;
use crate::host::HostEnv;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

pub const DOCKERFILE_ENV: &str = "DAVY_DOCKERFILE";
pub const DOCKER_SOCK_ENV: &str = "DAVY_DOCKER_SOCK";
pub const AUTHORIZED_KEYS_FILE_ENV: &str = "DAVY_SSH_AUTHORIZED_KEYS_FILE";
const DEFAULT_DOCKER_SOCK: &str = "/var/run/docker.sock";
const DOCKERFILE_CANDIDATES: [&str; 2] = ["rocky.Dockerfile", "debian.Dockerfile"];

pub fn resolve_dockerfile(
    host: &HostEnv,
    from_cli: Option<&Path>,
    local: bool,
) -> Result<PathBuf, DavyError> {
    let explicit = from_cli
        .map(Path::to_path_buf)
        .or_else(|| host.var(DOCKERFILE_ENV).map(PathBuf::from));
    if let Some(path) = explicit {
        let path = host.absolutize(&path);
        if !path.is_file() {
            return Err(DavyError::DockerfileMissing(format!(
                "Dockerfile not found at: {}",
                path.display()
            )));
        }
        return Ok(path);
    }

    if local {
        return first_existing(&host.cwd).ok_or_else(|| {
            DavyError::DockerfileMissing(format!(
                "no Dockerfile found in current directory (looked for {} and {})",
                host.cwd.join(DOCKERFILE_CANDIDATES[0]).display(),
                host.cwd.join(DOCKERFILE_CANDIDATES[1]).display()
            ))
        });
    }

    let config_dir = host.config_dir();
    first_existing(&config_dir).ok_or_else(|| {
        DavyError::DockerfileMissing(format!(
            "no Dockerfile found (looked for {} and {}); use --dockerfile, --local-dockerfile, or {DOCKERFILE_ENV}",
            config_dir.join(DOCKERFILE_CANDIDATES[0]).display(),
            config_dir.join(DOCKERFILE_CANDIDATES[1]).display()
        ))
    })
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    DOCKERFILE_CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerSocket {
    pub path: PathBuf,
    /// Group owning the socket, added to the container user so it can connect.
    pub gid: Option<u32>,
}

pub fn resolve_docker_socket(
    host: &HostEnv,
    from_cli: Option<&Path>,
) -> Result<DockerSocket, DavyError> {
    let path = docker_socket_path(host, from_cli)?;
    let metadata = fs::metadata(&path).map_err(|_| {
        DavyError::Config(format!("docker socket not found: {}", path.display()))
    })?;

    #[cfg(unix)]
    {
        if !metadata.file_type().is_socket() {
            return Err(DavyError::Config(format!(
                "docker socket path is not a unix socket: {}",
                path.display()
            )));
        }
        Ok(DockerSocket {
            path,
            gid: Some(metadata.gid()),
        })
    }

    #[cfg(not(unix))]
    {
        let _ = metadata;
        Ok(DockerSocket { path, gid: None })
    }
}

fn docker_socket_path(host: &HostEnv, from_cli: Option<&Path>) -> Result<PathBuf, DavyError> {
    if let Some(path) = from_cli {
        return Ok(host.absolutize(path));
    }
    if let Some(path) = host.var(DOCKER_SOCK_ENV) {
        return Ok(host.absolutize(Path::new(path)));
    }
    match host.var("DOCKER_HOST") {
        Some(docker_host) => parse_unix_socket_from_docker_host(docker_host).ok_or_else(|| {
            DavyError::Config(format!(
                "DOCKER_HOST is set to '{docker_host}', but --docker needs a local unix socket. Set --docker-sock or {DOCKER_SOCK_ENV}."
            ))
        }),
        None => Ok(PathBuf::from(DEFAULT_DOCKER_SOCK)),
    }
}

pub fn parse_unix_socket_from_docker_host(docker_host: &str) -> Option<PathBuf> {
    docker_host
        .strip_prefix("unix://")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A single file named by the override variable.
    Override(PathBuf),
    /// `authorized_keys` followed by every `*.pub` file, in path order.
    Aggregate(Vec<PathBuf>),
}

pub fn resolve_key_source(host: &HostEnv) -> Result<KeySource, DavyError> {
    if let Some(raw) = host.var(AUTHORIZED_KEYS_FILE_ENV) {
        let path = host.absolutize(Path::new(raw));
        if !path.is_file() {
            return Err(DavyError::Config(format!(
                "{AUTHORIZED_KEYS_FILE_ENV} not found: {}",
                path.display()
            )));
        }
        return Ok(KeySource::Override(path));
    }

    let ssh_dir = host.ssh_dir();
    let mut files = Vec::new();
    let authorized_keys = ssh_dir.join("authorized_keys");
    if authorized_keys.is_file() {
        files.push(authorized_keys);
    }
    if ssh_dir.is_dir() {
        let mut pubs = fs::read_dir(&ssh_dir)
            .map_err(|err| {
                DavyError::Config(format!("failed to read {}: {err}", ssh_dir.display()))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "pub") && path.is_file())
            .collect::<Vec<_>>();
        pubs.sort();
        files.extend(pubs);
    }
    Ok(KeySource::Aggregate(files))
}
