use crate::auth::{plan_auth_mounts, AuthFlags, BindMount};
use crate::config::Settings;
use crate::docker::{ensure_image, run_foreground, BuildPolicy, DockerRunner, ImageBuild};
use crate::error::DavyError;
use crate::host::HostEnv;
use crate::pipeline::CommandPipeline;
use crate::resolve::{resolve_docker_socket, resolve_dockerfile, resolve_key_source, DockerSocket};
use crate::ssh::{parse_ssh_port, SshProvision, AUTH_KEYS_ENV};
use crate::term;
use crate::volume::{ensure_volume, VolumeRef};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const IMAGE_ENV: &str = "DAVY_IMAGE";
pub const PROJECT_MOUNT: &str = "/project";

/// Launch options as they come off the command line, before any host probing.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub project_dir: Option<PathBuf>,
    pub name: Option<String>,
    pub docker: bool,
    pub docker_sock: Option<PathBuf>,
    pub rebuild: bool,
    pub no_build: bool,
    pub keep: bool,
    pub expose_ssh: Option<String>,
    pub env: Vec<String>,
    pub pass_env: Vec<String>,
    pub auth: AuthFlags,
    pub image: Option<String>,
    pub dockerfile: Option<PathBuf>,
    pub local_dockerfile: bool,
    pub docker_args: Vec<String>,
    pub command: Vec<String>,
}

/// Fully resolved launch plan. Every host check has passed once this exists.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub project_dir: PathBuf,
    pub image: ImageBuild,
    pub name: String,
    pub keep: bool,
    pub docker_socket: Option<DockerSocket>,
    pub build_policy: BuildPolicy,
    pub ssh: Option<SshProvision>,
    pub claude_volume: Option<VolumeRef>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<BindMount>,
    pub docker_args: Vec<String>,
    pub command: Vec<String>,
}

impl SandboxConfig {
    pub fn resolve(
        request: LaunchRequest,
        host: &HostEnv,
        settings: &Settings,
    ) -> Result<Self, DavyError> {
        let project_dir = resolve_project_dir(host, request.project_dir.as_deref())?;
        let dockerfile =
            resolve_dockerfile(host, request.dockerfile.as_deref(), request.local_dockerfile)?;
        let build_policy = BuildPolicy::from_flags(request.rebuild, request.no_build)?;
        let ssh_port = request
            .expose_ssh
            .as_deref()
            .map(parse_ssh_port)
            .transpose()?;

        let mut env = parse_env_assignments(&request.env)?;
        env.extend(forwarded_env(host, &request.pass_env)?);

        let auth = plan_auth_mounts(host, &request.auth.requests())?;
        env.extend(auth.env);
        let claude_volume = auth
            .claude_volume
            .then(|| VolumeRef::for_host(host, &settings.claude_auth));

        let docker_socket = if request.docker {
            Some(resolve_docker_socket(host, request.docker_sock.as_deref())?)
        } else {
            None
        };

        let ssh = match ssh_port {
            Some(port) => Some(SshProvision::build(port, &resolve_key_source(host)?)?),
            None => None,
        };

        let image_name = request
            .image
            .filter(|image| !image.trim().is_empty())
            .or_else(|| host.var(IMAGE_ENV).map(str::to_string))
            .unwrap_or_else(|| settings.image.clone());
        let name = request.name.unwrap_or_else(|| {
            default_container_name(&settings.container_prefix, &project_dir, Local::now())
        });

        Ok(Self {
            image: ImageBuild::new(&image_name, &dockerfile, host.uid, host.gid),
            project_dir,
            name,
            keep: request.keep,
            docker_socket,
            build_policy,
            ssh,
            claude_volume,
            env,
            mounts: auth.mounts,
            docker_args: request.docker_args,
            command: request.command,
        })
    }

    pub fn pipeline(&self) -> CommandPipeline {
        CommandPipeline::new(self.claude_volume.is_some(), self.ssh.is_some())
    }

    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "-it".to_string()];
        if !self.keep {
            args.push("--rm".to_string());
        }
        args.extend([
            "--name".to_string(),
            self.name.clone(),
            "-v".to_string(),
            format!("{}:{PROJECT_MOUNT}", self.project_dir.display()),
            "-w".to_string(),
            PROJECT_MOUNT.to_string(),
        ]);

        if let Some(volume) = &self.claude_volume {
            args.push("--mount".to_string());
            args.push(volume.mount_arg());
        }
        if let Some(socket) = &self.docker_socket {
            args.push("-v".to_string());
            args.push(format!("{}:/var/run/docker.sock", socket.path.display()));
            if let Some(gid) = socket.gid {
                args.push("--group-add".to_string());
                args.push(gid.to_string());
            }
        }
        if let Some(ssh) = &self.ssh {
            args.push("-p".to_string());
            args.push(format!("{}:22", ssh.port));
            // Value travels through docker's environment, not its argv.
            args.push("-e".to_string());
            args.push(AUTH_KEYS_ENV.to_string());
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.volume_arg());
        }
        args.extend(self.docker_args.iter().cloned());
        args.push(self.image.image.clone());
        args.extend(self.pipeline().build(&self.command));
        args
    }

    pub fn run_env(&self) -> BTreeMap<String, String> {
        let mut overrides = BTreeMap::new();
        if let Some(ssh) = &self.ssh {
            overrides.insert(AUTH_KEYS_ENV.to_string(), ssh.payload.clone());
        }
        overrides
    }

    fn announce(&self) {
        if let Some(socket) = &self.docker_socket {
            term::info(format!(
                "docker socket mounted from {}. Container can control host Docker.",
                socket.path.display()
            ));
            if let Some(gid) = socket.gid {
                term::info(format!(
                    "adding supplementary group {gid} for docker socket access."
                ));
            }
        }
        if let Some(ssh) = &self.ssh {
            term::info(format!(
                "exposing host port {} to container port 22 ({} authorized key(s)).",
                ssh.port,
                ssh.keys.len()
            ));
            term::info("SSH login user is 'dev' (key auth only).");
        }
        if let Some(volume) = &self.claude_volume {
            term::info(format!(
                "Claude auth volume mounted at {} ({}).",
                crate::volume::CLAUDE_AUTH_MOUNT,
                volume.name
            ));
            term::info("first use requires running 'claude login' in-container.");
        }
    }
}

/// Image, then volume, then the sandbox itself. Returns docker run's exit status.
pub fn launch<R: DockerRunner>(config: &SandboxConfig, runner: &R) -> Result<i32, DavyError> {
    if ensure_image(runner, &config.image, config.build_policy)? {
        term::info(format!("built image '{}'.", config.image.image));
    }
    if let Some(volume) = &config.claude_volume {
        ensure_volume(
            runner,
            volume,
            &config.image.image,
            config.image.uid,
            config.image.gid,
        )?;
    }
    config.announce();
    run_foreground(runner, &config.run_args(), &config.run_env())
}

fn resolve_project_dir(host: &HostEnv, from_cli: Option<&Path>) -> Result<PathBuf, DavyError> {
    let path = match from_cli {
        Some(path) => host.absolutize(path),
        None => host.cwd.clone(),
    };
    if !path.is_dir() {
        return Err(DavyError::ProjectDirMissing(path));
    }
    fs::canonicalize(&path).map_err(|_| DavyError::ProjectDirMissing(path))
}

pub fn default_container_name(prefix: &str, project_dir: &Path, now: DateTime<Local>) -> String {
    let base = project_dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "project".to_string());
    format!("{prefix}-{base}-{}", now.format("%Y%m%d-%H%M%S"))
}

pub fn parse_env_assignments(raw: &[String]) -> Result<Vec<(String, String)>, DavyError> {
    raw.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(DavyError::Config(format!(
                "invalid --env value '{entry}': expected KEY=VALUE"
            ))),
        })
        .collect()
}

fn forwarded_env(host: &HostEnv, keys: &[String]) -> Result<Vec<(String, String)>, DavyError> {
    let mut forwarded = Vec::new();
    for key in keys {
        if key.is_empty() || key.contains('=') {
            return Err(DavyError::Config(format!(
                "invalid --pass-env name '{key}': expected a variable name"
            )));
        }
        match host.vars.get(key) {
            Some(value) => forwarded.push((key.clone(), value.clone())),
            None => term::warn(format!("--pass-env {key}: not set on host; skipping.")),
        }
    }
    Ok(forwarded)
}
