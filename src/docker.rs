use crate::error::DavyError;
use std::collections::BTreeMap;
use std::io;
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

pub trait DockerRunner {
    fn run(
        &self,
        args: &[String],
        env_overrides: &BTreeMap<String, String>,
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error>;
}

pub struct RealDockerRunner {
    program: PathBuf,
}

impl RealDockerRunner {
    pub fn locate() -> Result<Self, DavyError> {
        let program = which::which("docker").map_err(|_| DavyError::DockerNotFound {
            command: "docker".to_string(),
        })?;
        Ok(Self { program })
    }
}

impl DockerRunner for RealDockerRunner {
    fn run(
        &self,
        args: &[String],
        env_overrides: &BTreeMap<String, String>,
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        for (key, value) in env_overrides {
            cmd.env(key, value);
        }
        if capture_output {
            let output = cmd.output()?;
            Ok(CommandOutput {
                status_code: exit_code_of(output.status),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            let status = cmd.status()?;
            Ok(CommandOutput {
                status_code: exit_code_of(status),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }
}

/// Shell convention: a child killed by signal N reports 128+N.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    if status.success() {
        0
    } else {
        1
    }
}

pub fn render_docker_command(args: &[String]) -> String {
    fn shell_quote(part: &str) -> String {
        if part.is_empty() {
            return "\"\"".to_string();
        }
        if part.chars().any(|c| c.is_whitespace()) {
            return format!("\"{}\"", part.replace('"', "\\\""));
        }
        part.to_string()
    }
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push("docker".to_string());
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}

fn docker_failure_hint(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("error during connect")
    {
        return Some("Docker daemon is unreachable. Start Docker (or dockerd) and retry.");
    }
    if lower.contains("port is already allocated") || lower.contains("address already in use") {
        return Some("The SSH host port is already in use. Pick another with --expose-ssh PORT.");
    }
    if lower.contains("pull access denied") || lower.contains("unauthorized") {
        return Some("The base image could not be pulled. Run `docker login` and retry.");
    }
    None
}

/// Runs docker and turns spawn failures and non-zero exits into errors that
/// carry docker's own status code.
pub fn execute_docker<R: DockerRunner>(
    runner: &R,
    args: &[String],
    env_overrides: &BTreeMap<String, String>,
    capture_output: bool,
) -> Result<CommandOutput, DavyError> {
    let command = render_docker_command(args);
    let output = runner
        .run(args, env_overrides, capture_output)
        .map_err(|err| spawn_error(err, &command))?;
    if output.success() {
        return Ok(output);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let detail = if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    };
    let mut message = format!(
        "command failed with status {} while running `{}`",
        output.status_code, command
    );
    if !detail.is_empty() {
        message = format!("{message}: {detail}");
    }
    if let Some(hint) = docker_failure_hint(&detail) {
        message = format!("{message}\nHint: {hint}");
    }
    Err(DavyError::Process {
        message,
        status_code: output.status_code,
    })
}

/// Runs a probe such as `docker image inspect`, reporting only whether it succeeded.
pub fn probe_docker<R: DockerRunner>(runner: &R, args: &[String]) -> Result<bool, DavyError> {
    let command = render_docker_command(args);
    let output = runner
        .run(args, &BTreeMap::new(), true)
        .map_err(|err| spawn_error(err, &command))?;
    Ok(output.success())
}

/// Runs docker attached to the terminal and returns its exit status as-is.
pub fn run_foreground<R: DockerRunner>(
    runner: &R,
    args: &[String],
    env_overrides: &BTreeMap<String, String>,
) -> Result<i32, DavyError> {
    let command = render_docker_command(args);
    let output = runner
        .run(args, env_overrides, false)
        .map_err(|err| spawn_error(err, &command))?;
    Ok(output.status_code)
}

fn spawn_error(err: io::Error, command: &str) -> DavyError {
    if err.kind() == io::ErrorKind::NotFound {
        return DavyError::DockerNotFound {
            command: command.to_string(),
        };
    }
    DavyError::Process {
        message: format!("failed to run command `{command}`: {err}"),
        status_code: 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPolicy {
    /// Always build, pulling the base image and skipping the cache.
    Rebuild,
    /// Build only when the image is missing locally.
    IfMissing,
    /// Never build; a missing image is an error.
    Never,
}

impl BuildPolicy {
    pub fn from_flags(rebuild: bool, no_build: bool) -> Result<Self, DavyError> {
        match (rebuild, no_build) {
            (true, true) => Err(DavyError::Config(
                "--rebuild and --no-build cannot be used together".to_string(),
            )),
            (true, false) => Ok(BuildPolicy::Rebuild),
            (false, true) => Ok(BuildPolicy::Never),
            (false, false) => Ok(BuildPolicy::IfMissing),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    pub image: String,
    pub dockerfile: PathBuf,
    pub context_dir: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

impl ImageBuild {
    pub fn new(image: &str, dockerfile: &Path, uid: u32, gid: u32) -> Self {
        let context_dir = dockerfile
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            image: image.to_string(),
            dockerfile: dockerfile.to_path_buf(),
            context_dir,
            uid,
            gid,
        }
    }

    pub fn build_args(&self, fresh: bool) -> Vec<String> {
        let mut args = vec!["build".to_string()];
        if fresh {
            args.push("--pull".to_string());
            args.push("--no-cache".to_string());
        }
        args.extend([
            "--build-arg".to_string(),
            format!("USER_UID={}", self.uid),
            "--build-arg".to_string(),
            format!("USER_GID={}", self.gid),
            "-f".to_string(),
            self.dockerfile.display().to_string(),
            "-t".to_string(),
            self.image.clone(),
            self.context_dir.display().to_string(),
        ]);
        args
    }
}

pub fn image_exists<R: DockerRunner>(runner: &R, image: &str) -> Result<bool, DavyError> {
    probe_docker(
        runner,
        &["image".to_string(), "inspect".to_string(), image.to_string()],
    )
}

/// Makes sure the image is present according to the policy. Returns whether a build ran.
pub fn ensure_image<R: DockerRunner>(
    runner: &R,
    build: &ImageBuild,
    policy: BuildPolicy,
) -> Result<bool, DavyError> {
    match policy {
        BuildPolicy::Rebuild => {
            execute_docker(runner, &build.build_args(true), &BTreeMap::new(), false)?;
            Ok(true)
        }
        BuildPolicy::IfMissing => {
            if image_exists(runner, &build.image)? {
                return Ok(false);
            }
            execute_docker(runner, &build.build_args(false), &BTreeMap::new(), false)?;
            Ok(true)
        }
        BuildPolicy::Never => {
            if image_exists(runner, &build.image)? {
                Ok(false)
            } else {
                Err(DavyError::ImageNotFound(build.image.clone()))
            }
        }
    }
}
