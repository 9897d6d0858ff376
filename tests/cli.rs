#![cfg(unix)]

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const FAKE_DOCKER: &str = r#"#!/bin/sh
state="${FAKE_DOCKER_STATE:?}"
echo "$*" >> "$state/calls.log"
case "$1" in
  image)
    [ -f "$state/image" ] && exit 0
    exit 1 ;;
  volume)
    case "$2" in
      inspect) [ -f "$state/volume" ] && exit 0; exit 1 ;;
      create) touch "$state/volume"; exit 0 ;;
      rm) rm -f "$state/volume"; exit 0 ;;
    esac ;;
  build)
    touch "$state/image"
    exit 0 ;;
  run)
    if [ "$2" = "--rm" ]; then exit 0; fi
    echo "keys=${DAVY_SSH_AUTH_KEYS_B64:-}" >> "$state/env.log"
    exit "${FAKE_DOCKER_RUN_EXIT:-0}" ;;
esac
exit 0
"#;

const SCRUBBED_ENV: &[&str] = &[
    "DAVY_IMAGE",
    "DAVY_DOCKERFILE",
    "DAVY_DOCKER_SOCK",
    "DAVY_CLAUDE_AUTH_VOLUME",
    "DAVY_SSH_AUTHORIZED_KEYS_FILE",
    "DAVY_CONFIG_DIR",
    "DOCKER_HOST",
    "FAKE_DOCKER_RUN_EXIT",
];

struct Sandbox {
    dir: TempDir,
    home: PathBuf,
    cwd: PathBuf,
    project: PathBuf,
    state: PathBuf,
    path_env: String,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let home = root.join("home");
        let cwd = root.join("cwd");
        let project = root.join("proj");
        let state = root.join("docker-state");
        let bin = root.join("bin");
        for path in [&home, &cwd, &project, &state, &bin] {
            fs::create_dir_all(path).unwrap();
        }
        let docker = bin.join("docker");
        fs::write(&docker, FAKE_DOCKER).unwrap();
        fs::set_permissions(&docker, fs::Permissions::from_mode(0o755)).unwrap();
        let path_env = format!(
            "{}:{}",
            bin.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        Self {
            dir,
            home,
            cwd,
            project,
            state,
            path_env,
        }
    }

    fn with_config_dockerfile(self) -> Self {
        let config_dir = self.home.join(".config/davy");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("rocky.Dockerfile"), "FROM rockylinux:9\n").unwrap();
        self
    }

    fn with_image(self) -> Self {
        fs::write(self.state.join("image"), "").unwrap();
        self
    }

    fn davy(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("davy"));
        for key in SCRUBBED_ENV {
            cmd.env_remove(key);
        }
        cmd.env("HOME", &self.home)
            .env("PATH", &self.path_env)
            .env("FAKE_DOCKER_STATE", &self.state)
            .current_dir(&self.cwd);
        cmd
    }

    fn calls(&self) -> Vec<String> {
        read_lines(&self.state.join("calls.log"))
    }

    fn docker_was_called(&self) -> bool {
        self.state.join("calls.log").exists()
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn local_dockerfile_builds_missing_image_then_runs_shell() {
    let sb = Sandbox::new();
    fs::write(sb.cwd.join("rocky.Dockerfile"), "FROM rockylinux:9\n").unwrap();
    fs::write(sb.cwd.join("debian.Dockerfile"), "FROM debian:12\n").unwrap();

    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("--local-dockerfile")
        .assert()
        .success();

    let calls = sb.calls();
    assert_eq!(calls.len(), 3, "{calls:#?}");
    assert_eq!(calls[0], "image inspect davy-sandbox:latest");
    assert!(calls[1].starts_with("build --build-arg USER_UID="));
    assert!(calls[1].contains(&format!("-f {}", sb.cwd.join("rocky.Dockerfile").display())));
    assert!(!calls[1].contains("--pull"));
    assert!(calls[2].starts_with("run -it --rm --name davy-proj-"));
    assert!(calls[2].contains(":/project -w /project"));
    assert!(calls[2].ends_with("davy-sandbox:latest bash"));
}

#[test]
fn existing_image_is_not_rebuilt_and_command_is_forwarded() {
    let sb = Sandbox::new().with_config_dockerfile().with_image();

    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("--name")
        .arg("box")
        .arg("--keep")
        .arg("--privileged")
        .arg("--")
        .arg("make")
        .arg("test")
        .assert()
        .success();

    let calls = sb.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].starts_with("run -it --name box -v "));
    assert!(calls[1].ends_with("--privileged davy-sandbox:latest make test"));
}

#[test]
fn run_exit_code_is_propagated() {
    let sb = Sandbox::new().with_config_dockerfile().with_image();
    sb.davy()
        .env("FAKE_DOCKER_RUN_EXIT", "9")
        .arg("-p")
        .arg(&sb.project)
        .assert()
        .code(9);
}

#[test]
fn expose_ssh_without_keys_aborts_before_docker() {
    let sb = Sandbox::new().with_config_dockerfile();
    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("--expose-ssh")
        .arg("2200")
        .assert()
        .code(6)
        .stderr(contains("no SSH public keys found"));
    assert!(!sb.docker_was_called());
}

#[test]
fn expose_ssh_passes_keys_through_environment() {
    let sb = Sandbox::new().with_config_dockerfile().with_image();
    let ssh = sb.home.join(".ssh");
    fs::create_dir_all(&ssh).unwrap();
    fs::write(ssh.join("id_ed25519.pub"), "ssh-ed25519 AAAATEST me@host\n").unwrap();

    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("-s")
        .assert()
        .success()
        .stderr(contains("exposing host port 222 to container port 22"));

    let run = sb.calls().join("\n");
    assert!(run.contains("-p 222:22 -e DAVY_SSH_AUTH_KEYS_B64 "));
    assert!(run.contains("sshd is not installed in image"));
    let env_log = read_lines(&sb.state.join("env.log"));
    assert_eq!(env_log.len(), 1);
    let payload = env_log[0].strip_prefix("keys=").unwrap();
    assert!(!payload.is_empty());
    assert!(!run.contains(payload));
}

#[test]
fn invalid_ssh_port_is_rejected() {
    let sb = Sandbox::new().with_config_dockerfile();
    for port in ["0", "65536", "ssh"] {
        sb.davy()
            .arg("-p")
            .arg(&sb.project)
            .arg("--expose-ssh")
            .arg(port)
            .assert()
            .code(5)
            .stderr(contains("invalid SSH port"));
    }
    assert!(!sb.docker_was_called());
}

#[test]
fn explicit_auth_with_missing_source_aborts() {
    let sb = Sandbox::new().with_config_dockerfile();
    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("--auth-pi")
        .assert()
        .code(8)
        .stderr(contains("Pi auth mount source not found"));
    assert!(!sb.docker_was_called());
}

#[test]
fn auth_all_with_missing_sources_warns_and_continues() {
    let sb = Sandbox::new().with_config_dockerfile().with_image();
    fs::create_dir_all(sb.home.join(".codex")).unwrap();

    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("--auth-all")
        .assert()
        .success()
        .stderr(contains("warning: Pi auth mount source not found"))
        .stderr(contains("warning: Gemini auth mount source not found"));

    let calls = sb.calls();
    let joined = calls.join("\n");
    assert!(joined.contains("volume create davy-claude-auth-"));
    assert!(joined.contains("run --rm --user 0:0 -v davy-claude-auth-"));
    assert!(joined.contains("-e CODEX_HOME=/home/dev/.codex"));
    assert!(joined.contains(&format!("{}:/home/dev/.codex", sb.home.join(".codex").display())));
}

#[test]
fn claude_volume_is_initialized_only_once() {
    let sb = Sandbox::new().with_config_dockerfile().with_image();
    for _ in 0..2 {
        sb.davy()
            .env("DAVY_CLAUDE_AUTH_VOLUME", "claude-test")
            .arg("-p")
            .arg(&sb.project)
            .arg("--auth-claude")
            .assert()
            .success();
    }
    let calls = sb.calls();
    let inits = calls
        .iter()
        .filter(|line| line.starts_with("run --rm --user 0:0"))
        .count();
    assert_eq!(inits, 1);
    let creates = calls
        .iter()
        .filter(|line| line.as_str() == "volume create claude-test")
        .count();
    assert_eq!(creates, 2);
}

#[test]
fn no_build_with_missing_image_fails() {
    let sb = Sandbox::new().with_config_dockerfile();
    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("--no-build")
        .assert()
        .code(7)
        .stderr(contains("not found (and --no-build was set)"));
    assert_eq!(sb.calls(), vec!["image inspect davy-sandbox:latest"]);
}

#[test]
fn rebuild_always_builds_with_pull() {
    let sb = Sandbox::new().with_config_dockerfile().with_image();
    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .arg("--rebuild")
        .assert()
        .success();
    let calls = sb.calls();
    assert!(calls[0].starts_with("build --pull --no-cache "));
}

#[test]
fn missing_project_dir_fails_fast() {
    let sb = Sandbox::new().with_config_dockerfile();
    sb.davy()
        .arg("-p")
        .arg(sb.dir.path().join("missing"))
        .assert()
        .code(3)
        .stderr(contains("project dir not found"));
    assert!(!sb.docker_was_called());
}

#[test]
fn missing_dockerfile_fails_fast() {
    let sb = Sandbox::new();
    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .assert()
        .code(4)
        .stderr(contains("no Dockerfile found"));
    assert!(!sb.docker_was_called());
}

#[test]
fn remote_docker_host_cannot_be_mounted() {
    let sb = Sandbox::new().with_config_dockerfile();
    sb.davy()
        .env("DOCKER_HOST", "tcp://10.1.2.3:2376")
        .arg("-p")
        .arg(&sb.project)
        .arg("--docker")
        .assert()
        .code(2)
        .stderr(contains("needs a local unix socket"));
    assert!(!sb.docker_was_called());
}

#[test]
fn claude_reset_on_missing_volume_succeeds() {
    let sb = Sandbox::new();
    sb.davy()
        .arg("auth")
        .arg("claude")
        .arg("reset")
        .assert()
        .success()
        .stderr(contains("does not exist"));
    assert_eq!(sb.calls().len(), 1);
}

#[test]
fn claude_reset_removes_existing_volume() {
    let sb = Sandbox::new();
    fs::write(sb.state.join("volume"), "").unwrap();
    sb.davy()
        .env("DAVY_CLAUDE_AUTH_VOLUME", "claude-test")
        .arg("auth")
        .arg("claude")
        .arg("reset")
        .arg("--yes")
        .assert()
        .success()
        .stderr(contains("removed Claude auth volume 'claude-test'"));
    assert_eq!(sb.calls()[1], "volume rm -f claude-test");
    assert!(!sb.state.join("volume").exists());
}

#[test]
fn settings_file_overrides_image_and_prefix() {
    let sb = Sandbox::new().with_config_dockerfile().with_image();
    fs::write(
        sb.home.join(".config/davy/config.yaml"),
        "version: 1\nimage: custom:dev\ncontainer_prefix: sbx\n",
    )
    .unwrap();
    sb.davy().arg("-p").arg(&sb.project).assert().success();
    let calls = sb.calls();
    assert_eq!(calls[0], "image inspect custom:dev");
    assert!(calls[1].contains("--name sbx-proj-"));

    sb.davy()
        .env("DAVY_IMAGE", "from-env:1")
        .arg("-p")
        .arg(&sb.project)
        .assert()
        .success();
    assert_eq!(sb.calls()[2], "image inspect from-env:1");
}

#[test]
fn invalid_settings_file_is_reported() {
    let sb = Sandbox::new().with_config_dockerfile();
    fs::write(sb.home.join(".config/davy/config.yaml"), "version: 1\nbogus: 1\n").unwrap();
    sb.davy()
        .arg("-p")
        .arg(&sb.project)
        .assert()
        .failure()
        .stderr(contains("yaml error"));
    assert!(!sb.docker_was_called());
}

#[test]
fn config_init_creates_and_preserves_existing() {
    let sb = Sandbox::new();
    let config_dir = sb.dir.path().join("conf");

    let output = sb
        .davy()
        .env("DAVY_CONFIG_DIR", &config_dir)
        .arg("config")
        .arg("init")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: Value = serde_json::from_slice(&output).expect("json output");
    assert!(value["created"].as_bool().unwrap());
    let config_path = config_dir.join("config.yaml");
    assert!(config_path.exists());

    fs::write(&config_path, "version: 1\nimage: mine:latest\n").unwrap();
    let output = sb
        .davy()
        .env("DAVY_CONFIG_DIR", &config_dir)
        .arg("config")
        .arg("init")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: Value = serde_json::from_slice(&output).expect("json output");
    assert!(!value["created"].as_bool().unwrap());

    let output = sb
        .davy()
        .env("DAVY_CONFIG_DIR", &config_dir)
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(value["settings"]["image"], "mine:latest");
    assert_eq!(value["settings"]["container_prefix"], "davy");
}

#[test]
fn non_utf8_environment_does_not_abort_startup() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let sb = Sandbox::new();
    let output = sb
        .davy()
        .env("DAVY_TEST_BYTES", OsString::from_vec(vec![0xff, 0xfe]))
        .arg("config")
        .arg("show")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(value["settings"]["image"], "davy-sandbox:latest");
}
