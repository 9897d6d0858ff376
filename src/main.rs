mod auth;
mod config;
mod docker;
mod error;
mod host;
mod pipeline;
mod resolve;
mod sandbox;
mod ssh;
mod term;
mod volume;

use crate::auth::AuthFlags;
use crate::config::{config_path, init_settings, load_settings};
use crate::docker::RealDockerRunner;
use crate::error::DavyError;
use crate::host::HostEnv;
use crate::sandbox::{launch, LaunchRequest, SandboxConfig};
use crate::volume::{reset_volume, VolumeRef};
use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use serde_json::json;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "davy",
    about = "Docker-based sandbox runner for agent CLIs",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage persistent auth state
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Manage the davy settings file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    /// Claude auth volume management
    Claude {
        #[command(subcommand)]
        command: ClaudeCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ClaudeCommand {
    /// Delete the Claude auth volume
    Reset {
        /// Do not ask for confirmation
        #[arg(short = 'y', long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write the default settings file if none exists
    Init,
    /// Print the effective settings
    Show,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Mount project directory at /project
    #[arg(short = 'p', long = "project", value_name = "DIR")]
    project_dir: Option<PathBuf>,

    /// Container name
    #[arg(short = 'n', long = "name", value_name = "NAME")]
    name: Option<String>,

    /// Also mount host docker socket
    #[arg(long = "docker", action = ArgAction::SetTrue)]
    with_docker_sock: bool,

    /// Docker socket path to mount (defaults to DAVY_DOCKER_SOCK, DOCKER_HOST unix://, then /var/run/docker.sock)
    #[arg(long = "docker-sock", value_name = "PATH")]
    docker_sock: Option<PathBuf>,

    /// Force rebuild of the image before running (pull + no cache)
    #[arg(long = "rebuild", action = ArgAction::SetTrue, conflicts_with = "no_build")]
    rebuild: bool,

    /// Do not build; fail if image is missing
    #[arg(long = "no-build", action = ArgAction::SetTrue)]
    no_build: bool,

    /// Do not remove the container on exit
    #[arg(long = "keep", action = ArgAction::SetTrue)]
    keep: bool,

    /// Publish host PORT to container port 22 (default: 222)
    #[arg(
        short = 's',
        long = "expose-ssh",
        num_args = 0..=1,
        default_missing_value = ssh::DEFAULT_SSH_PORT,
        value_name = "PORT"
    )]
    expose_ssh: Option<String>,

    /// Additional environment variable in KEY=VALUE format (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", action = ArgAction::Append)]
    extra_env: Vec<String>,

    /// Forward host environment variable by key name (repeatable)
    #[arg(long = "pass-env", value_name = "KEY", action = ArgAction::Append)]
    pass_env: Vec<String>,

    /// Mount host Pi auth
    #[arg(long = "auth-pi", alias = "pi-auth", action = ArgAction::SetTrue)]
    with_pi_auth: bool,

    /// Mount host Codex auth
    #[arg(long = "auth-codex", alias = "codex-auth", action = ArgAction::SetTrue)]
    with_codex_auth: bool,

    /// Mount host Gemini auth
    #[arg(long = "auth-gemini", alias = "gemini-auth", action = ArgAction::SetTrue)]
    with_gemini_auth: bool,

    /// Mount persistent Claude auth volume
    #[arg(long = "auth-claude", alias = "claude-auth", action = ArgAction::SetTrue)]
    with_claude_auth: bool,

    /// Enable all auth mounts (pi, codex, gemini, claude), skipping missing ones
    #[arg(short = 'a', long = "auth-all", action = ArgAction::SetTrue)]
    auth_all: bool,

    /// Docker image tag (defaults to DAVY_IMAGE, then the settings file)
    #[arg(long = "image", value_name = "IMAGE")]
    image: Option<String>,

    /// Dockerfile to build (defaults to DAVY_DOCKERFILE, then ~/.config/davy/rocky.Dockerfile, then ~/.config/davy/debian.Dockerfile)
    #[arg(long = "dockerfile", value_name = "PATH")]
    dockerfile: Option<PathBuf>,

    /// Use Dockerfile from current directory instead of ~/.config/davy
    #[arg(long = "local-dockerfile", action = ArgAction::SetTrue)]
    local_dockerfile: bool,

    /// Additional docker run arguments (pass before --)
    #[arg(
        value_name = "DOCKER_ARG",
        allow_hyphen_values = true,
        value_terminator = "--"
    )]
    extra_docker_args: Vec<String>,

    /// Command to run inside the container (pass after --)
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    cmd: Vec<String>,
}

impl From<RunArgs> for LaunchRequest {
    fn from(args: RunArgs) -> Self {
        LaunchRequest {
            project_dir: args.project_dir,
            name: args.name,
            docker: args.with_docker_sock,
            docker_sock: args.docker_sock,
            rebuild: args.rebuild,
            no_build: args.no_build,
            keep: args.keep,
            expose_ssh: args.expose_ssh,
            env: args.extra_env,
            pass_env: args.pass_env,
            auth: AuthFlags {
                pi: args.with_pi_auth,
                codex: args.with_codex_auth,
                gemini: args.with_gemini_auth,
                claude: args.with_claude_auth,
                all: args.auth_all,
            },
            image: args.image,
            dockerfile: args.dockerfile,
            local_dockerfile: args.local_dockerfile,
            docker_args: args.extra_docker_args,
            command: args.cmd,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            term::error(err.to_string());
            std::process::exit(err.exit_code());
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32, DavyError> {
    let host = HostEnv::capture()?;
    match cli.command {
        Some(Commands::Auth {
            command:
                AuthCommand::Claude {
                    command: ClaudeCommand::Reset { yes },
                },
        }) => handle_claude_reset(&host, yes),
        Some(Commands::Config { command }) => handle_config(&host, command),
        None => handle_run(&host, cli.run),
    }
}

fn handle_run(host: &HostEnv, args: RunArgs) -> Result<i32, DavyError> {
    let settings = load_settings(&config_path(host))?;
    let config = SandboxConfig::resolve(args.into(), host, &settings)?;
    let runner = RealDockerRunner::locate()?;
    launch(&config, &runner)
}

fn handle_claude_reset(host: &HostEnv, yes: bool) -> Result<i32, DavyError> {
    let settings = load_settings(&config_path(host))?;
    let volume = VolumeRef::for_host(host, &settings.claude_auth);
    let runner = RealDockerRunner::locate()?;
    reset_volume(&runner, &volume, |volume| {
        if yes || !io::stdin().is_terminal() {
            return Ok(true);
        }
        Ok(Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Delete Claude auth volume '{}'? Saved logins will be lost.",
                volume.name
            ))
            .default(false)
            .interact()?)
    })?;
    Ok(0)
}

fn handle_config(host: &HostEnv, command: ConfigCommand) -> Result<i32, DavyError> {
    let path = config_path(host);
    let payload = match command {
        ConfigCommand::Init => {
            let created = init_settings(&path)?;
            json!({"path": path, "created": created})
        }
        ConfigCommand::Show => {
            let settings = load_settings(&path)?;
            json!({"path": path, "exists": path.exists(), "settings": settings})
        }
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(0)
}
