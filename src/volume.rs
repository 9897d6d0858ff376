use crate::config::ClaudeAuthSettings;
use crate::docker::{execute_docker, probe_docker, DockerRunner};
use crate::error::DavyError;
use crate::host::HostEnv;
use crate::term;
use std::collections::BTreeMap;

pub const VOLUME_OVERRIDE_ENV: &str = "DAVY_CLAUDE_AUTH_VOLUME";
/// Where the Claude login volume is mounted inside the sandbox.
pub const CLAUDE_AUTH_MOUNT: &str = "/home/dev/.claude-auth";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRef {
    pub name: String,
}

impl VolumeRef {
    pub fn derive(prefix: &str, uid: u32, version: &str) -> Self {
        Self {
            name: format!("{prefix}-{uid}-{version}"),
        }
    }

    pub fn for_host(host: &HostEnv, settings: &ClaudeAuthSettings) -> Self {
        match host.var(VOLUME_OVERRIDE_ENV) {
            Some(name) => Self {
                name: name.to_string(),
            },
            None => Self::derive(&settings.volume_prefix, host.uid, &settings.volume_version),
        }
    }

    pub fn mount_arg(&self) -> String {
        format!("type=volume,src={},dst={CLAUDE_AUTH_MOUNT}", self.name)
    }
}

pub fn volume_exists<R: DockerRunner>(runner: &R, volume: &VolumeRef) -> Result<bool, DavyError> {
    probe_docker(
        runner,
        &[
            "volume".to_string(),
            "inspect".to_string(),
            volume.name.clone(),
        ],
    )
}

/// Creates the volume if needed and hands its contents to the host user the
/// first time it is seen. Returns whether initialization ran.
pub fn ensure_volume<R: DockerRunner>(
    runner: &R,
    volume: &VolumeRef,
    image: &str,
    uid: u32,
    gid: u32,
) -> Result<bool, DavyError> {
    // Freshness comes from this probe; `volume create` succeeds either way.
    let fresh = !volume_exists(runner, volume)?;
    execute_docker(
        runner,
        &[
            "volume".to_string(),
            "create".to_string(),
            volume.name.clone(),
        ],
        &BTreeMap::new(),
        true,
    )?;
    if !fresh {
        return Ok(false);
    }

    term::info(format!("initializing Claude auth volume '{}'.", volume.name));
    execute_docker(
        runner,
        &init_volume_args(volume, image, uid, gid),
        &BTreeMap::new(),
        false,
    )?;
    Ok(true)
}

/// One-shot root container that prepares the volume. Safe to run repeatedly.
pub fn init_volume_args(volume: &VolumeRef, image: &str, uid: u32, gid: u32) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--user".to_string(),
        "0:0".to_string(),
        "-v".to_string(),
        format!("{}:/auth", volume.name),
        image.to_string(),
        "bash".to_string(),
        "-lc".to_string(),
        format!(
            "mkdir -p /auth/.claude && touch /auth/.claude.json && chown -R {uid}:{gid} /auth"
        ),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Removed,
    Absent,
    Declined,
}

/// Deletes the volume when present. `confirm` is only consulted for an existing volume.
pub fn reset_volume<R, F>(
    runner: &R,
    volume: &VolumeRef,
    confirm: F,
) -> Result<ResetOutcome, DavyError>
where
    R: DockerRunner,
    F: FnOnce(&VolumeRef) -> Result<bool, DavyError>,
{
    if !volume_exists(runner, volume)? {
        term::info(format!(
            "Claude auth volume '{}' does not exist",
            volume.name
        ));
        return Ok(ResetOutcome::Absent);
    }
    if !confirm(volume)? {
        term::info(format!("kept Claude auth volume '{}'", volume.name));
        return Ok(ResetOutcome::Declined);
    }
    execute_docker(
        runner,
        &[
            "volume".to_string(),
            "rm".to_string(),
            "-f".to_string(),
            volume.name.clone(),
        ],
        &BTreeMap::new(),
        true,
    )?;
    term::info(format!("removed Claude auth volume '{}'", volume.name));
    Ok(ResetOutcome::Removed)
}
