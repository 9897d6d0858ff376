use crate::error::DavyError;
use crate::host::HostEnv;
use crate::term;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProvider {
    Pi,
    Codex,
    Gemini,
    Claude,
}

impl AuthProvider {
    pub const ALL: [AuthProvider; 4] = [
        AuthProvider::Pi,
        AuthProvider::Codex,
        AuthProvider::Gemini,
        AuthProvider::Claude,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AuthProvider::Pi => "Pi auth",
            AuthProvider::Codex => "Codex auth",
            AuthProvider::Gemini => "Gemini auth",
            AuthProvider::Claude => "Claude auth",
        }
    }

    /// Host directory relative to HOME and its in-container target. Claude
    /// lives in a named volume instead.
    fn host_mount(self) -> Option<(&'static str, &'static str)> {
        match self {
            AuthProvider::Pi => Some((".pi/agent", "/home/dev/.pi/agent")),
            AuthProvider::Codex => Some((".codex", "/home/dev/.codex")),
            AuthProvider::Gemini => Some((".gemini", "/home/dev/.gemini")),
            AuthProvider::Claude => None,
        }
    }

    fn env(self) -> Option<(&'static str, &'static str)> {
        match self {
            AuthProvider::Codex => Some(("CODEX_HOME", "/home/dev/.codex")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Requested by its own flag: a missing source aborts the launch.
    Explicit,
    /// Enabled through --auth-all: a missing source is skipped with a warning.
    Bulk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub provider: AuthProvider,
    pub mode: AuthMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
}

impl BindMount {
    pub fn volume_arg(&self) -> String {
        format!("{}:{}", self.source.display(), self.target)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPlan {
    pub mounts: Vec<BindMount>,
    pub env: Vec<(String, String)>,
    pub claude_volume: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthFlags {
    pub pi: bool,
    pub codex: bool,
    pub gemini: bool,
    pub claude: bool,
    pub all: bool,
}

impl AuthFlags {
    /// Explicit flags keep explicit mode even when combined with --auth-all.
    pub fn requests(&self) -> Vec<AuthRequest> {
        AuthProvider::ALL
            .into_iter()
            .filter_map(|provider| {
                let explicit = match provider {
                    AuthProvider::Pi => self.pi,
                    AuthProvider::Codex => self.codex,
                    AuthProvider::Gemini => self.gemini,
                    AuthProvider::Claude => self.claude,
                };
                let mode = if explicit {
                    AuthMode::Explicit
                } else if self.all {
                    AuthMode::Bulk
                } else {
                    return None;
                };
                Some(AuthRequest { provider, mode })
            })
            .collect()
    }
}

pub fn plan_auth_mounts(host: &HostEnv, requests: &[AuthRequest]) -> Result<AuthPlan, DavyError> {
    let mut plan = AuthPlan::default();
    for request in requests {
        let Some((relative, target)) = request.provider.host_mount() else {
            plan.claude_volume = true;
            continue;
        };
        let source = host.home.join(relative);
        let allow_missing = request.mode == AuthMode::Bulk;
        if !check_mount_source(&source, request.provider.label(), allow_missing)? {
            continue;
        }
        plan.mounts.push(BindMount {
            source,
            target: target.to_string(),
        });
        if let Some((key, value)) = request.provider.env() {
            plan.env.push((key.to_string(), value.to_string()));
        }
    }

    let skills = host.home.join(".agents").join("skills");
    if skills.is_dir() {
        plan.mounts.push(BindMount {
            source: skills,
            target: "/home/dev/.agents/skills".to_string(),
        });
    }
    Ok(plan)
}

fn check_mount_source(
    source: &std::path::Path,
    label: &str,
    allow_missing: bool,
) -> Result<bool, DavyError> {
    if source.is_dir() {
        return Ok(true);
    }
    if source.exists() {
        return Err(DavyError::Config(format!(
            "{label} mount source is not a directory: {}",
            source.display()
        )));
    }
    if allow_missing {
        term::warn(format!(
            "{label} mount source not found at {}; skipping.",
            source.display()
        ));
        return Ok(false);
    }
    Err(DavyError::AuthSourceMissing {
        label: label.to_string(),
        path: source.to_path_buf(),
    })
}
