//! In-container command composition. Each stage is a bash script that does
//! its setup and then `exec`s the rest of the argv, so exactly one process
//! remains once the user's command starts.

const CLAUDE_AUTH_SCRIPT: &str = r#"set -e
if [ ! -w /home/dev/.claude-auth ]; then
  echo "davy: Claude auth volume is not writable by $(id -un). Run 'davy auth claude reset' and retry." >&2
  exit 1
fi
mkdir -p /home/dev/.claude-auth/.claude
touch /home/dev/.claude-auth/.claude.json

if [ -e /home/dev/.claude ] && [ ! -L /home/dev/.claude ]; then
  rm -rf /home/dev/.claude
fi
if [ -e /home/dev/.claude.json ] && [ ! -L /home/dev/.claude.json ]; then
  rm -f /home/dev/.claude.json
fi

if [ "$(readlink /home/dev/.claude)" != /home/dev/.claude-auth/.claude ]; then
  ln -sfn /home/dev/.claude-auth/.claude /home/dev/.claude
fi
if [ "$(readlink /home/dev/.claude.json)" != /home/dev/.claude-auth/.claude.json ]; then
  ln -sfn /home/dev/.claude-auth/.claude.json /home/dev/.claude.json
fi
export CLAUDE_CONFIG_DIR=/home/dev/.claude

exec "$@""#;

const SSH_BOOTSTRAP_SCRIPT: &str = r#"set -e
if ! command -v sshd >/dev/null 2>&1; then
  echo "davy: sshd is not installed in image. Rebuild with the latest rocky.Dockerfile (davy --rebuild)." >&2
  exit 1
fi
for tool in ps flock; do
  if ! command -v "$tool" >/dev/null 2>&1; then
    echo "davy: '$tool' is required for remote IDE SSH helpers (VS Code and derivatives)." >&2
    echo "davy: rebuild with the latest rocky.Dockerfile (davy --rebuild)." >&2
    exit 1
  fi
done

if [ -z "${DAVY_SSH_AUTH_KEYS_B64:-}" ]; then
  echo "davy: DAVY_SSH_AUTH_KEYS_B64 is missing." >&2
  exit 1
fi

mkdir -p /home/dev/.ssh
chmod 700 /home/dev/.ssh
# umask stays inside the subshells; the handed-off command keeps the caller's.
if ! (umask 077 && printf "%s" "$DAVY_SSH_AUTH_KEYS_B64" | base64 -d >/home/dev/.ssh/authorized_keys 2>/dev/null); then
  if ! (umask 077 && printf "%s" "$DAVY_SSH_AUTH_KEYS_B64" | base64 --decode >/home/dev/.ssh/authorized_keys); then
    echo "davy: DAVY_SSH_AUTH_KEYS_B64 could not be decoded." >&2
    exit 1
  fi
fi
if [ ! -s /home/dev/.ssh/authorized_keys ]; then
  echo "davy: decoded authorized_keys is empty." >&2
  exit 1
fi
chmod 600 /home/dev/.ssh/authorized_keys
unset DAVY_SSH_AUTH_KEYS_B64

sudo mkdir -p /run/sshd
if ! ls /etc/ssh/ssh_host_*_key >/dev/null 2>&1; then
  sudo ssh-keygen -A >/dev/null
fi

sudo /usr/sbin/sshd \
  -o PermitRootLogin=no \
  -o PasswordAuthentication=no \
  -o KbdInteractiveAuthentication=no \
  -o ChallengeResponseAuthentication=no \
  -o PubkeyAuthentication=yes \
  -o AuthorizedKeysFile=.ssh/authorized_keys \
  -o PidFile=/tmp/davy-sshd.pid

exec "$@""#;

pub const DEFAULT_COMMAND: &str = "bash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ClaudeAuth,
    SshBootstrap,
}

impl Stage {
    pub fn script(self) -> &'static str {
        match self {
            Stage::ClaudeAuth => CLAUDE_AUTH_SCRIPT,
            Stage::SshBootstrap => SSH_BOOTSTRAP_SCRIPT,
        }
    }

    /// `bash -lc <script> -- <command...>`: the script sees the wrapped
    /// command as "$@" and execs it.
    pub fn wrap(self, command: Vec<String>) -> Vec<String> {
        let mut wrapped = vec![
            "bash".to_string(),
            "-lc".to_string(),
            self.script().to_string(),
            "--".to_string(),
        ];
        wrapped.extend(command);
        wrapped
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPipeline {
    stages: Vec<Stage>,
}

impl CommandPipeline {
    pub fn new(claude_auth: bool, ssh: bool) -> Self {
        let mut stages = Vec::new();
        if claude_auth {
            stages.push(Stage::ClaudeAuth);
        }
        if ssh {
            stages.push(Stage::SshBootstrap);
        }
        Self { stages }
    }

    /// Wraps the user command so that the first stage runs first. An empty
    /// command becomes an interactive shell.
    pub fn build(&self, command: &[String]) -> Vec<String> {
        let inner = if command.is_empty() {
            vec![DEFAULT_COMMAND.to_string()]
        } else {
            command.to_vec()
        };
        self.stages
            .iter()
            .rev()
            .fold(inner, |acc, stage| stage.wrap(acc))
    }
}
