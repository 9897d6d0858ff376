use crate::error::DavyError;
use dirs::home_dir;
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Host facts captured once at startup and threaded through every component.
#[derive(Debug, Clone)]
pub struct HostEnv {
    pub home: PathBuf,
    pub cwd: PathBuf,
    pub uid: u32,
    pub gid: u32,
    pub vars: BTreeMap<String, String>,
}

impl HostEnv {
    pub fn capture() -> Result<Self, DavyError> {
        let home = required_home_dir()?;
        let cwd = env::current_dir().map_err(|err| {
            DavyError::Config(format!("failed to read current directory: {err}"))
        })?;
        Ok(Self {
            home,
            cwd,
            uid: query_id("-u")?,
            gid: query_id("-g")?,
            vars: utf8_vars(env::vars_os()),
        })
    }

    /// Non-empty value of an environment variable.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn config_dir(&self) -> PathBuf {
        match self.var("DAVY_CONFIG_DIR") {
            Some(dir) => self.absolutize(Path::new(dir)),
            None => self.home.join(".config").join("davy"),
        }
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.home.join(".ssh")
    }

    pub fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// Keeps the variables whose name and value are valid UTF-8; the rest are
/// never consulted and must not abort startup.
fn utf8_vars<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn required_home_dir() -> Result<PathBuf, DavyError> {
    let home = home_dir().ok_or_else(|| {
        DavyError::Config("unable to resolve $HOME; set HOME to an existing directory".to_string())
    })?;
    if !home.is_absolute() {
        return Err(DavyError::Config(format!(
            "resolved HOME path is not absolute: {}",
            home.display()
        )));
    }
    Ok(home)
}

fn query_id(flag: &str) -> Result<u32, DavyError> {
    let output = Command::new("id").arg(flag).output().map_err(|err| {
        DavyError::Config(format!("failed to run `id {flag}` to read host ids: {err}"))
    })?;
    if !output.status.success() {
        return Err(DavyError::Config(format!(
            "`id {flag}` exited with status {}",
            output.status.code().unwrap_or(1)
        )));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim().parse::<u32>().map_err(|_| {
        DavyError::Config(format!(
            "unexpected output from `id {flag}`: {}",
            text.trim()
        ))
    })
}
