use anyhow::{Context, Result};
use jetprov_core::ProvisionError;
use nix::unistd::{Uid, User};
use std::env;
use std::ffi::OsStr;
use std::path::PathBuf;

use crate::command::RunAs;
use crate::layout::TargetLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeRequirement {
    /// Must run as root via sudo from a regular account.
    Root,
    /// Must run as the desktop user, never as root.
    NonRoot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl From<User> for UserRecord {
    fn from(value: User) -> Self {
        Self {
            name: value.name,
            uid: value.uid.as_raw(),
            gid: value.gid.as_raw(),
            home: value.dir,
        }
    }
}

/// Process identity and the system account database.
pub trait IdentitySource {
    fn effective_uid(&self) -> u32;
    fn real_uid(&self) -> u32;
    /// The account that invoked sudo, from `SUDO_USER`.
    fn sudo_user(&self) -> Option<String>;
    fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>>;
    fn user_by_uid(&self, uid: u32) -> Result<Option<UserRecord>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentitySource for SystemIdentity {
    fn effective_uid(&self) -> u32 {
        Uid::effective().as_raw()
    }

    fn real_uid(&self) -> u32 {
        Uid::current().as_raw()
    }

    fn sudo_user(&self) -> Option<String> {
        env::var("SUDO_USER").ok()
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        let user = User::from_name(name)
            .with_context(|| format!("failed to look up user '{name}' in the passwd database"))?;
        Ok(user.map(UserRecord::from))
    }

    fn user_by_uid(&self, uid: u32) -> Result<Option<UserRecord>> {
        let user = User::from_uid(Uid::from_raw(uid))
            .with_context(|| format!("failed to look up uid {uid} in the passwd database"))?;
        Ok(user.map(UserRecord::from))
    }
}

/// The unprivileged account every delegated action runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetContext {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    /// Whether this process runs as root and must delegate to `user`.
    pub privileged: bool,
}

impl TargetContext {
    pub fn run_as(&self) -> RunAs {
        if self.privileged {
            RunAs::User(self.user.clone())
        } else {
            RunAs::Current
        }
    }

    pub fn layout(&self) -> TargetLayout {
        TargetLayout::new(&self.home)
    }
}

pub fn resolve_target_context(
    requirement: PrivilegeRequirement,
    identity: &dyn IdentitySource,
) -> Result<TargetContext> {
    let is_root = identity.effective_uid() == 0;
    let record = match requirement {
        PrivilegeRequirement::Root => {
            if !is_root {
                return Err(precondition(
                    "this command must run with root privileges; re-run it with sudo",
                ));
            }
            let invoking_user = identity
                .sudo_user()
                .map(|user| user.trim().to_string())
                .filter(|user| !user.is_empty() && user != "root")
                .ok_or_else(|| {
                    precondition(
                        "cannot determine invoking non-root user (SUDO_USER is unset or root); run this command with sudo from a regular account",
                    )
                })?;
            identity.user_by_name(&invoking_user)?.ok_or_else(|| {
                precondition(format!(
                    "invoking user '{invoking_user}' is not in the passwd database"
                ))
            })?
        }
        PrivilegeRequirement::NonRoot => {
            if is_root {
                return Err(precondition(
                    "this command must not run as root; run it from your desktop session without sudo",
                ));
            }
            let uid = identity.real_uid();
            identity
                .user_by_uid(uid)?
                .ok_or_else(|| precondition(format!("uid {uid} is not in the passwd database")))?
        }
    };

    if !record.home.is_dir() {
        return Err(precondition(format!(
            "home directory of '{}' does not exist: {}",
            record.name,
            record.home.display()
        )));
    }

    Ok(TargetContext {
        user: record.name,
        uid: record.uid,
        gid: record.gid,
        home: record.home,
        privileged: requirement == PrivilegeRequirement::Root,
    })
}

pub fn missing_commands(commands: &[&str], search_path: Option<&OsStr>) -> Vec<String> {
    let dirs = search_path
        .map(|value| env::split_paths(value).collect::<Vec<_>>())
        .unwrap_or_default();
    commands
        .iter()
        .filter(|command| !dirs.iter().any(|dir| is_executable(&dir.join(command))))
        .map(|command| command.to_string())
        .collect()
}

pub fn require_commands(commands: &[&str]) -> Result<()> {
    let missing = missing_commands(commands, env::var_os("PATH").as_deref());
    if missing.is_empty() {
        return Ok(());
    }
    Err(precondition(format!(
        "required command(s) not found on PATH: {}",
        missing.join(", ")
    )))
}

fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn precondition(message: impl Into<String>) -> anyhow::Error {
    ProvisionError::Precondition(message.into()).into()
}
