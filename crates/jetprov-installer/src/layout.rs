use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::command::{CommandRunner, Invocation, RunAs};

/// Paths under the target user's home that the runbooks read and write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayout {
    home: PathBuf,
}

impl TargetLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join(".cache")
    }

    pub fn wheel_cache_dir(&self, cache_dir_name: &str) -> PathBuf {
        self.cache_dir().join(cache_dir_name)
    }

    pub fn wheel_cache_path(&self, cache_dir_name: &str, file_name: &str) -> PathBuf {
        self.wheel_cache_dir(cache_dir_name).join(file_name)
    }

    pub fn workspace_dir(&self, workspace_dir_name: &str) -> PathBuf {
        self.home.join(workspace_dir_name)
    }

    pub fn venv_dir(&self, workspace_dir_name: &str, venv_name: &str) -> PathBuf {
        self.workspace_dir(workspace_dir_name).join(venv_name)
    }

    pub fn venv_python(venv_dir: &Path) -> PathBuf {
        venv_dir.join("bin").join("python")
    }
}

/// Creates `dir` as the target user so it never ends up owned by root.
pub fn ensure_user_dir(runner: &mut dyn CommandRunner, run_as: &RunAs, dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    runner.run(
        &Invocation::new("mkdir")
            .arg("-p")
            .path_arg(dir)
            .run_as(run_as.clone()),
    )
}
