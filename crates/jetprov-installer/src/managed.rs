use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::fs_utils::{remove_dir_if_exists, remove_file_if_exists};

static TEMP_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedKind {
    File,
    Directory,
}

/// A path this run may create, with ownership decided at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    path: PathBuf,
    kind: ManagedKind,
    created_by_this_run: bool,
}

impl ManagedFile {
    /// Anything already at `path`, even an empty file, belongs to someone
    /// else and is never removed.
    pub fn register(path: impl Into<PathBuf>, kind: ManagedKind) -> Self {
        let path = path.into();
        let existed = fs::symlink_metadata(&path).is_ok();
        Self {
            path,
            kind,
            created_by_this_run: !existed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ManagedKind {
        self.kind
    }

    pub fn created_by_this_run(&self) -> bool {
        self.created_by_this_run
    }
}

/// Deferred cleanup list. Runs once at the end of a runbook and again from
/// `Drop`, which finds nothing left to do.
#[derive(Debug, Default)]
pub struct Teardown {
    entries: Vec<ManagedFile>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ManagedFile] {
        &self.entries
    }

    /// Registers `path` on first reference and reports whether this run
    /// owns it. Later registrations of the same path keep the first verdict.
    pub fn register_file(&mut self, path: &Path) -> bool {
        self.register(path, ManagedKind::File)
    }

    pub fn register_dir(&mut self, path: &Path) -> bool {
        self.register(path, ManagedKind::Directory)
    }

    fn register(&mut self, path: &Path, kind: ManagedKind) -> bool {
        if let Some(existing) = self.entries.iter().find(|entry| entry.path == path) {
            return existing.created_by_this_run;
        }
        let entry = ManagedFile::register(path, kind);
        let created = entry.created_by_this_run;
        debug!(
            "tracking {} (created_by_this_run={created})",
            entry.path.display()
        );
        self.entries.push(entry);
        created
    }

    pub fn create_temp_dir(&mut self, parent: &Path, prefix: &str) -> Result<PathBuf> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before unix epoch")?
            .as_nanos();
        let sequence = TEMP_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = parent.join(format!(
            "{}-{}-{}-{}",
            prefix,
            std::process::id(),
            nanos,
            sequence
        ));
        self.register_dir(&dir);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating tmp dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Removes created entries, newest first, and returns removal failures
    /// as warnings.
    pub fn run(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        while let Some(entry) = self.entries.pop() {
            if !entry.created_by_this_run {
                debug!("keeping pre-existing {}", entry.path.display());
                continue;
            }
            let removed = match entry.kind {
                ManagedKind::File => remove_file_if_exists(&entry.path),
                ManagedKind::Directory => remove_dir_if_exists(&entry.path),
            };
            match removed {
                Ok(()) => debug!("removed {}", entry.path.display()),
                Err(err) => warnings.push(format!(
                    "failed to remove {}: {err}",
                    entry.path.display()
                )),
            }
        }
        warnings
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        for warning in self.run() {
            warn!("{warning}");
        }
    }
}
