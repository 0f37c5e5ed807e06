use anyhow::{anyhow, Context, Result};
use jetprov_core::ProvisionError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::command::{CommandRunner, Invocation, RunAs};

pub const IDENTITY_PROBE: &str =
    "import sys; print(sys.executable); print(sys.prefix); print(sys.base_prefix)";

/// What an interpreter reports about itself: `sys.executable`, `sys.prefix`
/// and `sys.base_prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterIdentity {
    pub executable: PathBuf,
    pub prefix: PathBuf,
    pub base_prefix: PathBuf,
}

impl InterpreterIdentity {
    /// The distribution interpreter, e.g. `/usr/bin/python3.10`.
    pub fn system(version: &str) -> Self {
        Self {
            executable: PathBuf::from(format!("/usr/bin/python{version}")),
            prefix: PathBuf::from("/usr"),
            base_prefix: PathBuf::from("/usr"),
        }
    }

    /// A virtual environment layered on the distribution interpreter.
    pub fn venv(venv_dir: &Path) -> Self {
        Self {
            executable: venv_dir.join("bin").join("python"),
            prefix: venv_dir.to_path_buf(),
            base_prefix: PathBuf::from("/usr"),
        }
    }

    pub fn parse_probe_output(output: &str) -> Result<Self> {
        let mut lines = output.lines().map(str::trim).filter(|line| !line.is_empty());
        let mut field = |name: &str| {
            lines
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("interpreter probe output is missing {name}"))
        };
        Ok(Self {
            executable: field("sys.executable")?,
            prefix: field("sys.prefix")?,
            base_prefix: field("sys.base_prefix")?,
        })
    }

    fn resolved(&self) -> Result<Self> {
        Ok(Self {
            executable: resolve_parent(&self.executable)?,
            prefix: resolve(&self.prefix)?,
            base_prefix: resolve(&self.base_prefix)?,
        })
    }
}

/// Runs `interpreter` as the target user and requires it to report
/// `expected`. Returns the identity it reported.
pub fn verify_interpreter_provenance(
    runner: &mut dyn CommandRunner,
    interpreter: &Path,
    run_as: &RunAs,
    expected: &InterpreterIdentity,
) -> Result<InterpreterIdentity> {
    let output = runner.capture(
        &Invocation::new(interpreter.display().to_string())
            .arg("-c")
            .arg(IDENTITY_PROBE)
            .run_as(run_as.clone()),
    )?;
    let reported = InterpreterIdentity::parse_probe_output(&output)?;
    debug!("interpreter reported {reported:?}");

    let want = expected.resolved()?;
    let got = reported.resolved()?;
    let checks = [
        ("sys.executable", &want.executable, &got.executable),
        ("sys.prefix", &want.prefix, &got.prefix),
        ("sys.base_prefix", &want.base_prefix, &got.base_prefix),
    ];
    for (field, want, got) in checks {
        if want != got {
            return Err(anyhow!(
                "interpreter provenance mismatch for {}: {field} is {}, expected {}",
                interpreter.display(),
                got.display(),
                want.display()
            ));
        }
    }
    Ok(reported)
}

fn resolve(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path)
        .map_err(|err| {
            anyhow::Error::new(ProvisionError::Precondition(format!(
                "cannot resolve interpreter path {}: {err}",
                path.display()
            )))
        })
        .context("interpreter provenance could not be established")
}

/// Resolves the directory part only; the executable itself is commonly a
/// symlink into the base installation and must keep its own name.
fn resolve_parent(path: &Path) -> Result<PathBuf> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            Ok(resolve(parent)?.join(name))
        }
        _ => Err(ProvisionError::Precondition(format!(
            "interpreter path has no directory component: {}",
            path.display()
        ))
        .into()),
    }
}
