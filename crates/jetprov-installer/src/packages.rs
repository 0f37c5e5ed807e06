use anyhow::{Context, Result};
use std::path::Path;

use crate::command::{CommandRunner, Invocation};
use crate::signals::{check_interrupted, InterruptSource};

const NONINTERACTIVE: (&str, &str) = ("DEBIAN_FRONTEND", "noninteractive");

pub fn apt_update(runner: &mut dyn CommandRunner) -> Result<()> {
    runner.run(
        &Invocation::new("apt-get")
            .arg("update")
            .env(NONINTERACTIVE.0, NONINTERACTIVE.1),
    )
}

pub fn apt_install(
    runner: &mut dyn CommandRunner,
    packages: &[String],
    no_recommends: bool,
) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    let mut invocation = Invocation::new("apt-get")
        .arg("install")
        .arg("-y")
        .env(NONINTERACTIVE.0, NONINTERACTIVE.1);
    if no_recommends {
        invocation = invocation.arg("--no-install-recommends");
    }
    runner.run(&invocation.args(packages.iter().cloned()))
}

/// Installs a local `.deb` through apt so its dependencies are resolved.
pub fn apt_install_local(runner: &mut dyn CommandRunner, deb: &Path) -> Result<()> {
    runner.run(
        &Invocation::new("apt-get")
            .arg("install")
            .arg("-y")
            .path_arg(deb)
            .env(NONINTERACTIVE.0, NONINTERACTIVE.1),
    )
}

pub fn dpkg_install(runner: &mut dyn CommandRunner, deb: &Path) -> Result<()> {
    runner.run(
        &Invocation::new("dpkg")
            .arg("-i")
            .path_arg(deb)
            .env(NONINTERACTIVE.0, NONINTERACTIVE.1),
    )
}

/// `dpkg-query` exits non-zero for unknown packages, which reads as absent
/// unless the failure came from a pending interrupt.
pub fn dpkg_is_installed(
    runner: &mut dyn CommandRunner,
    interrupts: &dyn InterruptSource,
    package: &str,
) -> Result<bool> {
    let query = Invocation::new("dpkg-query")
        .arg("-W")
        .arg("-f=${Status}")
        .arg(package);
    match runner.capture(&query) {
        Ok(status) => Ok(status.contains("install ok installed")),
        Err(_) => {
            check_interrupted(interrupts)
                .with_context(|| format!("interrupted: {}", query.command_line()))?;
            Ok(false)
        }
    }
}
