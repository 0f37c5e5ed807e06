use std::path::PathBuf;

use anyhow::{anyhow, Result};
use jetprov_core::Revision;
use jetprov_installer::{is_nonempty_file, CommandRunner, Invocation, StepPlan, Teardown};
use tracing::{info, warn};

use crate::render::TerminalRenderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SnapRevertOptions {
    pub(crate) snap: String,
    pub(crate) revision: Revision,
    pub(crate) download_dir: PathBuf,
}

impl SnapRevertOptions {
    fn basename(&self) -> String {
        format!("{}_{}", self.snap, self.revision)
    }

    pub(crate) fn snap_path(&self) -> PathBuf {
        self.download_dir.join(format!("{}.snap", self.basename()))
    }

    pub(crate) fn assert_path(&self) -> PathBuf {
        self.download_dir.join(format!("{}.assert", self.basename()))
    }
}

pub(crate) struct SnapSession<'a> {
    pub(crate) options: SnapRevertOptions,
    pub(crate) runner: &'a mut dyn CommandRunner,
    pub(crate) teardown: &'a mut Teardown,
    pub(crate) renderer: TerminalRenderer,
}

pub(crate) fn snap_plan<'s>() -> StepPlan<'static, SnapSession<'s>> {
    StepPlan::new()
        .step("inspect current revision", SnapSession::inspect_current_revision)
        .step("fetch revision", SnapSession::fetch_revision)
        .step("acknowledge assertion", SnapSession::acknowledge_assertion)
        .step("install revision", SnapSession::install_revision)
        .step("hold refreshes", SnapSession::hold_refreshes)
}

impl SnapSession<'_> {
    pub(crate) fn inspect_current_revision(&mut self) -> Result<()> {
        let list = Invocation::new("snap").arg("list").arg(&self.options.snap);
        match self.runner.capture(&list) {
            Ok(output) => match installed_revision(&output, &self.options.snap) {
                Some(current) => info!(
                    "{} is at revision {current}; target revision {}",
                    self.options.snap, self.options.revision
                ),
                None => info!("{} has no installed revision", self.options.snap),
            },
            Err(err) => warn!(
                "could not read the installed revision of {}: {err:#}",
                self.options.snap
            ),
        }
        Ok(())
    }

    pub(crate) fn fetch_revision(&mut self) -> Result<()> {
        let snap_path = self.options.snap_path();
        let assert_path = self.options.assert_path();
        self.teardown.register_file(&snap_path);
        self.teardown.register_file(&assert_path);

        if is_nonempty_file(&snap_path) && is_nonempty_file(&assert_path) {
            self.renderer.print_status(
                "skip",
                &format!("{} already downloaded", snap_path.display()),
            );
            return Ok(());
        }

        let download = Invocation::new("snap")
            .arg("download")
            .arg(&self.options.snap)
            .arg(format!("--revision={}", self.options.revision))
            .arg(format!("--basename={}", self.options.basename()))
            .arg(format!(
                "--target-directory={}",
                self.options.download_dir.display()
            ));
        self.runner.run(&download)?;

        for path in [&snap_path, &assert_path] {
            if !is_nonempty_file(path) {
                return Err(anyhow!(
                    "snap download produced empty or missing file: {}",
                    path.display()
                ));
            }
        }
        self.renderer
            .print_status("ok", &format!("downloaded {}", snap_path.display()));
        Ok(())
    }

    pub(crate) fn acknowledge_assertion(&mut self) -> Result<()> {
        let ack = Invocation::new("snap")
            .arg("ack")
            .path_arg(&self.options.assert_path());
        self.runner.run(&ack)
    }

    pub(crate) fn install_revision(&mut self) -> Result<()> {
        let install = Invocation::new("snap")
            .arg("install")
            .path_arg(&self.options.snap_path());
        self.runner.run(&install)?;
        self.renderer.print_status(
            "ok",
            &format!(
                "{} installed at revision {}",
                self.options.snap, self.options.revision
            ),
        );
        Ok(())
    }

    pub(crate) fn hold_refreshes(&mut self) -> Result<()> {
        let hold = Invocation::new("snap")
            .arg("refresh")
            .arg("--hold")
            .arg(&self.options.snap);
        self.runner.run(&hold)
    }
}

/// Reads the `Rev` column of `snap list <name>` output.
pub(crate) fn installed_revision(output: &str, snap: &str) -> Option<String> {
    let mut lines = output.lines();
    let header = lines.next()?;
    let rev_column = header.split_whitespace().position(|column| column == "Rev")?;
    lines
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|columns| columns.first() == Some(&snap))
        .and_then(|columns| columns.get(rev_column).map(|rev| rev.to_string()))
}
