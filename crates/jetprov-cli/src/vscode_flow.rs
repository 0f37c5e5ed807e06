use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use jetprov_core::{leading_version, VscodeProfile};
use jetprov_installer::{
    apt_install, apt_install_local, apt_update, dpkg_is_installed, ensure_cached, CommandRunner,
    Downloader, InterruptSource, Invocation, SignalInterrupts, StepPlan, TargetContext, Teardown,
};
use tracing::info;

use crate::render::TerminalRenderer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct VscodeOptions {
    pub(crate) reinstall: bool,
}

pub(crate) struct VscodeSession<'a> {
    pub(crate) options: VscodeOptions,
    pub(crate) profile: &'a VscodeProfile,
    pub(crate) context: &'a TargetContext,
    pub(crate) runner: &'a mut dyn CommandRunner,
    pub(crate) downloader: &'a mut dyn Downloader,
    pub(crate) teardown: &'a mut Teardown,
    pub(crate) renderer: TerminalRenderer,
    pub(crate) temp_root: PathBuf,
    /// Consulted inside steps; defaults to the process signal handlers.
    pub(crate) interrupts: &'a dyn InterruptSource,
    already_installed: bool,
    package_path: Option<PathBuf>,
}

pub(crate) fn vscode_plan<'s>() -> StepPlan<'static, VscodeSession<'s>> {
    StepPlan::new()
        .step("install prerequisites", VscodeSession::install_prerequisites)
        .step("fetch package", VscodeSession::fetch_package)
        .step("install package", VscodeSession::install_package)
        .step("verify editor", VscodeSession::verify_editor)
}

impl<'a> VscodeSession<'a> {
    pub(crate) fn new(
        options: VscodeOptions,
        profile: &'a VscodeProfile,
        context: &'a TargetContext,
        runner: &'a mut dyn CommandRunner,
        downloader: &'a mut dyn Downloader,
        teardown: &'a mut Teardown,
        renderer: TerminalRenderer,
    ) -> Self {
        Self {
            options,
            profile,
            context,
            runner,
            downloader,
            teardown,
            renderer,
            temp_root: env::temp_dir(),
            interrupts: &SignalInterrupts,
            already_installed: false,
            package_path: None,
        }
    }

    fn skip_install(&self) -> bool {
        self.already_installed && !self.options.reinstall
    }

    pub(crate) fn install_prerequisites(&mut self) -> Result<()> {
        apt_update(&mut *self.runner)?;
        apt_install(&mut *self.runner, &self.profile.prerequisite_packages, false)?;
        self.already_installed =
            dpkg_is_installed(&mut *self.runner, self.interrupts, &self.profile.package_name)?;
        Ok(())
    }

    pub(crate) fn fetch_package(&mut self) -> Result<()> {
        if self.skip_install() {
            self.renderer.print_status(
                "skip",
                &format!(
                    "{} is already installed; pass --reinstall to install it again",
                    self.profile.package_name
                ),
            );
            return Ok(());
        }
        let dir = self
            .teardown
            .create_temp_dir(&self.temp_root, "jetprov-vscode")?;
        let path = dir.join(format!("{}_arm64.deb", self.profile.package_name));
        let status = ensure_cached(&path, &self.profile.deb_url, &mut *self.downloader)?;
        info!("{}: {}", path.display(), status.as_str());
        self.package_path = Some(path);
        Ok(())
    }

    pub(crate) fn install_package(&mut self) -> Result<()> {
        if self.skip_install() {
            return Ok(());
        }
        let path = self
            .package_path
            .clone()
            .ok_or_else(|| anyhow!("no package was fetched"))?;
        apt_install_local(&mut *self.runner, &path)
    }

    pub(crate) fn verify_editor(&mut self) -> Result<()> {
        let version_check = Invocation::new("code")
            .arg("--version")
            .current_dir(&self.context.home)
            .run_as(self.context.run_as());
        let output = self.runner.capture(&version_check)?;
        let first_line = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| anyhow!("`code --version` printed nothing"))?;
        let version = leading_version(first_line)
            .with_context(|| format!("unexpected `code --version` output: {first_line}"))?;
        self.renderer
            .print_status("ok", &format!("Visual Studio Code {version}"));
        Ok(())
    }
}
