use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use jetprov_core::{evaluate_runtime_probe, PytorchProfile, RuntimeProbeReport, RUNTIME_PROBE_SCRIPT};
use jetprov_installer::{
    apt_install, apt_update, check_interrupted, dpkg_install, dpkg_is_installed, ensure_cached,
    ensure_cached_verified, ensure_user_dir, run_tolerated, verify_interpreter_provenance,
    CommandRunner, Downloader, InterpreterIdentity, InterruptSource, Invocation,
    SignalInterrupts, StepPlan, TargetContext, TargetLayout, Teardown,
};
use tracing::{info, warn};

use crate::render::TerminalRenderer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PytorchOptions {
    pub(crate) use_venv: bool,
    pub(crate) clean_cache: bool,
}

pub(crate) struct PytorchSession<'a> {
    pub(crate) options: PytorchOptions,
    pub(crate) profile: &'a PytorchProfile,
    pub(crate) context: &'a TargetContext,
    pub(crate) runner: &'a mut dyn CommandRunner,
    /// Writes into the target user's wheel cache.
    pub(crate) user_downloader: &'a mut dyn Downloader,
    /// Writes into root-owned temp dirs.
    pub(crate) system_downloader: &'a mut dyn Downloader,
    pub(crate) teardown: &'a mut Teardown,
    pub(crate) renderer: TerminalRenderer,
    pub(crate) temp_root: PathBuf,
    /// Consulted inside steps; defaults to the process signal handlers.
    pub(crate) interrupts: &'a dyn InterruptSource,
    interpreter: Option<PathBuf>,
    wheel_paths: Vec<PathBuf>,
}

pub(crate) fn pytorch_plan<'s>() -> StepPlan<'static, PytorchSession<'s>> {
    StepPlan::new()
        .step("validate profile", PytorchSession::validate_profile)
        .step("install system packages", PytorchSession::install_system_packages)
        .step("prepare python runtime", PytorchSession::prepare_python_runtime)
        .step(
            "verify interpreter provenance",
            PytorchSession::verify_interpreter_provenance,
        )
        .step("install cuSPARSELt", PytorchSession::install_cusparselt)
        .step("prepare wheel cache", PytorchSession::prepare_wheel_cache)
        .step("fetch wheels", PytorchSession::fetch_wheels)
        .step("install wheels", PytorchSession::install_wheels)
        .step("verify runtime", PytorchSession::verify_runtime)
}

impl<'a> PytorchSession<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        options: PytorchOptions,
        profile: &'a PytorchProfile,
        context: &'a TargetContext,
        runner: &'a mut dyn CommandRunner,
        user_downloader: &'a mut dyn Downloader,
        system_downloader: &'a mut dyn Downloader,
        teardown: &'a mut Teardown,
        renderer: TerminalRenderer,
    ) -> Self {
        Self {
            options,
            profile,
            context,
            runner,
            user_downloader,
            system_downloader,
            teardown,
            renderer,
            temp_root: env::temp_dir(),
            interrupts: &SignalInterrupts,
            interpreter: None,
            wheel_paths: Vec::new(),
        }
    }

    fn layout(&self) -> TargetLayout {
        self.context.layout()
    }

    fn cache_dir(&self) -> PathBuf {
        self.layout().wheel_cache_dir(&self.profile.cache_dir_name)
    }

    fn venv_dir(&self) -> PathBuf {
        self.layout()
            .venv_dir(&self.profile.workspace_dir_name, &self.profile.venv_name)
    }

    fn system_interpreter(&self) -> PathBuf {
        Path::new("/usr/bin").join(self.profile.python_executable_name())
    }

    fn interpreter(&self) -> PathBuf {
        self.interpreter
            .clone()
            .unwrap_or_else(|| self.system_interpreter())
    }

    fn pip(&self) -> Invocation {
        Invocation::new(self.interpreter().display().to_string())
            .arg("-m")
            .arg("pip")
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
            .run_as(self.context.run_as())
    }

    fn pip_install(&self) -> Invocation {
        let install = self.pip().arg("install");
        if self.options.use_venv {
            install
        } else {
            install.arg("--user")
        }
    }

    pub(crate) fn validate_profile(&mut self) -> Result<()> {
        self.profile.validate()?;
        info!(
            "target user {} (uid {}), home {}",
            self.context.user,
            self.context.uid,
            self.context.home.display()
        );
        info!("wheel cache: {}", self.cache_dir().display());
        if self.options.use_venv {
            info!("virtual environment: {}", self.venv_dir().display());
        }
        Ok(())
    }

    pub(crate) fn install_system_packages(&mut self) -> Result<()> {
        apt_update(&mut *self.runner)?;
        apt_install(&mut *self.runner, &self.profile.system_packages, true)
    }

    pub(crate) fn prepare_python_runtime(&mut self) -> Result<()> {
        let python = self.profile.python_executable_name();
        apt_install(
            &mut *self.runner,
            &[
                python.clone(),
                format!("{python}-venv"),
                format!("{python}-dev"),
            ],
            false,
        )?;

        if !self.options.use_venv {
            self.interpreter = Some(self.system_interpreter());
            return Ok(());
        }

        let workspace = self
            .layout()
            .workspace_dir(&self.profile.workspace_dir_name);
        let venv = self.venv_dir();
        let venv_python = TargetLayout::venv_python(&venv);
        let run_as = self.context.run_as();
        ensure_user_dir(&mut *self.runner, &run_as, &workspace)?;
        if venv_python.exists() {
            info!("reusing virtual environment {}", venv.display());
        } else {
            let create = Invocation::new(self.system_interpreter().display().to_string())
                .arg("-m")
                .arg("venv")
                .path_arg(&venv)
                .run_as(run_as);
            self.runner.run(&create)?;
        }
        self.interpreter = Some(venv_python);
        let upgrade = self.pip().arg("install").arg("--upgrade").arg("pip");
        self.runner.run(&upgrade)
    }

    pub(crate) fn verify_interpreter_provenance(&mut self) -> Result<()> {
        let expected = if self.options.use_venv {
            InterpreterIdentity::venv(&self.venv_dir())
        } else {
            InterpreterIdentity::system(&self.profile.python_version)
        };
        let interpreter = self.interpreter();
        let reported = verify_interpreter_provenance(
            &mut *self.runner,
            &interpreter,
            &self.context.run_as(),
            &expected,
        )?;
        self.renderer.print_status(
            "ok",
            &format!(
                "interpreter {} (prefix {})",
                reported.executable.display(),
                reported.prefix.display()
            ),
        );
        Ok(())
    }

    pub(crate) fn install_cusparselt(&mut self) -> Result<()> {
        let packages = &self.profile.cusparselt.packages;
        let mut all_installed = true;
        for package in packages {
            if !dpkg_is_installed(&mut *self.runner, self.interrupts, package)? {
                all_installed = false;
                break;
            }
        }
        if all_installed {
            self.renderer
                .print_status("skip", "cuSPARSELt already installed");
            return Ok(());
        }

        let dir = self
            .teardown
            .create_temp_dir(&self.temp_root, "jetprov-cusparselt")?;
        let keyring = dir.join("cuda-keyring.deb");
        let status = ensure_cached(
            &keyring,
            &self.profile.cusparselt.keyring_url,
            &mut *self.system_downloader,
        )?;
        info!("cuda keyring: {}", status.as_str());
        dpkg_install(&mut *self.runner, &keyring)?;
        apt_update(&mut *self.runner)?;
        apt_install(&mut *self.runner, packages, false)
    }

    pub(crate) fn prepare_wheel_cache(&mut self) -> Result<()> {
        let cache_dir = self.cache_dir();
        if self.options.clean_cache && cache_dir.is_dir() {
            let removed = remove_cached_wheels(&cache_dir)?;
            info!("removed {removed} cached wheel(s) from {}", cache_dir.display());
        }
        let run_as = self.context.run_as();
        ensure_user_dir(&mut *self.runner, &run_as, &cache_dir)
    }

    pub(crate) fn fetch_wheels(&mut self) -> Result<()> {
        let layout = self.layout();
        self.wheel_paths.clear();
        for wheel in &self.profile.wheels {
            check_interrupted(self.interrupts)?;
            let file_name = wheel.cache_file_name()?;
            let path = layout.wheel_cache_path(&self.profile.cache_dir_name, &file_name);
            let status = ensure_cached_verified(
                &path,
                &wheel.url,
                wheel.sha256.as_deref(),
                &mut *self.user_downloader,
            )
            .with_context(|| format!("failed to fetch wheel '{}'", wheel.name))?;
            self.renderer
                .print_status("ok", &format!("{file_name}: {}", status.as_str()));
            self.wheel_paths.push(path);
        }
        Ok(())
    }

    pub(crate) fn install_wheels(&mut self) -> Result<()> {
        if self.wheel_paths.is_empty() {
            return Err(anyhow!("no wheels were fetched"));
        }
        let names = self
            .profile
            .wheels
            .iter()
            .map(|wheel| wheel.name.clone())
            .collect::<Vec<_>>();
        let uninstall = self.pip().arg("uninstall").arg("-y").args(names);
        run_tolerated(&mut *self.runner, &uninstall, self.interrupts)?;

        if !self.profile.auxiliary_packages.is_empty() {
            let install = self
                .pip_install()
                .args(self.profile.auxiliary_packages.iter().cloned());
            self.runner.run(&install)?;
        }

        let mut install = self
            .pip_install()
            .arg("--force-reinstall")
            .arg("--no-deps");
        for path in &self.wheel_paths {
            install = install.path_arg(path);
        }
        self.runner.run(&install)
    }

    pub(crate) fn verify_runtime(&mut self) -> Result<()> {
        let probe = Invocation::new(self.interpreter().display().to_string())
            .arg("-c")
            .arg(RUNTIME_PROBE_SCRIPT)
            .current_dir(&self.context.home)
            .run_as(self.context.run_as());
        let output = self.runner.capture(&probe)?;
        let report = RuntimeProbeReport::from_probe_output(&output)?;
        let evaluation = evaluate_runtime_probe(&report, self.profile.numpy_major_limit)?;
        self.renderer.print_lines(&evaluation.lines);
        for warning in &evaluation.warnings {
            warn!("{warning}");
        }
        Ok(())
    }
}

/// Removes `*.whl` files directly inside `dir`; anything else is left alone.
pub(crate) fn remove_cached_wheels(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        let path = entry.path();
        let is_wheel = path.extension().is_some_and(|ext| ext == "whl");
        if is_wheel && entry.file_type().is_ok_and(|kind| kind.is_file()) {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}
