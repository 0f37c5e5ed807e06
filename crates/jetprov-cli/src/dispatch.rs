use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use jetprov_core::{
    parse_font_spec, parse_revision, ProvisionError, ProvisionProfile, PytorchProfile, Revision,
    SnapProfile, TerminalFontProfile, VscodeProfile,
};
use jetprov_installer::{
    execute_plan, install_interrupt_handlers, parse_download_backend_preference,
    require_commands, resolve_target_context, DesktopSettingsStore, DownloadBackendPreference,
    Downloader, ExternalDownloader, HttpDownloader, PrivilegeRequirement, RunAs, RunReport,
    RunState, SignalInterrupts, SystemIdentity, SystemRunner, Teardown, DOWNLOAD_BACKEND_ENV,
};
use tracing::{info, warn};

use crate::completion::write_completions_script;
use crate::font_flow::{font_plan, FontSession, TerminalFontOptions};
use crate::pytorch_flow::{pytorch_plan, PytorchOptions, PytorchSession};
use crate::render::{format_step_summary, TerminalRenderer};
use crate::snap_flow::{snap_plan, SnapRevertOptions, SnapSession};
use crate::vscode_flow::{vscode_plan, VscodeOptions, VscodeSession};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            write_completions_script(shell, &mut handle)
        }
        Commands::Pytorch { venv, clean_cache } => {
            let profile = ProvisionProfile::load(cli.config.as_deref())?;
            run_pytorch_command(
                &profile.pytorch,
                PytorchOptions {
                    use_venv: venv,
                    clean_cache,
                },
            )
        }
        Commands::Vscode { reinstall } => {
            let profile = ProvisionProfile::load(cli.config.as_deref())?;
            run_vscode_command(&profile.vscode, VscodeOptions { reinstall })
        }
        Commands::SnapRevert {
            positional_revision,
            revision,
            snap,
            download_dir,
        } => {
            let profile = ProvisionProfile::load(cli.config.as_deref())?;
            run_snap_revert_command(
                &profile.snap,
                positional_revision.or(revision),
                snap,
                download_dir,
            )
        }
        Commands::TerminalFont { font } => {
            let profile = ProvisionProfile::load(cli.config.as_deref())?;
            run_terminal_font_command(&profile.terminal_font, font)
        }
    }
}

fn run_pytorch_command(profile: &PytorchProfile, options: PytorchOptions) -> Result<()> {
    let context = resolve_target_context(PrivilegeRequirement::Root, &SystemIdentity)?;
    let backend = selected_download_backend()?;
    require_commands(&with_backend_commands(
        &["apt-get", "dpkg", "dpkg-query", "sudo"],
        backend,
    ))?;
    install_interrupt_handlers()?;

    let renderer = TerminalRenderer::current();
    renderer.print_section("pytorch");
    let mut runner = SystemRunner;
    let mut user_downloader = build_downloader(
        backend,
        renderer,
        context.run_as(),
        Some((context.uid, context.gid)),
    )?;
    let mut system_downloader = build_downloader(backend, renderer, RunAs::Current, None)?;
    let mut teardown = Teardown::new();

    let report = {
        let mut session = PytorchSession::new(
            options,
            profile,
            &context,
            &mut runner,
            &mut *user_downloader,
            &mut *system_downloader,
            &mut teardown,
            renderer,
        );
        execute_plan(pytorch_plan(), &mut session, &SignalInterrupts)
    };
    run_teardown(&mut teardown);
    finish_runbook(report, renderer)
}

fn run_vscode_command(profile: &VscodeProfile, options: VscodeOptions) -> Result<()> {
    let context = resolve_target_context(PrivilegeRequirement::Root, &SystemIdentity)?;
    let backend = selected_download_backend()?;
    require_commands(&with_backend_commands(
        &["apt-get", "dpkg-query", "sudo"],
        backend,
    ))?;
    install_interrupt_handlers()?;

    let renderer = TerminalRenderer::current();
    renderer.print_section("vscode");
    let mut runner = SystemRunner;
    let mut downloader = build_downloader(backend, renderer, RunAs::Current, None)?;
    let mut teardown = Teardown::new();

    let report = {
        let mut session = VscodeSession::new(
            options,
            profile,
            &context,
            &mut runner,
            &mut *downloader,
            &mut teardown,
            renderer,
        );
        execute_plan(vscode_plan(), &mut session, &SignalInterrupts)
    };
    run_teardown(&mut teardown);
    finish_runbook(report, renderer)
}

fn run_snap_revert_command(
    profile: &SnapProfile,
    revision: Option<Revision>,
    snap: Option<String>,
    download_dir: Option<PathBuf>,
) -> Result<()> {
    let options = snap_revert_options(profile, revision, snap, download_dir)?;
    let context = resolve_target_context(PrivilegeRequirement::Root, &SystemIdentity)?;
    require_commands(&["snap"])?;
    install_interrupt_handlers()?;

    let renderer = TerminalRenderer::current();
    renderer.print_section("snap-revert");
    info!(
        "pinning {} to revision {} on behalf of {}",
        options.snap, options.revision, context.user
    );
    let mut runner = SystemRunner;
    let mut teardown = Teardown::new();

    let report = {
        let mut session = SnapSession {
            options,
            runner: &mut runner,
            teardown: &mut teardown,
            renderer,
        };
        execute_plan(snap_plan(), &mut session, &SignalInterrupts)
    };
    run_teardown(&mut teardown);
    finish_runbook(report, renderer)
}

pub(crate) fn snap_revert_options(
    profile: &SnapProfile,
    revision: Option<Revision>,
    snap: Option<String>,
    download_dir: Option<PathBuf>,
) -> Result<SnapRevertOptions> {
    let revision = match revision {
        Some(revision) => revision,
        None => parse_revision(&profile.default_revision)
            .map_err(|err| anyhow!("invalid default snap revision: {err}"))?,
    };
    let snap = match snap {
        Some(name) if name.trim().is_empty() => {
            return Err(ProvisionError::Usage("--snap must not be empty".to_string()).into())
        }
        Some(name) => name,
        None => profile.snap_name.clone(),
    };
    let download_dir = match download_dir {
        Some(dir) => dir,
        None => env::current_dir().context("failed to read the current directory")?,
    };
    if !download_dir.is_dir() {
        return Err(ProvisionError::Precondition(format!(
            "download directory does not exist: {}",
            download_dir.display()
        ))
        .into());
    }
    Ok(SnapRevertOptions {
        snap,
        revision,
        download_dir,
    })
}

fn run_terminal_font_command(profile: &TerminalFontProfile, font: Option<String>) -> Result<()> {
    let context = resolve_target_context(PrivilegeRequirement::NonRoot, &SystemIdentity)?;
    require_commands(&["gsettings", "dconf"])?;
    let font = match font {
        Some(font) => font,
        None => parse_font_spec(&profile.default_font)
            .map_err(|err| anyhow!("invalid default terminal font: {err}"))?,
    };
    install_interrupt_handlers()?;

    let renderer = TerminalRenderer::current();
    renderer.print_section("terminal-font");
    let mut store = DesktopSettingsStore::new(SystemRunner, context.run_as());
    let mut session = FontSession::new(TerminalFontOptions { font }, profile, &mut store, renderer);
    let report = execute_plan(font_plan(), &mut session, &SignalInterrupts);
    finish_runbook(report, renderer)
}

fn selected_download_backend() -> Result<DownloadBackendPreference> {
    let value = env::var(DOWNLOAD_BACKEND_ENV).ok();
    parse_download_backend_preference(value.as_deref(), DOWNLOAD_BACKEND_ENV)
}

pub(crate) fn with_backend_commands(
    commands: &[&'static str],
    backend: DownloadBackendPreference,
) -> Vec<&'static str> {
    let mut required = commands.to_vec();
    if backend == DownloadBackendPreference::External {
        required.push("wget");
    }
    required
}

fn build_downloader(
    backend: DownloadBackendPreference,
    renderer: TerminalRenderer,
    run_as: RunAs,
    owner: Option<(u32, u32)>,
) -> Result<Box<dyn Downloader>> {
    match backend {
        DownloadBackendPreference::External => {
            Ok(Box::new(ExternalDownloader::new(SystemRunner, run_as)))
        }
        DownloadBackendPreference::InProcess => {
            let mut progress = renderer.download_progress();
            let downloader =
                HttpDownloader::new(move |downloaded, total| progress.update(downloaded, total))?;
            Ok(match owner {
                Some((uid, gid)) => Box::new(downloader.with_owner(uid, gid)),
                None => Box::new(downloader),
            })
        }
    }
}

fn run_teardown(teardown: &mut Teardown) {
    for warning in teardown.run() {
        warn!("{warning}");
    }
}

fn finish_runbook(report: RunReport, renderer: TerminalRenderer) -> Result<()> {
    if report.state != RunState::Completed {
        renderer.print_lines(&format_step_summary(renderer.style(), &report.records));
    }
    report.into_result()
}
