use super::*;
use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use clap::error::ErrorKind;
use jetprov_core::{
    exit_code_for, Interruption, PytorchProfile, SnapProfile,
    TerminalFontProfile, VscodeProfile, WheelArtifact, EXIT_INTERRUPT, EXIT_RUNTIME,
};
use jetprov_installer::{
    execute_plan, CommandRunner, DownloadBackendPreference, Downloader, InterruptSource,
    Invocation, RunAs, RunState, SettingKey, SettingValue, SettingsStore, StepRecord, StepState,
    TargetContext, Teardown,
};

use crate::completion::write_completions_script;
use crate::dispatch::{snap_revert_options, with_backend_commands};
use crate::font_flow::{font_plan, FontSession, TerminalFontOptions};
use crate::pytorch_flow::{pytorch_plan, remove_cached_wheels, PytorchOptions, PytorchSession};
use crate::render::{
    format_step_summary, render_status_line, resolve_output_style, OutputStyle, TerminalRenderer,
};
use crate::snap_flow::{installed_revision, snap_plan, SnapRevertOptions, SnapSession};
use crate::vscode_flow::{vscode_plan, VscodeOptions, VscodeSession};

static TEST_LAYOUT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn build_test_layout_path(nanos: u128) -> PathBuf {
    let mut path = std::env::temp_dir();
    let sequence = TEST_LAYOUT_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.push(format!(
        "jetprov-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    path
}

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let root = build_test_layout_path(nanos);
    fs::create_dir_all(&root).expect("must create test root");
    root
}

fn quiet() -> TerminalRenderer {
    TerminalRenderer::from_style(OutputStyle::Plain)
}

#[derive(Default)]
struct RecordingRunner {
    invocations: Vec<Invocation>,
    outputs: Vec<(String, String)>,
    failing: Vec<String>,
    creates: Vec<(String, PathBuf)>,
    killed_by: Vec<(String, SharedInterrupts)>,
}

impl RecordingRunner {
    fn with_output(mut self, key: &str, output: &str) -> Self {
        self.outputs.push((key.to_string(), output.to_string()));
        self
    }

    fn failing(mut self, key: &str) -> Self {
        self.failing.push(key.to_string());
        self
    }

    /// Simulates a command that writes `path` when its line contains `key`.
    fn creating(mut self, key: &str, path: &Path) -> Self {
        self.creates.push((key.to_string(), path.to_path_buf()));
        self
    }

    /// Simulates Ctrl-C landing while a matching command runs: the signal is
    /// recorded and the child fails.
    fn interrupted_by(mut self, key: &str, signals: &SharedInterrupts) -> Self {
        self.killed_by.push((key.to_string(), signals.clone()));
        self
    }

    fn command_lines(&self) -> Vec<String> {
        self.invocations.iter().map(Invocation::command_line).collect()
    }

    fn ran(&self, fragment: &str) -> bool {
        self.command_lines()
            .iter()
            .any(|line| line.contains(fragment))
    }

    fn record(&mut self, invocation: &Invocation) -> Result<String> {
        self.invocations.push(invocation.clone());
        let line = invocation.command_line();
        if self.failing.iter().any(|key| line.contains(key.as_str())) {
            return Err(anyhow!("command failed: {line}: status=exit status: 1"));
        }
        for (key, signals) in &self.killed_by {
            if line.contains(key.as_str()) {
                signals.0.set(Some(Interruption::Interrupt));
                return Err(anyhow!("command failed: {line}: status=signal: 2 (SIGINT)"));
            }
        }
        for (key, path) in &self.creates {
            if line.contains(key.as_str()) {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, b"payload")?;
            }
        }
        Ok(self
            .outputs
            .iter()
            .find(|(key, _)| line.contains(key.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<()> {
        self.record(invocation).map(|_| ())
    }

    fn capture(&mut self, invocation: &Invocation) -> Result<String> {
        self.record(invocation)
    }
}

#[derive(Default)]
struct FakeDownloader {
    calls: Vec<(String, PathBuf)>,
}

impl Downloader for FakeDownloader {
    fn download(&mut self, url: &str, destination: &Path) -> Result<()> {
        self.calls.push((url.to_string(), destination.to_path_buf()));
        fs::write(destination, format!("payload from {url}"))?;
        Ok(())
    }
}

#[derive(Default)]
struct MemorySettingsStore {
    schemas: Vec<String>,
    values: HashMap<SettingKey, SettingValue>,
    writes: Vec<SettingKey>,
}

impl SettingsStore for MemorySettingsStore {
    fn has_schema(&mut self, schema: &str) -> Result<bool> {
        Ok(self.schemas.iter().any(|known| known == schema))
    }

    fn get(&mut self, key: &SettingKey) -> Result<Option<SettingValue>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &SettingKey, value: &SettingValue) -> Result<()> {
        self.values.insert(key.clone(), value.clone());
        self.writes.push(key.clone());
        Ok(())
    }
}

#[derive(Default)]
struct NoInterrupts;

impl InterruptSource for NoInterrupts {
    fn pending(&self) -> Option<Interruption> {
        None
    }
}

/// Signal state shared between a runner and the step loop.
#[derive(Clone, Default)]
struct SharedInterrupts(Rc<Cell<Option<Interruption>>>);

impl InterruptSource for SharedInterrupts {
    fn pending(&self) -> Option<Interruption> {
        self.0.get()
    }
}

/// Reports SIGINT from the `after`-th check onwards.
struct InterruptAfter {
    checks: Cell<usize>,
    after: usize,
}

impl InterruptSource for InterruptAfter {
    fn pending(&self) -> Option<Interruption> {
        let checks = self.checks.get() + 1;
        self.checks.set(checks);
        (checks >= self.after).then_some(Interruption::Interrupt)
    }
}

fn states(records: &[StepRecord]) -> Vec<StepState> {
    records.iter().map(|record| record.state).collect()
}

fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("jetprov").chain(args.iter().copied()))
}

#[test]
fn parse_pytorch_flags() {
    let cli = parse(&["pytorch", "--venv", "--clean-cache"]).expect("must parse");
    match cli.command {
        Commands::Pytorch { venv, clean_cache } => {
            assert!(venv);
            assert!(clean_cache);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_pytorch_defaults_to_system_interpreter() {
    let cli = parse(&["pytorch"]).expect("must parse");
    assert!(matches!(
        cli.command,
        Commands::Pytorch {
            venv: false,
            clean_cache: false
        }
    ));
    assert!(cli.config.is_none());
}

#[test]
fn parse_global_config_after_subcommand() {
    let cli = parse(&["vscode", "--reinstall", "--config", "/etc/jetprov.toml"])
        .expect("must parse");
    assert_eq!(cli.config, Some(PathBuf::from("/etc/jetprov.toml")));
    assert!(matches!(cli.command, Commands::Vscode { reinstall: true }));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let err = parse(&["pytorch", "--bogus"]).expect_err("unknown flag must fail");
    assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    assert!(err.use_stderr());
}

#[test]
fn excess_positional_is_a_usage_error() {
    let err = parse(&["vscode", "extra"]).expect_err("excess positional must fail");
    assert_eq!(err.kind(), ErrorKind::UnknownArgument);
}

#[test]
fn help_is_not_an_error_exit() {
    let err = parse(&["snap-revert", "--help"]).expect_err("help short-circuits parsing");
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    assert!(!err.use_stderr());
}

#[test]
fn parse_snap_revert_positional_revision() {
    let cli = parse(&[
        "snap-revert",
        "24724",
        "--snap",
        "core22",
        "--download-dir",
        "/var/tmp",
    ])
    .expect("must parse");
    match cli.command {
        Commands::SnapRevert {
            positional_revision,
            revision,
            snap,
            download_dir,
        } => {
            assert_eq!(
                positional_revision.as_ref().map(|value| value.as_str()),
                Some("24724")
            );
            assert!(revision.is_none());
            assert_eq!(snap.as_deref(), Some("core22"));
            assert_eq!(download_dir, Some(PathBuf::from("/var/tmp")));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_snap_revert_revision_flag() {
    let cli = parse(&["snap-revert", "--revision", "23545"]).expect("must parse");
    assert!(matches!(
        cli.command,
        Commands::SnapRevert { revision: Some(ref value), .. } if value.as_str() == "23545"
    ));
}

#[test]
fn non_numeric_revision_is_a_usage_error() {
    let err = parse(&["snap-revert", "abc"]).expect_err("non-numeric revision must fail");
    assert_eq!(err.kind(), ErrorKind::ValueValidation);
    assert!(err.use_stderr());

    let err = parse(&["snap-revert", "--revision", "-5"]).expect_err("negative must fail");
    assert!(err.use_stderr());
}

#[test]
fn revision_flag_without_value_is_a_usage_error() {
    let err = parse(&["snap-revert", "--revision"]).expect_err("missing value must fail");
    assert!(err.use_stderr());
    assert_ne!(err.kind(), ErrorKind::DisplayHelp);
}

#[test]
fn positional_and_flag_revision_conflict() {
    let err = parse(&["snap-revert", "24724", "--revision", "24725"])
        .expect_err("both revisions must fail");
    assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
}

#[test]
fn empty_snap_name_is_a_usage_error() {
    let err = parse(&["snap-revert", "--snap", ""]).expect_err("empty snap name must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidValue);
    assert!(err.use_stderr());
}

#[test]
fn font_without_size_is_a_usage_error() {
    let err = parse(&["terminal-font", "--font", "Monospace"]).expect_err("size is required");
    assert_eq!(err.kind(), ErrorKind::ValueValidation);

    let cli = parse(&["terminal-font", "--font", "Ubuntu Mono 13"]).expect("must parse");
    assert!(matches!(
        cli.command,
        Commands::TerminalFont { font: Some(ref font) } if font == "Ubuntu Mono 13"
    ));
}

#[test]
fn completions_script_names_the_binary() {
    let cli = parse(&["completions", "bash"]).expect("must parse");
    let Commands::Completions { shell } = cli.command else {
        panic!("expected completions command");
    };
    let mut output = Vec::new();
    write_completions_script(shell, &mut output).expect("must render completions");
    let script = String::from_utf8(output).expect("completion script must be utf-8");
    assert!(script.contains("jetprov"));
    assert!(script.contains("snap-revert"));
}

#[test]
fn output_style_follows_stdout_terminal() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "terminal font set to Monospace 12"),
        "terminal font set to Monospace 12"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "installed revision 24724"),
        "[OK] installed revision 24724"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "CUDAExecutionProvider missing"),
        "[WARN] CUDAExecutionProvider missing"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "skip", "already downloaded"),
        "[..] already downloaded"
    );
}

#[test]
fn step_summary_marks_failed_and_unrun_steps() {
    let records = vec![
        StepRecord {
            name: "fetch package",
            state: StepState::Succeeded,
        },
        StepRecord {
            name: "install package",
            state: StepState::Failed,
        },
        StepRecord {
            name: "verify editor",
            state: StepState::Pending,
        },
    ];
    assert_eq!(
        format_step_summary(OutputStyle::Rich, &records),
        vec![
            "[OK] fetch package: done",
            "[ERR] install package: failed",
            "[..] verify editor: not run",
        ]
    );
}

#[test]
fn wget_is_required_only_for_external_backend() {
    assert_eq!(
        with_backend_commands(&["apt-get"], DownloadBackendPreference::External),
        vec!["apt-get", "wget"]
    );
    assert_eq!(
        with_backend_commands(&["apt-get"], DownloadBackendPreference::InProcess),
        vec!["apt-get"]
    );
}

#[test]
fn snap_revert_options_fall_back_to_profile_defaults() {
    let root = test_root();
    let options = snap_revert_options(&SnapProfile::default(), None, None, Some(root.clone()))
        .expect("options must resolve");
    assert_eq!(options.snap, "snapd");
    assert_eq!(options.revision.as_str(), "24724");
    assert_eq!(options.snap_path(), root.join("snapd_24724.snap"));
    assert_eq!(options.assert_path(), root.join("snapd_24724.assert"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn snap_revert_options_reject_bad_input() {
    let root = test_root();
    let err = snap_revert_options(
        &SnapProfile::default(),
        None,
        Some(" ".to_string()),
        Some(root.clone()),
    )
    .expect_err("empty snap name must fail");
    assert_eq!(exit_code_for(&err), 2);

    let err = snap_revert_options(
        &SnapProfile::default(),
        None,
        None,
        Some(root.join("missing")),
    )
    .expect_err("missing download dir must fail");
    assert_eq!(exit_code_for(&err), EXIT_RUNTIME);
    assert!(err.to_string().contains("download directory does not exist"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn installed_revision_reads_rev_column() {
    let output = "Name   Version   Rev    Tracking       Publisher   Notes\nsnapd  2.63      21759  latest/stable  canonical✓  snapd\n";
    assert_eq!(
        installed_revision(output, "snapd").as_deref(),
        Some("21759")
    );
    assert_eq!(installed_revision(output, "core22"), None);
    assert_eq!(installed_revision("", "snapd"), None);
}

fn snap_options(dir: &Path) -> SnapRevertOptions {
    snap_revert_options(&SnapProfile::default(), None, None, Some(dir.to_path_buf()))
        .expect("options must resolve")
}

#[test]
fn snap_flow_keeps_pre_existing_downloads() {
    let root = test_root();
    let options = snap_options(&root);
    fs::write(options.snap_path(), b"previous snap").expect("must seed snap");
    fs::write(options.assert_path(), b"previous assert").expect("must seed assert");
    let mut runner = RecordingRunner::default();
    let mut teardown = Teardown::new();

    let report = {
        let mut session = SnapSession {
            options: options.clone(),
            runner: &mut runner,
            teardown: &mut teardown,
            renderer: quiet(),
        };
        execute_plan(snap_plan(), &mut session, &NoInterrupts)
    };
    teardown.run();

    assert_eq!(report.state, RunState::Completed);
    assert!(!runner.ran("snap download"));
    assert!(runner.ran("snap ack"));
    assert!(runner.ran("snap refresh --hold snapd"));
    assert_eq!(
        fs::read(options.snap_path()).expect("snap must survive"),
        b"previous snap"
    );
    assert_eq!(
        fs::read(options.assert_path()).expect("assert must survive"),
        b"previous assert"
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn snap_flow_downloads_then_removes_files_it_created() {
    let root = test_root();
    let options = snap_options(&root);
    let mut runner = RecordingRunner::default()
        .with_output("snap list", "Name  Version  Rev    Tracking\nsnapd 2.63     21759  latest/stable\n")
        .creating("snap download", &options.snap_path())
        .creating("snap download", &options.assert_path());
    let mut teardown = Teardown::new();

    let report = {
        let mut session = SnapSession {
            options: options.clone(),
            runner: &mut runner,
            teardown: &mut teardown,
            renderer: quiet(),
        };
        execute_plan(snap_plan(), &mut session, &NoInterrupts)
    };
    assert!(teardown.run().is_empty());

    assert_eq!(report.state, RunState::Completed);
    let lines = runner.command_lines();
    assert_eq!(lines[0], "snap list snapd");
    assert_eq!(
        lines[1],
        format!(
            "snap download snapd --revision=24724 --basename=snapd_24724 --target-directory={}",
            root.display()
        )
    );
    assert_eq!(lines[2], format!("snap ack {}", options.assert_path().display()));
    assert_eq!(
        lines[3],
        format!("snap install {}", options.snap_path().display())
    );
    assert_eq!(lines[4], "snap refresh --hold snapd");
    assert!(!options.snap_path().exists());
    assert!(!options.assert_path().exists());
    let _ = fs::remove_dir_all(root);
}

#[test]
fn snap_flow_fails_when_download_leaves_no_files() {
    let root = test_root();
    let options = snap_options(&root);
    let mut runner = RecordingRunner::default();
    let mut teardown = Teardown::new();

    let report = {
        let mut session = SnapSession {
            options,
            runner: &mut runner,
            teardown: &mut teardown,
            renderer: quiet(),
        };
        execute_plan(snap_plan(), &mut session, &NoInterrupts)
    };

    assert_eq!(
        report.state,
        RunState::Aborted {
            step: "fetch revision"
        }
    );
    assert!(!runner.ran("snap install"));
    let err = report.into_result().expect_err("run must fail");
    assert!(format!("{err:#}").contains("snap download produced empty or missing file"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn interrupted_snap_flow_cleans_up_and_exits_130() {
    let root = test_root();
    let options = snap_options(&root);
    let mut runner = RecordingRunner::default()
        .creating("snap download", &options.snap_path())
        .creating("snap download", &options.assert_path());
    let mut teardown = Teardown::new();
    let interrupts = InterruptAfter {
        checks: Cell::new(0),
        after: 3,
    };

    let report = {
        let mut session = SnapSession {
            options: options.clone(),
            runner: &mut runner,
            teardown: &mut teardown,
            renderer: quiet(),
        };
        execute_plan(snap_plan(), &mut session, &interrupts)
    };
    drop(teardown);

    assert_eq!(
        report.state,
        RunState::Interrupted {
            signal: Interruption::Interrupt,
            step: Some("acknowledge assertion"),
        }
    );
    assert!(!runner.ran("snap ack"));
    assert!(!options.snap_path().exists());
    assert!(!options.assert_path().exists());
    let err = report.into_result().expect_err("interrupted run must fail");
    assert_eq!(exit_code_for(&err), EXIT_INTERRUPT);
    let _ = fs::remove_dir_all(root);
}

const PROFILES_SCHEMA: &str = "org.gnome.Terminal.ProfilesList";

fn font_store(default: Option<&str>, list: &[&str]) -> MemorySettingsStore {
    let mut store = MemorySettingsStore {
        schemas: vec![PROFILES_SCHEMA.to_string()],
        ..MemorySettingsStore::default()
    };
    if let Some(default) = default {
        store.values.insert(
            SettingKey::schema(PROFILES_SCHEMA, "default"),
            SettingValue::Str(default.to_string()),
        );
    }
    store.values.insert(
        SettingKey::schema(PROFILES_SCHEMA, "list"),
        SettingValue::StrList(list.iter().map(|id| id.to_string()).collect()),
    );
    store
}

fn run_font(store: &mut MemorySettingsStore, font: &str) -> jetprov_installer::RunReport {
    let profile = TerminalFontProfile::default();
    let mut session = FontSession::new(
        TerminalFontOptions {
            font: font.to_string(),
        },
        &profile,
        store,
        quiet(),
    );
    let report = execute_plan(font_plan(), &mut session, &NoInterrupts);
    report
}

#[test]
fn terminal_font_is_idempotent() {
    let mut store = font_store(Some("b1dcc9dd"), &["b1dcc9dd"]);

    let first = run_font(&mut store, "Monospace 12");
    assert_eq!(first.state, RunState::Completed);
    assert_eq!(store.writes.len(), 2);
    let font_key = SettingKey::path("/org/gnome/terminal/legacy/profiles:/:b1dcc9dd/font");
    assert_eq!(
        store.values.get(&font_key),
        Some(&SettingValue::Str("Monospace 12".to_string()))
    );
    assert_eq!(
        store.values.get(&SettingKey::path(
            "/org/gnome/terminal/legacy/profiles:/:b1dcc9dd/use-system-font"
        )),
        Some(&SettingValue::Bool(false))
    );

    let second = run_font(&mut store, "Monospace 12");
    assert_eq!(second.state, RunState::Completed);
    assert_eq!(store.writes.len(), 2, "second run must not write");
    assert_eq!(
        store.values.get(&font_key),
        Some(&SettingValue::Str("Monospace 12".to_string()))
    );
}

#[test]
fn terminal_font_persists_first_listed_profile_as_default() {
    let mut store = font_store(None, &["first-id", "second-id"]);

    let report = run_font(&mut store, "Ubuntu Mono 13");

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(
        store.values.get(&SettingKey::schema(PROFILES_SCHEMA, "default")),
        Some(&SettingValue::Str("first-id".to_string()))
    );
    assert!(store.values.contains_key(&SettingKey::path(
        "/org/gnome/terminal/legacy/profiles:/:first-id/font"
    )));
}

#[test]
fn terminal_font_fails_without_profiles() {
    let mut store = font_store(Some(""), &[]);
    let report = run_font(&mut store, "Monospace 12");
    assert_eq!(
        report.state,
        RunState::Aborted {
            step: "resolve default profile"
        }
    );
    assert!(store.writes.is_empty());
}

#[test]
fn terminal_font_requires_schema() {
    let mut store = MemorySettingsStore::default();
    let report = run_font(&mut store, "Monospace 12");
    assert_eq!(
        report.state,
        RunState::Aborted {
            step: "check settings schema"
        }
    );
    assert_eq!(
        states(&report.records)[1..],
        [StepState::Pending, StepState::Pending, StepState::Pending]
    );
}

fn target_context(home: &Path) -> TargetContext {
    TargetContext {
        user: "alice".to_string(),
        uid: 1000,
        gid: 1000,
        home: home.to_path_buf(),
        privileged: true,
    }
}

fn test_pytorch_profile() -> PytorchProfile {
    PytorchProfile {
        wheels: vec![
            WheelArtifact {
                name: "torch".to_string(),
                url: "https://example.test/jp6/torch-2.4.0a0+07cecf4168.nv24.05-cp310-cp310-linux_aarch64.whl".to_string(),
                sha256: None,
                file_name: None,
            },
            WheelArtifact {
                name: "torchvision".to_string(),
                url: "https://example.test/jp6/torchvision-0.19.0a0-cp310-cp310-linux_aarch64.whl".to_string(),
                sha256: None,
                file_name: None,
            },
        ],
        ..PytorchProfile::default()
    }
}

const PROBE_REPORT: &str = r#"{"torch_version":"2.4.0a0+07cecf4168.nv24.05","cuda_available":true,"cuda_version":"12.2","cudnn_version":8904,"device_name":"Orin","compute_capability":[8,7],"torchvision_version":"0.19.0a0+48b1edf","onnxruntime_version":"1.18.0","onnxruntime_providers":["CUDAExecutionProvider","CPUExecutionProvider"],"numpy_version":"1.26.4"}"#;

fn pytorch_runner() -> RecordingRunner {
    RecordingRunner::default()
        .with_output("dpkg-query", "install ok installed")
        .with_output("sys.base_prefix", "/usr/bin/python3.10\n/usr\n/usr\n")
        .with_output("import json", PROBE_REPORT)
}

#[test]
fn pytorch_flow_installs_into_user_site_packages() {
    let home = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let cache_dir = home.join(".cache").join("jetson-wheels");
    fs::create_dir_all(&cache_dir).expect("must create cache dir");
    let cached_torch = cache_dir
        .join("torch-2.4.0a0+07cecf4168.nv24.05-cp310-cp310-linux_aarch64.whl");
    fs::write(&cached_torch, b"cached torch wheel").expect("must seed cached wheel");

    let mut runner = pytorch_runner();
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();
    let report = {
        let mut session = PytorchSession::new(
            PytorchOptions::default(),
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        execute_plan(pytorch_plan(), &mut session, &NoInterrupts)
    };
    assert!(teardown.run().is_empty());

    assert_eq!(report.state, RunState::Completed, "{:?}", report.error());
    assert_eq!(user_downloader.calls.len(), 1);
    assert!(user_downloader.calls[0].0.contains("torchvision"));
    assert!(system_downloader.calls.is_empty(), "cuSPARSELt was installed");
    assert_eq!(
        fs::read(&cached_torch).expect("cached wheel must survive"),
        b"cached torch wheel"
    );

    let pip_installs = runner
        .invocations
        .iter()
        .filter(|invocation| {
            invocation.args.first().map(String::as_str) == Some("-m")
                && invocation.args.get(2).map(String::as_str) == Some("install")
        })
        .collect::<Vec<_>>();
    assert_eq!(pip_installs.len(), 2);
    for invocation in &pip_installs {
        assert_eq!(invocation.program, "/usr/bin/python3.10");
        assert_eq!(invocation.run_as, RunAs::User("alice".to_string()));
        assert!(invocation.args.contains(&"--user".to_string()));
    }
    assert!(pip_installs[1].args.contains(&"--force-reinstall".to_string()));
    assert!(pip_installs[1]
        .args
        .contains(&cached_torch.display().to_string()));
    assert!(runner.ran("apt-get install -y --no-install-recommends python3-pip"));
    let _ = fs::remove_dir_all(home);
}

#[test]
fn pytorch_flow_tolerates_failed_uninstall() {
    let home = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let mut runner = pytorch_runner().failing("uninstall");
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();

    let report = {
        let mut session = PytorchSession::new(
            PytorchOptions::default(),
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        execute_plan(pytorch_plan(), &mut session, &NoInterrupts)
    };

    assert_eq!(report.state, RunState::Completed, "{:?}", report.error());
    assert_eq!(user_downloader.calls.len(), 2);
    let _ = fs::remove_dir_all(home);
}

#[test]
fn pytorch_flow_rejects_interpreter_outside_venv() {
    let home = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let venv = home.join("workspace").join("torch-venv");
    fs::create_dir_all(venv.join("bin")).expect("must create venv");
    fs::write(venv.join("bin").join("python"), b"").expect("must create venv python");
    let mut runner = RecordingRunner::default()
        .with_output("sys.base_prefix", "/usr/bin/python3.10\n/usr\n/usr\n");
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();

    let report = {
        let mut session = PytorchSession::new(
            PytorchOptions {
                use_venv: true,
                clean_cache: false,
            },
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        execute_plan(pytorch_plan(), &mut session, &NoInterrupts)
    };

    assert_eq!(
        report.state,
        RunState::Aborted {
            step: "verify interpreter provenance"
        }
    );
    assert_eq!(
        states(&report.records),
        vec![
            StepState::Succeeded,
            StepState::Succeeded,
            StepState::Succeeded,
            StepState::Failed,
            StepState::Pending,
            StepState::Pending,
            StepState::Pending,
            StepState::Pending,
            StepState::Pending,
        ]
    );
    assert!(!runner.ran("-m venv"), "existing venv must be reused");
    assert!(user_downloader.calls.is_empty());
    let _ = fs::remove_dir_all(home);
}

#[test]
fn pytorch_flow_fetches_keyring_into_managed_temp_dir() {
    let home = test_root();
    let temp_root = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let mut runner = RecordingRunner::default().with_output("dpkg-query", "unknown ok not-installed");
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();

    {
        let mut session = PytorchSession::new(
            PytorchOptions::default(),
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        session.temp_root = temp_root.clone();
        session.install_cusparselt().expect("install must succeed");
    }

    assert_eq!(system_downloader.calls.len(), 1);
    let keyring = system_downloader.calls[0].1.with_extension("");
    assert!(keyring.starts_with(&temp_root));
    assert!(runner.ran(&format!("dpkg -i {}", keyring.display())));
    assert!(runner.ran("apt-get install -y libcusparselt0 libcusparselt-dev"));

    assert!(teardown.run().is_empty());
    assert_eq!(
        fs::read_dir(&temp_root).expect("temp root must exist").count(),
        0
    );
    let _ = fs::remove_dir_all(home);
    let _ = fs::remove_dir_all(temp_root);
}

#[test]
fn clean_cache_removes_only_wheels() {
    let root = test_root();
    fs::write(root.join("torch.whl"), b"wheel").expect("must seed wheel");
    fs::write(root.join("notes.txt"), b"keep me").expect("must seed note");
    fs::create_dir_all(root.join("nested.whl")).expect("must create dir");

    let removed = remove_cached_wheels(&root).expect("cleanup must succeed");

    assert_eq!(removed, 1);
    assert!(!root.join("torch.whl").exists());
    assert_eq!(fs::read(root.join("notes.txt")).expect("note survives"), b"keep me");
    assert!(root.join("nested.whl").is_dir());
    let _ = fs::remove_dir_all(root);
}

#[test]
fn pytorch_clean_cache_step_keeps_other_files() {
    let home = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let cache_dir = home.join(".cache").join("jetson-wheels");
    fs::create_dir_all(&cache_dir).expect("must create cache dir");
    fs::write(cache_dir.join("old.whl"), b"old").expect("must seed wheel");
    fs::write(cache_dir.join("README"), b"readme").expect("must seed readme");
    let mut runner = RecordingRunner::default();
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();

    {
        let mut session = PytorchSession::new(
            PytorchOptions {
                use_venv: false,
                clean_cache: true,
            },
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        session.prepare_wheel_cache().expect("cache prep must succeed");
    }

    assert!(!cache_dir.join("old.whl").exists());
    assert!(cache_dir.join("README").exists());
    assert!(runner.invocations.is_empty(), "existing cache dir needs no mkdir");
    let _ = fs::remove_dir_all(home);
}

fn run_vscode(
    options: VscodeOptions,
    runner: &mut RecordingRunner,
    downloader: &mut FakeDownloader,
    temp_root: &Path,
    home: &Path,
) -> jetprov_installer::RunReport {
    let profile = VscodeProfile::default();
    let context = target_context(home);
    let mut teardown = Teardown::new();
    let mut session = VscodeSession::new(
        options,
        &profile,
        &context,
        runner,
        downloader,
        &mut teardown,
        quiet(),
    );
    session.temp_root = temp_root.to_path_buf();
    let report = execute_plan(vscode_plan(), &mut session, &NoInterrupts);
    report
}

#[test]
fn vscode_flow_skips_install_when_already_present() {
    let home = test_root();
    let mut runner = RecordingRunner::default()
        .with_output("dpkg-query", "install ok installed")
        .with_output("--version", "1.95.3\nf1a4fb101478ce6ec82fe9627c43efbf9e98c813\narm64\n");
    let mut downloader = FakeDownloader::default();

    let report = run_vscode(
        VscodeOptions::default(),
        &mut runner,
        &mut downloader,
        &home,
        &home,
    );

    assert_eq!(report.state, RunState::Completed, "{:?}", report.error());
    assert!(downloader.calls.is_empty());
    assert!(!runner.ran(".deb"));
    let verify = runner.invocations.last().expect("verify must run");
    assert_eq!(verify.program, "code");
    assert_eq!(verify.run_as, RunAs::User("alice".to_string()));
    let _ = fs::remove_dir_all(home);
}

#[test]
fn vscode_flow_reinstalls_on_request() {
    let home = test_root();
    let temp_root = test_root();
    let mut runner = RecordingRunner::default()
        .with_output("dpkg-query", "install ok installed")
        .with_output("--version", "1.95.3\n");
    let mut downloader = FakeDownloader::default();

    let report = run_vscode(
        VscodeOptions { reinstall: true },
        &mut runner,
        &mut downloader,
        &temp_root,
        &home,
    );

    assert_eq!(report.state, RunState::Completed, "{:?}", report.error());
    assert_eq!(downloader.calls.len(), 1);
    assert!(runner.ran("code_arm64.deb"));
    assert_eq!(
        fs::read_dir(&temp_root).expect("temp root must exist").count(),
        0,
        "managed temp dir must be removed"
    );
    let _ = fs::remove_dir_all(home);
    let _ = fs::remove_dir_all(temp_root);
}

#[test]
fn vscode_flow_fails_on_unparseable_version() {
    let home = test_root();
    let mut runner = RecordingRunner::default()
        .with_output("dpkg-query", "install ok installed")
        .with_output("--version", "command not found\n");
    let mut downloader = FakeDownloader::default();

    let report = run_vscode(
        VscodeOptions::default(),
        &mut runner,
        &mut downloader,
        &home,
        &home,
    );

    assert_eq!(
        report.state,
        RunState::Aborted {
            step: "verify editor"
        }
    );
    let _ = fs::remove_dir_all(home);
}

#[test]
fn pytorch_flow_stops_when_uninstall_is_interrupted() {
    let home = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let signals = SharedInterrupts::default();
    let mut runner = pytorch_runner().interrupted_by("uninstall", &signals);
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();

    let report = {
        let mut session = PytorchSession::new(
            PytorchOptions::default(),
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        session.interrupts = &signals;
        execute_plan(pytorch_plan(), &mut session, &signals)
    };

    assert_eq!(
        report.state,
        RunState::Interrupted {
            signal: Interruption::Interrupt,
            step: Some("install wheels"),
        }
    );
    let last = runner.command_lines().pop().expect("commands must have run");
    assert!(last.contains("uninstall"), "nothing may run after the interrupt: {last}");
    assert!(!runner.ran("--force-reinstall"));
    assert!(!runner.ran("import json"));
    let err = report.into_result().expect_err("interrupted run must fail");
    assert_eq!(exit_code_for(&err), EXIT_INTERRUPT);
    let _ = fs::remove_dir_all(home);
}

#[test]
fn cusparselt_step_stops_when_package_query_is_interrupted() {
    let home = test_root();
    let temp_root = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let signals = SharedInterrupts::default();
    let mut runner = RecordingRunner::default().interrupted_by("dpkg-query", &signals);
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();

    let err = {
        let mut session = PytorchSession::new(
            PytorchOptions::default(),
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        session.temp_root = temp_root.clone();
        session.interrupts = &signals;
        let result = session.install_cusparselt();
        result.expect_err("interrupted query must stop the step")
    };

    assert_eq!(exit_code_for(&err), EXIT_INTERRUPT);
    assert_eq!(runner.invocations.len(), 1);
    assert!(!runner.ran("dpkg -i"));
    assert!(!runner.ran("apt-get"));
    assert!(system_downloader.calls.is_empty());
    let _ = fs::remove_dir_all(home);
    let _ = fs::remove_dir_all(temp_root);
}

#[test]
fn vscode_flow_stops_when_package_query_is_interrupted() {
    let home = test_root();
    let signals = SharedInterrupts::default();
    let mut runner = RecordingRunner::default().interrupted_by("dpkg-query", &signals);
    let mut downloader = FakeDownloader::default();
    let profile = VscodeProfile::default();
    let context = target_context(&home);
    let mut teardown = Teardown::new();

    let report = {
        let mut session = VscodeSession::new(
            VscodeOptions::default(),
            &profile,
            &context,
            &mut runner,
            &mut downloader,
            &mut teardown,
            quiet(),
        );
        session.temp_root = home.clone();
        session.interrupts = &signals;
        execute_plan(vscode_plan(), &mut session, &signals)
    };

    assert_eq!(
        report.state,
        RunState::Interrupted {
            signal: Interruption::Interrupt,
            step: Some("install prerequisites"),
        }
    );
    assert!(downloader.calls.is_empty());
    assert!(!runner.ran("--version"));
    let _ = fs::remove_dir_all(home);
}

#[test]
fn pytorch_flow_creates_venv_and_installs_into_it() {
    let home = test_root();
    let profile = test_pytorch_profile();
    let context = target_context(&home);
    let venv = home.join("workspace").join("torch-venv");
    let venv_python = venv.join("bin").join("python");
    let identity = format!("{}\n{}\n/usr\n", venv_python.display(), venv.display());
    let mut runner = RecordingRunner::default()
        .with_output("dpkg-query", "install ok installed")
        .with_output("sys.base_prefix", &identity)
        .with_output("import json", PROBE_REPORT)
        .creating("-m venv", &venv_python);
    let mut user_downloader = FakeDownloader::default();
    let mut system_downloader = FakeDownloader::default();
    let mut teardown = Teardown::new();

    let report = {
        let mut session = PytorchSession::new(
            PytorchOptions {
                use_venv: true,
                clean_cache: false,
            },
            &profile,
            &context,
            &mut runner,
            &mut user_downloader,
            &mut system_downloader,
            &mut teardown,
            quiet(),
        );
        execute_plan(pytorch_plan(), &mut session, &NoInterrupts)
    };
    assert!(teardown.run().is_empty());

    assert_eq!(report.state, RunState::Completed, "{:?}", report.error());
    let alice = RunAs::User("alice".to_string());
    let create = runner
        .invocations
        .iter()
        .find(|invocation| invocation.args.get(1).map(String::as_str) == Some("venv"))
        .expect("venv must be created");
    assert_eq!(create.program, "/usr/bin/python3.10");
    assert_eq!(create.args, vec!["-m".to_string(), "venv".to_string(), venv.display().to_string()]);
    assert_eq!(create.run_as, alice);

    let venv_program = venv_python.display().to_string();
    let pip_installs = runner
        .invocations
        .iter()
        .filter(|invocation| {
            invocation.args.first().map(String::as_str) == Some("-m")
                && invocation.args.get(2).map(String::as_str) == Some("install")
        })
        .collect::<Vec<_>>();
    assert_eq!(pip_installs.len(), 3);
    assert_eq!(pip_installs[0].args[3..], ["--upgrade", "pip"]);
    for invocation in &pip_installs {
        assert_eq!(invocation.program, venv_program);
        assert_eq!(invocation.run_as, alice);
        assert!(!invocation.args.contains(&"--user".to_string()));
    }
    assert!(pip_installs[2].args.contains(&"--force-reinstall".to_string()));
    let probe = runner.invocations.last().expect("runtime probe must run");
    assert_eq!(probe.program, venv_program);
    assert_eq!(user_downloader.calls.len(), 2);
    let _ = fs::remove_dir_all(home);
}
