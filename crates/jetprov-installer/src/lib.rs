mod command;
mod context;
mod fetch;
mod fs_utils;
mod layout;
mod managed;
mod packages;
mod provenance;
mod settings;
mod signals;
mod steps;

pub use command::{
    capture_command, run_command, run_tolerated, CommandRunner, Invocation, RunAs, SystemRunner,
};
pub use context::{
    missing_commands, require_commands, resolve_target_context, IdentitySource,
    PrivilegeRequirement, SystemIdentity, TargetContext, UserRecord,
};
pub use fetch::{
    ensure_cached, ensure_cached_verified, parse_download_backend_preference,
    DownloadBackendPreference, Downloader, ExternalDownloader, FetchStatus, HttpDownloader,
    DOWNLOAD_BACKEND_ENV,
};
pub use fs_utils::{is_nonempty_file, remove_file_if_exists};
pub use layout::{ensure_user_dir, TargetLayout};
pub use managed::{ManagedFile, ManagedKind, Teardown};
pub use packages::{apt_install, apt_install_local, apt_update, dpkg_install, dpkg_is_installed};
pub use provenance::{verify_interpreter_provenance, InterpreterIdentity, IDENTITY_PROBE};
pub use settings::{
    format_gvariant, parse_gvariant, DesktopSettingsStore, SettingKey, SettingValue,
    SettingsStore,
};
pub use signals::{
    check_interrupted, install_interrupt_handlers, pending_interrupt, InterruptSource,
    SignalInterrupts,
};
pub use steps::{execute_plan, RunReport, RunState, StepPlan, StepRecord, StepState};
