mod artifact;
mod capability;
mod exit;
mod probe;
mod profile;
mod revision;
mod version;

pub use artifact::WheelArtifact;
pub use capability::compute_capability_label;
pub use exit::{
    exit_code_for, Interruption, ProvisionError, EXIT_INTERRUPT, EXIT_RUNTIME, EXIT_SUCCESS,
    EXIT_TERMINATE, EXIT_USAGE,
};
pub use probe::{
    evaluate_runtime_probe, ProbeEvaluation, RuntimeProbeReport, RUNTIME_PROBE_SCRIPT,
};
pub use profile::{
    CusparseltProfile, ProvisionProfile, PytorchProfile, SnapProfile, TerminalFontProfile,
    VscodeProfile,
};
pub use revision::{parse_font_spec, parse_revision, Revision};
pub use version::leading_version;
