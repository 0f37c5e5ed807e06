use thiserror::Error;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_RUNTIME: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_INTERRUPT: u8 = 130;
pub const EXIT_TERMINATE: u8 = 143;

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

/// Signal that stopped a run before its step sequence finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Interrupt,
    Terminate,
}

impl Interruption {
    pub fn from_signal_number(signum: i32) -> Option<Self> {
        match signum {
            SIGINT => Some(Self::Interrupt),
            SIGTERM => Some(Self::Terminate),
            _ => None,
        }
    }

    pub fn signal_name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Interrupt => EXIT_INTERRUPT,
            Self::Terminate => EXIT_TERMINATE,
        }
    }
}

/// Failure classes that map to a dedicated exit code. Anything else in an
/// error chain is a runtime error.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("usage error: {0}")]
    Usage(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("interrupted by {}", .0.signal_name())]
    Interrupted(Interruption),
}

pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        match cause.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::Usage(_)) => return EXIT_USAGE,
            Some(ProvisionError::Interrupted(signal)) => return signal.exit_code(),
            Some(ProvisionError::Precondition(_)) => return EXIT_RUNTIME,
            None => {}
        }
    }
    EXIT_RUNTIME
}
