use anyhow::{Context, Result};
use jetprov_core::{Interruption, ProvisionError};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ffi::c_int;
use std::sync::atomic::{AtomicI32, Ordering};

static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signum: c_int) {
    PENDING_SIGNAL.store(signum, Ordering::SeqCst);
}

/// Replaces the default SIGINT/SIGTERM disposition with a handler that only
/// records the signal; the step loop notices it and unwinds through cleanup.
pub fn install_interrupt_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler performs a single atomic store, which is
        // async-signal-safe.
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("failed to install {} handler", signal.as_str()))?;
    }
    Ok(())
}

/// The signal recorded by [`install_interrupt_handlers`], if any.
pub fn pending_interrupt() -> Option<Interruption> {
    Interruption::from_signal_number(PENDING_SIGNAL.load(Ordering::SeqCst))
}

pub trait InterruptSource {
    fn pending(&self) -> Option<Interruption>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInterrupts;

impl InterruptSource for SignalInterrupts {
    fn pending(&self) -> Option<Interruption> {
        pending_interrupt()
    }
}

/// Fails with [`ProvisionError::Interrupted`] once a signal is pending, so
/// work inside a step stops at the next checkpoint instead of carrying on.
pub fn check_interrupted(interrupts: &dyn InterruptSource) -> Result<()> {
    match interrupts.pending() {
        Some(signal) => Err(ProvisionError::Interrupted(signal).into()),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) fn clear_pending_signal() {
    PENDING_SIGNAL.store(0, Ordering::SeqCst);
}
