use anyhow::Result;
use jetprov_core::{Interruption, ProvisionError};
use tracing::{info, warn};

use crate::signals::InterruptSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Completed,
    Aborted {
        step: &'static str,
    },
    Interrupted {
        signal: Interruption,
        step: Option<&'static str>,
    },
}

type StepAction<'a, S> = Box<dyn FnMut(&mut S) -> Result<()> + 'a>;

struct Step<'a, S> {
    name: &'static str,
    action: StepAction<'a, S>,
}

/// Fixed-order list of named steps over a session `S`.
pub struct StepPlan<'a, S> {
    steps: Vec<Step<'a, S>>,
}

impl<S> Default for StepPlan<'_, S> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<'a, S> StepPlan<'a, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(
        mut self,
        name: &'static str,
        action: impl FnMut(&mut S) -> Result<()> + 'a,
    ) -> Self {
        self.steps.push(Step {
            name,
            action: Box::new(action),
        });
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: &'static str,
    pub state: StepState,
}

#[derive(Debug)]
pub struct RunReport {
    pub records: Vec<StepRecord>,
    pub state: RunState,
    error: Option<anyhow::Error>,
}

impl RunReport {
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    pub fn into_result(self) -> Result<()> {
        match self.state {
            RunState::Completed => Ok(()),
            RunState::Aborted { step } => {
                let err = self
                    .error
                    .unwrap_or_else(|| anyhow::anyhow!("step reported failure"));
                Err(err.context(format!("step '{step}' failed")))
            }
            RunState::Interrupted { signal, step } => {
                let interrupted = anyhow::Error::new(ProvisionError::Interrupted(signal));
                match (step, self.error) {
                    (Some(step), Some(err)) => {
                        Err(interrupted.context(format!("step '{step}' stopped: {err:#}")))
                    }
                    (Some(step), None) => {
                        Err(interrupted.context(format!("stopped before step '{step}'")))
                    }
                    (None, _) => Err(interrupted),
                }
            }
        }
    }
}

/// Runs every step in order until one fails or a signal is pending. Steps
/// after the stopping point stay `Pending`.
pub fn execute_plan<S>(
    plan: StepPlan<'_, S>,
    session: &mut S,
    interrupts: &dyn InterruptSource,
) -> RunReport {
    let total = plan.steps.len();
    let mut records = plan
        .steps
        .iter()
        .map(|step| StepRecord {
            name: step.name,
            state: StepState::Pending,
        })
        .collect::<Vec<_>>();

    for (index, mut step) in plan.steps.into_iter().enumerate() {
        if let Some(signal) = interrupts.pending() {
            warn!(
                "{} received; not starting step '{}'",
                signal.signal_name(),
                step.name
            );
            return RunReport {
                records,
                state: RunState::Interrupted {
                    signal,
                    step: Some(step.name),
                },
                error: None,
            };
        }

        records[index].state = StepState::Running;
        info!("[{}/{}] {}", index + 1, total, step.name);

        if let Err(err) = (step.action)(session) {
            records[index].state = StepState::Failed;
            let state = match interrupts.pending() {
                Some(signal) => RunState::Interrupted {
                    signal,
                    step: Some(step.name),
                },
                None => RunState::Aborted { step: step.name },
            };
            return RunReport {
                records,
                state,
                error: Some(err),
            };
        }
        records[index].state = StepState::Succeeded;
    }

    let state = match interrupts.pending() {
        Some(signal) => RunState::Interrupted { signal, step: None },
        None => RunState::Completed,
    };
    RunReport {
        records,
        state,
        error: None,
    }
}
