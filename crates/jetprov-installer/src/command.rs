use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::signals::{check_interrupted, InterruptSource};

/// Identity an external command runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAs {
    /// The process's own identity, root for the privileged runbooks.
    Current,
    /// Delegated to an unprivileged account through `sudo -u`.
    User(String),
}

/// One external command, described before it is turned into a process so
/// runners can record or replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub run_as: RunAs,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            run_as: RunAs::Current,
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn run_as(mut self, run_as: RunAs) -> Self {
        self.run_as = run_as;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Human-readable command line used in logs and error messages.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote_for_display(&self.program));
        parts.extend(self.args.iter().map(|arg| quote_for_display(arg)));
        let line = parts.join(" ");
        match &self.run_as {
            RunAs::Current => line,
            RunAs::User(user) => format!("[as {user}] {line}"),
        }
    }

    pub fn to_command(&self) -> Command {
        let mut command = match &self.run_as {
            RunAs::Current => {
                let mut command = Command::new(&self.program);
                command.args(&self.args);
                command.envs(self.envs.iter().map(|(key, value)| (key, value)));
                command
            }
            RunAs::User(user) => {
                // sudo resets the environment, so variables travel through env(1).
                let mut command = Command::new("sudo");
                command.arg("-u").arg(user).arg("-H").arg("--").arg("env");
                for (key, value) in &self.envs {
                    command.arg(format!("{key}={value}"));
                }
                command.arg(&self.program).args(&self.args);
                command
            }
        };
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

fn quote_for_display(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:+,@%".contains(&b));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

pub trait CommandRunner {
    /// Runs to completion with inherited stdio; non-zero exit is an error.
    fn run(&mut self, invocation: &Invocation) -> Result<()>;

    /// Runs to completion and returns stdout; non-zero exit is an error.
    fn capture(&mut self, invocation: &Invocation) -> Result<String>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &mut R {
    fn run(&mut self, invocation: &Invocation) -> Result<()> {
        (**self).run(invocation)
    }

    fn capture(&mut self, invocation: &Invocation) -> Result<String> {
        (**self).capture(invocation)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<()> {
        debug!("running {}", invocation.command_line());
        let mut command = invocation.to_command();
        run_command(
            &mut command,
            &format!("command failed: {}", invocation.command_line()),
        )
    }

    fn capture(&mut self, invocation: &Invocation) -> Result<String> {
        debug!("capturing {}", invocation.command_line());
        let mut command = invocation.to_command();
        capture_command(
            &mut command,
            &format!("command failed: {}", invocation.command_line()),
        )
    }
}

pub fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let status = command
        .status()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if status.success() {
        return Ok(());
    }
    Err(anyhow!("{context_message}: status={status}"))
}

pub fn capture_command(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

/// Runs a command whose failure is an acceptable starting state, such as
/// uninstalling a package that may be absent. Returns whether it succeeded.
/// A failure while a signal is pending is the interrupt, never tolerated.
pub fn run_tolerated(
    runner: &mut dyn CommandRunner,
    invocation: &Invocation,
    interrupts: &dyn InterruptSource,
) -> Result<bool> {
    match runner.run(invocation) {
        Ok(()) => Ok(true),
        Err(err) => {
            check_interrupted(interrupts)
                .with_context(|| format!("interrupted: {}", invocation.command_line()))?;
            warn!("ignoring failure: {err:#}");
            Ok(false)
        }
    }
}
