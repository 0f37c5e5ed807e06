use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use jetprov_core::exit_code_for;
use jetprov_installer::{StepRecord, StepState};
use tracing::{error, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

/// INFO and below go to stdout, WARN and ERROR to stderr. `RUST_LOG`
/// overrides the default `info` filter.
pub(crate) fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false)
                .with_writer(writer),
        )
        .try_init();
}

/// Logs the whole error chain once and returns the process exit code.
pub(crate) fn report_fatal(err: &anyhow::Error) -> u8 {
    error!("{err:#}");
    exit_code_for(err)
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    )
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

pub(crate) fn format_step_summary(style: OutputStyle, records: &[StepRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let (status, label) = match record.state {
                StepState::Succeeded => ("ok", "done"),
                StepState::Failed => ("err", "failed"),
                StepState::Running => ("warn", "stopped"),
                StepState::Pending => ("skip", "not run"),
            };
            render_status_line(style, status, &format!("{}: {label}", record.name))
        })
        .collect()
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", colorize(section_style(), &format!("== {title} ==")));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn download_progress(self) -> DownloadProgress {
        DownloadProgress {
            style: self.style,
            bar: None,
        }
    }
}

/// Progress for one in-process transfer at a time. A bar is created on the
/// first chunk and cleared once the announced length is reached.
pub(crate) struct DownloadProgress {
    style: OutputStyle,
    bar: Option<ProgressBar>,
}

impl DownloadProgress {
    pub(crate) fn update(&mut self, downloaded: u64, total: Option<u64>) {
        if self.style == OutputStyle::Plain {
            return;
        }
        let bar = self.bar.get_or_insert_with(|| new_download_bar(total));
        bar.set_position(downloaded);
        if total.is_some_and(|total| downloaded >= total) {
            if let Some(bar) = self.bar.take() {
                bar.finish_and_clear();
            }
        }
    }
}

impl Drop for DownloadProgress {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn new_download_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let bar = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{msg:<10} [{bar:24.cyan/blue}] {bytes:>10}/{total_bytes:<10} {binary_bytes_per_sec}",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar.set_message("download");
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::with_template("{spinner:.cyan.bold} {msg:<10} {bytes} {elapsed_precise}")
            {
                bar.set_style(style.tick_chars("|/-\\ "));
            }
            bar.set_message("download");
            bar
        }
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
