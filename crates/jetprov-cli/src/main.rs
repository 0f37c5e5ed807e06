use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand};
use jetprov_core::{parse_font_spec, parse_revision, Revision, EXIT_SUCCESS, EXIT_USAGE};

mod completion;
mod dispatch;
mod font_flow;
mod pytorch_flow;
mod render;
mod snap_flow;
mod vscode_flow;

use completion::CliCompletionShell;
use dispatch::run_cli;
use render::{init_logging, report_fatal};

#[derive(Parser, Debug)]
#[command(name = "jetprov")]
#[command(version, about = "Provisioning runbooks for Jetson devices", long_about = None)]
struct Cli {
    /// TOML profile overriding the pinned URLs, versions and package lists.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the GPU PyTorch, TorchVision and ONNX Runtime stack (run with sudo).
    Pytorch {
        /// Install into ~/workspace/<venv> instead of the user site-packages.
        #[arg(long)]
        venv: bool,
        /// Delete cached wheels before fetching.
        #[arg(long)]
        clean_cache: bool,
    },
    /// Install Visual Studio Code from the vendor .deb (run with sudo).
    Vscode {
        /// Install even when the package is already present.
        #[arg(long)]
        reinstall: bool,
    },
    /// Install a pinned snap revision and hold refreshes (run with sudo).
    SnapRevert {
        #[arg(
            value_name = "REVISION",
            value_parser = parse_revision,
            conflicts_with = "revision"
        )]
        positional_revision: Option<Revision>,
        #[arg(long, value_name = "N", value_parser = parse_revision)]
        revision: Option<Revision>,
        /// Snap to pin instead of the profile default.
        #[arg(
            long = "snap",
            value_name = "NAME",
            value_parser = NonEmptyStringValueParser::new()
        )]
        snap: Option<String>,
        /// Where the .snap and .assert files are downloaded (default: current dir).
        #[arg(long, value_name = "DIR")]
        download_dir: Option<PathBuf>,
    },
    /// Set the GNOME Terminal default profile font (run as the desktop user).
    TerminalFont {
        #[arg(long, value_name = "FONT", value_parser = parse_font_spec)]
        font: Option<String>,
    },
    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                EXIT_USAGE
            } else {
                EXIT_SUCCESS
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    init_logging();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => ExitCode::from(report_fatal(&err)),
    }
}

#[cfg(test)]
mod tests;
