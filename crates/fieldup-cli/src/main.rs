mod completion;
mod dispatch;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::dispatch::{exit_code_for, run_cli};
use crate::render::{current_output_style, render_status_line};

const DEFAULT_CONFIG_PATH: &str = "/etc/fieldup/engine.toml";

#[derive(Parser, Debug)]
#[command(name = "fieldup")]
#[command(about = "Field update engine for app and system snapshots", long_about = None)]
struct Cli {
    /// Engine config file. Defaults to /etc/fieldup/engine.toml when that file exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Overrides the root directory from the config file.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Log at debug level regardless of RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Finish operations interrupted by a reboot and repair missing principals.
    Recover,
    /// Install an app from a payload directory or the staging area.
    Install {
        app: String,
        hash: String,
        #[arg(long)]
        payload: Option<PathBuf>,
    },
    /// Move an installed app to new content.
    Upgrade {
        app: String,
        hash: String,
        #[arg(long)]
        payload: Option<PathBuf>,
    },
    Remove {
        app: String,
    },
    /// Preserve the current system as a rollback point.
    Snapshot,
    /// Move a staged full system update into its index slot.
    FinishSystemUpdate,
    Status {
        #[arg(long)]
        json: bool,
    },
    MarkGood,
    MarkBad,
    /// Drop unneeded systems and unreferenced app content.
    Gc,
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CliCompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let message = format!("{err:#}");
            eprintln!(
                "{}",
                render_status_line(current_output_style(), "error", &message)
            );
            ExitCode::from(exit_code_for(&err))
        }
    }
}
