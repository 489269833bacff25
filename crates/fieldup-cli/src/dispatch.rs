use std::path::{Path, PathBuf};

use anyhow::Context;
use fieldup_core::{AppName, ContentHash, EngineConfig, ResultCode, UpdateError, UpdateResult};
use fieldup_installer::UpdateEngine;
use tracing::debug;

use crate::completion::write_completions_script;
use crate::render::{
    current_output_style, format_gc_lines, format_outcome_line, format_recovery_lines,
    format_snapshot_line, format_status_lines, render_status_line, TerminalRenderer,
};
use crate::{Cli, Commands, DEFAULT_CONFIG_PATH};

pub(crate) const EXIT_NOT_FOUND: u8 = 3;
pub(crate) const EXIT_BAD_PARAMETER: u8 = 4;
pub(crate) const EXIT_FAULT: u8 = 5;
pub(crate) const EXIT_BUSY: u8 = 6;
pub(crate) const EXIT_FATAL: u8 = 7;

/// Process exit code for a failed command. `Fatal` is kept apart from ordinary faults so the
/// boot scripts can tell "retry later" from "reboot into the previous system".
pub(crate) fn exit_code_for(err: &UpdateError) -> u8 {
    if err.is_fatal() {
        return EXIT_FATAL;
    }
    match err.code() {
        ResultCode::Ok | ResultCode::Duplicate => 0,
        ResultCode::NotFound => EXIT_NOT_FOUND,
        ResultCode::BadParameter => EXIT_BAD_PARAMETER,
        ResultCode::Fault => EXIT_FAULT,
        ResultCode::Busy => EXIT_BUSY,
    }
}

pub(crate) fn run_cli(cli: Cli) -> UpdateResult<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut stdout = std::io::stdout();
        write_completions_script(shell, &mut stdout)?;
        return Ok(());
    }

    let config = resolve_config(
        cli.config.as_deref(),
        cli.root,
        Path::new(DEFAULT_CONFIG_PATH),
    )?;
    debug!(root = %config.root.display(), read_only = config.read_only, "engine config loaded");
    let engine = UpdateEngine::standalone(config);
    let renderer = TerminalRenderer::current();
    let style = renderer.style();

    match cli.command {
        Commands::Recover => {
            let report = engine.startup()?;
            renderer.print_lines(&format_recovery_lines(&report, style));
        }
        Commands::Install { app, hash, payload } => {
            let app = AppName::parse(&app)?;
            let hash = ContentHash::parse(&hash)?;
            let outcome = engine.install_app(&app, &hash, payload.as_deref())?;
            println!("{}", format_outcome_line(&app, Some(&hash), outcome, style));
        }
        Commands::Upgrade { app, hash, payload } => {
            let app = AppName::parse(&app)?;
            let hash = ContentHash::parse(&hash)?;
            let outcome = engine.upgrade_app(&app, &hash, payload.as_deref())?;
            println!("{}", format_outcome_line(&app, Some(&hash), outcome, style));
        }
        Commands::Remove { app } => {
            let app = AppName::parse(&app)?;
            let outcome = engine.remove_app(&app)?;
            println!("{}", format_outcome_line(&app, None, outcome, style));
        }
        Commands::Snapshot => {
            let outcome = engine.snapshot()?;
            println!("{}", format_snapshot_line(outcome, style));
        }
        Commands::FinishSystemUpdate => {
            let index = engine.finish_system_update()?;
            renderer.print_status("ok", &format!("system update installed as index {index}"));
        }
        Commands::Status { json } => {
            let summary = engine.summary()?;
            if json {
                let rendered = serde_json::to_string_pretty(&summary)
                    .context("failed to serialize engine status")?;
                println!("{rendered}");
            } else {
                renderer.print_section("Status");
                renderer.print_lines(&format_status_lines(&summary, style));
            }
        }
        Commands::MarkGood => {
            let report = engine.mark_good()?;
            renderer.print_status("ok", "current system marked good");
            renderer.print_lines(&format_gc_lines(&report, style));
        }
        Commands::MarkBad => {
            engine.mark_bad()?;
            println!(
                "{}",
                render_status_line(style, "warn", "current system marked bad")
            );
        }
        Commands::Gc => {
            let report = engine.gc()?;
            renderer.print_lines(&format_gc_lines(&report, style));
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Picks the engine config: an explicit `--config` must exist, the default path is optional,
/// and `--root` wins over whatever root the file names.
pub(crate) fn resolve_config(
    explicit: Option<&Path>,
    root_override: Option<PathBuf>,
    default_path: &Path,
) -> UpdateResult<EngineConfig> {
    let mut config = match explicit {
        Some(path) => EngineConfig::load(path).map_err(config_error)?,
        None if default_path.is_file() => EngineConfig::load(default_path).map_err(config_error)?,
        None => EngineConfig::default(),
    };
    if let Some(root) = root_override {
        config.root = root;
        config.validate().map_err(config_error)?;
    }
    Ok(config)
}

fn config_error(err: anyhow::Error) -> UpdateError {
    UpdateError::bad_parameter(format!("{err:#}"))
}
