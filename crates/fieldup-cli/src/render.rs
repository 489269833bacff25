use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use fieldup_core::{AppName, ContentHash, Outcome};
use fieldup_installer::{EngineSummary, GcReport, RecoveryReport, SnapshotOutcome};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
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
        if let Some(line) = render_section_header(self.style, title) {
            println!("{line}");
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

/// Rich output only when stdout is a terminal and `NO_COLOR` is unset.
pub(crate) fn current_output_style() -> OutputStyle {
    output_style_for(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

pub(crate) fn output_style_for(is_terminal: bool, no_color: bool) -> OutputStyle {
    if is_terminal && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = status_badge(status);
            format!("{} {message}", colorize(badge_style, badge))
        }
    }
}

fn status_badge(status: &str) -> (&'static str, Style) {
    match status {
        "ok" => ("[OK]", Style::new().fg_color(Some(AnsiColor::Green.into()))),
        "warn" => ("[WARN]", Style::new().fg_color(Some(AnsiColor::Yellow.into()))),
        "error" => (
            "[ERR]",
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        ),
        _ => ("[..]", Style::new().fg_color(Some(AnsiColor::BrightBlack.into()))),
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

fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

pub(crate) fn format_outcome_line(
    app: &AppName,
    hash: Option<&ContentHash>,
    outcome: Outcome,
    style: OutputStyle,
) -> String {
    let message = match (outcome, hash) {
        (Outcome::AlreadyInstalled, Some(hash)) => {
            format!("{app} is already installed at {hash}")
        }
        (outcome, Some(hash)) => format!("{} {app} ({hash})", outcome.as_str()),
        (outcome, None) => format!("{} {app}", outcome.as_str()),
    };
    let status = match outcome {
        Outcome::AlreadyInstalled => "step",
        _ => "ok",
    };
    render_status_line(style, status, &message)
}

pub(crate) fn format_snapshot_line(outcome: SnapshotOutcome, style: OutputStyle) -> String {
    match outcome {
        SnapshotOutcome::Taken { index } => {
            render_status_line(style, "ok", &format!("snapshot taken as index {index}"))
        }
        SnapshotOutcome::AlreadyPresent { index } => render_status_line(
            style,
            "step",
            &format!("snapshot for index {index} already present"),
        ),
        SnapshotOutcome::Skipped => render_status_line(
            style,
            "step",
            "current system is not proven good, snapshot skipped",
        ),
    }
}

pub(crate) fn format_recovery_lines(report: &RecoveryReport, style: OutputStyle) -> Vec<String> {
    if report.replayed.is_empty() && report.principals_added.is_empty() {
        return vec![render_status_line(
            style,
            "ok",
            "no interrupted operations",
        )];
    }

    let mut lines = Vec::new();
    for op in &report.replayed {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("finished {} of {} ({})", op.kind.as_str(), op.app, op.hash),
        ));
    }
    for app in &report.principals_added {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("added missing principal for {app}"),
        ));
    }
    lines
}

pub(crate) fn format_gc_lines(report: &GcReport, style: OutputStyle) -> Vec<String> {
    if report.systems.is_empty() && report.content.is_empty() {
        return vec![render_status_line(style, "step", "nothing to collect")];
    }

    let mut lines = Vec::new();
    for path in &report.systems {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("removed system {}", path.display()),
        ));
    }
    for hash in &report.content {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("reclaimed content {hash}"),
        ));
    }
    lines
}

pub(crate) fn format_status_lines(summary: &EngineSummary, style: OutputStyle) -> Vec<String> {
    let index = summary
        .current_index
        .map(|index| index.to_string())
        .unwrap_or_else(|| "none".to_string());
    let mut lines = vec![
        format!("root: {}", summary.root.display()),
        format!(
            "current: index={index} status={} version={}{}",
            summary.status.as_str(),
            summary.version.as_deref().unwrap_or("unknown"),
            if summary.modified { " (modified)" } else { "" }
        ),
    ];
    if summary.read_only {
        lines.push(render_status_line(style, "warn", "system is read-only"));
    }
    if !summary.labels_enabled {
        lines.push(render_status_line(
            style,
            "warn",
            "security labels are not applied on this device",
        ));
    }
    if let Some(previous) = summary.previous_good_index {
        lines.push(format!("rollback target: index={previous}"));
    }

    for system in &summary.systems {
        let index = system
            .index
            .map(|index| index.to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "system {}: index={index} status={}",
            system.name,
            system.status.as_str()
        ));
    }

    if summary.apps.is_empty() {
        lines.push("apps: none".to_string());
    }
    for app in &summary.apps {
        lines.push(format!("app {} {}", app.name, app.hash));
    }

    for pending in &summary.pending {
        lines.push(render_status_line(
            style,
            "warn",
            &format!(
                "pending {} of {} ({})",
                pending.kind.as_str(),
                pending.app,
                pending.hash
            ),
        ));
    }

    lines.push(format!("content entries: {}", summary.content.len()));
    lines
}
