use std::io::Write;
use std::path::Path;
use std::time::Duration;

use owo_colors::OwoColorize;
use paperchase_core::{Phase, ProgressEvent, RunReport, SourceStatus};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print the run header: which checklist, where files go, which sources run.
pub fn print_header(
    w: &mut dyn Write,
    checklist: &Path,
    output_dir: &Path,
    fast_sources: &[&str],
    browser: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", "Checklist:".bold(), checklist.display())?;
        writeln!(w, "{} {}", "Output:".bold(), output_dir.display())?;
    } else {
        writeln!(w, "Checklist: {}", checklist.display())?;
        writeln!(w, "Output: {}", output_dir.display())?;
    }
    writeln!(w, "Sources: {}", fast_sources.join(", "))?;
    if !browser {
        let note = "(browser phase disabled)";
        if color.enabled() {
            writeln!(w, "{}", note.dimmed())?;
        } else {
            writeln!(w, "{}", note)?;
        }
    }
    writeln!(w)?;
    Ok(())
}

fn status_label(status: &SourceStatus) -> String {
    match status {
        SourceStatus::Success => "found".to_string(),
        SourceStatus::NotFound => "not found".to_string(),
        SourceStatus::Rejected => "invalid file".to_string(),
        SourceStatus::Timeout => "timeout".to_string(),
        SourceStatus::RateLimited => "rate limited".to_string(),
        SourceStatus::Error(msg) => format!("error: {}", truncate(msg, 60)),
        SourceStatus::Skipped => "skipped".to_string(),
    }
}

/// Print a real-time progress event.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    verbose: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::PhaseStarted { phase, items } => {
            let title = match phase {
                Phase::Fast => format!("Phase 1: API sources ({} items)", items),
                Phase::Browser => format!("Phase 2: browser ({} items)", items),
            };
            writeln!(w)?;
            if color.enabled() {
                writeln!(w, "{}", title.bold().cyan())?;
            } else {
                writeln!(w, "{}", title)?;
            }
        }
        ProgressEvent::Started { index, url, .. } => {
            writeln!(w, "[{:03}] {}", index, truncate(url, 90))?;
        }
        ProgressEvent::SourceComplete {
            index,
            source,
            status,
            elapsed,
        } => {
            // Only the noteworthy outcomes unless asked for everything.
            let noteworthy = matches!(
                status,
                SourceStatus::Rejected | SourceStatus::RateLimited | SourceStatus::Error(_)
            );
            if verbose || noteworthy {
                let line = format!(
                    "[{:03}]   {} -> {} ({})",
                    index,
                    source,
                    status_label(status),
                    format_elapsed(*elapsed)
                );
                if color.enabled() {
                    writeln!(w, "{}", line.dimmed())?;
                } else {
                    writeln!(w, "{}", line)?;
                }
            }
        }
        ProgressEvent::Resolved {
            index,
            source,
            path,
            ..
        } => {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if color.enabled() {
                writeln!(
                    w,
                    "[{:03}] -> {} via {} ({})",
                    index,
                    "DOWNLOADED".green(),
                    source,
                    file
                )?;
            } else {
                writeln!(w, "[{:03}] -> DOWNLOADED via {} ({})", index, source, file)?;
            }
        }
        ProgressEvent::Duplicate { index, original } => {
            if color.enabled() {
                writeln!(
                    w,
                    "[{:03}] -> {} of item {:03}",
                    index,
                    "DUPLICATE".blue(),
                    original
                )?;
            } else {
                writeln!(w, "[{:03}] -> DUPLICATE of item {:03}", index, original)?;
            }
        }
        ProgressEvent::Existing { index } => {
            if color.enabled() {
                writeln!(w, "[{:03}] -> {}", index, "ALREADY ON DISK".green())?;
            } else {
                writeln!(w, "[{:03}] -> ALREADY ON DISK", index)?;
            }
        }
        ProgressEvent::Unresolved { index, phase } => {
            let label = match phase {
                Phase::Fast => "NOT FOUND (queued for browser)",
                Phase::Browser => "NOT FOUND",
            };
            if color.enabled() {
                writeln!(w, "[{:03}] -> {}", index, label.red())?;
            } else {
                writeln!(w, "[{:03}] -> {}", index, label)?;
            }
        }
        ProgressEvent::ScreenshotsCaptured { index } => {
            if color.enabled() {
                writeln!(w, "[{:03}] -> {}", index, "SCREENSHOTS SAVED".yellow())?;
            } else {
                writeln!(w, "[{:03}] -> SCREENSHOTS SAVED", index)?;
            }
        }
        ProgressEvent::ScreenshotsExist { index } => {
            if color.enabled() {
                writeln!(w, "[{:03}] -> {}", index, "screenshots exist".dimmed())?;
            } else {
                writeln!(w, "[{:03}] -> screenshots exist", index)?;
            }
        }
        ProgressEvent::Warning { index, message } => {
            if color.enabled() {
                writeln!(w, "[{:03}] {} {}", index, "WARNING:".yellow(), message)?;
            } else {
                writeln!(w, "[{:03}] WARNING: {}", index, message)?;
            }
        }
    }
    Ok(())
}

/// Print the final summary.
pub fn print_summary(w: &mut dyn Write, report: &RunReport, color: ColorMode) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Summary".bold())?;
    } else {
        writeln!(w, "Summary")?;
    }
    writeln!(w, "  Pending rows:        {}", report.pending)?;
    writeln!(w, "  Phase 1 downloads:   {}", report.phase1_resolved)?;
    writeln!(w, "  Phase 2 downloads:   {}", report.phase2_resolved)?;
    writeln!(w, "  Duplicates stubbed:  {}", report.duplicates)?;
    writeln!(w, "  Already on disk:     {}", report.existing)?;
    if report.screenshots > 0 {
        writeln!(w, "  Screenshot sets:     {}", report.screenshots)?;
    }

    let unresolved = report.unresolved.len();
    if unresolved == 0 {
        if color.enabled() {
            writeln!(w, "  {}", "All rows resolved".green())?;
        } else {
            writeln!(w, "  All rows resolved")?;
        }
    } else {
        let list = report
            .unresolved
            .iter()
            .map(|i| format!("{:03}", i))
            .collect::<Vec<_>>()
            .join(", ");
        if color.enabled() {
            writeln!(w, "  {} {}", "Unresolved:".red(), list)?;
        } else {
            writeln!(w, "  Unresolved: {}", list)?;
        }
    }

    if report.cancelled {
        let note = "Run interrupted; rerun the same command to resume.";
        if color.enabled() {
            writeln!(w, "{}", note.yellow())?;
        } else {
            writeln!(w, "{}", note)?;
        }
    }
    Ok(())
}

fn format_elapsed(d: Duration) -> String {
    if d.as_secs() >= 1 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}ms", d.as_millis())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
