//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use chrono::{DateTime, Local};

use crate::fit::{BatchOutcome, DescentOutcome};
use crate::io::{Checkpoint, IngestedData};
use crate::models::ForwardModel;

/// Run-level facts shown in the summary header.
#[derive(Debug, Clone)]
pub struct RunHeader<'a> {
    pub started_at: DateTime<Local>,
    pub label: &'a str,
    pub model_code: &'a str,
}

/// Dataset and run header.
pub fn format_run_header(header: &RunHeader<'_>, ingest: &IngestedData) -> String {
    let mut out = String::new();

    out.push_str("=== bfit - bumper-driven LM fit ===\n");
    out.push_str(&format!(
        "Run: {} | model {} | started {}\n",
        header.label,
        header.model_code,
        header.started_at.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!(
        "Data: {} rows read, {} used, {} skipped | {} group(s)\n",
        ingest.rows_read,
        ingest.rows_used,
        ingest.row_errors.len(),
        ingest.group_count()
    ));
    out
}

/// Per-descent table plus the best result.
pub fn format_batch(batch: &BatchOutcome, model: &dyn ForwardModel) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "\nDescents: {} of {} requested{}\n",
        batch.descents.len(),
        batch.requested,
        if batch.stopped_early { " (stopped on resource limit)" } else { "" }
    ));
    out.push_str(
        format!(
            "  {:>3} {:>14} {:<5} {:<14} {:>5} {:>5}  {}",
            "#", "objective", "valid", "stop", "steps", "bumps", "parameters"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(&format!(
        "  {:-<3} {:-<14} {:-<5} {:-<14} {:-<5} {:-<5}  {:-<10}\n",
        "", "", "", "", "", "", ""
    ));

    for d in &batch.descents {
        let chosen = if batch.best == Some(d.index) { "*" } else { " " };
        out.push_str(&format_descent_row(chosen, d, model));
        out.push('\n');
    }

    out.push_str("\nBest:\n");
    match batch.best_descent() {
        Some(best) => {
            out.push_str(&format!("- descent {} objective {:.4}\n", best.index, best.objective));
            out.push_str(&format!("- {}\n", model.format_report(&best.params)));
            out.push_str(&format!("- linear: {}\n", fmt_linear(best)));
        }
        None => out.push_str("- no valid descent\n"),
    }
    out
}

/// Summary when the run directory already holds a finished batch.
pub fn format_skipped(checkpoint: &Checkpoint) -> String {
    format!(
        "\nBatch already complete ({} of {} descents); nothing recomputed.\n",
        checkpoint.last_completed + 1,
        checkpoint.total
    )
}

fn format_descent_row(chosen: &str, d: &DescentOutcome, model: &dyn ForwardModel) -> String {
    format!(
        "{chosen} {:>3} {:>14.4} {:<5} {:<14} {:>5} {:>5}  {}",
        d.index,
        d.raw_objective,
        if d.valid { "yes" } else { "no" },
        d.termination.label(),
        d.steps,
        d.bumps,
        model.format_report(&d.params)
    )
}

fn fmt_linear(d: &DescentOutcome) -> String {
    let parts: Vec<String> = d
        .linear
        .iter()
        .enumerate()
        .map(|(g, lc)| format!("g{g}: offset={:.4} scale={:.4}", lc.offset, lc.scale))
        .collect();
    parts.join(" | ")
}
