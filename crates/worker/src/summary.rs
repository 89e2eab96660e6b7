//! End-of-run report.

use std::fmt::Write;

use reelforge_pipeline::orchestrator::RunSummary;
use reelforge_pipeline::registry::StateCounts;

/// Human-readable summary of a run plus the registry totals.
pub fn render(summary: &RunSummary, totals: &StateCounts) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run summary");
    let _ = writeln!(out, "  submitted : {}", summary.submitted);
    let _ = writeln!(out, "  skipped   : {}", summary.skipped);
    let _ = writeln!(out, "  resumed   : {}", summary.resumed);
    let _ = writeln!(out, "  succeeded : {}", summary.succeeded);
    let _ = writeln!(out, "  failed    : {}", summary.failed);
    let _ = writeln!(out, "  timed out : {}", summary.timed_out.len());
    for key in &summary.timed_out {
        let _ = writeln!(out, "    - {key}");
    }
    if summary.poll_errors > 0 {
        let _ = writeln!(out, "  poll errors: {}", summary.poll_errors);
    }
    if summary.cancelled {
        let _ = writeln!(out, "  (cancelled)");
    }
    let _ = write!(
        out,
        "Registry: {} pending, {} running, {} success, {} failed",
        totals.pending, totals.running, totals.success, totals.failed
    );
    out
}
