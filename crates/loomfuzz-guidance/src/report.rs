//! Format the end-of-session report for human consumption.

use crate::guidance::SessionSummary;
use std::path::Path;

/// Render the final campaign report.
pub fn format_report(summary: &SessionSummary, failures_dir: &Path) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  loomfuzz Campaign Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!("Elapsed:                {}s\n", summary.elapsed_secs));
    output.push_str(&format!("Total executions:       {}\n", summary.total_execs));
    output.push_str(&format!("Valid executions:       {}\n", summary.valid_execs));
    output.push_str(&format!("Invalid executions:     {}\n", summary.invalid_execs));
    output.push_str(&format!("Corpus size:            {}\n", summary.corpus_size));
    output.push('\n');

    output.push_str("─── Coverage ──────────────────────────────────────────────────────────\n");
    output.push_str(&format!("Covered branches:       {}\n", summary.covered_branches));
    output.push_str(&format!("Diversity H1:           {:.2}\n", summary.h1));
    output.push_str(&format!("Diversity H2:           {:.2}\n", summary.h2));
    output.push('\n');

    if summary.unique_failures > 0 {
        output.push_str("─── Failures ──────────────────────────────────────────────────────────\n");
        output.push_str(&format!(
            "{} inputs failed ({} failing executions in total).\n",
            summary.unique_failures, summary.failed_execs
        ));
        output.push_str(&format!(
            "Failing inputs and stack traces are under: {}\n",
            failures_dir.display()
        ));
    } else {
        output.push_str("─── No Failures ───────────────────────────────────────────────────────\n");
        output.push_str("No unexpected errors observed.\n");
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output
}
