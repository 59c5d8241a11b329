use std::fmt::Write;

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::repro::Outcome;
use crate::source::BugOrigin;
use crate::triage::{TriageEntry, TriageReport, Verdict};

use super::styling::{bright, bright_blue, bright_green, bright_red, dim};

/// Prints a human-readable summary of a triage run to stdout.
///
/// Displays an overview, a color-coded result table, and the
/// reproduced / not-reproduced / failed bug lists.
///
/// Color coding:
/// - Green: crash reproduced (the triage goal)
/// - Blue: attempt completed without reproducing the crash
/// - Yellow: dry run
/// - Red: pipeline or execution failure
pub fn print_summary(report: &TriageReport) {
    println!("{}", render_summary(report));
}

// Helper functions

fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn source_label(entry: &TriageEntry) -> &'static str {
    match entry.bug.origin {
        BugOrigin::External { .. } => "external",
        BugOrigin::Internal { .. } => "internal",
    }
}

fn outcome_cell(entry: &TriageEntry) -> Cell {
    match &entry.verdict {
        Verdict::Completed(result) => match result.outcome {
            Outcome::ReproducedCrash => Cell::new("crash reproduced").fg(TableColor::Green),
            Outcome::NoCrash => Cell::new("no crash").fg(TableColor::Blue),
            Outcome::DryRun => Cell::new("dry run").fg(TableColor::Yellow),
            Outcome::ExecutionError => Cell::new("execution error").fg(TableColor::Red),
        },
        Verdict::Failed { stage, .. } => Cell::new(format!("{stage} failed")).fg(TableColor::Red),
    }
}

/// First line of the entry's capture or failure cause, shortened for the
/// table.
fn detail_line(entry: &TriageEntry) -> String {
    let text = match &entry.verdict {
        Verdict::Completed(result) => &result.output,
        Verdict::Failed { cause, .. } => cause,
    };
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() > 70 {
        let shortened: String = first_line.chars().take(67).collect();
        format!("{shortened}...")
    } else {
        first_line.to_string()
    }
}

fn numbered_list<'a>(
    output: &mut String,
    ids: impl Iterator<Item = &'a str>,
    color: fn(String) -> console::StyledObject<String>,
) {
    for (i, id) in ids.enumerate() {
        let _ = writeln!(output, "  {}", color(format!("{}. {id}", i + 1)));
    }
}

fn render_summary(report: &TriageReport) -> String {
    let mut output = String::new();

    let reproduced: Vec<&TriageEntry> = report
        .entries
        .iter()
        .filter(|e| {
            matches!(
                &e.verdict,
                Verdict::Completed(r) if r.outcome == Outcome::ReproducedCrash
            )
        })
        .collect();
    let not_reproduced: Vec<&TriageEntry> = report
        .entries
        .iter()
        .filter(|e| {
            matches!(
                &e.verdict,
                Verdict::Completed(r)
                    if r.outcome == Outcome::NoCrash || r.outcome == Outcome::DryRun
            )
        })
        .collect();
    let failed: Vec<&TriageEntry> = report
        .entries
        .iter()
        .filter(|e| e.is_failure())
        .collect();

    let _ = writeln!(output);
    add_section_header(&mut output, "📋", "Overview");
    let _ = writeln!(
        output,
        "  Bugs processed: {}  {}",
        bright(report.entries.len()),
        dim(format!(
            "({} reproduced, {} not reproduced, {} failed)",
            reproduced.len(),
            not_reproduced.len(),
            failed.len()
        ))
    );
    let _ = writeln!(output);

    if !report.entries.is_empty() {
        add_section_header(&mut output, "🧪", "Results");
        let mut table = create_table();
        table.set_header(create_cyan_header(&["Bug", "Source", "Outcome", "Details"]));
        for entry in &report.entries {
            table.add_row(vec![
                Cell::new(&entry.bug.id),
                Cell::new(source_label(entry)),
                outcome_cell(entry),
                Cell::new(detail_line(entry)),
            ]);
        }
        let _ = writeln!(output, "{table}");
        let _ = writeln!(output);
    }

    if !failed.is_empty() {
        add_section_header(&mut output, "❌", "Bugs with triage errors");
        numbered_list(
            &mut output,
            failed.iter().map(|e| e.bug.id.as_str()),
            |s| bright_red(s),
        );
        let _ = writeln!(output);
    }

    if !not_reproduced.is_empty() {
        add_section_header(&mut output, "ℹ️", "Bugs not reproduced");
        numbered_list(
            &mut output,
            not_reproduced.iter().map(|e| e.bug.id.as_str()),
            |s| bright_blue(s),
        );
        let _ = writeln!(output);
    }

    if !reproduced.is_empty() {
        add_section_header(&mut output, "💥", "Bugs reproduced");
        numbered_list(
            &mut output,
            reproduced.iter().map(|e| e.bug.id.as_str()),
            |s| bright_green(s),
        );
        let _ = writeln!(output);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repro::ReproductionResult;
    use crate::source::BugReference;
    use crate::triage::Stage;
    use chrono::Utc;

    fn completed(id: &str, outcome: Outcome) -> TriageEntry {
        let bug = BugReference::internal(id, "34afb82a3c67");
        TriageEntry {
            bug: bug.clone(),
            verdict: Verdict::Completed(ReproductionResult {
                bug,
                attempted_at: Utc::now(),
                outcome,
                output: "BUG: KASAN: use-after-free\nsecond line".to_string(),
                dry_run: false,
            }),
        }
    }

    fn report(entries: Vec<TriageEntry>) -> TriageReport {
        TriageReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            entries,
        }
    }

    #[test]
    fn test_render_summary_lists_bugs_by_outcome() {
        let failed = TriageEntry {
            bug: BugReference::external("https://example.com/bug?extid=9"),
            verdict: Verdict::Failed {
                stage: Stage::Fetch,
                cause: "boom".to_string(),
            },
        };
        let rendered = render_summary(&report(vec![
            completed("KERN-48", Outcome::ReproducedCrash),
            completed("KERN-49", Outcome::NoCrash),
            failed,
        ]));

        assert!(rendered.contains("Bugs processed: 3"));
        assert!(rendered.contains("Bugs reproduced"));
        assert!(rendered.contains("Bugs not reproduced"));
        assert!(rendered.contains("Bugs with triage errors"));
        assert!(rendered.contains("KERN-48"));
        assert!(rendered.contains("https://example.com/bug?extid=9"));
    }

    #[test]
    fn test_detail_line_is_first_line_only() {
        let entry = completed("KERN-48", Outcome::ReproducedCrash);
        assert_eq!(detail_line(&entry), "BUG: KASAN: use-after-free");
    }

    #[test]
    fn test_detail_line_shortened() {
        let mut entry = completed("KERN-48", Outcome::NoCrash);
        if let Verdict::Completed(result) = &mut entry.verdict {
            result.output = "y".repeat(200);
        }
        let detail = detail_line(&entry);
        assert!(detail.ends_with("..."));
        assert_eq!(detail.chars().count(), 70);
    }
}
