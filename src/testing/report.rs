//! Test outcomes and the run summary

use std::time::Duration;

use colored::Colorize;
use serde::{Serialize, Serializer};

use crate::common::Result;

/// How a single test ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Skipped,
    /// Fixtures could not be built, the connection broke, or the test timed out
    InfrastructureError,
}

impl OutcomeStatus {
    /// Short label used in progress lines
    pub fn label(self) -> &'static str {
        match self {
            OutcomeStatus::Passed => "PASS",
            OutcomeStatus::Failed => "FAIL",
            OutcomeStatus::Skipped => "SKIP",
            OutcomeStatus::InfrastructureError => "ERROR",
        }
    }

    pub fn colored_label(self) -> colored::ColoredString {
        match self {
            OutcomeStatus::Passed => self.label().green().bold(),
            OutcomeStatus::Failed => self.label().red().bold(),
            OutcomeStatus::Skipped => self.label().yellow(),
            OutcomeStatus::InfrastructureError => self.label().magenta().bold(),
        }
    }
}

/// Result of one test invocation
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub id: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

impl TestOutcome {
    pub fn new(id: impl Into<String>, status: OutcomeStatus, detail: Option<String>) -> Self {
        Self {
            id: id.into(),
            status,
            detail,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

/// Outcomes of a run, in execution order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub outcomes: Vec<TestOutcome>,
}

impl Report {
    pub fn push(&mut self, outcome: TestOutcome) {
        self.outcomes.push(outcome);
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(OutcomeStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(OutcomeStatus::Skipped)
    }

    pub fn errored(&self) -> usize {
        self.count(OutcomeStatus::InfrastructureError)
    }

    /// No failures and no infrastructure errors; skips do not count against a run
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.errored() == 0
    }

    pub fn print_summary(&self) {
        let mut line = format!(
            "{} {}  {} {}",
            "Passed:".green().bold(),
            self.passed(),
            "Failed:".red().bold(),
            self.failed()
        );
        if self.errored() > 0 {
            line.push_str(&format!("  {} {}", "Errors:".magenta().bold(), self.errored()));
        }
        if self.skipped() > 0 {
            line.push_str(&format!("  {} {}", "Skipped:".yellow(), self.skipped()));
        }
        println!("\n{}", line);

        for outcome in self
            .outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Failed | OutcomeStatus::InfrastructureError))
        {
            println!(
                "  {} {}: {}",
                outcome.status.colored_label(),
                outcome.id,
                outcome.detail.as_deref().unwrap_or("").dimmed()
            );
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Align `rows` into columns separated by a single space
///
/// Each cell is padded with `fill` to the widest cell of its column. With
/// a space fill, trailing padding is dropped.
pub fn format_table(rows: &[Vec<String>], header: Option<&[&str]>, fill: char) -> Vec<String> {
    let header_row: Option<Vec<String>> =
        header.map(|h| h.iter().map(|s| s.to_string()).collect());
    let all: Vec<&Vec<String>> = header_row.iter().chain(rows.iter()).collect();

    let columns = all.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in &all {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    all.iter()
        .map(|row| {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let pad = widths[i] - cell.chars().count();
                    let mut padded = cell.clone();
                    padded.extend(std::iter::repeat(fill).take(pad));
                    padded
                })
                .collect();
            let line = cells.join(" ");
            if fill == ' ' {
                line.trim_end().to_string()
            } else {
                line
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_format_table_pads_columns() {
        let table = format_table(
            &rows(&[&["wl_seat", "7"], &["xdg_wm_base", "5"]]),
            Some(&["interface", "version"]),
            ' ',
        );
        assert_eq!(
            table,
            vec![
                "interface   version",
                "wl_seat     7",
                "xdg_wm_base 5",
            ]
        );
    }

    #[test]
    fn test_format_table_fill_char() {
        let table = format_table(&rows(&[&["a", "x"], &["abc", "y"]]), None, '.');
        assert_eq!(table, vec!["a.. x", "abc y"]);
        assert!(format_table(&[], None, ' ').is_empty());
    }

    #[test]
    fn test_report_counts() {
        let mut report = Report::default();
        report.push(TestOutcome::new("a", OutcomeStatus::Passed, None));
        report.push(TestOutcome::new("b", OutcomeStatus::Skipped, Some("no seat".into())));
        assert!(report.is_success());

        report.push(TestOutcome::new("c", OutcomeStatus::InfrastructureError, None));
        assert!(!report.is_success());
        assert_eq!((report.passed(), report.skipped(), report.errored()), (1, 1, 1));
    }

    #[test]
    fn test_report_json() {
        let mut report = Report::default();
        report.push(
            TestOutcome::new("wlroots.mouse_click", OutcomeStatus::Failed, Some("no button".into()))
                .with_elapsed(Duration::from_millis(1500)),
        );
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let outcome = &value["outcomes"][0];
        assert_eq!(outcome["status"], "failed");
        assert_eq!(outcome["elapsed_ms"], 1500);
        assert_eq!(outcome["detail"], "no button");
    }
}
