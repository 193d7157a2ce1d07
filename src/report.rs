//! Human-readable coverage summaries for the log stream.

use std::fmt::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::model::{CoverageReport, FileCoverage};

/// Files at or above this line coverage are considered healthy.
pub const GOOD_THRESHOLD: f64 = 80.0;

/// Files at or above this line coverage (but below [`GOOD_THRESHOLD`]) are
/// flagged, below it they are poor.
pub const FAIR_THRESHOLD: f64 = 50.0;

/// Coarse grade of a file's line coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Good,
    Fair,
    Poor,
}

impl Grade {
    #[must_use]
    pub fn of(line_coverage: f64) -> Self {
        if line_coverage >= GOOD_THRESHOLD {
            Grade::Good
        } else if line_coverage >= FAIR_THRESHOLD {
            Grade::Fair
        } else {
            Grade::Poor
        }
    }

    #[must_use]
    pub fn glyph(self) -> &'static str {
        match self {
            Grade::Good => "✓",
            Grade::Fair => "~",
            Grade::Poor => "✗",
        }
    }
}

/// Overall line (and branch, when present) coverage in one line.
#[must_use]
pub fn format_headline(report: &CoverageReport) -> String {
    let s = &report.summary;
    let mut out = format!(
        "Coverage: {:.1}% lines ({}/{})",
        s.line_coverage, s.covered_lines, s.total_lines
    );
    if s.total_branches > 0 {
        write!(
            out,
            ", {:.1}% branches ({}/{})",
            s.branch_coverage, s.covered_branches, s.total_branches
        )
        .unwrap();
    }
    out
}

/// One line per file, e.g. `✗ Calculator.cs: 40.0% (2/5 lines) uncovered: 3-5`.
#[must_use]
pub fn format_file_line(file: &FileCoverage) -> String {
    let name = Path::new(&file.path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.path.clone());
    let mut out = format!(
        "{} {}: {:.1}% ({}/{} lines)",
        Grade::of(file.line_coverage).glyph(),
        name,
        file.line_coverage,
        file.covered_lines,
        file.total_lines
    );
    if !file.uncovered_lines.is_empty() {
        let instrumentable: Vec<u32> = file.lines.iter().map(|l| l.number).collect();
        write!(
            out,
            " uncovered: {}",
            format_line_ranges(&file.uncovered_lines, &instrumentable)
        )
        .unwrap();
    }
    out
}

/// Files ordered best-covered first, ties by path.
#[must_use]
pub fn files_by_coverage(report: &CoverageReport) -> Vec<&FileCoverage> {
    let mut files: Vec<&FileCoverage> = report.files.iter().collect();
    files.sort_by(|a, b| {
        b.line_coverage
            .total_cmp(&a.line_coverage)
            .then_with(|| a.path.cmp(&b.path))
    });
    files
}

/// Emit the headline and per-file breakdown through `tracing`. Files below
/// [`GOOD_THRESHOLD`] are logged as warnings.
pub fn log_summary(report: &CoverageReport) {
    info!("{}", format_headline(report));
    for file in files_by_coverage(report) {
        let line = format_file_line(file);
        if Grade::of(file.line_coverage) == Grade::Good {
            info!("  {line}");
        } else {
            warn!("  {line}");
        }
    }
}

/// Maximum number of consecutive non-instrumentable lines that can be bridged
/// when coalescing uncovered ranges. Gaps of up to this many lines (where none
/// of the gap lines are instrumentable) are merged into a single range.
const MAX_BRIDGE_GAP: u32 = 2;

/// Coalesce sorted line numbers into `(start, end)` ranges, bridging small
/// gaps where every line in the gap is non-instrumentable.
///
/// Both `lines` and `all_instrumentable` must be sorted and deduplicated.
#[must_use]
pub fn coalesce_ranges(lines: &[u32], all_instrumentable: &[u32]) -> Vec<(u32, u32)> {
    let Some((&first, rest)) = lines.split_first() else {
        return Vec::new();
    };

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    let mut start = first;
    let mut end = first;

    for &line in rest {
        let gap = line - end - 1;
        if gap <= MAX_BRIDGE_GAP
            && (end + 1..line).all(|l| all_instrumentable.binary_search(&l).is_err())
        {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }

    ranges.push((start, end));
    ranges
}

/// Format line numbers into compact range notation, e.g. "1, 3-5, 8".
///
/// The input slice must be sorted in ascending order.
#[must_use]
pub fn format_line_ranges(lines: &[u32], all_instrumentable: &[u32]) -> String {
    coalesce_ranges(lines, all_instrumentable)
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
