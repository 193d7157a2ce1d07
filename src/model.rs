//! Typed, hierarchical coverage model produced by the parser and written out
//! as the published snapshot. Field names serialize in lower camel case, which
//! is the shape editor integrations read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compute a coverage percentage (0–100), returning 0.0 when the total is zero.
#[must_use]
pub fn percentage(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * covered as f64 / total as f64
    }
}

/// Branch outcome for a single line, taken from a `condition-coverage`
/// attribute such as `"50% (1/2)"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub covered: u32,
    pub total: u32,
    pub percentage: f64,
}

impl BranchInfo {
    /// Build from raw counts. Returns `None` when `covered > total`.
    #[must_use]
    pub fn new(covered: u32, total: u32) -> Option<Self> {
        if covered > total {
            return None;
        }
        Some(Self {
            covered,
            total,
            percentage: percentage(covered.into(), total.into()),
        })
    }
}

/// A single instrumented source line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRecord {
    pub number: u32,
    pub hits: u64,
    /// True iff the source line carried a non-empty condition attribute,
    /// even when that attribute could not be parsed into [`BranchInfo`].
    pub is_branch: bool,
    #[serde(
        rename = "branchCoverage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub branch: Option<BranchInfo>,
}

impl LineRecord {
    #[must_use]
    pub fn is_covered(&self) -> bool {
        self.hits > 0
    }
}

/// A method/function entry within a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodRecord {
    pub name: String,
    pub signature: String,
    pub line_coverage: f64,
    /// Lowest line number belonging to the method, 0 when it has none.
    pub start_line: u32,
    /// Highest line number belonging to the method, 0 when it has none.
    pub end_line: u32,
    pub complexity: u32,
}

/// Coverage data for a single source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    pub path: String,
    pub line_coverage: f64,
    pub branch_coverage: f64,
    pub covered_lines: u64,
    pub total_lines: u64,
    pub covered_branches: u64,
    pub total_branches: u64,
    /// Ascending, de-duplicated.
    pub uncovered_lines: Vec<u32>,
    pub lines: Vec<LineRecord>,
    pub methods: Vec<MethodRecord>,
}

/// Whole-report totals, read from the report's root attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub line_coverage: f64,
    pub branch_coverage: f64,
    pub covered_lines: u64,
    pub total_lines: u64,
    pub covered_branches: u64,
    pub total_branches: u64,
}

/// The complete result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "testRunId")]
    pub run_id: String,
    pub summary: CoverageSummary,
    pub files: Vec<FileCoverage>,
}

impl CoverageReport {
    /// Same report with a different run identifier.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_of_empty_total_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(3, 4), 75.0);
    }

    #[test]
    fn branch_info_rejects_covered_above_total() {
        assert!(BranchInfo::new(3, 2).is_none());
        let info = BranchInfo::new(0, 0).unwrap();
        assert_eq!(info.percentage, 0.0);
    }

    #[test]
    fn line_without_branch_omits_branch_coverage() {
        let line = LineRecord {
            number: 4,
            hits: 2,
            is_branch: false,
            branch: None,
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["number"], 4);
        assert_eq!(json["isBranch"], false);
        assert!(json.get("branchCoverage").is_none());
    }

    #[test]
    fn report_serializes_snapshot_field_names() {
        let report = CoverageReport {
            timestamp: Utc::now(),
            run_id: "abc".to_string(),
            summary: CoverageSummary::default(),
            files: vec![FileCoverage {
                path: "src/Calc.cs".to_string(),
                line_coverage: 50.0,
                branch_coverage: 0.0,
                covered_lines: 1,
                total_lines: 2,
                covered_branches: 0,
                total_branches: 0,
                uncovered_lines: vec![8],
                lines: vec![],
                methods: vec![MethodRecord {
                    name: "Add".to_string(),
                    signature: "(int,int)".to_string(),
                    line_coverage: 100.0,
                    start_line: 7,
                    end_line: 8,
                    complexity: 1,
                }],
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["testRunId"], "abc");
        assert!(json["summary"].get("lineCoverage").is_some());
        assert!(json["summary"].get("coveredBranches").is_some());
        let file = &json["files"][0];
        assert_eq!(file["uncoveredLines"][0], 8);
        assert_eq!(file["methods"][0]["startLine"], 7);
        assert_eq!(file["methods"][0]["endLine"], 8);
    }
}
