//! Derived coverage statistics.
//!
//! The parser feeds raw attribute values in; the tallies here own the
//! bookkeeping that turns them into [`FileCoverage`] and [`MethodRecord`]
//! values whose counters always agree with their line lists.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{percentage, BranchInfo, CoverageSummary, FileCoverage, LineRecord, MethodRecord};

/// Pre-compiled regex for the whole of a condition-coverage value, e.g. "75% (3/4)".
static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+(?:\.\d+)?%\s+\((\d+)/(\d+)\)\s*$").expect("valid regex")
});

/// Parse a condition-coverage value of the form `"<pct>% (<covered>/<total>)"`.
///
/// The percentage is recomputed from the fraction rather than taken from the
/// text. Anything that does not match the shape exactly, or whose covered
/// count exceeds its total, yields `None`.
#[must_use]
pub fn parse_condition_coverage(value: &str) -> Option<BranchInfo> {
    let caps = CONDITION_RE.captures(value)?;
    let covered: u32 = caps[1].parse().ok()?;
    let total: u32 = caps[2].parse().ok()?;
    BranchInfo::new(covered, total)
}

/// Parse a rate attribute (a fraction in `[0, 1]`) as a percentage.
/// Missing or unparsable values are 0.
#[must_use]
pub fn rate_percentage(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v * 100.0)
        .unwrap_or(0.0)
}

/// Parse an integer counter attribute, defaulting to 0.
#[must_use]
pub fn counter<T: std::str::FromStr + Default>(value: Option<&str>) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or_default()
}

/// Build the report-level summary from the root element's attributes.
#[must_use]
pub fn summary_from_attributes(attrs: &HashMap<String, String>) -> CoverageSummary {
    let get = |key: &str| attrs.get(key).map(String::as_str);
    CoverageSummary {
        line_coverage: rate_percentage(get("line-rate")),
        branch_coverage: rate_percentage(get("branch-rate")),
        covered_lines: counter(get("lines-covered")),
        total_lines: counter(get("lines-valid")),
        covered_branches: counter(get("branches-covered")),
        total_branches: counter(get("branches-valid")),
    }
}

/// Accumulates the lines of one method while it is open.
#[derive(Debug)]
pub struct MethodTally {
    name: String,
    signature: String,
    line_coverage: f64,
    complexity: u32,
    span: Option<(u32, u32)>,
}

impl MethodTally {
    pub fn new(name: String, signature: String, line_coverage: f64, complexity: u32) -> Self {
        Self {
            name,
            signature,
            line_coverage,
            complexity,
            span: None,
        }
    }

    /// Widen the method's span to include `line`.
    pub fn observe_line(&mut self, line: u32) {
        self.span = Some(match self.span {
            Some((start, end)) => (start.min(line), end.max(line)),
            None => (line, line),
        });
    }

    #[must_use]
    pub fn finish(self) -> MethodRecord {
        let (start_line, end_line) = self.span.unwrap_or((0, 0));
        MethodRecord {
            name: self.name,
            signature: self.signature,
            line_coverage: self.line_coverage,
            start_line,
            end_line,
            complexity: self.complexity,
        }
    }
}

/// Accumulates the lines and methods of one file entry.
///
/// Generators list a line both under its method and under the class, so
/// lines are de-duplicated by number, keeping the highest hit count. Branch
/// information comes from the first occurrence that carries a condition.
#[derive(Debug)]
pub struct FileTally {
    path: String,
    lines: Vec<LineRecord>,
    index: HashMap<u32, usize>,
    methods: Vec<MethodRecord>,
}

impl FileTally {
    pub fn new(path: String) -> Self {
        Self {
            path,
            lines: Vec::new(),
            index: HashMap::new(),
            methods: Vec::new(),
        }
    }

    /// Record one `<line>` entry. `condition` is the raw condition-coverage
    /// attribute, if present.
    pub fn record_line(&mut self, number: u32, hits: u64, condition: Option<&str>) {
        let condition = condition.map(str::trim).filter(|c| !c.is_empty());

        if let Some(&idx) = self.index.get(&number) {
            let line = &mut self.lines[idx];
            line.hits = line.hits.max(hits);
            if let Some(cond) = condition {
                if line.branch.is_none() {
                    line.branch = parse_condition_coverage(cond);
                }
                line.is_branch = true;
            }
            return;
        }

        self.index.insert(number, self.lines.len());
        self.lines.push(LineRecord {
            number,
            hits,
            is_branch: condition.is_some(),
            branch: condition.and_then(parse_condition_coverage),
        });
    }

    pub fn push_method(&mut self, method: MethodRecord) {
        self.methods.push(method);
    }

    /// Finalize the file. Files without any recorded line carry no signal
    /// and yield `None`.
    #[must_use]
    pub fn finish(mut self) -> Option<FileCoverage> {
        if self.lines.is_empty() {
            return None;
        }
        self.lines.sort_by_key(|l| l.number);

        let total_lines = self.lines.len() as u64;
        let uncovered_lines: Vec<u32> = self
            .lines
            .iter()
            .filter(|l| !l.is_covered())
            .map(|l| l.number)
            .collect();
        let covered_lines = total_lines - uncovered_lines.len() as u64;

        let (covered_branches, total_branches) = self
            .lines
            .iter()
            .filter_map(|l| l.branch)
            .fold((0u64, 0u64), |(c, t), b| {
                (c + u64::from(b.covered), t + u64::from(b.total))
            });

        Some(FileCoverage {
            path: self.path,
            line_coverage: percentage(covered_lines, total_lines),
            branch_coverage: percentage(covered_branches, total_branches),
            covered_lines,
            total_lines,
            covered_branches,
            total_branches,
            uncovered_lines,
            lines: self.lines,
            methods: self.methods,
        })
    }
}
