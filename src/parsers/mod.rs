pub mod cobertura;

use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::CoverageReport;

/// Every report format parser implements this trait.
pub trait Parser {
    /// Parse the input bytes into the coverage model.
    fn parse(&self, input: &[u8]) -> Result<CoverageReport>;
}

/// Read and parse a report file, stamping it with `run_id`.
///
/// Unreadable files and document-level failures are logged and yield
/// `None`; attribute-level problems never reach this far.
pub fn parse_file(parser: &dyn Parser, path: &Path, run_id: &str) -> Option<CoverageReport> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read coverage report");
            return None;
        }
    };

    match parser.parse(&content) {
        Ok(report) => {
            debug!(
                path = %path.display(),
                files = report.files.len(),
                "Parsed coverage report"
            );
            Some(report.with_run_id(run_id))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not parse coverage report");
            None
        }
    }
}
