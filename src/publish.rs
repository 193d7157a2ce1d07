//! Publishing the coverage snapshot and pruning old result directories.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::locate::ArtifactLocator;
use crate::model::CoverageReport;

/// Writes the JSON snapshot consumed by editor integrations into the results
/// root under `root`, and keeps that directory from growing without bound.
#[derive(Debug, Clone)]
pub struct ResultPublisher {
    root: PathBuf,
    locator: ArtifactLocator,
    snapshot_file_name: String,
}

impl ResultPublisher {
    pub fn new(root: impl Into<PathBuf>, locator: ArtifactLocator, snapshot_file_name: &str) -> Self {
        Self {
            root: root.into(),
            locator,
            snapshot_file_name: snapshot_file_name.to_string(),
        }
    }

    /// Replace the snapshot with `report`.
    ///
    /// The document is written to a temporary file beside the target and
    /// renamed over it, so readers see either the previous snapshot or the
    /// new one in full. Returns the snapshot path, or `None` when there is no
    /// results directory to publish into yet.
    pub fn publish(&self, report: &CoverageReport) -> Result<Option<PathBuf>> {
        let Some(results_root) = self.locator.results_root(&self.root) else {
            info!(
                root = %self.root.display(),
                "No TestResults directory yet, skipping snapshot"
            );
            return Ok(None);
        };
        let target = results_root.join(&self.snapshot_file_name);

        let json = serde_json::to_vec_pretty(report)?;
        let mut tmp = NamedTempFile::new_in(&results_root)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target)?;

        debug!(path = %target.display(), files = report.files.len(), "Coverage snapshot written");
        Ok(Some(target))
    }

    /// Delete all but the `retain_count` most recently modified
    /// subdirectories of the results root. Best effort: failures are logged
    /// and skipped. Returns how many directories were removed.
    pub fn prune(&self, retain_count: usize) -> usize {
        let Some(results_root) = self.locator.results_root(&self.root) else {
            return 0;
        };

        let mut dirs = match subdirectories_by_age(&results_root) {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(path = %results_root.display(), error = %e, "Could not list result directories");
                return 0;
            }
        };
        // Newest first.
        dirs.sort_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for (_, dir) in dirs.into_iter().skip(retain_count) {
            debug!(path = %dir.display(), "Removing old test results");
            match fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %dir.display(), error = %e, "Could not remove old test results"),
            }
        }
        removed
    }
}

fn subdirectories_by_age(dir: &Path) -> std::io::Result<Vec<(SystemTime, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            dirs.push((metadata.modified()?, entry.path()));
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoverageSummary;
    use chrono::Utc;

    fn publisher(root: &Path) -> ResultPublisher {
        ResultPublisher::new(
            root,
            ArtifactLocator::new(vec!["bin".into(), "obj".into()]),
            "latest-coverage.json",
        )
    }

    fn report(run_id: &str) -> CoverageReport {
        CoverageReport {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            summary: CoverageSummary::default(),
            files: vec![],
        }
    }

    #[test]
    fn test_publish_without_results_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let written = publisher(dir.path()).publish(&report("a")).unwrap();
        assert!(written.is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_publish_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("TestResults")).unwrap();
        let publisher = publisher(dir.path());

        let first = publisher.publish(&report("first")).unwrap().unwrap();
        let second = publisher.publish(&report("second")).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(second, dir.path().join("TestResults/latest-coverage.json"));

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&second).unwrap()).unwrap();
        assert_eq!(json["testRunId"], "second");

        // No temporary files left behind.
        let names: Vec<_> = fs::read_dir(dir.path().join("TestResults"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("latest-coverage.json")]);
    }

    #[test]
    fn test_prune_keeps_everything_under_retain_count() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            fs::create_dir_all(dir.path().join("TestResults").join(name)).unwrap();
        }
        fs::write(dir.path().join("TestResults/latest-coverage.json"), "{}").unwrap();

        assert_eq!(publisher(dir.path()).prune(5), 0);
        assert_eq!(publisher(dir.path()).prune(2), 1);
        let dirs = fs::read_dir(dir.path().join("TestResults"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_dir())
            .count();
        assert_eq!(dirs, 2);
        assert!(dir.path().join("TestResults/latest-coverage.json").exists());
    }

    #[test]
    fn test_prune_without_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(publisher(dir.path()).prune(5), 0);
    }
}
