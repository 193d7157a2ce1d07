//! Discovery of result directories and the newest coverage report in them.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{is_excluded, RESULTS_DIR_NAME};

/// A located coverage report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub path: PathBuf,
    /// Name of the containing directory when it is a UUID, otherwise empty.
    pub run_id: String,
    pub modified: SystemTime,
}

/// Finds `TestResults` directories and the reports inside them, skipping
/// build-output subtrees.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    excluded_segments: Vec<String>,
}

impl ArtifactLocator {
    pub fn new(excluded_segments: Vec<String>) -> Self {
        Self { excluded_segments }
    }

    /// All results directories under `root`, shallowest first and then by
    /// path. Nested results directories are not descended into.
    #[must_use]
    pub fn results_dirs(&self, root: &Path) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let mut walker = WalkDir::new(root).into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if is_excluded(entry.path(), root, &self.excluded_segments) {
                walker.skip_current_dir();
                continue;
            }
            if entry.file_name() == RESULTS_DIR_NAME {
                dirs.push((entry.depth(), entry.into_path()));
                walker.skip_current_dir();
            }
        }

        dirs.sort();
        dirs.into_iter().map(|(_, path)| path).collect()
    }

    /// The results directory snapshots are published to and pruned in.
    #[must_use]
    pub fn results_root(&self, root: &Path) -> Option<PathBuf> {
        self.results_dirs(root).into_iter().next()
    }

    /// The most recently modified `report_file_name` in any results
    /// directory under `root`. Equal modification times resolve to the
    /// greater path so the choice is stable.
    #[must_use]
    pub fn find_latest(&self, root: &Path, report_file_name: &str) -> Option<ReportArtifact> {
        let mut newest: Option<(SystemTime, PathBuf)> = None;

        for dir in self.results_dirs(root) {
            for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() || entry.file_name() != report_file_name {
                    continue;
                }
                let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok())
                else {
                    continue;
                };
                let candidate = (modified, entry.into_path());
                if newest.as_ref().map_or(true, |best| candidate > *best) {
                    newest = Some(candidate);
                }
            }
        }

        newest.map(|(modified, path)| {
            let run_id = run_id_for(&path);
            ReportArtifact {
                path,
                run_id,
                modified,
            }
        })
    }
}

/// A solution file directly in `root`, or else a project file anywhere below
/// it outside excluded subtrees.
#[must_use]
pub fn find_project_file(root: &Path, excluded_segments: &[String]) -> Option<PathBuf> {
    let has_extension = |path: &Path, ext: &str| {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    };

    let solution = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, "sln"))
        .min();
    if solution.is_some() {
        return solution;
    }

    let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_dir() {
            if is_excluded(entry.path(), root, excluded_segments) {
                walker.skip_current_dir();
            }
            continue;
        }
        if has_extension(entry.path(), "csproj") {
            return Some(entry.into_path());
        }
    }
    None
}

/// Run identifier for a report: its parent directory's name iff that name is
/// a well-formed UUID.
#[must_use]
pub fn run_id_for(report: &Path) -> String {
    report
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .filter(|name| Uuid::parse_str(name).is_ok())
        .map(str::to_string)
        .unwrap_or_default()
}
