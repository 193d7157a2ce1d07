//! Runtime configuration for the monitor and the pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name the test tooling writes its results under.
pub const RESULTS_DIR_NAME: &str = "TestResults";

/// Report file produced by the coverage collector.
pub const REPORT_FILE_NAME: &str = "coverage.cobertura.xml";

/// Snapshot written for editor integrations.
pub const SNAPSHOT_FILE_NAME: &str = "latest-coverage.json";

/// Default number of result directories kept by pruning.
pub const DEFAULT_RETAIN_COUNT: usize = 5;

/// Build-output path segments that are never watched or searched.
pub const DEFAULT_EXCLUDED_SEGMENTS: &[&str] = &["bin", "obj"];

/// True when any component of `path` below `root` is an excluded segment.
///
/// Only the part of the path under `root` is inspected, so a watch root that
/// itself lives under e.g. `/home/me/bin/` is still usable.
#[must_use]
pub fn is_excluded(path: &Path, root: &Path, excluded: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| excluded.iter().any(|e| e == s))
    })
}

/// Configuration for [`crate::watch::FileChangeMonitor`].
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Source-file extension to react to, without the dot.
    pub extension: String,
    /// Path segments whose subtrees are ignored.
    pub excluded_segments: Vec<String>,
    /// Events closer than this to the last accepted one are coalesced.
    pub debounce: Duration,
    /// Delay between accepting an event and firing its trigger.
    pub settle: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extension: "cs".to_string(),
            excluded_segments: DEFAULT_EXCLUDED_SEGMENTS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            debounce: Duration::from_millis(500),
            settle: Duration::from_millis(500),
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// One external command: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Rendered for log lines.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Configuration for [`crate::pipeline::PipelineOrchestrator`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory every command runs in and every search starts from.
    pub working_dir: PathBuf,
    pub build: CommandSpec,
    pub test: CommandSpec,
    pub report_file_name: String,
    pub snapshot_file_name: String,
    pub excluded_segments: Vec<String>,
    /// Result directories kept after each run.
    pub retain_count: usize,
    /// Upper bound on any single external command.
    pub command_timeout: Duration,
}

impl PipelineConfig {
    /// Defaults for a `dotnet` solution rooted at `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let test = default_test_command(&working_dir, None);
        Self {
            working_dir,
            build: CommandSpec::new("dotnet", ["build", "--verbosity", "quiet"]),
            test,
            report_file_name: REPORT_FILE_NAME.to_string(),
            snapshot_file_name: SNAPSHOT_FILE_NAME.to_string(),
            excluded_segments: DEFAULT_EXCLUDED_SEGMENTS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            retain_count: DEFAULT_RETAIN_COUNT,
            command_timeout: Duration::from_secs(600),
        }
    }

    /// Restrict the test command to tests matching `filter`.
    #[must_use]
    pub fn with_test_filter(mut self, filter: Option<&str>) -> Self {
        self.test = default_test_command(&self.working_dir, filter);
        self
    }

    #[must_use]
    pub fn with_retain_count(mut self, retain_count: usize) -> Self {
        self.retain_count = retain_count;
        self
    }

    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_build(mut self, build: CommandSpec) -> Self {
        self.build = build;
        self
    }

    #[must_use]
    pub fn with_test(mut self, test: CommandSpec) -> Self {
        self.test = test;
        self
    }
}

fn default_test_command(working_dir: &Path, filter: Option<&str>) -> CommandSpec {
    let results_dir = working_dir.join(RESULTS_DIR_NAME);
    let mut args = vec![
        "test".to_string(),
        "--no-build".to_string(),
        "--collect".to_string(),
        "XPlat Code Coverage".to_string(),
        "--results-directory".to_string(),
        results_dir.to_string_lossy().into_owned(),
    ];
    if let Some(filter) = filter.filter(|f| !f.is_empty()) {
        args.push("--filter".to_string());
        args.push(filter.to_string());
    }
    CommandSpec::new("dotnet", args)
}
