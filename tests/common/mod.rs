#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use covwatch::config::{CommandSpec, PipelineConfig};
use covwatch::process::{CommandRunner, ProcessOutput};

pub const FIXTURE: &[u8] = include_bytes!("../fixtures/coverlet.cobertura.xml");

/// Scripted stand-in for the build and test tools.
///
/// Commands are told apart by their first argument (`build` or `test`). A
/// passing test step can drop a report into a fresh run directory, the way
/// the coverage collector does.
pub struct FakeRunner {
    calls: Mutex<Vec<String>>,
    build: ProcessOutput,
    test: ProcessOutput,
    report: Option<&'static [u8]>,
    delay: Duration,
    runs: AtomicUsize,
}

impl FakeRunner {
    pub fn passing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            build: output(0, ""),
            test: output(0, "Passed!  - Failed: 0, Passed: 6"),
            report: Some(FIXTURE),
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn with_build(mut self, build: ProcessOutput) -> Self {
        self.build = build;
        self
    }

    pub fn with_test(mut self, test: ProcessOutput) -> Self {
        self.test = test;
        self
    }

    pub fn with_report(mut self, report: &'static [u8]) -> Self {
        self.report = Some(report);
        self
    }

    pub fn without_report(mut self) -> Self {
        self.report = None;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Steps invoked so far, e.g. `["build", "test"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &CommandSpec, working_dir: &Path) -> ProcessOutput {
        let step = command.args.first().cloned().unwrap_or_default();
        self.calls.lock().unwrap().push(step.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match step.as_str() {
            "build" => self.build.clone(),
            "test" => {
                if self.test.success() {
                    if let Some(report) = self.report {
                        let n = self.runs.fetch_add(1, Ordering::SeqCst);
                        let dir = working_dir.join("TestResults").join(run_dir_name(n));
                        fs::create_dir_all(&dir).unwrap();
                        fs::write(dir.join("coverage.cobertura.xml"), report).unwrap();
                    }
                }
                self.test.clone()
            }
            other => panic!("unexpected command {other}"),
        }
    }
}

pub fn output(exit_code: i32, stdout: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// UUID-shaped directory name for the `n`th fake run.
pub fn run_dir_name(n: usize) -> String {
    format!("00000000-0000-4000-8000-{n:012}")
}

pub fn config(root: &Path) -> PipelineConfig {
    PipelineConfig::new(root)
}

pub fn snapshot_path(root: &Path) -> PathBuf {
    root.join("TestResults").join("latest-coverage.json")
}

/// Backdate a file or directory.
pub fn set_mtime(path: &Path, age: Duration) {
    let when = SystemTime::now() - age;
    fs::File::open(path).unwrap().set_modified(when).unwrap();
}
