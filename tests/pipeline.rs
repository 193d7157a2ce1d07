mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{output, FakeRunner};
use covwatch::pipeline::{PipelineOrchestrator, RunOutcome, RunState, Trigger};

#[tokio::test]
async fn successful_run_publishes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let orchestrator = PipelineOrchestrator::new(common::config(root), FakeRunner::passing());

    let outcome = orchestrator.run_once(Trigger::Startup).await;
    let report = outcome.report().expect("run should succeed");
    assert_eq!(report.run_id, common::run_dir_name(0));
    assert_eq!(report.files.len(), 2);

    let json: serde_json::Value =
        serde_json::from_slice(&fs::read(common::snapshot_path(root)).unwrap()).unwrap();
    assert_eq!(json["testRunId"], common::run_dir_name(0));
    assert_eq!(json["summary"]["coveredLines"], 7);

    let run = orchestrator.current_run();
    assert_eq!(run.state, RunState::Succeeded);
    assert_eq!(run.trigger, Some(Trigger::Startup));
    assert!(run.started_at.is_some());
}

#[tokio::test]
async fn build_failure_skips_tests_and_publish() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let runner = FakeRunner::passing().with_build(output(1, "error CS1002: ; expected"));
    let orchestrator = PipelineOrchestrator::new(common::config(root), runner);

    let outcome = orchestrator.run_once(Trigger::Startup).await;
    match outcome {
        RunOutcome::Failed { reason, failures } => {
            assert!(reason.contains("build failed"), "{reason}");
            assert!(failures.is_empty());
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!common::snapshot_path(root).exists());
    assert_eq!(orchestrator.current_run().state, RunState::Failed);
}

#[tokio::test]
async fn build_failure_runs_no_test_command() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::passing().with_build(output(1, "")));
    let orchestrator =
        PipelineOrchestrator::new(common::config(dir.path()), Arc::clone(&runner));

    orchestrator.run_once(Trigger::Startup).await;
    assert_eq!(runner.calls(), vec!["build"]);
}

#[tokio::test]
async fn test_failure_reports_failing_tests() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let stdout = "\
  Failed MyTests.Add_Test [12ms]
  Error Message:
   Assert.Equal() Failure: Expected 8, Actual 9
  Stack Trace:
     at MyTests.Add_Test() in /src/MyTests.cs:line 14
";
    let runner = FakeRunner::passing().with_test(output(1, stdout));
    let orchestrator = PipelineOrchestrator::new(common::config(root), runner);

    match orchestrator.run_once(Trigger::Startup).await {
        RunOutcome::Failed { reason, failures } => {
            assert!(reason.contains("tests failed"), "{reason}");
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].test_name, "MyTests.Add_Test");
            assert_eq!(
                failures[0].failure_reason,
                "Assert.Equal() Failure: Expected 8, Actual 9"
            );
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!common::snapshot_path(root).exists());
}

#[tokio::test]
async fn missing_report_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let orchestrator =
        PipelineOrchestrator::new(common::config(root), FakeRunner::passing().without_report());

    match orchestrator.run_once(Trigger::Startup).await {
        RunOutcome::Failed { reason, .. } => assert_eq!(reason, "no coverage report found"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn stale_report_is_not_published() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let old = root.join("TestResults").join(common::run_dir_name(99));
    fs::create_dir_all(&old).unwrap();
    let report = old.join("coverage.cobertura.xml");
    fs::write(&report, common::FIXTURE).unwrap();
    common::set_mtime(&report, Duration::from_secs(3600));

    let orchestrator =
        PipelineOrchestrator::new(common::config(root), FakeRunner::passing().without_report());
    let outcome = orchestrator.run_once(Trigger::Startup).await;

    assert!(!outcome.is_success());
    assert!(!common::snapshot_path(root).exists());
}

#[tokio::test]
async fn unparsable_report_fails_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let runner = FakeRunner::passing().with_report(b"<html>not coverage</html>");
    let orchestrator = PipelineOrchestrator::new(common::config(root), runner);

    match orchestrator.run_once(Trigger::Startup).await {
        RunOutcome::Failed { reason, .. } => {
            assert!(reason.starts_with("could not parse coverage report"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!common::snapshot_path(root).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn prune_keeps_most_recent_result_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let results = root.join("TestResults");
    for i in 0..7u64 {
        let old = results.join(format!("old-{i}"));
        fs::create_dir_all(&old).unwrap();
        // old-0 is the oldest.
        common::set_mtime(&old, Duration::from_secs(3600 * (10 - i)));
    }

    let orchestrator = PipelineOrchestrator::new(common::config(root), FakeRunner::passing());
    assert!(orchestrator.run_once(Trigger::Startup).await.is_success());

    let mut remaining: Vec<String> = fs::read_dir(&results)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    remaining.sort();
    assert_eq!(
        remaining,
        vec![
            common::run_dir_name(0),
            "old-3".to_string(),
            "old-4".to_string(),
            "old-5".to_string(),
            "old-6".to_string(),
        ]
    );
    assert!(common::snapshot_path(root).exists());
}

#[tokio::test]
async fn overlapping_triggers_coalesce_into_one_follow_up() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::passing().with_delay(Duration::from_millis(100)));
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        common::config(dir.path()),
        Arc::clone(&runner),
    ));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run_once(Trigger::Startup).await })
    };
    while runner.calls().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(matches!(
        orchestrator.run_once(Trigger::Startup).await,
        RunOutcome::Coalesced
    ));
    assert!(matches!(
        orchestrator.run_once(Trigger::Startup).await,
        RunOutcome::Coalesced
    ));

    let outcome = first.await.unwrap();
    assert!(outcome.is_success());
    // The first run plus exactly one follow-up.
    assert_eq!(runner.calls(), vec!["build", "test", "build", "test"]);

    // Idle again: the next call runs instead of coalescing.
    assert!(orchestrator.run_once(Trigger::Startup).await.is_success());
}
