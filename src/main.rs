use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use covwatch::config::{PipelineConfig, WatchConfig, DEFAULT_RETAIN_COUNT};
use covwatch::locate::find_project_file;
use covwatch::pipeline::{PipelineOrchestrator, Trigger};
use covwatch::process::ProcessRunner;
use covwatch::watch::FileChangeMonitor;

/// covwatch: rebuild, test and publish coverage whenever sources change.
#[derive(Parser, Debug)]
#[command(name = "covwatch", version, about)]
struct Cli {
    /// Directory containing the solution or project to watch.
    target: Option<PathBuf>,

    /// Only run tests matching this filter expression.
    #[arg(long, env = "COVWATCH_FILTER")]
    filter: Option<String>,

    /// Source file extension that triggers a run.
    #[arg(long, env = "COVWATCH_EXTENSION", default_value = "cs")]
    extension: String,

    /// Number of test result directories to keep.
    #[arg(long, env = "COVWATCH_RETAIN", default_value_t = DEFAULT_RETAIN_COUNT)]
    retain: usize,

    /// Kill build or test commands running longer than this.
    #[arg(long, env = "COVWATCH_TIMEOUT_SECS", default_value_t = 600)]
    timeout_secs: u64,

    /// Changes closer together than this are folded into one run.
    #[arg(long, env = "COVWATCH_DEBOUNCE_MS", default_value_t = 500)]
    debounce_ms: u64,

    /// Start watching without building and testing first.
    #[arg(long, env = "COVWATCH_NO_INITIAL_RUN")]
    no_initial_run: bool,
}

impl Cli {
    fn pipeline_config(&self, working_dir: &Path) -> PipelineConfig {
        PipelineConfig::new(working_dir)
            .with_test_filter(self.filter.as_deref())
            .with_retain_count(self.retain)
            .with_command_timeout(Duration::from_secs(self.timeout_secs))
    }

    fn watch_config(&self) -> WatchConfig {
        let debounce = Duration::from_millis(self.debounce_ms);
        WatchConfig::default()
            .with_extension(&self.extension)
            .with_debounce(debounce)
            .with_settle(debounce)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let Some(target) = cli.target.as_deref() else {
        Cli::command().print_help()?;
        return Ok(());
    };
    if !target.is_dir() {
        error!(path = %target.display(), "Target directory does not exist");
        Cli::command().print_help()?;
        return Ok(());
    }
    let target = target
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", target.display()))?;

    let pipeline_config = cli.pipeline_config(&target);
    let Some(project) = find_project_file(&target, &pipeline_config.excluded_segments) else {
        error!(
            path = %target.display(),
            "No .sln or .csproj found, nothing to build"
        );
        return Ok(());
    };
    info!(project = %project.display(), "Found project");

    let runner = ProcessRunner::new(pipeline_config.command_timeout);
    let orchestrator = Arc::new(PipelineOrchestrator::new(pipeline_config, runner));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    if !cli.no_initial_run {
        tokio::select! {
            outcome = orchestrator.run_once(Trigger::Startup) => {
                if !outcome.is_success() {
                    warn!("Initial run failed, watching for changes anyway");
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }

    let mut monitor = FileChangeMonitor::new(cli.watch_config())
        .start(&target)
        .context("Failed to start file watcher")?;

    let mut runs = JoinSet::new();
    loop {
        tokio::select! {
            trigger = monitor.next_trigger() => {
                let Some(trigger) = trigger else { break };
                let orchestrator = Arc::clone(&orchestrator);
                runs.spawn(async move { orchestrator.run_once(trigger).await });
            }
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Pipeline run panicked");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    monitor.stop();
    runs.abort_all();
    while runs.join_next().await.is_some() {}
    Ok(())
}
