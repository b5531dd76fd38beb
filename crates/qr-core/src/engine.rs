//! Worker execution
//!
//! One worker process per project and phase. The engine owns the whole
//! lifecycle of an invocation: configuration export, log tailing, process
//! spawn, wait under cancellation, reaping.

use crate::error::{ProjectFailure, QualificationError};
use crate::log_watcher::{LogSink, LogWatcher, LogWatcherOptions, TracingSink};
use crate::options::{LogLevel, QualificationRunOptions};
use async_trait::async_trait;
use qr_plan::ProjectConfiguration;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Phase a worker is launched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    Validate,
    Run,
}

impl RunMode {
    /// Worker flag selecting the phase
    #[inline]
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Validate => "-v",
            Self::Run => "-r",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validate => "validation",
            Self::Run => "run",
        })
    }
}

/// Outcome of one worker invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub project: String,
    pub mode: RunMode,
    /// Log files handed to the worker, project log first
    pub log_file_paths: Vec<PathBuf>,
    pub config_file: PathBuf,
    pub mapping_file: PathBuf,
    /// Worker exited with code 0
    pub success: bool,
}

impl RunResult {
    /// Project log file
    #[must_use]
    pub fn log_file(&self) -> &Path {
        self.log_file_paths
            .first()
            .map_or_else(|| self.config_file.as_path(), PathBuf::as_path)
    }

    /// Failure record for an unsuccessful invocation
    #[must_use]
    pub fn failure(&self) -> Option<ProjectFailure> {
        (!self.success).then(|| ProjectFailure::new(&self.project, self.log_file(), self.mode))
    }
}

/// Drives the worker for one project
///
/// Implement this trait to run projects some other way than by spawning
/// the worker executable.
#[async_trait]
pub trait ProjectEngine: Send + Sync {
    /// Check once per batch, before any project is launched
    async fn ensure_ready(&self) -> Result<(), QualificationError> {
        Ok(())
    }

    /// Launch the worker for `mode` and wait for it
    async fn execute(
        &self,
        configuration: &ProjectConfiguration,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<RunResult, QualificationError>;

    /// Check a project configuration without running simulations
    async fn validate(
        &self,
        configuration: &ProjectConfiguration,
        cancel: &CancellationToken,
    ) -> Result<RunResult, QualificationError> {
        self.execute(configuration, RunMode::Validate, cancel).await
    }

    /// Run the simulations of a project and export its mapping
    async fn run(
        &self,
        configuration: &ProjectConfiguration,
        cancel: &CancellationToken,
    ) -> Result<RunResult, QualificationError> {
        self.execute(configuration, RunMode::Run, cancel).await
    }
}

/// Engine spawning the external worker executable
pub struct QualificationEngine {
    worker_path: PathBuf,
    log_level: LogLevel,
    poll_interval: Duration,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for QualificationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualificationEngine")
            .field("worker_path", &self.worker_path)
            .field("log_level", &self.log_level)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl QualificationEngine {
    /// Engine for the worker and log settings of `options`
    #[must_use]
    pub fn new(options: &QualificationRunOptions) -> Self {
        Self {
            worker_path: options.worker_path.clone(),
            log_level: options.log_level,
            poll_interval: options.log_poll_interval(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Send worker log entries somewhere other than `tracing`
    #[inline]
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    #[inline]
    #[must_use]
    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }

    /// Fail unless the worker executable exists
    ///
    /// # Errors
    /// `QualificationError::WorkerNotFound`
    pub async fn ensure_worker(&self) -> Result<(), QualificationError> {
        if tokio::fs::try_exists(&self.worker_path).await.unwrap_or(false) {
            Ok(())
        } else {
            Err(QualificationError::WorkerNotFound {
                path: self.worker_path.clone(),
            })
        }
    }

    async fn export_configuration(
        configuration: &ProjectConfiguration,
    ) -> Result<PathBuf, QualificationError> {
        let config_file = configuration.config_file();
        let json = serde_json::to_string_pretty(configuration)
            .map_err(|e| QualificationError::serialization_error(&config_file, e))?;
        tokio::fs::write(&config_file, json)
            .await
            .map_err(|e| QualificationError::io_error(&config_file, e))?;
        debug!(
            project = %configuration.project,
            config_file = %config_file.display(),
            "Exported project configuration"
        );
        Ok(config_file)
    }

    async fn spawn_and_wait(
        &self,
        config_file: &Path,
        log_files: &[PathBuf],
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<bool, QualificationError> {
        if cancel.is_cancelled() {
            return Err(QualificationError::Cancelled);
        }

        let mut command = Command::new(&self.worker_path);
        command
            .arg("qualification")
            .arg("-i")
            .arg(config_file)
            .arg("-l")
            .args(log_files)
            .arg("--logLevel")
            .arg(self.log_level.as_str())
            .arg(mode.flag())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| QualificationError::io_error(&self.worker_path, e))?;

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| QualificationError::io_error(&self.worker_path, e))?;
                debug!(%status, %mode, "Worker exited");
                Ok(status.success())
            }
            () = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Worker already gone");
                }
                Err(QualificationError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl ProjectEngine for QualificationEngine {
    async fn ensure_ready(&self) -> Result<(), QualificationError> {
        self.ensure_worker().await
    }

    async fn execute(
        &self,
        configuration: &ProjectConfiguration,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<RunResult, QualificationError> {
        debug!(project = %configuration.project, %mode, "Starting worker");

        let config_file = Self::export_configuration(configuration).await?;
        self.ensure_worker().await?;

        let log_file_paths = configuration.log_files();
        let mut watcher = LogWatcher::new(
            LogWatcherOptions::new(configuration.log_file(), &configuration.project)
                .with_poll_interval(self.poll_interval),
            Arc::clone(&self.sink),
        );
        watcher.watch().await?;

        let outcome = self
            .spawn_and_wait(&config_file, &log_file_paths, mode, cancel)
            .await;
        watcher.stop().await;

        Ok(RunResult {
            project: configuration.project.clone(),
            mode,
            log_file_paths,
            config_file,
            mapping_file: configuration.mapping_file.clone(),
            success: outcome?,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::log_watcher::MemorySink;
    use qr_test_utils::{write_fake_worker, FakeWorker};

    fn configuration(temp: &Path) -> ProjectConfiguration {
        let temp_folder = temp.join("temp/P1");
        std::fs::create_dir_all(&temp_folder).unwrap();
        serde_json::from_value(serde_json::json!({
            "Project": "P1",
            "OutputFolder": temp,
            "ReportConfigurationFile": temp.join("report.json"),
            "ObservedDataFolder": temp.join("ObservedData"),
            "InputsFolder": temp.join("Inputs"),
            "TempFolder": temp_folder,
            "MappingFile": temp_folder.join("mapping.json"),
            "SnapshotFile": temp.join("p1.json"),
            "BuildingBlocks": [],
            "SimulationParameters": [],
            "SimulationPlots": [],
            "Inputs": [],
            "Simulations": ["S1"]
        }))
        .unwrap()
    }

    fn engine(worker: &Path, sink: &Arc<MemorySink>) -> QualificationEngine {
        let options = QualificationRunOptions::new("plan.json", "out", worker)
            .with_log_poll_interval(Duration::from_millis(20));
        let sink: Arc<dyn LogSink> = sink.clone();
        QualificationEngine::new(&options).with_sink(sink)
    }

    #[tokio::test]
    async fn successful_run_writes_config_and_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let worker = write_fake_worker(dir.path(), &FakeWorker::default());
        let sink = Arc::new(MemorySink::new());
        let config = configuration(dir.path());

        let result = engine(&worker, &sink)
            .run(&config, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.mode, RunMode::Run);
        assert!(result.config_file.exists());
        assert!(result.mapping_file.exists());
        assert_eq!(result.log_file(), config.log_file());
        assert!(result.failure().is_none());

        let entries = sink.entries();
        assert_eq!(entries.first().map(|e| e.message.as_str()), Some("run started for P1"));
        assert_eq!(entries.last().map(|e| e.message.as_str()), Some("run finished for P1"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_unsuccessful() {
        let dir = tempfile::tempdir().unwrap();
        let worker = write_fake_worker(dir.path(), &FakeWorker::failing_validation(&["P1"]));
        let sink = Arc::new(MemorySink::new());

        let result = engine(&worker, &sink)
            .validate(&configuration(dir.path()), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        let failure = result.failure().unwrap();
        assert_eq!(failure.project, "P1");
        assert_eq!(failure.mode, RunMode::Validate);
        assert!(sink
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message == "validate failed for P1"));
    }

    #[tokio::test]
    async fn missing_worker_is_reported_after_config_export() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let config = configuration(dir.path());

        let err = engine(&dir.path().join("PKSim.CLI"), &sink)
            .validate(&config, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, QualificationError::WorkerNotFound { .. }));
        assert!(config.config_file().exists());
    }

    #[tokio::test]
    async fn cancellation_kills_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let worker = write_fake_worker(dir.path(), &FakeWorker::slow(30));
        let sink = Arc::new(MemorySink::new());
        let config = configuration(dir.path());
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                cancel.cancel();
            })
        };

        let started = std::time::Instant::now();
        let err = engine(&worker, &sink).run(&config, &cancel).await.unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!config.mapping_file.exists());
    }
}
