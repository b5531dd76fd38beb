//! Batch orchestration
//!
//! A qualification batch runs in strict phases with a barrier after each:
//! 1. Load the plan, guard the output folder, check the worker
//! 2. Resolve every project configuration
//! 3. Validate every project; any failure stops the batch
//! 4. Run every project; any failure stops the batch
//! 5. Aggregate the mappings and write the report

use crate::aggregator::Aggregator;
use crate::engine::{ProjectEngine, QualificationEngine, RunMode, RunResult};
use crate::error::{ProjectFailure, QualificationError};
use crate::options::QualificationRunOptions;
use crate::resolver::ReferenceResolver;
use futures::stream::{FuturesUnordered, StreamExt};
use qr_assets::AssetAcquirer;
use qr_plan::{Plan, ProjectConfiguration};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run a whole batch with the default engine and HTTP downloads
///
/// # Errors
/// Any [`QualificationError`]; no report is written in that case.
pub async fn run_batch(
    options: &QualificationRunOptions,
    cancel: &CancellationToken,
) -> Result<PathBuf, QualificationError> {
    QualificationRunner::new(options.clone())
        .run_batch(cancel)
        .await
}

/// Orchestrates resolution, validation, run and aggregation
pub struct QualificationRunner {
    options: QualificationRunOptions,
    engine: Arc<dyn ProjectEngine>,
    acquirer: AssetAcquirer,
}

impl fmt::Debug for QualificationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualificationRunner")
            .field("options", &self.options)
            .field("acquirer", &self.acquirer)
            .finish_non_exhaustive()
    }
}

impl QualificationRunner {
    /// Runner spawning the worker of `options`
    #[must_use]
    pub fn new(options: QualificationRunOptions) -> Self {
        let engine = Arc::new(QualificationEngine::new(&options));
        let acquirer = AssetAcquirer::with_http(&options.output_folder);
        Self {
            options,
            engine,
            acquirer,
        }
    }

    /// Use a custom project engine
    #[inline]
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn ProjectEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Use a custom asset acquirer
    #[inline]
    #[must_use]
    pub fn with_acquirer(mut self, acquirer: AssetAcquirer) -> Self {
        self.acquirer = acquirer;
        self
    }

    #[inline]
    #[must_use]
    pub fn options(&self) -> &QualificationRunOptions {
        &self.options
    }

    /// Run the batch and return the report file
    ///
    /// # Errors
    /// - `QualificationError::Plan` if the plan cannot be loaded
    /// - `QualificationError::OutputNotEmpty` unless `force` is set
    /// - `QualificationError::WorkerNotFound` before any worker is spawned
    /// - Resolution errors (`DanglingReference`, `Asset`)
    /// - `ProjectValidationFailed` / `ProjectRunFailed` listing every failing project
    /// - `QualificationError::Cancelled` when `cancel` fires
    pub async fn run_batch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, QualificationError> {
        let options = &self.options;
        info!(plan = %options.configuration_file.display(), "Starting qualification run");

        let plan = Plan::from_file(&options.configuration_file)?;
        self.prepare_output_folder().await?;
        self.engine.ensure_ready().await?;

        let resolver = ReferenceResolver::new(options.clone(), self.acquirer.clone());
        let configurations = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(QualificationError::Cancelled),
            resolved = resolver.resolve(&plan) => resolved?,
        };

        let batch = cancel.child_token();

        info!(projects = configurations.len(), "Validating projects");
        let validations = self
            .execute_phase(&configurations, RunMode::Validate, &batch)
            .await?;
        let failures = collect_failures(&validations);
        if !failures.is_empty() {
            return Err(QualificationError::ProjectValidationFailed { failures });
        }

        info!(projects = configurations.len(), "Running projects");
        let runs = self
            .execute_phase(&configurations, RunMode::Run, &batch)
            .await?;
        let failures = collect_failures(&runs);
        if !failures.is_empty() {
            return Err(QualificationError::ProjectRunFailed { failures });
        }

        info!("Aggregating project results");
        let report = Aggregator::new(self.acquirer.clone(), options.plan_folder())
            .aggregate(&plan, &runs)
            .await?;

        let report_file = options.report_file();
        let json = report
            .to_json_pretty()
            .map_err(|e| QualificationError::serialization_error(&report_file, e))?;
        tokio::fs::write(&report_file, json)
            .await
            .map_err(|e| QualificationError::io_error(&report_file, e))?;

        info!(report = %report_file.display(), "Qualification run complete");
        Ok(report_file)
    }

    /// Launch every project for `mode`, at most `max_concurrent_projects` at a time
    ///
    /// Waits for every project. The first error cancels `cancel` so the
    /// remaining workers terminate, and is returned once all have drained.
    async fn execute_phase(
        &self,
        configurations: &[ProjectConfiguration],
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<Vec<RunResult>, QualificationError> {
        let semaphore = Semaphore::new(self.options.max_concurrent_projects.max(1));

        let mut pending: FuturesUnordered<_> = configurations
            .iter()
            .enumerate()
            .map(|(index, configuration)| {
                let semaphore = &semaphore;
                async move {
                    let outcome = match semaphore.acquire().await {
                        Ok(_permit) => self.engine.execute(configuration, mode, cancel).await,
                        Err(_) => Err(QualificationError::Cancelled),
                    };
                    (index, outcome)
                }
            })
            .collect();

        let mut results: Vec<Option<RunResult>> = vec![None; configurations.len()];
        let mut fatal: Option<QualificationError> = None;
        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(result) => {
                    if result.success {
                        debug!(project = %result.project, %mode, "Project succeeded");
                    } else {
                        warn!(project = %result.project, %mode, log_file = %result.log_file().display(), "Project failed");
                    }
                    results[index] = Some(result);
                }
                Err(e) if fatal.is_none() => {
                    error!(project = %configurations[index].project, %mode, error = %e, "Stopping batch");
                    cancel.cancel();
                    fatal = Some(e);
                }
                Err(e) => debug!(project = %configurations[index].project, error = %e, "Project aborted"),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(results.into_iter().flatten().collect()),
        }
    }

    /// Refuse a non-empty output folder unless forced; clear it otherwise
    async fn prepare_output_folder(&self) -> Result<(), QualificationError> {
        let folder = &self.options.output_folder;
        let mut entries = match tokio::fs::read_dir(folder).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return tokio::fs::create_dir_all(folder)
                    .await
                    .map_err(|e| QualificationError::io_error(folder, e));
            }
            Err(e) => return Err(QualificationError::io_error(folder, e)),
        };

        let mut existing = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| QualificationError::io_error(folder, e))?
        {
            existing.push(entry.path());
        }
        if existing.is_empty() {
            return Ok(());
        }
        if !self.options.force {
            return Err(QualificationError::OutputNotEmpty {
                path: folder.clone(),
            });
        }

        info!(folder = %folder.display(), entries = existing.len(), "Clearing output folder");
        for path in existing {
            let removed = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            if let Err(e) = removed {
                warn!(path = %path.display(), error = %e, "Cannot delete output entry");
            }
        }
        Ok(())
    }
}

fn collect_failures(results: &[RunResult]) -> Vec<ProjectFailure> {
    results.iter().filter_map(RunResult::failure).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use qr_test_utils::{mapping_fixture, write_mapping, write_plan_workspace};
    use std::path::Path;

    /// Engine recording calls; fails the listed projects in the given mode
    #[derive(Default)]
    struct ScriptedEngine {
        failing: Vec<(String, RunMode)>,
        broken: Option<String>,
        calls: Mutex<Vec<(String, RunMode)>>,
    }

    impl ScriptedEngine {
        fn failing(project: &str, mode: RunMode) -> Self {
            Self {
                failing: vec![(project.to_string(), mode)],
                ..Self::default()
            }
        }

        /// Engine that cannot even launch `project`
        fn broken(project: &str) -> Self {
            Self {
                broken: Some(project.to_string()),
                ..Self::default()
            }
        }

        fn calls(&self, mode: RunMode) -> Vec<String> {
            let mut calls: Vec<_> = self
                .calls
                .lock()
                .iter()
                .filter(|(_, m)| *m == mode)
                .map(|(p, _)| p.clone())
                .collect();
            calls.sort();
            calls
        }
    }

    #[async_trait]
    impl ProjectEngine for ScriptedEngine {
        async fn execute(
            &self,
            configuration: &ProjectConfiguration,
            mode: RunMode,
            _cancel: &CancellationToken,
        ) -> Result<RunResult, QualificationError> {
            self.calls.lock().push((configuration.project.clone(), mode));
            if self.broken.as_deref() == Some(configuration.project.as_str()) {
                return Err(QualificationError::io_error(
                    configuration.config_file(),
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                ));
            }
            let success = !self
                .failing
                .iter()
                .any(|(p, m)| *p == configuration.project && *m == mode);
            if success && mode == RunMode::Run {
                write_mapping(
                    &configuration.mapping_file,
                    &mapping_fixture(&configuration.project, &["S1"]),
                );
            }
            Ok(RunResult {
                project: configuration.project.clone(),
                mode,
                log_file_paths: configuration.log_files(),
                config_file: configuration.config_file(),
                mapping_file: configuration.mapping_file.clone(),
                success,
            })
        }
    }

    fn runner(plan_file: &Path, output: &Path, engine: &Arc<ScriptedEngine>) -> QualificationRunner {
        let options = QualificationRunOptions::new(plan_file, output, "unused");
        let engine: Arc<dyn ProjectEngine> = engine.clone();
        QualificationRunner::new(options).with_engine(engine)
    }

    #[tokio::test]
    async fn full_batch_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        let engine = Arc::new(ScriptedEngine::default());

        let report = runner(&plan_file, &output, &engine)
            .run_batch(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report, output.join("report-configuration-plan.json"));
        assert_eq!(engine.calls(RunMode::Validate), vec!["P1", "P2"]);
        assert_eq!(engine.calls(RunMode::Run), vec!["P1", "P2"]);

        let document: qr_plan::ReportDocument =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(document.simulation_mappings.len(), 2);
        assert_eq!(document.simulation_mappings[0].project, "P1");
    }

    #[tokio::test]
    async fn validation_failure_blocks_run_phase() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        let engine = Arc::new(ScriptedEngine::failing("P2", RunMode::Validate));

        let err = runner(&plan_file, &output, &engine)
            .run_batch(&CancellationToken::new())
            .await
            .unwrap_err();

        let QualificationError::ProjectValidationFailed { failures } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].project, "P2");
        assert_eq!(failures[0].log_file, output.join("temp/P2/log.txt"));
        assert!(engine.calls(RunMode::Run).is_empty());
        assert!(!output.join("report-configuration-plan.json").exists());
    }

    #[tokio::test]
    async fn run_failure_writes_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        let engine = Arc::new(ScriptedEngine::failing("P1", RunMode::Run));

        let err = runner(&plan_file, &output, &engine)
            .run_batch(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, QualificationError::ProjectRunFailed { ref failures } if failures.len() == 1));
        assert!(!output.join("report-configuration-plan.json").exists());
    }

    #[tokio::test]
    async fn launch_error_stops_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        let engine = Arc::new(ScriptedEngine::broken("P1"));

        let err = runner(&plan_file, &output, &engine)
            .run_batch(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, QualificationError::Io { ref path, .. } if path.ends_with("P1/config.json")));
        assert!(engine.calls(RunMode::Run).is_empty());
        assert!(!output.join("report-configuration-plan.json").exists());
    }

    #[tokio::test]
    async fn output_guard_with_and_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        std::fs::create_dir_all(output.join("old")).unwrap();
        std::fs::write(output.join("old/report.json"), "{}").unwrap();
        let engine = Arc::new(ScriptedEngine::default());

        let err = runner(&plan_file, &output, &engine)
            .run_batch(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QualificationError::OutputNotEmpty { .. }));
        assert!(output.join("old/report.json").exists());
        assert!(engine.calls(RunMode::Validate).is_empty());

        let options = QualificationRunOptions::new(&plan_file, &output, "unused").with_force(true);
        let forced: Arc<dyn ProjectEngine> = engine.clone();
        QualificationRunner::new(options)
            .with_engine(forced)
            .run_batch(&CancellationToken::new())
            .await
            .unwrap();
        assert!(!output.join("old").exists());
    }

    #[tokio::test]
    async fn missing_worker_fails_before_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write_plan_workspace(dir.path());
        let output = dir.path().join("out");
        let options =
            QualificationRunOptions::new(&plan_file, &output, dir.path().join("PKSim.CLI"));

        let err = run_batch(&options, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, QualificationError::WorkerNotFound { .. }));
        assert!(!output.join("temp").exists());
    }

    #[tokio::test]
    async fn cancelled_batch_never_validates() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write_plan_workspace(dir.path());
        let engine = Arc::new(ScriptedEngine::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner(&plan_file, &dir.path().join("out"), &engine)
            .run_batch(&cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(engine.calls(RunMode::Validate).is_empty());
    }
}
