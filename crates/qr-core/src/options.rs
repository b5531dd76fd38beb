//! Run options for a qualification batch

use qr_assets::AssetKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default report file name, without extension
pub const DEFAULT_REPORT_NAME: &str = "report-configuration-plan";

/// Scratch folder below the output root
pub const TEMP_FOLDER: &str = "temp";

/// Worker executable inside its installation folder
#[cfg(windows)]
pub const WORKER_EXECUTABLE: &str = "PKSim.CLI.exe";
/// Worker executable inside its installation folder
#[cfg(not(windows))]
pub const WORKER_EXECUTABLE: &str = "PKSim.CLI";

/// Worker executable inside an installation folder
#[must_use]
pub fn worker_in_folder(folder: impl AsRef<Path>) -> PathBuf {
    folder.as_ref().join(WORKER_EXECUTABLE)
}

/// Log level forwarded to the worker and used for the runner's own output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    #[default]
    Information,
    Warning,
    Error,
}

impl LogLevel {
    /// Name understood by the worker's `--logLevel`
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }

    /// Matching `tracing` level
    #[inline]
    #[must_use]
    pub const fn as_tracing_level(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Information => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown log level name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}' (expected Debug, Information, Warning or Error)")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "information" | "info" => Ok(Self::Information),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

/// Options of one qualification batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationRunOptions {
    /// Plan document
    pub configuration_file: PathBuf,
    /// Output root
    pub output_folder: PathBuf,
    /// Worker executable
    pub worker_path: PathBuf,
    /// Report file name without extension
    pub report_name: String,
    /// Clear a non-empty output folder instead of failing
    pub force: bool,
    pub log_level: LogLevel,
    /// Runner log file also handed to every worker
    pub shared_log_file: Option<PathBuf>,
    /// Upper bound of concurrently executing workers
    pub max_concurrent_projects: usize,
    /// Keep existing project temp folders
    pub preserve_temp: bool,
    /// Poll tick of the log watchers, in milliseconds
    pub log_poll_interval_ms: u64,
}

impl QualificationRunOptions {
    /// Options with defaults for everything but the three required paths
    #[must_use]
    pub fn new(
        configuration_file: impl Into<PathBuf>,
        output_folder: impl Into<PathBuf>,
        worker_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            configuration_file: configuration_file.into(),
            output_folder: output_folder.into(),
            worker_path: worker_path.into(),
            report_name: DEFAULT_REPORT_NAME.to_string(),
            force: false,
            log_level: LogLevel::default(),
            shared_log_file: None,
            max_concurrent_projects: std::thread::available_parallelism()
                .map_or(4, std::num::NonZeroUsize::get),
            preserve_temp: false,
            log_poll_interval_ms: 200,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_report_name(mut self, name: impl Into<String>) -> Self {
        self.report_name = name.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_shared_log_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.shared_log_file = Some(file.into());
        self
    }

    /// Bound concurrent workers; zero is treated as one
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_projects(mut self, max: usize) -> Self {
        self.max_concurrent_projects = max.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_preserve_temp(mut self, preserve: bool) -> Self {
        self.preserve_temp = preserve;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_log_poll_interval(mut self, interval: Duration) -> Self {
        self.log_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms.max(1))
    }

    /// Folder relative plan references are resolved against
    #[must_use]
    pub fn plan_folder(&self) -> PathBuf {
        match self.configuration_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    #[must_use]
    pub fn temp_folder(&self) -> PathBuf {
        self.output_folder.join(TEMP_FOLDER)
    }

    /// Isolated scratch folder of a project
    #[must_use]
    pub fn project_temp_folder(&self, project: &str) -> PathBuf {
        self.temp_folder().join(project)
    }

    #[must_use]
    pub fn observed_data_folder(&self) -> PathBuf {
        self.output_folder.join(AssetKind::ObservedData.folder_name())
    }

    #[must_use]
    pub fn inputs_folder(&self) -> PathBuf {
        self.output_folder.join(AssetKind::Input.folder_name())
    }

    /// Final report document
    #[must_use]
    pub fn report_file(&self) -> PathBuf {
        self.output_folder.join(format!("{}.json", self.report_name))
    }
}
