//! Qualification Runner Core
//!
//! Batch orchestration of a qualification plan against an external
//! simulation worker:
//! - Resolves plan projects into self-contained worker configurations
//! - Validates, then runs, every project through the worker
//! - Streams each worker's log into `tracing` while it runs
//! - Merges the per-project mappings into one report document
//!
//! # Example
//!
//! ```rust,ignore
//! use qr_core::{QualificationRunOptions, QualificationRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), qr_core::QualificationError> {
//! let options = QualificationRunOptions::new("plan.json", "out", "/opt/pksim/PKSim.CLI")
//!     .with_force(true);
//! let report = QualificationRunner::new(options)
//!     .run_batch(&CancellationToken::new())
//!     .await?;
//!
//! println!("Report written to {}", report.display());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod log_watcher;
pub mod options;
pub mod resolver;
pub mod runner;

// Re-exports for convenience
pub use aggregator::Aggregator;
pub use engine::{ProjectEngine, QualificationEngine, RunMode, RunResult};
pub use error::{ProjectFailure, QualificationError};
pub use log_watcher::{
    classify_entry, LogEntry, LogSink, LogWatcher, LogWatcherOptions, LogWatcherState,
    MemorySink, TracingSink,
};
pub use options::{
    worker_in_folder, LogLevel, ParseLogLevelError, QualificationRunOptions, DEFAULT_REPORT_NAME,
    TEMP_FOLDER, WORKER_EXECUTABLE,
};
pub use resolver::ReferenceResolver;
pub use runner::{run_batch, QualificationRunner};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running a qualification batch
    pub use crate::{
        LogLevel, ProjectEngine, QualificationError, QualificationRunOptions,
        QualificationRunner, RunMode, RunResult,
    };
    pub use tokio_util::sync::CancellationToken;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
