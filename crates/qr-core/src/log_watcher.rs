//! Live tailing of a worker log file
//!
//! A [`LogWatcher`] follows a log file that another process appends to and
//! forwards every complete line, classified by its level tag, to a
//! [`LogSink`]:
//! - `Idle`: constructed, nothing attached
//! - `Watching`: stale log deleted, `notify` watchers attached, tailing task running
//! - `Stopped`: final drain done, trailing partial line flushed
//!
//! Filesystem events only wake the tailing task up; a poll tick backs them
//! up when notifications are coalesced or unavailable.

use crate::error::QualificationError;
use crate::options::LogLevel;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::ffi::{OsStr, OsString};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives classified log entries
pub trait LogSink: Send + Sync {
    /// Record one entry under `category` (the project id)
    fn add_to_log(&self, message: &str, level: LogLevel, category: &str);
}

/// Forwards entries to `tracing` with a `project` field
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn add_to_log(&self, message: &str, level: LogLevel, category: &str) {
        match level {
            LogLevel::Debug => debug!(project = category, "{message}"),
            LogLevel::Information => info!(project = category, "{message}"),
            LogLevel::Warning => warn!(project = category, "{message}"),
            LogLevel::Error => error!(project = category, "{message}"),
        }
    }
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

/// Entry recorded by a [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub category: String,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries recorded so far, in arrival order
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn add_to_log(&self, message: &str, level: LogLevel, category: &str) {
        self.entries.lock().push(LogEntry {
            level,
            message: message.to_string(),
            category: category.to_string(),
        });
    }
}

/// Level of a worker log line and the message without its tag
///
/// | line starts with | level       | stripped prefix                  |
/// |------------------|-------------|----------------------------------|
/// | (empty line)     | Debug       |                                  |
/// | `Debug:`         | Debug       | `Debug:` and one optional space  |
/// | `Information:`   | Information | `Information:` and one optional space |
/// | `Error`          | Error       | `Error:` and one optional space, when present |
/// | `Warning`        | Warning     | `Warning:` and one optional space, when present |
/// | anything else    | Information |                                  |
///
/// `Error:boom` therefore becomes `boom`, while `Errors were found` keeps
/// its text.
#[must_use]
pub fn classify_entry(line: &str) -> (LogLevel, &str) {
    fn strip<'a>(line: &'a str, tag: &str) -> &'a str {
        line.strip_prefix(tag)
            .map_or(line, |rest| rest.strip_prefix(' ').unwrap_or(rest))
    }

    if line.is_empty() {
        (LogLevel::Debug, line)
    } else if line.starts_with("Debug:") {
        (LogLevel::Debug, strip(line, "Debug:"))
    } else if line.starts_with("Information:") {
        (LogLevel::Information, strip(line, "Information:"))
    } else if line.starts_with("Error") {
        (LogLevel::Error, strip(line, "Error:"))
    } else if line.starts_with("Warning") {
        (LogLevel::Warning, strip(line, "Warning:"))
    } else {
        (LogLevel::Information, line)
    }
}

/// What to watch and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogWatcherOptions {
    /// Log file to tail
    pub log_file: PathBuf,
    /// Sink category, usually the project id
    pub category: String,
    /// Extra folders whose changes trigger a read
    pub additional_folders: Vec<PathBuf>,
    /// Only changes to files with this extension in the extra folders count
    pub additional_files_extension: Option<String>,
    pub poll_interval: Duration,
}

impl LogWatcherOptions {
    #[must_use]
    pub fn new(log_file: impl Into<PathBuf>, category: impl Into<String>) -> Self {
        Self {
            log_file: log_file.into(),
            category: category.into(),
            additional_folders: Vec::new(),
            additional_files_extension: None,
            poll_interval: Duration::from_millis(200),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_additional_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.additional_folders.push(folder.into());
        self
    }

    /// Extension of the extra-folder files that count, e.g. `log`, `.log` or `*.log`
    #[inline]
    #[must_use]
    pub fn with_additional_files_extension(mut self, extension: impl Into<String>) -> Self {
        self.additional_files_extension = Some(extension.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Lifecycle of a [`LogWatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogWatcherState {
    Idle,
    Watching,
    Stopped,
}

struct Tailing {
    cancel: CancellationToken,
    handle: JoinHandle<LogTail>,
    watchers: Vec<RecommendedWatcher>,
}

/// Streams a growing log file into a [`LogSink`]
pub struct LogWatcher {
    options: LogWatcherOptions,
    sink: Arc<dyn LogSink>,
    state: LogWatcherState,
    tailing: Option<Tailing>,
}

impl std::fmt::Debug for LogWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWatcher")
            .field("options", &self.options)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LogWatcher {
    /// Idle watcher
    #[must_use]
    pub fn new(options: LogWatcherOptions, sink: Arc<dyn LogSink>) -> Self {
        Self {
            options,
            sink,
            state: LogWatcherState::Idle,
            tailing: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> LogWatcherState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.options.log_file
    }

    /// Delete a stale log and start tailing
    ///
    /// Does nothing unless the watcher is idle. Filesystem watchers that
    /// cannot be attached are logged; polling still covers the file.
    ///
    /// # Errors
    /// `QualificationError::Io` if the stale log or its folder cannot be prepared
    pub async fn watch(&mut self) -> Result<(), QualificationError> {
        if self.state != LogWatcherState::Idle {
            return Ok(());
        }

        let log_file = &self.options.log_file;
        match tokio::fs::remove_file(log_file).await {
            Ok(()) => debug!(log_file = %log_file.display(), "Deleted stale log file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(QualificationError::io_error(log_file, e)),
        }
        let folder = log_folder(log_file);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| QualificationError::io_error(&folder, e))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let watchers = self.attach_watchers(&folder, &events_tx);

        let cancel = CancellationToken::new();
        let tail = LogTail::new(
            log_file.clone(),
            self.options.category.clone(),
            Arc::clone(&self.sink),
        );
        let handle = tokio::spawn(run_tail(
            tail,
            events_rx,
            cancel.clone(),
            self.options.poll_interval,
        ));

        self.tailing = Some(Tailing {
            cancel,
            handle,
            watchers,
        });
        self.state = LogWatcherState::Watching;
        Ok(())
    }

    /// Drain what is left, flush a trailing partial line and stop
    pub async fn stop(&mut self) {
        let Some(tailing) = self.tailing.take() else {
            if self.state == LogWatcherState::Idle {
                self.state = LogWatcherState::Stopped;
            }
            return;
        };

        tailing.cancel.cancel();
        drop(tailing.watchers);
        match tailing.handle.await {
            Ok(mut tail) => {
                tail.read_available().await;
                tail.flush();
            }
            Err(e) => debug!(error = %e, "Log tailing task ended abnormally"),
        }
        self.state = LogWatcherState::Stopped;
    }

    fn attach_watchers(
        &self,
        folder: &Path,
        events: &mpsc::UnboundedSender<()>,
    ) -> Vec<RecommendedWatcher> {
        let mut watchers = Vec::with_capacity(1 + self.options.additional_folders.len());

        let file_name = self.options.log_file.file_name().map(ToOwned::to_owned);
        match watch_folder(folder, events.clone(), move |path| {
            file_name.as_deref().is_some_and(|name| path.file_name() == Some(name))
        }) {
            Ok(watcher) => watchers.push(watcher),
            Err(e) => warn!(folder = %folder.display(), error = %e, "Cannot watch log folder, polling only"),
        }

        for additional in &self.options.additional_folders {
            let extension: Option<OsString> = self
                .options
                .additional_files_extension
                .as_deref()
                .map(|ext| ext.trim_start_matches('*').trim_start_matches('.').into());
            match watch_folder(additional, events.clone(), move |path| {
                has_extension(path, extension.as_deref())
            }) {
                Ok(watcher) => watchers.push(watcher),
                Err(e) => warn!(folder = %additional.display(), error = %e, "Cannot watch folder"),
            }
        }
        watchers
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        if let Some(tailing) = self.tailing.take() {
            tailing.cancel.cancel();
            tailing.handle.abort();
        }
    }
}

fn log_folder(log_file: &Path) -> PathBuf {
    match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `path` passes an optional extension filter
fn has_extension(path: &Path, extension: Option<&OsStr>) -> bool {
    extension.map_or(true, |ext| path.extension() == Some(ext))
}

// notify invokes the handler on its own thread; the unbounded sender never blocks it.
fn watch_folder<F>(
    folder: &Path,
    events: mpsc::UnboundedSender<()>,
    relevant: F,
) -> notify::Result<RecommendedWatcher>
where
    F: Fn(&Path) -> bool + Send + 'static,
{
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if (event.kind.is_create() || event.kind.is_modify())
                    && event.paths.iter().any(|path| relevant(path))
                {
                    let _ = events.send(());
                }
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(folder, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

async fn run_tail(
    mut tail: LogTail,
    mut events: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
    poll_interval: Duration,
) -> LogTail {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            Some(()) = events.recv() => {}
        }
        tail.read_available().await;
    }
    tail
}

/// Read position and partial-line buffer of one log file
struct LogTail {
    path: PathBuf,
    category: String,
    sink: Arc<dyn LogSink>,
    file: Option<tokio::fs::File>,
    offset: u64,
    pending: Vec<u8>,
}

impl LogTail {
    fn new(path: PathBuf, category: String, sink: Arc<dyn LogSink>) -> Self {
        Self {
            path,
            category,
            sink,
            file: None,
            offset: 0,
            pending: Vec::new(),
        }
    }

    /// Forward every complete line appended since the last read
    async fn read_available(&mut self) {
        if let Err(e) = self.read_chunk().await {
            debug!(log_file = %self.path.display(), error = %e, "Cannot read log file");
        }
    }

    async fn read_chunk(&mut self) -> std::io::Result<()> {
        if self.file.is_none() {
            match tokio::fs::File::open(&self.path).await {
                Ok(file) => self.file = Some(file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        if file.metadata().await?.len() < self.offset {
            self.offset = 0;
            self.pending.clear();
        }
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::new();
        let read = file.read_to_end(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        self.offset += read as u64;
        self.pending.extend_from_slice(&chunk);

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            self.emit(&line[..line.len() - 1]);
        }
        Ok(())
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
    }

    fn emit(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let (level, message) = classify_entry(text.trim_end_matches('\r'));
        self.sink.add_to_log(message, level, &self.category);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn watcher(log_file: &Path, sink: &Arc<MemorySink>) -> LogWatcher {
        let sink: Arc<dyn LogSink> = sink.clone();
        LogWatcher::new(
            LogWatcherOptions::new(log_file, "P1").with_poll_interval(Duration::from_millis(20)),
            sink,
        )
    }

    fn messages(sink: &MemorySink) -> Vec<(LogLevel, String)> {
        sink.entries()
            .into_iter()
            .map(|entry| (entry.level, entry.message))
            .collect()
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify_entry(""), (LogLevel::Debug, ""));
        assert_eq!(classify_entry("Debug: loading"), (LogLevel::Debug, "loading"));
        assert_eq!(classify_entry("Information: done"), (LogLevel::Information, "done"));
        assert_eq!(classify_entry("Error: boom"), (LogLevel::Error, "boom"));
        assert_eq!(classify_entry("Error:boom"), (LogLevel::Error, "boom"));
        assert_eq!(classify_entry("Debug:  two spaces"), (LogLevel::Debug, " two spaces"));
        assert_eq!(classify_entry("Errors were found"), (LogLevel::Error, "Errors were found"));
        assert_eq!(classify_entry("Warning: odd"), (LogLevel::Warning, "odd"));
        assert_eq!(classify_entry("Simulation S1 finished"), (LogLevel::Information, "Simulation S1 finished"));
    }

    proptest! {
        #[test]
        fn debug_tag_is_stripped(message in "[a-zA-Z0-9 .|]{0,40}") {
            let line = format!("Debug: {message}");
            prop_assert_eq!(classify_entry(&line), (LogLevel::Debug, message.as_str()));
        }

        #[test]
        fn untagged_lines_are_information(message in "[a-z0-9][a-zA-Z0-9 ]{0,40}") {
            prop_assert_eq!(classify_entry(&message), (LogLevel::Information, message.as_str()));
        }
    }

    #[tokio::test]
    async fn three_bursts_arrive_in_order_with_tags_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("log.txt");
        let sink = Arc::new(MemorySink::new());
        let mut watcher = watcher(&log_file, &sink);

        watcher.watch().await.unwrap();
        assert_eq!(watcher.state(), LogWatcherState::Watching);

        append(&log_file, "Debug: loading snapshot\n");
        tokio::time::sleep(Duration::from_millis(60)).await;
        append(&log_file, "Error: missing compound\n");
        tokio::time::sleep(Duration::from_millis(60)).await;
        append(&log_file, "run finished\n");

        watcher.stop().await;
        assert_eq!(watcher.state(), LogWatcherState::Stopped);
        assert_eq!(
            messages(&sink),
            vec![
                (LogLevel::Debug, "loading snapshot".to_string()),
                (LogLevel::Error, "missing compound".to_string()),
                (LogLevel::Information, "run finished".to_string()),
            ]
        );
        assert!(sink.entries().iter().all(|entry| entry.category == "P1"));
    }

    #[tokio::test]
    async fn partial_lines_wait_for_their_newline() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("log.txt");
        let sink = Arc::new(MemorySink::new());
        let mut watcher = watcher(&log_file, &sink);
        watcher.watch().await.unwrap();

        append(&log_file, "Information: par");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(sink.entries().is_empty());

        append(&log_file, "tial\r\nWarning: trailing");
        watcher.stop().await;

        assert_eq!(
            messages(&sink),
            vec![
                (LogLevel::Information, "partial".to_string()),
                (LogLevel::Warning, "trailing".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn stale_log_is_deleted_on_watch() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("log.txt");
        append(&log_file, "Error: from a previous run\n");
        let sink = Arc::new(MemorySink::new());
        let mut watcher = watcher(&log_file, &sink);

        watcher.watch().await.unwrap();
        assert!(!log_file.exists());
        watcher.stop().await;
        assert!(sink.entries().is_empty());
    }

    #[tokio::test]
    async fn stop_without_watch_and_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let mut watcher = watcher(&dir.path().join("log.txt"), &sink);

        watcher.stop().await;
        assert_eq!(watcher.state(), LogWatcherState::Stopped);
        watcher.watch().await.unwrap();
        assert_eq!(watcher.state(), LogWatcherState::Stopped);
        watcher.stop().await;
    }

    #[test]
    fn extension_filter_accepts_matching_files_only() {
        let log = OsStr::new("log");
        assert!(has_extension(Path::new("/extra/worker.log"), Some(log)));
        assert!(!has_extension(Path::new("/extra/notes.txt"), Some(log)));
        assert!(!has_extension(Path::new("/extra/log"), Some(log)));
        assert!(has_extension(Path::new("/extra/notes.txt"), None));
    }

    /// Log file whose writes the log folder watch never sees: the watched
    /// name is a symlink to a file in an unwatched folder
    #[cfg(target_os = "linux")]
    async fn hidden_log(
        root: &Path,
        sink: &Arc<MemorySink>,
        extension: Option<&str>,
    ) -> (LogWatcher, PathBuf, PathBuf) {
        let logs = root.join("logs");
        let target = root.join("target");
        let extra = root.join("extra");
        for folder in [&logs, &target, &extra] {
            std::fs::create_dir_all(folder).unwrap();
        }
        let real = target.join("real.txt");
        std::fs::write(&real, "").unwrap();

        let mut options = LogWatcherOptions::new(logs.join("log.txt"), "P1")
            .with_additional_folder(&extra)
            .with_poll_interval(Duration::from_secs(3600));
        if let Some(extension) = extension {
            options = options.with_additional_files_extension(extension);
        }
        let sink: Arc<dyn LogSink> = sink.clone();
        let mut watcher = LogWatcher::new(options, sink);
        watcher.watch().await.unwrap();

        std::os::unix::fs::symlink(&real, logs.join("log.txt")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        append(&real, "Information: from the worker\n");
        tokio::time::sleep(Duration::from_millis(300)).await;
        (watcher, real, extra)
    }

    #[cfg(target_os = "linux")]
    async fn wait_for_entries(sink: &MemorySink, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.entries().len() < count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("no read was triggered");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn change_in_additional_folder_reads_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let (mut watcher, _, extra) = hidden_log(dir.path(), &sink, None).await;
        assert!(sink.entries().is_empty());

        std::fs::write(extra.join("notes.txt"), "x").unwrap();
        wait_for_entries(&sink, 1).await;

        watcher.stop().await;
        assert_eq!(
            messages(&sink),
            vec![(LogLevel::Information, "from the worker".to_string())]
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn additional_folder_honors_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let (mut watcher, _, extra) = hidden_log(dir.path(), &sink, Some("*.log")).await;

        std::fs::write(extra.join("notes.txt"), "x").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(sink.entries().is_empty());

        std::fs::write(extra.join("worker.log"), "x").unwrap();
        wait_for_entries(&sink, 1).await;
        watcher.stop().await;
        assert_eq!(sink.entries().len(), 1);
    }

    #[test]
    fn bare_log_file_lives_in_working_directory() {
        assert_eq!(log_folder(Path::new("log.txt")), Path::new("."));
        assert_eq!(log_folder(Path::new("/tmp/P1/log.txt")), Path::new("/tmp/P1"));
    }
}
