// Append plain-text log lines to daily files with size based rollover.
// A new file is opened whenever the local date changes (index back to 0) or
// the current file has reached `max_size` bytes (index + 1). Only the newest
// `max_files` files opened by this sink are kept on disk.

use super::clock::{Clock, LocalClock};
use super::{Sink, SinkError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_SIZE: u64 = 1024 * 1024; // 1 MiB
pub const DEFAULT_MAX_FILES: usize = 5;

const DATE_KEY_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotatingFileConfig {
    /// Path prefix; files are named `{basename}_{YYYYMMDD}[_{index}].log`.
    pub basename: PathBuf,
    /// Size in bytes at which the next write opens a new file.
    pub max_size: u64,
    /// Number of files kept on disk, current one included.
    pub max_files: usize,
}

impl RotatingFileConfig {
    pub fn new(basename: impl Into<PathBuf>) -> Self {
        Self {
            basename: basename.into(),
            max_size: DEFAULT_MAX_SIZE,
            max_files: DEFAULT_MAX_FILES,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.basename.as_os_str().is_empty() {
            return Err(SinkError::InvalidConfig(
                "File basename cannot be empty".to_string(),
            ));
        }
        if self.max_size == 0 {
            return Err(SinkError::InvalidConfig(
                "File max size must be greater than 0".to_string(),
            ));
        }
        if self.max_files == 0 {
            return Err(SinkError::InvalidConfig(
                "File retention must keep at least one file".to_string(),
            ));
        }
        Ok(())
    }

    /// Name of the file for a given date key and rotation index.
    pub fn file_path(&self, date_key: &str, index: u32) -> PathBuf {
        let mut name = self.basename.clone().into_os_string();
        name.push(format!("_{date_key}"));
        if index > 0 {
            name.push(format!("_{index}"));
        }
        name.push(".log");
        PathBuf::from(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSinkStats {
    pub lines_written: u64,
    pub write_failures: u64,
    pub rotations: u64,
    pub files_removed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lines_written: AtomicU64,
    write_failures: AtomicU64,
    rotations: AtomicU64,
    files_removed: AtomicU64,
}

struct State {
    date_key: String,
    index: u32,
    file: Option<File>,
    current_path: PathBuf,
    written: u64,
    // Oldest first.
    history: VecDeque<PathBuf>,
}

pub struct RotatingFileSink {
    config: RotatingFileConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    counters: Counters,
}

impl RotatingFileSink {
    pub fn new(config: RotatingFileConfig) -> Result<Self, SinkError> {
        Self::with_clock(config, Arc::new(LocalClock))
    }

    /// Opens the first file immediately; failing to do so is reported here.
    /// Later open failures are counted and the affected lines dropped.
    pub fn with_clock(
        config: RotatingFileConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SinkError> {
        config.validate()?;

        if let Some(parent) = config.basename.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| SinkError::Open {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let date_key = date_key(clock.as_ref());
        let current_path = config.file_path(&date_key, 0);
        let sink = Self {
            config,
            clock,
            state: Mutex::new(State {
                date_key,
                index: 0,
                file: None,
                current_path,
                written: 0,
                history: VecDeque::new(),
            }),
            counters: Counters::default(),
        };

        {
            let mut state = sink.state.lock();
            sink.open_new_file(&mut state)
                .map_err(|source| SinkError::Open {
                    path: state.current_path.clone(),
                    source,
                })?;
        }

        Ok(sink)
    }

    pub fn config(&self) -> &RotatingFileConfig {
        &self.config
    }

    pub fn current_path(&self) -> PathBuf {
        self.state.lock().current_path.clone()
    }

    pub fn current_index(&self) -> u32 {
        self.state.lock().index
    }

    /// Files this sink has opened and not yet removed, oldest first.
    pub fn retained_files(&self) -> Vec<PathBuf> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> FileSinkStats {
        FileSinkStats {
            lines_written: self.counters.lines_written.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            rotations: self.counters.rotations.load(Ordering::Relaxed),
            files_removed: self.counters.files_removed.load(Ordering::Relaxed),
        }
    }

    fn rotate_if_needed(&self, state: &mut State) {
        let today = date_key(self.clock.as_ref());
        if today != state.date_key {
            debug!(from = %state.date_key, to = %today, "Date changed, rotating log file");
            state.date_key = today;
            state.index = 0;
            self.rotate(state);
        } else if state.file.is_none() {
            // Previous open failed; try the same name again.
            self.rotate(state);
        }

        if state.file.is_some() && state.written >= self.config.max_size {
            state.index += 1;
            self.rotate(state);
        }
    }

    fn rotate(&self, state: &mut State) {
        self.counters.rotations.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.open_new_file(state) {
            warn!(
                path = %state.current_path.display(),
                error = %e,
                "Failed to open log file, lines will be dropped"
            );
        }
    }

    fn open_new_file(&self, state: &mut State) -> io::Result<()> {
        // Close the previous file before creating the next one.
        state.file = None;
        state.written = 0;
        state.current_path = self.config.file_path(&state.date_key, state.index);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&state.current_path)?;
        state.file = Some(file);
        info!(path = %state.current_path.display(), "Opened log file");

        let path = state.current_path.clone();
        state.history.retain(|p| p != &path);
        state.history.push_back(path);
        self.enforce_retention(state);
        Ok(())
    }

    fn enforce_retention(&self, state: &mut State) {
        while state.history.len() > self.config.max_files {
            let Some(oldest) = state.history.pop_front() else {
                break;
            };
            self.remove_file(&oldest);
        }
    }

    fn remove_file(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {
                self.counters.files_removed.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path.display(), "Removed expired log file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove expired log file");
            }
        }
    }
}

impl Sink for RotatingFileSink {
    fn write(&self, line: &str) {
        let mut state = self.state.lock();
        self.rotate_if_needed(&mut state);

        let Some(file) = state.file.as_mut() else {
            self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        match file.write_all(buf.as_bytes()) {
            Ok(()) => {
                state.written += buf.len() as u64;
                self.counters.lines_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    path = %state.current_path.display(),
                    error = %e,
                    "Failed to append to log file"
                );
            }
        }
    }
}

impl std::fmt::Debug for RotatingFileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileSink")
            .field("config", &self.config)
            .field("current_path", &self.current_path())
            .finish()
    }
}

fn date_key(clock: &dyn Clock) -> String {
    clock.today().format(DATE_KEY_FORMAT).to_string()
}
