//! Console + file logging with archive rotation.
//!
//! The file layer writes through [`RotatingLog`], which can archive the
//! current file into a zstd-compressed copy and start it over without
//! rebuilding the subscriber.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::GeneralConfig;
use crate::constants::LOG_FILE_STEM;

const ARCHIVE_SUFFIX: &str = ".log.zst";
const ZSTD_LEVEL: i32 = 3;

/// Shared handle to the active log file.
#[derive(Clone)]
pub struct RotatingLog {
    dir: PathBuf,
    path: PathBuf,
    max_archives: usize,
    file: Arc<Mutex<File>>,
}

impl RotatingLog {
    /// Opens (or creates) `<dir>/<stem>.log` in append mode.
    pub fn open(dir: &Path, max_archives: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let path = dir.join(format!("{LOG_FILE_STEM}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            max_archives,
            file: Arc::new(Mutex::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compresses the current log into a timestamped archive, truncates it
    /// and prunes old archives. An empty log is left alone.
    pub fn rotate(&self) -> Result<Option<PathBuf>> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Ok(None);
        }

        let archive = self.next_archive_path();
        {
            let source = File::open(&self.path)
                .with_context(|| format!("Failed to read {}", self.path.display()))?;
            let target = File::create(&archive)
                .with_context(|| format!("Failed to create {}", archive.display()))?;
            zstd::stream::copy_encode(source, target, ZSTD_LEVEL)
                .context("Failed to compress log file")?;
        }
        file.set_len(0).context("Failed to truncate log file")?;
        drop(file);

        self.prune()?;
        info!(archive = %archive.display(), bytes = size, "Rotated log file");
        Ok(Some(archive))
    }

    fn next_archive_path(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{LOG_FILE_STEM}_{timestamp}");
        let mut candidate = self.dir.join(format!("{base}{ARCHIVE_SUFFIX}"));
        let mut n = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{base}_{n}{ARCHIVE_SUFFIX}"));
            n += 1;
        }
        candidate
    }

    /// Archives sorted oldest first; the timestamp format sorts lexically.
    pub fn archives(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{LOG_FILE_STEM}_");
        let mut out: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(ARCHIVE_SUFFIX))
            })
            .collect();
        out.sort();
        Ok(out)
    }

    fn prune(&self) -> Result<()> {
        let archives = self.archives()?;
        let excess = archives.len().saturating_sub(self.max_archives);
        for old in archives.into_iter().take(excess) {
            match std::fs::remove_file(&old) {
                Ok(()) => debug!(path = %old.display(), "Removed old log archive"),
                Err(e) => warn!(path = %old.display(), error = %e, "Failed to remove old log archive"),
            }
        }
        Ok(())
    }
}

pub struct RotatingLogWriter {
    file: Arc<Mutex<File>>,
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingLog {
    type Writer = RotatingLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingLogWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns the file handle so the caller can rotate it later.
pub fn init_tracing(config: &GeneralConfig) -> Result<RotatingLog> {
    let log = RotatingLog::open(&config.log_dir, config.max_log_archives)?;
    log.rotate()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(log.clone());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(log)
}
