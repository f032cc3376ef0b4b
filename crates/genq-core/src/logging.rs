//! Logging init: file under XDG state dir, or graceful fallback to stderr.
//!
//! Scheduler events carry `job_id`, `kind`, `task_id` and `tab_id` fields so a
//! single job can be followed across leader changes with `grep job_id=...`.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,genq=debug,genq_core=debug";

/// Where log lines ended up after initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    File(PathBuf),
    Stderr,
}

/// Writer handed out per event: a clone of the log file, or stderr if cloning failed.
enum SinkWriter {
    File(fs::File),
    Stderr,
}

impl io::Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::File(f) => f.write(buf),
            SinkWriter::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::File(f) => f.flush(),
            SinkWriter::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct SharedLogFile(fs::File);

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(SinkWriter::File)
            .unwrap_or(SinkWriter::Stderr)
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Default log file: `~/.local/state/genq/genq.log`.
pub fn default_log_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("genq")?;
    Ok(xdg_dirs.get_state_home().join("genq.log"))
}

fn open_append(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    Ok(fs::OpenOptions::new().create(true).append(true).open(path)?)
}

/// Initialize structured logging into `path`. Errors if the file cannot be opened.
pub fn init_logging_at(path: &Path) -> Result<()> {
    let file = open_append(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(BoxMakeWriter::new(SharedLogFile(file)))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install tracing subscriber: {e}"))?;
    tracing::info!("genq logging initialized at {}", path.display());
    Ok(())
}

/// Initialize logging to stderr only (no file).
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

/// Log to the default file, falling back to stderr so the CLI never fails on logging.
pub fn init_logging() -> LogSink {
    match default_log_path().and_then(|p| init_logging_at(&p).map(|()| p)) {
        Ok(path) => LogSink::File(path),
        Err(e) => {
            init_logging_stderr();
            tracing::warn!("file logging unavailable ({e:#}); logging to stderr");
            LogSink::Stderr
        }
    }
}
