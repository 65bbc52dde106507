//! Log output setup.
//!
//! Everything goes to the console; unless disabled it is also appended to a
//! log file without colours. An optional text filter drops every line that
//! does not contain the given text, on both outputs.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use thiserror::Error;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging setup error types.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("cannot create log directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("cannot open log file {path}: {source}")]
    OpenFile { path: PathBuf, source: io::Error },
    #[error("invalid log directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Log file to append to; `None` logs to the console only.
    pub file: Option<PathBuf>,
    /// Keep only lines containing this text.
    pub filter: Option<String>,
}

/// `logs/from-<date>.log`
pub fn default_log_path(today: NaiveDate) -> PathBuf {
    Path::new("logs").join(format!("from-{}.log", today.format("%Y-%m-%d")))
}

/// Install the global subscriber.
pub fn init(options: &LogOptions) -> Result<(), LogError> {
    let env_filter = EnvFilter::from_default_env().add_directive("pingwatch=info".parse()?);

    let needle: Option<Arc<str>> = options
        .filter
        .as_deref()
        .filter(|text| !text.is_empty())
        .map(Arc::from);

    let console = fmt::layer().with_writer(TextFilter::new(io::stdout, needle.clone()));

    let file = match &options.file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(TextFilter::new(Mutex::new(file), needle)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

fn open_log_file(path: &Path) -> Result<File, LogError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| LogError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::OpenFile {
            path: path.to_path_buf(),
            source,
        })
}

/// [`MakeWriter`] that only passes lines containing `needle`.
#[derive(Debug, Clone)]
pub struct TextFilter<M> {
    inner: M,
    needle: Option<Arc<str>>,
}

impl<M> TextFilter<M> {
    pub fn new(inner: M, needle: Option<Arc<str>>) -> Self {
        Self { inner, needle }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for TextFilter<M> {
    type Writer = FilteredWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        FilteredWriter {
            inner: self.inner.make_writer(),
            needle: self.needle.clone(),
        }
    }
}

/// Writer handed out by [`TextFilter`]. The fmt layer writes one event per
/// buffer, so a buffer is kept or dropped as a whole.
pub struct FilteredWriter<W> {
    inner: W,
    needle: Option<Arc<str>>,
}

impl<W: Write> Write for FilteredWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let keep = match &self.needle {
            None => true,
            Some(needle) => String::from_utf8_lossy(buf).contains(&**needle),
        };
        if keep {
            self.inner.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
