//! Rotating file writer implementation.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use arc_swap::ArcSwap;
use chrono::NaiveDate;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

#[cfg(feature = "rotate-metrics")]
use super::metrics::{LOG_ROTATIONS, LOG_ROTATION_FAILURES};

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// Calendar day in local time, used to pick the active file.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// `YYYY-MM-DD` key naming the file of `date`.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

#[derive(Debug)]
struct ActiveFile {
    date_key: String,
    path: PathBuf,
    file: File,
}

#[derive(Debug)]
struct Shared {
    directory: PathBuf,
    prefix: String,
    extension: String,
    rotation_interval: Duration,
    active: ArcSwap<ActiveFile>,
    /// Serializes rotations; writers never take it.
    rotation: Mutex<()>,
}

/// Writer appending to `<directory>/<prefix>_<YYYY-MM-DD>.<extension>` that
/// moves to a new file when the date changes.
///
/// Every `write_all` goes entirely to one file: the active file is loaded once
/// per call and replaced by a single atomic store, so a record written
/// concurrently with a rotation ends up either in the old or in the new file.
#[derive(Clone, Debug)]
pub struct RotatingWriter {
    shared: Arc<Shared>,
}

impl RotatingWriter {
    /// Creates a new builder for constructing a RotatingWriter
    pub fn builder() -> crate::builder::RotatingWriterBuilder {
        crate::builder::RotatingWriterBuilder::new()
    }

    pub(crate) fn open(
        directory: PathBuf,
        prefix: String,
        extension: String,
        rotation_interval: Duration,
        date: NaiveDate,
    ) -> Result<Self, RotateError> {
        let date_key = date_key(date);
        let path = file_path(&directory, &prefix, &extension, &date_key);
        let file = open_log_file(&path).map_err(|source| RotateError::Open {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            shared: Arc::new(Shared {
                directory,
                prefix,
                extension,
                rotation_interval,
                active: ArcSwap::from_pointee(ActiveFile {
                    date_key,
                    path,
                    file,
                }),
                rotation: Mutex::new(()),
            }),
        })
    }

    /// Date key of the file currently receiving writes.
    pub fn date_key(&self) -> String {
        self.shared.active.load().date_key.clone()
    }

    pub fn current_path(&self) -> PathBuf {
        self.shared.active.load().path.clone()
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        let shared = &self.shared;
        file_path(
            &shared.directory,
            &shared.prefix,
            &shared.extension,
            &date_key(date),
        )
    }

    /// Makes the file for `date` the active one.
    ///
    /// Returns `Ok(false)` when that file is already active. On error the
    /// previous file stays active.
    pub fn rotate_to(&self, date: NaiveDate) -> Result<bool, RotateError> {
        let _rotation = self
            .shared
            .rotation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let date_key = date_key(date);
        if self.shared.active.load().date_key == date_key {
            return Ok(false);
        }

        let path = self.path_for(date);
        let file = match open_log_file(&path) {
            Ok(file) => file,
            Err(source) => {
                #[cfg(feature = "rotate-metrics")]
                LOG_ROTATION_FAILURES.inc();
                return Err(RotateError::Open { path, source });
            }
        };

        // The previous handle is closed once the last in-flight write
        // holding it completes.
        self.shared.active.store(Arc::new(ActiveFile {
            date_key,
            path,
            file,
        }));

        #[cfg(feature = "rotate-metrics")]
        LOG_ROTATIONS.inc();

        Ok(true)
    }

    /// Spawns the background task checking the date every rotation interval.
    /// The task stops when the returned handle is dropped.
    pub fn spawn_rotation(&self) -> RotationTask {
        let writer = self.clone();
        let period = self.shared.rotation_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match writer.rotate_to(today()) {
                    Ok(true) => {
                        tracing::info!(path = %writer.current_path().display(), "rotated log file");
                    }
                    Ok(false) => {}
                    Err(error) => {
                        tracing::error!(%error, "log rotation failed, keeping the current file until the next attempt");
                    }
                }
            }
        });

        RotationTask { handle }
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let active = self.shared.active.load();
        (&active.file).write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let active = self.shared.active.load();
        (&active.file).write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let active = self.shared.active.load();
        (&active.file).flush()
    }
}

/// Make RotatingWriter usable directly as a `fmt` layer writer.
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Handle of the background rotation task; aborts the task on drop.
#[derive(Debug)]
pub struct RotationTask {
    handle: JoinHandle<()>,
}

impl Drop for RotationTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn file_path(directory: &Path, prefix: &str, extension: &str, date_key: &str) -> PathBuf {
    directory.join(format!("{prefix}_{date_key}.{extension}"))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Errors that can occur when creating or rotating a RotatingWriter.
#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    #[error("Failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create log directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No log directory specified. Use .directory()")]
    MissingDirectory,
    #[error("Rotation interval must be non-zero and at most one day, got {0:?}")]
    InvalidInterval(Duration),
}
