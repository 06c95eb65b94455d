//! Builder pattern implementation for RotatingWriter

use std::{path::PathBuf, time::Duration};

use chrono::NaiveDate;

use super::writer::{today, RotateError, RotatingWriter};

const DEFAULT_PREFIX: &str = "app";
const DEFAULT_EXTENSION: &str = "log";
const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MAX_ROTATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Builder for creating a RotatingWriter with custom configuration
#[derive(Debug, Clone)]
pub struct RotatingWriterBuilder {
    directory: Option<PathBuf>,
    prefix: String,
    extension: String,
    rotation_interval: Duration,
}

impl Default for RotatingWriterBuilder {
    fn default() -> Self {
        Self {
            directory: None,
            prefix: DEFAULT_PREFIX.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
        }
    }
}

impl RotatingWriterBuilder {
    /// Creates a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory holding the log files
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Sets the file name prefix, `app` by default
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the file extension, `log` by default
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Sets how often the background task checks for a date change
    pub fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    /// Builds the RotatingWriter with today's file active
    pub fn build(self) -> Result<RotatingWriter, RotateError> {
        self.build_for_date(today())
    }

    /// Builds the RotatingWriter with the file of `date` active.
    ///
    /// The directory is created if missing; the file is created with owner
    /// read and write permissions only, or appended to if it already exists.
    pub fn build_for_date(self, date: NaiveDate) -> Result<RotatingWriter, RotateError> {
        let directory = self.directory.ok_or(RotateError::MissingDirectory)?;

        if self.rotation_interval.is_zero() || self.rotation_interval > MAX_ROTATION_INTERVAL {
            return Err(RotateError::InvalidInterval(self.rotation_interval));
        }

        std::fs::create_dir_all(&directory).map_err(|source| RotateError::CreateDirectory {
            path: directory.clone(),
            source,
        })?;

        RotatingWriter::open(
            directory,
            self.prefix,
            self.extension,
            self.rotation_interval,
            date,
        )
    }
}
