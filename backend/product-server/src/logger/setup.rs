//! Setup logging subsystem.
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_rotate::{RotatingWriter, RotationTask};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{consts, error::LoggerError};

/// Crates of this workspace, logged at the verbose level by default.
const WORKSPACE_CRATES: [&str; 4] = [
    "product_server",
    "connection_mux",
    "tracing_rotate",
    "shared_metrics",
];

/// Where log records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    /// Dated files under this directory, rotated daily.
    Directory(PathBuf),
}

impl LogDestination {
    /// Reads `PRODUCT_LOG_TO_STDOUT` once; `true` in any case selects stdout.
    pub fn from_env(directory: impl Into<PathBuf>) -> Self {
        let flag = std::env::var(consts::LOG_TO_STDOUT_ENV).ok();
        Self::resolve(flag.as_deref(), directory)
    }

    pub fn resolve(log_to_stdout: Option<&str>, directory: impl Into<PathBuf>) -> Self {
        if log_to_stdout.is_some_and(|value| value.eq_ignore_ascii_case("true")) {
            Self::Stdout
        } else {
            Self::Directory(directory.into())
        }
    }
}

/// Contains guards necessary for logging
#[derive(Debug)]
pub struct TelemetryGuard {
    _log_guards: Vec<WorkerGuard>,
    _rotation: Option<RotationTask>,
}

/// Setup logging sub-system specifying the log destination, service (binary) name, and a
/// list of external crates for which a more verbose logging must be enabled. All crates within the
/// current cargo workspace are automatically considered for verbose logging.
///
/// `RUST_LOG` replaces the computed filter when set. Must be called from
/// within a tokio runtime when logging to a directory, since the rotation
/// task is spawned here.
pub fn setup(
    destination: &LogDestination,
    service_name: &str,
    crates_to_filter: impl AsRef<[&'static str]>,
) -> Result<TelemetryGuard, LoggerError> {
    let (writer, guard, rotation) = match destination {
        LogDestination::Stdout => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (writer, guard, None)
        }
        LogDestination::Directory(directory) => {
            tracing_rotate::init();

            let file = RotatingWriter::builder().directory(directory).build()?;
            let rotation = file.spawn_rotation();
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, Some(rotation))
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(get_envfilter_directive(
            tracing::Level::WARN,
            tracing::Level::INFO,
            crates_to_filter.as_ref(),
        ))
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(matches!(destination, LogDestination::Stdout));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()?;

    tracing::info!(
        service_name,
        build_version = crate::version!(),
        destination = ?destination,
        "Logging subsystem initialized"
    );

    // Returning the TelemetryGuard for logs to be flushed and the file to keep rotating until
    // it is dropped
    Ok(TelemetryGuard {
        _log_guards: vec![guard],
        _rotation: rotation,
    })
}

fn get_envfilter_directive(
    default_log_level: tracing::Level,
    filter_log_level: tracing::Level,
    crates_to_filter: impl AsRef<[&'static str]>,
) -> String {
    let mut explicitly_handled_targets = WORKSPACE_CRATES.to_vec();
    explicitly_handled_targets.extend(crates_to_filter.as_ref());
    explicitly_handled_targets.sort_unstable();
    explicitly_handled_targets.dedup();

    // +1 for the default log level added as a directive
    let num_directives = explicitly_handled_targets.len() + 1;

    explicitly_handled_targets
        .into_iter()
        .map(|crate_name| crate_name.replace('-', "_"))
        .zip(std::iter::repeat(filter_log_level))
        .fold(
            {
                let mut directives = Vec::with_capacity(num_directives);
                directives.push(default_log_level.to_string());
                directives
            },
            |mut directives, (target, level)| {
                directives.push(format!("{target}={level}"));
                directives
            },
        )
        .join(",")
}
