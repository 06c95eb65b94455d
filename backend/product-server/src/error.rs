use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Unable to determine the {0} directory: {1}")]
    Locate(&'static str, #[source] std::io::Error),
    #[error("Unable to parse configuration: {0}")]
    Parse(#[source] config::ConfigError),
    #[error("Invalid configuration value for `{field}`: {source}")]
    Deserialize {
        field: String,
        #[source]
        source: config::ConfigError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Failed while building grpc reflection service: {0}")]
    GrpcReflectionServiceError(#[from] tonic_reflection::server::Error),
    #[error("Error while running the grpc server: {0}")]
    GrpcServerError(#[from] tonic::transport::Error),
    #[error("Connection multiplexer error: {0}")]
    MuxError(#[from] connection_mux::MuxError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("Failed to open log destination: {0}")]
    Rotate(#[from] tracing_rotate::RotateError),
    #[error("Failed to install the global subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}
