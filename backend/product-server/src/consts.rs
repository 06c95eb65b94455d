/// Header key for request ID
pub const X_REQUEST_ID: &str = "x-request-id";

/// Prefix of every environment variable read by the service
pub const ENV_PREFIX: &str = "PRODUCT";

/// Separator between the prefix and the key path segments of an environment
/// variable, e.g. `PRODUCT_DATABASE_HOST`
pub const ENV_SEPARATOR: &str = "_";

/// Routes log output to stdout instead of the rotating file when set to `true`
pub const LOG_TO_STDOUT_ENV: &str = "PRODUCT_LOG_TO_STDOUT";

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";
pub const DEFAULT_LOG_DIRECTORY: &str = "../logs";

/// Name under which the service reports its health
pub const SERVICE_NAME: &str = "product";
