use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use connection_mux::MuxConfig;

use crate::{consts, error::ConfigurationError};

/// Immutable configuration snapshot, shared for the lifetime of the process.
#[derive(Clone, serde::Deserialize, Debug)]
#[serde(default)]
pub struct Configuration {
    pub database: Database,
    #[serde(rename = "externalconnection")]
    pub external_connection: ExternalConnection,
    /// `":port"` or `"host:port"`; shared by HTTP and gRPC.
    #[serde(rename = "appport")]
    pub app_port: String,
    #[serde(rename = "grpcport")]
    pub grpc_port: String,
    #[serde(rename = "imagepath")]
    pub image_path: String,
    pub mux: Mux,
    #[serde(rename = "shutdowntimeoutsecs")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Clone, serde::Deserialize)]
#[serde(default)]
pub struct Database {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub debug: bool,
}

#[derive(Clone, serde::Deserialize, Debug, Default)]
#[serde(default)]
pub struct ExternalConnection {
    #[serde(rename = "authservice")]
    pub auth_service: AuthService,
}

#[derive(Clone, serde::Deserialize, Debug, Default)]
#[serde(default)]
pub struct AuthService {
    pub host: String,
}

#[derive(Clone, serde::Deserialize, Debug)]
#[serde(default)]
pub struct Mux {
    #[serde(rename = "snifftimeoutms")]
    pub sniff_timeout_ms: u64,
    #[serde(rename = "maxsniffbytes")]
    pub max_sniff_bytes: usize,
    pub backlog: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            database: Database::default(),
            external_connection: ExternalConnection::default(),
            app_port: ":8080".to_string(),
            grpc_port: ":50051".to_string(),
            image_path: "images".to_string(),
            mux: Mux::default(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "product".to_string(),
            debug: false,
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"*** redacted ***")
            .field("dbname", &self.dbname)
            .field("debug", &self.debug)
            .finish()
    }
}

impl Default for Mux {
    fn default() -> Self {
        let defaults = MuxConfig::default();
        Self {
            sniff_timeout_ms: u64::try_from(defaults.sniff_timeout.as_millis()).unwrap_or(u64::MAX),
            max_sniff_bytes: defaults.max_sniff_bytes,
            backlog: defaults.backlog,
        }
    }
}

impl From<&Mux> for MuxConfig {
    fn from(mux: &Mux) -> Self {
        Self {
            sniff_timeout: Duration::from_millis(mux.sniff_timeout_ms),
            max_sniff_bytes: mux.max_sniff_bytes,
            backlog: mux.backlog,
        }
    }
}

impl Configuration {
    /// Loads the configuration using the live working directory, executable
    /// location and environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        ConfigResolver::from_process()?.load(path)
    }

    /// Address for the shared listener. A bare `":port"` binds every
    /// interface.
    pub fn listen_address(&self) -> String {
        match self.app_port.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.app_port.clone(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn mux_config(&self) -> MuxConfig {
        MuxConfig::from(&self.mux)
    }

    pub async fn tcp_listener(&self) -> Result<tokio::net::TcpListener, std::io::Error> {
        let loc = self.listen_address();

        tracing::info!(loc = %loc, "binding the server");

        tokio::net::TcpListener::bind(loc).await
    }
}

type Strategy = fn(&ConfigResolver, &Path) -> Option<PathBuf>;

/// Candidate locations for a non-empty config path, tried in order.
const STRATEGIES: [(&str, Strategy); 2] = [
    ("working directory", ConfigResolver::relative_to_current_dir),
    ("executable directory", ConfigResolver::relative_to_executable_dir),
];

/// Locates and loads the configuration document.
///
/// Everything the lookup depends on is captured up front, so two resolvers
/// built from the same inputs produce the same [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    current_dir: PathBuf,
    executable_dir: Option<PathBuf>,
    environment: HashMap<String, String>,
}

impl ConfigResolver {
    pub fn new(current_dir: impl Into<PathBuf>, executable_dir: Option<PathBuf>) -> Self {
        Self {
            current_dir: current_dir.into(),
            executable_dir,
            environment: HashMap::new(),
        }
    }

    /// Replaces the environment variables consulted for overrides.
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn from_process() -> Result<Self, ConfigurationError> {
        let current_dir = std::env::current_dir()
            .map_err(|error| ConfigurationError::Locate("working", error))?;

        let executable_dir = match std::env::current_exe() {
            Ok(executable) => executable.parent().map(Path::to_path_buf),
            Err(error) => {
                tracing::debug!(%error, "executable location unavailable, skipping that lookup");
                None
            }
        };

        // variables that are not valid unicode cannot be overrides
        let environment = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .filter(|(key, _)| key.starts_with(consts::ENV_PREFIX))
            .collect();

        Ok(Self::new(current_dir, executable_dir).with_environment(environment))
    }

    /// Returns the file to read, or `None` when the default file is absent.
    pub fn resolve_path(&self, path: &Path) -> Result<Option<PathBuf>, ConfigurationError> {
        if path.as_os_str().is_empty() {
            let default = self.current_dir.join(consts::DEFAULT_CONFIG_FILE);
            return Ok(default.is_file().then_some(default));
        }

        for (source, strategy) in STRATEGIES {
            if let Some(found) = strategy(self, path) {
                tracing::debug!(source, path = %found.display(), "configuration file located");
                return Ok(Some(found));
            }
        }

        Err(ConfigurationError::NotFound(path.to_path_buf()))
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<Configuration, ConfigurationError> {
        let file = self.resolve_path(path.as_ref())?;

        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(
                config::File::from(file)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(consts::ENV_PREFIX)
                    .separator(consts::ENV_SEPARATOR)
                    .source(Some(self.environment.clone().into_iter().collect())),
            )
            .build()
            .map_err(ConfigurationError::Parse)?;

        serde_path_to_error::deserialize(config).map_err(|error| {
            let field = error.path().to_string();
            ConfigurationError::Deserialize {
                field,
                source: error.into_inner(),
            }
        })
    }

    fn relative_to_current_dir(&self, path: &Path) -> Option<PathBuf> {
        let candidate = self.current_dir.join(path);
        candidate.is_file().then_some(candidate)
    }

    fn relative_to_executable_dir(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            return None;
        }
        let candidate = self.executable_dir.as_ref()?.join(path);
        candidate.is_file().then_some(candidate)
    }
}
