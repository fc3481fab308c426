use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Connection target and pool sizing for PostgreSQL.
///
/// Pool sizes are signed so out-of-range values survive deserialization and
/// can be rejected with a precise error at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub database: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// disable, allow, prefer, require, verify-ca or verify-full
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    /// 0 selects the default pool size
    #[serde(default = "default_max_conns")]
    pub max_conns: i64,
    #[serde(default)]
    pub min_conns: i64,
    /// 0 disables lifetime-based recycling
    #[serde(default = "default_conn_max_lifetime")]
    pub conn_max_lifetime_seconds: u64,
    /// 0 disables idle reaping
    #[serde(default = "default_conn_max_idle_time")]
    pub conn_max_idle_time_seconds: u64,
    /// Per-attempt limit on establishing the first pooled connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_seconds: u64,
}

impl DatabaseConfig {
    pub fn conn_max_lifetime(&self) -> Option<Duration> {
        non_zero_seconds(self.conn_max_lifetime_seconds)
    }

    pub fn conn_max_idle_time(&self) -> Option<Duration> {
        non_zero_seconds(self.conn_max_idle_time_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_timeout_seconds)
    }
}

fn non_zero_seconds(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Timeouts applied by the connection manager. The connect retry budget
/// lives in [`DatabaseConfig::retry_timeout_seconds`].
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_health_timeout")]
    pub health_timeout_seconds: u64,
    /// Readiness wait used by the `wait` command
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationsConfig {
    #[serde(default = "default_migrations_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "postgres".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_max_conns() -> i64 {
    10
}

fn default_conn_max_lifetime() -> u64 {
    3600 // 1 hour
}

fn default_conn_max_idle_time() -> u64 {
    1800 // 30 minutes
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_retry_timeout() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

fn default_ready_timeout() -> u64 {
    60
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_migrations_path() -> String {
    "migrations".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "pg-resilience".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8090)?
            .set_default("connection.health_timeout_seconds", 5)?
            .set_default("database.retry_timeout_seconds", 30)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // PGRES_DATABASE__HOST, PGRES_DATABASE__MAX_CONNS, PGRES_SERVER__PORT, ...
            .add_source(
                Environment::with_prefix("PGRES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            connection: ConnectionSettings::default(),
            server: ServerConfig::default(),
            migrations: MigrationsConfig::default(),
            logging: LoggingConfig::default(),
            otel: OtelConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            database: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
            max_conns: default_max_conns(),
            min_conns: 0,
            conn_max_lifetime_seconds: default_conn_max_lifetime(),
            conn_max_idle_time_seconds: default_conn_max_idle_time(),
            connect_timeout_seconds: default_connect_timeout(),
            retry_timeout_seconds: default_retry_timeout(),
        }
    }
}

impl ConnectionSettings {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            health_timeout_seconds: default_health_timeout(),
            ready_timeout_seconds: default_ready_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            path: default_migrations_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
