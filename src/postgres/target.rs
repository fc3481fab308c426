//! Validated connection target derived from [`DatabaseConfig`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::config::DatabaseConfig;
use crate::error::{DbError, Result};

/// Pool size used when the configuration leaves `max_conns` at 0.
pub const DEFAULT_MAX_CONNS: u32 = 10;

/// TLS negotiation mode for PostgreSQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = DbError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" | "" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(DbError::invalid_config(
                "ssl_mode",
                format!("unknown ssl mode '{}'", other),
            )),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a provider needs to create a pool.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: SslMode,
    pub max_conns: u32,
    pub min_conns: u32,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl ConnectTarget {
    /// Validate `config` and build a target. Performs no network action.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        for (field, value) in [
            ("host", &config.host),
            ("database", &config.database),
            ("user", &config.user),
            ("password", &config.password),
            ("ssl_mode", &config.ssl_mode),
        ] {
            if value.contains('\0') {
                return Err(DbError::invalid_config(field, "contains a NUL byte"));
            }
        }

        if config.host.trim().is_empty() {
            return Err(DbError::invalid_config("host", "must not be empty"));
        }
        if config.port == 0 {
            return Err(DbError::invalid_config("port", "must be greater than 0"));
        }

        let ssl_mode = config.ssl_mode.parse::<SslMode>()?;
        let max_conns = pool_size("max_conns", "MaxConns", config.max_conns)?;
        let min_conns = pool_size("min_conns", "MinConns", config.min_conns)?;

        let max_conns = if max_conns == 0 {
            DEFAULT_MAX_CONNS
        } else {
            max_conns
        };
        if min_conns > max_conns {
            return Err(DbError::invalid_config(
                "min_conns",
                format!("MinConns {} exceeds MaxConns {}", min_conns, max_conns),
            ));
        }

        let connect_timeout = match config.connect_timeout() {
            timeout if timeout.is_zero() => Duration::from_secs(10),
            timeout => timeout,
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            ssl_mode,
            max_conns,
            min_conns,
            max_lifetime: config.conn_max_lifetime(),
            idle_timeout: config.conn_max_idle_time(),
            connect_timeout,
        })
    }

    /// `postgres://` URL for tools that take a connection string, such as
    /// the migration runner.
    pub fn database_url(&self) -> Result<String> {
        self.build_url(Some(self.password.as_str()))
    }

    /// URL with the password masked for safe logging.
    pub fn database_url_masked(&self) -> String {
        let masked = (!self.password.is_empty()).then_some("***");
        self.build_url(masked)
            .unwrap_or_else(|_| format!("postgres://{}@{}:{}/{}", self.user, self.host, self.port, self.database))
    }

    fn build_url(&self, password: Option<&str>) -> Result<String> {
        let invalid = |message: &str| DbError::invalid_config("database_url", message.to_string());

        let mut url = Url::parse(&format!("postgres://{}", self.host))
            .map_err(|e| invalid(&format!("failed to parse database URL: {}", e)))?;
        url.set_port(Some(self.port))
            .map_err(|_| invalid("failed to set port"))?;
        url.set_username(&self.user)
            .map_err(|_| invalid("failed to set user"))?;
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| invalid("failed to set password"))?;
        }
        url.set_path(&self.database);
        url.query_pairs_mut()
            .append_pair("sslmode", self.ssl_mode.as_str());

        Ok(url.to_string())
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("url", &self.database_url_masked())
            .field("max_conns", &self.max_conns)
            .field("min_conns", &self.min_conns)
            .field("max_lifetime", &self.max_lifetime)
            .field("idle_timeout", &self.idle_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Pool sizes must fit the provider's signed 32-bit size field.
fn pool_size(field: &'static str, label: &str, value: i64) -> Result<u32> {
    if value < 0 || value > i64::from(i32::MAX) {
        return Err(DbError::invalid_config(
            field,
            format!("{} out of range for int32: {}", label, value),
        ));
    }
    Ok(value as u32)
}
