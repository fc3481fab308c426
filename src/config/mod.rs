mod settings;

pub use settings::{
    ConnectionSettings, DatabaseConfig, LoggingConfig, MigrationsConfig, OtelConfig,
    ServerConfig, Settings,
};
