//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/lives";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default directory for published export archives.
pub const DEFAULT_EXPORT_DATA_DIR: &str = "./lives-data";

/// Default public base URL used when rendering artifact links.
pub const DEFAULT_EXPORT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default build lease in seconds. A build lock held longer than this is
/// considered abandoned and may be reclaimed by a later trigger.
pub const DEFAULT_EXPORT_BUILD_LEASE_SECS: u64 = 900;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub export: ExportConfig,
    pub cors: CorsConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Export subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory holding the published archive per locality.
    pub data_dir: PathBuf,
    /// Public base URL prefixed to artifact links in metadata responses.
    pub base_url: String,
    /// Upper bound on how long a build lock stays valid.
    pub build_lease_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("LIVES_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("LIVES_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            },
            export: ExportConfig {
                data_dir: std::env::var("EXPORT_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_EXPORT_DATA_DIR)),
                base_url: std::env::var("EXPORT_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_EXPORT_BASE_URL.to_string()),
                build_lease_secs: std::env::var("EXPORT_BUILD_LEASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_EXPORT_BUILD_LEASE_SECS),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                allow_credentials: std::env::var("CORS_ALLOW_CREDENTIALS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.export.build_lease_secs == 0 {
            anyhow::bail!("Export build lease must be greater than 0 seconds");
        }

        if self.export.base_url.ends_with('/') {
            anyhow::bail!("Export base URL must not end with a trailing slash");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            export: ExportConfig {
                data_dir: PathBuf::from(DEFAULT_EXPORT_DATA_DIR),
                base_url: DEFAULT_EXPORT_BASE_URL.to_string(),
                build_lease_secs: DEFAULT_EXPORT_BUILD_LEASE_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
        }
    }
}
