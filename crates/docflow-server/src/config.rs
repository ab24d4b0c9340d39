//! Configuration management

use serde::{Deserialize, Serialize};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/docflow";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Queue Configuration Constants
// ============================================================================

/// Default lease duration for received queue messages, in seconds.
///
/// A message that is neither acknowledged nor extended within this window
/// becomes visible again and will be redelivered.
pub const DEFAULT_QUEUE_LEASE_SECS: u64 = 300;

/// Default maximum time a single receive call waits for a message.
pub const DEFAULT_QUEUE_WAIT_SECS: u64 = 20;

/// Default number of deliveries before a message is moved to the
/// dead-letter table.
pub const DEFAULT_QUEUE_MAX_RECEIVE_COUNT: i32 = 5;

// ============================================================================
// Worker Configuration Constants
// ============================================================================

/// Default embedding service endpoint.
pub const DEFAULT_EMBED_ENDPOINT: &str = "http://localhost:8080/embed";

/// Default number of chunks per embedding request.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Default sleep after a failed queue poll, in seconds.
pub const DEFAULT_POLL_ERROR_BACKOFF_SECS: u64 = 5;

// ============================================================================
// Retry Configuration Constants
// ============================================================================

/// Default maximum retry attempts for transient failures.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default delay cap for exponential backoff, in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Ingestion queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub lease_secs: u64,
    pub wait_secs: u64,
    pub max_receive_count: i32,
}

/// Processing worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub embed_endpoint: String,
    pub embed_batch_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub poll_error_backoff_secs: u64,
}

/// Retry policy configuration for transient downstream failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("DOCFLOW_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("DOCFLOW_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: std::env::var("DOCFLOW_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: std::env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: std::env::var("DATABASE_IDLE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
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
            queue: QueueConfig {
                lease_secs: std::env::var("QUEUE_LEASE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_QUEUE_LEASE_SECS),
                wait_secs: std::env::var("QUEUE_WAIT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_QUEUE_WAIT_SECS),
                max_receive_count: std::env::var("QUEUE_MAX_RECEIVE_COUNT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_QUEUE_MAX_RECEIVE_COUNT),
            },
            worker: WorkerConfig {
                embed_endpoint: std::env::var("EMBED_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_EMBED_ENDPOINT.to_string()),
                embed_batch_size: std::env::var("EMBED_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_EMBED_BATCH_SIZE),
                chunk_size: std::env::var("CHUNK_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CHUNK_SIZE),
                chunk_overlap: std::env::var("CHUNK_OVERLAP")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CHUNK_OVERLAP),
                poll_error_backoff_secs: std::env::var("POLL_ERROR_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_POLL_ERROR_BACKOFF_SECS),
            },
            retry: RetryConfig {
                max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
                base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
                max_delay_ms: std::env::var("RETRY_MAX_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
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

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.queue.lease_secs == 0 {
            anyhow::bail!("Queue lease_secs must be greater than 0");
        }

        if self.queue.max_receive_count <= 0 {
            anyhow::bail!("Queue max_receive_count must be greater than 0");
        }

        if self.worker.embed_batch_size == 0 {
            anyhow::bail!("Worker embed_batch_size must be greater than 0");
        }

        if self.worker.chunk_size == 0 {
            anyhow::bail!("Worker chunk_size must be greater than 0");
        }

        if self.worker.chunk_overlap >= self.worker.chunk_size {
            anyhow::bail!(
                "Worker chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.worker.chunk_overlap,
                self.worker.chunk_size
            );
        }

        if self.retry.base_delay_ms == 0 {
            anyhow::bail!("Retry base_delay_ms must be greater than 0");
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            anyhow::bail!(
                "Retry max_delay_ms ({}) cannot be smaller than base_delay_ms ({})",
                self.retry.max_delay_ms,
                self.retry.base_delay_ms
            );
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
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            queue: QueueConfig {
                lease_secs: DEFAULT_QUEUE_LEASE_SECS,
                wait_secs: DEFAULT_QUEUE_WAIT_SECS,
                max_receive_count: DEFAULT_QUEUE_MAX_RECEIVE_COUNT,
            },
            worker: WorkerConfig {
                embed_endpoint: DEFAULT_EMBED_ENDPOINT.to_string(),
                embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
                chunk_size: DEFAULT_CHUNK_SIZE,
                chunk_overlap: DEFAULT_CHUNK_OVERLAP,
                poll_error_backoff_secs: DEFAULT_POLL_ERROR_BACKOFF_SECS,
            },
            retry: RetryConfig {
                max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
                base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
                max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_lease() {
        let mut config = Config::default();
        config.queue.lease_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_larger_than_chunk() {
        let mut config = Config::default();
        config.worker.chunk_size = 100;
        config.worker.chunk_overlap = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_retry_delays() {
        let mut config = Config::default();
        config.retry.base_delay_ms = 1000;
        config.retry.max_delay_ms = 500;
        assert!(config.validate().is_err());
    }
}
