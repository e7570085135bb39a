#[cfg(feature = "cli")]
use clap::Parser;
use std::time::Duration;

use crate::worker::{RetryPolicy, WorkerConfig};

/// # Nexus Gateway Configuration
///
/// Command-line arguments, environment variables, and `.env` file loading
/// for the gateway server and its batch worker pool.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", command(name = "nexus-gateway"))]
#[cfg_attr(feature = "cli", command(about = "OpenAI-compatible LLM gateway with model routing and asynchronous batch generation"))]
#[cfg_attr(feature = "cli", command(version))]
pub struct Config {
    // =============================================================================
    // CORE SERVER CONFIGURATION
    // =============================================================================

    /// Server port to listen on
    #[cfg_attr(feature = "cli", arg(short, long, env = "PORT", default_value = "8000"))]
    pub port: u16,

    /// Server host to bind to
    #[cfg_attr(feature = "cli", arg(long, env = "HOST", default_value = "0.0.0.0"))]
    pub host: String,

    /// Service name reported by /health
    #[cfg_attr(feature = "cli", arg(long, env = "SERVICE_NAME", default_value = "LLM Gateway API"))]
    pub service_name: String,

    // =============================================================================
    // MODEL REGISTRY AND BACKEND CREDENTIALS
    // =============================================================================

    /// Path to the model registry YAML file
    #[cfg_attr(feature = "cli", arg(long, env = "MODELS_CONFIG", default_value = "config/models.yaml"))]
    pub models_config: String,

    /// API key for `openai` backends
    #[cfg_attr(feature = "cli", arg(long, env = "OPENAI_API_KEY"))]
    pub openai_api_key: Option<String>,

    /// Organization header for `openai` backends
    #[cfg_attr(feature = "cli", arg(long, env = "OPENAI_ORGANIZATION"))]
    pub openai_organization: Option<String>,

    /// Bearer token for `openai_compatible` backends, if they require one
    #[cfg_attr(feature = "cli", arg(long, env = "COMPATIBLE_API_KEY"))]
    pub compatible_api_key: Option<String>,

    // =============================================================================
    // AUTHENTICATION
    // =============================================================================

    /// Comma-separated list of accepted client API keys (empty = development mode)
    #[cfg_attr(feature = "cli", arg(long, env = "API_KEYS", default_value = ""))]
    pub api_keys: String,

    // =============================================================================
    // HTTP CLIENT
    // =============================================================================

    /// HTTP client timeout in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "HTTP_CLIENT_TIMEOUT", default_value = "60"))]
    pub http_client_timeout: u64,

    /// Maximum idle connections kept per backend host
    #[cfg_attr(feature = "cli", arg(long, env = "HTTP_CLIENT_MAX_CONNECTIONS_PER_HOST", default_value = "10"))]
    pub http_client_max_connections_per_host: usize,

    // =============================================================================
    // BATCH WORKERS
    // =============================================================================

    /// Number of batch workers
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_WORKERS", default_value = "4"))]
    pub batch_workers: usize,

    /// Maximum backend attempts per task (including the first)
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_MAX_ATTEMPTS", default_value = "4"))]
    pub max_attempts: u32,

    /// Backoff delay before the second attempt, in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_RETRY_BASE_DELAY_MS", default_value = "500"))]
    pub retry_base_delay_ms: u64,

    /// Upper bound for any single backoff delay, in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_RETRY_MAX_DELAY_MS", default_value = "30000"))]
    pub retry_max_delay_ms: u64,

    /// Random jitter applied to backoff delays (0.0 - 1.0)
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_RETRY_JITTER", default_value = "0.1"))]
    pub retry_jitter: f64,

    /// Queue lease (visibility timeout) in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_LEASE_TIMEOUT", default_value = "300"))]
    pub lease_timeout_secs: u64,

    /// How long an idle worker waits on the queue before re-checking, in milliseconds
    #[cfg_attr(feature = "cli", arg(long, env = "BATCH_DEQUEUE_WAIT_MS", default_value = "5000"))]
    pub dequeue_wait_ms: u64,

    /// Timeout for a single backend call, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "BACKEND_REQUEST_TIMEOUT", default_value = "60"))]
    pub request_timeout_secs: u64,

    /// Time allowed for workers to drain on shutdown, in seconds
    #[cfg_attr(feature = "cli", arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "30"))]
    pub shutdown_timeout_secs: u64,

    // =============================================================================
    // LOGGING
    // =============================================================================

    /// Log level (error, warn, info, debug, trace)
    #[cfg_attr(feature = "cli", arg(long, env = "RUST_LOG", default_value = "info"))]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[cfg_attr(feature = "cli", arg(long, env = "ENVIRONMENT", default_value = "development"))]
    pub environment: String,
}

impl Config {
    /// Parse configuration from command line arguments and environment
    /// variables, set up logging, and validate. Exits the process on an
    /// invalid configuration.
    #[cfg(feature = "cli")]
    pub fn parse_args() -> Self {
        // Load .env file if it exists (ignore errors if file doesn't exist)
        let _ = dotenv::dotenv();

        let config = Self::parse();

        config.setup_logging();

        if let Err(err) = config.validate() {
            eprintln!("Configuration validation failed: {}", err);
            std::process::exit(1);
        }

        config
    }

    /// Configuration with defaults suitable for tests: fast backoff, short
    /// waits, no jitter.
    pub fn for_test() -> Self {
        Self {
            port: 8000,
            host: "127.0.0.1".to_string(),
            service_name: "LLM Gateway API".to_string(),
            models_config: "config/models.yaml".to_string(),
            openai_api_key: None,
            openai_organization: None,
            compatible_api_key: None,
            api_keys: String::new(),
            http_client_timeout: 30,
            http_client_max_connections_per_host: 10,
            batch_workers: 2,
            max_attempts: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 10,
            retry_jitter: 0.0,
            lease_timeout_secs: 30,
            dequeue_wait_ms: 20,
            request_timeout_secs: 5,
            shutdown_timeout_secs: 5,
            log_level: "info".to_string(),
            environment: "development".to_string(),
        }
    }

    /// Parsed client API keys. Empty means authentication is disabled.
    pub fn api_key_set(&self) -> Vec<String> {
        self.api_keys
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.batch_workers,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
                jitter: self.retry_jitter,
            },
            lease_timeout: Duration::from_secs(self.lease_timeout_secs),
            dequeue_wait: Duration::from_millis(self.dequeue_wait_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[cfg(feature = "cli")]
    fn setup_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(&self.log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init();
    }

    /// Validate configuration values and provide helpful error messages.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0. Please specify a valid port number (1-65535).".to_string());
        }

        if self.host.is_empty() {
            return Err("Host cannot be empty. Please specify a valid host (e.g., '0.0.0.0', 'localhost', or an IP address).".to_string());
        }

        if self.models_config.is_empty() {
            return Err("Model config path cannot be empty. Set MODELS_CONFIG to the registry YAML file.".to_string());
        }

        if self.http_client_timeout == 0 {
            return Err("HTTP client timeout must be greater than 0 seconds.".to_string());
        }
        if self.http_client_max_connections_per_host == 0 {
            return Err("HTTP client max connections per host must be greater than 0.".to_string());
        }

        if self.batch_workers == 0 {
            return Err("At least one batch worker is required (BATCH_WORKERS >= 1).".to_string());
        }
        if self.max_attempts == 0 {
            return Err("BATCH_MAX_ATTEMPTS must be at least 1.".to_string());
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(format!(
                "Retry base delay ({}ms) exceeds the maximum delay ({}ms).",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(format!("Retry jitter {} must be between 0.0 and 1.0.", self.retry_jitter));
        }
        if self.lease_timeout_secs == 0 {
            return Err("Lease timeout must be greater than 0 seconds.".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("Backend request timeout must be greater than 0 seconds.".to_string());
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.environment.as_str()) {
            return Err(format!(
                "Invalid environment '{}'. Valid options are: {}",
                self.environment,
                valid_environments.join(", ")
            ));
        }

        if self.environment == "production" && self.api_key_set().is_empty() {
            eprintln!(
                "⚠️  Warning: No API_KEYS configured in production. \
                All requests will be accepted without authentication."
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_test_is_valid() {
        assert!(Config::for_test().validate().is_ok());
    }

    #[test]
    fn test_api_key_parsing() {
        let mut config = Config::for_test();
        config.api_keys = " key-one, ,key-two ,".to_string();
        assert_eq!(config.api_key_set(), vec!["key-one", "key-two"]);

        config.api_keys = String::new();
        assert!(config.api_key_set().is_empty());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = Config::for_test();
        config.batch_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = Config::for_test();
        config.retry_base_delay_ms = 100;
        config.retry_max_delay_ms = 10;
        assert!(config.validate().unwrap_err().contains("exceeds"));
    }

    #[test]
    fn test_rejects_bad_jitter() {
        let mut config = Config::for_test();
        config.retry_jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_config_mapping() {
        let config = Config::for_test();
        let worker = config.worker_config();
        assert_eq!(worker.workers, 2);
        assert_eq!(worker.retry.max_attempts, 3);
        assert_eq!(worker.retry.base_delay, Duration::from_millis(1));
        assert_eq!(worker.lease_timeout, Duration::from_secs(30));
    }
}
