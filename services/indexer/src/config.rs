use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the indexer service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// DynamoDB configuration
    pub dynamodb: DynamoDbConfig,
    /// Key layout configuration
    #[serde(default)]
    pub index: IndexConfig,
    /// Local blob cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Upload trigger configuration
    #[serde(default)]
    pub trigger: TriggerConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket receiving image uploads
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// DynamoDB metadata table configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DynamoDbConfig {
    /// Table holding one item per indexed object
    pub table: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for DynamoDB Local, LocalStack, etc.)
    pub endpoint_url: Option<String>,
}

/// Key layout
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexConfig {
    /// Prefix applied to client identifiers to form object keys
    #[serde(default)]
    pub key_prefix: String,
}

/// Local blob cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cached image bytes and their sidecars
    #[serde(default = "default_cache_directory")]
    pub directory: PathBuf,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Upload trigger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Kafka topic receiving bucket notifications; the consumer is
    /// disabled when absent
    pub kafka: Option<KafkaConfig>,
    /// Kafka messages processed concurrently per batch
    #[serde(default = "default_trigger_concurrency")]
    pub concurrency: usize,
    /// Upper bound on retrying a transient extraction failure
    #[serde(default = "default_max_retry_elapsed_secs")]
    pub max_retry_elapsed_secs: u64,
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic the bucket publishes object-created notifications to
    #[serde(default = "default_notifications_topic")]
    pub topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
}

// Default value functions
fn default_service_name() -> String {
    "image-indexer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from("/tmp/image-indexer")
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_trigger_concurrency() -> usize {
    8
}

fn default_max_retry_elapsed_secs() -> u64 {
    60
}

fn default_consumer_group() -> String {
    "image-indexer".to_string()
}

fn default_notifications_topic() -> String {
    "images.uploaded".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "image-indexer")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/indexer").required(false))
            .add_source(config::File::with_name("/etc/image-indexer/indexer").required(false))
            // Override with environment variables
            // INDEXER__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("INDEXER")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat variables used by existing deployments
            .set_override_option("s3.bucket", std::env::var("BUCKET_NAME").ok())?
            .set_override_option("dynamodb.table", std::env::var("DYNAMODB_TABLE").ok())?
            .set_override_option("index.key_prefix", std::env::var("S3_RULE_PREFIX").ok())?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot address any storage
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }
        if self.dynamodb.table.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "dynamodb.table".to_string(),
            ));
        }
        if self.trigger.concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "trigger.concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl TriggerConfig {
    /// Get the retry bound as Duration
    pub fn max_retry_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_retry_elapsed_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            kafka: None,
            concurrency: default_trigger_concurrency(),
            max_retry_elapsed_secs: default_max_retry_elapsed_secs(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
