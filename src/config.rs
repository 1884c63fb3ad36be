use serde::{Deserialize, Serialize};

/// Main application configuration
///
/// Every key can be overridden from the environment with the `REPORTING_`
/// prefix, e.g. `REPORTING_LISTEN`, `REPORTING_REINDEX_BATCH_SIZE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Document store endpoints
    #[serde(default = "default_search_addresses")]
    pub search_addresses: Vec<String>,

    /// Devices index name
    #[serde(default = "default_devices_index_name")]
    pub devices_index_name: String,

    /// Devices index shard count
    #[serde(default = "default_devices_index_shards")]
    pub devices_index_shards: u32,

    /// Devices index replica count
    #[serde(default = "default_devices_index_replicas")]
    pub devices_index_replicas: u32,

    /// Device authentication service URL
    #[serde(default = "default_device_auth_addr")]
    pub device_auth_addr: String,

    /// Inventory service URL
    #[serde(default = "default_inventory_addr")]
    pub inventory_addr: String,

    /// Deployments service URL
    #[serde(default = "default_deployments_addr")]
    pub deployments_addr: String,

    /// NATS server URI
    #[serde(default = "default_nats_uri")]
    pub nats_uri: String,

    /// NATS JetStream stream name
    #[serde(default = "default_nats_stream_name")]
    pub nats_stream_name: String,

    /// NATS subscriber topic
    #[serde(default = "default_nats_subscriber_topic")]
    pub nats_subscriber_topic: String,

    /// NATS durable consumer name
    #[serde(default = "default_nats_subscriber_durable")]
    pub nats_subscriber_durable: String,

    /// Max jobs per reindex batch
    #[serde(default = "default_reindex_batch_size")]
    pub reindex_batch_size: usize,

    /// Max batch latency in milliseconds
    #[serde(default = "default_reindex_max_time_msec")]
    pub reindex_max_time_msec: u64,

    /// Number of reindex worker tasks
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// MongoDB connection string for the mapping store
    #[serde(default = "default_mongo")]
    pub mongo: String,

    /// Enable TLS for the mapping store connection
    #[serde(default)]
    pub db_ssl: bool,

    /// Mapping store username
    pub db_username: Option<String>,

    /// Mapping store password
    pub db_password: Option<String>,

    /// Enable debug logging
    #[serde(default)]
    pub debug_log: bool,
}

impl Config {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let cfg: Config = builder
            .add_source(
                config::Environment::with_prefix("REPORTING")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("search_addresses"),
            )
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.reindex_batch_size == 0 {
            return Err(config::ConfigError::Message(
                "reindex_batch_size must be a positive integer".to_string(),
            ));
        }
        if self.worker_concurrency == 0 {
            return Err(config::ConfigError::Message(
                "worker_concurrency must be a positive integer".to_string(),
            ));
        }
        if self.search_addresses.is_empty() {
            return Err(config::ConfigError::Message(
                "search_addresses must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            search_addresses: default_search_addresses(),
            devices_index_name: default_devices_index_name(),
            devices_index_shards: default_devices_index_shards(),
            devices_index_replicas: default_devices_index_replicas(),
            device_auth_addr: default_device_auth_addr(),
            inventory_addr: default_inventory_addr(),
            deployments_addr: default_deployments_addr(),
            nats_uri: default_nats_uri(),
            nats_stream_name: default_nats_stream_name(),
            nats_subscriber_topic: default_nats_subscriber_topic(),
            nats_subscriber_durable: default_nats_subscriber_durable(),
            reindex_batch_size: default_reindex_batch_size(),
            reindex_max_time_msec: default_reindex_max_time_msec(),
            worker_concurrency: default_worker_concurrency(),
            mongo: default_mongo(),
            db_ssl: false,
            db_username: None,
            db_password: None,
            debug_log: false,
        }
    }
}

// Default value functions
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_search_addresses() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_devices_index_name() -> String {
    "devices".to_string()
}

fn default_devices_index_shards() -> u32 {
    1
}

fn default_devices_index_replicas() -> u32 {
    0
}

fn default_device_auth_addr() -> String {
    "http://mender-device-auth:8080/".to_string()
}

fn default_inventory_addr() -> String {
    "http://mender-inventory:8080/".to_string()
}

fn default_deployments_addr() -> String {
    "http://mender-deployments:8080/".to_string()
}

fn default_nats_uri() -> String {
    "nats://mender-nats:4222".to_string()
}

fn default_nats_stream_name() -> String {
    "WORKFLOWS".to_string()
}

fn default_nats_subscriber_topic() -> String {
    "reporting".to_string()
}

fn default_nats_subscriber_durable() -> String {
    "reporting".to_string()
}

fn default_reindex_batch_size() -> usize {
    100
}

fn default_reindex_max_time_msec() -> u64 {
    1000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_mongo() -> String {
    "mongodb://mender-mongo:27017".to_string()
}
