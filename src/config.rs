//! replog Configuration
//!
//! TOML configuration for master and secondary nodes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main replog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplogConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// HTTP / WebSocket API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Replication and write concern tuning
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Secondary-only settings
    #[serde(default)]
    pub secondary: SecondaryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Role a node runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Secondary,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// master or secondary
    pub role: NodeRole,

    /// Address to bind for cluster communication
    pub bind_address: String,

    /// Advertised address for other nodes to connect
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Cluster address of the master (secondaries only)
    #[serde(default)]
    pub master_address: Option<String>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Delivery attempts per secondary before giving up (0 = unlimited)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Connect/send timeout per delivery attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Backoff unit; attempt n waits `2^n * base + uniform(0, base)`
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How often pending write concerns are re-checked
    #[serde(default = "default_ack_poll_interval_ms")]
    pub ack_poll_interval_ms: u64,

    /// Answer with a failure after this long (unset = wait forever)
    #[serde(default)]
    pub response_deadline_ms: Option<u64>,

    /// Acks needed for wc=3 (0 = every secondary of the snapshot)
    #[serde(default)]
    pub full_quorum: usize,

    /// Seed for backoff jitter
    #[serde(default)]
    pub jitter_seed: Option<u64>,
}

/// Secondary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryConfig {
    /// Delay before acknowledging a replicated message
    #[serde(default)]
    pub apply_delay_ms: u64,

    /// Wait between registration attempts
    #[serde(default = "default_register_retry_ms")]
    pub register_retry_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_retries() -> u32 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_ack_poll_interval_ms() -> u64 {
    1000
}

fn default_register_retry_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_address(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            ack_poll_interval_ms: default_ack_poll_interval_ms(),
            response_deadline_ms: None,
            full_quorum: 0,
            jitter_seed: None,
        }
    }
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            apply_delay_ms: 0,
            register_retry_ms: default_register_retry_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ReplicationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack_poll_interval_ms)
    }

    pub fn response_deadline(&self) -> Option<Duration> {
        self.response_deadline_ms.map(Duration::from_millis)
    }
}

impl SecondaryConfig {
    pub fn apply_delay(&self) -> Duration {
        Duration::from_millis(self.apply_delay_ms)
    }

    pub fn register_retry(&self) -> Duration {
        Duration::from_millis(self.register_retry_ms)
    }
}

impl ReplogConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ReplogConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if self.node.role == NodeRole::Secondary
            && self.node.master_address.as_deref().map_or(true, str::is_empty)
        {
            return Err(crate::Error::Config(
                "node.master_address is required for secondaries".into(),
            ));
        }

        if self.replication.backoff_base_ms == 0 {
            return Err(crate::Error::Config("replication.backoff_base_ms must be positive".into()));
        }

        if self.replication.max_backoff_ms < self.replication.backoff_base_ms {
            return Err(crate::Error::Config(
                "replication.max_backoff_ms must not be below backoff_base_ms".into(),
            ));
        }

        if self.replication.ack_poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "replication.ack_poll_interval_ms must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Sample configuration written by `replog init`
    pub fn sample(role: NodeRole) -> Self {
        let (id, bind, master) = match role {
            NodeRole::Master => ("master", "0.0.0.0:7654", None),
            NodeRole::Secondary => ("secondary-1", "0.0.0.0:7655", Some("127.0.0.1:7654".to_string())),
        };
        Self {
            node: NodeConfig {
                id: id.to_string(),
                role,
                bind_address: bind.to_string(),
                advertise_address: None,
                master_address: master,
            },
            api: ApiConfig::default(),
            replication: ReplicationConfig::default(),
            secondary: SecondaryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
