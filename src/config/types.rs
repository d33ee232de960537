use serde::{Deserialize, Serialize};

/// `[main]` section: upstream connection parameters and process-wide policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    pub stream_uri: String,
    pub base_uri: String,

    #[serde(default)]
    pub exit_on_error: bool,

    #[serde(default)]
    pub ignore_connection_errors: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

pub(crate) fn default_port() -> u16 {
    8030
}

pub(crate) fn default_heartbeat_secs() -> u64 {
    15
}

pub(crate) fn default_init_timeout_secs() -> u64 {
    10
}

/// `[events]` section: analytics-event forwarding (contract only, see §1 Non-goals).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default)]
    pub events_uri: Option<String>,

    #[serde(default)]
    pub send_events: bool,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: u64,

    #[serde(default = "default_capacity")]
    pub capacity: u64,
}

fn default_flush_interval() -> u64 {
    5
}

fn default_sampling_interval() -> u64 {
    0
}

fn default_capacity() -> u64 {
    1000
}

/// `[redis]` section: shared persistent store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default = "default_local_ttl_ms")]
    pub local_ttl_ms: u64,
}

fn default_redis_port() -> u16 {
    6379
}

fn default_local_ttl_ms() -> u64 {
    30_000
}

/// One repeatable `[environment "<name>"]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub api_key: String,

    #[serde(default)]
    pub mobile_key: Option<String>,

    #[serde(default)]
    pub env_id: Option<String>,

    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub main: MainConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub redis: Option<RedisConfig>,

    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
}
