//! Configuration file handling for portcalld.

use std::path::Path;

use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
#[allow(dead_code)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// TLS configuration
    #[serde(default)]
    pub tls: TlsServerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            tls: TlsServerConfig::default(),
        }
    }
}

/// TLS configuration for the server.
#[derive(Debug, Default, Deserialize)]
#[allow(dead_code)]
pub struct TlsServerConfig {
    /// Enable TLS
    #[serde(default)]
    pub enabled: bool,

    /// Path to certificate file (PEM format)
    pub cert_path: Option<String>,

    /// Path to private key file (PEM format)
    pub key_path: Option<String>,

    /// Optional path to CA certificate for client authentication (mTLS)
    pub ca_path: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_max_connections() -> usize {
    10000
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Authentication configuration.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct AuthConfig {
    /// Enable authentication
    #[serde(default)]
    pub enabled: bool,

    /// Allow anonymous connections
    #[serde(default = "default_allow_anonymous")]
    pub allow_anonymous: bool,

    /// Path to a `username:hash` password file
    pub password_file: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_anonymous: default_allow_anonymous(),
            password_file: None,
        }
    }
}

fn default_allow_anonymous() -> bool {
    true
}

/// Server-wide limits consulted by the CONNECT admission pipeline.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct AdmissionConfig {
    #[serde(default = "default_max_client_id_length")]
    pub max_client_id_length: usize,

    #[serde(default = "default_max_session_expiry_interval")]
    pub max_session_expiry_interval: u32,

    #[serde(default = "default_max_message_expiry_interval")]
    pub max_message_expiry_interval: u32,

    #[serde(default = "default_true")]
    pub topic_alias_enabled: bool,

    #[serde(default = "default_topic_alias_max_per_client")]
    pub topic_alias_max_per_client: u16,

    #[serde(default)]
    pub keep_alive_max: u16,

    #[serde(default = "default_true")]
    pub keep_alive_allow_zero: bool,

    #[serde(default)]
    pub deny_unauthenticated_connections: bool,

    #[serde(default = "default_maximum_qos")]
    pub maximum_qos: u8,

    #[serde(default = "default_true")]
    pub retained_messages_enabled: bool,

    #[serde(default = "default_true")]
    pub wildcard_subscriptions_enabled: bool,

    #[serde(default = "default_true")]
    pub shared_subscriptions_enabled: bool,

    #[serde(default = "default_true")]
    pub subscription_identifiers_enabled: bool,

    pub max_packet_size: Option<u32>,

    #[serde(default = "default_server_receive_maximum")]
    pub server_receive_maximum: u16,

    #[serde(default = "default_keep_alive_factor")]
    pub mqtt_connection_keep_alive_factor: f32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_client_id_length: default_max_client_id_length(),
            max_session_expiry_interval: default_max_session_expiry_interval(),
            max_message_expiry_interval: default_max_message_expiry_interval(),
            topic_alias_enabled: true,
            topic_alias_max_per_client: default_topic_alias_max_per_client(),
            keep_alive_max: 0,
            keep_alive_allow_zero: true,
            deny_unauthenticated_connections: false,
            maximum_qos: default_maximum_qos(),
            retained_messages_enabled: true,
            wildcard_subscriptions_enabled: true,
            shared_subscriptions_enabled: true,
            subscription_identifiers_enabled: true,
            max_packet_size: None,
            server_receive_maximum: default_server_receive_maximum(),
            mqtt_connection_keep_alive_factor: default_keep_alive_factor(),
        }
    }
}

impl From<&AdmissionConfig> for portcall_broker::admission::config::AdmissionLimits {
    fn from(cfg: &AdmissionConfig) -> Self {
        Self {
            max_client_id_length: cfg.max_client_id_length,
            max_session_expiry_interval: cfg.max_session_expiry_interval,
            max_message_expiry_interval: cfg.max_message_expiry_interval,
            topic_alias_enabled: cfg.topic_alias_enabled,
            topic_alias_max_per_client: cfg.topic_alias_max_per_client,
            keep_alive_max: cfg.keep_alive_max,
            keep_alive_allow_zero: cfg.keep_alive_allow_zero,
            deny_unauthenticated_connections: cfg.deny_unauthenticated_connections,
            maximum_qos: cfg.maximum_qos,
            retained_messages_enabled: cfg.retained_messages_enabled,
            wildcard_subscriptions_enabled: cfg.wildcard_subscriptions_enabled,
            shared_subscriptions_enabled: cfg.shared_subscriptions_enabled,
            subscription_identifiers_enabled: cfg.subscription_identifiers_enabled,
            max_packet_size: cfg.max_packet_size,
            server_receive_maximum: cfg.server_receive_maximum,
            mqtt_connection_keep_alive_factor: cfg.mqtt_connection_keep_alive_factor,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_client_id_length() -> usize {
    65535
}

fn default_max_session_expiry_interval() -> u32 {
    u32::MAX
}

fn default_max_message_expiry_interval() -> u32 {
    u32::MAX
}

fn default_topic_alias_max_per_client() -> u16 {
    16
}

fn default_maximum_qos() -> u8 {
    2
}

fn default_server_receive_maximum() -> u16 {
    65535
}

fn default_keep_alive_factor() -> f32 {
    1.5
}
