//! Server-wide limits consulted throughout the admission pipeline.

#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    pub max_client_id_length: usize,
    pub max_session_expiry_interval: u32,
    pub max_message_expiry_interval: u32,
    pub topic_alias_enabled: bool,
    pub topic_alias_max_per_client: u16,
    pub keep_alive_max: u16,
    pub keep_alive_allow_zero: bool,
    pub deny_unauthenticated_connections: bool,
    pub maximum_qos: u8,
    pub retained_messages_enabled: bool,
    pub wildcard_subscriptions_enabled: bool,
    pub shared_subscriptions_enabled: bool,
    pub subscription_identifiers_enabled: bool,
    pub max_packet_size: Option<u32>,
    pub server_receive_maximum: u16,
    pub mqtt_connection_keep_alive_factor: f32,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_client_id_length: 65535,
            max_session_expiry_interval: u32::MAX,
            max_message_expiry_interval: u32::MAX,
            topic_alias_enabled: true,
            topic_alias_max_per_client: 16,
            keep_alive_max: 0,
            keep_alive_allow_zero: true,
            deny_unauthenticated_connections: false,
            maximum_qos: 2,
            retained_messages_enabled: true,
            wildcard_subscriptions_enabled: true,
            shared_subscriptions_enabled: true,
            subscription_identifiers_enabled: true,
            max_packet_size: None,
            server_receive_maximum: 65535,
            mqtt_connection_keep_alive_factor: 1.5,
        }
    }
}
