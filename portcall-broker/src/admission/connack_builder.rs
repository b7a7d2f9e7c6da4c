//! CONNACK Builder: assembles the v3 or v5 CONNACK honoring the server's
//! advertised caps and the outcome of the earlier pipeline stages.

use portcall_core::protocol::ProtocolVersion;
use portcall_core::properties::*;
use portcall_core::reason::ReasonCode;
use portcall_packets::connack::{ConnAckFlags, ConnAckPacket, ConnAckProperties};

use crate::admission::config::AdmissionLimits;
use crate::admission::extensions::TopicAliasLimiter;
use crate::admission::validator::effective_keep_alive;

pub struct ConnAckInputs<'a> {
    pub protocol_version: ProtocolVersion,
    pub session_present: bool,
    pub reason_code: ReasonCode,
    pub client_id_assigned: Option<&'a str>,
    pub requested_session_expiry: u32,
    pub effective_session_expiry: u32,
    pub client_keep_alive: u16,
    pub client_topic_alias_maximum: u16,
    pub user_properties: &'a [(String, String)],
}

pub fn build_connack(
    inputs: ConnAckInputs<'_>,
    limits: &AdmissionLimits,
    alias_limiter: &dyn TopicAliasLimiter,
) -> (ConnAckPacket, u16) {
    let flags = ConnAckFlags {
        session_present: inputs.session_present,
    };

    if !inputs.protocol_version.supports_properties() {
        return (
            ConnAckPacket {
                protocol_version: inputs.protocol_version,
                flags,
                reason_code: inputs.reason_code,
                properties: None,
            },
            inputs.client_keep_alive,
        );
    }

    let (effective_keep_alive_value, server_keep_alive) =
        effective_keep_alive(inputs.client_keep_alive, limits);

    let topic_alias_maximum = if limits.topic_alias_enabled
        && limits.topic_alias_max_per_client > 0
        && alias_limiter.aliases_available()
    {
        let n = limits.topic_alias_max_per_client;
        alias_limiter.init_usage(n);
        Some(n)
    } else {
        None
    };

    let session_expiry_interval = if inputs.effective_session_expiry != inputs.requested_session_expiry
    {
        Some(SessionExpiryInterval::new(inputs.effective_session_expiry))
    } else {
        None
    };

    let user_property = if inputs.user_properties.is_empty() {
        None
    } else {
        Some(
            inputs
                .user_properties
                .iter()
                .map(|(k, v)| UserProperty::new(k.clone(), v.clone()))
                .collect(),
        )
    };

    let properties = ConnAckProperties {
        session_expiry_interval,
        receive_maximum: Some(ReceiveMaximum::new(limits.server_receive_maximum)),
        maximum_qos: Some(MaximumQoS::new(limits.maximum_qos)),
        retain_available: Some(RetainAvailable::new(limits.retained_messages_enabled)),
        maximum_packet_size: limits.max_packet_size.map(MaximumPacketSize::new),
        assigned_client_id: inputs
            .client_id_assigned
            .map(|id| AssignedClientIdentifier::new(id.to_string())),
        topic_alias_max: topic_alias_maximum.map(TopicAliasMaximum::new),
        reason_string: None,
        user_property,
        wildcard_subscription_available: Some(WildcardSubscriptionAvailable::new(
            limits.wildcard_subscriptions_enabled,
        )),
        subscription_identifier_available: Some(SubscriptionIdentifierAvailable::new(
            limits.subscription_identifiers_enabled,
        )),
        shared_subscription_available: Some(SharedSubscriptionAvailable::new(
            limits.shared_subscriptions_enabled,
        )),
        server_keepalive: server_keep_alive.map(ServerKeepAlive::new),
        response_information: None,
        server_reference: None,
        authentication_method: None,
        authentication_data: None,
    };

    (
        ConnAckPacket {
            protocol_version: inputs.protocol_version,
            flags,
            reason_code: inputs.reason_code,
            properties: Some(properties),
        },
        effective_keep_alive_value,
    )
}
