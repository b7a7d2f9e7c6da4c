//! CONNECT Validator: default-fill plus the fatal structural checks that
//! must fail before any extension code ever sees the CONNECT.

use std::sync::Arc;

use portcall_core::reason::ReasonCode;
use portcall_packets::connect::ConnectPacket;

use crate::admission::channel::NormalizedConnect;
use crate::admission::config::AdmissionLimits;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub reason_code: ReasonCode,
    pub reason_string: &'static str,
}

fn fail(reason_code: ReasonCode, reason_string: &'static str) -> ValidationFailure {
    ValidationFailure {
        reason_code,
        reason_string,
    }
}

/// Normalizes a decoded CONNECT and runs the fatal structural checks.
///
/// Never mutates `connect`: the normalized numeric defaults live on the
/// returned `NormalizedConnect`, leaving the decoded packet untouched for
/// whatever else still needs to read it (will restoration, logging).
pub fn validate(
    connect: Arc<ConnectPacket>,
    limits: &AdmissionLimits,
) -> Result<NormalizedConnect, ValidationFailure> {
    if connect.payload.client_id.len() > limits.max_client_id_length {
        return Err(fail(
            ReasonCode::ClientIdentifierNotValid,
            "client identifier exceeds the configured maximum length",
        ));
    }

    if connect.flags.will_flag {
        if let Some(ref topic) = connect.payload.will_topic {
            if topic.contains('#') || topic.contains('+') {
                return Err(fail(
                    ReasonCode::TopicNameInvalid,
                    "will topic must not contain wildcard characters",
                ));
            }
        }

        if (connect.flags.will_qos as u8) > limits.maximum_qos {
            return Err(fail(
                ReasonCode::QoSNotSupported,
                "will QoS exceeds the server's maximum supported QoS",
            ));
        }

        if connect.flags.will_retain && !limits.retained_messages_enabled {
            return Err(fail(
                ReasonCode::RetainNotSupported,
                "retained messages are disabled on this server",
            ));
        }
    }

    let properties = connect.properties.as_ref();

    let session_expiry_interval = properties
        .and_then(|p| p.session_expiry_interval.as_ref())
        .map(|v| v.value)
        .unwrap_or(0);

    let receive_maximum = properties
        .and_then(|p| p.receive_maximum.as_ref())
        .map(|v| v.value)
        .unwrap_or(limits.server_receive_maximum);

    let topic_alias_maximum = properties
        .and_then(|p| p.topic_alias_maximum.as_ref())
        .map(|v| v.value)
        .unwrap_or(0);

    let maximum_packet_size = properties.and_then(|p| p.maximum_packet_size.as_ref()).map(|v| v.value);

    let request_response_information = properties
        .and_then(|p| p.request_response_information.as_ref())
        .map(|v| v.value != 0)
        .unwrap_or(false);

    let request_problem_information = properties
        .and_then(|p| p.request_problem_information.as_ref())
        .map(|v| v.value != 0)
        .unwrap_or(true);

    let will_properties = connect.payload.will_properties.as_ref();

    let will_message_expiry_interval = will_properties
        .and_then(|p| p.message_expiry_interval.as_ref())
        .map(|v| v.value.min(limits.max_message_expiry_interval))
        .unwrap_or(0);

    let will_delay_interval = will_properties
        .and_then(|p| p.will_delay_interval.as_ref())
        .map(|v| v.value)
        .unwrap_or(0);

    Ok(NormalizedConnect {
        raw: connect,
        session_expiry_interval,
        receive_maximum,
        topic_alias_maximum,
        maximum_packet_size,
        request_response_information,
        request_problem_information,
        will_message_expiry_interval,
        will_delay_interval,
    })
}

/// Clamp `server_keep_alive` per §4.7: absent when the client's value is
/// within range, otherwise the server maximum.
pub fn effective_keep_alive(client_keep_alive: u16, limits: &AdmissionLimits) -> (u16, Option<u16>) {
    if client_keep_alive == 0 {
        if limits.keep_alive_allow_zero || limits.keep_alive_max == 0 {
            return (client_keep_alive, None);
        }
        return (limits.keep_alive_max, Some(limits.keep_alive_max));
    }

    if limits.keep_alive_max > 0 && client_keep_alive > limits.keep_alive_max {
        return (limits.keep_alive_max, Some(limits.keep_alive_max));
    }

    (client_keep_alive, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcall_core::protocol::ProtocolVersion;
    use portcall_packets::connect::{ConnectFlags, ConnectPayload};

    fn base_connect(client_id: &str) -> ConnectPacket {
        ConnectPacket {
            protocol_version: ProtocolVersion::V5,
            flags: ConnectFlags {
                clean_start: true,
                ..Default::default()
            },
            keepalive: 60,
            properties: None,
            payload: ConnectPayload {
                client_id: client_id.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn accepts_identifier_at_the_limit() {
        let limits = AdmissionLimits {
            max_client_id_length: 8,
            ..Default::default()
        };
        let connect = Arc::new(base_connect("abcdefgh"));
        assert!(validate(connect, &limits).is_ok());
    }

    #[test]
    fn rejects_identifier_over_the_limit() {
        let limits = AdmissionLimits {
            max_client_id_length: 8,
            ..Default::default()
        };
        let connect = Arc::new(base_connect("abcdefghi"));
        let err = validate(connect, &limits).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::ClientIdentifierNotValid);
    }

    #[test]
    fn rejects_wildcard_will_topic() {
        let mut connect = base_connect("c1");
        connect.flags.will_flag = true;
        connect.payload.will_topic = Some("a/#/b".to_string());
        let err = validate(Arc::new(connect), &AdmissionLimits::default()).unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::TopicNameInvalid);
    }

    #[test]
    fn default_fill_is_idempotent_with_explicit_defaults() {
        let limits = AdmissionLimits::default();
        let unset = validate(Arc::new(base_connect("c1")), &limits).unwrap();
        assert_eq!(unset.session_expiry_interval, 0);
        assert_eq!(unset.receive_maximum, limits.server_receive_maximum);
        assert_eq!(unset.topic_alias_maximum, 0);
        assert!(unset.request_problem_information);
        assert!(!unset.request_response_information);
    }

    #[test]
    fn keep_alive_zero_clamped_when_disallowed() {
        let limits = AdmissionLimits {
            keep_alive_allow_zero: false,
            keep_alive_max: 120,
            ..Default::default()
        };
        let (effective, server_keep_alive) = effective_keep_alive(0, &limits);
        assert_eq!(effective, 120);
        assert_eq!(server_keep_alive, Some(120));
    }

    #[test]
    fn keep_alive_above_max_clamped() {
        let limits = AdmissionLimits {
            keep_alive_max: 60,
            ..Default::default()
        };
        let (effective, server_keep_alive) = effective_keep_alive(61, &limits);
        assert_eq!(effective, 60);
        assert_eq!(server_keep_alive, Some(60));
    }
}
