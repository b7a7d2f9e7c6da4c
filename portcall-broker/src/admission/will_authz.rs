//! Will-Authorization Stage: consulted only when the CONNECT carries a
//! last-will-and-testament, after authentication has already succeeded.

use portcall_core::reason::ReasonCode;
use portcall_packets::connect::ConnectPacket;

use crate::admission::channel::ChannelHandle;
use crate::admission::extensions::{ExtensionAuthorizers, Permissions, WillAuthResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillDenied {
    pub reason_code: ReasonCode,
}

fn map_result(result: &WillAuthResult) -> Option<WillDenied> {
    if let Some(code) = result.disconnect_reason_code {
        if code != ReasonCode::Success {
            return Some(WillDenied { reason_code: code });
        }
    }

    if let Some(code) = result.ack_reason_code {
        if code != ReasonCode::Success {
            return Some(WillDenied { reason_code: code });
        }
    }

    None
}

/// Returns `Ok(())` when the will may proceed, `Err(WillDenied)` otherwise.
pub async fn authorize_will(
    channel: &ChannelHandle,
    connect: &ConnectPacket,
    permissions: &Permissions,
    authorizers: &dyn ExtensionAuthorizers,
) -> Result<(), WillDenied> {
    if !connect.flags.will_flag {
        return Ok(());
    }

    if !authorizers.available() {
        let topic = connect.payload.will_topic.as_deref().unwrap_or_default();
        return if permissions.allows_publish(topic) {
            Ok(())
        } else {
            Err(WillDenied {
                reason_code: ReasonCode::NotAuthorized,
            })
        };
    }

    let result = authorizers.authorize_will(channel, connect).await;

    match map_result(&result) {
        Some(denial) => Err(denial),
        None => {
            if result.ack_reason_code.is_some() || result.disconnect_reason_code.is_some() {
                // An explicit SUCCESS was returned by the plugin.
                Ok(())
            } else {
                let topic = connect.payload.will_topic.as_deref().unwrap_or_default();
                if permissions.allows_publish(topic) {
                    Ok(())
                } else {
                    Err(WillDenied {
                        reason_code: ReasonCode::NotAuthorized,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use portcall_core::protocol::ProtocolVersion;
    use portcall_packets::connect::{ConnectFlags, ConnectPayload};
    use std::sync::Arc;

    fn connect_with_will(topic: &str) -> ConnectPacket {
        ConnectPacket {
            protocol_version: ProtocolVersion::V5,
            flags: ConnectFlags {
                will_flag: true,
                ..Default::default()
            },
            keepalive: 30,
            properties: None,
            payload: ConnectPayload {
                client_id: "c1".to_string(),
                will_topic: Some(topic.to_string()),
                ..Default::default()
            },
        }
    }

    struct NoAuthorizers;

    #[async_trait]
    impl ExtensionAuthorizers for NoAuthorizers {
        fn available(&self) -> bool {
            false
        }

        async fn authorize_will(&self, _: &ChannelHandle, _: &ConnectPacket) -> WillAuthResult {
            WillAuthResult::default()
        }
    }

    #[tokio::test]
    async fn default_permissions_allow_when_topic_permitted() {
        let channel = ChannelHandle::new(Arc::from("c1"));
        let connect = connect_with_will("status/c1");
        let perms = Permissions::allow_all();
        assert!(authorize_will(&channel, &connect, &perms, &NoAuthorizers).await.is_ok());
    }

    #[tokio::test]
    async fn default_permissions_deny_when_topic_not_permitted() {
        let channel = ChannelHandle::new(Arc::from("c1"));
        let connect = connect_with_will("status/c1");
        let perms = Permissions::default();
        let err = authorize_will(&channel, &connect, &perms, &NoAuthorizers)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::NotAuthorized);
    }

    struct ExplicitDeny;

    #[async_trait]
    impl ExtensionAuthorizers for ExplicitDeny {
        fn available(&self) -> bool {
            true
        }

        async fn authorize_will(&self, _: &ChannelHandle, _: &ConnectPacket) -> WillAuthResult {
            WillAuthResult {
                ack_reason_code: Some(ReasonCode::NotAuthorized),
                disconnect_reason_code: None,
            }
        }
    }

    #[tokio::test]
    async fn plugin_denial_takes_precedence() {
        let channel = ChannelHandle::new(Arc::from("c1"));
        let connect = connect_with_will("status/c1");
        let perms = Permissions::allow_all();
        let err = authorize_will(&channel, &connect, &perms, &ExplicitDeny)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::NotAuthorized);
    }

    #[tokio::test]
    async fn no_will_short_circuits_to_ok() {
        let channel = ChannelHandle::new(Arc::from("c1"));
        let connect = ConnectPacket {
            protocol_version: ProtocolVersion::V5,
            flags: ConnectFlags::default(),
            keepalive: 30,
            properties: None,
            payload: ConnectPayload {
                client_id: "c1".to_string(),
                ..Default::default()
            },
        };
        let perms = Permissions::default();
        assert!(authorize_will(&channel, &connect, &perms, &NoAuthorizers).await.is_ok());
    }
}
