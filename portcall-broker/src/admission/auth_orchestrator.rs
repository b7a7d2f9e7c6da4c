//! Authentication Orchestrator: fans a CONNECT out to every registered
//! extension authenticator and reduces their verdicts to one outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use portcall_core::reason::ReasonCode;
use portcall_packets::connect::ConnectPacket;
use tracing::warn;

use crate::admission::channel::ChannelHandle;
use crate::admission::config::AdmissionLimits;
use crate::admission::extensions::{AuthVerdict, ExtensionAuthenticators, Permissions};

/// Counts tasks that were dropped because the extension queue was full.
/// Exposed so tests and metrics consumers can observe degraded fan-out
/// without standing up a full metrics pipeline.
#[derive(Default)]
pub struct QueueOverflowCounter(AtomicU64);

impl QueueOverflowCounter {
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated {
        permissions: Permissions,
        user_properties: Vec<(String, String)>,
    },
    Bypassed,
    Denied {
        reason_code: ReasonCode,
        reason_string: String,
    },
}

pub async fn authenticate(
    connect: Arc<ConnectPacket>,
    channel: &ChannelHandle,
    authenticators: &dyn ExtensionAuthenticators,
    limits: &AdmissionLimits,
    overflow: &QueueOverflowCounter,
) -> AuthOutcome {
    let providers = authenticators.providers();

    if providers.is_empty() {
        return if limits.deny_unauthenticated_connections {
            AuthOutcome::Denied {
                reason_code: ReasonCode::NotAuthorized,
                reason_string: "no authenticator registered".to_string(),
            }
        } else {
            AuthOutcome::Bypassed
        };
    }

    let mut receivers = Vec::with_capacity(providers.len());
    for provider in providers {
        match authenticators
            .submit(provider, Arc::clone(&connect), channel.clone())
            .await
        {
            Some(rx) => receivers.push(Some(rx)),
            None => {
                overflow.increment();
                warn!("extension authenticator queue full; treating task as CONTINUE");
                receivers.push(None);
            }
        }
    }

    let mut first_failure: Option<(ReasonCode, String)> = None;
    let mut success: Option<(Permissions, Vec<(String, String)>)> = None;

    for rx in receivers {
        let verdict = match rx {
            Some(rx) => rx.await.unwrap_or(AuthVerdict::Continue),
            None => AuthVerdict::Continue,
        };

        match verdict {
            AuthVerdict::Failure {
                reason_code,
                reason_string,
            } => {
                if first_failure.is_none() {
                    first_failure = Some((reason_code, reason_string));
                }
            }
            AuthVerdict::Success {
                permissions,
                user_properties,
            } => {
                if success.is_none() {
                    success = Some((permissions, user_properties));
                }
            }
            AuthVerdict::Continue => {}
        }
    }

    if let Some((reason_code, reason_string)) = first_failure {
        return AuthOutcome::Denied {
            reason_code,
            reason_string,
        };
    }

    if let Some((permissions, user_properties)) = success {
        return AuthOutcome::Authenticated {
            permissions,
            user_properties,
        };
    }

    if limits.deny_unauthenticated_connections {
        AuthOutcome::Denied {
            reason_code: ReasonCode::NotAuthorized,
            reason_string: "no authenticator reached a decision".to_string(),
        }
    } else {
        AuthOutcome::Bypassed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::extensions::ExtensionAuthenticator;
    use async_trait::async_trait;
    use portcall_core::protocol::ProtocolVersion;
    use portcall_packets::connect::{ConnectFlags, ConnectPayload};

    fn connect() -> Arc<ConnectPacket> {
        Arc::new(ConnectPacket {
            protocol_version: ProtocolVersion::V5,
            flags: ConnectFlags::default(),
            keepalive: 30,
            properties: None,
            payload: ConnectPayload {
                client_id: "c1".to_string(),
                ..Default::default()
            },
        })
    }

    struct FixedAuthenticator {
        name: &'static str,
        verdict: AuthVerdict,
    }

    #[async_trait]
    impl ExtensionAuthenticator for FixedAuthenticator {
        fn name(&self) -> &str {
            self.name
        }

        async fn authenticate(&self, _connect: &ConnectPacket, _channel: &ChannelHandle) -> AuthVerdict {
            self.verdict.clone()
        }
    }

    struct TestRegistry {
        providers: Vec<Arc<dyn ExtensionAuthenticator>>,
        queue_full: bool,
    }

    #[async_trait]
    impl ExtensionAuthenticators for TestRegistry {
        fn providers(&self) -> Vec<Arc<dyn ExtensionAuthenticator>> {
            self.providers.clone()
        }

        async fn submit(
            &self,
            provider: Arc<dyn ExtensionAuthenticator>,
            connect: Arc<ConnectPacket>,
            channel: ChannelHandle,
        ) -> Option<tokio::sync::oneshot::Receiver<AuthVerdict>> {
            if self.queue_full {
                return None;
            }
            let (tx, rx) = tokio::sync::oneshot::channel();
            let verdict = provider.authenticate(&connect, &channel).await;
            let _ = tx.send(verdict);
            Some(rx)
        }
    }

    #[tokio::test]
    async fn empty_providers_denies_when_policy_requires_auth() {
        let registry = TestRegistry {
            providers: vec![],
            queue_full: false,
        };
        let limits = AdmissionLimits {
            deny_unauthenticated_connections: true,
            ..Default::default()
        };
        let channel = ChannelHandle::new(Arc::from("c1"));
        let overflow = QueueOverflowCounter::default();

        let outcome = authenticate(connect(), &channel, &registry, &limits, &overflow).await;
        assert!(matches!(outcome, AuthOutcome::Denied { .. }));
    }

    #[tokio::test]
    async fn empty_providers_bypasses_when_policy_allows() {
        let registry = TestRegistry {
            providers: vec![],
            queue_full: false,
        };
        let limits = AdmissionLimits::default();
        let channel = ChannelHandle::new(Arc::from("c1"));
        let overflow = QueueOverflowCounter::default();

        let outcome = authenticate(connect(), &channel, &registry, &limits, &overflow).await;
        assert!(matches!(outcome, AuthOutcome::Bypassed));
    }

    #[tokio::test]
    async fn any_failure_wins_over_continue() {
        let providers: Vec<Arc<dyn ExtensionAuthenticator>> = vec![
            Arc::new(FixedAuthenticator {
                name: "continue",
                verdict: AuthVerdict::Continue,
            }),
            Arc::new(FixedAuthenticator {
                name: "deny",
                verdict: AuthVerdict::Failure {
                    reason_code: ReasonCode::NotAuthorized,
                    reason_string: "bad creds".to_string(),
                },
            }),
        ];
        let registry = TestRegistry {
            providers,
            queue_full: false,
        };
        let limits = AdmissionLimits::default();
        let channel = ChannelHandle::new(Arc::from("c1"));
        let overflow = QueueOverflowCounter::default();

        let outcome = authenticate(connect(), &channel, &registry, &limits, &overflow).await;
        match outcome {
            AuthOutcome::Denied { reason_string, .. } => assert_eq!(reason_string, "bad creds"),
            AuthOutcome::Authenticated { .. } => panic!("expected Denied, got Authenticated"),
            AuthOutcome::Bypassed => panic!("expected Denied, got Bypassed"),
        }
    }

    #[tokio::test]
    async fn success_without_failure_authenticates() {
        let providers: Vec<Arc<dyn ExtensionAuthenticator>> = vec![Arc::new(FixedAuthenticator {
            name: "ok",
            verdict: AuthVerdict::Success {
                permissions: Permissions::allow_all(),
                user_properties: vec![],
            },
        })];
        let registry = TestRegistry {
            providers,
            queue_full: false,
        };
        let limits = AdmissionLimits::default();
        let channel = ChannelHandle::new(Arc::from("c1"));
        let overflow = QueueOverflowCounter::default();

        let outcome = authenticate(connect(), &channel, &registry, &limits, &overflow).await;
        assert!(matches!(outcome, AuthOutcome::Authenticated { .. }));
    }

    #[tokio::test]
    async fn queue_full_is_credited_as_continue() {
        let providers: Vec<Arc<dyn ExtensionAuthenticator>> = vec![Arc::new(FixedAuthenticator {
            name: "never runs",
            verdict: AuthVerdict::Success {
                permissions: Permissions::allow_all(),
                user_properties: vec![],
            },
        })];
        let registry = TestRegistry {
            providers,
            queue_full: true,
        };
        let limits = AdmissionLimits::default();
        let channel = ChannelHandle::new(Arc::from("c1"));
        let overflow = QueueOverflowCounter::default();

        let outcome = authenticate(connect(), &channel, &registry, &limits, &overflow).await;
        assert!(matches!(outcome, AuthOutcome::Bypassed));
        assert_eq!(overflow.count(), 1);
    }
}
