//! Concrete collaborator implementations wiring the admission pipeline to
//! the rest of the broker: an in-memory channel registry, a lightweight
//! session-existence store, a tracing-backed event log, a global topic-alias
//! budget, and a password authenticator bridging `crate::auth`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use portcall_core::reason::ReasonCode;
use portcall_packets::connect::ConnectPacket;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::admission::channel::ChannelHandle;
use crate::admission::extensions::{
    AuthVerdict, ChannelRegistry, EventLog, ExtensionAuthenticator, ExtensionAuthenticators,
    ExtensionAuthorizers, Permissions, SessionStore, TopicAliasLimiter, WillAuthResult,
};
use crate::auth::CredentialValidator;

/// Maps client identifiers to the single live `ChannelHandle` registered for
/// them. The insertion performed by `persist` is the linearization point for
/// invariant 1 in the admission design.
#[derive(Default)]
pub struct InMemoryChannelRegistry {
    channels: Mutex<HashMap<String, ChannelHandle>>,
}

#[async_trait]
impl ChannelRegistry for InMemoryChannelRegistry {
    async fn get(&self, client_id: &str) -> Option<ChannelHandle> {
        self.channels.lock().await.get(client_id).cloned()
    }

    async fn persist(&self, client_id: &str, channel: ChannelHandle) {
        self.channels
            .lock()
            .await
            .insert(client_id.to_string(), channel);
    }

    async fn remove(&self, client_id: &str) {
        self.channels.lock().await.remove(client_id);
    }
}

/// Tracks which client identifiers currently have a live (non-expired)
/// session, independent of the subscription/inflight state that lives
/// entirely in `crate::session`.
#[derive(Default)]
pub struct InMemorySessionStore {
    known: Mutex<HashSet<String>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn exists(&self, client_id: &str) -> bool {
        self.known.lock().await.contains(client_id)
    }

    async fn start_persistence(
        &self,
        _connect: &ConnectPacket,
        session_exists: bool,
        effective_expiry: u32,
    ) -> bool {
        let mut known = self.known.lock().await;
        if effective_expiry > 0 {
            known.insert(_connect.payload.client_id.clone());
        } else {
            known.remove(&_connect.payload.client_id);
        }
        session_exists
    }

    async fn invalidate_shared_cache(&self, _client_id: &str) {}
}

/// Emits admission lifecycle events through `tracing` rather than a
/// dedicated metrics sink.
#[derive(Default)]
pub struct TracingEventLog;

#[async_trait]
impl EventLog for TracingEventLog {
    async fn client_connected(&self, client_id: &str) {
        info!(client_id, "client connected");
    }

    async fn client_disconnected(&self, client_id: &str, reason: &str) {
        info!(client_id, reason, "client disconnected");
    }

    async fn auth_failed(&self, client_id: &str, reason_string: &str) {
        warn!(client_id, reason_string, "authentication failed");
    }
}

/// Enforces a single server-wide budget on how many clients may be handed a
/// non-zero topic-alias-maximum at once. Crude but bounded: once the budget
/// is spent, later CONNACKs simply omit the property.
pub struct GlobalTopicAliasLimiter {
    remaining: AtomicU32,
}

impl GlobalTopicAliasLimiter {
    pub fn new(total_budget: u32) -> Self {
        Self {
            remaining: AtomicU32::new(total_budget),
        }
    }
}

impl TopicAliasLimiter for GlobalTopicAliasLimiter {
    fn aliases_available(&self) -> bool {
        self.remaining.load(Ordering::Relaxed) > 0
    }

    fn init_usage(&self, n: u16) {
        self.remaining.fetch_sub(n as u32, Ordering::Relaxed);
    }
}

/// Bridges a CONNECT's username/password fields to `CredentialValidator`
/// without requiring extension authors to know about the wire format.
pub struct PasswordAuthenticator {
    validator: Arc<dyn CredentialValidator>,
}

impl PasswordAuthenticator {
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl ExtensionAuthenticator for PasswordAuthenticator {
    fn name(&self) -> &str {
        "password"
    }

    async fn authenticate(&self, connect: &ConnectPacket, _channel: &ChannelHandle) -> AuthVerdict {
        match (&connect.payload.user_name, &connect.payload.password) {
            (Some(username), Some(password)) => {
                if self.validator.validate(username, password) {
                    AuthVerdict::Success {
                        permissions: Permissions::allow_all(),
                        user_properties: Vec::new(),
                    }
                } else {
                    AuthVerdict::Failure {
                        reason_code: ReasonCode::BadUserNameOrPassword,
                        reason_string: "invalid username or password".to_string(),
                    }
                }
            }
            _ => AuthVerdict::Failure {
                reason_code: ReasonCode::BadUserNameOrPassword,
                reason_string: "username and password are required".to_string(),
            },
        }
    }
}

/// Runs every registered authenticator on a bounded task pool. Submissions
/// beyond `queue_depth` are reported to the caller as a full queue rather
/// than blocking the CONNECT indefinitely.
pub struct BoundedAuthenticators {
    providers: Vec<Arc<dyn ExtensionAuthenticator>>,
    semaphore: Arc<Semaphore>,
}

impl BoundedAuthenticators {
    pub fn new(providers: Vec<Arc<dyn ExtensionAuthenticator>>, queue_depth: usize) -> Self {
        Self {
            providers,
            semaphore: Arc::new(Semaphore::new(queue_depth.max(1))),
        }
    }
}

#[async_trait]
impl ExtensionAuthenticators for BoundedAuthenticators {
    fn providers(&self) -> Vec<Arc<dyn ExtensionAuthenticator>> {
        self.providers.clone()
    }

    async fn submit(
        &self,
        provider: Arc<dyn ExtensionAuthenticator>,
        connect: Arc<ConnectPacket>,
        channel: ChannelHandle,
    ) -> Option<tokio::sync::oneshot::Receiver<AuthVerdict>> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let verdict = provider.authenticate(&connect, &channel).await;
            let _ = tx.send(verdict);
            drop(permit);
        });

        Some(rx)
    }
}

/// No will-authorization extensions registered; the will stage falls back
/// to the permissions computed by authentication.
#[derive(Default)]
pub struct NoWillAuthorizers;

#[async_trait]
impl ExtensionAuthorizers for NoWillAuthorizers {
    fn available(&self) -> bool {
        false
    }

    async fn authorize_will(&self, _channel: &ChannelHandle, _connect: &ConnectPacket) -> WillAuthResult {
        WillAuthResult::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_tracks_single_channel_per_client() {
        let registry = InMemoryChannelRegistry::default();
        let channel = ChannelHandle::new(Arc::from("c1"));
        registry.persist("c1", channel.clone()).await;
        assert!(registry.get("c1").await.is_some());
        registry.remove("c1").await;
        assert!(registry.get("c1").await.is_none());
    }

    #[test]
    fn topic_alias_budget_exhausts() {
        let limiter = GlobalTopicAliasLimiter::new(10);
        assert!(limiter.aliases_available());
        limiter.init_usage(10);
        assert!(!limiter.aliases_available());
    }

    struct AlwaysTrue;
    impl CredentialValidator for AlwaysTrue {
        fn validate(&self, _username: &str, _password: &[u8]) -> bool {
            true
        }
    }

    fn connect_with_creds(user: &str, pass: &str) -> ConnectPacket {
        use portcall_core::protocol::ProtocolVersion;
        use portcall_packets::connect::{ConnectFlags, ConnectPayload};

        ConnectPacket {
            protocol_version: ProtocolVersion::V5,
            flags: ConnectFlags::default(),
            keepalive: 30,
            properties: None,
            payload: ConnectPayload {
                client_id: "c1".to_string(),
                user_name: Some(user.to_string()),
                password: Some(pass.as_bytes().to_vec().into()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn password_authenticator_succeeds_with_valid_validator() {
        let authenticator = PasswordAuthenticator::new(Arc::new(AlwaysTrue));
        let channel = ChannelHandle::new(Arc::from("c1"));
        let verdict = authenticator
            .authenticate(&connect_with_creds("u", "p"), &channel)
            .await;
        assert!(matches!(verdict, AuthVerdict::Success { .. }));
    }

    #[tokio::test]
    async fn password_authenticator_fails_without_credentials() {
        use portcall_core::protocol::ProtocolVersion;
        use portcall_packets::connect::{ConnectFlags, ConnectPayload};

        let authenticator = PasswordAuthenticator::new(Arc::new(AlwaysTrue));
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
        let verdict = authenticator.authenticate(&connect, &channel).await;
        assert!(matches!(verdict, AuthVerdict::Failure { .. }));
    }
}
