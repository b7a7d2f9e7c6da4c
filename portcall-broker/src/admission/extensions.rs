//! Abstract collaborators the admission pipeline depends on.
//!
//! Every trait here is intentionally narrower than its counterpart in
//! `portcall_storage` or `crate::auth`: the pipeline only needs existence
//! checks, a persistence kickoff, and cache invalidation, not the full
//! session/retained-message/inflight surface those crates expose.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use portcall_core::reason::ReasonCode;
use portcall_packets::connect::ConnectPacket;

use crate::admission::channel::ChannelHandle;

/// Permissions granted by a successful authenticator, consulted by the
/// will-authorization stage's default evaluator.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub can_publish: HashMap<String, bool>,
    pub allow_all: bool,
}

impl Permissions {
    pub fn allow_all() -> Self {
        Self {
            can_publish: HashMap::new(),
            allow_all: true,
        }
    }

    pub fn allows_publish(&self, topic: &str) -> bool {
        if self.allow_all {
            return true;
        }
        self.can_publish.get(topic).copied().unwrap_or(false)
    }
}

/// Outcome of a single extension authenticator's evaluation of a CONNECT.
#[derive(Debug, Clone)]
pub enum AuthVerdict {
    Success {
        permissions: Permissions,
        user_properties: Vec<(String, String)>,
    },
    Failure {
        reason_code: ReasonCode,
        reason_string: String,
    },
    Continue,
}

/// One pluggable authenticator. Implementors run arbitrary (possibly slow)
/// logic; the orchestrator is responsible for fanning calls out onto a
/// bounded task pool and tolerating any completion order.
#[async_trait]
pub trait ExtensionAuthenticator: Send + Sync {
    fn name(&self) -> &str;
    async fn authenticate(&self, connect: &ConnectPacket, channel: &ChannelHandle) -> AuthVerdict;
}

/// Registry of authenticator providers plus the bounded submission queue
/// they run on.
#[async_trait]
pub trait ExtensionAuthenticators: Send + Sync {
    fn providers(&self) -> Vec<Arc<dyn ExtensionAuthenticator>>;

    /// Submit one authenticator's evaluation to the task pool. Returns
    /// `false` if the queue is full and the task was not scheduled.
    async fn submit(
        &self,
        provider: Arc<dyn ExtensionAuthenticator>,
        connect: Arc<ConnectPacket>,
        channel: ChannelHandle,
    ) -> Option<tokio::sync::oneshot::Receiver<AuthVerdict>>;
}

/// Result of consulting a will-authorization plugin.
#[derive(Debug, Clone, Default)]
pub struct WillAuthResult {
    pub ack_reason_code: Option<ReasonCode>,
    pub disconnect_reason_code: Option<ReasonCode>,
}

#[async_trait]
pub trait ExtensionAuthorizers: Send + Sync {
    fn available(&self) -> bool;
    async fn authorize_will(&self, channel: &ChannelHandle, connect: &ConnectPacket)
        -> WillAuthResult;
}

/// Narrow session-persistence contract the installer depends on; a thin
/// façade over `portcall_storage::SessionStore` for admission purposes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn exists(&self, client_id: &str) -> bool;

    /// Kick off persistence of the new session and report whether a prior
    /// session for this client carries over (`session_present`).
    async fn start_persistence(
        &self,
        connect: &ConnectPacket,
        session_exists: bool,
        effective_expiry: u32,
    ) -> bool;

    async fn invalidate_shared_cache(&self, client_id: &str);
}

/// Maps client identifiers to live channels. Insertion is the linearization
/// point that makes invariant 1 (at most one live channel per identifier)
/// hold.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn get(&self, client_id: &str) -> Option<ChannelHandle>;
    async fn persist(&self, client_id: &str, channel: ChannelHandle);
    async fn remove(&self, client_id: &str);
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn client_connected(&self, client_id: &str);
    async fn client_disconnected(&self, client_id: &str, reason: &str);
    async fn auth_failed(&self, client_id: &str, reason_string: &str);
}

/// Tracks global topic-alias slot usage so CONNACK building can refuse to
/// advertise `topic_alias_maximum` once the server-wide budget is spent.
pub trait TopicAliasLimiter: Send + Sync {
    fn aliases_available(&self) -> bool;
    fn init_usage(&self, n: u16);
}

pub type AuthData = Option<Bytes>;

/// Challenge/response transport for MQTT 5.0 enhanced authentication (the
/// AUTH control packet, §4.12). Abstracts the raw socket so the auth-method
/// buffering stage stays testable without one; the steady-state connection
/// supplies the real implementation.
#[async_trait]
pub trait EnhancedAuthExchange: Send {
    /// Send `data` as a challenge for `method` and wait for the client's
    /// AUTH response. Returns `None` if the client disconnected or replied
    /// with anything other than AUTH, either of which ends the exchange.
    async fn challenge(&mut self, method: &str, data: Bytes) -> Option<Bytes>;
}
