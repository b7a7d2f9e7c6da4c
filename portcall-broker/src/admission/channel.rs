//! Per-connection attribute bag populated by the admission pipeline.
//!
//! A `ChannelHandle` is created the moment a socket is accepted and is
//! cheaply cloneable so every pipeline stage, and the eventual steady-state
//! connection handler, can share it. Mutation happens only through the
//! handle's async-friendly methods; callers never see the inner mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portcall_packets::connect::ConnectPacket;
use tokio::sync::{Mutex, Notify};

/// Per-connection state accumulated while a CONNECT works its way through
/// the admission pipeline.
#[derive(Debug, Default)]
pub struct ChannelAttributes {
    pub client_id_assigned: bool,
    pub authenticated: bool,
    pub auth_bypassed: bool,
    pub auth_method: Option<String>,
    pub auth_permissions: Option<crate::admission::extensions::Permissions>,
    pub auth_user_properties: Vec<(String, String)>,
    pub prevent_lwt: bool,
    pub client_receive_maximum: u16,
    pub max_packet_size_send: Option<u32>,
    pub connect_keep_alive: u16,
    pub session_expiry_interval: u32,
    pub topic_alias_mapping: Vec<Option<String>>,
    pub request_response_information: bool,
    pub request_problem_information: bool,
}

/// A live connection as seen by the admission pipeline and the takeover
/// arbiter. Cloning shares the same underlying state.
#[derive(Clone)]
pub struct ChannelHandle {
    pub client_id: Arc<str>,
    attrs: Arc<Mutex<ChannelAttributes>>,
    taken_over: Arc<AtomicBool>,
    closed: Arc<Notify>,
    close_fired: Arc<AtomicBool>,
}

impl ChannelHandle {
    pub fn new(client_id: Arc<str>) -> Self {
        Self {
            client_id,
            attrs: Arc::new(Mutex::new(ChannelAttributes::default())),
            taken_over: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(Notify::new()),
            close_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn with_attrs<R>(&self, f: impl FnOnce(&mut ChannelAttributes) -> R) -> R {
        let mut guard = self.attrs.lock().await;
        f(&mut guard)
    }

    /// Sets `taken_over` and returns the previous value. `Ordering::AcqRel`
    /// makes the flag visible to any thread racing to acquire the same
    /// stripe lock immediately after release.
    pub fn mark_taken_over(&self) -> bool {
        self.taken_over.swap(true, Ordering::AcqRel)
    }

    pub fn is_taken_over(&self) -> bool {
        self.taken_over.load(Ordering::Acquire)
    }

    /// Close this channel. Idempotent: only the first call fires the
    /// `disconnect_future` waiters, per invariant 4 in the admission spec.
    pub fn close(&self) {
        if self
            .close_fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.closed.notify_waiters();
        }
    }

    /// Resolves once `close` has been called on this handle (or any other
    /// clone of it) exactly once.
    ///
    /// The `Notified` future is constructed before the flag check: `Notify`
    /// does not buffer a permit, so a `close()` landing between the load and
    /// the `.await` would otherwise be missed and the waiter would hang.
    pub async fn disconnect_future(&self) {
        let notified = self.closed.notified();

        if self.close_fired.load(Ordering::Acquire) {
            return;
        }

        notified.await;
    }
}

/// The decoded CONNECT carried alongside its normalized defaults. Kept
/// distinct from `ConnectPacket` so the pipeline never mutates the value
/// owned by the connection's read loop.
#[derive(Debug, Clone)]
pub struct NormalizedConnect {
    pub raw: Arc<ConnectPacket>,
    pub session_expiry_interval: u32,
    pub receive_maximum: u16,
    pub topic_alias_maximum: u16,
    pub maximum_packet_size: Option<u32>,
    pub request_response_information: bool,
    pub request_problem_information: bool,
    pub will_message_expiry_interval: u32,
    pub will_delay_interval: u32,
}
