//! Session Installer: registers the new channel, resolves session-present,
//! and kicks off persistence once the takeover arbiter has cleared the way.

use std::sync::Arc;

use portcall_packets::connect::ConnectPacket;
use tracing::info;

use crate::admission::channel::ChannelHandle;
use crate::admission::config::AdmissionLimits;
use crate::admission::extensions::{ChannelRegistry, EventLog, SessionStore};

pub struct InstallResult {
    pub session_present: bool,
    pub effective_expiry: u32,
}

pub async fn install_session(
    client_id: &str,
    channel: ChannelHandle,
    connect: &ConnectPacket,
    requested_expiry: u32,
    limits: &AdmissionLimits,
    registry: &dyn ChannelRegistry,
    store: &dyn SessionStore,
    event_log: &dyn EventLog,
) -> InstallResult {
    registry.persist(client_id, channel).await;

    let session_exists = if connect.flags.clean_start {
        false
    } else {
        store.exists(client_id).await
    };

    let effective_expiry = requested_expiry.min(limits.max_session_expiry_interval);

    let session_present = store
        .start_persistence(connect, session_exists, effective_expiry)
        .await;

    store.invalidate_shared_cache(client_id).await;

    event_log.client_connected(client_id).await;
    info!(client_id, session_present, "client connected");

    InstallResult {
        session_present,
        effective_expiry,
    }
}

// §4.1's second-CONNECT guard does not live here: the steady-state
// connection only ever reads one CONNECT (`Listener::handle_connection`),
// and `Session::process_incoming`'s packet match has no `Connect` arm, so a
// second CONNECT on an already-admitted channel falls through to its
// catch-all `ProtocolError` and tears the connection down.

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use portcall_core::protocol::ProtocolVersion;
    use portcall_packets::connect::{ConnectFlags, ConnectPayload};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRegistry {
        map: StdMutex<HashMap<String, ChannelHandle>>,
    }

    #[async_trait]
    impl ChannelRegistry for FakeRegistry {
        async fn get(&self, client_id: &str) -> Option<ChannelHandle> {
            self.map.lock().unwrap().get(client_id).cloned()
        }
        async fn persist(&self, client_id: &str, channel: ChannelHandle) {
            self.map.lock().unwrap().insert(client_id.to_string(), channel);
        }
        async fn remove(&self, client_id: &str) {
            self.map.lock().unwrap().remove(client_id);
        }
    }

    struct FakeStore {
        exists: bool,
        invalidated: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FakeStore {
        async fn exists(&self, _client_id: &str) -> bool {
            self.exists
        }
        async fn start_persistence(&self, _: &ConnectPacket, session_exists: bool, _: u32) -> bool {
            session_exists
        }
        async fn invalidate_shared_cache(&self, _client_id: &str) {
            self.invalidated.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeEventLog {
        connected: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl EventLog for FakeEventLog {
        async fn client_connected(&self, client_id: &str) {
            self.connected.lock().unwrap().push(client_id.to_string());
        }
        async fn client_disconnected(&self, _client_id: &str, _reason: &str) {}
        async fn auth_failed(&self, _client_id: &str, _reason_string: &str) {}
    }

    fn connect(clean_start: bool) -> ConnectPacket {
        ConnectPacket {
            protocol_version: ProtocolVersion::V5,
            flags: ConnectFlags {
                clean_start,
                ..Default::default()
            },
            keepalive: 30,
            properties: None,
            payload: ConnectPayload {
                client_id: "c1".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn clean_start_forces_no_session_present() {
        let registry = FakeRegistry::default();
        let store = FakeStore {
            exists: true,
            invalidated: AtomicBool::new(false),
        };
        let event_log = FakeEventLog::default();
        let channel = ChannelHandle::new(Arc::from("c1"));

        let result = install_session(
            "c1",
            channel,
            &connect(true),
            0,
            &AdmissionLimits::default(),
            &registry,
            &store,
            &event_log,
        )
        .await;

        assert!(!result.session_present);
        assert!(store.invalidated.load(Ordering::SeqCst));
        assert_eq!(event_log.connected.lock().unwrap().as_slice(), ["c1"]);
    }

    #[tokio::test]
    async fn expiry_is_clamped_to_server_maximum() {
        let registry = FakeRegistry::default();
        let store = FakeStore {
            exists: false,
            invalidated: AtomicBool::new(false),
        };
        let event_log = FakeEventLog::default();
        let channel = ChannelHandle::new(Arc::from("c1"));
        let limits = AdmissionLimits {
            max_session_expiry_interval: 100,
            ..Default::default()
        };

        let result = install_session(
            "c1",
            channel,
            &connect(false),
            10_000,
            &limits,
            &registry,
            &store,
            &event_log,
        )
        .await;

        assert_eq!(result.effective_expiry, 100);
    }
}
