use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use portcall_packets::connect::ConnectPacket;

use crate::session::{Session, SessionDropGuard};

pub(crate) struct SessionManagerDropGuard {
    session_manager: SessionManager,
}

#[derive(Clone)]
pub(crate) struct SessionManager {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
}

struct State {
    sessions: HashMap<String, SessionDropGuard>,
}

impl SessionManagerDropGuard {
    pub(crate) fn new() -> SessionManagerDropGuard {
        SessionManagerDropGuard {
            session_manager: SessionManager::new(),
        }
    }

    pub(crate) fn session_manager(&self) -> SessionManager {
        self.session_manager.clone()
    }
}

impl SessionManager {
    pub(crate) fn new() -> SessionManager {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                sessions: HashMap::new(),
            }),
        });

        SessionManager { shared }
    }

    /// Resolve the `Session` for an already-admitted CONNECT.
    ///
    /// By the time this is called the admission pipeline has validated the
    /// CONNECT, resolved a final client identifier, and sent the CONNACK;
    /// this only decides whether to resume the client's prior in-memory
    /// session state or start fresh, honoring `clean_start`.
    pub(crate) async fn start_session(&mut self, connect_packet: ConnectPacket) -> Session {
        let mut manager = self.shared.state.lock().await;

        if connect_packet.flags.clean_start {
            manager.sessions.remove(&connect_packet.payload.client_id);
        }

        match manager
            .sessions
            .entry(connect_packet.payload.client_id.clone())
        {
            std::collections::hash_map::Entry::Occupied(e) => {
                let mut s = e.into_mut().session();
                s.set_connect_packet(connect_packet).await;
                s
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                let new_session = SessionDropGuard::new(connect_packet);
                e.insert(new_session).session()
            }
        }
    }
}
