use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time::{self, Duration, Instant},
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use portcall_core::{message::Message, properties::{AuthenticationData, AuthenticationMethod}, reason::ReasonCode, Result};
use portcall_packets::{
    auth::{AuthPacket, AuthProperties},
    connect::ConnectPacket,
    ControlPacket,
};
use portcall_storage::memory::MemoryStore;

use crate::{
    admission::{
        adapters::{
            BoundedAuthenticators, GlobalTopicAliasLimiter, InMemoryChannelRegistry,
            InMemorySessionStore, NoWillAuthorizers, PasswordAuthenticator, TracingEventLog,
        },
        channel::ChannelHandle,
        config::AdmissionLimits,
        extensions::{ChannelRegistry, EnhancedAuthExchange, ExtensionAuthenticator},
        AdmissionOutcome, AdmissionPipeline,
    },
    auth::{AuthManager, CredentialValidator},
    broker::Broker,
    connection::Connection,
    session::Session,
    session_manager::{SessionManager, SessionManagerDropGuard},
    shutdown::Shutdown,
    tls::TlsConfig,
};

/// Carries the AUTH-packet challenge/response exchange (§4.2, §4.12) over a
/// live connection on behalf of the admission pipeline's enhanced-auth
/// stage. The pipeline itself never touches a socket; this is the one
/// production implementation of `EnhancedAuthExchange`.
struct ConnectionAuthExchange<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    connection: &'a mut Connection<S>,
}

#[async_trait]
impl<'a, S> EnhancedAuthExchange for ConnectionAuthExchange<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn challenge(&mut self, method: &str, data: Bytes) -> Option<Bytes> {
        let packet = ControlPacket::Auth(AuthPacket {
            reason: ReasonCode::ContinueAuthentication,
            properties: AuthProperties {
                auth_method: Some(AuthenticationMethod::new(method.to_string())),
                auth_data: Some(AuthenticationData::new(data)),
                reason_string: None,
                user_property: None,
            },
        });

        self.connection.write_packet(packet).await.ok()?;

        match self.connection.read_packet().await.ok()?? {
            ControlPacket::Auth(response) => response.properties.auth_data.map(|d| d.value),
            _ => None,
        }
    }
}

/// Authentication configuration for the server.
pub struct AuthConfig {
    /// Whether authentication is required.
    pub require_auth: bool,
    /// Optional credential validator for CONNECT username/password.
    pub credential_validator: Option<Arc<dyn CredentialValidator>>,
    /// Optional auth manager for MQTT 5.0 enhanced authentication.
    pub auth_manager: Option<Arc<AuthManager>>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            credential_validator: None,
            auth_manager: None,
        }
    }
}

/// Collaborators the admission pipeline needs, shared by every connection
/// handled by this listener.
struct AdmissionCollaborators {
    pipeline: AdmissionPipeline,
    registry: InMemoryChannelRegistry,
    authenticators: BoundedAuthenticators,
    authorizers: NoWillAuthorizers,
    session_store: InMemorySessionStore,
    event_log: TracingEventLog,
    alias_limiter: GlobalTopicAliasLimiter,
}

struct Listener {
    listener: TcpListener,
    broker: Broker<MemoryStore>,
    session_manager_holder: SessionManagerDropGuard,
    notify_shutdown: broadcast::Sender<()>,
    tls_acceptor: Option<TlsAcceptor>,
    auth_config: Arc<AuthConfig>,
    admission: Arc<AdmissionCollaborators>,
}

struct Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    broker: Broker<MemoryStore>,
    session_manager: SessionManager,
    connection: Connection<S>,
    shutdown: Shutdown,
    auth_config: Arc<AuthConfig>,
    admission: Arc<AdmissionCollaborators>,
}

/// Run the MQTT broker with plain TCP connections.
pub async fn run(listener: TcpListener, shutdown: impl Future) {
    run_with_tls(
        listener,
        None,
        AuthConfig::default(),
        AdmissionLimits::default(),
        shutdown,
    )
    .await
}

/// Run the MQTT broker with optional TLS support, authentication, and the
/// CONNECT admission limits in effect for every connection it accepts.
pub async fn run_with_tls(
    listener: TcpListener,
    tls_config: Option<TlsConfig>,
    auth_config: AuthConfig,
    mut admission_limits: AdmissionLimits,
    shutdown: impl Future,
) {
    let (notify_shutdown, _) = broadcast::channel(1);

    let storage = Arc::new(MemoryStore::new());

    let tls_acceptor = match tls_config {
        Some(config) => match config.build_acceptor() {
            Ok(acceptor) => {
                info!("TLS enabled");
                Some(acceptor)
            }
            Err(e) => {
                error!("Failed to configure TLS: {}", e);
                return;
            }
        },
        None => {
            debug!("TLS not configured, using plain TCP");
            None
        }
    };

    admission_limits.deny_unauthenticated_connections = auth_config.require_auth;

    let authenticator_providers: Vec<Arc<dyn ExtensionAuthenticator>> =
        match &auth_config.credential_validator {
            Some(validator) => vec![Arc::new(PasswordAuthenticator::new(Arc::clone(validator)))],
            None => vec![],
        };

    let alias_budget = if admission_limits.topic_alias_enabled {
        admission_limits.server_receive_maximum as u32
    } else {
        0
    };

    let admission = Arc::new(AdmissionCollaborators {
        pipeline: AdmissionPipeline::new(admission_limits, std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)),
        registry: InMemoryChannelRegistry::default(),
        authenticators: BoundedAuthenticators::new(authenticator_providers, 64),
        authorizers: NoWillAuthorizers,
        session_store: InMemorySessionStore::default(),
        event_log: TracingEventLog,
        alias_limiter: GlobalTopicAliasLimiter::new(alias_budget),
    });

    let auth_config = Arc::new(auth_config);

    let mut server = Listener {
        listener,
        broker: Broker::new(Arc::clone(&storage)),
        session_manager_holder: SessionManagerDropGuard::new(),
        notify_shutdown,
        tls_acceptor,
        auth_config,
        admission,
    };

    tokio::select! {
        result = server.run() => {
            if result.is_err() {
                error!("Failed to accept new connection");
            }
        }
        _ = shutdown => {
            info!("Shutting down!");
        }
    }
}

impl Listener {
    async fn run(&mut self) -> Result<()> {
        loop {
            let socket = self.accept().await?;
            let peer_addr = socket.peer_addr().ok();

            info!("Got a connection: {:?}", peer_addr);

            let broker = self.broker.clone();
            let session_manager = self.session_manager_holder.session_manager();
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());
            let auth_config = Arc::clone(&self.auth_config);
            let admission = Arc::clone(&self.admission);

            if let Some(ref tls_acceptor) = self.tls_acceptor {
                let acceptor = tls_acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(socket).await {
                        Ok(tls_stream) => {
                            debug!("TLS handshake completed for {:?}", peer_addr);
                            let mut handler = Handler {
                                broker,
                                session_manager,
                                connection: Connection::new_tls(tls_stream),
                                shutdown,
                                auth_config,
                                admission,
                            };
                            Self::handle_connection(&mut handler).await;
                        }
                        Err(e) => {
                            error!("TLS handshake failed for {:?}: {}", peer_addr, e);
                        }
                    }
                });
            } else {
                tokio::spawn(async move {
                    let mut handler = Handler {
                        broker,
                        session_manager,
                        connection: Connection::new(socket),
                        shutdown,
                        auth_config,
                        admission,
                    };
                    Self::handle_connection(&mut handler).await;
                });
            }
        }
    }

    async fn handle_connection<S>(handler: &mut Handler<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match handler.connection.read_packet().await {
            // [MQTT-3.1.0-1]
            // After a Network Connection is established by a Client
            // to a Server, the first packet sent from the Client to
            // the Server MUST be a CONNECT packet.
            Ok(Some(ControlPacket::Connect(p))) => {
                if let Err(err) = handler.run(p).await {
                    error!(cause = ?err, "Connection error");
                }
            }
            _ => error!("ConnectPacket expectation not met"),
        }
    }

    async fn accept(&mut self) -> Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;

            backoff *= 2;
        }
    }
}

impl<S> Handler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(&mut self, connect_packet: ConnectPacket) -> Result<()> {
        let auth_manager = self.auth_config.auth_manager.clone();
        let mut exchange = ConnectionAuthExchange {
            connection: &mut self.connection,
        };
        let enhanced_auth = auth_manager
            .as_deref()
            .map(|manager| (manager, &mut exchange as &mut dyn EnhancedAuthExchange));

        let outcome = self
            .admission
            .pipeline
            .admit(
                connect_packet,
                &self.admission.registry,
                &self.admission.authenticators,
                &self.admission.authorizers,
                &self.admission.session_store,
                &self.admission.event_log,
                &self.admission.alias_limiter,
                enhanced_auth,
            )
            .await;

        let (channel, connect, client_id, effective_keep_alive, session_present) = match outcome {
            AdmissionOutcome::Rejected {
                connack,
                reason_string,
            } => {
                warn!(reason = %reason_string, "CONNECT rejected");
                self.connection
                    .write_packet(ControlPacket::ConnAck(connack))
                    .await?;
                return Ok(());
            }
            AdmissionOutcome::Admitted {
                channel,
                connack,
                connect,
                client_id,
                effective_keep_alive,
                session_present,
            } => {
                self.connection
                    .write_packet(ControlPacket::ConnAck(connack))
                    .await?;
                (channel, connect, client_id, effective_keep_alive, session_present)
            }
        };

        let mut session_connect = (*connect).clone();
        session_connect.payload.client_id = client_id.to_string();

        let session = self
            .session_manager
            .start_session(session_connect)
            .await;

        let result = self
            .handle_connection(&session, &channel, effective_keep_alive)
            .await;

        if let Some(will) = session.take_will().await {
            self.publish_will(will, &session).await;
        }

        self.admission.registry.remove(&client_id).await;
        channel.close();

        if session_present {
            debug!(client_id = %client_id, "session resumed");
        }

        result
    }

    async fn handle_connection(
        &mut self,
        session: &Session,
        channel: &ChannelHandle,
        keepalive: u16,
    ) -> Result<()> {
        let mut session = session.clone();

        // MQTT spec: allow 1.5x keepalive seconds of silence before timing out.
        let timeout_duration = if keepalive == 0 {
            Duration::from_secs(u64::MAX / 2)
        } else {
            Duration::from_secs((keepalive as u64 * 3) / 2)
        };

        let deadline = time::sleep(timeout_duration);
        tokio::pin!(deadline);

        while !self.shutdown.is_shutdown() {
            tokio::select! {
                maybe_packet = self.connection.read_packet() => {
                    let packet = match maybe_packet? {
                        None => return Ok(()),
                        Some(ControlPacket::Disconnect(_)) => {
                            session.clear_will().await;
                            return Ok(());
                        }
                        Some(packet) => packet,
                    };

                    let maybe_res = session.process_incoming(packet, &self.broker).await?;

                    if let Some(res) = maybe_res {
                        self.connection.write_packet(res).await?;
                    }

                    deadline.as_mut().reset(Instant::now() + timeout_duration);
                }

                Some(packet) = session.process_outgoing() => {
                    self.connection.write_packet(packet).await?;
                }

                _ = &mut deadline => {
                    warn!(
                        "Keep-alive timeout ({}s with no packets)",
                        timeout_duration.as_secs()
                    );
                    return Ok(());
                }

                // A newer CONNECT with the same client identifier has taken
                // over this channel; tear down rather than race it.
                _ = channel.disconnect_future() => {
                    info!("channel displaced by a newer connection with the same client id");
                    return Ok(());
                }

                _ = self.shutdown.recv() => {
                    return Ok(());
                },
            }
        }

        Ok(())
    }

    async fn publish_will(&self, will: crate::session::WillMessage, session: &Session) {
        let client_id = session.get_client_id().await;
        info!(
            "Publishing will message for client `{}` on topic `{}`",
            client_id, will.topic
        );

        let topic: Arc<str> = Arc::from(will.topic.as_str());
        let message = Message {
            packet_id: None,
            topic: Arc::clone(&topic),
            dup: false,
            qos: will.qos,
            retain: will.retain,
            payload: Some(will.payload),
        };

        if let Err(e) = self.broker.publish(&topic, message).await {
            error!("Failed to publish will message: {}", e);
        }
    }
}
