//! CONNECT admission and session-takeover pipeline.
//!
//! Ties together the validator, authentication orchestrator,
//! will-authorization stage, takeover arbiter, session installer, and
//! CONNACK builder into the single sequential pipeline described by
//! [`AdmissionPipeline::admit`]. Every stage is independently testable;
//! this module wires them in the fixed order the admission invariants
//! depend on: Validator -> Auth -> Will-Auth -> Takeover -> Install -> CONNACK.

pub mod adapters;
pub mod auth_orchestrator;
pub mod channel;
pub mod config;
pub mod connack_builder;
pub mod error;
pub mod extensions;
pub mod session_installer;
pub mod takeover;
pub mod validator;
pub mod will_authz;

use std::sync::Arc;

use portcall_core::protocol::ProtocolVersion;
use portcall_core::reason::ReasonCode;
use portcall_packets::connack::ConnAckPacket;
use portcall_packets::connect::ConnectPacket;
use uuid::Uuid;

use auth_orchestrator::{AuthOutcome, QueueOverflowCounter};
use channel::ChannelHandle;
use config::AdmissionLimits;
use connack_builder::ConnAckInputs;
use extensions::{
    ChannelRegistry, EnhancedAuthExchange, EventLog, ExtensionAuthenticators, ExtensionAuthorizers,
    SessionStore, TopicAliasLimiter,
};
use takeover::TakeoverArbiter;

use crate::auth::{AuthManager, AuthResult};

/// What the caller should do once the pipeline finishes.
pub enum AdmissionOutcome {
    Admitted {
        channel: ChannelHandle,
        connack: ConnAckPacket,
        connect: Arc<ConnectPacket>,
        client_id: Arc<str>,
        effective_keep_alive: u16,
        session_present: bool,
    },
    Rejected {
        connack: ConnAckPacket,
        reason_string: String,
    },
}

/// Bundles every collaborator the pipeline needs. Construct one per broker
/// instance; it is cheap to clone the `Arc` fields it wraps.
pub struct AdmissionPipeline {
    pub limits: AdmissionLimits,
    pub arbiter: TakeoverArbiter,
    pub overflow: QueueOverflowCounter,
}

impl AdmissionPipeline {
    pub fn new(limits: AdmissionLimits, parallelism: usize) -> Self {
        Self {
            limits,
            arbiter: TakeoverArbiter::new(parallelism),
            overflow: QueueOverflowCounter::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn admit(
        &self,
        connect: ConnectPacket,
        registry: &dyn ChannelRegistry,
        authenticators: &dyn ExtensionAuthenticators,
        authorizers: &dyn ExtensionAuthorizers,
        store: &dyn SessionStore,
        event_log: &dyn EventLog,
        alias_limiter: &dyn TopicAliasLimiter,
        enhanced_auth: Option<(&AuthManager, &mut dyn EnhancedAuthExchange)>,
    ) -> AdmissionOutcome {
        let protocol_version = connect.protocol_version;
        let connect = Arc::new(connect);

        let normalized = match validator::validate(Arc::clone(&connect), &self.limits) {
            Ok(n) => n,
            Err(failure) => {
                event_log
                    .auth_failed(&connect.payload.client_id, failure.reason_string)
                    .await;
                return self.reject(protocol_version, failure.reason_code, failure.reason_string.to_string());
            }
        };

        let (client_id, client_id_assigned): (Arc<str>, bool) = if connect.payload.client_id.is_empty()
        {
            (Arc::from(Uuid::new_v4().to_string().as_str()), true)
        } else {
            (Arc::from(connect.payload.client_id.as_str()), false)
        };

        let channel = ChannelHandle::new(Arc::clone(&client_id));

        let enhanced_auth_ok = match Self::run_enhanced_auth(&connect, &channel, enhanced_auth).await
        {
            Ok(ok) => ok,
            Err((reason_code, reason_string)) => {
                event_log.auth_failed(&client_id, &reason_string).await;
                return self.reject(protocol_version, reason_code, reason_string);
            }
        };

        let auth_outcome = auth_orchestrator::authenticate(
            Arc::clone(&connect),
            &channel,
            authenticators,
            &self.limits,
            &self.overflow,
        )
        .await;

        let (permissions, user_properties, auth_bypassed) = match auth_outcome {
            AuthOutcome::Denied {
                reason_code,
                reason_string,
            } => {
                // §4.2: enhanced auth and extension authenticators are
                // independent collaborators; either can resolve the
                // connection on its own.
                if enhanced_auth_ok {
                    (extensions::Permissions::allow_all(), Vec::new(), false)
                } else {
                    event_log.auth_failed(&client_id, &reason_string).await;
                    return self.reject(protocol_version, reason_code, reason_string);
                }
            }
            AuthOutcome::Authenticated {
                permissions,
                user_properties,
            } => (permissions, user_properties, false),
            AuthOutcome::Bypassed => (extensions::Permissions::allow_all(), Vec::new(), true),
        };

        channel
            .with_attrs(|attrs| {
                attrs.authenticated = !auth_bypassed;
                attrs.auth_bypassed = auth_bypassed;
                attrs.auth_permissions = Some(permissions.clone());
                attrs.auth_user_properties = user_properties.clone();
                attrs.prevent_lwt = true;
                attrs.client_receive_maximum = normalized.receive_maximum;
                attrs.max_packet_size_send = normalized.maximum_packet_size;
                attrs.session_expiry_interval = normalized.session_expiry_interval;
                attrs.request_response_information = normalized.request_response_information;
                attrs.request_problem_information = normalized.request_problem_information;
                attrs.client_id_assigned = client_id_assigned;
            })
            .await;

        if connect.flags.will_flag {
            if let Err(denial) =
                will_authz::authorize_will(&channel, &connect, &permissions, authorizers).await
            {
                let reason_string = "will not authorized".to_string();
                event_log.auth_failed(&client_id, &reason_string).await;
                return self.reject(protocol_version, denial.reason_code, reason_string);
            }
        }

        channel.with_attrs(|attrs| attrs.prevent_lwt = false).await;

        self.arbiter.take_over(&client_id, registry).await;

        let install = session_installer::install_session(
            &client_id,
            channel.clone(),
            &connect,
            normalized.session_expiry_interval,
            &self.limits,
            registry,
            store,
            event_log,
        )
        .await;

        let (connack, effective_keep_alive) = connack_builder::build_connack(
            ConnAckInputs {
                protocol_version,
                session_present: install.session_present,
                reason_code: ReasonCode::Success,
                client_id_assigned: client_id_assigned.then_some(client_id.as_ref()),
                requested_session_expiry: normalized.session_expiry_interval,
                effective_session_expiry: install.effective_expiry,
                client_keep_alive: connect.keepalive,
                client_topic_alias_maximum: normalized.topic_alias_maximum,
                user_properties: &user_properties,
            },
            &self.limits,
            alias_limiter,
        );

        channel
            .with_attrs(|attrs| {
                attrs.connect_keep_alive = effective_keep_alive;
                if let Some(properties) = connack.properties.as_ref() {
                    if let Some(max) = properties.topic_alias_max.as_ref() {
                        attrs.topic_alias_mapping = vec![None; max.value as usize];
                    }
                }
            })
            .await;

        AdmissionOutcome::Admitted {
            channel,
            connack,
            connect,
            client_id,
            effective_keep_alive,
            session_present: install.session_present,
        }
    }

    /// §4.2 auth-method buffering stage: when the CONNECT carries a v5
    /// `authentication_method`, runs the AUTH-packet challenge/response
    /// exchange to completion before any extension authenticator fan-out,
    /// via `AuthManager`. Returns whether enhanced auth resolved the
    /// connection; `Ok(false)` means no exchange ran (no auth-method, or no
    /// `AuthManager` configured) and extension authenticators alone decide.
    async fn run_enhanced_auth(
        connect: &ConnectPacket,
        channel: &ChannelHandle,
        enhanced_auth: Option<(&AuthManager, &mut dyn EnhancedAuthExchange)>,
    ) -> Result<bool, (ReasonCode, String)> {
        let Some(method) = connect
            .properties
            .as_ref()
            .and_then(|p| p.authentication_method.clone())
        else {
            return Ok(false);
        };

        let Some((auth_manager, exchange)) = enhanced_auth else {
            return Ok(false);
        };

        channel
            .with_attrs(|attrs| attrs.auth_method = Some(method.value.clone()))
            .await;

        let initial_data = connect
            .properties
            .as_ref()
            .and_then(|p| p.authentication_data.as_ref())
            .map(|d| d.value.clone());

        let mut result = auth_manager.start_auth(&method.value, initial_data.as_ref());

        loop {
            match result {
                AuthResult::Success => return Ok(true),
                AuthResult::Failed(reason_code) => {
                    return Err((
                        reason_code,
                        format!("enhanced authentication failed for method `{}`", method.value),
                    ));
                }
                AuthResult::Continue(challenge_data) => {
                    match exchange.challenge(&method.value, challenge_data).await {
                        Some(response_data) => {
                            result = auth_manager.continue_auth(&method.value, &response_data);
                        }
                        None => {
                            return Err((
                                ReasonCode::ProtocolError,
                                "AUTH challenge/response exchange did not complete".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn reject(
        &self,
        protocol_version: ProtocolVersion,
        reason_code: ReasonCode,
        reason_string: String,
    ) -> AdmissionOutcome {
        use portcall_packets::connack::ConnAckFlags;

        let connack = ConnAckPacket {
            protocol_version,
            flags: ConnAckFlags {
                session_present: false,
            },
            reason_code,
            properties: None,
        };

        AdmissionOutcome::Rejected {
            connack,
            reason_string,
        }
    }
}
