//! Plain fluent builder for [`Agent`](super::Agent).
//!
//! Unlike the manager-side [`client::builder`](crate::client::builder), which
//! uses typestate to prevent nonsensical transitions (privacy before auth),
//! an agent's configuration has no such ordering constraints: handlers,
//! communities, VACM, and users are all independent, so a single builder
//! with optional fields covers every valid agent shape.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::handler::MibHandler;
use crate::message::SecurityLevel;
use crate::oid::Oid;
use crate::v3::{derive_keys, AuthProtocol, PrivProtocol, SaltCounter};

use super::vacm::VacmConfig;
use super::{Agent, AgentInner, RegisteredHandler, UsmStats, UsmUser, DEFAULT_MAX_RESPONSE_SIZE};

/// Which community string(s) a request must present.
///
/// Write access implies read access (a manager that can SET can also GET),
/// matching the conventional `rwcommunity`/`rocommunity` split most agent
/// implementations expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityAccess {
    Read,
    Write,
}

struct PendingUser {
    name: Bytes,
    auth: Option<(AuthProtocol, Vec<u8>)>,
    priv_: Option<(PrivProtocol, Vec<u8>)>,
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    handlers: Vec<RegisteredHandler>,
    read_community: Option<Bytes>,
    write_community: Option<Bytes>,
    vacm: Option<VacmConfig>,
    users: Vec<PendingUser>,
    engine_id: Option<Bytes>,
    engine_boots: i32,
    max_response_size: usize,
}

impl AgentBuilder {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Vec::new(),
            read_community: None,
            write_community: None,
            vacm: None,
            users: Vec::new(),
            engine_id: None,
            engine_boots: 0,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Register a handler for the subtree rooted at `prefix`.
    ///
    /// Handlers are tried in registration order; the first whose prefix
    /// contains a requested OID answers it (`§4.7`).
    pub fn handler(mut self, prefix: Oid, handler: impl MibHandler) -> Self {
        self.handlers.push(RegisteredHandler {
            prefix,
            handler: Arc::new(handler),
        });
        self
    }

    /// Set a community string for v1/v2c requests.
    ///
    /// Calling this twice with [`CommunityAccess::Read`] and
    /// [`CommunityAccess::Write`] (the same or different strings) configures
    /// both; a write community is also accepted for read-only operations.
    pub fn community(mut self, access: CommunityAccess, community: impl Into<Bytes>) -> Self {
        match access {
            CommunityAccess::Read => self.read_community = Some(community.into()),
            CommunityAccess::Write => self.write_community = Some(community.into()),
        }
        self
    }

    /// Configure VACM access control.
    ///
    /// Without this call, VACM is not consulted at all: every varbind with a
    /// registered handler is implicitly readable and writable to any
    /// authenticated requester (VACM is opt-in on top of community/USM
    /// gating, not a replacement for it).
    pub fn vacm(mut self, build: impl FnOnce(super::VacmBuilder) -> VacmConfig) -> Self {
        self.vacm = Some(build(super::VacmBuilder::new()));
        self
    }

    /// Register an SNMPv3 USM user.
    ///
    /// `auth`/`priv` follow RFC 3414 §1.4: privacy requires authentication,
    /// so a user configured with only `priv` still has no usable privacy
    /// key (its `securityLevel` collapses to whatever `auth` alone permits).
    pub fn user<A, P>(
        mut self,
        name: impl Into<Bytes>,
        auth: Option<(AuthProtocol, A)>,
        priv_: Option<(PrivProtocol, P)>,
    ) -> Self
    where
        A: Into<Vec<u8>>,
        P: Into<Vec<u8>>,
    {
        self.users.push(PendingUser {
            name: name.into(),
            auth: auth.map(|(p, pw)| (p, pw.into())),
            priv_: priv_.map(|(p, pw)| (p, pw.into())),
        });
        self
    }

    /// Set this agent's authoritative `engineID` (RFC 3411 §5).
    ///
    /// Required for any configured v3 user, since USM keys are localized
    /// against it. If omitted and v3 users are configured, [`build`](Self::build)
    /// fails.
    pub fn engine_id(mut self, engine_id: impl Into<Bytes>) -> Self {
        self.engine_id = Some(engine_id.into());
        self
    }

    /// Set the initial `engineBoots` counter (RFC 3414 §2.3).
    ///
    /// Persisting and incrementing this across restarts is the caller's
    /// responsibility; this implementation only extrapolates `engineTime`
    /// from a monotonic clock within a single process lifetime.
    pub fn engine_boots(mut self, boots: u32) -> Self {
        self.engine_boots = boots as i32;
        self
    }

    /// Override the maximum outgoing response datagram size.
    ///
    /// Defaults to [`DEFAULT_MAX_RESPONSE_SIZE`]. A v3 peer's advertised
    /// `msgMaxSize` is additionally honored per-request and takes the
    /// smaller of the two.
    pub fn max_response_size(mut self, max: usize) -> Self {
        self.max_response_size = max;
        self
    }

    /// Assemble the agent.
    ///
    /// Fails if any user is configured without an `engineID` having been set.
    pub fn build(self) -> Result<Agent> {
        let mut users = HashMap::with_capacity(self.users.len());
        if !self.users.is_empty() {
            let engine_id = self
                .engine_id
                .clone()
                .ok_or_else(|| Error::encode(crate::error::EncodeErrorKind::NoSecurityConfig))?;
            for pending in self.users {
                let security_level = match (&pending.auth, &pending.priv_) {
                    (Some(_), Some(_)) => SecurityLevel::AuthPriv,
                    (Some(_), None) => SecurityLevel::AuthNoPriv,
                    (None, _) => SecurityLevel::NoAuthNoPriv,
                };
                let (auth_protocol, auth_password) = pending
                    .auth
                    .clone()
                    .map(|(p, pw)| (Some(p), pw))
                    .unwrap_or((None, Vec::new()));
                let priv_protocol = pending.priv_.as_ref().map(|(p, _)| *p);
                let priv_password = pending.priv_.as_ref().map(|(_, pw)| pw.clone()).unwrap_or_default();
                let keys = derive_keys(
                    &engine_id,
                    auth_protocol.unwrap_or(AuthProtocol::Sha1),
                    &auth_password,
                    priv_protocol,
                    &priv_password,
                );
                users.insert(
                    pending.name,
                    UsmUser {
                        security_level,
                        auth_protocol,
                        priv_protocol,
                        keys,
                    },
                );
            }
        }

        let engine_id = self.engine_id.unwrap_or_else(|| Bytes::from_static(b"rsnmp-agent"));

        Ok(Agent {
            inner: Arc::new(AgentInner {
                handlers: self.handlers,
                read_community: self.read_community,
                write_community: self.write_community,
                vacm: self.vacm,
                users,
                engine_id,
                engine_boots: self.engine_boots,
                started_at: Instant::now(),
                usm_stats: UsmStats::default(),
                salt: SaltCounter::new(),
                max_response_size: self.max_response_size,
            }),
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
