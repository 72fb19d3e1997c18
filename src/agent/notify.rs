//! Trap and Inform origination and reception.
//!
//! This is a distinct, smaller facade from the request/response dispatcher
//! in [`super`]: it shares the same PDU shapes and v3 USM machinery but
//! never touches the provider registry or VACM, since a trap is not a
//! request against a MIB.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::oid;
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType, TrapV1Info};
use crate::transport::Transport;
use crate::value::Value;
use crate::varbind::VarBind;

use super::Agent;

static SYS_UP_TIME: LazyLock<Oid> = LazyLock::new(|| oid!(1, 3, 6, 1, 2, 1, 1, 3, 0));
static SNMP_TRAP_OID: LazyLock<Oid> = LazyLock::new(|| oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0));

fn prefix_trap_varbinds(sys_up_time: u32, trap_oid: Oid, mut varbinds: Vec<VarBind>) -> Vec<VarBind> {
    let mut prefixed = vec![
        VarBind::new(SYS_UP_TIME.clone(), Value::TimeTicks(sys_up_time)),
        VarBind::new(SNMP_TRAP_OID.clone(), Value::ObjectIdentifier(trap_oid)),
    ];
    prefixed.append(&mut varbinds);
    prefixed
}

/// Sends traps and informs to a single configured destination.
///
/// Carries its own request-id counter (RFC 3412 §6 requires `msgID`/
/// `request-id` be unique per outstanding exchange, independent of whatever
/// counter the agent's request dispatcher happens to use).
pub struct TrapSink<T: Transport> {
    agent: Agent,
    transport: T,
    next_id: AtomicI32,
}

impl<T: Transport> TrapSink<T> {
    /// Build a sink that authenticates v3 traffic (if any) against `agent`'s
    /// configuration and sends over `transport`, which should already be
    /// connected to the trap receiver.
    pub fn new(agent: Agent, transport: T) -> Self {
        Self {
            agent,
            transport,
            next_id: AtomicI32::new(1),
        }
    }

    fn next_request_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send an SNMPv1 Trap (RFC 1157 §4.1.6). Fire-and-forget: v1 traps have
    /// no acknowledgement.
    pub async fn send_trap_v1(
        &self,
        community: impl Into<Bytes>,
        enterprise: Oid,
        agent_addr: [u8; 4],
        generic_trap: i32,
        specific_trap: i32,
        timestamp: u32,
        varbinds: Vec<VarBind>,
    ) -> Result<()> {
        let pdu = Pdu::trap_v1(
            TrapV1Info {
                enterprise,
                agent_addr,
                generic_trap,
                specific_trap,
                timestamp,
            },
            varbinds,
        );
        let message = Message::V1 {
            community: community.into(),
            pdu,
        };
        self.transport.send(&message.encode()).await
    }

    /// Send an SNMPv2c Trap (RFC 3416 §4.2.6), prefixing `sysUpTime.0` and
    /// `snmpTrapOID.0` per convention. Fire-and-forget.
    pub async fn send_trap_v2(
        &self,
        community: impl Into<Bytes>,
        sys_up_time: u32,
        trap_oid: Oid,
        varbinds: Vec<VarBind>,
    ) -> Result<()> {
        let pdu = Pdu::new(
            PduType::TrapV2,
            self.next_request_id(),
            prefix_trap_varbinds(sys_up_time, trap_oid, varbinds),
        );
        let message = Message::V2c {
            community: community.into(),
            pdu,
        };
        self.transport.send(&message.encode()).await
    }

    /// Send an SNMPv3 Trap, authenticated (and optionally encrypted) under
    /// `user`, one of the users registered via
    /// [`AgentBuilder::user`](super::AgentBuilder::user). Fire-and-forget:
    /// the `reportableFlag` is unset, so a well-behaved receiver answers
    /// with nothing.
    pub async fn send_trap_v3(
        &self,
        user: &[u8],
        sys_up_time: u32,
        trap_oid: Oid,
        varbinds: Vec<VarBind>,
    ) -> Result<()> {
        let data = self.encode_v3_outbound(user, sys_up_time, trap_oid, varbinds, PduType::TrapV2, false)?;
        self.transport.send(&data).await
    }

    /// Send an SNMPv2c InformRequest and await its correlating Response,
    /// retrying on timeout the same way [`Client::get`](crate::client::Client::get) does.
    pub async fn send_inform(
        &self,
        community: impl Into<Bytes>,
        sys_up_time: u32,
        trap_oid: Oid,
        varbinds: Vec<VarBind>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Pdu> {
        let request_id = self.next_request_id();
        let pdu = Pdu::new(
            PduType::InformRequest,
            request_id,
            prefix_trap_varbinds(sys_up_time, trap_oid, varbinds),
        );
        let message = Message::V2c {
            community: community.into(),
            pdu,
        };
        self.send_and_await(&message.encode(), request_id, timeout, retries).await
    }

    /// Send an SNMPv3 InformRequest authenticated under `user` and await its
    /// Response.
    pub async fn send_inform_v3(
        &self,
        user: &[u8],
        sys_up_time: u32,
        trap_oid: Oid,
        varbinds: Vec<VarBind>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Pdu> {
        let request_id = self.next_request_id();
        let data = self.encode_v3_with_id(
            request_id,
            user,
            sys_up_time,
            trap_oid,
            varbinds,
            PduType::InformRequest,
            true,
        )?;
        self.send_and_await(&data, request_id, timeout, retries).await
    }

    async fn send_and_await(&self, data: &[u8], request_id: i32, timeout: Duration, retries: u32) -> Result<Pdu> {
        let mut attempt = 0;
        loop {
            self.transport.send(data).await?;
            match self.transport.recv(request_id, timeout).await {
                Ok((bytes, _source)) => {
                    let message = Message::decode(bytes)?;
                    return message.pdu().cloned().ok_or_else(|| Error::Timeout {
                        target: Some(self.transport.peer_addr()),
                        elapsed: timeout,
                        request_id,
                        retries: attempt,
                    });
                }
                Err(error) if attempt < retries => {
                    attempt += 1;
                    let _ = error;
                    continue;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn encode_v3_outbound(
        &self,
        user_name: &[u8],
        sys_up_time: u32,
        trap_oid: Oid,
        varbinds: Vec<VarBind>,
        pdu_type: PduType,
        reportable: bool,
    ) -> Result<Bytes> {
        self.encode_v3_with_id(
            self.next_request_id(),
            user_name,
            sys_up_time,
            trap_oid,
            varbinds,
            pdu_type,
            reportable,
        )
    }

    fn encode_v3_with_id(
        &self,
        request_id: i32,
        user_name: &[u8],
        sys_up_time: u32,
        trap_oid: Oid,
        varbinds: Vec<VarBind>,
        pdu_type: PduType,
        reportable: bool,
    ) -> Result<Bytes> {
        let user = self
            .agent
            .inner
            .users
            .get(user_name)
            .ok_or_else(|| Error::auth(None, crate::error::AuthErrorKind::NoUser))?;
        let pdu = Pdu::new(pdu_type, request_id, prefix_trap_varbinds(sys_up_time, trap_oid, varbinds));
        Ok(self.agent.encode_v3(
            request_id,
            Bytes::copy_from_slice(user_name),
            user,
            user.security_level,
            reportable,
            pdu,
        ))
    }
}

/// Why [`NotifyReceiver`] declined to deliver an inbound trap/inform to the
/// registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyRejection {
    UnrecognizedCommunity,
    UnrecognizedVersion,
    DisallowedSource,
}

/// Per-rejection-reason counters for [`NotifyReceiver`], mirroring the style
/// of [`UsmStats`](super::UsmStats).
#[derive(Default)]
struct ReceiverStats {
    unrecognized_community: AtomicU64,
    disallowed_source: AtomicU64,
}

/// Listens for incoming Traps/Informs on its own socket, filtering by
/// version, community, and source address before delivering to a callback.
///
/// This is deliberately a separate listener from [`Agent::serve`]: an agent
/// answering GET/SET on port 161 and a trap sink on port 162 are
/// conventionally different sockets, and conflating their dispatch paths
/// would let a trap sender exercise the MIB/VACM machinery it has no
/// business touching.
pub struct NotifyReceiver<T> {
    transport: T,
    allowed_communities: Vec<Bytes>,
    allowed_sources: Option<Vec<std::net::IpAddr>>,
    stats: ReceiverStats,
}

impl<T> NotifyReceiver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            allowed_communities: Vec::new(),
            allowed_sources: None,
            stats: ReceiverStats::default(),
        }
    }

    /// Restrict accepted v1/v2c traps to the given communities. Unset means
    /// any community is accepted (v3 traps are authenticated independently
    /// by their USM credentials and ignore this list).
    pub fn allow_community(mut self, community: impl Into<Bytes>) -> Self {
        self.allowed_communities.push(community.into());
        self
    }

    /// Restrict accepted traps to the given source addresses. Unset means
    /// any source is accepted.
    pub fn allow_source(mut self, addr: std::net::IpAddr) -> Self {
        self.allowed_sources.get_or_insert_with(Vec::new).push(addr);
        self
    }

    fn check_source(&self, source: SocketAddr) -> std::result::Result<(), NotifyRejection> {
        match &self.allowed_sources {
            Some(allowed) if !allowed.contains(&source.ip()) => {
                self.stats.disallowed_source.fetch_add(1, Ordering::Relaxed);
                Err(NotifyRejection::DisallowedSource)
            }
            _ => Ok(()),
        }
    }

    fn check_community(&self, community: &Bytes) -> std::result::Result<(), NotifyRejection> {
        if self.allowed_communities.is_empty() || self.allowed_communities.contains(community) {
            Ok(())
        } else {
            self.stats.unrecognized_community.fetch_add(1, Ordering::Relaxed);
            Err(NotifyRejection::UnrecognizedCommunity)
        }
    }
}

impl<T: crate::transport::AgentTransport> NotifyReceiver<T> {
    /// Receive one datagram, decode it, and apply the configured filters.
    ///
    /// Returns `Ok(None)` for a datagram this receiver is configured to
    /// ignore (bad community, disallowed source, or undecodable data) rather
    /// than treating it as fatal — a trap sink runs unattended and must
    /// tolerate noise.
    pub async fn recv(&self) -> Result<Option<(Pdu, SocketAddr)>> {
        let mut buf = vec![0u8; crate::v3::DEFAULT_MSG_MAX_SIZE as usize];
        let (len, source) = self.transport.recv_from(&mut buf).await?;
        if self.check_source(source).is_err() {
            return Ok(None);
        }

        let Ok(message) = Message::decode(Bytes::copy_from_slice(&buf[..len])) else {
            return Ok(None);
        };

        match &message {
            Message::V1 { community, .. } | Message::V2c { community, .. } => {
                if self.check_community(community).is_err() {
                    return Ok(None);
                }
            }
            Message::V3(_) => {}
        }

        let Some(pdu) = message.pdu().cloned() else {
            return Ok(None);
        };

        if pdu.pdu_type == PduType::InformRequest {
            let ack = Pdu::new(PduType::Response, pdu.request_id, Vec::new());
            let reply = match message {
                Message::V1 { community, .. } => Message::V1 { community, pdu: ack },
                Message::V2c { community, .. } => Message::V2c { community, pdu: ack },
                Message::V3(_) => return Ok(Some((pdu, source))),
            };
            self.transport.send_to(&reply.encode(), source).await?;
        }

        Ok(Some((pdu, source)))
    }
}
