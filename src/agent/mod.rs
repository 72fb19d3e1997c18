//! SNMP agent: answers GET/GETNEXT/GETBULK/SET requests against
//! user-registered [`handler::MibHandler`](crate::handler::MibHandler)s,
//! under optional VACM access control and v1/v2c/v3 security.
//!
//! [`AgentBuilder`] assembles an immutable [`Agent`]; `Agent::serve` then
//! drives a single always-listening receive loop (RFC 3411 §3.2) until its
//! [`CancellationToken`](tokio_util::sync::CancellationToken) fires.

mod builder;
mod notify;
mod set_handler;
pub mod vacm;

pub use builder::{AgentBuilder, CommunityAccess};
pub use notify::{NotifyReceiver, NotifyRejection, TrapSink};
pub use vacm::{AccessEntryBuilder, SecurityModel, VacmBuilder, VacmConfig, View, ViewSubtree};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use crate::ber::EncodeBuf;
use crate::error::{ErrorStatus, Result};
use crate::handler::{GetNextResult, GetResult, MibHandler, RequestContext};
use crate::message::{Message, MsgFlags, ScopedPduBody, SecurityLevel, V3Message};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::transport::AgentTransport;
use crate::v3::{
    AuthProtocol, MasterKeys, PrivKey, PrivProtocol, SaltCounter, UsmSecurityParams,
    DEFAULT_MSG_MAX_SIZE,
};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

/// Default maximum response datagram size: the conventional UDP payload
/// limit that avoids IP fragmentation over typical Ethernet-framed paths.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1472;

/// A provider's subtree registration: the OID prefix it was registered under,
/// paired with the handler that answers for it.
pub(crate) struct RegisteredHandler {
    pub(crate) prefix: Oid,
    pub(crate) handler: Arc<dyn MibHandler>,
}

/// A configured SNMPv3 USM user, with its keys already localized to this
/// agent's own `engineID` (there is only ever one, so localization happens
/// once at build time rather than per-request).
pub(crate) struct UsmUser {
    pub(crate) security_level: SecurityLevel,
    pub(crate) auth_protocol: Option<AuthProtocol>,
    pub(crate) priv_protocol: Option<PrivProtocol>,
    pub(crate) keys: MasterKeys,
}

/// Per-rejection-reason counters mirroring the `usmStats*` scalars a real
/// USM implementation exposes (RFC 3414 §5).
#[derive(Default)]
pub(crate) struct UsmStats {
    pub(crate) unsupported_sec_levels: AtomicU64,
    pub(crate) not_in_time_windows: AtomicU64,
    pub(crate) unknown_user_names: AtomicU64,
    pub(crate) unknown_engine_ids: AtomicU64,
    pub(crate) wrong_digests: AtomicU64,
    pub(crate) decryption_errors: AtomicU64,
}

pub(crate) struct AgentInner {
    pub(crate) handlers: Vec<RegisteredHandler>,
    pub(crate) read_community: Option<Bytes>,
    pub(crate) write_community: Option<Bytes>,
    pub(crate) vacm: Option<VacmConfig>,
    pub(crate) users: HashMap<Bytes, UsmUser>,
    pub(crate) engine_id: Bytes,
    pub(crate) engine_boots: i32,
    pub(crate) started_at: Instant,
    pub(crate) usm_stats: UsmStats,
    pub(crate) salt: SaltCounter,
    pub(crate) max_response_size: usize,
}

/// An assembled SNMP agent, ready to [`serve`](Agent::serve) one
/// [`AgentTransport`].
///
/// Cheap to clone: every clone shares the same immutable configuration via
/// `Arc`, so each dispatched request can own a clone without contention.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl Agent {
    /// Start building an agent.
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// This agent's current `engineTime`: seconds elapsed since `engineBoots`
    /// was last set, extrapolated from a monotonic clock and saturating at
    /// `i32::MAX` rather than wrapping (RFC 3414 §2.3).
    fn engine_time(&self) -> i32 {
        let elapsed = self.inner.started_at.elapsed().as_secs() as i64;
        elapsed.min(i64::from(i32::MAX)) as i32
    }

    /// The first registered handler whose prefix contains `oid` exactly
    /// (used for Get/Set, which address a single instance, not a search).
    pub(crate) fn find_handler(&self, oid: &Oid) -> Option<&RegisteredHandler> {
        self.inner
            .handlers
            .iter()
            .find(|reg| oid.starts_with(&reg.prefix))
    }

    fn read_allowed(&self, ctx: &RequestContext, oid: &Oid) -> bool {
        match &self.inner.vacm {
            None => true,
            Some(vacm) => vacm.check_access(ctx.read_view.as_ref(), oid),
        }
    }

    fn write_allowed(&self, ctx: &RequestContext, oid: &Oid) -> bool {
        match &self.inner.vacm {
            None => true,
            Some(vacm) => vacm.check_access(ctx.write_view.as_ref(), oid),
        }
    }

    /// Query every provider willing to answer for `oid` and keep the
    /// lexicographically smallest successor, breaking ties by registration
    /// order (`§4.7`: adjacent subtrees may each have an opinion near their
    /// shared boundary).
    async fn next_candidate(&self, ctx: &RequestContext, oid: &Oid) -> Option<VarBind> {
        let mut best: Option<VarBind> = None;
        for reg in &self.inner.handlers {
            if !reg.handler.handles(&reg.prefix, oid) {
                continue;
            }
            if let GetNextResult::Value(vb) = reg.handler.get_next(ctx, oid).await
                && best.as_ref().is_none_or(|b| vb.oid < b.oid)
            {
                best = Some(vb);
            }
        }
        best
    }

    /// Like [`next_candidate`](Self::next_candidate), but skips candidates
    /// the requester's read view excludes, advancing the search cursor past
    /// each one instead of stopping (the cursor strictly increases each
    /// iteration, since every successor is necessarily greater than the
    /// search OID, so this always terminates).
    async fn get_next_in_view(&self, ctx: &RequestContext, start: &Oid) -> GetNextResult {
        let mut cursor = start.clone();
        loop {
            match self.next_candidate(ctx, &cursor).await {
                Some(candidate) => {
                    if self.read_allowed(ctx, &candidate.oid) {
                        return GetNextResult::Value(candidate);
                    }
                    cursor = candidate.oid;
                }
                None => return GetNextResult::EndOfMibView,
            }
        }
    }

    fn pdu_encoded_size(pdu: &Pdu) -> usize {
        let mut buf = EncodeBuf::new();
        pdu.encode(&mut buf);
        buf.len()
    }

    fn too_big(pdu: &Pdu) -> Pdu {
        Pdu {
            pdu_type: PduType::Response,
            request_id: pdu.request_id,
            error_status: ErrorStatus::TooBig.as_i32(),
            error_index: 0,
            varbinds: Vec::new(),
            trap_v1: None,
        }
    }

    fn gen_err(pdu: &Pdu) -> Pdu {
        Pdu {
            pdu_type: PduType::Response,
            request_id: pdu.request_id,
            error_status: ErrorStatus::GenErr.as_i32(),
            error_index: 0,
            varbinds: Vec::new(),
            trap_v1: None,
        }
    }

    /// Reject `pdu` with `status` at `index`, echoing back the original
    /// varbinds (RFC 3416 requires an error response carry the varbinds that
    /// were submitted, not the partial results computed so far).
    fn reject(pdu: &Pdu, status: ErrorStatus, index: usize) -> Pdu {
        Pdu {
            pdu_type: PduType::Response,
            request_id: pdu.request_id,
            error_status: status.as_i32(),
            error_index: index as i32,
            varbinds: pdu.varbinds.clone(),
            trap_v1: None,
        }
    }

    async fn handle_get(&self, ctx: &RequestContext, pdu: &Pdu, max_size: usize) -> Pdu {
        let mut varbinds = Vec::with_capacity(pdu.varbinds.len());
        for (i, vb) in pdu.varbinds.iter().enumerate() {
            if !self.read_allowed(ctx, &vb.oid) {
                if ctx.version == Version::V1 {
                    return Self::reject(pdu, ErrorStatus::NoSuchName, i + 1);
                }
                varbinds.push(VarBind::new(vb.oid.clone(), Value::NoSuchObject));
                continue;
            }

            let result = match self.find_handler(&vb.oid) {
                Some(reg) => reg.handler.get(ctx, &vb.oid).await,
                None => GetResult::NoSuchObject,
            };
            match result {
                GetResult::Value(value) => varbinds.push(VarBind::new(vb.oid.clone(), value)),
                GetResult::NoSuchObject | GetResult::NoSuchInstance => {
                    if ctx.version == Version::V1 {
                        return Self::reject(pdu, ErrorStatus::NoSuchName, i + 1);
                    }
                    let value = if matches!(result, GetResult::NoSuchObject) {
                        Value::NoSuchObject
                    } else {
                        Value::NoSuchInstance
                    };
                    varbinds.push(VarBind::new(vb.oid.clone(), value));
                }
            }
        }
        let response = Pdu::new(PduType::Response, pdu.request_id, varbinds);
        if Self::pdu_encoded_size(&response) > max_size {
            Self::too_big(pdu)
        } else {
            response
        }
    }

    async fn handle_get_next(&self, ctx: &RequestContext, pdu: &Pdu, max_size: usize) -> Pdu {
        let mut varbinds = Vec::with_capacity(pdu.varbinds.len());
        for (i, vb) in pdu.varbinds.iter().enumerate() {
            match self.get_next_in_view(ctx, &vb.oid).await {
                GetNextResult::Value(found) => varbinds.push(found),
                GetNextResult::EndOfMibView => {
                    if ctx.version == Version::V1 {
                        return Self::reject(pdu, ErrorStatus::NoSuchName, i + 1);
                    }
                    varbinds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView));
                }
            }
        }
        let response = Pdu::new(PduType::Response, pdu.request_id, varbinds);
        if Self::pdu_encoded_size(&response) > max_size {
            Self::too_big(pdu)
        } else {
            response
        }
    }

    /// RFC 3416 §4.2.3: the first `non-repeaters` varbinds get a single
    /// GETNEXT each; the rest repeat for up to `max-repetitions` rounds,
    /// each round chasing the previous round's result. A round's varbind
    /// that has already hit end-of-MIB stays pinned there rather than
    /// producing further rows, and the whole response is truncated (not
    /// rejected) the moment appending the next varbind would overflow
    /// `max_size`.
    async fn handle_get_bulk(&self, ctx: &RequestContext, pdu: &Pdu, max_size: usize) -> Pdu {
        if ctx.version == Version::V1 {
            return Self::gen_err(pdu);
        }

        let non_repeaters = (pdu.non_repeaters().max(0) as usize).min(pdu.varbinds.len());
        let max_repetitions = pdu.max_repetitions().max(0) as usize;
        let (heads, repeaters) = pdu.varbinds.split_at(non_repeaters);

        // Conservative slack for the outer message/PDU framing this PDU will
        // eventually be wrapped in; varbinds are measured exactly via
        // `VarBind::encoded_size`, this only covers the fixed overhead.
        const FRAMING_SLACK: usize = 64;
        let budget = max_size.saturating_sub(FRAMING_SLACK);
        let mut size = 0usize;
        let mut varbinds = Vec::new();

        for vb in heads {
            let found = match self.get_next_in_view(ctx, &vb.oid).await {
                GetNextResult::Value(found) => found,
                GetNextResult::EndOfMibView => VarBind::new(vb.oid.clone(), Value::EndOfMibView),
            };
            let vb_size = found.encoded_size();
            if size + vb_size > budget {
                return Pdu::new(PduType::Response, pdu.request_id, varbinds);
            }
            size += vb_size;
            varbinds.push(found);
        }

        let mut cursors: Vec<Oid> = repeaters.iter().map(|vb| vb.oid.clone()).collect();
        let mut done = vec![false; cursors.len()];
        for _round in 0..max_repetitions {
            if done.iter().all(|&d| d) {
                break;
            }
            for (i, cursor) in cursors.iter_mut().enumerate() {
                if done[i] {
                    continue;
                }
                let found = match self.get_next_in_view(ctx, cursor).await {
                    GetNextResult::Value(found) => {
                        *cursor = found.oid.clone();
                        found
                    }
                    GetNextResult::EndOfMibView => {
                        done[i] = true;
                        VarBind::new(cursor.clone(), Value::EndOfMibView)
                    }
                };
                let vb_size = found.encoded_size();
                if size + vb_size > budget {
                    return Pdu::new(PduType::Response, pdu.request_id, varbinds);
                }
                size += vb_size;
                varbinds.push(found);
            }
        }

        Pdu::new(PduType::Response, pdu.request_id, varbinds)
    }

    /// Dispatch a decoded PDU (whose security processing already succeeded)
    /// to the appropriate per-PDU-kind handler.
    async fn handle_request(&self, ctx: &RequestContext, pdu: &Pdu, max_size: usize) -> Pdu {
        match pdu.pdu_type {
            PduType::GetRequest => self.handle_get(ctx, pdu, max_size).await,
            PduType::GetNextRequest => self.handle_get_next(ctx, pdu, max_size).await,
            PduType::GetBulkRequest => self.handle_get_bulk(ctx, pdu, max_size).await,
            PduType::SetRequest => self
                .handle_set(ctx, pdu)
                .await
                .unwrap_or_else(|_| Self::reject(pdu, ErrorStatus::GenErr, 0)),
            PduType::InformRequest => {
                Pdu::new(PduType::Response, pdu.request_id, pdu.varbinds.clone())
            }
            _ => Self::gen_err(pdu),
        }
    }

    fn resolve_views(
        &self,
        security_model: SecurityModel,
        security_name: &[u8],
        security_level: SecurityLevel,
        context_name: &[u8],
    ) -> (Option<Bytes>, Option<Bytes>) {
        let Some(vacm) = &self.inner.vacm else {
            // Opt-in model: no VACM configured means every varbind registered
            // with a handler is implicitly readable/writable.
            return (None, None);
        };
        let Some(group) = vacm.get_group(security_model, security_name) else {
            return (None, None);
        };
        let Some(access) = vacm.get_access(group, context_name, security_model, security_level) else {
            return (None, None);
        };
        let read = (!access.read_view.is_empty()).then(|| access.read_view.clone());
        let write = (!access.write_view.is_empty()).then(|| access.write_view.clone());
        (read, write)
    }

    /// Route one received datagram to either the v1/v2c community path or
    /// the v3 USM path, and encode whatever reply (if any) results.
    async fn dispatch_datagram(&self, data: Bytes, source: SocketAddr) -> Option<Bytes> {
        let message = Message::decode(data).ok()?;
        match message {
            Message::V1 { community, pdu } => {
                self.handle_community(Version::V1, community, pdu, source).await
            }
            Message::V2c { community, pdu } => {
                self.handle_community(Version::V2c, community, pdu, source).await
            }
            Message::V3(v3) => self.handle_v3(v3, source).await,
        }
    }

    /// v1/v2c request path: an unrecognized community is dropped silently
    /// (RFC 3416 defines no error response for a bad community, and
    /// answering would leak which communities exist).
    async fn handle_community(
        &self,
        version: Version,
        community: Bytes,
        pdu: Pdu,
        source: SocketAddr,
    ) -> Option<Bytes> {
        let needs_write = pdu.pdu_type == PduType::SetRequest;
        let authorized = if needs_write {
            self.inner.write_community.as_ref() == Some(&community)
        } else {
            self.inner.read_community.as_ref() == Some(&community)
                || self.inner.write_community.as_ref() == Some(&community)
        };
        if !authorized {
            return None;
        }

        let (read_view, write_view) = self.resolve_views(
            SecurityModel::from_version(version),
            &community,
            SecurityLevel::NoAuthNoPriv,
            b"",
        );
        let ctx = RequestContext {
            source,
            version,
            security_model: SecurityModel::from_version(version),
            security_name: community,
            security_level: SecurityLevel::NoAuthNoPriv,
            context_name: Bytes::new(),
            request_id: pdu.request_id,
            pdu_type: pdu.pdu_type,
            group_name: None,
            read_view,
            write_view,
        };

        let response = self.handle_request(&ctx, &pdu, self.inner.max_response_size).await;
        let message = match version {
            Version::V1 => Message::V1 {
                community: ctx.security_name,
                pdu: response,
            },
            _ => Message::V2c {
                community: ctx.security_name,
                pdu: response,
            },
        };
        Some(message.encode())
    }

    /// Build a v3 `Report` carrying a single `usmStats*` counter varbind, per
    /// RFC 3414 §3.2's error paths; reports are always noAuthNoPriv and never
    /// ask for a Report of their own.
    fn usm_report(&self, msg_id: i32, request_id: i32, oid: &crate::oid::Oid, counter: u64) -> Bytes {
        let pdu = Pdu::new(
            PduType::Report,
            request_id,
            vec![VarBind::new(oid.clone(), Value::Counter32(counter as u32))],
        );
        let message = V3Message {
            msg_id,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(SecurityLevel::NoAuthNoPriv, false),
            security_model: 3,
            usm: UsmSecurityParams {
                engine_id: self.inner.engine_id.clone(),
                engine_boots: self.inner.engine_boots,
                engine_time: self.engine_time(),
                user_name: Bytes::new(),
                auth_params: Bytes::new(),
                priv_params: Bytes::new(),
            },
            scoped_pdu: ScopedPduBody::Plaintext {
                context_engine_id: self.inner.engine_id.clone(),
                context_name: Bytes::new(),
                pdu,
            },
        };
        Message::V3(message).encode()
    }

    /// SNMPv3 USM request path (RFC 3414 §3.2): engine-ID check, user lookup,
    /// security-level check, authentication, timeliness, and decryption, each
    /// failing into its matching `usmStats*` Report rather than a Response.
    async fn handle_v3(&self, v3: V3Message, source: SocketAddr) -> Option<Bytes> {
        use crate::v3::engine::{
            USM_STATS_DECRYPTION_ERRORS, USM_STATS_NOT_IN_TIME_WINDOWS, USM_STATS_UNKNOWN_ENGINE_IDS,
            USM_STATS_UNKNOWN_USER_NAMES, USM_STATS_UNSUPPORTED_SEC_LEVELS, USM_STATS_WRONG_DIGESTS,
        };

        if v3.usm.engine_id != self.inner.engine_id && !v3.usm.engine_id.is_empty() {
            self.inner.usm_stats.unknown_engine_ids.fetch_add(1, Ordering::Relaxed);
            return Some(self.usm_report(
                v3.msg_id,
                0,
                &USM_STATS_UNKNOWN_ENGINE_IDS,
                self.inner.usm_stats.unknown_engine_ids.load(Ordering::Relaxed),
            ));
        }

        let Some(user) = self.inner.users.get(v3.usm.user_name.as_ref()) else {
            self.inner.usm_stats.unknown_user_names.fetch_add(1, Ordering::Relaxed);
            return Some(self.usm_report(
                v3.msg_id,
                0,
                &USM_STATS_UNKNOWN_USER_NAMES,
                self.inner.usm_stats.unknown_user_names.load(Ordering::Relaxed),
            ));
        };

        if v3.flags.level > user.security_level {
            self.inner.usm_stats.unsupported_sec_levels.fetch_add(1, Ordering::Relaxed);
            return Some(self.usm_report(
                v3.msg_id,
                0,
                &USM_STATS_UNSUPPORTED_SEC_LEVELS,
                self.inner.usm_stats.unsupported_sec_levels.load(Ordering::Relaxed),
            ));
        }

        // Re-encode and zero the auth range to re-verify the HMAC, mirroring
        // the manager-side check in `Client::decode_v3_response`.
        if v3.flags.level.auth_flag() {
            let (bytes, auth_range) = v3.encode_with_auth_range();
            let auth_protocol = user.auth_protocol.unwrap_or(AuthProtocol::Sha1);
            let auth_key = user
                .keys
                .auth_key
                .as_ref()
                .map(|k| k.as_bytes().to_vec())
                .unwrap_or_default();
            let mut zeroed = BytesMut::from(&bytes[..]);
            zeroed[auth_range].fill(0);
            if crate::v3::auth::verify_mac(auth_protocol, &auth_key, &zeroed, &v3.usm.auth_params).is_err() {
                self.inner.usm_stats.wrong_digests.fetch_add(1, Ordering::Relaxed);
                return Some(self.usm_report(
                    v3.msg_id,
                    0,
                    &USM_STATS_WRONG_DIGESTS,
                    self.inner.usm_stats.wrong_digests.load(Ordering::Relaxed),
                ));
            }

            let engine_time = self.engine_time();
            const TIME_WINDOW: i32 = crate::v3::TIME_WINDOW;
            if v3.usm.engine_boots != self.inner.engine_boots
                || (v3.usm.engine_time - engine_time).abs() > TIME_WINDOW
            {
                self.inner.usm_stats.not_in_time_windows.fetch_add(1, Ordering::Relaxed);
                return Some(self.usm_report(
                    v3.msg_id,
                    0,
                    &USM_STATS_NOT_IN_TIME_WINDOWS,
                    self.inner.usm_stats.not_in_time_windows.load(Ordering::Relaxed),
                ));
            }
        }

        let pdu = match &v3.scoped_pdu {
            ScopedPduBody::Encrypted(ciphertext) => {
                let decrypted = user.priv_protocol.zip(user.keys.priv_key.as_ref()).and_then(
                    |(protocol, key)| {
                        let cipher = PrivKey::new(protocol, key.clone());
                        cipher
                            .decrypt(v3.usm.engine_boots, v3.usm.engine_time, &v3.usm.priv_params, ciphertext)
                            .ok()
                    },
                );
                let Some(plaintext) = decrypted else {
                    self.inner.usm_stats.decryption_errors.fetch_add(1, Ordering::Relaxed);
                    return Some(self.usm_report(
                        v3.msg_id,
                        0,
                        &USM_STATS_DECRYPTION_ERRORS,
                        self.inner.usm_stats.decryption_errors.load(Ordering::Relaxed),
                    ));
                };
                match ScopedPduBody::decode_plaintext(plaintext) {
                    Ok((_, _, pdu)) => pdu,
                    Err(_) => {
                        self.inner.usm_stats.decryption_errors.fetch_add(1, Ordering::Relaxed);
                        return Some(self.usm_report(
                            v3.msg_id,
                            0,
                            &USM_STATS_DECRYPTION_ERRORS,
                            self.inner.usm_stats.decryption_errors.load(Ordering::Relaxed),
                        ));
                    }
                }
            }
            ScopedPduBody::Plaintext { pdu, .. } => pdu.clone(),
        };

        let (read_view, write_view) = self.resolve_views(
            SecurityModel::Usm,
            &v3.usm.user_name,
            v3.flags.level,
            b"",
        );
        let ctx = RequestContext {
            source,
            version: Version::V3,
            security_model: SecurityModel::Usm,
            security_name: v3.usm.user_name.clone(),
            security_level: v3.flags.level,
            context_name: Bytes::new(),
            request_id: pdu.request_id,
            pdu_type: pdu.pdu_type,
            group_name: None,
            read_view,
            write_view,
        };

        let max_size = (v3.msg_max_size.max(0) as usize).min(self.inner.max_response_size);
        let response = self.handle_request(&ctx, &pdu, max_size).await;
        Some(self.encode_v3_response(&v3, user, response))
    }

    /// Mirror-image of `Client::encode_v3_request`: the agent authenticates
    /// and, if required, encrypts its own response the same way a manager
    /// authenticates and encrypts a request.
    fn encode_v3_response(&self, request: &V3Message, user: &UsmUser, pdu: Pdu) -> Bytes {
        self.encode_v3(request.msg_id, request.usm.user_name.clone(), user, request.flags.level, false, pdu)
    }

    /// Build and authenticate/encrypt a v3 message under `user`'s keys,
    /// shared by response encoding and trap/inform origination (`notify`).
    /// `reportable` should be `true` only for PDUs expecting a reply
    /// (Inform), matching RFC 3412 §7.1's `reportableFlag` semantics.
    pub(crate) fn encode_v3(
        &self,
        msg_id: i32,
        user_name: Bytes,
        user: &UsmUser,
        level: SecurityLevel,
        reportable: bool,
        pdu: Pdu,
    ) -> Bytes {
        let engine_time = self.engine_time();
        let scoped_plain = ScopedPduBody::Plaintext {
            context_engine_id: self.inner.engine_id.clone(),
            context_name: Bytes::new(),
            pdu,
        };

        let (scoped_pdu, priv_params) = if level.priv_flag() {
            match user.priv_protocol.zip(user.keys.priv_key.as_ref()) {
                Some((protocol, key)) => {
                    let cipher = PrivKey::new(protocol, key.clone());
                    let salt = self.inner.salt.next();
                    let plaintext = scoped_plain.encode_to_bytes();
                    match cipher.encrypt(self.inner.engine_boots, engine_time, salt, &plaintext) {
                        Ok((params, ciphertext)) => (ScopedPduBody::Encrypted(ciphertext), params),
                        Err(_) => (scoped_plain, Bytes::new()),
                    }
                }
                None => (scoped_plain, Bytes::new()),
            }
        } else {
            (scoped_plain, Bytes::new())
        };

        let auth_params = if level.auth_flag() {
            Bytes::from(vec![0u8; user.auth_protocol.unwrap_or(AuthProtocol::Sha1).mac_len()])
        } else {
            Bytes::new()
        };

        let usm = UsmSecurityParams {
            engine_id: self.inner.engine_id.clone(),
            engine_boots: self.inner.engine_boots,
            engine_time,
            user_name,
            auth_params,
            priv_params,
        };

        let message = V3Message {
            msg_id,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(level, reportable),
            security_model: 3,
            usm,
            scoped_pdu,
        };

        let (bytes, auth_range) = message.encode_with_auth_range();
        if level.auth_flag() {
            if let Some(auth_key) = &user.keys.auth_key {
                let protocol = user.auth_protocol.unwrap_or(AuthProtocol::Sha1);
                if let Ok(mac) = crate::v3::auth::compute_mac(protocol, auth_key.as_bytes(), &bytes) {
                    let mut patched = BytesMut::from(&bytes[..]);
                    patched[auth_range].copy_from_slice(&mac);
                    return patched.freeze();
                }
            }
        }
        bytes
    }

    /// Run the receive loop on `transport` until `shutdown` is cancelled.
    ///
    /// Each datagram is dispatched on its own spawned task so a slow provider
    /// cannot starve unrelated peers' requests; already-dispatched tasks are
    /// allowed to finish before this returns.
    pub async fn serve<T>(&self, transport: T, shutdown: CancellationToken) -> Result<()>
    where
        T: AgentTransport + Clone + 'static,
    {
        let mut tasks = tokio::task::JoinSet::new();
        let mut buf = vec![0u8; DEFAULT_MSG_MAX_SIZE as usize];

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                recv = transport.recv_from(&mut buf) => {
                    let (len, source) = match recv {
                        Ok(pair) => pair,
                        Err(error) => {
                            tracing::warn!(%error, "agent receive error");
                            continue;
                        }
                    };
                    let data = Bytes::copy_from_slice(&buf[..len]);
                    let agent = self.clone();
                    let transport = transport.clone();
                    tasks.spawn(async move {
                        if let Some(reply) = agent.dispatch_datagram(data, source).await
                            && let Err(error) = transport.send_to(&reply, source).await
                        {
                            tracing::warn!(%error, %source, "agent send error");
                        }
                    });
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

impl SecurityModel {
    fn from_version(version: Version) -> Self {
        match version {
            Version::V1 => SecurityModel::V1,
            Version::V2c => SecurityModel::V2c,
            Version::V3 => SecurityModel::Usm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{BoxFuture, OidTable};
    use crate::oid;
    use crate::transport::UdpAgentTransport;

    struct StaticHandler {
        table: OidTable<Value>,
    }

    impl StaticHandler {
        fn new() -> Self {
            let mut table = OidTable::new();
            table.insert(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::OctetString("test agent".into()));
            table.insert(oid!(1, 3, 6, 1, 2, 1, 1, 5, 0), Value::OctetString("host1".into()));
            Self { table }
        }
    }

    impl MibHandler for StaticHandler {
        fn get<'a>(&'a self, _ctx: &'a RequestContext, oid: &'a Oid) -> BoxFuture<'a, GetResult> {
            Box::pin(async move {
                self.table
                    .get(oid)
                    .cloned()
                    .map(GetResult::Value)
                    .unwrap_or(GetResult::NoSuchObject)
            })
        }

        fn get_next<'a>(&'a self, _ctx: &'a RequestContext, oid: &'a Oid) -> BoxFuture<'a, GetNextResult> {
            Box::pin(async move {
                self.table
                    .get_next(oid)
                    .map(|(o, v)| GetNextResult::Value(VarBind::new(o.clone(), v.clone())))
                    .unwrap_or(GetNextResult::EndOfMibView)
            })
        }
    }

    fn test_agent() -> Agent {
        Agent::builder()
            .community(CommunityAccess::Read, "public")
            .handler(oid!(1, 3, 6, 1, 2, 1, 1), StaticHandler::new())
            .build()
            .unwrap()
    }

    fn ctx_for(agent: &Agent, version: Version) -> RequestContext {
        RequestContext {
            source: "127.0.0.1:12345".parse().unwrap(),
            version,
            security_model: SecurityModel::from_version(version),
            security_name: Bytes::from_static(b"public"),
            security_level: SecurityLevel::NoAuthNoPriv,
            context_name: Bytes::new(),
            request_id: 1,
            pdu_type: PduType::GetRequest,
            group_name: None,
            read_view: None,
            write_view: None,
        }
    }

    #[tokio::test]
    async fn test_get_returns_registered_value() {
        let agent = test_agent();
        let ctx = ctx_for(&agent, Version::V2c);
        let pdu = Pdu::new(
            PduType::GetRequest,
            1,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0))],
        );
        let response = agent.handle_get(&ctx, &pdu, DEFAULT_MAX_RESPONSE_SIZE).await;
        assert_eq!(response.error_status, 0);
        assert_eq!(response.varbinds[0].value, Value::OctetString("test agent".into()));
    }

    #[tokio::test]
    async fn test_get_missing_oid_v2c_is_no_such_object() {
        let agent = test_agent();
        let ctx = ctx_for(&agent, Version::V2c);
        let pdu = Pdu::new(
            PduType::GetRequest,
            1,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 9, 0))],
        );
        let response = agent.handle_get(&ctx, &pdu, DEFAULT_MAX_RESPONSE_SIZE).await;
        assert_eq!(response.error_status, 0);
        assert_eq!(response.varbinds[0].value, Value::NoSuchObject);
    }

    #[tokio::test]
    async fn test_get_missing_oid_v1_is_no_such_name() {
        let agent = test_agent();
        let ctx = ctx_for(&agent, Version::V1);
        let pdu = Pdu::new(
            PduType::GetRequest,
            1,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 9, 0))],
        );
        let response = agent.handle_get(&ctx, &pdu, DEFAULT_MAX_RESPONSE_SIZE).await;
        assert_eq!(response.error_status, ErrorStatus::NoSuchName.as_i32());
        assert_eq!(response.error_index, 1);
    }

    #[tokio::test]
    async fn test_get_next_walks_table_in_order() {
        let agent = test_agent();
        let ctx = ctx_for(&agent, Version::V2c);
        let pdu = Pdu::new(
            PduType::GetNextRequest,
            1,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1))],
        );
        let response = agent.handle_get_next(&ctx, &pdu, DEFAULT_MAX_RESPONSE_SIZE).await;
        assert_eq!(response.varbinds[0].oid, oid!(1, 3, 6, 1, 2, 1, 1, 1, 0));
    }

    #[tokio::test]
    async fn test_get_next_end_of_mib_view_v2c() {
        let agent = test_agent();
        let ctx = ctx_for(&agent, Version::V2c);
        let pdu = Pdu::new(
            PduType::GetNextRequest,
            1,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 5, 0))],
        );
        let response = agent.handle_get_next(&ctx, &pdu, DEFAULT_MAX_RESPONSE_SIZE).await;
        assert_eq!(response.varbinds[0].value, Value::EndOfMibView);
    }

    #[tokio::test]
    async fn test_get_bulk_over_v1_is_gen_err() {
        let agent = test_agent();
        let ctx = ctx_for(&agent, Version::V1);
        let pdu = Pdu::get_bulk(1, 0, 2, vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1))]);
        let response = agent.handle_get_bulk(&ctx, &pdu, DEFAULT_MAX_RESPONSE_SIZE).await;
        assert_eq!(response.error_status, ErrorStatus::GenErr.as_i32());
    }

    #[tokio::test]
    async fn test_get_bulk_repeats_until_end_of_mib() {
        let agent = test_agent();
        let ctx = ctx_for(&agent, Version::V2c);
        let pdu = Pdu::get_bulk(1, 0, 5, vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1))]);
        let response = agent.handle_get_bulk(&ctx, &pdu, DEFAULT_MAX_RESPONSE_SIZE).await;
        assert_eq!(response.varbinds.len(), 3);
        assert_eq!(response.varbinds[0].oid, oid!(1, 3, 6, 1, 2, 1, 1, 1, 0));
        assert_eq!(response.varbinds[1].oid, oid!(1, 3, 6, 1, 2, 1, 1, 5, 0));
        assert_eq!(response.varbinds[2].value, Value::EndOfMibView);
    }

    #[tokio::test]
    async fn test_unrecognized_community_is_dropped() {
        let agent = test_agent();
        let pdu = Pdu::new(
            PduType::GetRequest,
            1,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0))],
        );
        let reply = agent
            .handle_community(Version::V2c, Bytes::from_static(b"wrong"), pdu, "127.0.0.1:1".parse().unwrap())
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_write_community_required_for_set() {
        let agent = test_agent();
        let pdu = Pdu::new(
            PduType::SetRequest,
            1,
            vec![VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(1))],
        );
        let reply = agent
            .handle_community(Version::V2c, Bytes::from_static(b"public"), pdu, "127.0.0.1:1".parse().unwrap())
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_serve_answers_get_over_udp() {
        let agent = test_agent();
        let transport = UdpAgentTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = transport.local_addr();
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(async move { agent.serve(transport, shutdown_clone).await });

        let client_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let pdu = Pdu::new(
            PduType::GetRequest,
            42,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0))],
        );
        let message = Message::V2c {
            community: Bytes::from_static(b"public"),
            pdu,
        };
        client_socket.send_to(&message.encode(), addr).await.unwrap();

        let mut buf = [0u8; 1500];
        let (len, _) = client_socket.recv_from(&mut buf).await.unwrap();
        let response = Message::decode(Bytes::copy_from_slice(&buf[..len])).unwrap();
        assert_eq!(
            response.pdu().unwrap().varbinds[0].value,
            Value::OctetString("test agent".into())
        );

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
