//! USM engine discovery, time synchronization, and authoritative Report
//! detection (RFC 3414 §4, RFC 3412 §7.1.5 / §7.2.14).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{LazyLock, RwLock};
use std::time::Instant;

use bytes::Bytes;

use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid;
use crate::oid::Oid;
use crate::pdu::Pdu;

use super::UsmSecurityParams;

/// Default `msgMaxSize` advertised by this implementation: the maximum UDP
/// payload a v4 datagram can carry without fragmentation concerns.
pub const DEFAULT_MSG_MAX_SIZE: i32 = 65507;

/// RFC 3412 §6 requires `msgMaxSize` be at least this large.
pub const MIN_MSG_MAX_SIZE: i32 = 484;

/// Acceptable skew, in seconds, between a peer's advertised `engineTime` and
/// this implementation's view of that engine's time (RFC 3414 §2.3).
pub const TIME_WINDOW: i32 = 150;

/// Engine time wraps (via an engineBoots increment) at this value, per
/// RFC 3414 §2.3.
pub const MAX_ENGINE_TIME: i32 = i32::MAX;

/// Maximum permitted `engineID` length (RFC 3411 §5).
const MAX_ENGINE_ID_LEN: usize = 32;

// pub(crate): the agent side needs these same OIDs to build the Report PDUs
// it sends back to managers, not just to classify ones it receives.
pub(crate) static USM_STATS_UNSUPPORTED_SEC_LEVELS: LazyLock<Oid> =
    LazyLock::new(|| oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 1, 0));
pub(crate) static USM_STATS_NOT_IN_TIME_WINDOWS: LazyLock<Oid> =
    LazyLock::new(|| oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0));
pub(crate) static USM_STATS_UNKNOWN_USER_NAMES: LazyLock<Oid> =
    LazyLock::new(|| oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 3, 0));
pub(crate) static USM_STATS_UNKNOWN_ENGINE_IDS: LazyLock<Oid> =
    LazyLock::new(|| oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0));
pub(crate) static USM_STATS_WRONG_DIGESTS: LazyLock<Oid> =
    LazyLock::new(|| oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0));
pub(crate) static USM_STATS_DECRYPTION_ERRORS: LazyLock<Oid> =
    LazyLock::new(|| oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 6, 0));

fn report_oid_matches(pdu: &Pdu, oid: &Oid) -> bool {
    pdu.varbinds.first().is_some_and(|vb| &vb.oid == oid)
}

/// Whether `pdu` is a Report carrying `usmStatsUnsupportedSecLevels`.
pub fn is_unsupported_sec_level_report(pdu: &Pdu) -> bool {
    report_oid_matches(pdu, &USM_STATS_UNSUPPORTED_SEC_LEVELS)
}

/// Whether `pdu` is a Report carrying `usmStatsNotInTimeWindows`.
pub fn is_not_in_time_window_report(pdu: &Pdu) -> bool {
    report_oid_matches(pdu, &USM_STATS_NOT_IN_TIME_WINDOWS)
}

/// Whether `pdu` is a Report carrying `usmStatsUnknownUserNames`.
pub fn is_unknown_user_name_report(pdu: &Pdu) -> bool {
    report_oid_matches(pdu, &USM_STATS_UNKNOWN_USER_NAMES)
}

/// Whether `pdu` is a Report carrying `usmStatsUnknownEngineIDs`.
pub fn is_unknown_engine_id_report(pdu: &Pdu) -> bool {
    report_oid_matches(pdu, &USM_STATS_UNKNOWN_ENGINE_IDS)
}

/// Whether `pdu` is a Report carrying `usmStatsWrongDigests`.
pub fn is_wrong_digest_report(pdu: &Pdu) -> bool {
    report_oid_matches(pdu, &USM_STATS_WRONG_DIGESTS)
}

/// Whether `pdu` is a Report carrying `usmStatsDecryptionErrors`.
pub fn is_decryption_error_report(pdu: &Pdu) -> bool {
    report_oid_matches(pdu, &USM_STATS_DECRYPTION_ERRORS)
}

/// What this implementation knows about a peer's authoritative engine:
/// its identity, and the most recently observed boots/time pair, plus when
/// that pair was observed so `current_time` can extrapolate.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub engine_id: Bytes,
    pub boots: i32,
    pub time: i32,
    captured_at: Instant,
}

impl EngineState {
    pub fn new(engine_id: Bytes, boots: i32, time: i32) -> Self {
        Self {
            engine_id,
            boots,
            time,
            captured_at: Instant::now(),
        }
    }

    /// This engine's estimated current `engineTime`, extrapolated from the
    /// wall-clock elapsed since the pair was last observed.
    pub fn current_time(&self) -> i32 {
        let elapsed = self.captured_at.elapsed().as_secs() as i64;
        i64::from(self.time)
            .saturating_add(elapsed)
            .min(i64::from(MAX_ENGINE_TIME)) as i32
    }

    /// Replace the cached boots/time pair, resetting the extrapolation clock.
    pub fn update(&mut self, boots: i32, time: i32) {
        self.boots = boots;
        self.time = time;
        self.captured_at = Instant::now();
    }

    /// Whether `(boots, time)` falls within `window` seconds of this state,
    /// per the timeliness check in RFC 3414 §3.2 step 7b.
    pub fn is_within_window(&self, boots: i32, time: i32, window: i32) -> bool {
        boots == self.boots && (time - self.time).abs() <= window
    }
}

/// A cache of discovered engine state, keyed by peer address, shared across
/// clients that poll the same set of targets.
#[derive(Default)]
pub struct EngineCache {
    entries: RwLock<HashMap<SocketAddr, EngineState>>,
}

impl EngineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: SocketAddr) -> Option<EngineState> {
        self.entries.read().unwrap().get(&target).cloned()
    }

    pub fn insert(&self, target: SocketAddr, state: EngineState) {
        self.entries.write().unwrap().insert(target, state);
    }

    pub fn remove(&self, target: SocketAddr) {
        self.entries.write().unwrap().remove(&target);
    }

    /// Update the cached boots/time pair for `target` in place, if present.
    pub fn update_time(&self, target: SocketAddr, boots: i32, time: i32) {
        if let Some(state) = self.entries.write().unwrap().get_mut(&target) {
            state.update(boots, time);
        }
    }
}

/// Extract engine identity and timing from a discovery Report's security
/// parameters, with no bound on `engineID` length.
pub fn parse_discovery_response(usm: &UsmSecurityParams) -> EngineState {
    EngineState::new(usm.engine_id.clone(), usm.engine_boots, usm.engine_time)
}

/// Like [`parse_discovery_response`], but rejects an oversized `engineID`
/// rather than trusting an unauthenticated peer's claim.
pub fn parse_discovery_response_with_limits(usm: &UsmSecurityParams) -> Result<EngineState> {
    if usm.engine_id.len() > MAX_ENGINE_ID_LEN {
        return Err(Error::decode(
            0,
            DecodeErrorKind::LengthExceedsMax {
                length: usm.engine_id.len(),
                max: MAX_ENGINE_ID_LEN,
            },
        ));
    }
    Ok(parse_discovery_response(usm))
}
