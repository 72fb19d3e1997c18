//! SNMP manager client: request/response execution over v1, v2c, and v3.
//!
//! [`Client`] owns a [`Transport`] and a [`ClientConfig`] and drives the
//! get/get-next/get-bulk/set request cycle, including (for v3) engine
//! discovery, key derivation, authentication, and privacy.

mod builder;
mod walk;

pub use builder::{V1ClientBuilder, V2cClientBuilder, V3AuthClientBuilder, V3AuthPrivClientBuilder, V3ClientBuilder};
pub use walk::{BulkWalk, Walk};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{AuthErrorKind, CryptoErrorKind, DecodeErrorKind, EncodeErrorKind, Error, ErrorStatus, Result};
use crate::message::{Message, MsgFlags, ScopedPduBody, SecurityLevel, V3Message};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::transport::Transport;
use crate::v3::{
    AuthProtocol, DEFAULT_MSG_MAX_SIZE, EngineCache, EngineState, MasterKeys, PrivKey, PrivProtocol,
    SaltCounter, UsmSecurityParams, is_decryption_error_report, is_not_in_time_window_report,
    is_unknown_engine_id_report, is_unknown_user_name_report, is_unsupported_sec_level_report,
    is_wrong_digest_report, parse_discovery_response_with_limits,
};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

/// SNMPv3 security settings for one user: credentials and security level.
///
/// Built incrementally — [`V3SecurityConfig::new`] alone means noAuthNoPriv,
/// adding [`.auth()`](Self::auth) means authNoPriv, and additionally adding
/// [`.privacy()`](Self::privacy) means authPriv.
#[derive(Clone)]
pub struct V3SecurityConfig {
    pub(crate) username: Bytes,
    pub(crate) auth: Option<(AuthProtocol, Vec<u8>)>,
    pub(crate) priv_: Option<(PrivProtocol, Vec<u8>)>,
    pub(crate) context_name: Bytes,
}

impl V3SecurityConfig {
    /// Start a noAuthNoPriv configuration for `username`.
    pub fn new(username: impl Into<Bytes>) -> Self {
        Self {
            username: username.into(),
            auth: None,
            priv_: None,
            context_name: Bytes::new(),
        }
    }

    /// Add authentication, promoting this to authNoPriv (or authPriv if
    /// [`.privacy()`](Self::privacy) is also set).
    pub fn auth(mut self, protocol: AuthProtocol, password: impl Into<Vec<u8>>) -> Self {
        self.auth = Some((protocol, password.into()));
        self
    }

    /// Add privacy, promoting this to authPriv.
    pub fn privacy(mut self, protocol: PrivProtocol, password: impl Into<Vec<u8>>) -> Self {
        self.priv_ = Some((protocol, password.into()));
        self
    }

    /// Set `contextName` (default empty, the default context).
    pub fn context_name(mut self, name: impl Into<Bytes>) -> Self {
        self.context_name = name.into();
        self
    }

    pub(crate) fn security_level(&self) -> SecurityLevel {
        match (&self.auth, &self.priv_) {
            (None, _) => SecurityLevel::NoAuthNoPriv,
            (Some(_), None) => SecurityLevel::AuthNoPriv,
            (Some(_), Some(_)) => SecurityLevel::AuthPriv,
        }
    }
}

impl std::fmt::Debug for V3SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V3SecurityConfig")
            .field("username", &self.username)
            .field("auth_protocol", &self.auth.as_ref().map(|(p, _)| *p))
            .field("priv_protocol", &self.priv_.as_ref().map(|(p, _)| *p))
            .field("context_name", &self.context_name)
            .finish()
    }
}

/// Configuration for a [`Client`]: protocol version, credentials, and timing.
#[derive(Clone)]
pub struct ClientConfig {
    pub version: Version,
    /// Community string (v1/v2c only; ignored for v3).
    pub community: Bytes,
    pub timeout: Duration,
    /// Retries attempted on timeout (ignored for stream transports).
    pub retries: u32,
    /// Maximum OIDs bundled into a single GetRequest.
    pub max_oids_per_request: usize,
    /// USM credentials; required when `version` is `V3`.
    pub v3_security: Option<V3SecurityConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: Version::V2c,
            community: Bytes::from_static(b"public"),
            timeout: Duration::from_secs(5),
            retries: 3,
            max_oids_per_request: 10,
            v3_security: None,
        }
    }
}

/// Mutable state shared across clones of a [`Client`]: the request-ID
/// counter, discovered engine cache, and derived USM keys.
struct ClientState {
    request_id: AtomicI32,
    engine_cache: Arc<EngineCache>,
    /// Cached `(engine_id, keys)` pair, re-derived whenever the engine changes.
    keys: Mutex<Option<(Bytes, MasterKeys)>>,
    salt: SaltCounter,
}

impl ClientState {
    fn new(engine_cache: Arc<EngineCache>) -> Self {
        Self {
            request_id: AtomicI32::new(1),
            engine_cache,
            keys: Mutex::new(None),
            salt: SaltCounter::new(),
        }
    }
}

/// An SNMP manager client bound to one transport and one peer.
///
/// Cheap to clone: all shared state lives behind `Arc`, so a clone can be
/// handed to a [`Walk`]/[`BulkWalk`] stream or moved into a spawned task
/// without cloning the underlying socket.
pub struct Client<T: Transport> {
    transport: T,
    config: Arc<ClientConfig>,
    state: Arc<ClientState>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Transport> Client<T> {
    /// Build a client with its own engine cache.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_engine_cache(transport, config, Arc::new(EngineCache::new()))
    }

    /// Build a client sharing `engine_cache` with other clients polling the
    /// same targets.
    pub fn with_engine_cache(transport: T, config: ClientConfig, engine_cache: Arc<EngineCache>) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            state: Arc::new(ClientState::new(engine_cache)),
        }
    }

    fn next_request_id(&self) -> i32 {
        self.transport
            .alloc_request_id()
            .unwrap_or_else(|| self.state.request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Fetch the values at `oids`, chunking the request at
    /// `max_oids_per_request`.
    pub async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let mut results = Vec::with_capacity(oids.len());
        let chunk_size = self.config.max_oids_per_request.max(1);
        for chunk in oids.chunks(chunk_size) {
            let varbinds: Vec<VarBind> = chunk.iter().map(|o| VarBind::null(o.clone())).collect();
            let make_pdu = move |request_id: i32| Pdu::new(PduType::GetRequest, request_id, varbinds.clone());
            let pdu = self.execute(&make_pdu).await?;
            self.check_pdu_error(&pdu)?;
            results.extend(pdu.varbinds);
        }
        Ok(results)
    }

    /// Fetch the lexicographic successor of `oid`.
    pub async fn get_next(&self, oid: &Oid) -> Result<VarBind> {
        let oid = oid.clone();
        let make_pdu = move |request_id: i32| Pdu::new(PduType::GetNextRequest, request_id, vec![VarBind::null(oid.clone())]);
        let pdu = self.execute(&make_pdu).await?;
        self.check_pdu_error(&pdu)?;
        pdu.varbinds
            .into_iter()
            .next()
            .ok_or_else(|| Error::decode(0, DecodeErrorKind::EmptyResponse))
    }

    /// Fetch up to `max_repetitions` successors of each of `oids` in one
    /// round trip (RFC 3416 §4.2.3).
    pub async fn get_bulk(&self, oids: &[Oid], non_repeaters: i32, max_repetitions: i32) -> Result<Vec<VarBind>> {
        let varbinds: Vec<VarBind> = oids.iter().map(|o| VarBind::null(o.clone())).collect();
        let make_pdu =
            move |request_id: i32| Pdu::get_bulk(request_id, non_repeaters, max_repetitions, varbinds.clone());
        let pdu = self.execute(&make_pdu).await?;
        self.check_pdu_error(&pdu)?;
        Ok(pdu.varbinds)
    }

    /// Set the given varbinds, returning the agent's confirmed values.
    pub async fn set(&self, varbinds: Vec<VarBind>) -> Result<Vec<VarBind>> {
        let make_pdu = move |request_id: i32| Pdu::new(PduType::SetRequest, request_id, varbinds.clone());
        let pdu = self.execute(&make_pdu).await?;
        self.check_pdu_error(&pdu)?;
        Ok(pdu.varbinds)
    }

    /// Walk the subtree rooted at `oid` using repeated GETNEXT.
    pub fn walk(&self, oid: Oid) -> Walk<T> {
        Walk::new(self.clone(), oid)
    }

    /// Walk the subtree rooted at `oid` using repeated GETBULK.
    pub fn bulk_walk(&self, oid: Oid, max_repetitions: i32) -> BulkWalk<T> {
        BulkWalk::new(self.clone(), oid, max_repetitions)
    }

    fn check_pdu_error(&self, pdu: &Pdu) -> Result<()> {
        if pdu.error_status == 0 {
            return Ok(());
        }
        let index = pdu.error_index.max(0) as usize;
        let oid = index
            .checked_sub(1)
            .and_then(|i| pdu.varbinds.get(i))
            .map(|vb| vb.oid.clone());
        Err(Error::Snmp {
            target: Some(self.transport.peer_addr()),
            status: ErrorStatus::from_i32(pdu.error_status),
            index: pdu.error_index.max(0) as u32,
            oid,
        })
    }

    async fn execute(&self, make_pdu: &(dyn Fn(i32) -> Pdu + Send + Sync)) -> Result<Pdu> {
        match self.config.version {
            Version::V1 | Version::V2c => self.execute_community(make_pdu).await,
            Version::V3 => self.execute_v3(make_pdu, true).await,
        }
    }

    async fn send_with_retry(&self, data: &[u8], request_id: i32) -> Result<Bytes> {
        let retries = if self.transport.is_stream() { 0 } else { self.config.retries };
        let mut last_err = None;
        for _ in 0..=retries {
            self.transport.send(data).await?;
            match self.transport.recv(request_id, self.config.timeout).await {
                Ok((data, _addr)) => return Ok(data),
                Err(e @ Error::Timeout { .. }) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.expect("at least one attempt is always made"))
    }

    fn validate_response(&self, response: &Message, request_id: i32) -> Result<()> {
        if response.version() != self.config.version {
            return Err(Error::VersionMismatch {
                expected: self.config.version,
                actual: response.version(),
            });
        }
        let actual_id = response
            .pdu()
            .ok_or_else(|| Error::decode(0, DecodeErrorKind::MissingPdu))?
            .request_id;
        if actual_id != request_id {
            return Err(Error::RequestIdMismatch {
                expected: request_id,
                actual: actual_id,
            });
        }
        Ok(())
    }

    async fn execute_community(&self, make_pdu: &(dyn Fn(i32) -> Pdu + Send + Sync)) -> Result<Pdu> {
        let request_id = self.next_request_id();
        let pdu = make_pdu(request_id);
        let message = match self.config.version {
            Version::V1 => Message::V1 {
                community: self.config.community.clone(),
                pdu,
            },
            Version::V2c => Message::V2c {
                community: self.config.community.clone(),
                pdu,
            },
            Version::V3 => unreachable!("execute_community is only called for v1/v2c"),
        };
        let data = message.encode();
        let response_data = self.send_with_retry(&data, request_id).await?;
        let response = Message::decode(response_data)?;
        self.validate_response(&response, request_id)?;
        response
            .pdu()
            .cloned()
            .ok_or_else(|| Error::decode(0, DecodeErrorKind::MissingPdu))
    }

    /// Drive one v3 request/response cycle, discovering the target's engine
    /// and deriving keys on first use. `allow_resync` permits one retry (with
    /// a fresh request ID) when the agent reports the engine as unknown or
    /// the message outside its time window — both recoverable by refreshing
    /// the cached engine state and resending.
    fn execute_v3<'a>(
        &'a self,
        make_pdu: &'a (dyn Fn(i32) -> Pdu + Send + Sync),
        allow_resync: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Pdu>> + Send + 'a>> {
        Box::pin(async move {
            let security = self
                .config
                .v3_security
                .as_ref()
                .ok_or_else(|| Error::encode(EncodeErrorKind::NoSecurityConfig))?;
            let target = self.transport.peer_addr();
            let level = security.security_level();

            if self.state.engine_cache.get(target).is_none() {
                self.discover_engine(security, target).await?;
            }
            let engine = self
                .state
                .engine_cache
                .get(target)
                .ok_or_else(|| Error::encode(EncodeErrorKind::EngineNotDiscovered))?;
            let keys = self.ensure_keys(security, &engine.engine_id)?;

            let request_id = self.next_request_id();
            let pdu = make_pdu(request_id);
            let data = self.encode_v3_request(security, level, &engine, &keys, request_id, pdu)?;

            let response_data = self.send_with_retry(&data, request_id).await?;
            let (v3, pdu) = self.decode_v3_response(security, level, &keys, response_data)?;

            if v3.msg_id != request_id {
                return Err(Error::RequestIdMismatch {
                    expected: request_id,
                    actual: v3.msg_id,
                });
            }
            self.state
                .engine_cache
                .update_time(target, v3.usm.engine_boots, v3.usm.engine_time);

            if pdu.pdu_type == PduType::Report {
                if allow_resync
                    && (is_unknown_engine_id_report(&pdu) || is_not_in_time_window_report(&pdu))
                {
                    let state = parse_discovery_response_with_limits(&v3.usm)?;
                    self.state.engine_cache.insert(target, state);
                    return self.execute_v3(make_pdu, false).await;
                }
                if is_unsupported_sec_level_report(&pdu) {
                    return Err(Error::auth(Some(target), AuthErrorKind::NoCredentials));
                }
                if is_unknown_user_name_report(&pdu) {
                    return Err(Error::auth(Some(target), AuthErrorKind::NoUser));
                }
                if is_wrong_digest_report(&pdu) {
                    return Err(Error::auth(Some(target), AuthErrorKind::HmacMismatch));
                }
                if is_decryption_error_report(&pdu) {
                    return Err(Error::decrypt(Some(target), CryptoErrorKind::CipherError));
                }
                if is_unknown_engine_id_report(&pdu) {
                    return Err(Error::UnknownEngineId { target: Some(target) });
                }
                if is_not_in_time_window_report(&pdu) {
                    return Err(Error::NotInTimeWindow { target: Some(target) });
                }
            }

            Ok(pdu)
        })
    }

    /// Send an unauthenticated discovery GetRequest to learn the target's
    /// `engineID`, `engineBoots`, and `engineTime` (RFC 3414 §4).
    async fn discover_engine(&self, security: &V3SecurityConfig, target: SocketAddr) -> Result<()> {
        let request_id = self.next_request_id();
        let message = V3Message {
            msg_id: request_id,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(SecurityLevel::NoAuthNoPriv, true),
            security_model: 3,
            usm: UsmSecurityParams {
                engine_id: Bytes::new(),
                engine_boots: 0,
                engine_time: 0,
                user_name: security.username.clone(),
                auth_params: Bytes::new(),
                priv_params: Bytes::new(),
            },
            scoped_pdu: ScopedPduBody::Plaintext {
                context_engine_id: Bytes::new(),
                context_name: security.context_name.clone(),
                pdu: Pdu::new(PduType::GetRequest, request_id, vec![]),
            },
        };
        let (data, _) = message.encode_with_auth_range();
        let response_data = self.send_with_retry(&data, request_id).await?;
        let (response, _) = Message::decode_with_auth_range(response_data)?;
        let Message::V3(v3) = response else {
            return Err(Error::VersionMismatch {
                expected: Version::V3,
                actual: response.version(),
            });
        };
        let state = parse_discovery_response_with_limits(&v3.usm)?;
        self.state.engine_cache.insert(target, state);
        Ok(())
    }

    /// Return this target's cached USM keys, (re-)deriving them if the
    /// cached engine ID doesn't match (first use, or post-resync).
    fn ensure_keys(&self, security: &V3SecurityConfig, engine_id: &Bytes) -> Result<MasterKeys> {
        let mut cached = self.state.keys.lock().unwrap();
        if let Some((cached_engine, keys)) = cached.as_ref() {
            if cached_engine == engine_id {
                return Ok(keys.clone());
            }
        }
        let Some((auth_protocol, auth_password)) = security.auth.as_ref() else {
            return Ok(MasterKeys::default());
        };
        let priv_protocol = security.priv_.as_ref().map(|(p, _)| *p);
        let empty = Vec::new();
        let priv_password = security.priv_.as_ref().map(|(_, pw)| pw).unwrap_or(&empty);
        let keys = crate::v3::auth::derive_keys(engine_id, *auth_protocol, auth_password, priv_protocol, priv_password);
        *cached = Some((engine_id.clone(), keys.clone()));
        Ok(keys)
    }

    fn encode_v3_request(
        &self,
        security: &V3SecurityConfig,
        level: SecurityLevel,
        engine: &EngineState,
        keys: &MasterKeys,
        request_id: i32,
        pdu: Pdu,
    ) -> Result<Bytes> {
        let engine_time = engine.current_time();
        let scoped_plain = ScopedPduBody::Plaintext {
            context_engine_id: engine.engine_id.clone(),
            context_name: security.context_name.clone(),
            pdu,
        };

        let (scoped_pdu, priv_params) = if level.priv_flag() {
            let priv_key = keys
                .priv_key
                .as_ref()
                .ok_or_else(|| Error::encode(EncodeErrorKind::NoPrivKey))?;
            let priv_protocol = security
                .priv_
                .as_ref()
                .map(|(p, _)| *p)
                .ok_or_else(|| Error::encode(EncodeErrorKind::NoPrivKey))?;
            let cipher = PrivKey::new(priv_protocol, priv_key.clone());
            let salt = self.state.salt.next();
            let plaintext = scoped_plain.encode_to_bytes();
            let (params, ciphertext) = cipher
                .encrypt(engine.boots, engine_time, salt, &plaintext)
                .map_err(|e| Error::encrypt(Some(self.transport.peer_addr()), e.kind()))?;
            (ScopedPduBody::Encrypted(ciphertext), params)
        } else {
            (scoped_plain, Bytes::new())
        };

        let auth_params = if level.auth_flag() {
            let protocol = security
                .auth
                .as_ref()
                .map(|(p, _)| *p)
                .ok_or_else(|| Error::encode(EncodeErrorKind::MissingAuthKey))?;
            Bytes::from(vec![0u8; protocol.mac_len()])
        } else {
            Bytes::new()
        };

        let usm = UsmSecurityParams {
            engine_id: engine.engine_id.clone(),
            engine_boots: engine.boots,
            engine_time,
            user_name: security.username.clone(),
            auth_params,
            priv_params,
        };

        let message = V3Message {
            msg_id: request_id,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(level, true),
            security_model: 3,
            usm,
            scoped_pdu,
        };

        let (bytes, auth_range) = message.encode_with_auth_range();
        if level.auth_flag() {
            let auth_key = keys
                .auth_key
                .as_ref()
                .ok_or_else(|| Error::encode(EncodeErrorKind::MissingAuthKey))?;
            let protocol = security.auth.as_ref().map(|(p, _)| *p).unwrap();
            let mac = crate::v3::auth::compute_mac(protocol, auth_key.as_bytes(), &bytes)?;
            let mut patched = BytesMut::from(&bytes[..]);
            patched[auth_range].copy_from_slice(&mac);
            Ok(patched.freeze())
        } else {
            Ok(bytes)
        }
    }

    fn decode_v3_response(
        &self,
        security: &V3SecurityConfig,
        level: SecurityLevel,
        keys: &MasterKeys,
        data: Bytes,
    ) -> Result<(V3Message, Pdu)> {
        let (message, auth_range) = Message::decode_with_auth_range(data.clone())?;
        let Message::V3(v3) = message else {
            return Err(Error::VersionMismatch {
                expected: Version::V3,
                actual: message.version(),
            });
        };

        if level.auth_flag() {
            let auth_key = keys
                .auth_key
                .as_ref()
                .ok_or_else(|| Error::encode(EncodeErrorKind::MissingAuthKey))?;
            let protocol = security.auth.as_ref().map(|(p, _)| *p).unwrap();
            let range = auth_range.ok_or_else(|| {
                Error::auth(Some(self.transport.peer_addr()), AuthErrorKind::AuthParamsNotFound)
            })?;
            let received_mac = data[range.clone()].to_vec();
            let mut zeroed = BytesMut::from(&data[..]);
            zeroed[range].fill(0);
            crate::v3::auth::verify_mac(protocol, auth_key.as_bytes(), &zeroed, &received_mac)?;
        }

        let pdu = match &v3.scoped_pdu {
            ScopedPduBody::Encrypted(ciphertext) => {
                let priv_key = keys.priv_key.as_ref().ok_or_else(|| {
                    Error::decrypt(Some(self.transport.peer_addr()), CryptoErrorKind::NoPrivKey)
                })?;
                let priv_protocol = security.priv_.as_ref().map(|(p, _)| *p).ok_or_else(|| {
                    Error::decrypt(Some(self.transport.peer_addr()), CryptoErrorKind::NoPrivKey)
                })?;
                let cipher = PrivKey::new(priv_protocol, priv_key.clone());
                let plaintext = cipher
                    .decrypt(v3.usm.engine_boots, v3.usm.engine_time, &v3.usm.priv_params, ciphertext)
                    .map_err(|e| Error::decrypt(Some(self.transport.peer_addr()), e.kind()))?;
                let (_, _, pdu) = ScopedPduBody::decode_plaintext(plaintext)?;
                pdu
            }
            ScopedPduBody::Plaintext { pdu, .. } => pdu.clone(),
        };

        Ok((v3, pdu))
    }
}
