//! SNMP message framing: the outer envelope around a PDU.
//!
//! v1/v2c frame a PDU with a version number and a community string
//! (RFC 1157 §3.2.1, RFC 1901 §3). v3 frames it with `msgGlobalData`,
//! `msgSecurityParameters`, and a `scopedPDU` that is either carried in the
//! clear or replaced wholesale by an OCTET STRING of ciphertext
//! (RFC 3412 §6).

use std::ops::Range;

use bytes::Bytes;

use crate::ber::tag;
use crate::ber::{Decoder, EncodeBuf};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::pdu::Pdu;
use crate::v3::UsmSecurityParams;
use crate::v3::MIN_MSG_MAX_SIZE;
use crate::version::Version;

/// SNMPv3 security level (RFC 3414 §1.4).
///
/// Variants are declared least to most strict so a request's level can be
/// compared against a VACM entry's minimum with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityLevel {
    /// No authentication, no privacy.
    NoAuthNoPriv,
    /// Authenticated, not encrypted.
    AuthNoPriv,
    /// Authenticated and encrypted.
    AuthPriv,
}

impl SecurityLevel {
    pub(crate) fn auth_flag(self) -> bool {
        !matches!(self, Self::NoAuthNoPriv)
    }

    pub(crate) fn priv_flag(self) -> bool {
        matches!(self, Self::AuthPriv)
    }

    fn from_flag_bits(auth: bool, privacy: bool) -> Result<Self> {
        match (auth, privacy) {
            (false, false) => Ok(Self::NoAuthNoPriv),
            (true, false) => Ok(Self::AuthNoPriv),
            (true, true) => Ok(Self::AuthPriv),
            (false, true) => Err(Error::decode(0, DecodeErrorKind::InvalidMsgFlags)),
        }
    }
}

/// The `msgFlags` octet: security level plus the `reportable` bit
/// (RFC 3412 §6.3) that tells the authoritative engine whether a Report PDU
/// is wanted in reply to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgFlags {
    pub level: SecurityLevel,
    pub reportable: bool,
}

impl MsgFlags {
    pub fn new(level: SecurityLevel, reportable: bool) -> Self {
        Self { level, reportable }
    }

    fn to_byte(self) -> u8 {
        let mut byte = 0u8;
        if self.level.auth_flag() {
            byte |= 0x01;
        }
        if self.level.priv_flag() {
            byte |= 0x02;
        }
        if self.reportable {
            byte |= 0x04;
        }
        byte
    }

    fn from_byte(byte: u8) -> Result<Self> {
        let level = SecurityLevel::from_flag_bits(byte & 0x01 != 0, byte & 0x02 != 0)?;
        Ok(Self {
            level,
            reportable: byte & 0x04 != 0,
        })
    }
}

/// The v3 `scopedPDU`, either carried in the clear or replaced wholesale by
/// privacy-encrypted ciphertext (RFC 3414 §1.4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum ScopedPduBody {
    Plaintext {
        context_engine_id: Bytes,
        context_name: Bytes,
        pdu: Pdu,
    },
    Encrypted(Bytes),
}

impl ScopedPduBody {
    pub fn pdu(&self) -> Option<&Pdu> {
        match self {
            Self::Plaintext { pdu, .. } => Some(pdu),
            Self::Encrypted(_) => None,
        }
    }

    fn encode(&self, buf: &mut EncodeBuf) {
        match self {
            Self::Plaintext {
                context_engine_id,
                context_name,
                pdu,
            } => {
                buf.push_sequence(|buf| {
                    pdu.encode(buf);
                    buf.push_octet_string(context_name);
                    buf.push_octet_string(context_engine_id);
                });
            }
            Self::Encrypted(ciphertext) => {
                buf.push_octet_string(ciphertext);
            }
        }
    }

    /// Encode a standalone scopedPDU SEQUENCE, for encrypting a `Plaintext`
    /// variant as a privacy cipher's input (RFC 3414 §1.4.3).
    pub(crate) fn encode_to_bytes(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        self.encode(&mut buf);
        buf.finish()
    }

    /// Decode a scopedPDU SEQUENCE previously produced by
    /// [`encode_to_bytes`](Self::encode_to_bytes), e.g. after privacy
    /// decryption.
    pub(crate) fn decode_plaintext(data: Bytes) -> Result<(Bytes, Bytes, Pdu)> {
        let mut decoder = Decoder::new(data);
        let mut scoped = decoder.read_sequence()?;
        let context_engine_id = scoped.read_octet_string()?;
        let context_name = scoped.read_octet_string()?;
        let pdu = Pdu::decode(&mut scoped)?;
        Ok((context_engine_id, context_name, pdu))
    }
}

/// An SNMPv3 message, minus the outer `msgVersion` (tracked by the enclosing
/// [`Message::V3`] variant).
#[derive(Debug, Clone, PartialEq)]
pub struct V3Message {
    pub msg_id: i32,
    pub msg_max_size: i32,
    pub flags: MsgFlags,
    /// `msgSecurityModel`; `3` (USM) for every message this implementation
    /// produces or accepts.
    pub security_model: i32,
    pub usm: UsmSecurityParams,
    pub scoped_pdu: ScopedPduBody,
}

impl V3Message {
    fn encode_global_data(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            buf.push_integer(self.security_model);
            buf.push_octet_string(&[self.flags.to_byte()]);
            buf.push_integer(self.msg_max_size);
            buf.push_integer(self.msg_id);
        });
    }

    /// Encode this message, additionally reporting the byte range
    /// `msgAuthenticationParameters`' content occupies in the returned
    /// buffer.
    ///
    /// RFC 3414 §6.3.1 computes the HMAC over the whole message with that
    /// field set to `self.usm.auth_params.len()` zero octets, then the real
    /// MAC is patched into the reported range afterward. The USM SEQUENCE is
    /// inlined here (rather than reusing [`UsmSecurityParams::encode`]) so
    /// the marker positions are captured in the same reverse buffer as the
    /// final length, instead of a throwaway one.
    pub(crate) fn encode_with_auth_range(&self) -> (Bytes, Range<usize>) {
        let mut buf = EncodeBuf::new();
        let mut before_content = 0usize;
        let mut after_content = 0usize;

        buf.push_sequence(|buf| {
            self.scoped_pdu.encode(buf);
            buf.push_constructed(tag::universal::OCTET_STRING, |buf| {
                buf.push_sequence(|buf| {
                    buf.push_octet_string(&self.usm.priv_params);

                    before_content = buf.len();
                    buf.push_bytes(&self.usm.auth_params);
                    after_content = buf.len();
                    buf.push_length(self.usm.auth_params.len());
                    buf.push_tag(tag::universal::OCTET_STRING);

                    buf.push_octet_string(&self.usm.user_name);
                    buf.push_integer(self.usm.engine_time);
                    buf.push_integer(self.usm.engine_boots);
                    buf.push_octet_string(&self.usm.engine_id);
                });
            });
            self.encode_global_data(buf);
            buf.push_integer(Version::V3.as_i32());
        });

        let total = buf.len();
        let bytes = buf.finish();
        (bytes, (total - after_content)..(total - before_content))
    }
}

/// A decoded or to-be-encoded SNMP message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    V1 { community: Bytes, pdu: Pdu },
    V2c { community: Bytes, pdu: Pdu },
    V3(V3Message),
}

impl Message {
    /// The protocol version this message was framed with.
    pub fn version(&self) -> Version {
        match self {
            Self::V1 { .. } => Version::V1,
            Self::V2c { .. } => Version::V2c,
            Self::V3(_) => Version::V3,
        }
    }

    /// The enclosed PDU, if it is available in the clear.
    ///
    /// Returns `None` for a v3 message whose `scopedPDU` is still encrypted.
    pub fn pdu(&self) -> Option<&Pdu> {
        match self {
            Self::V1 { pdu, .. } | Self::V2c { pdu, .. } => Some(pdu),
            Self::V3(m) => m.scoped_pdu.pdu(),
        }
    }

    /// The community string, for v1/v2c messages.
    pub fn community(&self) -> Option<&Bytes> {
        match self {
            Self::V1 { community, .. } | Self::V2c { community, .. } => Some(community),
            Self::V3(_) => None,
        }
    }

    /// Encode this message to its BER wire representation.
    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        self.encode_into(&mut buf);
        buf.finish()
    }

    fn encode_into(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| match self {
            Self::V1 { community, pdu } => {
                pdu.encode(buf);
                buf.push_octet_string(community);
                buf.push_integer(Version::V1.as_i32());
            }
            Self::V2c { community, pdu } => {
                pdu.encode(buf);
                buf.push_octet_string(community);
                buf.push_integer(Version::V2c.as_i32());
            }
            Self::V3(m) => {
                m.scoped_pdu.encode(buf);
                buf.push_octet_string(&m.usm.encode_to_bytes());
                m.encode_global_data(buf);
                buf.push_integer(Version::V3.as_i32());
            }
        });
    }

    /// Decode a message from its BER wire representation.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        Ok(Self::decode_from(&mut decoder)?.0)
    }

    /// Decode a message, additionally reporting the absolute byte range
    /// `msgAuthenticationParameters`' content occupies in `data` for a v3
    /// message (`None` for v1/v2c, which have no USM security parameters).
    ///
    /// Used to zero that exact range in the original bytes before
    /// re-verifying the HMAC, rather than re-encoding the message and risking
    /// a mismatch against a peer's non-canonical BER.
    pub(crate) fn decode_with_auth_range(data: Bytes) -> Result<(Self, Option<Range<usize>>)> {
        let mut decoder = Decoder::new(data);
        Self::decode_from(&mut decoder)
    }

    fn decode_from(decoder: &mut Decoder) -> Result<(Self, Option<Range<usize>>)> {
        let offset = decoder.offset();
        let mut seq = decoder.read_sequence()?;
        let version_raw = seq.read_integer()?;
        let version = Version::from_i32(version_raw)
            .ok_or_else(|| Error::decode(offset, DecodeErrorKind::UnknownVersion(version_raw)))?;

        match version {
            Version::V1 | Version::V2c => {
                let community = seq.read_octet_string()?;
                let pdu = Pdu::decode(&mut seq)?;
                let message = if version == Version::V1 {
                    Message::V1 { community, pdu }
                } else {
                    Message::V2c { community, pdu }
                };
                Ok((message, None))
            }
            Version::V3 => {
                let (message, auth_range) = Self::decode_v3(&mut seq)?;
                Ok((message, Some(auth_range)))
            }
        }
    }

    fn decode_v3(seq: &mut Decoder) -> Result<(Self, Range<usize>)> {
        let global_offset = seq.offset();
        let mut global = seq.read_sequence()?;
        let msg_id = global.read_integer()?;
        let msg_max_size = global.read_integer()?;
        if msg_max_size < MIN_MSG_MAX_SIZE {
            return Err(Error::decode(
                global_offset,
                DecodeErrorKind::MsgMaxSizeTooSmall {
                    value: msg_max_size,
                    minimum: MIN_MSG_MAX_SIZE,
                },
            ));
        }
        let flags_offset = global.offset();
        let flags_bytes = global.read_octet_string()?;
        let flags_byte = *flags_bytes
            .first()
            .ok_or_else(|| Error::decode(flags_offset, DecodeErrorKind::InvalidMsgFlags))?;
        let flags = MsgFlags::from_byte(flags_byte)?;
        let security_model_offset = global.offset();
        let security_model = global.read_integer()?;
        if security_model != 3 {
            return Err(Error::decode(
                security_model_offset,
                DecodeErrorKind::UnknownSecurityModel(security_model),
            ));
        }

        let (sec_params_bytes, sec_params_offset) = seq.read_octet_string_with_offset()?;
        let mut sec_decoder = Decoder::with_offset(sec_params_bytes, sec_params_offset);
        let (usm, auth_range) = UsmSecurityParams::decode_with_auth_range(&mut sec_decoder)?;

        let msg_data_offset = seq.offset();
        let is_ciphertext = seq.peek_tag()? == tag::universal::OCTET_STRING;
        let scoped_pdu = if is_ciphertext {
            if !flags.level.priv_flag() {
                return Err(Error::decode(
                    msg_data_offset,
                    DecodeErrorKind::UnexpectedEncryption,
                ));
            }
            ScopedPduBody::Encrypted(seq.read_octet_string()?)
        } else {
            if flags.level.priv_flag() {
                return Err(Error::decode(
                    msg_data_offset,
                    DecodeErrorKind::ExpectedEncryption,
                ));
            }
            let mut scoped = seq.read_sequence()?;
            let context_engine_id = scoped.read_octet_string()?;
            let context_name = scoped.read_octet_string()?;
            let pdu = Pdu::decode(&mut scoped)?;
            ScopedPduBody::Plaintext {
                context_engine_id,
                context_name,
                pdu,
            }
        };

        Ok((
            Message::V3(V3Message {
                msg_id,
                msg_max_size,
                flags,
                security_model,
                usm,
                scoped_pdu,
            }),
            auth_range,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::pdu::PduType;
    use crate::v3::DEFAULT_MSG_MAX_SIZE;
    use crate::value::Value;
    use crate::varbind::VarBind;

    fn sample_pdu() -> Pdu {
        Pdu::new(
            PduType::GetRequest,
            7,
            vec![VarBind::null(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0))],
        )
    }

    #[test]
    fn test_v1_roundtrip() {
        let msg = Message::V1 {
            community: Bytes::from_static(b"public"),
            pdu: sample_pdu(),
        };
        let bytes = msg.encode();
        let decoded = Message::decode(bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.version(), Version::V1);
    }

    #[test]
    fn test_v2c_roundtrip() {
        let msg = Message::V2c {
            community: Bytes::from_static(b"public"),
            pdu: sample_pdu(),
        };
        let bytes = msg.encode();
        let decoded = Message::decode(bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.community(), Some(&Bytes::from_static(b"public")));
    }

    #[test]
    fn test_v3_plaintext_roundtrip() {
        let msg = Message::V3(V3Message {
            msg_id: 1,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(SecurityLevel::AuthNoPriv, true),
            security_model: 3,
            usm: UsmSecurityParams {
                engine_id: Bytes::from_static(&[0x80, 0x00, 0x1F, 0x88, 0x04]),
                engine_boots: 1,
                engine_time: 100,
                user_name: Bytes::from_static(b"admin"),
                auth_params: Bytes::from_static(&[0u8; 12]),
                priv_params: Bytes::new(),
            },
            scoped_pdu: ScopedPduBody::Plaintext {
                context_engine_id: Bytes::from_static(&[0x80, 0x00, 0x1F, 0x88, 0x04]),
                context_name: Bytes::new(),
                pdu: sample_pdu(),
            },
        });
        let bytes = msg.encode();
        let decoded = Message::decode(bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.pdu(), Some(&sample_pdu()));
    }

    #[test]
    fn test_v3_encrypted_roundtrip() {
        let msg = Message::V3(V3Message {
            msg_id: 2,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(SecurityLevel::AuthPriv, true),
            security_model: 3,
            usm: UsmSecurityParams {
                engine_id: Bytes::from_static(&[0x80, 0x00, 0x1F, 0x88, 0x04]),
                engine_boots: 1,
                engine_time: 100,
                user_name: Bytes::from_static(b"admin"),
                auth_params: Bytes::from_static(&[0u8; 12]),
                priv_params: Bytes::from_static(&[0u8; 8]),
            },
            scoped_pdu: ScopedPduBody::Encrypted(Bytes::from_static(b"opaque-ciphertext")),
        });
        let bytes = msg.encode();
        let decoded = Message::decode(bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.pdu(), None);
    }

    #[test]
    fn test_decode_rejects_msg_max_size_too_small() {
        let msg = Message::V3(V3Message {
            msg_id: 1,
            msg_max_size: 10,
            flags: MsgFlags::new(SecurityLevel::NoAuthNoPriv, false),
            security_model: 3,
            usm: UsmSecurityParams::default(),
            scoped_pdu: ScopedPduBody::Plaintext {
                context_engine_id: Bytes::new(),
                context_name: Bytes::new(),
                pdu: sample_pdu(),
            },
        });
        let bytes = msg.encode();
        let err = Message::decode(bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::MsgMaxSizeTooSmall { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_priv_without_auth() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_sequence(|buf| {
                buf.push_octet_string(&UsmSecurityParams::default().encode_to_bytes());
            });
            buf.push_sequence(|buf| {
                buf.push_integer(3);
                buf.push_octet_string(&[0x02]); // priv bit set, auth bit clear
                buf.push_integer(DEFAULT_MSG_MAX_SIZE);
                buf.push_integer(1);
            });
            buf.push_integer(Version::V3.as_i32());
        });
        let err = Message::decode(buf.finish()).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::InvalidMsgFlags,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_unexpected_encryption() {
        let msg = Message::V3(V3Message {
            msg_id: 1,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(SecurityLevel::AuthNoPriv, false),
            security_model: 3,
            usm: UsmSecurityParams::default(),
            scoped_pdu: ScopedPduBody::Encrypted(Bytes::from_static(b"sneaky")),
        });
        let bytes = msg.encode();
        let err = Message::decode(bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::UnexpectedEncryption,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_rejects_expected_encryption() {
        let msg = Message::V3(V3Message {
            msg_id: 1,
            msg_max_size: DEFAULT_MSG_MAX_SIZE,
            flags: MsgFlags::new(SecurityLevel::AuthPriv, false),
            security_model: 3,
            usm: UsmSecurityParams::default(),
            scoped_pdu: ScopedPduBody::Plaintext {
                context_engine_id: Bytes::new(),
                context_name: Bytes::new(),
                pdu: sample_pdu(),
            },
        });
        let bytes = msg.encode();
        let err = Message::decode(bytes).unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::ExpectedEncryption,
                ..
            }
        ));
    }

    #[test]
    fn test_msg_flags_byte_roundtrip() {
        for level in [
            SecurityLevel::NoAuthNoPriv,
            SecurityLevel::AuthNoPriv,
            SecurityLevel::AuthPriv,
        ] {
            for reportable in [false, true] {
                let flags = MsgFlags::new(level, reportable);
                let decoded = MsgFlags::from_byte(flags.to_byte()).unwrap();
                assert_eq!(decoded, flags);
            }
        }
    }

    #[test]
    fn test_security_level_ordering() {
        assert!(SecurityLevel::NoAuthNoPriv < SecurityLevel::AuthNoPriv);
        assert!(SecurityLevel::AuthNoPriv < SecurityLevel::AuthPriv);
    }

    #[test]
    fn test_scoped_pdu_plaintext_roundtrip_standalone() {
        let body = ScopedPduBody::Plaintext {
            context_engine_id: Bytes::from_static(&[0x80, 0x00, 0x1F, 0x88, 0x04]),
            context_name: Bytes::from_static(b"ctx"),
            pdu: sample_pdu(),
        };
        let bytes = body.encode_to_bytes();
        let (engine_id, context_name, pdu) = ScopedPduBody::decode_plaintext(bytes).unwrap();
        assert_eq!(engine_id, Bytes::from_static(&[0x80, 0x00, 0x1F, 0x88, 0x04]));
        assert_eq!(context_name, Bytes::from_static(b"ctx"));
        assert_eq!(pdu, sample_pdu());
    }
}
