//! USM security parameters encoding (RFC 3414 §2.4).

use std::ops::Range;

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf};
use crate::error::Result;

/// The `UsmSecurityParameters` SEQUENCE.
///
/// This is itself BER-encoded and carried as the content of the message's
/// `msgSecurityParameters` OCTET STRING, rather than inline in the message
/// SEQUENCE — USM is one of several possible security models, so the outer
/// message framing treats these bytes as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsmSecurityParams {
    pub engine_id: Bytes,
    pub engine_boots: i32,
    pub engine_time: i32,
    pub user_name: Bytes,
    pub auth_params: Bytes,
    pub priv_params: Bytes,
}

impl UsmSecurityParams {
    /// Encode the SEQUENCE content (without the enclosing OCTET STRING wrapper
    /// that `msgSecurityParameters` adds).
    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            buf.push_octet_string(&self.priv_params);
            buf.push_octet_string(&self.auth_params);
            buf.push_octet_string(&self.user_name);
            buf.push_integer(self.engine_time);
            buf.push_integer(self.engine_boots);
            buf.push_octet_string(&self.engine_id);
        });
    }

    /// Encode to a standalone byte string, for embedding as the content of
    /// the outer message's `msgSecurityParameters` OCTET STRING.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        self.encode(&mut buf);
        buf.finish()
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;
        let engine_id = seq.read_octet_string()?;
        let engine_boots = seq.read_integer()?;
        let engine_time = seq.read_integer()?;
        let user_name = seq.read_octet_string()?;
        let auth_params = seq.read_octet_string()?;
        let priv_params = seq.read_octet_string()?;
        Ok(Self {
            engine_id,
            engine_boots,
            engine_time,
            user_name,
            auth_params,
            priv_params,
        })
    }

    /// Decode from the content of a `msgSecurityParameters` OCTET STRING.
    pub fn decode_from_bytes(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        Self::decode(&mut decoder)
    }

    /// Decode, additionally reporting the absolute byte range of
    /// `msgAuthenticationParameters`' content within `decoder`'s original
    /// buffer.
    ///
    /// `decoder` must have been constructed so its offsets are absolute
    /// within the full received datagram (see [`Decoder::with_offset`]),
    /// otherwise the returned range is meaningless.
    pub(crate) fn decode_with_auth_range(decoder: &mut Decoder) -> Result<(Self, Range<usize>)> {
        let mut seq = decoder.read_sequence()?;
        let engine_id = seq.read_octet_string()?;
        let engine_boots = seq.read_integer()?;
        let engine_time = seq.read_integer()?;
        let user_name = seq.read_octet_string()?;
        let (auth_params, auth_offset) = seq.read_octet_string_with_offset()?;
        let auth_range = auth_offset..auth_offset + auth_params.len();
        let priv_params = seq.read_octet_string()?;
        Ok((
            Self {
                engine_id,
                engine_boots,
                engine_time,
                user_name,
                auth_params,
                priv_params,
            },
            auth_range,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usm_params_roundtrip() {
        let params = UsmSecurityParams {
            engine_id: Bytes::from_static(&[0x80, 0x00, 0x1F, 0x88, 0x04]),
            engine_boots: 3,
            engine_time: 123456,
            user_name: Bytes::from_static(b"admin"),
            auth_params: Bytes::from_static(&[0u8; 12]),
            priv_params: Bytes::from_static(&[0u8; 8]),
        };
        let bytes = params.encode_to_bytes();
        let decoded = UsmSecurityParams::decode_from_bytes(bytes).unwrap();
        assert_eq!(params, decoded);
    }

    #[test]
    fn test_usm_params_empty_fields() {
        let params = UsmSecurityParams::default();
        let bytes = params.encode_to_bytes();
        let decoded = UsmSecurityParams::decode_from_bytes(bytes).unwrap();
        assert_eq!(params, decoded);
    }

    #[test]
    fn test_decode_with_auth_range_locates_auth_params() {
        let params = UsmSecurityParams {
            engine_id: Bytes::from_static(&[0x80, 0x00, 0x1F, 0x88, 0x04]),
            engine_boots: 3,
            engine_time: 123456,
            user_name: Bytes::from_static(b"admin"),
            auth_params: Bytes::from_static(&[0xAA; 12]),
            priv_params: Bytes::from_static(&[0u8; 8]),
        };
        let bytes = params.encode_to_bytes();
        let mut decoder = Decoder::new(bytes.clone());
        let (decoded, range) = UsmSecurityParams::decode_with_auth_range(&mut decoder).unwrap();
        assert_eq!(decoded, params);
        assert_eq!(&bytes[range], &[0xAA; 12][..]);
    }
}
