//! BER decoding.
//!
//! Parses definite-length BER as used by SNMP (a DER-like subset of X.690).
//! Indefinite-length encodings and constructed OCTET STRINGs are rejected.

use bytes::Bytes;

use super::length::decode_length;
use super::tag;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::{MAX_OID_LEN, Oid};

/// A cursor over a BER-encoded byte range.
///
/// Decoding consumes the front of `data` as tag-length-value triples are
/// read. Reading into a constructed type (e.g. [`read_sequence`](Decoder::read_sequence))
/// yields a fresh `Decoder` scoped to that type's content, so nested
/// structures are parsed by recursively handing out sub-decoders.
#[derive(Debug, Clone)]
pub struct Decoder {
    data: Bytes,
    offset: usize,
}

impl Decoder {
    /// Create a decoder over the given bytes.
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn with_offset(data: Bytes, offset: usize) -> Self {
        Self { data, offset }
    }

    /// Returns `true` if there is no more data to decode.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes remaining.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// The absolute byte offset of the cursor (for diagnostics).
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Peek at the next tag byte without consuming it.
    pub fn peek_tag(&self) -> Result<u8> {
        self.data
            .first()
            .copied()
            .ok_or_else(|| Error::decode(self.offset, DecodeErrorKind::TruncatedData))
    }

    /// The remaining undecoded bytes, as a cheap `Bytes` clone.
    ///
    /// Used to hand off an encrypted scopedPDU's ciphertext, or a still-to-be-
    /// authenticated message body, without copying.
    pub(crate) fn remaining(&self) -> Bytes {
        self.data.clone()
    }

    fn advance(&mut self, n: usize) {
        self.data = self.data.slice(n..);
        self.offset += n;
    }

    fn read_tag_byte(&mut self) -> Result<u8> {
        let b = self.peek_tag()?;
        self.advance(1);
        Ok(b)
    }

    fn read_length_field(&mut self) -> Result<usize> {
        let (len, consumed) = decode_length(&self.data, self.offset)?;
        self.advance(consumed);
        Ok(len)
    }

    /// Read a tag-length-value triple, returning the tag, content, and the
    /// absolute offset at which the content begins.
    fn read_tlv_any(&mut self) -> Result<(u8, Bytes, usize)> {
        let tag = self.read_tag_byte()?;
        let len = self.read_length_field()?;
        let content_offset = self.offset;
        if self.data.len() < len {
            return Err(Error::decode(content_offset, DecodeErrorKind::TruncatedData));
        }
        let content = self.data.slice(0..len);
        self.advance(len);
        Ok((tag, content, content_offset))
    }

    /// Read a TLV, verifying the tag matches `expected`.
    fn read_tlv(&mut self, expected: u8) -> Result<Bytes> {
        let (tag, content, content_offset) = self.read_tlv_any()?;
        if tag != expected {
            return Err(Error::decode(
                content_offset,
                DecodeErrorKind::UnexpectedTag {
                    expected,
                    actual: tag,
                },
            ));
        }
        Ok(content)
    }

    /// Read a SEQUENCE, returning a sub-decoder over its content.
    pub fn read_sequence(&mut self) -> Result<Decoder> {
        let (tag, content, content_offset) = self.read_tlv_any()?;
        if tag != tag::universal::SEQUENCE {
            return Err(Error::decode(
                content_offset,
                DecodeErrorKind::UnexpectedTag {
                    expected: tag::universal::SEQUENCE,
                    actual: tag,
                },
            ));
        }
        Ok(Decoder::with_offset(content, content_offset))
    }

    /// Read any constructed value (tag not checked), returning the tag and a
    /// sub-decoder over its content. Used for PDU dispatch, where the tag
    /// itself identifies the PDU type.
    pub(crate) fn read_any_construct(&mut self) -> Result<(u8, Decoder)> {
        let (tag, content, content_offset) = self.read_tlv_any()?;
        Ok((tag, Decoder::with_offset(content, content_offset)))
    }

    /// Read a two's-complement INTEGER.
    pub fn read_integer(&mut self) -> Result<i32> {
        let offset = self.offset;
        let content = self.read_tlv(tag::universal::INTEGER)?;
        if content.is_empty() {
            return Err(Error::decode(offset, DecodeErrorKind::ZeroLengthInteger));
        }
        if content.len() > 1 {
            let redundant = (content[0] == 0x00 && content[1] & 0x80 == 0)
                || (content[0] == 0xFF && content[1] & 0x80 != 0);
            if redundant {
                return Err(Error::decode(offset, DecodeErrorKind::NonMinimalInteger));
            }
        }
        let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
        for &b in content.iter() {
            value = (value << 8) | b as i64;
        }
        if value < i32::MIN as i64 || value > i32::MAX as i64 {
            return Err(Error::decode(offset, DecodeErrorKind::IntegerOverflow));
        }
        Ok(value as i32)
    }

    /// Read an unsigned 32-bit value (Counter32, Gauge32/Unsigned32, TimeTicks)
    /// tagged with the given application tag.
    pub fn read_unsigned32(&mut self, expected_tag: u8) -> Result<u32> {
        let offset = self.offset;
        let content = self.read_tlv(expected_tag)?;
        if content.is_empty() {
            return Err(Error::decode(offset, DecodeErrorKind::ZeroLengthInteger));
        }
        if content[0] & 0x80 != 0 {
            return Err(Error::decode(offset, DecodeErrorKind::NegativeUnsigned));
        }
        let mut value: u64 = 0;
        for &b in content.iter() {
            value = (value << 8) | b as u64;
        }
        if value > u32::MAX as u64 {
            return Err(Error::decode(offset, DecodeErrorKind::IntegerOverflow));
        }
        Ok(value as u32)
    }

    /// Read a Counter64 value.
    pub fn read_counter64(&mut self) -> Result<u64> {
        let offset = self.offset;
        let content = self.read_tlv(tag::application::COUNTER64)?;
        if content.is_empty() {
            return Err(Error::decode(offset, DecodeErrorKind::ZeroLengthInteger));
        }
        if content.len() > 9 {
            return Err(Error::decode(
                offset,
                DecodeErrorKind::Integer64TooLong {
                    length: content.len(),
                },
            ));
        }
        if content[0] & 0x80 != 0 {
            return Err(Error::decode(offset, DecodeErrorKind::NegativeUnsigned));
        }
        let mut value: u128 = 0;
        for &b in content.iter() {
            value = (value << 8) | b as u128;
        }
        if value > u64::MAX as u128 {
            return Err(Error::decode(
                offset,
                DecodeErrorKind::Integer64TooLong {
                    length: content.len(),
                },
            ));
        }
        Ok(value as u64)
    }

    /// Read an OCTET STRING. Rejects the constructed form.
    pub fn read_octet_string(&mut self) -> Result<Bytes> {
        if self.peek_tag()? == tag::universal::OCTET_STRING_CONSTRUCTED {
            return Err(Error::decode(
                self.offset,
                DecodeErrorKind::ConstructedOctetString,
            ));
        }
        self.read_tlv(tag::universal::OCTET_STRING)
    }

    /// Read an OCTET STRING along with the absolute offset its content starts
    /// at (relative to the buffer the outermost [`Decoder::new`] was built
    /// over, not this sub-decoder).
    ///
    /// Used to locate `msgAuthenticationParameters` within the original
    /// datagram so USM authentication can zero and re-verify that exact byte
    /// range without re-encoding (and risking a non-canonical length
    /// mismatch with whatever produced the original bytes).
    pub(crate) fn read_octet_string_with_offset(&mut self) -> Result<(Bytes, usize)> {
        if self.peek_tag()? == tag::universal::OCTET_STRING_CONSTRUCTED {
            return Err(Error::decode(
                self.offset,
                DecodeErrorKind::ConstructedOctetString,
            ));
        }
        let (tag, content, content_offset) = self.read_tlv_any()?;
        if tag != tag::universal::OCTET_STRING {
            return Err(Error::decode(
                content_offset,
                DecodeErrorKind::UnexpectedTag {
                    expected: tag::universal::OCTET_STRING,
                    actual: tag,
                },
            ));
        }
        Ok((content, content_offset))
    }

    /// Read an Opaque value (APPLICATION 4).
    pub fn read_opaque(&mut self) -> Result<Bytes> {
        self.read_tlv(tag::application::OPAQUE)
    }

    /// Read a NULL value.
    pub fn read_null(&mut self) -> Result<()> {
        let offset = self.offset;
        let content = self.read_tlv(tag::universal::NULL)?;
        if !content.is_empty() {
            return Err(Error::decode(offset, DecodeErrorKind::InvalidNull));
        }
        Ok(())
    }

    /// Read an IpAddress (APPLICATION 0, 4 octets).
    pub fn read_ip_address(&mut self) -> Result<[u8; 4]> {
        let offset = self.offset;
        let content = self.read_tlv(tag::application::IP_ADDRESS)?;
        if content.len() != 4 {
            return Err(Error::decode(
                offset,
                DecodeErrorKind::InvalidIpAddressLength {
                    length: content.len(),
                },
            ));
        }
        Ok([content[0], content[1], content[2], content[3]])
    }

    /// Read an OBJECT IDENTIFIER.
    pub fn read_oid(&mut self) -> Result<Oid> {
        let offset = self.offset;
        let content = self.read_tlv(tag::universal::OBJECT_IDENTIFIER)?;
        if content.is_empty() {
            return Err(Error::decode(offset, DecodeErrorKind::InvalidOidEncoding));
        }

        let mut pos = 0usize;
        let first_subid = read_base128_subidentifier(&content, &mut pos, offset)?;
        let mut arcs = Vec::with_capacity(content.len());
        if first_subid < 40 {
            arcs.push(0);
            arcs.push(first_subid);
        } else if first_subid < 80 {
            arcs.push(1);
            arcs.push(first_subid - 40);
        } else {
            arcs.push(2);
            arcs.push(first_subid - 80);
        }

        while pos < content.len() {
            arcs.push(read_base128_subidentifier(&content, &mut pos, offset)?);
        }

        if arcs.len() > MAX_OID_LEN {
            return Err(Error::decode(offset, DecodeErrorKind::InvalidOidEncoding));
        }

        Ok(Oid::from_arcs_unchecked(arcs))
    }

    /// Read a response-only exception value TLV, verifying the tag matches
    /// and the content is empty.
    pub(crate) fn read_exception(&mut self, expected_tag: u8) -> Result<()> {
        let offset = self.offset;
        let content = self.read_tlv(expected_tag)?;
        if !content.is_empty() {
            return Err(Error::decode(offset, DecodeErrorKind::InvalidNull));
        }
        Ok(())
    }
}

fn read_base128_subidentifier(content: &[u8], pos: &mut usize, offset: usize) -> Result<u32> {
    let mut value: u32 = 0;
    let mut octets = 0;
    loop {
        let b = *content
            .get(*pos)
            .ok_or_else(|| Error::decode(offset, DecodeErrorKind::InvalidOidEncoding))?;
        *pos += 1;
        octets += 1;
        if octets > 5 {
            return Err(Error::decode(offset, DecodeErrorKind::InvalidOidEncoding));
        }
        value = (value << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::encode::EncodeBuf;
    use crate::oid;

    #[test]
    fn test_decode_integer_roundtrip() {
        for &v in &[0i32, 1, -1, 127, 128, -128, -129, i32::MAX, i32::MIN] {
            let mut buf = EncodeBuf::new();
            buf.push_integer(v);
            let mut decoder = Decoder::new(buf.finish());
            assert_eq!(decoder.read_integer().unwrap(), v);
        }
    }

    #[test]
    fn test_decode_octet_string() {
        let mut buf = EncodeBuf::new();
        buf.push_octet_string(b"hello");
        let mut decoder = Decoder::new(buf.finish());
        assert_eq!(decoder.read_octet_string().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_decode_null() {
        let mut buf = EncodeBuf::new();
        buf.push_null();
        let mut decoder = Decoder::new(buf.finish());
        decoder.read_null().unwrap();
    }

    #[test]
    fn test_decode_oid_roundtrip() {
        let original = oid!(1, 3, 6, 1, 4, 1, 99999, 1, 0);
        let mut buf = EncodeBuf::new();
        buf.push_oid(&original);
        let mut decoder = Decoder::new(buf.finish());
        assert_eq!(decoder.read_oid().unwrap(), original);
    }

    #[test]
    fn test_decode_ip_address() {
        let mut buf = EncodeBuf::new();
        buf.push_ip_address([192, 168, 1, 1]);
        let mut decoder = Decoder::new(buf.finish());
        assert_eq!(decoder.read_ip_address().unwrap(), [192, 168, 1, 1]);
    }

    #[test]
    fn test_decode_unsigned32() {
        let mut buf = EncodeBuf::new();
        buf.push_unsigned32(tag::application::COUNTER32, 4_000_000_000);
        let mut decoder = Decoder::new(buf.finish());
        assert_eq!(
            decoder.read_unsigned32(tag::application::COUNTER32).unwrap(),
            4_000_000_000
        );
    }

    #[test]
    fn test_decode_counter64() {
        let mut buf = EncodeBuf::new();
        buf.push_integer64(u64::MAX);
        let mut decoder = Decoder::new(buf.finish());
        assert_eq!(decoder.read_counter64().unwrap(), u64::MAX);
    }

    #[test]
    fn test_decode_sequence_nesting() {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_integer(2);
            buf.push_integer(1);
        });
        let mut decoder = Decoder::new(buf.finish());
        let mut seq = decoder.read_sequence().unwrap();
        assert_eq!(seq.read_integer().unwrap(), 1);
        assert_eq!(seq.read_integer().unwrap(), 2);
        assert!(seq.is_empty());
    }

    #[test]
    fn test_unexpected_tag_error() {
        let mut buf = EncodeBuf::new();
        buf.push_integer(1);
        let mut decoder = Decoder::new(buf.finish());
        let err = decoder.read_octet_string().unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_truncated_data() {
        let mut decoder = Decoder::new(Bytes::from_static(&[0x02, 0x02, 0x01]));
        assert!(decoder.read_integer().is_err());
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let mut decoder = Decoder::new(Bytes::from_static(&[0x30, 0x80]));
        assert!(decoder.read_sequence().is_err());
    }

    #[test]
    fn test_constructed_octet_string_rejected() {
        let mut decoder = Decoder::new(Bytes::from_static(&[0x24, 0x00]));
        assert!(decoder.read_octet_string().is_err());
    }

    #[test]
    fn test_non_minimal_integer_rejected() {
        // INTEGER, len 2, redundant leading 0x00 before a byte with MSB clear.
        let mut decoder = Decoder::new(Bytes::from_static(&[0x02, 0x02, 0x00, 0x7F]));
        let err = decoder.read_integer().unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::NonMinimalInteger,
                ..
            }
        ));
    }

    #[test]
    fn test_non_minimal_negative_integer_rejected() {
        // INTEGER, len 2, redundant leading 0xFF before a byte with MSB set.
        let mut decoder = Decoder::new(Bytes::from_static(&[0x02, 0x02, 0xFF, 0x80]));
        assert!(decoder.read_integer().is_err());
    }

    #[test]
    fn test_minimal_integer_accepted() {
        let mut decoder = Decoder::new(Bytes::from_static(&[0x02, 0x02, 0x00, 0x80]));
        assert_eq!(decoder.read_integer().unwrap(), 128);
    }

    #[test]
    fn test_negative_unsigned32_rejected() {
        let mut decoder = Decoder::new(Bytes::from_static(&[
            tag::application::COUNTER32,
            0x04,
            0x80,
            0x00,
            0x00,
            0x00,
        ]));
        let err = decoder
            .read_unsigned32(tag::application::COUNTER32)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Decode {
                kind: DecodeErrorKind::NegativeUnsigned,
                ..
            }
        ));
    }

    #[test]
    fn test_negative_counter64_rejected() {
        let mut decoder = Decoder::new(Bytes::from_static(&[
            tag::application::COUNTER64,
            0x08,
            0x80,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
        ]));
        assert!(decoder.read_counter64().is_err());
    }
}
