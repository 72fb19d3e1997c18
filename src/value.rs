//! SNMP value types (the `Value` variant enum).

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;

/// An SNMP value: exactly one of the SMI base types plus the three response-only
/// exception markers.
///
/// `NoSuchObject`, `NoSuchInstance`, and `EndOfMibView` are only ever valid as
/// response values — they signal that no value exists at an OID, distinct
/// from an error at the PDU level. Encoding them into a request is a caller
/// bug, not something this type prevents at compile time, since the PDU
/// layer is what knows which direction a varbind is travelling.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 32-bit integer.
    Integer(i32),
    /// Arbitrary octet string.
    OctetString(Bytes),
    /// The ASN.1 NULL value, used for GET requests and unset scalars.
    Null,
    /// An object identifier value (distinct from the varbind's own OID).
    ObjectIdentifier(Oid),
    /// IPv4 address, 4 octets.
    IpAddress([u8; 4]),
    /// Monotonically increasing counter that wraps at 2^32.
    Counter32(u32),
    /// Non-negative integer that latches at its maximum rather than wrapping.
    Gauge32(u32),
    /// Hundredths of a second since some epoch meaningful to the agent.
    TimeTicks(u32),
    /// Opaque-encoded bytes (e.g. a nested, non-SNMP ASN.1 value).
    Opaque(Bytes),
    /// 64-bit counter, for rates that overflow Counter32 too quickly.
    Counter64(u64),
    /// Response-only exception: object does not exist.
    NoSuchObject,
    /// Response-only exception: instance does not exist.
    NoSuchInstance,
    /// Response-only exception: walk has exhausted the agent's MIB view.
    EndOfMibView,
}

impl Value {
    /// Returns `true` for the three response-only exception markers.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// Encode this value's TLV.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        match self {
            Value::Integer(v) => buf.push_integer(*v),
            Value::OctetString(bytes) => buf.push_octet_string(bytes),
            Value::Null => buf.push_null(),
            Value::ObjectIdentifier(oid) => buf.push_oid(oid),
            Value::IpAddress(addr) => buf.push_ip_address(*addr),
            Value::Counter32(v) => buf.push_unsigned32(tag::application::COUNTER32, *v),
            Value::Gauge32(v) => buf.push_unsigned32(tag::application::GAUGE32, *v),
            Value::TimeTicks(v) => buf.push_unsigned32(tag::application::TIMETICKS, *v),
            Value::Opaque(bytes) => buf.push_opaque(bytes),
            Value::Counter64(v) => buf.push_integer64(*v),
            Value::NoSuchObject => buf.push_exception(tag::context::NO_SUCH_OBJECT),
            Value::NoSuchInstance => buf.push_exception(tag::context::NO_SUCH_INSTANCE),
            Value::EndOfMibView => buf.push_exception(tag::context::END_OF_MIB_VIEW),
        }
    }

    /// Decode a value, dispatching on the leading tag.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let offset = decoder.offset();
        let value_tag = decoder.peek_tag()?;
        match value_tag {
            tag::universal::INTEGER => Ok(Value::Integer(decoder.read_integer()?)),
            tag::universal::OCTET_STRING => Ok(Value::OctetString(decoder.read_octet_string()?)),
            tag::universal::NULL => {
                decoder.read_null()?;
                Ok(Value::Null)
            }
            tag::universal::OBJECT_IDENTIFIER => {
                Ok(Value::ObjectIdentifier(decoder.read_oid()?))
            }
            tag::application::IP_ADDRESS => Ok(Value::IpAddress(decoder.read_ip_address()?)),
            tag::application::COUNTER32 => {
                Ok(Value::Counter32(decoder.read_unsigned32(value_tag)?))
            }
            tag::application::GAUGE32 => Ok(Value::Gauge32(decoder.read_unsigned32(value_tag)?)),
            tag::application::TIMETICKS => {
                Ok(Value::TimeTicks(decoder.read_unsigned32(value_tag)?))
            }
            tag::application::OPAQUE => Ok(Value::Opaque(decoder.read_opaque()?)),
            tag::application::COUNTER64 => Ok(Value::Counter64(decoder.read_counter64()?)),
            tag::context::NO_SUCH_OBJECT => {
                decoder.read_exception(tag::context::NO_SUCH_OBJECT)?;
                Ok(Value::NoSuchObject)
            }
            tag::context::NO_SUCH_INSTANCE => {
                decoder.read_exception(tag::context::NO_SUCH_INSTANCE)?;
                Ok(Value::NoSuchInstance)
            }
            tag::context::END_OF_MIB_VIEW => {
                decoder.read_exception(tag::context::END_OF_MIB_VIEW)?;
                Ok(Value::EndOfMibView)
            }
            other => Err(Error::decode(
                offset,
                DecodeErrorKind::UnexpectedTag {
                    expected: tag::universal::INTEGER,
                    actual: other,
                },
            )),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::OctetString(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => write!(f, "{:02X?}", &bytes[..]),
            },
            Value::Null => write!(f, "Null"),
            Value::ObjectIdentifier(oid) => write!(f, "{}", oid),
            Value::IpAddress(addr) => {
                write!(f, "{}.{}.{}.{}", addr[0], addr[1], addr[2], addr[3])
            }
            Value::Counter32(v) => write!(f, "Counter32: {}", v),
            Value::Gauge32(v) => write!(f, "Gauge32: {}", v),
            Value::TimeTicks(v) => write!(f, "Timeticks: ({}) {}", v, format_timeticks(*v)),
            Value::Opaque(bytes) => write!(f, "Opaque: {:02X?}", &bytes[..]),
            Value::Counter64(v) => write!(f, "Counter64: {}", v),
            Value::NoSuchObject => write!(f, "noSuchObject"),
            Value::NoSuchInstance => write!(f, "noSuchInstance"),
            Value::EndOfMibView => write!(f, "endOfMibView"),
        }
    }
}

fn format_timeticks(centiseconds: u32) -> String {
    let total_seconds = centiseconds / 100;
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;
    format!("{}d {:02}h:{:02}m:{:02}s", days, hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn roundtrip(value: Value) -> Value {
        let mut buf = EncodeBuf::new();
        value.encode(&mut buf);
        let mut decoder = Decoder::new(buf.finish());
        Value::decode(&mut decoder).unwrap()
    }

    #[test]
    fn test_integer_roundtrip() {
        assert_eq!(roundtrip(Value::Integer(-1)), Value::Integer(-1));
        assert_eq!(roundtrip(Value::Integer(i32::MAX)), Value::Integer(i32::MAX));
    }

    #[test]
    fn test_octet_string_roundtrip() {
        let v = Value::OctetString(Bytes::from_static(b"hello world"));
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_opaque_roundtrip() {
        let v = Value::Opaque(Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_counter64_roundtrip() {
        assert_eq!(roundtrip(Value::Counter64(u64::MAX)), Value::Counter64(u64::MAX));
        assert_eq!(roundtrip(Value::Counter64(0)), Value::Counter64(0));
    }

    #[test]
    fn test_object_identifier_roundtrip() {
        let v = Value::ObjectIdentifier(oid!(1, 3, 6, 1, 4, 1));
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_exceptions_roundtrip() {
        assert_eq!(roundtrip(Value::NoSuchObject), Value::NoSuchObject);
        assert_eq!(roundtrip(Value::NoSuchInstance), Value::NoSuchInstance);
        assert_eq!(roundtrip(Value::EndOfMibView), Value::EndOfMibView);
    }

    #[test]
    fn test_is_exception() {
        assert!(Value::NoSuchObject.is_exception());
        assert!(Value::NoSuchInstance.is_exception());
        assert!(Value::EndOfMibView.is_exception());
        assert!(!Value::Integer(0).is_exception());
        assert!(!Value::Null.is_exception());
    }

    #[test]
    fn test_display_integer() {
        assert_eq!(Value::Integer(42).to_string(), "42");
    }

    #[test]
    fn test_display_ip_address() {
        assert_eq!(Value::IpAddress([10, 0, 0, 1]).to_string(), "10.0.0.1");
    }

    #[test]
    fn test_display_timeticks() {
        let s = Value::TimeTicks(360000).to_string();
        assert!(s.contains("1h"));
    }

    #[test]
    fn test_display_exceptions() {
        assert_eq!(Value::NoSuchObject.to_string(), "noSuchObject");
        assert_eq!(Value::NoSuchInstance.to_string(), "noSuchInstance");
        assert_eq!(Value::EndOfMibView.to_string(), "endOfMibView");
    }

    #[test]
    fn test_decode_rejects_wrong_tag_for_exception() {
        // A bare boolean-looking tag should not parse as any known value.
        let mut decoder = Decoder::new(Bytes::from_static(&[0x01, 0x01, 0xFF]));
        assert!(Value::decode(&mut decoder).is_err());
    }
}
