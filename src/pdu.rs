//! PDU (Protocol Data Unit) types and encoding.

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;
use crate::varbind::{self, VarBind};

/// Discriminates the nine PDU shapes carried inside an SNMP message, each
/// identified on the wire by its own context-specific, constructed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    GetBulkRequest,
    SetRequest,
    Response,
    InformRequest,
    TrapV2,
    Report,
    /// SNMPv1 trap (RFC 1157), the one PDU shape with its own field layout.
    TrapV1,
}

impl PduType {
    /// The BER tag this PDU type is encoded under.
    pub const fn tag(self) -> u8 {
        match self {
            PduType::GetRequest => tag::pdu::GET_REQUEST,
            PduType::GetNextRequest => tag::pdu::GET_NEXT_REQUEST,
            PduType::Response => tag::pdu::RESPONSE,
            PduType::SetRequest => tag::pdu::SET_REQUEST,
            PduType::TrapV1 => tag::pdu::TRAP_V1,
            PduType::GetBulkRequest => tag::pdu::GET_BULK_REQUEST,
            PduType::InformRequest => tag::pdu::INFORM_REQUEST,
            PduType::TrapV2 => tag::pdu::TRAP_V2,
            PduType::Report => tag::pdu::REPORT,
        }
    }

    /// Resolve a PDU type from its wire tag.
    pub const fn from_tag(value: u8) -> Option<Self> {
        match value {
            tag::pdu::GET_REQUEST => Some(PduType::GetRequest),
            tag::pdu::GET_NEXT_REQUEST => Some(PduType::GetNextRequest),
            tag::pdu::RESPONSE => Some(PduType::Response),
            tag::pdu::SET_REQUEST => Some(PduType::SetRequest),
            tag::pdu::TRAP_V1 => Some(PduType::TrapV1),
            tag::pdu::GET_BULK_REQUEST => Some(PduType::GetBulkRequest),
            tag::pdu::INFORM_REQUEST => Some(PduType::InformRequest),
            tag::pdu::TRAP_V2 => Some(PduType::TrapV2),
            tag::pdu::REPORT => Some(PduType::Report),
            _ => None,
        }
    }

    /// Whether this PDU type is a request a peer is expected to answer
    /// (as opposed to a response, trap, or report).
    pub const fn expects_response(self) -> bool {
        !matches!(
            self,
            PduType::Response | PduType::TrapV1 | PduType::TrapV2 | PduType::Report
        )
    }
}

/// Fields unique to the SNMPv1 Trap PDU (RFC 1157 §4.1.6), which carries an
/// enterprise OID, the sending agent's address, and a generic/specific trap
/// code pair instead of request-id/error-status/error-index.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapV1Info {
    pub enterprise: Oid,
    pub agent_addr: [u8; 4],
    pub generic_trap: i32,
    pub specific_trap: i32,
    pub timestamp: u32,
}

/// A decoded or to-be-encoded SNMP PDU.
///
/// All nine PDU shapes share this struct. For the eight RFC 3416 PDUs,
/// `request_id`/`error_status`/`error_index`/`varbinds` carry their normal
/// meaning (for a GetBulk request, the same two integer slots carry
/// non-repeaters and max-repetitions instead — see
/// [`non_repeaters`](Pdu::non_repeaters) and
/// [`max_repetitions`](Pdu::max_repetitions)). `TrapV1` ignores those four
/// fields and uses `trap_v1` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i32,
    pub error_index: i32,
    pub varbinds: Vec<VarBind>,
    /// Populated only when `pdu_type` is `TrapV1`.
    pub trap_v1: Option<TrapV1Info>,
}

impl Pdu {
    /// Construct one of the eight standard request/response-shaped PDUs.
    pub fn new(pdu_type: PduType, request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
            trap_v1: None,
        }
    }

    /// Construct a GetBulkRequest, storing non-repeaters/max-repetitions in
    /// the shared integer slots.
    pub fn get_bulk(request_id: i32, non_repeaters: i32, max_repetitions: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type: PduType::GetBulkRequest,
            request_id,
            error_status: non_repeaters,
            error_index: max_repetitions,
            varbinds,
            trap_v1: None,
        }
    }

    /// Construct an SNMPv1 trap PDU.
    pub fn trap_v1(info: TrapV1Info, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type: PduType::TrapV1,
            request_id: 0,
            error_status: 0,
            error_index: 0,
            varbinds,
            trap_v1: Some(info),
        }
    }

    /// Non-repeaters, valid only when `pdu_type` is `GetBulkRequest`.
    pub fn non_repeaters(&self) -> i32 {
        self.error_status
    }

    /// Max-repetitions, valid only when `pdu_type` is `GetBulkRequest`.
    pub fn max_repetitions(&self) -> i32 {
        self.error_index
    }

    /// Encode this PDU, including its outer tag.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_constructed(self.pdu_type.tag(), |buf| match &self.trap_v1 {
            Some(info) => {
                varbind::encode_varbind_list(buf, &self.varbinds);
                buf.push_unsigned32(tag::application::TIMETICKS, info.timestamp);
                buf.push_integer(info.specific_trap);
                buf.push_integer(info.generic_trap);
                buf.push_ip_address(info.agent_addr);
                buf.push_oid(&info.enterprise);
            }
            None => {
                varbind::encode_varbind_list(buf, &self.varbinds);
                buf.push_integer(self.error_index);
                buf.push_integer(self.error_status);
                buf.push_integer(self.request_id);
            }
        });
    }

    /// Decode a PDU, dispatching on the outer constructed tag.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let offset = decoder.offset();
        let (raw_tag, mut content) = decoder.read_any_construct()?;
        let pdu_type = PduType::from_tag(raw_tag)
            .ok_or_else(|| Error::decode(offset, DecodeErrorKind::UnknownPduType(raw_tag)))?;

        if pdu_type == PduType::TrapV1 {
            let enterprise = content.read_oid()?;
            let agent_addr = content.read_ip_address()?;
            let generic_trap = content.read_integer()?;
            let specific_trap = content.read_integer()?;
            let timestamp = content.read_unsigned32(tag::application::TIMETICKS)?;
            let varbinds = varbind::decode_varbind_list(&mut content)?;
            return Ok(Pdu {
                pdu_type,
                request_id: 0,
                error_status: 0,
                error_index: 0,
                varbinds,
                trap_v1: Some(TrapV1Info {
                    enterprise,
                    agent_addr,
                    generic_trap,
                    specific_trap,
                    timestamp,
                }),
            });
        }

        let request_id = content.read_integer()?;
        let error_status = content.read_integer()?;
        let error_index = content.read_integer()?;
        let varbinds = varbind::decode_varbind_list(&mut content)?;

        Ok(Pdu {
            pdu_type,
            request_id,
            error_status,
            error_index,
            varbinds,
            trap_v1: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::value::Value;

    fn sample_varbinds() -> Vec<VarBind> {
        vec![
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Null),
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 2, 0), Value::Integer(7)),
        ]
    }

    fn roundtrip(pdu: &Pdu) -> Pdu {
        let mut buf = EncodeBuf::new();
        pdu.encode(&mut buf);
        let mut decoder = Decoder::new(buf.finish());
        Pdu::decode(&mut decoder).unwrap()
    }

    #[test]
    fn test_get_request_roundtrip() {
        let pdu = Pdu::new(PduType::GetRequest, 123, sample_varbinds());
        assert_eq!(roundtrip(&pdu), pdu);
    }

    #[test]
    fn test_response_roundtrip_with_error() {
        let mut pdu = Pdu::new(PduType::Response, 5, sample_varbinds());
        pdu.error_status = crate::error::ErrorStatus::NoSuchName.as_i32();
        pdu.error_index = 1;
        assert_eq!(roundtrip(&pdu), pdu);
    }

    #[test]
    fn test_get_bulk_roundtrip() {
        let pdu = Pdu::get_bulk(42, 1, 10, sample_varbinds());
        let decoded = roundtrip(&pdu);
        assert_eq!(decoded, pdu);
        assert_eq!(decoded.non_repeaters(), 1);
        assert_eq!(decoded.max_repetitions(), 10);
    }

    #[test]
    fn test_trap_v1_roundtrip() {
        let pdu = Pdu::trap_v1(
            TrapV1Info {
                enterprise: oid!(1, 3, 6, 1, 4, 1, 99999),
                agent_addr: [10, 0, 0, 5],
                generic_trap: 6,
                specific_trap: 1,
                timestamp: 12345,
            },
            sample_varbinds(),
        );
        assert_eq!(roundtrip(&pdu), pdu);
    }

    #[test]
    fn test_pdu_type_tag_roundtrip() {
        for &pt in &[
            PduType::GetRequest,
            PduType::GetNextRequest,
            PduType::GetBulkRequest,
            PduType::SetRequest,
            PduType::Response,
            PduType::InformRequest,
            PduType::TrapV2,
            PduType::Report,
            PduType::TrapV1,
        ] {
            assert_eq!(PduType::from_tag(pt.tag()), Some(pt));
        }
    }

    #[test]
    fn test_unknown_pdu_type_rejected() {
        let mut buf = EncodeBuf::new();
        buf.push_constructed(0xBF, |buf| {
            buf.push_integer(1);
        });
        let mut decoder = Decoder::new(buf.finish());
        assert!(Pdu::decode(&mut decoder).is_err());
    }

    #[test]
    fn test_expects_response() {
        assert!(PduType::GetRequest.expects_response());
        assert!(PduType::SetRequest.expects_response());
        assert!(!PduType::Response.expects_response());
        assert!(!PduType::TrapV1.expects_response());
        assert!(!PduType::TrapV2.expects_response());
        assert!(!PduType::Report.expects_response());
    }
}
