//! ISO-on-TCP (RFC 1006) TPKT framing.
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | version | Always 0x03 |
//! | 1 | reserved | 0x00 |
//! | 2-3 | length | Total frame length including this header |
//! | 4.. | COTP | Connection-oriented transport packet |

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::field::{read_const, read_reserved, write_const, write_reserved, Message};

use super::cotp::CotpPacket;

/// TPKT version byte.
pub const TPKT_PROTOCOL_ID: u8 = 0x03;

/// TPKT header size in bytes.
pub const TPKT_HEADER_SIZE: usize = 4;

/// A TPKT frame carrying one COTP packet.
#[derive(Debug, Clone, PartialEq)]
pub struct TpktPacket {
    /// The carried COTP packet.
    pub payload: CotpPacket,
}

impl TpktPacket {
    /// Wraps a COTP packet.
    pub fn new(payload: CotpPacket) -> Self {
        Self { payload }
    }
}

impl Message for TpktPacket {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("TPKTPacket");
        read_const(rb, "protocolId", 8, u64::from(TPKT_PROTOCOL_ID))?;
        read_reserved(rb, "reserved", 8, 0x00)?;
        let length_position = rb.position();
        let len = rb.read_u16("len")?;
        if usize::from(len) < TPKT_HEADER_SIZE {
            return Err(CodecError::invalid_frame_at(
                "len",
                length_position,
                format!("TPKT length {} is shorter than its header", len),
            ));
        }
        let payload = CotpPacket::parse(rb, len - TPKT_HEADER_SIZE as u16)?;
        rb.pop_context();
        Ok(Self { payload })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let len = TPKT_HEADER_SIZE + self.payload.length_in_bytes();
        let len = u16::try_from(len)
            .map_err(|_| CodecError::encoding("len", format!("frame of {} bytes exceeds the TPKT length field", len)))?;
        wb.push_context("TPKTPacket");
        write_const(wb, "protocolId", 8, u64::from(TPKT_PROTOCOL_ID))?;
        write_reserved(wb, "reserved", 8, 0x00)?;
        wb.write_u16("len", len)?;
        self.payload.serialize(wb)?;
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        TPKT_HEADER_SIZE as u64 * 8 + self.payload.length_in_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s7::cotp::{CotpPacketKind, CotpParameter};
    use crate::s7::types::{CotpProtocolClass, CotpTpduSize};

    fn connection_request() -> TpktPacket {
        TpktPacket::new(CotpPacket::new(
            CotpPacketKind::ConnectionRequest {
                destination_reference: 0x0000,
                source_reference: 0x0001,
                protocol_class: CotpProtocolClass::Class0,
            },
            vec![
                CotpParameter::TpduSize(CotpTpduSize::Size1024),
                CotpParameter::CallingTsap(0x0100),
                CotpParameter::CalledTsap(0x0102),
            ],
            None,
        ))
    }

    #[test]
    fn test_parse_connection_request() {
        let bytes = hex::decode("0300001611e00000000100c0010ac1020100c2020102").unwrap();
        let packet = TpktPacket::from_bytes(&bytes, ()).unwrap();
        assert_eq!(packet, connection_request());
        assert_eq!(packet.length_in_bytes(), 22);
    }

    #[test]
    fn test_serialize_connection_request() {
        let bytes = connection_request().to_bytes().unwrap();
        assert_eq!(hex::encode(bytes), "0300001611e00000000100c0010ac1020100c2020102");
    }

    #[test]
    fn test_wrong_version_is_fatal() {
        let bytes = hex::decode("0400001611e00000000100c0010ac1020100c2020102").unwrap();
        let err = TpktPacket::from_bytes(&bytes, ()).unwrap_err();
        assert!(matches!(err, CodecError::ConstValueMismatch { expected: 3, actual: 4, .. }));
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = hex::decode("0300001611e0000000").unwrap();
        let err = TpktPacket::from_bytes(&bytes, ()).unwrap_err();
        assert!(err.is_end_of_data());
    }

    #[test]
    fn test_length_shorter_than_header() {
        let bytes = hex::decode("03000002").unwrap();
        assert!(matches!(
            TpktPacket::from_bytes(&bytes, ()),
            Err(CodecError::InvalidFrame { position: Some(16), .. })
        ));
    }
}
