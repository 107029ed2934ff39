//! Connection-oriented transport protocol (ISO 8073 class 0) packets.
//!
//! Every packet starts with a header length byte and a TPDU code. The code
//! selects the packet kind, the remainder of the header holds variable
//! parameters, and anything after the header is the S7 payload.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::field::{array_length_in_bits, read_enum, read_length_array, read_optional, write_array, Message};

use super::message::S7Message;
use super::types::{CotpProtocolClass, CotpTpduSize};

/// Kind-specific header fields of a COTP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CotpPacketKind {
    /// DT: user data.
    Data {
        /// End of TSDU marker.
        eot: bool,
        /// TPDU sequence number (7 bits).
        tpdu_ref: u8,
    },
    /// CR: connection request.
    ConnectionRequest {
        /// Destination reference.
        destination_reference: u16,
        /// Source reference.
        source_reference: u16,
        /// Requested protocol class.
        protocol_class: CotpProtocolClass,
    },
    /// CC: connection confirm.
    ConnectionResponse {
        /// Destination reference.
        destination_reference: u16,
        /// Source reference.
        source_reference: u16,
        /// Selected protocol class.
        protocol_class: CotpProtocolClass,
    },
    /// DR: disconnect request.
    DisconnectRequest {
        /// Destination reference.
        destination_reference: u16,
        /// Source reference.
        source_reference: u16,
        /// Protocol class.
        protocol_class: CotpProtocolClass,
    },
    /// DC: disconnect confirm.
    DisconnectResponse {
        /// Destination reference.
        destination_reference: u16,
        /// Source reference.
        source_reference: u16,
    },
    /// ER: TPDU error.
    TpduError {
        /// Destination reference.
        destination_reference: u16,
        /// Reject cause.
        reject_cause: u8,
    },
}

impl CotpPacketKind {
    /// TPDU code of the kind.
    pub fn tpdu_code(&self) -> u8 {
        match self {
            Self::Data { .. } => 0xF0,
            Self::ConnectionRequest { .. } => 0xE0,
            Self::ConnectionResponse { .. } => 0xD0,
            Self::DisconnectRequest { .. } => 0x80,
            Self::DisconnectResponse { .. } => 0xC0,
            Self::TpduError { .. } => 0x70,
        }
    }

    fn length_in_bits(&self) -> u64 {
        match self {
            Self::Data { .. } => 8,
            Self::ConnectionRequest { .. } | Self::ConnectionResponse { .. } | Self::DisconnectRequest { .. } => 40,
            Self::DisconnectResponse { .. } => 32,
            Self::TpduError { .. } => 24,
        }
    }

    fn parse(rb: &mut ReadBuffer<'_>, code: u8) -> Result<Self> {
        let kind = match code {
            0xF0 => Self::Data {
                eot: rb.read_bit("eot")?,
                tpdu_ref: rb.read_unsigned("tpduRef", 7)? as u8,
            },
            0xE0 => {
                let (destination_reference, source_reference, protocol_class) = read_connection_fields(rb)?;
                Self::ConnectionRequest {
                    destination_reference,
                    source_reference,
                    protocol_class,
                }
            }
            0xD0 => {
                let (destination_reference, source_reference, protocol_class) = read_connection_fields(rb)?;
                Self::ConnectionResponse {
                    destination_reference,
                    source_reference,
                    protocol_class,
                }
            }
            0x80 => {
                let (destination_reference, source_reference, protocol_class) = read_connection_fields(rb)?;
                Self::DisconnectRequest {
                    destination_reference,
                    source_reference,
                    protocol_class,
                }
            }
            0xC0 => Self::DisconnectResponse {
                destination_reference: rb.read_u16("destinationReference")?,
                source_reference: rb.read_u16("sourceReference")?,
            },
            0x70 => Self::TpduError {
                destination_reference: rb.read_u16("destinationReference")?,
                reject_cause: rb.read_u8("rejectCause")?,
            },
            other => {
                return Err(CodecError::unsupported_discriminator(
                    "COTPPacket",
                    format!("0x{:02X}", other),
                    rb.position(),
                ))
            }
        };
        Ok(kind)
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        match *self {
            Self::Data { eot, tpdu_ref } => {
                wb.write_bit("eot", eot)?;
                wb.write_unsigned("tpduRef", 7, u64::from(tpdu_ref))?;
            }
            Self::ConnectionRequest {
                destination_reference,
                source_reference,
                protocol_class,
            }
            | Self::ConnectionResponse {
                destination_reference,
                source_reference,
                protocol_class,
            }
            | Self::DisconnectRequest {
                destination_reference,
                source_reference,
                protocol_class,
            } => {
                wb.write_u16("destinationReference", destination_reference)?;
                wb.write_u16("sourceReference", source_reference)?;
                wb.write_u8("protocolClass", protocol_class.code())?;
            }
            Self::DisconnectResponse {
                destination_reference,
                source_reference,
            } => {
                wb.write_u16("destinationReference", destination_reference)?;
                wb.write_u16("sourceReference", source_reference)?;
            }
            Self::TpduError {
                destination_reference,
                reject_cause,
            } => {
                wb.write_u16("destinationReference", destination_reference)?;
                wb.write_u8("rejectCause", reject_cause)?;
            }
        }
        Ok(())
    }
}

fn read_connection_fields(rb: &mut ReadBuffer<'_>) -> Result<(u16, u16, CotpProtocolClass)> {
    let destination_reference = rb.read_u16("destinationReference")?;
    let source_reference = rb.read_u16("sourceReference")?;
    let protocol_class = read_enum(rb, "protocolClass", 8, "COTPProtocolClass", |v| {
        CotpProtocolClass::from_code(v as u8)
    })?;
    Ok((destination_reference, source_reference, protocol_class))
}

/// Variable header parameter of a COTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpParameter {
    /// Maximum TPDU size.
    TpduSize(CotpTpduSize),
    /// Calling transport service access point.
    CallingTsap(u16),
    /// Called transport service access point.
    CalledTsap(u16),
    /// Header checksum.
    Checksum(u8),
    /// Free-form disconnect information.
    DisconnectAdditionalInformation(Vec<u8>),
}

impl CotpParameter {
    /// Parameter code.
    pub fn parameter_type(&self) -> u8 {
        match self {
            Self::TpduSize(_) => 0xC0,
            Self::CallingTsap(_) => 0xC1,
            Self::CalledTsap(_) => 0xC2,
            Self::Checksum(_) => 0xC3,
            Self::DisconnectAdditionalInformation(_) => 0xE0,
        }
    }

    fn value_length(&self) -> usize {
        match self {
            Self::TpduSize(_) | Self::Checksum(_) => 1,
            Self::CallingTsap(_) | Self::CalledTsap(_) => 2,
            Self::DisconnectAdditionalInformation(data) => data.len(),
        }
    }
}

impl Message for CotpParameter {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("COTPParameter");
        let parameter_type = rb.read_u8("parameterType")?;
        let parameter_length = rb.read_u8("parameterLength")?;
        let parameter = match parameter_type {
            0xC0 => Self::TpduSize(read_enum(rb, "tpduSize", 8, "COTPTpduSize", |v| {
                CotpTpduSize::from_code(v as u8)
            })?),
            0xC1 => Self::CallingTsap(rb.read_u16("tsapId")?),
            0xC2 => Self::CalledTsap(rb.read_u16("tsapId")?),
            0xC3 => Self::Checksum(rb.read_u8("crc")?),
            0xE0 => Self::DisconnectAdditionalInformation(rb.read_bytes("data", usize::from(parameter_length))?),
            other => {
                return Err(CodecError::unsupported_discriminator(
                    "COTPParameter",
                    format!("0x{:02X}", other),
                    rb.position(),
                ))
            }
        };
        rb.pop_context();
        Ok(parameter)
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let parameter_length = u8::try_from(self.value_length())
            .map_err(|_| CodecError::encoding("parameterLength", "parameter value longer than 255 bytes"))?;
        wb.write_u8("parameterType", self.parameter_type())?;
        wb.write_u8("parameterLength", parameter_length)?;
        match self {
            Self::TpduSize(size) => wb.write_u8("tpduSize", size.code()),
            Self::CallingTsap(id) | Self::CalledTsap(id) => wb.write_u16("tsapId", *id),
            Self::Checksum(crc) => wb.write_u8("crc", *crc),
            Self::DisconnectAdditionalInformation(data) => wb.write_bytes("data", data),
        }
    }

    fn length_in_bits(&self) -> u64 {
        (2 + self.value_length() as u64) * 8
    }
}

/// A COTP packet: kind header, parameters and an optional S7 payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CotpPacket {
    /// Kind-specific header fields.
    pub kind: CotpPacketKind,
    /// Variable header parameters.
    pub parameters: Vec<CotpParameter>,
    /// S7 message carried after the header.
    pub payload: Option<S7Message>,
}

impl CotpPacket {
    /// Creates a packet.
    pub fn new(kind: CotpPacketKind, parameters: Vec<CotpParameter>, payload: Option<S7Message>) -> Self {
        Self {
            kind,
            parameters,
            payload,
        }
    }

    /// Finds the first parameter matching `select`.
    pub fn parameter<T>(&self, select: impl Fn(&CotpParameter) -> Option<T>) -> Option<T> {
        self.parameters.iter().find_map(select)
    }

    /// Value of the header length byte: everything in the header after itself.
    pub fn header_length(&self) -> usize {
        let bits = 8 + self.kind.length_in_bits() + array_length_in_bits(&self.parameters);
        (bits / 8) as usize
    }
}

impl Message for CotpPacket {
    /// Number of bytes the enclosing TPKT frame assigns to this packet.
    type Args = u16;

    fn parse(rb: &mut ReadBuffer<'_>, cotp_len: u16) -> Result<Self> {
        rb.push_context("COTPPacket");
        let start = rb.position_bytes();
        let header_length = rb.read_u8("headerLength")?;
        let tpdu_code = rb.read_u8("tpduCode")?;
        let kind = CotpPacketKind::parse(rb, tpdu_code)?;
        log::debug!("COTP packet 0x{:02X} with header length {}", tpdu_code, header_length);

        let consumed = rb.position_bytes() - start;
        let parameters_len = (usize::from(header_length) + 1).checked_sub(consumed).ok_or_else(|| {
            CodecError::invalid_frame_at(
                "headerLength",
                start as u64 * 8,
                format!(
                    "COTP header length {} is shorter than the fixed part ({} bytes)",
                    header_length,
                    consumed - 1
                ),
            )
        })?;
        let parameters = read_length_array(rb, "parameters", parameters_len, |rb| CotpParameter::parse(rb, ()))?;

        let consumed = rb.position_bytes() - start;
        let payload = read_optional(rb, consumed < usize::from(cotp_len), |rb| S7Message::parse(rb, ()))?;
        rb.pop_context();
        Ok(Self {
            kind,
            parameters,
            payload,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let header_length = u8::try_from(self.header_length())
            .map_err(|_| CodecError::encoding("headerLength", "COTP header longer than 255 bytes"))?;
        wb.push_context("COTPPacket");
        wb.write_u8("headerLength", header_length)?;
        wb.write_u8("tpduCode", self.kind.tpdu_code())?;
        self.kind.serialize(wb)?;
        write_array(wb, "parameters", &self.parameters)?;
        if let Some(payload) = &self.payload {
            payload.serialize(wb)?;
        }
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        8 + 8
            + self.kind.length_in_bits()
            + array_length_in_bits(&self.parameters)
            + self.payload.as_ref().map_or(0, Message::length_in_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_packet_header() {
        let packet = CotpPacket::new(CotpPacketKind::Data { eot: true, tpdu_ref: 1 }, vec![], None);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x02, 0xF0, 0x81]);
        assert_eq!(CotpPacket::from_bytes(&bytes, 3).unwrap(), packet);
    }

    #[test]
    fn test_connection_response_with_parameters() {
        let bytes = hex::decode("11d00001000f00c0010ac1020100c2020102").unwrap();
        let packet = CotpPacket::from_bytes(&bytes, bytes.len() as u16).unwrap();
        assert_eq!(
            packet.kind,
            CotpPacketKind::ConnectionResponse {
                destination_reference: 0x0001,
                source_reference: 0x000F,
                protocol_class: CotpProtocolClass::Class0,
            }
        );
        let tpdu = packet.parameter(|p| match p {
            CotpParameter::TpduSize(size) => Some(*size),
            _ => None,
        });
        assert_eq!(tpdu, Some(CotpTpduSize::Size1024));
        assert_eq!(packet.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_disconnect_information_uses_declared_length() {
        let bytes = hex::decode("0ac000010002e003aabbcc").unwrap();
        let packet = CotpPacket::from_bytes(&bytes, bytes.len() as u16).unwrap();
        assert_eq!(
            packet.parameters,
            vec![CotpParameter::DisconnectAdditionalInformation(vec![0xAA, 0xBB, 0xCC])]
        );
        assert_eq!(packet.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_tpdu_error() {
        let bytes = hex::decode("04700001 02".replace(' ', "")).unwrap();
        let packet = CotpPacket::from_bytes(&bytes, 5).unwrap();
        assert_eq!(
            packet.kind,
            CotpPacketKind::TpduError {
                destination_reference: 1,
                reject_cause: 2,
            }
        );
    }

    #[test]
    fn test_unknown_tpdu_code() {
        let err = CotpPacket::from_bytes(&[0x02, 0x10, 0x00], 3).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedDiscriminator { ref value, position: 16, .. } if value == "0x10"));
    }

    #[test]
    fn test_unknown_parameter_type() {
        let err = CotpPacket::from_bytes(&hex::decode("09e000000001000b0100").unwrap(), 10).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedDiscriminator { position: 72, .. }), "{}", err);
    }
}
