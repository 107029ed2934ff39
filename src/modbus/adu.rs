//! Modbus application data units: the PDU plus transport framing.
//!
//! | Variant | Header | Trailer |
//! |---------|--------|---------|
//! | TCP | transaction id, protocol id (0), length, unit id | - |
//! | RTU | server address | CRC-16/MODBUS, little-endian |
//! | ASCII | server address | LRC, then hex-encoded between `:` and CRLF |
//!
//! Checksums are recomputed on write. On read a mismatch is logged and
//! tolerated unless [`CodecOptions::validate_checksums`](crate::CodecOptions)
//! is set.

use once_cell::sync::Lazy;

use crate::buffer::{ByteOrder, ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::field::{read_checksum, read_const, write_const, Message};

use super::pdu::ModbusPdu;

/// MBAP header size in bytes, unit identifier included.
pub const MBAP_HEADER_SIZE: usize = 7;

/// Protocol identifier carried in every MBAP header.
pub const MODBUS_PROTOCOL_ID: u16 = 0x0000;

/// Default Modbus/TCP port.
pub const MODBUS_TCP_PORT: u16 = 502;

static CRC_TABLE: Lazy<[u16; 256]> = Lazy::new(|| {
    let mut table = [0u16; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = i as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
        *entry = crc;
    }
    table
});

/// CRC-16/MODBUS (reflected polynomial 0xA001, initial value 0xFFFF).
///
/// # Example
///
/// ```
/// use plc_wire::modbus::crc16;
///
/// assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    data.iter()
        .fold(0xFFFF_u16, |crc, byte| (crc >> 8) ^ CRC_TABLE[usize::from((crc as u8) ^ byte)])
}

/// Longitudinal redundancy check: two's complement of the byte sum.
///
/// # Example
///
/// ```
/// use plc_wire::modbus::lrc;
///
/// assert_eq!(lrc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xF2);
/// ```
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte)).wrapping_neg()
}

fn checked_bytes(address: u8, pdu: &ModbusPdu) -> Result<Vec<u8>> {
    let mut wb = WriteBuffer::with_capacity(1 + pdu.length_in_bytes());
    wb.write_u8("address", address)?;
    pdu.serialize(&mut wb)?;
    Ok(wb.into_bytes())
}

/// Modbus/TCP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusTcpAdu {
    /// Echoed by the server to pair responses with requests.
    pub transaction_identifier: u16,
    /// Addressed unit behind a gateway; usually 0 or 0xFF.
    pub unit_identifier: u8,
    /// Carried PDU.
    pub pdu: ModbusPdu,
}

impl ModbusTcpAdu {
    /// Wraps a PDU.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::field::Message;
    /// use plc_wire::modbus::{ModbusPdu, ModbusTcpAdu};
    ///
    /// let adu = ModbusTcpAdu::new(1, 0xFF, ModbusPdu::ReadHoldingRegistersRequest {
    ///     starting_address: 0,
    ///     quantity: 2,
    /// });
    /// assert_eq!(adu.to_bytes().unwrap(), [0, 1, 0, 0, 0, 6, 0xFF, 3, 0, 0, 0, 2]);
    /// ```
    pub fn new(transaction_identifier: u16, unit_identifier: u8, pdu: ModbusPdu) -> Self {
        Self {
            transaction_identifier,
            unit_identifier,
            pdu,
        }
    }
}

impl Message for ModbusTcpAdu {
    /// Whether the PDU is a response.
    type Args = bool;

    fn parse(rb: &mut ReadBuffer<'_>, response: bool) -> Result<Self> {
        rb.push_context("ModbusTcpADU");
        let transaction_identifier = rb.read_u16("transactionIdentifier")?;
        read_const(rb, "protocolIdentifier", 16, u64::from(MODBUS_PROTOCOL_ID))?;
        let length_position = rb.position();
        let length = rb.read_u16("length")?;
        if length < 2 {
            return Err(CodecError::invalid_frame_at(
                "length",
                length_position,
                format!("MBAP length {} leaves no room for a PDU", length),
            ));
        }
        let unit_identifier = rb.read_u8("unitIdentifier")?;
        let start = rb.position_bytes();
        let pdu = ModbusPdu::parse(rb, response)?;
        let consumed = rb.position_bytes() - start;
        if consumed != usize::from(length) - 1 {
            return Err(CodecError::invalid_frame_at(
                "pdu",
                start as u64 * 8,
                format!("MBAP length announces {} PDU bytes but {} were decoded", length - 1, consumed),
            ));
        }
        rb.pop_context();
        log::debug!(
            "Modbus/TCP transaction {} unit {} function 0x{:02X}",
            transaction_identifier,
            unit_identifier,
            pdu.function_code()
        );
        Ok(Self {
            transaction_identifier,
            unit_identifier,
            pdu,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let length = self.pdu.length_in_bytes() + 1;
        let length = u16::try_from(length)
            .map_err(|_| CodecError::encoding("length", format!("{} bytes exceed the MBAP length field", length)))?;
        wb.push_context("ModbusTcpADU");
        wb.write_u16("transactionIdentifier", self.transaction_identifier)?;
        write_const(wb, "protocolIdentifier", 16, u64::from(MODBUS_PROTOCOL_ID))?;
        wb.write_u16("length", length)?;
        wb.write_u8("unitIdentifier", self.unit_identifier)?;
        self.pdu.serialize(wb)?;
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        MBAP_HEADER_SIZE as u64 * 8 + self.pdu.length_in_bits()
    }
}

/// Modbus RTU frame for serial lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRtuAdu {
    /// Server address, 0 for broadcast.
    pub address: u8,
    /// Carried PDU.
    pub pdu: ModbusPdu,
}

impl ModbusRtuAdu {
    /// Wraps a PDU.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::field::Message;
    /// use plc_wire::modbus::{ModbusPdu, ModbusRtuAdu};
    ///
    /// let adu = ModbusRtuAdu::new(1, ModbusPdu::ReadHoldingRegistersRequest {
    ///     starting_address: 0,
    ///     quantity: 10,
    /// });
    /// assert_eq!(adu.to_bytes().unwrap(), [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]);
    /// ```
    pub fn new(address: u8, pdu: ModbusPdu) -> Self {
        Self { address, pdu }
    }
}

impl Message for ModbusRtuAdu {
    /// Whether the PDU is a response.
    type Args = bool;

    fn parse(rb: &mut ReadBuffer<'_>, response: bool) -> Result<Self> {
        rb.push_context("ModbusRtuADU");
        let address = rb.read_u8("address")?;
        let pdu = ModbusPdu::parse(rb, response)?;
        let computed = crc16(&checked_bytes(address, &pdu)?);
        read_checksum(rb, "crc", 16, ByteOrder::LittleEndian, u64::from(computed))?;
        rb.pop_context();
        Ok(Self { address, pdu })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let crc = crc16(&checked_bytes(self.address, &self.pdu)?);
        wb.push_context("ModbusRtuADU");
        wb.write_u8("address", self.address)?;
        self.pdu.serialize(wb)?;
        wb.write_unsigned_ordered("crc", 16, u64::from(crc), ByteOrder::LittleEndian)?;
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        8 + self.pdu.length_in_bits() + 16
    }
}

/// Modbus ASCII frame, in its binary form.
///
/// [`to_ascii`](Self::to_ascii) and [`from_ascii`](Self::from_ascii) add and
/// remove the textual line framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusAsciiAdu {
    /// Server address, 0 for broadcast.
    pub address: u8,
    /// Carried PDU.
    pub pdu: ModbusPdu,
}

impl ModbusAsciiAdu {
    /// Wraps a PDU.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::modbus::{ModbusAsciiAdu, ModbusPdu};
    ///
    /// let adu = ModbusAsciiAdu::new(1, ModbusPdu::ReadHoldingRegistersRequest {
    ///     starting_address: 0,
    ///     quantity: 10,
    /// });
    /// assert_eq!(adu.to_ascii().unwrap(), b":01030000000AF2\r\n");
    /// ```
    pub fn new(address: u8, pdu: ModbusPdu) -> Self {
        Self { address, pdu }
    }

    /// Serializes and wraps the result in `:` ... CRLF.
    pub fn to_ascii(&self) -> Result<Vec<u8>> {
        Ok(encode_ascii_frame(&self.to_bytes()?))
    }

    /// Unwraps a textual frame and parses it.
    pub fn from_ascii(frame: &[u8], response: bool) -> Result<Self> {
        Self::from_bytes(&decode_ascii_frame(frame)?, response)
    }
}

impl Message for ModbusAsciiAdu {
    /// Whether the PDU is a response.
    type Args = bool;

    fn parse(rb: &mut ReadBuffer<'_>, response: bool) -> Result<Self> {
        rb.push_context("ModbusAsciiADU");
        let address = rb.read_u8("address")?;
        let pdu = ModbusPdu::parse(rb, response)?;
        let computed = lrc(&checked_bytes(address, &pdu)?);
        read_checksum(rb, "lrc", 8, ByteOrder::BigEndian, u64::from(computed))?;
        rb.pop_context();
        Ok(Self { address, pdu })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let lrc = lrc(&checked_bytes(self.address, &self.pdu)?);
        wb.push_context("ModbusAsciiADU");
        wb.write_u8("address", self.address)?;
        self.pdu.serialize(wb)?;
        wb.write_u8("lrc", lrc)?;
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        8 + self.pdu.length_in_bits() + 8
    }
}

/// Hex-encodes a binary ASCII-mode frame between `:` and CRLF.
pub fn encode_ascii_frame(binary: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(binary.len() * 2 + 3);
    frame.push(b':');
    frame.extend_from_slice(hex::encode_upper(binary).as_bytes());
    frame.extend_from_slice(b"\r\n");
    frame
}

/// Strips `:` and CRLF from a textual frame and hex-decodes the rest.
pub fn decode_ascii_frame(frame: &[u8]) -> Result<Vec<u8>> {
    let body = frame
        .strip_prefix(b":")
        .ok_or_else(|| CodecError::invalid_frame_at("ModbusAsciiADU", 0, "frame does not start with ':'"))?;
    let body = body.strip_suffix(b"\r\n").ok_or_else(|| {
        CodecError::invalid_frame_at("ModbusAsciiADU", frame.len() as u64 * 8, "frame does not end with CRLF")
    })?;
    hex::decode(body).map_err(|e| CodecError::invalid_frame_at("ModbusAsciiADU", 8, format!("frame body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CodecOptions;

    fn read_request() -> ModbusPdu {
        ModbusPdu::ReadHoldingRegistersRequest {
            starting_address: 0,
            quantity: 10,
        }
    }

    #[test]
    fn test_tcp_round_trip() {
        let bytes = hex::decode("000100000006ff0300000002").unwrap();
        let adu = ModbusTcpAdu::from_bytes(&bytes, false).unwrap();
        assert_eq!(adu.transaction_identifier, 1);
        assert_eq!(adu.unit_identifier, 0xFF);
        assert_eq!(adu.to_bytes().unwrap(), bytes);
        assert_eq!(adu.length_in_bytes(), bytes.len());
    }

    #[test]
    fn test_tcp_response() {
        let bytes = hex::decode("00010000000701030400010002").unwrap();
        let adu = ModbusTcpAdu::from_bytes(&bytes, true).unwrap();
        assert_eq!(
            adu.pdu,
            ModbusPdu::ReadHoldingRegistersResponse {
                value: vec![0, 1, 0, 2]
            }
        );
    }

    #[test]
    fn test_tcp_length_mismatch() {
        let bytes = hex::decode("000100000009ff0300000002").unwrap();
        let err = ModbusTcpAdu::from_bytes(&bytes, false).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame { position: Some(56), .. }), "{}", err);

        let bytes = hex::decode("000100000001ff").unwrap();
        let err = ModbusTcpAdu::from_bytes(&bytes, false).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidFrame { ref context, position: Some(32), .. } if context == "length"),
            "{}",
            err
        );
    }

    #[test]
    fn test_tcp_wrong_protocol_id() {
        let bytes = hex::decode("000100010006ff0300000002").unwrap();
        assert!(matches!(
            ModbusTcpAdu::from_bytes(&bytes, false),
            Err(CodecError::ConstValueMismatch { .. })
        ));
    }

    #[test]
    fn test_crc_table() {
        assert_eq!(crc16(&[]), 0xFFFF);
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_rtu_round_trip() {
        let bytes = hex::decode("01030000000AC5CD").unwrap();
        let adu = ModbusRtuAdu::from_bytes(&bytes, false).unwrap();
        assert_eq!(adu, ModbusRtuAdu::new(1, read_request()));
        assert_eq!(adu.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_rtu_bad_crc_is_tolerated_by_default() {
        let bytes = hex::decode("01030000000A0000").unwrap();
        let mut rb = ReadBuffer::new(&bytes);
        let adu = ModbusRtuAdu::parse(&mut rb, false).unwrap();
        assert_eq!(adu.pdu, read_request());
        assert_eq!(rb.warnings().len(), 1);

        let options = CodecOptions::new().with_checksum_validation(true);
        let err = ModbusRtuAdu::from_bytes_with(&bytes, false, options).unwrap_err();
        assert!(matches!(
            err,
            CodecError::ChecksumMismatch {
                position: 48,
                expected: 0xCDC5,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_ascii_round_trip() {
        let frame = b":01030000000AF2\r\n";
        let adu = ModbusAsciiAdu::from_ascii(frame, false).unwrap();
        assert_eq!(adu, ModbusAsciiAdu::new(1, read_request()));
        assert_eq!(adu.to_ascii().unwrap(), frame.to_vec());
        assert_eq!(adu.length_in_bytes(), 7);
    }

    #[test]
    fn test_ascii_framing_errors() {
        assert!(matches!(
            decode_ascii_frame(b"01030000000AF2\r\n"),
            Err(CodecError::InvalidFrame { position: Some(0), .. })
        ));
        assert!(decode_ascii_frame(b":01030000000AF2").is_err());
        assert!(decode_ascii_frame(b":0103ZZ\r\n").is_err());
        assert_eq!(decode_ascii_frame(b":01ff\r\n").unwrap(), vec![0x01, 0xFF]);
    }
}
