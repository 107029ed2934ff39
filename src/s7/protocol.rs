//! Building S7 request frames and decoding their responses.
//!
//! Each function produces or consumes exactly one frame. Connection
//! sequencing, retries and tpdu reference allocation are left to the caller.
//!
//! # Example
//!
//! ```
//! use plc_wire::field::Message;
//! use plc_wire::s7::{self, S7ConnectionConfig, S7Tag};
//!
//! let config = S7ConnectionConfig::new(0, 1);
//! let connect = s7::connection_request(&config).to_bytes().unwrap();
//! assert_eq!(connect[5], 0xE0);
//!
//! let tag: S7Tag = "%DB1.DBW0:INT".parse().unwrap();
//! let read = s7::read_var_request(1, &[tag]).unwrap();
//! assert_eq!(read.to_bytes().unwrap().len(), 31);
//! ```

use crate::error::{CodecError, Result};
use crate::plc_value::PlcValue;
use crate::request::PlcResponseCode;

use super::cotp::{CotpPacket, CotpPacketKind, CotpParameter};
use super::data_item::{decode_value, encode_value};
use super::message::{
    S7Address, S7Message, S7MessageKind, S7Parameter, S7Payload, S7VarPayloadDataItem, S7VarRequestParameterItem,
};
use super::tag::S7Tag;
use super::tpkt::TpktPacket;
use super::types::{CotpProtocolClass, CotpTpduSize, DataTransportErrorCode, DataTransportSize};

/// TSAP device group of a programming device or PC.
pub const DEVICE_GROUP_PG_OR_PC: u8 = 0x01;
/// TSAP device group of an operator station.
pub const DEVICE_GROUP_OS: u8 = 0x02;

/// Error class and code a CPU answers with when PUT/GET access is disabled.
const ACCESS_DENIED_ERROR: (u8, u8) = (0x81, 0x04);

/// Encodes a transport service access point from device group, rack and slot.
///
/// # Example
///
/// ```
/// use plc_wire::s7::{encode_tsap, DEVICE_GROUP_OS};
///
/// assert_eq!(encode_tsap(DEVICE_GROUP_OS, 0, 2), 0x0202);
/// ```
pub fn encode_tsap(device_group: u8, rack: u8, slot: u8) -> u16 {
    (u16::from(device_group) << 8) | (u16::from(rack & 0x0F) << 4) | u16::from(slot & 0x0F)
}

/// Parameters of the ISO-on-TCP connection and S7 communication setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7ConnectionConfig {
    /// Rack of the local station.
    pub local_rack: u8,
    /// Slot of the local station.
    pub local_slot: u8,
    /// Rack of the CPU.
    pub remote_rack: u8,
    /// Slot of the CPU.
    pub remote_slot: u8,
    /// Requested PDU size in bytes.
    pub pdu_size: u16,
    /// Parallel jobs accepted as caller.
    pub max_amq_caller: u16,
    /// Parallel jobs accepted as callee.
    pub max_amq_callee: u16,
}

impl S7ConnectionConfig {
    /// Creates a configuration for the CPU in `remote_rack`/`remote_slot`.
    ///
    /// Defaults: local rack 1 slot 1, PDU size 1024, 8 parallel jobs each way.
    pub fn new(remote_rack: u8, remote_slot: u8) -> Self {
        Self {
            local_rack: 1,
            local_slot: 1,
            remote_rack,
            remote_slot,
            pdu_size: 1024,
            max_amq_caller: 8,
            max_amq_callee: 8,
        }
    }

    /// Sets the local rack and slot.
    pub fn with_local(mut self, rack: u8, slot: u8) -> Self {
        self.local_rack = rack;
        self.local_slot = slot;
        self
    }

    /// Sets the requested PDU size.
    pub fn with_pdu_size(mut self, pdu_size: u16) -> Self {
        self.pdu_size = pdu_size;
        self
    }

    /// Sets the parallel job limits.
    pub fn with_max_amq(mut self, caller: u16, callee: u16) -> Self {
        self.max_amq_caller = caller;
        self.max_amq_callee = callee;
        self
    }

    /// Calling (local) TSAP.
    pub fn calling_tsap(&self) -> u16 {
        encode_tsap(DEVICE_GROUP_PG_OR_PC, self.local_rack, self.local_slot)
    }

    /// Called (remote) TSAP.
    pub fn called_tsap(&self) -> u16 {
        encode_tsap(DEVICE_GROUP_OS, self.remote_rack, self.remote_slot)
    }
}

/// Wraps an S7 message into a COTP data packet inside a TPKT frame.
pub fn frame(message: S7Message) -> TpktPacket {
    TpktPacket::new(CotpPacket::new(
        CotpPacketKind::Data { eot: true, tpdu_ref: 1 },
        vec![],
        Some(message),
    ))
}

/// Extracts the S7 message carried by a frame.
pub fn message_of(packet: &TpktPacket) -> Result<&S7Message> {
    packet
        .payload
        .payload
        .as_ref()
        .ok_or_else(|| CodecError::invalid_frame("COTPPacket", "no S7 message in the packet"))
}

/// COTP connection request frame.
pub fn connection_request(config: &S7ConnectionConfig) -> TpktPacket {
    TpktPacket::new(CotpPacket::new(
        CotpPacketKind::ConnectionRequest {
            destination_reference: 0x0000,
            source_reference: 0x000F,
            protocol_class: CotpProtocolClass::Class0,
        },
        vec![
            CotpParameter::CalledTsap(config.called_tsap()),
            CotpParameter::CallingTsap(config.calling_tsap()),
            CotpParameter::TpduSize(CotpTpduSize::for_size(config.pdu_size)),
        ],
        None,
    ))
}

/// S7 setup communication request frame.
pub fn setup_communication(config: &S7ConnectionConfig, tpdu_reference: u16) -> TpktPacket {
    frame(S7Message::request(
        tpdu_reference,
        S7Parameter::setup_communication(config.max_amq_caller, config.max_amq_callee, config.pdu_size),
        None,
    ))
}

/// Negotiated `(max_amq_caller, max_amq_callee, pdu_length)` from a setup response.
pub fn negotiated_parameters(message: &S7Message) -> Option<(u16, u16, u16)> {
    match message.parameter {
        Some(S7Parameter::SetupCommunication {
            max_amq_caller,
            max_amq_callee,
            pdu_length,
        }) => Some((max_amq_caller, max_amq_callee, pdu_length)),
        _ => None,
    }
}

fn request_items(tags: &[S7Tag]) -> Result<Vec<S7VarRequestParameterItem>> {
    tags.iter()
        .map(|tag| Ok(S7VarRequestParameterItem::Address(S7Address::Any(tag.to_address()?))))
        .collect()
}

/// Read variables request frame for `tags`.
pub fn read_var_request(tpdu_reference: u16, tags: &[S7Tag]) -> Result<TpktPacket> {
    let items = request_items(tags)?;
    log::debug!("S7 read request {} with {} items", tpdu_reference, items.len());
    Ok(frame(S7Message::request(
        tpdu_reference,
        S7Parameter::ReadVarRequest { items },
        None,
    )))
}

/// Write variables request frame for `(tag, value)` pairs.
pub fn write_var_request(tpdu_reference: u16, writes: &[(S7Tag, PlcValue)]) -> Result<TpktPacket> {
    let tags: Vec<S7Tag> = writes.iter().map(|(tag, _)| *tag).collect();
    let items = request_items(&tags)?;
    let data = writes
        .iter()
        .map(|(tag, value)| {
            let transport_size = tag
                .data_type
                .data_transport_size()
                .unwrap_or(DataTransportSize::OctetString);
            Ok(S7VarPayloadDataItem::new(
                DataTransportErrorCode::Ok,
                transport_size,
                encode_value(tag, value)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    log::debug!("S7 write request {} with {} items", tpdu_reference, items.len());
    Ok(frame(S7Message::request(
        tpdu_reference,
        S7Parameter::WriteVarRequest { items },
        Some(S7Payload::WriteVarRequest { items: data }),
    )))
}

/// Maps an item return code to a response code.
pub fn decode_response_code(code: DataTransportErrorCode) -> PlcResponseCode {
    match code {
        DataTransportErrorCode::Ok => PlcResponseCode::Ok,
        DataTransportErrorCode::NotFound => PlcResponseCode::NotFound,
        DataTransportErrorCode::InvalidAddress => PlcResponseCode::InvalidAddress,
        DataTransportErrorCode::DataTypeNotSupported => PlcResponseCode::InvalidDatatype,
        DataTransportErrorCode::AccessDenied => PlcResponseCode::AccessDenied,
        DataTransportErrorCode::Reserved => PlcResponseCode::InternalError,
    }
}

/// Response code applied to every item when the header reports an error.
fn header_error(message: &S7Message) -> Option<PlcResponseCode> {
    match message.kind.error() {
        Some((0, 0)) | None => None,
        Some(ACCESS_DENIED_ERROR) => {
            log::warn!("S7 access denied; PUT/GET communication may be disabled on the CPU");
            Some(PlcResponseCode::AccessDenied)
        }
        Some((class, code)) => {
            log::warn!("S7 response error class 0x{:02X} code 0x{:02X}", class, code);
            Some(PlcResponseCode::InternalError)
        }
    }
}

/// Decodes a read response into one `(code, value)` pair per requested tag.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` when the response is not a read
/// response or holds a different number of items than `tags`.
pub fn decode_read_response(message: &S7Message, tags: &[S7Tag]) -> Result<Vec<(PlcResponseCode, PlcValue)>> {
    if let Some(code) = header_error(message) {
        return Ok(tags.iter().map(|_| (code, PlcValue::Null)).collect());
    }
    if !matches!(message.kind, S7MessageKind::ResponseData { .. }) {
        return Err(CodecError::invalid_frame("S7Message", "expected a response with data"));
    }
    let items = match &message.payload {
        Some(S7Payload::ReadVarResponse { items }) => items,
        _ => return Err(CodecError::invalid_frame("S7Message", "response carries no read payload")),
    };
    if items.len() != tags.len() {
        return Err(CodecError::invalid_frame(
            "S7Message",
            format!("{} items requested but {} returned", tags.len(), items.len()),
        ));
    }
    Ok(tags
        .iter()
        .zip(items)
        .map(|(tag, item)| {
            let code = decode_response_code(item.return_code);
            if code != PlcResponseCode::Ok {
                return (code, PlcValue::Null);
            }
            match decode_value(tag, &item.data) {
                Ok(value) => (code, value),
                Err(e) => {
                    log::warn!("cannot decode {}: {}", tag, e);
                    (PlcResponseCode::InternalError, PlcValue::Null)
                }
            }
        })
        .collect())
}

/// Decodes a write response into one code per written item.
pub fn decode_write_response(message: &S7Message, count: usize) -> Result<Vec<PlcResponseCode>> {
    if let Some(code) = header_error(message) {
        return Ok(vec![code; count]);
    }
    let items = match &message.payload {
        Some(S7Payload::WriteVarResponse { items }) => items,
        _ => return Err(CodecError::invalid_frame("S7Message", "response carries no write payload")),
    };
    if items.len() != count {
        return Err(CodecError::invalid_frame(
            "S7Message",
            format!("{} items written but {} acknowledged", count, items.len()),
        ));
    }
    Ok(items.iter().map(|item| decode_response_code(item.return_code)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Message;

    fn tag(address: &str) -> S7Tag {
        address.parse().unwrap()
    }

    #[test]
    fn test_connection_request_bytes() {
        let config = S7ConnectionConfig::new(0, 2).with_pdu_size(1024);
        let bytes = connection_request(&config).to_bytes().unwrap();
        assert_eq!(hex::encode(bytes), "0300001611e00000000f00c2020202c1020111c0010a");
    }

    #[test]
    fn test_setup_communication_bytes() {
        let config = S7ConnectionConfig::new(0, 1).with_pdu_size(480);
        let bytes = setup_communication(&config, 0).to_bytes().unwrap();
        assert_eq!(hex::encode(bytes), "0300001902f08132010000000000080000f0000008000801e0");
    }

    #[test]
    fn test_negotiated_parameters() {
        let bytes = hex::decode("0300001b02f080320300000000000800000000f0000003000300f0").unwrap();
        let packet = TpktPacket::from_bytes(&bytes, ()).unwrap();
        let message = message_of(&packet).unwrap();
        assert_eq!(negotiated_parameters(message), Some((3, 3, 240)));
    }

    #[test]
    fn test_read_round_trip() {
        let tags = [tag("%DB1.DBW0:INT"), tag("%MB3:BYTE"), tag("%DB2.DBD4:REAL")];
        let request = read_var_request(7, &tags).unwrap();
        let parsed = TpktPacket::from_bytes(&request.to_bytes().unwrap(), ()).unwrap();
        assert_eq!(parsed, request);

        let response = S7Message::response_data(
            7,
            0,
            0,
            Some(S7Parameter::ReadVarResponse { num_items: 3 }),
            Some(S7Payload::ReadVarResponse {
                items: vec![
                    S7VarPayloadDataItem::new(DataTransportErrorCode::Ok, DataTransportSize::Integer, vec![0, 5]),
                    S7VarPayloadDataItem::new(DataTransportErrorCode::NotFound, DataTransportSize::Null, vec![]),
                    S7VarPayloadDataItem::new(DataTransportErrorCode::Ok, DataTransportSize::Real, vec![0x40, 0x20, 0, 0]),
                ],
            }),
        );
        let bytes = frame(response).to_bytes().unwrap();
        let packet = TpktPacket::from_bytes(&bytes, ()).unwrap();
        let values = decode_read_response(message_of(&packet).unwrap(), &tags).unwrap();
        assert_eq!(
            values,
            vec![
                (PlcResponseCode::Ok, PlcValue::Int(5)),
                (PlcResponseCode::NotFound, PlcValue::Null),
                (PlcResponseCode::Ok, PlcValue::Real(2.5)),
            ]
        );
    }

    #[test]
    fn test_access_denied_header() {
        let message = S7Message::response_data(1, 0x81, 0x04, None, None);
        let values = decode_read_response(&message, &[tag("%DB1.DBW0:INT")]).unwrap();
        assert_eq!(values, vec![(PlcResponseCode::AccessDenied, PlcValue::Null)]);
        assert_eq!(decode_write_response(&message, 2).unwrap(), vec![PlcResponseCode::AccessDenied; 2]);
    }

    #[test]
    fn test_item_count_mismatch() {
        let message = S7Message::response_data(
            1,
            0,
            0,
            Some(S7Parameter::ReadVarResponse { num_items: 0 }),
            None,
        );
        let err = decode_read_response(&message, &[tag("%DB1.DBW0:INT")]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrame { position: None, .. }), "{}", err);
    }

    #[test]
    fn test_write_request_payload() {
        let writes = [(tag("%DB1.DBX0.1:BOOL"), PlcValue::Bool(true)), (tag("%DB1.DBW2:INT"), PlcValue::Int(-1))];
        let packet = write_var_request(2, &writes).unwrap();
        let message = message_of(&packet).unwrap();
        match &message.payload {
            Some(S7Payload::WriteVarRequest { items }) => {
                assert_eq!(items[0].transport_size, DataTransportSize::Bit);
                assert_eq!(items[0].data, vec![0x01]);
                assert_eq!(items[1].transport_size, DataTransportSize::Integer);
                assert_eq!(items[1].data, vec![0xFF, 0xFF]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(TpktPacket::from_bytes(&bytes, ()).unwrap(), packet);
    }

    #[test]
    fn test_write_response_codes() {
        let bytes = hex::decode("0300001702f080 320300000002000200020000 0502 ff0a".replace(' ', "")).unwrap();
        assert_eq!(bytes.len(), 0x17);
        let packet = TpktPacket::from_bytes(&bytes, ()).unwrap();
        let codes = decode_write_response(message_of(&packet).unwrap(), 2).unwrap();
        assert_eq!(codes, vec![PlcResponseCode::Ok, PlcResponseCode::NotFound]);
    }
}
