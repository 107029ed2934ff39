//! S7 communication messages: header, parameters and payloads.
//!
//! # S7 Header Structure
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0 | protocolId | Always 0x32 |
//! | 1 | messageType | 0x01 request, 0x02 response, 0x03 response data, 0x07 user data |
//! | 2-3 | reserved | 0x0000 |
//! | 4-5 | tpduReference | Correlates responses with requests |
//! | 6-7 | parameterLength | Length of the parameter block |
//! | 8-9 | payloadLength | Length of the payload block |
//! | 10-11 | errorClass, errorCode | Responses only |
//!
//! The parameter block is selected by `(parameterType, messageType)` and the
//! payload block by the parameter it follows.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::field::{
    array_length_in_bits, read_bounded, read_const, read_count_array, read_enum, read_optional, read_padding,
    read_reserved, write_array, write_const, write_padding, write_reserved, Message,
};

use super::types::{DataTransportErrorCode, DataTransportSize, MemoryArea, TransportSize};

/// S7 protocol identifier.
pub const S7_PROTOCOL_ID: u8 = 0x32;

const PARAMETER_ITEM_TYPE: u8 = 0x12;
const ADDRESS_TYPE_ANY: u8 = 0x10;

fn to_u16(field: &str, bits: u64) -> Result<u16> {
    let bytes = bits.div_ceil(8);
    u16::try_from(bytes).map_err(|_| CodecError::encoding(field, format!("{} bytes exceed a 16-bit length", bytes)))
}

fn to_u8(field: &str, value: usize) -> Result<u8> {
    u8::try_from(value).map_err(|_| CodecError::encoding(field, format!("{} exceeds an 8-bit count", value)))
}

/// Message type of an S7 header, with the fields that only some types carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7MessageKind {
    /// Job request.
    Request,
    /// Acknowledgement without data.
    Response {
        /// Error class, 0 on success.
        error_class: u8,
        /// Error code, 0 on success.
        error_code: u8,
    },
    /// Acknowledgement with data.
    ResponseData {
        /// Error class, 0 on success.
        error_class: u8,
        /// Error code, 0 on success.
        error_code: u8,
    },
    /// User data (CPU functions, cyclic data, alarms).
    UserData,
}

impl S7MessageKind {
    /// Wire message type.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Request => 0x01,
            Self::Response { .. } => 0x02,
            Self::ResponseData { .. } => 0x03,
            Self::UserData => 0x07,
        }
    }

    /// `(error_class, error_code)` for acknowledgements.
    pub fn error(&self) -> Option<(u8, u8)> {
        match *self {
            Self::Response { error_class, error_code } | Self::ResponseData { error_class, error_code } => {
                Some((error_class, error_code))
            }
            _ => None,
        }
    }
}

/// One S7 PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct S7Message {
    /// Request/response correlation number.
    pub tpdu_reference: u16,
    /// Message type.
    pub kind: S7MessageKind,
    /// Parameter block.
    pub parameter: Option<S7Parameter>,
    /// Payload block.
    pub payload: Option<S7Payload>,
}

impl S7Message {
    /// Creates a job request.
    ///
    /// # Example
    ///
    /// ```
    /// use plc_wire::field::Message;
    /// use plc_wire::s7::{S7Message, S7Parameter};
    ///
    /// let setup = S7Message::request(0, S7Parameter::setup_communication(8, 8, 480), None);
    /// let bytes = setup.to_bytes().unwrap();
    /// assert_eq!(bytes.len(), 18);
    /// assert_eq!(bytes[0], 0x32);
    /// ```
    pub fn request(tpdu_reference: u16, parameter: S7Parameter, payload: Option<S7Payload>) -> Self {
        Self {
            tpdu_reference,
            kind: S7MessageKind::Request,
            parameter: Some(parameter),
            payload,
        }
    }

    /// Creates an acknowledgement with data.
    pub fn response_data(
        tpdu_reference: u16,
        error_class: u8,
        error_code: u8,
        parameter: Option<S7Parameter>,
        payload: Option<S7Payload>,
    ) -> Self {
        Self {
            tpdu_reference,
            kind: S7MessageKind::ResponseData { error_class, error_code },
            parameter,
            payload,
        }
    }
}

impl Message for S7Message {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("S7Message");
        read_const(rb, "protocolId", 8, u64::from(S7_PROTOCOL_ID))?;
        let message_type = rb.read_u8("messageType")?;
        read_reserved(rb, "reserved", 16, 0x0000)?;
        let tpdu_reference = rb.read_u16("tpduReference")?;
        let parameter_length = rb.read_u16("parameterLength")?;
        let payload_length = rb.read_u16("payloadLength")?;
        let kind = match message_type {
            0x01 => S7MessageKind::Request,
            0x02 => S7MessageKind::Response {
                error_class: rb.read_u8("errorClass")?,
                error_code: rb.read_u8("errorCode")?,
            },
            0x03 => S7MessageKind::ResponseData {
                error_class: rb.read_u8("errorClass")?,
                error_code: rb.read_u8("errorCode")?,
            },
            0x07 => S7MessageKind::UserData,
            other => {
                return Err(CodecError::unsupported_discriminator(
                    "S7Message",
                    format!("0x{:02X}", other),
                    rb.position(),
                ))
            }
        };
        log::debug!(
            "S7 message type 0x{:02X}, tpdu {}, parameter {} bytes, payload {} bytes",
            message_type,
            tpdu_reference,
            parameter_length,
            payload_length
        );

        let parameter = read_optional(rb, parameter_length > 0, |rb| {
            read_bounded(rb, "parameter", usize::from(parameter_length), |rb| S7Parameter::parse(rb, message_type))
        })?;
        let payload = match (&parameter, payload_length > 0) {
            (Some(parameter), true) => {
                let args = S7PayloadArgs::for_parameter(message_type, parameter);
                Some(read_bounded(rb, "payload", usize::from(payload_length), |rb| S7Payload::parse(rb, args))?)
            }
            (None, true) => {
                return Err(CodecError::invalid_frame_at(
                    "payload",
                    rb.position(),
                    "payload present without a parameter block to interpret it",
                ))
            }
            (_, false) => None,
        };
        rb.pop_context();
        Ok(Self {
            tpdu_reference,
            kind,
            parameter,
            payload,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let parameter_length = to_u16(
            "parameterLength",
            self.parameter.as_ref().map_or(0, Message::length_in_bits),
        )?;
        let payload_length = to_u16("payloadLength", self.payload.as_ref().map_or(0, Message::length_in_bits))?;
        wb.push_context("S7Message");
        write_const(wb, "protocolId", 8, u64::from(S7_PROTOCOL_ID))?;
        wb.write_u8("messageType", self.kind.message_type())?;
        write_reserved(wb, "reserved", 16, 0x0000)?;
        wb.write_u16("tpduReference", self.tpdu_reference)?;
        wb.write_u16("parameterLength", parameter_length)?;
        wb.write_u16("payloadLength", payload_length)?;
        if let Some((error_class, error_code)) = self.kind.error() {
            wb.write_u8("errorClass", error_class)?;
            wb.write_u8("errorCode", error_code)?;
        }
        if let Some(parameter) = &self.parameter {
            parameter.serialize(wb)?;
        }
        if let Some(payload) = &self.payload {
            payload.serialize(wb)?;
        }
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        let header = if self.kind.error().is_some() { 12 } else { 10 };
        header * 8
            + self.parameter.as_ref().map_or(0, Message::length_in_bits)
            + self.payload.as_ref().map_or(0, Message::length_in_bits)
    }
}

/// Parameter block of an S7 message.
#[derive(Debug, Clone, PartialEq)]
pub enum S7Parameter {
    /// Negotiates job queue depths and the PDU size.
    SetupCommunication {
        /// Parallel jobs the caller accepts.
        max_amq_caller: u16,
        /// Parallel jobs the callee accepts.
        max_amq_callee: u16,
        /// Maximum PDU length.
        pdu_length: u16,
    },
    /// Read variables request.
    ReadVarRequest {
        /// Addresses to read.
        items: Vec<S7VarRequestParameterItem>,
    },
    /// Read variables response.
    ReadVarResponse {
        /// Number of data items in the payload.
        num_items: u8,
    },
    /// Write variables request.
    WriteVarRequest {
        /// Addresses to write.
        items: Vec<S7VarRequestParameterItem>,
    },
    /// Write variables response.
    WriteVarResponse {
        /// Number of status items in the payload.
        num_items: u8,
    },
    /// User data request or response.
    UserData {
        /// CPU function items.
        items: Vec<S7ParameterUserDataItem>,
    },
}

impl S7Parameter {
    /// Setup communication parameter.
    pub fn setup_communication(max_amq_caller: u16, max_amq_callee: u16, pdu_length: u16) -> Self {
        Self::SetupCommunication {
            max_amq_caller,
            max_amq_callee,
            pdu_length,
        }
    }

    /// Wire parameter type.
    pub fn parameter_type(&self) -> u8 {
        match self {
            Self::SetupCommunication { .. } => 0xF0,
            Self::ReadVarRequest { .. } | Self::ReadVarResponse { .. } => 0x04,
            Self::WriteVarRequest { .. } | Self::WriteVarResponse { .. } => 0x05,
            Self::UserData { .. } => 0x00,
        }
    }

    /// Number of items the following payload holds.
    pub fn item_count(&self) -> usize {
        match self {
            Self::SetupCommunication { .. } => 0,
            Self::ReadVarRequest { items } | Self::WriteVarRequest { items } => items.len(),
            Self::ReadVarResponse { num_items } | Self::WriteVarResponse { num_items } => usize::from(*num_items),
            Self::UserData { items } => items.len(),
        }
    }
}

impl Message for S7Parameter {
    /// Message type of the enclosing header.
    type Args = u8;

    fn parse(rb: &mut ReadBuffer<'_>, message_type: u8) -> Result<Self> {
        rb.push_context("S7Parameter");
        let parameter_type = rb.read_u8("parameterType")?;
        let parameter = match (parameter_type, message_type) {
            (0xF0, _) => {
                read_reserved(rb, "reserved", 8, 0x00)?;
                Self::SetupCommunication {
                    max_amq_caller: rb.read_u16("maxAmqCaller")?,
                    max_amq_callee: rb.read_u16("maxAmqCallee")?,
                    pdu_length: rb.read_u16("pduLength")?,
                }
            }
            (0x04, 0x01) => Self::ReadVarRequest {
                items: read_request_items(rb)?,
            },
            (0x04, 0x03) => Self::ReadVarResponse {
                num_items: rb.read_u8("numItems")?,
            },
            (0x05, 0x01) => Self::WriteVarRequest {
                items: read_request_items(rb)?,
            },
            (0x05, 0x03) => Self::WriteVarResponse {
                num_items: rb.read_u8("numItems")?,
            },
            (0x00, 0x07) => {
                let num_items = rb.read_u8("numItems")?;
                let items = read_count_array(rb, "items", usize::from(num_items), |rb, _| {
                    S7ParameterUserDataItem::parse(rb, ())
                })?;
                Self::UserData { items }
            }
            (pt, mt) => {
                return Err(CodecError::unsupported_discriminator(
                    "S7Parameter",
                    format!("(0x{:02X}, 0x{:02X})", pt, mt),
                    rb.position(),
                ))
            }
        };
        rb.pop_context();
        Ok(parameter)
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.push_context("S7Parameter");
        wb.write_u8("parameterType", self.parameter_type())?;
        match self {
            Self::SetupCommunication {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            } => {
                write_reserved(wb, "reserved", 8, 0x00)?;
                wb.write_u16("maxAmqCaller", *max_amq_caller)?;
                wb.write_u16("maxAmqCallee", *max_amq_callee)?;
                wb.write_u16("pduLength", *pdu_length)?;
            }
            Self::ReadVarRequest { items } | Self::WriteVarRequest { items } => {
                wb.write_u8("numItems", to_u8("numItems", items.len())?)?;
                write_array(wb, "items", items)?;
            }
            Self::ReadVarResponse { num_items } | Self::WriteVarResponse { num_items } => {
                wb.write_u8("numItems", *num_items)?;
            }
            Self::UserData { items } => {
                wb.write_u8("numItems", to_u8("numItems", items.len())?)?;
                write_array(wb, "items", items)?;
            }
        }
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        let body = match self {
            Self::SetupCommunication { .. } => 7 * 8,
            Self::ReadVarRequest { items } | Self::WriteVarRequest { items } => 8 + array_length_in_bits(items),
            Self::ReadVarResponse { .. } | Self::WriteVarResponse { .. } => 8,
            Self::UserData { items } => 8 + array_length_in_bits(items),
        };
        8 + body
    }
}

fn read_request_items(rb: &mut ReadBuffer<'_>) -> Result<Vec<S7VarRequestParameterItem>> {
    let num_items = rb.read_u8("numItems")?;
    read_count_array(rb, "items", usize::from(num_items), |rb, _| {
        S7VarRequestParameterItem::parse(rb, ())
    })
}

/// One address in a read or write variables request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7VarRequestParameterItem {
    /// Variable specification (item type 0x12).
    Address(S7Address),
}

impl Message for S7VarRequestParameterItem {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("S7VarRequestParameterItem");
        let item_type = rb.read_u8("itemType")?;
        if item_type != PARAMETER_ITEM_TYPE {
            return Err(CodecError::unsupported_discriminator(
                "S7VarRequestParameterItem",
                format!("0x{:02X}", item_type),
                rb.position(),
            ));
        }
        let _item_length = rb.read_u8("itemLength")?;
        let address = S7Address::parse(rb, ())?;
        rb.pop_context();
        Ok(Self::Address(address))
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let Self::Address(address) = self;
        wb.write_u8("itemType", PARAMETER_ITEM_TYPE)?;
        wb.write_u8("itemLength", to_u8("itemLength", address.length_in_bytes())?)?;
        address.serialize(wb)
    }

    fn length_in_bits(&self) -> u64 {
        let Self::Address(address) = self;
        16 + address.length_in_bits()
    }
}

/// Syntax of an S7 variable address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7Address {
    /// S7-ANY pointer (syntax id 0x10).
    Any(S7AddressAny),
}

/// S7-ANY pointer: area, block, byte and bit offset, type and element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct S7AddressAny {
    /// Requested element type.
    pub transport_size: TransportSize,
    /// Number of elements.
    pub number_of_elements: u16,
    /// Data block number, 0 outside data blocks.
    pub db_number: u16,
    /// Memory area.
    pub area: MemoryArea,
    /// Byte offset, 21 bits.
    pub byte_address: u32,
    /// Bit offset, 0..=7.
    pub bit_address: u8,
}

/// Largest byte offset an S7-ANY pointer can hold.
pub const MAX_BYTE_ADDRESS: u32 = (1 << 21) - 1;

impl Message for S7Address {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("S7Address");
        let address_type = rb.read_u8("addressType")?;
        if address_type != ADDRESS_TYPE_ANY {
            return Err(CodecError::unsupported_discriminator(
                "S7Address",
                format!("0x{:02X}", address_type),
                rb.position(),
            ));
        }
        let transport_size = read_enum(rb, "transportSize", 8, "TransportSize", |v| {
            TransportSize::from_code(v as u8)
        })?;
        let number_of_elements = rb.read_u16("numberOfElements")?;
        let db_number = rb.read_u16("dbNumber")?;
        let area = read_enum(rb, "area", 8, "MemoryArea", |v| MemoryArea::from_code(v as u8))?;
        let byte_address = rb.read_unsigned("byteAddress", 21)? as u32;
        let bit_address = rb.read_unsigned("bitAddress", 3)? as u8;
        rb.pop_context();
        Ok(Self::Any(S7AddressAny {
            transport_size,
            number_of_elements,
            db_number,
            area,
            byte_address,
            bit_address,
        }))
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let Self::Any(any) = self;
        wb.write_u8("addressType", ADDRESS_TYPE_ANY)?;
        wb.write_u8("transportSize", any.transport_size.code())?;
        wb.write_u16("numberOfElements", any.number_of_elements)?;
        wb.write_u16("dbNumber", any.db_number)?;
        wb.write_u8("area", any.area.code())?;
        wb.write_unsigned("byteAddress", 21, u64::from(any.byte_address))?;
        wb.write_unsigned("bitAddress", 3, u64::from(any.bit_address))
    }

    fn length_in_bits(&self) -> u64 {
        10 * 8
    }
}

/// CPU function item of a user data parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7ParameterUserDataItem {
    /// 0x11 request, 0x12 response.
    pub method: u8,
    /// 4 = request, 8 = response (4 bits).
    pub cpu_function_type: u8,
    /// Function group (4 bits).
    pub cpu_function_group: u8,
    /// Subfunction within the group.
    pub cpu_subfunction: u8,
    /// Sequence number.
    pub sequence_number: u8,
    /// Data unit reference, responses only.
    pub data_unit_reference_number: Option<u8>,
    /// Last data unit flag, responses only.
    pub last_data_unit: Option<u8>,
    /// Error code, responses only.
    pub error_code: Option<u16>,
}

impl S7ParameterUserDataItem {
    /// CPU function request item.
    pub fn request(cpu_function_group: u8, cpu_subfunction: u8, sequence_number: u8) -> Self {
        Self {
            method: 0x11,
            cpu_function_type: 4,
            cpu_function_group,
            cpu_subfunction,
            sequence_number,
            data_unit_reference_number: None,
            last_data_unit: None,
            error_code: None,
        }
    }
}

impl Message for S7ParameterUserDataItem {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("S7ParameterUserDataItemCPUFunctions");
        let item_type = rb.read_u8("itemType")?;
        if item_type != PARAMETER_ITEM_TYPE {
            return Err(CodecError::unsupported_discriminator(
                "S7ParameterUserDataItem",
                format!("0x{:02X}", item_type),
                rb.position(),
            ));
        }
        let _item_length = rb.read_u8("itemLength")?;
        let method = rb.read_u8("method")?;
        let cpu_function_type = rb.read_unsigned("cpuFunctionType", 4)? as u8;
        let cpu_function_group = rb.read_unsigned("cpuFunctionGroup", 4)? as u8;
        let cpu_subfunction = rb.read_u8("cpuSubfunction")?;
        let sequence_number = rb.read_u8("sequenceNumber")?;
        let is_response = cpu_function_type == 8;
        let data_unit_reference_number = read_optional(rb, is_response, |rb| rb.read_u8("dataUnitReferenceNumber"))?;
        let last_data_unit = read_optional(rb, is_response, |rb| rb.read_u8("lastDataUnit"))?;
        let error_code = read_optional(rb, is_response, |rb| rb.read_u16("errorCode"))?;
        rb.pop_context();
        Ok(Self {
            method,
            cpu_function_type,
            cpu_function_group,
            cpu_subfunction,
            sequence_number,
            data_unit_reference_number,
            last_data_unit,
            error_code,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_u8("itemType", PARAMETER_ITEM_TYPE)?;
        wb.write_u8("itemLength", to_u8("itemLength", self.length_in_bytes() - 2)?)?;
        wb.write_u8("method", self.method)?;
        wb.write_unsigned("cpuFunctionType", 4, u64::from(self.cpu_function_type))?;
        wb.write_unsigned("cpuFunctionGroup", 4, u64::from(self.cpu_function_group))?;
        wb.write_u8("cpuSubfunction", self.cpu_subfunction)?;
        wb.write_u8("sequenceNumber", self.sequence_number)?;
        if let Some(v) = self.data_unit_reference_number {
            wb.write_u8("dataUnitReferenceNumber", v)?;
        }
        if let Some(v) = self.last_data_unit {
            wb.write_u8("lastDataUnit", v)?;
        }
        if let Some(v) = self.error_code {
            wb.write_u16("errorCode", v)?;
        }
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        let optional = self.data_unit_reference_number.map_or(0, |_| 8)
            + self.last_data_unit.map_or(0, |_| 8)
            + self.error_code.map_or(0, |_| 16);
        6 * 8 + optional
    }
}

/// Arguments needed to parse a payload block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7PayloadArgs {
    /// Message type of the enclosing header.
    pub message_type: u8,
    /// Type of the preceding parameter block.
    pub parameter_type: u8,
    /// Number of items announced by the parameter block.
    pub item_count: usize,
}

impl S7PayloadArgs {
    /// Derives the arguments from a parsed parameter block.
    pub fn for_parameter(message_type: u8, parameter: &S7Parameter) -> Self {
        Self {
            message_type,
            parameter_type: parameter.parameter_type(),
            item_count: parameter.item_count(),
        }
    }
}

/// Payload block of an S7 message.
#[derive(Debug, Clone, PartialEq)]
pub enum S7Payload {
    /// Values returned by a read.
    ReadVarResponse {
        /// One item per requested address.
        items: Vec<S7VarPayloadDataItem>,
    },
    /// Values to write.
    WriteVarRequest {
        /// One item per address.
        items: Vec<S7VarPayloadDataItem>,
    },
    /// Per-item write results.
    WriteVarResponse {
        /// One item per address.
        items: Vec<S7VarPayloadStatusItem>,
    },
    /// User data.
    UserData {
        /// Raw user data items.
        items: Vec<S7PayloadUserDataItem>,
    },
}

impl Message for S7Payload {
    type Args = S7PayloadArgs;

    fn parse(rb: &mut ReadBuffer<'_>, args: S7PayloadArgs) -> Result<Self> {
        rb.push_context("S7Payload");
        let payload = match (args.parameter_type, args.message_type) {
            (0x04, 0x03) => Self::ReadVarResponse {
                items: read_count_array(rb, "items", args.item_count, S7VarPayloadDataItem::parse)?,
            },
            (0x05, 0x01) => Self::WriteVarRequest {
                items: read_count_array(rb, "items", args.item_count, S7VarPayloadDataItem::parse)?,
            },
            (0x05, 0x03) => Self::WriteVarResponse {
                items: read_count_array(rb, "items", args.item_count, |rb, _| {
                    S7VarPayloadStatusItem::parse(rb, ())
                })?,
            },
            (0x00, 0x07) => Self::UserData {
                items: read_count_array(rb, "items", args.item_count, |rb, _| {
                    S7PayloadUserDataItem::parse(rb, ())
                })?,
            },
            (pt, mt) => {
                return Err(CodecError::unsupported_discriminator(
                    "S7Payload",
                    format!("(0x{:02X}, 0x{:02X})", pt, mt),
                    rb.position(),
                ))
            }
        };
        rb.pop_context();
        Ok(payload)
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.push_context("S7Payload");
        match self {
            Self::ReadVarResponse { items } | Self::WriteVarRequest { items } => {
                for (i, item) in items.iter().enumerate() {
                    item.serialize(wb, i + 1 == items.len())?;
                }
            }
            Self::WriteVarResponse { items } => write_array(wb, "items", items)?,
            Self::UserData { items } => write_array(wb, "items", items)?,
        }
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        match self {
            Self::ReadVarResponse { items } | Self::WriteVarRequest { items } => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.length_in_bits(i + 1 == items.len()))
                .sum(),
            Self::WriteVarResponse { items } => array_length_in_bits(items),
            Self::UserData { items } => array_length_in_bits(items),
        }
    }
}

/// One value in a read response or write request.
///
/// Items other than the last are padded to an even byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7VarPayloadDataItem {
    /// Item result; `Reserved` in write requests.
    pub return_code: DataTransportErrorCode,
    /// Unit of the length field.
    pub transport_size: DataTransportSize,
    /// Raw value bytes.
    pub data: Vec<u8>,
}

impl S7VarPayloadDataItem {
    /// Creates an item.
    pub fn new(return_code: DataTransportErrorCode, transport_size: DataTransportSize, data: Vec<u8>) -> Self {
        Self {
            return_code,
            transport_size,
            data,
        }
    }

    /// Parses an item; `last_item` suppresses the trailing pad byte.
    pub fn parse(rb: &mut ReadBuffer<'_>, last_item: bool) -> Result<Self> {
        rb.push_context("S7VarPayloadDataItem");
        let return_code = read_enum(rb, "returnCode", 8, "DataTransportErrorCode", |v| {
            DataTransportErrorCode::from_code(v as u8)
        })?;
        let transport_size = read_enum(rb, "transportSize", 8, "DataTransportSize", |v| {
            DataTransportSize::from_code(v as u8)
        })?;
        let data_length = usize::from(rb.read_u16("dataLength")?);
        let count = if transport_size.size_in_bits() {
            data_length.div_ceil(8)
        } else {
            data_length
        };
        let data = rb.read_bytes("data", count)?;
        if !last_item && data.len() % 2 == 1 {
            read_padding(rb, "pad", 8, 1)?;
        }
        rb.pop_context();
        Ok(Self {
            return_code,
            transport_size,
            data,
        })
    }

    /// Value of the length field.
    pub fn data_length(&self) -> usize {
        let unit = match self.transport_size {
            DataTransportSize::Bit => 1,
            size if size.size_in_bits() => 8,
            _ => 1,
        };
        self.data.len() * unit
    }

    /// Serializes the item; `last_item` suppresses the trailing pad byte.
    pub fn serialize(&self, wb: &mut WriteBuffer, last_item: bool) -> Result<()> {
        let data_length = u16::try_from(self.data_length())
            .map_err(|_| CodecError::encoding("dataLength", "item data exceeds a 16-bit length"))?;
        wb.write_u8("returnCode", self.return_code.code())?;
        wb.write_u8("transportSize", self.transport_size.code())?;
        wb.write_u16("dataLength", data_length)?;
        wb.write_bytes("data", &self.data)?;
        if !last_item && self.data.len() % 2 == 1 {
            write_padding(wb, "pad", 8, 0x00, 1)?;
        }
        Ok(())
    }

    /// Serialized size in bits.
    pub fn length_in_bits(&self, last_item: bool) -> u64 {
        let pad = u64::from(!last_item && self.data.len() % 2 == 1);
        (4 + self.data.len() as u64 + pad) * 8
    }
}

/// Result of one item in a write response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7VarPayloadStatusItem {
    /// Item result.
    pub return_code: DataTransportErrorCode,
}

impl Message for S7VarPayloadStatusItem {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        let return_code = read_enum(rb, "returnCode", 8, "DataTransportErrorCode", |v| {
            DataTransportErrorCode::from_code(v as u8)
        })?;
        Ok(Self { return_code })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_u8("returnCode", self.return_code.code())
    }

    fn length_in_bits(&self) -> u64 {
        8
    }
}

/// One user data payload item, kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7PayloadUserDataItem {
    /// Item result.
    pub return_code: DataTransportErrorCode,
    /// Transport size of the data.
    pub transport_size: DataTransportSize,
    /// Raw data; the length field counts bytes.
    pub data: Vec<u8>,
}

impl Message for S7PayloadUserDataItem {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("S7PayloadUserDataItem");
        let return_code = read_enum(rb, "returnCode", 8, "DataTransportErrorCode", |v| {
            DataTransportErrorCode::from_code(v as u8)
        })?;
        let transport_size = read_enum(rb, "transportSize", 8, "DataTransportSize", |v| {
            DataTransportSize::from_code(v as u8)
        })?;
        let data_length = rb.read_u16("dataLength")?;
        let data = rb.read_bytes("data", usize::from(data_length))?;
        rb.pop_context();
        Ok(Self {
            return_code,
            transport_size,
            data,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let data_length = u16::try_from(self.data.len())
            .map_err(|_| CodecError::encoding("dataLength", "user data exceeds a 16-bit length"))?;
        wb.write_u8("returnCode", self.return_code.code())?;
        wb.write_u8("transportSize", self.transport_size.code())?;
        wb.write_u16("dataLength", data_length)?;
        wb.write_bytes("data", &self.data)
    }

    fn length_in_bits(&self) -> u64 {
        (4 + self.data.len() as u64) * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_int_address() -> S7VarRequestParameterItem {
        S7VarRequestParameterItem::Address(S7Address::Any(S7AddressAny {
            transport_size: TransportSize::Int,
            number_of_elements: 1,
            db_number: 1,
            area: MemoryArea::DataBlocks,
            byte_address: 2,
            bit_address: 0,
        }))
    }

    #[test]
    fn test_setup_communication() {
        let msg = S7Message::request(0, S7Parameter::setup_communication(8, 8, 480), None);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(hex::encode(&bytes), "320100000000000800 00f0000008000801e0".replace(' ', ""));
        assert_eq!(S7Message::from_bytes(&bytes, ()).unwrap(), msg);
    }

    #[test]
    fn test_read_var_request() {
        let msg = S7Message::request(
            1,
            S7Parameter::ReadVarRequest {
                items: vec![db_int_address()],
            },
            None,
        );
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(hex::encode(&bytes), "3201000000010 00e00000401120a100500010001840000 10".replace(' ', ""));
        assert_eq!(msg.length_in_bytes(), bytes.len());
        assert_eq!(S7Message::from_bytes(&bytes, ()).unwrap(), msg);
    }

    #[test]
    fn test_read_var_response_with_padding() {
        // two BYTE items of one byte each; the first is padded
        let bytes = hex::decode("320300000001000200 0b0000 0402 ff040008 2a00 ff040008 07".replace(' ', "")).unwrap();
        let msg = S7Message::from_bytes(&bytes, ()).unwrap();
        assert_eq!(msg.kind, S7MessageKind::ResponseData { error_class: 0, error_code: 0 });
        match &msg.payload {
            Some(S7Payload::ReadVarResponse { items }) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].data, vec![0x2A]);
                assert_eq!(items[1].data, vec![0x07]);
                assert_eq!(items[0].data_length(), 8);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(msg.to_bytes().unwrap(), bytes);
        assert_eq!(msg.length_in_bits(), bytes.len() as u64 * 8);
    }

    #[test]
    fn test_bit_item_length_counts_bits() {
        let item = S7VarPayloadDataItem::new(DataTransportErrorCode::Ok, DataTransportSize::Bit, vec![0x01]);
        assert_eq!(item.data_length(), 1);
        let mut wb = WriteBuffer::new();
        item.serialize(&mut wb, true).unwrap();
        assert_eq!(wb.as_bytes(), &[0xFF, 0x03, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn test_write_var_response() {
        let bytes = hex::decode("3203000000020002000100000501 0a".replace(' ', "")).unwrap();
        let msg = S7Message::from_bytes(&bytes, ()).unwrap();
        assert_eq!(
            msg.payload,
            Some(S7Payload::WriteVarResponse {
                items: vec![S7VarPayloadStatusItem {
                    return_code: DataTransportErrorCode::NotFound
                }],
            })
        );
        assert_eq!(msg.parameter.as_ref().map(S7Parameter::item_count), Some(1));
        assert_eq!(msg.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_user_data_request() {
        let msg = S7Message {
            tpdu_reference: 0x0100,
            kind: S7MessageKind::UserData,
            parameter: Some(S7Parameter::UserData {
                items: vec![S7ParameterUserDataItem::request(4, 1, 0)],
            }),
            payload: Some(S7Payload::UserData {
                items: vec![S7PayloadUserDataItem {
                    return_code: DataTransportErrorCode::Ok,
                    transport_size: DataTransportSize::OctetString,
                    data: vec![0x00, 0x1C],
                }],
            }),
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(
            hex::encode(&bytes),
            "32070000010000080006 0001120411440100 ff090002001c".replace(' ', "")
        );
        assert_eq!(S7Message::from_bytes(&bytes, ()).unwrap(), msg);
    }

    #[test]
    fn test_user_data_response_item_has_optional_fields() {
        let bytes = hex::decode("120812840100 0001 0000".replace(' ', "")).unwrap();
        let item = S7ParameterUserDataItem::from_bytes(&bytes, ()).unwrap();
        assert_eq!(item.cpu_function_type, 8);
        assert_eq!(item.cpu_function_group, 4);
        assert_eq!(item.data_unit_reference_number, Some(0));
        assert_eq!(item.last_data_unit, Some(1));
        assert_eq!(item.error_code, Some(0));
        assert_eq!(item.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_message_type() {
        let bytes = hex::decode("320500000000000000 00".replace(' ', "")).unwrap();
        let err = S7Message::from_bytes(&bytes, ()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnsupportedDiscriminator { ref type_name, position: 80, .. } if type_name == "S7Message"
        ));
    }

    #[test]
    fn test_declared_lengths_bound_the_sections() {
        // parameterLength 3 for a two byte write var parameter
        let bytes = hex::decode("320300000002000300010000 0501 0a00".replace(' ', "")).unwrap();
        let err = S7Message::from_bytes(&bytes, ()).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidFrame { ref context, position: Some(96), .. } if context == "parameter"),
            "{}",
            err
        );

        // payloadLength 12 for an eleven byte read var payload
        let bytes =
            hex::decode("320300000001 0002 000c 0000 0402 ff040008 2a00 ff040008 07 00".replace(' ', "")).unwrap();
        let err = S7Message::from_bytes(&bytes, ()).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidFrame { ref context, position: Some(112), .. } if context == "payload"),
            "{}",
            err
        );

        // payloadLength past the end of the frame
        let bytes = hex::decode("3203000000020002000500000501 0a".replace(' ', "")).unwrap();
        assert!(S7Message::from_bytes(&bytes, ()).unwrap_err().is_end_of_data());
    }

    #[test]
    fn test_unknown_parameter_for_message_type() {
        // read var parameter inside a user data message
        let bytes = hex::decode("320700000000000200000401").unwrap();
        let err = S7Message::from_bytes(&bytes, ()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedDiscriminator { ref value, .. } if value == "(0x04, 0x07)"));
    }

    #[test]
    fn test_bad_protocol_id() {
        let err = S7Message::from_bytes(&[0x33, 0x01, 0, 0, 0, 0, 0, 0, 0, 0], ()).unwrap_err();
        assert!(matches!(err, CodecError::ConstValueMismatch { expected: 0x32, .. }));
    }

    #[test]
    fn test_large_byte_address() {
        let address = S7Address::Any(S7AddressAny {
            transport_size: TransportSize::Byte,
            number_of_elements: 1,
            db_number: 0,
            area: MemoryArea::FlagsMarkers,
            byte_address: 70000,
            bit_address: 0,
        });
        let bytes = address.to_bytes().unwrap();
        assert_eq!(&bytes[7..], &[0x08, 0x8B, 0x80]);
        assert_eq!(S7Address::from_bytes(&bytes, ()).unwrap(), address);
    }
}
