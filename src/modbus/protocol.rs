//! Building Modbus requests from tags and decoding the responses.
//!
//! | Area | Read | Write |
//! |------|------|-------|
//! | Coil | Read Coils | Write Multiple Coils |
//! | Discrete input | Read Discrete Inputs | - |
//! | Input register | Read Input Registers | - |
//! | Holding register | Read Holding Registers | Write Multiple Registers |
//! | Extended register | Read File Record | Write File Record |
//!
//! Coil states are packed LSB-first, eight per byte. Register values are
//! big-endian; a single value narrower than a register sits in its low byte.
//!
//! # Example
//!
//! ```
//! use plc_wire::modbus::{decode_read_response, read_request, ModbusPdu, ModbusTag};
//! use plc_wire::{PlcResponseCode, PlcValue};
//!
//! let tag: ModbusTag = "holding-register:1:INT[2]".parse().unwrap();
//! assert_eq!(
//!     read_request(&tag).unwrap(),
//!     ModbusPdu::ReadHoldingRegistersRequest { starting_address: 0, quantity: 2 }
//! );
//!
//! let response = ModbusPdu::ReadHoldingRegistersResponse { value: vec![0x00, 0x2A, 0xFF, 0xFF] };
//! let (code, value) = decode_read_response(&tag, &response).unwrap();
//! assert_eq!(code, PlcResponseCode::Ok);
//! assert_eq!(value, PlcValue::List(vec![PlcValue::Int(42), PlcValue::Int(-1)]));
//! ```

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::plc_value::PlcValue;
use crate::request::PlcResponseCode;

use super::pdu::{ModbusErrorCode, ModbusPdu, ReadFileRecordRequestItem, WriteFileRecordItem};
use super::tag::{ModbusArea, ModbusDataType, ModbusTag, REGISTERS_PER_FILE_RECORD};

/// Most coils or discrete inputs one read may cover.
pub const MAX_READ_BITS: u32 = 2000;

/// Most registers one read may cover.
pub const MAX_READ_REGISTERS: u32 = 125;

/// Most coils one write may cover.
pub const MAX_WRITE_BITS: u32 = 1968;

/// Most registers one write may cover.
pub const MAX_WRITE_REGISTERS: u32 = 123;

/// Reference type of every file record sub-request.
pub const FILE_RECORD_REFERENCE_TYPE: u8 = 6;

const COIL_ON: u16 = 0xFF00;

/// Maps an exception code onto the generic response code.
pub fn response_code(code: ModbusErrorCode) -> PlcResponseCode {
    match code {
        ModbusErrorCode::IllegalFunction => PlcResponseCode::Unsupported,
        ModbusErrorCode::IllegalDataAddress => PlcResponseCode::InvalidAddress,
        ModbusErrorCode::IllegalDataValue => PlcResponseCode::InvalidData,
        ModbusErrorCode::Acknowledge | ModbusErrorCode::SlaveDeviceBusy => PlcResponseCode::RemoteBusy,
        ModbusErrorCode::SlaveDeviceFailure
        | ModbusErrorCode::NegativeAcknowledge
        | ModbusErrorCode::MemoryParityError
        | ModbusErrorCode::GatewayPathUnavailable
        | ModbusErrorCode::GatewayTargetDeviceFailedToRespond => PlcResponseCode::RemoteError,
    }
}

/// File/record pairs covering `count` extended registers from `protocol_address`.
///
/// A file holds 10000 registers, so a range crossing a file boundary is
/// split into one group per file.
///
/// # Example
///
/// ```
/// use plc_wire::modbus::extended_register_groups;
///
/// assert_eq!(extended_register_groups(9_998, 4), vec![(1, 9_998, 2), (2, 0, 2)]);
/// ```
pub fn extended_register_groups(protocol_address: u32, count: u32) -> Vec<(u16, u16, u16)> {
    let mut groups = Vec::new();
    let mut address = protocol_address;
    let mut remaining = count;
    while remaining > 0 {
        let file = address / REGISTERS_PER_FILE_RECORD + 1;
        let record = address % REGISTERS_PER_FILE_RECORD;
        let length = remaining.min(REGISTERS_PER_FILE_RECORD - record);
        groups.push((file as u16, record as u16, length as u16));
        address += length;
        remaining -= length;
    }
    groups
}

fn check_range(tag: &ModbusTag, count: u32, limit: u32) -> Result<u16> {
    if count > limit {
        return Err(CodecError::invalid_parameter(
            "quantity",
            format!("{} covers {} units, more than the {} one request allows", tag, count, limit),
        ));
    }
    if tag.area != ModbusArea::ExtendedRegister && tag.protocol_address() + count > 0x1_0000 {
        return Err(CodecError::invalid_parameter(
            "quantity",
            format!("{} runs past the end of the address space", tag),
        ));
    }
    Ok(count as u16)
}

/// Read request PDU for `tag`.
///
/// # Errors
///
/// Returns `CodecError::InvalidParameter` when the tag covers more coils or
/// registers than a single request may read.
pub fn read_request(tag: &ModbusTag) -> Result<ModbusPdu> {
    let limit = if tag.area.is_bit_area() {
        MAX_READ_BITS
    } else {
        MAX_READ_REGISTERS
    };
    let count = tag.register_count();
    let quantity = check_range(tag, count, limit)?;
    let starting_address = tag.protocol_address() as u16;
    let pdu = match tag.area {
        ModbusArea::Coil => ModbusPdu::ReadCoilsRequest {
            starting_address,
            quantity,
        },
        ModbusArea::DiscreteInput => ModbusPdu::ReadDiscreteInputsRequest {
            starting_address,
            quantity,
        },
        ModbusArea::InputRegister => ModbusPdu::ReadInputRegistersRequest {
            starting_address,
            quantity,
        },
        ModbusArea::HoldingRegister => ModbusPdu::ReadHoldingRegistersRequest {
            starting_address,
            quantity,
        },
        ModbusArea::ExtendedRegister => ModbusPdu::ReadFileRecordRequest {
            items: extended_register_groups(tag.protocol_address(), count)
                .into_iter()
                .map(|(file_number, record_number, record_length)| ReadFileRecordRequestItem {
                    reference_type: FILE_RECORD_REFERENCE_TYPE,
                    file_number,
                    record_number,
                    record_length,
                })
                .collect(),
        },
    };
    log::debug!("Modbus read of {} as function 0x{:02X}", tag, pdu.function_code());
    Ok(pdu)
}

/// Write request PDU storing `value` at `tag`.
///
/// # Errors
///
/// Returns `CodecError::InvalidParameter` for read-only areas, element count
/// mismatches and oversized writes, and `CodecError::Encoding` when an
/// element does not fit the tag's data type.
pub fn write_request(tag: &ModbusTag, value: &PlcValue) -> Result<ModbusPdu> {
    if !tag.area.is_writable() {
        return Err(CodecError::invalid_parameter("tag", format!("{} is read-only", tag.area)));
    }
    let limit = if tag.area.is_bit_area() {
        MAX_WRITE_BITS
    } else {
        MAX_WRITE_REGISTERS
    };
    let quantity = check_range(tag, tag.register_count(), limit)?;
    let data = encode_value(tag, value)?;
    let starting_address = tag.protocol_address() as u16;
    let pdu = match tag.area {
        ModbusArea::Coil => ModbusPdu::WriteMultipleCoilsRequest {
            starting_address,
            quantity,
            value: data,
        },
        ModbusArea::HoldingRegister => ModbusPdu::WriteMultipleHoldingRegistersRequest {
            starting_address,
            quantity,
            value: data,
        },
        _ => {
            let mut offset = 0;
            let mut items = Vec::new();
            for (file_number, record_number, record_length) in
                extended_register_groups(tag.protocol_address(), u32::from(quantity))
            {
                let end = offset + usize::from(record_length) * 2;
                items.push(WriteFileRecordItem {
                    reference_type: FILE_RECORD_REFERENCE_TYPE,
                    file_number,
                    record_number,
                    record_data: data[offset..end].to_vec(),
                });
                offset = end;
            }
            ModbusPdu::WriteFileRecordRequest { items }
        }
    };
    log::debug!("Modbus write of {} as function 0x{:02X}", tag, pdu.function_code());
    Ok(pdu)
}

/// Single-coil write, for devices without Write Multiple Coils.
///
/// # Example
///
/// ```
/// use plc_wire::modbus::{write_single_coil_request, ModbusPdu, ModbusTag};
///
/// let tag: ModbusTag = "coil:173".parse().unwrap();
/// assert_eq!(
///     write_single_coil_request(&tag, true).unwrap(),
///     ModbusPdu::WriteSingleCoilRequest { address: 0xAC, value: 0xFF00 }
/// );
/// ```
pub fn write_single_coil_request(tag: &ModbusTag, on: bool) -> Result<ModbusPdu> {
    if tag.area != ModbusArea::Coil {
        return Err(CodecError::invalid_parameter("tag", format!("{} is not a coil", tag)));
    }
    Ok(ModbusPdu::WriteSingleCoilRequest {
        address: tag.protocol_address() as u16,
        value: if on { COIL_ON } else { 0 },
    })
}

/// Decodes the response to [`read_request`] into a response code and value.
///
/// An exception response yields its mapped code and `PlcValue::Null`; so
/// does data that cannot be decoded, with `InternalError`.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` when `response` does not answer a read
/// of `tag`'s area.
pub fn decode_read_response(tag: &ModbusTag, response: &ModbusPdu) -> Result<(PlcResponseCode, PlcValue)> {
    let data = match (tag.area, response) {
        (_, ModbusPdu::Error { exception_code, .. }) => {
            log::warn!("Modbus read of {} failed: {}", tag, exception_code);
            return Ok((response_code(*exception_code), PlcValue::Null));
        }
        (ModbusArea::Coil, ModbusPdu::ReadCoilsResponse { value })
        | (ModbusArea::DiscreteInput, ModbusPdu::ReadDiscreteInputsResponse { value })
        | (ModbusArea::InputRegister, ModbusPdu::ReadInputRegistersResponse { value })
        | (ModbusArea::HoldingRegister, ModbusPdu::ReadHoldingRegistersResponse { value }) => value.clone(),
        (ModbusArea::ExtendedRegister, ModbusPdu::ReadFileRecordResponse { items }) => {
            items.iter().flat_map(|item| item.data.iter().copied()).collect()
        }
        (_, other) => {
            return Err(CodecError::invalid_frame(
                "ModbusPdu",
                format!("function 0x{:02X} does not answer a read of {}", other.function_code(), tag),
            ))
        }
    };
    match decode_value(tag, &data) {
        Ok(value) => Ok((PlcResponseCode::Ok, value)),
        Err(e) => {
            log::warn!("cannot decode {}: {}", tag, e);
            Ok((PlcResponseCode::InternalError, PlcValue::Null))
        }
    }
}

/// Decodes the response to [`write_request`] or [`write_single_coil_request`].
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` when `response` is not a write
/// acknowledgement.
pub fn decode_write_response(response: &ModbusPdu) -> Result<PlcResponseCode> {
    match response {
        ModbusPdu::Error { exception_code, .. } => {
            log::warn!("Modbus write failed: {}", exception_code);
            Ok(response_code(*exception_code))
        }
        ModbusPdu::WriteSingleCoilResponse { .. }
        | ModbusPdu::WriteSingleRegisterResponse { .. }
        | ModbusPdu::WriteMultipleCoilsResponse { .. }
        | ModbusPdu::WriteMultipleHoldingRegistersResponse { .. }
        | ModbusPdu::WriteFileRecordResponse { .. } => Ok(PlcResponseCode::Ok),
        other => Err(CodecError::invalid_frame(
            "ModbusPdu",
            format!("function 0x{:02X} is not a write acknowledgement", other.function_code()),
        )),
    }
}

/// Decodes coil bits or register bytes read for `tag`.
///
/// A tag with one element yields a single value, otherwise a list.
pub fn decode_value(tag: &ModbusTag, data: &[u8]) -> Result<PlcValue> {
    let quantity = usize::from(tag.quantity);
    let mut values = if tag.area.is_bit_area() {
        if data.len() * 8 < quantity {
            return Err(CodecError::end_of_data("value", 0, quantity as u64, data.len() as u64 * 8));
        }
        (0..quantity)
            .map(|i| PlcValue::Bool(data[i / 8] & (1 << (i % 8)) != 0))
            .collect()
    } else {
        let mut rb = ReadBuffer::new(data);
        rb.push_context(tag.data_type.name());
        let values = if quantity == 1 && tag.data_type.size_in_bits() < 16 {
            rb.skip("reserved", u64::from(16 - tag.data_type.size_in_bits()))?;
            vec![read_element(&mut rb, tag.data_type)?]
        } else {
            let mut values = Vec::with_capacity(quantity.min(1024));
            for _ in 0..quantity {
                values.push(read_element(&mut rb, tag.data_type)?);
            }
            values
        };
        rb.pop_context();
        values
    };
    if values.len() == 1 {
        Ok(values.remove(0))
    } else {
        Ok(PlcValue::List(values))
    }
}

/// Encodes `value` as coil bytes or whole registers for `tag`.
///
/// The number of elements in `value` must equal the tag's quantity.
pub fn encode_value(tag: &ModbusTag, value: &PlcValue) -> Result<Vec<u8>> {
    let elements = value.elements();
    if elements.len() != usize::from(tag.quantity) {
        return Err(CodecError::invalid_parameter(
            "value",
            format!("{} elements given for a tag of {}", elements.len(), tag.quantity),
        ));
    }
    if tag.area.is_bit_area() {
        let mut bytes = vec![0u8; elements.len().div_ceil(8)];
        for (i, element) in elements.iter().enumerate() {
            if element.as_bool().ok_or_else(|| mismatch(tag.data_type, element))? {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        return Ok(bytes);
    }
    let mut wb = WriteBuffer::with_capacity(tag.register_count() as usize * 2);
    wb.push_context(tag.data_type.name());
    if elements.len() == 1 && tag.data_type.size_in_bits() < 16 {
        wb.write_unsigned("reserved", (16 - tag.data_type.size_in_bits()) as u8, 0)?;
    }
    for element in elements {
        write_element(&mut wb, tag.data_type, element)?;
    }
    while wb.position() % 16 != 0 {
        wb.write_bit("padding", false)?;
    }
    wb.pop_context();
    Ok(wb.into_bytes())
}

fn read_element(rb: &mut ReadBuffer<'_>, data_type: ModbusDataType) -> Result<PlcValue> {
    let value = match data_type {
        ModbusDataType::Bool => PlcValue::Bool(rb.read_bit("value")?),
        ModbusDataType::Byte => PlcValue::Byte(rb.read_u8("value")?),
        ModbusDataType::Word => PlcValue::Word(rb.read_u16("value")?),
        ModbusDataType::Dword => PlcValue::DWord(rb.read_u32("value")?),
        ModbusDataType::Lword => PlcValue::LWord(rb.read_u64("value")?),
        ModbusDataType::Sint => PlcValue::SInt(rb.read_i8("value")?),
        ModbusDataType::Int => PlcValue::Int(rb.read_i16("value")?),
        ModbusDataType::Dint => PlcValue::DInt(rb.read_i32("value")?),
        ModbusDataType::Lint => PlcValue::LInt(rb.read_i64("value")?),
        ModbusDataType::Usint => PlcValue::USInt(rb.read_u8("value")?),
        ModbusDataType::Uint => PlcValue::UInt(rb.read_u16("value")?),
        ModbusDataType::Udint => PlcValue::UDInt(rb.read_u32("value")?),
        ModbusDataType::Ulint => PlcValue::ULInt(rb.read_u64("value")?),
        ModbusDataType::Real => PlcValue::Real(rb.read_f32("value")?),
        ModbusDataType::Lreal => PlcValue::LReal(rb.read_f64("value")?),
        ModbusDataType::Char => PlcValue::Char(char::from(rb.read_u8("value")?)),
        ModbusDataType::Wchar => {
            let unit = rb.read_u16("value")?;
            let c = char::from_u32(u32::from(unit))
                .ok_or_else(|| CodecError::encoding("value", format!("0x{:04X} is not a character", unit)))?;
            PlcValue::WChar(c)
        }
    };
    Ok(value)
}

fn write_element(wb: &mut WriteBuffer, data_type: ModbusDataType, value: &PlcValue) -> Result<()> {
    match data_type {
        ModbusDataType::Bool => {
            let b = value.as_bool().ok_or_else(|| mismatch(data_type, value))?;
            wb.write_bit("value", b)
        }
        ModbusDataType::Byte | ModbusDataType::Usint => wb.write_u8("value", unsigned(data_type, value)?),
        ModbusDataType::Word | ModbusDataType::Uint => wb.write_u16("value", unsigned(data_type, value)?),
        ModbusDataType::Dword | ModbusDataType::Udint => wb.write_u32("value", unsigned(data_type, value)?),
        ModbusDataType::Lword | ModbusDataType::Ulint => wb.write_u64("value", unsigned(data_type, value)?),
        ModbusDataType::Sint => wb.write_i8("value", signed(data_type, value)?),
        ModbusDataType::Int => wb.write_i16("value", signed(data_type, value)?),
        ModbusDataType::Dint => wb.write_i32("value", signed(data_type, value)?),
        ModbusDataType::Lint => wb.write_i64("value", signed(data_type, value)?),
        ModbusDataType::Real => wb.write_f32("value", value.as_f64().ok_or_else(|| mismatch(data_type, value))? as f32),
        ModbusDataType::Lreal => wb.write_f64("value", value.as_f64().ok_or_else(|| mismatch(data_type, value))?),
        ModbusDataType::Char => {
            let c = value.as_char().ok_or_else(|| mismatch(data_type, value))?;
            let byte = u8::try_from(u32::from(c))
                .map_err(|_| CodecError::encoding("value", format!("'{}' is not a Latin-1 character", c)))?;
            wb.write_u8("value", byte)
        }
        ModbusDataType::Wchar => {
            let c = value.as_char().ok_or_else(|| mismatch(data_type, value))?;
            let unit = u16::try_from(u32::from(c))
                .map_err(|_| CodecError::encoding("value", format!("'{}' needs two UTF-16 code units", c)))?;
            wb.write_u16("value", unit)
        }
    }
}

fn mismatch(data_type: ModbusDataType, value: &PlcValue) -> CodecError {
    CodecError::encoding("value", format!("{} cannot be written as {}", value.type_name(), data_type))
}

fn signed<T: TryFrom<i64>>(data_type: ModbusDataType, value: &PlcValue) -> Result<T> {
    let v = value.as_i64().ok_or_else(|| mismatch(data_type, value))?;
    T::try_from(v).map_err(|_| CodecError::encoding("value", format!("{} does not fit {}", v, data_type)))
}

fn unsigned<T: TryFrom<u64>>(data_type: ModbusDataType, value: &PlcValue) -> Result<T> {
    let v = value.as_u64().ok_or_else(|| mismatch(data_type, value))?;
    T::try_from(v).map_err(|_| CodecError::encoding("value", format!("{} does not fit {}", v, data_type)))
}
