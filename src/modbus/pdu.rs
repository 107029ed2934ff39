//! Modbus protocol data units.
//!
//! A PDU starts with one byte: the high bit flags an exception response and
//! the low seven bits carry the function code. Whether the rest is a request
//! or a response body is not on the wire, so parsing needs to be told.
//!
//! | Code | Function | Request body | Response body |
//! |------|----------|--------------|---------------|
//! | 0x01 | Read Coils | address, quantity | byte count, bits |
//! | 0x02 | Read Discrete Inputs | address, quantity | byte count, bits |
//! | 0x03 | Read Holding Registers | address, quantity | byte count, words |
//! | 0x04 | Read Input Registers | address, quantity | byte count, words |
//! | 0x05 | Write Single Coil | address, value | echo |
//! | 0x06 | Write Single Register | address, value | echo |
//! | 0x07 | Read Exception Status | - | status byte |
//! | 0x08 | Diagnostic | sub-function, data | echo |
//! | 0x0B | Get Comm Event Counter | - | status, count |
//! | 0x0C | Get Comm Event Log | - | counters, events |
//! | 0x0F | Write Multiple Coils | address, quantity, bits | address, quantity |
//! | 0x10 | Write Multiple Registers | address, quantity, words | address, quantity |
//! | 0x11 | Report Server ID | - | byte count, data |
//! | 0x14 | Read File Record | sub-requests | sub-responses |
//! | 0x15 | Write File Record | sub-requests | echo |
//! | 0x16 | Mask Write Register | address, and, or | echo |
//! | 0x17 | Read/Write Multiple Registers | read + write ranges, words | byte count, words |
//! | 0x18 | Read FIFO Queue | pointer address | counts, words |
//!
//! # Example
//!
//! ```
//! use plc_wire::field::Message;
//! use plc_wire::modbus::{ModbusErrorCode, ModbusPdu};
//!
//! let pdu = ModbusPdu::from_bytes(&[0x83, 0x02], true).unwrap();
//! assert_eq!(
//!     pdu,
//!     ModbusPdu::Error { function: 0x03, exception_code: ModbusErrorCode::IllegalDataAddress }
//! );
//! ```

use std::fmt;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::field::{
    array_length_in_bits, read_bounded, read_count_array, read_enum, read_length_array, write_array, Message,
};

/// Read Coils.
pub const FC_READ_COILS: u8 = 0x01;
/// Read Discrete Inputs.
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
/// Read Holding Registers.
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Read Input Registers.
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// Write Single Coil.
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
/// Write Single Register.
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Read Exception Status (serial line only).
pub const FC_READ_EXCEPTION_STATUS: u8 = 0x07;
/// Diagnostics (serial line only).
pub const FC_DIAGNOSTIC: u8 = 0x08;
/// Get Comm Event Counter (serial line only).
pub const FC_GET_COM_EVENT_COUNTER: u8 = 0x0B;
/// Get Comm Event Log (serial line only).
pub const FC_GET_COM_EVENT_LOG: u8 = 0x0C;
/// Write Multiple Coils.
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
/// Write Multiple Registers.
pub const FC_WRITE_MULTIPLE_HOLDING_REGISTERS: u8 = 0x10;
/// Report Server ID (serial line only).
pub const FC_REPORT_SERVER_ID: u8 = 0x11;
/// Read File Record.
pub const FC_READ_FILE_RECORD: u8 = 0x14;
/// Write File Record.
pub const FC_WRITE_FILE_RECORD: u8 = 0x15;
/// Mask Write Register.
pub const FC_MASK_WRITE_HOLDING_REGISTER: u8 = 0x16;
/// Read/Write Multiple Registers.
pub const FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS: u8 = 0x17;
/// Read FIFO Queue.
pub const FC_READ_FIFO_QUEUE: u8 = 0x18;

/// Exception code of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusErrorCode {
    /// The function code is not supported by the server.
    IllegalFunction,
    /// The address range is not valid for the server.
    IllegalDataAddress,
    /// A value in the request is not allowed.
    IllegalDataValue,
    /// Unrecoverable error while performing the action.
    SlaveDeviceFailure,
    /// Accepted, but processing takes long.
    Acknowledge,
    /// The server is processing a long-duration command.
    SlaveDeviceBusy,
    /// The program function cannot be performed.
    NegativeAcknowledge,
    /// Parity error in extended file memory.
    MemoryParityError,
    /// The gateway could not allocate a path.
    GatewayPathUnavailable,
    /// The gateway got no response from the target device.
    GatewayTargetDeviceFailedToRespond,
}

impl ModbusErrorCode {
    /// Every exception code in ascending order.
    pub const ALL: [ModbusErrorCode; 10] = [
        Self::IllegalFunction,
        Self::IllegalDataAddress,
        Self::IllegalDataValue,
        Self::SlaveDeviceFailure,
        Self::Acknowledge,
        Self::SlaveDeviceBusy,
        Self::NegativeAcknowledge,
        Self::MemoryParityError,
        Self::GatewayPathUnavailable,
        Self::GatewayTargetDeviceFailedToRespond,
    ];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::SlaveDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::SlaveDeviceBusy => 0x06,
            Self::NegativeAcknowledge => 0x07,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetDeviceFailedToRespond => 0x0B,
        }
    }

    /// Decodes a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Upper-case symbolic name.
    pub fn name(self) -> &'static str {
        match self {
            Self::IllegalFunction => "ILLEGAL_FUNCTION",
            Self::IllegalDataAddress => "ILLEGAL_DATA_ADDRESS",
            Self::IllegalDataValue => "ILLEGAL_DATA_VALUE",
            Self::SlaveDeviceFailure => "SLAVE_DEVICE_FAILURE",
            Self::Acknowledge => "ACKNOWLEDGE",
            Self::SlaveDeviceBusy => "SLAVE_DEVICE_BUSY",
            Self::NegativeAcknowledge => "NEGATIVE_ACKNOWLEDGE",
            Self::MemoryParityError => "MEMORY_PARITY_ERROR",
            Self::GatewayPathUnavailable => "GATEWAY_PATH_UNAVAILABLE",
            Self::GatewayTargetDeviceFailedToRespond => "GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND",
        }
    }
}

impl fmt::Display for ModbusErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

/// A Modbus PDU, request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ModbusPdu {
    /// Exception response; `function` is the code of the failed request.
    Error {
        function: u8,
        exception_code: ModbusErrorCode,
    },
    ReadCoilsRequest {
        starting_address: u16,
        quantity: u16,
    },
    /// Coil states, eight per byte, LSB first.
    ReadCoilsResponse { value: Vec<u8> },
    ReadDiscreteInputsRequest {
        starting_address: u16,
        quantity: u16,
    },
    ReadDiscreteInputsResponse { value: Vec<u8> },
    ReadHoldingRegistersRequest {
        starting_address: u16,
        quantity: u16,
    },
    /// Register contents, big-endian words.
    ReadHoldingRegistersResponse { value: Vec<u8> },
    ReadInputRegistersRequest {
        starting_address: u16,
        quantity: u16,
    },
    ReadInputRegistersResponse { value: Vec<u8> },
    /// `value` is 0xFF00 for on, 0x0000 for off.
    WriteSingleCoilRequest { address: u16, value: u16 },
    WriteSingleCoilResponse { address: u16, value: u16 },
    WriteSingleRegisterRequest { address: u16, value: u16 },
    WriteSingleRegisterResponse { address: u16, value: u16 },
    WriteMultipleCoilsRequest {
        starting_address: u16,
        quantity: u16,
        value: Vec<u8>,
    },
    WriteMultipleCoilsResponse {
        starting_address: u16,
        quantity: u16,
    },
    WriteMultipleHoldingRegistersRequest {
        starting_address: u16,
        quantity: u16,
        value: Vec<u8>,
    },
    WriteMultipleHoldingRegistersResponse {
        starting_address: u16,
        quantity: u16,
    },
    ReadWriteMultipleHoldingRegistersRequest {
        read_starting_address: u16,
        read_quantity: u16,
        write_starting_address: u16,
        write_quantity: u16,
        value: Vec<u8>,
    },
    ReadWriteMultipleHoldingRegistersResponse { value: Vec<u8> },
    MaskWriteHoldingRegisterRequest {
        reference_address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    MaskWriteHoldingRegisterResponse {
        reference_address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    ReadFifoQueueRequest { fifo_pointer_address: u16 },
    ReadFifoQueueResponse { fifo_value: Vec<u16> },
    ReadFileRecordRequest { items: Vec<ReadFileRecordRequestItem> },
    ReadFileRecordResponse { items: Vec<ReadFileRecordResponseItem> },
    WriteFileRecordRequest { items: Vec<WriteFileRecordItem> },
    WriteFileRecordResponse { items: Vec<WriteFileRecordItem> },
    ReadExceptionStatusRequest,
    ReadExceptionStatusResponse { value: u8 },
    DiagnosticRequest { sub_function: u16, data: u16 },
    DiagnosticResponse { sub_function: u16, data: u16 },
    GetComEventCounterRequest,
    GetComEventCounterResponse { status: u16, event_count: u16 },
    GetComEventLogRequest,
    GetComEventLogResponse {
        status: u16,
        event_count: u16,
        message_count: u16,
        events: Vec<u8>,
    },
    ReportServerIdRequest,
    ReportServerIdResponse { value: Vec<u8> },
}

impl ModbusPdu {
    /// Function code, without the exception bit.
    pub fn function_code(&self) -> u8 {
        match self {
            Self::Error { function, .. } => *function,
            Self::ReadCoilsRequest { .. } | Self::ReadCoilsResponse { .. } => FC_READ_COILS,
            Self::ReadDiscreteInputsRequest { .. } | Self::ReadDiscreteInputsResponse { .. } => FC_READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegistersRequest { .. } | Self::ReadHoldingRegistersResponse { .. } => {
                FC_READ_HOLDING_REGISTERS
            }
            Self::ReadInputRegistersRequest { .. } | Self::ReadInputRegistersResponse { .. } => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleCoilRequest { .. } | Self::WriteSingleCoilResponse { .. } => FC_WRITE_SINGLE_COIL,
            Self::WriteSingleRegisterRequest { .. } | Self::WriteSingleRegisterResponse { .. } => {
                FC_WRITE_SINGLE_REGISTER
            }
            Self::WriteMultipleCoilsRequest { .. } | Self::WriteMultipleCoilsResponse { .. } => FC_WRITE_MULTIPLE_COILS,
            Self::WriteMultipleHoldingRegistersRequest { .. } | Self::WriteMultipleHoldingRegistersResponse { .. } => {
                FC_WRITE_MULTIPLE_HOLDING_REGISTERS
            }
            Self::ReadWriteMultipleHoldingRegistersRequest { .. }
            | Self::ReadWriteMultipleHoldingRegistersResponse { .. } => FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS,
            Self::MaskWriteHoldingRegisterRequest { .. } | Self::MaskWriteHoldingRegisterResponse { .. } => {
                FC_MASK_WRITE_HOLDING_REGISTER
            }
            Self::ReadFifoQueueRequest { .. } | Self::ReadFifoQueueResponse { .. } => FC_READ_FIFO_QUEUE,
            Self::ReadFileRecordRequest { .. } | Self::ReadFileRecordResponse { .. } => FC_READ_FILE_RECORD,
            Self::WriteFileRecordRequest { .. } | Self::WriteFileRecordResponse { .. } => FC_WRITE_FILE_RECORD,
            Self::ReadExceptionStatusRequest | Self::ReadExceptionStatusResponse { .. } => FC_READ_EXCEPTION_STATUS,
            Self::DiagnosticRequest { .. } | Self::DiagnosticResponse { .. } => FC_DIAGNOSTIC,
            Self::GetComEventCounterRequest | Self::GetComEventCounterResponse { .. } => FC_GET_COM_EVENT_COUNTER,
            Self::GetComEventLogRequest | Self::GetComEventLogResponse { .. } => FC_GET_COM_EVENT_LOG,
            Self::ReportServerIdRequest | Self::ReportServerIdResponse { .. } => FC_REPORT_SERVER_ID,
        }
    }

    /// Returns `true` for exception responses.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns `true` for responses, including exception responses.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::Error { .. }
                | Self::ReadCoilsResponse { .. }
                | Self::ReadDiscreteInputsResponse { .. }
                | Self::ReadHoldingRegistersResponse { .. }
                | Self::ReadInputRegistersResponse { .. }
                | Self::WriteSingleCoilResponse { .. }
                | Self::WriteSingleRegisterResponse { .. }
                | Self::WriteMultipleCoilsResponse { .. }
                | Self::WriteMultipleHoldingRegistersResponse { .. }
                | Self::ReadWriteMultipleHoldingRegistersResponse { .. }
                | Self::MaskWriteHoldingRegisterResponse { .. }
                | Self::ReadFifoQueueResponse { .. }
                | Self::ReadFileRecordResponse { .. }
                | Self::WriteFileRecordResponse { .. }
                | Self::ReadExceptionStatusResponse { .. }
                | Self::DiagnosticResponse { .. }
                | Self::GetComEventCounterResponse { .. }
                | Self::GetComEventLogResponse { .. }
                | Self::ReportServerIdResponse { .. }
        )
    }
}

fn byte_count(field: &str, len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| CodecError::encoding(field, format!("{} bytes do not fit a byte count", len)))
}

fn read_counted_bytes(rb: &mut ReadBuffer<'_>, field: &str) -> Result<Vec<u8>> {
    let count = rb.read_u8("byteCount")?;
    rb.read_bytes(field, usize::from(count))
}

/// Reads a byte count that must agree with the quantity announced earlier in the PDU.
fn read_quantity_bytes(rb: &mut ReadBuffer<'_>, field: &str, expected: usize) -> Result<Vec<u8>> {
    let position = rb.position();
    let count = usize::from(rb.read_u8("byteCount")?);
    if count != expected {
        return Err(CodecError::invalid_frame_at(
            "byteCount",
            position,
            format!("{} bytes announced for a quantity needing {}", count, expected),
        ));
    }
    rb.read_bytes(field, count)
}

fn write_counted_bytes(wb: &mut WriteBuffer, field: &str, value: &[u8]) -> Result<()> {
    wb.write_u8("byteCount", byte_count(field, value.len())?)?;
    wb.write_bytes(field, value)
}

fn read_range(rb: &mut ReadBuffer<'_>) -> Result<(u16, u16)> {
    Ok((rb.read_u16("startingAddress")?, rb.read_u16("quantity")?))
}

fn write_range(wb: &mut WriteBuffer, starting_address: u16, quantity: u16) -> Result<()> {
    wb.write_u16("startingAddress", starting_address)?;
    wb.write_u16("quantity", quantity)
}

fn read_items<T: Message<Args = ()>>(rb: &mut ReadBuffer<'_>) -> Result<Vec<T>> {
    let byte_count = rb.read_u8("byteCount")?;
    read_length_array(rb, "items", usize::from(byte_count), |rb| T::parse(rb, ()))
}

fn write_items<T: Message>(wb: &mut WriteBuffer, items: &[T]) -> Result<()> {
    let bytes = array_length_in_bits(items).div_ceil(8);
    let count = u8::try_from(bytes)
        .map_err(|_| CodecError::encoding("byteCount", format!("{} bytes of sub-requests do not fit", bytes)))?;
    wb.write_u8("byteCount", count)?;
    write_array(wb, "items", items)
}

impl Message for ModbusPdu {
    /// Whether the PDU is a response.
    type Args = bool;

    fn parse(rb: &mut ReadBuffer<'_>, response: bool) -> Result<Self> {
        rb.push_context("ModbusPdu");
        let error_flag = rb.read_bit("errorFlag")?;
        let function = rb.read_unsigned("functionFlag", 7)? as u8;
        let pdu = match (error_flag, function, response) {
            (true, _, _) => Self::Error {
                function,
                exception_code: read_enum(rb, "exceptionCode", 8, "ModbusErrorCode", |v| {
                    ModbusErrorCode::from_code(v as u8)
                })?,
            },
            (false, FC_READ_COILS, false) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::ReadCoilsRequest {
                    starting_address,
                    quantity,
                }
            }
            (false, FC_READ_COILS, true) => Self::ReadCoilsResponse {
                value: read_counted_bytes(rb, "value")?,
            },
            (false, FC_READ_DISCRETE_INPUTS, false) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::ReadDiscreteInputsRequest {
                    starting_address,
                    quantity,
                }
            }
            (false, FC_READ_DISCRETE_INPUTS, true) => Self::ReadDiscreteInputsResponse {
                value: read_counted_bytes(rb, "value")?,
            },
            (false, FC_READ_HOLDING_REGISTERS, false) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::ReadHoldingRegistersRequest {
                    starting_address,
                    quantity,
                }
            }
            (false, FC_READ_HOLDING_REGISTERS, true) => Self::ReadHoldingRegistersResponse {
                value: read_counted_bytes(rb, "value")?,
            },
            (false, FC_READ_INPUT_REGISTERS, false) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::ReadInputRegistersRequest {
                    starting_address,
                    quantity,
                }
            }
            (false, FC_READ_INPUT_REGISTERS, true) => Self::ReadInputRegistersResponse {
                value: read_counted_bytes(rb, "value")?,
            },
            (false, FC_WRITE_SINGLE_COIL, false) => Self::WriteSingleCoilRequest {
                address: rb.read_u16("address")?,
                value: rb.read_u16("value")?,
            },
            (false, FC_WRITE_SINGLE_COIL, true) => Self::WriteSingleCoilResponse {
                address: rb.read_u16("address")?,
                value: rb.read_u16("value")?,
            },
            (false, FC_WRITE_SINGLE_REGISTER, false) => Self::WriteSingleRegisterRequest {
                address: rb.read_u16("address")?,
                value: rb.read_u16("value")?,
            },
            (false, FC_WRITE_SINGLE_REGISTER, true) => Self::WriteSingleRegisterResponse {
                address: rb.read_u16("address")?,
                value: rb.read_u16("value")?,
            },
            (false, FC_WRITE_MULTIPLE_COILS, false) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::WriteMultipleCoilsRequest {
                    starting_address,
                    quantity,
                    value: read_quantity_bytes(rb, "value", usize::from(quantity).div_ceil(8))?,
                }
            }
            (false, FC_WRITE_MULTIPLE_COILS, true) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::WriteMultipleCoilsResponse {
                    starting_address,
                    quantity,
                }
            }
            (false, FC_WRITE_MULTIPLE_HOLDING_REGISTERS, false) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::WriteMultipleHoldingRegistersRequest {
                    starting_address,
                    quantity,
                    value: read_quantity_bytes(rb, "value", usize::from(quantity) * 2)?,
                }
            }
            (false, FC_WRITE_MULTIPLE_HOLDING_REGISTERS, true) => {
                let (starting_address, quantity) = read_range(rb)?;
                Self::WriteMultipleHoldingRegistersResponse {
                    starting_address,
                    quantity,
                }
            }
            (false, FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS, false) => {
                let read_starting_address = rb.read_u16("readStartingAddress")?;
                let read_quantity = rb.read_u16("readQuantity")?;
                let write_starting_address = rb.read_u16("writeStartingAddress")?;
                let write_quantity = rb.read_u16("writeQuantity")?;
                Self::ReadWriteMultipleHoldingRegistersRequest {
                    read_starting_address,
                    read_quantity,
                    write_starting_address,
                    write_quantity,
                    value: read_quantity_bytes(rb, "value", usize::from(write_quantity) * 2)?,
                }
            }
            (false, FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS, true) => {
                Self::ReadWriteMultipleHoldingRegistersResponse {
                    value: read_counted_bytes(rb, "value")?,
                }
            }
            (false, FC_MASK_WRITE_HOLDING_REGISTER, false) => Self::MaskWriteHoldingRegisterRequest {
                reference_address: rb.read_u16("referenceAddress")?,
                and_mask: rb.read_u16("andMask")?,
                or_mask: rb.read_u16("orMask")?,
            },
            (false, FC_MASK_WRITE_HOLDING_REGISTER, true) => Self::MaskWriteHoldingRegisterResponse {
                reference_address: rb.read_u16("referenceAddress")?,
                and_mask: rb.read_u16("andMask")?,
                or_mask: rb.read_u16("orMask")?,
            },
            (false, FC_READ_FIFO_QUEUE, false) => Self::ReadFifoQueueRequest {
                fifo_pointer_address: rb.read_u16("fifoPointerAddress")?,
            },
            (false, FC_READ_FIFO_QUEUE, true) => {
                let byte_count = rb.read_u16("byteCount")?;
                let fifo_value = read_bounded(rb, "fifoValue", usize::from(byte_count), |rb| {
                    let fifo_count = rb.read_u16("fifoCount")?;
                    read_count_array(rb, "fifoValue", usize::from(fifo_count), |rb, _| rb.read_u16("fifoValue"))
                })?;
                Self::ReadFifoQueueResponse { fifo_value }
            }
            (false, FC_READ_FILE_RECORD, false) => Self::ReadFileRecordRequest { items: read_items(rb)? },
            (false, FC_READ_FILE_RECORD, true) => Self::ReadFileRecordResponse { items: read_items(rb)? },
            (false, FC_WRITE_FILE_RECORD, false) => Self::WriteFileRecordRequest { items: read_items(rb)? },
            (false, FC_WRITE_FILE_RECORD, true) => Self::WriteFileRecordResponse { items: read_items(rb)? },
            (false, FC_READ_EXCEPTION_STATUS, false) => Self::ReadExceptionStatusRequest,
            (false, FC_READ_EXCEPTION_STATUS, true) => Self::ReadExceptionStatusResponse {
                value: rb.read_u8("value")?,
            },
            (false, FC_DIAGNOSTIC, false) => Self::DiagnosticRequest {
                sub_function: rb.read_u16("subFunction")?,
                data: rb.read_u16("data")?,
            },
            (false, FC_DIAGNOSTIC, true) => Self::DiagnosticResponse {
                sub_function: rb.read_u16("subFunction")?,
                data: rb.read_u16("data")?,
            },
            (false, FC_GET_COM_EVENT_COUNTER, false) => Self::GetComEventCounterRequest,
            (false, FC_GET_COM_EVENT_COUNTER, true) => Self::GetComEventCounterResponse {
                status: rb.read_u16("status")?,
                event_count: rb.read_u16("eventCount")?,
            },
            (false, FC_GET_COM_EVENT_LOG, false) => Self::GetComEventLogRequest,
            (false, FC_GET_COM_EVENT_LOG, true) => {
                let position = rb.position();
                let byte_count = rb.read_u8("byteCount")?;
                let events = usize::from(byte_count).checked_sub(6).ok_or_else(|| {
                    CodecError::invalid_frame_at("byteCount", position, format!("event log byte count {} is below 6", byte_count))
                })?;
                Self::GetComEventLogResponse {
                    status: rb.read_u16("status")?,
                    event_count: rb.read_u16("eventCount")?,
                    message_count: rb.read_u16("messageCount")?,
                    events: rb.read_bytes("events", events)?,
                }
            }
            (false, FC_REPORT_SERVER_ID, false) => Self::ReportServerIdRequest,
            (false, FC_REPORT_SERVER_ID, true) => Self::ReportServerIdResponse {
                value: read_counted_bytes(rb, "value")?,
            },
            _ => {
                return Err(CodecError::unsupported_discriminator(
                    "ModbusPdu",
                    format!("({}, 0x{:02X}, {})", error_flag, function, response),
                    rb.position(),
                ))
            }
        };
        log::debug!("Modbus PDU function 0x{:02X} (error: {})", function, error_flag);
        rb.pop_context();
        Ok(pdu)
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let function = self.function_code();
        if function > 0x7F {
            return Err(CodecError::encoding(
                "functionFlag",
                format!("function code 0x{:02X} does not fit in 7 bits", function),
            ));
        }
        wb.push_context("ModbusPdu");
        wb.write_bit("errorFlag", self.is_error())?;
        wb.write_unsigned("functionFlag", 7, u64::from(function))?;
        match self {
            Self::Error { exception_code, .. } => wb.write_u8("exceptionCode", exception_code.code())?,
            Self::ReadCoilsRequest {
                starting_address,
                quantity,
            }
            | Self::ReadDiscreteInputsRequest {
                starting_address,
                quantity,
            }
            | Self::ReadHoldingRegistersRequest {
                starting_address,
                quantity,
            }
            | Self::ReadInputRegistersRequest {
                starting_address,
                quantity,
            }
            | Self::WriteMultipleCoilsResponse {
                starting_address,
                quantity,
            }
            | Self::WriteMultipleHoldingRegistersResponse {
                starting_address,
                quantity,
            } => write_range(wb, *starting_address, *quantity)?,
            Self::ReadCoilsResponse { value }
            | Self::ReadDiscreteInputsResponse { value }
            | Self::ReadHoldingRegistersResponse { value }
            | Self::ReadInputRegistersResponse { value }
            | Self::ReadWriteMultipleHoldingRegistersResponse { value }
            | Self::ReportServerIdResponse { value } => write_counted_bytes(wb, "value", value)?,
            Self::WriteSingleCoilRequest { address, value }
            | Self::WriteSingleCoilResponse { address, value }
            | Self::WriteSingleRegisterRequest { address, value }
            | Self::WriteSingleRegisterResponse { address, value } => {
                wb.write_u16("address", *address)?;
                wb.write_u16("value", *value)?;
            }
            Self::WriteMultipleCoilsRequest {
                starting_address,
                quantity,
                value,
            }
            | Self::WriteMultipleHoldingRegistersRequest {
                starting_address,
                quantity,
                value,
            } => {
                write_range(wb, *starting_address, *quantity)?;
                write_counted_bytes(wb, "value", value)?;
            }
            Self::ReadWriteMultipleHoldingRegistersRequest {
                read_starting_address,
                read_quantity,
                write_starting_address,
                write_quantity,
                value,
            } => {
                wb.write_u16("readStartingAddress", *read_starting_address)?;
                wb.write_u16("readQuantity", *read_quantity)?;
                wb.write_u16("writeStartingAddress", *write_starting_address)?;
                wb.write_u16("writeQuantity", *write_quantity)?;
                write_counted_bytes(wb, "value", value)?;
            }
            Self::MaskWriteHoldingRegisterRequest {
                reference_address,
                and_mask,
                or_mask,
            }
            | Self::MaskWriteHoldingRegisterResponse {
                reference_address,
                and_mask,
                or_mask,
            } => {
                wb.write_u16("referenceAddress", *reference_address)?;
                wb.write_u16("andMask", *and_mask)?;
                wb.write_u16("orMask", *or_mask)?;
            }
            Self::ReadFifoQueueRequest { fifo_pointer_address } => {
                wb.write_u16("fifoPointerAddress", *fifo_pointer_address)?;
            }
            Self::ReadFifoQueueResponse { fifo_value } => {
                let count = u16::try_from(fifo_value.len())
                    .ok()
                    .filter(|c| *c < u16::MAX / 2)
                    .ok_or_else(|| CodecError::encoding("fifoCount", "too many FIFO values"))?;
                wb.write_u16("byteCount", count * 2 + 2)?;
                wb.write_u16("fifoCount", count)?;
                for value in fifo_value {
                    wb.write_u16("fifoValue", *value)?;
                }
            }
            Self::ReadFileRecordRequest { items } => write_items(wb, items)?,
            Self::ReadFileRecordResponse { items } => write_items(wb, items)?,
            Self::WriteFileRecordRequest { items } | Self::WriteFileRecordResponse { items } => {
                write_items(wb, items)?
            }
            Self::ReadExceptionStatusResponse { value } => wb.write_u8("value", *value)?,
            Self::DiagnosticRequest { sub_function, data } | Self::DiagnosticResponse { sub_function, data } => {
                wb.write_u16("subFunction", *sub_function)?;
                wb.write_u16("data", *data)?;
            }
            Self::GetComEventCounterResponse { status, event_count } => {
                wb.write_u16("status", *status)?;
                wb.write_u16("eventCount", *event_count)?;
            }
            Self::GetComEventLogResponse {
                status,
                event_count,
                message_count,
                events,
            } => {
                wb.write_u8("byteCount", byte_count("events", events.len() + 6)?)?;
                wb.write_u16("status", *status)?;
                wb.write_u16("eventCount", *event_count)?;
                wb.write_u16("messageCount", *message_count)?;
                wb.write_bytes("events", events)?;
            }
            Self::ReadExceptionStatusRequest
            | Self::GetComEventCounterRequest
            | Self::GetComEventLogRequest
            | Self::ReportServerIdRequest => {}
        }
        wb.pop_context();
        Ok(())
    }

    fn length_in_bits(&self) -> u64 {
        let body_bytes = match self {
            Self::Error { .. } => 1,
            Self::ReadCoilsRequest { .. }
            | Self::ReadDiscreteInputsRequest { .. }
            | Self::ReadHoldingRegistersRequest { .. }
            | Self::ReadInputRegistersRequest { .. }
            | Self::WriteMultipleCoilsResponse { .. }
            | Self::WriteMultipleHoldingRegistersResponse { .. }
            | Self::WriteSingleCoilRequest { .. }
            | Self::WriteSingleCoilResponse { .. }
            | Self::WriteSingleRegisterRequest { .. }
            | Self::WriteSingleRegisterResponse { .. }
            | Self::DiagnosticRequest { .. }
            | Self::DiagnosticResponse { .. }
            | Self::GetComEventCounterResponse { .. } => 4,
            Self::ReadCoilsResponse { value }
            | Self::ReadDiscreteInputsResponse { value }
            | Self::ReadHoldingRegistersResponse { value }
            | Self::ReadInputRegistersResponse { value }
            | Self::ReadWriteMultipleHoldingRegistersResponse { value }
            | Self::ReportServerIdResponse { value } => 1 + value.len() as u64,
            Self::WriteMultipleCoilsRequest { value, .. } | Self::WriteMultipleHoldingRegistersRequest { value, .. } => {
                5 + value.len() as u64
            }
            Self::ReadWriteMultipleHoldingRegistersRequest { value, .. } => 9 + value.len() as u64,
            Self::MaskWriteHoldingRegisterRequest { .. } | Self::MaskWriteHoldingRegisterResponse { .. } => 6,
            Self::ReadFifoQueueRequest { .. } => 2,
            Self::ReadFifoQueueResponse { fifo_value } => 4 + 2 * fifo_value.len() as u64,
            Self::ReadFileRecordRequest { items } => 1 + array_length_in_bits(items) / 8,
            Self::ReadFileRecordResponse { items } => 1 + array_length_in_bits(items) / 8,
            Self::WriteFileRecordRequest { items } | Self::WriteFileRecordResponse { items } => {
                1 + array_length_in_bits(items) / 8
            }
            Self::ReadExceptionStatusResponse { .. } => 1,
            Self::GetComEventLogResponse { events, .. } => 7 + events.len() as u64,
            Self::ReadExceptionStatusRequest
            | Self::GetComEventCounterRequest
            | Self::GetComEventLogRequest
            | Self::ReportServerIdRequest => 0,
        };
        (1 + body_bytes) * 8
    }
}

/// Sub-request of Read File Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFileRecordRequestItem {
    /// Always 6.
    pub reference_type: u8,
    /// File number, 1-based.
    pub file_number: u16,
    /// First record within the file.
    pub record_number: u16,
    /// Number of registers to read.
    pub record_length: u16,
}

impl Message for ReadFileRecordRequestItem {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        Ok(Self {
            reference_type: rb.read_u8("referenceType")?,
            file_number: rb.read_u16("fileNumber")?,
            record_number: rb.read_u16("recordNumber")?,
            record_length: rb.read_u16("recordLength")?,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_u8("referenceType", self.reference_type)?;
        wb.write_u16("fileNumber", self.file_number)?;
        wb.write_u16("recordNumber", self.record_number)?;
        wb.write_u16("recordLength", self.record_length)
    }

    fn length_in_bits(&self) -> u64 {
        7 * 8
    }
}

/// Sub-response of Read File Record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileRecordResponseItem {
    /// Always 6.
    pub reference_type: u8,
    /// Register contents, big-endian words.
    pub data: Vec<u8>,
}

impl Message for ReadFileRecordResponseItem {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        let position = rb.position();
        let data_length = rb.read_u8("dataLength")?;
        let data_bytes = usize::from(data_length)
            .checked_sub(1)
            .ok_or_else(|| CodecError::invalid_frame_at("dataLength", position, "file record response length is 0"))?;
        Ok(Self {
            reference_type: rb.read_u8("referenceType")?,
            data: rb.read_bytes("data", data_bytes)?,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_u8("dataLength", byte_count("data", self.data.len() + 1)?)?;
        wb.write_u8("referenceType", self.reference_type)?;
        wb.write_bytes("data", &self.data)
    }

    fn length_in_bits(&self) -> u64 {
        (2 + self.data.len() as u64) * 8
    }
}

/// Sub-request of Write File Record; the response echoes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFileRecordItem {
    /// Always 6.
    pub reference_type: u8,
    /// File number, 1-based.
    pub file_number: u16,
    /// First record within the file.
    pub record_number: u16,
    /// Register contents; the length must be even.
    pub record_data: Vec<u8>,
}

impl Message for WriteFileRecordItem {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        let reference_type = rb.read_u8("referenceType")?;
        let file_number = rb.read_u16("fileNumber")?;
        let record_number = rb.read_u16("recordNumber")?;
        let record_length = rb.read_u16("recordLength")?;
        Ok(Self {
            reference_type,
            file_number,
            record_number,
            record_data: rb.read_bytes("recordData", usize::from(record_length) * 2)?,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        if self.record_data.len() % 2 != 0 {
            return Err(CodecError::encoding("recordData", "record data must be whole registers"));
        }
        let record_length = u16::try_from(self.record_data.len() / 2)
            .map_err(|_| CodecError::encoding("recordLength", "record data is too long"))?;
        wb.write_u8("referenceType", self.reference_type)?;
        wb.write_u16("fileNumber", self.file_number)?;
        wb.write_u16("recordNumber", self.record_number)?;
        wb.write_u16("recordLength", record_length)?;
        wb.write_bytes("recordData", &self.record_data)
    }

    fn length_in_bits(&self) -> u64 {
        (7 + self.record_data.len() as u64) * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(hex: &str) -> Vec<u8> {
        hex::decode(hex.replace(' ', "")).unwrap()
    }

    fn round_trip(hex: &str, response: bool) -> ModbusPdu {
        let data = bytes(hex);
        let pdu = ModbusPdu::from_bytes(&data, response).unwrap();
        assert_eq!(pdu.to_bytes().unwrap(), data, "{:?}", pdu);
        assert_eq!(pdu.length_in_bytes(), data.len());
        pdu
    }

    #[test]
    fn test_register_read() {
        let request = round_trip("03 006B 0003", false);
        assert_eq!(
            request,
            ModbusPdu::ReadHoldingRegistersRequest {
                starting_address: 0x6B,
                quantity: 3
            }
        );
        let response = round_trip("03 06 022B 0000 0064", true);
        assert_eq!(response.function_code(), FC_READ_HOLDING_REGISTERS);
        assert!(response.is_response());
        assert!(!request.is_response());
    }

    #[test]
    fn test_same_code_differs_by_direction() {
        let data = bytes("01 03 CD6B 05");
        match round_trip("01 03 CD6B 05", false) {
            ModbusPdu::ReadCoilsRequest {
                starting_address,
                quantity,
            } => assert_eq!((starting_address, quantity), (0x03CD, 0x6B05)),
            other => panic!("unexpected {:?}", other),
        }
        match ModbusPdu::from_bytes(&data, true).unwrap() {
            ModbusPdu::ReadCoilsResponse { value } => assert_eq!(value, vec![0xCD, 0x6B, 0x05]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_keeps_function_code() {
        let pdu = round_trip("81 01", true);
        assert_eq!(
            pdu,
            ModbusPdu::Error {
                function: FC_READ_COILS,
                exception_code: ModbusErrorCode::IllegalFunction
            }
        );
        assert!(matches!(
            ModbusPdu::from_bytes(&[0x83, 0x09], true),
            Err(CodecError::UnknownEnumValue { .. })
        ));
    }

    #[test]
    fn test_writes() {
        round_trip("05 00AC FF00", false);
        round_trip("06 0001 0003", true);
        let pdu = round_trip("0F 0013 000A 02 CD01", false);
        assert!(matches!(pdu, ModbusPdu::WriteMultipleCoilsRequest { ref value, .. } if value == &[0xCD, 0x01]));
        round_trip("10 0001 0002 04 000A 0102", false);
        round_trip("10 0001 0002", true);
        round_trip("16 0004 00F2 0025", false);
        round_trip("17 0003 0006 000E 0003 06 00FF 00FF 00FF", false);
        round_trip("17 0C 00FE 0ACD 0001 0003 000D 00FF", true);
    }

    #[test]
    fn test_file_records() {
        let request = round_trip("14 0E 06 0004 0001 0002 06 0003 0009 0002", false);
        match request {
            ModbusPdu::ReadFileRecordRequest { items } => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].file_number, 3);
                assert_eq!(items[1].record_number, 9);
            }
            other => panic!("unexpected {:?}", other),
        }
        let response = round_trip("14 0C 05 06 0DFE 0020 05 06 33CD 0040", true);
        assert!(matches!(response, ModbusPdu::ReadFileRecordResponse { ref items } if items[1].data == [0x33, 0xCD, 0x00, 0x40]));
        round_trip("15 0D 06 0004 0007 0003 06AF 04BE 100D", false);
    }

    #[test]
    fn test_odd_record_data_rejected() {
        let pdu = ModbusPdu::WriteFileRecordRequest {
            items: vec![WriteFileRecordItem {
                reference_type: 6,
                file_number: 1,
                record_number: 0,
                record_data: vec![0x01],
            }],
        };
        assert!(matches!(pdu.to_bytes(), Err(CodecError::Encoding { .. })));
    }

    #[test]
    fn test_serial_line_functions() {
        round_trip("07", false);
        round_trip("07 6D", true);
        round_trip("08 0000 A537", false);
        round_trip("0B 0000 0108", true);
        let log = round_trip("0C 08 0000 0108 0121 20 00", true);
        assert!(matches!(log, ModbusPdu::GetComEventLogResponse { ref events, message_count: 0x121, .. } if events == &[0x20, 0x00]));
        round_trip("11 03 01 FF 00", true);
        assert!(ModbusPdu::from_bytes(&bytes("0C 05 0000 0000 0000"), true).is_err());
    }

    #[test]
    fn test_fifo_queue() {
        let pdu = round_trip("18 0006 0002 01B8 1284", true);
        assert_eq!(
            pdu,
            ModbusPdu::ReadFifoQueueResponse {
                fifo_value: vec![0x01B8, 0x1284]
            }
        );
        round_trip("18 04DE", false);
    }

    #[test]
    fn test_byte_counts_bound_the_pdu() {
        let err = ModbusPdu::from_bytes(&bytes("18 0008 0002 01B8 1284 0000"), true).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidFrame { ref context, position: Some(24), .. } if context == "fifoValue"),
            "{}",
            err
        );
        assert!(matches!(
            ModbusPdu::from_bytes(&bytes("10 0001 0002 02 000A"), false),
            Err(CodecError::InvalidFrame { position: Some(40), .. })
        ));
        assert!(matches!(
            ModbusPdu::from_bytes(&bytes("0F 0013 000A 01 CD"), false),
            Err(CodecError::InvalidFrame { position: Some(40), .. })
        ));
        assert!(matches!(
            ModbusPdu::from_bytes(&bytes("0C 05 0000 0000 0000"), true),
            Err(CodecError::InvalidFrame { position: Some(8), .. })
        ));
        assert!(matches!(
            ModbusPdu::from_bytes(&bytes("14 02 00 06"), true),
            Err(CodecError::InvalidFrame { position: Some(16), .. })
        ));
    }

    #[test]
    fn test_unsupported_function() {
        let err = ModbusPdu::from_bytes(&bytes("2B 0E 01 00"), false).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedDiscriminator { position: 8, .. }), "{}", err);
        assert!(err.to_string().contains("0x2B"));
    }
}
