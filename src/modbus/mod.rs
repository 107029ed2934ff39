//! Modbus over TCP, RTU and ASCII.
//!
//! The PDU is the same on every transport; only the wrapping differs:
//!
//! ```text
//! TCP:   | transaction | protocol | length | unit | PDU |
//! RTU:   | address | PDU | CRC-16 (LE) |
//! ASCII: ':' hex( address | PDU | LRC ) CR LF
//! ```
//!
//! [`ModbusPdu`] and the ADU types are the typed codec; [`registry()`]
//! describes the same layout as a dynamic
//! [`TypeRegistry`](crate::schema::TypeRegistry). [`ModbusTag`] parses
//! addresses such as `holding-register:1:REAL` or `400001`, and the request
//! helpers turn tags into PDUs and responses into values.

mod adu;
mod pdu;
mod protocol;
mod registry;
mod tag;

pub use adu::{
    crc16, decode_ascii_frame, encode_ascii_frame, lrc, ModbusAsciiAdu, ModbusRtuAdu, ModbusTcpAdu, MBAP_HEADER_SIZE,
    MODBUS_PROTOCOL_ID, MODBUS_TCP_PORT,
};
pub use pdu::{
    ModbusErrorCode, ModbusPdu, ReadFileRecordRequestItem, ReadFileRecordResponseItem, WriteFileRecordItem,
    FC_DIAGNOSTIC, FC_GET_COM_EVENT_COUNTER, FC_GET_COM_EVENT_LOG, FC_MASK_WRITE_HOLDING_REGISTER, FC_READ_COILS,
    FC_READ_DISCRETE_INPUTS, FC_READ_EXCEPTION_STATUS, FC_READ_FIFO_QUEUE, FC_READ_FILE_RECORD,
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS, FC_REPORT_SERVER_ID,
    FC_WRITE_FILE_RECORD, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_HOLDING_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER,
};
pub use protocol::{
    decode_read_response, decode_value, decode_write_response, encode_value, extended_register_groups, read_request,
    response_code, write_request, write_single_coil_request, FILE_RECORD_REFERENCE_TYPE, MAX_READ_BITS,
    MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS,
};
pub use registry::registry;
pub use tag::{ModbusArea, ModbusDataType, ModbusTag, MAX_ADDRESS, MAX_EXTENDED_ADDRESS, REGISTERS_PER_FILE_RECORD};
