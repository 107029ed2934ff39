//! # plc-wire
//!
//! Binary wire codecs for industrial protocols: Siemens S7 (ISO-on-TCP),
//! Modbus (TCP, RTU and ASCII) and Profinet IO connection blocks.
//!
//! This is a **codec-first** library. Parsing and serializing are pure
//! functions over in-memory buffers; no connection state, polling or
//! retries. A small synchronous [`StreamTransport`] is included for
//! delimiting frames on a TCP stream.
//!
//! ## Features
//!
//! - **Bit-exact** - bit-packed flags, implicit lengths, reserved and const
//!   fields, checksums and count/length/terminated arrays
//! - **Typed codecs** - every protocol family is a closed Rust enum
//! - **Dynamic schemas** - the same layouts as a [`schema::TypeRegistry`]
//!   with an expression language for computed fields
//! - **Tag addresses** - `%DB1.DBX0.3:BOOL`, `holding-register:1:REAL[2]`
//! - **No panics** - all errors returned as `Result<T, CodecError>`
//!
//! ## Quick Start
//!
//! ```
//! use plc_wire::s7::{self, S7Tag};
//! use plc_wire::Message;
//!
//! let tag: S7Tag = "%DB1.DBW0:INT".parse()?;
//! let request = s7::read_var_request(1, &[tag])?;
//! let bytes = request.to_bytes()?;
//!
//! // parse it back as any received frame would be
//! let parsed = s7::TpktPacket::from_bytes(&bytes, ())?;
//! assert_eq!(parsed, request);
//! # Ok::<(), plc_wire::CodecError>(())
//! ```
//!
//! ## Protocols
//!
//! | Module | Frames | Tags |
//! |--------|--------|------|
//! | [`s7`] | TPKT, COTP, S7 job / ack-data / user-data | `%DB1.DBW0:INT`, `%M0.1:BOOL` |
//! | [`modbus`] | MBAP, RTU, ASCII, all standard function codes | `holding-register:1`, `400001` |
//! | [`profinet`] | AR request / response blocks, DCE/RPC object UUID | - |
//!
//! ## Reading values
//!
//! ```
//! use plc_wire::modbus::{decode_read_response, read_request, ModbusPdu, ModbusTag};
//! use plc_wire::{PlcResponseCode, PlcValue};
//!
//! let tag: ModbusTag = "holding-register:1:INT".parse()?;
//! let request = read_request(&tag)?;
//! assert_eq!(request.function_code(), 0x03);
//!
//! let response = ModbusPdu::ReadHoldingRegistersResponse { value: vec![0x00, 0x2A] };
//! let (code, value) = decode_read_response(&tag, &response)?;
//! assert_eq!(code, PlcResponseCode::Ok);
//! assert_eq!(value, PlcValue::Int(42));
//! # Ok::<(), plc_wire::CodecError>(())
//! ```
//!
//! ## Tolerance
//!
//! Decoding is tolerant by default: a reserved field with unexpected bits
//! is recorded as a [`Warning`] on the [`ReadBuffer`] and the message still
//! parses; received checksums are passed through. [`CodecOptions`] turns
//! both into errors:
//!
//! ```
//! use plc_wire::modbus::ModbusRtuAdu;
//! use plc_wire::{CodecError, CodecOptions, Message};
//!
//! let corrupted = hex::decode("01030000000ac5ce").unwrap();
//! assert!(ModbusRtuAdu::from_bytes(&corrupted, false).is_ok());
//!
//! let strict = CodecOptions::new().with_checksum_validation(true);
//! assert!(matches!(
//!     ModbusRtuAdu::from_bytes_with(&corrupted, false, strict),
//!     Err(CodecError::ChecksumMismatch { .. })
//! ));
//! ```
//!
//! ## Error Handling
//!
//! ```
//! use plc_wire::s7::TpktPacket;
//! use plc_wire::{CodecError, Message};
//!
//! match TpktPacket::from_bytes(&[0x03, 0x00, 0x00], ()) {
//!     Err(CodecError::EndOfData { context, .. }) => println!("need more bytes for {}", context),
//!     Err(CodecError::UnsupportedDiscriminator { type_name, value, position }) => {
//!         println!("unknown {} {} at bit {}", type_name, value, position);
//!     }
//!     Err(e) => println!("Error: {}", e),
//!     Ok(packet) => println!("{:?}", packet),
//! }
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`](https://docs.rs/log) facade; the
//! crate never installs a logger.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod buffer;
mod error;
mod plc_value;
mod request;
mod transport;
mod value;

pub mod expression;
pub mod field;
pub mod modbus;
pub mod profinet;
pub mod s7;
pub mod schema;

// Public re-exports
pub use buffer::{encoded_string_len, ByteOrder, CodecOptions, ReadBuffer, TextEncoding, Warning, WriteBuffer};
pub use error::{CodecError, Result};
pub use field::Message;
pub use plc_value::{DateAndTime, PlcValue};
pub use request::{
    BrowseItem, BrowseRequest, BrowseRequestBuilder, BrowseResponse, PlcResponseCode, ReadRequest, ReadRequestBuilder,
    ReadResponse, ResponseItem, SubscriptionEvent, SubscriptionRequest, SubscriptionRequestBuilder, SubscriptionType,
    WriteRequest, WriteRequestBuilder, WriteResponse,
};
pub use transport::{
    FrameStatus, Framing, MbapFraming, StreamTransport, TpktFraming, TransportConfig, DEFAULT_TIMEOUT, MAX_MBAP_FRAME,
    MAX_TPKT_FRAME,
};
pub use value::{ParsedMessage, Value};
