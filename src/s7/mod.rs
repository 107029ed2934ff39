//! Siemens S7 over ISO-on-TCP.
//!
//! Frames are layered as TPKT (RFC 1006) around COTP (ISO 8073) around the
//! S7 message itself:
//!
//! ```text
//! +------+----------------+-------------------------------------------+
//! | TPKT | COTP header    | S7: header | parameter | payload          |
//! | 4 B  | len + 1 B      | 10/12 B    | ...       | ...              |
//! +------+----------------+-------------------------------------------+
//! ```
//!
//! Typed codecs for every layer live in the submodules; [`registry()`] holds
//! the same layout as a dynamic [`TypeRegistry`](crate::schema::TypeRegistry).
//! Tags such as `%DB1.DBW0:INT` are parsed by [`S7Tag`] and turned into
//! request frames by the functions re-exported from `protocol`.

mod cotp;
mod data_item;
mod message;
mod protocol;
mod registry;
mod tag;
mod tpkt;
mod types;

pub use cotp::{CotpPacket, CotpPacketKind, CotpParameter};
pub use data_item::{decode_value, encode_value};
pub use message::{
    S7Address, S7AddressAny, S7Message, S7MessageKind, S7Parameter, S7ParameterUserDataItem, S7Payload,
    S7PayloadArgs, S7PayloadUserDataItem, S7VarPayloadDataItem, S7VarPayloadStatusItem, S7VarRequestParameterItem,
    MAX_BYTE_ADDRESS, S7_PROTOCOL_ID,
};
pub use protocol::{
    connection_request, decode_read_response, decode_response_code, decode_write_response, encode_tsap, frame,
    message_of, negotiated_parameters, read_var_request, setup_communication, write_var_request,
    S7ConnectionConfig, DEVICE_GROUP_OS, DEVICE_GROUP_PG_OR_PC,
};
pub use registry::registry;
pub use tag::{S7Tag, DEFAULT_STRING_LENGTH, MAX_BLOCK_NUMBER};
pub use tpkt::{TpktPacket, TPKT_HEADER_SIZE, TPKT_PROTOCOL_ID};
pub use types::{CotpProtocolClass, CotpTpduSize, DataTransportErrorCode, DataTransportSize, MemoryArea, TransportSize};
