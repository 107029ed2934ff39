//! Profinet IO connection-management structures.
//!
//! Covers the identifiers carried in a DCE/RPC connect call ([`Uuid`],
//! [`MacAddress`], [`DceRpcObjectUuid`]), the [`IoDataObject`] describing
//! where a submodule's data sits in a cyclic frame, and the AR request and
//! response blocks of the [`PnIoCmBlock`] family. [`registry()`] describes
//! the same layouts for the schema interpreter.
//!
//! ```
//! use plc_wire::profinet::IoDataObject;
//! use plc_wire::Message;
//!
//! let obj = IoDataObject::from_bytes(&[0x00, 0x01, 0x00, 0x02, 0x00, 0x03], ()).unwrap();
//! assert_eq!((obj.slot_number, obj.sub_slot_number, obj.io_frame_offset), (1, 2, 3));
//! ```

mod block;
mod registry;
mod types;

pub use block::{
    ArBlockRequest, ArBlockResponse, ArType, CompanionArType, PnIoCmBlock, PnIoCmBlockType, PnIoCmState,
    BLOCK_HEADER_SIZE, DEFAULT_ACTIVITY_TIMEOUT_FACTOR, DEFAULT_UDP_RT_PORT,
};
pub use registry::registry;
pub use types::{
    DceRpcObjectUuid, IoDataObject, MacAddress, Uuid, OBJECT_UUID_DATA1, OBJECT_UUID_DATA2, OBJECT_UUID_DATA3,
    OBJECT_UUID_DATA4,
};
