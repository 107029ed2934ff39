//! Identifiers and small fixed structures shared by Profinet blocks.

use std::fmt;
use std::str::FromStr;

use crate::buffer::{ByteOrder, ReadBuffer, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::field::{read_const_ordered, write_const_ordered, Message};

/// A 128-bit UUID carried as 16 raw bytes.
///
/// # Example
///
/// ```
/// use plc_wire::profinet::Uuid;
///
/// let uuid: Uuid = "dea00000-6c97-11d1-8271-000100020003".parse().unwrap();
/// assert_eq!(uuid.as_bytes()[0], 0xDE);
/// assert_eq!(uuid.to_string(), "dea00000-6c97-11d1-8271-000100020003");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// Wraps raw bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw bytes in wire order.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Message for Uuid {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        let position = rb.position();
        let bytes = rb.read_bytes("data", 16)?;
        let data = bytes
            .try_into()
            .map_err(|_| CodecError::invalid_frame_at("Uuid", position, "uuid is not 16 bytes"))?;
        Ok(Self(data))
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_bytes("data", &self.0)
    }

    fn length_in_bits(&self) -> u64 {
        128
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(self.0);
        write!(f, "{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
    }
}

impl FromStr for Uuid {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(&digits).map_err(|e| CodecError::invalid_parameter("uuid", e.to_string()))?;
        let data = bytes
            .try_into()
            .map_err(|_| CodecError::invalid_parameter("uuid", format!("'{}' is not 16 bytes", s)))?;
        Ok(Self(data))
    }
}

/// A 48-bit Ethernet MAC address.
///
/// # Example
///
/// ```
/// use plc_wire::profinet::MacAddress;
///
/// let mac: MacAddress = "00:1b:1b:12:34:56".parse().unwrap();
/// assert_eq!(mac.as_bytes(), &[0x00, 0x1B, 0x1B, 0x12, 0x34, 0x56]);
/// assert_eq!(mac.to_string(), "00:1b:1b:12:34:56");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Wraps raw bytes.
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw bytes in wire order.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl Message for MacAddress {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        let position = rb.position();
        let bytes = rb.read_bytes("address", 6)?;
        let address = bytes
            .try_into()
            .map_err(|_| CodecError::invalid_frame_at("MacAddress", position, "mac address is not 6 bytes"))?;
        Ok(Self(address))
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_bytes("address", &self.0)
    }

    fn length_in_bits(&self) -> u64 {
        48
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{:02x}", b)).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl FromStr for MacAddress {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(CodecError::invalid_parameter("mac", format!("'{}' does not have 6 octets", s)));
        }
        let mut address = [0u8; 6];
        for (slot, part) in address.iter_mut().zip(parts) {
            *slot = u8::from_str_radix(part, 16)
                .map_err(|e| CodecError::invalid_parameter("mac", format!("'{}': {}", part, e)))?;
        }
        Ok(Self(address))
    }
}

/// Fixed leading part of every Profinet IO object UUID.
pub const OBJECT_UUID_DATA1: u32 = 0xDEA0_0000;
/// Second group of the object UUID.
pub const OBJECT_UUID_DATA2: u16 = 0x6C97;
/// Third group of the object UUID.
pub const OBJECT_UUID_DATA3: u16 = 0x11D1;
/// First two bytes of the fourth group.
pub const OBJECT_UUID_DATA4: u16 = 0x8271;

/// The DCE/RPC object UUID of a Profinet IO device:
/// `DEA00000-6C97-11D1-8271-IIIIDDDDVVVV`.
///
/// The first three groups follow the byte order of the enclosing DCE/RPC
/// packet (its data representation flag); the rest is a byte array and
/// therefore always big-endian. Parse it with that order as argument:
///
/// ```
/// use plc_wire::profinet::DceRpcObjectUuid;
/// use plc_wire::{ByteOrder, Message};
///
/// let bytes = hex::decode("0000a0de976cd111827110010203002a").unwrap();
/// let uuid = DceRpcObjectUuid::from_bytes(&bytes, ByteOrder::LittleEndian).unwrap();
/// assert_eq!(uuid.vendor_id, 0x002A);
/// assert_eq!(uuid.to_string(), "DEA00000-6C97-11D1-8271-10010203002A");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DceRpcObjectUuid {
    /// Interface number (upper 4 bits of the instance).
    pub interface_number: u8,
    /// Node number (lower 12 bits of the instance).
    pub node_number: u16,
    /// Device id assigned by the vendor.
    pub device_id: u16,
    /// PI vendor id.
    pub vendor_id: u16,
    /// Byte order of the first three groups.
    pub byte_order: ByteOrder,
}

impl DceRpcObjectUuid {
    /// Object UUID of interface 0, node 1, in big-endian representation.
    pub fn new(device_id: u16, vendor_id: u16) -> Self {
        Self {
            interface_number: 0,
            node_number: 1,
            device_id,
            vendor_id,
            byte_order: ByteOrder::BigEndian,
        }
    }

    /// The 16-bit instance: interface number and node number.
    pub fn instance(&self) -> u16 {
        (u16::from(self.interface_number) << 12) | (self.node_number & 0x0FFF)
    }
}

impl Message for DceRpcObjectUuid {
    type Args = ByteOrder;

    fn parse(rb: &mut ReadBuffer<'_>, byte_order: ByteOrder) -> Result<Self> {
        rb.push_context("DceRpc_ObjectUuid");
        read_const_ordered(rb, "data1", 32, u64::from(OBJECT_UUID_DATA1), byte_order)?;
        read_const_ordered(rb, "data2", 16, u64::from(OBJECT_UUID_DATA2), byte_order)?;
        read_const_ordered(rb, "data3", 16, u64::from(OBJECT_UUID_DATA3), byte_order)?;
        read_const_ordered(rb, "data4", 16, u64::from(OBJECT_UUID_DATA4), ByteOrder::BigEndian)?;
        let interface_number = rb.read_unsigned_ordered("interfaceNumber", 4, ByteOrder::BigEndian)? as u8;
        let node_number = rb.read_unsigned_ordered("nodeNumber", 12, ByteOrder::BigEndian)? as u16;
        let device_id = rb.read_unsigned_ordered("deviceId", 16, ByteOrder::BigEndian)? as u16;
        let vendor_id = rb.read_unsigned_ordered("vendorId", 16, ByteOrder::BigEndian)? as u16;
        rb.pop_context();
        Ok(Self {
            interface_number,
            node_number,
            device_id,
            vendor_id,
            byte_order,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        if self.interface_number > 0x0F || self.node_number > 0x0FFF {
            return Err(CodecError::encoding(
                "instance",
                format!("interface {} / node {} exceed 4 / 12 bits", self.interface_number, self.node_number),
            ));
        }
        write_const_ordered(wb, "data1", 32, u64::from(OBJECT_UUID_DATA1), self.byte_order)?;
        write_const_ordered(wb, "data2", 16, u64::from(OBJECT_UUID_DATA2), self.byte_order)?;
        write_const_ordered(wb, "data3", 16, u64::from(OBJECT_UUID_DATA3), self.byte_order)?;
        write_const_ordered(wb, "data4", 16, u64::from(OBJECT_UUID_DATA4), ByteOrder::BigEndian)?;
        wb.write_unsigned_ordered("interfaceNumber", 4, u64::from(self.interface_number), ByteOrder::BigEndian)?;
        wb.write_unsigned_ordered("nodeNumber", 12, u64::from(self.node_number), ByteOrder::BigEndian)?;
        wb.write_unsigned_ordered("deviceId", 16, u64::from(self.device_id), ByteOrder::BigEndian)?;
        wb.write_unsigned_ordered("vendorId", 16, u64::from(self.vendor_id), ByteOrder::BigEndian)
    }

    fn length_in_bits(&self) -> u64 {
        128
    }
}

impl fmt::Display for DceRpcObjectUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:04X}{:04X}{:04X}",
            OBJECT_UUID_DATA1,
            OBJECT_UUID_DATA2,
            OBJECT_UUID_DATA3,
            OBJECT_UUID_DATA4,
            self.instance(),
            self.device_id,
            self.vendor_id
        )
    }
}

/// Position of one submodule's data inside a cyclic IO frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IoDataObject {
    /// Slot of the module.
    pub slot_number: u16,
    /// Subslot of the submodule.
    pub sub_slot_number: u16,
    /// Offset of the data in the IO frame.
    pub io_frame_offset: u16,
}

impl Message for IoDataObject {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        Ok(Self {
            slot_number: rb.read_u16("slotNumber")?,
            sub_slot_number: rb.read_u16("subSlotNumber")?,
            io_frame_offset: rb.read_u16("ioFrameOffset")?,
        })
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_u16("slotNumber", self.slot_number)?;
        wb.write_u16("subSlotNumber", self.sub_slot_number)?;
        wb.write_u16("ioFrameOffset", self.io_frame_offset)
    }

    fn length_in_bits(&self) -> u64 {
        48
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    #[test]
    fn test_io_data_object() {
        let bytes = [0x00, 0x01, 0x00, 0x02, 0x00, 0x03];
        let obj = IoDataObject::from_bytes(&bytes, ()).unwrap();
        assert_eq!(
            obj,
            IoDataObject {
                slot_number: 1,
                sub_slot_number: 2,
                io_frame_offset: 3
            }
        );
        assert_eq!(obj.to_bytes().unwrap(), bytes);
        assert_eq!(obj.length_in_bytes(), 6);
    }

    #[test]
    fn test_io_data_object_truncated() {
        let err = IoDataObject::from_bytes(&[0x00, 0x01, 0x00], ()).unwrap_err();
        assert!(err.is_end_of_data());
    }

    #[test]
    fn test_object_uuid_big_endian() {
        let bytes = hex("dea00000 6c97 11d1 8271 1001 0203 002a");
        let uuid = DceRpcObjectUuid::from_bytes(&bytes, ByteOrder::BigEndian).unwrap();
        assert_eq!(uuid.interface_number, 1);
        assert_eq!(uuid.node_number, 1);
        assert_eq!(uuid.device_id, 0x0203);
        assert_eq!(uuid.vendor_id, 0x002A);
        assert_eq!(uuid.instance(), 0x1001);
        assert_eq!(uuid.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_object_uuid_mixed_byte_order() {
        let bytes = hex("0000a0de 976c d111 8271 1001 0203 002a");
        let uuid = DceRpcObjectUuid::from_bytes(&bytes, ByteOrder::LittleEndian).unwrap();
        assert_eq!(uuid.device_id, 0x0203);
        assert_eq!(uuid.to_bytes().unwrap(), bytes);

        // same bytes read big-endian do not carry the constant
        let err = DceRpcObjectUuid::from_bytes(&bytes, ByteOrder::BigEndian).unwrap_err();
        assert!(matches!(err, CodecError::ConstValueMismatch { ref field, .. } if field == "data1"));
    }

    #[test]
    fn test_object_uuid_wrong_data4() {
        let bytes = hex("dea00000 6c97 11d1 7182 1001 0203 002a");
        let err = DceRpcObjectUuid::from_bytes(&bytes, ByteOrder::BigEndian).unwrap_err();
        assert!(matches!(err, CodecError::ConstValueMismatch { ref field, .. } if field == "data4"));
    }

    #[test]
    fn test_object_uuid_instance_overflow() {
        let mut uuid = DceRpcObjectUuid::new(1, 2);
        uuid.node_number = 0x1000;
        assert!(matches!(uuid.to_bytes(), Err(CodecError::Encoding { .. })));
    }

    #[test]
    fn test_uuid_parse_errors() {
        assert!("dea00000-6c97".parse::<Uuid>().is_err());
        assert!("zz".parse::<Uuid>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:gg".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_wire() {
        let mac = MacAddress::new([0x08, 0x00, 0x06, 0x01, 0x02, 0x03]);
        assert_eq!(mac.to_bytes().unwrap(), vec![0x08, 0x00, 0x06, 0x01, 0x02, 0x03]);
        assert_eq!("08-00-06-01-02-03".parse::<MacAddress>().unwrap(), mac);
    }
}
