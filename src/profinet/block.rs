//! PNIO connection-management blocks.
//!
//! Every block starts with a 16-bit block type followed by the block length
//! (bytes after the length field) and a two-byte version. Only the AR
//! (application relation) request and response have a concrete layout here;
//! other known block types fail with `UnsupportedDiscriminator`.

use std::fmt;

use crate::buffer::{ByteOrder, ReadBuffer, TextEncoding, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::field::{read_enum, read_reserved, write_reserved, Message};

use super::types::{DceRpcObjectUuid, MacAddress, Uuid};

/// Default UDP port for RT_CLASS_UDP frames.
pub const DEFAULT_UDP_RT_PORT: u16 = 0x8892;

/// Default activity timeout factor (units of 100 ms).
pub const DEFAULT_ACTIVITY_TIMEOUT_FACTOR: u16 = 600;

/// Size of the block type and length fields, not counted by the block length.
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Block type code of a PNIO CM block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum PnIoCmBlockType {
    ArBlockReq,
    IocrBlockReq,
    AlarmCrBlockReq,
    ExpectedSubmoduleBlockReq,
    IodControlReq,
    ArBlockRes,
    IocrBlockRes,
    AlarmCrBlockRes,
    ModuleDiffBlock,
    IodControlRes,
}

impl PnIoCmBlockType {
    /// Every block type in declaration order.
    pub const ALL: [PnIoCmBlockType; 10] = [
        Self::ArBlockReq,
        Self::IocrBlockReq,
        Self::AlarmCrBlockReq,
        Self::ExpectedSubmoduleBlockReq,
        Self::IodControlReq,
        Self::ArBlockRes,
        Self::IocrBlockRes,
        Self::AlarmCrBlockRes,
        Self::ModuleDiffBlock,
        Self::IodControlRes,
    ];

    /// Wire code.
    pub fn code(self) -> u16 {
        match self {
            Self::ArBlockReq => 0x0101,
            Self::IocrBlockReq => 0x0102,
            Self::AlarmCrBlockReq => 0x0103,
            Self::ExpectedSubmoduleBlockReq => 0x0104,
            Self::IodControlReq => 0x0110,
            Self::ArBlockRes => 0x8101,
            Self::IocrBlockRes => 0x8102,
            Self::AlarmCrBlockRes => 0x8103,
            Self::ModuleDiffBlock => 0x8104,
            Self::IodControlRes => 0x8110,
        }
    }

    /// Symbol as used in schema definitions.
    pub fn name(self) -> &'static str {
        match self {
            Self::ArBlockReq => "AR_BLOCK_REQ",
            Self::IocrBlockReq => "IOCR_BLOCK_REQ",
            Self::AlarmCrBlockReq => "ALARM_CR_BLOCK_REQ",
            Self::ExpectedSubmoduleBlockReq => "EXPECTED_SUBMODULE_BLOCK_REQ",
            Self::IodControlReq => "IOD_CONTROL_REQ",
            Self::ArBlockRes => "AR_BLOCK_RES",
            Self::IocrBlockRes => "IOCR_BLOCK_RES",
            Self::AlarmCrBlockRes => "ALARM_CR_BLOCK_RES",
            Self::ModuleDiffBlock => "MODULE_DIFF_BLOCK",
            Self::IodControlRes => "IOD_CONTROL_RES",
        }
    }

    /// Looks a block type up by wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for PnIoCmBlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of application relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArType {
    /// IO controller AR.
    IoController,
    /// IO supervisor AR (device access or diagnosis).
    IoSupervisor,
    /// IO controller AR with RT_CLASS_3.
    IoControllerRtClass3,
    /// IO controller AR for system redundancy.
    IoControllerSystemRedundancy,
}

impl ArType {
    /// Every AR type in declaration order.
    pub const ALL: [ArType; 4] = [
        Self::IoController,
        Self::IoSupervisor,
        Self::IoControllerRtClass3,
        Self::IoControllerSystemRedundancy,
    ];

    /// Wire code.
    pub fn code(self) -> u16 {
        match self {
            Self::IoController => 0x0001,
            Self::IoSupervisor => 0x0006,
            Self::IoControllerRtClass3 => 0x0010,
            Self::IoControllerSystemRedundancy => 0x0020,
        }
    }

    /// Symbol as used in schema definitions.
    pub fn name(self) -> &'static str {
        match self {
            Self::IoController => "IO_CONTROLLER",
            Self::IoSupervisor => "IO_SUPERVISOR",
            Self::IoControllerRtClass3 => "IO_CONTROLLER_RT_CLASS_3",
            Self::IoControllerSystemRedundancy => "IO_CONTROLLER_SYSTEM_REDUNDANCY",
        }
    }

    /// Looks an AR type up by wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

/// Role of the AR in a companion pair (2 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompanionArType {
    /// Not part of a pair.
    #[default]
    SingleAr,
    /// First AR of a pair.
    FirstAr,
    /// Companion of the first AR.
    CompanionAr,
}

impl CompanionArType {
    /// Every companion AR type in declaration order.
    pub const ALL: [CompanionArType; 3] = [Self::SingleAr, Self::FirstAr, Self::CompanionAr];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::SingleAr => 0,
            Self::FirstAr => 1,
            Self::CompanionAr => 2,
        }
    }

    /// Symbol as used in schema definitions.
    pub fn name(self) -> &'static str {
        match self {
            Self::SingleAr => "SINGLE_AR",
            Self::FirstAr => "FIRST_AR",
            Self::CompanionAr => "COMPANION_AR",
        }
    }

    /// Looks a companion AR type up by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

/// AR state (3 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PnIoCmState {
    /// The AR is active.
    #[default]
    Active,
}

impl PnIoCmState {
    /// Every state in declaration order.
    pub const ALL: [PnIoCmState; 1] = [Self::Active];

    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Active => 1,
        }
    }

    /// Symbol as used in schema definitions.
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
        }
    }

    /// Looks a state up by wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

/// AR block request, sent by the IO controller in a connect call.
///
/// # Example
///
/// ```
/// use plc_wire::profinet::{ArBlockRequest, DceRpcObjectUuid, MacAddress, PnIoCmBlock, Uuid};
/// use plc_wire::Message;
///
/// let request = ArBlockRequest::new(
///     Uuid::new([0x11; 16]),
///     1,
///     MacAddress::new([0x08, 0x00, 0x06, 0x01, 0x02, 0x03]),
///     DceRpcObjectUuid::new(0x0203, 0x002A),
///     "plc-wire",
/// );
/// let block = PnIoCmBlock::ArReq(request);
/// let bytes = block.to_bytes().unwrap();
/// assert_eq!(&bytes[..4], &[0x01, 0x01, 0x00, 54 + 8]);
/// assert_eq!(PnIoCmBlock::from_bytes(&bytes, ()).unwrap(), block);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArBlockRequest {
    /// Block version, high byte.
    pub block_version_high: u8,
    /// Block version, low byte.
    pub block_version_low: u8,
    /// Kind of AR.
    pub ar_type: ArType,
    /// Identifier of the AR.
    pub ar_uuid: Uuid,
    /// Session key chosen by the initiator.
    pub session_key: u16,
    /// MAC address of the initiator.
    pub cm_initiator_mac_addr: MacAddress,
    /// Object UUID of the initiator.
    pub cm_initiator_object_uuid: DceRpcObjectUuid,
    /// AR property: pull module alarm allowed.
    pub pull_module_alarm_allowed: bool,
    /// AR property: non-legacy startup mode.
    pub non_legacy_startup_mode: bool,
    /// AR property: combined object container used.
    pub combined_object_container_used: bool,
    /// AR property: acknowledge companion AR.
    pub acknowledge_companion_ar: bool,
    /// AR property: companion AR type.
    pub companion_ar_type: CompanionArType,
    /// AR property: device access.
    pub device_access: bool,
    /// AR property: CM initiator.
    pub cm_initiator: bool,
    /// AR property: supervisor takeover allowed.
    pub supervisor_takeover_allowed: bool,
    /// AR property: state.
    pub state: PnIoCmState,
    /// Activity timeout in units of 100 ms.
    pub cm_initiator_activity_timeout_factor: u16,
    /// UDP port for RT_CLASS_UDP.
    pub cm_initiator_udp_rt_port: u16,
    /// Station name of the initiator.
    pub cm_initiator_station_name: String,
}

impl ArBlockRequest {
    /// An IO controller request with version 1.0 and default properties.
    pub fn new(
        ar_uuid: Uuid,
        session_key: u16,
        cm_initiator_mac_addr: MacAddress,
        cm_initiator_object_uuid: DceRpcObjectUuid,
        station_name: &str,
    ) -> Self {
        Self {
            block_version_high: 1,
            block_version_low: 0,
            ar_type: ArType::IoController,
            ar_uuid,
            session_key,
            cm_initiator_mac_addr,
            cm_initiator_object_uuid,
            pull_module_alarm_allowed: false,
            non_legacy_startup_mode: false,
            combined_object_container_used: false,
            acknowledge_companion_ar: false,
            companion_ar_type: CompanionArType::SingleAr,
            device_access: false,
            cm_initiator: true,
            supervisor_takeover_allowed: false,
            state: PnIoCmState::Active,
            cm_initiator_activity_timeout_factor: DEFAULT_ACTIVITY_TIMEOUT_FACTOR,
            cm_initiator_udp_rt_port: DEFAULT_UDP_RT_PORT,
            cm_initiator_station_name: station_name.to_string(),
        }
    }

    fn body_length_in_bits(&self) -> u64 {
        // versions, arType, uuid, sessionKey, mac, object uuid, properties,
        // timeout, port, name length
        (2 + 2 + 16 + 2 + 6 + 16 + 4 + 2 + 2 + 2 + self.cm_initiator_station_name.len() as u64) * 8
    }

    fn parse_body(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        let block_version_high = rb.read_u8("blockVersionHigh")?;
        let block_version_low = rb.read_u8("blockVersionLow")?;
        let ar_type = read_enum(rb, "arType", 16, "PnIoCm_ArType", |v| ArType::from_code(v as u16))?;
        let ar_uuid = Uuid::parse(rb, ())?;
        let session_key = rb.read_u16("sessionKey")?;
        let cm_initiator_mac_addr = MacAddress::parse(rb, ())?;
        let cm_initiator_object_uuid = DceRpcObjectUuid::parse(rb, ByteOrder::BigEndian)?;
        let pull_module_alarm_allowed = rb.read_bit("pullModuleAlarmAllowed")?;
        let non_legacy_startup_mode = rb.read_bit("nonLegacyStartupMode")?;
        let combined_object_container_used = rb.read_bit("combinedObjectContainerUsed")?;
        read_reserved(rb, "reserved", 17, 0)?;
        let acknowledge_companion_ar = rb.read_bit("acknowledgeCompanionAr")?;
        let companion_ar_type = read_enum(rb, "companionArType", 2, "PnIoCm_CompanionArType", |v| {
            CompanionArType::from_code(v as u8)
        })?;
        let device_access = rb.read_bit("deviceAccess")?;
        read_reserved(rb, "reserved", 3, 0)?;
        let cm_initiator = rb.read_bit("cmInitiator")?;
        let supervisor_takeover_allowed = rb.read_bit("supervisorTakeoverAllowed")?;
        let state = read_enum(rb, "state", 3, "PnIoCm_State", |v| PnIoCmState::from_code(v as u8))?;
        let cm_initiator_activity_timeout_factor = rb.read_u16("cmInitiatorActivityTimeoutFactor")?;
        let cm_initiator_udp_rt_port = rb.read_u16("cmInitiatorUdpRtPort")?;
        let station_name_length = rb.read_u16("stationNameLength")?;
        let cm_initiator_station_name = rb.read_string(
            "cmInitiatorStationName",
            u64::from(station_name_length) * 8,
            TextEncoding::Utf8,
        )?;
        Ok(Self {
            block_version_high,
            block_version_low,
            ar_type,
            ar_uuid,
            session_key,
            cm_initiator_mac_addr,
            cm_initiator_object_uuid,
            pull_module_alarm_allowed,
            non_legacy_startup_mode,
            combined_object_container_used,
            acknowledge_companion_ar,
            companion_ar_type,
            device_access,
            cm_initiator,
            supervisor_takeover_allowed,
            state,
            cm_initiator_activity_timeout_factor,
            cm_initiator_udp_rt_port,
            cm_initiator_station_name,
        })
    }

    fn serialize_body(&self, wb: &mut WriteBuffer) -> Result<()> {
        let name_length = u16::try_from(self.cm_initiator_station_name.len()).map_err(|_| {
            CodecError::encoding("cmInitiatorStationName", "station name longer than 65535 bytes")
        })?;
        wb.write_u8("blockVersionHigh", self.block_version_high)?;
        wb.write_u8("blockVersionLow", self.block_version_low)?;
        wb.write_u16("arType", self.ar_type.code())?;
        self.ar_uuid.serialize(wb)?;
        wb.write_u16("sessionKey", self.session_key)?;
        self.cm_initiator_mac_addr.serialize(wb)?;
        DceRpcObjectUuid {
            byte_order: ByteOrder::BigEndian,
            ..self.cm_initiator_object_uuid
        }
        .serialize(wb)?;
        wb.write_bit("pullModuleAlarmAllowed", self.pull_module_alarm_allowed)?;
        wb.write_bit("nonLegacyStartupMode", self.non_legacy_startup_mode)?;
        wb.write_bit("combinedObjectContainerUsed", self.combined_object_container_used)?;
        write_reserved(wb, "reserved", 17, 0)?;
        wb.write_bit("acknowledgeCompanionAr", self.acknowledge_companion_ar)?;
        wb.write_unsigned("companionArType", 2, u64::from(self.companion_ar_type.code()))?;
        wb.write_bit("deviceAccess", self.device_access)?;
        write_reserved(wb, "reserved", 3, 0)?;
        wb.write_bit("cmInitiator", self.cm_initiator)?;
        wb.write_bit("supervisorTakeoverAllowed", self.supervisor_takeover_allowed)?;
        wb.write_unsigned("state", 3, u64::from(self.state.code()))?;
        wb.write_u16("cmInitiatorActivityTimeoutFactor", self.cm_initiator_activity_timeout_factor)?;
        wb.write_u16("cmInitiatorUdpRtPort", self.cm_initiator_udp_rt_port)?;
        wb.write_u16("stationNameLength", name_length)?;
        wb.write_string(
            "cmInitiatorStationName",
            u64::from(name_length) * 8,
            TextEncoding::Utf8,
            &self.cm_initiator_station_name,
        )
    }
}

/// AR block response, returned by the IO device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArBlockResponse {
    /// Block version, high byte.
    pub block_version_high: u8,
    /// Block version, low byte.
    pub block_version_low: u8,
    /// Kind of AR, echoed from the request.
    pub ar_type: ArType,
    /// Identifier of the AR, echoed from the request.
    pub ar_uuid: Uuid,
    /// Session key, echoed from the request.
    pub session_key: u16,
    /// MAC address of the responder.
    pub cm_responder_mac_addr: MacAddress,
    /// UDP port of the responder for RT_CLASS_UDP.
    pub responder_udp_rt_port: u16,
}

impl ArBlockResponse {
    fn parse_body(rb: &mut ReadBuffer<'_>) -> Result<Self> {
        Ok(Self {
            block_version_high: rb.read_u8("blockVersionHigh")?,
            block_version_low: rb.read_u8("blockVersionLow")?,
            ar_type: read_enum(rb, "arType", 16, "PnIoCm_ArType", |v| ArType::from_code(v as u16))?,
            ar_uuid: Uuid::parse(rb, ())?,
            session_key: rb.read_u16("sessionKey")?,
            cm_responder_mac_addr: MacAddress::parse(rb, ())?,
            responder_udp_rt_port: rb.read_u16("responderUdpRtPort")?,
        })
    }

    fn serialize_body(&self, wb: &mut WriteBuffer) -> Result<()> {
        wb.write_u8("blockVersionHigh", self.block_version_high)?;
        wb.write_u8("blockVersionLow", self.block_version_low)?;
        wb.write_u16("arType", self.ar_type.code())?;
        self.ar_uuid.serialize(wb)?;
        wb.write_u16("sessionKey", self.session_key)?;
        self.cm_responder_mac_addr.serialize(wb)?;
        wb.write_u16("responderUdpRtPort", self.responder_udp_rt_port)
    }
}

/// A PNIO CM block, discriminated by its block type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PnIoCmBlock {
    /// AR block request.
    ArReq(ArBlockRequest),
    /// AR block response.
    ArRes(ArBlockResponse),
}

impl PnIoCmBlock {
    /// Block type of the variant.
    pub fn block_type(&self) -> PnIoCmBlockType {
        match self {
            Self::ArReq(_) => PnIoCmBlockType::ArBlockReq,
            Self::ArRes(_) => PnIoCmBlockType::ArBlockRes,
        }
    }

    /// Value of the block length field: bytes after it.
    pub fn block_length(&self) -> usize {
        self.length_in_bytes() - BLOCK_HEADER_SIZE
    }
}

impl Message for PnIoCmBlock {
    type Args = ();

    fn parse(rb: &mut ReadBuffer<'_>, _args: ()) -> Result<Self> {
        rb.push_context("PnIoCm_Block");
        let block_type = read_enum(rb, "blockType", 16, "PnIoCm_BlockType", |v| {
            PnIoCmBlockType::from_code(v as u16)
        })?;
        if !matches!(block_type, PnIoCmBlockType::ArBlockReq | PnIoCmBlockType::ArBlockRes) {
            return Err(CodecError::unsupported_discriminator("PnIoCm_Block", block_type.name(), rb.position()));
        }
        let length_position = rb.position();
        let block_length = rb.read_u16("blockLength")?;
        let block = match block_type {
            PnIoCmBlockType::ArBlockReq => Self::ArReq(ArBlockRequest::parse_body(rb)?),
            _ => Self::ArRes(ArBlockResponse::parse_body(rb)?),
        };
        let consumed = (rb.position() - length_position) / 8 - 2;
        if consumed != u64::from(block_length) {
            rb.warn(
                "blockLength",
                length_position,
                format!("block length {} but {} bytes were decoded", block_length, consumed),
            );
        }
        rb.pop_context();
        log::trace!("parsed {} block, {} bytes", block_type, consumed);
        Ok(block)
    }

    fn serialize(&self, wb: &mut WriteBuffer) -> Result<()> {
        let block_length = u16::try_from(self.block_length())
            .map_err(|_| CodecError::encoding("blockLength", "block longer than 65535 bytes"))?;
        wb.write_u16("blockType", self.block_type().code())?;
        wb.write_u16("blockLength", block_length)?;
        match self {
            Self::ArReq(req) => req.serialize_body(wb),
            Self::ArRes(res) => res.serialize_body(wb),
        }
    }

    fn length_in_bits(&self) -> u64 {
        let header = BLOCK_HEADER_SIZE as u64 * 8;
        match self {
            Self::ArReq(req) => header + req.body_length_in_bits(),
            Self::ArRes(_) => header + (2 + 2 + 16 + 2 + 6 + 2) * 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CodecOptions;

    const AR_UUID: &str = "0102030405060708090a0b0c0d0e0f10";

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    fn request_hex(properties: &str) -> Vec<u8> {
        hex(&format!(
            "0101 003b 0100 0001 {} 0002 080006010203 dea000006c9711d18271 0001 0203 002a {} 0258 8892 0005 706c633478",
            AR_UUID, properties
        ))
    }

    fn request() -> ArBlockRequest {
        ArBlockRequest::new(
            Uuid::new(hex(AR_UUID).try_into().unwrap()),
            2,
            MacAddress::new([0x08, 0x00, 0x06, 0x01, 0x02, 0x03]),
            DceRpcObjectUuid::new(0x0203, 0x002A),
            "plc4x",
        )
    }

    #[test]
    fn test_ar_request_parse() {
        let bytes = request_hex("00000011");
        let block = PnIoCmBlock::from_bytes(&bytes, ()).unwrap();
        assert_eq!(block, PnIoCmBlock::ArReq(request()));
        assert_eq!(block.block_length(), 59);
        assert_eq!(block.length_in_bytes(), bytes.len());
        assert_eq!(block.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_ar_request_bit_flags() {
        let mut req = request();
        req.pull_module_alarm_allowed = true;
        req.companion_ar_type = CompanionArType::FirstAr;
        req.supervisor_takeover_allowed = true;
        let bytes = PnIoCmBlock::ArReq(req.clone()).to_bytes().unwrap();
        assert_eq!(bytes, request_hex("80000219"));
        assert_eq!(PnIoCmBlock::from_bytes(&bytes, ()).unwrap(), PnIoCmBlock::ArReq(req));
    }

    #[test]
    fn test_ar_request_reserved_bits_tolerated() {
        let bytes = request_hex("00001011");
        let mut rb = ReadBuffer::new(&bytes);
        let block = PnIoCmBlock::parse(&mut rb, ()).unwrap();
        assert_eq!(rb.warnings().len(), 1);
        // only the constant is ever written back
        assert_eq!(block.to_bytes().unwrap(), request_hex("00000011"));

        let strict = CodecOptions::new().with_strict(true);
        assert!(matches!(
            PnIoCmBlock::from_bytes_with(&bytes, (), strict),
            Err(CodecError::ReservedValueMismatch { .. })
        ));
    }

    #[test]
    fn test_ar_request_unknown_companion_type() {
        let bytes = request_hex("00000611");
        assert!(matches!(
            PnIoCmBlock::from_bytes(&bytes, ()),
            Err(CodecError::UnknownEnumValue { ref type_name, ref field, value: 3, .. })
                if type_name == "PnIoCm_CompanionArType" && field == "companionArType"
        ));
    }

    #[test]
    fn test_ar_request_block_length_mismatch_warns() {
        let mut bytes = request_hex("00000011");
        bytes[3] = 0x40;
        let mut rb = ReadBuffer::new(&bytes);
        PnIoCmBlock::parse(&mut rb, ()).unwrap();
        assert_eq!(rb.warnings().len(), 1);
    }

    #[test]
    fn test_ar_response() {
        let bytes = hex(&format!("8101 001e 0100 0001 {} 0002 080006aabbcc 8892", AR_UUID));
        let block = PnIoCmBlock::from_bytes(&bytes, ()).unwrap();
        let PnIoCmBlock::ArRes(ref res) = block else {
            panic!("expected ArRes, got {:?}", block);
        };
        assert_eq!(res.ar_type, ArType::IoController);
        assert_eq!(res.cm_responder_mac_addr.to_string(), "08:00:06:aa:bb:cc");
        assert_eq!(res.responder_udp_rt_port, DEFAULT_UDP_RT_PORT);
        assert_eq!(block.block_length(), 30);
        assert_eq!(block.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_unsupported_block_type() {
        let bytes = hex("0102 0004 0100 0000");
        let mut rb = ReadBuffer::new(&bytes);
        let err = PnIoCmBlock::parse(&mut rb, ()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedDiscriminator { position: 16, .. }), "{}", err);
        assert_eq!(rb.position(), 16);
    }

    #[test]
    fn test_unknown_block_type() {
        let err = PnIoCmBlock::from_bytes(&hex("7777 0000"), ()).unwrap_err();
        assert!(matches!(err, CodecError::UnknownEnumValue { value: 0x7777, position: 0, .. }), "{}", err);
    }

    #[test]
    fn test_truncated_station_name() {
        let bytes = request_hex("00000011");
        let err = PnIoCmBlock::from_bytes(&bytes[..bytes.len() - 2], ()).unwrap_err();
        assert!(err.is_end_of_data());
    }
}
