//! The Profinet structures described as a dynamic type registry.
//!
//! | Type | Discriminated by |
//! |------|------------------|
//! | `Uuid`, `MacAddress`, `IoDataObject` | - |
//! | `DceRpc_ObjectUuid` | - |
//! | `PnIoCm_Block` | `blockType` |
//!
//! `DceRpc_ObjectUuid` leaves the byte order of its first three groups to
//! the buffer, so the same definition serves little- and big-endian DCE/RPC
//! packets.

use once_cell::sync::OnceCell;

use crate::buffer::{ByteOrder, TextEncoding};
use crate::error::Result;
use crate::schema::{ArrayLoop, CaseSpec, DiscriminatorValue, EnumSpec, FieldSpec, SwitchSpec, TypeRef, TypeRegistry, TypeSpec};

use super::block::{ArType, CompanionArType, PnIoCmBlockType, PnIoCmState};
use super::types::{OBJECT_UUID_DATA1, OBJECT_UUID_DATA2, OBJECT_UUID_DATA3, OBJECT_UUID_DATA4};

static REGISTRY: OnceCell<TypeRegistry> = OnceCell::new();

/// Returns the Profinet registry, building it on first use.
///
/// # Example
///
/// ```
/// use plc_wire::Value;
///
/// let registry = plc_wire::profinet::registry().unwrap();
/// let obj = registry.from_bytes("IoDataObject", &[0, 1, 0, 2, 0, 3], &[]).unwrap();
/// assert_eq!(obj.get("subSlotNumber"), Some(&Value::Int(2)));
/// ```
pub fn registry() -> Result<&'static TypeRegistry> {
    REGISTRY.get_or_try_init(build)
}

fn u8_field(name: &str) -> FieldSpec {
    FieldSpec::simple(name, TypeRef::UInt(8))
}

fn u16_field(name: &str) -> FieldSpec {
    FieldSpec::simple(name, TypeRef::UInt(16))
}

fn bit(name: &str) -> FieldSpec {
    FieldSpec::simple(name, TypeRef::Bit)
}

fn enums() -> Vec<EnumSpec> {
    vec![
        PnIoCmBlockType::ALL
            .into_iter()
            .fold(EnumSpec::new("PnIoCm_BlockType", 16), |spec, t| spec.member(t.name(), u64::from(t.code()))),
        ArType::ALL
            .into_iter()
            .fold(EnumSpec::new("PnIoCm_ArType", 16), |spec, t| spec.member(t.name(), u64::from(t.code()))),
        CompanionArType::ALL
            .into_iter()
            .fold(EnumSpec::new("PnIoCm_CompanionArType", 2), |spec, t| {
                spec.member(t.name(), u64::from(t.code()))
            }),
        PnIoCmState::ALL
            .into_iter()
            .fold(EnumSpec::new("PnIoCm_State", 3), |spec, s| spec.member(s.name(), u64::from(s.code()))),
    ]
}

fn identifiers() -> Result<Vec<TypeSpec>> {
    let be = ByteOrder::BigEndian;
    Ok(vec![
        TypeSpec::new("Uuid").field(FieldSpec::array("data", TypeRef::UInt(8), ArrayLoop::count("16")?)),
        TypeSpec::new("MacAddress").field(FieldSpec::array("address", TypeRef::UInt(8), ArrayLoop::count("6")?)),
        TypeSpec::new("DceRpc_ObjectUuid")
            .field(FieldSpec::constant("data1", TypeRef::UInt(32), u64::from(OBJECT_UUID_DATA1)))
            .field(FieldSpec::constant("data2", TypeRef::UInt(16), u64::from(OBJECT_UUID_DATA2)))
            .field(FieldSpec::constant("data3", TypeRef::UInt(16), u64::from(OBJECT_UUID_DATA3)))
            .field(FieldSpec::constant("data4", TypeRef::UInt(16), u64::from(OBJECT_UUID_DATA4)).with_byte_order(be))
            .field(FieldSpec::simple("interfaceNumber", TypeRef::UInt(4)).with_byte_order(be))
            .field(FieldSpec::simple("nodeNumber", TypeRef::UInt(12)).with_byte_order(be))
            .field(u16_field("deviceId").with_byte_order(be))
            .field(u16_field("vendorId").with_byte_order(be)),
        TypeSpec::new("IoDataObject")
            .field(u16_field("slotNumber"))
            .field(u16_field("subSlotNumber"))
            .field(u16_field("ioFrameOffset")),
    ])
}

fn block_case(name: &str, block_type: PnIoCmBlockType) -> Result<CaseSpec> {
    Ok(
        CaseSpec::new(name, vec![Some(DiscriminatorValue::Enum(block_type.name().to_string()))])
            .field(FieldSpec::implicit("blockLength", TypeRef::UInt(16), "lengthInBytes - 4")?)
            .field(u8_field("blockVersionHigh"))
            .field(u8_field("blockVersionLow"))
            .field(FieldSpec::simple("arType", TypeRef::enumeration("PnIoCm_ArType")))
            .field(FieldSpec::simple("arUuid", TypeRef::complex("Uuid")))
            .field(u16_field("sessionKey")),
    )
}

fn block() -> Result<TypeSpec> {
    let request = block_case("PnIoCm_Block_ArReq", PnIoCmBlockType::ArBlockReq)?
        .field(FieldSpec::simple("cmInitiatorMacAddr", TypeRef::complex("MacAddress")))
        .field(FieldSpec::simple("cmInitiatorObjectUuid", TypeRef::complex("DceRpc_ObjectUuid")))
        .field(bit("pullModuleAlarmAllowed"))
        .field(bit("nonLegacyStartupMode"))
        .field(bit("combinedObjectContainerUsed"))
        .field(FieldSpec::reserved(TypeRef::UInt(17), 0))
        .field(bit("acknowledgeCompanionAr"))
        .field(FieldSpec::simple("companionArType", TypeRef::enumeration("PnIoCm_CompanionArType")))
        .field(bit("deviceAccess"))
        .field(FieldSpec::reserved(TypeRef::UInt(3), 0))
        .field(bit("cmInitiator"))
        .field(bit("supervisorTakeoverAllowed"))
        .field(FieldSpec::simple("state", TypeRef::enumeration("PnIoCm_State")))
        .field(u16_field("cmInitiatorActivityTimeoutFactor"))
        .field(u16_field("cmInitiatorUdpRtPort"))
        .field(FieldSpec::implicit(
            "stationNameLength",
            TypeRef::UInt(16),
            "STR_LEN(cmInitiatorStationName)",
        )?)
        .field(FieldSpec::simple(
            "cmInitiatorStationName",
            TypeRef::string("stationNameLength * 8", TextEncoding::Utf8)?,
        ));
    let response = block_case("PnIoCm_Block_ArRes", PnIoCmBlockType::ArBlockRes)?
        .field(FieldSpec::simple("cmResponderMacAddr", TypeRef::complex("MacAddress")))
        .field(u16_field("responderUdpRtPort"));
    Ok(TypeSpec::new("PnIoCm_Block")
        .with_byte_order(ByteOrder::BigEndian)
        .field(FieldSpec::discriminator("blockType", TypeRef::enumeration("PnIoCm_BlockType")))
        .switch(SwitchSpec::new(&["blockType"])?.case(request).case(response)))
}

fn build() -> Result<TypeRegistry> {
    let builder = enums()
        .into_iter()
        .fold(TypeRegistry::builder(), |builder, spec| builder.add_enum(spec));
    let registry = identifiers()?
        .into_iter()
        .chain([block()?])
        .fold(builder, |builder, spec| builder.add_type(spec))
        .build()?;
    log::debug!("profinet registry built");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{CodecOptions, ReadBuffer, WriteBuffer};
    use crate::error::CodecError;
    use crate::field::Message;
    use crate::profinet::{DceRpcObjectUuid, PnIoCmBlock};
    use crate::value::Value;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    const AR_REQ: &str = "0101 003b 0100 0001 0102030405060708090a0b0c0d0e0f10 0002 080006010203 \
                          dea000006c9711d18271 0001 0203 002a 80000219 0258 8892 0005 706c633478";

    #[test]
    fn test_ar_request_matches_typed_codec() {
        let bytes = hex(AR_REQ);
        let registry = registry().unwrap();
        let msg = registry.from_bytes("PnIoCm_Block", &bytes, &[]).unwrap();
        assert_eq!(msg.case_name(), Some("PnIoCm_Block_ArReq"));
        assert_eq!(msg.get("blockLength"), None);
        assert_eq!(msg.get("pullModuleAlarmAllowed"), Some(&Value::Bool(true)));
        assert_eq!(msg.get("supervisorTakeoverAllowed"), Some(&Value::Bool(true)));
        assert!(matches!(
            msg.get("companionArType"),
            Some(Value::Enum { symbol, .. }) if symbol == "FIRST_AR"
        ));
        assert_eq!(msg.get("cmInitiatorStationName"), Some(&Value::String("plc4x".into())));
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), bytes);

        let typed = PnIoCmBlock::from_bytes(&bytes, ()).unwrap();
        assert_eq!(registry.length_in_bits(&msg, &[]).unwrap(), typed.length_in_bits());
    }

    #[test]
    fn test_ar_response_round_trip() {
        let bytes = hex("8101 001e 0100 0006 0102030405060708090a0b0c0d0e0f10 0002 080006aabbcc 8892");
        let registry = registry().unwrap();
        let msg = registry.from_bytes("PnIoCm_Block", &bytes, &[]).unwrap();
        assert_eq!(msg.case_name(), Some("PnIoCm_Block_ArRes"));
        assert!(matches!(
            msg.get("arType"),
            Some(Value::Enum { symbol, .. }) if symbol == "IO_SUPERVISOR"
        ));
        assert_eq!(registry.to_bytes(&msg, &[]).unwrap(), bytes);
    }

    #[test]
    fn test_unbound_block_type() {
        let registry = registry().unwrap();
        let mut rb = ReadBuffer::new(&[0x01, 0x10, 0x00, 0x00]);
        assert!(matches!(
            registry.parse("PnIoCm_Block", &mut rb, &[]),
            Err(CodecError::UnsupportedDiscriminator { .. })
        ));
        assert_eq!(rb.position(), 16);
    }

    #[test]
    fn test_object_uuid_follows_buffer_order() {
        let bytes = hex("0000a0de 976c d111 8271 1001 0203 002a");
        let registry = registry().unwrap();
        let le = CodecOptions::new().with_byte_order(ByteOrder::LittleEndian);

        let mut rb = ReadBuffer::with_options(&bytes, le);
        let msg = registry.parse("DceRpc_ObjectUuid", &mut rb, &[]).unwrap();
        assert_eq!(msg.get("interfaceNumber"), Some(&Value::Int(1)));
        assert_eq!(msg.get("vendorId"), Some(&Value::Int(0x2A)));

        let mut wb = WriteBuffer::with_options(le);
        registry.serialize(&msg, &mut wb, &[]).unwrap();
        assert_eq!(wb.into_bytes(), bytes);

        let typed = DceRpcObjectUuid::from_bytes(&bytes, ByteOrder::LittleEndian).unwrap();
        assert_eq!(typed.device_id, 0x0203);

        assert!(matches!(
            registry.from_bytes("DceRpc_ObjectUuid", &bytes, &[]),
            Err(CodecError::ConstValueMismatch { .. })
        ));
    }
}
