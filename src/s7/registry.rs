//! The TPKT / COTP / S7 layers described as a dynamic type registry.
//!
//! The typed codec in this module is the one used for requests; the
//! registry describes the same wire layout field by field and is checked
//! against it, so schema-driven tooling (dissectors, fuzzers, generic
//! browsers) can work on S7 frames without the closed enums.
//!
//! | Type | Parameters | Discriminated by |
//! |------|------------|------------------|
//! | `TPKTPacket` | - | - |
//! | `COTPPacket` | `cotpLen` | `tpduCode` |
//! | `COTPParameter` | - | `parameterType` |
//! | `S7Message` | - | `messageType` |
//! | `S7Parameter` | `messageType` | `(parameterType, messageType)` |
//! | `S7Payload` | `messageType`, `parameter` | `(parameter.parameterType, messageType)` |

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::schema::{
    ArrayLoop, CaseSpec, DiscriminatorValue, EnumSpec, FieldSpec, SwitchSpec, TypeRef, TypeRegistry, TypeSpec,
};
use crate::value::Value;

use super::types::{
    CotpProtocolClass, CotpTpduSize, DataTransportErrorCode, DataTransportSize, MemoryArea, TransportSize,
};

static REGISTRY: OnceCell<TypeRegistry> = OnceCell::new();

/// Returns the S7 registry, building it on first use.
///
/// # Example
///
/// ```
/// let registry = plc_wire::s7::registry().unwrap();
/// let bytes = hex::decode("0300001611e00000000100c0010ac1020100c2020102").unwrap();
/// let packet = registry.from_bytes("TPKTPacket", &bytes, &[]).unwrap();
/// assert_eq!(registry.to_bytes(&packet, &[]).unwrap(), bytes);
/// ```
pub fn registry() -> Result<&'static TypeRegistry> {
    REGISTRY.get_or_try_init(build)
}

fn case(name: &str, values: &[i128]) -> CaseSpec {
    CaseSpec::new(name, values.iter().map(|v| Some(DiscriminatorValue::Int(*v))).collect())
}

fn u8_field(name: &str) -> FieldSpec {
    FieldSpec::simple(name, TypeRef::UInt(8))
}

fn u16_field(name: &str) -> FieldSpec {
    FieldSpec::simple(name, TypeRef::UInt(16))
}

fn enums() -> Vec<EnumSpec> {
    let transport_size = TransportSize::ALL
        .into_iter()
        .filter(|t| TransportSize::from_code(t.code()) == Some(*t))
        .fold(EnumSpec::new("TransportSize", 8), |spec, t| {
            spec.member_with(
                t.name(),
                u64::from(t.code()),
                vec![("sizeInBytes", Value::from(t.size_in_bytes() as u64))],
            )
        });
    let data_transport_size = DataTransportSize::ALL
        .into_iter()
        .fold(EnumSpec::new("DataTransportSize", 8), |spec, s| {
            spec.member_with(
                data_transport_size_symbol(s),
                u64::from(s.code()),
                vec![("sizeInBits", Value::Bool(s.size_in_bits()))],
            )
        });
    let return_code = DataTransportErrorCode::ALL
        .into_iter()
        .fold(EnumSpec::new("DataTransportErrorCode", 8), |spec, c| {
            spec.member(return_code_symbol(c), u64::from(c.code()))
        });
    let memory_area = MemoryArea::ALL
        .into_iter()
        .fold(EnumSpec::new("MemoryArea", 8), |spec, a| {
            spec.member_with(
                memory_area_symbol(a),
                u64::from(a.code()),
                vec![("shortName", Value::String(a.short_name().to_string()))],
            )
        });
    let tpdu_size = CotpTpduSize::ALL
        .into_iter()
        .fold(EnumSpec::new("COTPTpduSize", 8), |spec, s| {
            spec.member_with(
                &format!("SIZE_{}", s.size_in_bytes()),
                u64::from(s.code()),
                vec![("sizeInBytes", Value::from(u64::from(s.size_in_bytes())))],
            )
        });
    let protocol_class = CotpProtocolClass::ALL
        .into_iter()
        .fold(EnumSpec::new("COTPProtocolClass", 8), |spec, c| {
            spec.member(&format!("CLASS_{}", c.code() >> 4), u64::from(c.code()))
        });
    vec![
        transport_size,
        data_transport_size,
        return_code,
        memory_area,
        tpdu_size,
        protocol_class,
    ]
}

fn data_transport_size_symbol(size: DataTransportSize) -> &'static str {
    match size {
        DataTransportSize::Null => "NULL",
        DataTransportSize::Bit => "BIT",
        DataTransportSize::ByteWordDword => "BYTE_WORD_DWORD",
        DataTransportSize::Integer => "INTEGER",
        DataTransportSize::Dinteger => "DINTEGER",
        DataTransportSize::Real => "REAL",
        DataTransportSize::OctetString => "OCTET_STRING",
    }
}

fn return_code_symbol(code: DataTransportErrorCode) -> &'static str {
    match code {
        DataTransportErrorCode::Reserved => "RESERVED",
        DataTransportErrorCode::Ok => "OK",
        DataTransportErrorCode::AccessDenied => "ACCESS_DENIED",
        DataTransportErrorCode::InvalidAddress => "INVALID_ADDRESS",
        DataTransportErrorCode::DataTypeNotSupported => "DATA_TYPE_NOT_SUPPORTED",
        DataTransportErrorCode::NotFound => "NOT_FOUND",
    }
}

fn memory_area_symbol(area: MemoryArea) -> &'static str {
    match area {
        MemoryArea::Counters => "COUNTERS",
        MemoryArea::Timers => "TIMERS",
        MemoryArea::DirectPeripheralAccess => "DIRECT_PERIPHERAL_ACCESS",
        MemoryArea::Inputs => "INPUTS",
        MemoryArea::Outputs => "OUTPUTS",
        MemoryArea::FlagsMarkers => "FLAGS_MARKERS",
        MemoryArea::DataBlocks => "DATA_BLOCKS",
        MemoryArea::InstanceDataBlocks => "INSTANCE_DATA_BLOCKS",
        MemoryArea::LocalData => "LOCAL_DATA",
    }
}

fn tpkt_packet() -> Result<TypeSpec> {
    Ok(TypeSpec::new("TPKTPacket")
        .field(FieldSpec::constant("protocolId", TypeRef::UInt(8), 0x03))
        .field(FieldSpec::reserved(TypeRef::UInt(8), 0x00))
        .field(FieldSpec::implicit("len", TypeRef::UInt(16), "payload.lengthInBytes + 4")?)
        .field(FieldSpec::simple("payload", TypeRef::complex_with("COTPPacket", &["len - 4"])?)))
}

fn cotp_packet() -> Result<TypeSpec> {
    let connection = |name: &str, code: i128| {
        case(name, &[code])
            .field(u16_field("destinationReference"))
            .field(u16_field("sourceReference"))
            .field(FieldSpec::simple("protocolClass", TypeRef::enumeration("COTPProtocolClass")))
    };
    Ok(TypeSpec::new("COTPPacket")
        .params(&["cotpLen"])
        .field(FieldSpec::implicit(
            "headerLength",
            TypeRef::UInt(8),
            "lengthInBytes - ARRAY_SIZE_IN_BYTES(payload) - 1",
        )?)
        .field(FieldSpec::discriminator("tpduCode", TypeRef::UInt(8)))
        .switch(
            SwitchSpec::new(&["tpduCode"])?
                .case(
                    case("COTPPacketData", &[0xF0])
                        .field(FieldSpec::simple("eot", TypeRef::Bit))
                        .field(FieldSpec::simple("tpduRef", TypeRef::UInt(7))),
                )
                .case(connection("COTPPacketConnectionRequest", 0xE0))
                .case(connection("COTPPacketConnectionResponse", 0xD0))
                .case(connection("COTPPacketDisconnectRequest", 0x80))
                .case(
                    case("COTPPacketDisconnectResponse", &[0xC0])
                        .field(u16_field("destinationReference"))
                        .field(u16_field("sourceReference")),
                )
                .case(
                    case("COTPPacketTpduError", &[0x70])
                        .field(u16_field("destinationReference"))
                        .field(u8_field("rejectCause")),
                ),
        )
        .trailing(FieldSpec::array(
            "parameters",
            TypeRef::complex("COTPParameter"),
            ArrayLoop::length("(headerLength + 1) - curPos")?,
        ))
        .trailing(FieldSpec::optional(
            "payload",
            TypeRef::complex("S7Message"),
            Some("curPos < cotpLen"),
        )?))
}

fn cotp_parameter() -> Result<TypeSpec> {
    Ok(TypeSpec::new("COTPParameter")
        .field(FieldSpec::discriminator("parameterType", TypeRef::UInt(8)))
        .field(FieldSpec::implicit("parameterLength", TypeRef::UInt(8), "lengthInBytes - 2")?)
        .switch(
            SwitchSpec::new(&["parameterType"])?
                .case(
                    case("COTPParameterTpduSize", &[0xC0])
                        .field(FieldSpec::simple("tpduSize", TypeRef::enumeration("COTPTpduSize"))),
                )
                .case(case("COTPParameterCallingTsap", &[0xC1]).field(u16_field("tsapId")))
                .case(case("COTPParameterCalledTsap", &[0xC2]).field(u16_field("tsapId")))
                .case(case("COTPParameterChecksum", &[0xC3]).field(u8_field("crc")))
                .case(case("COTPParameterDisconnectAdditionalInformation", &[0xE0]).field(
                    FieldSpec::array("data", TypeRef::UInt(8), ArrayLoop::count("parameterLength")?),
                )),
        ))
}

fn s7_message() -> Result<TypeSpec> {
    let error = |name: &str, code: i128| case(name, &[code]).field(u8_field("errorClass")).field(u8_field("errorCode"));
    Ok(TypeSpec::new("S7Message")
        .field(FieldSpec::constant("protocolId", TypeRef::UInt(8), 0x32))
        .field(FieldSpec::discriminator("messageType", TypeRef::UInt(8)))
        .field(FieldSpec::reserved(TypeRef::UInt(16), 0x0000))
        .field(u16_field("tpduReference"))
        .field(FieldSpec::implicit(
            "parameterLength",
            TypeRef::UInt(16),
            "ARRAY_SIZE_IN_BYTES(parameter)",
        )?)
        .field(FieldSpec::implicit("payloadLength", TypeRef::UInt(16), "ARRAY_SIZE_IN_BYTES(payload)")?)
        .switch(
            SwitchSpec::new(&["messageType"])?
                .case(case("S7MessageRequest", &[0x01]))
                .case(error("S7MessageResponse", 0x02))
                .case(error("S7MessageResponseData", 0x03))
                .case(case("S7MessageUserData", &[0x07])),
        )
        .trailing(FieldSpec::optional(
            "parameter",
            TypeRef::complex_with("S7Parameter", &["messageType"])?,
            Some("parameterLength > 0"),
        )?)
        .trailing(FieldSpec::optional(
            "payload",
            TypeRef::complex_with("S7Payload", &["messageType", "parameter"])?,
            Some("payloadLength > 0"),
        )?))
}

fn s7_parameter() -> Result<TypeSpec> {
    let items = |name: &str, item: &str| -> Result<FieldSpec> {
        Ok(FieldSpec::array(name, TypeRef::complex(item), ArrayLoop::count("numItems")?))
    };
    let num_items = || FieldSpec::implicit("numItems", TypeRef::UInt(8), "COUNT(items)");
    Ok(TypeSpec::new("S7Parameter")
        .params(&["messageType"])
        .field(FieldSpec::discriminator("parameterType", TypeRef::UInt(8)))
        .switch(
            SwitchSpec::new(&["parameterType", "messageType"])?
                .case(
                    CaseSpec::new(
                        "S7ParameterSetupCommunication",
                        vec![Some(DiscriminatorValue::Int(0xF0)), None],
                    )
                    .field(FieldSpec::reserved(TypeRef::UInt(8), 0x00))
                    .field(u16_field("maxAmqCaller"))
                    .field(u16_field("maxAmqCallee"))
                    .field(u16_field("pduLength")),
                )
                .case(
                    case("S7ParameterReadVarRequest", &[0x04, 0x01])
                        .field(num_items()?)
                        .field(items("items", "S7VarRequestParameterItem")?),
                )
                .case(case("S7ParameterReadVarResponse", &[0x04, 0x03]).field(u8_field("numItems")))
                .case(
                    case("S7ParameterWriteVarRequest", &[0x05, 0x01])
                        .field(num_items()?)
                        .field(items("items", "S7VarRequestParameterItem")?),
                )
                .case(case("S7ParameterWriteVarResponse", &[0x05, 0x03]).field(u8_field("numItems")))
                .case(
                    case("S7ParameterUserData", &[0x00, 0x07])
                        .field(num_items()?)
                        .field(items("items", "S7ParameterUserDataItem")?),
                ),
        ))
}

fn request_item() -> Result<TypeSpec> {
    Ok(TypeSpec::new("S7VarRequestParameterItem")
        .field(FieldSpec::discriminator("itemType", TypeRef::UInt(8)))
        .switch(
            SwitchSpec::new(&["itemType"])?.case(
                case("S7VarRequestParameterItemAddress", &[0x12])
                    .field(FieldSpec::implicit("itemLength", TypeRef::UInt(8), "address.lengthInBytes")?)
                    .field(FieldSpec::simple("address", TypeRef::complex("S7Address"))),
            ),
        ))
}

fn address() -> Result<TypeSpec> {
    Ok(TypeSpec::new("S7Address")
        .field(FieldSpec::discriminator("addressType", TypeRef::UInt(8)))
        .switch(
            SwitchSpec::new(&["addressType"])?.case(
                case("S7AddressAny", &[0x10])
                    .field(FieldSpec::simple("transportSize", TypeRef::enumeration("TransportSize")))
                    .field(u16_field("numberOfElements"))
                    .field(u16_field("dbNumber"))
                    .field(FieldSpec::simple("area", TypeRef::enumeration("MemoryArea")))
                    .field(FieldSpec::simple("byteAddress", TypeRef::UInt(21)))
                    .field(FieldSpec::simple("bitAddress", TypeRef::UInt(3))),
            ),
        ))
}

fn user_data_item() -> Result<TypeSpec> {
    let response_only = |name: &str, bits: u8| {
        FieldSpec::optional(name, TypeRef::UInt(bits), Some("cpuFunctionType == 8"))
    };
    Ok(TypeSpec::new("S7ParameterUserDataItem")
        .field(FieldSpec::discriminator("itemType", TypeRef::UInt(8)))
        .switch(
            SwitchSpec::new(&["itemType"])?.case(
                case("S7ParameterUserDataItemCPUFunctions", &[0x12])
                    .field(FieldSpec::implicit("itemLength", TypeRef::UInt(8), "lengthInBytes - 2")?)
                    .field(u8_field("method"))
                    .field(FieldSpec::simple("cpuFunctionType", TypeRef::UInt(4)))
                    .field(FieldSpec::simple("cpuFunctionGroup", TypeRef::UInt(4)))
                    .field(u8_field("cpuSubfunction"))
                    .field(u8_field("sequenceNumber"))
                    .field(response_only("dataUnitReferenceNumber", 8)?)
                    .field(response_only("lastDataUnit", 8)?)
                    .field(response_only("errorCode", 16)?),
            ),
        ))
}

fn s7_payload() -> Result<TypeSpec> {
    let items = |item: &str, count: &str| -> Result<FieldSpec> {
        Ok(FieldSpec::array("items", TypeRef::complex(item), ArrayLoop::count(count)?))
    };
    Ok(TypeSpec::new("S7Payload")
        .params(&["messageType", "parameter"])
        .switch(
            SwitchSpec::new(&["parameter.parameterType", "messageType"])?
                .case(
                    case("S7PayloadReadVarResponse", &[0x04, 0x03])
                        .field(items("S7VarPayloadDataItem", "parameter.numItems")?),
                )
                .case(
                    case("S7PayloadWriteVarRequest", &[0x05, 0x01])
                        .field(items("S7VarPayloadDataItem", "COUNT(parameter.items)")?),
                )
                .case(
                    case("S7PayloadWriteVarResponse", &[0x05, 0x03])
                        .field(items("S7VarPayloadStatusItem", "parameter.numItems")?),
                )
                .case(
                    case("S7PayloadUserData", &[0x00, 0x07])
                        .field(items("S7PayloadUserDataItem", "COUNT(parameter.items)")?),
                ),
        ))
}

fn data_item() -> Result<TypeSpec> {
    Ok(TypeSpec::new("S7VarPayloadDataItem")
        .field(FieldSpec::simple("returnCode", TypeRef::enumeration("DataTransportErrorCode")))
        .field(FieldSpec::simple("transportSize", TypeRef::enumeration("DataTransportSize")))
        .field(FieldSpec::implicit(
            "dataLength",
            TypeRef::UInt(16),
            "COUNT(data) * ((transportSize == DataTransportSize.BIT) ? 1 : (transportSize.sizeInBits ? 8 : 1))",
        )?)
        .field(FieldSpec::array(
            "data",
            TypeRef::UInt(8),
            ArrayLoop::count("transportSize.sizeInBits ? CEIL(dataLength / 8.0) : dataLength")?,
        ))
        .field(FieldSpec::padding(
            TypeRef::UInt(8),
            "0x00",
            "(!_lastItem) && ((COUNT(data) % 2) == 1)",
        )?))
}

fn status_item() -> TypeSpec {
    TypeSpec::new("S7VarPayloadStatusItem")
        .field(FieldSpec::simple("returnCode", TypeRef::enumeration("DataTransportErrorCode")))
}

fn user_data_payload_item() -> Result<TypeSpec> {
    Ok(TypeSpec::new("S7PayloadUserDataItem")
        .field(FieldSpec::simple("returnCode", TypeRef::enumeration("DataTransportErrorCode")))
        .field(FieldSpec::simple("transportSize", TypeRef::enumeration("DataTransportSize")))
        .field(FieldSpec::implicit("dataLength", TypeRef::UInt(16), "COUNT(data)")?)
        .field(FieldSpec::array("data", TypeRef::UInt(8), ArrayLoop::count("dataLength")?)))
}

fn build() -> Result<TypeRegistry> {
    let builder = enums().into_iter().fold(TypeRegistry::builder(), |b, e| b.add_enum(e));
    let registry = builder
        .add_type(tpkt_packet()?)
        .add_type(cotp_packet()?)
        .add_type(cotp_parameter()?)
        .add_type(s7_message()?)
        .add_type(s7_parameter()?)
        .add_type(request_item()?)
        .add_type(address()?)
        .add_type(user_data_item()?)
        .add_type(s7_payload()?)
        .add_type(data_item()?)
        .add_type(status_item())
        .add_type(user_data_payload_item()?)
        .build()?;
    log::debug!("S7 type registry built");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Message;
    use crate::s7::{S7Tag, TpktPacket};

    /// Parses `hex` with both codecs and checks that each writes it back unchanged.
    fn cross_check(hex: &str) -> crate::value::ParsedMessage {
        let bytes = hex::decode(hex.replace(' ', "")).unwrap();
        let typed = TpktPacket::from_bytes(&bytes, ()).unwrap();
        assert_eq!(typed.to_bytes().unwrap(), bytes);

        let registry = registry().unwrap();
        let dynamic = registry.from_bytes("TPKTPacket", &bytes, &[]).unwrap();
        assert_eq!(registry.to_bytes(&dynamic, &[]).unwrap(), bytes);
        assert_eq!(registry.length_in_bits(&dynamic, &[]).unwrap(), typed.length_in_bits());
        dynamic
    }

    fn cotp(packet: &crate::value::ParsedMessage) -> &crate::value::ParsedMessage {
        packet.get("payload").unwrap().as_message().unwrap()
    }

    #[test]
    fn test_connection_request() {
        let packet = cross_check("0300001611e00000000100c0010ac1020100c2020102");
        let cotp = cotp(&packet);
        assert_eq!(cotp.case_name(), Some("COTPPacketConnectionRequest"));
        assert_eq!(cotp.get("sourceReference"), Some(&Value::Int(1)));
        let parameters = cotp.get("parameters").unwrap().as_list().unwrap();
        assert_eq!(parameters.len(), 3);
        let tpdu_size = parameters[0].as_message().unwrap();
        assert_eq!(tpdu_size.get("tpduSize").unwrap().to_string(), "COTPTpduSize.SIZE_1024");
        assert_eq!(cotp.get("payload"), Some(&Value::Null));
    }

    #[test]
    fn test_setup_communication() {
        let packet = cross_check("0300001902f08132010000000000080000f0000008000801e0");
        let message = cotp(&packet).get("payload").unwrap().as_message().unwrap();
        assert_eq!(message.case_name(), Some("S7MessageRequest"));
        let parameter = message.get("parameter").unwrap().as_message().unwrap();
        assert_eq!(parameter.case_name(), Some("S7ParameterSetupCommunication"));
        assert_eq!(parameter.get("pduLength"), Some(&Value::Int(480)));
    }

    #[test]
    fn test_read_var_request_matches_typed_builder() {
        let tags = ["%DB1.DBW0:INT", "%MX0.3:BOOL"].map(|t| S7Tag::parse(t).unwrap());
        let typed = crate::s7::read_var_request(1, &tags).unwrap();
        let bytes = typed.to_bytes().unwrap();
        let packet = cross_check(&hex::encode(&bytes));
        let message = cotp(&packet).get("payload").unwrap().as_message().unwrap();
        let items = message
            .get("parameter")
            .and_then(|p| p.as_message().ok())
            .and_then(|p| p.get("items"))
            .unwrap()
            .as_list()
            .unwrap();
        let address = items[1].as_message().unwrap().get("address").unwrap().as_message().unwrap();
        assert_eq!(address.get("area").unwrap().to_string(), "MemoryArea.FLAGS_MARKERS");
        assert_eq!(address.get("bitAddress"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_read_var_response_with_padding() {
        cross_check("0300002002f080 320300000001000200 0b0000 0402 ff040008 2a00 ff040008 07");
        let packet = cross_check("0300002002f080 320300000001000200 0b0000 0402 ff040008 2a00 ff030001 01");
        let message = cotp(&packet).get("payload").unwrap().as_message().unwrap();
        let payload = message.get("payload").unwrap().as_message().unwrap();
        assert_eq!(payload.case_name(), Some("S7PayloadReadVarResponse"));
        let items = payload.get("items").unwrap().as_list().unwrap();
        assert_eq!(items[1].as_message().unwrap().get("data"), Some(&Value::bytes(&[0x01])));
    }

    #[test]
    fn test_write_response_and_user_data() {
        cross_check("0300001602f080 3203000000020002000100000501 0a");
        cross_check("0300001f02f080 32070000010000080006 0001120411440100 ff090002001c");
    }

    #[test]
    fn test_unknown_tpdu_code_rejected() {
        let bytes = hex::decode("0300000702100000").unwrap();
        let err = registry().unwrap().from_bytes("TPKTPacket", &bytes, &[]).unwrap_err();
        assert!(matches!(err, crate::CodecError::UnsupportedDiscriminator { .. }), "{}", err);
    }
}
