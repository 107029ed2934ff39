//! The Modbus ADUs and PDUs described as a dynamic type registry.
//!
//! | Type | Parameters | Discriminated by |
//! |------|------------|------------------|
//! | `ModbusTcpADU` | `response` | - |
//! | `ModbusRtuADU` | `response` | - |
//! | `ModbusAsciiADU` | `response` | - |
//! | `ModbusPDU` | `response` | `(errorFlag, functionFlag, response)` |
//!
//! `functionFlag` is an ordinary field: an exception response keeps the
//! function code of the failed request, so it cannot be derived from the
//! case alone. The serial checksums are computed by the `rtuCrc` and
//! `asciiLrc` static functions.

use once_cell::sync::OnceCell;

use crate::buffer::{ByteOrder, WriteBuffer};
use crate::error::{CodecError, Result};
use crate::schema::{ArrayLoop, CaseSpec, DiscriminatorValue, EnumSpec, FieldSpec, SwitchSpec, TypeRef, TypeRegistry, TypeSpec};
use crate::value::Value;

use super::adu::{crc16, lrc};
use super::pdu::{
    ModbusErrorCode, FC_DIAGNOSTIC, FC_GET_COM_EVENT_COUNTER, FC_GET_COM_EVENT_LOG, FC_MASK_WRITE_HOLDING_REGISTER,
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_EXCEPTION_STATUS, FC_READ_FIFO_QUEUE, FC_READ_FILE_RECORD,
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS,
    FC_REPORT_SERVER_ID, FC_WRITE_FILE_RECORD, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_HOLDING_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};

static REGISTRY: OnceCell<TypeRegistry> = OnceCell::new();

/// Returns the Modbus registry, building it on first use.
///
/// # Example
///
/// ```
/// use plc_wire::Value;
///
/// let registry = plc_wire::modbus::registry().unwrap();
/// let bytes = hex::decode("01030000000ac5cd").unwrap();
/// let adu = registry.from_bytes("ModbusRtuADU", &bytes, &[("response", Value::Bool(false))]).unwrap();
/// assert_eq!(registry.to_bytes(&adu, &[("response", Value::Bool(false))]).unwrap(), bytes);
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

fn pdu_case(name: &str, function: u8, response: bool) -> CaseSpec {
    CaseSpec::new(
        name,
        vec![
            Some(DiscriminatorValue::Bool(false)),
            Some(DiscriminatorValue::Int(i128::from(function))),
            Some(DiscriminatorValue::Bool(response)),
        ],
    )
}

fn counted_bytes(case: CaseSpec, name: &str) -> Result<CaseSpec> {
    Ok(case
        .field(FieldSpec::implicit("byteCount", TypeRef::UInt(8), &format!("COUNT({})", name))?)
        .field(FieldSpec::array(name, TypeRef::UInt(8), ArrayLoop::count("byteCount")?)))
}

fn range(case: CaseSpec) -> CaseSpec {
    case.field(u16_field("startingAddress")).field(u16_field("quantity"))
}

fn record_items(case: CaseSpec, item: &str) -> Result<CaseSpec> {
    Ok(case
        .field(FieldSpec::implicit("byteCount", TypeRef::UInt(8), "ARRAY_SIZE_IN_BYTES(items)")?)
        .field(FieldSpec::array("items", TypeRef::complex(item), ArrayLoop::length("byteCount")?)))
}

fn error_code_enum() -> EnumSpec {
    ModbusErrorCode::ALL
        .into_iter()
        .fold(EnumSpec::new("ModbusErrorCode", 8), |spec, c| spec.member(c.name(), u64::from(c.code())))
}

fn pdu() -> Result<TypeSpec> {
    let read = [
        ("ReadCoils", FC_READ_COILS),
        ("ReadDiscreteInputs", FC_READ_DISCRETE_INPUTS),
        ("ReadHoldingRegisters", FC_READ_HOLDING_REGISTERS),
        ("ReadInputRegisters", FC_READ_INPUT_REGISTERS),
    ];
    let single = [
        ("WriteSingleCoil", FC_WRITE_SINGLE_COIL),
        ("WriteSingleRegister", FC_WRITE_SINGLE_REGISTER),
    ];
    let mut switch = SwitchSpec::new(&["errorFlag", "functionFlag", "response"])?.case(
        CaseSpec::new("ModbusPDUError", vec![Some(DiscriminatorValue::Bool(true)), None, None])
            .field(FieldSpec::simple("exceptionCode", TypeRef::enumeration("ModbusErrorCode"))),
    );
    for (name, function) in read {
        switch = switch
            .case(range(pdu_case(&format!("ModbusPDU{}Request", name), function, false)))
            .case(counted_bytes(pdu_case(&format!("ModbusPDU{}Response", name), function, true), "value")?);
    }
    for (name, function) in single {
        for (suffix, response) in [("Request", false), ("Response", true)] {
            switch = switch.case(
                pdu_case(&format!("ModbusPDU{}{}", name, suffix), function, response)
                    .field(u16_field("address"))
                    .field(u16_field("value")),
            );
        }
    }
    for (name, function) in [
        ("WriteMultipleCoils", FC_WRITE_MULTIPLE_COILS),
        ("WriteMultipleHoldingRegisters", FC_WRITE_MULTIPLE_HOLDING_REGISTERS),
    ] {
        switch = switch
            .case(counted_bytes(
                range(pdu_case(&format!("ModbusPDU{}Request", name), function, false)),
                "value",
            )?)
            .case(range(pdu_case(&format!("ModbusPDU{}Response", name), function, true)));
    }
    let mask = |name: &str, response: bool| {
        pdu_case(name, FC_MASK_WRITE_HOLDING_REGISTER, response)
            .field(u16_field("referenceAddress"))
            .field(u16_field("andMask"))
            .field(u16_field("orMask"))
    };
    let diagnostic = |name: &str, response: bool| {
        pdu_case(name, FC_DIAGNOSTIC, response)
            .field(u16_field("subFunction"))
            .field(u16_field("data"))
    };
    let switch = switch
        .case(counted_bytes(
            pdu_case(
                "ModbusPDUReadWriteMultipleHoldingRegistersRequest",
                FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS,
                false,
            )
            .field(u16_field("readStartingAddress"))
            .field(u16_field("readQuantity"))
            .field(u16_field("writeStartingAddress"))
            .field(u16_field("writeQuantity")),
            "value",
        )?)
        .case(counted_bytes(
            pdu_case(
                "ModbusPDUReadWriteMultipleHoldingRegistersResponse",
                FC_READ_WRITE_MULTIPLE_HOLDING_REGISTERS,
                true,
            ),
            "value",
        )?)
        .case(mask("ModbusPDUMaskWriteHoldingRegisterRequest", false))
        .case(mask("ModbusPDUMaskWriteHoldingRegisterResponse", true))
        .case(pdu_case("ModbusPDUReadFifoQueueRequest", FC_READ_FIFO_QUEUE, false).field(u16_field("fifoPointerAddress")))
        .case(
            pdu_case("ModbusPDUReadFifoQueueResponse", FC_READ_FIFO_QUEUE, true)
                .field(FieldSpec::implicit("byteCount", TypeRef::UInt(16), "(COUNT(fifoValue) * 2) + 2")?)
                .field(FieldSpec::implicit("fifoCount", TypeRef::UInt(16), "COUNT(fifoValue)")?)
                .field(FieldSpec::array("fifoValue", TypeRef::UInt(16), ArrayLoop::count("fifoCount")?)),
        )
        .case(record_items(
            pdu_case("ModbusPDUReadFileRecordRequest", FC_READ_FILE_RECORD, false),
            "ModbusPDUReadFileRecordRequestItem",
        )?)
        .case(record_items(
            pdu_case("ModbusPDUReadFileRecordResponse", FC_READ_FILE_RECORD, true),
            "ModbusPDUReadFileRecordResponseItem",
        )?)
        .case(record_items(
            pdu_case("ModbusPDUWriteFileRecordRequest", FC_WRITE_FILE_RECORD, false),
            "ModbusPDUWriteFileRecordItem",
        )?)
        .case(record_items(
            pdu_case("ModbusPDUWriteFileRecordResponse", FC_WRITE_FILE_RECORD, true),
            "ModbusPDUWriteFileRecordItem",
        )?)
        .case(pdu_case("ModbusPDUReadExceptionStatusRequest", FC_READ_EXCEPTION_STATUS, false))
        .case(pdu_case("ModbusPDUReadExceptionStatusResponse", FC_READ_EXCEPTION_STATUS, true).field(u8_field("value")))
        .case(diagnostic("ModbusPDUDiagnosticRequest", false))
        .case(diagnostic("ModbusPDUDiagnosticResponse", true))
        .case(pdu_case("ModbusPDUGetComEventCounterRequest", FC_GET_COM_EVENT_COUNTER, false))
        .case(
            pdu_case("ModbusPDUGetComEventCounterResponse", FC_GET_COM_EVENT_COUNTER, true)
                .field(u16_field("status"))
                .field(u16_field("eventCount")),
        )
        .case(pdu_case("ModbusPDUGetComEventLogRequest", FC_GET_COM_EVENT_LOG, false))
        .case(
            pdu_case("ModbusPDUGetComEventLogResponse", FC_GET_COM_EVENT_LOG, true)
                .field(FieldSpec::implicit("byteCount", TypeRef::UInt(8), "COUNT(events) + 6")?)
                .field(u16_field("status"))
                .field(u16_field("eventCount"))
                .field(u16_field("messageCount"))
                .field(FieldSpec::array("events", TypeRef::UInt(8), ArrayLoop::count("byteCount - 6")?)),
        )
        .case(pdu_case("ModbusPDUReportServerIdRequest", FC_REPORT_SERVER_ID, false))
        .case(counted_bytes(
            pdu_case("ModbusPDUReportServerIdResponse", FC_REPORT_SERVER_ID, true),
            "value",
        )?);
    Ok(TypeSpec::new("ModbusPDU")
        .params(&["response"])
        .field(FieldSpec::discriminator("errorFlag", TypeRef::Bit))
        .field(FieldSpec::simple("functionFlag", TypeRef::UInt(7)))
        .switch(switch))
}

fn record_item_types() -> Result<Vec<TypeSpec>> {
    Ok(vec![
        TypeSpec::new("ModbusPDUReadFileRecordRequestItem")
            .field(u8_field("referenceType"))
            .field(u16_field("fileNumber"))
            .field(u16_field("recordNumber"))
            .field(u16_field("recordLength")),
        TypeSpec::new("ModbusPDUReadFileRecordResponseItem")
            .field(FieldSpec::implicit("dataLength", TypeRef::UInt(8), "COUNT(data) + 1")?)
            .field(u8_field("referenceType"))
            .field(FieldSpec::array("data", TypeRef::UInt(8), ArrayLoop::count("dataLength - 1")?)),
        TypeSpec::new("ModbusPDUWriteFileRecordItem")
            .field(u8_field("referenceType"))
            .field(u16_field("fileNumber"))
            .field(u16_field("recordNumber"))
            .field(FieldSpec::implicit("recordLength", TypeRef::UInt(16), "COUNT(recordData) / 2")?)
            .field(FieldSpec::array("recordData", TypeRef::UInt(8), ArrayLoop::count("recordLength * 2")?)),
    ])
}

fn adus() -> Result<Vec<TypeSpec>> {
    let pdu = || TypeRef::complex_with("ModbusPDU", &["response"]);
    Ok(vec![
        TypeSpec::new("ModbusTcpADU")
            .params(&["response"])
            .field(u16_field("transactionIdentifier"))
            .field(FieldSpec::constant("protocolIdentifier", TypeRef::UInt(16), 0x0000))
            .field(FieldSpec::implicit("length", TypeRef::UInt(16), "pdu.lengthInBytes + 1")?)
            .field(u8_field("unitIdentifier"))
            .field(FieldSpec::simple("pdu", pdu()?)),
        TypeSpec::new("ModbusRtuADU")
            .params(&["response"])
            .field(u8_field("address"))
            .field(FieldSpec::simple("pdu", pdu()?))
            .field(
                FieldSpec::checksum("crc", TypeRef::UInt(16), "STATIC_CALL(\"rtuCrc\", address, pdu)")?
                    .with_byte_order(ByteOrder::LittleEndian),
            ),
        TypeSpec::new("ModbusAsciiADU")
            .params(&["response"])
            .field(u8_field("address"))
            .field(FieldSpec::simple("pdu", pdu()?))
            .field(FieldSpec::checksum("lrc", TypeRef::UInt(8), "STATIC_CALL(\"asciiLrc\", address, pdu)")?),
    ])
}

/// Address byte followed by the serialized PDU, as covered by the serial checksums.
fn checked_bytes(registry: &TypeRegistry, args: &[Value]) -> Result<Vec<u8>> {
    let (address, pdu) = match args {
        [address, pdu] => (address.as_u64()?, pdu.as_message()?),
        _ => return Err(CodecError::invalid_expression("checksum helpers take (address, pdu)")),
    };
    let address = u8::try_from(address)
        .map_err(|_| CodecError::encoding("address", format!("{} does not fit a byte", address)))?;
    let mut wb = WriteBuffer::new();
    wb.write_u8("address", address)?;
    registry.serialize(pdu, &mut wb, &[("response", Value::Null)])?;
    Ok(wb.into_bytes())
}

fn build() -> Result<TypeRegistry> {
    let builder = TypeRegistry::builder()
        .add_enum(error_code_enum())
        .add_static("rtuCrc", |registry, args| {
            Ok(Value::from(u64::from(crc16(&checked_bytes(registry, args)?))))
        })
        .add_static("asciiLrc", |registry, args| {
            Ok(Value::from(u64::from(lrc(&checked_bytes(registry, args)?))))
        })
        .add_type(pdu()?);
    let builder = record_item_types()?
        .into_iter()
        .chain(adus()?)
        .fold(builder, |b, spec| b.add_type(spec));
    let registry = builder.build()?;
    log::debug!("Modbus type registry built");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{CodecOptions, ReadBuffer};
    use crate::field::Message;
    use crate::modbus::{ModbusAsciiAdu, ModbusPdu, ModbusRtuAdu, ModbusTcpAdu};
    use crate::value::ParsedMessage;

    fn args(response: bool) -> [(&'static str, Value); 1] {
        [("response", Value::Bool(response))]
    }

    /// Parses a TCP frame with both codecs and checks that each writes it back unchanged.
    fn cross_check(hex: &str, response: bool) -> ParsedMessage {
        let bytes = hex::decode(hex.replace(' ', "")).unwrap();
        let typed = ModbusTcpAdu::from_bytes(&bytes, response).unwrap();
        assert_eq!(typed.to_bytes().unwrap(), bytes);

        let registry = registry().unwrap();
        let dynamic = registry.from_bytes("ModbusTcpADU", &bytes, &args(response)).unwrap();
        assert_eq!(registry.to_bytes(&dynamic, &args(response)).unwrap(), bytes);
        assert_eq!(
            registry.length_in_bits(&dynamic, &args(response)).unwrap(),
            typed.length_in_bits()
        );
        dynamic
    }

    fn pdu(adu: &ParsedMessage) -> &ParsedMessage {
        adu.get("pdu").unwrap().as_message().unwrap()
    }

    #[test]
    fn test_read_holding_registers() {
        let request = cross_check("0001 0000 0006 ff 03 0000 0002", false);
        assert_eq!(pdu(&request).case_name(), Some("ModbusPDUReadHoldingRegistersRequest"));
        assert_eq!(pdu(&request).get("quantity"), Some(&Value::Int(2)));

        let response = cross_check("0001 0000 0007 ff 03 04 0001 0002", true);
        assert_eq!(pdu(&response).case_name(), Some("ModbusPDUReadHoldingRegistersResponse"));
        assert_eq!(pdu(&response).get("value"), Some(&Value::bytes(&[0, 1, 0, 2])));
    }

    #[test]
    fn test_exception_keeps_function_code() {
        let adu = cross_check("0001 0000 0003 01 83 02", true);
        let pdu = pdu(&adu);
        assert_eq!(pdu.case_name(), Some("ModbusPDUError"));
        assert_eq!(pdu.get("functionFlag"), Some(&Value::Int(3)));
        assert_eq!(pdu.get("exceptionCode").unwrap().to_string(), "ModbusErrorCode.ILLEGAL_DATA_ADDRESS");
    }

    #[test]
    fn test_writes_and_masks() {
        cross_check("0002 0000 0009 01 0f 0013 000a 02 cd01", false);
        cross_check("0002 0000 0006 01 0f 0013 000a", true);
        cross_check("0003 0000 0006 01 05 00ac ff00", false);
        cross_check("0004 0000 0008 01 16 0004 00f2 0025", false);
        cross_check("0005 0000 0011 01 17 0003 0006 000e 0003 06 00ff 00ff 00ff", false);
    }

    #[test]
    fn test_file_records() {
        let adu = cross_check("0006 0000 0011 01 14 0e 06 0004 0001 0002 06 0003 0009 0002", false);
        let items = pdu(&adu).get("items").unwrap().as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_message().unwrap().get("recordNumber"), Some(&Value::Int(9)));
        cross_check("0006 0000 000f 01 14 0c 05 06 0dfe 0020 05 06 33cd 0040", true);
        cross_check("0007 0000 0010 01 15 0d 06 0004 0007 0003 06af 04be 100d", false);
    }

    #[test]
    fn test_serial_line_functions() {
        cross_check("0008 0000 000a 01 18 0006 0002 01b8 1284", true);
        cross_check("0009 0000 000b 01 0c 08 0000 0108 0121 2000", true);
        cross_check("000a 0000 0002 01 11", false);
        cross_check("000b 0000 0006 01 08 0000 a537", true);
    }

    #[test]
    fn test_rtu_and_ascii_checksums() {
        let registry = registry().unwrap();
        let typed = ModbusRtuAdu::new(
            0x11,
            ModbusPdu::ReadCoilsRequest {
                starting_address: 0x13,
                quantity: 0x25,
            },
        );
        let bytes = typed.to_bytes().unwrap();
        let dynamic = registry.from_bytes("ModbusRtuADU", &bytes, &args(false)).unwrap();
        assert_eq!(registry.to_bytes(&dynamic, &args(false)).unwrap(), bytes);

        let ascii = ModbusAsciiAdu::new(0x11, typed.pdu.clone()).to_bytes().unwrap();
        let dynamic = registry.from_bytes("ModbusAsciiADU", &ascii, &args(false)).unwrap();
        assert_eq!(registry.to_bytes(&dynamic, &args(false)).unwrap(), ascii);
    }

    #[test]
    fn test_rtu_checksum_validation() {
        let bytes = hex::decode("01030000000a0000").unwrap();
        let registry = registry().unwrap();
        let mut rb = ReadBuffer::new(&bytes);
        registry.parse("ModbusRtuADU", &mut rb, &args(false)).unwrap();
        assert_eq!(rb.warnings().len(), 1);

        let validating = CodecOptions::new().with_checksum_validation(true);
        let mut rb = ReadBuffer::with_options(&bytes, validating);
        assert!(matches!(
            registry.parse("ModbusRtuADU", &mut rb, &args(false)),
            Err(CodecError::ChecksumMismatch { expected: 0xCDC5, .. })
        ));
    }

    #[test]
    fn test_unknown_function_rejected() {
        let bytes = hex::decode("000100000003012b0e").unwrap();
        let err = registry().unwrap().from_bytes("ModbusTcpADU", &bytes, &args(false)).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedDiscriminator { .. }), "{}", err);
    }
}
