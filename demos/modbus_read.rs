//! Example: Reading and writing Modbus TCP registers
//!
//! Run with: cargo run --example modbus_read -- 192.168.0.10
//!
//! This example demonstrates:
//! - MBAP framing over a TCP stream
//! - Building requests from address strings
//! - Decoding responses, including exception responses

use plc_wire::modbus::{self, ModbusTag, ModbusTcpAdu, MODBUS_TCP_PORT};
use plc_wire::{Message, MbapFraming, PlcValue, StreamTransport, TransportConfig};
use std::net::SocketAddr;

fn main() -> plc_wire::Result<()> {
    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.0.10".to_string());
    let addr: SocketAddr = format!("{}:{}", host, MODBUS_TCP_PORT)
        .parse()
        .map_err(|e| plc_wire::CodecError::invalid_parameter("host", format!("{}", e)))?;

    let mut transport = StreamTransport::connect(addr, MbapFraming, &TransportConfig::new())?;
    let mut transaction = 0u16;
    let mut exchange = |pdu: modbus::ModbusPdu| -> plc_wire::Result<ModbusTcpAdu> {
        transaction = transaction.wrapping_add(1);
        let request = ModbusTcpAdu {
            transaction_identifier: transaction,
            unit_identifier: 1,
            pdu,
        };
        let reply = transport.send_receive(&request.to_bytes()?)?;
        ModbusTcpAdu::from_bytes(&reply, true)
    };

    // =========================================================================
    // Reading
    // =========================================================================

    for address in ["holding-register:1:INT", "holding-register:10:REAL[2]", "coil:1[8]", "400100:DINT"] {
        let tag: ModbusTag = address.parse()?;
        let response = exchange(modbus::read_request(&tag)?)?;
        let (code, value) = modbus::decode_read_response(&tag, &response.pdu)?;
        println!("{:<28} {} {:?}", address, code, value);
    }

    // =========================================================================
    // Writing
    // =========================================================================

    let tag: ModbusTag = "holding-register:20:REAL".parse()?;
    let response = exchange(modbus::write_request(&tag, &PlcValue::Real(21.5))?)?;
    println!("write {}: {}", tag, modbus::decode_write_response(&response.pdu)?);

    Ok(())
}
