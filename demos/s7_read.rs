//! Example: Reading tags from an S7 CPU
//!
//! Run with: cargo run --example s7_read -- 192.168.0.1
//!
//! This example demonstrates:
//! - Opening an ISO-on-TCP connection with TPKT framing
//! - The COTP connect and S7 setup communication handshake
//! - Reading several tags in one request and decoding the values

use plc_wire::s7::{self, S7ConnectionConfig, S7Tag, TpktPacket};
use plc_wire::{Message, ReadRequest, ReadResponse, StreamTransport, TpktFraming, TransportConfig};
use std::net::SocketAddr;

fn main() -> plc_wire::Result<()> {
    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.0.1".to_string());
    let addr: SocketAddr = format!("{}:102", host)
        .parse()
        .map_err(|e| plc_wire::CodecError::invalid_parameter("host", format!("{}", e)))?;

    // =========================================================================
    // Connect
    // =========================================================================

    let config = TransportConfig::new();
    let mut transport = StreamTransport::connect(addr, TpktFraming::new(config.max_frame_size), &config)?;
    let s7_config = S7ConnectionConfig::new(0, 1);

    let confirm = transport.send_receive(&s7::connection_request(&s7_config).to_bytes()?)?;
    println!("COTP connect confirm: {} bytes", confirm.len());

    let setup = transport.send_receive(&s7::setup_communication(&s7_config, 0).to_bytes()?)?;
    let setup = TpktPacket::from_bytes(&setup, ())?;
    if let Some((caller, callee, pdu)) = s7::negotiated_parameters(s7::message_of(&setup)?) {
        println!("Negotiated PDU size {} (amq {}/{})", pdu, caller, callee);
    }

    // =========================================================================
    // Read
    // =========================================================================

    let request = ReadRequest::builder()
        .add_tag("counter", "%DB1.DBW0:INT".parse::<S7Tag>()?)
        .add_tag("temperature", "%DB1.DBD2:REAL".parse::<S7Tag>()?)
        .add_tag("running", "%MX0.0:BOOL".parse::<S7Tag>()?)
        .build()?;
    let tags: Vec<S7Tag> = request.tags().copied().collect();

    let frame = s7::read_var_request(1, &tags)?.to_bytes()?;
    let reply = TpktPacket::from_bytes(&transport.send_receive(&frame)?, ())?;
    let items = s7::decode_read_response(s7::message_of(&reply)?, &tags)?;
    let response = ReadResponse::from_items(&request.tag_names(), items)?;

    for name in response.tag_names() {
        println!("{:<12} {:?} {:?}", name, response.response_code(name), response.value(name));
    }

    Ok(())
}
