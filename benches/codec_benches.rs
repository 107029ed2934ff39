use criterion::{black_box, criterion_group, criterion_main, Criterion};

use plc_wire::modbus::{ModbusPdu, ModbusTag, ModbusTcpAdu};
use plc_wire::s7::{self, S7Tag, TpktPacket};
use plc_wire::Message;

fn s7_benches(c: &mut Criterion) {
    let tags: Vec<S7Tag> = ["%DB1.DBW0:INT", "%DB1.DBD2:REAL", "%MX0.1:BOOL", "%DB2.DBB10:BYTE[16]"]
        .iter()
        .map(|a| a.parse().unwrap())
        .collect();
    let request = s7::read_var_request(1, &tags).unwrap();
    let bytes = request.to_bytes().unwrap();

    c.bench_function("s7_read_request_serialize", |b| {
        b.iter(|| black_box(&request).to_bytes().unwrap())
    });
    c.bench_function("s7_read_request_parse", |b| {
        b.iter(|| TpktPacket::from_bytes(black_box(&bytes), ()).unwrap())
    });
}

fn modbus_benches(c: &mut Criterion) {
    let adu = ModbusTcpAdu {
        transaction_identifier: 1,
        unit_identifier: 0xFF,
        pdu: ModbusPdu::ReadHoldingRegistersResponse {
            value: (0..=249u8).collect(),
        },
    };
    let bytes = adu.to_bytes().unwrap();

    c.bench_function("modbus_tcp_round_trip", |b| {
        b.iter(|| {
            let parsed = ModbusTcpAdu::from_bytes(black_box(&bytes), true).unwrap();
            parsed.to_bytes().unwrap()
        })
    });
}

fn tag_benches(c: &mut Criterion) {
    c.bench_function("s7_tag_parse", |b| {
        b.iter(|| black_box("%DB100.DBX12.3:BOOL").parse::<S7Tag>().unwrap())
    });
    c.bench_function("modbus_tag_parse", |b| {
        b.iter(|| black_box("holding-register:40:REAL[4]").parse::<ModbusTag>().unwrap())
    });
}

criterion_group!(benches, s7_benches, modbus_benches, tag_benches);
criterion_main!(benches);
