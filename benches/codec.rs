//! Benchmarks for the SMPP codec.
//!
//! Run with: cargo bench --bench codec

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};

use smppgw::proto::{Command, Header, Pdu, SmppCodec, SubmitSm};

fn sample_submit() -> (Header, Pdu) {
    (
        Header::new(Command::SubmitSm, 42),
        Pdu::SubmitSm(SubmitSm {
            source_addr: "49170111222".into(),
            dest_addr: "49170333444".into(),
            registered_delivery: 1,
            short_message: b"the quick brown fox jumps over the lazy dog".to_vec(),
            ..Default::default()
        }),
    )
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/encode");

    let (header, pdu) = sample_submit();
    let mut codec = SmppCodec::new();
    let mut probe = BytesMut::new();
    codec.encode((header.clone(), pdu.clone()), &mut probe).unwrap();
    group.throughput(Throughput::Bytes(probe.len() as u64));

    group.bench_function("submit_sm", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(256);
            codec
                .encode((black_box(header.clone()), black_box(pdu.clone())), &mut buf)
                .unwrap();
            black_box(buf)
        })
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/decode");

    let (header, pdu) = sample_submit();
    let mut codec = SmppCodec::new();
    let mut wire = BytesMut::new();
    codec.encode((header, pdu), &mut wire).unwrap();
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("submit_sm", |b| {
        b.iter(|| {
            let mut buf = wire.clone();
            black_box(codec.decode(&mut buf).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
