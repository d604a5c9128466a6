use bytes::Bytes;
use cm_protocol::config::MAX_PAYLOAD_SIZE;
use cm_protocol::core::packet::Packet;
use cm_protocol::protocol::dispatcher::{expand_multi, multi_message};
use cm_protocol::protocol::emsg::EMsg;
use cm_protocol::protocol::message::OutgoingMessage;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

#[allow(clippy::unwrap_used)]
fn bench_multi_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_expand");
    let child_counts = [1usize, 16, 256];

    for &count in &child_counts {
        let children: Vec<Bytes> = (0..count)
            .map(|i| {
                OutgoingMessage::client(EMsg::CLIENT_LOGON, vec![(i & 0xFF) as u8; 200])
                    .serialize()
                    .unwrap()
            })
            .collect();
        let total: usize = children.iter().map(|c| c.len() + 4).sum();
        group.throughput(Throughput::Bytes(total as u64));

        for compress in [false, true] {
            let container = multi_message(&children, compress).unwrap().serialize().unwrap();
            let packet = Packet::from_bytes(container).unwrap();
            let label = if compress { "gzip" } else { "plain" };

            group.bench_function(format!("{label}_{count}_children"), |b| {
                b.iter(|| {
                    let expansion = expand_multi(&packet, MAX_PAYLOAD_SIZE).unwrap();
                    assert_eq!(expansion.records.len(), count);
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_multi_expansion);
criterion_main!(benches);
