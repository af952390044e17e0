//! Benchmarks for grant round-trip latency

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use filecoord::*;
use tempfile::TempDir;

fn bench_grant_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let temp_dir = TempDir::new().unwrap();

    let transport = Arc::new(LocalTransport::new("bench"));
    let (broker, client) = rt.block_on(async {
        let inbound = transport.coordinator_endpoint().unwrap();
        let broker = GrantBroker::builder()
            .root_dir(temp_dir.path())
            .spawn(transport.clone(), inbound)
            .unwrap();
        let owner = OwnerId::from("bench-worker");
        let client = StorageClient::connect(owner.clone(), transport.connect(&owner));
        (broker, client)
    });

    let mut group = c.benchmark_group("grant");
    group.bench_function("uncontended_roundtrip", |b| {
        b.to_async(&rt).iter(|| async {
            let pending = client
                .request_lock(FileMetadata::shared("bench", "log"))
                .unwrap();
            let granted = pending.granted().await.unwrap();
            client.release(black_box(granted.request_id));
        });
    });

    group.bench_function("anonymous_roundtrip", |b| {
        b.to_async(&rt).iter(|| async {
            let pending = client
                .request_lock(FileMetadata::anonymous("png"))
                .unwrap();
            let granted = pending.granted().await.unwrap();
            client.release(black_box(granted.request_id));
        });
    });
    group.finish();

    drop(broker);
}

criterion_group!(benches, bench_grant_roundtrip);
criterion_main!(benches);
