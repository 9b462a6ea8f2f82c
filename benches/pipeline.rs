//! Integration benchmark for the ingestion → aggregation pipeline.
//!
//! Drives ingestion and the scheduler tick against an in-memory registry
//! and a fake messaging sink, the same shape as the unit tests in
//! scheduler.rs and app.rs.

use beacon_agent::app::{StatusEvent, ingest};
use beacon_agent::{
    Advertisement, BeaconConfig, BeaconUuid, ClientState, DeviceRegistry, MacAddress, Messaging,
    Scheduler, build_payload,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

const TEST_UUID: BeaconUuid = BeaconUuid([
    0xB3, 0x81, 0x39, 0x6E, 0xA6, 0x91, 0x40, 0x28, 0xB3, 0xB6, 0xCC, 0x5F, 0x87, 0xD3, 0x50,
    0xAA,
]);

fn ibeacon_advertisement(minor: u16, mac_tail: u8, rssi: i32) -> Advertisement {
    let mut data = vec![0x02, 0x01, 0x06];
    data.push(0x1A);
    data.push(0xFF);
    data.extend_from_slice(&[0x4C, 0x00, 0x02, 0x15]);
    data.extend_from_slice(&TEST_UUID.0);
    data.extend_from_slice(&[0x00, 0x01]);
    data.extend_from_slice(&minor.to_be_bytes());
    data.push(0xC5);
    Advertisement {
        mac: MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, mac_tail]),
        rssi,
        data,
    }
}

/// Messaging sink that only counts payloads, like the test fakes.
#[derive(Default)]
struct SinkMessaging {
    published: Mutex<Vec<Vec<u8>>>,
}

impl Messaging for SinkMessaging {
    fn publish(&self, payload: Vec<u8>) {
        self.published.lock().push(payload);
    }

    fn disconnect(&self) {}

    fn state(&self) -> ClientState {
        ClientState::Connected
    }
}

/// Benchmark the per-packet path: parse, identify, record.
fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    let config = BeaconConfig::default();

    let advertisement = ibeacon_advertisement(1, 0x01, -70);
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_device", |b| {
        let registry = DeviceRegistry::new(10);
        b.iter(|| {
            black_box(ingest(
                &config,
                &registry,
                black_box(&advertisement),
                Instant::now(),
            ))
        })
    });

    for devices in [3, 10] {
        let advertisements: Vec<Advertisement> = (0..devices)
            .map(|i| ibeacon_advertisement(1 + (i % 3) as u16, i as u8, -60 - i as i32))
            .collect();
        group.throughput(Throughput::Elements(devices as u64));
        group.bench_with_input(
            BenchmarkId::new("round_robin", devices),
            &advertisements,
            |b, advertisements| {
                let registry = DeviceRegistry::new(10);
                b.iter(|| {
                    for advertisement in advertisements {
                        ingest(&config, &registry, black_box(advertisement), Instant::now());
                    }
                })
            },
        );
    }

    group.finish();
}

/// Benchmark payload building over snapshots of different sizes.
fn bench_build_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_payload");
    let config = BeaconConfig::default();

    for devices in [0usize, 3, 25] {
        let registry = DeviceRegistry::new(10);
        let now = Instant::now();
        for i in 0..devices {
            let advertisement = ibeacon_advertisement(1 + (i % 3) as u16, i as u8, -60);
            ingest(&config, &registry, &advertisement, now);
        }
        let snapshot = registry.snapshot();

        group.bench_with_input(
            BenchmarkId::from_parameter(devices),
            &snapshot,
            |b, snapshot| {
                b.iter(|| black_box(build_payload(black_box(snapshot), &config, "bench_device")))
            },
        );
    }

    group.finish();
}

/// Benchmark a full scheduler cycle: sweep, count, build, publish.
fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_tick");

    let config = Arc::new(BeaconConfig::default());
    let registry = Arc::new(DeviceRegistry::new(10));
    let now = Instant::now();
    for i in 0..3u8 {
        let advertisement = ibeacon_advertisement(1 + u16::from(i), i, -60);
        ingest(&config, &registry, &advertisement, now);
    }

    let messaging = Arc::new(SinkMessaging::default());
    let (status_tx, mut status_rx) = mpsc::channel::<StatusEvent>(1024);
    let scheduler = Scheduler::new(
        Arc::clone(&config),
        Arc::clone(&registry),
        "bench_device".to_string(),
        Arc::clone(&messaging) as Arc<dyn Messaging>,
        status_tx,
    );

    group.throughput(Throughput::Elements(1));
    group.bench_function("three_beacons", |b| {
        b.iter(|| {
            scheduler.tick(black_box(now));
            // keep the bounded channels from filling up across iterations
            while status_rx.try_recv().is_ok() {}
            messaging.published.lock().clear();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_ingest, bench_build_payload, bench_tick);
criterion_main!(benches);
