//! Benchmark for naming and planning
//!
//! Target: plan a 500-partition site well under the console round-trip time

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lpar_dr_sync::domain::model::{PartitionIdentity, RawPartition, Site, SnapshotReplicationStatus};
use lpar_dr_sync::identity::{normalize_partition, NamingConvention};
use lpar_dr_sync::reconcile::{Planner, SiteState};
use std::time::Duration;

fn raw_partition(i: usize) -> RawPartition {
    RawPartition {
        partition_name: format!("lpar-{:04}", i),
        role: if i % 5 == 0 { "os400" } else { "aixlinux" }.to_string(),
        wwpns: (0..4)
            .map(|port| format!("c0:50:76:03:a2:{:02x}:{:02x}:{:02x}", i / 256, i % 256, port))
            .collect(),
        macs: vec![format!("0A-1B-2C-{:02X}-{:02X}-00", i / 256, i % 256)],
    }
}

fn identities(count: usize) -> Vec<PartitionIdentity> {
    (0..count)
        .filter_map(|i| normalize_partition(Site::Pra, "P980-A", &raw_partition(i)).ok())
        .collect()
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity");
    let raws: Vec<_> = (0..500).map(raw_partition).collect();
    group.throughput(Throughput::Elements(raws.len() as u64));

    group.bench_function("normalize_500", |b| {
        b.iter(|| {
            for raw in &raws {
                let _ = normalize_partition(Site::Nominal, "P980-A", black_box(raw));
            }
        });
    });

    let ids = identities(500);
    let naming = NamingConvention::default();
    group.bench_function("derive_names_500", |b| {
        b.iter(|| {
            for identity in &ids {
                black_box(naming.derive_names(identity));
            }
        });
    });

    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner");
    let planner = Planner::new(Duration::from_secs(3600));
    let naming = NamingConvention::default();

    for count in [50, 500] {
        let desired: Vec<_> = identities(count)
            .iter()
            .map(|i| naming.derive_names(i))
            .collect();
        group.throughput(Throughput::Elements(count as u64));

        let mut fresh = SiteState::default();
        for object in &desired {
            fresh.snapshots.insert(
                object.snapshot_set_name.clone(),
                SnapshotReplicationStatus::synced(Duration::from_secs(60)),
            );
        }
        group.bench_with_input(BenchmarkId::new("fresh_site", count), &fresh, |b, state| {
            b.iter(|| planner.plan(Site::Pra, black_box(&desired), state));
        });

        let converged = fresh.project(&planner.plan(Site::Pra, &desired, &fresh));
        group.bench_with_input(
            BenchmarkId::new("converged_site", count),
            &converged,
            |b, state| {
                b.iter(|| planner.plan(Site::Pra, black_box(&desired), state));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_plan);
criterion_main!(benches);
