//! Scheduling pass benchmarks
//!
//! Measures:
//! - Queue build and merge over deep allocation trees
//! - Full pass throughput for growing cells
//! - Placement search cost with trait constraints

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cellsched::prelude::*;

/// Build a cell with `racks` racks of `servers_per_rack` servers each
fn build_cell(racks: usize, servers_per_rack: usize) -> Cell {
    let mut cell = Cell::new("bench");
    for r in 0..racks {
        let rack = format!("rack-{r}");
        cell.add_bucket(rack.clone(), None, "rack").unwrap();
        for s in 0..servers_per_rack {
            let traits = if s % 4 == 0 {
                TraitSet::new().with("ssd")
            } else {
                TraitSet::new()
            };
            cell.add_server(
                format!("srv-{r}-{s}"),
                &rack,
                CapacityVector::new(64_000, 16_000, 500_000),
                DEFAULT_PARTITION,
                traits,
                None,
            )
            .unwrap();
        }
    }
    cell
}

/// Configure `tenants` allocations and submit `instances_per_tenant`
/// instances into each
fn load_tenants(cell: &mut Cell, tenants: usize, instances_per_tenant: usize) {
    for t in 0..tenants {
        let tenant = format!("tenant-{t}");
        cell.configure_allocation(
            DEFAULT_PARTITION,
            &[tenant.clone()],
            CapacityVector::new(256_000, 64_000, 2_000_000),
            ((t % 5) * 25) as i32,
            None,
            TraitSet::new(),
            None,
        )
        .unwrap();
        for i in 0..instances_per_tenant {
            cell.submit_instance(
                Instance::new(
                    format!("{tenant}.app#{i}"),
                    CapacityVector::new(1_000 + (i as u64 % 8) * 500, 250, 5_000),
                )
                .with_allocation(AllocationAssignment::new(
                    DEFAULT_PARTITION,
                    vec![tenant.clone()],
                )),
            )
            .unwrap();
        }
    }
}

fn bench_queue_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_build");
    for tenants in [4, 16, 64] {
        let mut cell = build_cell(4, 16);
        load_tenants(&mut cell, tenants, 32);
        let root = cell.partition(DEFAULT_PARTITION).unwrap().clone();
        let size = cell.topology().size(DEFAULT_PARTITION);
        let instances = cell.instances().clone();

        group.bench_with_input(BenchmarkId::from_parameter(tenants), &tenants, |b, _| {
            b.iter(|| {
                let queue = UtilizationQueue::new(&root, size, &instances);
                black_box(queue.count())
            })
        });
    }
    group.finish();
}

fn bench_scheduling_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduling_pass");
    group.sample_size(20);
    for (racks, servers) in [(4, 16), (8, 32), (16, 64)] {
        let label = format!("{}x{}", racks, servers);
        group.bench_with_input(BenchmarkId::from_parameter(&label), &label, |b, _| {
            b.iter_with_setup(
                || {
                    let mut cell = build_cell(racks, servers);
                    load_tenants(&mut cell, 8, racks * servers / 4);
                    cell
                },
                |mut cell| black_box(cell.schedule().unwrap()),
            )
        });
    }
    group.finish();
}

fn bench_constrained_placement(c: &mut Criterion) {
    let mut cell = build_cell(16, 32);
    cell.configure_allocation(
        DEFAULT_PARTITION,
        &[],
        CapacityVector::new(1_000_000, 1_000_000, 1_000_000),
        0,
        None,
        TraitSet::new(),
        None,
    )
    .unwrap();
    cell.submit_instance(
        Instance::new("probe#1", CapacityVector::new(1_000, 250, 5_000))
            .with_allocation(AllocationAssignment::new(
                DEFAULT_PARTITION,
                Vec::<String>::new(),
            ))
            .with_traits(TraitSet::new().with("ssd")),
    )
    .unwrap();

    c.bench_function("constrained_placement", |b| {
        let app = cell.instance("probe#1").unwrap().clone();
        let now = chrono::Utc::now();
        b.iter(|| {
            black_box(cellsched::placement::find_placement(
                cell.topology(),
                TraversalStrategy::ConstrainedPreorder,
                &app,
                now,
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_queue_build,
    bench_scheduling_pass,
    bench_constrained_placement
);
criterion_main!(benches);
