use criterion::{Criterion, criterion_group, criterion_main};
use gcore::{alloc, collect};
use std::time::Duration;

fn benchmarks(criterion: &mut Criterion) {
    bench_lifecycle(criterion);
}

#[allow(dead_code)]
enum Data {
    Small(i32),
    Large(Vec<u8>),
}

fn alloc_objects() {
    for i in 0..1_000 {
        if i % 2 == 0 {
            let _ = alloc(move || Data::Small(i)).expect("alloc should succeed");
        } else {
            let data = vec![0_u8; 1024 * 1024];
            let _ = alloc(move || Data::Large(data)).expect("alloc should succeed");
        }
    }
    collect();
}

fn bench_lifecycle(criterion: &mut Criterion) {
    criterion.bench_function("gc_objects", |bencher| {
        bencher.iter(alloc_objects);
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = benchmarks
);
criterion_main!(benches);
