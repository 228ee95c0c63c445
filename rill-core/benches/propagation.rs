use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rill_core::{Computed, Runtime, RuntimeConfig};

fn bench_cached_read(c: &mut Criterion) {
    let rt = Runtime::new();
    let cell = rt.new_value(1u64);
    let source = cell.clone();
    let doubled = rt.new_computed(move || source.get() * 2);
    doubled.read().unwrap();

    c.bench_function("computed_cached_read", |b| {
        b.iter(|| black_box(doubled.read()))
    });
}

fn bench_chain_propagation(c: &mut Criterion) {
    let rt = Runtime::new();
    let cell = rt.new_value(0u64);

    let source = cell.clone();
    let mut tail: Computed<u64> = rt.new_computed(move || source.get() + 1);
    for _ in 0..63 {
        let prev = tail.clone();
        tail = rt.new_try_computed(move || prev.read().map(|v| v + 1));
    }
    let last = tail.clone();
    let _observer = rt.new_observer(move || {
        black_box(last.read()?);
        Ok(())
    });

    c.bench_function("chain_64_write_and_flush", |b| {
        let mut value = 0u64;
        b.iter(|| {
            value = value.wrapping_add(1);
            cell.set(black_box(value));
        })
    });
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = Runtime::with_config(RuntimeConfig::manual_flush());
    let cell = rt.new_value(0u64);
    let observers: Vec<_> = (0..256)
        .map(|_| {
            let source = cell.clone();
            rt.new_observer(move || {
                black_box(source.get());
                Ok(())
            })
        })
        .collect();
    rt.flush().unwrap();

    c.bench_function("fan_out_256_observers", |b| {
        let mut value = 0u64;
        b.iter(|| {
            value = value.wrapping_add(1);
            cell.set(value);
            black_box(rt.flush().unwrap().observers_run)
        })
    });

    drop(observers);
}

criterion_group!(benches, bench_cached_read, bench_chain_propagation, bench_fan_out);
criterion_main!(benches);
