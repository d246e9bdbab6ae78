//! Benchmarks for calls through the module boundary and value conversion

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use modbridge::host::sandbox::Sandbox;
use modbridge::{Decode, Encode, List, Module};
use num_bigint::BigInt;

fn loaded_module() -> (Module, Sandbox) {
    let module = Module::new();
    module.export("add", |a: i64, b: i64| a + b, "").unwrap();
    module
        .export("sum-list", |xs: List<i64>| xs.0.iter().sum::<i64>(), "")
        .unwrap();
    module
        .export("count", |m: HashMap<String, i64>| m.len(), "")
        .unwrap();
    let mut sandbox = Sandbox::with_trampoline(module.trampoline());
    sandbox.with_env(|env| module.init(env)).unwrap();
    (module, sandbox)
}

/// Benchmark a two-argument call including argument and result conversion
fn bench_call(c: &mut Criterion) {
    let (_module, mut sandbox) = loaded_module();
    c.bench_function("call_add", |b| {
        sandbox.with_env(|env| {
            let x = env.make_int(2).unwrap();
            let y = env.make_int(40).unwrap();
            b.iter(|| black_box(env.call("add", &[x, y]).unwrap()))
        })
    });
}

/// Benchmark list arguments of varying length
fn bench_list_argument(c: &mut Criterion) {
    let (_module, mut sandbox) = loaded_module();
    let mut group = c.benchmark_group("sum_list");

    for &size in &[1usize, 16, 256] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("{}_items", size), |b| {
            sandbox.with_env(|env| {
                let list = List((0..size as i64).collect::<Vec<_>>()).encode(env).unwrap();
                b.iter(|| black_box(env.call("sum-list", &[list]).unwrap()))
            })
        });
    }

    group.finish();
}

/// Benchmark hash table decoding
fn bench_map_argument(c: &mut Criterion) {
    let (_module, mut sandbox) = loaded_module();
    let map: HashMap<String, i64> = (0..64).map(|i| (format!("key-{}", i), i)).collect();
    c.bench_function("count_map_64", |b| {
        sandbox.with_env(|env| {
            let table = map.encode(env).unwrap();
            b.iter(|| black_box(env.call("count", &[table]).unwrap()))
        })
    });
}

/// Benchmark bignum conversion in both directions
fn bench_bigint(c: &mut Criterion) {
    let mut sandbox = Sandbox::new();
    let big: BigInt = "123456789012345678901234567890123456789".parse().unwrap();
    c.bench_function("bigint_round_trip", |b| {
        sandbox.with_env(|env| {
            b.iter(|| {
                let v = big.encode(env).unwrap();
                black_box(BigInt::decode(env, v).unwrap())
            })
        })
    });
}

criterion_group!(
    benches,
    bench_call,
    bench_list_argument,
    bench_map_argument,
    bench_bigint,
);
criterion_main!(benches);
