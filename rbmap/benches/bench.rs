use core::time::Duration;
use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rbmap::RedBlackMap;

pub fn gen_random_keys(count: usize) -> Vec<String> {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        let len = rng.gen_range(4..16);
        let key: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        keys.push(key);
    }
    assert_eq!(keys.len(), count);
    keys
}

pub fn gen_ascending_keys(count: usize) -> Vec<String> {
    let mut keys = gen_random_keys(count);
    keys.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
    keys
}

fn rbmap_insert_all(keys: &[String]) -> RedBlackMap<usize> {
    let mut map = RedBlackMap::new();
    for (i, key) in keys.iter().enumerate() {
        map.insert(key.clone(), i);
    }
    map
}

// std baseline folds keys to lowercase up front to get the same
// case-insensitive key space
fn btreemap_insert_all(keys: &[String]) -> BTreeMap<String, usize> {
    let mut map = BTreeMap::new();
    for (i, key) in keys.iter().enumerate() {
        map.entry(key.to_lowercase()).or_insert(i);
    }
    map
}

fn bench_insert(c: &mut Criterion) {
    let gens = [
        ("random", gen_random_keys as fn(usize) -> Vec<String>),
        ("ascending", gen_ascending_keys),
    ];
    for (name, gen_func) in gens {
        let mut g = c.benchmark_group(format!("insert_{name}"));
        for count in [100, 1_000, 10_000] {
            let keys = gen_func(count);
            g.bench_with_input(BenchmarkId::new("rbmap", count), &keys, |b, keys| {
                b.iter(|| rbmap_insert_all(keys))
            });
            g.bench_with_input(BenchmarkId::new("std_btreemap", count), &keys, |b, keys| {
                b.iter(|| btreemap_insert_all(keys))
            });
        }
        g.finish();
    }
}

fn bench_get(c: &mut Criterion) {
    let mut g = c.benchmark_group("get_random");
    for count in [100, 1_000, 10_000] {
        let keys = gen_random_keys(count);
        let map = rbmap_insert_all(&keys);
        let btree = btreemap_insert_all(&keys);

        g.bench_with_input(BenchmarkId::new("rbmap", count), &keys, |b, keys| {
            b.iter(|| {
                let mut found = 0usize;
                for key in keys {
                    if map.get(key).is_some() {
                        found += 1;
                    }
                }
                found
            })
        });
        g.bench_with_input(BenchmarkId::new("std_btreemap", count), &keys, |b, keys| {
            b.iter(|| {
                let mut found = 0usize;
                for key in keys {
                    if btree.get(&key.to_lowercase()).is_some() {
                        found += 1;
                    }
                }
                found
            })
        });
    }
    g.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(1))
        .warm_up_time(Duration::from_millis(100));
    targets = bench_insert, bench_get
);
criterion_main!(benches);
