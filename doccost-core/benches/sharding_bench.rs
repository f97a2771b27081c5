use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use doccost_core::sharding::{compute_shard_distribution, ShardingConfig, ShardingStrategy};

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("shard_distribution");

    for strategy in ShardingStrategy::ALL {
        // Stock sharded on IDP
        let config = ShardingConfig::new(1000, strategy, 20_000_000).with_distinct_values(100_000);
        group.bench_with_input(BenchmarkId::from_parameter(strategy), &config, |b, config| {
            b.iter(|| compute_shard_distribution(black_box(config)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
