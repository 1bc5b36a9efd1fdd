use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use prorate_core::{
    EntityRecord, FragmentKey, ProrateEngine, RunOptions, WeightSource,
};
use std::collections::HashMap;
use std::sync::Arc;

fn create_interval_record(i: usize) -> EntityRecord {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        + Duration::minutes(((i * 97) % 1440) as i64);
    let span = Duration::minutes((60 + (i * 251) % 4320) as i64);
    EntityRecord::interval(100.0 + i as f64, start, start + span, "prod")
}

fn create_product_record(i: usize) -> EntityRecord {
    let products: Vec<String> = (0..=(i % 5)).map(|j| format!("P{j}")).collect();
    EntityRecord::products(
        50.0 + i as f64,
        products,
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
    )
}

struct BenchWeights;

impl WeightSource for BenchWeights {
    fn resolve(&self, keys: &[FragmentKey]) -> anyhow::Result<HashMap<FragmentKey, Option<f64>>> {
        Ok(keys.iter().enumerate().map(|(i, k)| (k.clone(), Some((i + 1) as f64))).collect())
    }
}

fn bench_interval_allocation(c: &mut Criterion) {
    let engine = ProrateEngine::new().unwrap();

    let single = vec![create_interval_record(7)];
    c.bench_function("allocate_single_interval_entity", |b| {
        b.iter(|| {
            black_box(engine.run(&single, RunOptions::default()).unwrap());
        });
    });

    let batch: Vec<EntityRecord> = (0..1000).map(create_interval_record).collect();
    c.bench_function("allocate_1000_interval_entities", |b| {
        b.iter(|| {
            black_box(engine.run(&batch, RunOptions::default()).unwrap());
        });
    });
}

fn bench_product_allocation(c: &mut Criterion) {
    let engine = ProrateEngine::new().unwrap().with_weight_source(Arc::new(BenchWeights));

    let batch: Vec<EntityRecord> = (0..1000).map(create_product_record).collect();
    c.bench_function("allocate_1000_product_entities", |b| {
        b.iter(|| {
            black_box(engine.run(&batch, RunOptions::default()).unwrap());
        });
    });
}

criterion_group!(benches, bench_interval_allocation, bench_product_allocation);
criterion_main!(benches);
