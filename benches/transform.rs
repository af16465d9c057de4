use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use criteo_pipeline::cluster::{ClusterConfig, ExecutionContext, MemoryPool};
use criteo_pipeline::dataset::{Dataset, FileFormat};
use criteo_pipeline::pipeline::{fit, OpsConfig, Workflow};
use criteo_pipeline::schema::{Schema, NUM_CATEGORICAL, NUM_CONTINUOUS};
use polars::prelude::*;
use rand::prelude::*;
use std::fs::File;

fn create_criteo_data(n_rows: usize) -> DataFrame {
    let mut rng = StdRng::seed_from_u64(7);
    let mut columns = Vec::with_capacity(1 + NUM_CONTINUOUS + NUM_CATEGORICAL);

    let labels: Vec<i64> = (0..n_rows).map(|_| rng.gen_range(0..2)).collect();
    columns.push(Series::new("label".into(), labels).into_column());
    for c in 0..NUM_CONTINUOUS {
        let values: Vec<Option<f64>> = (0..n_rows)
            .map(|_| rng.gen_bool(0.9).then(|| rng.gen_range(-2.0..1000.0)))
            .collect();
        columns.push(Series::new(format!("I{}", c + 1).into(), values).into_column());
    }
    for c in 0..NUM_CATEGORICAL {
        // skewed draws so a share of values falls under the threshold
        let values: Vec<Option<String>> = (0..n_rows)
            .map(|_| {
                let v: u32 = rng.gen_range(0..1000);
                rng.gen_bool(0.95).then(|| format!("{:08x}", v * v / 1000))
            })
            .collect();
        columns.push(Series::new(format!("C{}", c + 1).into(), values).into_column());
    }
    DataFrame::new(columns).unwrap()
}

fn bench_transform_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_partition");
    group.sample_size(10);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("day_0.parquet");
    let mut train = create_criteo_data(20_000);
    ParquetWriter::new(File::create(&path).unwrap()).finish(&mut train).unwrap();

    let schema = Schema::criteo();
    let ctx = ExecutionContext::bootstrap(&ClusterConfig::new().with_memory_limit(1 << 30)).unwrap();
    let workflow = Workflow::criteo(schema.clone(), &OpsConfig { freq_threshold: 5, ..Default::default() }).unwrap();
    let dataset = Dataset::new(vec![path], FileFormat::Parquet, schema.input_types());
    let fitted = fit(&ctx, &workflow, &dataset).unwrap();
    let pool = MemoryPool::new(0, 256 << 20, 256 << 20);

    for n_rows in [1_000, 10_000, 50_000].iter() {
        let df = criteo_pipeline::dataset::coerce(&create_criteo_data(*n_rows), &schema.input_types()).unwrap();

        group.bench_with_input(BenchmarkId::new("apply", n_rows), &df, |b, df| {
            b.iter(|| fitted.transform_partition(black_box(df), &pool).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transform_partition);
criterion_main!(benches);
