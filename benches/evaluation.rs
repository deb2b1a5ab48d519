use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tsdb_gateway::bucket::BucketStore;
use tsdb_gateway::interpolation::{InterpolationEngine, Interpolator};
use tsdb_gateway::key::{MetricKey, MetricKeyCache};
use tsdb_gateway::rpn::{CompiledExpression, EvaluationScope, RpnCalculator};
use tsdb_gateway::types::DataPoint;
use tsdb_gateway::MetricSpecification;

struct Scope {
    timestamp: i64,
}

impl EvaluationScope for Scope {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn lookup_by_shortcut(&self, name: &str) -> Option<f64> {
        match name {
            "used" => Some(30.0),
            "total" => Some(120.0),
            _ => None,
        }
    }
}

fn create_points(count: usize, step: i64) -> Vec<DataPoint> {
    (0..count)
        .map(|i| DataPoint::new(i as i64 * step, 100.0 + (i as f64 * 0.5)))
        .collect()
}

fn bench_rpn(c: &mut Criterion) {
    let calc = RpnCalculator::new();
    let scope = Scope { timestamp: 60 };

    let mut group = c.benchmark_group("rpn");

    for expression in [
        "used,total,/,100,*",
        "used,50,gt,used,0,if",
        "1,2,3,4,5,6,7,8,8,sort,8,avg",
    ] {
        let compiled = CompiledExpression::compile(expression).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(expression),
            &compiled,
            |b, compiled| b.iter(|| black_box(calc.evaluate(compiled, &scope).unwrap())),
        );
    }

    group.bench_function("compile", |b| {
        b.iter(|| black_box(CompiledExpression::compile("used,total,/,100,*").unwrap()))
    });

    group.finish();
}

fn bench_bucketing(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucketing");

    for size in [1_000, 10_000, 100_000].iter() {
        let points = create_points(*size, 10);
        let mut keys = MetricKeyCache::new();
        let key = keys.put(MetricKey::from_spec(&MetricSpecification::for_metric("m")));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut store = BucketStore::new(60).unwrap();
                store.add_all(key, "m", &points);
                black_box(store.len())
            });
        });
    }

    group.finish();
}

fn bench_interpolation(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpolation");

    for size in [1_000, 10_000].iter() {
        // every third bucket of the sparse series is missing
        let dense = create_points(*size, 60);
        let sparse: Vec<DataPoint> = dense
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 3 != 1)
            .map(|(_, p)| *p)
            .collect();

        let mut keys = MetricKeyCache::new();
        let dense_key = keys.put(MetricKey::from_spec(&MetricSpecification::for_metric("d")));
        let sparse_key = keys.put(MetricKey::from_spec(&MetricSpecification::for_metric("s")));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut store = BucketStore::new(60).unwrap();
                store.add_all(dense_key, "d", &dense);
                store.add_all(sparse_key, "s", &sparse);

                let mut engine = InterpolationEngine::default();
                engine.register(Interpolator::Linear, sparse_key, "s");
                engine.run(&mut store);
                black_box(store.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rpn, bench_bucketing, bench_interpolation);
criterion_main!(benches);
