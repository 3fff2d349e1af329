//! Vector search and full scan AQL benchmarks (spec §4.6/§4.9-§4.11).

use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use std::hint::black_box;
use std::sync::Arc;
use themis_admin::AdminFacade;
use themis_core::catalog::IndexKind;
use themis_core::config::EngineConfig;
use themis_core::entity::Entity;
use themis_core::kv::{KvEngine, SledEngine};
use themis_core::value::Value;

fn facade_with_spill_dir() -> (AdminFacade, tempfile::TempDir) {
    let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.cte_spill_dir = dir.path().to_path_buf();
    (AdminFacade::from_engine(engine, config).unwrap(), dir)
}

fn random_vector(rng: &mut impl Rng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn bench_vector_search(c: &mut Criterion) {
    let (facade, _dir) = facade_with_spill_dir();
    facade.create_index(IndexKind::Vector, "bench_docs", vec!["embedding".to_string()], Some(16)).unwrap();
    let mut rng = rand::thread_rng();
    for i in 0..5_000 {
        let entity = Entity::new("bench_docs", format!("d{i}"), 0)
            .with_field("embedding", Value::Vector(random_vector(&mut rng, 16)));
        facade.put_entity(entity, 0, None).unwrap();
    }
    let query = random_vector(&mut rng, 16);
    c.bench_function("vector_search_top10_of_5000", |b| {
        b.iter(|| black_box(facade.vector_search("bench_docs", "embedding", &query, 10, None).unwrap()))
    });
}

fn bench_full_scan_aql(c: &mut Criterion) {
    let (facade, _dir) = facade_with_spill_dir();
    for i in 0..5_000 {
        let entity = Entity::new("bench_orders", format!("o{i}"), 0).with_field("total", Value::I64((i % 500) as i64));
        facade.put_entity(entity, 0, None).unwrap();
    }
    c.bench_function("full_scan_filter_5000_rows", |b| {
        b.iter(|| {
            let rows = facade
                .execute_aql(r#"FOR o IN bench_orders FILTER o.total > 250 RETURN o.total"#, Default::default(), None)
                .unwrap();
            black_box(rows);
        })
    });
}

criterion_group!(benches, bench_vector_search, bench_full_scan_aql);
criterion_main!(benches);
