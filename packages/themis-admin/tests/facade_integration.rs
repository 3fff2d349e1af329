//! End-to-end scenarios against `AdminFacade` that exercise more than one
//! storage subsystem per test: secondary indexes feeding query execution,
//! transaction isolation, fusion ranking, TTL expiry, and the changefeed.

use std::collections::HashMap;
use std::sync::Arc;

use themis_admin::AdminFacade;
use themis_core::catalog::IndexKind;
use themis_core::config::EngineConfig;
use themis_core::entity::Entity;
use themis_core::error::ThemisError;
use themis_core::kv::{KvEngine, SledEngine};
use themis_core::value::Value;

fn facade() -> (AdminFacade, tempfile::TempDir) {
    let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.cte_spill_dir = dir.path().to_path_buf();
    (AdminFacade::from_engine(engine, config).unwrap(), dir)
}

fn user(pk: &str, city: &str, age: i64) -> Entity {
    Entity::new("users", pk, 0)
        .with_field("city", Value::String(city.to_string()))
        .with_field("age", Value::I64(age))
}

#[test]
fn equality_index_speeds_up_aql_filter_and_stays_correct_after_updates() {
    let (f, _dir) = facade();
    f.put_entity(user("u1", "Berlin", 30), 0, None).unwrap();
    f.put_entity(user("u2", "Paris", 25), 0, None).unwrap();
    f.put_entity(user("u3", "Berlin", 41), 0, None).unwrap();
    f.create_index(IndexKind::Equality, "users", vec!["city".to_string()], None).unwrap();

    let rows = f
        .execute_aql(
            r#"FOR u IN users FILTER u.city == "Berlin" SORT u.age DESC RETURN u.age"#,
            HashMap::new(),
            None,
        )
        .unwrap();
    assert_eq!(rows, vec![Value::I64(41), Value::I64(30)]);

    // Move u3 out of Berlin; the index row must move with it.
    f.put_entity(user("u3", "Madrid", 41), 0, None).unwrap();
    let rows = f
        .execute_aql(r#"FOR u IN users FILTER u.city == "Berlin" RETURN u.age"#, HashMap::new(), None)
        .unwrap();
    assert_eq!(rows, vec![Value::I64(30)]);
}

#[test]
fn fulltext_search_ranks_denser_matches_first() {
    let (f, _dir) = facade();
    f.put_entity(
        Entity::new("docs", "d1", 0).with_field("body", Value::String("the quick brown fox jumps".into())),
        0,
        None,
    )
    .unwrap();
    f.put_entity(
        Entity::new("docs", "d2", 0).with_field("body", Value::String("a fox, just a fox, nothing but fox".into())),
        0,
        None,
    )
    .unwrap();
    f.put_entity(Entity::new("docs", "d3", 0).with_field("body", Value::String("no relevant terms here".into())), 0, None)
        .unwrap();

    let hits = f.fulltext_search("docs", "body", "fox", 10).unwrap();
    assert_eq!(hits[0].0, "d2");
    assert!(hits.iter().all(|(pk, _)| pk != "d3"));
}

#[test]
fn snapshot_isolation_conflict_is_visible_through_the_facade() {
    let (f, _dir) = facade();
    f.put_entity(user("u1", "Berlin", 30), 0, None).unwrap();

    let tx_a = f.begin_tx(true).unwrap();
    let tx_b = f.begin_tx(true).unwrap();
    f.get_entity("users", "u1", Some(tx_a)).unwrap();
    f.get_entity("users", "u1", Some(tx_b)).unwrap();

    f.put_entity(user("u1", "Munich", 31), 0, Some(tx_a)).unwrap();
    f.commit_tx(tx_a, 1).unwrap();

    f.put_entity(user("u1", "Vienna", 32), 0, Some(tx_b)).unwrap();
    let result = f.commit_tx(tx_b, 2);
    assert!(matches!(result, Err(ThemisError::Conflict { .. })));

    // The loser's rollback must not have touched the winner's write.
    let got = f.get_entity("users", "u1", None).unwrap().unwrap();
    assert_eq!(got.get("city"), Some(&Value::String("Munich".into())));
}

#[test]
fn transaction_rollback_restores_exact_prior_state_including_indexes() {
    let (f, _dir) = facade();
    f.create_index(IndexKind::Equality, "users", vec!["city".to_string()], None).unwrap();
    f.put_entity(user("u1", "Berlin", 30), 0, None).unwrap();

    let tx = f.begin_tx(false).unwrap();
    f.put_entity(user("u1", "Paris", 99), 0, Some(tx)).unwrap();
    f.delete_entity("users", "u1", Some(tx)).unwrap();
    f.put_entity(user("u2", "Berlin", 50), 0, Some(tx)).unwrap();
    f.rollback_tx(tx).unwrap();

    let got = f.get_entity("users", "u1", None).unwrap().unwrap();
    assert_eq!(got.get("city"), Some(&Value::String("Berlin".into())));
    assert_eq!(got.get("age"), Some(&Value::I64(30)));
    assert!(f.get_entity("users", "u2", None).unwrap().is_none());

    let rows = f.execute_aql(r#"FOR u IN users FILTER u.city == "Berlin" RETURN u.age"#, HashMap::new(), None).unwrap();
    assert_eq!(rows, vec![Value::I64(30)]);
}

#[test]
fn fusion_search_combines_text_and_vector_rankings() {
    let (f, _dir) = facade();
    f.create_index(IndexKind::Vector, "docs", vec!["embedding".to_string()], Some(2)).unwrap();

    f.put_entity(
        Entity::new("docs", "near_text_far_vector", 0)
            .with_field("body", Value::String("fox fox fox".into()))
            .with_field("embedding", Value::Vector(vec![-1.0, 0.0])),
        0,
        None,
    )
    .unwrap();
    f.put_entity(
        Entity::new("docs", "near_vector_far_text", 0)
            .with_field("body", Value::String("irrelevant words only".into()))
            .with_field("embedding", Value::Vector(vec![1.0, 0.0])),
        0,
        None,
    )
    .unwrap();

    let req = themis_admin::dto::FusionSearchRequest {
        table: "docs".to_string(),
        text_column: "body".to_string(),
        text_query: "fox".to_string(),
        vector_column: "embedding".to_string(),
        vector_query: vec![1.0, 0.0],
        top_k: 10,
        strategy: themis_admin::dto::FusionStrategyDto::default(),
    };
    let fused = f.fusion_search(req).unwrap();
    let pks: Vec<&str> = fused.iter().map(|(pk, _)| pk.as_str()).collect();
    assert!(pks.contains(&"near_text_far_vector"));
    assert!(pks.contains(&"near_vector_far_text"));
}

#[test]
fn ttl_sweep_removes_expired_rows_and_the_changefeed_records_it() {
    let (f, _dir) = facade();
    let mut expiring = Entity::new("sessions", "s1", 0).with_field("token", Value::String("abc".into()));
    expiring.meta.ttl_expiry_ms = Some(100);
    f.put_entity(expiring, 0, None).unwrap();

    let mut long_lived = Entity::new("sessions", "s2", 0);
    long_lived.meta.ttl_expiry_ms = Some(10_000);
    f.put_entity(long_lived, 0, None).unwrap();

    let expired = f.sweep_ttl(5_000, 100).unwrap();
    assert_eq!(expired, vec![("sessions".to_string(), "s1".to_string())]);
    assert!(f.get_entity("sessions", "s1", None).unwrap().is_none());
    assert!(f.get_entity("sessions", "s2", None).unwrap().is_some());

    let events = f.changefeed_read(0, 100).unwrap();
    assert!(events.iter().any(|e| e.pk == "s1" && matches!(e.kind, themis_core::changefeed::ChangeKind::Delete)));
}

#[test]
fn batch_put_is_all_or_nothing_and_visible_atomically() {
    let (f, _dir) = facade();
    let batch = vec![user("u1", "Berlin", 30), user("u2", "Paris", 25), user("u3", "Rome", 40)];
    f.batch_put(batch, 0, None).unwrap();

    assert!(f.get_entity("users", "u1", None).unwrap().is_some());
    assert!(f.get_entity("users", "u2", None).unwrap().is_some());
    assert!(f.get_entity("users", "u3", None).unwrap().is_some());

    let seq_before = f.stats().unwrap().changefeed_next_seq;
    assert!(seq_before >= 3);
}
