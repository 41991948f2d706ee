use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use keyword_datasource::store::memory::{FailurePlan, MemoryDatasource, MemoryStore};
use keyword_datasource::{ConnectionConfig, DataQuery, QueryContext, QueryError, QueryService};

fn service(store: &MemoryStore) -> QueryService<MemoryDatasource> {
    let config = ConnectionConfig::from_json(&json!({
        "server": "archive.local", "port": 5432, "role": "reader",
        "database": "keywords", "metatable": "ktlmeta"
    }))
    .unwrap();
    QueryService::new(Arc::new(MemoryDatasource::new(config, store.clone())))
}

fn query(id: &str, text: &str) -> DataQuery {
    serde_json::from_value(json!({
        "refId": id,
        "rangeStart": "2020-06-09T00:00:00Z",
        "rangeEnd": "2020-06-09T00:01:00Z",
        "queryText": text,
        "unitConversion": 0,
        "format": "time_series"
    }))
    .unwrap()
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_keyword("dcs1", "az");
    store.insert("dcs1", "az", 1_591_660_810.25, 1.0);
    store.insert("dcs1", "az", 1_591_660_820.75, 2.0);
    store
}

#[tokio::test]
async fn cancelling_a_batch_releases_its_connection() {
    let store = seeded();
    store.set_failures(FailurePlan {
        stall_fetch: true,
        ..Default::default()
    });
    let svc = service(&store);
    let ctx = QueryContext::background();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let results = svc
        .query_data(&ctx, vec![query("A", "dcs1.az"), query("B", "dcs1.az")])
        .await
        .unwrap();

    assert_eq!(results["A"].error, Some(QueryError::Cancelled));
    assert_eq!(results["B"].error, Some(QueryError::Cancelled));
    assert_eq!(store.opened(), 1);
    assert_eq!(store.open_connections(), 0);
}

#[tokio::test]
async fn dropping_an_in_flight_batch_releases_its_connection() {
    let store = seeded();
    store.set_failures(FailurePlan {
        stall_fetch: true,
        ..Default::default()
    });
    let svc = service(&store);

    let ctx = QueryContext::background();
    let batch = svc.query_data(&ctx, vec![query("A", "dcs1.az")]);
    let timed_out = tokio::time::timeout(Duration::from_millis(20), batch).await;

    assert!(timed_out.is_err());
    assert_eq!(store.opened(), 1);
    assert_eq!(store.released(), 1);
}

#[tokio::test]
async fn missing_service_table_only_fails_its_query() {
    let store = seeded();
    let results = service(&store)
        .query_data(
            &QueryContext::background(),
            vec![query("A", "dcs9.az"), query("B", "dcs1.az")],
        )
        .await
        .unwrap();

    assert!(matches!(results["A"].error, Some(QueryError::Store(_))));
    let frame = results["B"].frame.as_ref().unwrap();
    assert_eq!(frame.value_axis, vec![1.0, 2.0]);
    assert_eq!(frame.time_axis[0].timestamp_subsec_millis(), 250);
}

#[tokio::test]
async fn hostile_service_name_never_reaches_the_store() {
    let store = seeded();
    let results = service(&store)
        .query_data(
            &QueryContext::background(),
            vec![query("A", "dcs1\"; drop table ktlmeta; --.az")],
        )
        .await
        .unwrap();

    assert!(matches!(
        results["A"].error,
        Some(QueryError::InvalidIdentifier { .. })
    ));
    assert!(results["A"].frame.is_none());
}

#[tokio::test]
async fn undecodable_payload_fails_only_its_query() {
    let store = seeded();
    let bad: DataQuery = serde_json::from_value(json!({
        "refId": "X",
        "rangeStart": "2020-06-09T00:00:00Z",
        "rangeEnd": "2020-06-09T00:01:00Z",
        "queryText": 42
    }))
    .unwrap();

    let results = service(&store)
        .query_data(&QueryContext::background(), vec![bad, query("B", "dcs1.az")])
        .await
        .unwrap();

    assert!(matches!(results["X"].error, Some(QueryError::MalformedQuery(_))));
    assert!(results["B"].is_ok());
}

#[tokio::test]
async fn cancelling_during_the_count_phase_fails_every_query() {
    let store = seeded();
    store.set_failures(FailurePlan {
        stall_count: true,
        ..Default::default()
    });
    let svc = service(&store);
    let ctx = QueryContext::background();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let results = svc
        .query_data(&ctx, vec![query("A", "dcs1.az"), query("B", "dcs1.az")])
        .await
        .unwrap();

    for id in ["A", "B"] {
        assert_eq!(results[id].error, Some(QueryError::Cancelled));
        let frame = results[id].frame.as_ref().unwrap();
        assert!(frame.value_axis.is_empty());
        assert_eq!(frame.time_axis.len(), 2);
    }
    assert_eq!(store.open_connections(), 0);
}
