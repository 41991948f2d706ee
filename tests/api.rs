use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use keyword_datasource::store::memory::{FailurePlan, MemoryStore};
use keyword_datasource::{router, AppState};

fn settings() -> Value {
    json!({
        "server": "archive.local",
        "port": "5432",
        "role": "reader",
        "database": "keywords",
        "metatable": "ktlmeta"
    })
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_keyword("dcs2", "el");
    store.add_keyword("dcs1", "az");
    store.add_keyword("dcs1", "el");
    store.add_keyword("dcs1", "az");
    // 2020-06-09T00:00:00Z onwards, one sample a second
    for i in 0..4 {
        store.insert("dcs1", "az", 1_591_660_800.0 + i as f64, 90.0 * i as f64);
    }
    store.insert("dcs1", "temp", 1_591_660_801.0, 300.0);
    store
}

fn app(store: &MemoryStore) -> Router {
    router(AppState::new(store.clone(), Some(settings()), None))
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn query(id: &str, text: &str, conversion: i64) -> Value {
    json!({
        "requestId": id,
        "rangeStart": "2020-06-09T00:00:00Z",
        "rangeEnd": "2020-06-09T00:01:00Z",
        "queryText": text,
        "unitConversion": conversion,
        "format": "time_series"
    })
}

#[tokio::test]
async fn liveness_reports_service() {
    let (status, body) = send_json(app(&MemoryStore::new()), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "keyword-datasource");
}

#[tokio::test]
async fn batch_isolates_failing_query() {
    let store = seeded();
    let body = json!({
        "queries": [
            query("A", "dcs1.az", 0),
            query("B", "dcs1.az", 9),
            query("C", "dcs1.az", 1),
        ]
    });

    let (status, body) = send_json(app(&store), Method::POST, "/query", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    let results = &body["results"];
    assert_eq!(results["A"]["valueAxis"], json!([0.0, 90.0, 180.0, 270.0]));
    assert_eq!(results["A"]["timeAxis"].as_array().unwrap().len(), 4);
    assert!(results["A"].get("error").is_none());

    assert_eq!(results["B"]["error"], "Unknown unit conversion: 9");

    let radians = results["C"]["valueAxis"].as_array().unwrap();
    assert!((radians[2].as_f64().unwrap() - std::f64::consts::PI).abs() < 1e-12);

    assert_eq!(store.opened(), 1);
    assert_eq!(store.released(), 1);
}

#[tokio::test]
async fn empty_query_text_spans_the_requested_range() {
    let store = seeded();
    let body = json!({ "queries": [query("A", "   ", 0)] });

    let (status, body) = send_json(app(&store), Method::POST, "/query", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["results"]["A"]["timeAxis"],
        json!(["2020-06-09T00:00:00Z", "2020-06-09T00:01:00Z"])
    );
    assert_eq!(body["results"]["A"]["valueAxis"], json!([]));
}

#[tokio::test]
async fn identifier_without_keyword_is_malformed() {
    let store = seeded();
    let body = json!({ "queries": [query("A", "onlyservice", 0)] });

    let (_, body) = send_json(app(&store), Method::POST, "/query", Some(body)).await;

    let error = body["results"]["A"]["error"].as_str().unwrap();
    assert!(error.contains("onlyservice"));
    assert!(body["results"]["A"].get("valueAxis").is_none());
}

#[tokio::test]
async fn kelvin_conversion_is_applied() {
    let store = seeded();
    let body = json!({ "queries": [query("T", "dcs1.temp", 3)] });

    let (_, body) = send_json(app(&store), Method::POST, "/query", Some(body)).await;

    let value = body["results"]["T"]["valueAxis"][0].as_f64().unwrap();
    assert!((value - 573.15).abs() < 1e-9);
}

#[tokio::test]
async fn unreachable_store_fails_the_batch() {
    let store = seeded();
    store.set_failures(FailurePlan {
        connect: Some("connection refused".into()),
        ..Default::default()
    });
    let body = json!({ "queries": [query("A", "dcs1.az", 0)] });

    let (status, body) = send_json(app(&store), Method::POST, "/query", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn unusable_settings_are_a_bad_request() {
    let store = seeded();
    let body = json!({
        "settings": { "server": "archive.local", "port": "5432" },
        "queries": [query("A", "dcs1.az", 0)]
    });

    let (status, _) = send_json(app(&store), Method::POST, "/query", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.opened(), 0);
}

#[tokio::test]
async fn services_are_sorted_and_distinct() {
    let (status, body) = send_json(app(&seeded()), Method::GET, "/services", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "services": { "dcs1": "dcs1", "dcs2": "dcs2" } }));
}

#[tokio::test]
async fn keywords_map_to_qualified_names() {
    let (status, body) =
        send_json(app(&seeded()), Method::GET, "/keywords?service=dcs1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "keywords": { "az": "dcs1.az", "el": "dcs1.el" } })
    );
}

#[tokio::test]
async fn keywords_without_service_is_a_bad_request() {
    let (status, body) = send_json(app(&seeded()), Method::GET, "/keywords", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "missing service");
}

#[tokio::test]
async fn discovery_ignores_other_methods() {
    let store = seeded();
    let (status, bytes) = send(app(&store), Method::POST, "/services", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(bytes.is_empty());

    let (status, bytes) = send(app(&store), Method::DELETE, "/keywords?service=dcs1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(bytes.is_empty());
    assert_eq!(store.opened(), 0);
}

#[tokio::test]
async fn catalog_failure_is_a_gateway_error() {
    let store = seeded();
    store.set_failures(FailurePlan {
        catalog: Some("relation \"ktlmeta\" does not exist".into()),
        ..Default::default()
    });

    let (status, _) = send_json(app(&store), Method::GET, "/services", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn health_check_confirms_default_settings() {
    let store = seeded();
    let (status, body) = send_json(app(&store), Method::POST, "/health/check", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "status": "ok",
            "message": "confirmed: archive.local:reader:keywords:ktlmeta"
        })
    );
}

#[tokio::test]
async fn health_check_reports_invalid_settings() {
    let store = seeded();
    let body = json!({ "settings": { "server": "archive.local" } });

    let (_, body) = send_json(app(&store), Method::POST, "/health/check", Some(body)).await;

    assert_eq!(body, json!({ "status": "error", "message": "Invalid config" }));
}

#[tokio::test]
async fn changed_settings_replace_the_instance() {
    let store = seeded();
    let app = app(&store);

    let first = json!({ "datasourceUid": "ds1", "queries": [query("A", "dcs1.az", 0)] });
    send_json(app.clone(), Method::POST, "/query", Some(first)).await;

    let mut changed = settings();
    changed["database"] = json!("keywords_v2");
    let second = json!({
        "datasourceUid": "ds1",
        "settings": changed,
        "queries": [query("A", "dcs1.az", 0)]
    });
    let (status, _) = send_json(app, Method::POST, "/query", Some(second)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(store.created(), 2);
    assert_eq!(store.disposed(), 1);
}
