//! Tests against a fake InfluxDB `/query` endpoint, through to the HTTP pull
//! endpoint.

#![cfg(all(feature = "influxdb", feature = "server"))]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use pollwatch::notify::BroadcastSink;
use pollwatch::prelude::*;
use pollwatch::server;
use pollwatch::sources::InfluxSource;
use pollwatch::store::MemoryStateStore;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Clone, Default)]
struct FakeInflux {
    responses: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl FakeInflux {
    fn respond(&self, status: StatusCode, body: Value) {
        self.responses.lock().unwrap().push_back((status, body));
    }

    fn queries(&self) -> Vec<HashMap<String, String>> {
        self.queries.lock().unwrap().clone()
    }
}

async fn query(
    State(fake): State<FakeInflux>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    fake.queries.lock().unwrap().push(params);
    let (status, body) = fake
        .responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((StatusCode::OK, json!({"results": [{"statement_id": 0}]})));
    (status, Json(body))
}

async fn spawn_router(router: Router) -> (u16, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    (port, tx)
}

async fn spawn_influx(fake: FakeInflux) -> (u16, oneshot::Sender<()>) {
    spawn_router(Router::new().route("/query", get(query)).with_state(fake)).await
}

fn point(usage: f64) -> Value {
    json!({
        "results": [{
            "statement_id": 0,
            "series": [{
                "name": "cpu",
                "tags": {"host": "edge-1"},
                "columns": ["time", "usage"],
                "values": [["2024-05-01T12:00:00Z", usage]]
            }]
        }]
    })
}

fn source(port: u16) -> InfluxSource {
    InfluxSource::builder()
        .with_server("127.0.0.1")
        .with_port(port)
        .with_database("telemetry")
        .with_credentials("reader", "secret")
        .with_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_fetch_latest_point() {
    let fake = FakeInflux::default();
    fake.respond(StatusCode::OK, point(12.5));
    let (port, stop) = spawn_influx(fake.clone()).await;

    let record = source(port).fetch_latest("cpu").await.unwrap().unwrap();
    assert_eq!(record.get("usage"), Some(&json!(12.5)));
    assert_eq!(record.get("host"), Some(&json!("edge-1")));
    assert_eq!(record.get("time"), Some(&json!("2024-05-01T12:00:00Z")));

    let queries = fake.queries();
    assert_eq!(queries[0]["db"], "telemetry");
    assert_eq!(
        queries[0]["q"],
        r#"SELECT * FROM "cpu" ORDER BY time DESC LIMIT 1"#
    );

    let _ = stop.send(());
}

#[tokio::test]
async fn test_empty_measurement_is_no_record() {
    let fake = FakeInflux::default();
    let (port, stop) = spawn_influx(fake).await;

    assert!(source(port).fetch_latest("cpu").await.unwrap().is_none());

    let _ = stop.send(());
}

#[tokio::test]
async fn test_server_errors_are_data_source_errors() {
    let fake = FakeInflux::default();
    fake.respond(
        StatusCode::BAD_REQUEST,
        json!({"error": "error parsing query: found EOF"}),
    );
    fake.respond(
        StatusCode::OK,
        json!({"results": [{"statement_id": 0, "error": "database not found: telemetry"}]}),
    );
    let (port, stop) = spawn_influx(fake).await;
    let source = source(port);

    let err = source.fetch_latest("cpu").await.unwrap_err();
    assert!(err.is_data_source());
    assert!(err.to_string().contains("found EOF"));

    let err = source.fetch_latest("cpu").await.unwrap_err();
    assert!(err.to_string().contains("database not found"));

    let _ = stop.send(());
}

#[tokio::test]
async fn test_unreachable_server_is_data_source_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = source(port).fetch_latest("cpu").await.unwrap_err();
    assert!(err.is_data_source());
}

#[tokio::test]
async fn test_changes_reach_pull_endpoint() {
    let fake = FakeInflux::default();
    fake.respond(StatusCode::OK, point(10.0));
    fake.respond(StatusCode::OK, point(10.0));
    fake.respond(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "timeout"}));
    let (influx_port, stop_influx) = spawn_influx(fake).await;

    let monitor = Monitor::builder()
        .with_source(source(influx_port))
        .with_sink(BroadcastSink::default())
        .with_store(MemoryStateStore::new())
        .with_measurement("cpu")
        .with_topic("telemetry/cpu")
        .with_interval(Duration::from_secs(60))
        .build()
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let served = tokio::spawn(server::serve(listener, monitor.pull_cache(), async {
        let _ = stop_rx.await;
    }));

    let fetch = || {
        let url = format!("{}/data", base);
        async move {
            reqwest::get(url)
                .await
                .unwrap()
                .json::<Value>()
                .await
                .unwrap()
        }
    };

    assert_eq!(fetch().await, json!({"dataChanged": false, "lastChangeTime": null}));

    assert!(monitor.run_cycle().await.changed());
    let body = fetch().await;
    assert_eq!(body["dataChanged"], true);
    assert_eq!(body["data"]["usage"], 10.0);
    let changed_at = body["lastChangeTime"].clone();

    assert!(!monitor.run_cycle().await.changed());
    let body = fetch().await;
    assert_eq!(body["dataChanged"], false);
    assert_eq!(body["lastChangeTime"], changed_at);

    // Upstream failure: callers keep seeing the last good event
    assert!(monitor.run_cycle().await.is_skipped());
    assert_eq!(fetch().await, body);

    monitor.shutdown().await.unwrap();
    let _ = stop_tx.send(());
    served.await.unwrap().unwrap();
    let _ = stop_influx.send(());
}
