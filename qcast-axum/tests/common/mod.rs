#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;
use qcast_auth::{TokenCodec, DEFAULT_TOKEN_TTL};
use qcast_axum::{axum, QcastAxumApp, QcastAxumState, RealtimeSettings};
use qcast_core::{
    ConnectTarget, Gateway, MemoryConnector, PoolRegistry, PoolSettings, Row, RowSet, SubscriberRegistry,
    TenantConnector, TenantDirectory, DEFAULT_DIRECTORY_TABLE,
};
use serde_json::{json, Value};

pub const SECRET: &str = "test-signing-secret";

pub struct Harness {
    pub app: QcastAxumApp,
    pub connector: MemoryConnector,
}

pub fn settings() -> PoolSettings {
    PoolSettings {
        connect_timeout: Duration::from_millis(300),
        request_timeout: Duration::from_millis(300),
        ..PoolSettings::default()
    }
}

pub fn directory_row(id: Value, name: &str, server: &str, database: &str) -> Row {
    json!({
        "RestID": id,
        "RestName": name,
        "RestServerName": server,
        "RestDBName": database,
        "RestUserName": "qcast",
        "RestPassword": "pw-that-must-not-leak"
    })
    .as_object()
    .cloned()
    .unwrap()
}

pub fn rows(n: usize) -> RowSet {
    (0..n)
        .map(|i| json!({ "QueNo": format!("A{i:02}"), "Status": "WAIT" }).as_object().cloned().unwrap())
        .collect()
}

pub fn harness_with(realtime: RealtimeSettings) -> Harness {
    let connector = MemoryConnector::new();
    connector.insert_directory_row(directory_row(json!(7), "Siam Square", "10.0.0.5,14330", "REST_007"));
    connector.insert_directory_row(directory_row(json!("8"), "Ari", "10.0.0.6", "REST_008"));

    let shared: Arc<dyn TenantConnector> = Arc::new(connector.clone());
    let target = ConnectTarget {
        host: "directory".to_string(),
        port: 1433,
        database: "MAIN".to_string(),
        user: "sa".to_string(),
        secret: "main-secret".to_string(),
        settings: settings(),
    };

    let state = QcastAxumState {
        directory: Arc::new(TenantDirectory::new(Arc::clone(&shared), target, DEFAULT_DIRECTORY_TABLE)),
        tokens: Arc::new(TokenCodec::new(SECRET, DEFAULT_TOKEN_TTL)),
        pools: Arc::new(PoolRegistry::new(shared, settings())),
        gateway: Gateway::new(settings().request_timeout),
        subscribers: Arc::new(SubscriberRegistry::new()),
        realtime,
    };

    Harness {
        app: axum(state),
        connector,
    }
}

pub fn harness() -> Harness {
    harness_with(RealtimeSettings::default())
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
