mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use qcast_axum::orchestrator::QUEUE_LISTING_PROCEDURE;
use qcast_axum::{QcastAxumApp, RealtimeSettings};
use qcast_core::{Reply, TenantId};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use common::{harness, harness_with, json_body, post_json, rows};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(app: &QcastAxumApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame within 2s")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return text.as_str().to_string();
        }
    }
}

async fn wait_for_subscribers(app: &QcastAxumApp, tenant: &str, expected: usize) {
    let tenant = TenantId::new(tenant);
    let deadline = Instant::now() + Duration::from_secs(2);
    while app.state.subscribers.subscriber_count(&tenant) != expected {
        assert!(Instant::now() < deadline, "subscriber count never reached {expected}");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn bare_ping_is_answered_with_pong() {
    let h = harness();
    let addr = serve(&h.app).await;
    let mut client = connect(addr).await;

    client.send(Message::text("ping")).await.unwrap();
    assert_eq!(next_text(&mut client).await, "pong");
}

#[tokio::test]
async fn joined_client_receives_queue_updates() {
    let h = harness();
    h.connector
        .reply(QUEUE_LISTING_PROCEDURE, Reply::Sets(vec![rows(4)]));
    let addr = serve(&h.app).await;

    let mut client = connect(addr).await;
    client
        .send(Message::text(json!({ "type": "join-tenant", "tenantId": 7 }).to_string()))
        .await
        .unwrap();
    wait_for_subscribers(&h.app, "7", 1).await;

    let login = h
        .app
        .router
        .clone()
        .oneshot(post_json("/api/queue/login", json!({ "RestID": "7" })))
        .await
        .unwrap();
    let token = json_body(login).await["data"]["token"].as_str().unwrap().to_string();

    let res = h
        .app
        .router
        .clone()
        .oneshot(post_json("/api/queue/execute-jwt", json!({ "token": token })))
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);

    let frame: Value = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(frame["type"], "queueUpdate");
    assert_eq!(frame["data"]["totalRecords"], 4);
    assert_eq!(frame["data"]["queueData"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn legacy_join_moves_between_tenants() {
    let h = harness();
    let addr = serve(&h.app).await;
    let mut client = connect(addr).await;

    client
        .send(Message::text(r#"{"type":"join-restaurant","restaurantId":"7"}"#))
        .await
        .unwrap();
    wait_for_subscribers(&h.app, "7", 1).await;

    client
        .send(Message::text(r#"{"type":"join-tenant","tenantId":"8"}"#))
        .await
        .unwrap();
    wait_for_subscribers(&h.app, "8", 1).await;
    wait_for_subscribers(&h.app, "7", 0).await;
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_socket() {
    let h = harness();
    let addr = serve(&h.app).await;
    let mut client = connect(addr).await;

    client.send(Message::text("{oops")).await.unwrap();
    client.send(Message::text(r#"{"type":"join-tenant"}"#)).await.unwrap();
    client.send(Message::text("ping")).await.unwrap();
    assert_eq!(next_text(&mut client).await, "pong");
    assert_eq!(h.app.state.subscribers.tenant_count(), 0);
}

#[tokio::test]
async fn closing_the_socket_leaves_the_tenant() {
    let h = harness();
    let addr = serve(&h.app).await;
    let mut client = connect(addr).await;

    client
        .send(Message::text(r#"{"type":"join-tenant","tenantId":"7"}"#))
        .await
        .unwrap();
    wait_for_subscribers(&h.app, "7", 1).await;

    client.close(None).await.unwrap();
    wait_for_subscribers(&h.app, "7", 0).await;
    assert!(!h.app.state.subscribers.has_tenant(&TenantId::new("7")));
}

#[tokio::test]
async fn silent_client_is_dropped_after_missed_heartbeats() {
    let h = harness_with(RealtimeSettings {
        heartbeat_interval: Duration::from_millis(50),
        max_missed_heartbeats: 2,
        ..RealtimeSettings::default()
    });
    let addr = serve(&h.app).await;
    let mut client = connect(addr).await;

    client
        .send(Message::text(r#"{"type":"join-tenant","tenantId":"7"}"#))
        .await
        .unwrap();
    wait_for_subscribers(&h.app, "7", 1).await;

    // Never read, so transport pings go unanswered.
    wait_for_subscribers(&h.app, "7", 0).await;
    drop(client);
}
