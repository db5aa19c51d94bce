//! Real-time channel.
//!
//! One task per socket reads frames and drives the heartbeat; a second task
//! owns the write half and drains an unbounded queue, so broadcasts never
//! wait on a slow peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use qcast_core::{SubscriberHandle, SubscriberSink, TenantId};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::params::tenant_from_value;
use crate::QcastAxumState;

pub async fn upgrade(State(state): State<QcastAxumState>, ws: WebSocketUpgrade) -> Response {
    let limit = state.realtime.max_frame_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| serve_socket(state, socket))
}

struct WsSink {
    tx: UnboundedSender<Message>,
    open: Arc<AtomicBool>,
}

impl SubscriberSink for WsSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn deliver(&self, payload: Arc<str>) -> anyhow::Result<()> {
        self.tx
            .send(Message::Text(payload.to_string().into()))
            .map_err(|_| anyhow::anyhow!("socket writer has stopped"))
    }
}

/// A parsed client frame.
#[derive(Debug, PartialEq)]
enum Inbound {
    Ping,
    Join(TenantId),
    Ignored,
}

fn parse_text(text: &str) -> Inbound {
    if text.trim() == "ping" {
        return Inbound::Ping;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed real-time frame");
            return Inbound::Ignored;
        }
    };

    let id_field = match value.get("type").and_then(Value::as_str) {
        Some("join-tenant") => "tenantId",
        Some("join-restaurant") => "restaurantId",
        other => {
            debug!(kind = ?other, "ignoring real-time frame");
            return Inbound::Ignored;
        }
    };

    match value.get(id_field).and_then(tenant_from_value) {
        Some(tenant) => Inbound::Join(tenant),
        None => {
            warn!(field = id_field, "join frame without a tenant id");
            Inbound::Ignored
        }
    }
}

async fn serve_socket(state: QcastAxumState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let open = Arc::new(AtomicBool::new(true));

    let handle = SubscriberHandle::new(WsSink {
        tx: tx.clone(),
        open: Arc::clone(&open),
    });
    debug!(subscriber = %handle.id(), "real-time connection opened");

    let writer = {
        let open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sender.send(msg).await.is_err() || closing {
                    break;
                }
            }
            open.store(false, Ordering::Release);
        })
    };

    let settings = state.realtime.clone();
    let mut ticker = interval(settings.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut active = true;
    let mut missed = 0u32;

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(subscriber = %handle.id(), error = %e, "real-time read failed");
                        break;
                    }
                    None => break,
                };
                active = true;

                match msg {
                    Message::Text(text) => match parse_text(text.as_str()) {
                        Inbound::Ping => {
                            let _ = tx.send(Message::Text("pong".into()));
                        }
                        Inbound::Join(tenant) => {
                            info!(subscriber = %handle.id(), tenant = %tenant, "subscriber joined tenant");
                            state.subscribers.join(tenant, &handle);
                        }
                        Inbound::Ignored => {}
                    },
                    Message::Close(_) => break,
                    Message::Binary(_) => debug!(subscriber = %handle.id(), "ignoring binary frame"),
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            _ = ticker.tick() => {
                if active {
                    missed = 0;
                } else {
                    missed += 1;
                }
                if missed >= settings.max_missed_heartbeats {
                    warn!(subscriber = %handle.id(), missed, "real-time connection missed heartbeats, closing");
                    break;
                }
                active = false;
                if tx.send(Message::Ping(Default::default())).is_err() {
                    break;
                }
            }
        }
    }

    open.store(false, Ordering::Release);
    if let Some(tenant) = state.subscribers.leave(&handle) {
        debug!(subscriber = %handle.id(), tenant = %tenant, "subscriber left tenant");
    }
    let _ = tx.send(Message::Close(None));
    drop(handle);
    drop(tx);
    if let Err(e) = writer.await {
        warn!(error = %e, "real-time writer task failed");
    }
}
