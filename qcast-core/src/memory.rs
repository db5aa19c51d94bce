//! In-memory connector for testing and development.
//!
//! Answers procedure calls from scripted replies and directory queries from
//! an in-memory row table. Counts physical connection creations so pool
//! behaviour can be asserted without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::remote::{
    CallKind, ConnectTarget, ParamValue, RemoteCall, RemoteError, Row, RowSet, TenantConnection,
    TenantConnector,
};
use crate::tenant::PoolKey;

/// Scripted reply for a named operation.
#[derive(Debug, Clone)]
pub enum Reply {
    Sets(Vec<RowSet>),
    Reject(String),
    /// Fails with a link error and leaves the connection dead.
    LinkDown(String),
    /// Never completes; only a caller timeout ends the call.
    Hang,
}

#[derive(Default)]
struct MemoryState {
    connects: AtomicUsize,
    connect_delay: RwLock<Duration>,
    refuse: RwLock<Option<String>>,
    replies: RwLock<HashMap<String, Reply>>,
    directory: RwLock<Vec<Row>>,
    connections: RwLock<Vec<Arc<MemoryConnection>>>,
    calls: RwLock<Vec<(PoolKey, RemoteCall)>>,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<MemoryState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Delay every connect; lets concurrent acquires overlap.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.write() = delay;
    }

    /// Fail subsequent connects with `cause`, or accept them again on `None`.
    pub fn refuse_connections(&self, cause: Option<&str>) {
        *self.state.refuse.write() = cause.map(str::to_string);
    }

    pub fn reply(&self, operation: &str, reply: Reply) {
        self.state.replies.write().insert(operation.to_string(), reply);
    }

    pub fn insert_directory_row(&self, row: Row) {
        self.state.directory.write().push(row);
    }

    /// Drop every open link as if the network went away.
    pub fn sever_all(&self) {
        for conn in self.state.connections.read().iter() {
            conn.live.store(false, Ordering::SeqCst);
        }
    }

    pub fn closed_count(&self) -> usize {
        self.state
            .connections
            .read()
            .iter()
            .filter(|c| c.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn calls(&self) -> Vec<(PoolKey, RemoteCall)> {
        self.state.calls.read().clone()
    }
}

#[async_trait]
impl TenantConnector for MemoryConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn TenantConnection>, RemoteError> {
        let delay = *self.state.connect_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(cause) = self.state.refuse.read().clone() {
            return Err(RemoteError::Link(cause));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let conn = Arc::new(MemoryConnection {
            key: target.pool_key(),
            live: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        });
        self.state.connections.write().push(Arc::clone(&conn));
        Ok(conn)
    }
}

struct MemoryConnection {
    key: PoolKey,
    live: AtomicBool,
    closed: AtomicBool,
    state: Arc<MemoryState>,
}

impl MemoryConnection {
    fn lookup(&self, call: &RemoteCall) -> RowSet {
        let wanted = match call.params.first().map(|p| &p.value) {
            Some(ParamValue::Text(s)) => s.clone(),
            Some(ParamValue::Int(i)) => i.to_string(),
            _ => return Vec::new(),
        };
        self.state
            .directory
            .read()
            .iter()
            .filter(|row| match row.get("RestID") {
                Some(Value::String(s)) => s.trim() == wanted,
                Some(other) => other.to_string() == wanted,
                None => false,
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TenantConnection for MemoryConnection {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn execute(&self, call: &RemoteCall) -> Result<Vec<RowSet>, RemoteError> {
        if !self.is_live() {
            return Err(RemoteError::Link("connection is closed".to_string()));
        }
        self.state.calls.write().push((self.key.clone(), call.clone()));

        if call.kind == CallKind::Query {
            return Ok(vec![self.lookup(call)]);
        }

        let reply = self.state.replies.read().get(&call.text).cloned();
        match reply {
            None => Ok(Vec::new()),
            Some(Reply::Sets(sets)) => Ok(sets),
            Some(Reply::Reject(cause)) => Err(RemoteError::Rejected(cause)),
            Some(Reply::LinkDown(cause)) => {
                self.live.store(false, Ordering::SeqCst);
                Err(RemoteError::Link(cause))
            }
            Some(Reply::Hang) => std::future::pending().await,
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
