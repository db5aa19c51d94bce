//! Connection Pool Registry.
//!
//! One pool entry per `host:port:database`. Acquire-or-create is a critical
//! section per key: the outer map lock only hands out the per-key slot, the
//! slot's async mutex covers check, open and register.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::QcastError;
use crate::remote::{ConnectTarget, PoolSettings, TenantConnection, TenantConnector};
use crate::tenant::{PoolKey, TenantDescriptor};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("failed to connect to {host}:{port}/{database}: {cause}")]
    ConnectionFailed {
        host: String,
        port: u16,
        database: String,
        cause: String,
    },
}

impl From<PoolError> for QcastError {
    fn from(err: PoolError) -> Self {
        let PoolError::ConnectionFailed { host, port, database, .. } = &err;
        QcastError::unavailable(err.to_string()).with_data(serde_json::json!({
            "poolKey": PoolKey::new(host.clone(), *port, database.clone()).to_string(),
        }))
    }
}

/// A shared handle on one tenant pool.
#[derive(Clone)]
pub struct PooledConnection {
    key: PoolKey,
    handle: Arc<dyn TenantConnection>,
    dead: Arc<AtomicBool>,
}

impl PooledConnection {
    pub fn new(key: PoolKey, handle: Arc<dyn TenantConnection>) -> Self {
        Self {
            key,
            handle,
            dead: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn handle(&self) -> &Arc<dyn TenantConnection> {
        &self.handle
    }

    pub fn is_live(&self) -> bool {
        !self.dead.load(Ordering::Acquire) && self.handle.is_live()
    }

    /// Once marked, the registry replaces this entry on the next acquire.
    pub fn mark_dead(&self) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            warn!(pool_key = %self.key, "tenant pool marked dead");
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key.to_string())
            .field("live", &self.is_live())
            .finish()
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<PooledConnection>>>;

pub struct PoolRegistry {
    connector: Arc<dyn TenantConnector>,
    settings: PoolSettings,
    slots: Mutex<HashMap<PoolKey, Slot>>,
}

impl PoolRegistry {
    pub fn new(connector: Arc<dyn TenantConnector>, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Return the live pool for this tenant's database, opening it if needed.
    pub async fn acquire(&self, descriptor: &TenantDescriptor) -> Result<PooledConnection, PoolError> {
        let target = ConnectTarget::from_descriptor(descriptor, self.settings.clone());
        self.acquire_target(&target).await
    }

    pub async fn acquire_target(&self, target: &ConnectTarget) -> Result<PooledConnection, PoolError> {
        let key = target.pool_key();
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut guard = slot.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.is_live() {
                return Ok(existing.clone());
            }
        }

        if let Some(stale) = guard.take() {
            debug!(pool_key = %key, "replacing dead tenant pool");
            stale.handle().close().await;
        }

        info!(pool_key = %key, "opening tenant pool");
        let connect_timeout = target.settings.connect_timeout;
        let failed = |cause: String| PoolError::ConnectionFailed {
            host: target.host.clone(),
            port: target.port,
            database: target.database.clone(),
            cause,
        };

        let handle = match timeout(connect_timeout, self.connector.connect(target)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                self.forget_empty_slot(&key, &slot);
                return Err(failed(e.to_string()));
            }
            Err(_) => {
                self.forget_empty_slot(&key, &slot);
                return Err(failed(format!("timed out after {connect_timeout:?}")));
            }
        };

        let conn = PooledConnection::new(key, handle);
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop a slot whose first connect failed. Must be called with the slot
    /// locked and empty. A slot another acquirer is already waiting on stays.
    fn forget_empty_slot(&self, key: &PoolKey, slot: &Slot) {
        let mut slots = self.slots.lock();
        let unshared = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if unshared {
            slots.remove(key);
        }
    }

    /// Flag the entry for `key` so the next acquire replaces it. Returns false
    /// when no entry is registered.
    pub async fn mark_dead(&self, key: &PoolKey) -> bool {
        let slot = match self.slots.lock().get(key) {
            Some(slot) => Arc::clone(slot),
            None => return false,
        };
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(conn) => {
                conn.mark_dead();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Number of registered pool keys (live or awaiting replacement).
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every pool. Used on shutdown.
    pub async fn close_all(&self) {
        let slots: Vec<(PoolKey, Slot)> = self.slots.lock().drain().collect();
        for (key, slot) in slots {
            if let Some(conn) = slot.lock().await.take() {
                debug!(pool_key = %key, "closing tenant pool");
                conn.handle().close().await;
            }
        }
        info!("all tenant pools closed");
    }
}
