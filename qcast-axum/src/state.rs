use std::sync::Arc;
use std::time::Duration;

use qcast_auth::TokenCodec;
use qcast_core::{Gateway, PoolRegistry, SubscriberRegistry, TenantDirectory};
use tracing::info;

/// Heartbeat and framing limits for the real-time channel.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub heartbeat_interval: Duration,
    /// Consecutive silent intervals tolerated before the socket is closed.
    pub max_missed_heartbeats: u32,
    pub max_frame_size: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_missed_heartbeats: 2,
            max_frame_size: 256 * 1024,
        }
    }
}

/// Everything a handler needs. Cheap to clone.
#[derive(Clone)]
pub struct QcastAxumState {
    pub directory: Arc<TenantDirectory>,
    pub tokens: Arc<TokenCodec>,
    pub pools: Arc<PoolRegistry>,
    pub gateway: Gateway,
    pub subscribers: Arc<SubscriberRegistry>,
    pub realtime: RealtimeSettings,
}

impl QcastAxumState {
    /// Close the directory link and every tenant pool.
    pub async fn shutdown(&self) {
        self.directory.close().await;
        self.pools.close_all().await;
        info!("qcast state shut down");
    }
}
