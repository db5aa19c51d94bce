use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed::{Manager, Object, Pool, PoolError, Timeouts, TimeoutType};
use deadpool::Runtime;
use qcast_core::{ConnectTarget, PoolKey, PoolSettings, RemoteCall, RemoteError, RowSet, TenantConnection, TenantConnector};
use tiberius::{AuthMethod, Config, EncryptionLevel, Query};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::manager::ClientManager;
use crate::statement::{bind_params, statement_text};
use crate::values::row_to_json;

/// Transport options shared by every pool the connector opens.
#[derive(Debug, Clone)]
pub struct MssqlOptions {
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub application_name: String,
}

impl Default for MssqlOptions {
    fn default() -> Self {
        Self {
            encrypt: true,
            trust_server_certificate: true,
            application_name: "qcast".to_string(),
        }
    }
}

/// [`TenantConnector`] backed by a deadpool of tiberius clients per target.
#[derive(Debug, Clone, Default)]
pub struct MssqlConnector {
    options: MssqlOptions,
}

impl MssqlConnector {
    pub fn new(options: MssqlOptions) -> Self {
        Self { options }
    }

    fn config(&self, target: &ConnectTarget) -> Config {
        let mut config = Config::new();
        config.host(&target.host);
        config.port(target.port);
        config.database(&target.database);
        config.application_name(&self.options.application_name);
        config.authentication(AuthMethod::sql_server(&target.user, &target.secret));
        config.encryption(if self.options.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::NotSupported
        });
        if self.options.trust_server_certificate {
            config.trust_cert();
        }
        config
    }
}

#[async_trait]
impl TenantConnector for MssqlConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn TenantConnection>, RemoteError> {
        let key = target.pool_key();
        let settings = &target.settings;

        let pool = Pool::builder(ClientManager::new(self.config(target)))
            .max_size(settings.max_size.max(1))
            .timeouts(Timeouts {
                wait: Some(settings.connect_timeout),
                create: Some(settings.connect_timeout),
                recycle: Some(settings.request_timeout),
            })
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RemoteError::Link(format!("failed to build pool: {e}")))?;

        // Validate address and login before handing the pool out.
        if let Err(e) = pool.get().await {
            pool.close();
            return Err(RemoteError::Link(e.to_string()));
        }

        let reaper = spawn_idle_reaper(pool.clone(), key.clone(), settings);
        info!(pool_key = %key, max_size = settings.max_size, "sql server pool connected");

        Ok(Arc::new(MssqlPool {
            key,
            pool,
            live: AtomicBool::new(true),
            reaper,
        }))
    }
}

/// One tenant database's pool of physical connections.
pub struct MssqlPool {
    key: PoolKey,
    pool: Pool<ClientManager>,
    live: AtomicBool,
    reaper: JoinHandle<()>,
}

impl MssqlPool {
    fn pool_error(&self, err: PoolError<tiberius::error::Error>) -> RemoteError {
        match err {
            PoolError::Timeout(TimeoutType::Wait) => {
                RemoteError::Rejected("timed out waiting for a pooled connection".to_string())
            }
            other => {
                self.live.store(false, Ordering::Release);
                RemoteError::Link(other.to_string())
            }
        }
    }
}

#[async_trait]
impl TenantConnection for MssqlPool {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.pool.is_closed()
    }

    async fn execute(&self, call: &RemoteCall) -> Result<Vec<RowSet>, RemoteError> {
        let sql = statement_text(call)?;
        let mut client = self.pool.get().await.map_err(|e| self.pool_error(e))?;

        let mut query = Query::new(sql);
        bind_params(&mut query, &call.params);

        let result = async { query.query(&mut *client).await?.into_results().await }.await;
        match result {
            Ok(sets) => Ok(sets
                .into_iter()
                .map(|rows| rows.into_iter().map(row_to_json).collect())
                .collect()),
            Err(e) if is_link_error(&e) => {
                warn!(pool_key = %self.key, error = %e, "sql server link failure");
                drop(Object::take(client));
                self.live.store(false, Ordering::Release);
                Err(RemoteError::Link(e.to_string()))
            }
            Err(e) => Err(RemoteError::Rejected(e.to_string())),
        }
    }

    async fn close(&self) {
        self.live.store(false, Ordering::Release);
        self.reaper.abort();
        self.pool.close();
        debug!(pool_key = %self.key, "sql server pool closed");
    }
}

impl Drop for MssqlPool {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

fn is_link_error(err: &tiberius::error::Error) -> bool {
    use tiberius::error::Error;
    matches!(
        err,
        Error::Io { .. } | Error::Protocol(_) | Error::Tls(_) | Error::Routing { .. }
    )
}

fn spawn_idle_reaper(pool: Pool<ClientManager>, key: PoolKey, settings: &PoolSettings) -> JoinHandle<()> {
    let idle = settings.idle_timeout;
    let min_idle = settings.min_idle;
    let period = (idle / 2).max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            let reclaimed = reap_idle(&pool, idle, min_idle);
            if reclaimed > 0 {
                debug!(pool_key = %key, reclaimed, "reclaimed idle connections");
            }
        }
    })
}

/// Drop pooled objects unused for at least `idle`, keeping `min_idle`.
pub(crate) fn reap_idle<M: Manager>(pool: &Pool<M>, idle: Duration, min_idle: usize) -> usize {
    let size = pool.status().size;
    if size <= min_idle {
        return 0;
    }

    let budget = Cell::new(size - min_idle);
    pool.retain(|_, metrics| {
        if budget.get() > 0 && metrics.last_used() >= idle {
            budget.set(budget.get() - 1);
            false
        } else {
            true
        }
    })
    .removed
    .len()
}
