use std::time::Duration;

use deadpool::managed::{Manager, Metrics, RecycleResult};
use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub type MssqlClient = Client<Compat<TcpStream>>;

/// Connections used more recently than this are handed out without a probe.
pub const RECYCLE_CHECK_AFTER: Duration = Duration::from_secs(30);

/// Opens and health-checks physical SQL Server connections for one pool.
pub struct ClientManager {
    config: Config,
    check_after: Duration,
}

impl ClientManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            check_after: RECYCLE_CHECK_AFTER,
        }
    }
}

/// Whether a connection idle for `idle` needs a `SELECT 1` before reuse.
fn needs_probe(idle: Duration, check_after: Duration) -> bool {
    idle >= check_after
}

impl Manager for ClientManager {
    type Type = MssqlClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> Result<MssqlClient, tiberius::error::Error> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;
        Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn recycle(&self, client: &mut MssqlClient, metrics: &Metrics) -> RecycleResult<tiberius::error::Error> {
        if !needs_probe(metrics.last_used(), self.check_after) {
            return Ok(());
        }
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }
}
