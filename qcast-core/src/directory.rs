//! Tenant Directory.
//!
//! Resolves a tenant id to its connection descriptor through the shared
//! directory database. The directory link is a lazily (re)connected
//! singleton: every use checks it and reopens it when absent or dead.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::QcastError;
use crate::gateway::select_canonical;
use crate::remote::{ConnectTarget, OperationParam, RemoteCall, RemoteError, Row, TenantConnection, TenantConnector};
use crate::tenant::{Endpoint, TenantDescriptor, TenantId};

pub const DEFAULT_DIRECTORY_TABLE: &str = "[dbo].[Tbl_Rest]";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("RestID is required")]
    MissingTenant,

    #[error("Restaurant with ID {0} not found")]
    NotFound(TenantId),

    #[error("directory database unavailable: {0}")]
    Unavailable(String),

    #[error("directory lookup failed: {0}")]
    LookupFailed(String),
}

impl From<DirectoryError> for QcastError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::MissingTenant => QcastError::bad_request(err.to_string()),
            DirectoryError::NotFound(_) => QcastError::not_found(err.to_string()),
            DirectoryError::Unavailable(_) => QcastError::unavailable(err.to_string()),
            DirectoryError::LookupFailed(_) => QcastError::bad_gateway(err.to_string()),
        }
    }
}

pub struct TenantDirectory {
    connector: Arc<dyn TenantConnector>,
    target: ConnectTarget,
    lookup_sql: String,
    link: Mutex<Option<Arc<dyn TenantConnection>>>,
}

impl TenantDirectory {
    pub fn new(connector: Arc<dyn TenantConnector>, target: ConnectTarget, table: &str) -> Self {
        let lookup_sql = format!(
            "SELECT [RestID], [RestName], [RestServerName], [RestDBName], [RestUserName], [RestPassword] \
             FROM {table} WHERE [RestID] = @P1"
        );
        Self {
            connector,
            target,
            lookup_sql,
            link: Mutex::new(None),
        }
    }

    /// Liveness probe: (re)establish the directory link without querying.
    pub async fn ping(&self) -> Result<(), DirectoryError> {
        self.connection().await.map(|_| ())
    }

    pub async fn resolve(&self, tenant: &TenantId) -> Result<TenantDescriptor, DirectoryError> {
        if tenant.is_empty() {
            return Err(DirectoryError::MissingTenant);
        }

        let conn = self.connection().await?;
        let call = RemoteCall::query(
            self.lookup_sql.clone(),
            vec![OperationParam::varchar("RestId", 50, tenant.as_str())],
        );

        let request_timeout = self.target.settings.request_timeout;
        let sets = match timeout(request_timeout, conn.execute(&call)).await {
            Ok(Ok(sets)) => sets,
            Ok(Err(RemoteError::Link(cause))) => {
                self.drop_link(&conn).await;
                return Err(DirectoryError::Unavailable(cause));
            }
            Ok(Err(RemoteError::Rejected(cause))) => return Err(DirectoryError::LookupFailed(cause)),
            Err(_) => {
                return Err(DirectoryError::Unavailable(format!(
                    "lookup timed out after {request_timeout:?}"
                )))
            }
        };

        let row = select_canonical(sets)
            .into_iter()
            .next()
            .ok_or_else(|| DirectoryError::NotFound(tenant.clone()))?;

        let descriptor = descriptor_from_row(tenant, &row)?;
        info!(
            tenant = %descriptor.tenant_id,
            name = %descriptor.display_name,
            endpoint = %descriptor.endpoint(),
            database = %descriptor.database,
            user = %descriptor.login_user,
            secret = "[PROTECTED]",
            "resolved tenant"
        );
        Ok(descriptor)
    }

    pub async fn close(&self) {
        if let Some(conn) = self.link.lock().await.take() {
            conn.close().await;
        }
    }

    async fn connection(&self) -> Result<Arc<dyn TenantConnection>, DirectoryError> {
        let mut link = self.link.lock().await;
        if let Some(conn) = link.as_ref() {
            if conn.is_live() {
                return Ok(Arc::clone(conn));
            }
        }

        if let Some(stale) = link.take() {
            stale.close().await;
        }

        info!(pool_key = %self.target.pool_key(), "reconnecting to directory database");
        let connect_timeout = self.target.settings.connect_timeout;
        match timeout(connect_timeout, self.connector.connect(&self.target)).await {
            Ok(Ok(conn)) => {
                *link = Some(Arc::clone(&conn));
                Ok(conn)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "directory connection failed");
                Err(DirectoryError::Unavailable(e.to_string()))
            }
            Err(_) => Err(DirectoryError::Unavailable(format!(
                "connect timed out after {connect_timeout:?}"
            ))),
        }
    }

    async fn drop_link(&self, failed: &Arc<dyn TenantConnection>) {
        let mut link = self.link.lock().await;
        let same = link.as_ref().is_some_and(|current| Arc::ptr_eq(current, failed));
        if same {
            debug!("dropping broken directory link");
            if let Some(conn) = link.take() {
                conn.close().await;
            }
        }
    }
}

fn column_text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn descriptor_from_row(requested: &TenantId, row: &Row) -> Result<TenantDescriptor, DirectoryError> {
    let incomplete = |column: &str| {
        DirectoryError::LookupFailed(format!("directory row for {requested} has no {column}"))
    };

    let server = column_text(row, "RestServerName").ok_or_else(|| incomplete("RestServerName"))?;
    let database = column_text(row, "RestDBName").ok_or_else(|| incomplete("RestDBName"))?;
    let endpoint = Endpoint::parse(&server);

    Ok(TenantDescriptor {
        tenant_id: column_text(row, "RestID")
            .map(TenantId::new)
            .unwrap_or_else(|| requested.clone()),
        display_name: column_text(row, "RestName").unwrap_or_default(),
        host: endpoint.host,
        port: endpoint.port,
        database,
        login_user: column_text(row, "RestUserName").unwrap_or_default(),
        login_secret: match row.get("RestPassword") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        },
    })
}
