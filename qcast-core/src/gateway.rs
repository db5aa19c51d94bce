//! Remote Operation Gateway.
//!
//! Binds typed parameters, runs a named operation on a pooled connection and
//! normalizes the reply into a single row-set. Row contents are opaque here.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::QcastError;
use crate::pool::PooledConnection;
use crate::remote::{OperationParam, RemoteCall, RemoteError, RowSet};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("connection {pool_key} is unavailable: {cause}")]
    ConnectionFailed { pool_key: String, cause: String },

    #[error("operation {operation} failed: {cause}")]
    OperationFailed { operation: String, cause: String },
}

impl From<GatewayError> for QcastError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::ConnectionFailed { pool_key, .. } => QcastError::unavailable(err.to_string())
                .with_data(serde_json::json!({ "poolKey": pool_key })),
            GatewayError::OperationFailed { operation, .. } => QcastError::bad_gateway(err.to_string())
                .with_data(serde_json::json!({ "operation": operation })),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub rows: RowSet,
    pub total_records: usize,
    pub operation_name: String,
    pub parameters: Vec<OperationParam>,
    pub result_set_count: usize,
}

/// Pick the canonical result set: the one with the most rows, the earliest
/// on ties. No result sets yields an empty set.
pub fn select_canonical(sets: Vec<RowSet>) -> RowSet {
    let mut best: Option<RowSet> = None;
    for set in sets {
        match &best {
            Some(current) if current.len() >= set.len() => {}
            _ => best = Some(set),
        }
    }
    best.unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct Gateway {
    request_timeout: Duration,
}

impl Gateway {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn execute(
        &self,
        conn: &PooledConnection,
        operation: &str,
        params: Vec<OperationParam>,
    ) -> Result<OperationResult, GatewayError> {
        if !conn.is_live() {
            return Err(GatewayError::ConnectionFailed {
                pool_key: conn.key().to_string(),
                cause: "connection is closed".to_string(),
            });
        }

        let call = RemoteCall::procedure(operation, params);
        debug!(pool_key = %conn.key(), operation, "dispatching remote operation");

        let sets = match timeout(self.request_timeout, conn.handle().execute(&call)).await {
            Ok(Ok(sets)) => sets,
            Ok(Err(RemoteError::Link(cause))) => {
                conn.mark_dead();
                return Err(GatewayError::ConnectionFailed {
                    pool_key: conn.key().to_string(),
                    cause,
                });
            }
            Ok(Err(RemoteError::Rejected(cause))) => {
                warn!(pool_key = %conn.key(), operation, %cause, "remote operation rejected");
                return Err(GatewayError::OperationFailed {
                    operation: operation.to_string(),
                    cause,
                });
            }
            Err(_) => {
                return Err(GatewayError::OperationFailed {
                    operation: operation.to_string(),
                    cause: format!("timed out after {:?}", self.request_timeout),
                });
            }
        };

        let result_set_count = sets.len();
        let rows = select_canonical(sets);
        debug!(
            pool_key = %conn.key(),
            operation,
            result_set_count,
            rows = rows.len(),
            "remote operation returned"
        );

        Ok(OperationResult {
            total_records: rows.len(),
            rows,
            operation_name: operation.to_string(),
            parameters: call.params,
            result_set_count,
        })
    }
}
