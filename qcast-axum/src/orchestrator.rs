//! Request Orchestrator.
//!
//! Protected requests move through
//! `Received -> TokenVerified -> ConnectionAcquired -> OperationExecuted -> Broadcast -> Responded`;
//! logins through `Received -> DirectoryResolved -> TokenIssued -> Responded`.
//! A failure at any stage ends the request as [`StageFailure`].
//!
//! Acquire, execute and broadcast run on a detached task: once dispatched, a
//! remote operation completes (or times out) and is broadcast even if the
//! caller has gone away.

use std::fmt;

use qcast_auth::IssuedToken;
use qcast_core::{OperationParam, OperationResult, QcastError, TenantDescriptor, TenantId};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::QcastAxumError;
use crate::state::QcastAxumState;

pub const QUEUE_LISTING_PROCEDURE: &str = "[dbo].[Sp_TB_QueOrderStatus]";
pub const TRANSACTION_LOOKUP_PROCEDURE: &str = "[dbo].[Sp_TB_QueOrderStatus_TrnID]";
pub const KITCHEN_DISPLAY_PROCEDURE: &str = "[dbo].[Sp_TB_OrderKDS]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    DirectoryResolved,
    TokenIssued,
    TokenVerified,
    ConnectionAcquired,
    OperationExecuted,
    Broadcast,
    Responded,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "RECEIVED",
            Stage::DirectoryResolved => "DIRECTORY_RESOLVED",
            Stage::TokenIssued => "TOKEN_ISSUED",
            Stage::TokenVerified => "TOKEN_VERIFIED",
            Stage::ConnectionAcquired => "CONNECTION_ACQUIRED",
            Stage::OperationExecuted => "OPERATION_EXECUTED",
            Stage::Broadcast => "BROADCAST",
            Stage::Responded => "RESPONDED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal `FAILED{stage, cause}`; `stage` is the one that could not be
/// reached.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: QcastError,
}

impl StageFailure {
    pub fn new(stage: Stage, error: impl Into<QcastError>) -> Self {
        let error = error.into();
        if error.kind.status_code() >= 500 {
            warn!(stage = %stage, code = error.code(), error = %error.message, "request failed");
        } else {
            debug!(stage = %stage, code = error.code(), error = %error.message, "request rejected");
        }
        Self { stage, error }
    }
}

impl From<StageFailure> for QcastAxumError {
    fn from(failure: StageFailure) -> Self {
        failure.error.into()
    }
}

/// The tenant-scoped remote operations the queue surface exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOperation {
    /// Status-filtered queue listing for zone 0.
    QueueListing { status: String },
    TransactionLookup { trn_id: String },
    /// Kitchen display listing; the selector is followed by two fixed zeros.
    KitchenDisplay { kds_type: i32 },
}

impl QueueOperation {
    pub fn procedure(&self) -> &'static str {
        match self {
            QueueOperation::QueueListing { .. } => QUEUE_LISTING_PROCEDURE,
            QueueOperation::TransactionLookup { .. } => TRANSACTION_LOOKUP_PROCEDURE,
            QueueOperation::KitchenDisplay { .. } => KITCHEN_DISPLAY_PROCEDURE,
        }
    }

    pub fn params(&self) -> Vec<OperationParam> {
        match self {
            QueueOperation::QueueListing { status } => vec![
                OperationParam::varchar("QueStatus", 50, status.clone()),
                OperationParam::int("ZoneID", 0),
            ],
            QueueOperation::TransactionLookup { trn_id } => {
                vec![OperationParam::varchar("TrnID", 50, trn_id.clone())]
            }
            QueueOperation::KitchenDisplay { kds_type } => vec![
                OperationParam::positional_int(*kds_type),
                OperationParam::positional_int(0),
                OperationParam::positional_int(0),
            ],
        }
    }

    /// Parameters as echoed back to clients.
    pub fn parameters_json(&self) -> Value {
        match self {
            QueueOperation::QueueListing { status } => json!({ "QueStatus": status, "ZoneID": 0 }),
            QueueOperation::TransactionLookup { trn_id } => json!({ "TrnID": trn_id }),
            QueueOperation::KitchenDisplay { kds_type } => {
                json!({ "kdsType": kds_type, "param2": 0, "param3": 0 })
            }
        }
    }

    pub fn rows_field(&self) -> &'static str {
        match self {
            QueueOperation::KitchenDisplay { .. } => "kdsData",
            _ => "queueData",
        }
    }

    /// Real-time event name, when the result is pushed to subscribers.
    pub fn event(&self) -> Option<&'static str> {
        match self {
            QueueOperation::QueueListing { .. } => Some("queueUpdate"),
            QueueOperation::TransactionLookup { .. } => None,
            QueueOperation::KitchenDisplay { .. } => Some("kdsUpdate"),
        }
    }
}

/// Numeric ids go back to clients as JSON numbers, as the directory stores them.
pub fn tenant_json(tenant: &TenantId) -> Value {
    tenant
        .as_str()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(tenant.as_str()))
}

pub fn restaurant_info(descriptor: &TenantDescriptor) -> Value {
    json!({
        "RestID": tenant_json(&descriptor.tenant_id),
        "RestName": descriptor.display_name,
    })
}

fn response_data(descriptor: &TenantDescriptor, op: &QueueOperation, result: OperationResult) -> Value {
    let mut data = json!({
        "restaurantInfo": restaurant_info(descriptor),
        "connectionInfo": {
            "server": descriptor.host,
            "port": descriptor.port,
            "database": descriptor.database,
            "user": descriptor.login_user,
        },
    });
    data[op.rows_field()] = Value::Array(result.rows.into_iter().map(Value::Object).collect());
    data["totalRecords"] = json!(result.total_records);
    data["storedProcedure"] = json!(result.operation_name);
    data["parameters"] = op.parameters_json();
    data
}

pub struct LoginOutcome {
    pub descriptor: TenantDescriptor,
    pub token: IssuedToken,
}

pub async fn login(state: &QcastAxumState, tenant: &TenantId) -> Result<LoginOutcome, StageFailure> {
    debug!(stage = %Stage::Received, tenant = %tenant, "login");

    let descriptor = state
        .directory
        .resolve(tenant)
        .await
        .map_err(|e| StageFailure::new(Stage::DirectoryResolved, e))?;

    let token = state
        .tokens
        .issue(&descriptor)
        .map_err(|e| StageFailure::new(Stage::TokenIssued, e))?;

    info!(tenant = %descriptor.tenant_id, name = %descriptor.display_name, "credential token issued");
    debug!(stage = %Stage::Responded, tenant = %tenant, "login");
    Ok(LoginOutcome { descriptor, token })
}

/// Verify the token, then run `op` against the tenant's database and return
/// the response `data` object.
pub async fn execute(state: &QcastAxumState, token: &str, op: QueueOperation) -> Result<Value, StageFailure> {
    debug!(stage = %Stage::Received, operation = op.procedure(), "execute");

    let verified = state
        .tokens
        .verify(token)
        .map_err(|e| StageFailure::new(Stage::TokenVerified, e))?;
    let tenant = verified.descriptor.tenant_id.clone();
    debug!(stage = %Stage::TokenVerified, tenant = %tenant, "execute");

    let task = tokio::spawn(run_operation(state.clone(), verified.descriptor, op));
    let data = match task.await {
        Ok(outcome) => outcome?,
        Err(e) => {
            return Err(StageFailure::new(
                Stage::OperationExecuted,
                QcastError::general_error(format!("operation task failed: {e}")),
            ))
        }
    };

    debug!(stage = %Stage::Responded, tenant = %tenant, "execute");
    Ok(data)
}

async fn run_operation(
    state: QcastAxumState,
    descriptor: TenantDescriptor,
    op: QueueOperation,
) -> Result<Value, StageFailure> {
    let conn = state
        .pools
        .acquire(&descriptor)
        .await
        .map_err(|e| StageFailure::new(Stage::ConnectionAcquired, e))?;
    debug!(stage = %Stage::ConnectionAcquired, pool_key = %conn.key(), "execute");

    let result = state
        .gateway
        .execute(&conn, op.procedure(), op.params())
        .await
        .map_err(|e| StageFailure::new(Stage::OperationExecuted, e))?;
    info!(
        tenant = %descriptor.tenant_id,
        operation = op.procedure(),
        records = result.total_records,
        "remote operation executed"
    );

    let data = response_data(&descriptor, &op, result);

    if let Some(event) = op.event() {
        let payload = json!({ "type": event, "data": data }).to_string();
        let report = state.subscribers.broadcast(&descriptor.tenant_id, payload);
        debug!(
            stage = %Stage::Broadcast,
            tenant = %descriptor.tenant_id,
            event,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "execute"
        );
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_listing_binds_status_and_zone() {
        let op = QueueOperation::QueueListing { status: "ALL".into() };
        let params = op.params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name.as_deref(), Some("QueStatus"));
        assert_eq!(params[1].name.as_deref(), Some("ZoneID"));
        assert_eq!(op.event(), Some("queueUpdate"));
        assert_eq!(op.parameters_json(), json!({"QueStatus": "ALL", "ZoneID": 0}));
    }

    #[test]
    fn kitchen_display_is_positional_with_trailing_zeros() {
        let op = QueueOperation::KitchenDisplay { kds_type: 4 };
        let params = op.params();
        assert!(params.iter().all(|p| p.name.is_none()));
        assert_eq!(params, vec![
            OperationParam::positional_int(4),
            OperationParam::positional_int(0),
            OperationParam::positional_int(0),
        ]);
        assert_eq!(op.rows_field(), "kdsData");
    }

    #[test]
    fn transaction_lookup_is_not_broadcast() {
        assert_eq!(QueueOperation::TransactionLookup { trn_id: "T1".into() }.event(), None);
    }

    #[test]
    fn numeric_tenant_ids_render_as_numbers() {
        assert_eq!(tenant_json(&TenantId::new("7")), json!(7));
        assert_eq!(tenant_json(&TenantId::new("R-7")), json!("R-7"));
    }
}
