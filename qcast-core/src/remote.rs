//! The remote-call model and the connector seam.
//!
//! A database driver plugs in by implementing [`TenantConnector`] (open a
//! pooled link to a target) and [`TenantConnection`] (run a call on it).
//! Everything above this seam is driver-agnostic.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tenant::{PoolKey, TenantDescriptor};

/// One output record: column name -> value, in column order.
pub type Row = Map<String, Value>;

/// One result set as produced by the remote side.
pub type RowSet = Vec<Row>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamType {
    VarChar(u16),
    Int,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Int(i32),
    Null,
}

/// A typed parameter. Unnamed parameters are bound positionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationParam {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub value: ParamValue,
}

impl OperationParam {
    pub fn varchar(name: impl Into<String>, len: u16, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ty: ParamType::VarChar(len),
            value: ParamValue::Text(value.into()),
        }
    }

    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Self {
            name: Some(name.into()),
            ty: ParamType::Int,
            value: ParamValue::Int(value),
        }
    }

    pub fn positional_int(value: i32) -> Self {
        Self {
            name: None,
            ty: ParamType::Int,
            value: ParamValue::Int(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Execute a stored procedure by name.
    Procedure,
    /// Run a parameterised statement; parameters bind to `@P1..@Pn`.
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub kind: CallKind,
    pub text: String,
    pub params: Vec<OperationParam>,
}

impl RemoteCall {
    pub fn procedure(name: impl Into<String>, params: Vec<OperationParam>) -> Self {
        Self {
            kind: CallKind::Procedure,
            text: name.into(),
            params,
        }
    }

    pub fn query(sql: impl Into<String>, params: Vec<OperationParam>) -> Self {
        Self {
            kind: CallKind::Query,
            text: sql.into(),
            params,
        }
    }
}

/// Failures reported by a driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The link itself is broken (I/O, login, TLS). The connection must not
    /// be reused.
    #[error("link failure: {0}")]
    Link(String),

    /// The remote side rejected the call (syntax, constraint, permissions).
    #[error("{0}")]
    Rejected(String),
}

/// Sizing and timeouts for one physical pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: usize,
    pub min_idle: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 0,
            idle_timeout: Duration::from_secs(100),
            connect_timeout: Duration::from_secs(100),
            request_timeout: Duration::from_secs(100),
        }
    }
}

/// Everything a driver needs to open a pool.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub secret: String,
    pub settings: PoolSettings,
}

impl ConnectTarget {
    pub fn from_descriptor(descriptor: &TenantDescriptor, settings: PoolSettings) -> Self {
        Self {
            host: descriptor.host.clone(),
            port: descriptor.port,
            database: descriptor.database.clone(),
            user: descriptor.login_user.clone(),
            secret: descriptor.login_secret.clone(),
            settings,
        }
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.host.clone(), self.port, self.database.clone())
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("secret", &"[PROTECTED]")
            .field("settings", &self.settings)
            .finish()
    }
}

/// A live, pooled link to one database.
#[async_trait]
pub trait TenantConnection: Send + Sync {
    /// False once the link is known to be unusable.
    fn is_live(&self) -> bool;

    /// Run a call and return every result set it produced, in order.
    async fn execute(&self, call: &RemoteCall) -> Result<Vec<RowSet>, RemoteError>;

    /// Release all physical connections. Errors are swallowed.
    async fn close(&self);
}

/// Opens [`TenantConnection`]s.
#[async_trait]
pub trait TenantConnector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn TenantConnection>, RemoteError>;
}
