//! qcast-core: transport-agnostic core for qcast.
//!
//! Resolves a tenant through the shared directory, hands out keyed pooled
//! connections to that tenant's database, executes named remote operations
//! against them and fans results out to the tenant's live subscribers.

pub mod config;
pub mod directory;
pub mod errors;
pub mod gateway;
pub mod memory;
pub mod pool;
pub mod remote;
pub mod subscribers;
pub mod tenant;

pub use config::{QcastConfig, QcastConfigSnapshot};
pub use directory::{DirectoryError, TenantDirectory, DEFAULT_DIRECTORY_TABLE};
pub use errors::{ErrorKind, QcastError};
pub use gateway::{select_canonical, Gateway, GatewayError, OperationResult};
pub use memory::{MemoryConnector, Reply};
pub use pool::{PoolError, PoolRegistry, PooledConnection};
pub use remote::{
    CallKind, ConnectTarget, OperationParam, ParamType, ParamValue, PoolSettings, RemoteCall,
    RemoteError, Row, RowSet, TenantConnection, TenantConnector,
};
pub use subscribers::{BroadcastReport, SubscriberHandle, SubscriberId, SubscriberRegistry, SubscriberSink};
pub use tenant::{Endpoint, PoolKey, TenantDescriptor, TenantId, DEFAULT_DB_PORT};
