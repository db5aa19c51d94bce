//! SQL Server driver for qcast.
//!
//! Plugs into the core through [`qcast_core::TenantConnector`]: one deadpool
//! of tiberius clients per `host:port:database`, stored procedures executed
//! with bound parameters, rows converted to JSON maps.

pub mod connector;
pub mod manager;
pub mod statement;
pub mod values;

pub use connector::{MssqlConnector, MssqlOptions, MssqlPool};
pub use manager::{ClientManager, MssqlClient};
pub use statement::{bind_params, statement_text};
pub use values::{column_to_json, row_to_json};
