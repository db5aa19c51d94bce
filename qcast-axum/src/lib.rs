//! qcast-axum: HTTP and real-time surface for qcast.
//!
//! Exposes the queue endpoints, the token-protected execute operations and
//! the `/ws` subscriber channel on top of a [`QcastAxumState`].

pub mod app;
pub mod orchestrator;
pub mod params;
pub mod routes;
pub mod state;
pub mod ws;
mod error;
pub use error::QcastAxumError;
pub use state::{QcastAxumState, RealtimeSettings};

pub use app::{axum, QcastAxumApp};
pub use orchestrator::{QueueOperation, Stage, StageFailure};
