//! HTTP front-end for the mapping pipeline.
//!
//! `api_router()` returns a composable `Router`; `server` owns the
//! bind → spawn → shutdown-handle lifecycle used by the binary.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_server_on, ApiServer, ServerSession};
pub use types::ApiContext;
