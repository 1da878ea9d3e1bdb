//! HTTP API for the exchange ledger.

pub mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
