//! # Exchange Ledger
//!
//! Credit ledger for an engagement task exchange: users publish tasks
//! (like/follow/comment/share a target video or account) by escrowing
//! credits, and other users earn credits by completing them.
//!
//! ## Architecture
//!
//! ```text
//!   client request
//!        │
//!        ▼
//!   ┌─────────────────┐     ┌─────────────────────┐
//!   │  ExchangeLedger │────▶│ VerificationEngine  │
//!   │  (orchestrator) │     │ (pluggable policy)  │
//!   └───────┬─────────┘     └─────────────────────┘
//!           │
//!           ▼
//!   ┌────────────────────────────────────────────┐
//!   │ Account / Task / Completion stores (SQLite)│
//!   └────────────────────────────────────────────┘
//! ```
//!
//! The ledger is the only component that mutates more than one store per
//! operation; the stores expose atomic primitives (conditional balance
//! update, conditional counter decrement, unique completion index) that
//! close every race the ledger would otherwise have.
//!
//! ## Modules
//! - `ledger`: the core orchestrator
//! - `store`: store contracts and the SQLite implementation
//! - `verify`: completion verification policies
//! - `audit`: append-only log of credit movements
//! - `api`: axum HTTP surface

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod store;
pub mod verify;

pub use config::{Config, LedgerPolicy};
pub use error::LedgerError;
pub use ledger::ExchangeLedger;
