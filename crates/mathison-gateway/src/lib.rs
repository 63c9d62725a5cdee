//! # mathison-gateway
//!
//! Wires the governance crates into one bootable substrate.
//!
//! - [`GovernanceConfig`]: where state lives and how strict enforcement is,
//!   loaded from `.mathison/mathison.toml`.
//! - [`Substrate::boot`]: validates config, loads keys and the capsule,
//!   opens the ledger, and records a BOOT receipt. Configuration errors are
//!   fatal; a missing or invalid capsule only degrades enforcement.
//! - [`ActionGate`]: the single entry point for governed actions. Every
//!   decision is recorded before the caller sees it.
//! - [`ExecutorGuard`]: re-validates and spends a capability token right
//!   before the side effect, and checks it is for the executor's kind of
//!   operation.

pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod substrate;

pub use config::{GovernanceConfig, LogFormat};
pub use error::GatewayError;
pub use executor::ExecutorGuard;
pub use gate::ActionGate;
pub use substrate::{load_chain_key, load_token_key, open_ledger, Substrate};
