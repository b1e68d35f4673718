//! nftset-api - HTTP control surface for nftables address-set membership
//!
//! Each request adds, removes or flushes IP addresses in a named set of a
//! pre-existing nftables table, creating per-family sets on first use.
//!
//! # Architecture
//!
//! - [`core`] - Address classification, set resolution, membership checks and
//!   the reconciliation engine, over a pluggable kernel backend
//! - [`api`] - axum router mapping HTTP requests onto the engine
//! - [`audit`] - JSON-lines audit trail of mutations
//! - [`config`] - Service configuration
//! - [`elevation`] - Running `nft` through sudo/run0 when unprivileged
//! - [`validators`] - nft identifier validation
//!
//! # Guarantees
//!
//! - Every mutating request commits at most one atomic nftables batch
//! - Adding a present address or deleting an absent one is a no-op
//! - Invalid input never reaches the kernel

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod validators;

pub use crate::core::engine::{Engine, Outcome, Task};
pub use crate::core::error::{Error, Failure, Result};
