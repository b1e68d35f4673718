//! Core set reconciliation
//!
//! Everything between an HTTP request's path segments and the kernel:
//!
//! - [`address`]: address classification and per-family set naming
//! - [`resolver`]: table lookup and set resolution, staging creation when absent
//! - [`membership`]: idempotency check against committed set elements
//! - [`engine`]: the reconcile pipeline tying the above together
//! - [`backend`]: the kernel connection seam, with [`nft_json`] and [`memory`]
//!   implementations
//! - [`ruleset`] and [`transaction`]: kernel object model and staged batches
//! - [`error`]: error types and nftables error translation

pub mod address;
pub mod backend;
pub mod engine;
pub mod error;
pub mod membership;
pub mod memory;
pub mod nft_json;
pub mod resolver;
pub mod ruleset;
pub mod transaction;

#[cfg(test)]
pub mod test_helpers;
