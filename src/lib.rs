//! Append-only proof-of-work ledger.
//!
//! Blocks commit to their transactions through a Merkle root, are sealed by
//! proof of work and persisted in sled together with the tip pointer. The
//! [`api`] module exposes the ledger over HTTP.

pub mod api;
pub mod blockchain;
pub mod config;
