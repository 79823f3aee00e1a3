// Blockchain module
//
// This module contains the ledger core:
// - Pluggable hashing
// - Merkle tree with inclusion proofs
// - Proof of work
// - Block structure
// - Persistent storage
// - The chain itself and its reverse iterator

pub mod block;
pub mod chain;
pub mod hasher;
pub mod merkle;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, ErrorKind};
pub use transaction::Transaction;
