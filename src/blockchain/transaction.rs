use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Represents a transaction in the ledger
///
/// The ledger does not interpret the payload. It only needs the serialized
/// bytes and a stable identity, which is the SHA-256 digest of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identity hash of the transaction
    pub id: Vec<u8>,

    /// Opaque transaction data
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Creates a transaction carrying `payload`
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let id = Self::hash_payload(&payload);

        Transaction { id, payload }
    }

    fn hash_payload(payload: &[u8]) -> Vec<u8> {
        Sha256::digest(payload).to_vec()
    }

    /// The stable identity hash
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Identity re-derived from the payload, ignoring the stored `id`
    pub fn compute_id(&self) -> Vec<u8> {
        Self::hash_payload(&self.payload)
    }

    /// Whether the stored `id` still matches the payload
    pub fn has_valid_id(&self) -> bool {
        self.id == self.compute_id()
    }

    /// Serializes the transaction
    pub fn serialize(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::serialize(self).map_err(|e| TransactionError::SerializationError(e.to_string()))
    }

    /// Payload rendered as text, lossy for non UTF-8 data
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }
}
