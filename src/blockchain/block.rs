use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hasher::Hasher;
use super::merkle::{MerkleError, MerkleProof, MerkleTree};
use super::pow::{PowError, ProofOfWork};
use super::transaction::Transaction;

/// Errors that can occur while building or decoding a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Merkle error: {0}")]
    MerkleError(#[from] MerkleError),

    #[error("Proof of work error: {0}")]
    PowError(#[from] PowError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] bincode::Error),

    #[error("System clock is outside the representable range")]
    ClockOutOfRange,
}

/// Inclusion proof of one transaction in a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionProof {
    pub block_hash: Vec<u8>,
    pub tx_id: Vec<u8>,
    pub merkle_root: Vec<u8>,
    pub proof: MerkleProof,

    /// Whether the proof recomputes `merkle_root`
    pub verified: bool,
}

/// Represents a block in the chain
///
/// Blocks only come out of [`Block::create`] (already mined) or
/// [`Block::deserialize`], so `hash` and `nonce` are always set on a block
/// that can be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Creation time in nanoseconds since the Unix epoch
    pub timestamp: i64,

    /// Transactions committed to by this block
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, empty for the genesis block
    pub prev_block_hash: Vec<u8>,

    /// Hash of this block, produced by proof of work
    pub hash: Vec<u8>,

    /// Nonce that satisfies the difficulty target
    pub nonce: u64,
}

impl Block {
    /// Creates and mines a new block
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include, must not be empty
    /// * `prev_block_hash` - The hash of the previous block, empty for genesis
    /// * `pow` - The proof of work used to seal the block
    ///
    /// # Returns
    ///
    /// A finalized block with `hash` and `nonce` set
    pub fn create(
        transactions: Vec<Transaction>,
        prev_block_hash: Vec<u8>,
        pow: &ProofOfWork,
    ) -> Result<Self, BlockError> {
        let timestamp = Utc::now()
            .timestamp_nanos_opt()
            .ok_or(BlockError::ClockOutOfRange)?;

        Self::create_at(timestamp, transactions, prev_block_hash, pow)
    }

    fn create_at(
        timestamp: i64,
        transactions: Vec<Transaction>,
        prev_block_hash: Vec<u8>,
        pow: &ProofOfWork,
    ) -> Result<Self, BlockError> {
        let mut block = Block {
            timestamp,
            transactions,
            prev_block_hash,
            hash: Vec::new(),
            nonce: 0,
        };

        let preimage = block.preimage(pow.hasher().as_ref())?;
        let solution = pow.run(&preimage)?;

        block.nonce = solution.nonce;
        block.hash = solution.hash;

        Ok(block)
    }

    /// Merkle root over the transaction ids, each re-derived from its payload
    pub fn hash_transactions(&self, hasher: &dyn Hasher) -> Result<Vec<u8>, MerkleError> {
        let ids: Vec<Vec<u8>> = self.transactions.iter().map(Transaction::compute_id).collect();
        let leaves: Vec<&[u8]> = ids.iter().map(Vec::as_slice).collect();
        super::merkle::compute_root(&leaves, hasher)
    }

    /// The bytes proof of work hashes together with the nonce
    pub fn preimage(&self, hasher: &dyn Hasher) -> Result<Vec<u8>, MerkleError> {
        let merkle_root = self.hash_transactions(hasher)?;
        Ok(ProofOfWork::preimage(
            &self.prev_block_hash,
            &merkle_root,
            self.timestamp,
        ))
    }

    /// Re-derives the digest for the stored nonce and checks it against the target
    /// and the stored hash
    ///
    /// A transaction whose stored id no longer matches its payload also fails.
    pub fn validate(&self, pow: &ProofOfWork) -> bool {
        if !self.transactions.iter().all(Transaction::has_valid_id) {
            return false;
        }

        match self.preimage(pow.hasher().as_ref()) {
            Ok(preimage) => pow.validate_nonce(&preimage, self.nonce, &self.hash),
            Err(_) => false,
        }
    }

    /// Inclusion proof for the transaction with id `tx_id`
    pub fn transaction_proof(
        &self,
        tx_id: &[u8],
        pow: &ProofOfWork,
    ) -> Result<TransactionProof, MerkleError> {
        let hasher = pow.hasher();
        let tree = MerkleTree::build(
            self.transactions.iter().map(Transaction::compute_id),
            hasher.clone(),
        )?;
        let proof = tree.get_proof(tx_id)?;
        let verified = tree.verify_proof(tx_id, &proof, hasher.as_ref());

        Ok(TransactionProof {
            block_hash: self.hash.clone(),
            tx_id: tx_id.to_vec(),
            merkle_root: tree.root().to_vec(),
            proof,
            verified,
        })
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    /// Encodes the block for storage
    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a block previously produced by [`serialize`](Self::serialize)
    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::hasher::Sha256Hasher;
    use std::sync::Arc;

    fn pow() -> ProofOfWork {
        ProofOfWork::new(Arc::new(Sha256Hasher::new()), 8).unwrap()
    }

    fn transactions(data: &[&str]) -> Vec<Transaction> {
        data.iter().map(|d| Transaction::new(*d)).collect()
    }

    #[test]
    fn test_create_block() {
        let pow = pow();
        let block = Block::create(transactions(&["a", "b"]), b"previous".to_vec(), &pow).unwrap();

        assert_eq!(block.prev_block_hash, b"previous".to_vec());
        assert_eq!(block.hash.len(), 32);
        assert_eq!(block.hash[0], 0);
        assert!(block.timestamp > 0);
        assert!(!block.is_genesis());
        assert!(block.validate(&pow));
    }

    #[test]
    fn test_empty_block_rejected() {
        let result = Block::create(Vec::new(), Vec::new(), &pow());

        assert!(matches!(result, Err(BlockError::MerkleError(MerkleError::EmptyInput))));
    }

    #[test]
    fn test_hash_transactions_matches_tree() {
        let pow = pow();
        let block = Block::create(transactions(&["a", "b", "c"]), Vec::new(), &pow).unwrap();

        let tree = MerkleTree::build(
            block.transactions.iter().map(|tx| tx.id.clone()),
            pow.hasher().clone(),
        )
        .unwrap();

        assert_eq!(block.hash_transactions(pow.hasher().as_ref()).unwrap(), tree.root());
    }

    #[test]
    fn test_hash_commits_to_preimage() {
        let pow = pow();
        let block = Block::create(transactions(&["a"]), b"prev".to_vec(), &pow).unwrap();

        let preimage = block.preimage(pow.hasher().as_ref()).unwrap();
        assert_eq!(block.hash, pow.digest(&preimage, block.nonce));
    }

    #[test]
    fn test_tampering_breaks_validation() {
        let pow = pow();
        let block = Block::create(transactions(&["a", "b"]), b"prev".to_vec(), &pow).unwrap();

        let mut prev = block.clone();
        prev.prev_block_hash[0] ^= 0x01;
        assert!(!prev.validate(&pow));

        let mut data = block.clone();
        data.transactions[1] = Transaction::new("B");
        assert!(!data.validate(&pow));

        let mut time = block.clone();
        time.timestamp ^= 1;
        assert!(!time.validate(&pow));

        let mut nonce = block.clone();
        nonce.nonce = nonce.nonce.wrapping_add(1);
        assert!(!nonce.validate(&pow));
    }

    #[test]
    fn test_payload_bit_flip_breaks_validation() {
        let pow = pow();
        let block = Block::create(
            transactions(&["pay bob 10", "pay eve 3"]),
            b"prev".to_vec(),
            &pow,
        )
        .unwrap();

        // Stored id left untouched, only the data changes.
        let mut flipped = block.clone();
        flipped.transactions[0].payload[0] ^= 0x01;
        assert!(!flipped.validate(&pow));
        assert_ne!(
            flipped.hash_transactions(pow.hasher().as_ref()).unwrap(),
            block.hash_transactions(pow.hasher().as_ref()).unwrap()
        );

        // Payload rewritten and id recomputed to match.
        let mut rewritten = block.clone();
        rewritten.transactions[0] = Transaction::new("pay bob 99");
        assert!(!rewritten.validate(&pow));
    }

    #[test]
    fn test_forged_id_breaks_validation() {
        let pow = pow();
        let block = Block::create(transactions(&["a", "b"]), Vec::new(), &pow).unwrap();

        let mut forged = block.clone();
        forged.transactions[1].id = Transaction::new("c").id;
        assert!(!forged.validate(&pow));
    }

    #[test]
    fn test_transaction_proof() {
        let pow = pow();
        let txs = transactions(&["a", "b", "c"]);
        let block = Block::create(txs.clone(), Vec::new(), &pow).unwrap();

        let proof = block.transaction_proof(&txs[2].id, &pow).unwrap();
        assert!(proof.verified);
        assert_eq!(proof.block_hash, block.hash);
        assert_eq!(proof.merkle_root, block.hash_transactions(pow.hasher().as_ref()).unwrap());
        assert_eq!(proof.proof.compute_root(&txs[2].id, pow.hasher().as_ref()), proof.merkle_root);

        let missing = Transaction::new("z");
        assert!(matches!(
            block.transaction_proof(&missing.id, &pow),
            Err(MerkleError::ProofNotFound(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let pow = pow();
        let block = Block::create(transactions(&["x", "y"]), vec![9u8; 32], &pow).unwrap();

        let bytes = block.serialize().unwrap();
        let decoded = Block::deserialize(&bytes).unwrap();

        assert_eq!(decoded, block);
    }

    #[test]
    fn test_serialized_layout() {
        let block = Block {
            timestamp: 0x0102030405060708,
            transactions: Vec::new(),
            prev_block_hash: Vec::new(),
            hash: vec![0xaa],
            nonce: 5,
        };

        let bytes = block.serialize().unwrap();

        // timestamp, tx count, prev hash length, hash length + byte, nonce
        assert_eq!(bytes.len(), 8 + 8 + 8 + 8 + 1 + 8);
        assert_eq!(&bytes[..8], &0x0102030405060708i64.to_le_bytes());
        assert_eq!(&bytes[33..], &5u64.to_le_bytes());
    }

    #[test]
    fn test_deserialize_garbage() {
        assert!(matches!(
            Block::deserialize(&[1, 2, 3]),
            Err(BlockError::EncodingError(_))
        ));
    }

    #[test]
    fn test_create_at_fixed_time() {
        let pow = pow();
        let block = Block::create_at(1_000, transactions(&["a"]), Vec::new(), &pow).unwrap();

        assert_eq!(block.timestamp, 1_000);
        assert!(block.is_genesis());
        assert!(block.validate(&pow));
    }
}
