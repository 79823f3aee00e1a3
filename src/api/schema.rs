use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::block::TransactionProof;
use crate::blockchain::chain::ChainReport;
use crate::blockchain::merkle::Side;
use crate::blockchain::pow::ProofOfWork;
use crate::blockchain::{Block, Transaction};

/// A transaction as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    /// Hex encoded transaction id
    #[schema(example = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08")]
    pub id: String,

    /// Payload as text
    pub payload: String,

    /// Serialized size in bytes
    pub size: usize,
}

impl From<&Transaction> for TransactionView {
    fn from(transaction: &Transaction) -> Self {
        TransactionView {
            id: hex::encode(&transaction.id),
            payload: transaction.payload_lossy(),
            size: transaction.serialize().map(|bytes| bytes.len()).unwrap_or_default(),
        }
    }
}

/// A block as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlockView {
    /// Hex encoded block hash
    pub hash: String,

    /// Hex encoded hash of the previous block, empty for genesis
    pub prev_block_hash: String,

    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,

    pub nonce: u64,

    /// Hex encoded Merkle root of the transaction ids
    pub merkle_root: String,

    /// Whether the stored nonce still satisfies the difficulty target
    pub pow_valid: bool,

    pub transactions: Vec<TransactionView>,
}

impl BlockView {
    pub fn new(block: &Block, pow: &ProofOfWork) -> Self {
        let merkle_root = block
            .hash_transactions(pow.hasher().as_ref())
            .map(hex::encode)
            .unwrap_or_default();

        BlockView {
            hash: hex::encode(&block.hash),
            prev_block_hash: hex::encode(&block.prev_block_hash),
            timestamp: block.timestamp,
            nonce: block.nonce,
            merkle_root,
            pow_valid: block.validate(pow),
            transactions: block.transactions.iter().map(TransactionView::from).collect(),
        }
    }
}

/// Response for the chain endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// Number of blocks from tip to genesis
    pub length: usize,

    /// Hex encoded tip hash
    pub tip: String,

    /// Blocks, newest first
    pub blocks: Vec<BlockView>,
}

/// Request for the append endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppendRequest {
    /// Transaction payloads, in order
    #[schema(example = json!(["alice pays bob 10"]))]
    pub transactions: Vec<String>,
}

/// Response for the append endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppendResponse {
    pub message: String,

    /// The newly mined block
    pub block: BlockView,
}

/// One step of a Merkle inclusion proof
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProofStepView {
    /// Hex encoded sibling digest
    pub sibling: String,

    /// Side of the sibling, `left` or `right`
    pub side: String,
}

/// Response for the proof endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProofResponse {
    pub block_hash: String,
    pub tx_id: String,
    pub merkle_root: String,

    /// Steps from the leaf up to the root
    pub steps: Vec<ProofStepView>,

    /// Whether the proof recomputes the Merkle root
    pub verified: bool,
}

impl From<&TransactionProof> for ProofResponse {
    fn from(proof: &TransactionProof) -> Self {
        ProofResponse {
            block_hash: hex::encode(&proof.block_hash),
            tx_id: hex::encode(&proof.tx_id),
            merkle_root: hex::encode(&proof.merkle_root),
            steps: proof
                .proof
                .steps
                .iter()
                .map(|step| ProofStepView {
                    sibling: hex::encode(&step.sibling),
                    side: match step.side {
                        Side::Left => "left".to_string(),
                        Side::Right => "right".to_string(),
                    },
                })
                .collect(),
            verified: proof.verified,
        }
    }
}

/// A block that failed verification
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvalidBlockView {
    pub hash: String,
    pub reason: String,
}

/// Response for the validate endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub length: usize,
    pub is_valid: bool,
    pub invalid: Vec<InvalidBlockView>,
}

impl From<&ChainReport> for ValidationResponse {
    fn from(report: &ChainReport) -> Self {
        ValidationResponse {
            length: report.length,
            is_valid: report.is_valid(),
            invalid: report
                .invalid
                .iter()
                .map(|invalid| InvalidBlockView {
                    hash: hex::encode(&invalid.hash),
                    reason: invalid.reason.to_string(),
                })
                .collect(),
        }
    }
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human readable cause
    pub error: String,

    /// Error kind, for example `NotFound` or `EmptyInput`
    pub kind: String,
}
