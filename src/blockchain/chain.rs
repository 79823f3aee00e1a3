use std::fmt;
use std::iter::FusedIterator;
use std::sync::{Mutex, RwLock};

use log::{info, warn};
use thiserror::Error;

use super::block::{Block, BlockError, TransactionProof};
use super::merkle::MerkleError;
use super::pow::{PowError, ProofOfWork};
use super::storage::{BlockStore, BlockchainStorage, StorageError};
use super::transaction::Transaction;
use crate::config::LedgerConfig;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Ledger already exists at {0}")]
    AlreadyInitialized(String),

    #[error("No ledger found at {0}")]
    NotFound(String),

    #[error("Block {0} not found")]
    BlockNotFound(String),

    #[error("Corrupt chain: block {0} is referenced but missing from the store")]
    CorruptChain(String),

    #[error("Tip block {0} does not validate under the configured hasher and difficulty")]
    ConfigMismatch(String),

    #[error("A block needs at least one transaction")]
    EmptyInput,

    #[error("Transaction {0} is not part of the block")]
    ProofNotFound(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),

    #[error("Proof of work error: {0}")]
    PowError(#[from] PowError),

    #[error("Block error: {0}")]
    BlockError(BlockError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl From<BlockError> for BlockchainError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::MerkleError(err) => err.into(),
            BlockError::PowError(err) => BlockchainError::PowError(err),
            other => BlockchainError::BlockError(other),
        }
    }
}

impl From<MerkleError> for BlockchainError {
    fn from(err: MerkleError) -> Self {
        match err {
            MerkleError::EmptyInput => BlockchainError::EmptyInput,
            MerkleError::ProofNotFound(value) => BlockchainError::ProofNotFound(value),
        }
    }
}

/// Coarse classification of ledger failures, reported to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyInitialized,
    NotFound,
    CorruptChain,
    ConfigMismatch,
    EmptyInput,
    ProofNotFound,
    PersistenceFailure,
    InvalidDifficulty,
    Mining,
    Encoding,
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyInitialized => "AlreadyInitialized",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::CorruptChain => "CorruptChain",
            ErrorKind::ConfigMismatch => "ConfigMismatch",
            ErrorKind::EmptyInput => "EmptyInput",
            ErrorKind::ProofNotFound => "ProofNotFound",
            ErrorKind::PersistenceFailure => "PersistenceFailure",
            ErrorKind::InvalidDifficulty => "InvalidDifficulty",
            ErrorKind::Mining => "Mining",
            ErrorKind::Encoding => "Encoding",
            ErrorKind::System => "System",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BlockchainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockchainError::AlreadyInitialized(_) => ErrorKind::AlreadyInitialized,
            BlockchainError::NotFound(_) | BlockchainError::BlockNotFound(_) => ErrorKind::NotFound,
            BlockchainError::CorruptChain(_) => ErrorKind::CorruptChain,
            BlockchainError::ConfigMismatch(_) => ErrorKind::ConfigMismatch,
            BlockchainError::EmptyInput => ErrorKind::EmptyInput,
            BlockchainError::ProofNotFound(_) => ErrorKind::ProofNotFound,
            BlockchainError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            BlockchainError::PowError(PowError::InvalidDifficulty { .. }) => {
                ErrorKind::InvalidDifficulty
            }
            BlockchainError::PowError(_) => ErrorKind::Mining,
            BlockchainError::BlockError(BlockError::ClockOutOfRange) => ErrorKind::System,
            BlockchainError::BlockError(_) => ErrorKind::Encoding,
            BlockchainError::SystemError(_) => ErrorKind::System,
        }
    }
}

/// Why a block failed chain verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// Stored nonce does not reproduce the stored hash under the target
    ProofOfWork,

    /// Block is stored under a key that is not its hash
    HashMismatch,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::ProofOfWork => write!(f, "proof of work does not validate"),
            InvalidReason::HashMismatch => write!(f, "block hash does not match its link"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBlock {
    pub hash: Vec<u8>,
    pub reason: InvalidReason,
}

/// Outcome of walking the whole chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of blocks visited
    pub length: usize,

    pub invalid: Vec<InvalidBlock>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Represents the ledger: a store of blocks and the hash of the current tip
pub struct Blockchain<S: BlockStore = BlockchainStorage> {
    /// Storage for blocks and the tip pointer
    store: S,

    /// Sealing rule for new blocks, also used to validate stored ones
    pow: ProofOfWork,

    /// Hash of the current tip
    last_hash: RwLock<Vec<u8>>,

    /// Serializes appends; one writer at a time
    writer: Mutex<()>,
}

impl<S: BlockStore> fmt::Debug for Blockchain<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tip = self
            .last_hash
            .read()
            .map(|hash| hex::encode(&*hash))
            .unwrap_or_else(|_| "<poisoned>".to_string());
        f.debug_struct("Blockchain")
            .field("tip", &tip)
            .field("pow", &self.pow)
            .finish()
    }
}

impl Blockchain<BlockchainStorage> {
    /// Creates a new ledger at the configured location
    ///
    /// # Arguments
    ///
    /// * `config` - Location, difficulty and hash algorithm of the ledger
    /// * `seed` - Transactions of the genesis block
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized` if a ledger already exists there
    pub fn init(config: &LedgerConfig, seed: Vec<Transaction>) -> Result<Self, BlockchainError> {
        let pow = ProofOfWork::new(config.hash_algorithm.hasher(), config.difficulty)?;
        let storage = BlockchainStorage::open(&config.path)?;

        match Self::init_with_store(storage, pow, seed) {
            Err(BlockchainError::AlreadyInitialized(_)) => Err(BlockchainError::AlreadyInitialized(
                config.path.display().to_string(),
            )),
            other => other,
        }
    }

    /// Opens an existing ledger at the configured location
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no ledger there, `ConfigMismatch` if the stored tip
    /// was sealed with a different hasher or difficulty
    pub fn open(config: &LedgerConfig) -> Result<Self, BlockchainError> {
        let location = config.path.display().to_string();
        if !BlockchainStorage::exists(&config.path) {
            return Err(BlockchainError::NotFound(location));
        }

        let pow = ProofOfWork::new(config.hash_algorithm.hasher(), config.difficulty)?;
        let storage = BlockchainStorage::open(&config.path)?;

        match Self::open_with_store(storage, pow) {
            Err(BlockchainError::NotFound(_)) => Err(BlockchainError::NotFound(location)),
            other => other,
        }
    }

    /// Opens the ledger, creating it with `seed` as genesis if it does not exist yet
    pub fn open_or_init(
        config: &LedgerConfig,
        seed: Vec<Transaction>,
    ) -> Result<Self, BlockchainError> {
        match Self::open(config) {
            Err(BlockchainError::NotFound(location)) => {
                info!("No existing ledger found at {}, creating genesis block", location);
                Self::init(config, seed)
            }
            other => other,
        }
    }
}

impl<S: BlockStore> Blockchain<S> {
    /// Mines a genesis block from `seed` and commits it to an empty store
    pub fn init_with_store(
        store: S,
        pow: ProofOfWork,
        seed: Vec<Transaction>,
    ) -> Result<Self, BlockchainError> {
        if let Some(tip) = store.get_tip()? {
            return Err(BlockchainError::AlreadyInitialized(hex::encode(tip)));
        }

        let genesis = Block::create(seed, Vec::new(), &pow)?;
        store.commit_block(&genesis)?;
        info!("Genesis created: {}", hex::encode(&genesis.hash));

        Ok(Blockchain {
            store,
            pow,
            last_hash: RwLock::new(genesis.hash),
            writer: Mutex::new(()),
        })
    }

    /// Loads the tip of an already initialized store
    ///
    /// The tip block must validate under `pow`, so a ledger cannot be reopened
    /// with a different hasher or difficulty than it was sealed with.
    pub fn open_with_store(store: S, pow: ProofOfWork) -> Result<Self, BlockchainError> {
        let tip = store
            .get_tip()?
            .ok_or_else(|| BlockchainError::NotFound("tip".to_string()))?;

        let block = store
            .get_block(&tip)?
            .ok_or_else(|| BlockchainError::CorruptChain(hex::encode(&tip)))?;
        if !block.validate(&pow) {
            warn!("Tip {} does not validate with {:?}", hex::encode(&tip), pow);
            return Err(BlockchainError::ConfigMismatch(hex::encode(&tip)));
        }
        info!("Opened ledger at tip {}", hex::encode(&tip));

        Ok(Blockchain {
            store,
            pow,
            last_hash: RwLock::new(tip),
            writer: Mutex::new(()),
        })
    }

    /// The proof of work blocks are sealed with
    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    /// Hash of the current tip
    pub fn tip(&self) -> Result<Vec<u8>, BlockchainError> {
        self.last_hash
            .read()
            .map(|hash| hash.clone())
            .map_err(|_| BlockchainError::SystemError("tip lock poisoned".to_string()))
    }

    /// Looks up a block by hash
    pub fn block(&self, hash: &[u8]) -> Result<Option<Block>, BlockchainError> {
        Ok(self.store.get_block(hash)?)
    }

    /// Mines a block over `transactions` and makes it the new tip
    ///
    /// Mining runs without touching the store. The block and the tip pointer
    /// are then committed together; if that fails the tip stays where it was.
    pub fn append(&self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| BlockchainError::SystemError("writer lock poisoned".to_string()))?;

        let last_hash = self
            .store
            .get_tip()?
            .ok_or_else(|| BlockchainError::CorruptChain("tip".to_string()))?;

        let block = Block::create(transactions, last_hash, &self.pow)?;

        if let Err(err) = self.store.commit_block(&block) {
            warn!("Failed to persist block {}: {}", hex::encode(&block.hash), err);
            self.resync_tip();
            return Err(err.into());
        }

        let mut tip = self
            .last_hash
            .write()
            .map_err(|_| BlockchainError::SystemError("tip lock poisoned".to_string()))?;
        *tip = block.hash.clone();

        info!(
            "Appended block {} with {} transactions (nonce {})",
            hex::encode(&block.hash),
            block.transactions.len(),
            block.nonce
        );

        Ok(block)
    }

    /// Re-reads the tip from the store after a failed commit
    fn resync_tip(&self) {
        match (self.store.get_tip(), self.last_hash.write()) {
            (Ok(Some(stored)), Ok(mut tip)) => *tip = stored,
            (Ok(None), _) => warn!("Store has no tip after failed commit"),
            (Err(err), _) => warn!("Could not re-read tip after failed commit: {}", err),
            (Ok(Some(_)), Err(_)) => warn!("Tip lock poisoned, keeping the previous tip"),
        }
    }

    /// Walks the chain from the current tip back to genesis
    pub fn iterator(&self) -> Result<BlockchainIterator<'_, S>, BlockchainError> {
        Ok(BlockchainIterator {
            store: &self.store,
            current_hash: Some(self.tip()?),
        })
    }

    /// Checks every block from tip to genesis
    ///
    /// Each block must re-validate its proof of work (which also re-derives its
    /// Merkle root) and be stored under its own hash.
    pub fn verify_chain(&self) -> Result<ChainReport, BlockchainError> {
        let mut report = ChainReport::default();
        let mut expected = self.tip()?;

        for block in self.iterator()? {
            let block = block?;
            report.length += 1;

            if block.hash != expected {
                report.invalid.push(InvalidBlock {
                    hash: expected.clone(),
                    reason: InvalidReason::HashMismatch,
                });
            } else if !block.validate(&self.pow) {
                report.invalid.push(InvalidBlock {
                    hash: block.hash.clone(),
                    reason: InvalidReason::ProofOfWork,
                });
            }

            expected = block.prev_block_hash;
        }

        for invalid in &report.invalid {
            warn!("Invalid block {}: {}", hex::encode(&invalid.hash), invalid.reason);
        }

        Ok(report)
    }

    /// Inclusion proof of transaction `tx_id` in block `block_hash`
    pub fn transaction_proof(
        &self,
        block_hash: &[u8],
        tx_id: &[u8],
    ) -> Result<TransactionProof, BlockchainError> {
        let block = self
            .block(block_hash)?
            .ok_or_else(|| BlockchainError::BlockNotFound(hex::encode(block_hash)))?;

        Ok(block.transaction_proof(tx_id, &self.pow)?)
    }
}

/// Lazy walk from a tip snapshot back to the genesis block
///
/// Yields each block once, newest first, and ends after the genesis block or
/// after the first error. It cannot be restarted; ask the ledger for a new one.
pub struct BlockchainIterator<'a, S: BlockStore> {
    store: &'a S,
    current_hash: Option<Vec<u8>>,
}

impl<'a, S: BlockStore> Iterator for BlockchainIterator<'a, S> {
    type Item = Result<Block, BlockchainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;

        match self.store.get_block(&hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.prev_block_hash.clone());
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(BlockchainError::CorruptChain(hex::encode(&hash)))),
            Err(err) => Some(Err(err.into())),
        }
    }
}

impl<'a, S: BlockStore> FusedIterator for BlockchainIterator<'a, S> {}
