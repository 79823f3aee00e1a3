use std::path::Path;

use log::debug;
use sled::transaction::TransactionError;
use sled::{Db, Tree};
use thiserror::Error;

use super::block::{Block, BlockError};

/// Reserved key holding the hash of the current tip
pub const TIP_KEY: &[u8] = b"lh";

const BLOCKS_TREE: &str = "blocks";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Block has no hash and cannot be stored")]
    UnsealedBlock,

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),
}

/// Persistent map of block hash to block, plus the tip pointer
///
/// Implementations must make [`commit_block`](BlockStore::commit_block)
/// all-or-nothing: after a failure neither the block nor the new tip is visible.
pub trait BlockStore: Send + Sync {
    /// Retrieves a block by its hash
    fn get_block(&self, hash: &[u8]) -> Result<Option<Block>, StorageError>;

    /// Returns the hash stored under the tip key
    fn get_tip(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `block` under its hash and makes it the tip in one step
    fn commit_block(&self, block: &Block) -> Result<(), StorageError>;
}

/// Sled-backed block store
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Tree holding blocks and the tip key
    blocks: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl BlockchainStorage {
    /// Opens (or creates) the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the database directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Whether `path` holds a sled database, without creating one
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        path.join("conf").is_file() || path.join("db").is_file()
    }

    /// Opens a throwaway database that is removed on drop
    #[cfg(test)]
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree(BLOCKS_TREE)?;
        Ok(Self { db, blocks })
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl BlockStore for BlockchainStorage {
    fn get_block(&self, hash: &[u8]) -> Result<Option<Block>, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => {
                let block = Block::deserialize(&value)
                    .map_err(|e| StorageError::DeserializationError(e.to_string()))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn get_tip(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blocks.get(TIP_KEY)?.map(|value| value.to_vec()))
    }

    fn commit_block(&self, block: &Block) -> Result<(), StorageError> {
        if block.hash.is_empty() {
            return Err(StorageError::UnsealedBlock);
        }

        let value = block
            .serialize()
            .map_err(|e: BlockError| StorageError::SerializationError(e.to_string()))?;
        let key = block.hash.as_slice();

        let result: Result<(), TransactionError<()>> = self.blocks.transaction(|tx| {
            tx.insert(key, value.as_slice())?;
            tx.insert(TIP_KEY, key)?;
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Storage(e)) => return Err(StorageError::DatabaseError(e)),
            Err(TransactionError::Abort(())) => {
                return Err(StorageError::TransactionAborted(hex::encode(key)))
            }
        }

        self.flush()?;
        debug!("Committed block {} ({} bytes)", hex::encode(key), value.len());

        Ok(())
    }
}
