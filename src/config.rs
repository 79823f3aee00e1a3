use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::blockchain::hasher::HashAlgorithm;

pub const DATA_DIR_ENV: &str = "LEDGER_DATA_DIR";
pub const DIFFICULTY_ENV: &str = "LEDGER_DIFFICULTY";
pub const HASHER_ENV: &str = "LEDGER_HASHER";
pub const GENESIS_DATA_ENV: &str = "LEDGER_GENESIS_DATA";
pub const BIND_ADDR_ENV: &str = "LEDGER_BIND_ADDR";
pub const PORT_ENV: &str = "LEDGER_PORT";

const DEFAULT_DATA_DIR: &str = "data/blockchain";
const DEFAULT_DIFFICULTY: u32 = 16;
const DEFAULT_GENESIS_DATA: &str = "First Transaction from Genesis";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where the ledger lives and how blocks are sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Directory of the block store
    pub path: PathBuf,

    /// Leading zero bits required of a block hash
    pub difficulty: u32,

    /// Digest used for Merkle roots and block hashes
    pub hash_algorithm: HashAlgorithm,
}

impl LedgerConfig {
    pub fn new(path: impl Into<PathBuf>, difficulty: u32) -> Self {
        LedgerConfig {
            path: path.into(),
            difficulty,
            hash_algorithm: HashAlgorithm::default(),
        }
    }

    pub fn with_hash_algorithm(mut self, hash_algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = hash_algorithm;
        self
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
}

/// Process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub ledger: LedgerConfig,

    /// Payload of the seed transaction in a freshly created genesis block
    pub genesis_data: String,

    pub server: ServerConfig,
}

impl Config {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, falling back to defaults for missing keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = lookup(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let difficulty = parse_or(&lookup, DIFFICULTY_ENV, DEFAULT_DIFFICULTY)?;
        let hash_algorithm = parse_or(&lookup, HASHER_ENV, HashAlgorithm::default())?;
        let genesis_data =
            lookup(GENESIS_DATA_ENV).unwrap_or_else(|| DEFAULT_GENESIS_DATA.to_string());
        let bind_addr = parse_or(&lookup, BIND_ADDR_ENV, default_bind_addr())?;
        let port = parse_or(&lookup, PORT_ENV, DEFAULT_PORT)?;

        Ok(Config {
            ledger: LedgerConfig::new(path, difficulty).with_hash_algorithm(hash_algorithm),
            genesis_data,
            server: ServerConfig { bind_addr, port },
        })
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
