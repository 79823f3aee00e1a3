use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Errors that can occur when selecting a hasher
#[derive(Debug, Error)]
pub enum HasherError {
    #[error("Unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// A one-way digest over an ordered sequence of byte strings.
///
/// The parts are concatenated in order, with no separator, before hashing.
/// Everything that hashes (Merkle tree, proof of work, block hashes) goes
/// through this trait so the algorithm can be swapped without touching callers.
pub trait Hasher: Send + Sync {
    /// Hashes the concatenation of `parts`
    fn hash(&self, parts: &[&[u8]]) -> Vec<u8>;

    /// Length of the produced digest in bytes
    fn output_size(&self) -> usize;
}

/// Adapts any `sha2`-style [`Digest`] to the [`Hasher`] trait
pub struct DigestHasher<D> {
    _digest: PhantomData<fn() -> D>,
}

impl<D> DigestHasher<D> {
    pub fn new() -> Self {
        DigestHasher {
            _digest: PhantomData,
        }
    }
}

impl<D> Default for DigestHasher<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for DigestHasher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestHasher")
            .field("algorithm", &std::any::type_name::<D>())
            .finish()
    }
}

impl<D: Digest> Hasher for DigestHasher<D> {
    fn hash(&self, parts: &[&[u8]]) -> Vec<u8> {
        let mut hasher = D::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().to_vec()
    }

    fn output_size(&self) -> usize {
        <D as Digest>::output_size()
    }
}

pub type Sha256Hasher = DigestHasher<Sha256>;
pub type Sha512Hasher = DigestHasher<Sha512>;

/// Hash algorithms selectable through configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Builds a shareable hasher for this algorithm
    pub fn hasher(self) -> Arc<dyn Hasher> {
        match self {
            HashAlgorithm::Sha256 => Arc::new(Sha256Hasher::new()),
            HashAlgorithm::Sha512 => Arc::new(Sha512Hasher::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = HasherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            other => Err(HasherError::UnknownAlgorithm(other.to_string())),
        }
    }
}
