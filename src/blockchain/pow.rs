use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use num_bigint::BigUint;
use thiserror::Error;

use super::hasher::Hasher;

/// Errors that can occur during proof of work
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowError {
    #[error("Invalid difficulty {difficulty}: must be between 1 and {max}")]
    InvalidDifficulty { difficulty: u32, max: u32 },

    #[error("Nonce space exhausted without meeting the target")]
    NonceExhausted,

    #[error("Mining cancelled")]
    Cancelled,
}

/// A nonce and the digest it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: Vec<u8>,
}

/// Brute-force nonce search under a leading-zero-bits target
///
/// A digest wins when, read as a big-endian unsigned integer, it is strictly
/// less than `2^(bits - difficulty)` where `bits` is the hasher's output width.
#[derive(Clone)]
pub struct ProofOfWork {
    hasher: Arc<dyn Hasher>,
    difficulty: u32,
    target: BigUint,
}

impl std::fmt::Debug for ProofOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofOfWork")
            .field("difficulty", &self.difficulty)
            .field("target", &self.target.to_str_radix(16))
            .finish()
    }
}

impl ProofOfWork {
    /// Creates a proof of work for `difficulty` leading zero bits
    ///
    /// # Errors
    ///
    /// `PowError::InvalidDifficulty` unless `1 <= difficulty < digest bits`
    pub fn new(hasher: Arc<dyn Hasher>, difficulty: u32) -> Result<Self, PowError> {
        let bits = (hasher.output_size() * 8) as u32;
        if difficulty == 0 || difficulty >= bits {
            return Err(PowError::InvalidDifficulty {
                difficulty,
                max: bits.saturating_sub(1),
            });
        }

        let target = BigUint::from(1u8) << (bits - difficulty) as usize;

        Ok(ProofOfWork {
            hasher,
            difficulty,
            target,
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn hasher(&self) -> &Arc<dyn Hasher> {
        &self.hasher
    }

    /// Builds the hashable preimage `prev_hash ‖ merkle_root ‖ timestamp`
    pub fn preimage(prev_hash: &[u8], merkle_root: &[u8], timestamp: i64) -> Vec<u8> {
        let mut data = Vec::with_capacity(prev_hash.len() + merkle_root.len() + 8);
        data.extend_from_slice(prev_hash);
        data.extend_from_slice(merkle_root);
        data.extend_from_slice(&timestamp.to_le_bytes());
        data
    }

    /// Digest of `preimage ‖ nonce`
    pub fn digest(&self, preimage: &[u8], nonce: u64) -> Vec<u8> {
        self.hasher.hash(&[preimage, &nonce.to_le_bytes()])
    }

    /// Whether `digest` is below the target
    pub fn meets_target(&self, digest: &[u8]) -> bool {
        BigUint::from_bytes_be(digest) < self.target
    }

    /// Searches nonces from zero until one meets the target
    pub fn run(&self, preimage: &[u8]) -> Result<Solution, PowError> {
        self.search_from(0, preimage, None)
    }

    /// Like [`run`](Self::run) but gives up once `stop` is raised
    pub fn run_cancellable(
        &self,
        preimage: &[u8],
        stop: &AtomicBool,
    ) -> Result<Solution, PowError> {
        self.search_from(0, preimage, Some(stop))
    }

    fn search_from(
        &self,
        start: u64,
        preimage: &[u8],
        stop: Option<&AtomicBool>,
    ) -> Result<Solution, PowError> {
        let mut nonce = start;

        loop {
            if let Some(stop) = stop {
                if stop.load(Ordering::Relaxed) {
                    debug!("Nonce search cancelled at nonce {}", nonce);
                    return Err(PowError::Cancelled);
                }
            }

            let hash = self.digest(preimage, nonce);
            if self.meets_target(&hash) {
                debug!(
                    "Found nonce {} for difficulty {}: {}",
                    nonce,
                    self.difficulty,
                    hex::encode(&hash)
                );
                return Ok(Solution { nonce, hash });
            }

            nonce = nonce.checked_add(1).ok_or(PowError::NonceExhausted)?;
        }
    }

    /// Re-checks a stored nonce without mining again
    ///
    /// True when the digest for `nonce` meets the target and equals `expected_hash`.
    pub fn validate_nonce(&self, preimage: &[u8], nonce: u64, expected_hash: &[u8]) -> bool {
        let hash = self.digest(preimage, nonce);
        hash == expected_hash && self.meets_target(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::hasher::{Sha256Hasher, Sha512Hasher};

    fn pow(difficulty: u32) -> ProofOfWork {
        ProofOfWork::new(Arc::new(Sha256Hasher::new()), difficulty).unwrap()
    }

    fn leading_zero_bits(digest: &[u8]) -> u32 {
        let mut bits = 0;
        for byte in digest {
            if *byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }

    #[test]
    fn test_invalid_difficulty() {
        let hasher: Arc<dyn Hasher> = Arc::new(Sha256Hasher::new());
        assert_eq!(
            ProofOfWork::new(hasher.clone(), 0).unwrap_err(),
            PowError::InvalidDifficulty {
                difficulty: 0,
                max: 255
            }
        );
        assert!(ProofOfWork::new(hasher.clone(), 256).is_err());
        assert!(ProofOfWork::new(hasher, 255).is_ok());
    }

    #[test]
    fn test_target_boundaries() {
        let pow = pow(8);

        let mut below = vec![0xffu8; 32];
        below[0] = 0x00;
        assert!(pow.meets_target(&below));

        let mut at_target = vec![0u8; 32];
        at_target[0] = 0x01;
        assert!(!pow.meets_target(&at_target));
    }

    #[test]
    fn test_preimage_layout() {
        let preimage = ProofOfWork::preimage(b"prev", b"root", 1);
        assert_eq!(&preimage[..4], b"prev");
        assert_eq!(&preimage[4..8], b"root");
        assert_eq!(&preimage[8..], &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_run_finds_valid_nonce() {
        let pow = pow(12);
        let preimage = ProofOfWork::preimage(b"", b"merkle-root", 1_700_000_000_000_000_000);

        let solution = pow.run(&preimage).unwrap();

        assert!(leading_zero_bits(&solution.hash) >= 12);
        assert_eq!(solution.hash, pow.digest(&preimage, solution.nonce));
        assert!(pow.validate_nonce(&preimage, solution.nonce, &solution.hash));
    }

    #[test]
    fn test_run_returns_first_valid_nonce() {
        let pow = pow(6);
        let preimage = ProofOfWork::preimage(b"abc", b"def", 42);

        let solution = pow.run(&preimage).unwrap();

        for nonce in 0..solution.nonce {
            assert!(!pow.meets_target(&pow.digest(&preimage, nonce)));
        }
    }

    #[test]
    fn test_validate_rejects_changed_preimage() {
        let pow = pow(10);
        let preimage = ProofOfWork::preimage(b"prev", b"root", 7);
        let solution = pow.run(&preimage).unwrap();

        let altered = ProofOfWork::preimage(b"prev", b"root", 8);
        assert!(!pow.validate_nonce(&altered, solution.nonce, &solution.hash));
    }

    #[test]
    fn test_cancelled_search() {
        let pow = pow(200);
        let stop = AtomicBool::new(true);

        let result = pow.run_cancellable(b"anything", &stop);
        assert_eq!(result.unwrap_err(), PowError::Cancelled);
    }

    #[test]
    fn test_nonce_overflow_is_fatal() {
        let pow = pow(255);

        let result = pow.search_from(u64::MAX, b"preimage", None);
        assert_eq!(result.unwrap_err(), PowError::NonceExhausted);
    }

    #[test]
    fn test_wider_digest() {
        let pow = ProofOfWork::new(Arc::new(Sha512Hasher::new()), 8).unwrap();
        let solution = pow.run(b"preimage").unwrap();

        assert_eq!(solution.hash.len(), 64);
        assert_eq!(solution.hash[0], 0);
    }
}
