//! Binary Merkle tree over already-hashed leaves.
//!
//! Nodes live in an arena; children and parents are arena indices, so the
//! parent link never owns anything and is only followed while building a proof.
//! When a level has an odd number of nodes the last node is paired with itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::hasher::Hasher;

/// Errors that can occur during Merkle tree operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree from empty input")]
    EmptyInput,

    #[error("Value {0} does not belong to the tree")]
    ProofNotFound(String),
}

/// Which side of its parent a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Digest of the sibling node
    pub sibling: Vec<u8>,

    /// Whether the sibling is the left or the right child
    pub side: Side,
}

/// Inclusion proof from a leaf up to the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recomputes the root implied by `value` and this proof
    pub fn compute_root(&self, value: &[u8], hasher: &dyn Hasher) -> Vec<u8> {
        self.steps.iter().fold(value.to_vec(), |running, step| match step.side {
            Side::Left => hasher.hash(&[&step.sibling, &running]),
            Side::Right => hasher.hash(&[&running, &step.sibling]),
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone)]
struct MerkleNode {
    data: Vec<u8>,
    left: Option<usize>,
    right: Option<usize>,
    parent: Option<usize>,
}

impl MerkleNode {
    fn leaf(data: Vec<u8>) -> Self {
        MerkleNode {
            data,
            left: None,
            right: None,
            parent: None,
        }
    }
}

/// A Merkle tree that keeps every node so proofs can be produced later
pub struct MerkleTree {
    /// Arena of nodes; the first `leaf_count` entries are the leaves in order
    nodes: Vec<MerkleNode>,
    leaf_count: usize,
    root: usize,
    hasher: Arc<dyn Hasher>,
}

impl std::fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleTree")
            .field("leaves", &self.leaf_count)
            .field("root", &hex::encode(self.root()))
            .finish()
    }
}

impl MerkleTree {
    /// Builds a tree over `leaves`
    ///
    /// Leaves are used as-is, callers pass digests (for example transaction
    /// ids). A single leaf yields a degenerate tree whose root is that leaf.
    ///
    /// # Errors
    ///
    /// `MerkleError::EmptyInput` when `leaves` is empty
    pub fn build<I>(leaves: I, hasher: Arc<dyn Hasher>) -> Result<Self, MerkleError>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut nodes: Vec<MerkleNode> = leaves.into_iter().map(MerkleNode::leaf).collect();
        let leaf_count = nodes.len();
        if leaf_count == 0 {
            return Err(MerkleError::EmptyInput);
        }

        let mut level: Vec<usize> = (0..leaf_count).collect();
        while level.len() > 1 {
            if level.len() % 2 != 0 {
                let last = level[level.len() - 1];
                level.push(last);
            }

            let mut parents = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let (left, right) = (pair[0], pair[1]);
                let data = hasher.hash(&[&nodes[left].data, &nodes[right].data]);
                let parent = nodes.len();
                nodes.push(MerkleNode {
                    data,
                    left: Some(left),
                    right: Some(right),
                    parent: None,
                });
                nodes[left].parent = Some(parent);
                nodes[right].parent = Some(parent);
                parents.push(parent);
            }
            level = parents;
        }

        Ok(MerkleTree {
            root: level[0],
            nodes,
            leaf_count,
            hasher,
        })
    }

    /// The root digest
    pub fn root(&self) -> &[u8] {
        &self.nodes[self.root].data
    }

    /// Leaf values in insertion order
    pub fn leaves(&self) -> impl Iterator<Item = &[u8]> {
        self.nodes[..self.leaf_count].iter().map(|n| n.data.as_slice())
    }

    pub fn len(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Overwrites the data of leaf `index` without rebuilding the tree.
    ///
    /// The stored root keeps committing to the old value, so [`verify`](Self::verify)
    /// reports the tree as tampered afterwards. Returns the previous value.
    pub fn replace_leaf(&mut self, index: usize, data: Vec<u8>) -> Option<Vec<u8>> {
        if index >= self.leaf_count {
            return None;
        }
        Some(std::mem::replace(&mut self.nodes[index].data, data))
    }

    /// Produces the inclusion proof for the first leaf equal to `target`
    pub fn get_proof(&self, target: &[u8]) -> Result<MerkleProof, MerkleError> {
        let leaf = self.nodes[..self.leaf_count]
            .iter()
            .position(|node| node.data == target)
            .ok_or_else(|| MerkleError::ProofNotFound(hex::encode(target)))?;

        let mut steps = Vec::new();
        let mut current = leaf;
        while let Some(parent) = self.nodes[current].parent {
            let node = &self.nodes[parent];
            let (left, right) = match (node.left, node.right) {
                (Some(left), Some(right)) => (left, right),
                _ => break,
            };

            // A duplicated node is both children; its sibling is itself on the right.
            if left == current {
                steps.push(ProofStep {
                    sibling: self.nodes[right].data.clone(),
                    side: Side::Right,
                });
            } else {
                steps.push(ProofStep {
                    sibling: self.nodes[left].data.clone(),
                    side: Side::Left,
                });
            }
            current = parent;
        }

        Ok(MerkleProof { steps })
    }

    /// Checks that `value` with `proof` hashes up to this tree's root
    pub fn verify_proof(&self, value: &[u8], proof: &MerkleProof, hasher: &dyn Hasher) -> bool {
        proof.compute_root(value, hasher) == self.root()
    }

    /// Rebuilds the root from the current leaves and compares it with the stored root
    pub fn verify(&self) -> bool {
        let leaves: Vec<&[u8]> = self.leaves().collect();
        match compute_root(&leaves, self.hasher.as_ref()) {
            Ok(root) => root == self.root(),
            Err(_) => false,
        }
    }
}

/// Computes a Merkle root without keeping the intermediate nodes
pub fn compute_root(leaves: &[&[u8]], hasher: &dyn Hasher) -> Result<Vec<u8>, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyInput);
    }

    let mut level: Vec<Vec<u8>> = leaves.iter().map(|leaf| leaf.to_vec()).collect();
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1].clone();
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| hasher.hash(&[&pair[0], &pair[1]]))
            .collect();
    }

    Ok(level.remove(0))
}
