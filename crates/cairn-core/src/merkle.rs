//! SHA-256 merkle tree over transaction hashes.
//!
//! Domain-separated hashing:
//! - Leaf hash: `SHA-256(0x00 || data)`
//! - Internal node: `SHA-256(0x01 || left || right)`
//!
//! Odd-length layers duplicate the last element. Empty trees produce
//! [`Hash256::ZERO`]. The full flattened tree (leaves first, root last) is
//! persisted per block so inclusion proofs can be served later.

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Domain separation prefix for leaf hashes.
const LEAF_PREFIX: u8 = 0x00;

/// Domain separation prefix for internal node hashes.
const NODE_PREFIX: u8 = 0x01;

/// Compute a domain-separated leaf hash.
pub fn leaf_hash(data: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Compute a domain-separated internal node hash.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Compute the next layer of the tree from the current one.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        next.push(node_hash(left, right));
        i += 2;
    }
    next
}

/// Flatten the full tree: all layers concatenated, leaves first, root last.
///
/// Returns an empty vector for an empty leaf slice.
pub fn merkle_tree(leaves: &[Hash256]) -> Vec<Hash256> {
    if leaves.is_empty() {
        return Vec::new();
    }

    let mut flat: Vec<Hash256> = leaves.iter().map(leaf_hash).collect();
    let mut start = 0;
    while flat.len() - start > 1 {
        let layer = next_layer(&flat[start..]);
        start = flat.len();
        flat.extend(layer);
    }
    flat
}

/// Compute the merkle root from a slice of transaction hashes.
///
/// Returns [`Hash256::ZERO`] for an empty slice.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }

    let mut current: Vec<Hash256> = leaves.iter().map(leaf_hash).collect();
    while current.len() > 1 {
        current = next_layer(&current);
    }
    current[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    #[test]
    fn empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
        assert!(merkle_tree(&[]).is_empty());
    }

    #[test]
    fn single_leaf_root() {
        let root = merkle_root(&[h(1)]);
        assert_eq!(root, leaf_hash(&h(1)));
    }

    #[test]
    fn two_leaf_root() {
        let root = merkle_root(&[h(1), h(2)]);
        assert_eq!(root, node_hash(&leaf_hash(&h(1)), &leaf_hash(&h(2))));
    }

    #[test]
    fn odd_layer_duplicates_last() {
        let l1 = leaf_hash(&h(1));
        let l2 = leaf_hash(&h(2));
        let l3 = leaf_hash(&h(3));
        let expected = node_hash(&node_hash(&l1, &l2), &node_hash(&l3, &l3));
        assert_eq!(merkle_root(&[h(1), h(2), h(3)]), expected);
    }

    #[test]
    fn leaf_and_node_domains_differ() {
        // A leaf over X must never equal a node whose children hash to X.
        assert_ne!(leaf_hash(&h(1)), node_hash(&h(1), &h(1)));
    }

    #[test]
    fn tree_last_entry_is_root() {
        let leaves = [h(1), h(2), h(3), h(4)];
        let flat = merkle_tree(&leaves);
        assert_eq!(*flat.last().unwrap(), merkle_root(&leaves));
        // 4 leaves + 2 internal + 1 root
        assert_eq!(flat.len(), 7);
    }

    #[test]
    fn tree_leaves_come_first() {
        let leaves = [h(1), h(2)];
        let flat = merkle_tree(&leaves);
        assert_eq!(flat[0], leaf_hash(&h(1)));
        assert_eq!(flat[1], leaf_hash(&h(2)));
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn root_order_sensitive() {
        assert_ne!(merkle_root(&[h(1), h(2)]), merkle_root(&[h(2), h(1)]));
    }
}
