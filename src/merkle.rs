//! Merkle roots over ordered hash lists
//!
//! Levels are built bottom-up by hashing adjacent pairs; an odd node at the
//! end of a level moves up unchanged. The root of an empty list is the zero
//! hash and the root of one hash is that hash.

use crate::hashing::hash256_parts;
use crate::types::{Hash, Tx};

pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash256_parts(&[left.as_ref(), right.as_ref()]),
                [odd] => *odd,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

/// Root committed to by a block header: over the transactions' hashes, in
/// block order.
pub fn tx_merkle_root(transactions: &[Tx]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
    merkle_root(&hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash256;

    fn leaf(n: u8) -> Hash {
        hash256(&[n])
    }

    fn pair(a: Hash, b: Hash) -> Hash {
        hash256_parts(&[a.as_ref(), b.as_ref()])
    }

    #[test]
    fn test_small_trees() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
        assert_eq!(merkle_root(&[leaf(1)]), leaf(1));
        assert_eq!(merkle_root(&[leaf(1), leaf(2)]), pair(leaf(1), leaf(2)));
    }

    #[test]
    fn test_odd_node_is_carried_up() {
        let root = merkle_root(&[leaf(1), leaf(2), leaf(3)]);
        assert_eq!(root, pair(pair(leaf(1), leaf(2)), leaf(3)));

        let five: Vec<Hash> = (1..=5).map(leaf).collect();
        let expected = pair(
            pair(pair(leaf(1), leaf(2)), pair(leaf(3), leaf(4))),
            leaf(5),
        );
        assert_eq!(merkle_root(&five), expected);
    }

    #[test]
    fn test_order_sensitive() {
        let forward: Vec<Hash> = (1..=4).map(leaf).collect();
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_ne!(merkle_root(&forward), merkle_root(&reversed));
        assert_eq!(merkle_root(&forward), merkle_root(&forward.clone()));
    }
}
