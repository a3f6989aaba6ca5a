//! # Merkle Patricia Trie
//!
//! Authenticated map from 32-byte keys to byte values. The root hash commits
//! to the full contents; any mutation produces a new root.
//!
//! The trie is rebuilt from its sorted entry set when the root is requested:
//! construction from sorted keys is a single recursive pass, the result is
//! deterministic regardless of mutation order, and content addressing means
//! subtrees untouched since the previous version hash to the same node ids;
//! they are already on disk and are never rewritten.

use crate::errors::StateError;
use crate::nibbles::Nibbles;
use crate::node::TrieNode;
use bc_02_storage::{ColumnFamily, WriteBatch};
use shared_types::{Hash, EMPTY_TRIE_ROOT};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Content-addressed Merkle Patricia Trie.
pub struct Trie {
    /// Authoritative contents, sorted by key.
    entries: BTreeMap<[u8; 32], Vec<u8>>,
    /// Nodes of the current root version, by identity.
    nodes: HashMap<Hash, TrieNode>,
    root: Hash,
    stale: bool,
    /// Node ids already staged for persistence; staging skips them.
    persisted: HashSet<Hash>,
}

impl Trie {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            nodes: HashMap::new(),
            root: EMPTY_TRIE_ROOT,
            stale: false,
            persisted: HashSet::new(),
        }
    }

    /// Build from an existing entry set (cache restore).
    pub fn from_entries(entries: impl IntoIterator<Item = ([u8; 32], Vec<u8>)>) -> Self {
        let mut trie = Self::new();
        trie.entries = entries.into_iter().collect();
        trie.stale = !trie.entries.is_empty();
        trie
    }

    pub fn get(&self, key: &Hash) -> Option<&Vec<u8>> {
        self.entries.get(key.as_bytes())
    }

    pub fn put(&mut self, key: Hash, value: Vec<u8>) {
        self.entries.insert(*key.as_bytes(), value);
        self.stale = true;
    }

    pub fn delete(&mut self, key: &Hash) {
        if self.entries.remove(key.as_bytes()).is_some() {
            self.stale = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current root hash, rebuilding if mutations are pending.
    pub fn root_hash(&mut self) -> Hash {
        if self.stale {
            self.rebuild();
        }
        self.root
    }

    /// Inclusion (or exclusion) proof: the encoded node path from the root
    /// toward `key`. Verify with [`verify_proof`].
    pub fn prove(&mut self, key: &Hash) -> Result<Vec<Vec<u8>>, StateError> {
        let root = self.root_hash();
        if root == EMPTY_TRIE_ROOT {
            return Ok(Vec::new());
        }
        let key_nibbles = Nibbles::from_bytes(key.as_bytes());
        let mut proof = Vec::new();
        let mut cursor = root;
        let mut depth = 0;
        loop {
            let node = self
                .nodes
                .get(&cursor)
                .ok_or(StateError::MissingTrieNode(cursor))?;
            proof.push(node.encode());
            match node {
                TrieNode::Leaf { .. } => return Ok(proof),
                TrieNode::Extension { path, child } => {
                    let rest = key_nibbles.slice(depth);
                    if rest.common_prefix_len(path) < path.len() {
                        // Diverges here; the partial path proves exclusion.
                        return Ok(proof);
                    }
                    depth += path.len();
                    cursor = *child;
                }
                TrieNode::Branch { children, .. } => {
                    if depth >= key_nibbles.len() {
                        return Ok(proof);
                    }
                    match children[key_nibbles.at(depth) as usize] {
                        Some(child) => {
                            depth += 1;
                            cursor = child;
                        }
                        None => return Ok(proof),
                    }
                }
            }
        }
    }

    /// Nodes of the current version, by identity. Rebuilds first if
    /// mutations are pending.
    pub fn nodes(&mut self) -> &HashMap<Hash, TrieNode> {
        if self.stale {
            self.rebuild();
        }
        &self.nodes
    }

    /// Stage every not-yet-persisted node of the current version into
    /// `batch` under the `trie_nodes` family.
    pub fn stage_nodes(&mut self, batch: &mut WriteBatch) {
        let _ = self.root_hash();
        for (hash, node) in &self.nodes {
            if self.persisted.insert(*hash) {
                batch.put(ColumnFamily::TrieNodes, hash.as_bytes().to_vec(), node.encode());
            }
        }
    }

    fn rebuild(&mut self) {
        self.nodes.clear();
        if self.entries.is_empty() {
            self.root = EMPTY_TRIE_ROOT;
        } else {
            let items: Vec<(Nibbles, &[u8])> = self
                .entries
                .iter()
                .map(|(k, v)| (Nibbles::from_bytes(k), v.as_slice()))
                .collect();
            self.root = build_subtree(&items, 0, &mut self.nodes);
        }
        self.stale = false;
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively construct the subtree for `items` (sorted by key, all
/// agreeing on the first `depth` nibbles), returning its node hash.
fn build_subtree(
    items: &[(Nibbles, &[u8])],
    depth: usize,
    nodes: &mut HashMap<Hash, TrieNode>,
) -> Hash {
    debug_assert!(!items.is_empty());

    if items.len() == 1 {
        let (key, value) = &items[0];
        let node = TrieNode::Leaf {
            path: key.slice(depth),
            value: value.to_vec(),
        };
        return intern(node, nodes);
    }

    // Sorted input: the prefix shared by the first and last item is shared
    // by every item between them.
    let first = &items[0].0;
    let last = &items[items.len() - 1].0;
    let common = first
        .slice(depth)
        .common_prefix_len(&last.slice(depth));

    if common > 0 {
        let child = build_subtree(items, depth + common, nodes);
        let node = TrieNode::Extension {
            path: first.slice_range(depth, depth + common),
            child,
        };
        return intern(node, nodes);
    }

    let mut children: [Option<Hash>; 16] = Default::default();
    let mut start = 0;
    while start < items.len() {
        let nibble = items[start].0.at(depth);
        let mut end = start + 1;
        while end < items.len() && items[end].0.at(depth) == nibble {
            end += 1;
        }
        children[nibble as usize] = Some(build_subtree(&items[start..end], depth + 1, nodes));
        start = end;
    }
    intern(
        TrieNode::Branch {
            children: Box::new(children),
            value: None,
        },
        nodes,
    )
}

fn intern(node: TrieNode, nodes: &mut HashMap<Hash, TrieNode>) -> Hash {
    let hash = node.hash();
    nodes.insert(hash, node);
    hash
}

/// Check a proof produced by [`Trie::prove`] against a root.
///
/// `expected` is `Some(value)` for an inclusion claim and `None` for an
/// exclusion claim. Every node hash is recomputed, so a tampered path fails.
pub fn verify_proof(root: &Hash, key: &Hash, expected: Option<&[u8]>, proof: &[Vec<u8>]) -> bool {
    if *root == EMPTY_TRIE_ROOT {
        return expected.is_none() && proof.is_empty();
    }
    let key_nibbles = Nibbles::from_bytes(key.as_bytes());
    let mut cursor = *root;
    let mut depth = 0;
    let mut index = 0;

    loop {
        let Some(bytes) = proof.get(index) else {
            return false;
        };
        index += 1;
        if Hash::digest(bytes) != cursor {
            return false;
        }
        let Ok(node) = TrieNode::decode(bytes) else {
            return false;
        };
        match node {
            TrieNode::Leaf { path, value } => {
                let exhausted = index == proof.len();
                return if key_nibbles.slice(depth) == path {
                    exhausted && expected == Some(value.as_slice())
                } else {
                    exhausted && expected.is_none()
                };
            }
            TrieNode::Extension { path, child } => {
                let rest = key_nibbles.slice(depth);
                if rest.common_prefix_len(&path) < path.len() {
                    return index == proof.len() && expected.is_none();
                }
                depth += path.len();
                cursor = child;
            }
            TrieNode::Branch { children, .. } => {
                if depth >= key_nibbles.len() {
                    return false;
                }
                match children[key_nibbles.at(depth) as usize] {
                    Some(child) => {
                        depth += 1;
                        cursor = child;
                    }
                    None => return index == proof.len() && expected.is_none(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_02_storage::KeyValueStore;

    fn key(i: u8) -> Hash {
        Hash::digest(&[i])
    }

    #[test]
    fn empty_trie_roots_to_zero() {
        let mut trie = Trie::new();
        assert_eq!(trie.root_hash(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn root_is_deterministic_across_insert_order() {
        let mut forward = Trie::new();
        let mut backward = Trie::new();
        for i in 0..32u8 {
            forward.put(key(i), vec![i]);
        }
        for i in (0..32u8).rev() {
            backward.put(key(i), vec![i]);
        }
        assert_eq!(forward.root_hash(), backward.root_hash());
    }

    #[test]
    fn mutation_changes_root_and_delete_restores_it() {
        let mut trie = Trie::new();
        for i in 0..8u8 {
            trie.put(key(i), vec![i]);
        }
        let before = trie.root_hash();

        trie.put(key(99), vec![99]);
        let with_extra = trie.root_hash();
        assert_ne!(before, with_extra);

        trie.delete(&key(99));
        assert_eq!(trie.root_hash(), before);
    }

    #[test]
    fn value_update_changes_root() {
        let mut trie = Trie::new();
        trie.put(key(1), vec![1]);
        let before = trie.root_hash();
        trie.put(key(1), vec![2]);
        assert_ne!(trie.root_hash(), before);
    }

    #[test]
    fn inclusion_proof_verifies() {
        let mut trie = Trie::new();
        for i in 0..16u8 {
            trie.put(key(i), vec![i, i]);
        }
        let root = trie.root_hash();
        let proof = trie.prove(&key(7)).unwrap();
        assert!(verify_proof(&root, &key(7), Some(&[7, 7]), &proof));
        // Wrong value rejected.
        assert!(!verify_proof(&root, &key(7), Some(&[7, 8]), &proof));
        // Wrong root rejected.
        assert!(!verify_proof(&Hash::digest(b"bogus"), &key(7), Some(&[7, 7]), &proof));
    }

    #[test]
    fn exclusion_proof_verifies() {
        let mut trie = Trie::new();
        for i in 0..16u8 {
            trie.put(key(i), vec![i]);
        }
        let root = trie.root_hash();
        let absent = key(200);
        let proof = trie.prove(&absent).unwrap();
        assert!(verify_proof(&root, &absent, None, &proof));
        assert!(!verify_proof(&root, &absent, Some(&[1]), &proof));
    }

    #[test]
    fn tampered_proof_rejected() {
        let mut trie = Trie::new();
        for i in 0..16u8 {
            trie.put(key(i), vec![i]);
        }
        let root = trie.root_hash();
        let mut proof = trie.prove(&key(3)).unwrap();
        let last = proof.len() - 1;
        let tail = proof[last].len() - 1;
        proof[last][tail] ^= 1;
        assert!(!verify_proof(&root, &key(3), Some(&[3]), &proof));
    }

    #[test]
    fn staging_skips_already_persisted_nodes() {
        let mut trie = Trie::new();
        trie.put(key(1), vec![1]);
        let mut batch = WriteBatch::new();
        trie.stage_nodes(&mut batch);
        let first = batch.len();
        assert!(first > 0);
        bc_02_storage::MemoryStore::new().commit(batch).unwrap();

        // No mutations: nothing new to stage.
        let mut batch = WriteBatch::new();
        trie.stage_nodes(&mut batch);
        assert_eq!(batch.len(), 0);
        bc_02_storage::MemoryStore::new().commit(batch).unwrap();
    }

    #[test]
    fn from_entries_matches_incremental() {
        let mut incremental = Trie::new();
        let mut seed = Vec::new();
        for i in 0..10u8 {
            incremental.put(key(i), vec![i]);
            seed.push((*key(i).as_bytes(), vec![i]));
        }
        let mut restored = Trie::from_entries(seed);
        assert_eq!(restored.root_hash(), incremental.root_hash());
    }
}
