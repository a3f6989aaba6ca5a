//! # Trie Nodes
//!
//! Three node variants plus the implicit empty trie. A node's identity is
//! the BLAKE3 hash of its canonical encoding; that hash keys the
//! `trie_nodes` column family and links parents to children.

use crate::nibbles::Nibbles;
use shared_types::{CodecError, Decoder, Encoder, Hash, EMPTY_TRIE_ROOT};

const TAG_LEAF: u8 = 0;
const TAG_EXTENSION: u8 = 1;
const TAG_BRANCH: u8 = 2;

/// One trie node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieNode {
    /// Terminal node: remaining key path and the stored value.
    Leaf { path: Nibbles, value: Vec<u8> },

    /// Shared-prefix optimization: path segment and one child.
    Extension { path: Nibbles, child: Hash },

    /// 16-way fan-out, plus a value for keys terminating here (unused with
    /// fixed-width keys, kept for shape compatibility).
    Branch {
        children: Box<[Option<Hash>; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    /// Canonical encoding: the hash preimage and the on-disk bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        match self {
            TrieNode::Leaf { path, value } => {
                enc.put_u8(TAG_LEAF);
                enc.put_bytes(&path.encode_hex_prefix(true));
                enc.put_bytes(value);
            }
            TrieNode::Extension { path, child } => {
                enc.put_u8(TAG_EXTENSION);
                enc.put_bytes(&path.encode_hex_prefix(false));
                enc.put_hash(child);
            }
            TrieNode::Branch { children, value } => {
                enc.put_u8(TAG_BRANCH);
                let mut presence: u16 = 0;
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        presence |= 1 << i;
                    }
                }
                enc.put_u16(presence);
                for child in children.iter().flatten() {
                    enc.put_hash(child);
                }
                match value {
                    None => enc.put_u8(0),
                    Some(v) => {
                        enc.put_u8(1);
                        enc.put_bytes(v);
                    }
                }
            }
        }
        enc.finish()
    }

    /// Node identity: BLAKE3 of the canonical encoding.
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.encode())
    }

    /// Decode a stored node.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut dec = Decoder::new(bytes);
        let node = match dec.get_u8()? {
            TAG_LEAF => {
                let (path, _) = Nibbles::decode_hex_prefix(&dec.get_bytes()?);
                TrieNode::Leaf {
                    path,
                    value: dec.get_bytes()?,
                }
            }
            TAG_EXTENSION => {
                let (path, _) = Nibbles::decode_hex_prefix(&dec.get_bytes()?);
                TrieNode::Extension {
                    path,
                    child: dec.get_hash()?,
                }
            }
            TAG_BRANCH => {
                let presence = dec.get_u16()?;
                let mut children: [Option<Hash>; 16] = Default::default();
                for (i, slot) in children.iter_mut().enumerate() {
                    if presence & (1 << i) != 0 {
                        *slot = Some(dec.get_hash()?);
                    }
                }
                let value = match dec.get_u8()? {
                    0 => None,
                    1 => Some(dec.get_bytes()?),
                    tag => {
                        return Err(CodecError::InvalidTag {
                            tag,
                            context: "TrieNode.Branch.value",
                        })
                    }
                };
                TrieNode::Branch {
                    children: Box::new(children),
                    value,
                }
            }
            tag => {
                return Err(CodecError::InvalidTag {
                    tag,
                    context: "TrieNode",
                })
            }
        };
        dec.finish()?;
        Ok(node)
    }
}

/// Root hash of a trie with no entries.
pub fn empty_root() -> Hash {
    EMPTY_TRIE_ROOT
}
