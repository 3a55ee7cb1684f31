//! Block merkle roots and BIP37 partial merkle trees.

use super::encode::{DecodeError, Reader, write_compact_size};
use super::{Block, HEADER_SIZE, Hash256, sha256d};

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    sha256d(&buf)
}

/// Merkle root over txids, duplicating the last node of odd levels.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }
    let mut level = txids.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

/// Partial merkle tree proving a subset of a block's transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleTree {
    pub total_transactions: u32,
    pub hashes: Vec<Hash256>,
    pub flags: Vec<bool>,
}

impl PartialMerkleTree {
    /// Build the tree for `txids`, where `matches[i]` marks txids to prove.
    pub fn build(txids: &[Hash256], matches: &[bool]) -> Self {
        let mut tree = Self {
            total_transactions: txids.len() as u32,
            hashes: Vec::new(),
            flags: Vec::new(),
        };
        if txids.is_empty() {
            return tree;
        }
        let mut height = 0;
        while tree.width(height) > 1 {
            height += 1;
        }
        tree.traverse_and_build(height, 0, txids, matches);
        tree
    }

    fn width(&self, height: u32) -> u32 {
        (self.total_transactions + (1 << height) - 1) >> height
    }

    fn tree_height(&self) -> u32 {
        let mut height = 0;
        while self.width(height) > 1 {
            height += 1;
        }
        height
    }

    fn calc_hash(&self, height: u32, pos: u32, txids: &[Hash256]) -> Hash256 {
        if height == 0 {
            return txids[pos as usize];
        }
        let left = self.calc_hash(height - 1, pos * 2, txids);
        let right = if pos * 2 + 1 < self.width(height - 1) {
            self.calc_hash(height - 1, pos * 2 + 1, txids)
        } else {
            left
        };
        hash_pair(&left, &right)
    }

    fn traverse_and_build(&mut self, height: u32, pos: u32, txids: &[Hash256], matches: &[bool]) {
        let start = (pos << height) as usize;
        let end = (((pos + 1) << height) as usize).min(txids.len());
        let parent_of_match = (start..end).any(|i| matches.get(i).copied().unwrap_or(false));
        self.flags.push(parent_of_match);

        if height == 0 || !parent_of_match {
            let hash = self.calc_hash(height, pos, txids);
            self.hashes.push(hash);
        } else {
            self.traverse_and_build(height - 1, pos * 2, txids, matches);
            if pos * 2 + 1 < self.width(height - 1) {
                self.traverse_and_build(height - 1, pos * 2 + 1, txids, matches);
            }
        }
    }

    /// Recompute the merkle root, returning it with the matched txids.
    pub fn extract_matches(&self) -> Result<(Hash256, Vec<Hash256>), MerkleError> {
        if self.total_transactions == 0 {
            return Err(MerkleError::NoTransactions);
        }
        if self.hashes.len() > self.total_transactions as usize {
            return Err(MerkleError::TooManyHashes);
        }
        if self.flags.len() < self.hashes.len() {
            return Err(MerkleError::TooFewFlags);
        }

        let mut cursor = Cursor::default();
        let mut matched = Vec::new();
        let root = self.traverse_and_extract(self.tree_height(), 0, &mut cursor, &mut matched)?;

        // Every flag byte and hash must be consumed
        if cursor.bit.div_ceil(8) != self.flags.len().div_ceil(8) {
            return Err(MerkleError::UnusedFlags);
        }
        if cursor.hash != self.hashes.len() {
            return Err(MerkleError::UnusedHashes);
        }
        Ok((root, matched))
    }

    fn traverse_and_extract(
        &self,
        height: u32,
        pos: u32,
        cursor: &mut Cursor,
        matched: &mut Vec<Hash256>,
    ) -> Result<Hash256, MerkleError> {
        let parent_of_match = *self.flags.get(cursor.bit).ok_or(MerkleError::TooFewFlags)?;
        cursor.bit += 1;

        if height == 0 || !parent_of_match {
            let hash = *self.hashes.get(cursor.hash).ok_or(MerkleError::TooFewHashes)?;
            cursor.hash += 1;
            if height == 0 && parent_of_match {
                matched.push(hash);
            }
            return Ok(hash);
        }

        let left = self.traverse_and_extract(height - 1, pos * 2, cursor, matched)?;
        let right = if pos * 2 + 1 < self.width(height - 1) {
            let right = self.traverse_and_extract(height - 1, pos * 2 + 1, cursor, matched)?;
            if right == left {
                return Err(MerkleError::DuplicateSubtree);
            }
            right
        } else {
            left
        };
        Ok(hash_pair(&left, &right))
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_transactions.to_le_bytes());
        write_compact_size(out, self.hashes.len() as u64);
        for hash in &self.hashes {
            out.extend_from_slice(hash.as_bytes());
        }
        let mut bytes = vec![0u8; self.flags.len().div_ceil(8)];
        for (i, flag) in self.flags.iter().enumerate() {
            bytes[i / 8] |= (*flag as u8) << (i % 8);
        }
        write_compact_size(out, bytes.len() as u64);
        out.extend_from_slice(&bytes);
    }

    pub fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let total_transactions = reader.read_u32_le()?;
        let hash_count = reader.read_compact_size()?;
        if hash_count > (reader.remaining() / 32) as u64 {
            return Err(DecodeError::OversizedLength(hash_count));
        }
        let mut hashes = Vec::with_capacity(hash_count as usize);
        for _ in 0..hash_count {
            hashes.push(Hash256(reader.read_array()?));
        }
        let flag_bytes = reader.read_var_bytes()?;
        let flags = (0..flag_bytes.len() * 8)
            .map(|i| flag_bytes[i / 8] & (1 << (i % 8)) != 0)
            .collect();
        Ok(Self {
            total_transactions,
            hashes,
            flags,
        })
    }
}

#[derive(Default)]
struct Cursor {
    bit: usize,
    hash: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    #[error("partial merkle tree has no transactions")]
    NoTransactions,
    #[error("more hashes than transactions")]
    TooManyHashes,
    #[error("ran out of flag bits")]
    TooFewFlags,
    #[error("ran out of hashes")]
    TooFewHashes,
    #[error("flag bits left unused")]
    UnusedFlags,
    #[error("hashes left unused")]
    UnusedHashes,
    #[error("identical left and right subtrees")]
    DuplicateSubtree,
}

/// A merkle block: header plus partial merkle tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlock {
    pub header: Vec<u8>,
    pub tree: PartialMerkleTree,
}

impl MerkleBlock {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + 4 + 9 + self.tree.hashes.len() * 32 + 9);
        out.extend_from_slice(&self.header);
        self.tree.encode_into(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let header = reader.read_bytes(HEADER_SIZE)?.to_vec();
        let tree = PartialMerkleTree::decode_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }
        Ok(Self { header, tree })
    }
}

/// Serialized merkle block for `block`, proving the transactions flagged in
/// `matches` (indexed like `block.transactions`).
pub fn merkle_block(block: &Block, matches: &[bool]) -> Vec<u8> {
    MerkleBlock {
        header: block.header.clone(),
        tree: PartialMerkleTree::build(&block.txids(), matches),
    }
    .to_bytes()
}
