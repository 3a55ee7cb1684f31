//! Chain primitives shared by the Core facade, its backends and the streams.
//!
//! Hashes are kept in internal (wire) byte order. Hex strings follow the
//! Dash Core RPC convention of displaying hashes byte-reversed.

pub mod bloom;
pub mod encode;
pub mod merkle;
pub mod transaction;

use std::fmt;

use sha2::{Digest, Sha256};

pub use encode::DecodeError;
use encode::{Reader, write_compact_size};

/// Size of a serialized block header.
pub const HEADER_SIZE: usize = 80;

/// Size of a BLS signature carried in chain locks and instant-send locks.
pub const BLS_SIGNATURE_SIZE: usize = 96;

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256(second.into())
}

/// 32-byte hash in internal byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a slice in internal byte order.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| DecodeError::InvalidLength {
            expected: 32,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Parse a display-order (byte-reversed) hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, DecodeError> {
        let mut bytes = hex::decode(hex_str)?;
        bytes.reverse();
        Self::from_slice(&bytes)
    }

    /// Display-order (byte-reversed) hex string.
    pub fn to_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

/// Fields of an 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.prev_block_hash.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.bits.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != HEADER_SIZE {
            return Err(DecodeError::InvalidLength {
                expected: HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let mut reader = Reader::new(bytes);
        Ok(Self {
            version: reader.read_u32_le()? as i32,
            prev_block_hash: Hash256(reader.read_array()?),
            merkle_root: Hash256(reader.read_array()?),
            time: reader.read_u32_le()?,
            bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
        })
    }
}

/// A block as handed out by a Core backend.
///
/// The hash is carried explicitly because Dash block hashes are X11 digests
/// computed by the node, not something this crate derives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u32,
    pub hash: Hash256,
    pub header: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
}

impl Block {
    /// Split a serialized block into header and transactions.
    pub fn from_raw(height: u32, hash: Hash256, raw: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(raw);
        let header = reader.read_bytes(HEADER_SIZE)?.to_vec();
        let tx_count = reader.read_compact_size()?;
        let mut transactions = Vec::new();
        for _ in 0..tx_count {
            let start = reader.position();
            transaction::skip(&mut reader)?;
            transactions.push(raw[start..reader.position()].to_vec());
        }
        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }
        Ok(Self {
            height,
            hash,
            header,
            transactions,
        })
    }

    /// Serialize as header, transaction count and transactions.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body: usize = self.transactions.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(HEADER_SIZE + 9 + body);
        out.extend_from_slice(&self.header);
        write_compact_size(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            out.extend_from_slice(tx);
        }
        out
    }

    pub fn txids(&self) -> Vec<Hash256> {
        self.transactions.iter().map(|tx| sha256d(tx)).collect()
    }

    pub fn parsed_header(&self) -> Result<BlockHeader, DecodeError> {
        BlockHeader::from_bytes(&self.header)
    }
}

/// A chain lock (CLSig) message.
#[derive(Clone, PartialEq, Eq)]
pub struct ChainLock {
    pub height: u32,
    pub block_hash: Hash256,
    pub signature: [u8; BLS_SIGNATURE_SIZE],
}

impl ChainLock {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 32 + BLS_SIGNATURE_SIZE);
        out.extend_from_slice(&(self.height as i32).to_le_bytes());
        out.extend_from_slice(self.block_hash.as_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let height = reader.read_u32_le()?;
        let block_hash = Hash256(reader.read_array()?);
        let signature = reader.read_array()?;
        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }
        Ok(Self {
            height,
            block_hash,
            signature,
        })
    }
}

impl fmt::Debug for ChainLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLock")
            .field("height", &self.height)
            .field("block_hash", &self.block_hash)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::transaction::{OutPoint, Transaction, TxIn, TxOut};

    fn coinbase(tag: u8) -> Vec<u8> {
        Transaction {
            version: 3,
            tx_type: 0,
            inputs: vec![TxIn {
                previous_output: OutPoint::NULL,
                script_sig: vec![tag],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 5_000,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
            extra_payload: None,
        }
        .encode()
    }

    #[test]
    fn sha256d_of_empty_input() {
        assert_eq!(
            hex::encode(sha256d(b"").0),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn hash_hex_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = Hash256(bytes);
        let hex = hash.to_hex();
        assert!(hex.ends_with("ab"));
        assert_eq!(Hash256::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn hash_rejects_wrong_length() {
        assert!(matches!(
            Hash256::from_hex("abcd"),
            Err(DecodeError::InvalidLength { expected: 32, got: 2 })
        ));
        assert!(matches!(
            Hash256::from_hex("zz"),
            Err(DecodeError::InvalidHex(_))
        ));
    }

    #[test]
    fn header_field_layout() {
        let header = BlockHeader {
            version: 0x2000_0000,
            prev_block_hash: Hash256([1u8; 32]),
            merkle_root: Hash256([2u8; 32]),
            time: 1_700_000_000,
            bits: 0x1e0f_fff0,
            nonce: 42,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[4..36], &[1u8; 32]);
        assert_eq!(BlockHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn block_raw_split_matches_serialization() {
        let txs = vec![coinbase(1), coinbase(2), coinbase(3)];
        let header = BlockHeader {
            version: 1,
            prev_block_hash: Hash256::ZERO,
            merkle_root: merkle::merkle_root(&txs.iter().map(|t| sha256d(t)).collect::<Vec<_>>()),
            time: 0,
            bits: 0,
            nonce: 0,
        };
        let block = Block {
            height: 7,
            hash: Hash256([9u8; 32]),
            header: header.to_bytes(),
            transactions: txs,
        };

        let parsed = Block::from_raw(7, block.hash, &block.to_bytes()).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn block_raw_rejects_trailing_bytes() {
        let block = Block {
            height: 1,
            hash: Hash256::ZERO,
            header: vec![0u8; HEADER_SIZE],
            transactions: vec![coinbase(1)],
        };
        let mut raw = block.to_bytes();
        raw.push(0);
        assert_eq!(
            Block::from_raw(1, Hash256::ZERO, &raw),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn chain_lock_layout() {
        let lock = ChainLock {
            height: 1000,
            block_hash: Hash256([3u8; 32]),
            signature: [7u8; BLS_SIGNATURE_SIZE],
        };
        let bytes = lock.to_bytes();
        assert_eq!(bytes.len(), 132);
        assert_eq!(&bytes[..4], &1000i32.to_le_bytes());
        assert_eq!(ChainLock::from_bytes(&bytes).unwrap(), lock);
    }
}
