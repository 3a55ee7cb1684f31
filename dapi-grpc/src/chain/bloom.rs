//! BIP37 bloom filters as sent by SPV clients.

use thiserror::Error;

use super::Hash256;
use super::transaction::{OutPoint, Transaction, is_pay_to_pubkey_or_multisig, script_pushes};

/// Largest filter a peer may load, in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;

/// Largest number of hash functions a peer may request.
pub const MAX_HASH_FUNCS: u32 = 50;

const LN2_SQUARED: f64 = std::f64::consts::LN_2 * std::f64::consts::LN_2;

/// How a filter grows when an output matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BloomFlags {
    #[default]
    None,
    All,
    P2PubkeyOnly,
}

impl BloomFlags {
    /// Only the low two bits are significant; unknown values act like `None`.
    pub fn from_u32(value: u32) -> Self {
        match value & 0x03 {
            1 => BloomFlags::All,
            2 => BloomFlags::P2PubkeyOnly,
            _ => BloomFlags::None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            BloomFlags::None => 0,
            BloomFlags::All => 1,
            BloomFlags::P2PubkeyOnly => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BloomError {
    #[error("bloom filter data cannot be empty")]
    EmptyData,
    #[error("bloom filter is {0} bytes, maximum is {MAX_BLOOM_FILTER_SIZE}")]
    TooLarge(usize),
    #[error("number of hash functions must be greater than 0")]
    NoHashFuncs,
    #[error("{0} hash functions requested, maximum is {MAX_HASH_FUNCS}")]
    TooManyHashFuncs(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: BloomFlags,
}

impl BloomFilter {
    /// Size a filter for `elements` insertions at the given false-positive rate.
    pub fn new(elements: usize, fp_rate: f64, tweak: u32, flags: BloomFlags) -> Self {
        let elements = elements.max(1) as f64;
        let bits = (-1.0 / LN2_SQUARED * elements * fp_rate.ln())
            .min((MAX_BLOOM_FILTER_SIZE * 8) as f64) as usize;
        let len = (bits / 8).max(1);
        let hash_funcs = ((len * 8) as f64 / elements * std::f64::consts::LN_2)
            .min(MAX_HASH_FUNCS as f64) as u32;
        Self {
            data: vec![0u8; len],
            hash_funcs: hash_funcs.max(1),
            tweak,
            flags,
        }
    }

    /// Rebuild a filter received over the wire, enforcing the BIP37 limits.
    pub fn from_parts(
        data: Vec<u8>,
        hash_funcs: u32,
        tweak: u32,
        flags: u32,
    ) -> Result<Self, BloomError> {
        if data.is_empty() {
            return Err(BloomError::EmptyData);
        }
        if data.len() > MAX_BLOOM_FILTER_SIZE {
            return Err(BloomError::TooLarge(data.len()));
        }
        if hash_funcs == 0 {
            return Err(BloomError::NoHashFuncs);
        }
        if hash_funcs > MAX_HASH_FUNCS {
            return Err(BloomError::TooManyHashFuncs(hash_funcs));
        }
        Ok(Self {
            data,
            hash_funcs,
            tweak,
            flags: BloomFlags::from_u32(flags),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn flags(&self) -> BloomFlags {
        self.flags
    }

    pub fn is_full(&self) -> bool {
        self.data.iter().all(|b| *b == 0xff)
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    fn bit_index(&self, n: u32, key: &[u8]) -> usize {
        let seed = n.wrapping_mul(0xfba4_c795).wrapping_add(self.tweak);
        murmur3_32(seed, key) as usize % (self.data.len() * 8)
    }

    pub fn insert(&mut self, key: &[u8]) {
        for n in 0..self.hash_funcs {
            let bit = self.bit_index(n, key);
            self.data[bit >> 3] |= 1 << (bit & 7);
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if self.is_full() {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        (0..self.hash_funcs).all(|n| {
            let bit = self.bit_index(n, key);
            self.data[bit >> 3] & (1 << (bit & 7)) != 0
        })
    }

    pub fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.contains(&outpoint.to_bytes())
    }

    /// BIP37 relevance test. Matching outputs may insert their outpoint so
    /// later spends of them match too.
    pub fn matches_transaction(&mut self, tx: &Transaction) -> bool {
        if self.is_full() {
            return true;
        }
        if self.is_empty() {
            return false;
        }

        let txid = tx.txid();
        self.matches_with_txid(tx, &txid)
    }

    fn matches_with_txid(&mut self, tx: &Transaction, txid: &Hash256) -> bool {
        let mut found = self.contains(txid.as_bytes());

        for (vout, output) in tx.outputs.iter().enumerate() {
            let hit = script_pushes(&output.script_pubkey)
                .into_iter()
                .any(|data| !data.is_empty() && self.contains(data));
            if !hit {
                continue;
            }
            found = true;
            let track = match self.flags {
                BloomFlags::All => true,
                BloomFlags::P2PubkeyOnly => is_pay_to_pubkey_or_multisig(&output.script_pubkey),
                BloomFlags::None => false,
            };
            if track {
                let outpoint = OutPoint {
                    txid: *txid,
                    vout: vout as u32,
                };
                self.insert(&outpoint.to_bytes());
            }
        }
        if found {
            return true;
        }

        tx.inputs.iter().any(|input| {
            self.contains_outpoint(&input.previous_output)
                || script_pushes(&input.script_sig)
                    .into_iter()
                    .any(|data| !data.is_empty() && self.contains(data))
        })
    }
}

/// MurmurHash3 x86 32-bit.
pub fn murmur3_32(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k1 ^= (*byte as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}
