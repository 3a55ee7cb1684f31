//! Dash transaction layout, decoded only as deep as bloom matching needs.
//!
//! The 32-bit version field is split into a 16-bit version and a 16-bit
//! special transaction type (DIP-2). Special transactions of version 3 or
//! later carry a length-prefixed extra payload after the lock time.

use super::encode::{DecodeError, Reader, write_compact_size};
use super::{Hash256, sha256d};

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint used by coinbase inputs.
    pub const NULL: OutPoint = OutPoint {
        txid: Hash256::ZERO,
        vout: u32::MAX,
    };

    /// Serialized form (txid ‖ vout LE) as inserted into bloom filters.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(self.txid.as_bytes());
        out[32..].copy_from_slice(&self.vout.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u16,
    pub tx_type: u16,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub extra_payload: Option<Vec<u8>>,
}

impl Transaction {
    /// Decode a transaction that must span the whole input.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let tx = Self::decode_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }
        Ok(tx)
    }

    pub fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let version = reader.read_u16_le()?;
        let tx_type = reader.read_u16_le()?;

        let input_count = reader.read_compact_size()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let txid = Hash256(reader.read_array()?);
            let vout = reader.read_u32_le()?;
            let script_sig = reader.read_var_bytes()?.to_vec();
            let sequence = reader.read_u32_le()?;
            inputs.push(TxIn {
                previous_output: OutPoint { txid, vout },
                script_sig,
                sequence,
            });
        }

        let output_count = reader.read_compact_size()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            let value = reader.read_u64_le()?;
            let script_pubkey = reader.read_var_bytes()?.to_vec();
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        let lock_time = reader.read_u32_le()?;
        let extra_payload = if has_extra_payload(version, tx_type) {
            Some(reader.read_var_bytes()?.to_vec())
        } else {
            None
        };

        Ok(Self {
            version,
            tx_type,
            inputs,
            outputs,
            lock_time,
            extra_payload,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.tx_type.to_le_bytes());

        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.previous_output.to_bytes());
            write_compact_size(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_compact_size(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }

        out.extend_from_slice(&self.lock_time.to_le_bytes());
        if has_extra_payload(self.version, self.tx_type) {
            let payload = self.extra_payload.as_deref().unwrap_or_default();
            write_compact_size(&mut out, payload.len() as u64);
            out.extend_from_slice(payload);
        }
        out
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.encode())
    }
}

fn has_extra_payload(version: u16, tx_type: u16) -> bool {
    version >= 3 && tx_type != 0
}

/// Advance `reader` past one transaction.
pub fn skip(reader: &mut Reader<'_>) -> Result<(), DecodeError> {
    Transaction::decode_from(reader).map(|_| ())
}

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKMULTISIG: u8 = 0xae;

/// Data pushes of a script, stopping silently at the first malformed opcode.
pub fn script_pushes(script: &[u8]) -> Vec<&[u8]> {
    let mut pushes = Vec::new();
    let mut reader = Reader::new(script);
    while let Ok(opcode) = reader.read_u8() {
        let len = match opcode {
            0x01..=0x4b => Ok(opcode as usize),
            OP_PUSHDATA1 => reader.read_u8().map(|n| n as usize),
            OP_PUSHDATA2 => reader.read_u16_le().map(|n| n as usize),
            OP_PUSHDATA4 => reader.read_u32_le().map(|n| n as usize),
            _ => continue,
        };
        match len.and_then(|len| reader.read_bytes(len)) {
            Ok(data) => pushes.push(data),
            Err(_) => break,
        }
    }
    pushes
}

/// Standard pay-to-pubkey-hash output script.
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// Whether the script pays to a bare public key or a bare multisig, the two
/// forms BIP37's `UPDATE_P2PUBKEY_ONLY` keeps tracking.
pub fn is_pay_to_pubkey_or_multisig(script: &[u8]) -> bool {
    let pay_to_pubkey = matches!(script.len(), 35 | 67)
        && script[0] as usize == script.len() - 2
        && script[script.len() - 1] == OP_CHECKSIG;
    let bare_multisig = script.len() >= 3
        && (0x51..=0x60).contains(&script[0])
        && script[script.len() - 1] == OP_CHECKMULTISIG;
    pay_to_pubkey || bare_multisig
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            version: 2,
            tx_type: 0,
            inputs: vec![TxIn {
                previous_output: OutPoint {
                    txid: Hash256([4u8; 32]),
                    vout: 1,
                },
                script_sig: vec![0x02, 0xaa, 0xbb],
                sequence: 0xffff_fffe,
            }],
            outputs: vec![
                TxOut {
                    value: 1_000,
                    script_pubkey: p2pkh_script(&[9u8; 20]),
                },
                TxOut {
                    value: 2_000,
                    script_pubkey: vec![0x6a],
                },
            ],
            lock_time: 100,
            extra_payload: None,
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let tx = sample();
        assert_eq!(Transaction::decode(&tx.encode()).unwrap(), tx);
    }

    #[test]
    fn special_transaction_carries_payload() {
        let mut tx = sample();
        tx.version = 3;
        tx.tx_type = 5;
        tx.extra_payload = Some(vec![1, 2, 3, 4]);
        let bytes = tx.encode();
        assert_eq!(&bytes[..4], &[3, 0, 5, 0]);
        assert_eq!(&bytes[bytes.len() - 5..], &[4, 1, 2, 3, 4]);
        assert_eq!(Transaction::decode(&bytes).unwrap(), tx);
    }

    #[test]
    fn version_two_special_type_has_no_payload() {
        let mut tx = sample();
        tx.tx_type = 5;
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded.extra_payload, None);
    }

    #[test]
    fn truncated_transaction_is_rejected() {
        let bytes = sample().encode();
        assert!(Transaction::decode(&bytes[..bytes.len() - 1]).is_err());
        assert!(Transaction::decode(&[]).is_err());
    }

    #[test]
    fn txid_is_double_sha_of_encoding() {
        let tx = sample();
        assert_eq!(tx.txid(), sha256d(&tx.encode()));
    }

    #[test]
    fn pushes_of_p2pkh_script() {
        let script = p2pkh_script(&[7u8; 20]);
        let pushes = script_pushes(&script);
        assert_eq!(pushes, vec![&[7u8; 20][..]]);
    }

    #[test]
    fn pushdata_opcodes() {
        let mut script = vec![OP_PUSHDATA1, 3, 1, 2, 3, OP_DUP, OP_PUSHDATA2, 2, 0, 8, 9];
        assert_eq!(script_pushes(&script), vec![&[1u8, 2, 3][..], &[8u8, 9][..]]);

        // Truncated push terminates the scan
        script.extend_from_slice(&[0x05, 1]);
        assert_eq!(script_pushes(&script).len(), 2);
    }

    #[test]
    fn pay_to_pubkey_detection() {
        let mut p2pk = vec![33];
        p2pk.extend_from_slice(&[2u8; 33]);
        p2pk.push(OP_CHECKSIG);
        assert!(is_pay_to_pubkey_or_multisig(&p2pk));
        assert!(!is_pay_to_pubkey_or_multisig(&p2pkh_script(&[0u8; 20])));
    }
}
