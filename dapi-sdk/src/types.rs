//! Common types used throughout the SDK

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// 32-byte hash (block hash, transaction id).
///
/// Held in the node's internal byte order; hex strings and the hash bytes of
/// the Core API use the reversed display order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from display-order hex (64 characters).
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex)?;
        Self::from_display_bytes(&bytes)
    }

    /// Create from display-order bytes, as the Core API returns them.
    pub fn from_display_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut arr: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidArgument(format!("Hash must be 32 bytes, got {}", bytes.len()))
        })?;
        arr.reverse();
        Ok(Self(arr))
    }

    /// Export to bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Bytes in display order.
    pub fn to_display_bytes(&self) -> Vec<u8> {
        let mut bytes = self.0.to_vec();
        bytes.reverse();
        bytes
    }

    /// Export as display-order hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_display_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<dapi_grpc::chain::Hash256> for Hash {
    fn from(hash: dapi_grpc::chain::Hash256) -> Self {
        Self(hash.0)
    }
}

impl From<Hash> for dapi_grpc::chain::Hash256 {
    fn from(hash: Hash) -> Self {
        dapi_grpc::chain::Hash256(hash.0)
    }
}

/// 32-byte Platform identifier, written in base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Identifier(pub [u8; 32]);

impl Identifier {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidArgument(format!("Identifier must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn from_base58(encoded: &str) -> Result<Self, Error> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| Error::InvalidArgument(format!("invalid base58 identifier: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_base58())
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl From<dapi_grpc::backend::Identifier> for Identifier {
    fn from(id: dapi_grpc::backend::Identifier) -> Self {
        Self(id.0)
    }
}

impl From<Identifier> for dapi_grpc::backend::Identifier {
    fn from(id: Identifier) -> Self {
        dapi_grpc::backend::Identifier(id.0)
    }
}

/// Hash160 of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PublicKeyHash(pub [u8; 20]);

impl PublicKeyHash {
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex)?;
        let arr: [u8; 20] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidArgument(format!(
                "Public key hash must be 20 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyHash({})", self.to_hex())
    }
}

impl FromStr for PublicKeyHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_is_display_order() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = Hash::from_bytes(bytes);
        assert!(hash.to_hex().ends_with("ab"));
        assert_eq!(Hash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert_eq!(hash.to_display_bytes()[31], 0xab);
    }

    #[test]
    fn identifier_base58() {
        let id = Identifier::from_bytes([42u8; 32]);
        assert_eq!(id.to_base58().parse::<Identifier>().unwrap(), id);
        assert!(Identifier::from_base58("0OIl").is_err());
        assert!(Identifier::from_slice(&[1u8; 31]).is_err());
    }

    #[test]
    fn invalid_lengths() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(PublicKeyHash::from_hex("abcd").is_err());
        assert!(PublicKeyHash::from_hex(&"11".repeat(20)).is_ok());
    }
}
