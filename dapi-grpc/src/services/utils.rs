//! Shared request parsing and response mapping for the gRPC services.

use std::future::Future;
use std::time::Duration;

use tonic::Status;

use crate::backend::{Identifier, ProofData, PublicKeyHash, ResponseMeta};
use crate::chain::Hash256;
use crate::proto::v0;

/// Run a unary handler, answering `DeadlineExceeded` once `timeout` elapses.
pub async fn bounded<T, E>(
    timeout: Duration,
    handler: impl Future<Output = Result<T, E>>,
) -> Result<T, Status>
where
    E: Into<Status>,
{
    tokio::time::timeout(timeout, handler)
        .await
        .map_err(|_| {
            Status::deadline_exceeded(format!("Request timed out after {}s", timeout.as_secs()))
        })?
        .map_err(Into::into)
}

/// Parse a display-order hex hash string.
pub fn parse_hash(hex_str: &str) -> Result<Hash256, Status> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| Status::invalid_argument(format!("Invalid hex hash: {}", e)))?;

    if bytes.len() != 32 {
        return Err(Status::invalid_argument(format!(
            "Hash must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    arr.reverse();
    Ok(Hash256(arr))
}

/// Hash bytes in display order, the order clients send them back in.
pub fn display_bytes(hash: &Hash256) -> Vec<u8> {
    let mut bytes = hash.to_vec();
    bytes.reverse();
    bytes
}

/// Parse a 32-byte identifier sent as raw bytes.
pub fn parse_identifier(bytes: &[u8], field: &str) -> Result<Identifier, Status> {
    if bytes.is_empty() {
        return Err(Status::invalid_argument(format!("{} is not specified", field)));
    }
    Identifier::from_slice(bytes).map_err(|_| {
        Status::invalid_argument(format!("{} must be 32 bytes, got {}", field, bytes.len()))
    })
}

/// Parse a base58 identifier from the legacy schema.
pub fn parse_base58_identifier(encoded: &str, field: &str) -> Result<Identifier, Status> {
    if encoded.is_empty() {
        return Err(Status::invalid_argument(format!("{} is not specified", field)));
    }
    Identifier::from_base58(encoded)
        .ok_or_else(|| Status::invalid_argument(format!("{} is not a valid identifier", field)))
}

pub fn parse_public_key_hash(bytes: &[u8]) -> Result<PublicKeyHash, Status> {
    bytes.try_into().map_err(|_| {
        Status::invalid_argument(format!(
            "public key hash must be 20 bytes, got {}",
            bytes.len()
        ))
    })
}

pub fn parse_public_key_hashes(hashes: &[Vec<u8>]) -> Result<Vec<PublicKeyHash>, Status> {
    if hashes.is_empty() {
        return Err(Status::invalid_argument("public key hashes are not specified"));
    }
    hashes.iter().map(|h| parse_public_key_hash(h)).collect()
}

impl From<ProofData> for v0::Proof {
    fn from(proof: ProofData) -> Self {
        v0::Proof {
            grovedb_proof: proof.grovedb_proof,
            quorum_hash: proof.quorum_hash,
            signature: proof.signature,
            round: proof.round,
        }
    }
}

impl From<ResponseMeta> for v0::ResponseMetadata {
    fn from(meta: ResponseMeta) -> Self {
        v0::ResponseMetadata {
            height: meta.height,
            core_chain_locked_height: meta.core_chain_locked_height,
            time_ms: meta.time_ms,
            protocol_version: meta.protocol_version,
        }
    }
}
