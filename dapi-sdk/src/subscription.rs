//! Subscription client for the Core event streams.

use std::pin::Pin;

use dapi_grpc::proto::v0::core_client::CoreClient as GrpcCoreClient;
use dapi_grpc::proto::v0::{
    self, BlockHeadersWithChainLocksRequest, TransactionsWithProofsRequest,
    block_headers_with_chain_locks_request, block_headers_with_chain_locks_response,
    transactions_with_proofs_request, transactions_with_proofs_response,
};
use tokio_stream::{Stream, StreamExt};
use tonic::transport::Channel;

use crate::error::{Error, Result};
use crate::types::Hash;

/// A subscription. Dropping it cancels the subscription on the server.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Block a subscription starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    Height(u32),
    Hash(Hash),
}

impl From<StartFrom> for block_headers_with_chain_locks_request::FromBlock {
    fn from(start: StartFrom) -> Self {
        match start {
            StartFrom::Height(height) => Self::FromBlockHeight(height),
            StartFrom::Hash(hash) => Self::FromBlockHash(hash.to_display_bytes()),
        }
    }
}

impl From<StartFrom> for transactions_with_proofs_request::FromBlock {
    fn from(start: StartFrom) -> Self {
        match start {
            StartFrom::Height(height) => Self::FromBlockHeight(height),
            StartFrom::Hash(hash) => Self::FromBlockHash(hash.to_display_bytes()),
        }
    }
}

/// Bloom filter parameters as sent to the server (BIP37 layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilterParams {
    pub data: Vec<u8>,
    pub hash_funcs: u32,
    pub tweak: u32,
    pub flags: u32,
}

impl From<BloomFilterParams> for v0::BloomFilter {
    fn from(params: BloomFilterParams) -> Self {
        v0::BloomFilter {
            v_data: params.data,
            n_hash_funcs: params.hash_funcs,
            n_tweak: params.tweak,
            n_flags: params.flags,
        }
    }
}

/// One message of a header subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEvent {
    /// Consecutive serialized block headers
    Headers(Vec<Vec<u8>>),
    /// A serialized chain lock
    ChainLock(Vec<u8>),
}

/// One message of a transaction subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    Transactions(Vec<Vec<u8>>),
    InstantLocks(Vec<Vec<u8>>),
    MerkleBlock(Vec<u8>),
}

fn header_event(message: v0::BlockHeadersWithChainLocksResponse) -> Result<HeaderEvent> {
    use block_headers_with_chain_locks_response::Responses;
    match message.responses {
        Some(Responses::BlockHeaders(headers)) => Ok(HeaderEvent::Headers(headers.headers)),
        Some(Responses::ChainLock(lock)) => Ok(HeaderEvent::ChainLock(lock)),
        None => Err(Error::UnexpectedResponse("empty header message".into())),
    }
}

fn transaction_event(message: v0::TransactionsWithProofsResponse) -> Result<TransactionEvent> {
    use transactions_with_proofs_response::Responses;
    match message.responses {
        Some(Responses::RawTransactions(txs)) => Ok(TransactionEvent::Transactions(txs.transactions)),
        Some(Responses::InstantSendLockMessages(locks)) => {
            Ok(TransactionEvent::InstantLocks(locks.messages))
        }
        Some(Responses::RawMerkleBlock(block)) => Ok(TransactionEvent::MerkleBlock(block)),
        None => Err(Error::UnexpectedResponse("empty transaction message".into())),
    }
}

/// Client for subscription operations.
#[derive(Clone)]
pub struct SubscriptionClient {
    client: GrpcCoreClient<Channel>,
}

impl SubscriptionClient {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            client: GrpcCoreClient::new(channel),
        }
    }

    /// Subscribe to block headers and chain locks.
    ///
    /// With `count == 0` the stream continues with new blocks after history;
    /// otherwise it ends after `count` headers.
    pub async fn block_headers(
        &mut self,
        from: StartFrom,
        count: u32,
    ) -> Result<EventStream<HeaderEvent>> {
        let request = BlockHeadersWithChainLocksRequest {
            from_block: Some(from.into()),
            count,
        };
        let stream = self
            .client
            .subscribe_to_block_headers_with_chain_locks(request)
            .await?
            .into_inner();
        Ok(Box::pin(stream.map(|item| header_event(item?))))
    }

    /// Subscribe to transactions matching `bloom_filter` (all when `None`).
    ///
    /// Without `from`, only transactions from now on are delivered.
    pub async fn transactions(
        &mut self,
        bloom_filter: Option<BloomFilterParams>,
        from: Option<StartFrom>,
        count: u32,
    ) -> Result<EventStream<TransactionEvent>> {
        let request = TransactionsWithProofsRequest {
            bloom_filter: bloom_filter.map(Into::into),
            from_block: from.map(Into::into),
            count,
            send_transaction_hashes: false,
        };
        let stream = self
            .client
            .subscribe_to_transactions_with_proofs(request)
            .await?
            .into_inner();
        Ok(Box::pin(stream.map(|item| transaction_event(item?))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_hash_goes_in_display_order() {
        let mut bytes = [0u8; 32];
        bytes[0] = 7;
        let from: block_headers_with_chain_locks_request::FromBlock =
            StartFrom::Hash(Hash::from_bytes(bytes)).into();
        match from {
            block_headers_with_chain_locks_request::FromBlock::FromBlockHash(wire) => {
                assert_eq!(wire[31], 7)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_messages_are_errors() {
        assert!(header_event(v0::BlockHeadersWithChainLocksResponse { responses: None }).is_err());
        assert!(transaction_event(v0::TransactionsWithProofsResponse { responses: None }).is_err());
    }
}
