//! E2E integration tests for the Core subscriptions.

mod test_helpers;

use std::time::Duration;

use dapi_grpc::DapiConfig;
use dapi_grpc::chain::bloom::{BloomFilter, BloomFlags};
use dapi_grpc::chain::merkle::MerkleBlock;
use dapi_grpc::chain::{ChainLock, sha256d};
use dapi_grpc::proto::v0::{
    self, BlockHeadersWithChainLocksRequest, BlockHeadersWithChainLocksResponse,
    BroadcastTransactionRequest, TransactionsWithProofsRequest, TransactionsWithProofsResponse,
    block_headers_with_chain_locks_request, block_headers_with_chain_locks_response,
    transactions_with_proofs_request, transactions_with_proofs_response,
};
use test_helpers::{TestServer, payment, spawn_test_server, spawn_test_server_with};
use tokio_stream::StreamExt;
use tonic::{Code, Streaming};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn headers_from(height: u32, count: u32) -> BlockHeadersWithChainLocksRequest {
    BlockHeadersWithChainLocksRequest {
        from_block: Some(
            block_headers_with_chain_locks_request::FromBlock::FromBlockHeight(height),
        ),
        count,
    }
}

fn bloom_for(pubkey_hash: &[u8; 20]) -> v0::BloomFilter {
    let mut bloom = BloomFilter::new(10, 0.0001, 0, BloomFlags::None);
    bloom.insert(pubkey_hash);
    v0::BloomFilter {
        v_data: bloom.data().to_vec(),
        n_hash_funcs: bloom.hash_funcs(),
        n_tweak: bloom.tweak(),
        n_flags: bloom.flags().as_u32(),
    }
}

async fn next<T>(stream: &mut Streaming<T>) -> T {
    tokio::time::timeout(RECV_TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for a stream message")
        .expect("stream ended early")
        .expect("stream failed")
}

async fn expect_end<T: std::fmt::Debug>(stream: &mut Streaming<T>) {
    let end = tokio::time::timeout(RECV_TIMEOUT, stream.next())
        .await
        .expect("timed out waiting for the stream to end");
    assert!(end.is_none(), "expected end of stream, got {end:?}");
}

fn headers_of(message: BlockHeadersWithChainLocksResponse) -> Vec<Vec<u8>> {
    match message.responses {
        Some(block_headers_with_chain_locks_response::Responses::BlockHeaders(headers)) => {
            headers.headers
        }
        other => panic!("expected headers, got {other:?}"),
    }
}

fn chain_lock_of(message: BlockHeadersWithChainLocksResponse) -> ChainLock {
    match message.responses {
        Some(block_headers_with_chain_locks_response::Responses::ChainLock(bytes)) => {
            ChainLock::from_bytes(&bytes).unwrap()
        }
        other => panic!("expected chain lock, got {other:?}"),
    }
}

fn transactions_of(message: TransactionsWithProofsResponse) -> Vec<Vec<u8>> {
    match message.responses {
        Some(transactions_with_proofs_response::Responses::RawTransactions(txs)) => {
            txs.transactions
        }
        other => panic!("expected transactions, got {other:?}"),
    }
}

fn merkle_block_of(message: TransactionsWithProofsResponse) -> MerkleBlock {
    match message.responses {
        Some(transactions_with_proofs_response::Responses::RawMerkleBlock(bytes)) => {
            MerkleBlock::from_bytes(&bytes).unwrap()
        }
        other => panic!("expected merkle block, got {other:?}"),
    }
}

async fn broadcast(server: &TestServer, raw: &[u8]) {
    let mut client = server.core_client().await.unwrap();
    client
        .broadcast_transaction(BroadcastTransactionRequest {
            transaction: raw.to_vec(),
            ..Default::default()
        })
        .await
        .unwrap();
}

/// Test a bounded header subscription delivers history and ends.
#[tokio::test]
async fn historical_headers() {
    let server = spawn_test_server().await;
    let mined = server.core.mine_blocks(5);
    let mut client = server.core_client().await.unwrap();

    let mut stream = client
        .subscribe_to_block_headers_with_chain_locks(headers_from(2, 3))
        .await
        .unwrap()
        .into_inner();

    let headers = headers_of(next(&mut stream).await);
    let expected: Vec<Vec<u8>> = mined[1..4].iter().map(|b| b.header.clone()).collect();
    assert_eq!(headers, expected);
    expect_end(&mut stream).await;
}

/// Test that history is split into batches of the configured size.
#[tokio::test]
async fn historical_headers_batched() {
    let mut config = DapiConfig::default();
    config.streaming.header_batch_size = 2;
    let server = spawn_test_server_with(config).await;
    server.core.mine_blocks(5);
    let mut client = server.core_client().await.unwrap();

    let mut stream = client
        .subscribe_to_block_headers_with_chain_locks(headers_from(1, 5))
        .await
        .unwrap()
        .into_inner();

    let mut sizes = Vec::new();
    for _ in 0..3 {
        sizes.push(headers_of(next(&mut stream).await).len());
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    expect_end(&mut stream).await;
}

/// Test the header subscription argument checks.
#[tokio::test]
async fn header_subscription_validation() {
    let server = spawn_test_server().await;
    server.core.mine_blocks(3);
    let mut client = server.core_client().await.unwrap();

    let status = client
        .subscribe_to_block_headers_with_chain_locks(headers_from(2, 10))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(
        status.message(),
        "count is too big, could not fetch more than 2 blocks"
    );

    let status = client
        .subscribe_to_block_headers_with_chain_locks(headers_from(0, 1))
        .await
        .unwrap_err();
    assert_eq!(status.message(), "Minimum value for fromBlockHeight is 1");

    let status = client
        .subscribe_to_block_headers_with_chain_locks(BlockHeadersWithChainLocksRequest {
            from_block: None,
            count: 0,
        })
        .await
        .unwrap_err();
    assert_eq!(
        status.message(),
        "Must specify from_block_hash or from_block_height"
    );

    let status = client
        .subscribe_to_block_headers_with_chain_locks(BlockHeadersWithChainLocksRequest {
            from_block: Some(
                block_headers_with_chain_locks_request::FromBlock::FromBlockHash(vec![9u8; 32]),
            ),
            count: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

/// Test a live header subscription: history, best chain lock, then new blocks
/// and chain locks as they happen.
#[tokio::test]
async fn live_headers_and_chain_locks() {
    let server = spawn_test_server().await;
    let mined = server.core.mine_blocks(2);
    server.core.chain_lock(2).unwrap();
    let mut client = server.core_client().await.unwrap();

    let mut hash = mined[0].hash.to_vec();
    hash.reverse();
    let mut stream = client
        .subscribe_to_block_headers_with_chain_locks(BlockHeadersWithChainLocksRequest {
            from_block: Some(block_headers_with_chain_locks_request::FromBlock::FromBlockHash(
                hash,
            )),
            count: 0,
        })
        .await
        .unwrap()
        .into_inner();

    let headers = headers_of(next(&mut stream).await);
    assert_eq!(headers, vec![mined[0].header.clone(), mined[1].header.clone()]);
    assert_eq!(chain_lock_of(next(&mut stream).await).height, 2);

    let block = server.core.mine_block();
    assert_eq!(headers_of(next(&mut stream).await), vec![block.header.clone()]);

    // A lock at or below the last one sent is not repeated
    server.core.chain_lock(1).unwrap();
    server.core.chain_lock(3).unwrap();
    let lock = chain_lock_of(next(&mut stream).await);
    assert_eq!(lock.height, 3);
    assert_eq!(lock.block_hash, block.hash);
}

/// Test a bounded transaction subscription filtered by a bloom filter.
#[tokio::test]
async fn historical_transactions_with_bloom_filter() {
    let server = spawn_test_server().await;
    let wanted = payment(1, [7u8; 20]);
    let other = payment(2, [8u8; 20]);
    broadcast(&server, &wanted).await;
    broadcast(&server, &other).await;
    let block = server.core.mine_block();
    let mut client = server.core_client().await.unwrap();

    let mut stream = client
        .subscribe_to_transactions_with_proofs(TransactionsWithProofsRequest {
            bloom_filter: Some(bloom_for(&[7u8; 20])),
            from_block: Some(transactions_with_proofs_request::FromBlock::FromBlockHeight(1)),
            count: 1,
            send_transaction_hashes: false,
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(transactions_of(next(&mut stream).await), vec![wanted.clone()]);
    let merkle = merkle_block_of(next(&mut stream).await);
    assert_eq!(merkle.header, block.header);
    let (root, matched) = merkle.tree.extract_matches().unwrap();
    assert_eq!(root, block.parsed_header().unwrap().merkle_root);
    assert_eq!(matched, vec![sha256d(&wanted)]);
    expect_end(&mut stream).await;
}

/// Test that blocks without matches still produce a merkle block.
#[tokio::test]
async fn unmatched_blocks_send_merkle_block_only() {
    let server = spawn_test_server().await;
    server.core.mine_blocks(2);
    let mut client = server.core_client().await.unwrap();

    let mut stream = client
        .subscribe_to_transactions_with_proofs(TransactionsWithProofsRequest {
            bloom_filter: Some(bloom_for(&[3u8; 20])),
            from_block: Some(transactions_with_proofs_request::FromBlock::FromBlockHeight(1)),
            count: 2,
            send_transaction_hashes: false,
        })
        .await
        .unwrap()
        .into_inner();

    for _ in 0..2 {
        let merkle = merkle_block_of(next(&mut stream).await);
        assert!(merkle.tree.extract_matches().unwrap().1.is_empty());
    }
    expect_end(&mut stream).await;
}

/// Test the transaction subscription argument checks.
#[tokio::test]
async fn transaction_subscription_validation() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    let status = client
        .subscribe_to_transactions_with_proofs(TransactionsWithProofsRequest {
            bloom_filter: None,
            from_block: None,
            count: 5,
            send_transaction_hashes: false,
        })
        .await
        .unwrap_err();
    assert_eq!(status.message(), "Must specify from_block when count > 0");

    let status = client
        .subscribe_to_transactions_with_proofs(TransactionsWithProofsRequest {
            bloom_filter: Some(v0::BloomFilter {
                v_data: vec![0u8; 36_001],
                n_hash_funcs: 5,
                n_tweak: 0,
                n_flags: 0,
            }),
            from_block: None,
            count: 0,
            send_transaction_hashes: false,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

/// Test live delivery: matching mempool transactions, their instant locks,
/// then the block that mines them.
#[tokio::test]
async fn live_mempool_instant_lock_and_block() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    let mut stream = client
        .subscribe_to_transactions_with_proofs(TransactionsWithProofsRequest {
            bloom_filter: Some(bloom_for(&[9u8; 20])),
            from_block: None,
            count: 0,
            send_transaction_hashes: false,
        })
        .await
        .unwrap()
        .into_inner();

    let wanted = payment(5, [9u8; 20]);
    let other = payment(6, [1u8; 20]);
    broadcast(&server, &other).await;
    broadcast(&server, &wanted).await;
    assert_eq!(transactions_of(next(&mut stream).await), vec![wanted.clone()]);

    // Locks for transactions the client never saw are not forwarded
    server.core.instant_lock(&sha256d(&other)).unwrap();
    let message = server.core.instant_lock(&sha256d(&wanted)).unwrap();
    match next(&mut stream).await.responses {
        Some(transactions_with_proofs_response::Responses::InstantSendLockMessages(locks)) => {
            assert_eq!(locks.messages, vec![message]);
        }
        other => panic!("expected instant locks, got {other:?}"),
    }

    let block = server.core.mine_block();
    assert_eq!(transactions_of(next(&mut stream).await), vec![wanted.clone()]);
    let merkle = merkle_block_of(next(&mut stream).await);
    assert_eq!(merkle.header, block.header);
}

/// Test that a client cancelling its stream ends the subscription task.
#[tokio::test]
async fn cancelled_stream_releases_subscription() {
    let server = spawn_test_server().await;
    server.core.mine_blocks(1);
    let mut client = server.core_client().await.unwrap();

    let mut stream = client
        .subscribe_to_block_headers_with_chain_locks(headers_from(1, 0))
        .await
        .unwrap()
        .into_inner();
    headers_of(next(&mut stream).await);
    assert_eq!(server.streaming.active_subscriptions(), 1);

    drop(stream);
    server.wait_for_idle_subscriptions().await;
    assert_eq!(server.core.subscriber_count(), 0);
}
