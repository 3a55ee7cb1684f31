//! E2E integration tests for the v0 Core service.

mod test_helpers;

use dapi_grpc::backend::CoreBackend;
use dapi_grpc::chain::{Block, Hash256, sha256d};
use dapi_grpc::proto::v0::{
    BroadcastTransactionRequest, GetBestBlockHeightRequest, GetBlockRequest,
    GetEstimatedTransactionFeeRequest, GetStatusRequest, GetTransactionRequest, get_block_request,
    get_status_response,
};
use test_helpers::{payment, spawn_test_server};
use tonic::Code;

fn display_bytes(hash: &Hash256) -> Vec<u8> {
    let mut bytes = hash.to_vec();
    bytes.reverse();
    bytes
}

/// Test that status reflects the chain tip.
#[tokio::test]
async fn get_status_reports_tip() {
    let server = spawn_test_server().await;
    server.core.mine_blocks(3);
    let mut client = server.core_client().await.unwrap();

    let status = client.get_status(GetStatusRequest {}).await.unwrap().into_inner();
    let chain = status.chain.unwrap();
    assert_eq!(chain.blocks_count, 3);
    assert_eq!(chain.name, "regtest");
    assert_eq!(chain.best_block_hash, display_bytes(&server.core.tip().hash));
    assert!(chain.is_synced);
    assert_eq!(status.status, get_status_response::Status::Ready as i32);
    assert!(status.version.unwrap().software > 0);
    assert!(status.network.unwrap().fee.is_some());
}

/// Test that sync progress and warnings drive the overall status.
#[tokio::test]
async fn get_status_syncing_and_error() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    server.core.set_sync_progress(0.5);
    let status = client.get_status(GetStatusRequest {}).await.unwrap().into_inner();
    assert_eq!(status.status, get_status_response::Status::Syncing as i32);
    assert!(!status.chain.unwrap().is_synced);

    server.core.set_sync_progress(1.0);
    server.core.set_warnings("unknown new rules activated");
    let status = client.get_status(GetStatusRequest {}).await.unwrap().into_inner();
    assert_eq!(status.status, get_status_response::Status::Error as i32);
}

/// Test fetching a block by height and by hash.
#[tokio::test]
async fn get_block_by_height_and_hash() {
    let server = spawn_test_server().await;
    let mined = server.core.mine_blocks(2);
    let mut client = server.core_client().await.unwrap();

    let by_height = client
        .get_block(GetBlockRequest {
            block: Some(get_block_request::Block::Height(2)),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(by_height.block, mined[1].to_bytes());

    let by_hash = client
        .get_block(GetBlockRequest {
            block: Some(get_block_request::Block::Hash(mined[0].hash.to_hex())),
        })
        .await
        .unwrap()
        .into_inner();
    let parsed = Block::from_raw(1, mined[0].hash, &by_hash.block).unwrap();
    assert_eq!(parsed.header, mined[0].header);
    assert_eq!(sha256d(&parsed.header), mined[0].hash);
}

/// Test that an unknown hash is not found rather than a malformed block.
#[tokio::test]
async fn get_block_errors() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    let status = client
        .get_block(GetBlockRequest {
            block: Some(get_block_request::Block::Hash("11".repeat(32))),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "Block not found");

    let status = client
        .get_block(GetBlockRequest {
            block: Some(get_block_request::Block::Height(50)),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "Invalid block height");

    let status = client.get_block(GetBlockRequest { block: None }).await.unwrap_err();
    assert_eq!(status.message(), "hash or height is not specified");

    let status = client
        .get_block(GetBlockRequest {
            block: Some(get_block_request::Block::Hash("xyz".into())),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

/// Test the best block height follows mining.
#[tokio::test]
async fn best_block_height() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    let height = client
        .get_best_block_height(GetBestBlockHeightRequest {})
        .await
        .unwrap()
        .into_inner()
        .height;
    assert_eq!(height, 0);

    server.core.mine_blocks(4);
    let height = client
        .get_best_block_height(GetBestBlockHeightRequest {})
        .await
        .unwrap()
        .into_inner()
        .height;
    assert_eq!(height, 4);
}

/// Test broadcasting a transaction and reading it back.
#[tokio::test]
async fn broadcast_then_get_transaction() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();
    let raw = payment(1, [7u8; 20]);

    let txid = client
        .broadcast_transaction(BroadcastTransactionRequest {
            transaction: raw.clone(),
            allow_high_fees: false,
            bypass_limits: false,
        })
        .await
        .unwrap()
        .into_inner()
        .transaction_id;
    assert_eq!(txid, sha256d(&raw).to_hex());

    let pending = client
        .get_transaction(GetTransactionRequest { id: txid.clone() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(pending.transaction, raw);
    assert_eq!(pending.confirmations, 0);
    assert!(pending.block_hash.is_empty());

    let block = server.core.mine_block();
    server.core.chain_lock(block.height);
    let confirmed = client
        .get_transaction(GetTransactionRequest { id: txid })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(confirmed.height, block.height);
    assert_eq!(confirmed.block_hash, display_bytes(&block.hash));
    assert_eq!(confirmed.confirmations, 1);
    assert!(confirmed.is_chain_locked);
}

/// Test that re-submitting a transaction is never a silent success.
#[tokio::test]
async fn broadcast_duplicate_is_already_exists() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();
    let request = BroadcastTransactionRequest {
        transaction: payment(2, [1u8; 20]),
        allow_high_fees: false,
        bypass_limits: false,
    };

    client.broadcast_transaction(request.clone()).await.unwrap();
    let status = client.broadcast_transaction(request.clone()).await.unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
    assert_eq!(status.message(), "Transaction already in chain");

    server.core.mine_block();
    let status = client.broadcast_transaction(request).await.unwrap_err();
    assert_eq!(status.code(), Code::AlreadyExists);
}

/// Test the broadcast validation and rejection paths.
#[tokio::test]
async fn broadcast_invalid_and_rejected() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    let status = client
        .broadcast_transaction(BroadcastTransactionRequest::default())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "transaction is not specified");

    let status = client
        .broadcast_transaction(BroadcastTransactionRequest {
            transaction: vec![1, 2, 3],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().starts_with("invalid transaction: "));

    let raw = payment(3, [2u8; 20]);
    server.core.reject(sha256d(&raw), "bad-txns-inputs-missingorspent");
    let status = client
        .broadcast_transaction(BroadcastTransactionRequest {
            transaction: raw,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::FailedPrecondition);
    assert_eq!(
        status.message(),
        "Transaction is rejected: bad-txns-inputs-missingorspent"
    );
}

/// Test transaction lookup errors.
#[tokio::test]
async fn get_transaction_errors() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    let status = client
        .get_transaction(GetTransactionRequest { id: String::new() })
        .await
        .unwrap_err();
    assert_eq!(status.message(), "id is not specified");

    let status = client
        .get_transaction(GetTransactionRequest { id: "abcd".into() })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = client
        .get_transaction(GetTransactionRequest { id: "22".repeat(32) })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "Transaction not found");
}

/// Test the fee estimate, including the missing-estimate fallback.
#[tokio::test]
async fn estimated_fee() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();

    let fee = client
        .get_estimated_transaction_fee(GetEstimatedTransactionFeeRequest { blocks: 0 })
        .await
        .unwrap()
        .into_inner()
        .fee;
    assert_eq!(fee, 0.00001);

    server.core.set_fee_estimate(None);
    let fee = client
        .get_estimated_transaction_fee(GetEstimatedTransactionFeeRequest { blocks: 5000 })
        .await
        .unwrap()
        .into_inner()
        .fee;
    assert_eq!(fee, 0.0);
}

/// Test that status blocks_count matches the backend at call time.
#[tokio::test]
async fn status_matches_backend_height() {
    let server = spawn_test_server().await;
    server.core.mine_blocks(7);
    let mut client = server.core_client().await.unwrap();

    let expected = server.core.best_block_height().await.unwrap();
    let status = client.get_status(GetStatusRequest {}).await.unwrap().into_inner();
    assert_eq!(status.chain.unwrap().blocks_count, expected);
}

/// Test that repeated reads against an unchanged chain answer the same.
#[tokio::test]
async fn repeated_reads_are_stable() {
    let server = spawn_test_server().await;
    let mut client = server.core_client().await.unwrap();
    let raw = payment(9, [3u8; 20]);
    let txid = client
        .broadcast_transaction(BroadcastTransactionRequest {
            transaction: raw,
            allow_high_fees: false,
            bypass_limits: false,
        })
        .await
        .unwrap()
        .into_inner()
        .transaction_id;
    let block = server.core.mine_block();
    server.core.chain_lock(block.height);

    let mut statuses = Vec::new();
    for _ in 0..2 {
        let mut status = client.get_status(GetStatusRequest {}).await.unwrap().into_inner();
        // The node clock is the only field allowed to move
        if let Some(time) = status.time.as_mut() {
            time.now = 0;
        }
        statuses.push(status);
    }
    assert_eq!(statuses[0], statuses[1]);

    let by_height = GetBlockRequest {
        block: Some(get_block_request::Block::Height(block.height)),
    };
    let first = client.get_block(by_height.clone()).await.unwrap().into_inner();
    let second = client.get_block(by_height).await.unwrap().into_inner();
    assert_eq!(first, second);

    let lookup = GetTransactionRequest { id: txid };
    let first = client.get_transaction(lookup.clone()).await.unwrap().into_inner();
    let second = client.get_transaction(lookup).await.unwrap().into_inner();
    assert_eq!(first, second);
    assert_eq!(first.height, block.height);

    let first = client
        .get_best_block_height(GetBestBlockHeightRequest {})
        .await
        .unwrap()
        .into_inner();
    let second = client
        .get_best_block_height(GetBestBlockHeightRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(first, second);
}
