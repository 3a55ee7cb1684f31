//! Block header and transaction-with-proof subscriptions.
//!
//! Each subscription runs in its own task writing into a bounded channel.
//! Live subscriptions take their backend receiver before reading history, so
//! nothing published in between is lost; blocks already delivered from
//! history are dropped when their event arrives, and gaps between the last
//! delivered height and a new block are back-filled from the backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use slog::Logger;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use crate::backend::{CoreBackend, CoreEvent};
use crate::chain::bloom::BloomFilter;
use crate::chain::merkle::merkle_block;
use crate::chain::transaction::Transaction;
use crate::chain::{Block, Hash256, sha256d};
use crate::config::StreamingConfig;
use crate::error::DapiError;
use crate::proto::v0::{
    self, BlockHeadersWithChainLocksRequest, BlockHeadersWithChainLocksResponse,
    TransactionsWithProofsRequest, TransactionsWithProofsResponse,
    block_headers_with_chain_locks_request, block_headers_with_chain_locks_response,
    transactions_with_proofs_request, transactions_with_proofs_response,
};

pub type HeadersStream = ReceiverStream<Result<BlockHeadersWithChainLocksResponse, Status>>;
pub type TransactionsStream = ReceiverStream<Result<TransactionsWithProofsResponse, Status>>;

/// Starting point of a subscription, shared by both request types.
#[derive(Debug, Clone)]
enum StartBlock {
    Height(u32),
    Hash(Vec<u8>),
}

impl From<block_headers_with_chain_locks_request::FromBlock> for StartBlock {
    fn from(from: block_headers_with_chain_locks_request::FromBlock) -> Self {
        use block_headers_with_chain_locks_request::FromBlock;
        match from {
            FromBlock::FromBlockHeight(height) => StartBlock::Height(height),
            FromBlock::FromBlockHash(hash) => StartBlock::Hash(hash),
        }
    }
}

impl From<transactions_with_proofs_request::FromBlock> for StartBlock {
    fn from(from: transactions_with_proofs_request::FromBlock) -> Self {
        use transactions_with_proofs_request::FromBlock;
        match from {
            FromBlock::FromBlockHeight(height) => StartBlock::Height(height),
            FromBlock::FromBlockHash(hash) => StartBlock::Hash(hash),
        }
    }
}

/// Why a subscription task stopped early.
enum StreamEnd {
    /// The consumer dropped the stream
    Cancelled,
    Failed(Status),
}

impl From<DapiError> for StreamEnd {
    fn from(err: DapiError) -> Self {
        StreamEnd::Failed(err.into())
    }
}

type StreamResult<T = ()> = Result<T, StreamEnd>;

async fn emit<T>(tx: &mpsc::Sender<Result<T, Status>>, item: T) -> StreamResult {
    tx.send(Ok(item)).await.map_err(|_| StreamEnd::Cancelled)
}

/// Wait for the next backend event, or for the consumer to go away.
async fn next_event<T>(
    tx: &mpsc::Sender<Result<T, Status>>,
    events: &mut broadcast::Receiver<CoreEvent>,
) -> StreamResult<Option<CoreEvent>> {
    let event = tokio::select! {
        _ = tx.closed() => return Err(StreamEnd::Cancelled),
        event = events.recv() => event,
    };
    match event {
        Ok(event) => Ok(Some(event)),
        Err(RecvError::Lagged(missed)) => Err(StreamEnd::Failed(Status::aborted(format!(
            "subscription fell behind, {} events dropped",
            missed
        )))),
        Err(RecvError::Closed) => Ok(None),
    }
}

async fn finish<T>(tx: mpsc::Sender<Result<T, Status>>, result: StreamResult, logger: &Logger) {
    match result {
        Ok(()) => slog::debug!(logger, "Subscription completed"),
        Err(StreamEnd::Cancelled) => slog::debug!(logger, "Subscription cancelled by client"),
        Err(StreamEnd::Failed(status)) => {
            slog::warn!(logger, "Subscription failed"; "code" => ?status.code(), "error" => status.message());
            let _ = tx.send(Err(status)).await;
        }
    }
}

/// Decrements the live-subscription counter when the task ends.
struct SubscriptionGuard {
    active: Arc<AtomicUsize>,
}

impl SubscriptionGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn headers_response(headers: Vec<Vec<u8>>) -> BlockHeadersWithChainLocksResponse {
    BlockHeadersWithChainLocksResponse {
        responses: Some(block_headers_with_chain_locks_response::Responses::BlockHeaders(
            v0::BlockHeaders { headers },
        )),
    }
}

fn chain_lock_response(chain_lock: Vec<u8>) -> BlockHeadersWithChainLocksResponse {
    BlockHeadersWithChainLocksResponse {
        responses: Some(block_headers_with_chain_locks_response::Responses::ChainLock(
            chain_lock,
        )),
    }
}

fn transactions_response(transactions: Vec<Vec<u8>>) -> TransactionsWithProofsResponse {
    TransactionsWithProofsResponse {
        responses: Some(transactions_with_proofs_response::Responses::RawTransactions(
            v0::RawTransactions { transactions },
        )),
    }
}

fn merkle_block_response(raw_merkle_block: Vec<u8>) -> TransactionsWithProofsResponse {
    TransactionsWithProofsResponse {
        responses: Some(transactions_with_proofs_response::Responses::RawMerkleBlock(
            raw_merkle_block,
        )),
    }
}

fn instant_locks_response(messages: Vec<Vec<u8>>) -> TransactionsWithProofsResponse {
    TransactionsWithProofsResponse {
        responses: Some(
            transactions_with_proofs_response::Responses::InstantSendLockMessages(
                v0::InstantSendLockMessages { messages },
            ),
        ),
    }
}

/// Bloom-filter state of one transaction subscription.
struct TransactionFilter {
    /// `None` matches everything
    bloom: Option<BloomFilter>,
    /// Mempool transactions sent to the client, awaiting an instant lock
    delivered: HashSet<Hash256>,
}

impl TransactionFilter {
    fn matches(&mut self, tx: &Transaction) -> bool {
        match &mut self.bloom {
            Some(bloom) => bloom.matches_transaction(tx),
            None => true,
        }
    }
}

/// Serves both Core subscriptions from one [`CoreBackend`].
#[derive(Clone)]
pub struct StreamingService {
    core: Arc<dyn CoreBackend>,
    config: StreamingConfig,
    active: Arc<AtomicUsize>,
    logger: Logger,
}

impl StreamingService {
    pub fn new(core: Arc<dyn CoreBackend>, config: StreamingConfig, logger: Logger) -> Self {
        Self {
            core,
            config,
            active: Arc::new(AtomicUsize::new(0)),
            logger,
        }
    }

    /// Subscriptions whose task is still running.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Resolve the first block to send, returning it with the tip to use.
    ///
    /// A block found by hash is at or below the tip even when it connected
    /// after `tip` was read, so the tip is raised to cover it.
    async fn resolve_start(&self, start: StartBlock, tip: u32) -> Result<(u32, u32), Status> {
        match start {
            StartBlock::Height(0) => Err(Status::invalid_argument(
                "Minimum value for fromBlockHeight is 1",
            )),
            StartBlock::Height(height) if height > tip => Err(Status::invalid_argument(format!(
                "fromBlockHeight {} is greater than the best block height {}",
                height, tip
            ))),
            StartBlock::Height(height) => Ok((height, tip)),
            StartBlock::Hash(mut bytes) => {
                // Hashes travel in display order, like the hex hashes of getBlock
                bytes.reverse();
                let hash = Hash256::from_slice(&bytes).map_err(|_| {
                    Status::invalid_argument(format!(
                        "Invalid block hash: must be 32 bytes, got {}",
                        bytes.len()
                    ))
                })?;
                let height = self
                    .core
                    .block_height(&hash)
                    .await?
                    .ok_or_else(|| Status::not_found("Block not found"))?;
                Ok((height, tip.max(height)))
            }
        }
    }

    fn check_count(start: u32, count: u32, tip: u32) -> Result<(), Status> {
        let available = tip.checked_sub(start).map_or(0, |gap| gap + 1);
        if count > available {
            return Err(Status::invalid_argument(format!(
                "count is too big, could not fetch more than {} blocks",
                available
            )));
        }
        Ok(())
    }

    pub async fn subscribe_block_headers(
        &self,
        request: BlockHeadersWithChainLocksRequest,
    ) -> Result<HeadersStream, Status> {
        let from_block = request.from_block.ok_or_else(|| {
            Status::invalid_argument("Must specify from_block_hash or from_block_height")
        })?;
        let count = request.count;

        // Subscribe before reading the tip so no block falls between history and live
        let events = (count == 0).then(|| self.core.subscribe());
        let tip = self.core.best_block_height().await?;
        let (start, tip) = self.resolve_start(from_block.into(), tip).await?;
        let end = if count > 0 {
            Self::check_count(start, count, tip)?;
            start + count - 1
        } else {
            tip
        };

        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        let guard = SubscriptionGuard::new(&self.active);
        let service = self.clone();
        let logger = self
            .logger
            .new(slog::o!("subscription" => "block_headers", "from" => start, "count" => count));
        slog::debug!(logger, "Subscription started");

        tokio::spawn(async move {
            let _guard = guard;
            let result = service.run_headers(&tx, start, end, events).await;
            finish(tx, result, &logger).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn run_headers(
        &self,
        tx: &mpsc::Sender<Result<BlockHeadersWithChainLocksResponse, Status>>,
        start: u32,
        end: u32,
        events: Option<broadcast::Receiver<CoreEvent>>,
    ) -> StreamResult {
        let mut next = self.emit_headers(tx, start, end).await?;
        let Some(mut events) = events else {
            return Ok(());
        };

        let mut last_lock_height = None;
        if let Some(lock) = self.core.best_chain_lock().await? {
            last_lock_height = Some(lock.height);
            emit(tx, chain_lock_response(lock.to_bytes())).await?;
        }

        while let Some(event) = next_event(tx, &mut events).await? {
            match event {
                CoreEvent::Block(block) => {
                    if block.height < next {
                        continue;
                    }
                    if block.height > next {
                        next = self.emit_headers(tx, next, block.height - 1).await?;
                    }
                    emit(tx, headers_response(vec![block.header.clone()])).await?;
                    next = block.height + 1;
                }
                CoreEvent::ChainLock(lock) => {
                    if last_lock_height.is_some_and(|h| lock.height <= h) {
                        continue;
                    }
                    last_lock_height = Some(lock.height);
                    emit(tx, chain_lock_response(lock.to_bytes())).await?;
                }
                CoreEvent::Transaction(_) | CoreEvent::InstantLock { .. } => {}
            }
        }
        Ok(())
    }

    /// Send headers `from..=to` in batches; returns the next undelivered height.
    async fn emit_headers(
        &self,
        tx: &mpsc::Sender<Result<BlockHeadersWithChainLocksResponse, Status>>,
        from: u32,
        to: u32,
    ) -> StreamResult<u32> {
        let batch = u32::try_from(self.config.header_batch_size).unwrap_or(u32::MAX);
        let mut next = from;
        while next <= to {
            let wanted = batch.min(to - next + 1);
            let headers = self.core.block_headers(next, wanted).await?;
            if headers.is_empty() {
                break;
            }
            next += headers.len() as u32;
            emit(tx, headers_response(headers)).await?;
        }
        Ok(next)
    }

    pub async fn subscribe_transactions(
        &self,
        request: TransactionsWithProofsRequest,
    ) -> Result<TransactionsStream, Status> {
        let bloom = request
            .bloom_filter
            .map(|f| BloomFilter::from_parts(f.v_data, f.n_hash_funcs, f.n_tweak, f.n_flags))
            .transpose()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let count = request.count;
        if count > 0 && request.from_block.is_none() {
            return Err(Status::invalid_argument("Must specify from_block when count > 0"));
        }

        let events = (count == 0).then(|| self.core.subscribe());
        let tip = self.core.best_block_height().await?;
        // Without a starting block only new blocks are delivered
        let (start, end) = match request.from_block {
            Some(from_block) => {
                let (start, tip) = self.resolve_start(from_block.into(), tip).await?;
                if count > 0 {
                    Self::check_count(start, count, tip)?;
                    (start, start + count - 1)
                } else {
                    (start, tip)
                }
            }
            None => (tip + 1, tip),
        };

        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        let guard = SubscriptionGuard::new(&self.active);
        let service = self.clone();
        let logger = self
            .logger
            .new(slog::o!("subscription" => "transactions", "from" => start, "count" => count));
        slog::debug!(logger, "Subscription started"; "bloom_filter" => bloom.is_some());

        tokio::spawn(async move {
            let _guard = guard;
            let mut filter = TransactionFilter {
                bloom,
                delivered: HashSet::new(),
            };
            let result = service
                .run_transactions(&tx, &mut filter, start, end, events, &logger)
                .await;
            finish(tx, result, &logger).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn run_transactions(
        &self,
        tx: &mpsc::Sender<Result<TransactionsWithProofsResponse, Status>>,
        filter: &mut TransactionFilter,
        start: u32,
        end: u32,
        events: Option<broadcast::Receiver<CoreEvent>>,
        logger: &Logger,
    ) -> StreamResult {
        let mut next = self.emit_blocks(tx, filter, start, end, logger).await?;
        let Some(mut events) = events else {
            return Ok(());
        };

        while let Some(event) = next_event(tx, &mut events).await? {
            match event {
                CoreEvent::Block(block) => {
                    if block.height < next {
                        continue;
                    }
                    if block.height > next {
                        next = self
                            .emit_blocks(tx, filter, next, block.height - 1, logger)
                            .await?;
                    }
                    self.emit_block(tx, filter, &block, logger).await?;
                    for txid in block.txids() {
                        filter.delivered.remove(&txid);
                    }
                    next = block.height + 1;
                }
                CoreEvent::Transaction(raw) => {
                    let parsed = match Transaction::decode(&raw) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            slog::debug!(logger, "Skipping undecodable mempool transaction"; "error" => %e);
                            continue;
                        }
                    };
                    // The node also announces transactions again as blocks connect
                    if filter.matches(&parsed) && filter.delivered.insert(sha256d(&raw)) {
                        emit(tx, transactions_response(vec![Vec::clone(&raw)])).await?;
                    }
                }
                CoreEvent::InstantLock { txid, message } => {
                    if filter.delivered.contains(&txid) {
                        emit(tx, instant_locks_response(vec![message])).await?;
                    }
                }
                CoreEvent::ChainLock(_) => {}
            }
        }
        Ok(())
    }

    /// Send blocks `from..=to`; returns the next undelivered height.
    async fn emit_blocks(
        &self,
        tx: &mpsc::Sender<Result<TransactionsWithProofsResponse, Status>>,
        filter: &mut TransactionFilter,
        from: u32,
        to: u32,
        logger: &Logger,
    ) -> StreamResult<u32> {
        let mut next = from;
        while next <= to {
            let hash = self
                .core
                .block_hash(next)
                .await?
                .ok_or_else(|| DapiError::not_found(format!("Block {} not found", next)))?;
            let block = self
                .core
                .block(&hash)
                .await?
                .ok_or_else(|| DapiError::not_found(format!("Block {} not found", hash)))?;
            self.emit_block(tx, filter, &block, logger).await?;
            next += 1;
        }
        Ok(next)
    }

    /// Matching transactions of `block` (if any), then its merkle block.
    async fn emit_block(
        &self,
        tx: &mpsc::Sender<Result<TransactionsWithProofsResponse, Status>>,
        filter: &mut TransactionFilter,
        block: &Block,
        logger: &Logger,
    ) -> StreamResult {
        let mut flags = Vec::with_capacity(block.transactions.len());
        let mut matched = Vec::new();
        for raw in &block.transactions {
            let is_match = match Transaction::decode(raw) {
                Ok(parsed) => filter.matches(&parsed),
                Err(e) => {
                    slog::debug!(logger, "Skipping undecodable block transaction";
                        "height" => block.height, "error" => %e);
                    false
                }
            };
            flags.push(is_match);
            if is_match {
                matched.push(raw.clone());
            }
        }

        if !matched.is_empty() {
            emit(tx, transactions_response(matched)).await?;
        }
        emit(tx, merkle_block_response(merkle_block(block, &flags))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChainStatus, MemoryCore, SendOptions, TransactionInfo};
    use crate::chain::ChainLock;
    use crate::config::Network;
    use crate::DapiResult;

    fn service(core: Arc<MemoryCore>) -> StreamingService {
        StreamingService::new(
            core,
            StreamingConfig {
                header_batch_size: 2,
                buffer_size: 4,
            },
            Logger::root(slog::Discard, slog::o!()),
        )
    }

    fn from_height(height: u32, count: u32) -> BlockHeadersWithChainLocksRequest {
        BlockHeadersWithChainLocksRequest {
            from_block: Some(block_headers_with_chain_locks_request::FromBlock::FromBlockHeight(
                height,
            )),
            count,
        }
    }

    #[tokio::test]
    async fn start_height_validation() {
        let core = Arc::new(MemoryCore::new(Network::Regtest));
        core.mine_blocks(3);
        let streaming = service(core);

        let status = streaming.subscribe_block_headers(from_height(0, 1)).await.unwrap_err();
        assert_eq!(status.message(), "Minimum value for fromBlockHeight is 1");

        let status = streaming.subscribe_block_headers(from_height(4, 1)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = streaming.subscribe_block_headers(from_height(2, 3)).await.unwrap_err();
        assert!(status.message().starts_with("count is too big"));

        let missing = BlockHeadersWithChainLocksRequest {
            from_block: None,
            count: 1,
        };
        assert!(streaming.subscribe_block_headers(missing).await.is_err());
    }

    #[tokio::test]
    async fn unknown_start_hash_is_not_found() {
        let streaming = service(Arc::new(MemoryCore::new(Network::Regtest)));
        let request = BlockHeadersWithChainLocksRequest {
            from_block: Some(block_headers_with_chain_locks_request::FromBlock::FromBlockHash(
                vec![7u8; 32],
            )),
            count: 1,
        };
        let status = streaming.subscribe_block_headers(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    /// Reports the tip one block behind the chain it serves, as a node does
    /// when a block connects between two calls.
    struct LaggingTip(Arc<MemoryCore>);

    #[async_trait::async_trait]
    impl CoreBackend for LaggingTip {
        async fn chain_status(&self) -> DapiResult<ChainStatus> {
            self.0.chain_status().await
        }
        async fn best_block_height(&self) -> DapiResult<u32> {
            Ok(self.0.best_block_height().await?.saturating_sub(1))
        }
        async fn block_hash(&self, height: u32) -> DapiResult<Option<Hash256>> {
            self.0.block_hash(height).await
        }
        async fn block_height(&self, hash: &Hash256) -> DapiResult<Option<u32>> {
            self.0.block_height(hash).await
        }
        async fn block(&self, hash: &Hash256) -> DapiResult<Option<Block>> {
            self.0.block(hash).await
        }
        async fn block_headers(&self, from_height: u32, count: u32) -> DapiResult<Vec<Vec<u8>>> {
            self.0.block_headers(from_height, count).await
        }
        async fn best_chain_lock(&self) -> DapiResult<Option<ChainLock>> {
            self.0.best_chain_lock().await
        }
        async fn send_raw_transaction(
            &self,
            raw: &[u8],
            options: SendOptions,
        ) -> DapiResult<Hash256> {
            self.0.send_raw_transaction(raw, options).await
        }
        async fn transaction(&self, txid: &Hash256) -> DapiResult<Option<TransactionInfo>> {
            self.0.transaction(txid).await
        }
        async fn estimate_fee(&self, blocks: u32) -> DapiResult<Option<f64>> {
            self.0.estimate_fee(blocks).await
        }
        fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
            self.0.subscribe()
        }
    }

    fn from_hash(hash: &Hash256, count: u32) -> BlockHeadersWithChainLocksRequest {
        let mut display = hash.to_vec();
        display.reverse();
        BlockHeadersWithChainLocksRequest {
            from_block: Some(block_headers_with_chain_locks_request::FromBlock::FromBlockHash(
                display,
            )),
            count,
        }
    }

    #[tokio::test]
    async fn start_hash_above_stale_tip_is_served() {
        use tokio_stream::StreamExt;

        let core = Arc::new(MemoryCore::new(Network::Regtest));
        core.mine_blocks(3);
        let newest = core.tip();
        let streaming = StreamingService::new(
            Arc::new(LaggingTip(Arc::clone(&core))),
            StreamingConfig {
                header_batch_size: 2,
                buffer_size: 4,
            },
            Logger::root(slog::Discard, slog::o!()),
        );

        let mut stream = streaming
            .subscribe_block_headers(from_hash(&newest.hash, 1))
            .await
            .unwrap();
        match stream.next().await.unwrap().unwrap().responses {
            Some(block_headers_with_chain_locks_response::Responses::BlockHeaders(h)) => {
                assert_eq!(h.headers, vec![newest.header.clone()])
            }
            other => panic!("unexpected response {:?}", other),
        }
        assert!(stream.next().await.is_none());

        let status = streaming
            .subscribe_block_headers(from_hash(&newest.hash, 2))
            .await
            .unwrap_err();
        assert_eq!(
            status.message(),
            "count is too big, could not fetch more than 1 blocks"
        );
    }

    #[test]
    fn count_check_never_underflows() {
        let status = StreamingService::check_count(5, 1, 4).unwrap_err();
        assert_eq!(
            status.message(),
            "count is too big, could not fetch more than 0 blocks"
        );
        assert!(StreamingService::check_count(4, 1, 4).is_ok());
    }

    #[tokio::test]
    async fn bloom_filter_limits_rejected() {
        let streaming = service(Arc::new(MemoryCore::new(Network::Regtest)));
        let request = TransactionsWithProofsRequest {
            bloom_filter: Some(v0::BloomFilter {
                v_data: vec![0u8; 36_001],
                n_hash_funcs: 1,
                n_tweak: 0,
                n_flags: 0,
            }),
            from_block: None,
            count: 0,
            send_transaction_hashes: false,
        };
        let status = streaming.subscribe_transactions(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let request = TransactionsWithProofsRequest {
            bloom_filter: None,
            from_block: None,
            count: 5,
            send_transaction_hashes: false,
        };
        let status = streaming.subscribe_transactions(request).await.unwrap_err();
        assert_eq!(status.message(), "Must specify from_block when count > 0");
    }

    #[tokio::test]
    async fn historical_headers_are_batched() {
        use tokio_stream::StreamExt;

        let core = Arc::new(MemoryCore::new(Network::Regtest));
        core.mine_blocks(5);
        let streaming = service(core);

        let mut stream = streaming.subscribe_block_headers(from_height(1, 5)).await.unwrap();
        let mut sizes = Vec::new();
        while let Some(item) = stream.next().await {
            match item.unwrap().responses {
                Some(block_headers_with_chain_locks_response::Responses::BlockHeaders(h)) => {
                    sizes.push(h.headers.len())
                }
                other => panic!("unexpected response {:?}", other),
            }
        }
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn dropping_live_stream_releases_subscription() {
        use std::time::Duration;

        let core = Arc::new(MemoryCore::new(Network::Regtest));
        core.mine_block();
        let streaming = service(Arc::clone(&core));

        let stream = streaming.subscribe_block_headers(from_height(1, 0)).await.unwrap();
        assert_eq!(streaming.active_subscriptions(), 1);
        assert_eq!(core.subscriber_count(), 1);

        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), async {
            while streaming.active_subscriptions() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(core.subscriber_count(), 0);
    }
}
