//! In-memory backends for development nodes and tests.
//!
//! [`MemoryCore`] keeps a single chain of blocks mined on demand from its
//! mempool. [`MemoryPlatform`] keeps identities, contracts and documents in
//! maps and settles broadcast state transitions when told to. Neither can
//! produce proofs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use super::{
    BroadcastError, ChainStatus, CoreBackend, CoreEvent, DocumentQuery, DocumentStart,
    EVENT_CHANNEL_CAPACITY, Fetched, IdentityRecord, Identifier, PlatformBackend, PublicKeyHash,
    ResponseMeta, SendOptions, StateTransitionOutcome, TransactionInfo, state_transition_hash,
};
use crate::chain::encode::write_compact_size;
use crate::chain::merkle::merkle_root;
use crate::chain::transaction::{OutPoint, Transaction, TxIn, TxOut};
use crate::chain::{BLS_SIGNATURE_SIZE, Block, BlockHeader, ChainLock, Hash256, sha256d};
use crate::config::Network;
use crate::error::{DapiError, DapiResult};

const GENESIS_TIME: u32 = 1_700_000_000;
const BLOCK_SPACING_SECS: u32 = 150;
const REGTEST_BITS: u32 = 0x207f_ffff;
const COINBASE_VALUE: u64 = 500 * 100_000_000;
const CBTX_TYPE: u16 = 5;

const CORE_VERSION: u32 = 200_100;
const PROTOCOL_VERSION: u32 = 70_231;
const PLATFORM_PROTOCOL_VERSION: u32 = 1;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Chain name the node reports for `network` in `getblockchaininfo`.
pub fn chain_name(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "main",
        Network::Testnet => "test",
        Network::Devnet => "devnet",
        Network::Regtest => "regtest",
    }
}

struct CoreState {
    blocks: Vec<Arc<Block>>,
    heights: HashMap<Hash256, u32>,
    /// Mempool in arrival order
    mempool: Vec<(Hash256, Vec<u8>)>,
    confirmed: HashMap<Hash256, u32>,
    instant_locked: HashSet<Hash256>,
    chain_lock: Option<ChainLock>,
    rejections: HashMap<Hash256, String>,
    fee_per_kb: Option<f64>,
    sync_progress: f64,
    warnings: String,
}

impl CoreState {
    fn tip_height(&self) -> u32 {
        self.blocks.len().saturating_sub(1) as u32
    }

    fn append_block(&mut self, transactions: Vec<Vec<u8>>) -> Arc<Block> {
        let height = self.blocks.len() as u32;
        let prev_block_hash = self.blocks.last().map(|b| b.hash).unwrap_or(Hash256::ZERO);
        let txids: Vec<Hash256> = transactions.iter().map(|tx| sha256d(tx)).collect();
        let header = BlockHeader {
            version: 0x2000_0000,
            prev_block_hash,
            merkle_root: merkle_root(&txids),
            time: GENESIS_TIME + height * BLOCK_SPACING_SECS,
            bits: REGTEST_BITS,
            nonce: height,
        }
        .to_bytes();
        let block = Arc::new(Block {
            height,
            hash: sha256d(&header),
            header,
            transactions,
        });

        for txid in txids {
            self.confirmed.insert(txid, height);
        }
        self.heights.insert(block.hash, height);
        self.blocks.push(Arc::clone(&block));
        block
    }
}

fn coinbase(height: u32) -> Vec<u8> {
    // CbTx payload: version, height, two empty merkle roots
    let mut payload = Vec::with_capacity(70);
    payload.extend_from_slice(&2u16.to_le_bytes());
    payload.extend_from_slice(&height.to_le_bytes());
    payload.extend_from_slice(&[0u8; 64]);

    let mut script_sig = Vec::new();
    script_sig.push(4);
    script_sig.extend_from_slice(&height.to_le_bytes());

    Transaction {
        version: 3,
        tx_type: CBTX_TYPE,
        inputs: vec![TxIn {
            previous_output: OutPoint::NULL,
            script_sig,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: COINBASE_VALUE,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
        extra_payload: Some(payload),
    }
    .encode()
}

/// `islock` message for a transaction: version, spent outpoints, txid,
/// cycle hash and signature.
fn instant_lock_message(txid: &Hash256, raw: &[u8]) -> Vec<u8> {
    let inputs = Transaction::decode(raw)
        .map(|tx| tx.inputs)
        .unwrap_or_default();
    let mut out = vec![1u8];
    write_compact_size(&mut out, inputs.len() as u64);
    for input in &inputs {
        out.extend_from_slice(&input.previous_output.to_bytes());
    }
    out.extend_from_slice(txid.as_bytes());
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&signature_for(txid));
    out
}

fn signature_for(hash: &Hash256) -> [u8; BLS_SIGNATURE_SIZE] {
    let digest = sha256d(hash.as_bytes());
    let mut signature = [0u8; BLS_SIGNATURE_SIZE];
    for chunk in signature.chunks_mut(32) {
        chunk.copy_from_slice(&digest.as_bytes()[..chunk.len()]);
    }
    signature
}

/// In-memory Dash Core node.
pub struct MemoryCore {
    network: Network,
    state: RwLock<CoreState>,
    events: broadcast::Sender<CoreEvent>,
}

impl MemoryCore {
    /// A chain holding only its genesis block.
    pub fn new(network: Network) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = CoreState {
            blocks: Vec::new(),
            heights: HashMap::new(),
            mempool: Vec::new(),
            confirmed: HashMap::new(),
            instant_locked: HashSet::new(),
            chain_lock: None,
            rejections: HashMap::new(),
            fee_per_kb: Some(0.00001),
            sync_progress: 1.0,
            warnings: String::new(),
        };
        state.append_block(vec![coinbase(0)]);
        Self {
            network,
            state: RwLock::new(state),
            events,
        }
    }

    fn publish(&self, event: CoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Mine one block containing every mempool transaction.
    pub fn mine_block(&self) -> Arc<Block> {
        let block = {
            let mut state = write(&self.state);
            let height = state.blocks.len() as u32;
            let mut transactions = vec![coinbase(height)];
            transactions.extend(state.mempool.drain(..).map(|(_, raw)| raw));
            state.append_block(transactions)
        };
        self.publish(CoreEvent::Block(Arc::clone(&block)));
        block
    }

    pub fn mine_blocks(&self, count: u32) -> Vec<Arc<Block>> {
        (0..count).map(|_| self.mine_block()).collect()
    }

    /// Chain-lock the block at `height`, returning the lock if the block exists.
    pub fn chain_lock(&self, height: u32) -> Option<ChainLock> {
        let lock = {
            let mut state = write(&self.state);
            let block = state.blocks.get(height as usize)?;
            let lock = ChainLock {
                height,
                block_hash: block.hash,
                signature: signature_for(&block.hash),
            };
            state.chain_lock = Some(lock.clone());
            lock
        };
        self.publish(CoreEvent::ChainLock(lock.clone()));
        Some(lock)
    }

    /// Instant-lock a known transaction, returning the lock message.
    pub fn instant_lock(&self, txid: &Hash256) -> Option<Vec<u8>> {
        let message = {
            let mut state = write(&self.state);
            let raw = state
                .mempool
                .iter()
                .find(|(id, _)| id == txid)
                .map(|(_, raw)| raw.clone())
                .or_else(|| {
                    let height = *state.confirmed.get(txid)?;
                    state.blocks[height as usize]
                        .transactions
                        .iter()
                        .find(|tx| sha256d(tx) == *txid)
                        .cloned()
                })?;
            state.instant_locked.insert(*txid);
            instant_lock_message(txid, &raw)
        };
        self.publish(CoreEvent::InstantLock {
            txid: *txid,
            message: message.clone(),
        });
        Some(message)
    }

    /// Make the node refuse `txid` with `reason`.
    pub fn reject(&self, txid: Hash256, reason: impl Into<String>) {
        write(&self.state).rejections.insert(txid, reason.into());
    }

    pub fn set_fee_estimate(&self, fee_per_kb: Option<f64>) {
        write(&self.state).fee_per_kb = fee_per_kb;
    }

    pub fn set_sync_progress(&self, progress: f64) {
        write(&self.state).sync_progress = progress;
    }

    pub fn set_warnings(&self, warnings: impl Into<String>) {
        write(&self.state).warnings = warnings.into();
    }

    pub fn mempool(&self) -> Vec<Hash256> {
        read(&self.state).mempool.iter().map(|(id, _)| *id).collect()
    }

    pub fn tip(&self) -> Arc<Block> {
        let state = read(&self.state);
        Arc::clone(&state.blocks[state.tip_height() as usize])
    }

    pub fn block_at(&self, height: u32) -> Option<Arc<Block>> {
        read(&self.state).blocks.get(height as usize).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl CoreBackend for MemoryCore {
    async fn chain_status(&self) -> DapiResult<ChainStatus> {
        let state = read(&self.state);
        let tip = &state.blocks[state.tip_height() as usize];
        let median_time = tip.parsed_header().map(|h| h.time).unwrap_or(GENESIS_TIME);
        Ok(ChainStatus {
            chain: chain_name(self.network).to_string(),
            core_version: CORE_VERSION,
            protocol_version: PROTOCOL_VERSION,
            agent: format!("/dapi-memory:{}/", env!("CARGO_PKG_VERSION")),
            headers_count: tip.height,
            blocks_count: tip.height,
            best_block_hash: tip.hash,
            difficulty: 4.656542373906925e-10,
            chain_work: (tip.height as u64 * 2 + 2).to_be_bytes().to_vec(),
            sync_progress: state.sync_progress,
            median_time,
            time_offset: 0,
            peers_count: 0,
            relay_fee: 0.00001,
            incremental_fee: 0.00001,
            proxy: String::new(),
            warnings: state.warnings.clone(),
            masternode: None,
        })
    }

    async fn best_block_height(&self) -> DapiResult<u32> {
        Ok(read(&self.state).tip_height())
    }

    async fn block_hash(&self, height: u32) -> DapiResult<Option<Hash256>> {
        Ok(read(&self.state).blocks.get(height as usize).map(|b| b.hash))
    }

    async fn block_height(&self, hash: &Hash256) -> DapiResult<Option<u32>> {
        Ok(read(&self.state).heights.get(hash).copied())
    }

    async fn block(&self, hash: &Hash256) -> DapiResult<Option<Block>> {
        let state = read(&self.state);
        Ok(state
            .heights
            .get(hash)
            .map(|height| state.blocks[*height as usize].as_ref().clone()))
    }

    async fn block_headers(&self, from_height: u32, count: u32) -> DapiResult<Vec<Vec<u8>>> {
        let state = read(&self.state);
        Ok(state
            .blocks
            .iter()
            .skip(from_height as usize)
            .take(count as usize)
            .map(|b| b.header.clone())
            .collect())
    }

    async fn best_chain_lock(&self) -> DapiResult<Option<ChainLock>> {
        Ok(read(&self.state).chain_lock.clone())
    }

    async fn send_raw_transaction(&self, raw: &[u8], _options: SendOptions) -> DapiResult<Hash256> {
        let txid = sha256d(raw);
        {
            let mut state = write(&self.state);
            if state.confirmed.contains_key(&txid) || state.mempool.iter().any(|(id, _)| *id == txid)
            {
                return Err(DapiError::AlreadyExists("txn-already-known".into()));
            }
            if let Some(reason) = state.rejections.get(&txid) {
                return Err(DapiError::FailedPrecondition(reason.clone()));
            }
            state.mempool.push((txid, raw.to_vec()));
        }
        self.publish(CoreEvent::Transaction(Arc::new(raw.to_vec())));
        Ok(txid)
    }

    async fn transaction(&self, txid: &Hash256) -> DapiResult<Option<TransactionInfo>> {
        let state = read(&self.state);
        let is_instant_locked = state.instant_locked.contains(txid);

        if let Some((_, raw)) = state.mempool.iter().find(|(id, _)| id == txid) {
            return Ok(Some(TransactionInfo {
                raw: raw.clone(),
                block_hash: None,
                height: None,
                confirmations: 0,
                is_instant_locked,
                is_chain_locked: false,
            }));
        }

        let Some(height) = state.confirmed.get(txid).copied() else {
            return Ok(None);
        };
        let block = &state.blocks[height as usize];
        let raw = block
            .transactions
            .iter()
            .find(|tx| sha256d(tx) == *txid)
            .cloned()
            .ok_or_else(|| DapiError::internal("confirmed transaction missing from its block"))?;
        let is_chain_locked = state
            .chain_lock
            .as_ref()
            .is_some_and(|lock| lock.height >= height);
        Ok(Some(TransactionInfo {
            raw,
            block_hash: Some(block.hash),
            height: Some(height),
            confirmations: state.tip_height() - height + 1,
            is_instant_locked,
            is_chain_locked,
        }))
    }

    async fn estimate_fee(&self, _blocks: u32) -> DapiResult<Option<f64>> {
        Ok(read(&self.state).fee_per_kb)
    }

    fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Clone)]
enum Transition {
    Pending,
    Executed,
    Rejected(BroadcastError),
}

#[derive(Default)]
struct PlatformState {
    identities: HashMap<Identifier, Vec<u8>>,
    key_index: HashMap<PublicKeyHash, Identifier>,
    contracts: HashMap<Identifier, Vec<u8>>,
    documents: HashMap<(Identifier, String), BTreeMap<Identifier, Vec<u8>>>,
    transitions: HashMap<[u8; 32], Transition>,
    /// Rejections registered before the transition was broadcast
    invalid: HashMap<[u8; 32], BroadcastError>,
    height: u64,
}

impl PlatformState {
    fn metadata(&self) -> ResponseMeta {
        ResponseMeta {
            height: self.height,
            core_chain_locked_height: 0,
            time_ms: now_ms(),
            protocol_version: PLATFORM_PROTOCOL_VERSION,
        }
    }

    fn fetched<T>(&self, value: Option<T>) -> Fetched<T> {
        Fetched {
            value,
            proof: None,
            metadata: self.metadata(),
        }
    }

    fn record_for(&self, hash: &PublicKeyHash) -> Option<IdentityRecord> {
        let id = self.key_index.get(hash)?;
        let identity = self.identities.get(id)?;
        Some(IdentityRecord {
            id: *id,
            identity: identity.clone(),
        })
    }
}

fn no_proofs(prove: bool) -> DapiResult<()> {
    if prove {
        return Err(DapiError::Unimplemented(
            "proofs are not available from the in-memory platform".into(),
        ));
    }
    Ok(())
}

/// In-memory Platform storage and validation layer.
pub struct MemoryPlatform {
    state: RwLock<PlatformState>,
    settled: watch::Sender<u64>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            state: RwLock::new(PlatformState::default()),
            settled,
        }
    }

    pub fn insert_identity(&self, id: Identifier, identity: Vec<u8>, keys: &[PublicKeyHash]) {
        let mut state = write(&self.state);
        state.identities.insert(id, identity);
        for key in keys {
            state.key_index.insert(*key, id);
        }
    }

    pub fn insert_data_contract(&self, id: Identifier, contract: Vec<u8>) {
        write(&self.state).contracts.insert(id, contract);
    }

    pub fn insert_document(
        &self,
        contract_id: Identifier,
        document_type: &str,
        document_id: Identifier,
        document: Vec<u8>,
    ) {
        write(&self.state)
            .documents
            .entry((contract_id, document_type.to_string()))
            .or_default()
            .insert(document_id, document);
    }

    /// Execute every pending state transition in one new block.
    pub fn process_pending(&self) -> usize {
        let executed = {
            let mut state = write(&self.state);
            let mut executed = 0;
            for transition in state.transitions.values_mut() {
                if matches!(transition, Transition::Pending) {
                    *transition = Transition::Executed;
                    executed += 1;
                }
            }
            if executed > 0 {
                state.height += 1;
            }
            executed
        };
        self.settled.send_modify(|n| *n += 1);
        executed
    }

    /// Reject the transition with `hash`. A pending transition settles with
    /// the error; an unseen one fails validation once broadcast.
    pub fn reject(&self, hash: [u8; 32], code: u32, message: impl Into<String>) {
        let error = BroadcastError {
            code,
            message: message.into(),
            data: Vec::new(),
        };
        {
            let mut guard = write(&self.state);
            let state = &mut *guard;
            match state.transitions.get_mut(&hash) {
                Some(transition @ Transition::Pending) => *transition = Transition::Rejected(error),
                Some(_) => {}
                None => {
                    state.invalid.insert(hash, error);
                }
            }
        }
        self.settled.send_modify(|n| *n += 1);
    }

    pub fn pending_count(&self) -> usize {
        read(&self.state)
            .transitions
            .values()
            .filter(|t| matches!(t, Transition::Pending))
            .count()
    }

    fn settled_outcome(&self, hash: &[u8; 32]) -> Option<StateTransitionOutcome> {
        let state = read(&self.state);
        let error = match state.transitions.get(hash)? {
            Transition::Pending => return None,
            Transition::Executed => None,
            Transition::Rejected(error) => Some(error.clone()),
        };
        Some(StateTransitionOutcome {
            error,
            proof: None,
            metadata: state.metadata(),
        })
    }
}

#[async_trait]
impl PlatformBackend for MemoryPlatform {
    async fn broadcast_state_transition(&self, state_transition: &[u8]) -> DapiResult<()> {
        let hash = state_transition_hash(state_transition);
        let mut state = write(&self.state);
        if state.transitions.contains_key(&hash) {
            return Err(DapiError::AlreadyExists(
                "state transition already in chain".into(),
            ));
        }
        if let Some(error) = state.invalid.get(&hash) {
            return Err(DapiError::InvalidArgument(format!(
                "state transition is invalid: {} (code {})",
                error.message, error.code
            )));
        }
        state.transitions.insert(hash, Transition::Pending);
        Ok(())
    }

    async fn wait_for_state_transition_result(
        &self,
        hash: [u8; 32],
        prove: bool,
    ) -> DapiResult<StateTransitionOutcome> {
        no_proofs(prove)?;
        let mut settled = self.settled.subscribe();
        loop {
            if let Some(outcome) = self.settled_outcome(&hash) {
                return Ok(outcome);
            }
            settled
                .changed()
                .await
                .map_err(|_| DapiError::unavailable("platform backend shut down"))?;
        }
    }

    async fn identity(&self, id: &Identifier, prove: bool) -> DapiResult<Fetched<Vec<u8>>> {
        no_proofs(prove)?;
        let state = read(&self.state);
        Ok(state.fetched(state.identities.get(id).cloned()))
    }

    async fn data_contract(&self, id: &Identifier, prove: bool) -> DapiResult<Fetched<Vec<u8>>> {
        no_proofs(prove)?;
        let state = read(&self.state);
        Ok(state.fetched(state.contracts.get(id).cloned()))
    }

    async fn documents(&self, query: &DocumentQuery) -> DapiResult<Fetched<Vec<Vec<u8>>>> {
        no_proofs(query.prove)?;
        if !query.where_clause.is_empty() || !query.order_by.is_empty() {
            return Err(DapiError::Unimplemented(
                "where and order_by clauses need a Drive backend".into(),
            ));
        }

        let state = read(&self.state);
        if !state.contracts.contains_key(&query.data_contract_id) {
            return Ok(state.fetched(None));
        }

        let key = (query.data_contract_id, query.document_type.clone());
        let documents = match state.documents.get(&key) {
            None => Vec::new(),
            Some(docs) => {
                let lower = match &query.start {
                    None => Bound::Unbounded,
                    Some(DocumentStart::After(id)) => Bound::Excluded(*id),
                    Some(DocumentStart::At(id)) => Bound::Included(*id),
                };
                docs.range((lower, Bound::Unbounded))
                    .take(query.limit as usize)
                    .map(|(_, doc)| doc.clone())
                    .collect()
            }
        };
        Ok(state.fetched(Some(documents)))
    }

    async fn identity_by_public_key_hash(
        &self,
        hash: &PublicKeyHash,
        prove: bool,
    ) -> DapiResult<Fetched<IdentityRecord>> {
        no_proofs(prove)?;
        let state = read(&self.state);
        Ok(state.fetched(state.record_for(hash)))
    }

    async fn identities_by_public_key_hashes(
        &self,
        hashes: &[PublicKeyHash],
        prove: bool,
    ) -> DapiResult<Fetched<Vec<Option<IdentityRecord>>>> {
        no_proofs(prove)?;
        let state = read(&self.state);
        let records = hashes.iter().map(|hash| state.record_for(hash)).collect();
        Ok(state.fetched(Some(records)))
    }
}
