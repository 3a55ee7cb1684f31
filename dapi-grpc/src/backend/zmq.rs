//! Dash Core ZMQ notifications.
//!
//! Mempool transactions and instant-send locks only reach DAPI through the
//! node's ZMQ publisher; blocks and chain locks are announced there too and
//! wake the Core watcher so it does not wait for its next poll.

use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use zeromq::prelude::*;
use zeromq::{SubSocket, ZmqError, ZmqMessage};

use super::CoreEvent;
use crate::chain::encode::Reader;
use crate::chain::sha256d;
use crate::chain::transaction::Transaction;

/// Topics subscribed on the node's publisher.
pub const TOPICS: [&str; 5] = [
    "rawtx",
    "rawtxlocksig",
    "rawchainlocksig",
    "rawchainlock",
    "hashblock",
];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// The socket reports no disconnects; a periodic subscribe checks the peer.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const HEALTH_CHECK_TOPIC: &str = "ping";

#[derive(Debug, Error)]
enum ListenError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error(transparent)]
    Zmq(#[from] ZmqError),
}

/// What one ZMQ message means to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Publish as-is to subscribers
    Event(CoreEvent),
    /// A block or chain lock was announced; poll the node now
    TipChanged,
}

/// Split a `rawtxlocksig` payload into the transaction and the lock after it.
pub fn split_locked_transaction(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    let mut reader = Reader::new(payload);
    Transaction::decode_from(&mut reader).ok()?;
    let (tx, lock) = payload.split_at(reader.position());
    (!lock.is_empty()).then_some((tx, lock))
}

/// Interpret the `[topic, body, sequence]` frames of one message.
pub fn parse_message(frames: &[Vec<u8>]) -> Option<Notification> {
    let [topic, body, ..] = frames else {
        return None;
    };
    match topic.as_slice() {
        b"rawtx" => Some(Notification::Event(CoreEvent::Transaction(Arc::new(
            body.clone(),
        )))),
        b"rawtxlocksig" => {
            let (tx, lock) = split_locked_transaction(body)?;
            Some(Notification::Event(CoreEvent::InstantLock {
                txid: sha256d(tx),
                message: lock.to_vec(),
            }))
        }
        b"rawchainlocksig" | b"rawchainlock" | b"hashblock" => Some(Notification::TipChanged),
        _ => None,
    }
}

/// Subscriber to the node's ZMQ publisher that reconnects with backoff.
pub struct ZmqListener {
    url: String,
    events: broadcast::Sender<CoreEvent>,
    tip_changed: Arc<Notify>,
    logger: Logger,
}

impl ZmqListener {
    pub fn new(
        url: impl Into<String>,
        events: broadcast::Sender<CoreEvent>,
        tip_changed: Arc<Notify>,
        logger: Logger,
    ) -> Self {
        Self {
            url: url.into(),
            events,
            tip_changed,
            logger,
        }
    }

    /// Listen until the task is aborted.
    pub async fn run(self) {
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            match self.connect().await {
                Ok(socket) => {
                    slog::info!(self.logger, "Connected to Core ZMQ"; "url" => &self.url);
                    delay = INITIAL_RETRY_DELAY;
                    if let Err(e) = self.listen(socket).await {
                        slog::warn!(self.logger, "Core ZMQ connection lost"; "error" => %e);
                    }
                }
                Err(e) => {
                    slog::warn!(self.logger, "Core ZMQ connection failed";
                        "url" => &self.url, "error" => %e, "retry_in" => ?delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
            }
        }
    }

    async fn connect(&self) -> Result<SubSocket, ListenError> {
        let mut socket = SubSocket::new();
        tokio::time::timeout(CONNECT_TIMEOUT, socket.connect(&self.url))
            .await
            .map_err(|_| ListenError::ConnectTimeout)??;
        for topic in TOPICS {
            socket.subscribe(topic).await?;
        }
        Ok(socket)
    }

    async fn listen(&self, mut socket: SubSocket) -> Result<(), ListenError> {
        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health.reset();
        loop {
            let received = tokio::select! {
                message = socket.recv() => Some(message?),
                _ = health.tick() => None,
            };
            match received {
                Some(message) => self.dispatch(message),
                None => {
                    socket.subscribe(HEALTH_CHECK_TOPIC).await?;
                    socket.unsubscribe(HEALTH_CHECK_TOPIC).await?;
                }
            }
        }
    }

    fn dispatch(&self, message: ZmqMessage) {
        let frames: Vec<Vec<u8>> = message
            .into_vec()
            .into_iter()
            .map(|frame| frame.to_vec())
            .collect();
        match parse_message(&frames) {
            Some(Notification::Event(event)) => {
                // Nobody listening is fine
                let _ = self.events.send(event);
            }
            Some(Notification::TipChanged) => self.tip_changed.notify_one(),
            None => {
                slog::debug!(self.logger, "Ignoring ZMQ message";
                    "topic" => frames.first().map(|t| String::from_utf8_lossy(t).into_owned()));
            }
        }
    }
}
