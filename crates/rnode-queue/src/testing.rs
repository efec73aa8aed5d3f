//! In-memory broker and delivery doubles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::broker::{Broker, BrokerSession};
use crate::delivery::{BoxedDelivery, Delivery};
use crate::error::{QueueError, QueueResult};

/// How a delivery was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Ack,
    Nack { requeue: bool },
}

/// Shared record of resolutions, keyed by delivery tag.
#[derive(Debug, Clone, Default)]
pub struct ResolutionLog {
    entries: Arc<Mutex<Vec<(u64, Resolution)>>>,
}

impl ResolutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, tag: u64, resolution: Resolution) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((tag, resolution));
    }

    pub fn entries(&self) -> Vec<(u64, Resolution)> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, tag: u64) -> Option<Resolution> {
        self.entries()
            .into_iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, r)| r)
    }
}

/// A delivery held in memory.
pub struct MemoryDelivery {
    tag: u64,
    body: Vec<u8>,
    channel_open: Arc<AtomicBool>,
    log: ResolutionLog,
}

impl MemoryDelivery {
    pub fn new(tag: u64, body: impl Into<Vec<u8>>, log: &ResolutionLog) -> Self {
        Self {
            tag,
            body: body.into(),
            channel_open: Arc::new(AtomicBool::new(true)),
            log: log.clone(),
        }
    }

    /// Share a channel-open flag with other deliveries.
    pub fn with_channel_flag(mut self, channel_open: Arc<AtomicBool>) -> Self {
        self.channel_open = channel_open;
        self
    }

    pub fn boxed(self) -> BoxedDelivery {
        Box::new(self)
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn channel_open(&self) -> bool {
        self.channel_open.load(Ordering::SeqCst)
    }

    async fn ack(self: Box<Self>) -> QueueResult<()> {
        if !self.channel_open() {
            return Err(QueueError::ChannelClosed);
        }
        self.log.record(self.tag, Resolution::Ack);
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> QueueResult<()> {
        if !self.channel_open() {
            return Err(QueueError::ChannelClosed);
        }
        self.log.record(self.tag, Resolution::Nack { requeue });
        Ok(())
    }
}

/// Observer side of a [`MemorySession`].
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::UnboundedSender<BoxedDelivery>,
    pulls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Make a delivery available to the consumer.
    pub fn push(&self, delivery: BoxedDelivery) {
        let _ = self.sender.send(delivery);
    }

    /// Number of times the consumer asked for a delivery.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate the broker dropping the connection.
    pub fn lose_connection(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }
}

/// A subscription fed through a channel.
///
/// Dropping every [`SessionHandle`] ends the subscription.
pub struct MemorySession {
    receiver: mpsc::UnboundedReceiver<BoxedDelivery>,
    pulls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
}

impl MemorySession {
    pub fn new() -> (Self, SessionHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pulls = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let lost = Arc::new(AtomicBool::new(false));
        (
            Self {
                receiver,
                pulls: Arc::clone(&pulls),
                closed: Arc::clone(&closed),
                lost: Arc::clone(&lost),
            },
            SessionHandle {
                sender,
                pulls,
                closed,
                lost,
            },
        )
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn next_delivery(&mut self) -> QueueResult<Option<BoxedDelivery>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receiver.recv().await)
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.lost.load(Ordering::SeqCst)
    }

    async fn close(self: Box<Self>, _grace: Duration) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Outcome of one scripted connection attempt.
pub enum ConnectScript {
    Fail(String),
    Session(MemorySession),
}

/// Broker that replays a fixed sequence of connection outcomes.
///
/// Once the script is exhausted every attempt fails.
#[derive(Default)]
pub struct ScriptedBroker {
    script: Mutex<VecDeque<ConnectScript>>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedBroker {
    pub fn new(script: impl IntoIterator<Item = ConnectScript>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Instants at which `connect` was called.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    async fn connect(&self) -> QueueResult<Box<dyn BrokerSession>> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(ConnectScript::Session(session)) => Ok(Box::new(session)),
            Some(ConnectScript::Fail(reason)) => Err(QueueError::connection_failed(reason)),
            None => Err(QueueError::connection_failed("broker unreachable")),
        }
    }
}
