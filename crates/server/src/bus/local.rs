use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use taskchat_shared::constants::DEAD_LETTER_CAPACITY;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{Envelope, EventHandler, EventPublisher};
use crate::error::{ChatError, ChatResult};

#[derive(Debug, Clone)]
struct Record {
    partition: usize,
    offset: u64,
    topic: String,
    key: String,
    payload: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub partition: usize,
    pub offset: u64,
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: taskchat_shared::constants::BUS_MAX_ATTEMPTS,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    pub published: u64,
    pub acked: u64,
    pub forwarded: u64,
    pub malformed: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    forwarded: AtomicU64,
    malformed: AtomicU64,
    dead_lettered: AtomicU64,
}

struct Partition {
    tx: mpsc::Sender<Record>,
    rx: std::sync::Mutex<Option<mpsc::Receiver<Record>>>,
    next_offset: Mutex<u64>,
    /// Offset of the next record not yet acknowledged.
    committed: AtomicU64,
}

/// In-process bus with `n` ordered partitions. Records with the same key
/// always land on the same partition and are consumed by one worker, so
/// per-key order is publish order.
pub struct LocalBus {
    partitions: Vec<Arc<Partition>>,
    counters: Arc<Counters>,
    dead_letters: Arc<Mutex<VecDeque<DeadLetter>>>,
}

impl LocalBus {
    pub fn new(partitions: usize, capacity: usize) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                Arc::new(Partition {
                    tx,
                    rx: std::sync::Mutex::new(Some(rx)),
                    next_offset: Mutex::new(0),
                    committed: AtomicU64::new(0),
                })
            })
            .collect();
        Self {
            partitions,
            counters: Arc::new(Counters::default()),
            dead_letters: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    /// Append an already-encoded payload. Other producers sharing the bus go
    /// through here, which is also how undecodable records get in.
    pub async fn publish_raw(&self, topic: &str, key: &str, payload: String) -> ChatResult<()> {
        let index = self.partition_for(key);
        let partition = &self.partitions[index];
        // Counted before the send so a producer blocked on a full partition is
        // still outstanding for `drain`
        self.counters.published.fetch_add(1, Ordering::SeqCst);

        // Held across the send: queue order must equal offset order
        let mut next_offset = partition.next_offset.lock().await;
        let record = Record {
            partition: index,
            offset: *next_offset,
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        };
        if partition.tx.send(record).await.is_err() {
            self.counters.published.fetch_sub(1, Ordering::SeqCst);
            return Err(ChatError::Infrastructure("delivery bus is closed".into()));
        }
        *next_offset += 1;
        Ok(())
    }

    /// Start one worker per partition. Each partition's receiver can only be
    /// taken once, so calling this twice starts no extra workers.
    pub fn spawn_consumers(
        &self,
        handler: Arc<dyn EventHandler>,
        policy: RetryPolicy,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for partition in &self.partitions {
            let rx = partition.rx.lock().ok().and_then(|mut slot| slot.take());
            let Some(rx) = rx else {
                continue;
            };
            let worker = Worker {
                partition: Arc::clone(partition),
                handler: Arc::clone(&handler),
                policy,
                counters: Arc::clone(&self.counters),
                dead_letters: Arc::clone(&self.dead_letters),
            };
            handles.push(tokio::spawn(worker.run(rx)));
        }
        handles
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::SeqCst),
            acked: self.counters.acked.load(Ordering::SeqCst),
            forwarded: self.counters.forwarded.load(Ordering::SeqCst),
            malformed: self.counters.malformed.load(Ordering::SeqCst),
            dead_lettered: self.counters.dead_lettered.load(Ordering::SeqCst),
        }
    }

    pub fn committed_offset(&self, partition: usize) -> Option<u64> {
        self.partitions
            .get(partition)
            .map(|p| p.committed.load(Ordering::SeqCst))
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.iter().cloned().collect()
    }

    /// Wait until everything published so far has been acknowledged,
    /// including publishes still waiting for room in their partition.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let stats = self.stats();
            if stats.acked >= stats.published {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventPublisher for LocalBus {
    async fn publish(&self, envelope: Envelope) -> ChatResult<()> {
        let payload = envelope
            .encode()
            .map_err(|e| ChatError::Infrastructure(format!("encode envelope: {e}")))?;
        self.publish_raw(envelope.topic.name(), &envelope.key, payload)
            .await
    }
}

struct Worker {
    partition: Arc<Partition>,
    handler: Arc<dyn EventHandler>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
    dead_letters: Arc<Mutex<VecDeque<DeadLetter>>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Record>) {
        while let Some(record) = rx.recv().await {
            self.process(&record).await;
            self.ack(&record);
        }
        tracing::debug!("bus partition worker stopped");
    }

    async fn process(&self, record: &Record) {
        let envelope = match Envelope::decode(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Undecodable records are never retried
                tracing::warn!(
                    partition = record.partition,
                    offset = record.offset,
                    topic = %record.topic,
                    "dropping undecodable bus record: {e}"
                );
                self.counters.malformed.fetch_add(1, Ordering::SeqCst);
                self.dead_letter(record, e.to_string(), 0).await;
                return;
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handler.handle(&envelope).await {
                Ok(()) => {
                    self.counters.forwarded.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Err(e) if attempt < self.policy.max_attempts => {
                    tracing::debug!(
                        event = envelope.event.name(),
                        attempt,
                        "bus handler failed, retrying: {e}"
                    );
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                }
                Err(e) => {
                    tracing::warn!(
                        partition = record.partition,
                        offset = record.offset,
                        event = envelope.event.name(),
                        attempt,
                        "giving up on bus record: {e}"
                    );
                    self.dead_letter(record, e.to_string(), attempt).await;
                    return;
                }
            }
        }
    }

    fn ack(&self, record: &Record) {
        self.partition
            .committed
            .fetch_max(record.offset + 1, Ordering::SeqCst);
        self.counters.acked.fetch_add(1, Ordering::SeqCst);
    }

    async fn dead_letter(&self, record: &Record, reason: String, attempts: u32) {
        self.counters.dead_lettered.fetch_add(1, Ordering::SeqCst);
        let mut letters = self.dead_letters.lock().await;
        if letters.len() >= DEAD_LETTER_CAPACITY {
            letters.pop_front();
        }
        letters.push_back(DeadLetter {
            partition: record.partition,
            offset: record.offset,
            topic: record.topic.clone(),
            key: record.key.clone(),
            payload: record.payload.clone(),
            reason,
            attempts,
        });
    }
}
