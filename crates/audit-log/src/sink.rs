//! The sink proper: bounded queue, batcher task, retry, dead-letter.

use crate::writer::AuditWriter;
use crate::AuditError;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use warden_core::DecisionRecord;

/// Sink tuning knobs. Defaults follow the design defaults: chunks close at
/// one second or 10 000 records, whichever comes first.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Bounded queue capacity; `append` suspends when full.
    pub queue_capacity: usize,
    /// Chunk record-count threshold.
    pub batch_max_records: usize,
    /// Chunk age threshold.
    pub batch_max_delay: Duration,
    /// How long `append` may wait for admission before dead-lettering.
    pub append_deadline: Duration,
    /// Write attempts before a batch dead-letters.
    pub retry_max_attempts: u32,
    /// First retry backoff; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Dead-letter ring capacity.
    pub dead_letter_capacity: usize,
    /// Optional durable JSONL tail for dead-lettered records.
    pub dead_letter_path: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8_192,
            batch_max_records: 10_000,
            batch_max_delay: Duration::from_secs(1),
            append_deadline: Duration::from_millis(250),
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(50),
            dead_letter_capacity: 1_024,
            dead_letter_path: None,
        }
    }
}

/// Counter snapshot for the metrics surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SinkMetricsSnapshot {
    /// Records admitted to the queue.
    pub enqueued: u64,
    /// Records durably handed to the writer.
    pub written: u64,
    /// Write retries performed.
    pub retries: u64,
    /// Records spilled to the dead-letter buffer. A severe operational
    /// event, surfaced here rather than ever blocking authorization.
    pub dead_letters: u64,
    /// Explicit flushes completed.
    pub flushes: u64,
}

#[derive(Default)]
struct SinkMetrics {
    enqueued: AtomicU64,
    written: AtomicU64,
    retries: AtomicU64,
    dead_letters: AtomicU64,
    flushes: AtomicU64,
}

impl SinkMetrics {
    fn snapshot(&self) -> SinkMetricsSnapshot {
        SinkMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

struct DeadLetter {
    ring: parking_lot::Mutex<VecDeque<DecisionRecord>>,
    capacity: usize,
    tail_path: Option<PathBuf>,
}

impl DeadLetter {
    fn push_all(&self, records: Vec<DecisionRecord>) {
        if let Some(path) = &self.tail_path {
            if let Err(err) = Self::append_tail(path, &records) {
                warn!(error = %err, "dead-letter tail write failed");
            }
        }
        let mut ring = self.ring.lock();
        for record in records {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(record);
        }
    }

    fn append_tail(path: &PathBuf, records: &[DecisionRecord]) -> Result<(), AuditError> {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        for record in records {
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        Ok(())
    }

    fn drain(&self) -> Vec<DecisionRecord> {
        self.ring.lock().drain(..).collect()
    }
}

enum SinkMsg {
    Record(Box<DecisionRecord>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the running sink. Construct with [`AuditSink::spawn`]; share by
/// reference from the coordinator.
pub struct AuditSink {
    tx: mpsc::Sender<SinkMsg>,
    append_deadline: Duration,
    metrics: Arc<SinkMetrics>,
    dead_letter: Arc<DeadLetter>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl AuditSink {
    /// Start the batcher task against the given writer.
    #[must_use]
    pub fn spawn(writer: Arc<dyn AuditWriter>, config: SinkConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::default());
        let dead_letter = Arc::new(DeadLetter {
            ring: parking_lot::Mutex::new(VecDeque::new()),
            capacity: config.dead_letter_capacity.max(1),
            tail_path: config.dead_letter_path.clone(),
        });
        let append_deadline = config.append_deadline;
        let worker = tokio::spawn(run_batcher(
            rx,
            writer,
            config,
            Arc::clone(&metrics),
            Arc::clone(&dead_letter),
        ));
        Self {
            tx,
            append_deadline,
            metrics,
            dead_letter,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a record. Returns once admitted; suspends while the queue is
    /// full, and after `append_deadline` gives up and dead-letters the
    /// record instead of blocking authorization any longer.
    pub async fn append(&self, record: DecisionRecord) {
        self.metrics.enqueued.fetch_add(1, Ordering::Relaxed);
        match self
            .tx
            .send_timeout(SinkMsg::Record(Box::new(record)), self.append_deadline)
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(msg) | SendTimeoutError::Closed(msg)) => {
                if let SinkMsg::Record(record) = msg {
                    warn!(
                        request_id = %record.request_id,
                        "audit queue unavailable; record dead-lettered"
                    );
                    self.metrics.dead_letters.fetch_add(1, Ordering::Relaxed);
                    self.dead_letter.push_all(vec![*record]);
                }
            }
        }
    }

    /// Drain everything enqueued so far through the writer.
    pub async fn flush(&self) -> Result<(), AuditError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(SinkMsg::Flush(ack_tx)).await.map_err(|_| AuditError::Closed)?;
        ack_rx.await.map_err(|_| AuditError::Closed)?;
        self.metrics.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush, stop the batcher, and wait for it to exit. Appends after close
    /// dead-letter.
    pub async fn close(&self) -> Result<(), AuditError> {
        self.flush().await?;
        let _ = self.tx.send(SinkMsg::Shutdown).await;
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> SinkMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Take everything currently in the dead-letter ring (operators and
    /// tests; the durable tail, when configured, is unaffected).
    #[must_use]
    pub fn drain_dead_letters(&self) -> Vec<DecisionRecord> {
        self.dead_letter.drain()
    }
}

async fn run_batcher(
    mut rx: mpsc::Receiver<SinkMsg>,
    writer: Arc<dyn AuditWriter>,
    config: SinkConfig,
    metrics: Arc<SinkMetrics>,
    dead_letter: Arc<DeadLetter>,
) {
    let mut batch: Vec<DecisionRecord> = Vec::new();
    let mut ticker = tokio::time::interval(config.batch_max_delay);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(SinkMsg::Record(record)) => {
                    batch.push(*record);
                    if batch.len() >= config.batch_max_records {
                        write_batch(&*writer, &mut batch, &config, &metrics, &dead_letter).await;
                    }
                }
                Some(SinkMsg::Flush(ack)) => {
                    write_batch(&*writer, &mut batch, &config, &metrics, &dead_letter).await;
                    let _ = ack.send(());
                }
                Some(SinkMsg::Shutdown) | None => break,
            },
            _ = ticker.tick() => {
                write_batch(&*writer, &mut batch, &config, &metrics, &dead_letter).await;
            }
        }
    }
    // Drain whatever raced in before shutdown.
    while let Ok(msg) = rx.try_recv() {
        match msg {
            SinkMsg::Record(record) => batch.push(*record),
            SinkMsg::Flush(ack) => {
                let _ = ack.send(());
            }
            SinkMsg::Shutdown => {}
        }
    }
    write_batch(&*writer, &mut batch, &config, &metrics, &dead_letter).await;
    debug!("audit batcher stopped");
}

async fn write_batch(
    writer: &dyn AuditWriter,
    batch: &mut Vec<DecisionRecord>,
    config: &SinkConfig,
    metrics: &SinkMetrics,
    dead_letter: &DeadLetter,
) {
    if batch.is_empty() {
        return;
    }
    let records = std::mem::take(batch);
    let mut delay = config.retry_base_delay;
    let attempts = config.retry_max_attempts.max(1);
    for attempt in 1..=attempts {
        match writer.write(&records).await {
            Ok(()) => {
                metrics.written.fetch_add(records.len() as u64, Ordering::Relaxed);
                return;
            }
            Err(err) if attempt < attempts => {
                metrics.retries.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, attempt, "audit write failed; retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => {
                warn!(
                    error = %err,
                    records = records.len(),
                    "audit write exhausted retries; batch dead-lettered"
                );
                metrics.dead_letters.fetch_add(records.len() as u64, Ordering::Relaxed);
                dead_letter.push_all(records);
                return;
            }
        }
    }
}
