//! Bounded FIFO between the process adapter and the UI consumer.
//!
//! The queue closes when the last [`LineSender`] is dropped. Ownership makes
//! closing exclusive to the producer side and guarantees it happens once.

use crate::error::QueueClosed;
use crate::record::LineRecord;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TryRecvError, TrySendError},
};
use tracing::warn;

pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;
pub const CRITICAL_SEND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Dropped,
    Closed,
}

/// What a producer does with a diagnostic line when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    Block,
    #[default]
    Drop,
}

#[derive(Debug, Default)]
struct TransportStats {
    dropped: AtomicU64,
    critical_dropped: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct LineSender {
    tx: mpsc::Sender<LineRecord>,
    stats: Arc<TransportStats>,
}

#[derive(Debug)]
pub struct LineReceiver {
    rx: mpsc::Receiver<LineRecord>,
    stats: Arc<TransportStats>,
}

pub fn transport_queue(capacity: usize) -> (LineSender, LineReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(TransportStats::default());
    (
        LineSender {
            tx,
            stats: stats.clone(),
        },
        LineReceiver { rx, stats },
    )
}

impl LineSender {
    /// Waits for room in the queue.
    pub async fn push(&self, record: LineRecord) -> Result<(), QueueClosed> {
        self.tx.send(record).await.map_err(|_| QueueClosed)
    }

    pub fn try_push(&self, record: LineRecord) -> PushOutcome {
        match self.tx.try_send(record) {
            Ok(()) => PushOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    pub async fn push_with_timeout(&self, record: LineRecord, timeout: Duration) -> PushOutcome {
        match self.tx.send_timeout(record, timeout).await {
            Ok(()) => PushOutcome::Delivered,
            Err(SendTimeoutError::Timeout(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
            Err(SendTimeoutError::Closed(_)) => PushOutcome::Closed,
        }
    }

    pub async fn push_critical(&self, record: LineRecord) -> PushOutcome {
        self.push_critical_within(record, CRITICAL_SEND_TIMEOUT).await
    }

    pub async fn push_critical_within(&self, record: LineRecord, timeout: Duration) -> PushOutcome {
        let text = record.text.clone();
        let outcome = self.push_with_timeout(record, timeout).await;
        if outcome != PushOutcome::Delivered {
            self.stats.critical_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                outcome = ?outcome,
                timeout_ms = timeout.as_millis() as u64,
                line = %text,
                "critical_line_dropped"
            );
        }
        outcome
    }

    /// Diagnostic lines follow the configured overflow policy.
    pub async fn push_diagnostic(&self, record: LineRecord, policy: OverflowPolicy) -> PushOutcome {
        match policy {
            OverflowPolicy::Block => match self.push(record).await {
                Ok(()) => PushOutcome::Delivered,
                Err(QueueClosed) => PushOutcome::Closed,
            },
            OverflowPolicy::Drop => self.try_push(record),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Consumes this handle. The queue closes once every clone is gone.
    pub fn close(self) {
        drop(self);
    }
}

impl LineReceiver {
    pub async fn recv(&mut self) -> Option<LineRecord> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<LineRecord, TryRecvError> {
        self.rx.try_recv()
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    pub fn critical_dropped(&self) -> u64 {
        self.stats.critical_dropped.load(Ordering::Relaxed)
    }
}
