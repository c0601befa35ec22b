// MIT License - Copyright (c) 2026 Peter Wright
// Durable store-and-forward queue

//! FIFO of [`OutboundMessage`]s shared by producers (serial ingestion,
//! status and relay telemetry) and the single consumer (the publisher's
//! drain loop).
//!
//! Durability is snapshot based: the whole queue is serialized as a JSON
//! array, written to a temporary file and renamed over the snapshot path,
//! so a crash mid-write leaves the previous snapshot intact.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::message::OutboundMessage;

#[derive(Debug, Default)]
pub struct DurableQueue {
    items: Mutex<VecDeque<OutboundMessage>>,
    notify: Notify,
}

impl DurableQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<OutboundMessage>> {
        // A panic while holding the lock cannot leave the deque half-modified.
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append to the tail and wake the consumer.
    pub fn enqueue(&self, msg: OutboundMessage) {
        self.lock().push_back(msg);
        self.notify.notify_one();
    }

    /// Remove and return the head, if any. Never blocks.
    pub fn dequeue_if_any(&self) -> Option<OutboundMessage> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves after the next [`DurableQueue::enqueue`] (or immediately if
    /// one happened since the last wait).
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Serialize the current contents, head first.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let guard = self.lock();
        Ok(serde_json::to_vec(&*guard)?)
    }

    /// Replace the contents with a snapshot.
    pub fn restore(&self, bytes: &[u8]) -> Result<usize> {
        let items: VecDeque<OutboundMessage> = serde_json::from_slice(bytes)?;
        let n = items.len();
        *self.lock() = items;
        if n > 0 {
            self.notify.notify_one();
        }
        Ok(n)
    }

    /// Write a snapshot to `path` atomically (temp file + rename).
    pub fn save_to(&self, path: &Path) -> Result<usize> {
        let bytes = self.snapshot()?;
        let tmp = tmp_path(path);
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(self.len())
    }

    /// Restore from `path`. A missing file is an empty queue; a corrupt one
    /// is logged and treated as empty.
    pub fn load_from(&self, path: &Path) -> usize {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No queue snapshot at {}", path.display());
                return 0;
            }
            Err(e) => {
                warn!("Cannot read queue snapshot {}: {e}", path.display());
                return 0;
            }
        };
        match self.restore(&bytes) {
            Ok(n) => {
                info!("Restored {n} queued messages from {}", path.display());
                n
            }
            Err(e) => {
                error!("Queue snapshot {} is corrupt, starting empty: {e}", path.display());
                0
            }
        }
    }
}

/// [`DurableQueue::save_to`] on the blocking pool.
pub async fn persist(queue: Arc<DurableQueue>, path: PathBuf) -> Result<usize> {
    tokio::task::spawn_blocking(move || queue.save_to(&path))
        .await
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))?
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Periodically writes the queue to disk until cancelled.
pub struct Snapshotter {
    queue: Arc<DurableQueue>,
    path: PathBuf,
    interval: Duration,
}

impl Snapshotter {
    pub fn new(queue: Arc<DurableQueue>, path: PathBuf, interval: Duration) -> Self {
        Self {
            queue,
            path,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            match persist(Arc::clone(&self.queue), self.path.clone()).await {
                Ok(n) => debug!("Queue snapshot written ({n} messages)"),
                Err(e) => warn!("Queue snapshot failed: {e}"),
            }
        }
    }
}
