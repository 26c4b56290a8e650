//! In-flight request tracking.
//!
//! Every accepted request is registered here for the duration of its backend
//! call. The returned [`QueueTicket`] removes the entry when dropped, so
//! `len()` is the number of requests currently being processed while
//! `received()` counts every request ever accepted.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::model::GenerationRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<QueuedRequest>,
    next_seq: u64,
}

#[derive(Debug, Default, Clone)]
pub struct RequestQueue {
    inner: Arc<Mutex<QueueInner>>,
    received: Arc<AtomicU64>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request: &GenerationRequest) -> QueueTicket {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.pending.push_back(QueuedRequest {
            id: request.id.clone(),
            created_at: request.created_at,
            seq,
        });
        self.received.fetch_add(1, Ordering::Relaxed);

        QueueTicket {
            inner: Arc::clone(&self.inner),
            seq,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Identifiers in arrival order. Duplicates appear once per submission.
    pub fn pending_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .pending
            .iter()
            .map(|entry| entry.id.clone())
            .collect()
    }
}

/// Keeps one request registered in the queue until dropped.
#[derive(Debug)]
pub struct QueueTicket {
    inner: Arc<Mutex<QueueInner>>,
    seq: u64,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.pending.iter().position(|e| e.seq == self.seq) {
            inner.pending.remove(pos);
        }
    }
}
