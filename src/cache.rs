use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::model::GenerationResponse;

/// Completed responses keyed by request identifier.
///
/// Enumeration follows first-insertion order; overwriting an identifier keeps
/// its position. Without a capacity the cache grows for the life of the
/// process. With one, inserting a new identifier into a full cache evicts the
/// oldest entry.
#[derive(Debug, Default)]
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, GenerationResponse>,
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::default(),
            capacity: capacity.filter(|&c| c > 0),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Inserts or overwrites. Returns the identifier evicted to make room, if any.
    pub fn put(&self, id: impl Into<String>, response: GenerationResponse) -> Option<String> {
        let id = id.into();
        let mut inner = self.inner.lock();

        if let Some(slot) = inner.entries.get_mut(&id) {
            *slot = response;
            return None;
        }

        let evicted = match self.capacity {
            Some(cap) if inner.entries.len() >= cap => {
                let oldest = inner.order.pop_front();
                if let Some(key) = &oldest {
                    inner.entries.remove(key);
                }
                oldest
            }
            _ => None,
        };

        inner.order.push_back(id.clone());
        inner.entries.insert(id, response);
        evicted
    }

    pub fn get(&self, id: &str) -> Option<GenerationResponse> {
        self.inner.lock().entries.get(id).cloned()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().order.iter().cloned().collect()
    }
}
