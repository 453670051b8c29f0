//! Registry of in-flight MQTT replies
//!
//! Maps a client-chosen `reply_msg_id` to the worker serving it. The
//! `working_replies` topic and the advertizement report its live keys.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    generation: u64,
    worker: AbortHandle,
    started: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

#[derive(Debug, Default)]
pub struct ReplyRegistry {
    inner: Mutex<Inner>,
}

impl ReplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the worker for `reply_id` and record it.
    ///
    /// `spawn` receives the entry's generation and runs under the registry
    /// lock, so the worker is visible before it can finish. A reused id
    /// replaces the previous entry.
    pub fn register_with<F>(&self, reply_id: &str, spawn: F) -> u64
    where
        F: FnOnce(u64) -> AbortHandle,
    {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let worker = spawn(generation);
        inner.entries.insert(
            reply_id.to_string(),
            Entry {
                generation,
                worker,
                started: Instant::now(),
            },
        );
        generation
    }

    /// Remove the entry of a finishing worker and collect entries of dead
    /// workers older than `retain_clear`.
    pub fn finish(&self, reply_id: &str, generation: u64, retain_clear: Duration) {
        let mut inner = self.inner.lock();
        if inner
            .entries
            .get(reply_id)
            .map_or(false, |e| e.generation == generation)
        {
            inner.entries.remove(reply_id);
        }
        inner
            .entries
            .retain(|_, e| !(e.worker.is_finished() && e.started.elapsed() > retain_clear));
    }

    /// Sorted ids whose workers are alive
    pub fn snapshot(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut ids: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| !e.worker.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, reply_id: &str) -> bool {
        self.inner.lock().entries.contains_key(reply_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
