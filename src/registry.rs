//! Concurrent-safe table of subscription queues.
//!
//! One lock guards both mutation (subscribe/unsubscribe) and the snapshot
//! taken for fan-out. Delivery happens after the lock is released, so a
//! full subscriber queue stalls the caller but never the registry.

use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};

use crate::error::ConnError;
use crate::message::MessageData;

/// Subscription id -> delivery queue.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    queues: Mutex<HashMap<String, mpsc::Sender<MessageData>>>,
    capacity: usize,
}

impl SubscriptionRegistry {
    /// Create an empty registry whose queues hold up to `capacity` envelopes.
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register `id` and return the receiving end of its new queue.
    pub async fn insert(&self, id: &str) -> Result<mpsc::Receiver<MessageData>, ConnError> {
        let mut map = self.queues.lock().await;
        if map.contains_key(id) {
            return Err(ConnError::SubscriptionExists(id.to_string()));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        map.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Remove `id`. The subscriber's receiver drains what was already queued
    /// and then yields `None`.
    pub async fn remove(&self, id: &str) -> Result<(), ConnError> {
        let mut map = self.queues.lock().await;
        match map.remove(id) {
            Some(_) => Ok(()),
            None => Err(ConnError::SubscriptionNotFound(id.to_string())),
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.queues.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.queues.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queues.lock().await.is_empty()
    }

    /// Registered ids, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.queues.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn sender(&self, id: &str) -> Option<mpsc::Sender<MessageData>> {
        self.queues.lock().await.get(id).cloned()
    }

    async fn snapshot(&self) -> Vec<(String, mpsc::Sender<MessageData>)> {
        let map = self.queues.lock().await;
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Deliver `md` to the queue registered under `id`.
    ///
    /// Returns `false` if no such subscription exists or its receiver was
    /// dropped; waits while the queue is full.
    pub async fn deliver(&self, id: &str, md: MessageData) -> bool {
        let Some(tx) = self.sender(id).await else {
            return false;
        };
        tx.send(md).await.is_ok()
    }

    /// Deliver a clone of `md` to every subscription registered when the
    /// lock was taken.
    ///
    /// Returns how many queues accepted the envelope. Queues whose receiver
    /// was dropped are skipped.
    pub async fn fan_out(&self, md: &MessageData) -> usize {
        let snapshot = self.snapshot().await;
        let mut delivered = 0;
        for (id, tx) in snapshot {
            if tx.send(md.clone()).await.is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(subscription = %id, "subscriber queue closed, skipping");
            }
        }
        delivered
    }
}
