//! Correlation table for in-flight remote calls.
//!
//! Maps correlation id to a oneshot waiter. Completion and eviction both
//! remove entries under the same lock, so a late response racing an
//! eviction can never leak a waiter.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::protocol::ResponseStatus;
use uuid::Uuid;

#[derive(Debug)]
pub enum Completion {
    Response { status: ResponseStatus, payload: Value },
    Disconnected { server_id: String },
}

#[derive(Default)]
pub struct Correlator {
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<Completion>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh id; the receiver resolves on completion.
    pub async fn register(&self, id: Uuid) -> oneshot::Receiver<Completion> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id, tx);
        rx
    }

    /// Complete one waiter. Returns false when the id is unknown — a late
    /// response after timeout or eviction.
    pub async fn complete(&self, id: Uuid, completion: Completion) -> bool {
        match self.waiters.lock().await.remove(&id) {
            Some(tx) => tx.send(completion).is_ok(),
            None => false,
        }
    }

    /// Drop a waiter whose caller gave up (timeout).
    pub async fn abandon(&self, id: Uuid) {
        self.waiters.lock().await.remove(&id);
    }

    /// Fail every outstanding waiter with a disconnect error.
    pub async fn fail_all(&self, server_id: &str) {
        let drained: Vec<_> = self.waiters.lock().await.drain().collect();
        for (_, tx) in drained {
            let _ = tx.send(Completion::Disconnected { server_id: server_id.to_string() });
        }
    }

    pub async fn outstanding(&self) -> usize {
        self.waiters.lock().await.len()
    }
}
