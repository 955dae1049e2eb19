//! In-process message bus with one FIFO inbox per registered worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

use super::{BROADCAST, Message};

struct Inbox {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl Inbox {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
        })
    }
}

/// Point-to-point and broadcast delivery between workers of one pool.
#[derive(Default)]
pub struct MessageBus {
    inboxes: RwLock<HashMap<String, Arc<Inbox>>>,
    history: RwLock<Vec<Message>>,
}

impl MessageBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Give `worker_id` an inbox. Registering twice keeps the existing one.
    pub async fn register(&self, worker_id: &str) {
        let mut inboxes = self.inboxes.write().await;
        if !inboxes.contains_key(worker_id) {
            inboxes.insert(worker_id.to_string(), Inbox::new());
            info!(worker_id, "Worker registered on message bus");
        }
    }

    /// Drop `worker_id`'s inbox; undelivered messages are discarded.
    pub async fn unregister(&self, worker_id: &str) {
        if self.inboxes.write().await.remove(worker_id).is_some() {
            debug!(worker_id, "Worker unregistered from message bus");
        }
    }

    /// Deliver to one worker. Unknown recipients are logged and dropped.
    pub async fn send(&self, from: &str, to: &str, content: &str) {
        let msg = Message::new(from, to, content);
        self.history.write().await.push(msg.clone());

        let inboxes = self.inboxes.read().await;
        match inboxes.get(to) {
            Some(inbox) => {
                let _ = inbox.tx.send(msg);
                debug!(from, to, "Message delivered");
            }
            None => warn!(from, to, "Message to unknown worker dropped"),
        }
    }

    /// Deliver to every registered worker except the sender.
    pub async fn broadcast(&self, from: &str, content: &str) {
        let msg = Message::new(from, BROADCAST, content);
        self.history.write().await.push(msg.clone());

        let inboxes = self.inboxes.read().await;
        let mut recipients = 0;
        for (id, inbox) in inboxes.iter() {
            if id != from {
                let _ = inbox.tx.send(msg.clone());
                recipients += 1;
            }
        }
        debug!(from, recipients, "Broadcast delivered");
    }

    /// Drain `worker_id`'s inbox.
    ///
    /// If nothing is queued and `wait` is non-zero, waits for a single message
    /// or until `wait` elapses. Unregistered workers get an empty list.
    pub async fn receive(&self, worker_id: &str, wait: Duration) -> Vec<Message> {
        let Some(inbox) = self.inboxes.read().await.get(worker_id).cloned() else {
            return Vec::new();
        };

        let mut rx = inbox.rx.lock().await;
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }

        if messages.is_empty() && !wait.is_zero() {
            if let Ok(Some(msg)) = tokio::time::timeout(wait, rx.recv()).await {
                messages.push(msg);
            }
        }

        messages
    }

    /// Every message ever sent, in send order.
    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    pub async fn agent_count(&self) -> usize {
        self.inboxes.read().await.len()
    }
}
