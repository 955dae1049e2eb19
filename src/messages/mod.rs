//! Worker-to-worker messaging.
//!
//! [`MessageBus`] delivers between workers in one process; [`MessageLog`]
//! gives the same semantics to out-of-process workers through a shared file.

pub mod bus;
pub mod log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use bus::MessageBus;
pub use log::MessageLog;

/// Recipient value that addresses every worker except the sender.
pub const BROADCAST: &str = "*";

/// A message between workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    /// Recipient id, or [`BROADCAST`].
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }

    /// Addressed to `worker_id` (directly or by broadcast) and not sent by it.
    pub fn is_for(&self, worker_id: &str) -> bool {
        (self.to == worker_id || self.is_broadcast()) && self.from != worker_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressing() {
        let direct = Message::new("a", "b", "hi");
        assert!(direct.is_for("b"));
        assert!(!direct.is_for("c"));

        let all = Message::new("a", BROADCAST, "hello all");
        assert!(all.is_broadcast());
        assert!(all.is_for("b"));
        assert!(!all.is_for("a"));
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_value(Message::new("a", "b", "x")).unwrap();
        assert_eq!(json["from"], "a");
        assert_eq!(json["to"], "b");
        assert!(json["timestamp"].is_string());
    }
}
