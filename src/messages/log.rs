//! File-backed message log for workers in other processes.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BROADCAST, Message};
use crate::error::MessageError;
use crate::store::{self, with_exclusive_lock};

const LOG_FILE: &str = "messages.jsonl";
const LOCK_FILE: &str = "messages.lock";

/// One line of `messages.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    #[serde(flatten)]
    message: Message,
    #[serde(default)]
    read_by: Vec<String>,
}

/// Shared append-only message log guarded by `messages.lock`.
#[derive(Debug, Clone)]
pub struct MessageLog {
    path: PathBuf,
    lock: PathBuf,
}

impl MessageLog {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(LOG_FILE),
            lock: state_dir.join(LOCK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a direct message.
    pub fn post(&self, from: &str, to: &str, content: &str) -> Result<(), MessageError> {
        let record = MessageRecord {
            message: Message::new(from, to, content),
            read_by: Vec::new(),
        };
        let mut line = serde_json::to_string(&record).map_err(|e| self.corrupt(e))?;
        line.push('\n');

        with_exclusive_lock(&self.lock, || {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            file.write_all(line.as_bytes())?;
            Ok::<_, MessageError>(())
        })?;
        debug!(from, to, "Message appended to log");
        Ok(())
    }

    /// Append a message addressed to everyone but the sender.
    pub fn broadcast(&self, from: &str, content: &str) -> Result<(), MessageError> {
        self.post(from, BROADCAST, content)
    }

    /// Return unread messages for `worker_id` and mark them read.
    pub fn check(&self, worker_id: &str) -> Result<Vec<Message>, MessageError> {
        with_exclusive_lock(&self.lock, || {
            let Some(content) = store::read_optional(&self.path)? else {
                return Ok(Vec::new());
            };

            let mut records = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str::<MessageRecord>(line))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.corrupt(e))?;

            let mut unread = Vec::new();
            for record in &mut records {
                if record.message.is_for(worker_id)
                    && !record.read_by.iter().any(|r| r == worker_id)
                {
                    record.read_by.push(worker_id.to_string());
                    unread.push(record.message.clone());
                }
            }

            if !unread.is_empty() {
                let mut out = String::new();
                for record in &records {
                    out.push_str(&serde_json::to_string(record).map_err(|e| self.corrupt(e))?);
                    out.push('\n');
                }
                store::write_atomic(&self.path, out.as_bytes())?;
            }
            Ok(unread)
        })
    }

    fn corrupt(&self, e: serde_json::Error) -> MessageError {
        MessageError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}
