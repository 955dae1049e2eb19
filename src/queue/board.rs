//! File-backed shared task queue.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::item::{QueueItem, QueueStatus};
use crate::error::QueueError;
use crate::store::{self, FileLock};

const QUEUE_FILE: &str = "taskboard.json";
const LOCK_FILE: &str = "taskboard.lock";

/// On-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default)]
    tasks: Vec<QueueItem>,
}

#[derive(Debug)]
struct QueueFiles {
    data: PathBuf,
    lock: PathBuf,
}

impl QueueFiles {
    fn load(&self) -> Result<Vec<QueueItem>, QueueError> {
        let Some(content) = store::read_optional(&self.data)? else {
            return Ok(Vec::new());
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let doc: QueueDocument =
            serde_json::from_str(&content).map_err(|e| QueueError::Corrupt {
                path: self.data.clone(),
                reason: e.to_string(),
            })?;
        Ok(doc.tasks)
    }

    fn save(&self, items: &[QueueItem]) -> Result<(), QueueError> {
        let doc = serde_json::json!({ "tasks": items });
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| QueueError::Corrupt {
            path: self.data.clone(),
            reason: e.to_string(),
        })?;
        store::write_atomic(&self.data, &bytes)?;
        Ok(())
    }
}

/// Dependency- and priority-ordered work list with atomic claiming.
///
/// With a state directory, every mutation takes the exclusive lock on
/// `taskboard.lock`, reloads `taskboard.json`, mutates, and writes the whole
/// document back. Several processes (and several handles in one process) may
/// share one directory. Without a state directory the queue lives in memory.
#[derive(Debug)]
pub struct TaskQueue {
    items: Mutex<Vec<QueueItem>>,
    files: Option<QueueFiles>,
    stale_timeout: Option<Duration>,
}

impl TaskQueue {
    /// Single-process queue with no persistence.
    pub fn in_memory() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            files: None,
            stale_timeout: None,
        }
    }

    /// Open (or create) the queue stored in `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, QueueError> {
        std::fs::create_dir_all(state_dir)?;
        let files = QueueFiles {
            data: state_dir.join(QUEUE_FILE),
            lock: state_dir.join(LOCK_FILE),
        };
        let items = files.load()?;
        debug!(path = %files.data.display(), tasks = items.len(), "Opened task queue");
        Ok(Self {
            items: Mutex::new(items),
            files: Some(files),
            stale_timeout: None,
        })
    }

    /// Revert claims older than `timeout` to pending during `claim`.
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = Some(timeout);
        self
    }

    /// Path of the queue document, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.files.as_ref().map(|f| f.data.as_path())
    }

    /// Append a pending item and return its id.
    pub fn add(
        &self,
        description: impl Into<String>,
        depends_on: Vec<String>,
        priority: i64,
    ) -> Result<String, QueueError> {
        let item = QueueItem::new(description, depends_on, priority);
        let id = item.id.clone();
        let preview = preview(&item.description);

        self.transact(|items| {
            items.push(item);
            Ok(((), true))
        })?;

        info!(task_id = %id, priority, "Task added: {}", preview);
        Ok(id)
    }

    /// Claim the best available item for `worker_id`.
    pub fn claim(&self, worker_id: &str) -> Result<Option<QueueItem>, QueueError> {
        self.claim_at(worker_id, Utc::now())
    }

    /// [`claim`](Self::claim) with an explicit clock.
    pub(crate) fn claim_at(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>, QueueError> {
        let stale_timeout = self
            .stale_timeout
            .map(|t| chrono::Duration::from_std(t).unwrap_or(chrono::Duration::MAX));

        let claimed = self.transact(|items| {
            let mut dirty = false;

            if let Some(timeout) = stale_timeout {
                for item in items.iter_mut().filter(|i| i.is_stale(now, timeout)) {
                    warn!(
                        task_id = %item.id,
                        assigned_to = item.assigned_to.as_deref().unwrap_or(""),
                        "Stale claim reverted to pending"
                    );
                    item.mark_released();
                    dirty = true;
                }
            }

            let Some(index) = next_claimable(items) else {
                return Ok((None, dirty));
            };
            let item = &mut items[index];
            item.mark_claimed(worker_id, now);
            Ok((Some(item.clone()), true))
        })?;

        if let Some(item) = &claimed {
            info!(task_id = %item.id, worker_id, "Task claimed: {}", preview(&item.description));
        }
        Ok(claimed)
    }

    /// Mark an item completed with an optional result.
    pub fn complete(&self, id: &str, result: Option<String>) -> Result<(), QueueError> {
        self.mutate(id, |item| {
            item.mark_finished(QueueStatus::Completed, result);
            Ok(())
        })?;
        info!(task_id = %id, "Task completed");
        Ok(())
    }

    /// Mark an item failed, recording `error` as its result.
    pub fn fail(&self, id: &str, error: &str) -> Result<(), QueueError> {
        self.mutate(id, |item| {
            item.mark_finished(QueueStatus::Failed, Some(error.to_string()));
            Ok(())
        })?;
        warn!(task_id = %id, "Task failed: {}", preview(error));
        Ok(())
    }

    /// Return an in-progress item to pending.
    pub fn release(&self, id: &str) -> Result<(), QueueError> {
        self.mutate(id, |item| {
            if item.status != QueueStatus::InProgress {
                return Err(QueueError::InvalidState {
                    id: item.id.clone(),
                    action: "release",
                    status: item.status.to_string(),
                });
            }
            item.mark_released();
            Ok(())
        })?;
        info!(task_id = %id, "Task released back to pending");
        Ok(())
    }

    /// Release every in-progress item held by `worker_id`, returning their ids.
    pub fn release_agent_tasks(&self, worker_id: &str) -> Result<Vec<String>, QueueError> {
        let released = self.transact(|items| {
            let released: Vec<String> = items
                .iter_mut()
                .filter(|i| {
                    i.status == QueueStatus::InProgress
                        && i.assigned_to.as_deref() == Some(worker_id)
                })
                .map(|i| {
                    i.mark_released();
                    i.id.clone()
                })
                .collect();
            let dirty = !released.is_empty();
            Ok((released, dirty))
        })?;

        if !released.is_empty() {
            info!(worker_id, count = released.len(), ids = ?released, "Released worker tasks");
        }
        Ok(released)
    }

    /// Snapshot of every item, reloaded from disk when persisted.
    pub fn status(&self) -> Result<Vec<QueueItem>, QueueError> {
        self.reload()?;
        Ok(self.lock_items().clone())
    }

    pub fn pending_count(&self) -> Result<usize, QueueError> {
        self.count(|s| s == QueueStatus::Pending)
    }

    pub fn completed_count(&self) -> Result<usize, QueueError> {
        self.count(|s| s == QueueStatus::Completed)
    }

    /// True when at least one item exists and every item is finished.
    pub fn all_done(&self) -> Result<bool, QueueError> {
        self.reload()?;
        let items = self.lock_items();
        Ok(!items.is_empty() && items.iter().all(|i| i.status.is_finished()))
    }

    /// Refresh the in-memory view from disk. No-op for in-memory queues.
    ///
    /// Unlocked: writers replace the document atomically, so the snapshot is
    /// consistent if possibly already stale.
    pub fn reload(&self) -> Result<(), QueueError> {
        if let Some(files) = &self.files {
            let loaded = files.load()?;
            *self.lock_items() = loaded;
        }
        Ok(())
    }

    fn count(&self, pred: impl Fn(QueueStatus) -> bool) -> Result<usize, QueueError> {
        self.reload()?;
        Ok(self.lock_items().iter().filter(|i| pred(i.status)).count())
    }

    fn mutate(
        &self,
        id: &str,
        f: impl FnOnce(&mut QueueItem) -> Result<(), QueueError>,
    ) -> Result<(), QueueError> {
        self.transact(|items| {
            let item = items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| QueueError::NotFound { id: id.to_string() })?;
            f(item)?;
            Ok(((), true))
        })
    }

    /// Lock, reload, mutate, and write back if `f` reports a change.
    fn transact<T>(
        &self,
        f: impl FnOnce(&mut Vec<QueueItem>) -> Result<(T, bool), QueueError>,
    ) -> Result<T, QueueError> {
        let mut items = self.lock_items();
        let Some(files) = &self.files else {
            return f(&mut *items).map(|(value, _)| value);
        };

        let _lock = FileLock::acquire(&files.lock)?;
        *items = files.load()?;
        let (value, dirty) = f(&mut *items)?;
        if dirty {
            files.save(&*items)?;
        }
        Ok(value)
    }

    fn lock_items(&self) -> MutexGuard<'_, Vec<QueueItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Highest-priority pending item whose dependencies are all completed.
///
/// Ties go to the earliest `created_at`, then to insertion order.
fn next_claimable(items: &[QueueItem]) -> Option<usize> {
    let completed: std::collections::HashSet<&str> = items
        .iter()
        .filter(|i| i.status == QueueStatus::Completed)
        .map(|i| i.id.as_str())
        .collect();

    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        items[b]
            .priority
            .cmp(&items[a].priority)
            .then(items[a].created_at.cmp(&items[b].created_at))
    });

    order.into_iter().find(|&i| {
        let item = &items[i];
        item.status == QueueStatus::Pending
            && item.depends_on.iter().all(|dep| completed.contains(dep.as_str()))
    })
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[QueueItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn claims_each_item_once() {
        let queue = TaskQueue::in_memory();
        let a = queue.add("a", vec![], 0).unwrap();
        let b = queue.add("b", vec![], 0).unwrap();

        let first = queue.claim("w1").unwrap().unwrap();
        let second = queue.claim("w2").unwrap().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(second.id, b);
        assert_eq!(first.assigned_to.as_deref(), Some("w1"));
        assert!(queue.claim("w3").unwrap().is_none());
    }

    #[test]
    fn dependencies_gate_claims() {
        let queue = TaskQueue::in_memory();
        let a = queue.add("a", vec![], 0).unwrap();
        let b = queue.add("b", vec![], 10).unwrap();
        let c = queue.add("c", vec![a.clone(), b.clone()], 100).unwrap();

        assert_eq!(queue.claim("w").unwrap().unwrap().id, b);
        assert_eq!(queue.claim("w").unwrap().unwrap().id, a);
        assert!(queue.claim("w").unwrap().is_none());

        queue.complete(&a, None).unwrap();
        assert!(queue.claim("w").unwrap().is_none());

        queue.complete(&b, Some("done".into())).unwrap();
        assert_eq!(queue.claim("w").unwrap().unwrap().id, c);
    }

    #[test]
    fn failed_dependency_blocks_forever() {
        let queue = TaskQueue::in_memory();
        let a = queue.add("a", vec![], 0).unwrap();
        queue.add("b", vec![a.clone()], 0).unwrap();

        queue.claim("w").unwrap();
        queue.fail(&a, "broken").unwrap();
        assert!(queue.claim("w").unwrap().is_none());
    }

    #[test]
    fn priority_then_creation_order() {
        let queue = TaskQueue::in_memory();
        let low = queue.add("low", vec![], 1).unwrap();
        let high_first = queue.add("high 1", vec![], 5).unwrap();
        let high_second = queue.add("high 2", vec![], 5).unwrap();

        assert_eq!(queue.claim("w").unwrap().unwrap().id, high_first);
        assert_eq!(queue.claim("w").unwrap().unwrap().id, high_second);
        assert_eq!(queue.claim("w").unwrap().unwrap().id, low);
    }

    #[test]
    fn blocked_high_priority_does_not_preempt() {
        let queue = TaskQueue::in_memory();
        let a = queue.add("a", vec![], 0).unwrap();
        queue.add("urgent", vec![a.clone()], 1000).unwrap();

        assert_eq!(queue.claim("w").unwrap().unwrap().id, a);
    }

    #[test]
    fn complete_and_fail_record_results() {
        let queue = TaskQueue::in_memory();
        let a = queue.add("a", vec![], 0).unwrap();
        let b = queue.add("b", vec![], 0).unwrap();
        queue.claim("w").unwrap();
        queue.claim("w").unwrap();

        queue.complete(&a, Some("ok".into())).unwrap();
        queue.fail(&b, "nope").unwrap();

        let items = queue.status().unwrap();
        assert_eq!(items[0].status, QueueStatus::Completed);
        assert_eq!(items[0].result.as_deref(), Some("ok"));
        assert!(items[0].completed_at.is_some());
        assert_eq!(items[1].status, QueueStatus::Failed);
        assert_eq!(items[1].result.as_deref(), Some("nope"));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let queue = TaskQueue::in_memory();
        let err = queue.complete("missing", None).unwrap_err();
        assert!(matches!(err, QueueError::NotFound { .. }));
        assert!(matches!(queue.fail("missing", "x"), Err(QueueError::NotFound { .. })));
        assert!(matches!(queue.release("missing"), Err(QueueError::NotFound { .. })));
    }

    #[test]
    fn release_requires_in_progress() {
        let queue = TaskQueue::in_memory();
        let a = queue.add("a", vec![], 0).unwrap();

        let err = queue.release(&a).unwrap_err();
        assert!(matches!(err, QueueError::InvalidState { .. }));

        queue.claim("w").unwrap();
        queue.release(&a).unwrap();
        let item = &queue.status().unwrap()[0];
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(item.assigned_to.is_none());
        assert!(item.claimed_at.is_none());
    }

    #[test]
    fn release_agent_tasks_only_touches_that_worker() {
        let queue = TaskQueue::in_memory();
        let a = queue.add("a", vec![], 0).unwrap();
        let b = queue.add("b", vec![], 0).unwrap();
        let c = queue.add("c", vec![], 0).unwrap();
        queue.claim("w1").unwrap();
        queue.claim("w2").unwrap();
        queue.claim("w1").unwrap();

        let mut released = queue.release_agent_tasks("w1").unwrap();
        released.sort();
        let mut expected = vec![a.clone(), c.clone()];
        expected.sort();
        assert_eq!(released, expected);

        let items = queue.status().unwrap();
        let b_item = items.iter().find(|i| i.id == b).unwrap();
        assert_eq!(b_item.status, QueueStatus::InProgress);
        assert!(queue.release_agent_tasks("nobody").unwrap().is_empty());
    }

    #[test]
    fn stale_sweep_boundary() {
        let queue = TaskQueue::in_memory().with_stale_timeout(Duration::from_secs(60));
        let a = queue.add("a", vec![], 0).unwrap();

        let t0 = Utc::now();
        assert_eq!(queue.claim_at("w1", t0).unwrap().unwrap().id, a);

        let just_before = t0 + chrono::Duration::seconds(59);
        assert!(queue.claim_at("w2", just_before).unwrap().is_none());

        let just_after = t0 + chrono::Duration::seconds(61);
        let reclaimed = queue.claim_at("w2", just_after).unwrap().unwrap();
        assert_eq!(reclaimed.id, a);
        assert_eq!(reclaimed.assigned_to.as_deref(), Some("w2"));
    }

    #[test]
    fn no_sweep_without_timeout() {
        let queue = TaskQueue::in_memory();
        queue.add("a", vec![], 0).unwrap();
        let t0 = Utc::now();
        queue.claim_at("w1", t0).unwrap();
        assert!(
            queue
                .claim_at("w2", t0 + chrono::Duration::days(30))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn counts_and_all_done() {
        let queue = TaskQueue::in_memory();
        assert!(!queue.all_done().unwrap());

        let a = queue.add("a", vec![], 0).unwrap();
        let b = queue.add("b", vec![], 0).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 2);
        assert!(!queue.all_done().unwrap());

        queue.claim("w").unwrap();
        queue.claim("w").unwrap();
        queue.complete(&a, None).unwrap();
        assert_eq!(queue.completed_count().unwrap(), 1);
        assert!(!queue.all_done().unwrap());

        queue.fail(&b, "x").unwrap();
        assert!(queue.all_done().unwrap());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn persisted_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let queue = TaskQueue::open(dir.path()).unwrap();
        let a = queue.add("a", vec![], 2).unwrap();
        let b = queue.add("b", vec![a.clone()], 0).unwrap();
        queue.claim("w1").unwrap();
        queue.complete(&a, Some("result".into())).unwrap();
        queue.claim("w1").unwrap();

        let before = queue.status().unwrap();
        let reopened = TaskQueue::open(dir.path()).unwrap();
        let after = reopened.status().unwrap();

        assert_eq!(ids(&before), vec![a.as_str(), b.as_str()]);
        assert_eq!(before, after);
        assert!(dir.path().join(LOCK_FILE).exists());
        assert_eq!(queue.path(), Some(dir.path().join(QUEUE_FILE).as_path()));
    }

    #[test]
    fn document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let queue = TaskQueue::open(dir.path()).unwrap();
        queue.add("a", vec![], 0).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(QUEUE_FILE)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let task = &doc["tasks"][0];
        assert_eq!(task["status"], "pending");
        assert_eq!(task["description"], "a");
        assert!(task["assigned_to"].is_null());
        assert!(task["depends_on"].as_array().unwrap().is_empty());
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(QUEUE_FILE), "{ not json").unwrap();
        assert!(matches!(TaskQueue::open(dir.path()), Err(QueueError::Corrupt { .. })));
    }

    #[test]
    fn second_handle_sees_first_handles_writes() {
        let dir = tempfile::tempdir().unwrap();
        let one = TaskQueue::open(dir.path()).unwrap();
        let two = TaskQueue::open(dir.path()).unwrap();

        let a = one.add("a", vec![], 0).unwrap();
        let b = two.add("b", vec![], 0).unwrap();

        assert_eq!(one.status().unwrap().len(), 2);
        assert_eq!(two.claim("w2").unwrap().unwrap().id, a);
        assert_eq!(one.claim("w1").unwrap().unwrap().id, b);
        assert!(two.claim("w2").unwrap().is_none());
    }
}
