//! Cross-handle behavior of the file-backed task queue.
//!
//! Every test opens several independent `TaskQueue` handles on one state
//! directory, the same way separate coordinator processes share it.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use agentpool::error::QueueError;
use agentpool::queue::{QueueStatus, TaskQueue};

#[test]
fn dependency_then_priority() {
    let dir = tempfile::tempdir().unwrap();
    let queue = TaskQueue::open(dir.path()).unwrap();

    let a = queue.add("A", vec![], 0).unwrap();
    let b = queue.add("B", vec![a.clone()], 10).unwrap();

    let first = queue.claim("w1").unwrap().unwrap();
    assert_eq!(first.id, a);
    assert!(queue.claim("w2").unwrap().is_none());

    queue.complete(&a, Some("done".into())).unwrap();
    let second = queue.claim("w2").unwrap().unwrap();
    assert_eq!(second.id, b);
    assert_eq!(second.assigned_to.as_deref(), Some("w2"));
}

#[test]
fn concurrent_claims_are_disjoint() {
    let dir = tempfile::tempdir().unwrap();
    let setup = TaskQueue::open(dir.path()).unwrap();
    let expected: HashSet<String> = (0..24)
        .map(|i| setup.add(format!("task {i}"), vec![], 0).unwrap())
        .collect();

    let path = Arc::new(dir.path().to_path_buf());
    let handles: Vec<_> = (0..6)
        .map(|w| {
            let path = path.clone();
            thread::spawn(move || {
                let queue = TaskQueue::open(&path).unwrap();
                let worker = format!("worker-{w}");
                let mut claimed = Vec::new();
                while let Some(item) = queue.claim(&worker).unwrap() {
                    claimed.push(item.id);
                }
                claimed
            })
        })
        .collect();

    let mut seen = Vec::new();
    for handle in handles {
        seen.extend(handle.join().unwrap());
    }

    let unique: HashSet<String> = seen.iter().cloned().collect();
    assert_eq!(seen.len(), 24, "an item was claimed twice");
    assert_eq!(unique, expected);
    assert!(setup.claim("late").unwrap().is_none());
}

#[test]
fn concurrent_completions_do_not_clobber() {
    let dir = tempfile::tempdir().unwrap();
    let queue = TaskQueue::open(dir.path()).unwrap();
    let a = queue.add("A", vec![], 0).unwrap();
    let b = queue.add("B", vec![], 0).unwrap();
    queue.claim("w1").unwrap().unwrap();
    queue.claim("w2").unwrap().unwrap();

    let handles: Vec<_> = [(a.clone(), "result A"), (b.clone(), "result B")]
        .into_iter()
        .map(|(id, text)| {
            let path = dir.path().to_path_buf();
            thread::spawn(move || {
                let handle = TaskQueue::open(&path).unwrap();
                handle.complete(&id, Some(text.to_string())).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let items = TaskQueue::open(dir.path()).unwrap().status().unwrap();
    let find = |id: &str| items.iter().find(|i| i.id == id).unwrap().clone();
    assert_eq!(find(&a).status, QueueStatus::Completed);
    assert_eq!(find(&a).result.as_deref(), Some("result A"));
    assert_eq!(find(&b).status, QueueStatus::Completed);
    assert_eq!(find(&b).result.as_deref(), Some("result B"));
}

#[test]
fn reopened_queue_round_trips_every_status() {
    let dir = tempfile::tempdir().unwrap();
    let queue = TaskQueue::open(dir.path()).unwrap();
    let done = queue.add("done", vec![], 3).unwrap();
    let failed = queue.add("failed", vec![], 2).unwrap();
    queue.add("running", vec![], 1).unwrap();
    queue.add("waiting", vec![done.clone()], 0).unwrap();

    queue.claim("w").unwrap();
    queue.claim("w").unwrap();
    queue.claim("w").unwrap();
    queue.complete(&done, Some("ok".into())).unwrap();
    queue.fail(&failed, "broken").unwrap();

    let before = queue.status().unwrap();
    let after = TaskQueue::open(dir.path()).unwrap().status().unwrap();
    assert_eq!(before, after);

    let statuses: Vec<_> = after.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![
            QueueStatus::Completed,
            QueueStatus::Failed,
            QueueStatus::InProgress,
            QueueStatus::Pending
        ]
    );
    let running = &after[2];
    assert!(running.claimed_at.is_some() && running.assigned_to.is_some());
    assert!(after[0].completed_at.is_some() && after[0].assigned_to.is_none());
}

#[test]
fn stale_claim_is_recovered_by_another_handle() {
    let dir = tempfile::tempdir().unwrap();
    let first = TaskQueue::open(dir.path()).unwrap();
    let id = first.add("slow", vec![], 0).unwrap();
    assert_eq!(first.claim("crashed").unwrap().unwrap().id, id);

    let second = TaskQueue::open(dir.path())
        .unwrap()
        .with_stale_timeout(Duration::from_secs(600));
    assert!(second.claim("rescuer").unwrap().is_none());

    // Age the claim on disk past the timeout.
    let path = first.path().unwrap().to_path_buf();
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let old = Utc::now() - chrono::Duration::minutes(11);
    doc["tasks"][0]["claimed_at"] = serde_json::json!(old);
    std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let rescued = second.claim("rescuer").unwrap().unwrap();
    assert_eq!(rescued.id, id);
    assert_eq!(rescued.assigned_to.as_deref(), Some("rescuer"));
}

#[test]
fn release_and_errors() {
    let dir = tempfile::tempdir().unwrap();
    let queue = TaskQueue::open(dir.path()).unwrap();
    let id = queue.add("x", vec![], 0).unwrap();

    assert!(matches!(
        queue.release(&id),
        Err(QueueError::InvalidState { action: "release", .. })
    ));
    assert!(matches!(
        queue.complete("missing", None),
        Err(QueueError::NotFound { .. })
    ));

    queue.claim("w1").unwrap();
    assert_eq!(queue.release_agent_tasks("w1").unwrap(), vec![id.clone()]);
    assert_eq!(queue.pending_count().unwrap(), 1);
    assert!(!queue.all_done().unwrap());

    queue.claim("w1").unwrap();
    queue.complete(&id, None).unwrap();
    assert!(queue.all_done().unwrap());
    assert_eq!(queue.completed_count().unwrap(), 1);
}
