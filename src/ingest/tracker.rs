use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Ephemeral status of an upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Progress of one upload, independent of the durable document status.
/// Clients poll this by task id before a document id is known to them.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub status: TaskStatus,
    /// 0–100, monotonically non-decreasing while processing.
    pub progress: u8,
    pub stage: Option<String>,
    pub doc_id: Option<String>,
    pub error: Option<String>,
}

impl UploadTask {
    fn new() -> Self {
        Self {
            status: TaskStatus::Processing,
            progress: 0,
            stage: None,
            doc_id: None,
            error: None,
        }
    }
}

/// In-memory map of upload tasks.
///
/// Entries are written only by the admission call that creates them and the
/// single background job that owns them; the lock guards the map structure
/// for concurrent polling readers. Nothing is persisted — a restart loses
/// all tasks, and document-level truth is recovered from the metadata store
/// by the reconciler.
///
/// Eviction policy: entries live for the process lifetime, but when the map
/// exceeds `capacity` the oldest *terminal* entries are dropped. In-flight
/// entries are never evicted.
pub struct TaskTracker {
    inner: RwLock<TrackerInner>,
    capacity: usize,
}

struct TrackerInner {
    tasks: HashMap<String, UploadTask>,
    /// Insertion order, oldest first, for eviction scans.
    order: VecDeque<String>,
}

impl TaskTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(TrackerInner {
                tasks: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Create a task entry with the given initial progress and stage.
    pub fn insert(&self, task_id: &str, progress: u8, stage: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if inner.tasks.len() >= self.capacity {
            evict_oldest_terminal(&mut inner);
        }

        let mut task = UploadTask::new();
        task.progress = progress;
        task.stage = Some(stage.to_string());
        inner.tasks.insert(task_id.to_string(), task);
        inner.order.push_back(task_id.to_string());
    }

    /// Snapshot of a task; None for unknown ids.
    pub fn get(&self, task_id: &str) -> Option<UploadTask> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.tasks.get(task_id).cloned()
    }

    /// Advance progress and stage. Progress never moves backwards.
    pub fn update_progress(&self, task_id: &str, progress: u8, stage: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.progress = task.progress.max(progress.min(100));
            task.stage = Some(stage.to_string());
        }
    }

    /// Mark a task completed with the resulting document id.
    pub fn complete(&self, task_id: &str, doc_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.stage = Some("done".to_string());
            task.doc_id = Some(doc_id.to_string());
        }
    }

    /// Mark a task failed with a human-readable error.
    pub fn fail(&self, task_id: &str, error: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error.to_string());
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_oldest_terminal(inner: &mut TrackerInner) {
    let mut evicted = None;
    for (idx, id) in inner.order.iter().enumerate() {
        if let Some(task) = inner.tasks.get(id) {
            if task.status != TaskStatus::Processing {
                evicted = Some((idx, id.clone()));
                break;
            }
        } else {
            // Stale order entry; drop it.
            evicted = Some((idx, id.clone()));
            break;
        }
    }
    if let Some((idx, id)) = evicted {
        inner.order.remove(idx);
        inner.tasks.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let tracker = TaskTracker::new(100);
        tracker.insert("t1", 10, "saving");

        let task = tracker.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.progress, 10);
        assert_eq!(task.stage.as_deref(), Some("saving"));
        assert!(task.doc_id.is_none());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_unknown_task_is_none() {
        let tracker = TaskTracker::new(100);
        assert!(tracker.get("nope").is_none());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let tracker = TaskTracker::new(100);
        tracker.insert("t1", 10, "saving");
        tracker.update_progress("t1", 60, "embedding");
        tracker.update_progress("t1", 25, "parsing");

        // A late lower update never rolls progress back.
        let task = tracker.get("t1").unwrap();
        assert_eq!(task.progress, 60);
        assert_eq!(task.stage.as_deref(), Some("parsing"));
    }

    #[test]
    fn test_complete_sets_doc_id_and_full_progress() {
        let tracker = TaskTracker::new(100);
        tracker.insert("t1", 10, "saving");
        tracker.complete("t1", "doc-42");

        let task = tracker.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.doc_id.as_deref(), Some("doc-42"));
    }

    #[test]
    fn test_fail_records_error() {
        let tracker = TaskTracker::new(100);
        tracker.insert("t1", 10, "saving");
        tracker.fail("t1", "embedding service unavailable");

        let task = tracker.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("embedding service unavailable"));
    }

    #[test]
    fn test_eviction_prefers_oldest_terminal() {
        let tracker = TaskTracker::new(2);
        tracker.insert("t1", 10, "saving");
        tracker.insert("t2", 10, "saving");
        tracker.complete("t1", "doc-1");

        tracker.insert("t3", 10, "saving");
        assert!(tracker.get("t1").is_none());
        assert!(tracker.get("t2").is_some());
        assert!(tracker.get("t3").is_some());
    }

    #[test]
    fn test_in_flight_entries_survive_pressure() {
        let tracker = TaskTracker::new(2);
        tracker.insert("t1", 10, "saving");
        tracker.insert("t2", 10, "saving");

        // Everything is in flight, so nothing is evicted and the map grows.
        tracker.insert("t3", 10, "saving");
        assert_eq!(tracker.len(), 3);
    }
}
