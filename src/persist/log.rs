//! Interaction log
//!
//! One append-only JSON-lines stream per worker index. Each append writes and
//! flushes a single complete line, so readers never observe a partial entry.
//! A worker's own concurrent callers are serialized through the handle's
//! mutex; streams of different workers are disjoint files and need no
//! coordination.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

/// What a log entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Visited,
    Scroll,
    Hover,
    Click,
    Typing,
    TimeSpent,
    Error,
}

/// One structured interaction event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub instance_number: usize,
    /// ISO-8601 local timestamp.
    pub timestamp: String,
    pub site: String,
    pub action: Action,
    pub details: Value,
}

/// Per-worker append-only log streams on disk.
pub struct InteractionLog {
    dir: PathBuf,
}

impl InteractionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stream_path(&self, worker: usize) -> PathBuf {
        self.dir.join(format!("instance_{}.jsonl", worker + 1))
    }

    /// Base directory the streams live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A handle that appends to one worker's stream. Appends through the same
    /// handle are serialized; clones of the handle share the critical section.
    pub fn handle(self: &Arc<Self>, worker: usize) -> LogHandle {
        LogHandle {
            log: self.clone(),
            worker,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Read a worker's full stream in insertion order. A missing stream is an
    /// empty one; undecodable lines are skipped rather than failing the read.
    pub fn read_all(&self, worker: usize) -> Vec<LogEntry> {
        let content = match fs::read_to_string(self.stream_path(worker)) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("worker {} log stream has an undecodable line, skipping: {}", worker, e);
                    None
                }
            })
            .collect()
    }

    fn append_line(&self, worker: usize, entry: &LogEntry) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let line = serde_json::to_string(entry).map_err(io::Error::from)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.stream_path(worker))?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}

/// Append handle for a single worker's stream.
#[derive(Clone)]
pub struct LogHandle {
    log: Arc<InteractionLog>,
    worker: usize,
    guard: Arc<Mutex<()>>,
}

impl LogHandle {
    /// Worker index this handle writes for.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Append one event. Appends never abort the worker; a write failure is
    /// logged and swallowed.
    pub async fn append(&self, site: &str, action: Action, details: Value) {
        let _serialized = self.guard.lock().await;

        let entry = LogEntry {
            instance_number: self.worker,
            timestamp: chrono::Local::now().to_rfc3339(),
            site: site.to_string(),
            action,
            details,
        };

        if let Err(e) = self.log.append_line(self.worker, &entry) {
            warn!("worker {} failed to append log entry: {}", self.worker, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log() -> (tempfile::TempDir, Arc<InteractionLog>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = Arc::new(InteractionLog::new(dir.path().join("logs")));
        (dir, log)
    }

    #[tokio::test]
    async fn appends_preserve_insertion_order() {
        let (_dir, log) = log();
        let handle = log.handle(0);

        handle.append("https://a.example", Action::Visited, json!({"url": "https://a.example"})).await;
        handle.append("https://a.example", Action::Scroll, json!({})).await;
        handle.append("https://a.example", Action::TimeSpent, json!({"seconds": 40.0})).await;

        let entries = log.read_all(0);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, Action::Visited);
        assert_eq!(entries[1].action, Action::Scroll);
        assert_eq!(entries[2].action, Action::TimeSpent);
        assert!(entries.iter().all(|e| e.instance_number == 0));
    }

    #[tokio::test]
    async fn streams_are_isolated_per_worker() {
        let (_dir, log) = log();
        log.handle(0).append("https://a.example", Action::Visited, json!({})).await;
        log.handle(1).append("https://b.example", Action::Visited, json!({})).await;

        let zero = log.read_all(0);
        let one = log.read_all(1);
        assert_eq!(zero.len(), 1);
        assert_eq!(one.len(), 1);
        assert_eq!(zero[0].site, "https://a.example");
        assert_eq!(one[0].site, "https://b.example");
        assert!(log.read_all(2).is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_through_one_handle_lose_nothing() {
        let (_dir, log) = log();
        let handle = log.handle(0);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let h = handle.clone();
            tasks.push(tokio::spawn(async move {
                h.append("https://a.example", Action::Scroll, json!({"turn": i})).await;
            }));
        }
        for t in tasks {
            t.await.expect("append task");
        }

        assert_eq!(log.read_all(0).len(), 20);
    }

    #[test]
    fn missing_stream_reads_as_empty() {
        let (_dir, log) = log();
        assert!(log.read_all(5).is_empty());
    }

    #[tokio::test]
    async fn undecodable_lines_are_skipped() {
        let (_dir, log) = log();
        let handle = log.handle(0);
        handle.append("https://a.example", Action::Visited, json!({})).await;

        // Simulate a torn write from a crashed process.
        fs::create_dir_all(log.dir()).expect("mkdir");
        let mut file = OpenOptions::new()
            .append(true)
            .open(log.dir().join("instance_1.jsonl"))
            .expect("open");
        writeln!(file, "{{\"instance_number\": 0, \"timest").expect("write");

        handle.append("https://a.example", Action::Click, json!({"tag": "A"})).await;

        let entries = log.read_all(0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, Action::Click);
    }

    #[test]
    fn entry_wire_shape_matches_the_log_format() {
        let entry = LogEntry {
            instance_number: 2,
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            site: "https://a.example".to_string(),
            action: Action::TimeSpent,
            details: json!({"seconds": 41.5}),
        };
        let value: Value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["instance_number"], 2);
        assert_eq!(value["action"], "time_spent");
        assert_eq!(value["details"]["seconds"], 41.5);
    }
}
