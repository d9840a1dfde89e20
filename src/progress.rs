//! 中断再開のための進捗管理
//!
//! 完了IDは結果がジャーナルに書かれた後にだけ記録する。

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HarvestError;
use crate::storage::{read_json, write_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProgressFile {
    #[serde(default)]
    completed: Vec<String>,
    #[serde(default)]
    failed: BTreeMap<String, String>,
}

pub struct ProgressTracker {
    path: PathBuf,
    completed: Vec<String>,
    completed_set: HashSet<String>,
    failed: BTreeMap<String, String>,
    batch_size: usize,
    unflushed: usize,
}

impl ProgressTracker {
    /// 進捗ファイルを読む。壊れていれば空から始める
    pub fn load(path: impl Into<PathBuf>, batch_size: usize) -> Self {
        let path = path.into();
        let file = match read_json::<ProgressFile>(&path) {
            Ok(file) => file.unwrap_or_default(),
            Err(e) => {
                warn!("Progress file {:?} unreadable, starting over: {}", path, e);
                ProgressFile::default()
            }
        };

        let mut tracker = Self {
            path,
            completed: Vec::with_capacity(file.completed.len()),
            completed_set: HashSet::with_capacity(file.completed.len()),
            failed: file.failed,
            batch_size: batch_size.max(1),
            unflushed: 0,
        };
        for id in file.completed {
            tracker.insert_completed(id);
        }
        tracker
    }

    pub fn is_done(&self, record_id: &str) -> bool {
        self.completed_set.contains(record_id)
    }

    /// 結果の永続化が済んだレコードを完了にする
    pub fn mark_done(&mut self, record_id: &str) {
        self.failed.remove(record_id);
        if self.insert_completed(record_id.to_string()) {
            self.unflushed += 1;
        }
    }

    /// 失敗を記録する（完了にはしない）
    pub fn mark_failed(&mut self, record_id: &str, reason: impl Into<String>) {
        if !self.is_done(record_id) {
            self.failed.insert(record_id.to_string(), reason.into());
            self.unflushed += 1;
        }
    }

    pub fn should_flush(&self) -> bool {
        self.unflushed >= self.batch_size
    }

    pub fn flush(&mut self) -> Result<(), HarvestError> {
        let file = ProgressFile {
            completed: self.completed.clone(),
            failed: self.failed.clone(),
        };
        write_json_atomic(&self.path, &file)?;
        debug!(
            "Progress saved ({} completed, {} failed)",
            self.completed.len(),
            self.failed.len()
        );
        self.unflushed = 0;
        Ok(())
    }

    /// 条件を満たさない完了IDを未完了に戻す。戻した件数を返す
    pub fn retain_completed<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.completed.len();
        self.completed.retain(|id| keep(id));
        self.completed_set = self.completed.iter().cloned().collect();
        let dropped = before - self.completed.len();
        if dropped > 0 {
            self.unflushed += dropped;
        }
        dropped
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn failed(&self) -> &BTreeMap<String, String> {
        &self.failed
    }

    fn insert_completed(&mut self, id: String) -> bool {
        if self.completed_set.insert(id.clone()) {
            self.completed.push(id);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupted_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{bad json").unwrap();

        let tracker = ProgressTracker::load(&path, 10);
        assert_eq!(tracker.completed_count(), 0);
        assert!(tracker.failed().is_empty());
    }

    #[test]
    fn test_failure_is_not_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path().join("progress.json"), 10);

        tracker.mark_failed("rid-1", "HTTP 500");
        assert!(!tracker.is_done("rid-1"));
        assert_eq!(tracker.failed()["rid-1"], "HTTP 500");

        tracker.mark_done("rid-1");
        assert!(tracker.is_done("rid-1"));
        assert!(tracker.failed().is_empty());
    }

    #[test]
    fn test_save_deduplicates_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(
            &path,
            r#"{"completed": ["a", "a", "b"], "failed": {"x": "err"}, "details": []}"#,
        )
        .unwrap();

        let mut tracker = ProgressTracker::load(&path, 10);
        tracker.mark_done("a");
        tracker.flush().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["completed"], serde_json::json!(["a", "b"]));
        assert_eq!(raw["failed"]["x"], "err");
    }

    #[test]
    fn test_flush_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path().join("progress.json"), 2);

        tracker.mark_done("a");
        assert!(!tracker.should_flush());
        tracker.mark_done("a");
        assert!(!tracker.should_flush());
        tracker.mark_done("b");
        assert!(tracker.should_flush());

        tracker.flush().unwrap();
        assert!(!tracker.should_flush());
    }

    #[test]
    fn test_retain_completed() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::load(dir.path().join("progress.json"), 10);
        tracker.mark_done("a");
        tracker.mark_done("b");

        let dropped = tracker.retain_completed(|id| id == "a");
        assert_eq!(dropped, 1);
        assert!(tracker.is_done("a"));
        assert!(!tracker.is_done("b"));
    }
}
