//! Query Log
//!
//! Keeps recent question outcomes in memory and optionally appends each one
//! as a JSON line to a file.

use crate::adapt::AdaptationDecision;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub sql: Option<String>,
    pub adaptation: Option<AdaptationDecision>,
    pub success: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl QueryLogEntry {
    pub fn success(question: &str, adaptation: AdaptationDecision, elapsed_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            question: question.to_string(),
            sql: Some(adaptation.adapted_sql.clone()),
            adaptation: Some(adaptation),
            success: true,
            error: None,
            elapsed_ms,
        }
    }

    pub fn failure(question: &str, error: impl ToString, elapsed_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            question: question.to_string(),
            sql: None,
            adaptation: None,
            success: false,
            error: Some(error.to_string()),
            elapsed_ms,
        }
    }
}

pub struct QueryLog {
    log_file: Option<PathBuf>,
    entries: Mutex<VecDeque<QueryLogEntry>>,
    max_in_memory: usize,
}

impl QueryLog {
    pub fn new(log_file: Option<PathBuf>, max_in_memory: usize) -> Self {
        Self {
            log_file,
            entries: Mutex::new(VecDeque::new()),
            max_in_memory: max_in_memory.max(1),
        }
    }

    /// Record an entry. File errors are logged and swallowed.
    pub fn record(&self, entry: QueryLogEntry) {
        if self.log_file.is_some() {
            if let Err(e) = self.append(&entry) {
                warn!("Failed to write query log: {}", e);
            }
        }

        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push_back(entry);
        while entries.len() > self.max_in_memory {
            entries.pop_front();
        }
    }

    fn append(&self, entry: &QueryLogEntry) -> Result<()> {
        if let Some(ref log_file) = self.log_file {
            if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(log_file)?;
            let json = serde_json::to_string(entry)?;
            writeln!(file, "{}", json)?;
        }
        Ok(())
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<QueryLogEntry> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// (succeeded, failed, adapted)
    pub fn stats(&self) -> (usize, usize, usize) {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ok = entries.iter().filter(|e| e.success).count();
        let adapted = entries
            .iter()
            .filter(|e| e.adaptation.as_ref().map_or(false, |a| a.changed))
            .count();
        (ok, entries.len() - ok, adapted)
    }
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new(None, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_log_is_bounded() {
        let log = QueryLog::new(None, 2);
        for i in 0..3 {
            log.record(QueryLogEntry::failure(&format!("q{}", i), "boom", 1));
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "q2");
        assert_eq!(log.stats(), (0, 2, 0));
    }

    #[test]
    fn test_entries_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("queries.jsonl");
        let log = QueryLog::new(Some(path.clone()), 10);

        let decision = AdaptationDecision {
            original_sql: "SELECT 30;".to_string(),
            adapted_sql: "SELECT 60;".to_string(),
            changed: true,
            reason: "rewrote count 30 -> 60".to_string(),
        };
        log.record(QueryLogEntry::success("top 60", decision, 12));
        log.record(QueryLogEntry::failure("", "Invalid query: question is empty", 0));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: QueryLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.sql.as_deref(), Some("SELECT 60;"));
        assert_eq!(log.stats(), (1, 1, 1));
    }
}
