//! Stat egress - appends per-second Stats to a file
//!
//! Stats are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::Stat;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Egress writer for Stats
pub struct StatEgress {
    file_path: String,
    written: AtomicU64,
    failed: AtomicU64,
}

impl StatEgress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self {
            file_path: file_path.to_string(),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Write a Stat to the egress file
    /// Returns true if successful, false otherwise
    pub fn write_stat(&self, stat: &Stat) -> bool {
        let result = serde_json::to_string(stat)
            .map_err(std::io::Error::from)
            .and_then(|json| self.append_line(&json));

        match result {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                debug!(time = %stat.time, requests = %stat.total_count(), "stat_egressed");
                true
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(time = %stat.time, error = %e, "stat_egress_failed");
                false
            }
        }
    }

    /// Append a line to the egress file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn stat(time: i64) -> Stat {
        Stat { time, success_count: 3, tps_success: 3.0, response_time: 12.5, ..Stat::default() }
    }

    #[test]
    fn test_write_stat() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("stats.jsonl");
        let egress = StatEgress::new(file_path.to_str().unwrap());

        assert!(egress.write_stat(&stat(1_700_000_000)));
        assert_eq!(egress.written(), 1);

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));

        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["Time"], 1_700_000_000);
        assert_eq!(parsed["SuccessCount"], 3);
        assert_eq!(parsed["ResponseTime"], 12.5);
    }

    #[test]
    fn test_append_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("stats.jsonl");
        fs::write(&file_path, "{\"existing\":\"data\"}\n").unwrap();

        let egress = StatEgress::new(file_path.to_str().unwrap());
        egress.write_stat(&stat(1));
        egress.write_stat(&stat(2));

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("existing"));

        let last: Stat = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last, stat(2));
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested_path = dir.path().join("nested").join("dir").join("stats.jsonl");
        let egress = StatEgress::new(nested_path.to_str().unwrap());

        assert!(egress.write_stat(&stat(5)));
        assert!(nested_path.exists());
    }

    #[test]
    fn test_failure_is_counted() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for append
        let egress = StatEgress::new(dir.path().to_str().unwrap());

        assert!(!egress.write_stat(&stat(9)));
        assert_eq!(egress.failed(), 1);
        assert_eq!(egress.written(), 0);
    }
}
