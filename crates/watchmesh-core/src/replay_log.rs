//! Append-only, rotated replay log (spec §4.7). Durable messages are
//! appended to `<state_dir>/cluster/log/current`; rotation renames it to a
//! file named after the timestamp of the message that follows, so segments
//! sort by name in replay order. GC deletes any segment strictly older than
//! every connected peer's `local_log_position`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use watchmesh_types::Privilege;

use crate::error::ReplayLogError;

/// Segments are rolled once they hold this many records (spec §3, §4.7).
pub const DEFAULT_SEGMENT_SIZE: usize = 50_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityDescriptor {
    #[serde(rename = "type")]
    pub object_type: String,
    pub name: String,
    pub privs: Privilege,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: f64,
    /// Wire method this record was relayed under (e.g. `cluster::CheckResult`),
    /// so a replay to a reconnecting peer can rebuild the original envelope.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityDescriptor>,
    pub payload: Value,
}

pub struct ReplayLog {
    dir: PathBuf,
    segment_size: usize,
    current: Mutex<File>,
    record_count: AtomicUsize,
}

fn current_path(dir: &Path) -> PathBuf {
    dir.join("current")
}

impl ReplayLog {
    /// Opens (creating if needed) the log directory at `dir`. Per spec
    /// startup behaviour: close-then-rotate-then-reopen, so a process that
    /// crashed mid-segment starts clean.
    pub fn open(dir: impl Into<PathBuf>, segment_size: usize) -> Result<Self, ReplayLogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ReplayLogError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let log = Self {
            current: Mutex::new(Self::open_current(&dir)?),
            dir,
            segment_size,
            record_count: AtomicUsize::new(0),
        };
        if current_path(&log.dir).metadata().map(|m| m.len()).unwrap_or(0) > 0 {
            log.rotate(0.0)?;
        }
        Ok(log)
    }

    fn open_current(dir: &Path) -> Result<File, ReplayLogError> {
        let path = current_path(dir);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ReplayLogError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    /// Appends one durable record, rotating the segment first if it has
    /// already reached `segment_size`.
    pub fn append(&self, record: LogRecord) -> Result<(), ReplayLogError> {
        if self.record_count.load(Ordering::Relaxed) >= self.segment_size {
            self.rotate(record.ts)?;
        }
        let line = serde_json::to_string(&record).map_err(|e| ReplayLogError::CorruptSegment {
            path: current_path(&self.dir).display().to_string(),
            offset: 0,
            reason: e.to_string(),
        })?;
        let mut file = self.current.lock();
        writeln!(file, "{}:{},", line.len(), line).map_err(|source| ReplayLogError::Io {
            path: current_path(&self.dir).display().to_string(),
            source,
        })?;
        file.flush().map_err(|source| ReplayLogError::Io {
            path: current_path(&self.dir).display().to_string(),
            source,
        })?;
        self.record_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Renames `current` to a segment named after `next_ts` (the timestamp
    /// of the next message to arrive) and reopens `current` empty.
    pub fn rotate(&self, next_ts: f64) -> Result<(), ReplayLogError> {
        let mut file = self.current.lock();
        let from = current_path(&self.dir);
        if from.metadata().map(|m| m.len()).unwrap_or(0) > 0 {
            // filenames must sort lexicographically in timestamp order
            let to = self.dir.join(format!("{next_ts:020.6}"));
            fs::rename(&from, &to).map_err(|source| ReplayLogError::Io {
                path: from.display().to_string(),
                source,
            })?;
        }
        *file = Self::open_current(&self.dir)?;
        self.record_count.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn segment_paths(&self) -> Result<Vec<PathBuf>, ReplayLogError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .map_err(|source| ReplayLogError::Io {
                path: self.dir.display().to_string(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some("current"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn read_segment(path: &Path) -> Result<Vec<LogRecord>, ReplayLogError> {
        let file = File::open(path).map_err(|source| ReplayLogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (offset, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ReplayLogError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let Some((len_str, rest)) = line.split_once(':') else {
                tracing::warn!(path = ?path, offset, "replay log line missing length prefix, stopping segment");
                break;
            };
            let json = rest.strip_suffix(',').unwrap_or(rest);
            let _ = len_str;
            match serde_json::from_str::<LogRecord>(json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = ?path, offset, error = %e, "corrupt replay log record, skipping rest of segment");
                    break;
                }
            }
        }
        Ok(records)
    }

    /// Replays every durable record with `ts >= from_ts`, skipping records
    /// whose source is `skip_source` (source suppression) or whose security
    /// descriptor the caller's `allowed` predicate rejects. `sink` receives
    /// records in non-decreasing `ts` order across all segments including
    /// `current`.
    pub fn replay(
        &self,
        from_ts: f64,
        skip_source: Option<&str>,
        mut allowed: impl FnMut(&SecurityDescriptor) -> bool,
        mut sink: impl FnMut(&LogRecord),
    ) -> Result<(), ReplayLogError> {
        let mut paths = self.segment_paths()?;
        paths.push(current_path(&self.dir));
        for path in paths {
            if !path.exists() {
                continue;
            }
            for record in Self::read_segment(&path)? {
                if record.ts < from_ts {
                    continue;
                }
                if record.source_endpoint.as_deref() == skip_source {
                    continue;
                }
                if let Some(sec) = &record.security {
                    if !allowed(sec) {
                        continue;
                    }
                }
                sink(&record);
            }
        }
        Ok(())
    }

    /// GC: deletes any rotated segment whose filename timestamp is strictly
    /// less than `min_pos`, the minimum `local_log_position` over every
    /// non-self endpoint (spec §4.7).
    pub fn gc(&self, min_pos: f64) -> Result<usize, ReplayLogError> {
        let mut removed = 0;
        for path in self.segment_paths()? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(ts) = name.parse::<f64>() else {
                continue;
            };
            if ts < min_pos {
                fs::remove_file(&path).map_err(|source| ReplayLogError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total bytes on disk across every segment, for the replay-log-size
    /// metrics gauge.
    pub fn size_bytes(&self) -> u64 {
        self.segment_paths()
            .unwrap_or_default()
            .iter()
            .chain(std::iter::once(&current_path(&self.dir)))
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(ts: f64) -> LogRecord {
        LogRecord {
            ts,
            method: "test::Record".to_string(),
            source_endpoint: None,
            security: None,
            payload: json!({"n": ts}),
        }
    }

    #[test]
    fn appends_and_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), DEFAULT_SEGMENT_SIZE).unwrap();
        for i in 0..10 {
            log.append(record(i as f64)).unwrap();
        }
        let mut seen = Vec::new();
        log.replay(0.0, None, |_| true, |r| seen.push(r.ts)).unwrap();
        assert_eq!(seen, (0..10).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn replay_from_ts_skips_earlier_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), DEFAULT_SEGMENT_SIZE).unwrap();
        for i in 0..5 {
            log.append(record(i as f64)).unwrap();
        }
        let mut seen = Vec::new();
        log.replay(3.0, None, |_| true, |r| seen.push(r.ts)).unwrap();
        assert_eq!(seen, vec![3.0, 4.0]);
    }

    #[test]
    fn rotation_then_gc_removes_old_segments() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), 2).unwrap();
        for i in 0..5 {
            log.append(record(i as f64)).unwrap();
        }
        // at least one rotation should have occurred by now
        let removed = log.gc(3.0).unwrap();
        assert!(removed >= 1);
        let mut seen = Vec::new();
        log.replay(0.0, None, |_| true, |r| seen.push(r.ts)).unwrap();
        assert!(seen.iter().all(|ts| *ts >= 3.0));
    }

    #[test]
    fn source_suppression_skips_originating_peer() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReplayLog::open(dir.path(), DEFAULT_SEGMENT_SIZE).unwrap();
        let mut r = record(1.0);
        r.source_endpoint = Some("node-b".to_string());
        log.append(r).unwrap();
        log.append(record(2.0)).unwrap();

        let mut seen = Vec::new();
        log.replay(0.0, Some("node-b"), |_| true, |r| seen.push(r.ts)).unwrap();
        assert_eq!(seen, vec![2.0]);
    }
}
