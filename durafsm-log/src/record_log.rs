//! The record log.

use crate::entry::LogEntry;
use crate::error::LogError;
use crate::frame::Frame;
use crate::segment::{list_segments, Segment, SegmentId};
use crate::DEFAULT_SEGMENT_SIZE;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// When appended frames are flushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Flush after every append.
    #[default]
    Always,
    /// Flush after every N appends.
    EveryN(u32),
    /// Only flush on explicit `sync()` (and on rotation / close).
    Manual,
}

/// Record log configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
    /// Segment size that triggers rotation.
    pub segment_size: u64,
    pub sync_policy: SyncPolicy,
}

impl LogConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_policy: SyncPolicy::default(),
        }
    }

    pub fn with_segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }
}

/// Counters describing log activity since open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    pub appends: u64,
    pub bytes_written: u64,
    pub syncs: u64,
    pub segments: u64,
    /// Bytes discarded from a torn tail during open.
    pub repaired_bytes: u64,
}

struct Writer {
    segment: Segment,
    next_sequence: u64,
    unsynced: u32,
    segments: u64,
}

/// Append-only log of [`LogEntry`] values.
pub struct RecordLog {
    config: LogConfig,
    writer: Mutex<Writer>,
    closed: AtomicBool,
    appends: AtomicU64,
    bytes_written: AtomicU64,
    syncs: AtomicU64,
    repaired_bytes: u64,
}

impl RecordLog {
    /// Opens the log directory, creating it if needed.
    ///
    /// A partially written frame at the end of the newest segment is cut
    /// away. Damage anywhere else fails the open.
    pub fn open(config: LogConfig) -> Result<Self, LogError> {
        std::fs::create_dir_all(&config.dir)?;
        let ids = list_segments(&config.dir)?;

        let mut max_sequence = 0u64;
        let mut repaired_bytes = 0u64;
        let mut last = None;

        for (i, &id) in ids.iter().enumerate() {
            let mut segment = Segment::open(&config.dir, id)?;
            let scan = segment.scan()?;
            if let Some(frame) = scan.frames.last() {
                max_sequence = max_sequence.max(frame.sequence);
            }

            let is_newest = i + 1 == ids.len();
            if scan.trailing_bytes > 0 {
                if !is_newest {
                    return Err(LogError::DamagedSegment {
                        path: segment.path().to_path_buf(),
                    });
                }
                tracing::warn!(
                    "Truncating {} {} bytes at end of {}",
                    scan.trailing_bytes,
                    if scan.damaged_tail { "damaged" } else { "torn" },
                    segment.path().display()
                );
                segment.truncate(scan.valid_len)?;
                repaired_bytes = scan.trailing_bytes;
            }
            if is_newest {
                last = Some(segment);
            }
        }

        let segment = match last {
            Some(segment) => segment,
            None => Segment::create(&config.dir, 1)?,
        };
        let segments = ids.len().max(1) as u64;

        tracing::info!(
            "Record log opened at {}: {} segment(s), next sequence {}",
            config.dir.display(),
            segments,
            max_sequence + 1
        );

        Ok(Self {
            config,
            writer: Mutex::new(Writer {
                segment,
                next_sequence: max_sequence + 1,
                unsynced: 0,
                segments,
            }),
            closed: AtomicBool::new(false),
            appends: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
            repaired_bytes,
        })
    }

    /// Appends an entry and returns its sequence number.
    pub fn append(&self, entry: &LogEntry) -> Result<u64, LogError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        let payload = Bytes::from(serde_json::to_vec(entry)?);

        let mut writer = self.writer.lock();
        let sequence = writer.next_sequence;
        let frame = Frame::new(entry.frame_kind(), sequence, payload);
        let size = frame.encoded_len() as u64;

        if !writer.segment.is_empty() && writer.segment.len() + size > self.config.segment_size {
            self.rotate(&mut writer)?;
        }

        writer.segment.append(&frame)?;
        writer.next_sequence += 1;
        writer.unsynced += 1;
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(size, Ordering::Relaxed);

        let flush = match self.config.sync_policy {
            SyncPolicy::Always => true,
            SyncPolicy::EveryN(n) => writer.unsynced >= n.max(1),
            SyncPolicy::Manual => false,
        };
        if flush {
            self.flush(&mut writer)?;
        }

        Ok(sequence)
    }

    fn rotate(&self, writer: &mut Writer) -> Result<(), LogError> {
        self.flush(writer)?;
        let next: SegmentId = writer.segment.id() + 1;
        writer.segment = Segment::create(&self.config.dir, next)?;
        writer.segments += 1;
        tracing::debug!("Record log rotated to segment {}", next);
        Ok(())
    }

    fn flush(&self, writer: &mut Writer) -> Result<(), LogError> {
        if writer.segment.sync()? {
            self.syncs.fetch_add(1, Ordering::Relaxed);
        }
        writer.unsynced = 0;
        Ok(())
    }

    /// Forces buffered frames to disk.
    pub fn sync(&self) -> Result<(), LogError> {
        let mut writer = self.writer.lock();
        self.flush(&mut writer)
    }

    /// Reads every entry in sequence order.
    pub fn replay(&self) -> Result<Vec<(u64, LogEntry)>, LogError> {
        // Hold the writer so no frame is half-visible while scanning.
        let _writer = self.writer.lock();
        let mut entries = Vec::new();
        for id in list_segments(&self.config.dir)? {
            let mut segment = Segment::open(&self.config.dir, id)?;
            for frame in segment.scan()?.frames {
                let entry: LogEntry = serde_json::from_slice(&frame.payload)?;
                entries.push((frame.sequence, entry));
            }
        }
        Ok(entries)
    }

    /// The sequence number the next append will receive.
    pub fn next_sequence(&self) -> u64 {
        self.writer.lock().next_sequence
    }

    pub fn stats(&self) -> LogStats {
        LogStats {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            segments: self.writer.lock().segments,
            repaired_bytes: self.repaired_bytes,
        }
    }

    /// Flushes and refuses further appends.
    pub fn close(&self) -> Result<(), LogError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::segment_filename;
    use crate::FRAME_HEADER_SIZE;
    use chrono::{Duration, TimeZone, Utc};
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn record(id: &str, secs: i64, state: &str) -> LogEntry {
        LogEntry::Record {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs),
            state: state.to_string(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();

        assert_eq!(log.append(&record("a", 0, "initial")).unwrap(), 1);
        assert_eq!(log.append(&record("a", 1, "uploaded")).unwrap(), 2);
        assert_eq!(log.append(&record("b", 2, "initial")).unwrap(), 3);

        let entries = log.replay().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1], (2, record("a", 1, "uploaded")));
        assert_eq!(log.next_sequence(), 4);

        let stats = log.stats();
        assert_eq!(stats.appends, 3);
        assert_eq!(stats.syncs, 3);
        assert_eq!(stats.segments, 1);
    }

    #[test]
    fn test_reopen_continues_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
            log.append(&record("a", 0, "initial")).unwrap();
            log.append(&record("a", 1, "uploaded")).unwrap();
            log.close().unwrap();
        }

        let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
        assert_eq!(log.next_sequence(), 3);
        assert_eq!(log.append(&record("a", 2, "rejected")).unwrap(), 3);
        assert_eq!(log.replay().unwrap().len(), 3);
    }

    #[test]
    fn test_rotation() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig::new(dir.path())
            .with_segment_size(256)
            .with_sync_policy(SyncPolicy::Manual);
        let log = RecordLog::open(config.clone()).unwrap();

        for i in 0..20 {
            log.append(&record(&format!("doc-{}", i), i, "initial")).unwrap();
        }
        log.sync().unwrap();
        assert!(log.stats().segments > 1);
        drop(log);

        let log = RecordLog::open(config).unwrap();
        let entries = log.replay().unwrap();
        assert_eq!(entries.len(), 20);
        let seqs: Vec<u64> = entries.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_torn_tail_is_repaired() {
        let dir = TempDir::new().unwrap();
        {
            let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
            log.append(&record("a", 0, "initial")).unwrap();
            log.append(&record("a", 1, "uploaded")).unwrap();
        }

        let path = dir.path().join(segment_filename(1));
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
        assert!(log.stats().repaired_bytes > 0);
        let entries = log.replay().unwrap();
        assert_eq!(entries, vec![(1, record("a", 0, "initial"))]);
        assert_eq!(log.append(&record("a", 1, "uploaded")).unwrap(), 2);
    }

    #[test]
    fn test_damaged_final_frame_is_repaired() {
        let dir = TempDir::new().unwrap();
        {
            let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
            log.append(&record("a", 0, "initial")).unwrap();
            log.append(&record("a", 1, "uploaded")).unwrap();
        }

        // Full length on disk but the last payload bytes never landed.
        let path = dir.path().join(segment_filename(1));
        let mut bytes = std::fs::read(&path).unwrap();
        let end = bytes.len();
        bytes[end - 10..].fill(0);
        std::fs::write(&path, bytes).unwrap();

        let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
        assert!(log.stats().repaired_bytes > 0);
        let entries = log.replay().unwrap();
        assert_eq!(entries, vec![(1, record("a", 0, "initial"))]);
        assert_eq!(log.append(&record("a", 1, "uploaded")).unwrap(), 2);
    }

    #[test]
    fn test_damaged_middle_frame_fails_open() {
        let dir = TempDir::new().unwrap();
        {
            let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
            log.append(&record("a", 0, "initial")).unwrap();
            log.append(&record("a", 1, "uploaded")).unwrap();
        }

        let path = dir.path().join(segment_filename(1));
        let mut bytes = std::fs::read(&path).unwrap();
        // Inside the first frame's payload.
        bytes[FRAME_HEADER_SIZE + 2] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            RecordLog::open(LogConfig::new(dir.path())),
            Err(LogError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_damaged_older_segment_fails_open() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig::new(dir.path()).with_segment_size(128);
        {
            let log = RecordLog::open(config.clone()).unwrap();
            for i in 0..6 {
                log.append(&record("a", i, "initial")).unwrap();
            }
        }

        let path = dir.path().join(segment_filename(1));
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        assert!(matches!(
            RecordLog::open(config),
            Err(LogError::DamagedSegment { .. })
        ));
    }

    #[test]
    fn test_every_n_policy() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::open(
            LogConfig::new(dir.path()).with_sync_policy(SyncPolicy::EveryN(3)),
        )
        .unwrap();
        for i in 0..7 {
            log.append(&record("a", i, "initial")).unwrap();
        }
        assert_eq!(log.stats().syncs, 2);
    }

    #[test]
    fn test_closed_log_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::open(LogConfig::new(dir.path())).unwrap();
        log.close().unwrap();
        log.close().unwrap();
        assert!(matches!(
            log.append(&record("a", 0, "initial")),
            Err(LogError::Closed)
        ));
    }
}
