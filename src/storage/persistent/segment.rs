//! Segment files holding compacted snapshots of the record set.
//!
//! Segments are immutable. Each one is written to a temp file, fsynced and
//! renamed into place, so a segment either exists completely or not at all.
//!
//! # Layout
//! ```text
//! <dir>/segment_00001.seg
//! <dir>/segment_00002.seg
//! ```
//! Each file is `[header][SegmentHeader][SegmentData]`, every part framed by
//! the codec.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::record::TaskRecord;

use super::codec;

/// A finalized segment file.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    /// WAL sequence range covered by this segment [inclusive, inclusive].
    pub sequence_range: (u64, u64),
}

impl Segment {
    /// Open an existing segment, reading only its header.
    pub fn open(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let _version = codec::read_header(&mut reader)?;
        let header: SegmentHeader = codec::decode(&mut reader)?;

        Ok(Self {
            path: path.to_path_buf(),
            sequence_range: (header.sequence_start, header.sequence_end),
        })
    }

    /// Get the path to this segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records from this segment.
    pub fn read_all(&self) -> IoResult<SegmentData> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let _version = codec::read_header(&mut reader)?;
        let _header: SegmentHeader = codec::decode(&mut reader)?;
        codec::decode(&mut reader)
    }
}

/// Segment file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// First WAL sequence number in this segment.
    pub sequence_start: u64,
    /// Last WAL sequence number in this segment.
    pub sequence_end: u64,
    /// Number of records in this segment.
    pub record_count: u64,
    /// When this segment was written.
    pub created_at: DateTime<Utc>,
}

/// Records stored in a segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentData {
    /// Every record at snapshot time.
    pub records: Vec<TaskRecord>,
}

impl SegmentData {
    /// Number of records.
    pub fn record_count(&self) -> u64 {
        self.records.len() as u64
    }
}

/// Writes one segment atomically (temp file, fsync, rename).
pub struct SegmentWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
    sequence_start: u64,
    sequence_end: u64,
    data_written: bool,
}

impl SegmentWriter {
    /// Start a new segment at a temporary path next to `final_path`.
    pub fn new(final_path: PathBuf, sequence_start: u64) -> IoResult<Self> {
        let temp_path = final_path.with_extension(format!("seg.{}.tmp", Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(writer),
            sequence_start,
            sequence_end: sequence_start,
            data_written: false,
        })
    }

    /// Write the segment contents. May only be called once.
    pub fn write_data(&mut self, data: &SegmentData, sequence_end: u64) -> IoResult<()> {
        if self.data_written {
            return Err(IoError::new(ErrorKind::Other, "write_data can only be called once"));
        }
        self.sequence_end = sequence_end;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;

        let header = SegmentHeader {
            sequence_start: self.sequence_start,
            sequence_end: self.sequence_end,
            record_count: data.record_count(),
            created_at: Utc::now(),
        };

        writer.write_all(&codec::encode(&header)?)?;
        writer.write_all(&codec::encode(data)?)?;
        self.data_written = true;

        Ok(())
    }

    /// Flush, fsync and rename into place.
    ///
    /// This is the commit point: once it returns the segment is durable.
    pub fn finalize(mut self) -> IoResult<Segment> {
        if !self.data_written {
            return Err(IoError::new(ErrorKind::Other, "segment has no data"));
        }
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "temp_path already consumed"))?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp_path, &self.final_path)?;
        sync_parent_dir(&self.final_path);

        Ok(Segment {
            path: self.final_path.clone(),
            sequence_range: (self.sequence_start, self.sequence_end),
        })
    }

    /// Abort the write and remove the temp file.
    pub fn abort(mut self) -> IoResult<()> {
        self.writer.take();
        if let Some(temp_path) = self.temp_path.take() {
            if temp_path.exists() {
                fs::remove_file(temp_path)?;
            }
        }
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Some(ref temp_path) = self.temp_path {
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
            }
        }
    }
}

fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
}

/// Make renames and removals in `dir` durable. Failure is logged only.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "failed to fsync segment directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Manages the segment files of a database.
#[derive(Debug)]
pub struct SegmentManager {
    dir: PathBuf,
    segments: Vec<Segment>,
    next_segment_id: u32,
}

impl SegmentManager {
    /// Open or create a segment directory.
    ///
    /// Stale temp files from interrupted compactions are removed.
    pub fn open(dir: &Path) -> IoResult<Self> {
        fs::create_dir_all(dir)?;

        let mut segments = Vec::new();
        let mut next_segment_id = 1u32;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().is_some_and(|e| e == "tmp") {
                debug!(path = %path.display(), "removing stale segment temp file");
                let _ = fs::remove_file(&path);
                continue;
            }

            if path.extension().is_some_and(|e| e == "seg") {
                let id = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix("segment_"))
                    .and_then(|s| s.parse::<u32>().ok());
                let Some(id) = id else { continue };
                next_segment_id = next_segment_id.max(id + 1);

                match Segment::open(&path) {
                    Ok(seg) => segments.push(seg),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to open segment"),
                }
            }
        }

        segments.sort_by_key(|s| s.sequence_range.0);

        Ok(Self {
            dir: dir.to_path_buf(),
            segments,
            next_segment_id,
        })
    }

    /// Get the directory containing segments.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get all segments, ordered by sequence.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Highest WAL sequence number covered by a segment.
    pub fn persisted_sequence(&self) -> u64 {
        self.segments.last().map_or(0, |s| s.sequence_range.1)
    }

    /// Allocate a path for a new segment.
    pub fn next_segment_path(&mut self) -> PathBuf {
        let name = format!("segment_{:05}.seg", self.next_segment_id);
        self.next_segment_id += 1;
        self.dir.join(name)
    }

    /// Create a writer for the next segment.
    pub fn create_segment_writer(&mut self, sequence_start: u64) -> IoResult<SegmentWriter> {
        let path = self.next_segment_path();
        SegmentWriter::new(path, sequence_start)
    }

    /// Register a finalized segment.
    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
        self.segments.sort_by_key(|s| s.sequence_range.0);
    }

    /// Delete every segment older than the newest one.
    ///
    /// Each segment is a full snapshot, so the newest supersedes the rest.
    /// Returns the number of files removed.
    pub fn retire_superseded(&mut self) -> IoResult<usize> {
        if self.segments.len() <= 1 {
            return Ok(0);
        }
        let keep = self.segments.split_off(self.segments.len() - 1);
        let retired = std::mem::replace(&mut self.segments, keep);

        for segment in &retired {
            match fs::remove_file(segment.path()) {
                Ok(()) => debug!(path = %segment.path().display(), "removed superseded segment"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        sync_dir(&self.dir);
        Ok(retired.len())
    }

    /// Load the records of the newest segment.
    ///
    /// Older segments left behind by a crash before retirement are
    /// ignored; the newest snapshot already contains their records.
    pub fn load_latest_records(&self) -> IoResult<Vec<TaskRecord>> {
        match self.segments.last() {
            Some(segment) => Ok(segment.read_all()?.records),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordId, TaskMetadata};
    use tempfile::tempdir;

    fn record(id: u64, taskhash: &str) -> TaskRecord {
        TaskRecord {
            id: RecordId(id),
            method: "TestMethod".to_string(),
            outhash: "out".to_string(),
            taskhash: taskhash.to_string(),
            unihash: "uni".to_string(),
            created: Utc::now(),
            metadata: TaskMetadata::default(),
        }
    }

    #[test]
    fn test_segment_manager_open_empty() {
        let dir = tempdir().unwrap();
        let manager = SegmentManager::open(dir.path()).unwrap();

        assert!(manager.segments().is_empty());
        assert_eq!(manager.persisted_sequence(), 0);
        assert_eq!(manager.dir(), dir.path());
    }

    #[test]
    fn test_segment_path_allocation() {
        let dir = tempdir().unwrap();
        let mut manager = SegmentManager::open(dir.path()).unwrap();

        let path1 = manager.next_segment_path();
        let path2 = manager.next_segment_path();

        assert_ne!(path1, path2);
        assert!(path1.to_string_lossy().contains("segment_00001"));
        assert!(path2.to_string_lossy().contains("segment_00002"));
    }

    #[test]
    fn test_segment_writer_roundtrip() {
        let dir = tempdir().unwrap();
        let mut manager = SegmentManager::open(dir.path()).unwrap();

        let data = SegmentData {
            records: vec![record(1, "t1"), record(2, "t2")],
        };

        let mut writer = manager.create_segment_writer(1).unwrap();
        writer.write_data(&data, 10).unwrap();
        let segment = writer.finalize().unwrap();
        assert_eq!(segment.sequence_range, (1, 10));
        manager.add_segment(segment);

        let reopened = SegmentManager::open(dir.path()).unwrap();
        assert_eq!(reopened.persisted_sequence(), 10);
        let records = reopened.load_latest_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].taskhash, "t2");
    }

    fn write_segment(manager: &mut SegmentManager, start: u64, records: Vec<TaskRecord>) {
        let mut writer = manager.create_segment_writer(start).unwrap();
        writer.write_data(&SegmentData { records }, start).unwrap();
        let segment = writer.finalize().unwrap();
        manager.add_segment(segment);
    }

    #[test]
    fn test_retire_keeps_only_newest_snapshot() {
        let dir = tempdir().unwrap();
        let mut manager = SegmentManager::open(dir.path()).unwrap();

        write_segment(&mut manager, 1, vec![record(1, "t1")]);
        write_segment(&mut manager, 2, vec![record(1, "t1"), record(2, "t2")]);
        write_segment(&mut manager, 3, vec![record(1, "t1"), record(2, "t2"), record(3, "t3")]);
        assert_eq!(manager.segments().len(), 3);

        assert_eq!(manager.retire_superseded().unwrap(), 2);
        assert_eq!(manager.segments().len(), 1);
        assert_eq!(manager.persisted_sequence(), 3);
        assert_eq!(manager.retire_superseded().unwrap(), 0);

        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);

        let reopened = SegmentManager::open(dir.path()).unwrap();
        assert_eq!(reopened.load_latest_records().unwrap().len(), 3);

        // Numbering continues past the retired files
        let mut reopened = reopened;
        assert!(reopened
            .next_segment_path()
            .to_string_lossy()
            .contains("segment_00004"));
    }

    #[test]
    fn test_latest_snapshot_wins_over_leftovers() {
        let dir = tempdir().unwrap();
        let mut manager = SegmentManager::open(dir.path()).unwrap();

        write_segment(&mut manager, 1, vec![record(1, "t1")]);
        write_segment(&mut manager, 2, vec![record(1, "t1"), record(2, "t2")]);

        // Crash before retirement: both files remain
        let reopened = SegmentManager::open(dir.path()).unwrap();
        assert_eq!(reopened.segments().len(), 2);
        let records = reopened.load_latest_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].taskhash, "t2");
    }

    #[test]
    fn test_segment_writer_abort() {
        let dir = tempdir().unwrap();
        let mut manager = SegmentManager::open(dir.path()).unwrap();

        let writer = manager.create_segment_writer(1).unwrap();
        let temp_path = writer.temp_path.clone().unwrap();
        assert!(temp_path.exists());

        writer.abort().unwrap();
        assert!(!temp_path.exists());
        assert!(SegmentManager::open(dir.path()).unwrap().segments().is_empty());
    }
}
