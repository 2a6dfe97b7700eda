//! Write-Ahead Log (WAL) for crash recovery.
//!
//! Every accepted insert is appended here, and fsynced when configured,
//! before it becomes visible to readers. On startup the log is replayed on
//! top of the newest segments.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::TaskRecord;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A new task record, with its assigned id and creation time.
    TaskInsert(TaskRecord),

    /// Checkpoint marker (all entries before this are persisted to segments)
    Checkpoint {
        /// Last sequence number covered by the new segment.
        up_to_sequence: u64,
    },
}

struct WalState {
    writer: BufWriter<File>,
    sequence: u64,
    /// File length after the last complete entry.
    len: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

/// Write-Ahead Log for crash recovery.
///
/// Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// If the file exists, reads the last sequence number.
    /// If the file doesn't exist, creates it with the header.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let sequence = if file.metadata()?.len() >= codec::HEADER_LEN {
            let (sequence, valid_len, torn) = Self::scan(path)?;
            if torn {
                // Drop the partial entry so new appends start on a frame boundary
                warn!(valid_len, "discarding torn WAL tail");
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            sequence
        } else {
            // New (or header-less) file: start fresh
            let mut file = file;
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                sequence,
                len,
                broken: false,
            }),
            sync_on_write,
        })
    }

    fn state(&self) -> IoResult<MutexGuard<'_, WalState>> {
        self.state
            .lock()
            .map_err(|_| IoError::new(ErrorKind::Other, "poisoned lock: wal.state"))
    }

    /// Append an entry to the WAL.
    ///
    /// Returns the sequence number assigned to this entry. The entry is
    /// written as a single framed buffer so a crash leaves at most a torn
    /// tail, which replay ignores. If the write fails, the file is cut
    /// back to the previous entry before the error is returned.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.state()?;
        if state.broken {
            return Err(IoError::new(
                ErrorKind::Other,
                "WAL unusable after a failed rollback; reopen the database",
            ));
        }

        let candidate = state.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };

        let encoded = codec::encode(&entry)?;

        if let Err(e) = Self::write_entry(&mut state.writer, &encoded, self.sync_on_write) {
            if let Err(rollback) = self.rollback(&mut state) {
                warn!(error = %rollback, len = state.len, "WAL rollback failed");
                state.broken = true;
            }
            return Err(e);
        }

        state.len += encoded.len() as u64;
        state.sequence = candidate;

        Ok(candidate)
    }

    fn write_entry(writer: &mut BufWriter<File>, bytes: &[u8], sync: bool) -> IoResult<()> {
        writer.write_all(bytes)?;
        writer.flush()?;
        if sync {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Drop everything past the last complete entry and start a fresh writer.
    fn rollback(&self, state: &mut WalState) -> IoResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let old = std::mem::replace(&mut state.writer, BufWriter::new(file));
        // into_parts so the failed entry's buffered bytes are never flushed
        let (_file, _unwritten) = old.into_parts();

        let file = state.writer.get_ref();
        file.set_len(state.len)?;
        file.sync_all()
    }

    /// Iterate over all entries in the WAL.
    ///
    /// Used during recovery to replay mutations.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.state()?.sequence)
    }

    /// Get the WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Truncate the WAL after a checkpoint.
    ///
    /// Only call this after the data it holds has been written to a
    /// finalized segment.
    pub fn truncate(&self) -> IoResult<()> {
        let mut state = self.state()?;
        state.writer.flush()?;

        {
            let mut file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        state.writer = BufWriter::new(file);
        state.sequence = 0;
        state.len = codec::HEADER_LEN;
        state.broken = false;

        Ok(())
    }

    /// Scan the log, returning the last good sequence number, the byte
    /// length of the well-formed prefix, and whether a torn tail follows it.
    fn scan(path: &Path) -> IoResult<(u64, u64, bool)> {
        let mut last_seq = 0;
        let mut iter = WalIterator::new(path)?;

        for entry_result in iter.by_ref() {
            match entry_result {
                Ok(entry) => last_seq = entry.sequence,
                Err(e) => {
                    // Replay reports this as fatal; keep the file untouched
                    warn!(sequence = last_seq + 1, error = %e, "WAL corruption detected");
                    return Ok((last_seq, iter.file_size, false));
                }
            }
        }

        Ok((last_seq, iter.valid_end, iter.valid_end < iter.file_size))
    }
}

/// Iterator over WAL entries.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    valid_end: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let _version = codec::read_header(&mut reader)?;

        Ok(Self {
            reader,
            file_size,
            valid_end: codec::HEADER_LEN,
        })
    }

    fn at_eof(&mut self) -> IoResult<bool> {
        let pos = self.reader.stream_position()?;
        Ok(pos >= self.file_size)
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.at_eof() {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => {
                match self.reader.stream_position() {
                    Ok(pos) => self.valid_end = pos,
                    Err(e) => return Some(Err(e)),
                }
                Some(Ok(entry))
            }
            // Torn tail from a crash mid-append
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
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
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(WalEntryKind::TaskInsert(record(1, "t1"))).unwrap();
        wal.append(WalEntryKind::TaskInsert(record(2, "t2"))).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        match &entries[1].kind {
            WalEntryKind::TaskInsert(r) => assert_eq!(r.taskhash, "t2"),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn test_wal_sequence_survives_reopen() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("persist.wal");

        {
            let wal = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(WalEntryKind::TaskInsert(record(1, "t1"))).unwrap();
        }

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 1);
        assert_eq!(wal.append(WalEntryKind::TaskInsert(record(2, "t2"))).unwrap(), 2);
    }

    #[test]
    fn test_wal_torn_tail_is_dropped_on_open() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("torn.wal");

        {
            let wal = WriteAheadLog::open(&wal_path, false).unwrap();
            wal.append(WalEntryKind::TaskInsert(record(1, "t1"))).unwrap();
            wal.append(WalEntryKind::TaskInsert(record(2, "t2"))).unwrap();
        }
        let full = std::fs::metadata(&wal_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        file.set_len(full - 3).unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 1);
        wal.append(WalEntryKind::TaskInsert(record(3, "t3"))).unwrap();

        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_failed_append_leaves_no_partial_entry() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("rollback.wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(WalEntryKind::TaskInsert(record(1, "t1"))).unwrap();
        let good_len = wal.size_bytes().unwrap();

        {
            // Half an entry reached the file, the rest is still buffered
            let mut state = wal.state().unwrap();
            state.writer.write_all(&[0x01, 0xff, 0x00]).unwrap();
            state.writer.flush().unwrap();
            state.writer.write_all(&[0xde, 0xad]).unwrap();
            wal.rollback(&mut state).unwrap();
        }
        assert_eq!(wal.size_bytes().unwrap(), good_len);

        assert_eq!(wal.append(WalEntryKind::TaskInsert(record(2, "t2"))).unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(wal.current_sequence().unwrap(), 2);
    }

    #[test]
    fn test_wal_truncate_resets() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("trunc.wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(WalEntryKind::TaskInsert(record(1, "t1"))).unwrap();
        wal.append(WalEntryKind::Checkpoint { up_to_sequence: 1 }).unwrap();
        wal.truncate().unwrap();

        assert_eq!(wal.current_sequence().unwrap(), 0);
        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);
        assert_eq!(wal.state().unwrap().len, codec::HEADER_LEN);
        assert_eq!(wal.iter().unwrap().count(), 0);

        wal.append(WalEntryKind::TaskInsert(record(2, "t2"))).unwrap();
        assert_eq!(wal.iter().unwrap().count(), 1);
    }
}
