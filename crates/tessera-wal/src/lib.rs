//! Write-ahead log.
//!
//! Append-only file of framed records, each carrying a monotone
//! `wal_id`. Frames are `[len u32][crc32c u32][wal_id u64][payload]`;
//! replay walks ascending ids and stops cleanly at a torn tail (short
//! frame or checksum mismatch). A side file tracks the id up to which
//! the checkpointed state is durable, so recovery replays only the
//! suffix.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tessera_error::{Result, TesseraError};
use tessera_types::{ColumnDefinition, DataChunk};

/// Monotone id stamped on every record.
pub type WalId = u64;

const FRAME_HEADER: usize = 16;
const PERSISTED_FILE: &str = "wal.persisted";
const LOG_FILE: &str = "wal.log";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Logical WAL records: DML plus the DDL the catalog needs to rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    Append {
        database: String,
        collection: String,
        chunk: DataChunk,
    },
    Update {
        database: String,
        collection: String,
        row_ids: Vec<i64>,
        chunk: DataChunk,
    },
    Delete {
        database: String,
        collection: String,
        row_ids: Vec<i64>,
    },
    CreateDatabase {
        database: String,
    },
    DropDatabase {
        database: String,
    },
    CreateCollection {
        database: String,
        collection: String,
        columns: Vec<ColumnDefinition>,
    },
    DropCollection {
        database: String,
        collection: String,
    },
    CreateIndex {
        database: String,
        collection: String,
        name: String,
        keys: Vec<String>,
    },
    DropIndex {
        database: String,
        collection: String,
        name: String,
    },
}

/// One replayed record with its id.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub wal_id: WalId,
    pub record: WalRecord,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Appends framed records to `wal.log` inside `dir`.
#[derive(Debug)]
pub struct WalWriter {
    file: File,
    dir: PathBuf,
    next_id: WalId,
}

impl WalWriter {
    /// Open (or create) the log in `dir`. The next id continues after
    /// the last intact record already present.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;
        let last = scan_last_intact_id(&mut file)?;
        Ok(Self {
            file,
            dir: dir.to_path_buf(),
            next_id: last.map_or(1, |id| id + 1),
        })
    }

    /// Append one record and return its id. The caller decides when to
    /// [`flush`](Self::flush); an IO failure here is fatal to the
    /// operation that produced the record.
    pub fn append(&mut self, record: &WalRecord) -> Result<WalId> {
        let wal_id = self.next_id;
        let payload = serde_json::to_vec(record)
            .map_err(|e| TesseraError::execution(format!("wal encode: {e}")))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&frame_crc(wal_id, &payload).to_le_bytes());
        frame.extend_from_slice(&wal_id.to_le_bytes());
        frame.extend_from_slice(&payload);
        self.file.write_all(&frame)?;
        self.next_id += 1;
        Ok(wal_id)
    }

    /// Make all appended records durable.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Id the next append will receive.
    #[must_use]
    pub const fn next_id(&self) -> WalId {
        self.next_id
    }

    /// The id up to which checkpointed state covers the log.
    pub fn persisted_id(&self) -> WalId {
        read_persisted_id(&self.dir)
    }

    /// Advance the durable id (called by `checkpoint_all` once every
    /// table is disk-backed).
    pub fn set_persisted_id(&self, id: WalId) -> Result<()> {
        let path = self.dir.join(PERSISTED_FILE);
        let mut file = File::create(&path)?;
        file.write_all(&id.to_le_bytes())?;
        file.sync_all()?;
        debug!(id, "persisted wal id advanced");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Replays the log in ascending id order.
#[derive(Debug)]
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// The id up to which checkpointed state covers the log.
    #[must_use]
    pub fn persisted_id(&self) -> WalId {
        read_persisted_id(&self.dir)
    }

    /// All intact records with `wal_id > after`, ascending. A torn
    /// tail ends the scan without error.
    pub fn replay_after(&self, after: WalId) -> Result<Vec<WalEntry>> {
        let path = self.dir.join(LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&path)?;
        let mut out = Vec::new();
        loop {
            match read_frame(&mut file)? {
                FrameRead::Entry(entry) => {
                    if entry.wal_id > after {
                        out.push(entry);
                    }
                }
                FrameRead::Eof => break,
                FrameRead::Torn(detail) => {
                    warn!(detail, "wal tail torn; replay stops");
                    break;
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

fn frame_crc(wal_id: WalId, payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&wal_id.to_le_bytes());
    crc32c::crc32c_append(crc, payload)
}

enum FrameRead {
    Entry(WalEntry),
    Eof,
    Torn(&'static str),
}

fn read_frame(file: &mut File) -> Result<FrameRead> {
    let mut header = [0u8; FRAME_HEADER];
    match file.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(FrameRead::Eof),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(header[0..4].try_into().unwrap_or_default()) as usize;
    let crc = u32::from_le_bytes(header[4..8].try_into().unwrap_or_default());
    let wal_id = u64::from_le_bytes(header[8..16].try_into().unwrap_or_default());
    let mut payload = vec![0u8; len];
    if let Err(e) = file.read_exact(&mut payload) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(FrameRead::Torn("short payload"));
        }
        return Err(e.into());
    }
    if frame_crc(wal_id, &payload) != crc {
        return Ok(FrameRead::Torn("checksum mismatch"));
    }
    let record: WalRecord = match serde_json::from_slice(&payload) {
        Ok(r) => r,
        Err(_) => return Ok(FrameRead::Torn("payload decode")),
    };
    Ok(FrameRead::Entry(WalEntry { wal_id, record }))
}

fn scan_last_intact_id(file: &mut File) -> Result<Option<WalId>> {
    file.seek(SeekFrom::Start(0))?;
    let mut last = None;
    loop {
        match read_frame(file)? {
            FrameRead::Entry(entry) => last = Some(entry.wal_id),
            FrameRead::Eof | FrameRead::Torn(_) => break,
        }
    }
    file.seek(SeekFrom::End(0))?;
    Ok(last)
}

fn read_persisted_id(dir: &Path) -> WalId {
    let path = dir.join(PERSISTED_FILE);
    let Ok(bytes) = std::fs::read(&path) else {
        return 0;
    };
    if bytes.len() < 8 {
        return 0;
    }
    u64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{ComplexLogicalType, LogicalType, Value, VECTOR_CAPACITY};

    fn sample_chunk() -> DataChunk {
        let types = vec![ComplexLogicalType::from(LogicalType::Integer).with_alias("x")];
        let mut chunk = DataChunk::new(&types, VECTOR_CAPACITY);
        chunk.append_row(&[Value::integer(5)]).unwrap();
        chunk
    }

    fn append_record() -> WalRecord {
        WalRecord::Append {
            database: "db".into(),
            collection: "users".into(),
            chunk: sample_chunk(),
        }
    }

    #[test]
    fn ids_are_monotone_and_replayable() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path()).unwrap();
        let a = writer.append(&append_record()).unwrap();
        let b = writer
            .append(&WalRecord::Delete {
                database: "db".into(),
                collection: "users".into(),
                row_ids: vec![0],
            })
            .unwrap();
        writer.flush().unwrap();
        assert!(b > a);

        let entries = WalReader::new(dir.path()).replay_after(0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].wal_id, a);
        assert!(matches!(entries[1].record, WalRecord::Delete { .. }));
    }

    #[test]
    fn replay_skips_already_persisted_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path()).unwrap();
        for _ in 0..3 {
            writer.append(&append_record()).unwrap();
        }
        writer.flush().unwrap();
        writer.set_persisted_id(2).unwrap();

        let reader = WalReader::new(dir.path());
        let entries = reader.replay_after(reader.persisted_id()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].wal_id, 3);
    }

    #[test]
    fn torn_tail_stops_replay_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path()).unwrap();
        writer.append(&append_record()).unwrap();
        writer.append(&append_record()).unwrap();
        writer.flush().unwrap();

        // Tear the last frame.
        let path = dir.path().join(LOG_FILE);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 7).unwrap();

        let entries = WalReader::new(dir.path()).replay_after(0).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn corrupt_frame_stops_replay_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path()).unwrap();
        writer.append(&append_record()).unwrap();
        writer.flush().unwrap();

        // Flip a payload byte.
        let path = dir.path().join(LOG_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let entries = WalReader::new(dir.path()).replay_after(0).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn reopen_continues_the_id_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = WalWriter::open(dir.path()).unwrap();
            writer.append(&append_record()).unwrap();
            writer.flush().unwrap();
        }
        let mut writer = WalWriter::open(dir.path()).unwrap();
        assert_eq!(writer.next_id(), 2);
        let id = writer.append(&append_record()).unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn persisted_id_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(WalReader::new(dir.path()).persisted_id(), 0);
    }
}
