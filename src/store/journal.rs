#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{ElementBatch, MemoryStore, MutationScan, MutationStore};
use crate::model::ElementLocation;
use crate::mutation::codec::{decode_write, encode_write};
use crate::mutation::MutationOp;
use crate::types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};

const JOURNAL_MAGIC: [u8; 4] = *b"PNMJ";
const JOURNAL_FORMAT_VERSION: u16 = 2;
const FILE_HEADER_LEN: usize = 12;
const FRAME_HEADER_LEN: usize = 8;
const MAX_FRAME_LEN: usize = 64 << 20;

/// Options for opening a [`JournalStore`].
#[derive(Clone, Debug)]
pub struct JournalOptions {
    /// Create the file when it does not exist.
    pub create: bool,
    /// `fdatasync` after every appended write.
    pub sync: bool,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            create: true,
            sync: true,
        }
    }
}

/// Positioned access to the journal file.
pub(crate) trait JournalIo: Send {
    /// Reads the whole file.
    fn read_all(&mut self) -> io::Result<Vec<u8>>;
    /// Writes `src` at byte offset `off`.
    fn write_at(&mut self, off: u64, src: &[u8]) -> io::Result<()>;
    /// Flushes file data to disk.
    fn sync_data(&mut self) -> io::Result<()>;
    /// Truncates the file to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

struct StdJournalIo(File);

impl JournalIo for StdJournalIo {
    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.0.seek(SeekFrom::Start(0))?;
        self.0.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&mut self, off: u64, src: &[u8]) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(off))?;
        self.0.write_all(src)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        self.0.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.0.set_len(len)
    }
}

struct JournalFile {
    io: Box<dyn JournalIo>,
    /// End of the last acknowledged frame; the next frame is written here.
    len: u64,
}

impl JournalFile {
    fn append_frame(&mut self, frame: &[u8], sync: bool) -> io::Result<()> {
        let start = self.len;
        let written = self.io.write_at(start, frame).and_then(|()| {
            if sync {
                self.io.sync_data()
            } else {
                Ok(())
            }
        });
        match written {
            Ok(()) => {
                self.len = start + frame.len() as u64;
                Ok(())
            }
            Err(err) => {
                // Later frames overwrite from `start` regardless; truncating
                // keeps a crash before then from leaving the torn bytes behind.
                if let Err(truncate_err) = self.io.truncate(start) {
                    warn!(error = %truncate_err, offset = start, "store.journal.rollback_failed");
                }
                Err(err)
            }
        }
    }
}

/// File-backed store: an append-only journal of checksummed write frames,
/// replayed into a [`MemoryStore`] on open.
///
/// Each frame is `[len: u32 BE][crc32: u32 BE][payload]` where the payload is
/// one encoded write: every element batch saved under one timestamp. A torn
/// or corrupt tail left by a crash is truncated during replay; everything
/// before it is kept. A failed append is rolled back before the next one.
pub struct JournalStore {
    path: PathBuf,
    sync: bool,
    file: Mutex<JournalFile>,
    memory: MemoryStore,
}

impl JournalStore {
    /// Opens (or creates) the journal at `path` and replays it.
    pub fn open(path: impl AsRef<Path>, options: JournalOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create)
            .open(&path)?;
        Self::open_io(path, Box::new(StdJournalIo(file)), options.sync)
    }

    pub(crate) fn open_io(path: PathBuf, mut io: Box<dyn JournalIo>, sync: bool) -> Result<Self> {
        let bytes = io.read_all()?;
        if bytes.len() < FILE_HEADER_LEN {
            if !bytes.is_empty() {
                return Err(PenumbraError::Corruption("journal header truncated"));
            }
            io.write_at(0, &encode_header())?;
            io.sync_data()?;
            debug!(path = %path.display(), "store.journal.created");
        } else {
            let mut header = [0u8; FILE_HEADER_LEN];
            header.copy_from_slice(&bytes[..FILE_HEADER_LEN]);
            decode_header(&header)?;
        }

        let memory = MemoryStore::new();
        let body = bytes.get(FILE_HEADER_LEN..).unwrap_or_default();
        let replay = replay_frames(body, &memory)?;
        let valid_end = (FILE_HEADER_LEN + replay.valid_len) as u64;
        if replay.valid_len < body.len() {
            warn!(
                path = %path.display(),
                discarded = body.len() - replay.valid_len,
                "store.journal.torn_tail"
            );
            io.truncate(valid_end)?;
            io.sync_data()?;
        }
        info!(
            path = %path.display(),
            frames = replay.frames,
            elements = memory.element_count(),
            "store.journal.opened"
        );
        Ok(Self {
            path,
            sync,
            file: Mutex::new(JournalFile { io, len: valid_end }),
            memory,
        })
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MutationStore for JournalStore {
    fn append_mutations(
        &self,
        location: &ElementLocation,
        ops: Vec<MutationOp>,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.append_write(vec![ElementBatch::new(location.clone(), ops)], timestamp)
    }

    fn append_write(&self, batches: Vec<ElementBatch>, timestamp: Timestamp) -> Result<()> {
        let batches: Vec<_> = batches.into_iter().filter(|b| !b.ops.is_empty()).collect();
        if batches.is_empty() {
            return Ok(());
        }
        // The file lock also serializes the in-memory apply so both stay in frame order.
        let mut file = self.file.lock();
        self.memory.check_write(&batches, timestamp)?;
        let parts: Vec<_> = batches
            .iter()
            .map(|b| (b.location.element_type, &b.location.id, b.ops.as_slice()))
            .collect();
        let payload = encode_write(timestamp, &parts);
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| (*len as usize) <= MAX_FRAME_LEN)
            .ok_or(PenumbraError::Invalid("write exceeds journal frame limit"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        frame.extend_from_slice(&payload);
        file.append_frame(&frame, self.sync)?;
        self.memory.apply_write(batches, timestamp);
        Ok(())
    }

    fn scan_mutations(
        &self,
        element_type: ElementType,
        id: &ElementId,
        end_time: Option<Timestamp>,
    ) -> Result<MutationScan<'_>> {
        self.memory.scan_mutations(element_type, id, end_time)
    }

    fn scan_edge_projections(
        &self,
        vertex_id: &ElementId,
        direction: Direction,
        labels: Option<&[String]>,
        end_time: Option<Timestamp>,
    ) -> Result<MutationScan<'_>> {
        self.memory
            .scan_edge_projections(vertex_id, direction, labels, end_time)
    }

    fn max_timestamp(&self) -> Option<Timestamp> {
        self.memory.max_timestamp()
    }
}

struct Replay {
    frames: usize,
    valid_len: usize,
}

fn replay_frames(body: &[u8], memory: &MemoryStore) -> Result<Replay> {
    let mut offset = 0usize;
    let mut frames = 0usize;
    while offset + FRAME_HEADER_LEN <= body.len() {
        let len = u32::from_be_bytes(read_array(body, offset)) as usize;
        let crc = u32::from_be_bytes(read_array(body, offset + 4));
        let start = offset + FRAME_HEADER_LEN;
        if len > MAX_FRAME_LEN || start + len > body.len() {
            break;
        }
        let payload = &body[start..start + len];
        if crc32fast::hash(payload) != crc {
            break;
        }
        memory.replay_write(decode_write(payload)?)?;
        frames += 1;
        offset = start + len;
    }
    Ok(Replay {
        frames,
        valid_len: offset,
    })
}

fn read_array(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn encode_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..4].copy_from_slice(&JOURNAL_MAGIC);
    buf[4..6].copy_from_slice(&JOURNAL_FORMAT_VERSION.to_be_bytes());
    let crc = crc32fast::hash(&buf[0..8]);
    buf[8..12].copy_from_slice(&crc.to_be_bytes());
    buf
}

fn decode_header(header: &[u8; FILE_HEADER_LEN]) -> Result<()> {
    if header[0..4] != JOURNAL_MAGIC {
        return Err(PenumbraError::Corruption("journal magic mismatch"));
    }
    if u16::from_be_bytes([header[4], header[5]]) != JOURNAL_FORMAT_VERSION {
        return Err(PenumbraError::Corruption("journal format version mismatch"));
    }
    if header[6..8] != [0, 0] {
        return Err(PenumbraError::Corruption(
            "journal reserved header bytes non-zero",
        ));
    }
    let stored = u32::from_be_bytes(read_array(header, 8));
    if crc32fast::hash(&header[0..8]) != stored {
        return Err(PenumbraError::Corruption("journal header crc mismatch"));
    }
    Ok(())
}
