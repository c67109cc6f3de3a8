//! The dual-mode block manager.
//!
//! In-memory mode keeps pages in a map with no eviction pressure and a
//! no-op checkpoint. Single-file mode maps block ids to page-aligned
//! offsets in `table.otbx`, recycles reclaimed blocks through a free
//! list, and replaces the header atomically (payload write + fsync,
//! then header rewrite + fsync).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use tessera_error::{Result, TesseraError};

use crate::{BlockId, PAGE_SIZE, Page};

/// Magic bytes at the start of every otbx file.
pub const OTBX_MAGIC: [u8; 4] = *b"OTBX";
/// On-disk format version.
pub const OTBX_VERSION: u32 = 1;

/// Which backend a manager (and therefore its table) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    InMemory,
    Disk,
}

/// Page-0 header of an otbx file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    /// Root of the metadata block chain, [`BlockId::INVALID`] if none.
    pub meta_block: BlockId,
    /// Serialized free-list head (stored inside the metadata chain).
    pub free_list_len: u64,
    /// Number of blocks ever allocated, header excluded.
    pub block_count: u64,
}

impl FileHeader {
    fn empty() -> Self {
        Self {
            version: OTBX_VERSION,
            meta_block: BlockId::INVALID,
            free_list_len: 0,
            block_count: 0,
        }
    }

    fn encode(&self) -> Page {
        let mut page = Page::zeroed();
        let buf = page.as_mut_slice();
        buf[0..4].copy_from_slice(&OTBX_MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.meta_block.0.to_le_bytes());
        buf[16..24].copy_from_slice(&self.free_list_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.block_count.to_le_bytes());
        page
    }

    fn decode(page: &Page) -> Result<Self> {
        let buf = page.as_slice();
        if buf[0..4] != OTBX_MAGIC {
            return Err(TesseraError::corrupt(
                "header",
                format!("bad magic {:02x?}", &buf[0..4]),
            ));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap_or_default());
        if version != OTBX_VERSION {
            return Err(TesseraError::corrupt(
                "header",
                format!("unsupported version {version}"),
            ));
        }
        Ok(Self {
            version,
            meta_block: BlockId(u64::from_le_bytes(
                buf[8..16].try_into().unwrap_or_default(),
            )),
            free_list_len: u64::from_le_bytes(buf[16..24].try_into().unwrap_or_default()),
            block_count: u64::from_le_bytes(buf[24..32].try_into().unwrap_or_default()),
        })
    }
}

enum Backend {
    Memory {
        pages: HashMap<BlockId, Page>,
    },
    File {
        file: File,
        path: PathBuf,
    },
}

struct Inner {
    backend: Backend,
    header: FileHeader,
    free_list: Vec<BlockId>,
    next_block: u64,
}

/// Block-granular storage for one table (or one index tree).
pub struct BlockManager {
    inner: Mutex<Inner>,
    mode: StorageMode,
}

impl std::fmt::Debug for BlockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockManager")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl BlockManager {
    /// A manager whose pages never touch a file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend: Backend::Memory {
                    pages: HashMap::new(),
                },
                header: FileHeader::empty(),
                free_list: Vec::new(),
                next_block: 1,
            }),
            mode: StorageMode::InMemory,
        }
    }

    /// Create a fresh otbx file at `path`, truncating any previous one.
    pub fn create_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let header = FileHeader::empty();
        file.write_all(header.encode().as_slice())?;
        file.sync_all()?;
        debug!(path = %path.display(), "created otbx file");
        Ok(Self {
            inner: Mutex::new(Inner {
                backend: Backend::File {
                    file,
                    path: path.to_path_buf(),
                },
                header,
                free_list: Vec::new(),
                next_block: 1,
            }),
            mode: StorageMode::Disk,
        })
    }

    /// Open an existing otbx file, validate the header, and rebuild the
    /// free list from the metadata chain.
    pub fn load_existing(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buf)?;
        let header = FileHeader::decode(&Page::from_bytes(&buf))?;

        let manager = Self {
            inner: Mutex::new(Inner {
                backend: Backend::File {
                    file,
                    path: path.to_path_buf(),
                },
                header,
                free_list: Vec::new(),
                next_block: header.block_count + 1,
            }),
            mode: StorageMode::Disk,
        };

        // The free list rides at the front of the metadata chain.
        if header.meta_block.is_valid() {
            let blob = crate::meta::MetaReader::read(&manager, header.meta_block)?;
            let free = decode_free_list(&blob, header.free_list_len as usize)?;
            manager.inner.lock().free_list = free;
        }
        Ok(manager)
    }

    #[must_use]
    pub const fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Root of the metadata chain recorded in the header.
    #[must_use]
    pub fn meta_block(&self) -> BlockId {
        self.inner.lock().header.meta_block
    }

    /// Number of live (allocated, not freed) blocks.
    #[must_use]
    pub fn live_block_count(&self) -> u64 {
        let inner = self.inner.lock();
        (inner.next_block - 1) - inner.free_list.len() as u64
    }

    /// Hand out a fresh or recycled block id.
    pub fn allocate_block(&self) -> Result<BlockId> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.free_list.pop() {
            debug!(%id, "recycled block");
            return Ok(id);
        }
        let id = BlockId(inner.next_block);
        inner.next_block += 1;
        inner.header.block_count = inner.next_block - 1;
        Ok(id)
    }

    /// Return a block to the free list. Freeing an already-free block
    /// is a no-op, which keeps allocate/free/allocate idempotent.
    pub fn free_block(&self, id: BlockId) {
        if !id.is_valid() {
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.free_list.contains(&id) {
            inner.free_list.push(id);
        }
        if let Backend::Memory { pages } = &mut inner.backend {
            pages.remove(&id);
        }
    }

    /// Read one block.
    pub fn read_block(&self, id: BlockId) -> Result<Page> {
        let mut inner = self.inner.lock();
        match &mut inner.backend {
            Backend::Memory { pages } => pages
                .get(&id)
                .cloned()
                .ok_or_else(|| TesseraError::execution(format!("read of unallocated {id}"))),
            Backend::File { file, .. } => {
                let mut buf = vec![0u8; PAGE_SIZE];
                file.seek(SeekFrom::Start(id.0 * PAGE_SIZE as u64))?;
                file.read_exact(&mut buf)?;
                Ok(Page::from_bytes(&buf))
            }
        }
    }

    /// Write one block in place.
    pub fn write_block(&self, id: BlockId, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        match &mut inner.backend {
            Backend::Memory { pages } => {
                pages.insert(id, page.clone());
                Ok(())
            }
            Backend::File { file, .. } => {
                file.seek(SeekFrom::Start(id.0 * PAGE_SIZE as u64))?;
                file.write_all(page.as_slice())?;
                Ok(())
            }
        }
    }

    /// Persist a new metadata root: data pages are already on disk, so
    /// sync them, then replace the header and sync again. An unclean
    /// shutdown before the second sync leaves the previous checkpoint
    /// intact.
    pub fn write_header(&self, meta_block: BlockId, free_list_len: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.header.meta_block = meta_block;
        inner.header.free_list_len = free_list_len;
        let header = inner.header;
        match &mut inner.backend {
            Backend::Memory { .. } => Ok(()),
            Backend::File { file, path } => {
                file.sync_all()?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(header.encode().as_slice())?;
                file.sync_all()?;
                debug!(path = %path.display(), meta = %meta_block, "header replaced");
                Ok(())
            }
        }
    }

    /// Snapshot of the free list, serialized into checkpoint metadata.
    #[must_use]
    pub fn free_list_snapshot(&self) -> Vec<BlockId> {
        self.inner.lock().free_list.clone()
    }
}

/// Free-list wire form inside the metadata blob: little-endian u64 ids
/// ahead of the caller payload.
pub fn encode_free_list(free: &[BlockId], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(free.len() * 8 + payload.len());
    for id in free {
        out.extend_from_slice(&id.0.to_le_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// Split a metadata blob back into free list and caller payload.
pub fn decode_free_list(blob: &[u8], len: usize) -> Result<Vec<BlockId>> {
    let need = len * 8;
    if blob.len() < need {
        return Err(TesseraError::corrupt(
            "meta block",
            format!("free list truncated: {} < {need}", blob.len()),
        ));
    }
    Ok(blob[..need]
        .chunks_exact(8)
        .map(|c| BlockId(u64::from_le_bytes(c.try_into().unwrap_or_default())))
        .collect())
}

/// Caller payload portion of a metadata blob.
#[must_use]
pub fn meta_payload(blob: &[u8], free_list_len: usize) -> &[u8] {
    &blob[(free_list_len * 8).min(blob.len())..]
}
