//! Metadata block chains.
//!
//! Checkpoint metadata (row-group layout, free list) is one byte blob
//! spread over a chain of blocks. Each block carries
//! `[next_block u64][len u32][bytes...]`; the last block points to
//! [`BlockId::INVALID`].

use tessera_error::{Result, TesseraError};

use crate::manager::BlockManager;
use crate::{BlockId, PAGE_SIZE, Page};

const CHAIN_HEADER: usize = 12;
const CHUNK: usize = PAGE_SIZE - CHAIN_HEADER;

/// Writes one blob across a block chain.
pub struct MetaWriter;

impl MetaWriter {
    /// Write `blob` starting at `root`, allocating continuation blocks
    /// as needed. Returns the blocks used (head first) so a checkpoint
    /// can free the previous chain.
    pub fn write(manager: &BlockManager, root: BlockId, blob: &[u8]) -> Result<Vec<BlockId>> {
        let mut used = vec![root];
        let mut chunks = blob.chunks(CHUNK).peekable();
        let mut current = root;

        // An empty blob still writes one terminal block.
        if chunks.peek().is_none() {
            manager.write_block(current, &encode_chunk(BlockId::INVALID, &[]))?;
            return Ok(used);
        }

        while let Some(chunk) = chunks.next() {
            let next = if chunks.peek().is_some() {
                let id = manager.allocate_block()?;
                used.push(id);
                id
            } else {
                BlockId::INVALID
            };
            manager.write_block(current, &encode_chunk(next, chunk))?;
            current = next;
        }
        Ok(used)
    }
}

/// Reads a blob back from a block chain.
pub struct MetaReader;

impl MetaReader {
    pub fn read(manager: &BlockManager, root: BlockId) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut current = root;
        let mut hops = 0usize;
        while current.is_valid() {
            let page = manager.read_block(current)?;
            let (next, chunk) = decode_chunk(&page)?;
            out.extend_from_slice(chunk);
            current = next;
            hops += 1;
            if hops > 1 << 20 {
                return Err(TesseraError::corrupt("meta block", "chain cycle"));
            }
        }
        Ok(out)
    }

    /// Same walk, but every chain block is pinned through the buffer
    /// pool while it is decoded. Also reports the chain's blocks so
    /// the next checkpoint can hand them back.
    pub fn read_through(
        pool: &std::sync::Arc<crate::buffer_pool::BufferPool>,
        root: BlockId,
    ) -> Result<(Vec<u8>, Vec<BlockId>)> {
        let mut out = Vec::new();
        let mut chain = Vec::new();
        let mut current = root;
        while current.is_valid() {
            let pinned = pool.pin(current)?;
            let (next, chunk) = decode_chunk(pinned.page())?;
            out.extend_from_slice(chunk);
            chain.push(current);
            current = next;
            if chain.len() > 1 << 20 {
                return Err(TesseraError::corrupt("meta block", "chain cycle"));
            }
        }
        Ok((out, chain))
    }
}

/// Atomic metadata-chain replacement.
///
/// The new chain lands only in blocks the previous checkpoint does not
/// reference (recycled persisted-free blocks or fresh ones), so a crash
/// before the header swap leaves the old image intact. The free list
/// serialized into the new image already hands the old chain back; the
/// in-memory free list follows once the header is durable.
pub struct CheckpointWriter;

impl CheckpointWriter {
    /// Replace the chain: write `payload` (behind the new free list),
    /// swap the header, then release `old_chain`. Returns the blocks
    /// now holding the chain, head first.
    pub fn rewrite(
        manager: &crate::manager::BlockManager,
        old_chain: Vec<BlockId>,
        payload: &[u8],
    ) -> Result<Vec<BlockId>> {
        use crate::manager::encode_free_list;

        // Upper bound on the persisted free list sizes the chain.
        let base = manager.free_list_snapshot();
        let max_free = base.len() + old_chain.len();
        let worst_blob = max_free * 8 + payload.len();
        let blocks_needed = worst_blob.div_ceil(CHUNK).max(1);

        let mut reserved = Vec::with_capacity(blocks_needed);
        for _ in 0..blocks_needed {
            reserved.push(manager.allocate_block()?);
        }

        // The free list as the new checkpoint publishes it: everything
        // previously free that the new chain did not claim, plus the
        // chain the new image replaces.
        let mut free_image: Vec<BlockId> = base
            .into_iter()
            .filter(|b| !reserved.contains(b))
            .collect();
        free_image.extend_from_slice(&old_chain);

        let blob = encode_free_list(&free_image, payload);
        let used = write_into(manager, &reserved, &blob)?;
        manager.write_header(reserved[0], free_image.len() as u64)?;

        // Only now are the old chain and any over-reserved blocks
        // reusable.
        for id in old_chain {
            manager.free_block(id);
        }
        for id in &reserved[used..] {
            manager.free_block(*id);
        }
        reserved.truncate(used);
        Ok(reserved)
    }
}

/// Write `blob` across the given blocks, chaining them in order.
/// Returns how many blocks the blob actually needed.
fn write_into(
    manager: &crate::manager::BlockManager,
    blocks: &[BlockId],
    blob: &[u8],
) -> Result<usize> {
    let chunks: Vec<&[u8]> = if blob.is_empty() {
        vec![&[][..]]
    } else {
        blob.chunks(CHUNK).collect()
    };
    if chunks.len() > blocks.len() {
        return Err(TesseraError::execution(format!(
            "meta chain underprovisioned: {} blocks for {} chunks",
            blocks.len(),
            chunks.len()
        )));
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let next = if i + 1 < chunks.len() {
            blocks[i + 1]
        } else {
            BlockId::INVALID
        };
        manager.write_block(blocks[i], &encode_chunk(next, chunk))?;
    }
    Ok(chunks.len())
}

fn encode_chunk(next: BlockId, chunk: &[u8]) -> Page {
    debug_assert!(chunk.len() <= CHUNK);
    let mut page = Page::zeroed();
    let buf = page.as_mut_slice();
    buf[0..8].copy_from_slice(&next.0.to_le_bytes());
    buf[8..12].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
    buf[CHAIN_HEADER..CHAIN_HEADER + chunk.len()].copy_from_slice(chunk);
    page
}

fn decode_chunk(page: &Page) -> Result<(BlockId, &[u8])> {
    let buf = page.as_slice();
    let next = BlockId(u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default()));
    let len = u32::from_le_bytes(buf[8..12].try_into().unwrap_or_default()) as usize;
    if len > CHUNK {
        return Err(TesseraError::corrupt(
            "meta block",
            format!("chunk length {len} exceeds page"),
        ));
    }
    Ok((next, &buf[CHAIN_HEADER..CHAIN_HEADER + len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_blob() {
        let mgr = BlockManager::in_memory();
        let root = mgr.allocate_block().unwrap();
        MetaWriter::write(&mgr, root, b"hello").unwrap();
        assert_eq!(MetaReader::read(&mgr, root).unwrap(), b"hello");
    }

    #[test]
    fn multi_block_blob_chains() {
        let mgr = BlockManager::in_memory();
        let root = mgr.allocate_block().unwrap();
        let blob: Vec<u8> = (0..3 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        let used = MetaWriter::write(&mgr, root, &blob).unwrap();
        assert!(used.len() >= 4, "expected a chain, got {} blocks", used.len());
        assert_eq!(MetaReader::read(&mgr, root).unwrap(), blob);
    }

    #[test]
    fn empty_blob_still_terminates() {
        let mgr = BlockManager::in_memory();
        let root = mgr.allocate_block().unwrap();
        MetaWriter::write(&mgr, root, b"").unwrap();
        assert!(MetaReader::read(&mgr, root).unwrap().is_empty());
    }

    #[test]
    fn rewrite_never_touches_the_old_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = BlockManager::create_file(&dir.path().join("t.otbx")).unwrap();
        let first = CheckpointWriter::rewrite(&mgr, Vec::new(), b"one").unwrap();
        let old_payload = MetaReader::read(&mgr, first[0]).unwrap();

        let second = CheckpointWriter::rewrite(&mgr, first.clone(), b"two").unwrap();
        // The replacement chain reused none of the old blocks, so the
        // previous image stayed readable right up to the header swap.
        assert!(second.iter().all(|b| !first.contains(b)));
        assert_eq!(MetaReader::read(&mgr, first[0]).unwrap(), old_payload);
        assert_eq!(mgr.meta_block(), second[0]);
    }

    #[test]
    fn rewrite_recycles_across_generations() {
        let mgr = BlockManager::in_memory();
        let mut chain = Vec::new();
        for round in 0..6 {
            chain = CheckpointWriter::rewrite(&mgr, chain, format!("gen {round}").as_bytes())
                .unwrap();
        }
        // Old chains return through the free list; usage stays flat.
        assert!(mgr.live_block_count() <= 4, "{}", mgr.live_block_count());
    }

    #[test]
    fn rewrite_publishes_the_old_chain_as_free() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.otbx");
        let first;
        {
            let mgr = BlockManager::create_file(&path).unwrap();
            first = CheckpointWriter::rewrite(&mgr, Vec::new(), b"one").unwrap();
            CheckpointWriter::rewrite(&mgr, first.clone(), b"two").unwrap();
        }
        let mgr = BlockManager::load_existing(&path).unwrap();
        let free = mgr.free_list_snapshot();
        assert!(first.iter().all(|b| free.contains(b)));
        let blob = MetaReader::read(&mgr, mgr.meta_block()).unwrap();
        assert!(blob.ends_with(b"two"));
    }
}
