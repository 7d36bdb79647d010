//! Object layer: streaming writes in, random-access reads out.
//!
//! An object is an arbitrary byte stream. The writer chops it into chunks
//! at splitter cut-points, hands each chunk to the block manager, and
//! returns a direct ID for single-chunk objects or an indirect ID whose
//! index object lists the child segments. The reader resolves indirection
//! transparently and exposes `Read + Seek` over the logical content.

pub mod id;
pub mod reader;
pub mod writer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::BlockManager;
use crate::error::Result;
use crate::object::id::ObjectId;
use crate::object::reader::ObjectReader;
use crate::object::writer::{ObjectWriter, WriterOptions};
use crate::splitter;

/// Hard cap on indirect nesting when resolving an object.
pub(crate) const MAX_INDIRECTION: usize = 16;

/// One segment of an indirect object's index, in wire order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndirectEntry {
    pub(crate) start: u64,
    pub(crate) length: u64,
    pub(crate) object: ObjectId,
}

pub(crate) struct Core {
    pub(crate) blocks: Arc<BlockManager>,
    pub(crate) splitter: String,
    pub(crate) max_block_size: usize,
}

pub struct ObjectManager {
    core: Arc<Core>,
}

impl ObjectManager {
    pub fn new(
        blocks: Arc<BlockManager>,
        splitter_name: &str,
        max_block_size: usize,
    ) -> Result<ObjectManager> {
        if max_block_size == 0 {
            return Err(crate::error::Error::Config(
                "max block size must be positive".to_string(),
            ));
        }
        // validate the variant once; writers construct fresh instances
        splitter::new_splitter(splitter_name, max_block_size)?;

        Ok(ObjectManager {
            core: Arc::new(Core {
                blocks,
                splitter: splitter_name.to_string(),
                max_block_size,
            }),
        })
    }

    /// Starts a new object. Writers are single-owner; one per stream.
    pub fn new_writer(&self, options: WriterOptions) -> ObjectWriter {
        ObjectWriter::new(self.core.clone(), options)
    }

    /// Opens a random-access reader over an object's logical content.
    pub fn open(&self, id: &ObjectId) -> Result<ObjectReader> {
        ObjectReader::open(self.core.clone(), id, 0)
    }

    pub fn flush(&self) -> Result<()> {
        self.core.blocks.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::packindex::PACK_INDEX_PREFIX;
    use crate::block::DEFAULT_MAX_PACK_FILE_LENGTH;
    use crate::error::Error;
    use crate::format::{BlockFormat, Formatter};
    use crate::storage::mem::MemStorage;
    use std::io::{Read, Seek, SeekFrom, Write};

    fn object_manager(storage: &MemStorage, max_block_size: usize) -> ObjectManager {
        let formatter = Formatter::new(BlockFormat::TestOnlyMd5, &[], true).unwrap();
        let blocks = Arc::new(
            BlockManager::new(
                Arc::new(storage.clone()),
                formatter,
                -1,
                DEFAULT_MAX_PACK_FILE_LENGTH,
            )
            .unwrap(),
        );
        ObjectManager::new(blocks, "FIXED", max_block_size).unwrap()
    }

    fn write_object(om: &ObjectManager, data: &[u8]) -> ObjectId {
        let mut w = om.new_writer(WriterOptions::default());
        w.write_all(data).unwrap();
        w.result().unwrap()
    }

    fn read_object(om: &ObjectManager, id: &ObjectId) -> Vec<u8> {
        let mut out = Vec::new();
        om.open(id).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn single_chunk_objects_are_direct() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let id = write_object(&om, b"the quick brown fox jumps over the lazy dog");
        assert_eq!(id.to_string(), "D77add1d5f41223d5582fca736a5cb335");
        assert_eq!(
            read_object(&om, &id),
            b"the quick brown fox jumps over the lazy dog"
        );
    }

    #[test]
    fn empty_object_round_trips() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let id = write_object(&om, b"");
        assert_eq!(id.to_string(), "Dd41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(read_object(&om, &id), b"");
    }

    #[test]
    fn multi_chunk_objects_go_indirect() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let id = write_object(&om, &data);
        assert!(id.indirection_level() >= 1);
        assert_eq!(read_object(&om, &id), data);
    }

    #[test]
    fn fragmented_writes_match_single_write() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let whole = write_object(&om, &[0u8; 100]);

        let mut w = om.new_writer(WriterOptions::default());
        w.write_all(&[0u8; 50]).unwrap();
        w.write_all(&[0u8; 50]).unwrap();
        assert_eq!(w.result().unwrap(), whole);
        assert_eq!(whole.to_string(), "D6d0bb00954ceb7fbee436bb55a8397a9");
    }

    #[test]
    fn result_is_idempotent_and_seals_the_writer() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let mut w = om.new_writer(WriterOptions::default());
        w.write_all(b"sealed").unwrap();
        let first = w.result().unwrap();
        assert_eq!(w.result().unwrap(), first);
        assert!(w.write_all(b"more").is_err());
    }

    #[test]
    fn seek_and_partial_reads() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let id = write_object(&om, &data);
        let mut r = om.open(&id).unwrap();
        assert_eq!(r.len(), 1000);

        let mut buf = [0u8; 17];
        r.seek(SeekFrom::Start(123)).unwrap();
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[123..140]);

        r.seek(SeekFrom::End(-5)).unwrap();
        let mut tail = Vec::new();
        r.read_to_end(&mut tail).unwrap();
        assert_eq!(&tail[..], &data[995..]);

        // reads crossing a chunk boundary come back whole
        r.seek(SeekFrom::Start(195)).unwrap();
        let mut cross = [0u8; 10];
        r.read_exact(&mut cross).unwrap();
        assert_eq!(&cross[..], &data[195..205]);
    }

    #[test]
    fn seek_past_end_is_rejected() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let id = write_object(&om, b"short");
        let mut r = om.open(&id).unwrap();

        assert!(r.seek(SeekFrom::Start(6)).is_err());
        assert!(r.seek(SeekFrom::Current(-1)).is_err());
        assert_eq!(r.seek(SeekFrom::End(0)).unwrap(), 5);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn open_missing_block_is_not_found() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let id = ObjectId::parse("Dno-such-block").unwrap();
        assert!(matches!(om.open(&id), Err(Error::BlockNotFound)));
    }

    #[test]
    fn indirect_index_that_does_not_parse_is_malformed() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let inner = write_object(&om, b"this is not JSON");
        assert!(matches!(
            om.open(&ObjectId::indirect(inner)),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn indirect_index_with_gap_is_malformed() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let a = write_object(&om, b"aaaa");
        let b = write_object(&om, b"bbbb");
        let index = format!(
            "[{{\"start\":0,\"length\":4,\"object\":\"{}\"}},{{\"start\":5,\"length\":4,\"object\":\"{}\"}}]",
            a, b
        );
        let inner = write_object(&om, index.as_bytes());
        assert!(matches!(
            om.open(&ObjectId::indirect(inner)),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn deep_indirection_is_capped() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let mut id = write_object(&om, b"leaf");
        for _ in 0..(MAX_INDIRECTION + 1) {
            id = ObjectId::indirect(id);
        }
        assert!(matches!(om.open(&id), Err(Error::Malformed(_))));
    }

    #[test]
    fn same_content_written_twice_dedups_chunks() {
        let storage = MemStorage::new();
        let om = object_manager(&storage, 200);

        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let first = write_object(&om, &data);
        om.flush().unwrap();
        let data_blocks_after_first = storage
            .keys()
            .iter()
            .filter(|k| !k.starts_with(PACK_INDEX_PREFIX))
            .count();

        let second = write_object(&om, &data);
        om.flush().unwrap();
        let data_blocks_after_second = storage
            .keys()
            .iter()
            .filter(|k| !k.starts_with(PACK_INDEX_PREFIX))
            .count();

        assert_eq!(first, second);
        assert_eq!(data_blocks_after_first, data_blocks_after_second);
    }
}
