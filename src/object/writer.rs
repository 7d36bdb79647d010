use std::io::{self, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::id::ObjectId;
use crate::object::{Core, IndirectEntry};
use crate::splitter::{self, Splitter};

#[derive(Clone, Default)]
pub struct WriterOptions {
    /// Free-form label for diagnostics; not persisted with the object.
    pub description: String,
    /// Prefix prepended to every block address this writer emits.
    pub block_name_prefix: String,
}

/// Streams one object into the repository.
///
/// Bytes arrive through `std::io::Write`; chunks are cut wherever the
/// splitter says so (or at the max block size, whichever comes first) and
/// handed to the block manager as they complete. `result` turns whatever
/// was written into an object ID. Not shareable across threads; each
/// stream owns its writer.
pub struct ObjectWriter {
    core: Arc<Core>,
    options: WriterOptions,
    splitter: Box<dyn Splitter>,
    buffer: Vec<u8>,
    entries: Vec<IndirectEntry>,
    written: u64,
    result: Option<ObjectId>,
}

impl ObjectWriter {
    pub(crate) fn new(core: Arc<Core>, options: WriterOptions) -> ObjectWriter {
        let splitter = splitter::new_splitter(&core.splitter, core.max_block_size)
            .expect("splitter variant validated at manager construction");

        ObjectWriter {
            core,
            options,
            splitter,
            buffer: Vec::new(),
            entries: Vec::new(),
            written: 0,
            result: None,
        }
    }

    /// Finishes the object and returns its ID. Idempotent; the writer
    /// accepts no further bytes afterwards.
    pub fn result(&mut self) -> Result<ObjectId> {
        if let Some(id) = &self.result {
            return Ok(id.clone());
        }

        // trailing bytes form the final chunk; an object with no bytes at
        // all still emits the empty chunk
        if !self.buffer.is_empty() || self.entries.is_empty() {
            self.flush_chunk()?;
        }

        let id = if self.entries.len() == 1 {
            self.entries[0].object.clone()
        } else {
            // the index is itself an object and may nest further
            let index = serde_json::to_vec(&self.entries)?;
            let mut inner = ObjectWriter::new(self.core.clone(), self.options.clone());
            inner.write_all(&index)?;
            ObjectId::indirect(inner.result()?)
        };

        self.result = Some(id.clone());
        Ok(id)
    }

    fn flush_chunk(&mut self) -> Result<()> {
        let address = self
            .core
            .blocks
            .write_block(&self.options.block_name_prefix, &self.buffer)?;
        self.entries.push(IndirectEntry {
            start: self.written,
            length: self.buffer.len() as u64,
            object: ObjectId::direct(address),
        });
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.result.is_some() {
            return Err(Error::InvalidArgument("write after result".to_string()).into());
        }

        for &b in buf {
            self.buffer.push(b);
            let cut = self.splitter.add_byte(b);
            if cut || self.buffer.len() >= self.core.max_block_size {
                self.flush_chunk().map_err(io::Error::from)?;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // chunk boundaries are the splitter's call; nothing to force here
        Ok(())
    }
}
