use std::cmp::Ordering;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::object::id::ObjectId;
use crate::object::{Core, IndirectEntry, MAX_INDIRECTION};

/// Random-access reader over an object's logical content.
///
/// Direct objects are fetched (and verified) whole at open time. Indirect
/// objects load their index eagerly, then resolve each read through the
/// entry covering the requested offset; the most recently used child stays
/// open to keep sequential reads cheap.
pub struct ObjectReader {
    kind: Kind,
    length: u64,
    pos: u64,
}

enum Kind {
    Direct(Vec<u8>),
    Indirect {
        core: Arc<Core>,
        depth: usize,
        entries: Vec<IndirectEntry>,
        cached: Option<(usize, Box<ObjectReader>)>,
    },
}

impl ObjectReader {
    pub(crate) fn open(core: Arc<Core>, id: &ObjectId, depth: usize) -> Result<ObjectReader> {
        if depth > MAX_INDIRECTION {
            return Err(Error::Malformed(
                "object indirection nests too deeply".to_string(),
            ));
        }

        match id {
            ObjectId::Direct(block) => {
                let data = core.blocks.get_block(block)?;
                Ok(ObjectReader {
                    length: data.len() as u64,
                    kind: Kind::Direct(data),
                    pos: 0,
                })
            }
            ObjectId::Indirect(inner) => {
                let mut index_reader = ObjectReader::open(core.clone(), inner, depth + 1)?;
                let mut raw = Vec::new();
                index_reader.read_to_end(&mut raw)?;

                let mut entries: Vec<IndirectEntry> = serde_json::from_slice(&raw)
                    .map_err(|e| Error::Malformed(format!("indirect index does not parse: {}", e)))?;
                entries.sort_by_key(|e| e.start);

                // segments must tile the content exactly
                let mut length: u64 = 0;
                for e in &entries {
                    if e.start != length {
                        return Err(Error::Malformed(format!(
                            "indirect index has a gap or overlap at offset {}",
                            e.start
                        )));
                    }
                    length = length.checked_add(e.length).ok_or_else(|| {
                        Error::Malformed("indirect index length overflows".to_string())
                    })?;
                }

                Ok(ObjectReader {
                    kind: Kind::Indirect {
                        core,
                        depth,
                        entries,
                        cached: None,
                    },
                    length,
                    pos: 0,
                })
            }
        }
    }

    /// Logical content length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.length {
            return Ok(0);
        }
        let pos = self.pos;

        match &mut self.kind {
            Kind::Direct(data) => {
                let start = pos as usize;
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                self.pos += n as u64;
                Ok(n)
            }
            Kind::Indirect {
                core,
                depth,
                entries,
                cached,
            } => {
                let i = entries
                    .binary_search_by(|e| {
                        if e.start + e.length <= pos {
                            Ordering::Less
                        } else if e.start > pos {
                            Ordering::Greater
                        } else {
                            Ordering::Equal
                        }
                    })
                    .map_err(|_| {
                        io::Error::from(Error::Malformed(format!(
                            "no index entry covers offset {}",
                            pos
                        )))
                    })?;
                let entry = &entries[i];

                if cached.as_ref().map(|(ci, _)| *ci) != Some(i) {
                    let child = ObjectReader::open(core.clone(), &entry.object, *depth + 1)
                        .map_err(io::Error::from)?;
                    if child.len() != entry.length {
                        return Err(io::Error::from(Error::Malformed(format!(
                            "child object length {} does not match index entry {}",
                            child.len(),
                            entry.length
                        ))));
                    }
                    *cached = Some((i, Box::new(child)));
                }
                let (_, child) = cached.as_mut().expect("just populated");

                let offset = pos - entry.start;
                child.seek(SeekFrom::Start(offset))?;
                let want = (buf.len() as u64).min(entry.length - offset) as usize;
                let n = child.read(&mut buf[..want])?;
                if n == 0 && want > 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "child object ended early",
                    ));
                }

                self.pos += n as u64;
                Ok(n)
            }
        }
    }
}

impl Seek for ObjectReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target: i128 = match pos {
            SeekFrom::Start(o) => o as i128,
            SeekFrom::End(o) => self.length as i128 + o as i128,
            SeekFrom::Current(o) => self.pos as i128 + o as i128,
        };

        if target < 0 || target > self.length as i128 {
            return Err(Error::InvalidArgument(format!("seek out of range: {}", target)).into());
        }

        self.pos = target as u64;
        Ok(self.pos)
    }
}
