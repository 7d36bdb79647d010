//! Content-address -> physical location.
//!
//! The block manager owns everything below the object layer:
//!     - routing writes: small blocks accumulate into per-prefix pack
//!       groups, large blocks go to storage standalone under their address
//!     - dedup against the in-memory index (loaded from all `P` blocks at
//!       open time) plus whatever is pending in the current session
//!     - sealing groups into pack files + pack indexes on rollover or flush
//!     - tombstones and timestamp-cutoff index compaction

pub mod packindex;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::format::{Formatter, FORMAT_VERSION};
use crate::storage::Storage;

use self::packindex::{
    decode_indexes, encode_indexes, generate_index_block_id, generate_pack_block_id, IndexFormat,
    IndexItem, PackIndex, PACK_INDEX_PREFIX,
};

/// Pack files roll over once their buffer would cross this many bytes.
pub const DEFAULT_MAX_PACK_FILE_LENGTH: usize = 10 * 1024 * 1024;

/// Where a committed address resolves, per the newest index entry.
#[derive(Clone, Debug)]
struct CommittedEntry {
    pack_block_id: String,
    offset: u64,
    length: u64,
    deleted: bool,
    create_time: OffsetDateTime,
    index_block_id: String,
}

/// Open pack group: blocks accepted for packing but not yet sealed.
#[derive(Default)]
struct PackGroup {
    buffer: Vec<u8>,
    items: BTreeMap<String, (u64, u64)>,
}

#[derive(Clone, Copy)]
struct PendingUnpacked {
    length: u64,
    deleted: bool,
}

#[derive(Default)]
struct State {
    /// Open pack groups, keyed by block-name prefix.
    groups: HashMap<String, PackGroup>,
    /// Groups already written as pack files, waiting for the next index write.
    sealed: Vec<PackIndex>,
    /// Standalone writes and tombstones since the last flush.
    unpacked: BTreeMap<String, PendingUnpacked>,
    /// Newest-wins view over every pack index block in storage.
    committed: HashMap<String, CommittedEntry>,
}

enum Loc {
    Deleted,
    Inline(Vec<u8>),
    Standalone,
    Packed {
        pack_block_id: String,
        offset: u64,
        length: u64,
    },
}

pub struct BlockManager {
    storage: Arc<dyn Storage>,
    formatter: Formatter,
    max_packed_content_length: i64,
    max_pack_file_length: usize,
    state: Mutex<State>,
}

impl BlockManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        formatter: Formatter,
        max_packed_content_length: i64,
        max_pack_file_length: usize,
    ) -> Result<BlockManager> {
        let committed = load_committed(storage.as_ref())?;
        debug!("block manager opened with {} committed entries", committed.len());

        Ok(BlockManager {
            storage,
            formatter,
            max_packed_content_length,
            max_pack_file_length,
            state: Mutex::new(State {
                committed,
                ..State::default()
            }),
        })
    }

    /// Stores a payload under `prefix + content-hash` and returns that
    /// address. Writing bytes that are already live is a no-op.
    pub fn write_block(&self, prefix: &str, data: &[u8]) -> Result<String> {
        let address = format!("{}{}", prefix, self.formatter.block_id_of(data));
        let mut st = self.state.lock();

        if is_live(&st, &address) {
            return Ok(address);
        }

        if self.packing_eligible(data.len()) {
            // a pending tombstone must not ride in the same index as the
            // re-written block
            st.unpacked.remove(&address);

            let needs_seal = st.groups.get(prefix).is_some_and(|g| {
                !g.buffer.is_empty() && g.buffer.len() + data.len() > self.max_pack_file_length
            });
            if needs_seal {
                self.seal_group_locked(&mut st, prefix)?;
            }

            let group = st.groups.entry(prefix.to_string()).or_default();
            let offset = group.buffer.len() as u64;
            group.buffer.extend_from_slice(data);
            group
                .items
                .insert(address.clone(), (offset, data.len() as u64));
        } else {
            self.storage.put_block(&address, data)?;
            st.unpacked.insert(
                address.clone(),
                PendingUnpacked {
                    length: data.len() as u64,
                    deleted: false,
                },
            );
        }

        Ok(address)
    }

    /// Fetches and verifies a block, whether pending, packed, standalone,
    /// or present only as a raw storage key.
    pub fn get_block(&self, address: &str) -> Result<Vec<u8>> {
        let loc = {
            let st = self.state.lock();
            resolve(&st, address)
        };

        let payload = match loc {
            Some(Loc::Deleted) => return Err(Error::BlockNotFound),
            Some(Loc::Inline(data)) => data,
            Some(Loc::Standalone) | None => self.storage.get_block(address)?,
            Some(Loc::Packed {
                pack_block_id,
                offset,
                length,
            }) => {
                let pack = self.storage.get_block(&pack_block_id)?;
                let end = offset
                    .checked_add(length)
                    .filter(|end| *end <= pack.len() as u64)
                    .ok_or_else(|| {
                        Error::Malformed(format!(
                            "index entry for {} is out of range of pack {}",
                            address, pack_block_id
                        ))
                    })?;
                pack[offset as usize..end as usize].to_vec()
            }
        };

        self.verify_payload(address, payload)
    }

    /// Records a tombstone that rides in the next pack index; any pending
    /// copy of the block is dropped on the spot. Standalone payloads are
    /// also removed from storage, so the address stays dead even after
    /// compaction drops the tombstone.
    pub fn delete_block(&self, address: &str) -> Result<()> {
        let mut st = self.state.lock();

        let packed = st.groups.values().any(|g| g.items.contains_key(address))
            || st.sealed.iter().any(|idx| idx.items.contains_key(address))
            || st
                .committed
                .get(address)
                .is_some_and(|e| !e.deleted && !e.pack_block_id.is_empty());

        for group in st.groups.values_mut() {
            group.items.remove(address);
        }
        for idx in st.sealed.iter_mut() {
            idx.items.remove(address);
        }

        // standalone payloads sit under the address key itself; the raw
        // storage fallback would read them back once the tombstone is
        // compacted away
        if !packed {
            self.storage.delete_block(address)?;
        }

        st.unpacked.insert(
            address.to_string(),
            PendingUnpacked {
                length: 0,
                deleted: true,
            },
        );

        Ok(())
    }

    /// Live addresses starting with `prefix`, committed and pending alike.
    pub fn list_blocks(&self, prefix: &str) -> Result<Vec<String>> {
        let st = self.state.lock();
        let mut out = BTreeSet::new();

        for (addr, e) in &st.committed {
            if !e.deleted && addr.starts_with(prefix) {
                out.insert(addr.clone());
            }
        }
        for group in st.groups.values() {
            for addr in group.items.keys() {
                if addr.starts_with(prefix) {
                    out.insert(addr.clone());
                }
            }
        }
        for idx in &st.sealed {
            for (addr, item) in &idx.items {
                if !item.deleted && addr.starts_with(prefix) {
                    out.insert(addr.clone());
                }
            }
        }
        // pending verdicts override committed ones
        for (addr, p) in &st.unpacked {
            if p.deleted {
                out.remove(addr);
            } else if addr.starts_with(prefix) {
                out.insert(addr.clone());
            }
        }

        Ok(out.into_iter().collect())
    }

    /// Seals every open group and writes one `P` block describing all
    /// sealed groups plus pending standalone entries and tombstones. After
    /// this returns, everything previously written is in storage and
    /// indexed.
    pub fn flush(&self) -> Result<()> {
        let mut st = self.state.lock();

        let prefixes: Vec<String> = st.groups.keys().cloned().collect();
        for prefix in prefixes {
            self.seal_group_locked(&mut st, &prefix)?;
        }

        let mut indexes = std::mem::take(&mut st.sealed);
        if !st.unpacked.is_empty() {
            let items = st
                .unpacked
                .iter()
                .map(|(addr, p)| {
                    (
                        addr.clone(),
                        IndexItem {
                            offset: 0,
                            length: p.length,
                            deleted: p.deleted,
                        },
                    )
                })
                .collect();
            indexes.push(PackIndex {
                pack_block_id: String::new(),
                create_time: OffsetDateTime::now_utc(),
                items,
                format: self.index_format(),
            });
        }

        if indexes.is_empty() {
            return Ok(());
        }

        let index_block_id = generate_index_block_id();
        self.storage
            .put_block(&index_block_id, &encode_indexes(&indexes)?)?;

        for idx in &indexes {
            for (addr, item) in &idx.items {
                apply_entry(
                    &mut st.committed,
                    addr,
                    CommittedEntry {
                        pack_block_id: idx.pack_block_id.clone(),
                        offset: item.offset,
                        length: item.length,
                        deleted: item.deleted,
                        create_time: idx.create_time,
                        index_block_id: index_block_id.clone(),
                    },
                );
            }
        }
        st.unpacked.clear();

        debug!(
            "flushed {} group(s) into index block {}",
            indexes.len(),
            index_block_id
        );
        Ok(())
    }

    /// Merges every index block older than `cutoff` into a single new one.
    ///
    /// Newest entry per address wins, ties break on the lexically greatest
    /// source index block ID, and tombstones (necessarily older than the
    /// cutoff) drop their address from the merged output, scrubbing any
    /// standalone payload still stored under it unless a retained index
    /// lists the address as live again. Source blocks are deleted only
    /// after the merged block is stored, so an interrupted run leaves both
    /// sets and the same tiebreak reproduces the live set.
    ///
    /// A non-empty `prefixes` restricts merging to matching addresses;
    /// everything else is carried into the merged block unchanged.
    pub fn compact_indexes(&self, cutoff: OffsetDateTime, prefixes: &[String]) -> Result<()> {
        self.flush()?;

        let mut compactable: Vec<(String, Vec<PackIndex>)> = Vec::new();
        let mut retained = 0usize;
        // addresses a retained index still lists as live; their payloads
        // must survive tombstone scrubbing below
        let mut retained_live: BTreeSet<String> = BTreeSet::new();
        for id in self.storage.list_blocks(PACK_INDEX_PREFIX)? {
            let indexes = decode_indexes(&self.storage.get_block(&id)?)?;
            if indexes.iter().all(|ix| ix.create_time < cutoff) {
                compactable.push((id, indexes));
            } else {
                retained += 1;
                for idx in &indexes {
                    for (addr, item) in &idx.items {
                        if !item.deleted {
                            retained_live.insert(addr.clone());
                        }
                    }
                }
            }
        }

        if compactable.len() < 2 {
            debug!(
                "compaction no-op: {} compactable, {} retained",
                compactable.len(),
                retained
            );
            return Ok(());
        }

        struct Winner {
            item: IndexItem,
            pack_block_id: String,
            create_time: OffsetDateTime,
            source: String,
            matches: bool,
        }

        let mut best: HashMap<String, Winner> = HashMap::new();
        for (source, indexes) in &compactable {
            for idx in indexes {
                for (addr, item) in &idx.items {
                    let matches = prefixes.is_empty()
                        || prefixes.iter().any(|p| addr.starts_with(p.as_str()));
                    let newer = match best.get(addr) {
                        Some(old) => {
                            (idx.create_time, source.as_str())
                                > (old.create_time, old.source.as_str())
                        }
                        None => true,
                    };
                    if newer {
                        best.insert(
                            addr.clone(),
                            Winner {
                                item: *item,
                                pack_block_id: idx.pack_block_id.clone(),
                                create_time: idx.create_time,
                                source: source.clone(),
                                matches,
                            },
                        );
                    }
                }
            }
        }

        // regroup survivors by (pack, seal time) so each merged group keeps
        // its original provenance
        let mut merged: BTreeMap<(String, OffsetDateTime), PackIndex> = BTreeMap::new();
        for (addr, w) in best {
            if w.item.deleted && w.matches {
                // the tombstone's work is done; scrub any standalone
                // payload it was shadowing, unless a retained index has
                // since re-created the address
                if !retained_live.contains(&addr) {
                    self.storage.delete_block(&addr)?;
                }
                continue;
            }
            let group = merged
                .entry((w.pack_block_id.clone(), w.create_time))
                .or_insert_with(|| PackIndex {
                    pack_block_id: w.pack_block_id.clone(),
                    create_time: w.create_time,
                    items: BTreeMap::new(),
                    format: self.index_format(),
                });
            group.items.insert(addr, w.item);
        }

        if !merged.is_empty() {
            let indexes: Vec<PackIndex> = merged.into_values().collect();
            let merged_id = generate_index_block_id();
            self.storage
                .put_block(&merged_id, &encode_indexes(&indexes)?)?;
            info!(
                "compacted {} index block(s) into {} ({} retained)",
                compactable.len(),
                merged_id,
                retained
            );
        }

        for (source, _) in &compactable {
            self.storage.delete_block(source)?;
        }

        let committed = load_committed(self.storage.as_ref())?;
        self.state.lock().committed = committed;
        Ok(())
    }

    fn packing_eligible(&self, len: usize) -> bool {
        self.max_packed_content_length >= 0 && len as i64 <= self.max_packed_content_length
    }

    fn index_format(&self) -> IndexFormat {
        IndexFormat {
            version: FORMAT_VERSION.to_string(),
            object_format: self.formatter.format().name().to_string(),
        }
    }

    fn seal_group_locked(&self, st: &mut State, prefix: &str) -> Result<()> {
        let group = match st.groups.remove(prefix) {
            Some(g) if !g.buffer.is_empty() => g,
            _ => return Ok(()),
        };

        let pack_block_id = generate_pack_block_id();
        self.storage.put_block(&pack_block_id, &group.buffer)?;

        let items = group
            .items
            .into_iter()
            .map(|(addr, (offset, length))| {
                (
                    addr,
                    IndexItem {
                        offset,
                        length,
                        deleted: false,
                    },
                )
            })
            .collect();
        debug!(
            "sealed pack {} ({} bytes)",
            pack_block_id,
            group.buffer.len()
        );
        st.sealed.push(PackIndex {
            pack_block_id,
            create_time: OffsetDateTime::now_utc(),
            items,
            format: self.index_format(),
        });

        Ok(())
    }

    fn verify_payload(&self, address: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let computed = self.formatter.block_id_of(&payload);
        if !address.ends_with(&computed) {
            return Err(Error::Malformed(format!(
                "content hash mismatch for block {}",
                address
            )));
        }
        Ok(payload)
    }
}

fn is_live(st: &State, address: &str) -> bool {
    for group in st.groups.values() {
        if group.items.contains_key(address) {
            return true;
        }
    }
    for idx in &st.sealed {
        if let Some(item) = idx.items.get(address) {
            return !item.deleted;
        }
    }
    if let Some(p) = st.unpacked.get(address) {
        return !p.deleted;
    }
    if let Some(e) = st.committed.get(address) {
        return !e.deleted;
    }
    false
}

fn resolve(st: &State, address: &str) -> Option<Loc> {
    for group in st.groups.values() {
        if let Some(&(offset, length)) = group.items.get(address) {
            let data = group.buffer[offset as usize..(offset + length) as usize].to_vec();
            return Some(Loc::Inline(data));
        }
    }
    for idx in &st.sealed {
        if let Some(item) = idx.items.get(address) {
            return Some(Loc::Packed {
                pack_block_id: idx.pack_block_id.clone(),
                offset: item.offset,
                length: item.length,
            });
        }
    }
    if let Some(p) = st.unpacked.get(address) {
        return Some(if p.deleted { Loc::Deleted } else { Loc::Standalone });
    }
    if let Some(e) = st.committed.get(address) {
        if e.deleted {
            return Some(Loc::Deleted);
        }
        return Some(if e.pack_block_id.is_empty() {
            Loc::Standalone
        } else {
            Loc::Packed {
                pack_block_id: e.pack_block_id.clone(),
                offset: e.offset,
                length: e.length,
            }
        });
    }
    None
}

fn apply_entry(map: &mut HashMap<String, CommittedEntry>, address: &str, entry: CommittedEntry) {
    let newer = match map.get(address) {
        Some(old) => {
            (entry.create_time, entry.index_block_id.as_str())
                > (old.create_time, old.index_block_id.as_str())
        }
        None => true,
    };
    if newer {
        map.insert(address.to_string(), entry);
    }
}

fn load_committed(storage: &dyn Storage) -> Result<HashMap<String, CommittedEntry>> {
    let mut committed = HashMap::new();

    for index_block_id in storage.list_blocks(PACK_INDEX_PREFIX)? {
        let data = storage.get_block(&index_block_id)?;
        for idx in decode_indexes(&data)? {
            for (addr, item) in &idx.items {
                apply_entry(
                    &mut committed,
                    addr,
                    CommittedEntry {
                        pack_block_id: idx.pack_block_id.clone(),
                        offset: item.offset,
                        length: item.length,
                        deleted: item.deleted,
                        create_time: idx.create_time,
                        index_block_id: index_block_id.clone(),
                    },
                );
            }
        }
    }

    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::packindex::PACK_BLOCK_PREFIX;
    use super::*;
    use crate::format::BlockFormat;
    use crate::storage::mem::MemStorage;
    use time::Duration;

    fn manager(storage: &MemStorage, max_packed: i64) -> BlockManager {
        let formatter = Formatter::new(BlockFormat::TestOnlyMd5, &[], true).unwrap();
        BlockManager::new(
            Arc::new(storage.clone()),
            formatter,
            max_packed,
            DEFAULT_MAX_PACK_FILE_LENGTH,
        )
        .unwrap()
    }

    fn count_with_prefix(storage: &MemStorage, prefix: &str) -> usize {
        storage
            .keys()
            .iter()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    #[test]
    fn standalone_write_read_round_trip() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, -1);

        let addr = mgr.write_block("", b"hello").unwrap();
        assert_eq!(addr, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(mgr.get_block(&addr).unwrap(), b"hello");

        mgr.flush().unwrap();
        assert_eq!(storage.len(), 2); // data block + index block
        assert_eq!(mgr.get_block(&addr).unwrap(), b"hello");
    }

    #[test]
    fn duplicate_writes_store_once() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, -1);

        let a = mgr.write_block("", b"same bytes").unwrap();
        let b = mgr.write_block("", b"same bytes").unwrap();
        assert_eq!(a, b);

        mgr.flush().unwrap();
        let c = mgr.write_block("", b"same bytes").unwrap();
        assert_eq!(a, c);
        mgr.flush().unwrap();

        assert_eq!(count_with_prefix(&storage, &a), 1);
    }

    #[test]
    fn packed_blocks_read_before_and_after_flush() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, 10000);

        let a = mgr.write_block("", b"first content").unwrap();
        let b = mgr.write_block("", b"second content").unwrap();

        // pending group, nothing in storage yet
        assert_eq!(storage.len(), 0);
        assert_eq!(mgr.get_block(&a).unwrap(), b"first content");
        assert_eq!(mgr.get_block(&b).unwrap(), b"second content");

        mgr.flush().unwrap();
        assert_eq!(count_with_prefix(&storage, PACK_BLOCK_PREFIX), 1);
        assert_eq!(count_with_prefix(&storage, PACK_INDEX_PREFIX), 1);
        assert_eq!(mgr.get_block(&a).unwrap(), b"first content");
        assert_eq!(mgr.get_block(&b).unwrap(), b"second content");

        // a fresh manager resolves through the written index
        let reopened = manager(&storage, 10000);
        assert_eq!(reopened.get_block(&a).unwrap(), b"first content");
    }

    #[test]
    fn oversized_blocks_bypass_packing() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, 4);

        let addr = mgr.write_block("", b"longer than four").unwrap();
        // stored standalone immediately
        assert_eq!(storage.get_raw(&addr).unwrap(), b"longer than four");
        mgr.flush().unwrap();
        assert_eq!(count_with_prefix(&storage, PACK_BLOCK_PREFIX), 0);
    }

    #[test]
    fn pack_rollover_honours_file_length_cap() {
        let storage = MemStorage::new();
        let formatter = Formatter::new(BlockFormat::TestOnlyMd5, &[], true).unwrap();
        let mgr = BlockManager::new(Arc::new(storage.clone()), formatter, 100, 32).unwrap();

        for i in 0..4 {
            mgr.write_block("", format!("block number {:02}", i).as_bytes())
                .unwrap();
        }
        mgr.flush().unwrap();

        assert!(count_with_prefix(&storage, PACK_BLOCK_PREFIX) >= 2);
        for i in 0..4 {
            let addr = mgr
                .write_block("", format!("block number {:02}", i).as_bytes())
                .unwrap();
            assert_eq!(
                mgr.get_block(&addr).unwrap(),
                format!("block number {:02}", i).as_bytes()
            );
        }
    }

    #[test]
    fn tombstone_hides_block_across_reopen() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, 10000);

        let addr = mgr.write_block("", b"doomed").unwrap();
        mgr.flush().unwrap();
        assert!(mgr.get_block(&addr).is_ok());

        mgr.delete_block(&addr).unwrap();
        assert!(matches!(mgr.get_block(&addr), Err(Error::BlockNotFound)));
        mgr.flush().unwrap();

        let reopened = manager(&storage, 10000);
        assert!(matches!(
            reopened.get_block(&addr),
            Err(Error::BlockNotFound)
        ));
        assert!(!reopened.list_blocks("").unwrap().contains(&addr));
    }

    #[test]
    fn raw_storage_fallback_is_verified() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, -1);

        // block present in storage but in no index
        storage.insert_raw("a76999788386641a3ec798554f1fe7e6", b"foo\nbar".to_vec());
        assert_eq!(
            mgr.get_block("a76999788386641a3ec798554f1fe7e6").unwrap(),
            b"foo\nbar"
        );

        storage.insert_raw("a76999788386641a3ec798554f1fe7e6", b"foo\nba".to_vec());
        assert!(matches!(
            mgr.get_block("a76999788386641a3ec798554f1fe7e6"),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn compaction_collapses_indexes_and_preserves_content() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, 10000);

        let mut addrs = Vec::new();
        for round in 0..3 {
            for i in 0..2 {
                addrs.push(
                    mgr.write_block("", format!("content {} {}", round, i).as_bytes())
                        .unwrap(),
                );
            }
            mgr.flush().unwrap();
        }
        assert_eq!(count_with_prefix(&storage, PACK_INDEX_PREFIX), 3);

        let future = OffsetDateTime::now_utc() + Duration::seconds(10);
        mgr.compact_indexes(future, &[]).unwrap();
        assert_eq!(count_with_prefix(&storage, PACK_INDEX_PREFIX), 1);

        let reopened = manager(&storage, 10000);
        for (n, addr) in addrs.iter().enumerate() {
            assert_eq!(
                reopened.get_block(addr).unwrap(),
                format!("content {} {}", n / 2, n % 2).as_bytes()
            );
        }
    }

    #[test]
    fn compaction_with_past_cutoff_is_noop() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, 10000);

        mgr.write_block("", b"one").unwrap();
        mgr.flush().unwrap();
        mgr.write_block("", b"two").unwrap();
        mgr.flush().unwrap();

        let keys_before = storage.keys();
        let past = OffsetDateTime::now_utc() - Duration::seconds(10);
        mgr.compact_indexes(past, &[]).unwrap();
        assert_eq!(storage.keys(), keys_before);
    }

    #[test]
    fn compaction_drops_tombstoned_addresses() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, 10000);

        let keep = mgr.write_block("", b"keep me").unwrap();
        let gone = mgr.write_block("", b"drop me").unwrap();
        mgr.flush().unwrap();
        mgr.delete_block(&gone).unwrap();
        mgr.flush().unwrap();

        let future = OffsetDateTime::now_utc() + Duration::seconds(10);
        mgr.compact_indexes(future, &[]).unwrap();

        let reopened = manager(&storage, 10000);
        assert_eq!(reopened.get_block(&keep).unwrap(), b"keep me");
        assert!(matches!(
            reopened.get_block(&gone),
            Err(Error::BlockNotFound)
        ));
        assert_eq!(count_with_prefix(&storage, PACK_INDEX_PREFIX), 1);
    }

    #[test]
    fn deleted_standalone_block_does_not_resurface_after_compaction() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, -1);

        let keep = mgr.write_block("", b"keep me").unwrap();
        let gone = mgr.write_block("", b"drop me").unwrap();
        mgr.flush().unwrap();

        mgr.delete_block(&gone).unwrap();
        mgr.flush().unwrap();
        // the payload bytes go with the tombstone, not just the index entry
        assert!(storage.get_raw(&gone).is_none());

        let future = OffsetDateTime::now_utc() + Duration::seconds(10);
        mgr.compact_indexes(future, &[]).unwrap();

        let reopened = manager(&storage, -1);
        assert_eq!(reopened.get_block(&keep).unwrap(), b"keep me");
        assert!(matches!(
            reopened.get_block(&gone),
            Err(Error::BlockNotFound)
        ));
    }

    #[test]
    fn compaction_keeps_standalone_block_recreated_after_deletion() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, -1);

        let addr = mgr.write_block("", b"phoenix").unwrap();
        mgr.flush().unwrap();
        mgr.delete_block(&addr).unwrap();
        mgr.flush().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let cutoff = OffsetDateTime::now_utc();
        std::thread::sleep(std::time::Duration::from_millis(10));

        let again = mgr.write_block("", b"phoenix").unwrap();
        assert_eq!(again, addr);
        mgr.flush().unwrap();

        // the tombstone predates the cutoff, the re-created block does not;
        // scrubbing must leave the newer payload alone
        mgr.compact_indexes(cutoff, &[]).unwrap();

        let reopened = manager(&storage, -1);
        assert_eq!(reopened.get_block(&addr).unwrap(), b"phoenix");
    }

    #[test]
    fn corrupted_pack_slice_is_malformed() {
        let storage = MemStorage::new();
        let mgr = manager(&storage, 10000);

        let addr = mgr.write_block("", b"precious").unwrap();
        mgr.flush().unwrap();

        // flip a byte inside the pack file
        let pack_key = storage
            .keys()
            .into_iter()
            .find(|k| k.starts_with(PACK_BLOCK_PREFIX))
            .unwrap();
        let mut pack = storage.get_raw(&pack_key).unwrap();
        pack[0] ^= 0xff;
        storage.insert_raw(&pack_key, pack);

        let reopened = manager(&storage, 10000);
        assert!(matches!(
            reopened.get_block(&addr),
            Err(Error::Malformed(_))
        ));
    }
}
