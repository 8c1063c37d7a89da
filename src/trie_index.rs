//! Secondary string index.
//!
//! The teacher's lineage (the Python original) builds these with
//! `marisa_trie.RecordTrie`, a succinct trie over sorted keys. No trie crate
//! sits anywhere in this crate's dependency stack, so this index is a sorted
//! flat key table with an offset-table-framed key blob (the same zero-copy
//! framing `record.rs` uses for pages) searched by binary search: still
//! sorted-key, still O(log n) lookup and O(log n + k) range scan, just
//! without literal trie nodes.
//!
//! File layout:
//! ```text
//! [u32 entry_count]
//! [(entry_count + 1) x u32 LE key-blob offsets, offsets[0] == 0]
//! [entry_count x u32 LE ordinal]
//! [key blob: UTF-8 key bytes, back to back, in sorted order]
//! ```

use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::mmap_cache;
use crate::page_io::write_page_atomic;

/// The three lookup modes a secondary index supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Keys equal to the query value.
    Exact,
    /// Keys that are a prefix of the query value (e.g. query "database"
    /// matches keys "data", "datab", "database").
    PrefixesOfValue,
    /// Keys that the query value is a prefix of (e.g. query "data" matches
    /// keys "database", "data-warehouse").
    CompletionsOfValue,
}

/// Builds a new index file from `entries`, sorting them by key so the
/// on-disk table can be binary-searched.
pub fn build(path: &Path, mut entries: Vec<(String, u32)>) -> Result<()> {
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()).then(a.1.cmp(&b.1)));

    let mut key_blob = Vec::new();
    let mut offsets = Vec::with_capacity(entries.len() + 1);
    offsets.push(0u32);
    for (key, _) in &entries {
        key_blob.extend_from_slice(key.as_bytes());
        offsets.push(key_blob.len() as u32);
    }

    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(entries.len() as u32)?;
    for off in &offsets {
        out.write_u32::<LittleEndian>(*off)?;
    }
    for (_, ordinal) in &entries {
        out.write_u32::<LittleEndian>(*ordinal)?;
    }
    out.extend_from_slice(&key_blob);

    write_page_atomic(path, &out)
}

/// Removes an index file entirely.
pub fn delete(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    mmap_cache::invalidate(path);
    Ok(())
}

/// A mmap-backed handle to an on-disk index, open for searching.
pub struct TrieIndex {
    mmap: Arc<Mmap>,
}

impl TrieIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let mmap = mmap_cache::get(path)?;
        if mmap.len() < 4 {
            return Err(Error::Corruption("index shorter than header".into()));
        }
        Ok(TrieIndex { mmap })
    }

    fn entry_count(&self) -> usize {
        (&self.mmap[0..4]).read_u32::<LittleEndian>().unwrap_or(0) as usize
    }

    fn offset_at(&self, i: usize) -> u32 {
        let start = 4 + i * 4;
        (&self.mmap[start..start + 4]).read_u32::<LittleEndian>().unwrap_or(0)
    }

    fn blob_start(&self) -> usize {
        let count = self.entry_count();
        4 + 4 * (count + 1) + count * 4
    }

    fn key_at(&self, i: usize) -> &[u8] {
        let blob_start = self.blob_start();
        let start = blob_start + self.offset_at(i) as usize;
        let end = blob_start + self.offset_at(i + 1) as usize;
        &self.mmap[start..end]
    }

    fn ordinal_at(&self, i: usize) -> u32 {
        let payload_start = 4 + 4 * (self.entry_count() + 1);
        let base = payload_start + i * 4;
        (&self.mmap[base..base + 4]).read_u32::<LittleEndian>().unwrap_or(0)
    }

    fn lower_bound(&self, target: &[u8]) -> usize {
        let (mut lo, mut hi) = (0, self.entry_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn upper_bound(&self, target: &[u8]) -> usize {
        let (mut lo, mut hi) = (0, self.entry_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid) <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn ordinals_for_exact(&self, key: &[u8]) -> Vec<u32> {
        let lo = self.lower_bound(key);
        let hi = self.upper_bound(key);
        (lo..hi).map(|i| self.ordinal_at(i)).collect()
    }

    /// Runs a lookup in the given mode, returning matching ordinals
    /// deduplicated but in an unspecified order (callers that need a
    /// deterministic order should sort the result).
    ///
    /// `value` is the query string: the exact key for `Exact`, the full
    /// value whose prefixes we check for `PrefixesOfValue`, or the prefix
    /// whose completions we gather for `CompletionsOfValue`.
    pub fn search(&self, mode: SearchMode, value: &str) -> Vec<u32> {
        let mut out = match mode {
            SearchMode::Exact => self.ordinals_for_exact(value.as_bytes()),
            SearchMode::PrefixesOfValue => {
                let mut hits = Vec::new();
                for (byte_idx, _) in value.char_indices() {
                    if byte_idx == 0 {
                        continue;
                    }
                    hits.extend(self.ordinals_for_exact(value[..byte_idx].as_bytes()));
                }
                hits.extend(self.ordinals_for_exact(value.as_bytes()));
                hits
            }
            SearchMode::CompletionsOfValue => {
                let target = value.as_bytes();
                let mut i = self.lower_bound(target);
                let n = self.entry_count();
                let mut hits = Vec::new();
                while i < n && self.key_at(i).starts_with(target) {
                    hits.push(self.ordinal_at(i));
                    i += 1;
                }
                hits
            }
        };
        out.sort_unstable();
        out.dedup();
        out
    }
}
