//! Process-wide LRU cache of open page mmaps.
//!
//! Mirrors the Python original's `CapnpManager.page_cache` (an
//! `OrderedDict` capped at ten entries, move-to-end on hit, evict the
//! oldest on overflow), reimplemented here with the `lru` crate over
//! `memmap2::Mmap` instead of a hand-rolled ordered dict.

use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;
use lru::LruCache;
use memmap2::Mmap;

use crate::error::Result;

const CACHE_CAPACITY: usize = 10;

lazy_static::lazy_static! {
    static ref CACHE: Mutex<LruCache<PathBuf, Arc<Mmap>>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap()));
}

/// Returns a cached mmap for `path`, opening and inserting one on a miss.
pub fn get(path: &Path) -> Result<Arc<Mmap>> {
    let key = path.to_path_buf();
    {
        let mut cache = CACHE.lock().unwrap();
        if let Some(mmap) = cache.get(&key) {
            return Ok(mmap.clone());
        }
    }
    let file = File::open(path)?;
    // Safety: the page file is only ever replaced via temp-file + rename
    // (page_io::write_page_atomic), never truncated or mutated in place, so
    // the mapping's view of a given inode never changes underneath readers.
    let mmap = unsafe { Mmap::map(&file)? };
    let mmap = Arc::new(mmap);
    let mut cache = CACHE.lock().unwrap();
    cache.put(key, mmap.clone());
    debug!("mmap cache: opened {path:?}, {} entries resident", cache.len());
    Ok(mmap)
}

/// Drops a cached mapping, used right before a page is rewritten so later
/// readers see the new file rather than a stale mapping of the old inode.
pub fn invalidate(path: &Path) {
    CACHE.lock().unwrap().pop(&path.to_path_buf());
}

/// Drops every cached mapping.
pub fn clear() {
    CACHE.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn repeated_get_reuses_the_cached_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_000.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"abc").unwrap();
        drop(f);

        let a = get(&path).unwrap();
        let b = get(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        invalidate(&path);
        let c = get(&path).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(&c[..], b"abc");
    }

    #[test]
    fn clear_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page_000.bin");
        fs_write(&path, b"x");
        let _ = get(&path).unwrap();
        clear();
        let a = get(&path).unwrap();
        let b = get(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    fn fs_write(path: &Path, bytes: &[u8]) {
        let mut f = File::create(path).unwrap();
        f.write_all(bytes).unwrap();
    }
}
