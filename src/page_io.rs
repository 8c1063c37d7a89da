//! Page file naming and durable (temp-file + rename) writes.
//!
//! A table's directory holds one frame-encoded file per page, named
//! `page_{k:03d}.bin`, plus a `config.json` descriptor written last so a
//! reader never sees a record count that outruns the pages backing it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Maximum records held in one page before a new page is opened.
///
/// Fixed per store per spec (500_000) and never varies across a table's
/// lifetime. The `small-pages` feature swaps in a tiny capacity so the
/// page-boundary scenarios (a fresh table split after N+1 appends) can run
/// as a real, fast `Table` integration test rather than one that pushes
/// half a million records through just to cross a page.
#[cfg(not(feature = "small-pages"))]
pub const PAGE_CAPACITY: usize = 500_000;
#[cfg(feature = "small-pages")]
pub const PAGE_CAPACITY: usize = 4;

pub fn page_path(dir: &Path, page_index: usize) -> PathBuf {
    dir.join(format!("page_{page_index:03}.bin"))
}

/// Writes `bytes` to `path` via a same-directory temp file, then renames it
/// into place. A crash mid-write leaves the original file (if any)
/// untouched, never a half-written page.
pub fn write_page_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("page")
    ));
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_page(path: &Path) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}
