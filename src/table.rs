//! The table manager: owns one table's directory, its descriptor, its
//! loaded schema, and is the sole writer of its pages. This is the central
//! component the rest of the crate hangs off of: the paged store, the
//! zero-copy accessor, and the trie index all meet here.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use log::debug;
use memmap2::Mmap;

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::mmap_cache;
use crate::page_io::{self, PAGE_CAPACITY};
use crate::record::{self, FieldValue, RecordBuilder, RecordView};
use crate::schema::{self, FieldDef};
use crate::schema_registry;
use crate::trie_index::{self, SearchMode, TrieIndex};

/// A zero-copy handle onto one record's bytes. Backed by a retained
/// `Arc<Mmap>` (the cache's entry for `get`, a private short-lived mapping
/// for `iterate`), so the handle is valid for as long as it (or its clone
/// of the `Arc`) is held, independent of the frame it was carved out of.
pub struct MappedRecord {
    mmap: Arc<Mmap>,
    fields: Rc<Vec<FieldDef>>,
    start: usize,
    end: usize,
}

impl MappedRecord {
    fn view(&self) -> RecordView<'_> {
        RecordView::from_raw(&self.fields, &self.mmap[self.start..self.end])
    }

    /// Looks up one field by name, decoding only the fields before it.
    pub fn field(&self, name: &str) -> Result<FieldValue> {
        self.view().field(name)
    }

    /// Decodes every field, in schema order.
    pub fn to_map(&self) -> Result<Vec<(String, FieldValue)>> {
        self.view().to_map()
    }
}

/// Per-ordinal field patches for `Table::update`: maps an ordinal to the
/// (field name, new value) pairs to apply at that position.
pub type Patch = HashMap<String, FieldValue>;

pub struct Table {
    dir: PathBuf,
    name: String,
    descriptor: Descriptor,
    fields: Rc<Vec<FieldDef>>,
    tries: RefCell<HashMap<String, Arc<TrieIndex>>>,
}

impl Table {
    /// Creates a new table directory under `base_dir`. Fails if the
    /// directory already exists and is non-empty (this crate does not
    /// follow the original Python implementation's delete-and-recreate
    /// behavior here, see DESIGN.md for the rationale).
    ///
    /// Synthesizes the `{record_type}List` struct declaration, writes the
    /// resulting schema text to `{table_name}.capnp`, and loads it into the
    /// schema registry (which performs the one-shot id self-repair if the
    /// caller's `schema_text` omitted the leading `@0x...;` line).
    pub fn create(
        base_dir: &Path,
        table_name: &str,
        schema_text: &str,
        record_type: &str,
    ) -> Result<PathBuf> {
        let dir = base_dir.join(table_name);
        if dir.exists() {
            if fs::read_dir(&dir)?.next().is_some() {
                return Err(Error::InvalidArgument(format!(
                    "table directory '{}' already exists and is non-empty",
                    dir.display()
                )));
            }
        } else {
            fs::create_dir_all(&dir)?;
        }

        let full_text = schema::append_list_struct(schema_text, record_type);
        let schema_file = format!("{table_name}.capnp");
        let schema_path = dir.join(&schema_file);
        fs::write(&schema_path, &full_text)?;
        schema_registry::load(&schema_path, table_name)?;

        let descriptor = Descriptor::new(table_name, &schema_file, record_type);
        descriptor.save(&dir)?;
        debug!("created table '{table_name}' at {dir:?}");
        Ok(dir)
    }

    /// Opens an existing table directory, loading its descriptor and
    /// (if not already bound under this table's name) its schema.
    pub fn open(base_dir: &Path, table_name: &str) -> Result<Table> {
        let dir = base_dir.join(table_name);
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("table '{table_name}'")));
        }
        let descriptor = Descriptor::load(&dir)?;
        let schema = match schema_registry::get(table_name) {
            Some(schema) => schema,
            None => schema_registry::load(&dir.join(&descriptor.schema_file), table_name)?,
        };
        let fields = schema.record_fields(&descriptor.record_type)?.to_vec();
        Ok(Table {
            dir,
            name: table_name.to_string(),
            descriptor,
            fields: Rc::new(fields),
            tries: RefCell::new(HashMap::new()),
        })
    }

    /// Recursively removes the table directory. Idempotent when absent.
    pub fn delete(base_dir: &Path, table_name: &str) -> Result<()> {
        let dir = base_dir.join(table_name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        schema_registry::unload(Some(std::slice::from_ref(&table_name.to_string())));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Returns `M(T).count` directly from the descriptor; never scans
    /// pages.
    pub fn count(&self) -> usize {
        self.descriptor.count
    }

    fn page_path(&self, page_index: usize) -> PathBuf {
        page_io::page_path(&self.dir, page_index)
    }

    /// Fetches the record at `pos`, `0 <= pos < count()`, through the mmap
    /// cache.
    pub fn get(&self, pos: usize) -> Result<MappedRecord> {
        if pos >= self.descriptor.count {
            return Err(Error::InvalidArgument(format!(
                "ordinal {pos} out of range (count={})",
                self.descriptor.count
            )));
        }
        let page_index = pos / PAGE_CAPACITY;
        let slot = pos % PAGE_CAPACITY;
        let path = self.page_path(page_index);
        let mmap = mmap_cache::get(&path)?;
        let frame = record::FrameView::open(&self.fields, &mmap)?;
        let (start, end) = frame
            .record_range(slot)
            .map_err(|e| page_short_of_descriptor(e, page_index, pos))?;
        Ok(MappedRecord { mmap, fields: self.fields.clone(), start, end })
    }

    /// Lazily yields records `[offset, offset+limit)` in ordinal order. Page
    /// mappings are opened privately (bypassing the mmap cache) one at a
    /// time, and released as soon as the iterator crosses a page boundary,
    /// so a large scan never evicts another caller's cache-resident pages.
    pub fn iterate(&self, offset: usize, limit: Option<usize>) -> Iter<'_> {
        let count = self.descriptor.count;
        let start = offset.min(count);
        let len = limit.unwrap_or(count.saturating_sub(start));
        let end = start.saturating_add(len).min(count);
        Iter { table: self, next_ordinal: start, end_ordinal: end, current_page: None, current_mmap: None }
    }

    fn write_page(&self, page_index: usize, records: &[RecordBuilder]) -> Result<()> {
        let bytes = record::encode_frame(&self.fields, records)?;
        let path = self.page_path(page_index);
        page_io::write_page_atomic(&path, &bytes)?;
        mmap_cache::invalidate(&path);
        debug!("wrote page {page_index} of '{}' ({} records)", self.name, records.len());
        Ok(())
    }

    /// Appends `records` (each a field-name -> value map) in input order.
    /// Reads the current tail page into owned builders first (if it has
    /// one), fills it, rolls to a fresh page on overflow, and writes every
    /// touched page through temp-file + rename before advancing and saving
    /// the descriptor last.
    pub fn append<I>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = HashMap<String, FieldValue>>,
    {
        let mut page_index = self.descriptor.count / PAGE_CAPACITY;
        let tail_len = self.descriptor.count % PAGE_CAPACITY;
        let mut buffer: Vec<RecordBuilder> = if tail_len > 0 {
            let bytes = page_io::read_page(&self.page_path(page_index))?;
            record::FrameView::open(&self.fields, &bytes)?.to_builders()?
        } else {
            Vec::new()
        };

        let mut appended = 0usize;
        for values in records {
            buffer.push(RecordBuilder::from_map(&self.fields, &values)?);
            appended += 1;
            if buffer.len() == PAGE_CAPACITY {
                self.write_page(page_index, &buffer)?;
                buffer.clear();
                page_index += 1;
            }
        }
        if !buffer.is_empty() {
            self.write_page(page_index, &buffer)?;
        }

        self.descriptor.count += appended;
        self.descriptor.save(&self.dir)?;
        debug!("appended {appended} record(s) to '{}', count now {}", self.name, self.descriptor.count);
        Ok(appended)
    }

    /// Applies per-ordinal field patches, touching each affected page at
    /// most once. Mmap cache entries for rewritten pages are purged so a
    /// subsequent `get` never observes stale bytes.
    pub fn update(&mut self, patches: BTreeMap<usize, Patch>) -> Result<()> {
        let mut by_page: BTreeMap<usize, Vec<(usize, &Patch)>> = BTreeMap::new();
        for (&ordinal, patch) in &patches {
            if ordinal >= self.descriptor.count {
                return Err(Error::InvalidArgument(format!(
                    "ordinal {ordinal} out of range (count={})",
                    self.descriptor.count
                )));
            }
            by_page.entry(ordinal / PAGE_CAPACITY).or_default().push((ordinal % PAGE_CAPACITY, patch));
        }

        for (page_index, slot_patches) in by_page {
            let path = self.page_path(page_index);
            let bytes = page_io::read_page(&path)?;
            let mut builders = record::FrameView::open(&self.fields, &bytes)?.to_builders()?;
            for (slot, patch) in slot_patches {
                let record = builders.get_mut(slot).ok_or_else(|| {
                    Error::Corruption(format!("page {page_index} missing slot {slot}"))
                })?;
                for (field_name, value) in patch {
                    record.set(&self.fields, field_name, value.clone())?;
                }
            }
            let out = record::encode_frame(&self.fields, &builders)?;
            page_io::write_page_atomic(&path, &out)?;
            mmap_cache::invalidate(&path);
        }
        debug!("updated {} record(s) in '{}'", patches.len(), self.name);
        Ok(())
    }

    fn trie_path(&self, attr: &str) -> PathBuf {
        self.dir.join(format!("{attr}.trie"))
    }

    /// Builds `{attr}.trie`: verifies `attr` exists, walks every record
    /// (skipping any `filter_fn` rejects), derives one or more keys per
    /// record (`key_fn`, or the field's `Display` form when absent, with
    /// empty strings dropped either way), and persists the resulting
    /// key -> ordinal table.
    pub fn create_trie(
        &self,
        attr: &str,
        key_fn: Option<&dyn Fn(&FieldValue) -> Vec<String>>,
        filter_fn: Option<&dyn Fn(&MappedRecord) -> bool>,
    ) -> Result<()> {
        if !self.fields.iter().any(|f| f.name == attr) {
            return Err(Error::InvalidArgument(format!("no such attribute '{attr}'")));
        }

        let mut entries = Vec::new();
        for ordinal in 0..self.descriptor.count {
            let record = self.get(ordinal)?;
            if let Some(filter) = filter_fn {
                if !filter(&record) {
                    continue;
                }
            }
            let value = record.field(attr)?;
            let keys: Vec<String> = match key_fn {
                Some(f) => f(&value),
                None => vec![value.to_string()],
            };
            for key in keys {
                if key.is_empty() {
                    continue;
                }
                entries.push((key, ordinal as u32));
            }
        }

        trie_index::build(&self.trie_path(attr), entries)?;
        self.tries.borrow_mut().remove(attr);
        debug!("built trie index on '{attr}' for table '{}'", self.name);
        Ok(())
    }

    /// Opens (or returns the cached handle for) the index on `attr`. Fails
    /// with `NoIndex` if no trie file exists for that attribute.
    pub fn open_trie(&self, attr: &str) -> Result<Arc<TrieIndex>> {
        if let Some(idx) = self.tries.borrow().get(attr) {
            return Ok(idx.clone());
        }
        let path = self.trie_path(attr);
        if !path.exists() {
            return Err(Error::NoIndex(attr.to_string()));
        }
        let idx = Arc::new(TrieIndex::open(&path)?);
        self.tries.borrow_mut().insert(attr.to_string(), idx.clone());
        Ok(idx)
    }

    /// Removes the index file for `attr` and drops any cached handle.
    pub fn drop_trie(&self, attr: &str) -> Result<()> {
        self.tries.borrow_mut().remove(attr);
        trie_index::delete(&self.trie_path(attr))
    }

    /// Looks up `value` against the index on `attr` in the given mode and
    /// materializes the matching records via `get`.
    pub fn search(&self, attr: &str, value: &str, mode: SearchMode) -> Result<Vec<MappedRecord>> {
        let idx = self.open_trie(attr)?;
        idx.search(mode, value).into_iter().map(|ordinal| self.get(ordinal as usize)).collect()
    }
}

/// `record_range` reports an out-of-bounds slot as `InvalidArgument` because
/// it only knows the frame it decoded, not the descriptor. Callers here
/// have already checked `ordinal < descriptor.count`, so a slot still
/// missing from the decoded page means the page is short of what the
/// descriptor promises: a page/descriptor disagreement, which spec.md §7
/// classifies as `Corruption`, not a bad caller argument.
fn page_short_of_descriptor(err: Error, page_index: usize, ordinal: usize) -> Error {
    match err {
        Error::InvalidArgument(msg) => Error::Corruption(format!(
            "page {page_index} decoded short of descriptor count at ordinal {ordinal}: {msg}"
        )),
        other => other,
    }
}

/// The lazy, non-restartable sequence returned by `Table::iterate`.
pub struct Iter<'t> {
    table: &'t Table,
    next_ordinal: usize,
    end_ordinal: usize,
    current_page: Option<usize>,
    current_mmap: Option<Arc<Mmap>>,
}

impl<'t> Iterator for Iter<'t> {
    type Item = Result<MappedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_ordinal >= self.end_ordinal {
            return None;
        }
        let page_index = self.next_ordinal / PAGE_CAPACITY;
        let slot = self.next_ordinal % PAGE_CAPACITY;

        if self.current_page != Some(page_index) {
            let path = self.table.page_path(page_index);
            let file = match std::fs::File::open(&path) {
                Ok(f) => f,
                Err(e) => return Some(Err(e.into())),
            };
            // Safety: same invariant as mmap_cache::get. Pages are only
            // ever replaced via temp-file + rename, never mutated in
            // place, so this mapping's view of the inode is stable.
            let mmap = match unsafe { Mmap::map(&file) } {
                Ok(m) => Arc::new(m),
                Err(e) => return Some(Err(e.into())),
            };
            self.current_mmap = Some(mmap);
            self.current_page = Some(page_index);
        }

        let mmap = self.current_mmap.clone().expect("just populated above");
        let frame = match record::FrameView::open(&self.table.fields, &mmap) {
            Ok(f) => f,
            Err(e) => return Some(Err(e)),
        };
        let (start, end) = match frame.record_range(slot).map_err(|e| {
            page_short_of_descriptor(e, page_index, self.next_ordinal)
        }) {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        self.next_ordinal += 1;
        Some(Ok(MappedRecord { mmap, fields: self.table.fields.clone(), start, end }))
    }
}
