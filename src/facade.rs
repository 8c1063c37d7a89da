//! The schema-bound façade (spec §4.5): a typed shell that fixes a table's
//! name, schema text, and record type at definition time, so call sites
//! don't repeat them on every operation. Carries no invariants beyond
//! [`table::Table`]'s own; it's a forwarding convenience, not a second
//! implementation.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::table::Table;

/// A `const`-constructible binding of (table name, schema text, record
/// type). Typically declared once as a top-level `const` per table a
/// program works with, e.g.:
///
/// ```
/// use pagetab::facade::TableDef;
///
/// const CUSTOMERS: TableDef = TableDef::new(
///     "customers",
///     "struct Customer {\n  id @0 :UInt32;\n  name @1 :Text;\n}\n",
///     "Customer",
/// );
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    table_name: &'static str,
    schema_text: &'static str,
    record_type: &'static str,
}

impl TableDef {
    pub const fn new(
        table_name: &'static str,
        schema_text: &'static str,
        record_type: &'static str,
    ) -> Self {
        TableDef { table_name, schema_text, record_type }
    }

    pub fn table_name(&self) -> &'static str {
        self.table_name
    }

    /// Creates the bound table under `base_dir`. Takes no arguments beyond
    /// what was bound at construction time.
    pub fn create(&self, base_dir: &Path) -> Result<PathBuf> {
        Table::create(base_dir, self.table_name, self.schema_text, self.record_type)
    }

    pub fn open(&self, base_dir: &Path) -> Result<Table> {
        Table::open(base_dir, self.table_name)
    }

    pub fn delete(&self, base_dir: &Path) -> Result<()> {
        Table::delete(base_dir, self.table_name)
    }
}
