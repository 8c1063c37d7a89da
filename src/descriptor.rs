//! The table directory's `config.json` descriptor.
//!
//! Grounded on the Python original's `get_config`/`set_config`, which
//! round-trip a small JSON document holding the schema filename, module
//! name, record/list type names, and the live record count. The descriptor
//! is always written last (via the same temp-file + rename path pages use)
//! so a reader never observes a count that outruns the pages backing it.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::page_io::write_page_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub schema_file: String,
    pub module_name: String,
    pub record_type: String,
    pub list_type: String,
    /// Historical descriptors used `length`; a reader accepts either key,
    /// writers always emit `count`.
    #[serde(alias = "length")]
    pub count: usize,
}

impl Descriptor {
    pub fn new(table_name: &str, schema_file: &str, record_type: &str) -> Self {
        Descriptor {
            schema_file: schema_file.to_string(),
            module_name: table_name.to_string(),
            record_type: record_type.to_string(),
            list_type: format!("{record_type}List"),
            count: 0,
        }
    }

    pub fn path(dir: &Path) -> std::path::PathBuf {
        dir.join("config.json")
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let text = fs::read_to_string(Self::path(dir))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        write_page_atomic(&Self::path(dir), text.as_bytes())
    }
}
