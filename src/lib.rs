//! `pagetab`: a portable, read-optimized, file-backed table store.
//!
//! A table is a persistent, append-mostly ordered sequence of homogeneous
//! records, partitioned into fixed-capacity pages and accessed by ordinal
//! position through memory-mapped pages. Optional secondary indexes map
//! strings to ordinal lists for exact, prefix, and completion lookups.
//!
//! The moving parts, leaves first:
//!   - [`schema`] / [`schema_registry`]: the small struct/field DSL the
//!     codec adapter compiles, and the process-wide registry of compiled
//!     schemas.
//!   - [`record`]: the zero-copy frame encoding one page's worth of
//!     records, and the accessor over it.
//!   - [`page_io`]: page file naming and durable (temp-file + rename)
//!     writes.
//!   - [`mmap_cache`]: the bounded LRU of open page mmaps.
//!   - [`descriptor`]: the `config.json` metadata document.
//!   - [`trie_index`]: the string-keyed secondary index.
//!   - [`table`]: the table manager, the component the rest hang off of.
//!   - [`facade`]: a schema-bound typed wrapper over [`table::Table`].

pub mod descriptor;
pub mod error;
pub mod facade;
pub mod mmap_cache;
pub mod page_io;
pub mod record;
pub mod schema;
pub mod schema_registry;
pub mod table;
pub mod trie_index;

pub use error::{Error, Result};
