//! Schema compiler.
//!
//! Compiles a small struct/field DSL into an in-memory description of one
//! or more record structs. The table manager resolves the record struct and
//! the synthesized list-of-record struct by name out of a compiled schema,
//! the same way the teacher's `CapnpManager`/`CapnpTable` resolve a struct
//! type out of a loaded capnp module by name.

use std::collections::HashMap;
use std::fmt;

use pest::Parser;
use pest_derive::Parser;

use crate::error::{Error, Result};

#[derive(Parser)]
#[grammar = "schema.pest"]
struct SchemaParser;

/// One field's declared (name, ordinal, type) in a struct definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ordinal: u32,
    pub ty: FieldType,
}

/// Primitive field types the record codec understands. A superset of the
/// teacher's 4-variant `SqlType`, widened to the Cap'n Proto primitive set
/// the spec's examples use (`id:u32`, `founded:i16`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Text,
    Data,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Bool => "Bool",
            FieldType::Int8 => "Int8",
            FieldType::Int16 => "Int16",
            FieldType::Int32 => "Int32",
            FieldType::Int64 => "Int64",
            FieldType::UInt8 => "UInt8",
            FieldType::UInt16 => "UInt16",
            FieldType::UInt32 => "UInt32",
            FieldType::UInt64 => "UInt64",
            FieldType::Float32 => "Float32",
            FieldType::Float64 => "Float64",
            FieldType::Text => "Text",
            FieldType::Data => "Data",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Bool" => Ok(FieldType::Bool),
            "Int8" => Ok(FieldType::Int8),
            "Int16" => Ok(FieldType::Int16),
            "Int32" => Ok(FieldType::Int32),
            "Int64" => Ok(FieldType::Int64),
            "UInt8" => Ok(FieldType::UInt8),
            "UInt16" => Ok(FieldType::UInt16),
            "UInt32" => Ok(FieldType::UInt32),
            "UInt64" => Ok(FieldType::UInt64),
            "Float32" => Ok(FieldType::Float32),
            "Float64" => Ok(FieldType::Float64),
            "Text" => Ok(FieldType::Text),
            "Data" => Ok(FieldType::Data),
            other => Err(Error::InvalidSchema(format!("unknown field type '{other}'"))),
        }
    }
}

/// A compiled schema: the stable 64-bit id from the header line, plus every
/// struct declared in the text (the user's record struct and the
/// synthesized `{RecordType}List` struct), keyed by struct name.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub id: u64,
    pub structs: HashMap<String, Vec<FieldDef>>,
    pub raw_text: String,
}

impl CompiledSchema {
    /// Resolves the field list for a record struct, skipping `List(...)`
    /// fields (those only ever appear in the synthesized list struct).
    pub fn record_fields(&self, record_type: &str) -> Result<&[FieldDef]> {
        self.structs
            .get(record_type)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::InvalidSchema(format!("no struct named '{record_type}'")))
    }
}

/// FNV-1a, used to derive a stable 64-bit id from schema text that omits
/// one, feeding the registry's auto-repair.
pub fn digest(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// If `text` doesn't start (after leading whitespace) with a `@0x...;` id
/// line, returns the digest that should be prepended. Otherwise `None`.
pub fn missing_id_digest(text: &str) -> Option<u64> {
    if text.trim_start().starts_with("@0x") {
        None
    } else {
        Some(digest(text))
    }
}

/// Compiles schema text. The text must start with a `@0x{16hex};` line (the
/// registry is responsible for prepending one before calling this, as part
/// of its self-repair flow).
pub fn compile(text: &str) -> Result<CompiledSchema> {
    let trimmed = text.trim_start();
    let rest = trimmed.strip_prefix("@0x").ok_or_else(|| {
        Error::InvalidSchema(format!(
            "missing schema id; suggested @0x{:016x};",
            digest(text)
        ))
    })?;
    let semi = rest
        .find(';')
        .ok_or_else(|| Error::InvalidSchema("unterminated schema id line".into()))?;
    let hex_part = &rest[..semi];
    let id = u64::from_str_radix(hex_part, 16)
        .map_err(|e| Error::InvalidSchema(format!("bad schema id '{hex_part}': {e}")))?;
    let body = &rest[semi + 1..];

    let mut pairs = SchemaParser::parse(Rule::schema, body)
        .map_err(|e| Error::InvalidSchema(format!("parse error: {e}")))?;
    let schema_pair = pairs.next().expect("schema rule always produces one pair");

    let mut structs = HashMap::new();
    for item in schema_pair.into_inner() {
        if item.as_rule() != Rule::struct_def {
            continue; // EOI
        }
        let mut inner = item.into_inner();
        let name = inner.next().expect("struct has a name").as_str().to_string();
        let mut fields = Vec::new();
        for field_pair in inner {
            // field_def := ident "@" number ":" field_type ";"
            let mut fp = field_pair.into_inner();
            let fname = fp.next().unwrap().as_str().to_string();
            let ordinal: u32 = fp.next().unwrap().as_str().parse().expect("digits");
            let type_pair = fp.next().unwrap();
            // `List(Foo)` fields only occur in the synthesized list struct,
            // which this crate never decodes through the capnp-style field
            // list (pages carry their own framing, see record.rs). Skip it.
            if let Some(ty) = parse_field_type(type_pair)? {
                fields.push(FieldDef { name: fname, ordinal, ty });
            }
        }
        structs.insert(name, fields);
    }

    Ok(CompiledSchema { id, structs, raw_text: text.to_string() })
}

fn parse_field_type(pair: pest::iterators::Pair<Rule>) -> Result<Option<FieldType>> {
    // field_type := list_type | ident
    let inner = pair.into_inner().next();
    match inner {
        Some(p) if p.as_rule() == Rule::list_type => Ok(None),
        Some(p) => p.as_str().parse().map(Some),
        None => Err(Error::InvalidSchema("empty field type".into())),
    }
}

/// Appends the synthesized `struct {record_type}List { records @0 :List({record_type}); }`
/// declaration that a freshly-created table's schema always carries.
pub fn append_list_struct(schema_text: &str, record_type: &str) -> String {
    format!(
        "{schema_text}\nstruct {record_type}List {{\n  records @0 :List({record_type});\n}}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_struct_with_fields() {
        let text = "@0x0000000000000001;\nstruct Customer {\n  index @0 :UInt32;\n  name @1 :Text;\n}\n";
        let schema = compile(text).unwrap();
        assert_eq!(schema.id, 1);
        let fields = schema.record_fields("Customer").unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "index");
        assert_eq!(fields[0].ty, FieldType::UInt32);
        assert_eq!(fields[1].ty, FieldType::Text);
    }

    #[test]
    fn missing_id_is_reported_with_a_suggestion() {
        let text = "struct Customer {\n  name @0 :Text;\n}\n";
        let err = compile(text).unwrap_err();
        match err {
            Error::InvalidSchema(msg) => assert!(msg.contains("suggested @0x")),
            other => panic!("expected InvalidSchema, got {other:?}"),
        }
        assert!(missing_id_digest(text).is_some());
    }

    #[test]
    fn list_struct_is_appended_and_parses() {
        let base = "@0x0000000000000002;\nstruct Sample {\n  name @0 :Text;\n}\n";
        let full = append_list_struct(base, "Sample");
        let schema = compile(&full).unwrap();
        assert!(schema.structs.contains_key("Sample"));
        assert!(schema.structs.contains_key("SampleList"));
    }
}
