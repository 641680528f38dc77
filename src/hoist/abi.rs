//! Boundary symbols and layout manifest
//!
//! A transformed unit exposes exactly four symbols to the runtime that drives
//! multiple instances:
//!
//! | Symbol                       | Type                  | Mutability |
//! |------------------------------|-----------------------|------------|
//! | `%hoisted_globals`           | record type           | -          |
//! | `@__hoisted_globals`         | `%hoisted_globals`    | mutable    |
//! | `@__hoisted_globals_size`    | `i32`                 | constant   |
//! | `@__hoisted_globals_pointer` | `%hoisted_globals*`   | mutable    |
//!
//! The runtime allocates `__hoisted_globals_size` bytes per instance, copies
//! the initial contents of `__hoisted_globals` into it, and stores the buffer
//! address into `__hoisted_globals_pointer` before running code on behalf of
//! that instance. At most one instance may run with a given pointer value at a
//! time; swapping the pointer while relocated state is being accessed makes
//! two instances alias the same storage. Nothing in the transformed code
//! enforces this.
//!
//! Static data cannot load the pointer, so addresses of relocated globals
//! held in initializers, aliases and metadata point into `__hoisted_globals`
//! itself. A runtime that copies the record must relocate such pointers if it
//! wants them to follow the copy.
//!
//! Fields are laid out with the ABI alignment of their types. An explicit
//! `align` on a relocated global is dropped (the pass logs a warning), so a
//! runtime must not rely on over-aligned relocated state.

use super::aggregate::Aggregate;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of the synthesized record type
pub const RECORD_TYPE_NAME: &str = "hoisted_globals";
/// The single storage instance holding the initial values
pub const INSTANCE_SYMBOL: &str = "__hoisted_globals";
/// Read-only `i32` store size of the record
pub const SIZE_SYMBOL: &str = "__hoisted_globals_size";
/// Mutable pointer through which all relocated state is accessed
pub const POINTER_SYMBOL: &str = "__hoisted_globals_pointer";

/// Item names owned by the transformation
pub const RESERVED_SYMBOLS: [&str; 3] = [INSTANCE_SYMBOL, SIZE_SYMBOL, POINTER_SYMBOL];

/// Returns true if `name` is one of the boundary symbols
pub fn is_reserved(name: &str) -> bool {
    RESERVED_SYMBOLS.contains(&name)
}

/// One relocated item as seen by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiField {
    /// Field position in the record
    pub index: u32,
    /// Name of the global the field replaces
    pub origin: String,
    /// Rendered field type
    pub ty: String,
    /// Byte offset within the record
    pub offset: u64,
    /// Store size in bytes
    pub size: u64,
}

/// Versioned description of the boundary symbols and the record layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoistAbi {
    /// Manifest format version
    pub version: u32,
    /// Record type name (may carry a uniquing suffix)
    pub record_type: String,
    /// Instance symbol
    pub instance_symbol: String,
    /// Size descriptor symbol
    pub size_symbol: String,
    /// Instance pointer symbol
    pub pointer_symbol: String,
    /// Store size of the record
    pub record_size: u64,
    /// ABI alignment of the record
    pub record_align: u64,
    /// Fields in record order
    pub fields: Vec<AbiField>,
    /// SHA-256 over the field table, hex encoded
    pub fingerprint: String,
}

impl HoistAbi {
    /// Current manifest format version
    pub const VERSION: u32 = 1;

    /// Manifest describing `aggregate`
    pub fn from_aggregate(aggregate: &Aggregate) -> Self {
        let fields: Vec<AbiField> = aggregate
            .field_types()
            .iter()
            .enumerate()
            .map(|(i, ty)| AbiField {
                index: i as u32,
                origin: aggregate.origins[i].clone(),
                ty: ty.to_string(),
                offset: aggregate.layout.offsets.get(i).copied().unwrap_or(0),
                size: aggregate.field_sizes.get(i).copied().unwrap_or(0),
            })
            .collect();
        let fingerprint = Self::compute_fingerprint(&fields, aggregate.store_size);

        Self {
            version: Self::VERSION,
            record_type: aggregate.record.name.clone(),
            instance_symbol: INSTANCE_SYMBOL.to_string(),
            size_symbol: SIZE_SYMBOL.to_string(),
            pointer_symbol: POINTER_SYMBOL.to_string(),
            record_size: aggregate.store_size,
            record_align: aggregate.layout.align,
            fields,
            fingerprint,
        }
    }

    /// Hashes the field table and record size
    pub fn compute_fingerprint(fields: &[AbiField], record_size: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("v{};size={}\n", Self::VERSION, record_size).as_bytes());
        for field in fields {
            hasher.update(
                format!(
                    "{}:{}:{}:{}:{}\n",
                    field.index, field.origin, field.ty, field.offset, field.size
                )
                .as_bytes(),
            );
        }
        hex::encode(hasher.finalize())
    }

    /// Returns true if the stored fingerprint matches the field table
    pub fn fingerprint_matches(&self) -> bool {
        self.fingerprint == Self::compute_fingerprint(&self.fields, self.record_size)
    }

    /// Returns true if a runtime built against `other` can drive this unit
    pub fn is_compatible(&self, other: &HoistAbi) -> bool {
        self.version == other.version
            && self.instance_symbol == other.instance_symbol
            && self.size_symbol == other.size_symbol
            && self.pointer_symbol == other.pointer_symbol
            && self.fingerprint == other.fingerprint
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a manifest written by [`HoistAbi::to_json`]
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(index: u32, origin: &str, offset: u64) -> AbiField {
        AbiField {
            index,
            origin: origin.to_string(),
            ty: "i32".to_string(),
            offset,
            size: 4,
        }
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("__hoisted_globals_pointer"));
        assert!(!is_reserved("hoisted_globals"));
        assert!(!is_reserved("x"));
    }

    #[test]
    fn test_fingerprint_depends_on_layout() {
        let a = vec![field(0, "x", 0), field(1, "y", 4)];
        let b = vec![field(0, "y", 0), field(1, "x", 4)];
        let fa = HoistAbi::compute_fingerprint(&a, 8);
        assert_eq!(fa, HoistAbi::compute_fingerprint(&a, 8));
        assert_ne!(fa, HoistAbi::compute_fingerprint(&b, 8));
        assert_ne!(fa, HoistAbi::compute_fingerprint(&a, 16));
        assert_eq!(fa.len(), 64);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = HoistAbi::from_json("{\"version\": 1}").unwrap_err();
        assert!(matches!(err, crate::Error::Serialization(_)));
    }
}
