//! Target data layout
//!
//! Answers size and alignment queries the way the target ABI lays values out
//! in memory. The textual form follows the LLVM data layout string
//! (`e-p:64:64-i64:64-...`); only the components that affect sizes of the
//! types in [`Type`] are interpreted, the rest are accepted and ignored.

use super::types::{FloatKind, Type, TypeTable};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

/// Size and alignment rules for a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLayout {
    /// Byte order
    pub endianness: Endianness,
    /// Pointer size in bytes (address space 0)
    pub pointer_size: u64,
    /// Pointer ABI alignment in bytes
    pub pointer_align: u64,
    /// `(bit width, ABI alignment in bytes)` for integers, sorted by width
    pub int_aligns: Vec<(u32, u64)>,
    /// ABI alignment of `float`
    pub f32_align: u64,
    /// ABI alignment of `double`
    pub f64_align: u64,
    /// Minimum ABI alignment of aggregates
    pub aggregate_align: u64,
}

/// Field placement of a struct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLayout {
    /// Byte offset of each field
    pub offsets: Vec<u64>,
    /// Total size including tail padding
    pub size: u64,
    /// ABI alignment of the struct
    pub align: u64,
}

impl Default for DataLayout {
    /// Layout implied by an empty layout string
    fn default() -> Self {
        Self {
            endianness: Endianness::Little,
            pointer_size: 8,
            pointer_align: 8,
            int_aligns: vec![(1, 1), (8, 1), (16, 2), (32, 4), (64, 4)],
            f32_align: 4,
            f64_align: 8,
            aggregate_align: 1,
        }
    }
}

impl DataLayout {
    /// x86-64 System V
    pub fn x86_64() -> Self {
        DataLayout::from_str("e-m:e-p:64:64-i64:64-i128:128-n8:16:32:64-S128")
            .unwrap_or_default()
    }

    /// 32-bit x86 System V (64-bit integers and doubles are 4-byte aligned)
    pub fn i686() -> Self {
        DataLayout::from_str("e-m:e-p:32:32-i64:32-f64:32-n8:16:32-S128").unwrap_or_default()
    }

    /// 32-bit WebAssembly
    pub fn wasm32() -> Self {
        DataLayout::from_str("e-m:e-p:32:32-i64:64-n32:64-S128").unwrap_or_default()
    }

    /// ABI alignment of an integer of `bits` width.
    ///
    /// Widths without an entry take the alignment of the next wider entry, or
    /// of the widest entry when none is wider.
    pub fn int_align(&self, bits: u32) -> u64 {
        if let Some((_, align)) = self.int_aligns.iter().find(|(w, _)| *w == bits) {
            return *align;
        }
        self.int_aligns
            .iter()
            .find(|(w, _)| *w > bits)
            .or_else(|| self.int_aligns.last())
            .map_or(1, |(_, align)| *align)
    }

    /// Bytes written by a store of `ty` (no trailing alignment padding for
    /// scalars; aggregates include their internal and tail padding)
    pub fn store_size(&self, ty: &Type, types: &TypeTable) -> Result<u64> {
        self.store_size_at(ty, types, 0)
    }

    /// Bytes between consecutive elements of type `ty` in an array
    pub fn alloc_size(&self, ty: &Type, types: &TypeTable) -> Result<u64> {
        let size = self.store_size(ty, types)?;
        let align = self.abi_align(ty, types)?;
        Ok(align_to(size, align))
    }

    /// ABI alignment of `ty`
    pub fn abi_align(&self, ty: &Type, types: &TypeTable) -> Result<u64> {
        self.abi_align_at(ty, types, 0)
    }

    /// Field offsets, size and alignment of the named struct `name`
    pub fn struct_layout(&self, name: &str, types: &TypeTable) -> Result<StructLayout> {
        self.struct_layout_at(name, types, 0)
    }

    fn store_size_at(&self, ty: &Type, types: &TypeTable, depth: usize) -> Result<u64> {
        check_depth(ty, depth)?;
        match ty {
            Type::Int(bits) => Ok((u64::from(*bits) + 7) / 8),
            Type::Float(FloatKind::F32) => Ok(4),
            Type::Float(FloatKind::F64) => Ok(8),
            Type::Pointer(_) => Ok(self.pointer_size),
            Type::Array(elem, len) => {
                let size = self.store_size_at(elem, types, depth + 1)?;
                let align = self.abi_align_at(elem, types, depth + 1)?;
                align_to(size, align)
                    .checked_mul(*len)
                    .ok_or_else(|| Error::layout(ty, "array size overflows"))
            }
            Type::Struct(name) => Ok(self.struct_layout_at(name, types, depth + 1)?.size),
            Type::Void | Type::Function(_) => Err(Error::layout(ty, "type has no storage size")),
        }
    }

    fn abi_align_at(&self, ty: &Type, types: &TypeTable, depth: usize) -> Result<u64> {
        check_depth(ty, depth)?;
        match ty {
            Type::Int(bits) => Ok(self.int_align(*bits)),
            Type::Float(FloatKind::F32) => Ok(self.f32_align),
            Type::Float(FloatKind::F64) => Ok(self.f64_align),
            Type::Pointer(_) => Ok(self.pointer_align),
            Type::Array(elem, _) => self.abi_align_at(elem, types, depth + 1),
            Type::Struct(name) => Ok(self.struct_layout_at(name, types, depth + 1)?.align),
            Type::Void | Type::Function(_) => Err(Error::layout(ty, "type has no alignment")),
        }
    }

    fn struct_layout_at(&self, name: &str, types: &TypeTable, depth: usize) -> Result<StructLayout> {
        let ty = Type::named(name);
        check_depth(&ty, depth)?;
        let def = types
            .get(name)
            .ok_or_else(|| Error::layout(&ty, "struct is not defined in this unit"))?;
        let fields = def
            .body
            .as_ref()
            .ok_or_else(|| Error::layout(&ty, "struct is opaque"))?;

        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut struct_align = if def.packed { 1 } else { self.aggregate_align.max(1) };
        for field in fields {
            let field_align = if def.packed {
                1
            } else {
                self.abi_align_at(field, types, depth + 1)?
            };
            offset = align_to(offset, field_align);
            offsets.push(offset);
            let field_size = self.store_size_at(field, types, depth + 1)?;
            offset = offset
                .checked_add(align_to(field_size, field_align))
                .ok_or_else(|| Error::layout(&ty, "struct size overflows"))?;
            struct_align = struct_align.max(field_align);
        }

        Ok(StructLayout {
            offsets,
            size: align_to(offset, struct_align),
            align: struct_align,
        })
    }

    fn apply_component(&mut self, component: &str) -> Result<()> {
        let invalid = |reason: &str| Error::data_layout(component, reason);
        let mut chars = component.chars();
        let Some(tag) = chars.next() else {
            return Ok(());
        };
        let rest = chars.as_str();

        match tag {
            'e' if rest.is_empty() => self.endianness = Endianness::Little,
            'E' if rest.is_empty() => self.endianness = Endianness::Big,
            'p' => {
                let (space, fields) = rest.split_once(':').ok_or_else(|| invalid("missing size"))?;
                if !space.is_empty() && space != "0" {
                    // other address spaces do not affect default pointers
                    return Ok(());
                }
                let parts = parse_bits_list(fields).map_err(|r| invalid(&r))?;
                let size = *parts.first().ok_or_else(|| invalid("missing size"))?;
                self.pointer_size = bits_to_bytes(size).map_err(|r| invalid(&r))?;
                self.pointer_align = match parts.get(1) {
                    Some(align) => bits_to_bytes(*align).map_err(|r| invalid(&r))?,
                    None => self.pointer_size,
                };
            }
            'i' => {
                let parts = parse_bits_list(rest).map_err(|r| invalid(&r))?;
                let (width, align) = match parts.as_slice() {
                    [width, align, ..] => (*width, *align),
                    _ => return Err(invalid("expected i<size>:<abi>")),
                };
                let width = u32::try_from(width).map_err(|_| invalid("integer width too large"))?;
                let align = bits_to_bytes(align).map_err(|r| invalid(&r))?;
                match self.int_aligns.iter_mut().find(|(w, _)| *w == width) {
                    Some(entry) => entry.1 = align,
                    None => {
                        self.int_aligns.push((width, align));
                        self.int_aligns.sort_by_key(|(w, _)| *w);
                    }
                }
            }
            'f' => {
                let parts = parse_bits_list(rest).map_err(|r| invalid(&r))?;
                let (width, align) = match parts.as_slice() {
                    [width, align, ..] => (*width, *align),
                    _ => return Err(invalid("expected f<size>:<abi>")),
                };
                let align = bits_to_bytes(align).map_err(|r| invalid(&r))?;
                match width {
                    32 => self.f32_align = align,
                    64 => self.f64_align = align,
                    // f16, f80, f128 have no counterpart in the type system
                    _ => {}
                }
            }
            'a' => {
                let fields = rest.strip_prefix(':').unwrap_or(rest);
                let parts = parse_bits_list(fields).map_err(|r| invalid(&r))?;
                if let Some(align) = parts.first() {
                    self.aggregate_align = bits_to_bytes(*align).map_err(|r| invalid(&r))?.max(1);
                }
            }
            // native widths, stack alignment, mangling, function pointer alignment
            'n' | 'S' | 'm' | 'F' | 'v' | 'A' | 'G' | 'P' => {}
            _ => return Err(invalid("unknown component")),
        }
        Ok(())
    }
}

impl FromStr for DataLayout {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut layout = DataLayout::default();
        for component in text.split('-').filter(|c| !c.is_empty()) {
            layout.apply_component(component)?;
        }
        Ok(layout)
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endian = match self.endianness {
            Endianness::Little => "e",
            Endianness::Big => "E",
        };
        write!(
            f,
            "{}-p:{}:{}",
            endian,
            self.pointer_size * 8,
            self.pointer_align * 8
        )?;
        for (width, align) in &self.int_aligns {
            write!(f, "-i{}:{}", width, align * 8)?;
        }
        write!(f, "-f32:{}-f64:{}", self.f32_align * 8, self.f64_align * 8)?;
        write!(f, "-a:{}", self.aggregate_align * 8)
    }
}

const MAX_TYPE_DEPTH: usize = 64;

fn check_depth(ty: &Type, depth: usize) -> Result<()> {
    if depth > MAX_TYPE_DEPTH {
        return Err(Error::layout(ty, "type nesting is recursive or too deep"));
    }
    Ok(())
}

fn align_to(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

fn parse_bits_list(text: &str) -> std::result::Result<Vec<u64>, String> {
    text.split(':')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| format!("'{}' is not a number", part))
        })
        .collect()
}

fn bits_to_bytes(bits: u64) -> std::result::Result<u64, String> {
    if bits == 0 || bits % 8 != 0 {
        return Err(format!("{} bits is not a whole number of bytes", bits));
    }
    Ok(bits / 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::StructType;

    #[test]
    fn test_x86_64_scalars() {
        let layout = DataLayout::x86_64();
        let types = TypeTable::new();
        assert_eq!(layout.pointer_size, 8);
        assert_eq!(layout.store_size(&Type::i1(), &types).unwrap(), 1);
        assert_eq!(layout.store_size(&Type::Int(36), &types).unwrap(), 5);
        assert_eq!(layout.alloc_size(&Type::Int(36), &types).unwrap(), 8);
        assert_eq!(layout.abi_align(&Type::i64(), &types).unwrap(), 8);
        assert_eq!(
            layout
                .store_size(&Type::array(Type::i32(), 4), &types)
                .unwrap(),
            16
        );
    }

    #[test]
    fn test_i686_aligns_i64_to_four() {
        let layout = DataLayout::i686();
        let mut types = TypeTable::new();
        types.define(StructType::new("s", vec![Type::i8(), Type::i64()]));
        assert_eq!(layout.pointer_size, 4);
        let s = layout.struct_layout("s", &types).unwrap();
        assert_eq!(s.offsets, vec![0, 4]);
        assert_eq!(s.size, 12);

        let x86_64 = DataLayout::x86_64();
        let s = x86_64.struct_layout("s", &types).unwrap();
        assert_eq!(s.offsets, vec![0, 8]);
        assert_eq!(s.size, 16);
    }

    #[test]
    fn test_struct_padding_and_packed() {
        let layout = DataLayout::x86_64();
        let mut types = TypeTable::new();
        types.define(StructType::new(
            "padded",
            vec![Type::i32(), Type::i8(), Type::ptr(Type::i8())],
        ));
        let mut packed = StructType::new("packed", vec![Type::i8(), Type::i32()]);
        packed.packed = true;
        types.define(packed);

        let padded = layout.struct_layout("padded", &types).unwrap();
        assert_eq!(padded.offsets, vec![0, 4, 8]);
        assert_eq!(padded.size, 16);
        assert_eq!(padded.align, 8);

        let packed = layout.struct_layout("packed", &types).unwrap();
        assert_eq!(packed.offsets, vec![0, 1]);
        assert_eq!(packed.size, 5);
    }

    #[test]
    fn test_unsized_types_fail() {
        let layout = DataLayout::x86_64();
        let mut types = TypeTable::new();
        types.define(StructType::opaque("handle"));
        types.define(StructType::new("loop", vec![Type::named("loop")]));

        for ty in [
            Type::named("handle"),
            Type::named("missing"),
            Type::named("loop"),
            Type::Void,
            Type::function(Type::Void, vec![]),
        ] {
            let err = layout.store_size(&ty, &types).unwrap_err();
            assert!(
                matches!(err, Error::LayoutQueryFailure { .. }),
                "{} should not be sizable",
                ty
            );
        }

        // pointers to unsized types are fine
        assert_eq!(
            layout
                .store_size(&Type::ptr(Type::named("handle")), &types)
                .unwrap(),
            8
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DataLayout::from_str("e-p:64:sixty").is_err());
        assert!(DataLayout::from_str("e-i12:4").is_err());
        assert!(DataLayout::from_str("e-q:1").is_err());
        assert!(DataLayout::from_str("").is_ok());
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        let layout = DataLayout::i686();
        let reparsed = DataLayout::from_str(&layout.to_string()).unwrap();
        assert_eq!(reparsed, layout);
    }
}
