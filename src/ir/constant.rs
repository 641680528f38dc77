//! Compile-time constants
//!
//! Constants double as the only way to name a top-level item: the address of
//! an item is the constant [`Constant::Global`]. Every reference to an item in
//! initializers, alias targets, metadata and instruction operands is therefore
//! found by walking constant trees.

use super::types::{FloatKind, Type, TypeTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Typed reference to a top-level item
///
/// Carries the value type of the referenced item so the reference has a type
/// (`value_type*`) without consulting the unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalRef {
    /// Symbol name without the leading `@`
    pub name: String,
    /// Type of the storage (or function) the symbol designates
    pub value_type: Type,
}

impl GlobalRef {
    /// Creates a reference
    pub fn new(name: impl Into<String>, value_type: Type) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }

    /// Type of the address (`value_type*`)
    pub fn address_type(&self) -> Type {
        Type::ptr(self.value_type.clone())
    }
}

/// Conversion operators usable in constant and instruction casts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastOp {
    /// Reinterpret a pointer as another pointer type
    Bitcast,
    /// Pointer to integer
    PtrToInt,
    /// Integer to pointer
    IntToPtr,
    /// Integer truncation
    Trunc,
    /// Integer zero extension
    ZExt,
    /// Integer sign extension
    SExt,
}

impl CastOp {
    /// Mnemonic used by the printer
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CastOp::Bitcast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
        }
    }
}

/// Constant value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    /// Integer of `bits` width
    Int {
        /// Bit width
        bits: u32,
        /// Value (sign-extended)
        value: i64,
    },
    /// Float stored as raw bits so constants stay `Eq`
    Float {
        /// Width
        kind: FloatKind,
        /// `f64::to_bits` of the value
        bits: u64,
    },
    /// Null pointer of the given pointer type
    Null(Type),
    /// All-zero value of the given type
    Zero(Type),
    /// Unspecified value of the given type
    Undef(Type),
    /// Array of `elem`
    Array {
        /// Element type
        elem: Type,
        /// Elements
        items: Vec<Constant>,
    },
    /// Value of a named struct
    Struct {
        /// Struct name
        name: String,
        /// Field values, in field order
        fields: Vec<Constant>,
    },
    /// Raw byte string, typed `[len x i8]`
    Bytes(Vec<u8>),
    /// Address of a top-level item
    Global(GlobalRef),
    /// Constant address arithmetic: `base` stepped by `indices`
    ///
    /// The first index steps over the pointer itself; the rest walk into the
    /// aggregate `source`.
    FieldAddr {
        /// Type `base` points to
        source: Type,
        /// Base address
        base: Box<Constant>,
        /// Constant indices
        indices: Vec<u64>,
    },
    /// Constant conversion
    Cast {
        /// Operator
        op: CastOp,
        /// Converted value
        value: Box<Constant>,
        /// Target type
        to: Type,
    },
}

impl Constant {
    /// `i32` constant
    pub fn i32(value: i64) -> Self {
        Constant::Int { bits: 32, value }
    }

    /// `i64` constant
    pub fn i64(value: i64) -> Self {
        Constant::Int { bits: 64, value }
    }

    /// Integer constant of the given width
    pub fn int(bits: u32, value: i64) -> Self {
        Constant::Int { bits, value }
    }

    /// `double` constant
    pub fn f64(value: f64) -> Self {
        Constant::Float {
            kind: FloatKind::F64,
            bits: value.to_bits(),
        }
    }

    /// Address of an item
    pub fn global(name: impl Into<String>, value_type: Type) -> Self {
        Constant::Global(GlobalRef::new(name, value_type))
    }

    /// Integer array constant, e.g. `[4 x i32] [1, 2, 3, 4]`
    pub fn int_array(bits: u32, values: &[i64]) -> Self {
        Constant::Array {
            elem: Type::Int(bits),
            items: values.iter().map(|v| Constant::int(bits, *v)).collect(),
        }
    }

    /// NUL-terminated C string
    pub fn c_string(text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        Constant::Bytes(bytes)
    }

    /// Type of this constant, or `None` if an address step is ill-formed
    pub fn type_of(&self, types: &TypeTable) -> Option<Type> {
        match self {
            Constant::Int { bits, .. } => Some(Type::Int(*bits)),
            Constant::Float { kind, .. } => Some(Type::Float(*kind)),
            Constant::Null(ty) | Constant::Zero(ty) | Constant::Undef(ty) => Some(ty.clone()),
            Constant::Array { elem, items } => Some(Type::array(elem.clone(), items.len() as u64)),
            Constant::Struct { name, .. } => Some(Type::named(name.clone())),
            Constant::Bytes(bytes) => Some(Type::array(Type::i8(), bytes.len() as u64)),
            Constant::Global(global) => Some(global.address_type()),
            Constant::FieldAddr {
                source, indices, ..
            } => {
                let rest = indices.get(1..).unwrap_or(&[]);
                types.indexed_type_const(source, rest).map(Type::ptr)
            }
            Constant::Cast { to, .. } => Some(to.clone()),
        }
    }

    /// Calls `f` for every item reference inside this constant
    pub fn for_each_global<'a>(&'a self, f: &mut impl FnMut(&'a GlobalRef)) {
        match self {
            Constant::Global(global) => f(global),
            Constant::Array { items, .. } => items.iter().for_each(|c| c.for_each_global(f)),
            Constant::Struct { fields, .. } => fields.iter().for_each(|c| c.for_each_global(f)),
            Constant::FieldAddr { base, .. } => base.for_each_global(f),
            Constant::Cast { value, .. } => value.for_each_global(f),
            Constant::Int { .. }
            | Constant::Float { .. }
            | Constant::Null(_)
            | Constant::Zero(_)
            | Constant::Undef(_)
            | Constant::Bytes(_) => {}
        }
    }

    /// Number of references to `name` inside this constant
    pub fn count_references(&self, name: &str) -> usize {
        let mut count = 0;
        self.for_each_global(&mut |global| {
            if global.name == name {
                count += 1;
            }
        });
        count
    }

    /// Number of references to any key of `targets`
    pub fn count_references_any<V>(&self, targets: &HashMap<String, V>) -> usize {
        let mut count = 0;
        self.for_each_global(&mut |global| {
            if targets.contains_key(&global.name) {
                count += 1;
            }
        });
        count
    }

    /// Returns true if any key of `targets` is referenced
    pub fn mentions_any<V>(&self, targets: &HashMap<String, V>) -> bool {
        let mut found = false;
        self.for_each_global(&mut |global| {
            found |= targets.contains_key(&global.name);
        });
        found
    }

    /// Replaces every reference whose name is a key of `replacements`.
    ///
    /// Each reference is visited once; replacements are not walked again, so
    /// a replacement may itself mention any symbol. Returns the number of
    /// references replaced.
    pub fn replace_globals(&mut self, replacements: &HashMap<String, Constant>) -> usize {
        match self {
            Constant::Global(global) => match replacements.get(&global.name) {
                Some(replacement) => {
                    *self = replacement.clone();
                    1
                }
                None => 0,
            },
            Constant::Array { items, .. } => items
                .iter_mut()
                .map(|c| c.replace_globals(replacements))
                .sum(),
            Constant::Struct { fields, .. } => fields
                .iter_mut()
                .map(|c| c.replace_globals(replacements))
                .sum(),
            Constant::FieldAddr { base, .. } => base.replace_globals(replacements),
            Constant::Cast { value, .. } => value.replace_globals(replacements),
            Constant::Int { .. }
            | Constant::Float { .. }
            | Constant::Null(_)
            | Constant::Zero(_)
            | Constant::Undef(_)
            | Constant::Bytes(_) => 0,
        }
    }

    /// Integer value, if this is an integer constant
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { bits, value } => write!(f, "i{} {}", bits, value),
            Constant::Float { kind, bits } => {
                let value = f64::from_bits(*bits);
                match kind {
                    FloatKind::F32 => write!(f, "float {:?}", value),
                    FloatKind::F64 => write!(f, "double {:?}", value),
                }
            }
            Constant::Null(ty) => write!(f, "{} null", ty),
            Constant::Zero(ty) => write!(f, "{} zeroinitializer", ty),
            Constant::Undef(ty) => write!(f, "{} undef", ty),
            Constant::Array { elem, items } => {
                write!(f, "[{} x {}] [", items.len(), elem)?;
                write_list(f, items)?;
                write!(f, "]")
            }
            Constant::Struct { name, fields } => {
                write!(f, "%{} {{ ", name)?;
                write_list(f, fields)?;
                write!(f, " }}")
            }
            Constant::Bytes(bytes) => {
                write!(f, "[{} x i8] c\"", bytes.len())?;
                for byte in bytes {
                    let printable = (byte.is_ascii_graphic() || *byte == b' ')
                        && *byte != b'"'
                        && *byte != b'\\';
                    if printable {
                        write!(f, "{}", *byte as char)?;
                    } else {
                        write!(f, "\\{:02X}", byte)?;
                    }
                }
                write!(f, "\"")
            }
            Constant::Global(global) => write!(f, "{} @{}", global.address_type(), global.name),
            Constant::FieldAddr {
                source,
                base,
                indices,
            } => {
                write!(f, "fieldaddr ({}, {}", source, base)?;
                for index in indices {
                    write!(f, ", {}", index)?;
                }
                write!(f, ")")
            }
            Constant::Cast { op, value, to } => {
                write!(f, "{} ({} to {})", op.mnemonic(), value, to)
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Constant]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}
