//! Type system of the host IR
//!
//! Types are structural except for named structs, whose bodies live in the
//! unit's [`TypeTable`]. Pointers are typed so that every address carries the
//! type of the storage it designates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Floating point widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatKind {
    /// IEEE single precision (`float`)
    F32,
    /// IEEE double precision (`double`)
    F64,
}

/// IR value type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// No value
    Void,
    /// Integer of the given bit width
    Int(u32),
    /// Floating point value
    Float(FloatKind),
    /// Typed pointer
    Pointer(Box<Type>),
    /// Fixed-length array: `[len x elem]`
    Array(Box<Type>, u64),
    /// Named struct, resolved through the [`TypeTable`]
    Struct(String),
    /// Function signature (only reachable behind a pointer)
    Function(Box<FunctionType>),
}

/// Function signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    /// Return type
    pub ret: Type,
    /// Parameter types
    pub params: Vec<Type>,
    /// Accepts extra trailing arguments
    pub variadic: bool,
}

impl FunctionType {
    /// Creates a non-variadic signature
    pub fn new(ret: Type, params: Vec<Type>) -> Self {
        Self {
            ret,
            params,
            variadic: false,
        }
    }
}

impl Type {
    /// 1-bit integer (booleans, comparison results)
    pub fn i1() -> Self {
        Type::Int(1)
    }

    /// 8-bit integer
    pub fn i8() -> Self {
        Type::Int(8)
    }

    /// 16-bit integer
    pub fn i16() -> Self {
        Type::Int(16)
    }

    /// 32-bit integer
    pub fn i32() -> Self {
        Type::Int(32)
    }

    /// 64-bit integer
    pub fn i64() -> Self {
        Type::Int(64)
    }

    /// Pointer to `pointee`
    pub fn ptr(pointee: Type) -> Self {
        Type::Pointer(Box::new(pointee))
    }

    /// `[len x elem]`
    pub fn array(elem: Type, len: u64) -> Self {
        Type::Array(Box::new(elem), len)
    }

    /// Reference to the named struct `name`
    pub fn named(name: impl Into<String>) -> Self {
        Type::Struct(name.into())
    }

    /// Function type
    pub fn function(ret: Type, params: Vec<Type>) -> Self {
        Type::Function(Box::new(FunctionType::new(ret, params)))
    }

    /// The type this pointer designates
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Returns true for integer types
    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// Returns true for pointer types
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Returns true for arrays and structs
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array(..) | Type::Struct(_))
    }

    /// Named structs mentioned anywhere inside this type
    pub fn struct_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_struct_names(&mut names);
        names
    }

    fn collect_struct_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Type::Struct(name) => out.push(name),
            Type::Pointer(inner) | Type::Array(inner, _) => inner.collect_struct_names(out),
            Type::Function(sig) => {
                sig.ret.collect_struct_names(out);
                for param in &sig.params {
                    param.collect_struct_names(out);
                }
            }
            Type::Void | Type::Int(_) | Type::Float(_) => {}
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(bits) => write!(f, "i{}", bits),
            Type::Float(FloatKind::F32) => write!(f, "float"),
            Type::Float(FloatKind::F64) => write!(f, "double"),
            Type::Pointer(inner) => write!(f, "{}*", inner),
            Type::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
            Type::Struct(name) => write!(f, "%{}", name),
            Type::Function(sig) => write!(f, "{}", sig),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.ret)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        if self.variadic {
            if !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}

/// A named struct definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    /// Name without the leading `%`
    pub name: String,
    /// Field types; `None` for an opaque struct
    pub body: Option<Vec<Type>>,
    /// Packed structs have no inter-field padding
    pub packed: bool,
}

impl StructType {
    /// Struct with a body
    pub fn new(name: impl Into<String>, fields: Vec<Type>) -> Self {
        Self {
            name: name.into(),
            body: Some(fields),
            packed: false,
        }
    }

    /// Struct declared without a body
    pub fn opaque(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: None,
            packed: false,
        }
    }

    /// Number of fields (0 for opaque structs)
    pub fn field_count(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }
}

/// Named struct definitions of a compilation unit, in definition order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTable {
    structs: Vec<StructType>,
}

impl TypeTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a struct definition, returning false if the name is taken
    pub fn define(&mut self, def: StructType) -> bool {
        if self.contains(&def.name) {
            return false;
        }
        self.structs.push(def);
        true
    }

    /// Returns true if a struct with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Looks up a struct definition
    pub fn get(&self, name: &str) -> Option<&StructType> {
        self.structs.iter().find(|s| s.name == name)
    }

    /// Field types of a non-opaque struct
    pub fn fields(&self, name: &str) -> Option<&[Type]> {
        self.get(name).and_then(|s| s.body.as_deref())
    }

    /// All definitions in order
    pub fn iter(&self) -> impl Iterator<Item = &StructType> {
        self.structs.iter()
    }

    /// Returns `base` if no struct uses it, otherwise `base.N` for the first free N
    pub fn fresh_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (0..)
            .map(|n| format!("{}.{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Type reached by stepping into `source` with `indices`.
    ///
    /// The indices here are the ones *after* the leading pointer step of an
    /// address computation. `None` marks a dynamic index, which is only legal
    /// for array steps.
    pub fn indexed_type(&self, source: &Type, indices: &[Option<u64>]) -> Option<Type> {
        let mut current = source.clone();
        for index in indices {
            current = match current {
                Type::Struct(ref name) => {
                    let field = (*index)? as usize;
                    self.fields(name)?.get(field)?.clone()
                }
                Type::Array(elem, _) => *elem,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Constant-index variant of [`TypeTable::indexed_type`]
    pub fn indexed_type_const(&self, source: &Type, indices: &[u64]) -> Option<Type> {
        let dynamic: Vec<Option<u64>> = indices.iter().map(|i| Some(*i)).collect();
        self.indexed_type(source, &dynamic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(Type::i32().to_string(), "i32");
        assert_eq!(Type::ptr(Type::i8()).to_string(), "i8*");
        assert_eq!(Type::array(Type::i32(), 4).to_string(), "[4 x i32]");
        assert_eq!(Type::named("rec").to_string(), "%rec");
        assert_eq!(
            Type::ptr(Type::function(Type::Void, vec![Type::i32()])).to_string(),
            "void (i32)*"
        );
    }

    #[test]
    fn test_indexed_type_through_struct_and_array() {
        let mut table = TypeTable::new();
        table.define(StructType::new(
            "pair",
            vec![Type::i8(), Type::array(Type::i64(), 3)],
        ));

        let pair = Type::named("pair");
        assert_eq!(table.indexed_type_const(&pair, &[0]), Some(Type::i8()));
        assert_eq!(
            table.indexed_type(&pair, &[Some(1), None]),
            Some(Type::i64())
        );
        // struct steps must be constant
        assert_eq!(table.indexed_type(&pair, &[None]), None);
        assert_eq!(table.indexed_type_const(&pair, &[2]), None);
        assert_eq!(table.indexed_type_const(&Type::i32(), &[0]), None);
    }

    #[test]
    fn test_fresh_name_skips_taken() {
        let mut table = TypeTable::new();
        assert_eq!(table.fresh_name("rec"), "rec");
        table.define(StructType::opaque("rec"));
        table.define(StructType::opaque("rec.0"));
        assert_eq!(table.fresh_name("rec"), "rec.1");
        assert!(!table.define(StructType::opaque("rec")));
    }
}
