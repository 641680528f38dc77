//! Record synthesis
//!
//! Builds the record type whose field `k` holds candidate `k`, its initial
//! value, and the two items that describe it: the instance and the size
//! descriptor.

use super::abi::{INSTANCE_SYMBOL, RECORD_TYPE_NAME, SIZE_SYMBOL};
use super::scanner::SelectionSet;
use crate::ir::{
    CompilationUnit, Constant, DataLayout, GlobalRef, GlobalVariable, StructLayout, StructType,
    Type,
};
use crate::{Error, Result};

/// Synthesized record and everything derived from its layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// Record type definition
    pub record: StructType,
    /// Struct constant of the captured initializers
    pub initializer: Constant,
    /// Name of the global each field replaces
    pub origins: Vec<String>,
    /// Field offsets, size and alignment
    pub layout: StructLayout,
    /// Store size of each field
    pub field_sizes: Vec<u64>,
    /// Store size of the record, including padding
    pub store_size: u64,
}

impl Aggregate {
    /// `%record`
    pub fn record_type(&self) -> Type {
        Type::named(self.record.name.clone())
    }

    /// Field types in order
    pub fn field_types(&self) -> &[Type] {
        self.record.body.as_deref().unwrap_or(&[])
    }

    /// Number of fields
    pub fn field_count(&self) -> usize {
        self.record.field_count()
    }

    /// Field position of the global `name`
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.origins.iter().position(|origin| origin == name)
    }

    /// Reference to the instance
    pub fn instance(&self) -> GlobalRef {
        GlobalRef::new(INSTANCE_SYMBOL, self.record_type())
    }

    /// Constant address of field `k` of the instance
    pub fn field_address(&self, k: usize) -> Constant {
        Constant::FieldAddr {
            source: self.record_type(),
            base: Box::new(Constant::Global(self.instance())),
            indices: vec![0, k as u64],
        }
    }
}

/// Builds the record for `selection` without touching the unit
pub fn build(
    selection: &SelectionSet,
    unit: &CompilationUnit,
    data_layout: &DataLayout,
) -> Result<Aggregate> {
    let name = unit.types.fresh_name(RECORD_TYPE_NAME);
    let fields: Vec<Type> = selection.iter().map(|c| c.ty.clone()).collect();
    let record = StructType::new(name.clone(), fields.clone());

    // size against a scratch table so a failure leaves the unit alone
    let mut scratch = unit.types.clone();
    scratch.define(record.clone());

    let field_sizes = fields
        .iter()
        .map(|ty| data_layout.store_size(ty, &scratch))
        .collect::<Result<Vec<u64>>>()?;
    let layout = data_layout.struct_layout(&name, &scratch)?;
    let store_size = data_layout.store_size(&Type::named(name.clone()), &scratch)?;
    if i32::try_from(store_size).is_err() {
        return Err(Error::layout(
            Type::named(name),
            format!("store size {} does not fit the i32 size descriptor", store_size),
        ));
    }

    Ok(Aggregate {
        initializer: Constant::Struct {
            name,
            fields: selection.iter().map(|c| c.initializer.clone()).collect(),
        },
        origins: selection.iter().map(|c| c.name.clone()).collect(),
        record,
        layout,
        field_sizes,
        store_size,
    })
}

/// Defines the record type and inserts the instance and size descriptor
pub fn emit(aggregate: &Aggregate, unit: &mut CompilationUnit) -> Result<()> {
    unit.define_struct(aggregate.record.clone())?;
    unit.add_global(GlobalVariable::new(
        INSTANCE_SYMBOL,
        aggregate.record_type(),
        aggregate.initializer.clone(),
    ))?;
    unit.add_global(GlobalVariable::constant(
        SIZE_SYMBOL,
        Type::i32(),
        Constant::i32(aggregate.store_size as i64),
    ))?;
    Ok(())
}
