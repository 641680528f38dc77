//! Instance pointer
//!
//! The pointer starts out designating `@__hoisted_globals`; the runtime
//! repoints it at a per-instance buffer of `@__hoisted_globals_size` bytes.

use super::abi::POINTER_SYMBOL;
use super::aggregate::Aggregate;
use crate::ir::{CompilationUnit, Constant, GlobalRef, GlobalVariable, Type};
use crate::Result;

/// `%record*`
pub fn pointer_type(aggregate: &Aggregate) -> Type {
    Type::ptr(aggregate.record_type())
}

/// Adds `@__hoisted_globals_pointer = global %record* @__hoisted_globals`
pub fn install(unit: &mut CompilationUnit, aggregate: &Aggregate) -> Result<GlobalRef> {
    let pointer = GlobalVariable::new(
        POINTER_SYMBOL,
        pointer_type(aggregate),
        Constant::Global(aggregate.instance()),
    );
    let reference = pointer.reference();
    unit.add_global(pointer)?;
    Ok(reference)
}
