//! # Host IR
//!
//! Typed, SSA-form in-memory representation of a compilation unit: named
//! struct types, constants, global variables, aliases, functions made of basic
//! blocks, and unit-level metadata. Passes consume and edit a
//! [`CompilationUnit`] in place.
//!
//! ```text
//! CompilationUnit
//! ├── DataLayout        (sizes and alignments)
//! ├── TypeTable         (%named = type { ... })
//! ├── Item::Global      (@x = global i32 0)
//! ├── Item::Alias       (@y = alias i32, i32* @x)
//! ├── Item::Function    (define ... { blocks })
//! └── Metadata          (debug descriptors, named tuples)
//! ```

pub mod constant;
pub mod function;
pub mod instruction;
pub mod layout;
pub mod printer;
pub mod types;
pub mod unit;
pub mod uses;

pub use constant::{CastOp, Constant, GlobalRef};
pub use function::{BasicBlock, Function};
pub use instruction::{
    BinaryOp, DebugLoc, Instruction, InstructionKind, Operand, Predicate, ValueId,
};
pub use layout::{DataLayout, Endianness, StructLayout};
pub use types::{FloatKind, FunctionType, StructType, Type, TypeTable};
pub use unit::{
    Alias, CompilationUnit, DebugGlobal, GlobalVariable, Item, Linkage, Metadata,
    ThreadLocalMode,
};
pub use uses::{collect_uses, UseSite};
