//! IR instruction definitions

use super::constant::{CastOp, Constant};
use super::types::Type;
use serde::{Deserialize, Serialize};

/// Function-local SSA value (parameters and instruction results)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl ValueId {
    /// Creates a value id
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Local SSA value
    Local(ValueId),
    /// Constant, including item addresses
    Const(Constant),
}

impl Operand {
    /// Constant payload, if any
    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Operand::Const(c) => Some(c),
            Operand::Local(_) => None,
        }
    }
}

impl From<Constant> for Operand {
    fn from(c: Constant) -> Self {
        Operand::Const(c)
    }
}

impl From<ValueId> for Operand {
    fn from(v: ValueId) -> Self {
        Operand::Local(v)
    }
}

/// Source position attached to an instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugLoc {
    /// 1-based line
    pub line: u32,
    /// 1-based column
    pub column: u32,
    /// Enclosing scope (usually the source function name)
    pub scope: Option<String>,
}

impl DebugLoc {
    /// Location without scope
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            scope: None,
        }
    }
}

/// Integer arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `sdiv`
    SDiv,
    /// `udiv`
    UDiv,
    /// `srem`
    SRem,
    /// `urem`
    URem,
    /// `and`
    And,
    /// `or`
    Or,
    /// `xor`
    Xor,
    /// `shl`
    Shl,
    /// `lshr`
    LShr,
    /// `ashr`
    AShr,
}

impl BinaryOp {
    /// Mnemonic used by the printer
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SRem => "srem",
            BinaryOp::URem => "urem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
        }
    }
}

/// Integer comparison predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// signed `<`
    Slt,
    /// signed `<=`
    Sle,
    /// signed `>`
    Sgt,
    /// signed `>=`
    Sge,
    /// unsigned `<`
    Ult,
    /// unsigned `<=`
    Ule,
    /// unsigned `>`
    Ugt,
    /// unsigned `>=`
    Uge,
}

impl Predicate {
    /// Mnemonic used by the printer
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Predicate::Eq => "eq",
            Predicate::Ne => "ne",
            Predicate::Slt => "slt",
            Predicate::Sle => "sle",
            Predicate::Sgt => "sgt",
            Predicate::Sge => "sge",
            Predicate::Ult => "ult",
            Predicate::Ule => "ule",
            Predicate::Ugt => "ugt",
            Predicate::Uge => "uge",
        }
    }
}

/// Instruction payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    // Memory
    /// Stack slot: result is `ty*`
    Alloca {
        /// Allocated type
        ty: Type,
    },
    /// Read `ty` from `ptr`
    Load {
        /// Loaded type
        ty: Type,
        /// Address (`ty*`)
        ptr: Operand,
    },
    /// Write `value` to `ptr`
    Store {
        /// Stored value
        value: Operand,
        /// Address
        ptr: Operand,
    },
    /// Address arithmetic; first index steps over `base`, the rest walk into `source`
    FieldAddr {
        /// Type `base` points to
        source: Type,
        /// Base address
        base: Operand,
        /// Indices (struct steps must be constant integers)
        indices: Vec<Operand>,
    },

    // Arithmetic
    /// `lhs op rhs` over `ty`
    Binary {
        /// Operator
        op: BinaryOp,
        /// Operand and result type
        ty: Type,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Integer comparison producing `i1`
    Compare {
        /// Predicate
        pred: Predicate,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// Conversion
    Cast {
        /// Operator
        op: CastOp,
        /// Converted value
        value: Operand,
        /// Target type
        to: Type,
    },

    // Aggregates
    /// Copy of `aggregate` with the element at `indices` replaced by `value`
    InsertValue {
        /// Aggregate type
        ty: Type,
        /// Source aggregate
        aggregate: Operand,
        /// Inserted value
        value: Operand,
        /// Element path
        indices: Vec<u32>,
    },

    // Calls
    /// Call through `callee` (usually a function address constant)
    Call {
        /// Callee address
        callee: Operand,
        /// Return type
        ret: Type,
        /// Arguments
        args: Vec<Operand>,
    },

    // SSA
    /// Value selected by the predecessor block
    Phi {
        /// Result type
        ty: Type,
        /// `(value, predecessor label)` pairs
        incoming: Vec<(Operand, String)>,
    },

    // Terminators
    /// Return from the function
    Ret(Option<Operand>),
    /// Unconditional branch
    Br(String),
    /// Two-way branch on an `i1`
    CondBr {
        /// Condition
        cond: Operand,
        /// Taken when true
        then_label: String,
        /// Taken when false
        else_label: String,
    },
    /// Marks unreachable code
    Unreachable,
}

impl InstructionKind {
    /// Returns true if the instruction defines a local value
    pub fn produces_value(&self) -> bool {
        match self {
            InstructionKind::Alloca { .. }
            | InstructionKind::Load { .. }
            | InstructionKind::FieldAddr { .. }
            | InstructionKind::Binary { .. }
            | InstructionKind::Compare { .. }
            | InstructionKind::Cast { .. }
            | InstructionKind::InsertValue { .. }
            | InstructionKind::Phi { .. } => true,
            InstructionKind::Call { ret, .. } => *ret != Type::Void,
            InstructionKind::Store { .. }
            | InstructionKind::Ret(_)
            | InstructionKind::Br(_)
            | InstructionKind::CondBr { .. }
            | InstructionKind::Unreachable => false,
        }
    }

    /// Returns true for block terminators
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstructionKind::Ret(_)
                | InstructionKind::Br(_)
                | InstructionKind::CondBr { .. }
                | InstructionKind::Unreachable
        )
    }

    /// Branch targets of a terminator
    pub fn successors(&self) -> Vec<&str> {
        match self {
            InstructionKind::Br(label) => vec![label.as_str()],
            InstructionKind::CondBr {
                then_label,
                else_label,
                ..
            } => vec![then_label.as_str(), else_label.as_str()],
            _ => Vec::new(),
        }
    }

    /// All operands, phi incoming values included
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            InstructionKind::Alloca { .. }
            | InstructionKind::Br(_)
            | InstructionKind::Unreachable => Vec::new(),
            InstructionKind::Load { ptr, .. } => vec![ptr],
            InstructionKind::Store { value, ptr } => vec![value, ptr],
            InstructionKind::FieldAddr { base, indices, .. } => {
                std::iter::once(base).chain(indices.iter()).collect()
            }
            InstructionKind::Binary { lhs, rhs, .. } | InstructionKind::Compare { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            InstructionKind::Cast { value, .. } => vec![value],
            InstructionKind::InsertValue {
                aggregate, value, ..
            } => vec![aggregate, value],
            InstructionKind::Call { callee, args, .. } => {
                std::iter::once(callee).chain(args.iter()).collect()
            }
            InstructionKind::Phi { incoming, .. } => incoming.iter().map(|(v, _)| v).collect(),
            InstructionKind::Ret(value) => value.iter().collect(),
            InstructionKind::CondBr { cond, .. } => vec![cond],
        }
    }

    /// Mutable operands, excluding phi incoming values
    ///
    /// Phi operands are evaluated on the incoming edge rather than at the phi,
    /// so rewriting passes treat them separately through
    /// [`InstructionKind::phi_incoming_mut`].
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            InstructionKind::Alloca { .. }
            | InstructionKind::Br(_)
            | InstructionKind::Unreachable
            | InstructionKind::Phi { .. } => Vec::new(),
            InstructionKind::Load { ptr, .. } => vec![ptr],
            InstructionKind::Store { value, ptr } => vec![value, ptr],
            InstructionKind::FieldAddr { base, indices, .. } => {
                std::iter::once(base).chain(indices.iter_mut()).collect()
            }
            InstructionKind::Binary { lhs, rhs, .. } | InstructionKind::Compare { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            InstructionKind::Cast { value, .. } => vec![value],
            InstructionKind::InsertValue {
                aggregate, value, ..
            } => vec![aggregate, value],
            InstructionKind::Call { callee, args, .. } => {
                std::iter::once(callee).chain(args.iter_mut()).collect()
            }
            InstructionKind::Ret(value) => value.iter_mut().collect(),
            InstructionKind::CondBr { cond, .. } => vec![cond],
        }
    }

    /// Incoming `(value, predecessor)` pairs of a phi
    pub fn phi_incoming_mut(&mut self) -> Option<&mut Vec<(Operand, String)>> {
        match self {
            InstructionKind::Phi { incoming, .. } => Some(incoming),
            _ => None,
        }
    }
}

/// Instruction with its optional result and debug location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    /// Defined value, if the kind produces one
    pub result: Option<ValueId>,
    /// Payload
    pub kind: InstructionKind,
    /// Source position
    pub debug_loc: Option<DebugLoc>,
}

impl Instruction {
    /// Instruction without a debug location
    pub fn new(result: Option<ValueId>, kind: InstructionKind) -> Self {
        Self {
            result,
            kind,
            debug_loc: None,
        }
    }

    /// Attaches a debug location
    pub fn with_debug_loc(mut self, loc: Option<DebugLoc>) -> Self {
        self.debug_loc = loc;
        self
    }
}
