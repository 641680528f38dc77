//! Functions and basic blocks

use super::instruction::{DebugLoc, Instruction, InstructionKind, ValueId};
use super::types::FunctionType;
use super::unit::Linkage;
use serde::{Deserialize, Serialize};

/// Basic block: a label and a straight-line instruction list ending in a terminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Label identifying this block
    pub label: String,
    /// Instructions in execution order
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Creates an empty block
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            instructions: Vec::new(),
        }
    }

    /// The final instruction if it is a terminator
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|inst| inst.kind.is_terminator())
    }
}

/// Function definition or declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Symbol name
    pub name: String,
    /// Signature
    pub ty: FunctionType,
    /// Linkage
    pub linkage: Linkage,
    /// Parameter values, one per signature parameter
    pub params: Vec<ValueId>,
    /// Body; empty for a declaration
    pub blocks: Vec<BasicBlock>,
    next_value: u32,
}

impl Function {
    /// Creates a declaration; add blocks to turn it into a definition
    pub fn new(name: impl Into<String>, ty: FunctionType) -> Self {
        let params: Vec<ValueId> = (0..ty.params.len() as u32).map(ValueId).collect();
        let next_value = params.len() as u32;
        Self {
            name: name.into(),
            ty,
            linkage: Linkage::External,
            params,
            blocks: Vec::new(),
            next_value,
        }
    }

    /// Returns true if the function has no body
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Allocates a new local value id
    pub fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    /// Moves the value counter past every id already defined in the body.
    ///
    /// Bodies assembled by pushing onto `blocks` directly never advance the
    /// counter; call this before allocating ids for such a function.
    pub fn sync_value_counter(&mut self) {
        let highest = self
            .params
            .iter()
            .copied()
            .chain(self.instructions().filter_map(|inst| inst.result))
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(0);
        self.next_value = self.next_value.max(highest);
    }

    /// Appends an empty block and returns its index
    pub fn add_block(&mut self, label: &str) -> usize {
        self.blocks.push(BasicBlock::new(label));
        self.blocks.len() - 1
    }

    /// Index of the block with this label
    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Appends an instruction to block `block`, returning its result value
    pub fn append(&mut self, block: usize, kind: InstructionKind) -> Option<ValueId> {
        self.append_at(block, kind, None)
    }

    /// Appends an instruction carrying a debug location
    pub fn append_at(
        &mut self,
        block: usize,
        kind: InstructionKind,
        debug_loc: Option<DebugLoc>,
    ) -> Option<ValueId> {
        let result = kind.produces_value().then(|| self.fresh_value());
        let instruction = Instruction::new(result, kind).with_debug_loc(debug_loc);
        if let Some(target) = self.blocks.get_mut(block) {
            target.instructions.push(instruction);
        }
        result
    }

    /// Iterates every instruction in block order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Number of instructions in the body
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }
}
