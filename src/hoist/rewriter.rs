//! Reference retargeting
//!
//! Every reference to a relocated global is visited exactly once:
//!
//! - in constant contexts (initializers, alias targets, metadata) it becomes
//!   `fieldaddr (%record, @__hoisted_globals, 0, k)`; static data cannot load
//!   the instance pointer, so it names the instance the pointer starts at
//! - in function bodies it becomes
//!   `fieldaddr %record, (load @__hoisted_globals_pointer), 0, k`, materialized
//!   right before the using instruction, or before the terminator of the
//!   incoming block for phi operands
//!
//! Replacements are never revisited, so globals whose initializers point at
//! themselves or at each other terminate. Once all references are rewritten
//! each relocated global must be unreferenced; it is then removed.

use super::abi::POINTER_SYMBOL;
use super::aggregate::Aggregate;
use crate::ir::{
    CompilationUnit, Constant, DebugLoc, Function, GlobalRef, Instruction, InstructionKind, Item,
    Operand, Type, ValueId,
};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// Counts of what a rewrite touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// References replaced in initializers, alias targets and metadata
    pub constant_uses: usize,
    /// Instruction operands retargeted (phi operands excluded)
    pub instruction_uses: usize,
    /// Phi incoming values retargeted
    pub phi_uses: usize,
    /// Instructions inserted into function bodies
    pub materialized: usize,
}

/// Retargets every reference to the globals of `aggregate`, then removes them
pub fn rewrite(unit: &mut CompilationUnit, aggregate: &Aggregate) -> Result<RewriteStats> {
    let retarget = Retarget::new(aggregate);
    let mut stats = RewriteStats {
        constant_uses: unit.replace_all_uses(&retarget.constants),
        ..RewriteStats::default()
    };

    for item in &mut unit.items {
        if let Item::Function(f) = item {
            retarget.rewrite_function(f, &mut stats);
        }
    }

    for origin in &aggregate.origins {
        let remaining_uses = unit.use_count(origin);
        if remaining_uses > 0 {
            return Err(Error::InternalConsistency {
                item: origin.clone(),
                remaining_uses,
            });
        }
        unit.remove_item(origin);
    }

    debug!(
        "retargeted {} constant, {} instruction and {} phi reference(s)",
        stats.constant_uses, stats.instruction_uses, stats.phi_uses
    );
    Ok(stats)
}

struct Retarget<'a> {
    aggregate: &'a Aggregate,
    fields: HashMap<String, usize>,
    constants: HashMap<String, Constant>,
    pointer: GlobalRef,
}

impl<'a> Retarget<'a> {
    fn new(aggregate: &'a Aggregate) -> Self {
        let fields: HashMap<String, usize> = aggregate
            .origins
            .iter()
            .enumerate()
            .map(|(k, name)| (name.clone(), k))
            .collect();
        let constants = fields
            .iter()
            .map(|(name, k)| (name.clone(), aggregate.field_address(*k)))
            .collect();
        Self {
            aggregate,
            fields,
            constants,
            pointer: GlobalRef::new(POINTER_SYMBOL, Type::ptr(aggregate.record_type())),
        }
    }

    fn rewrite_function(&self, f: &mut Function, stats: &mut RewriteStats) {
        f.sync_value_counter();
        self.rewrite_phis(f, stats);

        for b in 0..f.blocks.len() {
            let original = std::mem::take(&mut f.blocks[b].instructions);
            let mut rewritten = Vec::with_capacity(original.len());
            for mut inst in original {
                let loc = inst.debug_loc.clone();
                for operand in inst.kind.operands_mut() {
                    let constant = match &*operand {
                        Operand::Const(c) if c.mentions_any(&self.fields) => c.clone(),
                        _ => continue,
                    };
                    let before = rewritten.len();
                    *operand = self.lower(f, &constant, &mut rewritten, &loc);
                    stats.instruction_uses += constant.count_references_any(&self.fields);
                    stats.materialized += rewritten.len() - before;
                }
                rewritten.push(inst);
            }
            f.blocks[b].instructions = rewritten;
        }
    }

    fn rewrite_phis(&self, f: &mut Function, stats: &mut RewriteStats) {
        let mut pending: Vec<(usize, Vec<Instruction>)> = Vec::new();

        for b in 0..f.blocks.len() {
            for i in 0..f.blocks[b].instructions.len() {
                let inst = &f.blocks[b].instructions[i];
                let InstructionKind::Phi { incoming, .. } = &inst.kind else {
                    continue;
                };
                let loc = inst.debug_loc.clone();
                let incoming = incoming.clone();

                for (j, (value, label)) in incoming.iter().enumerate() {
                    let Some(constant) = value.as_const() else {
                        continue;
                    };
                    if !constant.mentions_any(&self.fields) {
                        continue;
                    }
                    // an unknown predecessor keeps the reference and fails the use check
                    let Some(pred) = f.block_index(label) else {
                        continue;
                    };
                    let mut sequence = Vec::new();
                    let lowered = self.lower(f, constant, &mut sequence, &loc);
                    if let Some(slots) = f.blocks[b].instructions[i].kind.phi_incoming_mut() {
                        slots[j].0 = lowered;
                    }
                    stats.phi_uses += constant.count_references_any(&self.fields);
                    stats.materialized += sequence.len();
                    pending.push((pred, sequence));
                }
            }
        }

        for (pred, sequence) in pending {
            let block = &mut f.blocks[pred];
            let at = match block.instructions.last() {
                Some(last) if last.kind.is_terminator() => block.instructions.len() - 1,
                _ => block.instructions.len(),
            };
            let tail = block.instructions.split_off(at);
            block.instructions.extend(sequence);
            block.instructions.extend(tail);
        }
    }

    /// Lowers `constant` into instructions appended to `out`, returning the
    /// operand that replaces it
    fn lower(
        &self,
        f: &mut Function,
        constant: &Constant,
        out: &mut Vec<Instruction>,
        loc: &Option<DebugLoc>,
    ) -> Operand {
        if !constant.mentions_any(&self.fields) {
            return Operand::Const(constant.clone());
        }
        match constant {
            Constant::Global(global) => match self.fields.get(&global.name) {
                Some(&k) => Operand::Local(self.field_pointer(f, k, out, loc)),
                None => Operand::Const(constant.clone()),
            },
            Constant::FieldAddr {
                source,
                base,
                indices,
            } => {
                let base = self.lower(f, base, out, loc);
                let kind = InstructionKind::FieldAddr {
                    source: source.clone(),
                    base,
                    indices: indices
                        .iter()
                        .map(|i| Operand::Const(Constant::i64(*i as i64)))
                        .collect(),
                };
                Operand::Local(emit(f, out, kind, loc))
            }
            Constant::Cast { op, value, to } => {
                let value = self.lower(f, value, out, loc);
                let kind = InstructionKind::Cast {
                    op: *op,
                    value,
                    to: to.clone(),
                };
                Operand::Local(emit(f, out, kind, loc))
            }
            Constant::Array { elem, items } => {
                let ty = Type::array(elem.clone(), items.len() as u64);
                self.lower_aggregate(f, ty, items, out, loc)
            }
            Constant::Struct { name, fields } => {
                self.lower_aggregate(f, Type::named(name.clone()), fields, out, loc)
            }
            Constant::Int { .. }
            | Constant::Float { .. }
            | Constant::Null(_)
            | Constant::Zero(_)
            | Constant::Undef(_)
            | Constant::Bytes(_) => Operand::Const(constant.clone()),
        }
    }

    /// Builds an aggregate value element by element with `insertvalue`
    fn lower_aggregate(
        &self,
        f: &mut Function,
        ty: Type,
        elements: &[Constant],
        out: &mut Vec<Instruction>,
        loc: &Option<DebugLoc>,
    ) -> Operand {
        let mut value = Operand::Const(Constant::Undef(ty.clone()));
        for (i, element) in elements.iter().enumerate() {
            let element = self.lower(f, element, out, loc);
            let kind = InstructionKind::InsertValue {
                ty: ty.clone(),
                aggregate: value,
                value: element,
                indices: vec![i as u32],
            };
            value = Operand::Local(emit(f, out, kind, loc));
        }
        value
    }

    /// `fieldaddr %record, (load @__hoisted_globals_pointer), 0, k`
    fn field_pointer(
        &self,
        f: &mut Function,
        k: usize,
        out: &mut Vec<Instruction>,
        loc: &Option<DebugLoc>,
    ) -> ValueId {
        let record = self.aggregate.record_type();
        let base = emit(
            f,
            out,
            InstructionKind::Load {
                ty: Type::ptr(record.clone()),
                ptr: Operand::Const(Constant::Global(self.pointer.clone())),
            },
            loc,
        );
        emit(
            f,
            out,
            InstructionKind::FieldAddr {
                source: record,
                base: Operand::Local(base),
                indices: vec![
                    Operand::Const(Constant::i32(0)),
                    Operand::Const(Constant::i32(k as i64)),
                ],
            },
            loc,
        )
    }
}

fn emit(
    f: &mut Function,
    out: &mut Vec<Instruction>,
    kind: InstructionKind,
    loc: &Option<DebugLoc>,
) -> ValueId {
    let id = f.fresh_value();
    out.push(Instruction::new(Some(id), kind).with_debug_loc(loc.clone()));
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hoist::aggregate::{build, emit as emit_aggregate};
    use crate::hoist::scanner::scan;
    use crate::ir::{BinaryOp, DataLayout, FunctionType, GlobalVariable};

    fn prepared(unit: &mut CompilationUnit) -> Aggregate {
        let agg = build(&scan(unit), unit, &DataLayout::x86_64()).unwrap();
        emit_aggregate(&agg, unit).unwrap();
        agg
    }

    #[test]
    fn test_instruction_use_goes_through_pointer() {
        let mut unit = CompilationUnit::new("rw.c", DataLayout::x86_64());
        unit.add_global(GlobalVariable::new("x", Type::i32(), Constant::i32(5)))
            .unwrap();
        let mut f = Function::new("inc", FunctionType::new(Type::Void, vec![]));
        let entry = f.add_block("entry");
        let x = Operand::Const(Constant::global("x", Type::i32()));
        let v = f
            .append_at(
                entry,
                InstructionKind::Load {
                    ty: Type::i32(),
                    ptr: x.clone(),
                },
                Some(DebugLoc::new(4, 3)),
            )
            .unwrap();
        let sum = f
            .append(
                entry,
                InstructionKind::Binary {
                    op: BinaryOp::Add,
                    ty: Type::i32(),
                    lhs: Operand::Local(v),
                    rhs: Operand::Const(Constant::i32(1)),
                },
            )
            .unwrap();
        f.append(
            entry,
            InstructionKind::Store {
                value: Operand::Local(sum),
                ptr: x,
            },
        );
        f.append(entry, InstructionKind::Ret(None));
        unit.add_function(f).unwrap();

        let agg = prepared(&mut unit);
        let stats = rewrite(&mut unit, &agg).unwrap();
        assert_eq!(stats.instruction_uses, 2);
        assert_eq!(stats.materialized, 4);
        assert!(unit.global("x").is_none());

        let f = unit.function("inc").unwrap();
        let body = &f.blocks[0].instructions;
        assert_eq!(body.len(), 8);
        match &body[0].kind {
            InstructionKind::Load { ptr, .. } => assert_eq!(
                ptr.as_const(),
                Some(&Constant::global(
                    POINTER_SYMBOL,
                    Type::ptr(Type::named("hoisted_globals"))
                ))
            ),
            other => panic!("expected pointer load, got {:?}", other),
        }
        assert!(matches!(body[1].kind, InstructionKind::FieldAddr { .. }));
        assert_eq!(body[1].debug_loc, Some(DebugLoc::new(4, 3)));
        match &body[2].kind {
            InstructionKind::Load { ptr, .. } => assert_eq!(ptr, &Operand::Local(body[1].result.unwrap())),
            other => panic!("expected load of field, got {:?}", other),
        }
    }

    #[test]
    fn test_constant_uses_name_the_instance() {
        let mut unit = CompilationUnit::new("rw.c", DataLayout::x86_64());
        unit.add_global(GlobalVariable::new("x", Type::i32(), Constant::i32(5)))
            .unwrap();
        unit.add_global(GlobalVariable::constant(
            "px",
            Type::ptr(Type::i32()),
            Constant::global("x", Type::i32()),
        ))
        .unwrap();

        let agg = prepared(&mut unit);
        let stats = rewrite(&mut unit, &agg).unwrap();
        assert_eq!(stats.constant_uses, 1);
        assert_eq!(
            unit.global("px").and_then(|g| g.initializer.clone()),
            Some(agg.field_address(0))
        );
    }

    #[test]
    fn test_self_reference_terminates() {
        let mut unit = CompilationUnit::new("rw.c", DataLayout::x86_64());
        unit.add_global(GlobalVariable::new(
            "node",
            Type::ptr(Type::i8()),
            Constant::Cast {
                op: crate::ir::CastOp::Bitcast,
                value: Box::new(Constant::global("node", Type::ptr(Type::i8()))),
                to: Type::ptr(Type::i8()),
            },
        ))
        .unwrap();
        let agg = prepared(&mut unit);
        rewrite(&mut unit, &agg).unwrap();
        assert_eq!(unit.use_count("node"), 0);
        assert!(unit.global("node").is_none());
    }

    #[test]
    fn test_pushed_body_gets_fresh_value_ids() {
        let mut unit = CompilationUnit::new("rw.c", DataLayout::x86_64());
        unit.add_global(GlobalVariable::new("x", Type::i32(), Constant::i32(5)))
            .unwrap();
        // %0 = load i32, i32* @x; ret i32 %0
        let mut f = Function::new("get", FunctionType::new(Type::i32(), vec![]));
        let entry = f.add_block("entry");
        f.blocks[entry].instructions.push(Instruction::new(
            Some(ValueId(0)),
            InstructionKind::Load {
                ty: Type::i32(),
                ptr: Operand::Const(Constant::global("x", Type::i32())),
            },
        ));
        f.blocks[entry].instructions.push(Instruction::new(
            None,
            InstructionKind::Ret(Some(Operand::Local(ValueId(0)))),
        ));
        unit.add_function(f).unwrap();

        crate::hoist::Hoister::new()
            .verify(true)
            .run(&mut unit)
            .unwrap();

        let f = unit.function("get").unwrap();
        let mut defined: Vec<ValueId> = f.instructions().filter_map(|inst| inst.result).collect();
        assert_eq!(defined.len(), 3);
        defined.sort();
        defined.dedup();
        assert_eq!(defined.len(), 3);
        // the original load keeps its id and still feeds the return
        let body = &f.blocks[0].instructions;
        assert_eq!(body[2].result, Some(ValueId(0)));
        assert_eq!(
            body[3].kind,
            InstructionKind::Ret(Some(Operand::Local(ValueId(0))))
        );
    }
}
