//! Use tracking for top-level items
//!
//! A reference to an item is any [`Constant::Global`] naming it, wherever the
//! constant sits: an initializer, an alias target, a metadata node or an
//! instruction operand.

use super::constant::Constant;
use super::unit::{CompilationUnit, Item};
use serde::{Deserialize, Serialize};

/// Where a reference to an item appears
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UseSite {
    /// Initializer of the global `item`
    GlobalInitializer {
        /// Global whose initializer holds the reference
        item: String,
    },
    /// Target of the alias `item`
    AliasTarget {
        /// Alias name
        item: String,
    },
    /// Operand of an instruction
    Instruction {
        /// Enclosing function
        function: String,
        /// Block index
        block: usize,
        /// Instruction index within the block
        index: usize,
    },
    /// Constant inside the unit metadata node at `index`
    Metadata {
        /// Metadata node index
        index: usize,
    },
}

/// Every use site of `name`, one entry per reference
pub fn collect_uses(unit: &CompilationUnit, name: &str) -> Vec<UseSite> {
    let mut sites = Vec::new();
    let mut record = |count: usize, site: UseSite| {
        for _ in 0..count {
            sites.push(site.clone());
        }
    };

    for item in &unit.items {
        match item {
            Item::Global(g) => {
                if let Some(init) = &g.initializer {
                    record(
                        init.count_references(name),
                        UseSite::GlobalInitializer {
                            item: g.name.clone(),
                        },
                    );
                }
            }
            Item::Alias(a) => record(
                a.aliasee.count_references(name),
                UseSite::AliasTarget {
                    item: a.name.clone(),
                },
            ),
            Item::Function(f) => {
                for (block, bb) in f.blocks.iter().enumerate() {
                    for (index, inst) in bb.instructions.iter().enumerate() {
                        let count: usize = inst
                            .kind
                            .operands()
                            .into_iter()
                            .filter_map(|op| op.as_const())
                            .map(|c| c.count_references(name))
                            .sum();
                        record(
                            count,
                            UseSite::Instruction {
                                function: f.name.clone(),
                                block,
                                index,
                            },
                        );
                    }
                }
            }
        }
    }

    for (index, node) in unit.metadata.iter().enumerate() {
        let count: usize = node
            .constants()
            .into_iter()
            .map(|c: &Constant| c.count_references(name))
            .sum();
        record(count, UseSite::Metadata { index });
    }

    sites
}

impl CompilationUnit {
    /// Number of references to the item `name`
    pub fn use_count(&self, name: &str) -> usize {
        collect_uses(self, name).len()
    }

    /// Distinct use sites of `name`, in unit order
    pub fn users_of(&self, name: &str) -> Vec<UseSite> {
        let mut sites = collect_uses(self, name);
        sites.dedup();
        sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        DataLayout, Function, FunctionType, GlobalVariable, InstructionKind, Metadata, Operand,
        Type,
    };

    #[test]
    fn test_counts_every_context() {
        let mut unit = CompilationUnit::new("uses.c", DataLayout::x86_64());
        unit.add_global(GlobalVariable::new("x", Type::i32(), Constant::i32(0)))
            .unwrap();
        unit.add_global(GlobalVariable::new(
            "px",
            Type::ptr(Type::i32()),
            Constant::global("x", Type::i32()),
        ))
        .unwrap();

        let mut f = Function::new("bump", FunctionType::new(Type::Void, vec![]));
        let entry = f.add_block("entry");
        let x = Operand::Const(Constant::global("x", Type::i32()));
        let v = f.append(
            entry,
            InstructionKind::Load {
                ty: Type::i32(),
                ptr: x.clone(),
            },
        );
        f.append(
            entry,
            InstructionKind::Store {
                value: Operand::Local(v.unwrap()),
                ptr: x,
            },
        );
        f.append(entry, InstructionKind::Ret(None));
        unit.add_function(f).unwrap();

        unit.metadata.push(Metadata::Named {
            name: "llvm.used".to_string(),
            operands: vec![Constant::global("x", Type::i32())],
        });

        assert_eq!(unit.use_count("x"), 4);
        assert_eq!(unit.use_count("px"), 0);
        assert_eq!(
            unit.users_of("x"),
            vec![
                UseSite::GlobalInitializer {
                    item: "px".to_string()
                },
                UseSite::Instruction {
                    function: "bump".to_string(),
                    block: 0,
                    index: 0
                },
                UseSite::Instruction {
                    function: "bump".to_string(),
                    block: 0,
                    index: 1
                },
                UseSite::Metadata { index: 0 },
            ]
        );
    }
}
