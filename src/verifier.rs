//! # Compilation Unit Verifier
//!
//! Structural checks run after a transformation and before the unit is handed
//! back to the host. A unit that fails here would be rejected (or silently
//! miscompiled) by later stages, so passes treat any error as fatal.

use crate::ir::{
    CompilationUnit, Constant, Function, Instruction, InstructionKind, Item, Operand, Type,
    TypeTable, ValueId,
};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Verification result with warnings
#[derive(Debug)]
pub struct VerifyResult {
    /// Unit is structurally sound
    pub valid: bool,
    /// Errors that make the unit unusable
    pub errors: Vec<VerifyError>,
    /// Warnings (non-fatal)
    pub warnings: Vec<String>,
    /// Statistics
    pub stats: UnitStats,
}

impl VerifyResult {
    /// Converts an invalid result into [`Error::VerificationFailed`]
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            return Ok(self);
        }
        let mut errors: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        if errors.is_empty() {
            errors = self.warnings.clone();
        }
        Err(Error::VerificationFailed { errors })
    }
}

/// Unit statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnitStats {
    /// Named struct types
    pub struct_count: usize,
    /// Global variables (definitions and declarations)
    pub global_count: usize,
    /// Functions (definitions and declarations)
    pub function_count: usize,
    /// Aliases
    pub alias_count: usize,
    /// Instructions across all function bodies
    pub instruction_count: usize,
    /// Metadata nodes
    pub metadata_count: usize,
}

/// Verification error types
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// Two items share a symbol name.
    DuplicateSymbol {
        /// The repeated name
        name: String,
    },

    /// A constant names an item that does not exist.
    UndefinedSymbol {
        /// Missing symbol
        name: String,
        /// Where the reference was found
        context: String,
    },

    /// A reference's recorded value type disagrees with the item.
    SymbolTypeMismatch {
        /// Referenced symbol
        name: String,
        /// Type carried by the reference
        expected: String,
        /// Type of the item
        found: String,
    },

    /// A named struct is used but never defined.
    UnknownStruct {
        /// Missing struct name
        name: String,
        /// Where it was used
        context: String,
    },

    /// A global's initializer does not have the global's type.
    InitializerTypeMismatch {
        /// Global name
        global: String,
        /// Declared type
        expected: String,
        /// Initializer type (`?` if ill-formed)
        found: String,
    },

    /// A constant is malformed (bad field index, wrong field count, ...).
    InvalidConstant {
        /// Where the constant was found
        context: String,
        /// What is wrong
        reason: String,
    },

    /// An instruction uses a local value that is never defined.
    UndefinedValue {
        /// Function name
        function: String,
        /// The undefined value
        value: u32,
    },

    /// A local value is defined more than once.
    RedefinedValue {
        /// Function name
        function: String,
        /// The repeated value
        value: u32,
    },

    /// Operand types of an instruction disagree.
    OperandTypeMismatch {
        /// Function name
        function: String,
        /// Block label
        block: String,
        /// What is wrong
        reason: String,
    },

    /// A block does not end in a terminator.
    MissingTerminator {
        /// Function name
        function: String,
        /// Block label
        block: String,
    },

    /// A terminator appears before the end of its block.
    MisplacedTerminator {
        /// Function name
        function: String,
        /// Block label
        block: String,
    },

    /// A branch or phi names a block that does not exist.
    UnknownBlock {
        /// Function name
        function: String,
        /// Missing label
        label: String,
    },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::DuplicateSymbol { name } => {
                write!(f, "Symbol @{} is defined more than once", name)
            }
            VerifyError::UndefinedSymbol { name, context } => {
                write!(f, "Reference to undefined symbol @{} in {}", name, context)
            }
            VerifyError::SymbolTypeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "Reference to @{} expects type {} but the item has type {}",
                name, expected, found
            ),
            VerifyError::UnknownStruct { name, context } => {
                write!(f, "Unknown struct %{} used in {}", name, context)
            }
            VerifyError::InitializerTypeMismatch {
                global,
                expected,
                found,
            } => write!(
                f,
                "Initializer of @{} has type {} (expected {})",
                global, found, expected
            ),
            VerifyError::InvalidConstant { context, reason } => {
                write!(f, "Invalid constant in {}: {}", context, reason)
            }
            VerifyError::UndefinedValue { function, value } => {
                write!(f, "Use of undefined value %{} in @{}", value, function)
            }
            VerifyError::RedefinedValue { function, value } => {
                write!(f, "Value %{} is defined more than once in @{}", value, function)
            }
            VerifyError::OperandTypeMismatch {
                function,
                block,
                reason,
            } => write!(
                f,
                "Operand type mismatch in @{} block {}: {}",
                function, block, reason
            ),
            VerifyError::MissingTerminator { function, block } => {
                write!(f, "Block {} in @{} has no terminator", block, function)
            }
            VerifyError::MisplacedTerminator { function, block } => write!(
                f,
                "Block {} in @{} has a terminator before its last instruction",
                block, function
            ),
            VerifyError::UnknownBlock { function, label } => {
                write!(f, "Unknown block label %{} in @{}", label, function)
            }
        }
    }
}

/// Compilation unit verifier
pub struct Verifier {
    /// Strict mode (treat warnings as errors)
    strict: bool,
}

impl Verifier {
    /// Creates a verifier that only fails on errors
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Enable strict mode
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Verify a unit
    pub fn verify(&self, unit: &CompilationUnit) -> VerifyResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let stats = UnitStats {
            struct_count: unit.types.iter().count(),
            global_count: unit.globals().count(),
            function_count: unit.functions().count(),
            alias_count: unit
                .items
                .iter()
                .filter(|i| matches!(i, Item::Alias(_)))
                .count(),
            instruction_count: unit.functions().map(Function::instruction_count).sum(),
            metadata_count: unit.metadata.len(),
        };

        // Symbol table
        let mut symbols: HashMap<&str, Type> = HashMap::new();
        for item in &unit.items {
            if symbols.insert(item.name(), item.value_type()).is_some() {
                errors.push(VerifyError::DuplicateSymbol {
                    name: item.name().to_string(),
                });
            }
        }

        // Struct bodies
        for def in unit.types.iter() {
            for field in def.body.iter().flatten() {
                check_struct_refs(
                    &unit.types,
                    field,
                    &format!("body of %{}", def.name),
                    &mut errors,
                );
            }
        }

        let checker = ConstantChecker {
            types: &unit.types,
            symbols: &symbols,
        };

        for item in &unit.items {
            match item {
                Item::Global(g) => {
                    let context = format!("@{}", g.name);
                    check_struct_refs(&unit.types, &g.ty, &context, &mut errors);
                    if let Some(init) = &g.initializer {
                        checker.check(init, &context, &mut errors);
                        let found = init.type_of(&unit.types);
                        if found.as_ref() != Some(&g.ty) {
                            errors.push(VerifyError::InitializerTypeMismatch {
                                global: g.name.clone(),
                                expected: g.ty.to_string(),
                                found: found.map_or_else(|| "?".to_string(), |t| t.to_string()),
                            });
                        }
                    }
                }
                Item::Alias(a) => {
                    let context = format!("alias @{}", a.name);
                    checker.check(&a.aliasee, &context, &mut errors);
                    if a.aliasee.type_of(&unit.types) != Some(Type::ptr(a.ty.clone())) {
                        warnings.push(format!(
                            "Alias @{} of type {} designates {}",
                            a.name, a.ty, a.aliasee
                        ));
                    }
                }
                Item::Function(f) => {
                    check_struct_refs(
                        &unit.types,
                        &Type::Function(Box::new(f.ty.clone())),
                        &format!("signature of @{}", f.name),
                        &mut errors,
                    );
                    self.verify_function(f, &checker, &mut errors, &mut warnings);
                }
            }
        }

        for (index, node) in unit.metadata.iter().enumerate() {
            let context = format!("metadata !{}", index);
            for constant in node.constants() {
                checker.check(constant, &context, &mut errors);
            }
        }

        let valid = errors.is_empty() && (!self.strict || warnings.is_empty());

        VerifyResult {
            valid,
            errors,
            warnings,
            stats,
        }
    }

    fn verify_function(
        &self,
        f: &Function,
        checker: &ConstantChecker<'_>,
        errors: &mut Vec<VerifyError>,
        warnings: &mut Vec<String>,
    ) {
        if f.is_declaration() {
            return;
        }

        // Local value types
        let mut locals: HashMap<ValueId, Option<Type>> = HashMap::new();
        let definitions = f
            .params
            .iter()
            .zip(&f.ty.params)
            .map(|(param, ty)| (*param, Some(ty.clone())))
            .chain(f.instructions().filter_map(|inst| {
                inst.result
                    .map(|result| (result, result_type(inst, checker.types)))
            }));
        for (value, ty) in definitions {
            if locals.insert(value, ty).is_some() {
                errors.push(VerifyError::RedefinedValue {
                    function: f.name.clone(),
                    value: value.0,
                });
            }
        }

        let labels: HashSet<&str> = f.blocks.iter().map(|b| b.label.as_str()).collect();
        let mut predecessors: HashMap<&str, usize> = HashMap::new();

        for block in &f.blocks {
            match block.instructions.last() {
                Some(last) if last.kind.is_terminator() => {
                    for target in last.kind.successors() {
                        *predecessors.entry(target).or_default() += 1;
                    }
                }
                _ => errors.push(VerifyError::MissingTerminator {
                    function: f.name.clone(),
                    block: block.label.clone(),
                }),
            }
            let body_len = block.instructions.len().saturating_sub(1);
            if block.instructions[..body_len]
                .iter()
                .any(|inst| inst.kind.is_terminator())
            {
                errors.push(VerifyError::MisplacedTerminator {
                    function: f.name.clone(),
                    block: block.label.clone(),
                });
            }

            for inst in &block.instructions {
                let context = format!("@{} block {}", f.name, block.label);
                for operand in inst.kind.operands() {
                    match operand {
                        Operand::Local(id) if !locals.contains_key(id) => {
                            errors.push(VerifyError::UndefinedValue {
                                function: f.name.clone(),
                                value: id.0,
                            });
                        }
                        Operand::Const(c) => checker.check(c, &context, errors),
                        Operand::Local(_) => {}
                    }
                }
                for target in inst.kind.successors() {
                    if !labels.contains(target) {
                        errors.push(VerifyError::UnknownBlock {
                            function: f.name.clone(),
                            label: target.to_string(),
                        });
                    }
                }
                if let InstructionKind::Phi { incoming, .. } = &inst.kind {
                    for (_, label) in incoming {
                        if !labels.contains(label.as_str()) {
                            errors.push(VerifyError::UnknownBlock {
                                function: f.name.clone(),
                                label: label.clone(),
                            });
                        }
                    }
                }
                if let Some(reason) = check_operand_types(inst, &locals, checker.types) {
                    errors.push(VerifyError::OperandTypeMismatch {
                        function: f.name.clone(),
                        block: block.label.clone(),
                        reason,
                    });
                }
            }
        }

        for block in &f.blocks {
            for inst in &block.instructions {
                if let InstructionKind::Phi { incoming, .. } = &inst.kind {
                    let preds = predecessors.get(block.label.as_str()).copied().unwrap_or(0);
                    if incoming.len() != preds {
                        warnings.push(format!(
                            "Phi in @{} block {} has {} incoming value(s) for {} predecessor edge(s)",
                            f.name,
                            block.label,
                            incoming.len(),
                            preds
                        ));
                    }
                }
            }
        }
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the default verifier and fails with [`Error::VerificationFailed`]
/// when the unit is invalid
pub fn verify_unit(unit: &CompilationUnit) -> Result<VerifyResult> {
    Verifier::new().verify(unit).into_result()
}

struct ConstantChecker<'a> {
    types: &'a TypeTable,
    symbols: &'a HashMap<&'a str, Type>,
}

impl ConstantChecker<'_> {
    fn check(&self, constant: &Constant, context: &str, errors: &mut Vec<VerifyError>) {
        match constant {
            Constant::Global(global) => match self.symbols.get(global.name.as_str()) {
                None => errors.push(VerifyError::UndefinedSymbol {
                    name: global.name.clone(),
                    context: context.to_string(),
                }),
                Some(ty) if *ty != global.value_type => {
                    errors.push(VerifyError::SymbolTypeMismatch {
                        name: global.name.clone(),
                        expected: global.value_type.to_string(),
                        found: ty.to_string(),
                    })
                }
                Some(_) => {}
            },
            Constant::Array { elem, items } => {
                for item in items {
                    self.check(item, context, errors);
                    if item.type_of(self.types).as_ref() != Some(elem) {
                        errors.push(invalid(context, format!("array element {} is not {}", item, elem)));
                    }
                }
            }
            Constant::Struct { name, fields } => {
                for field in fields {
                    self.check(field, context, errors);
                }
                match self.types.fields(name) {
                    None => errors.push(VerifyError::UnknownStruct {
                        name: name.clone(),
                        context: context.to_string(),
                    }),
                    Some(expected) if expected.len() != fields.len() => errors.push(invalid(
                        context,
                        format!(
                            "%{} has {} field(s) but the constant has {}",
                            name,
                            expected.len(),
                            fields.len()
                        ),
                    )),
                    Some(expected) => {
                        for (i, (ty, field)) in expected.iter().zip(fields).enumerate() {
                            if field.type_of(self.types).as_ref() != Some(ty) {
                                errors.push(invalid(
                                    context,
                                    format!("field {} of %{} must have type {}", i, name, ty),
                                ));
                            }
                        }
                    }
                }
            }
            Constant::FieldAddr {
                source,
                base,
                indices,
            } => {
                self.check(base, context, errors);
                if base.type_of(self.types) != Some(Type::ptr(source.clone())) {
                    errors.push(invalid(
                        context,
                        format!("base {} does not point to {}", base, source),
                    ));
                }
                if indices.is_empty() || constant.type_of(self.types).is_none() {
                    errors.push(invalid(
                        context,
                        format!("indices {:?} do not address into {}", indices, source),
                    ));
                }
            }
            Constant::Cast { value, .. } => self.check(value, context, errors),
            Constant::Null(ty) | Constant::Zero(ty) | Constant::Undef(ty) => {
                check_struct_refs(self.types, ty, context, errors)
            }
            Constant::Int { .. } | Constant::Float { .. } | Constant::Bytes(_) => {}
        }
    }
}

fn invalid(context: &str, reason: String) -> VerifyError {
    VerifyError::InvalidConstant {
        context: context.to_string(),
        reason,
    }
}

fn check_struct_refs(types: &TypeTable, ty: &Type, context: &str, errors: &mut Vec<VerifyError>) {
    for name in ty.struct_names() {
        if !types.contains(name) {
            errors.push(VerifyError::UnknownStruct {
                name: name.to_string(),
                context: context.to_string(),
            });
        }
    }
}

fn result_type(inst: &Instruction, types: &TypeTable) -> Option<Type> {
    match &inst.kind {
        InstructionKind::Alloca { ty } => Some(Type::ptr(ty.clone())),
        InstructionKind::Load { ty, .. }
        | InstructionKind::Binary { ty, .. }
        | InstructionKind::InsertValue { ty, .. }
        | InstructionKind::Phi { ty, .. } => Some(ty.clone()),
        InstructionKind::Compare { .. } => Some(Type::i1()),
        InstructionKind::Cast { to, .. } => Some(to.clone()),
        InstructionKind::Call { ret, .. } => Some(ret.clone()),
        InstructionKind::FieldAddr {
            source, indices, ..
        } => {
            let steps: Vec<Option<u64>> = indices
                .iter()
                .skip(1)
                .map(|op| op.as_const().and_then(Constant::as_int).map(|v| v as u64))
                .collect();
            types.indexed_type(source, &steps).map(Type::ptr)
        }
        _ => None,
    }
}

fn operand_type(
    operand: &Operand,
    locals: &HashMap<ValueId, Option<Type>>,
    types: &TypeTable,
) -> Option<Type> {
    match operand {
        Operand::Local(id) => locals.get(id).cloned().flatten(),
        Operand::Const(c) => c.type_of(types),
    }
}

fn check_operand_types(
    inst: &Instruction,
    locals: &HashMap<ValueId, Option<Type>>,
    types: &TypeTable,
) -> Option<String> {
    match &inst.kind {
        InstructionKind::Load { ty, ptr } => {
            let found = operand_type(ptr, locals, types)?;
            (found != Type::ptr(ty.clone()))
                .then(|| format!("load of {} through a {} operand", ty, found))
        }
        InstructionKind::Store { value, ptr } => {
            let value_ty = operand_type(value, locals, types)?;
            let ptr_ty = operand_type(ptr, locals, types)?;
            (ptr_ty != Type::ptr(value_ty.clone()))
                .then(|| format!("store of {} through a {} operand", value_ty, ptr_ty))
        }
        InstructionKind::FieldAddr { source, base, .. } => {
            if result_type(inst, types).is_none() {
                return Some(format!("field address indices do not fit {}", source));
            }
            let found = operand_type(base, locals, types)?;
            (found != Type::ptr(source.clone()))
                .then(|| format!("field address base {} does not point to {}", found, source))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataLayout, FunctionType, GlobalVariable, StructType};

    fn unit() -> CompilationUnit {
        CompilationUnit::new("verify.c", DataLayout::x86_64())
    }

    #[test]
    fn test_empty_unit() {
        let result = Verifier::new().verify(&unit());
        assert!(result.valid);
        assert_eq!(result.stats, UnitStats::default());
    }

    #[test]
    fn test_undefined_symbol() {
        let mut unit = unit();
        unit.add_global(GlobalVariable::new(
            "p",
            Type::ptr(Type::i32()),
            Constant::global("gone", Type::i32()),
        ))
        .unwrap();
        let result = Verifier::new().verify(&unit);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::UndefinedSymbol { name, .. } if name == "gone")));
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_initializer_type_mismatch() {
        let mut unit = unit();
        unit.add_global(GlobalVariable::new("x", Type::i64(), Constant::i32(1)))
            .unwrap();
        let result = Verifier::new().verify(&unit);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::InitializerTypeMismatch { .. })));
    }

    #[test]
    fn test_field_addr_bounds() {
        let mut unit = unit();
        unit.define_struct(StructType::new("rec", vec![Type::i32()]))
            .unwrap();
        unit.add_global(GlobalVariable::new(
            "inst",
            Type::named("rec"),
            Constant::Struct {
                name: "rec".to_string(),
                fields: vec![Constant::i32(0)],
            },
        ))
        .unwrap();
        unit.add_global(GlobalVariable::new(
            "p",
            Type::ptr(Type::i32()),
            Constant::FieldAddr {
                source: Type::named("rec"),
                base: Box::new(Constant::global("inst", Type::named("rec"))),
                indices: vec![0, 3],
            },
        ))
        .unwrap();
        let result = Verifier::new().verify(&unit);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::InvalidConstant { .. })));
    }

    #[test]
    fn test_missing_terminator_and_undefined_value() {
        let mut unit = unit();
        let mut f = Function::new("broken", FunctionType::new(Type::Void, vec![]));
        let entry = f.add_block("entry");
        f.append(
            entry,
            InstructionKind::Store {
                value: Operand::Local(ValueId(42)),
                ptr: Operand::Const(Constant::Null(Type::ptr(Type::i32()))),
            },
        );
        unit.add_function(f).unwrap();

        let result = Verifier::new().verify(&unit);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::MissingTerminator { .. })));
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::UndefinedValue { value: 42, .. })));
    }

    #[test]
    fn test_load_through_wrong_pointer() {
        let mut unit = unit();
        unit.add_global(GlobalVariable::new("x", Type::i32(), Constant::i32(0)))
            .unwrap();
        let mut f = Function::new("read", FunctionType::new(Type::i64(), vec![]));
        let entry = f.add_block("entry");
        let v = f.append(
            entry,
            InstructionKind::Load {
                ty: Type::i64(),
                ptr: Operand::Const(Constant::global("x", Type::i32())),
            },
        );
        f.append(entry, InstructionKind::Ret(v.map(Operand::Local)));
        unit.add_function(f).unwrap();

        let result = Verifier::new().verify(&unit);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, VerifyError::OperandTypeMismatch { .. })));
    }

    #[test]
    fn test_strict_mode_fails_on_warnings() {
        let mut unit = unit();
        let mut f = Function::new("merge", FunctionType::new(Type::i32(), vec![]));
        let entry = f.add_block("entry");
        let exit = f.add_block("exit");
        f.append(entry, InstructionKind::Br("exit".to_string()));
        let v = f.append(
            exit,
            InstructionKind::Phi {
                ty: Type::i32(),
                incoming: vec![
                    (Operand::Const(Constant::i32(1)), "entry".to_string()),
                    (Operand::Const(Constant::i32(2)), "entry".to_string()),
                ],
            },
        );
        f.append(exit, InstructionKind::Ret(v.map(Operand::Local)));
        unit.add_function(f).unwrap();

        assert!(Verifier::new().verify(&unit).valid);
        let strict = Verifier::new().strict().verify(&unit);
        assert!(!strict.valid);
        assert_eq!(strict.warnings.len(), 1);
    }

    #[test]
    fn test_redefined_value() {
        let mut unit = unit();
        unit.add_global(GlobalVariable::new("x", Type::i32(), Constant::i32(0)))
            .unwrap();
        // %0 is the parameter and is defined again by a load of the same type
        let mut f = Function::new("f", FunctionType::new(Type::i32(), vec![Type::i32()]));
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

        let result = Verifier::new().verify(&unit);
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec![VerifyError::RedefinedValue {
                function: "f".to_string(),
                value: 0,
            }]
        );
        assert_eq!(
            result.errors[0].to_string(),
            "Value %0 is defined more than once in @f"
        );
    }
}
