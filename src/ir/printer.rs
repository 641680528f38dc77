//! Textual dump of a compilation unit
//!
//! The format mirrors LLVM assembly closely enough to be read by anyone who
//! knows it; it is meant for debug output and test diffs, not for parsing.

use super::function::{BasicBlock, Function};
use super::instruction::{Instruction, InstructionKind, Operand};
use super::unit::{Alias, CompilationUnit, GlobalVariable, Item, Metadata, ThreadLocalMode};
use std::fmt;

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local(id) => write!(f, "%{}", id.0),
            Operand::Const(c) => write!(f, "{}", c),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result {
            write!(f, "%{} = ", result.0)?;
        }
        match &self.kind {
            InstructionKind::Alloca { ty } => write!(f, "alloca {}", ty)?,
            InstructionKind::Load { ty, ptr } => write!(f, "load {}, {}", ty, ptr)?,
            InstructionKind::Store { value, ptr } => write!(f, "store {}, {}", value, ptr)?,
            InstructionKind::FieldAddr {
                source,
                base,
                indices,
            } => {
                write!(f, "fieldaddr {}, {}", source, base)?;
                for index in indices {
                    write!(f, ", {}", index)?;
                }
            }
            InstructionKind::Binary { op, ty, lhs, rhs } => {
                write!(f, "{} {} {}, {}", op.mnemonic(), ty, lhs, rhs)?
            }
            InstructionKind::Compare { pred, lhs, rhs } => {
                write!(f, "icmp {} {}, {}", pred.mnemonic(), lhs, rhs)?
            }
            InstructionKind::Cast { op, value, to } => {
                write!(f, "{} {} to {}", op.mnemonic(), value, to)?
            }
            InstructionKind::InsertValue {
                ty,
                aggregate,
                value,
                indices,
            } => {
                write!(f, "insertvalue {} {}, {}", ty, aggregate, value)?;
                for index in indices {
                    write!(f, ", {}", index)?;
                }
            }
            InstructionKind::Call { callee, ret, args } => {
                write!(f, "call {} {}(", ret, callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")?;
            }
            InstructionKind::Phi { ty, incoming } => {
                write!(f, "phi {} ", ty)?;
                for (i, (value, label)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[ {}, %{} ]", value, label)?;
                }
            }
            InstructionKind::Ret(None) => write!(f, "ret void")?,
            InstructionKind::Ret(Some(value)) => write!(f, "ret {}", value)?,
            InstructionKind::Br(label) => write!(f, "br label %{}", label)?,
            InstructionKind::CondBr {
                cond,
                then_label,
                else_label,
            } => write!(
                f,
                "br {}, label %{}, label %{}",
                cond, then_label, else_label
            )?,
            InstructionKind::Unreachable => write!(f, "unreachable")?,
        }
        if let Some(loc) = &self.debug_loc {
            write!(f, ", !dbg !DILocation(line: {}, column: {}", loc.line, loc.column)?;
            if let Some(scope) = &loc.scope {
                write!(f, ", scope: {}", scope)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for inst in &self.instructions {
            writeln!(f, "  {}", inst)?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.is_declaration() {
            "declare"
        } else {
            "define"
        };
        write!(
            f,
            "{} {}{} @{}(",
            keyword,
            self.linkage.keyword(),
            self.ty.ret,
            self.name
        )?;
        for (i, ty) in self.ty.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ty)?;
            if let Some(param) = self.params.get(i) {
                write!(f, " %{}", param.0)?;
            }
        }
        if self.ty.variadic {
            write!(f, ", ...")?;
        }
        write!(f, ")")?;
        if self.is_declaration() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for GlobalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} = ", self.name)?;
        match &self.initializer {
            None => write!(f, "external ")?,
            Some(_) => write!(f, "{}", self.linkage.keyword())?,
        }
        let tls = match self.thread_local {
            ThreadLocalMode::NotThreadLocal => "",
            ThreadLocalMode::GeneralDynamic => "thread_local ",
            ThreadLocalMode::LocalDynamic => "thread_local(localdynamic) ",
            ThreadLocalMode::InitialExec => "thread_local(initialexec) ",
            ThreadLocalMode::LocalExec => "thread_local(localexec) ",
        };
        let kind = if self.constant { "constant" } else { "global" };
        write!(f, "{}{} ", tls, kind)?;
        match &self.initializer {
            Some(init) => write!(f, "{}", init)?,
            None => write!(f, "{}", self.ty)?,
        }
        if let Some(align) = self.alignment {
            write!(f, ", align {}", align)?;
        }
        Ok(())
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{} = {}alias {}, {}",
            self.name,
            self.linkage.keyword(),
            self.ty,
            self.aliasee
        )
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metadata::DebugGlobal(dbg) => {
                write!(
                    f,
                    "!DIGlobalVariable(name: \"{}\", file: \"{}\", line: {}",
                    dbg.source_name, dbg.file, dbg.line
                )?;
                if let Some(location) = &dbg.location {
                    write!(f, ", location: {}", location)?;
                }
                write!(f, ")")
            }
            Metadata::Named { name, operands } => {
                write!(f, "!{} = !{{", name)?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        if let Some(layout) = &self.data_layout {
            writeln!(f, "target datalayout = \"{}\"", layout)?;
        }

        let mut structs = self.types.iter().peekable();
        if structs.peek().is_some() {
            writeln!(f)?;
        }
        for def in structs {
            write!(f, "%{} = type ", def.name)?;
            match &def.body {
                None => writeln!(f, "opaque")?,
                Some(fields) => {
                    let (open, close) = if def.packed { ("<{ ", " }>") } else { ("{ ", " }") };
                    write!(f, "{}", open)?;
                    for (i, field) in fields.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", field)?;
                    }
                    writeln!(f, "{}", close)?;
                }
            }
        }

        let mut previous_was_function = false;
        for (i, item) in self.items.iter().enumerate() {
            let is_function = matches!(item, Item::Function(_));
            if i == 0 || is_function || previous_was_function {
                writeln!(f)?;
            }
            match item {
                Item::Global(g) => writeln!(f, "{}", g)?,
                Item::Alias(a) => writeln!(f, "{}", a)?,
                Item::Function(func) => write!(f, "{}", func)?,
            }
            previous_was_function = is_function;
        }

        if !self.metadata.is_empty() {
            writeln!(f)?;
        }
        for (i, node) in self.metadata.iter().enumerate() {
            match node {
                Metadata::Named { .. } => writeln!(f, "{}", node)?,
                Metadata::DebugGlobal(_) => writeln!(f, "!{} = {}", i, node)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{
        CompilationUnit, Constant, DataLayout, DebugLoc, Function, FunctionType, GlobalVariable,
        InstructionKind, Linkage, Operand, StructType, Type,
    };

    #[test]
    fn test_prints_globals_and_functions() {
        let mut unit = CompilationUnit::new("print.c", DataLayout::x86_64());
        unit.define_struct(StructType::new("pair", vec![Type::i32(), Type::i8()]))
            .unwrap();
        unit.add_global(
            GlobalVariable::new("counter", Type::i32(), Constant::i32(7))
                .with_linkage(Linkage::Internal),
        )
        .unwrap();
        unit.add_global(GlobalVariable::external("errno", Type::i32()))
            .unwrap();

        let mut f = Function::new("get", FunctionType::new(Type::i32(), vec![]));
        let entry = f.add_block("entry");
        let v = f.append_at(
            entry,
            InstructionKind::Load {
                ty: Type::i32(),
                ptr: Operand::Const(Constant::global("counter", Type::i32())),
            },
            Some(DebugLoc::new(3, 10)),
        );
        f.append(entry, InstructionKind::Ret(v.map(Operand::Local)));
        unit.add_function(f).unwrap();

        let text = unit.to_string();
        assert!(text.contains("%pair = type { i32, i8 }"));
        assert!(text.contains("@counter = internal global i32 7"));
        assert!(text.contains("@errno = external global i32"));
        assert!(text.contains("define i32 @get() {"));
        assert!(text.contains("%0 = load i32, i32* @counter, !dbg !DILocation(line: 3, column: 10)"));
        assert!(text.contains("ret %0"));
    }
}
