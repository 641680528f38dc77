//! Candidate selection
//!
//! A global is relocated iff it is a storage item, it is defined in this unit
//! and it is not constant. Linkage does not matter: a file-local `static` is as
//! much per-instance state as an exported one.

use super::abi;
use crate::ir::{CompilationUnit, Constant, Item, Linkage, ThreadLocalMode, Type};

/// A global chosen for relocation, captured at scan time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Symbol name
    pub name: String,
    /// Value type; becomes the field type
    pub ty: Type,
    /// Initial value; becomes the field's initial value
    pub initializer: Constant,
    /// Original linkage
    pub linkage: Linkage,
    /// Original thread-local mode
    pub thread_local: ThreadLocalMode,
    /// Explicit alignment; the record field only gets the ABI alignment
    pub alignment: Option<u64>,
}

/// Ordered candidates; position `k` is field `k` of the record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    candidates: Vec<Candidate>,
}

impl SelectionSet {
    /// Number of selected globals
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Returns true if nothing was selected
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates in field order
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    /// Candidate at field position `index`
    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.candidates.get(index)
    }

    /// Field position of `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.candidates.iter().position(|c| c.name == name)
    }

    /// Names in field order
    pub fn names(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Returns true if `item` must be relocated
pub fn is_candidate(item: &Item) -> bool {
    match item {
        Item::Global(g) => !g.is_declaration() && !g.constant && !abi::is_reserved(&g.name),
        Item::Function(_) | Item::Alias(_) => false,
    }
}

/// Selects the globals to relocate, in unit order
pub fn scan(unit: &CompilationUnit) -> SelectionSet {
    let candidates = unit
        .items
        .iter()
        .filter(|item| is_candidate(item))
        .filter_map(Item::as_global)
        .filter_map(|g| {
            Some(Candidate {
                name: g.name.clone(),
                ty: g.ty.clone(),
                initializer: g.initializer.clone()?,
                linkage: g.linkage,
                thread_local: g.thread_local,
                alignment: g.alignment,
            })
        })
        .collect();
    SelectionSet { candidates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataLayout, Function, FunctionType, GlobalVariable};

    #[test]
    fn test_selection_predicate() {
        let mut unit = CompilationUnit::new("scan.c", DataLayout::x86_64());
        unit.add_global(GlobalVariable::new("a", Type::i32(), Constant::i32(1)))
            .unwrap();
        unit.add_global(GlobalVariable::constant("k", Type::i32(), Constant::i32(9)))
            .unwrap();
        unit.add_global(GlobalVariable::external("ext", Type::i32()))
            .unwrap();
        unit.add_global(
            GlobalVariable::new("s", Type::i8(), Constant::int(8, 0))
                .with_linkage(Linkage::Internal),
        )
        .unwrap();
        unit.add_function(Function::new(
            "f",
            FunctionType::new(Type::Void, vec![]),
        ))
        .unwrap();

        let selection = scan(&unit);
        assert_eq!(selection.names(), vec!["a", "s"]);
        assert_eq!(selection.position("s"), Some(1));
        assert_eq!(selection.get(1).map(|c| c.linkage), Some(Linkage::Internal));
    }

    #[test]
    fn test_candidate_keeps_alignment_and_tls() {
        let mut unit = CompilationUnit::new("scan.c", DataLayout::x86_64());
        let mut g = GlobalVariable::new("buf", Type::i64(), Constant::i64(0));
        g.alignment = Some(64);
        g.thread_local = ThreadLocalMode::InitialExec;
        unit.add_global(g).unwrap();

        let selection = scan(&unit);
        let candidate = selection.get(0).unwrap();
        assert_eq!(candidate.alignment, Some(64));
        assert_eq!(candidate.thread_local, ThreadLocalMode::InitialExec);
    }

    #[test]
    fn test_reserved_symbols_are_never_selected() {
        let mut unit = CompilationUnit::new("scan.c", DataLayout::x86_64());
        unit.add_global(GlobalVariable::new(
            abi::POINTER_SYMBOL,
            Type::ptr(Type::i8()),
            Constant::Null(Type::ptr(Type::i8())),
        ))
        .unwrap();
        assert!(scan(&unit).is_empty());
    }
}
