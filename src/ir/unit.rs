//! Compilation unit and its top-level items

use super::constant::{Constant, GlobalRef};
use super::function::Function;
use super::layout::DataLayout;
use super::types::{StructType, Type, TypeTable};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Symbol binding of a top-level item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Linkage {
    /// Visible to other units (`extern` / plain globals)
    #[default]
    External,
    /// Unit-local (`static`)
    Internal,
    /// Unit-local and absent from the symbol table
    Private,
    /// Tentative definition merged by the linker
    Common,
    /// May be overridden by a strong definition
    Weak,
    /// Discarded when unreferenced, merged across units
    LinkOnce,
    /// Weak reference to an external symbol
    ExternalWeak,
    /// Definition usable for inlining only
    AvailableExternally,
}

impl Linkage {
    /// Keyword used by the printer (empty for external)
    pub fn keyword(&self) -> &'static str {
        match self {
            Linkage::External => "",
            Linkage::Internal => "internal ",
            Linkage::Private => "private ",
            Linkage::Common => "common ",
            Linkage::Weak => "weak ",
            Linkage::LinkOnce => "linkonce ",
            Linkage::ExternalWeak => "extern_weak ",
            Linkage::AvailableExternally => "available_externally ",
        }
    }
}

/// Thread-local storage model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ThreadLocalMode {
    /// Ordinary process-wide storage
    #[default]
    NotThreadLocal,
    /// `thread_local`
    GeneralDynamic,
    /// `thread_local(localdynamic)`
    LocalDynamic,
    /// `thread_local(initialexec)`
    InitialExec,
    /// `thread_local(localexec)`
    LocalExec,
}

/// Top-level storage item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    /// Symbol name
    pub name: String,
    /// Type of the stored value
    pub ty: Type,
    /// Initial value; `None` for a declaration whose storage lives elsewhere
    pub initializer: Option<Constant>,
    /// Value never changes after initialization
    pub constant: bool,
    /// Symbol binding
    pub linkage: Linkage,
    /// Thread-local storage model
    pub thread_local: ThreadLocalMode,
    /// Explicit alignment in bytes
    pub alignment: Option<u64>,
}

impl GlobalVariable {
    /// Mutable, externally visible definition
    pub fn new(name: impl Into<String>, ty: Type, initializer: Constant) -> Self {
        Self {
            name: name.into(),
            ty,
            initializer: Some(initializer),
            constant: false,
            linkage: Linkage::External,
            thread_local: ThreadLocalMode::NotThreadLocal,
            alignment: None,
        }
    }

    /// Read-only definition
    pub fn constant(name: impl Into<String>, ty: Type, initializer: Constant) -> Self {
        Self {
            constant: true,
            ..Self::new(name, ty, initializer)
        }
    }

    /// Declaration of storage defined in another unit
    pub fn external(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            initializer: None,
            constant: false,
            linkage: Linkage::External,
            thread_local: ThreadLocalMode::NotThreadLocal,
            alignment: None,
        }
    }

    /// Sets the linkage
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Returns true if no initializer is present
    pub fn is_declaration(&self) -> bool {
        self.initializer.is_none()
    }

    /// Typed reference to this item
    pub fn reference(&self) -> GlobalRef {
        GlobalRef::new(self.name.clone(), self.ty.clone())
    }
}

/// Second name for an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// Symbol name
    pub name: String,
    /// Value type the alias designates
    pub ty: Type,
    /// Aliased address
    pub aliasee: Constant,
    /// Symbol binding
    pub linkage: Linkage,
}

/// Top-level item of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Item {
    /// Storage
    Global(GlobalVariable),
    /// Code
    Function(Function),
    /// Alias
    Alias(Alias),
}

impl Item {
    /// Symbol name
    pub fn name(&self) -> &str {
        match self {
            Item::Global(g) => &g.name,
            Item::Function(f) => &f.name,
            Item::Alias(a) => &a.name,
        }
    }

    /// Type a reference to this item designates
    pub fn value_type(&self) -> Type {
        match self {
            Item::Global(g) => g.ty.clone(),
            Item::Function(f) => Type::Function(Box::new(f.ty.clone())),
            Item::Alias(a) => a.ty.clone(),
        }
    }

    /// Typed reference to this item
    pub fn reference(&self) -> GlobalRef {
        GlobalRef::new(self.name(), self.value_type())
    }

    /// Storage item, if this is one
    pub fn as_global(&self) -> Option<&GlobalVariable> {
        match self {
            Item::Global(g) => Some(g),
            _ => None,
        }
    }

    /// Function, if this is one
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Item::Function(f) => Some(f),
            _ => None,
        }
    }
}

/// Debug description of a source-level global
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugGlobal {
    /// Source-level name
    pub source_name: String,
    /// Source file
    pub file: String,
    /// Declaration line
    pub line: u32,
    /// Location expression, normally the item's address
    pub location: Option<Constant>,
}

/// Unit-level metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metadata {
    /// Debug info for a global variable
    DebugGlobal(DebugGlobal),
    /// Named constant tuple, e.g. a list of items to keep alive
    Named {
        /// Tuple name
        name: String,
        /// Operands
        operands: Vec<Constant>,
    },
}

impl Metadata {
    /// Constants held by this node
    pub fn constants(&self) -> Vec<&Constant> {
        match self {
            Metadata::DebugGlobal(dbg) => dbg.location.iter().collect(),
            Metadata::Named { operands, .. } => operands.iter().collect(),
        }
    }

    /// Mutable constants held by this node
    pub fn constants_mut(&mut self) -> Vec<&mut Constant> {
        match self {
            Metadata::DebugGlobal(dbg) => dbg.location.iter_mut().collect(),
            Metadata::Named { operands, .. } => operands.iter_mut().collect(),
        }
    }
}

/// In-memory compilation unit handed to passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationUnit {
    /// Unit identifier (usually the source file)
    pub name: String,
    /// Target layout rules; `None` when the host provides none
    pub data_layout: Option<DataLayout>,
    /// Named struct types
    pub types: TypeTable,
    /// Top-level items in declaration order
    pub items: Vec<Item>,
    /// Unit-level metadata
    pub metadata: Vec<Metadata>,
}

impl CompilationUnit {
    /// Empty unit targeting `data_layout`
    pub fn new(name: impl Into<String>, data_layout: DataLayout) -> Self {
        Self {
            name: name.into(),
            data_layout: Some(data_layout),
            types: TypeTable::new(),
            items: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Defines a named struct type
    pub fn define_struct(&mut self, def: StructType) -> Result<()> {
        let name = def.name.clone();
        if self.types.define(def) {
            Ok(())
        } else {
            Err(Error::DuplicateType { name })
        }
    }

    /// Appends an item, rejecting duplicate names
    pub fn insert_item(&mut self, item: Item) -> Result<()> {
        if self.find_item(item.name()).is_some() {
            return Err(Error::DuplicateSymbol {
                name: item.name().to_string(),
            });
        }
        self.items.push(item);
        Ok(())
    }

    /// Appends a storage item
    pub fn add_global(&mut self, global: GlobalVariable) -> Result<()> {
        self.insert_item(Item::Global(global))
    }

    /// Appends a function
    pub fn add_function(&mut self, function: Function) -> Result<()> {
        self.insert_item(Item::Function(function))
    }

    /// Removes and returns the item named `name`
    pub fn remove_item(&mut self, name: &str) -> Option<Item> {
        let index = self.position(name)?;
        Some(self.items.remove(index))
    }

    /// Index of the item named `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|item| item.name() == name)
    }

    /// Item named `name`
    pub fn find_item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name() == name)
    }

    /// Storage item named `name`
    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.find_item(name).and_then(Item::as_global)
    }

    /// Function named `name`
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.find_item(name).and_then(Item::as_function)
    }

    /// Mutable function named `name`
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.items.iter_mut().find_map(|item| match item {
            Item::Function(f) if f.name == name => Some(f),
            _ => None,
        })
    }

    /// Storage items in order
    pub fn globals(&self) -> impl Iterator<Item = &GlobalVariable> {
        self.items.iter().filter_map(Item::as_global)
    }

    /// Functions in order
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(Item::as_function)
    }

    /// Returns `base` if unused, otherwise `base.N` for the first free N
    pub fn fresh_name(&self, base: &str) -> String {
        if self.find_item(base).is_none() {
            return base.to_string();
        }
        (0..)
            .map(|n| format!("{}.{}", base, n))
            .find(|candidate| self.find_item(candidate).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Rewrites references in constant contexts: initializers, alias targets
    /// and metadata. Instruction operands are left alone.
    pub fn replace_all_uses(&mut self, replacements: &HashMap<String, Constant>) -> usize {
        let mut replaced = 0;
        for item in &mut self.items {
            match item {
                Item::Global(g) => {
                    if let Some(init) = g.initializer.as_mut() {
                        replaced += init.replace_globals(replacements);
                    }
                }
                Item::Alias(a) => replaced += a.aliasee.replace_globals(replacements),
                Item::Function(_) => {}
            }
        }
        for node in &mut self.metadata {
            for constant in node.constants_mut() {
                replaced += constant.replace_globals(replacements);
            }
        }
        replaced
    }
}
