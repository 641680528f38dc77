//! # hoist-globals - Per-instance Global State for Compiled Programs
//!
//! A whole-unit compiler pass that moves every mutable global variable of a
//! compilation unit into one synthesized record and routes every access
//! through a single instance pointer. A runtime can then host many isolated
//! instances of the same program in one process by repointing
//! `__hoisted_globals_pointer` at a per-instance copy of the record.
//!
//! ## Quick Start
//!
//! ```rust
//! use hoist_globals::hoist::{hoist_globals, HoistOutcome, POINTER_SYMBOL};
//! use hoist_globals::ir::{CompilationUnit, Constant, DataLayout, GlobalVariable, Type};
//!
//! # fn main() -> hoist_globals::Result<()> {
//! let mut unit = CompilationUnit::new("counter.c", DataLayout::x86_64());
//! unit.add_global(GlobalVariable::new("x", Type::i32(), Constant::i32(5)))?;
//! unit.add_global(GlobalVariable::new("y", Type::array(Type::i32(), 4), Constant::int_array(32, &[1, 2, 3, 4])))?;
//!
//! let outcome = hoist_globals(&mut unit)?;
//! let report = outcome.report().expect("globals were hoisted");
//! assert_eq!(report.relocated, vec!["x", "y"]);
//! assert_eq!(report.store_size, 20);
//! assert!(unit.global("x").is_none());
//! assert!(unit.global(POINTER_SYMBOL).is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! CompilationUnit → scan → build/emit → rewrite → install → verify → CompilationUnit
//! ```
//!
//! ### Main Components
//!
//! - [`ir`] - Typed in-memory IR, data layout, use tracking and printer
//! - [`hoist`] - The hoisting stages and the `hoist-globals` pass
//! - [`verifier`] - Structural checks run after transformation
//! - [`pass`] - Pass trait, registry and pipeline manager
//! - [`error`] - Error types
//!
//! ## Runtime contract
//!
//! The transformed unit exports `%hoisted_globals`, `@__hoisted_globals`,
//! `@__hoisted_globals_size` and `@__hoisted_globals_pointer`. See
//! [`hoist::abi`] for how a runtime is expected to drive them.

#![allow(clippy::needless_range_loop)] // Block and instruction indices are needed while editing in place

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod hoist;
pub mod ir;
pub mod pass;
pub mod verifier;

// Re-export main types
pub use error::{Error, ErrorSeverity, Result};
pub use hoist::{hoist_globals, HoistGlobalsPass, HoistOutcome, HoistReport, Hoister, Stage};
pub use ir::CompilationUnit;
pub use pass::{Pass, PassContext, PassManager, PassRegistry};
pub use verifier::{Verifier, VerifyError, VerifyResult};
