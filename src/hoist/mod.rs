//! # Global hoisting
//!
//! Moves every mutable global defined in a unit into one record and routes
//! each access through a single instance pointer, so a runtime can give each
//! logical instance of the program its own copy of that state by repointing
//! `__hoisted_globals_pointer`.
//!
//! ```text
//! scan → build + emit → rewrite → install → (verify)
//!  │         │              │          │
//!  │         │              │          └─ @__hoisted_globals_pointer
//!  │         │              └─ uses of @x → field k via the pointer, @x removed
//!  │         └─ %hoisted_globals, @__hoisted_globals, @__hoisted_globals_size
//!  └─ mutable, defined globals in unit order
//! ```
//!
//! The stages run on a copy of the unit; the caller's unit is replaced only
//! when every stage (and verification, when enabled) succeeds.

pub mod abi;
pub mod aggregate;
pub mod installer;
pub mod rewriter;
pub mod scanner;

pub use abi::{
    AbiField, HoistAbi, INSTANCE_SYMBOL, POINTER_SYMBOL, RECORD_TYPE_NAME, RESERVED_SYMBOLS,
    SIZE_SYMBOL,
};
pub use aggregate::Aggregate;
pub use rewriter::RewriteStats;
pub use scanner::{Candidate, SelectionSet};

use crate::ir::{CompilationUnit, DataLayout, ThreadLocalMode};
use crate::pass::{reject_options, Pass, PassContext, PassInfo};
use crate::verifier::verify_unit;
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Registered pass name
pub const PASS_NAME: &str = "hoist-globals";
/// Registered pass description
pub const PASS_DESCRIPTION: &str = "Turn globals into indirections via a single pointer";

/// Pipeline progress of a [`Hoister`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Nothing has run yet
    Unvisited,
    /// Candidates selected
    Scanned,
    /// Record type, instance and size descriptor emitted
    Aggregated,
    /// References retargeted, originals removed
    Rewritten,
    /// Instance pointer emitted
    Installed,
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoistReport {
    /// Relocated globals in field order
    pub relocated: Vec<String>,
    /// Name of the record type
    pub record_type: String,
    /// Store size of the record
    pub store_size: u64,
    /// Rewrite counters
    pub rewrite: RewriteStats,
    /// Layout manifest for the runtime
    pub abi: HoistAbi,
}

/// Result of running the hoister on a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoistOutcome {
    /// No mutable defined globals; the unit is untouched
    Unchanged,
    /// Globals were relocated
    Hoisted(HoistReport),
}

impl HoistOutcome {
    /// Returns true if the unit changed
    pub fn is_modified(&self) -> bool {
        matches!(self, HoistOutcome::Hoisted(_))
    }

    /// Report of a modifying run
    pub fn report(&self) -> Option<&HoistReport> {
        match self {
            HoistOutcome::Hoisted(report) => Some(report),
            HoistOutcome::Unchanged => None,
        }
    }
}

/// Runs the hoisting stages and tracks how far they got
#[derive(Debug, Clone)]
pub struct Hoister {
    stage: Stage,
    verify: bool,
    trace: bool,
    fallback_layout: Option<DataLayout>,
}

impl Default for Hoister {
    fn default() -> Self {
        Self::new()
    }
}

impl Hoister {
    /// Hoister that verifies in debug builds
    pub fn new() -> Self {
        Self {
            stage: Stage::Unvisited,
            verify: cfg!(debug_assertions),
            trace: false,
            fallback_layout: None,
        }
    }

    /// Hoister configured from a pass context
    pub fn with_context(ctx: &PassContext) -> Self {
        Self {
            stage: Stage::Unvisited,
            verify: ctx.verify,
            trace: ctx.trace,
            fallback_layout: ctx.data_layout.clone(),
        }
    }

    /// Enables or disables verification of the result
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Enables per-global debug tracing
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Last stage that completed
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Hoists the mutable globals of `unit`.
    ///
    /// On error `unit` is left exactly as it was and [`Hoister::stage`] names
    /// the last stage that completed.
    pub fn run(&mut self, unit: &mut CompilationUnit) -> Result<HoistOutcome> {
        self.stage = Stage::Unvisited;

        let selection = scanner::scan(unit);
        self.stage = Stage::Scanned;
        if selection.is_empty() {
            debug!("{}: no mutable globals to hoist", unit.name);
            return Ok(HoistOutcome::Unchanged);
        }

        if let Some(name) = RESERVED_SYMBOLS
            .iter()
            .find(|name| unit.find_item(name).is_some())
        {
            return Err(Error::ReservedSymbol {
                name: name.to_string(),
            });
        }

        let layout = unit
            .data_layout
            .clone()
            .or_else(|| self.fallback_layout.clone())
            .ok_or_else(|| Error::layout(RECORD_TYPE_NAME, "unit has no data layout"))?;

        for candidate in selection.iter() {
            if candidate.thread_local != ThreadLocalMode::NotThreadLocal {
                warn!(
                    "{}: thread-local @{} becomes shared per-instance state",
                    unit.name, candidate.name
                );
            }
            if let Some(align) = candidate.alignment {
                warn!(
                    "{}: explicit alignment {} of @{} is not kept in %{}",
                    unit.name, align, candidate.name, RECORD_TYPE_NAME
                );
            }
            if self.trace {
                debug!("hoisting @{}: {}", candidate.name, candidate.ty);
            }
        }

        let mut snapshot = unit.clone();
        let aggregate = aggregate::build(&selection, &snapshot, &layout)?;
        aggregate::emit(&aggregate, &mut snapshot)?;
        self.stage = Stage::Aggregated;

        let rewrite = rewriter::rewrite(&mut snapshot, &aggregate)?;
        self.stage = Stage::Rewritten;

        installer::install(&mut snapshot, &aggregate)?;
        self.stage = Stage::Installed;

        if self.verify {
            verify_unit(&snapshot)?;
        }

        info!(
            "{}: hoisted {} global(s) into %{} ({} bytes)",
            unit.name,
            selection.len(),
            aggregate.record.name,
            aggregate.store_size
        );
        *unit = snapshot;

        Ok(HoistOutcome::Hoisted(HoistReport {
            relocated: aggregate.origins.clone(),
            record_type: aggregate.record.name.clone(),
            store_size: aggregate.store_size,
            rewrite,
            abi: HoistAbi::from_aggregate(&aggregate),
        }))
    }
}

/// Hoists with default settings
pub fn hoist_globals(unit: &mut CompilationUnit) -> Result<HoistOutcome> {
    Hoister::new().run(unit)
}

/// The `hoist-globals` pass; takes no options
#[derive(Debug, Default, Clone, Copy)]
pub struct HoistGlobalsPass;

impl HoistGlobalsPass {
    /// Registration record
    pub fn info() -> PassInfo {
        PassInfo {
            name: PASS_NAME,
            description: PASS_DESCRIPTION,
            factory: |options| {
                reject_options(PASS_NAME, options)?;
                Ok(Box::new(HoistGlobalsPass))
            },
        }
    }
}

impl Pass for HoistGlobalsPass {
    fn name(&self) -> &'static str {
        PASS_NAME
    }

    fn description(&self) -> &'static str {
        PASS_DESCRIPTION
    }

    fn run(&self, unit: &mut CompilationUnit, ctx: &PassContext) -> Result<bool> {
        let outcome = Hoister::with_context(ctx).run(unit)?;
        Ok(outcome.is_modified())
    }
}
