//! # Pass framework
//!
//! Passes are unit-level transformations looked up by name, so a host driver
//! can assemble a pipeline from a string such as `"hoist-globals,verify"`.
//!
//! ```ignore
//! use hoist_globals::pass::{PassContext, PassManager, PassRegistry};
//!
//! let registry = PassRegistry::with_builtin();
//! let mut manager = PassManager::from_pipeline(&registry, "hoist-globals", PassContext::default())?;
//! let modified = manager.run(&mut unit)?;
//! ```

use crate::hoist::HoistGlobalsPass;
use crate::ir::{CompilationUnit, DataLayout};
use crate::verifier::{verify_unit, Verifier};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Options shared by every pass in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassContext {
    /// Layout used when the unit carries none
    pub data_layout: Option<DataLayout>,
    /// Verify the unit after each modifying pass
    pub verify: bool,
    /// Log per-item decisions at debug level
    pub trace: bool,
}

impl Default for PassContext {
    fn default() -> Self {
        Self {
            data_layout: None,
            verify: cfg!(debug_assertions),
            trace: false,
        }
    }
}

impl PassContext {
    /// Layout of `unit`, falling back to the context's
    pub fn layout_for<'a>(&'a self, unit: &'a CompilationUnit) -> Option<&'a DataLayout> {
        unit.data_layout.as_ref().or(self.data_layout.as_ref())
    }
}

/// Unit-level transformation
pub trait Pass: Send + Sync {
    /// Registered name, used for lookup and logging
    fn name(&self) -> &'static str;
    /// One-line summary
    fn description(&self) -> &'static str;
    /// Runs the pass, returning whether the unit changed
    fn run(&self, unit: &mut CompilationUnit, ctx: &PassContext) -> Result<bool>;
}

/// Builds a pass from its pipeline options
pub type PassFactory = fn(&[String]) -> Result<Box<dyn Pass>>;

/// Registration record
#[derive(Clone, Copy)]
pub struct PassInfo {
    /// Lookup name
    pub name: &'static str,
    /// One-line summary
    pub description: &'static str,
    /// Constructor
    pub factory: PassFactory,
}

impl std::fmt::Debug for PassInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassInfo")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Name-indexed set of available passes
#[derive(Debug, Default)]
pub struct PassRegistry {
    passes: BTreeMap<&'static str, PassInfo>,
}

impl PassRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every pass shipped with this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for info in [HoistGlobalsPass::info(), VerifierPass::info()] {
            // names are distinct
            let _ = registry.register(info);
        }
        registry
    }

    /// Adds a pass, rejecting duplicate names
    pub fn register(&mut self, info: PassInfo) -> Result<()> {
        if self.passes.contains_key(info.name) {
            return Err(Error::DuplicatePass {
                name: info.name.to_string(),
            });
        }
        self.passes.insert(info.name, info);
        Ok(())
    }

    /// Registration record for `name`
    pub fn lookup(&self, name: &str) -> Option<&PassInfo> {
        self.passes.get(name)
    }

    /// Instantiates `name` with the given options
    pub fn create(&self, name: &str, options: &[String]) -> Result<Box<dyn Pass>> {
        let info = self.lookup(name).ok_or_else(|| Error::UnknownPass {
            name: name.to_string(),
        })?;
        (info.factory)(options)
    }

    /// Registered passes in name order
    pub fn iter(&self) -> impl Iterator<Item = &PassInfo> {
        self.passes.values()
    }
}

/// Rejects every option; for passes that take none
pub fn reject_options(pass: &str, options: &[String]) -> Result<()> {
    match options.first() {
        Some(option) => Err(Error::UnrecognizedPassOption {
            pass: pass.to_string(),
            option: option.clone(),
        }),
        None => Ok(()),
    }
}

/// One element of a parsed pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineElement {
    /// Pass name
    pub name: String,
    /// Options given in `name<a;b>`
    pub options: Vec<String>,
}

/// Parses `"a,b<opt1;opt2>,c"` into pipeline elements
pub fn parse_pipeline(text: &str) -> Result<Vec<PipelineElement>> {
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::PipelineParse(format!("unbalanced '>' at offset {}", i))
                })?
            }
            ',' if depth == 0 => {
                elements.push(parse_element(&text[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::PipelineParse(format!("unclosed '<' in '{}'", text)));
    }
    elements.push(parse_element(&text[start..])?);
    Ok(elements)
}

fn parse_element(text: &str) -> Result<PipelineElement> {
    let text = text.trim();
    let (name, options) = match text.split_once('<') {
        Some((name, rest)) => {
            let body = rest.strip_suffix('>').ok_or_else(|| {
                Error::PipelineParse(format!("trailing text after options in '{}'", text))
            })?;
            let options = body
                .split(';')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            (name.trim(), options)
        }
        None => (text, Vec::new()),
    };
    if name.is_empty() {
        return Err(Error::PipelineParse("empty pass name".to_string()));
    }
    Ok(PipelineElement {
        name: name.to_string(),
        options,
    })
}

/// Runs passes in order on a unit
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    ctx: PassContext,
}

impl PassManager {
    /// Empty pipeline
    pub fn new(ctx: PassContext) -> Self {
        Self {
            passes: Vec::new(),
            ctx,
        }
    }

    /// Builds a pipeline from its textual description
    pub fn from_pipeline(registry: &PassRegistry, pipeline: &str, ctx: PassContext) -> Result<Self> {
        let mut manager = Self::new(ctx);
        for element in parse_pipeline(pipeline)? {
            manager.add(registry.create(&element.name, &element.options)?);
        }
        Ok(manager)
    }

    /// Appends a pass
    pub fn add(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Names of the scheduled passes
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass; returns true if any modified the unit.
    ///
    /// Each pass works on a snapshot which replaces `unit` only when the pass
    /// succeeds (and verifies, when enabled).
    pub fn run(&self, unit: &mut CompilationUnit) -> Result<bool> {
        let mut modified = false;
        for pass in &self.passes {
            let mut snapshot = unit.clone();
            let changed = pass.run(&mut snapshot, &self.ctx)?;
            if !changed {
                debug!("{:>14} unchanged", pass.name());
                continue;
            }
            if self.ctx.verify {
                verify_unit(&snapshot)?;
            }
            info!("{:>14} modified {}", pass.name(), unit.name);
            *unit = snapshot;
            modified = true;
        }
        Ok(modified)
    }
}

/// Fails the pipeline when the unit does not verify
#[derive(Debug, Default)]
pub struct VerifierPass {
    strict: bool,
}

impl VerifierPass {
    /// Registration record; accepts the `strict` option
    pub fn info() -> PassInfo {
        PassInfo {
            name: "verify",
            description: "Check structural well-formedness of the unit",
            factory: |options| {
                let mut pass = VerifierPass::default();
                for option in options {
                    match option.as_str() {
                        "strict" => pass.strict = true,
                        other => {
                            return Err(Error::UnrecognizedPassOption {
                                pass: "verify".to_string(),
                                option: other.to_string(),
                            })
                        }
                    }
                }
                Ok(Box::new(pass))
            },
        }
    }
}

impl Pass for VerifierPass {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn description(&self) -> &'static str {
        "Check structural well-formedness of the unit"
    }

    fn run(&self, unit: &mut CompilationUnit, _ctx: &PassContext) -> Result<bool> {
        let verifier = if self.strict {
            Verifier::new().strict()
        } else {
            Verifier::new()
        };
        let result = verifier.verify(unit).into_result()?;
        for warning in &result.warnings {
            tracing::warn!("{}: {}", unit.name, warning);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pipeline() {
        let elements = parse_pipeline("hoist-globals, verify<strict>").unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].name, "hoist-globals");
        assert!(elements[0].options.is_empty());
        assert_eq!(elements[1].name, "verify");
        assert_eq!(elements[1].options, vec!["strict".to_string()]);

        let elements = parse_pipeline("a<x;y>").unwrap();
        assert_eq!(elements[0].options, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_parse_pipeline_errors() {
        assert!(matches!(parse_pipeline("a,,b"), Err(Error::PipelineParse(_))));
        assert!(matches!(parse_pipeline("a<x"), Err(Error::PipelineParse(_))));
        assert!(matches!(parse_pipeline("a>"), Err(Error::PipelineParse(_))));
        assert!(matches!(parse_pipeline("a<x>b"), Err(Error::PipelineParse(_))));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = PassRegistry::with_builtin();
        let err = registry.register(VerifierPass::info()).unwrap_err();
        assert_eq!(
            err,
            Error::DuplicatePass {
                name: "verify".to_string()
            }
        );
        assert_eq!(registry.iter().count(), 2);
    }

    #[test]
    fn test_verifier_pass_options() {
        let registry = PassRegistry::with_builtin();
        assert!(registry.create("verify", &["strict".to_string()]).is_ok());
        let err = registry
            .create("verify", &["fast".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnrecognizedPassOption { .. }));
    }

    #[test]
    fn test_context_layout_fallback() {
        let mut unit = CompilationUnit::new("ctx.c", DataLayout::i686());
        let ctx = PassContext {
            data_layout: Some(DataLayout::x86_64()),
            ..PassContext::default()
        };
        assert_eq!(ctx.layout_for(&unit).map(|l| l.pointer_size), Some(4));
        unit.data_layout = None;
        assert_eq!(ctx.layout_for(&unit).map(|l| l.pointer_size), Some(8));
    }
}
