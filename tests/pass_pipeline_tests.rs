//! Pass registry and pipeline tests
//! Demonstrates: looking passes up by name, option handling, pipeline atomicity

use hoist_globals::hoist::{INSTANCE_SYMBOL, PASS_DESCRIPTION, PASS_NAME, POINTER_SYMBOL};
use hoist_globals::ir::{
    CompilationUnit, Constant, DataLayout, Function, FunctionType, GlobalVariable,
    InstructionKind, Operand, Type,
};
use hoist_globals::pass::{parse_pipeline, PassInfo};
use hoist_globals::{Error, Pass, PassContext, PassManager, PassRegistry, Result};

fn sample_unit() -> CompilationUnit {
    let mut unit = CompilationUnit::new("pipeline.c", DataLayout::x86_64());
    unit.add_global(GlobalVariable::new("hits", Type::i64(), Constant::i64(0)))
        .unwrap();
    let mut f = Function::new("bump", FunctionType::new(Type::Void, vec![]));
    let entry = f.add_block("entry");
    let hits = Operand::Const(Constant::global("hits", Type::i64()));
    let v = f
        .append(
            entry,
            InstructionKind::Load {
                ty: Type::i64(),
                ptr: hits.clone(),
            },
        )
        .unwrap();
    f.append(
        entry,
        InstructionKind::Store {
            value: Operand::Local(v),
            ptr: hits,
        },
    );
    f.append(entry, InstructionKind::Ret(None));
    unit.add_function(f).unwrap();
    unit
}

/// Renames the unit; used to observe pipeline ordering and rollback
struct Rename(&'static str);

impl Pass for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn description(&self) -> &'static str {
        "Rename the unit"
    }

    fn run(&self, unit: &mut CompilationUnit, _ctx: &PassContext) -> Result<bool> {
        unit.name = self.0.to_string();
        Ok(true)
    }
}

/// Breaks the unit so the post-pass verification fails
struct Vandalize;

impl Pass for Vandalize {
    fn name(&self) -> &'static str {
        "vandalize"
    }

    fn description(&self) -> &'static str {
        "Leave a dangling reference behind"
    }

    fn run(&self, unit: &mut CompilationUnit, _ctx: &PassContext) -> Result<bool> {
        unit.add_global(GlobalVariable::new(
            "dangling",
            Type::ptr(Type::i8()),
            Constant::global("missing", Type::i8()),
        ))?;
        Ok(true)
    }
}

#[test]
fn test_hoist_pass_is_registered() {
    let registry = PassRegistry::with_builtin();
    let info = registry.lookup("hoist-globals").unwrap();
    assert_eq!(info.name, PASS_NAME);
    assert_eq!(info.description, PASS_DESCRIPTION);

    let names: Vec<&str> = registry.iter().map(|p| p.name).collect();
    assert!(names.contains(&"hoist-globals"));
    assert!(names.contains(&"verify"));
}

#[test]
fn test_unknown_pass_and_options_are_rejected() {
    let registry = PassRegistry::with_builtin();
    assert_eq!(
        registry.create("hoist-everything", &[]).err(),
        Some(Error::UnknownPass {
            name: "hoist-everything".to_string()
        })
    );
    assert_eq!(
        registry
            .create("hoist-globals", &["aggressive".to_string()])
            .err(),
        Some(Error::UnrecognizedPassOption {
            pass: "hoist-globals".to_string(),
            option: "aggressive".to_string(),
        })
    );
    assert!(PassManager::from_pipeline(&registry, "hoist-globals<tls>", PassContext::default())
        .is_err());
}

#[test]
fn test_registering_a_custom_pass() {
    let mut registry = PassRegistry::with_builtin();
    registry
        .register(PassInfo {
            name: "rename",
            description: "Rename the unit",
            factory: |_| Ok(Box::new(Rename("renamed.c"))),
        })
        .unwrap();
    assert!(matches!(
        registry.register(PassInfo {
            name: "rename",
            description: "again",
            factory: |_| Ok(Box::new(Rename("again.c"))),
        }),
        Err(Error::DuplicatePass { .. })
    ));

    let manager =
        PassManager::from_pipeline(&registry, "rename, hoist-globals", PassContext::default())
            .unwrap();
    assert_eq!(manager.pass_names(), vec!["rename", "hoist-globals"]);

    let mut unit = sample_unit();
    assert!(manager.run(&mut unit).unwrap());
    assert_eq!(unit.name, "renamed.c");
    assert!(unit.global(INSTANCE_SYMBOL).is_some());
}

#[test]
fn test_pipeline_hoists_then_verifies() {
    let registry = PassRegistry::with_builtin();
    let manager = PassManager::from_pipeline(
        &registry,
        "hoist-globals,verify<strict>",
        PassContext::default(),
    )
    .unwrap();

    let mut unit = sample_unit();
    assert!(manager.run(&mut unit).unwrap());
    assert!(unit.global("hits").is_none());
    assert!(unit.global(POINTER_SYMBOL).is_some());

    // second run finds nothing left to hoist
    let once = unit.clone();
    assert!(!manager.run(&mut unit).unwrap());
    assert_eq!(unit, once);
}

#[test]
fn test_failed_verification_keeps_previous_unit() {
    let mut manager = PassManager::new(PassContext {
        verify: true,
        ..PassContext::default()
    });
    manager.add(Box::new(Rename("first.c")));
    manager.add(Box::new(Vandalize));

    let mut unit = sample_unit();
    let err = manager.run(&mut unit).unwrap_err();
    assert!(matches!(err, Error::VerificationFailed { .. }));
    // the first pass committed, the failing one did not
    assert_eq!(unit.name, "first.c");
    assert!(unit.global("dangling").is_none());
}

#[test]
fn test_context_layout_reaches_the_hoister() {
    let registry = PassRegistry::with_builtin();
    let ctx = PassContext {
        data_layout: Some(DataLayout::i686()),
        verify: true,
        trace: true,
    };
    let manager = PassManager::from_pipeline(&registry, "hoist-globals", ctx).unwrap();

    let mut unit = sample_unit();
    unit.data_layout = None;
    assert!(manager.run(&mut unit).unwrap());
    assert_eq!(
        unit.global("__hoisted_globals_size")
            .and_then(|g| g.initializer.clone()),
        Some(Constant::i32(8))
    );

    let mut bare = sample_unit();
    bare.data_layout = None;
    let err = PassManager::from_pipeline(&registry, "hoist-globals", PassContext::default())
        .unwrap()
        .run(&mut bare)
        .unwrap_err();
    assert!(matches!(err, Error::LayoutQueryFailure { .. }));
}

#[test]
fn test_pipeline_text_shapes() {
    let elements = parse_pipeline("hoist-globals,verify<strict>").unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[1].name, "verify");
    assert_eq!(elements[1].options, vec!["strict"]);

    assert!(matches!(
        parse_pipeline("verify<strict"),
        Err(Error::PipelineParse(_))
    ));
    assert!(matches!(parse_pipeline(",verify"), Err(Error::PipelineParse(_))));
}
