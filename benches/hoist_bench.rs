use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hoist_globals::hoist::hoist_globals;
use hoist_globals::ir::{
    CompilationUnit, Constant, DataLayout, Function, FunctionType, GlobalVariable,
    InstructionKind, Operand, Type,
};
use hoist_globals::Verifier;

/// `globals` counters plus `functions` bodies that each increment every counter
fn counters_unit(globals: usize, functions: usize) -> CompilationUnit {
    let mut unit = CompilationUnit::new("bench.c", DataLayout::x86_64());
    for i in 0..globals {
        unit.add_global(GlobalVariable::new(
            format!("counter{}", i),
            Type::i64(),
            Constant::i64(i as i64),
        ))
        .unwrap();
    }
    for n in 0..functions {
        let mut f = Function::new(format!("tick{}", n), FunctionType::new(Type::Void, vec![]));
        let entry = f.add_block("entry");
        for i in 0..globals {
            let counter = Operand::Const(Constant::global(format!("counter{}", i), Type::i64()));
            let v = f
                .append(
                    entry,
                    InstructionKind::Load {
                        ty: Type::i64(),
                        ptr: counter.clone(),
                    },
                )
                .unwrap();
            f.append(
                entry,
                InstructionKind::Store {
                    value: Operand::Local(v),
                    ptr: counter,
                },
            );
        }
        f.append(entry, InstructionKind::Ret(None));
        unit.add_function(f).unwrap();
    }
    unit
}

fn hoist_benchmark(c: &mut Criterion) {
    let small = counters_unit(8, 4);
    let large = counters_unit(256, 32);

    c.bench_function("hoist 8 globals x 4 functions", |b| {
        b.iter(|| {
            let mut unit = black_box(small.clone());
            hoist_globals(&mut unit).unwrap()
        })
    });

    c.bench_function("hoist 256 globals x 32 functions", |b| {
        b.iter(|| {
            let mut unit = black_box(large.clone());
            hoist_globals(&mut unit).unwrap()
        })
    });
}

fn verify_benchmark(c: &mut Criterion) {
    let mut unit = counters_unit(256, 32);
    hoist_globals(&mut unit).unwrap();

    c.bench_function("verify hoisted unit", |b| {
        b.iter(|| Verifier::new().verify(black_box(&unit)))
    });
}

criterion_group!(benches, hoist_benchmark, verify_benchmark);
criterion_main!(benches);
