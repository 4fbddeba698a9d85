use criterion::{Criterion, black_box, criterion_group, criterion_main};

use manifast::compiler;
use manifast::parser;
use manifast::vm::Vm;

const FIB_PROGRAM: &str = r#"
fungsi fib(n)
    jika n < 2 maka
        kembali n
    tutup
    kembali fib(n - 1) + fib(n - 2)
tutup
println(fib(15))
"#;

fn bench_pipeline(c: &mut Criterion) {
    let parsed = parser::parse_source(FIB_PROGRAM);
    assert!(!parsed.had_error);

    c.bench_function("frontend_parse", |b| {
        b.iter(|| {
            let parsed = parser::parse_source(black_box(FIB_PROGRAM));
            black_box(parsed.statements);
        })
    });

    c.bench_function("compile_only", |b| {
        b.iter(|| {
            let chunk = compiler::compile(black_box(&parsed.statements), "bench").expect("compile");
            black_box(chunk);
        })
    });

    c.bench_function("execute_prepared", |b| {
        let chunk = compiler::compile(&parsed.statements, "bench").expect("compile");
        b.iter(|| {
            let mut vm = Vm::with_captured_output();
            vm.interpret(black_box(chunk.clone()), FIB_PROGRAM).expect("run");
            black_box(vm.take_output());
        })
    });

    c.bench_function("pipeline_total", |b| {
        b.iter(|| {
            let parsed = parser::parse_source(black_box(FIB_PROGRAM));
            let chunk = compiler::compile(&parsed.statements, "bench").expect("compile");
            let mut vm = Vm::with_captured_output();
            vm.interpret(chunk, FIB_PROGRAM).expect("run");
            black_box(vm.take_output());
        })
    });
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
