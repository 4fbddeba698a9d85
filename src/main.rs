use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use manifast::backend;
use manifast::fixtures::{self, Case, CaseClass, normalize_output};
use manifast::{compiler, parser, vm::Vm};

fn main() -> Result<ExitCode> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("run") => {
            let mut debug = false;
            let mut input_path = None;
            for arg in args {
                match arg.as_str() {
                    "--debug" => debug = true,
                    _ if input_path.is_none() => input_path = Some(arg),
                    other => bail!("Argumen tidak dikenal: {other}"),
                }
            }
            let Some(path) = input_path else {
                bail!("Pemakaian: manifast run <berkas.mnf> [--debug]");
            };
            run_file(&path, debug)
        }
        Some("test") => {
            let dir = args.next().unwrap_or_else(|| "tests/programs".to_string());
            run_tests(Path::new(&dir))
        }
        _ => {
            eprintln!("Pemakaian:");
            eprintln!("  manifast run <berkas.mnf> [--debug]");
            eprintln!("  manifast test [<direktori>]");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_file(path: &str, debug: bool) -> Result<ExitCode> {
    let source = fs::read_to_string(path).with_context(|| format!("Membaca {path}"))?;

    let parsed = parser::parse_source(&source);
    for diagnostic in &parsed.diagnostics {
        eprintln!("{diagnostic}");
    }
    if parsed.had_error {
        return Ok(ExitCode::FAILURE);
    }

    let chunk = match compiler::compile(&parsed.statements, path) {
        Ok(chunk) => chunk,
        Err(err) => {
            eprintln!("[ERROR KOMPILASI] {err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut vm = Vm::new();
    vm.debug = debug;
    // Runtime failures have already been reported with the full
    // diagnostic by the VM.
    match vm.interpret(chunk, &source) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

fn run_tests(dir: &Path) -> Result<ExitCode> {
    let cases = fixtures::load_cases(dir)?;
    let mut failures = 0usize;

    for case in &cases {
        let started = Instant::now();
        let outcome = check_case(case);
        let elapsed = started.elapsed();
        match outcome {
            Ok(()) => {
                println!("PASS {:<32} ({:?}, {:.1?})", case.name, case.spec.class, elapsed);
            }
            Err(err) => {
                failures += 1;
                println!("FAIL {:<32} ({:?}, {:.1?})", case.name, case.spec.class, elapsed);
                println!("     {err:#}");
            }
        }
    }

    println!("\n{} kasus, {} gagal", cases.len(), failures);
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check_case(case: &Case) -> Result<()> {
    let source = fs::read_to_string(&case.program_path)
        .with_context(|| format!("Membaca {}", case.name))?;
    let parsed = parser::parse_source(&source);

    match case.spec.class {
        CaseClass::FrontendError => {
            anyhow::ensure!(
                parsed.had_error,
                "Diharapkan kesalahan sintaks, tetapi parsing berhasil"
            );
            if let Some(expected) = case.spec.expected.stderr_contains.as_deref() {
                let rendered = parsed.diagnostics.join("\n");
                anyhow::ensure!(
                    rendered.contains(expected),
                    "Diagnostik tidak memuat '{expected}':\n{rendered}"
                );
            }
        }
        CaseClass::RuntimeSuccess => {
            anyhow::ensure!(
                !parsed.had_error,
                "Kesalahan sintaks:\n{}",
                parsed.diagnostics.join("\n")
            );
            let stdout_file = case
                .spec
                .expected
                .stdout_file
                .as_deref()
                .with_context(|| format!("stdout_file tidak ada pada {}", case.name))?;
            let expected = normalize_output(&case.read_text(stdout_file)?);
            for engine in backend::engines().iter_mut() {
                let output = engine
                    .run(&parsed.statements, &source)
                    .with_context(|| format!("Engine {} gagal", engine.name()))?;
                let actual = normalize_output(&output);
                anyhow::ensure!(
                    actual == expected,
                    "Engine {}: keluaran tidak cocok\n--- diharapkan ---\n{expected}\n--- aktual ---\n{actual}",
                    engine.name()
                );
            }
        }
        CaseClass::RuntimeError => {
            anyhow::ensure!(
                !parsed.had_error,
                "Kesalahan sintaks:\n{}",
                parsed.diagnostics.join("\n")
            );
            for engine in backend::engines().iter_mut() {
                let result = engine.run(&parsed.statements, &source);
                let err = match result {
                    Err(err) => err,
                    Ok(_) => bail!("Engine {}: diharapkan kesalahan runtime", engine.name()),
                };
                if let Some(expected) = case.spec.expected.stderr_contains.as_deref() {
                    let rendered = format!("{err:#}");
                    anyhow::ensure!(
                        rendered.contains(expected),
                        "Kesalahan tidak memuat '{expected}': {rendered}"
                    );
                }
            }
        }
    }
    Ok(())
}
