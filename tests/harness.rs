//! Runs every fixture case under `tests/programs/` through every
//! registered execution engine, comparing stdout bytewise after newline
//! normalization.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};

use manifast::backend::{self, Engine};
use manifast::fixtures::{Case, CaseClass, load_cases, normalize_output};
use manifast::parser;

fn check_case(engine: &mut dyn Engine, case: &Case) -> Result<()> {
    let source = fs::read_to_string(&case.program_path)
        .with_context(|| format!("Reading {}", case.name))?;
    let parsed = parser::parse_source(&source);

    match case.spec.class {
        CaseClass::FrontendError => {
            ensure!(
                case.spec.expected.exit_code == 1,
                "Case {} expected exit code must be 1 for frontend_error",
                case.name
            );
            ensure!(
                parsed.had_error,
                "Expected frontend error in {}, but parsing succeeded",
                case.name
            );
            if let Some(expected) = case.spec.expected.stderr_contains.as_deref() {
                let rendered = parsed.diagnostics.join("\n");
                ensure!(
                    rendered.contains(expected),
                    "Expected diagnostic containing '{expected}' in {}, got:\n{rendered}",
                    case.name
                );
            }
        }
        CaseClass::RuntimeSuccess => {
            ensure!(
                case.spec.expected.exit_code == 0,
                "Case {} expected exit code must be 0 for runtime_success",
                case.name
            );
            ensure!(
                !parsed.had_error,
                "Unexpected syntax errors in {}:\n{}",
                case.name,
                parsed.diagnostics.join("\n")
            );
            let stdout_file = case
                .spec
                .expected
                .stdout_file
                .as_deref()
                .with_context(|| format!("Missing stdout_file in {}", case.name))?;
            let expected = normalize_output(&case.read_text(stdout_file)?);
            let output = engine
                .run(&parsed.statements, &source)
                .with_context(|| format!("Engine {} failed for {}", engine.name(), case.name))?;
            let actual = normalize_output(&output);
            assert_eq!(
                actual,
                expected,
                "Engine {} mismatch for {}",
                engine.name(),
                case.name
            );
        }
        CaseClass::RuntimeError => {
            ensure!(
                case.spec.expected.exit_code == 1,
                "Case {} expected exit code must be 1 for runtime_error",
                case.name
            );
            ensure!(
                !parsed.had_error,
                "Unexpected syntax errors in {}:\n{}",
                case.name,
                parsed.diagnostics.join("\n")
            );
            let result = engine.run(&parsed.statements, &source);
            ensure!(
                result.is_err(),
                "Expected runtime error for engine {} in {}",
                engine.name(),
                case.name
            );
            if let Some(expected) = case.spec.expected.stderr_contains.as_deref() {
                let actual = format!("{:#}", result.expect_err("result checked as err"));
                ensure!(
                    actual.contains(expected),
                    "Expected runtime error containing '{expected}' in {}, got '{actual}'",
                    case.name
                );
            }
        }
    }
    Ok(())
}

fn run_programs_for_engine(engine: &mut dyn Engine) -> Result<()> {
    let cases = load_cases(Path::new("tests/programs"))?;
    for case in cases {
        check_case(engine, &case)?;
    }
    Ok(())
}

#[test]
fn runs_programs_vm_engine() -> Result<()> {
    for mut engine in backend::engines() {
        run_programs_for_engine(engine.as_mut())?;
    }
    Ok(())
}
