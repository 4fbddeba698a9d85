//! Native functions installed into every fresh VM.

use std::fs;
use std::io::BufRead;
use std::thread;
use std::time::Duration;

use crate::compiler;
use crate::parser;
use crate::runtime::value::Value;
use crate::vm::{RuntimeError, Vm};

pub fn install(vm: &mut Vm) {
    vm.define_native("print", native_print);
    vm.define_native("println", native_println);
    vm.define_native("tipe", native_tipe);
    vm.define_native("tunggu", native_tunggu);
    vm.define_native("input", native_input);
    vm.define_native("impor", native_impor);
    vm.define_native("assert", native_assert);
    vm.define_native("exit", native_exit);
}

fn join_args(args: &[Value]) -> String {
    args.iter()
        .map(Value::to_output)
        .collect::<Vec<_>>()
        .join("\t")
}

fn native_print(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    vm.write_output(&join_args(args));
    Ok(Value::Nil)
}

fn native_println(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut text = join_args(args);
    text.push('\n');
    vm.write_output(&text);
    Ok(Value::Nil)
}

fn native_tipe(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    match args.first() {
        Some(value) => Ok(Value::from_string(value.type_name())),
        None => Ok(Value::Nil),
    }
}

fn native_tunggu(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if let Some(Value::Number(seconds)) = args.first()
        && *seconds > 0.0
    {
        thread::sleep(Duration::from_secs_f64(*seconds));
    }
    Ok(Value::Nil)
}

fn native_input(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if let Some(Value::Str(prompt)) = args.first() {
        vm.write_output(prompt);
    }
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(Value::from_string(line))
        }
        Err(_) => Ok(Value::from_string("")),
    }
}

fn native_assert(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let Some(condition) = args.first() else {
        return Err(vm.runtime_error("assert() membutuhkan minimal 1 argumen"));
    };
    if condition.is_truthy() {
        return Ok(Value::Nil);
    }
    let message = match args.get(1) {
        Some(Value::Str(message)) => message.to_string(),
        _ => "Assertion Failed".to_string(),
    };
    Err(vm.runtime_error(message))
}

fn native_exit(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let code = match args.first() {
        Some(Value::Number(code)) => *code as i32,
        _ => 0,
    };
    std::process::exit(code);
}

/// `impor(nama)`: a registered host module wins; otherwise the name is
/// treated as a `.mnf` source path which is compiled and interpreted in
/// this VM, yielding the module's last computed value. An unresolvable
/// module is a runtime error.
fn native_impor(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let Some(Value::Str(name)) = args.first() else {
        return Err(vm.runtime_error("impor() membutuhkan nama modul (string)"));
    };
    let name = name.to_string();

    if let Some(value) = vm.load_module(&name) {
        return Ok(value);
    }

    let Ok(source) = fs::read_to_string(&name) else {
        return Err(vm.runtime_error(format!("Modul tidak ditemukan: '{name}'")));
    };

    let parsed = parser::parse_source(&source);
    if parsed.had_error {
        for diagnostic in &parsed.diagnostics {
            eprintln!("{diagnostic}");
        }
        return Err(vm.runtime_error(format!("Modul tidak valid: '{name}'")));
    }
    let chunk = compiler::compile(&parsed.statements, &name)
        .map_err(|err| vm.runtime_error(err.to_string()))?;
    vm.interpret(chunk, &source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::parser::parse_source;

    fn run(vm: &mut Vm, source: &str) {
        let parsed = parse_source(source);
        assert!(!parsed.had_error, "{:?}", parsed.diagnostics);
        let chunk = compile(&parsed.statements, "uji").unwrap();
        vm.interpret(chunk, source).unwrap();
    }

    #[test]
    fn print_joins_arguments_with_tabs() {
        let mut vm = Vm::with_captured_output();
        run(&mut vm, "print(1, \"dua\", benar)");
        assert_eq!(vm.take_output(), "1\tdua\ttrue");
    }

    #[test]
    fn tipe_reports_indonesian_type_names() {
        let mut vm = Vm::with_captured_output();
        run(
            &mut vm,
            "println(tipe(1), tipe(\"s\"), tipe(benar), tipe(nil), tipe([1]), tipe({a: 1}))",
        );
        assert_eq!(vm.take_output(), "angka\tstring\tbool\tnil\tarray\tobjek\n");
    }

    #[test]
    fn assert_passes_on_truthy_values() {
        let mut vm = Vm::with_captured_output();
        run(&mut vm, "assert(1) assert(\"x\") println(\"lolos\")");
        assert_eq!(vm.take_output(), "lolos\n");
    }

    #[test]
    fn assert_fails_with_custom_message() {
        let source = "assert(salah, \"harus benar\")";
        let parsed = parse_source(source);
        let chunk = compile(&parsed.statements, "uji").unwrap();
        let mut vm = Vm::with_captured_output();
        let err = vm.interpret(chunk, source).expect_err("assert must fail");
        assert_eq!(err.message, "harus benar");
    }

    #[test]
    fn import_of_source_file_returns_last_value() {
        let dir = std::env::temp_dir().join("manifast-impor-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("modul.mnf");
        fs::write(&path, "fungsi dua() kembali 2 tutup\nkembali dua() * 10\n").unwrap();

        let source = format!("println(impor(\"{}\"))", path.display());
        let parsed = parse_source(&source);
        let chunk = compile(&parsed.statements, "uji").unwrap();
        let mut vm = Vm::with_captured_output();
        vm.interpret(chunk, &source).unwrap();
        assert_eq!(vm.take_output(), "20\n");
    }
}
