//! Pluggable execution-engine seam.
//!
//! Every engine consumes the same parsed AST. The register-bytecode VM is
//! the in-tree engine; alternative engines (such as a native-code backend)
//! implement [`Engine`] and register in [`engines`] without touching the
//! frontend or the driver.

use anyhow::{Result, anyhow};

use crate::compiler;
use crate::parser::ast::Stmt;
use crate::vm::Vm;

pub trait Engine {
    fn name(&self) -> &'static str;
    /// Executes a parsed program against fresh state and returns its
    /// stdout.
    fn run(&mut self, program: &[Stmt], source: &str) -> Result<String>;
}

/// Compiles to a chunk and interprets it on the register VM.
pub struct BytecodeEngine;

impl Engine for BytecodeEngine {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn run(&mut self, program: &[Stmt], source: &str) -> Result<String> {
        let chunk = compiler::compile(program, "<utama>")?;
        let mut vm = Vm::with_captured_output();
        vm.interpret(chunk, source)
            .map_err(|err| anyhow!("{err}"))?;
        Ok(vm.take_output())
    }
}

pub fn engines() -> Vec<Box<dyn Engine>> {
    vec![Box::new(BytecodeEngine)]
}
