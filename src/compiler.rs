//! Single-pass lowering from the syntax tree to register bytecode.
//!
//! Register allocation is stack-like: every expression leaves its result in
//! a freshly allocated register at the top of the register stack, and
//! temporaries are freed as soon as their consumer has used them. Local
//! variables pin their register until their scope closes, which is what
//! makes argument registers line up contiguously for CALL.

use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::{
    Chunk, Instruction, OpCode, RK_CONSTANT, SETLIST_BATCH, encode_abc, encode_abx, encode_asbx,
};
use crate::parser::ast::{AssignOp, BinaryOp, Expr, ExprKind, Stmt, StmtKind, UnaryOp};
use crate::runtime::value::Value;

/// Registers available to one call frame; the frame window in the VM stack
/// has exactly this many slots.
pub const MAX_REGISTERS: usize = 255;

/// Constant-pool ceiling imposed by the 18-bit Bx field.
const MAX_CONSTANTS: usize = 0x3FFFF;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Baris {line}: register meluap (ekspresi terlalu dalam)")]
    RegisterOverflow { line: u32 },
    #[error("Baris {line}: terlalu banyak konstanta dalam satu chunk")]
    TooManyConstants { line: u32 },
    #[error("Baris {line}: penugasan ke konstanta '{name}'")]
    AssignToConst { name: String, line: u32 },
}

struct Local {
    name: String,
    depth: u32,
    reg: u8,
    is_const: bool,
}

pub struct Compiler {
    chunk: Chunk,
    next_reg: usize,
    locals: Vec<Local>,
    scope_depth: u32,
    line: u32,
    offset: u32,
}

/// Compiles a parsed program into an executable chunk. A returned error
/// means no chunk: partial output is never handed to the VM.
pub fn compile(statements: &[Stmt], name: &str) -> Result<Rc<Chunk>, CompileError> {
    let mut compiler = Compiler::new(name);
    for stmt in statements {
        compiler.statement(stmt)?;
    }
    compiler.emit(encode_abc(OpCode::Return, 0, 1, 0));
    Ok(Rc::new(compiler.chunk))
}

impl Compiler {
    fn new(name: &str) -> Self {
        Self {
            chunk: Chunk::new(name),
            next_reg: 0,
            locals: Vec::new(),
            scope_depth: 0,
            line: 0,
            offset: 0,
        }
    }

    // --- statements ---

    fn statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.line = stmt.line;
        self.offset = stmt.offset as u32;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expression(expr)?;
                self.free_reg();
            }
            StmtKind::VarDecl {
                name,
                initializer,
                is_const,
            } => {
                let reg = self.alloc_reg()?;
                match initializer {
                    Some(init) => {
                        let value = self.expression(init)?;
                        self.emit(encode_abc(OpCode::Move, reg, value as u16, 0));
                        self.free_reg();
                    }
                    None => {
                        self.emit(encode_abc(OpCode::LoadNil, reg, 0, 0));
                    }
                }
                self.locals.push(Local {
                    name: name.clone(),
                    depth: self.scope_depth,
                    reg,
                    is_const: *is_const,
                });
            }
            StmtKind::Block(statements) => {
                self.begin_scope();
                for stmt in statements {
                    self.statement(stmt)?;
                }
                self.end_scope();
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.expression(condition)?;
                self.emit(encode_abc(OpCode::Test, cond, 0, 0));
                let jump_else = self.emit(encode_asbx(OpCode::Jmp, 0, 0));
                self.free_reg();

                self.statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let jump_end = self.emit(encode_asbx(OpCode::Jmp, 0, 0));
                        self.chunk.patch_jump_to_here(jump_else);
                        self.statement(else_branch)?;
                        self.chunk.patch_jump_to_here(jump_end);
                    }
                    None => {
                        self.chunk.patch_jump_to_here(jump_else);
                    }
                }
            }
            StmtKind::While { condition, body } => {
                let loop_start = self.chunk.code.len();
                let cond = self.expression(condition)?;
                self.emit(encode_abc(OpCode::Test, cond, 0, 0));
                let exit = self.emit(encode_asbx(OpCode::Jmp, 0, 0));
                self.free_reg();

                self.statement(body)?;
                self.emit_loop_back(loop_start);
                self.chunk.patch_jump_to_here(exit);
            }
            StmtKind::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                self.for_statement(var, start, end, step.as_ref(), body)?;
            }
            StmtKind::Function { name, params, body } => {
                let function = self.function_chunk(name, params, body)?;
                self.chunk.functions.push(Rc::clone(&function));
                let k_func = self.make_constant(Value::Function(function))?;
                let k_name = self.make_constant(Value::from_string(name))?;
                let reg = self.alloc_reg()?;
                self.emit(encode_abx(OpCode::LoadK, reg, k_func as u32));
                self.emit(encode_abx(OpCode::SetGlobal, reg, k_name as u32));
                self.free_reg();
            }
            StmtKind::Class { name, methods } => {
                let k_name = self.make_constant(Value::from_string(name))?;
                let class_reg = self.alloc_reg()?;
                self.emit(encode_abx(OpCode::NewClass, class_reg, k_name as u32));

                for method in methods {
                    let StmtKind::Function {
                        name: method_name,
                        params,
                        body,
                    } = &method.kind
                    else {
                        continue;
                    };
                    let function = self.function_chunk(method_name, params, body)?;
                    self.chunk.functions.push(Rc::clone(&function));
                    let k_method = self.make_constant(Value::Function(function))?;
                    let value_reg = self.alloc_reg()?;
                    self.emit(encode_abx(OpCode::LoadK, value_reg, k_method as u32));
                    let key = self.rk_constant(Value::from_string(method_name))?;
                    self.emit(encode_abc(
                        OpCode::SetTable,
                        class_reg,
                        key,
                        value_reg as u16,
                    ));
                    self.free_reg();
                }

                self.emit(encode_abx(OpCode::SetGlobal, class_reg, k_name as u32));
                self.free_reg();
            }
            StmtKind::Return { value } => match value {
                Some(value) => {
                    let reg = self.expression(value)?;
                    self.emit(encode_abc(OpCode::Return, reg, 2, 0));
                    self.free_reg();
                }
                None => {
                    self.emit(encode_abc(OpCode::Return, 0, 1, 0));
                }
            },
            StmtKind::Try {
                body,
                catch_var,
                catch_body,
            } => {
                self.try_statement(body, catch_var.as_deref(), catch_body.as_deref())?;
            }
        }
        Ok(())
    }

    fn for_statement(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        self.begin_scope();

        let var_reg = self.alloc_reg()?;
        let start_value = self.expression(start)?;
        self.emit(encode_abc(OpCode::Move, var_reg, start_value as u16, 0));
        self.free_reg();
        self.locals.push(Local {
            name: var.to_string(),
            depth: self.scope_depth,
            reg: var_reg,
            is_const: false,
        });

        // Hidden loop-control slots live as unutterable locals so scope
        // teardown reclaims their registers.
        let end_reg = self.alloc_reg()?;
        let end_value = self.expression(end)?;
        self.emit(encode_abc(OpCode::Move, end_reg, end_value as u16, 0));
        self.free_reg();
        self.locals.push(Local {
            name: "(batas)".to_string(),
            depth: self.scope_depth,
            reg: end_reg,
            is_const: false,
        });

        let step_reg = self.alloc_reg()?;
        match step {
            Some(step) => {
                let step_value = self.expression(step)?;
                self.emit(encode_abc(OpCode::Move, step_reg, step_value as u16, 0));
                self.free_reg();
            }
            None => {
                let k_one = self.make_constant(Value::Number(1.0))?;
                self.emit(encode_abx(OpCode::LoadK, step_reg, k_one as u32));
            }
        }
        self.locals.push(Local {
            name: "(langkah)".to_string(),
            depth: self.scope_depth,
            reg: step_reg,
            is_const: false,
        });

        let loop_start = self.chunk.code.len();
        self.emit(encode_abc(OpCode::Le, 0, var_reg as u16, end_reg as u16));
        let exit = self.emit(encode_asbx(OpCode::Jmp, 0, 0));

        self.statement(body)?;

        self.emit(encode_abc(
            OpCode::Add,
            var_reg,
            var_reg as u16,
            step_reg as u16,
        ));
        self.emit_loop_back(loop_start);
        self.chunk.patch_jump_to_here(exit);

        self.end_scope();
        Ok(())
    }

    fn try_statement(
        &mut self,
        body: &Stmt,
        catch_var: Option<&str>,
        catch_body: Option<&Stmt>,
    ) -> Result<(), CompileError> {
        self.begin_scope();

        // The handler target register; rebound to the catch variable name
        // when the catch arm declares one.
        let catch_reg = self.alloc_reg()?;
        self.locals.push(Local {
            name: "(tangkap)".to_string(),
            depth: self.scope_depth,
            reg: catch_reg,
            is_const: false,
        });

        let try_index = self.emit(encode_asbx(OpCode::Try, catch_reg, 0));
        self.statement(body)?;
        self.emit(encode_abc(OpCode::EndTry, 0, 0, 0));
        let jump_end = self.emit(encode_asbx(OpCode::Jmp, 0, 0));

        self.chunk.patch_jump_to_here(try_index);
        if let Some(catch_body) = catch_body {
            if let Some(name) = catch_var {
                let slot = self
                    .locals
                    .iter_mut()
                    .rfind(|local| local.reg == catch_reg)
                    .expect("catch register was just bound");
                slot.name = name.to_string();
            }
            self.statement(catch_body)?;
        }
        self.chunk.patch_jump_to_here(jump_end);

        self.end_scope();
        Ok(())
    }

    // --- expressions ---

    /// Compiles an expression; the result register is always the current
    /// top of the register stack.
    fn expression(&mut self, expr: &Expr) -> Result<u8, CompileError> {
        self.line = expr.line;
        self.offset = expr.offset as u32;
        match &expr.kind {
            ExprKind::Number(value) => {
                let reg = self.alloc_reg()?;
                let k = self.make_constant(Value::Number(*value))?;
                self.emit(encode_abx(OpCode::LoadK, reg, k as u32));
                Ok(reg)
            }
            ExprKind::Str(value) => {
                let reg = self.alloc_reg()?;
                let k = self.make_constant(Value::from_string(process_escapes(value)))?;
                self.emit(encode_abx(OpCode::LoadK, reg, k as u32));
                Ok(reg)
            }
            ExprKind::Bool(value) => {
                let reg = self.alloc_reg()?;
                self.emit(encode_abc(OpCode::LoadBool, reg, *value as u16, 0));
                Ok(reg)
            }
            ExprKind::Nil => {
                let reg = self.alloc_reg()?;
                self.emit(encode_abc(OpCode::LoadNil, reg, 0, 0));
                Ok(reg)
            }
            ExprKind::Variable(name) => self.variable(name),
            ExprKind::Assign { target, op, value } => self.assignment(target, *op, value),
            ExprKind::Unary { op, right } => {
                let reg = self.expression(right)?;
                let opcode = match op {
                    UnaryOp::Neg => OpCode::Unm,
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::BitNot => OpCode::BNot,
                };
                self.emit(encode_abc(opcode, reg, reg as u16, 0));
                Ok(reg)
            }
            ExprKind::Binary { left, op, right } => self.binary(left, *op, right),
            ExprKind::Call { callee, args } => self.call(callee, args),
            ExprKind::Get { object, name } => {
                let obj = self.expression(object)?;
                let key = self.rk_constant(Value::from_string(name))?;
                self.emit(encode_abc(OpCode::GetTable, obj, obj as u16, key));
                Ok(obj)
            }
            ExprKind::Index { object, index } => {
                let obj = self.expression(object)?;
                let index = self.expression(index)?;
                self.emit(encode_abc(OpCode::GetTable, obj, obj as u16, index as u16));
                self.free_reg();
                Ok(obj)
            }
            ExprKind::Slice { object, start, end } => {
                let obj = self.expression(object)?;
                let start_reg = self.optional_bound(start.as_deref())?;
                let end_reg = self.optional_bound(end.as_deref())?;
                self.emit(encode_abc(OpCode::GetSlice, obj, obj as u16, start_reg as u16));
                // The end operand rides in a second raw word.
                self.emit(end_reg as Instruction);
                self.free_reg();
                self.free_reg();
                Ok(obj)
            }
            ExprKind::Array { elements } => {
                let array_reg = self.alloc_reg()?;
                self.emit(encode_abc(
                    OpCode::NewArray,
                    array_reg,
                    elements.len().min(0x1FF) as u16,
                    0,
                ));
                for (batch_index, batch) in elements.chunks(SETLIST_BATCH).enumerate() {
                    for element in batch {
                        self.expression(element)?;
                    }
                    self.emit(encode_abc(
                        OpCode::SetList,
                        array_reg,
                        batch.len() as u16,
                        (batch_index + 1) as u16,
                    ));
                    for _ in batch {
                        self.free_reg();
                    }
                }
                Ok(array_reg)
            }
            ExprKind::Object { entries } => {
                let object_reg = self.alloc_reg()?;
                self.emit(encode_abc(OpCode::NewTable, object_reg, 0, 0));
                for (key, value) in entries {
                    let value_reg = self.expression(value)?;
                    let key_rk = self.rk_constant(Value::from_string(key))?;
                    self.emit(encode_abc(
                        OpCode::SetTable,
                        object_reg,
                        key_rk,
                        value_reg as u16,
                    ));
                    self.free_reg();
                }
                Ok(object_reg)
            }
            ExprKind::Function { params, body } => {
                let function = self.function_chunk("", params, body)?;
                self.chunk.functions.push(Rc::clone(&function));
                let k = self.make_constant(Value::Function(function))?;
                let reg = self.alloc_reg()?;
                self.emit(encode_abx(OpCode::LoadK, reg, k as u32));
                Ok(reg)
            }
        }
    }

    fn variable(&mut self, name: &str) -> Result<u8, CompileError> {
        let reg = self.alloc_reg()?;
        match self.resolve_local(name) {
            Some((local_reg, _)) => {
                self.emit(encode_abc(OpCode::Move, reg, local_reg as u16, 0));
            }
            None => {
                let k = self.make_constant(Value::from_string(name))?;
                self.emit(encode_abx(OpCode::GetGlobal, reg, k as u32));
            }
        }
        Ok(reg)
    }

    fn assignment(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
    ) -> Result<u8, CompileError> {
        match &target.kind {
            ExprKind::Variable(name) => {
                let rhs = match compound_opcode(op) {
                    None => self.expression(value)?,
                    Some(opcode) => {
                        let current = self.variable(name)?;
                        let operand = self.expression(value)?;
                        self.emit(encode_abc(
                            opcode,
                            current,
                            current as u16,
                            operand as u16,
                        ));
                        self.free_reg();
                        current
                    }
                };
                match self.resolve_local(name) {
                    Some((local_reg, is_const)) => {
                        if is_const {
                            return Err(CompileError::AssignToConst {
                                name: name.clone(),
                                line: self.line,
                            });
                        }
                        self.emit(encode_abc(OpCode::Move, local_reg, rhs as u16, 0));
                    }
                    None => {
                        let k = self.make_constant(Value::from_string(name))?;
                        self.emit(encode_abx(OpCode::SetGlobal, rhs, k as u32));
                    }
                }
                Ok(rhs)
            }
            ExprKind::Get { object, name } => {
                let obj = self.expression(object)?;
                let key = self.rk_constant(Value::from_string(name))?;
                let rhs = match compound_opcode(op) {
                    None => self.expression(value)?,
                    Some(opcode) => {
                        let current = self.alloc_reg()?;
                        self.emit(encode_abc(OpCode::GetTable, current, obj as u16, key));
                        let operand = self.expression(value)?;
                        self.emit(encode_abc(
                            opcode,
                            current,
                            current as u16,
                            operand as u16,
                        ));
                        self.free_reg();
                        current
                    }
                };
                self.emit(encode_abc(OpCode::SetTable, obj, key, rhs as u16));
                self.emit(encode_abc(OpCode::Move, obj, rhs as u16, 0));
                self.free_reg();
                Ok(obj)
            }
            ExprKind::Index { object, index } => {
                let obj = self.expression(object)?;
                let index = self.expression(index)?;
                let rhs = match compound_opcode(op) {
                    None => self.expression(value)?,
                    Some(opcode) => {
                        let current = self.alloc_reg()?;
                        self.emit(encode_abc(
                            OpCode::GetTable,
                            current,
                            obj as u16,
                            index as u16,
                        ));
                        let operand = self.expression(value)?;
                        self.emit(encode_abc(
                            opcode,
                            current,
                            current as u16,
                            operand as u16,
                        ));
                        self.free_reg();
                        current
                    }
                };
                self.emit(encode_abc(OpCode::SetTable, obj, index as u16, rhs as u16));
                self.emit(encode_abc(OpCode::Move, obj, rhs as u16, 0));
                self.free_reg();
                self.free_reg();
                Ok(obj)
            }
            // The parser only produces the three target shapes above.
            _ => unreachable!("parser rejects other assignment targets"),
        }
    }

    fn binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<u8, CompileError> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let result = self.expression(left)?;
                let c = if op == BinaryOp::Or { 1 } else { 0 };
                self.emit(encode_abc(OpCode::Test, result, 0, c));
                let short_circuit = self.emit(encode_asbx(OpCode::Jmp, 0, 0));
                let rhs = self.expression(right)?;
                self.emit(encode_abc(OpCode::Move, result, rhs as u16, 0));
                self.free_reg();
                self.chunk.patch_jump_to_here(short_circuit);
                Ok(result)
            }
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::Less
            | BinaryOp::LessEqual
            | BinaryOp::Greater
            | BinaryOp::GreaterEqual => {
                let left_reg = self.expression(left)?;
                let right_reg = self.expression(right)?;
                let (opcode, a_flag, swapped) = match op {
                    BinaryOp::Equal => (OpCode::Eq, 1, false),
                    BinaryOp::NotEqual => (OpCode::Eq, 0, false),
                    BinaryOp::Less => (OpCode::Lt, 1, false),
                    BinaryOp::LessEqual => (OpCode::Le, 1, false),
                    BinaryOp::Greater => (OpCode::Lt, 1, true),
                    BinaryOp::GreaterEqual => (OpCode::Le, 1, true),
                    _ => unreachable!(),
                };
                let (b, c) = if swapped {
                    (right_reg as u16, left_reg as u16)
                } else {
                    (left_reg as u16, right_reg as u16)
                };
                // Materialize the skip-style test as a boolean: the jump is
                // taken only when the test matched A, landing on the
                // true-load; otherwise the false-load's C skips it.
                self.emit(encode_abc(opcode, a_flag, b, c));
                self.emit(encode_asbx(OpCode::Jmp, 0, 1));
                self.emit(encode_abc(OpCode::LoadBool, left_reg, 0, 1));
                self.emit(encode_abc(OpCode::LoadBool, left_reg, 1, 0));
                self.free_reg();
                Ok(left_reg)
            }
            _ => {
                let left_reg = self.expression(left)?;
                let right_reg = self.expression(right)?;
                let opcode = match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Mod => OpCode::Mod,
                    BinaryOp::BitAnd => OpCode::BAnd,
                    BinaryOp::BitOr => OpCode::BOr,
                    BinaryOp::BitXor => OpCode::BXor,
                    BinaryOp::Shl => OpCode::Shl,
                    BinaryOp::Shr => OpCode::Shr,
                    _ => unreachable!(),
                };
                self.emit(encode_abc(
                    opcode,
                    left_reg,
                    left_reg as u16,
                    right_reg as u16,
                ));
                self.free_reg();
                Ok(left_reg)
            }
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<u8, CompileError> {
        // Method form: load the function through the receiver, then inject
        // the receiver itself as the leading `self` argument.
        if let ExprKind::Get { object, name } = &callee.kind {
            let obj = self.expression(object)?;
            let func = self.alloc_reg()?;
            let key = self.rk_constant(Value::from_string(name))?;
            self.emit(encode_abc(OpCode::GetTable, func, obj as u16, key));
            let self_reg = self.alloc_reg()?;
            self.emit(encode_abc(OpCode::Move, self_reg, obj as u16, 0));
            for arg in args {
                self.expression(arg)?;
            }
            self.emit(encode_abc(
                OpCode::Call,
                func,
                (args.len() + 2) as u16,
                1,
            ));
            for _ in 0..args.len() + 1 {
                self.free_reg();
            }
            self.emit(encode_abc(OpCode::Move, obj, func as u16, 0));
            self.free_reg();
            return Ok(obj);
        }

        let func = self.expression(callee)?;
        for arg in args {
            self.expression(arg)?;
        }
        self.emit(encode_abc(OpCode::Call, func, (args.len() + 1) as u16, 1));
        for _ in args {
            self.free_reg();
        }
        Ok(func)
    }

    /// Compiles a slice bound; a missing bound loads nil, which the VM
    /// treats as "from the start" / "to the end".
    fn optional_bound(&mut self, bound: Option<&Expr>) -> Result<u8, CompileError> {
        match bound {
            Some(expr) => self.expression(expr),
            None => {
                let reg = self.alloc_reg()?;
                self.emit(encode_abc(OpCode::LoadNil, reg, 0, 0));
                Ok(reg)
            }
        }
    }

    /// Compiles a function body into its own chunk with a fresh register
    /// and scope state; parameters arrive pre-bound in R(0)..R(n-1).
    fn function_chunk(
        &mut self,
        name: &str,
        params: &[String],
        body: &Stmt,
    ) -> Result<Rc<Chunk>, CompileError> {
        let mut sub = Compiler::new(name);
        sub.line = self.line;
        sub.offset = self.offset;
        if params.len() > MAX_REGISTERS {
            return Err(CompileError::RegisterOverflow { line: self.line });
        }
        for (index, param) in params.iter().enumerate() {
            sub.locals.push(Local {
                name: param.clone(),
                depth: 0,
                reg: index as u8,
                is_const: false,
            });
        }
        sub.next_reg = params.len();

        sub.statement(body)?;
        sub.emit(encode_abc(OpCode::Return, 0, 1, 0));
        Ok(Rc::new(sub.chunk))
    }

    // --- helpers ---

    fn emit(&mut self, instruction: Instruction) -> usize {
        self.chunk.write(instruction, self.line, self.offset)
    }

    fn emit_loop_back(&mut self, loop_start: usize) {
        let sbx = loop_start as i32 - (self.chunk.code.len() as i32 + 1);
        self.emit(encode_asbx(OpCode::Jmp, 0, sbx));
    }

    fn alloc_reg(&mut self) -> Result<u8, CompileError> {
        if self.next_reg >= MAX_REGISTERS {
            return Err(CompileError::RegisterOverflow { line: self.line });
        }
        let reg = self.next_reg as u8;
        self.next_reg += 1;
        Ok(reg)
    }

    fn free_reg(&mut self) {
        debug_assert!(self.next_reg > 0);
        self.next_reg -= 1;
    }

    fn make_constant(&mut self, value: Value) -> Result<usize, CompileError> {
        if self.chunk.constants.len() >= MAX_CONSTANTS {
            return Err(CompileError::TooManyConstants { line: self.line });
        }
        Ok(self.chunk.add_constant(value))
    }

    /// Constant as an RK operand. RK constants only reach the first 256
    /// pool slots; past that the chunk is out of room for keyed access.
    fn rk_constant(&mut self, value: Value) -> Result<u16, CompileError> {
        let index = self.make_constant(value)?;
        if index >= RK_CONSTANT as usize {
            return Err(CompileError::TooManyConstants { line: self.line });
        }
        Ok(index as u16 + RK_CONSTANT)
    }

    fn resolve_local(&self, name: &str) -> Option<(u8, bool)> {
        self.locals
            .iter()
            .rev()
            .find(|local| local.name == name)
            .map(|local| (local.reg, local.is_const))
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while self
            .locals
            .last()
            .is_some_and(|local| local.depth > self.scope_depth)
        {
            self.locals.pop();
            self.next_reg -= 1;
        }
    }
}

fn compound_opcode(op: AssignOp) -> Option<OpCode> {
    match op {
        AssignOp::Assign => None,
        AssignOp::Add => Some(OpCode::Add),
        AssignOp::Sub => Some(OpCode::Sub),
        AssignOp::Mul => Some(OpCode::Mul),
        AssignOp::Div => Some(OpCode::Div),
        AssignOp::Mod => Some(OpCode::Mod),
    }
}

/// Interprets the escape sequences of a string literal. Unknown escapes
/// keep the backslash verbatim.
fn process_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{decode_a, decode_b, decode_c, decode_op};
    use crate::parser::parse_source;
    use indoc::indoc;

    fn compile_ok(source: &str) -> Rc<Chunk> {
        let parsed = parse_source(source);
        assert!(!parsed.had_error, "parse failed: {:?}", parsed.diagnostics);
        compile(&parsed.statements, "uji").expect("compile should succeed")
    }

    fn opcodes(chunk: &Chunk) -> Vec<OpCode> {
        chunk.code.iter().filter_map(|&i| decode_op(i)).collect()
    }

    #[test]
    fn every_chunk_ends_with_return() {
        for source in ["", "lokal x = 1", "fungsi f() tutup", "println(1)"] {
            let chunk = compile_ok(source);
            let last = *chunk.code.last().expect("non-empty chunk");
            assert_eq!(decode_op(last), Some(OpCode::Return), "source: {source}");
            for function in &chunk.functions {
                let last = *function.code.last().expect("non-empty function chunk");
                assert_eq!(decode_op(last), Some(OpCode::Return));
            }
        }
    }

    #[test]
    fn local_declaration_pins_a_register() {
        let chunk = compile_ok("lokal x = 5 lokal y = x");
        // x: LOADK r1, MOVE r0<-r1; y: MOVE r2<-r0, MOVE... registers are
        // stack-shaped, so the second decl reads register 0.
        let ops = opcodes(&chunk);
        assert_eq!(
            ops,
            vec![
                OpCode::LoadK,
                OpCode::Move,
                OpCode::Move,
                OpCode::Move,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn comparison_materializes_via_loadbool_pair() {
        let chunk = compile_ok("lokal a = 1 < 2");
        let ops = opcodes(&chunk);
        assert!(
            ops.windows(4).any(|w| w
                == [OpCode::Lt, OpCode::Jmp, OpCode::LoadBool, OpCode::LoadBool]),
            "missing compare pattern in {ops:?}"
        );
    }

    #[test]
    fn greater_than_swaps_operands_of_lt() {
        let chunk = compile_ok("lokal a = 5 lokal b = 2 lokal c = a > b");
        let lt = chunk
            .code
            .iter()
            .copied()
            .find(|&i| decode_op(i) == Some(OpCode::Lt))
            .expect("lt emitted");
        // a > b compiles as Lt with b in the B slot and a in the C slot.
        assert_eq!(decode_a(lt), 1);
        assert!(decode_b(lt) > decode_c(lt));
    }

    #[test]
    fn call_places_args_after_callee() {
        let chunk = compile_ok("println(10, 20)");
        let call = chunk
            .code
            .iter()
            .copied()
            .find(|&i| decode_op(i) == Some(OpCode::Call))
            .expect("call emitted");
        assert_eq!(decode_a(call), 0);
        assert_eq!(decode_b(call), 3); // two args + 1
        assert_eq!(decode_c(call), 1);
    }

    #[test]
    fn function_statement_creates_nested_chunk_and_global() {
        let chunk = compile_ok("fungsi tambah(a, b) kembali a + b tutup");
        assert_eq!(chunk.functions.len(), 1);
        assert_eq!(chunk.functions[0].name, "tambah");
        let ops = opcodes(&chunk);
        assert!(ops.contains(&OpCode::SetGlobal));

        let body_ops = opcodes(&chunk.functions[0]);
        assert!(body_ops.contains(&OpCode::Add));
        // Explicit return of the sum plus the implicit terminator.
        assert_eq!(
            body_ops.iter().filter(|&&op| op == OpCode::Return).count(),
            2
        );
    }

    #[test]
    fn scope_end_releases_registers() {
        let chunk = compile_ok(indoc! {"
            lakukan
                lokal a = 1
                lokal b = 2
            tutup
            lokal c = 3
        "});
        // After the block closes, c must land back in register 0.
        let last_move = chunk
            .code
            .iter()
            .rev()
            .copied()
            .find(|&i| decode_op(i) == Some(OpCode::Move))
            .expect("move for c");
        assert_eq!(decode_a(last_move), 0);
    }

    #[test]
    fn class_compiles_to_newclass_and_method_settables() {
        let chunk = compile_ok(indoc! {"
            kelas Hewan maka
                fungsi suara() kembali 1 tutup
                fungsi kaki() kembali 4 tutup
            tutup
        "});
        let ops = opcodes(&chunk);
        assert!(ops.contains(&OpCode::NewClass));
        assert_eq!(ops.iter().filter(|&&op| op == OpCode::SetTable).count(), 2);
        assert_eq!(chunk.functions.len(), 2);
    }

    #[test]
    fn array_literal_uses_setlist_batches() {
        let chunk = compile_ok("lokal a = [1, 2, 3]");
        let setlist = chunk
            .code
            .iter()
            .copied()
            .find(|&i| decode_op(i) == Some(OpCode::SetList))
            .expect("setlist emitted");
        assert_eq!(decode_b(setlist), 3);
        assert_eq!(decode_c(setlist), 1);
    }

    #[test]
    fn long_array_literal_spans_batches() {
        let elements: Vec<String> = (1..=120).map(|n| n.to_string()).collect();
        let source = format!("lokal a = [{}]", elements.join(", "));
        let chunk = compile_ok(&source);
        let batches: Vec<(u16, u16)> = chunk
            .code
            .iter()
            .copied()
            .filter(|&i| decode_op(i) == Some(OpCode::SetList))
            .map(|i| (decode_b(i), decode_c(i)))
            .collect();
        assert_eq!(batches, vec![(50, 1), (50, 2), (20, 3)]);
    }

    #[test]
    fn assigning_to_const_is_a_compile_error() {
        let parsed = parse_source("tetap x = 1 x = 2");
        assert!(!parsed.had_error);
        let err = compile(&parsed.statements, "uji").expect_err("const assignment must fail");
        assert!(matches!(err, CompileError::AssignToConst { ref name, .. } if name == "x"));
    }

    #[test]
    fn try_catch_emits_handler_brackets() {
        let chunk = compile_ok(indoc! {"
            coba
                println(1)
            tangkap e
                println(e)
            tutup
        "});
        let ops = opcodes(&chunk);
        assert!(ops.contains(&OpCode::Try));
        assert!(ops.contains(&OpCode::EndTry));
    }

    #[test]
    fn escape_sequences_are_processed() {
        assert_eq!(process_escapes(r"a\nb"), "a\nb");
        assert_eq!(process_escapes(r"tab\there"), "tab\there");
        assert_eq!(process_escapes(r#"say \"hi\""#), "say \"hi\"");
        assert_eq!(process_escapes(r"back\\slash"), "back\\slash");
        assert_eq!(process_escapes(r"\q"), "\\q");
    }

    #[test]
    fn method_call_injects_receiver() {
        let chunk = compile_ok("lokal o = {x: 1} o.ambil(5)");
        let call = chunk
            .code
            .iter()
            .copied()
            .find(|&i| decode_op(i) == Some(OpCode::Call))
            .expect("call emitted");
        // One explicit arg plus the injected receiver.
        assert_eq!(decode_b(call), 3);
    }

    #[test]
    fn while_loop_jumps_backwards() {
        let chunk = compile_ok("selama salah lakukan println(1) tutup");
        let has_backward_jump = chunk.code.iter().copied().any(|i| {
            decode_op(i) == Some(OpCode::Jmp) && crate::bytecode::decode_sbx(i) < 0
        });
        assert!(has_backward_jump);
    }

    #[test]
    fn for_loop_uses_le_guard_and_add_step() {
        let chunk = compile_ok("untuk i = 1 ke 3 lakukan println(i) tutup");
        let ops = opcodes(&chunk);
        assert!(ops.contains(&OpCode::Le));
        assert!(ops.contains(&OpCode::Add));
    }
}
