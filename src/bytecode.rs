//! Register-machine instruction encoding and the compiled chunk container.
//!
//! Instructions are fixed 32-bit words in three layouts:
//!
//! ```text
//! iABC:  [ B(9) | C(9) | A(8) | op(6) ]
//! iABx:  [    Bx(18)   | A(8) | op(6) ]
//! iAsBx: [   sBx(18)   | A(8) | op(6) ]    sBx is Bx biased by 131071
//! ```
//!
//! A B or C operand of 256 or more selects the constant table entry at
//! `operand - 256` instead of a register ("RK" encoding).

use std::rc::Rc;

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use crate::runtime::value::Value;

pub type Instruction = u32;

/// Bias applied to the 18-bit sBx field of relative jumps.
pub const SBX_BIAS: i32 = 131_071;

/// First RK operand value that denotes a constant instead of a register.
pub const RK_CONSTANT: u16 = 256;

/// Elements per SETLIST batch: batch `c` fills 1-based indexes
/// `(c-1)*50 + 1 ..= (c-1)*50 + b`.
pub const SETLIST_BATCH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Primitive)]
#[repr(u8)]
pub enum OpCode {
    /// R(A) := R(B)
    Move = 0,
    /// R(A) := K(Bx)
    LoadK = 1,
    /// R(A) := bool(B); if C then pc += 1
    LoadBool = 2,
    /// R(A)..=R(A+B) := nil
    LoadNil = 3,

    // Arithmetic: R(A) := RK(B) op RK(C). ADD concatenates when either
    // side is a string; Add/Sub/Mul/Div dispatch metamethods on instances.
    Add = 4,
    Sub = 5,
    Mul = 6,
    Div = 7,
    Mod = 8,
    Pow = 9,

    /// R(A) := -R(B)
    Unm = 10,
    /// R(A) := not truthy(R(B))
    Not = 11,
    /// R(A) := ~toint(R(B))
    BNot = 12,

    // Bitwise and shifts over i64-converted operands; Shr is an arithmetic
    // right shift.
    BAnd = 13,
    BOr = 14,
    BXor = 15,
    Shl = 16,
    Shr = 17,

    /// if (RK(B) == RK(C)) != bool(A) then pc += 1
    Eq = 18,
    /// if (RK(B) <  RK(C)) != bool(A) then pc += 1
    Lt = 19,
    /// if (RK(B) <= RK(C)) != bool(A) then pc += 1
    Le = 20,

    /// pc += sBx
    Jmp = 21,
    /// if truthy(R(A)) != bool(C) then pc += 1
    Test = 22,
    /// if truthy(R(B)) == bool(C) then R(A) := R(B) else pc += 1
    TestSet = 23,

    /// R(A)(R(A+1)..R(A+B-1)), expecting C-1 results in R(A)
    Call = 24,
    /// return R(A) when B-1 > 0, else nil
    Return = 25,

    /// R(A) := globals[K(Bx)]
    GetGlobal = 26,
    /// globals[K(Bx)] := R(A)
    SetGlobal = 27,

    /// R(A) := R(B)[RK(C)]
    GetTable = 28,
    /// R(A)[RK(B)] := RK(C)
    SetTable = 29,
    /// R(A) := {}
    NewTable = 30,
    /// R(A) := [] with capacity hint B
    NewArray = 31,
    /// R(A)[(C-1)*50 + j] := R(A+j) for j in 1..=B
    SetList = 32,
    /// R(A) := R(B)[RK(C) : RK(next word)]; consumes a second word
    GetSlice = 33,
    /// R(A) := new class named K(Bx)
    NewClass = 34,

    /// Push a handler: errors land in R(A) at pc+sBx
    Try = 35,
    /// Pop the innermost handler
    EndTry = 36,
}

pub fn encode_abc(op: OpCode, a: u8, b: u16, c: u16) -> Instruction {
    (op as u32 & 0x3F)
        | ((a as u32) << 6)
        | ((c as u32 & 0x1FF) << 14)
        | ((b as u32 & 0x1FF) << 23)
}

pub fn encode_abx(op: OpCode, a: u8, bx: u32) -> Instruction {
    (op as u32 & 0x3F) | ((a as u32) << 6) | ((bx & 0x3FFFF) << 14)
}

pub fn encode_asbx(op: OpCode, a: u8, sbx: i32) -> Instruction {
    encode_abx(op, a, (sbx + SBX_BIAS) as u32)
}

pub fn decode_op(i: Instruction) -> Option<OpCode> {
    OpCode::from_u8((i & 0x3F) as u8)
}

pub fn decode_a(i: Instruction) -> u8 {
    ((i >> 6) & 0xFF) as u8
}

pub fn decode_b(i: Instruction) -> u16 {
    ((i >> 23) & 0x1FF) as u16
}

pub fn decode_c(i: Instruction) -> u16 {
    ((i >> 14) & 0x1FF) as u16
}

pub fn decode_bx(i: Instruction) -> u32 {
    (i >> 14) & 0x3FFFF
}

pub fn decode_sbx(i: Instruction) -> i32 {
    decode_bx(i) as i32 - SBX_BIAS
}

/// A compiled unit: instructions, parallel source-position tables, the
/// constant pool and the chunks of the functions defined inside it.
/// Immutable once the compiler hands it over.
#[derive(Debug, Default)]
pub struct Chunk {
    /// Chunk name for stack traces; empty for anonymous functions.
    pub name: String,
    pub code: Vec<Instruction>,
    /// Source line per instruction, parallel to `code`.
    pub lines: Vec<u32>,
    /// Source byte offset per instruction, parallel to `code`.
    pub offsets: Vec<u32>,
    pub constants: Vec<Value>,
    /// Chunks of nested functions, shared with the `Value::Function`
    /// constants that reference them.
    pub functions: Vec<Rc<Chunk>>,
}

impl Chunk {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends an instruction with its source position; returns its index.
    pub fn write(&mut self, instruction: Instruction, line: u32, offset: u32) -> usize {
        debug_assert_eq!(self.code.len(), self.lines.len());
        self.code.push(instruction);
        self.lines.push(line);
        self.offsets.push(offset);
        self.code.len() - 1
    }

    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Rewrites the placeholder sBx at `index` to jump to the current end
    /// of code. The VM advances pc before applying the jump, so an sBx of 0
    /// lands on the instruction after the jump.
    pub fn patch_jump_to_here(&mut self, index: usize) {
        let target = self.code.len();
        let sbx = target as i32 - index as i32 - 1;
        let old = self.code[index];
        let op = decode_op(old).expect("patching a written instruction");
        self.code[index] = encode_asbx(op, decode_a(old), sbx);
    }
}

/// Renders one instruction for traces and the disassembly listing.
pub fn format_instruction(i: Instruction) -> String {
    let Some(op) = decode_op(i) else {
        return format!("??? ({i:#010x})");
    };
    match op {
        OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal | OpCode::NewClass => {
            format!("{:?} {} {}", op, decode_a(i), decode_bx(i))
        }
        OpCode::Jmp | OpCode::Try => {
            format!("{:?} {} {:+}", op, decode_a(i), decode_sbx(i))
        }
        _ => format!(
            "{:?} {} {} {}",
            op,
            decode_a(i),
            decode_b(i),
            decode_c(i)
        ),
    }
}

/// One line per instruction, with pc and source line. Debug aid only.
pub fn disassemble(chunk: &Chunk) -> String {
    let mut out = String::new();
    let name = if chunk.name.is_empty() {
        "<anonim>"
    } else {
        &chunk.name
    };
    out.push_str(&format!("== {name} ==\n"));
    for (pc, &instruction) in chunk.code.iter().enumerate() {
        out.push_str(&format!(
            "{:04} [{:>4}] {}\n",
            pc,
            chunk.lines.get(pc).copied().unwrap_or(0),
            format_instruction(instruction)
        ));
    }
    for function in &chunk.functions {
        out.push_str(&disassemble(function));
    }
    out
}
