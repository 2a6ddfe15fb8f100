//! CIL instruction model
//!
//! Branch operands are stored as absolute IL offsets, so nothing downstream
//! has to know about short/long encodings.

pub mod decoder;

use crate::metadata::Token;
use smallvec::SmallVec;
use std::fmt;

/// Byte offset into a method body
pub type Offset = u32;

/// Comparison used by `beq`/`bge`/... and `ceq`/`cgt`/`clt`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Arithmetic and bitwise opcodes (`add` .. `shr.un`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
}

/// Target of a `conv.*` instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvKind {
    I1,
    I2,
    I4,
    I8,
    U1,
    U2,
    U4,
    U8,
    R4,
    R8,
    I,
    U,
}

/// Decoded opcode with its operand
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    Nop,
    LdArg(u16),
    LdArgA(u16),
    StArg(u16),
    LdLoc(u16),
    LdLocA(u16),
    StLoc(u16),
    LdNull,
    LdcI4(i32),
    LdcI8(i64),
    LdcR4(f32),
    LdcR8(f64),
    LdStr(Token),
    Dup,
    Pop,
    Call(Token),
    CallVirt(Token),
    NewObj(Token),
    Ret,
    Br(Offset),
    BrTrue(Offset),
    BrFalse(Offset),
    /// `beq`, `bne.un`, `blt`, ... with the `.un` flag
    BranchCmp {
        cmp: Comparison,
        unsigned: bool,
        target: Offset,
    },
    Switch(Vec<Offset>),
    Arith(ArithOp),
    Neg,
    Not,
    Conv(ConvKind),
    /// `ceq`, `cgt`, `cgt.un`, `clt`, `clt.un`
    Compare {
        cmp: Comparison,
        unsigned: bool,
    },
    CastClass(Token),
    IsInst(Token),
    Box(Token),
    UnboxAny(Token),
    Throw,
    Rethrow,
    LdFld(Token),
    LdFldA(Token),
    StFld(Token),
    LdSFld(Token),
    LdSFldA(Token),
    StSFld(Token),
    NewArr(Token),
    LdLen,
    LdElemA(Token),
    LdElem,
    StElem,
    InitObj(Token),
    Constrained(Token),
    Leave(Offset),
    EndFinally,
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub offset: Offset,
    /// Encoded size in bytes
    pub size: u32,
    pub opcode: Opcode,
}

impl Instruction {
    pub fn new(offset: Offset, size: u32, opcode: Opcode) -> Self {
        Self {
            offset,
            size,
            opcode,
        }
    }

    /// Offset of the following instruction
    pub fn next_offset(&self) -> Offset {
        self.offset + self.size
    }

    /// Explicit branch targets of this instruction
    pub fn branch_targets(&self) -> SmallVec<[Offset; 2]> {
        match &self.opcode {
            Opcode::Br(t)
            | Opcode::BrTrue(t)
            | Opcode::BrFalse(t)
            | Opcode::Leave(t)
            | Opcode::BranchCmp { target: t, .. } => SmallVec::from_slice(&[*t]),
            Opcode::Switch(targets) => targets.iter().copied().collect(),
            _ => SmallVec::new(),
        }
    }

    /// Whether this instruction ends a basic block
    pub fn is_block_end(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Br(_)
                | Opcode::BrTrue(_)
                | Opcode::BrFalse(_)
                | Opcode::BranchCmp { .. }
                | Opcode::Switch(_)
                | Opcode::Ret
                | Opcode::Throw
                | Opcode::Rethrow
                | Opcode::Leave(_)
                | Opcode::EndFinally
        )
    }

    /// Whether execution can continue with the next instruction
    pub fn falls_through(&self) -> bool {
        !matches!(
            self.opcode,
            Opcode::Br(_)
                | Opcode::Ret
                | Opcode::Throw
                | Opcode::Rethrow
                | Opcode::Leave(_)
                | Opcode::EndFinally
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: ", self.offset)?;
        match &self.opcode {
            Opcode::Br(t) => write!(f, "br IL_{:04x}", t),
            Opcode::BrTrue(t) => write!(f, "brtrue IL_{:04x}", t),
            Opcode::BrFalse(t) => write!(f, "brfalse IL_{:04x}", t),
            Opcode::Leave(t) => write!(f, "leave IL_{:04x}", t),
            Opcode::BranchCmp {
                cmp,
                unsigned,
                target,
            } => {
                let name = match cmp {
                    Comparison::Eq => "beq",
                    Comparison::Ne => "bne",
                    Comparison::Lt => "blt",
                    Comparison::Le => "ble",
                    Comparison::Gt => "bgt",
                    Comparison::Ge => "bge",
                };
                let suffix = if *unsigned { ".un" } else { "" };
                write!(f, "{}{} IL_{:04x}", name, suffix, target)
            }
            Opcode::Switch(targets) => {
                let list: Vec<String> = targets.iter().map(|t| format!("IL_{:04x}", t)).collect();
                write!(f, "switch ({})", list.join(", "))
            }
            other => write!(f, "{:?}", other),
        }
    }
}
