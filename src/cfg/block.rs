//! Basic block module
//!
//! This module contains the Block struct and related functionality.

use crate::il::{Instruction, Offset, Opcode};
use smallvec::SmallVec;

/// How a terminal block leaves the method or handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Return,
    Throw,
    /// `endfinally`: control continues at the pending `leave` target
    EndFinally,
}

/// Basic block containing a sequence of instructions
#[derive(Debug, Clone)]
pub struct Block {
    /// Instructions in this block
    pub instructions: Vec<Instruction>,
    /// Offset of the first instruction
    pub start_offset: Offset,
    /// Offset just past the last instruction
    pub end_offset: Offset,
    /// Exception regions (indices) whose protected range contains this block
    pub protected_by: SmallVec<[usize; 2]>,
    /// Exception region (index) whose handler starts at this block
    pub handler_of: Option<usize>,
    is_exit: bool,
}

impl Block {
    /// Create a new basic block
    pub fn new(start_offset: Offset, instructions: Vec<Instruction>) -> Self {
        let end_offset = instructions
            .last()
            .map(|i| i.next_offset())
            .unwrap_or(start_offset);
        Self {
            instructions,
            start_offset,
            end_offset,
            protected_by: SmallVec::new(),
            handler_of: None,
            is_exit: false,
        }
    }

    /// Synthetic exit node that every terminal block flows into
    pub fn new_exit() -> Self {
        Self {
            instructions: Vec::new(),
            start_offset: u32::MAX,
            end_offset: u32::MAX,
            protected_by: SmallVec::new(),
            handler_of: None,
            is_exit: true,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.is_exit
    }

    /// Get the last instruction in this block
    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Terminal kind if this block leaves the method (or a finally handler)
    pub fn terminal(&self) -> Option<Terminal> {
        match self.last_instruction()?.opcode {
            Opcode::Ret => Some(Terminal::Return),
            Opcode::Throw | Opcode::Rethrow => Some(Terminal::Throw),
            Opcode::EndFinally => Some(Terminal::EndFinally),
            _ => None,
        }
    }
}
