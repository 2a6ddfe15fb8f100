//! CIL byte decoder
//!
//! Turns the raw IL of a method body into [`Instruction`]s. Only the opcode
//! subset the reconstruction core understands is accepted; anything else is
//! reported as an unknown opcode rather than guessed at.

use super::{ArithOp, Comparison, ConvKind, Instruction, Offset, Opcode};
use crate::error::{Error, Result};
use crate::metadata::Token;
use scroll::{Pread, LE};

/// Decode a whole method body
pub fn decode(bytes: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let start = offset;
        let opcode = decode_one(bytes, &mut offset)?;
        instructions.push(Instruction::new(
            start as Offset,
            (offset - start) as u32,
            opcode,
        ));
    }
    log::trace!("Decoded {} instructions from {} bytes", instructions.len(), bytes.len());
    Ok(instructions)
}

fn read<'a, T>(bytes: &'a [u8], offset: &mut usize, start: usize) -> Result<T>
where
    T: scroll::ctx::TryFromCtx<'a, scroll::Endian, Error = scroll::Error>,
{
    bytes
        .gread_with::<T>(offset, LE)
        .map_err(|e| Error::decode(start as u32, format!("truncated operand: {}", e)))
}

fn token(bytes: &[u8], offset: &mut usize, start: usize) -> Result<Token> {
    Ok(Token(read::<u32>(bytes, offset, start)?))
}

fn relative(start: usize, next: usize, delta: i64) -> Result<Offset> {
    let target = next as i64 + delta;
    if target < 0 || target > u32::MAX as i64 {
        return Err(Error::invalid_flow(
            start as u32,
            format!("branch target {} is outside the method body", target),
        ));
    }
    Ok(target as Offset)
}

fn short_target(bytes: &[u8], offset: &mut usize, start: usize) -> Result<Offset> {
    let delta = read::<i8>(bytes, offset, start)?;
    relative(start, *offset, delta as i64)
}

fn long_target(bytes: &[u8], offset: &mut usize, start: usize) -> Result<Offset> {
    let delta = read::<i32>(bytes, offset, start)?;
    relative(start, *offset, delta as i64)
}

fn cmp_branch(cmp: Comparison, unsigned: bool, target: Offset) -> Opcode {
    Opcode::BranchCmp {
        cmp,
        unsigned,
        target,
    }
}

fn decode_one(bytes: &[u8], offset: &mut usize) -> Result<Opcode> {
    let start = *offset;
    let op = read::<u8>(bytes, offset, start)?;
    let opcode = match op {
        0x00 | 0x01 => Opcode::Nop,
        0x02..=0x05 => Opcode::LdArg((op - 0x02) as u16),
        0x06..=0x09 => Opcode::LdLoc((op - 0x06) as u16),
        0x0A..=0x0D => Opcode::StLoc((op - 0x0A) as u16),
        0x0E => Opcode::LdArg(read::<u8>(bytes, offset, start)? as u16),
        0x0F => Opcode::LdArgA(read::<u8>(bytes, offset, start)? as u16),
        0x10 => Opcode::StArg(read::<u8>(bytes, offset, start)? as u16),
        0x11 => Opcode::LdLoc(read::<u8>(bytes, offset, start)? as u16),
        0x12 => Opcode::LdLocA(read::<u8>(bytes, offset, start)? as u16),
        0x13 => Opcode::StLoc(read::<u8>(bytes, offset, start)? as u16),
        0x14 => Opcode::LdNull,
        0x15..=0x1E => Opcode::LdcI4(op as i32 - 0x16),
        0x1F => Opcode::LdcI4(read::<i8>(bytes, offset, start)? as i32),
        0x20 => Opcode::LdcI4(read::<i32>(bytes, offset, start)?),
        0x21 => Opcode::LdcI8(read::<i64>(bytes, offset, start)?),
        0x22 => Opcode::LdcR4(read::<f32>(bytes, offset, start)?),
        0x23 => Opcode::LdcR8(read::<f64>(bytes, offset, start)?),
        0x25 => Opcode::Dup,
        0x26 => Opcode::Pop,
        0x28 => Opcode::Call(token(bytes, offset, start)?),
        0x2A => Opcode::Ret,
        0x2B => Opcode::Br(short_target(bytes, offset, start)?),
        0x2C => Opcode::BrFalse(short_target(bytes, offset, start)?),
        0x2D => Opcode::BrTrue(short_target(bytes, offset, start)?),
        0x2E..=0x37 => {
            let (cmp, unsigned) = branch_comparison(op - 0x2E);
            cmp_branch(cmp, unsigned, short_target(bytes, offset, start)?)
        }
        0x38 => Opcode::Br(long_target(bytes, offset, start)?),
        0x39 => Opcode::BrFalse(long_target(bytes, offset, start)?),
        0x3A => Opcode::BrTrue(long_target(bytes, offset, start)?),
        0x3B..=0x44 => {
            let (cmp, unsigned) = branch_comparison(op - 0x3B);
            cmp_branch(cmp, unsigned, long_target(bytes, offset, start)?)
        }
        0x45 => {
            let count = read::<u32>(bytes, offset, start)? as usize;
            if count > bytes.len() / 4 {
                return Err(Error::decode(
                    start as u32,
                    format!("switch table of {} entries exceeds the method body", count),
                ));
            }
            let mut deltas = Vec::with_capacity(count);
            for _ in 0..count {
                deltas.push(read::<i32>(bytes, offset, start)?);
            }
            // Switch targets are relative to the end of the whole instruction.
            let next = *offset;
            let targets = deltas
                .into_iter()
                .map(|d| relative(start, next, d as i64))
                .collect::<Result<Vec<_>>>()?;
            Opcode::Switch(targets)
        }
        0x58 => Opcode::Arith(ArithOp::Add),
        0x59 => Opcode::Arith(ArithOp::Sub),
        0x5A => Opcode::Arith(ArithOp::Mul),
        0x5B => Opcode::Arith(ArithOp::Div),
        0x5C => Opcode::Arith(ArithOp::DivUn),
        0x5D => Opcode::Arith(ArithOp::Rem),
        0x5E => Opcode::Arith(ArithOp::RemUn),
        0x5F => Opcode::Arith(ArithOp::And),
        0x60 => Opcode::Arith(ArithOp::Or),
        0x61 => Opcode::Arith(ArithOp::Xor),
        0x62 => Opcode::Arith(ArithOp::Shl),
        0x63 => Opcode::Arith(ArithOp::Shr),
        0x64 => Opcode::Arith(ArithOp::ShrUn),
        0x65 => Opcode::Neg,
        0x66 => Opcode::Not,
        0x67 => Opcode::Conv(ConvKind::I1),
        0x68 => Opcode::Conv(ConvKind::I2),
        0x69 => Opcode::Conv(ConvKind::I4),
        0x6A => Opcode::Conv(ConvKind::I8),
        0x6B => Opcode::Conv(ConvKind::R4),
        0x6C => Opcode::Conv(ConvKind::R8),
        0x6D => Opcode::Conv(ConvKind::U4),
        0x6E => Opcode::Conv(ConvKind::U8),
        0x6F => Opcode::CallVirt(token(bytes, offset, start)?),
        0x72 => Opcode::LdStr(token(bytes, offset, start)?),
        0x73 => Opcode::NewObj(token(bytes, offset, start)?),
        0x74 => Opcode::CastClass(token(bytes, offset, start)?),
        0x75 => Opcode::IsInst(token(bytes, offset, start)?),
        0x7A => Opcode::Throw,
        0x7B => Opcode::LdFld(token(bytes, offset, start)?),
        0x7C => Opcode::LdFldA(token(bytes, offset, start)?),
        0x7D => Opcode::StFld(token(bytes, offset, start)?),
        0x7E => Opcode::LdSFld(token(bytes, offset, start)?),
        0x7F => Opcode::LdSFldA(token(bytes, offset, start)?),
        0x80 => Opcode::StSFld(token(bytes, offset, start)?),
        0x8C => Opcode::Box(token(bytes, offset, start)?),
        0x8D => Opcode::NewArr(token(bytes, offset, start)?),
        0x8E => Opcode::LdLen,
        0x8F => Opcode::LdElemA(token(bytes, offset, start)?),
        0x90..=0x9A => Opcode::LdElem,
        0x9B..=0xA2 => Opcode::StElem,
        0xA3 => {
            token(bytes, offset, start)?;
            Opcode::LdElem
        }
        0xA4 => {
            token(bytes, offset, start)?;
            Opcode::StElem
        }
        0xA5 => Opcode::UnboxAny(token(bytes, offset, start)?),
        0xD1 => Opcode::Conv(ConvKind::U2),
        0xD2 => Opcode::Conv(ConvKind::U1),
        0xD3 => Opcode::Conv(ConvKind::I),
        0xDC => Opcode::EndFinally,
        0xDD => Opcode::Leave(long_target(bytes, offset, start)?),
        0xDE => Opcode::Leave(short_target(bytes, offset, start)?),
        0xE0 => Opcode::Conv(ConvKind::U),
        0xFE => decode_prefixed(bytes, offset, start)?,
        other => {
            return Err(Error::UnknownOpcode {
                opcode: other as u16,
                offset: start as u32,
            })
        }
    };
    Ok(opcode)
}

fn decode_prefixed(bytes: &[u8], offset: &mut usize, start: usize) -> Result<Opcode> {
    let op = read::<u8>(bytes, offset, start)?;
    let opcode = match op {
        0x01 => Opcode::Compare {
            cmp: Comparison::Eq,
            unsigned: false,
        },
        0x02 => Opcode::Compare {
            cmp: Comparison::Gt,
            unsigned: false,
        },
        0x03 => Opcode::Compare {
            cmp: Comparison::Gt,
            unsigned: true,
        },
        0x04 => Opcode::Compare {
            cmp: Comparison::Lt,
            unsigned: false,
        },
        0x05 => Opcode::Compare {
            cmp: Comparison::Lt,
            unsigned: true,
        },
        0x09 => Opcode::LdArg(read::<u16>(bytes, offset, start)?),
        0x0A => Opcode::LdArgA(read::<u16>(bytes, offset, start)?),
        0x0B => Opcode::StArg(read::<u16>(bytes, offset, start)?),
        0x0C => Opcode::LdLoc(read::<u16>(bytes, offset, start)?),
        0x0D => Opcode::LdLocA(read::<u16>(bytes, offset, start)?),
        0x0E => Opcode::StLoc(read::<u16>(bytes, offset, start)?),
        0x15 => Opcode::InitObj(token(bytes, offset, start)?),
        0x16 => Opcode::Constrained(token(bytes, offset, start)?),
        0x1A => Opcode::Rethrow,
        other => {
            return Err(Error::UnknownOpcode {
                opcode: 0xFE00 | other as u16,
                offset: start as u32,
            })
        }
    };
    Ok(opcode)
}

/// Map the index within the `beq..blt.un` family to its comparison
fn branch_comparison(index: u8) -> (Comparison, bool) {
    match index {
        0 => (Comparison::Eq, false),
        1 => (Comparison::Ge, false),
        2 => (Comparison::Gt, false),
        3 => (Comparison::Le, false),
        4 => (Comparison::Lt, false),
        5 => (Comparison::Ne, true),
        6 => (Comparison::Ge, true),
        7 => (Comparison::Gt, true),
        8 => (Comparison::Le, true),
        _ => (Comparison::Lt, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_short_forms_and_constants() {
        // ldarg.1; ldc.i4.s 42; bne.un.s +1; nop; ret
        let bytes = [0x03, 0x1F, 42, 0x33, 0x01, 0x00, 0x2A];
        let insns = decode(&bytes).unwrap();
        assert_eq!(insns.len(), 5);
        assert_eq!(insns[0].opcode, Opcode::LdArg(1));
        assert_eq!(insns[1].opcode, Opcode::LdcI4(42));
        assert_eq!(
            insns[2].opcode,
            Opcode::BranchCmp {
                cmp: Comparison::Ne,
                unsigned: true,
                target: 6
            }
        );
        assert_eq!(insns[4].offset, 6);
    }

    #[test]
    fn switch_targets_are_relative_to_instruction_end() {
        // ldloc.0; switch (2) [+0, +5]; ret ...
        let mut bytes = vec![0x06, 0x45, 2, 0, 0, 0];
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&5i32.to_le_bytes());
        bytes.push(0x2A);
        let insns = decode(&bytes).unwrap();
        assert_eq!(insns[1].opcode, Opcode::Switch(vec![14, 19]));
        assert_eq!(insns[1].size, 13);
    }

    #[test]
    fn prefixed_compares() {
        let insns = decode(&[0xFE, 0x01, 0xFE, 0x03, 0x2A]).unwrap();
        assert_eq!(
            insns[1].opcode,
            Opcode::Compare {
                cmp: Comparison::Gt,
                unsigned: true
            }
        );
    }

    #[test]
    fn unknown_opcode_is_reported_with_offset() {
        let err = decode(&[0x00, 0x24]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownOpcode {
                opcode: 0x24,
                offset: 1
            }
        ));
    }

    #[test]
    fn truncated_operand_is_a_decode_error() {
        let err = decode(&[0x20, 0x01]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn backwards_branch_before_start_is_invalid_flow() {
        let err = decode(&[0x2B, 0x80]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidControlFlow);
    }
}
