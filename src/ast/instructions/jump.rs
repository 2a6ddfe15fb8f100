//! Jump instruction handlers
//!
//! Jumps produce the block's [`Terminator`]. Conditional branches always put
//! the branch target on the `then` edge and the fall-through on the `else`
//! edge; `brfalse` and friends negate their condition to keep that shape.

use super::variables::coerce;
use super::{BlockLifter, InstructionResult};
use crate::ast::{BinaryOp, Constant, Expr};
use crate::cfg::Terminator;
use crate::error::Result;
use crate::il::{Comparison, Offset};
use crate::metadata::{PrimitiveType, TypeSig};

/// Trait providing terminator builder methods
pub trait JumpHelpers {
    /// `brtrue` / `brfalse`
    fn build_truthiness_jump(
        &mut self,
        target: Offset,
        fallthrough: Offset,
        jump_if_true: bool,
    ) -> Result<InstructionResult>;

    /// `beq`, `blt.un`, ...
    fn build_comparison_jump(
        &mut self,
        cmp: Comparison,
        unsigned: bool,
        target: Offset,
        fallthrough: Offset,
    ) -> Result<InstructionResult>;

    /// `switch`
    fn build_jump_table(&mut self, targets: &[Offset], fallthrough: Offset) -> Result<InstructionResult>;

    /// `ret`
    fn build_return(&mut self) -> Result<InstructionResult>;
}

impl BlockLifter<'_, '_> {
    /// The test `brtrue` performs on a value: non-zero or non-null
    pub(super) fn truthiness(&self, value: Expr) -> Expr {
        if let Some(v) = value.as_int() {
            return Expr::bool(v != 0);
        }
        if value.is_null() {
            return Expr::bool(false);
        }
        if self.is_boolean(&value) {
            return value;
        }
        let zero = match self.context.expr_type(&value) {
            Some(TypeSig::Primitive(p)) if p.is_integral() || matches!(p, PrimitiveType::IntPtr | PrimitiveType::UIntPtr) => {
                Expr::int(0)
            }
            Some(TypeSig::Primitive(PrimitiveType::String | PrimitiveType::Object)) => Expr::null(),
            Some(TypeSig::Named(token)) => match self.resolver.type_symbol(token) {
                Ok(ty) if ty.is_value_type => Expr::int(0),
                _ => Expr::null(),
            },
            Some(_) => return value,
            None => match value {
                Expr::Binary { op, .. } if !op.is_comparison() => Expr::int(0),
                Expr::New { .. } | Expr::As { .. } | Expr::NewArray { .. } => Expr::null(),
                _ => return value,
            },
        };
        Expr::binary(BinaryOp::Ne, value, zero)
    }

    fn branch(&self, condition: Expr, target: Offset, fallthrough: Offset) -> Result<InstructionResult> {
        let then_target = self.target(target)?;
        let else_target = self.target(fallthrough)?;
        let terminator = match condition {
            Expr::Const(Constant::Bool(taken)) => {
                Terminator::Goto(if taken { then_target } else { else_target })
            }
            condition => Terminator::Branch {
                condition,
                then_target,
                else_target,
            },
        };
        Ok(InstructionResult::Terminator(terminator))
    }
}

impl JumpHelpers for BlockLifter<'_, '_> {
    fn build_truthiness_jump(
        &mut self,
        target: Offset,
        fallthrough: Offset,
        jump_if_true: bool,
    ) -> Result<InstructionResult> {
        let value = self.pop()?;
        let condition = self.truthiness(value);
        let condition = if jump_if_true {
            condition
        } else {
            condition.negate()
        };
        self.branch(condition, target, fallthrough)
    }

    fn build_comparison_jump(
        &mut self,
        cmp: Comparison,
        unsigned: bool,
        target: Offset,
        fallthrough: Offset,
    ) -> Result<InstructionResult> {
        let right = self.pop()?;
        let left = self.pop()?;
        let condition = match cmp {
            // `bne.un` is plain inequality; `.un` only matters for ordering
            Comparison::Eq | Comparison::Ne => Expr::binary(super::arithmetic::comparison_op(cmp), left, right),
            _ => self.compare(cmp, unsigned, left, right),
        };
        self.branch(condition, target, fallthrough)
    }

    fn build_jump_table(&mut self, targets: &[Offset], fallthrough: Offset) -> Result<InstructionResult> {
        let value = self.pop()?;
        let targets = targets
            .iter()
            .map(|t| self.target(*t))
            .collect::<Result<Vec<_>>>()?;
        let default = self.target(fallthrough)?;
        Ok(InstructionResult::Terminator(Terminator::JumpTable {
            value,
            targets,
            default,
        }))
    }

    fn build_return(&mut self) -> Result<InstructionResult> {
        let value = if self.context.returns_value {
            let value = self.pop()?;
            Some(coerce(value, self.return_type.as_ref()))
        } else {
            None
        };
        Ok(InstructionResult::Terminator(Terminator::Return(value)))
    }
}
