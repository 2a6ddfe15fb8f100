//! Arithmetic, conversion and comparison helpers
//!
//! Unsigned IL operations have no operator of their own in C#; they are
//! written as the signed operator over an unsigned cast of the left operand.

use super::BlockLifter;
use crate::ast::{BinaryOp, Constant, Expr, TypeRef, UnaryOp};
use crate::error::Result;
use crate::il::{ArithOp, Comparison, ConvKind, Opcode};
use crate::metadata::{PrimitiveType, TypeSig};

/// Trait providing arithmetic operation helper methods
pub trait ArithmeticHelpers {
    /// `add` .. `shr.un`
    fn create_binary_operation(&mut self, op: ArithOp) -> Result<()>;

    /// `neg` / `not`
    fn create_unary_operation(&mut self, opcode: &Opcode) -> Result<()>;

    /// `conv.*`
    fn create_conversion(&mut self, kind: ConvKind) -> Result<()>;

    /// `ceq`, `cgt`, `clt` and their `.un` forms
    fn create_comparison(&mut self, cmp: Comparison, unsigned: bool) -> Result<()>;
}

pub(super) fn comparison_op(cmp: Comparison) -> BinaryOp {
    match cmp {
        Comparison::Eq => BinaryOp::Eq,
        Comparison::Ne => BinaryOp::Ne,
        Comparison::Lt => BinaryOp::Lt,
        Comparison::Le => BinaryOp::Le,
        Comparison::Gt => BinaryOp::Gt,
        Comparison::Ge => BinaryOp::Ge,
    }
}

fn conversion_target(kind: ConvKind) -> PrimitiveType {
    match kind {
        ConvKind::I1 => PrimitiveType::I1,
        ConvKind::I2 => PrimitiveType::I2,
        ConvKind::I4 => PrimitiveType::I4,
        ConvKind::I8 => PrimitiveType::I8,
        ConvKind::U1 => PrimitiveType::U1,
        ConvKind::U2 => PrimitiveType::U2,
        ConvKind::U4 => PrimitiveType::U4,
        ConvKind::U8 => PrimitiveType::U8,
        ConvKind::R4 => PrimitiveType::R4,
        ConvKind::R8 => PrimitiveType::R8,
        ConvKind::I => PrimitiveType::IntPtr,
        ConvKind::U => PrimitiveType::UIntPtr,
    }
}

/// Fold a conversion of an integer literal when the value survives it
fn fold_constant(kind: ConvKind, value: i64) -> Option<i64> {
    let fits = match kind {
        ConvKind::I8 | ConvKind::I => true,
        ConvKind::I4 => i32::try_from(value).is_ok(),
        ConvKind::U8 | ConvKind::U | ConvKind::U4 => value >= 0 && (kind != ConvKind::U4 || value <= u32::MAX as i64),
        ConvKind::I1 => i8::try_from(value).is_ok(),
        ConvKind::I2 => i16::try_from(value).is_ok(),
        ConvKind::U1 => u8::try_from(value).is_ok(),
        ConvKind::U2 => u16::try_from(value).is_ok(),
        ConvKind::R4 | ConvKind::R8 => false,
    };
    fits.then_some(value)
}

impl BlockLifter<'_, '_> {
    /// `(uint)value` or `(ulong)value`, unless the value is already unsigned
    /// or floating point
    pub(super) fn as_unsigned(&self, value: Expr) -> Expr {
        let target = match self.context.expr_type(&value) {
            Some(TypeSig::Primitive(
                PrimitiveType::U1
                | PrimitiveType::U2
                | PrimitiveType::U4
                | PrimitiveType::U8
                | PrimitiveType::UIntPtr
                | PrimitiveType::Char
                | PrimitiveType::R4
                | PrimitiveType::R8,
            )) => return value,
            Some(TypeSig::Primitive(PrimitiveType::I8 | PrimitiveType::IntPtr)) => PrimitiveType::U8,
            _ => PrimitiveType::U4,
        };
        Expr::Cast {
            ty: TypeRef::Primitive(target),
            operand: Box::new(value),
        }
    }

    /// Whether a value is a boolean in C# terms
    pub(super) fn is_boolean(&self, value: &Expr) -> bool {
        match value {
            Expr::Binary { op, .. } => {
                op.is_comparison() || matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
            }
            Expr::Unary {
                op: UnaryOp::Not, ..
            } => true,
            _ => matches!(
                self.context.expr_type(value),
                Some(TypeSig::Primitive(PrimitiveType::Bool))
            ),
        }
    }

    /// Comparison of two popped operands, shared by `c*` and `b*` opcodes
    pub(super) fn compare(&self, cmp: Comparison, unsigned: bool, left: Expr, right: Expr) -> Expr {
        match cmp {
            // `x == 0` over a boolean is its negation
            Comparison::Eq if right.as_int() == Some(0) && self.is_boolean(&left) => left.negate(),
            Comparison::Eq if matches!(right, Expr::Const(Constant::Bool(false))) => left.negate(),
            // `cgt.un x, null` is the compiler's `x != null`
            Comparison::Gt if unsigned && right.is_null() => Expr::binary(BinaryOp::Ne, left, right),
            Comparison::Lt | Comparison::Le | Comparison::Gt | Comparison::Ge if unsigned => {
                Expr::binary(comparison_op(cmp), self.as_unsigned(left), right)
            }
            _ => Expr::binary(comparison_op(cmp), left, right),
        }
    }
}

impl ArithmeticHelpers for BlockLifter<'_, '_> {
    fn create_binary_operation(&mut self, op: ArithOp) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let (op, unsigned) = match op {
            ArithOp::Add => (BinaryOp::Add, false),
            ArithOp::Sub => (BinaryOp::Sub, false),
            ArithOp::Mul => (BinaryOp::Mul, false),
            ArithOp::Div => (BinaryOp::Div, false),
            ArithOp::DivUn => (BinaryOp::Div, true),
            ArithOp::Rem => (BinaryOp::Rem, false),
            ArithOp::RemUn => (BinaryOp::Rem, true),
            ArithOp::And => (BinaryOp::BitAnd, false),
            ArithOp::Or => (BinaryOp::BitOr, false),
            ArithOp::Xor => (BinaryOp::Xor, false),
            ArithOp::Shl => (BinaryOp::Shl, false),
            ArithOp::Shr => (BinaryOp::Shr, false),
            ArithOp::ShrUn => (BinaryOp::Shr, true),
        };
        let left = if unsigned { self.as_unsigned(left) } else { left };
        self.push(Expr::binary(op, left, right));
        Ok(())
    }

    fn create_unary_operation(&mut self, opcode: &Opcode) -> Result<()> {
        let operand = self.pop()?;
        let op = match opcode {
            Opcode::Neg => UnaryOp::Neg,
            _ => UnaryOp::BitNot,
        };
        let value = match (op, operand.as_int()) {
            (UnaryOp::Neg, Some(v)) if v != i64::MIN => Expr::int(-v),
            _ => Expr::Unary {
                op,
                operand: Box::new(operand),
                method: None,
            },
        };
        self.push(value);
        Ok(())
    }

    fn create_conversion(&mut self, kind: ConvKind) -> Result<()> {
        let operand = self.pop()?;
        let converted = match &operand {
            Expr::Const(Constant::Int(v)) => fold_constant(kind, *v).map(Expr::int),
            // `ldlen` is native-sized; the `conv.i4` after it is noise
            Expr::ArrayLength(_) if matches!(kind, ConvKind::I4 | ConvKind::I) => Some(operand.clone()),
            _ => None,
        };
        let target = conversion_target(kind);
        let value = converted.unwrap_or_else(|| {
            if self.context.expr_type(&operand) == Some(TypeSig::Primitive(target)) {
                operand
            } else {
                Expr::Cast {
                    ty: TypeRef::Primitive(target),
                    operand: Box::new(operand),
                }
            }
        });
        self.push(value);
        Ok(())
    }

    fn create_comparison(&mut self, cmp: Comparison, unsigned: bool) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let value = self.compare(cmp, unsigned, left, right);
        self.push(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_fold_through_widening_conversions() {
        assert_eq!(fold_constant(ConvKind::I8, -5), Some(-5));
        assert_eq!(fold_constant(ConvKind::U8, -5), None);
        assert_eq!(fold_constant(ConvKind::U1, 255), Some(255));
        assert_eq!(fold_constant(ConvKind::I1, 200), None);
        assert_eq!(fold_constant(ConvKind::R8, 1), None);
    }
}
