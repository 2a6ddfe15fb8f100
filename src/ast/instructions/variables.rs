//! Argument and local variable helpers
//!
//! `this` is argument zero of instance methods; every other argument is
//! addressed by its declared position.

use super::BlockLifter;
use crate::ast::{Constant, Expr};
use crate::error::{Error, Result};
use crate::metadata::{PrimitiveType, TypeSig};

/// Trait providing variable load/store helper methods
pub trait VariableHelpers {
    /// `ldarg`: push `this` or a parameter
    fn load_arg(&mut self, index: u16) -> Result<()>;

    /// `ldarga`: push `&arg`
    fn load_arg_address(&mut self, index: u16) -> Result<()>;

    /// `starg`: emit `arg = value;`
    fn store_arg(&mut self, index: u16) -> Result<()>;

    /// `ldloc`: push a local
    fn load_local(&mut self, index: u16) -> Result<()>;

    /// `ldloca`: push `&local`
    fn load_local_address(&mut self, index: u16) -> Result<()>;

    /// `stloc`: emit `local = value;`
    fn store_local(&mut self, index: u16) -> Result<()>;
}

impl BlockLifter<'_, '_> {
    fn arg_expr(&self, index: u16) -> Result<Expr> {
        if self.context.has_this {
            if index == 0 {
                return Ok(Expr::This);
            }
            return self.declared_arg(index - 1);
        }
        self.declared_arg(index)
    }

    fn declared_arg(&self, position: u16) -> Result<Expr> {
        if (position as usize) < self.context.parameters.len() {
            Ok(Expr::Arg(position))
        } else {
            Err(Error::invalid_flow(
                self.offset,
                format!("argument {} is not declared", position),
            ))
        }
    }

    fn local_expr(&self, index: u16) -> Result<Expr> {
        self.context
            .il_local(index)
            .map(Expr::Local)
            .ok_or_else(|| Error::invalid_flow(self.offset, format!("local {} is not declared", index)))
    }
}

/// Integer constants stored into `bool` (or `char`) slots are written as such
pub(super) fn coerce(value: Expr, ty: Option<&TypeSig>) -> Expr {
    match (ty, value) {
        (Some(TypeSig::Primitive(PrimitiveType::Bool)), Expr::Const(Constant::Int(v))) if v == 0 || v == 1 => {
            Expr::bool(v == 1)
        }
        (_, value) => value,
    }
}

impl VariableHelpers for BlockLifter<'_, '_> {
    fn load_arg(&mut self, index: u16) -> Result<()> {
        let arg = self.arg_expr(index)?;
        self.push(arg);
        Ok(())
    }

    fn load_arg_address(&mut self, index: u16) -> Result<()> {
        let arg = self.arg_expr(index)?;
        self.push(Expr::AddressOf(Box::new(arg)));
        Ok(())
    }

    fn store_arg(&mut self, index: u16) -> Result<()> {
        let target = self.arg_expr(index)?;
        let value = self.pop()?;
        let ty = self.context.expr_type(&target);
        self.emit(Expr::assign(target, coerce(value, ty.as_ref())));
        Ok(())
    }

    fn load_local(&mut self, index: u16) -> Result<()> {
        let local = self.local_expr(index)?;
        self.push(local);
        Ok(())
    }

    fn load_local_address(&mut self, index: u16) -> Result<()> {
        let local = self.local_expr(index)?;
        self.push(Expr::AddressOf(Box::new(local)));
        Ok(())
    }

    fn store_local(&mut self, index: u16) -> Result<()> {
        let target = self.local_expr(index)?;
        let value = self.pop()?;
        let ty = self.context.expr_type(&target);
        self.emit(Expr::assign(target, coerce(value, ty.as_ref())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_slots_take_bool_constants() {
        let ty = TypeSig::Primitive(PrimitiveType::Bool);
        assert_eq!(coerce(Expr::int(1), Some(&ty)), Expr::bool(true));
        assert_eq!(coerce(Expr::int(2), Some(&ty)), Expr::int(2));
        assert_eq!(coerce(Expr::int(0), None), Expr::int(0));
    }
}
