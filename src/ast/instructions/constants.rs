//! Constant loading helpers

use super::BlockLifter;
use crate::ast::{Constant, Expr};
use crate::error::Result;
use crate::metadata::Token;
use ordered_float::OrderedFloat;

/// Trait providing constant helper methods
pub trait ConstantHelpers {
    /// `ldc.r4` / `ldc.r8`
    fn push_float(&mut self, value: f64);

    /// `ldstr`: the user string must resolve
    fn load_string(&mut self, token: Token) -> Result<()>;
}

impl ConstantHelpers for BlockLifter<'_, '_> {
    fn push_float(&mut self, value: f64) {
        self.push(Expr::Const(Constant::Float(OrderedFloat(value))));
    }

    fn load_string(&mut self, token: Token) -> Result<()> {
        let value = self.resolver.user_string(token)?;
        self.push(Expr::string(value));
        Ok(())
    }
}
