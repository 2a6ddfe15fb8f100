//! Call and constructor helpers

use super::variables::coerce;
use super::{strip_address, BlockLifter};
use crate::ast::{Expr, MethodRef};
use crate::error::Result;
use crate::metadata::{MethodSymbol, PrimitiveType, Token};

/// Trait providing call helper methods
pub trait FunctionHelpers {
    /// `call` / `callvirt`: pushed when the method returns a value,
    /// emitted as a statement otherwise
    fn create_call(&mut self, token: Token) -> Result<()>;

    /// `newobj`
    fn create_new_object(&mut self, token: Token) -> Result<()>;
}

impl BlockLifter<'_, '_> {
    pub(super) fn method_ref(&self, symbol: &MethodSymbol) -> MethodRef {
        MethodRef {
            token: symbol.token,
            name: symbol.name.clone(),
            declaring_type: self.resolver.declaring_type_name(symbol.declaring_type),
            return_type: symbol
                .return_type
                .clone()
                .filter(|t| !t.is_primitive(PrimitiveType::Void)),
            operator: self.resolver.types.operator_kind(symbol),
            out_params: symbol
                .parameters
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_out)
                .map(|(i, _)| i)
                .collect(),
        }
    }

    /// Pop the arguments of `symbol`, writing `out` arguments as such
    fn pop_arguments(&mut self, symbol: &MethodSymbol) -> Result<Vec<Expr>> {
        let args = self.pop_n(symbol.parameters.len())?;
        Ok(args
            .into_iter()
            .zip(&symbol.parameters)
            .map(|(arg, param)| match arg {
                Expr::AddressOf(target) if param.is_out => Expr::Out {
                    target,
                    declare: false,
                },
                arg => coerce(arg, Some(&param.ty)),
            })
            .collect())
    }
}

impl FunctionHelpers for BlockLifter<'_, '_> {
    fn create_call(&mut self, token: Token) -> Result<()> {
        let symbol = self.resolver.method(token)?;
        let args = self.pop_arguments(&symbol)?;
        let receiver = if symbol.has_this {
            Some(Box::new(strip_address(self.pop()?)))
        } else {
            None
        };
        let call = Expr::Call {
            method: self.method_ref(&symbol),
            receiver,
            args,
        };
        if symbol.returns_value() {
            self.push(call);
        } else {
            self.emit(call);
        }
        Ok(())
    }

    fn create_new_object(&mut self, token: Token) -> Result<()> {
        let symbol = self.resolver.method(token)?;
        let args = self.pop_arguments(&symbol)?;
        let ctor = self.method_ref(&symbol);
        self.push(Expr::New { ctor, args });
        Ok(())
    }
}
