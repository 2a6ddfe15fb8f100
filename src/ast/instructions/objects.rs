//! Field, array and type-test helpers

use super::variables::coerce;
use super::{strip_address, BlockLifter};
use crate::ast::{Expr, FieldRef, TypeRef};
use crate::error::Result;
use crate::metadata::Token;

/// Trait providing object and array helper methods
pub trait ObjectHelpers {
    /// `ldfld` / `ldflda`
    fn load_field(&mut self, token: Token, address: bool) -> Result<()>;

    /// `stfld`
    fn store_field(&mut self, token: Token) -> Result<()>;

    /// `ldsfld` / `ldsflda`
    fn load_static_field(&mut self, token: Token, address: bool) -> Result<()>;

    /// `stsfld`
    fn store_static_field(&mut self, token: Token) -> Result<()>;

    /// `newarr`
    fn create_new_array(&mut self, token: Token) -> Result<()>;

    /// `ldelem*` / `ldelema`
    fn load_element(&mut self, address: bool) -> Result<()>;

    /// `stelem*`
    fn store_element(&mut self) -> Result<()>;

    /// `castclass` / `unbox.any` (`as_test == false`) and `isinst`
    fn create_cast(&mut self, token: Token, as_test: bool) -> Result<()>;

    /// `initobj`: `target = default(T);`
    fn init_object(&mut self, token: Token) -> Result<()>;
}

impl BlockLifter<'_, '_> {
    fn field_ref(&self, token: Token) -> Result<FieldRef> {
        let field = self.resolver.field(token)?;
        Ok(FieldRef {
            token,
            declaring_type: self.resolver.declaring_type_name(field.declaring_type),
            name: field.name,
            ty: field.ty,
        })
    }

    pub(super) fn type_ref(&self, token: Token) -> Result<TypeRef> {
        let ty = self.resolver.type_symbol(token)?;
        Ok(TypeRef::Named {
            token,
            name: ty.name,
        })
    }

    fn push_maybe_address(&mut self, value: Expr, address: bool) {
        if address {
            self.push(Expr::AddressOf(Box::new(value)));
        } else {
            self.push(value);
        }
    }
}

impl ObjectHelpers for BlockLifter<'_, '_> {
    fn load_field(&mut self, token: Token, address: bool) -> Result<()> {
        let field = self.field_ref(token)?;
        let receiver = strip_address(self.pop()?);
        let value = Expr::Field {
            receiver: Some(Box::new(receiver)),
            field,
        };
        self.push_maybe_address(value, address);
        Ok(())
    }

    fn store_field(&mut self, token: Token) -> Result<()> {
        let field = self.field_ref(token)?;
        let value = self.pop()?;
        let receiver = strip_address(self.pop()?);
        let value = coerce(value, field.ty.as_ref());
        let target = Expr::Field {
            receiver: Some(Box::new(receiver)),
            field,
        };
        self.emit(Expr::assign(target, value));
        Ok(())
    }

    fn load_static_field(&mut self, token: Token, address: bool) -> Result<()> {
        let field = self.field_ref(token)?;
        self.push_maybe_address(
            Expr::Field {
                receiver: None,
                field,
            },
            address,
        );
        Ok(())
    }

    fn store_static_field(&mut self, token: Token) -> Result<()> {
        let field = self.field_ref(token)?;
        let value = self.pop()?;
        let value = coerce(value, field.ty.as_ref());
        self.emit(Expr::assign(
            Expr::Field {
                receiver: None,
                field,
            },
            value,
        ));
        Ok(())
    }

    fn create_new_array(&mut self, token: Token) -> Result<()> {
        let element = self.type_ref(token)?;
        let length = self.pop()?;
        self.push(Expr::NewArray {
            element,
            length: Box::new(length),
        });
        Ok(())
    }

    fn load_element(&mut self, address: bool) -> Result<()> {
        let index = self.pop()?;
        let array = self.pop()?;
        let element = Expr::ArrayElement {
            array: Box::new(array),
            index: Box::new(index),
        };
        self.push_maybe_address(element, address);
        Ok(())
    }

    fn store_element(&mut self) -> Result<()> {
        let value = self.pop()?;
        let index = self.pop()?;
        let array = self.pop()?;
        let target = Expr::ArrayElement {
            array: Box::new(array),
            index: Box::new(index),
        };
        self.emit(Expr::assign(target, value));
        Ok(())
    }

    fn create_cast(&mut self, token: Token, as_test: bool) -> Result<()> {
        let ty = self.type_ref(token)?;
        let operand = Box::new(self.pop()?);
        self.push(if as_test {
            Expr::As { ty, operand }
        } else {
            Expr::Cast { ty, operand }
        });
        Ok(())
    }

    fn init_object(&mut self, token: Token) -> Result<()> {
        let ty = self.type_ref(token)?;
        let target = strip_address(self.pop()?);
        self.emit(Expr::assign(target, Expr::Default(ty)));
        Ok(())
    }
}
