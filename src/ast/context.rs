//! Per-method side tables
//!
//! Variable names and origins are kept here, keyed by [`LocalId`], instead of
//! being attached to expression nodes.

use super::expr::{Expr, LocalId};
use crate::metadata::{
    InstructionStream, LocalSig, MethodId, ParamSig, PrimitiveType, TypeSig,
};

/// Where a variable came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    /// IL local slot
    Il(u16),
    /// Value left on the evaluation stack at a block boundary
    StackSlot(usize),
    /// Spill introduced by the lifter
    Temporary,
    /// Exit selector of a loop with several exits
    LoopFlag,
    /// Exception object bound by a catch clause
    Exception,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalInfo {
    pub name: String,
    pub ty: Option<TypeSig>,
    pub kind: LocalKind,
}

/// Locals, parameters and signature facts of the method being rebuilt
#[derive(Debug, Clone)]
pub struct MethodContext {
    pub method: MethodId,
    pub name: String,
    pub locals: Vec<LocalInfo>,
    pub parameters: Vec<ParamSig>,
    pub has_this: bool,
    pub returns_value: bool,
}

impl MethodContext {
    pub fn new(stream: &InstructionStream) -> Self {
        let locals = stream
            .locals
            .iter()
            .enumerate()
            .map(|(i, LocalSig { name, ty })| LocalInfo {
                name: name.clone().unwrap_or_else(|| format!("V_{}", i)),
                ty: Some(ty.clone()),
                kind: LocalKind::Il(i as u16),
            })
            .collect();
        Self {
            method: stream.method,
            name: stream.name.clone(),
            locals,
            parameters: stream.parameters.clone(),
            has_this: stream.has_this,
            returns_value: stream.returns_value,
        }
    }

    /// Id of an IL local slot
    pub fn il_local(&self, index: u16) -> Option<LocalId> {
        if (index as usize) < self.locals.len() {
            Some(LocalId(index as u32))
        } else {
            None
        }
    }

    pub fn local(&self, id: LocalId) -> &LocalInfo {
        &self.locals[id.0 as usize]
    }

    pub fn local_name(&self, id: LocalId) -> &str {
        self.locals
            .get(id.0 as usize)
            .map(|l| l.name.as_str())
            .unwrap_or("?")
    }

    /// Allocate a synthetic variable
    pub fn new_local(&mut self, kind: LocalKind, ty: Option<TypeSig>) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        let name = match kind {
            LocalKind::Il(i) => format!("V_{}", i),
            LocalKind::StackSlot(slot) => format!("S_{}", slot),
            LocalKind::Temporary => format!("tmp{}", id.0),
            LocalKind::LoopFlag => format!("exitFlag{}", id.0),
            LocalKind::Exception => format!("ex{}", id.0),
        };
        self.locals.push(LocalInfo { name, ty, kind });
        id
    }

    pub fn param_name(&self, index: u16) -> String {
        self.parameters
            .get(index as usize)
            .and_then(|p| p.name.clone())
            .unwrap_or_else(|| format!("arg{}", index))
    }

    /// Static type of an expression where it is evident from metadata
    pub fn expr_type(&self, expr: &Expr) -> Option<TypeSig> {
        match expr {
            Expr::Local(id) => self.locals.get(id.0 as usize).and_then(|l| l.ty.clone()),
            Expr::Arg(i) => self.parameters.get(*i as usize).map(|p| p.ty.clone()),
            Expr::Field { field, .. } => field.ty.clone(),
            Expr::Call { method, .. } => method.return_type.clone(),
            Expr::Cast { ty, .. } | Expr::As { ty, .. } | Expr::Default(ty) => Some(ty.to_sig()),
            Expr::Const(super::Constant::String(_)) => {
                Some(TypeSig::Primitive(PrimitiveType::String))
            }
            Expr::Const(super::Constant::Int(_)) => Some(TypeSig::Primitive(PrimitiveType::I4)),
            Expr::Const(super::Constant::Bool(_)) => Some(TypeSig::Primitive(PrimitiveType::Bool)),
            Expr::Binary { op, .. } if op.is_comparison() => {
                Some(TypeSig::Primitive(PrimitiveType::Bool))
            }
            Expr::Unary {
                op: super::UnaryOp::Not,
                ..
            } => Some(TypeSig::Primitive(PrimitiveType::Bool)),
            _ => None,
        }
    }

    /// Whether a variable was introduced by the reconstruction, not the IL
    pub fn is_synthetic(&self, id: LocalId) -> bool {
        !matches!(self.local(id).kind, LocalKind::Il(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MethodId;

    fn stream() -> InstructionStream {
        InstructionStream {
            method: MethodId(1),
            name: "C::M".into(),
            instructions: Vec::new(),
            locals: vec![
                LocalSig {
                    name: Some("count".into()),
                    ty: TypeSig::Primitive(PrimitiveType::I4),
                },
                LocalSig {
                    name: None,
                    ty: TypeSig::Primitive(PrimitiveType::String),
                },
            ],
            parameters: Vec::new(),
            has_this: false,
            returns_value: false,
            code_size: 0,
        }
    }

    #[test]
    fn il_locals_keep_names_and_synthetic_ones_are_appended() {
        let mut ctx = MethodContext::new(&stream());
        assert_eq!(ctx.local_name(LocalId(0)), "count");
        assert_eq!(ctx.local_name(LocalId(1)), "V_1");
        let tmp = ctx.new_local(LocalKind::StackSlot(0), None);
        assert_eq!(tmp, LocalId(2));
        assert_eq!(ctx.local_name(tmp), "S_0");
        assert!(ctx.is_synthetic(tmp));
        assert!(!ctx.is_synthetic(LocalId(0)));
    }

    #[test]
    fn expression_types_come_from_signatures() {
        let ctx = MethodContext::new(&stream());
        assert_eq!(
            ctx.expr_type(&Expr::Local(LocalId(1))),
            Some(TypeSig::Primitive(PrimitiveType::String))
        );
        assert_eq!(ctx.il_local(7), None);
    }
}
