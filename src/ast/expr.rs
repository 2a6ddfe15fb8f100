//! Expression trees
//!
//! Expressions are small owned trees; only statements live in the arena.

use crate::metadata::{OperatorKind, PrimitiveType, ResolverContext, Token, TypeSig};
use ordered_float::OrderedFloat;
use smallvec::SmallVec;

/// Index into [`super::MethodContext::locals`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// Literal value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    /// C# binding strength; higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 13,
            BinaryOp::Add | BinaryOp::Sub => 12,
            BinaryOp::Shl | BinaryOp::Shr => 11,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 10,
            BinaryOp::Eq | BinaryOp::Ne => 9,
            BinaryOp::BitAnd => 8,
            BinaryOp::Xor => 7,
            BinaryOp::BitOr => 6,
            BinaryOp::LogicalAnd => 5,
            BinaryOp::LogicalOr => 4,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Whether `x = x op y` may be written `x op= y`
    pub fn has_compound_form(self) -> bool {
        !self.is_comparison() && !matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    fn negated(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Ne),
            BinaryOp::Ne => Some(BinaryOp::Eq),
            BinaryOp::Lt => Some(BinaryOp::Ge),
            BinaryOp::Ge => Some(BinaryOp::Lt),
            BinaryOp::Gt => Some(BinaryOp::Le),
            BinaryOp::Le => Some(BinaryOp::Gt),
            _ => None,
        }
    }

    /// Operator for a user-defined binary operator method
    pub fn from_operator(kind: OperatorKind) -> Option<BinaryOp> {
        let op = match kind {
            OperatorKind::Addition => BinaryOp::Add,
            OperatorKind::Subtraction => BinaryOp::Sub,
            OperatorKind::Multiply => BinaryOp::Mul,
            OperatorKind::Division => BinaryOp::Div,
            OperatorKind::Modulus => BinaryOp::Rem,
            OperatorKind::BitwiseAnd => BinaryOp::BitAnd,
            OperatorKind::BitwiseOr => BinaryOp::BitOr,
            OperatorKind::ExclusiveOr => BinaryOp::Xor,
            OperatorKind::LeftShift => BinaryOp::Shl,
            OperatorKind::RightShift => BinaryOp::Shr,
            OperatorKind::Equality => BinaryOp::Eq,
            OperatorKind::Inequality => BinaryOp::Ne,
            OperatorKind::LessThan => BinaryOp::Lt,
            OperatorKind::GreaterThan => BinaryOp::Gt,
            OperatorKind::LessThanOrEqual => BinaryOp::Le,
            OperatorKind::GreaterThanOrEqual => BinaryOp::Ge,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }

    pub fn from_operator(kind: OperatorKind) -> Option<UnaryOp> {
        match kind {
            OperatorKind::UnaryNegation => Some(UnaryOp::Neg),
            OperatorKind::LogicalNot => Some(UnaryOp::Not),
            OperatorKind::OnesComplement => Some(UnaryOp::BitNot),
            _ => None,
        }
    }
}

/// Type as written in the output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Primitive(PrimitiveType),
    Named { token: Token, name: String },
}

impl TypeRef {
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Primitive(p) => p.keyword(),
            TypeRef::Named { name, .. } => name,
        }
    }

    pub fn to_sig(&self) -> TypeSig {
        match self {
            TypeRef::Primitive(p) => TypeSig::Primitive(*p),
            TypeRef::Named { token, .. } => TypeSig::Named(*token),
        }
    }

    pub fn from_sig(sig: &TypeSig, resolver: &ResolverContext<'_>) -> TypeRef {
        match sig {
            TypeSig::Primitive(p) => TypeRef::Primitive(*p),
            TypeSig::Named(token) => TypeRef::Named {
                token: *token,
                name: resolver.type_name(sig),
            },
        }
    }
}

/// Resolved callee
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub token: Token,
    pub name: String,
    pub declaring_type: Option<String>,
    pub return_type: Option<TypeSig>,
    /// Set when the method implements a user-defined operator
    pub operator: Option<OperatorKind>,
    /// Parameter positions declared `out`
    pub out_params: SmallVec<[usize; 1]>,
}

/// Resolved field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub token: Token,
    pub name: String,
    pub declaring_type: Option<String>,
    pub ty: Option<TypeSig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(Constant),
    Local(LocalId),
    /// Parameter by declared position (excluding `this`)
    Arg(u16),
    This,
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        /// User-defined operator method, if the operator is overloaded
        method: Option<Token>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        method: Option<Token>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    CompoundAssign {
        op: BinaryOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Call {
        method: MethodRef,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    New {
        ctor: MethodRef,
        args: Vec<Expr>,
    },
    NewArray {
        element: TypeRef,
        length: Box<Expr>,
    },
    Field {
        receiver: Option<Box<Expr>>,
        field: FieldRef,
    },
    ArrayElement {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayLength(Box<Expr>),
    /// Managed address of a variable (`ldloca`, `ldflda`)
    AddressOf(Box<Expr>),
    /// `out x` / `out var x` argument
    Out {
        target: Box<Expr>,
        declare: bool,
    },
    Cast {
        ty: TypeRef,
        operand: Box<Expr>,
    },
    As {
        ty: TypeRef,
        operand: Box<Expr>,
    },
    Default(TypeRef),
}

impl Expr {
    pub fn int(value: i64) -> Expr {
        Expr::Const(Constant::Int(value))
    }

    pub fn bool(value: bool) -> Expr {
        Expr::Const(Constant::Bool(value))
    }

    pub fn null() -> Expr {
        Expr::Const(Constant::Null)
    }

    pub fn string(value: impl Into<String>) -> Expr {
        Expr::Const(Constant::String(value.into()))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            method: None,
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn not(operand: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
            method: None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Const(Constant::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Expr::Local(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Expr::Const(Constant::Null))
    }

    /// Logical negation, flipping comparisons and applying De Morgan
    pub fn negate(self) -> Expr {
        match self {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
                method: None,
            } => *operand,
            Expr::Const(Constant::Bool(b)) => Expr::bool(!b),
            Expr::Binary {
                op,
                left,
                right,
                method: None,
            } if op.negated().is_some() => Expr::Binary {
                op: op.negated().unwrap_or(op),
                left,
                right,
                method: None,
            },
            Expr::Binary {
                op: BinaryOp::LogicalAnd,
                left,
                right,
                method: None,
            } => Expr::binary(BinaryOp::LogicalOr, left.negate(), right.negate()),
            Expr::Binary {
                op: BinaryOp::LogicalOr,
                left,
                right,
                method: None,
            } => Expr::binary(BinaryOp::LogicalAnd, left.negate(), right.negate()),
            other => Expr::not(other),
        }
    }

    /// Direct sub-expressions
    pub fn children(&self) -> SmallVec<[&Expr; 4]> {
        let mut out = SmallVec::new();
        match self {
            Expr::Const(_) | Expr::Local(_) | Expr::Arg(_) | Expr::This | Expr::Default(_) => {}
            Expr::Binary { left, right, .. } => {
                out.push(left.as_ref());
                out.push(right.as_ref());
            }
            Expr::Unary { operand, .. }
            | Expr::Cast { operand, .. }
            | Expr::As { operand, .. } => out.push(operand.as_ref()),
            Expr::Assign { target, value } | Expr::CompoundAssign { target, value, .. } => {
                out.push(target.as_ref());
                out.push(value.as_ref());
            }
            Expr::IncDec { target, .. } | Expr::Out { target, .. } => out.push(target.as_ref()),
            Expr::Call { receiver, args, .. } => {
                if let Some(r) = receiver {
                    out.push(r.as_ref());
                }
                out.extend(args.iter());
            }
            Expr::New { args, .. } => out.extend(args.iter()),
            Expr::NewArray { length, .. } => out.push(length.as_ref()),
            Expr::Field { receiver, .. } => {
                if let Some(r) = receiver {
                    out.push(r.as_ref());
                }
            }
            Expr::ArrayElement { array, index } => {
                out.push(array.as_ref());
                out.push(index.as_ref());
            }
            Expr::ArrayLength(inner) | Expr::AddressOf(inner) => out.push(inner.as_ref()),
        }
        out
    }

    /// Direct sub-expressions, mutably
    pub fn children_mut(&mut self) -> SmallVec<[&mut Expr; 4]> {
        let mut out = SmallVec::new();
        match self {
            Expr::Const(_) | Expr::Local(_) | Expr::Arg(_) | Expr::This | Expr::Default(_) => {}
            Expr::Binary { left, right, .. } => {
                out.push(left.as_mut());
                out.push(right.as_mut());
            }
            Expr::Unary { operand, .. }
            | Expr::Cast { operand, .. }
            | Expr::As { operand, .. } => out.push(operand.as_mut()),
            Expr::Assign { target, value } | Expr::CompoundAssign { target, value, .. } => {
                out.push(target.as_mut());
                out.push(value.as_mut());
            }
            Expr::IncDec { target, .. } | Expr::Out { target, .. } => out.push(target.as_mut()),
            Expr::Call { receiver, args, .. } => {
                if let Some(r) = receiver {
                    out.push(r.as_mut());
                }
                out.extend(args.iter_mut());
            }
            Expr::New { args, .. } => out.extend(args.iter_mut()),
            Expr::NewArray { length, .. } => out.push(length.as_mut()),
            Expr::Field { receiver, .. } => {
                if let Some(r) = receiver {
                    out.push(r.as_mut());
                }
            }
            Expr::ArrayElement { array, index } => {
                out.push(array.as_mut());
                out.push(index.as_mut());
            }
            Expr::ArrayLength(inner) | Expr::AddressOf(inner) => out.push(inner.as_mut()),
        }
        out
    }

    /// Pre-order visit
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Post-order in-place rewrite
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        for child in self.children_mut() {
            child.walk_mut(f);
        }
        f(self);
    }

    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|c| c.any(pred))
    }

    /// Whether evaluating the expression can have observable effects
    pub fn has_side_effects(&self) -> bool {
        self.any(&|e| {
            matches!(
                e,
                Expr::Call { .. }
                    | Expr::New { .. }
                    | Expr::NewArray { .. }
                    | Expr::Assign { .. }
                    | Expr::CompoundAssign { .. }
                    | Expr::IncDec { .. }
            )
        })
    }

    /// Locals, parameters, `this`, constants and field/element chains over them.
    ///
    /// Such expressions may be evaluated twice without changing behaviour.
    pub fn is_side_effect_free_target(&self) -> bool {
        match self {
            Expr::Local(_) | Expr::Arg(_) | Expr::This | Expr::Const(_) => true,
            Expr::Field { receiver: None, .. } => true,
            Expr::Field {
                receiver: Some(r), ..
            } => r.is_side_effect_free_target(),
            Expr::ArrayElement { array, index } => {
                array.is_side_effect_free_target() && index.is_side_effect_free_target()
            }
            _ => false,
        }
    }

    pub fn reads_local(&self, local: LocalId) -> bool {
        self.any(&|e| matches!(e, Expr::Local(id) if *id == local))
    }

    /// Number of occurrences of a local
    pub fn count_local(&self, local: LocalId) -> usize {
        let mut count = 0;
        self.walk(&mut |e| {
            if matches!(e, Expr::Local(id) if *id == local) {
                count += 1;
            }
        });
        count
    }

    /// Replace every occurrence of a local with a copy of `with`
    pub fn substitute_local(&mut self, local: LocalId, with: &Expr) {
        self.walk_mut(&mut |e| {
            if matches!(e, Expr::Local(id) if *id == local) {
                *e = with.clone();
            }
        });
    }

    /// Strip `x - k` / `x + k` offsets applied before a jump table
    pub fn split_offset(&self) -> (&Expr, i64) {
        match self {
            Expr::Binary {
                op: BinaryOp::Sub,
                left,
                right,
                method: None,
            } => match right.as_int() {
                Some(k) => (left.as_ref(), k),
                None => (self, 0),
            },
            Expr::Binary {
                op: BinaryOp::Add,
                left,
                right,
                method: None,
            } => match right.as_int() {
                Some(k) => (left.as_ref(), k.wrapping_neg()),
                None => (self, 0),
            },
            _ => (self, 0),
        }
    }

    /// Assigned target and value, when this is a plain assignment
    pub fn as_assignment(&self) -> Option<(&Expr, &Expr)> {
        match self {
            Expr::Assign { target, value } => Some((target, value)),
            _ => None,
        }
    }
}
