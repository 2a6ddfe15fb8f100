//! Type facts and the resolver context
//!
//! The structurer asks narrow questions ("is this local a string?", "is this
//! call a user-defined operator?") instead of walking a type system.

use super::{
    FieldSymbol, MetadataSource, MethodSymbol, PrimitiveType, Symbol, Token, TypeSig, TypeSymbol,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Framework types the core needs to recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownType {
    String,
    Object,
    Int32,
    Boolean,
    Nullable,
    IDisposable,
    IEnumerator,
    /// Compiler-generated helper class holding `ComputeStringHash`
    PrivateImplementationDetails,
}

impl KnownType {
    /// Full metadata name of the type
    pub fn full_name(self) -> &'static str {
        match self {
            KnownType::String => "System.String",
            KnownType::Object => "System.Object",
            KnownType::Int32 => "System.Int32",
            KnownType::Boolean => "System.Boolean",
            KnownType::Nullable => "System.Nullable`1",
            KnownType::IDisposable => "System.IDisposable",
            KnownType::IEnumerator => "System.Collections.IEnumerator",
            KnownType::PrivateImplementationDetails => "<PrivateImplementationDetails>",
        }
    }

    fn primitive(self) -> Option<PrimitiveType> {
        match self {
            KnownType::String => Some(PrimitiveType::String),
            KnownType::Object => Some(PrimitiveType::Object),
            KnownType::Int32 => Some(PrimitiveType::I4),
            KnownType::Boolean => Some(PrimitiveType::Bool),
            _ => None,
        }
    }
}

/// Implicit or explicit user-defined conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionKind {
    Implicit,
    Explicit,
}

/// A user-defined conversion operator declared on a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOperator {
    pub method: Token,
    pub kind: ConversionKind,
    pub source: TypeSig,
    pub target: TypeSig,
}

/// Operator implemented by a specially named static method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Addition,
    Subtraction,
    Multiply,
    Division,
    Modulus,
    BitwiseAnd,
    BitwiseOr,
    ExclusiveOr,
    LeftShift,
    RightShift,
    Equality,
    Inequality,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    UnaryNegation,
    LogicalNot,
    OnesComplement,
    Increment,
    Decrement,
    Conversion(ConversionKind),
}

impl OperatorKind {
    /// Map an `op_*` method name to the operator it implements
    pub fn from_method_name(name: &str) -> Option<Self> {
        let kind = match name {
            "op_Addition" => OperatorKind::Addition,
            "op_Subtraction" => OperatorKind::Subtraction,
            "op_Multiply" => OperatorKind::Multiply,
            "op_Division" => OperatorKind::Division,
            "op_Modulus" => OperatorKind::Modulus,
            "op_BitwiseAnd" => OperatorKind::BitwiseAnd,
            "op_BitwiseOr" => OperatorKind::BitwiseOr,
            "op_ExclusiveOr" => OperatorKind::ExclusiveOr,
            "op_LeftShift" => OperatorKind::LeftShift,
            "op_RightShift" => OperatorKind::RightShift,
            "op_Equality" => OperatorKind::Equality,
            "op_Inequality" => OperatorKind::Inequality,
            "op_LessThan" => OperatorKind::LessThan,
            "op_GreaterThan" => OperatorKind::GreaterThan,
            "op_LessThanOrEqual" => OperatorKind::LessThanOrEqual,
            "op_GreaterThanOrEqual" => OperatorKind::GreaterThanOrEqual,
            "op_UnaryNegation" => OperatorKind::UnaryNegation,
            "op_LogicalNot" => OperatorKind::LogicalNot,
            "op_OnesComplement" => OperatorKind::OnesComplement,
            "op_Increment" => OperatorKind::Increment,
            "op_Decrement" => OperatorKind::Decrement,
            "op_Implicit" => OperatorKind::Conversion(ConversionKind::Implicit),
            "op_Explicit" => OperatorKind::Conversion(ConversionKind::Explicit),
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            OperatorKind::UnaryNegation
                | OperatorKind::LogicalNot
                | OperatorKind::OnesComplement
                | OperatorKind::Increment
                | OperatorKind::Decrement
                | OperatorKind::Conversion(_)
        )
    }
}

/// Oracle for type facts
pub trait TypeResolver: Sync {
    /// Whether `symbol` names the given framework type
    fn is_known_type(&self, symbol: &Symbol, known: KnownType) -> bool;

    /// Conversion operators declared on `ty` (either direction)
    fn get_conversion_operators(&self, ty: &TypeSig) -> Vec<ConversionOperator>;

    /// Operator implemented by a method, if it is a user-defined operator
    fn operator_kind(&self, method: &MethodSymbol) -> Option<OperatorKind> {
        if method.has_this {
            return None;
        }
        OperatorKind::from_method_name(&method.name)
    }
}

/// Name-based check shared by resolver implementations
pub fn type_symbol_is(ty: &TypeSymbol, known: KnownType) -> bool {
    ty.full_name() == known.full_name()
}

/// Explicitly scoped bundle of the two read-only collaborators.
///
/// Cheap to copy; each method reconstruction receives its own copy.
#[derive(Clone, Copy)]
pub struct ResolverContext<'a> {
    pub metadata: &'a dyn MetadataSource,
    pub types: &'a dyn TypeResolver,
}

impl<'a> ResolverContext<'a> {
    pub fn new(metadata: &'a dyn MetadataSource, types: &'a dyn TypeResolver) -> Self {
        Self { metadata, types }
    }

    /// Resolve a token that must name a method
    pub fn method(&self, token: Token) -> Result<MethodSymbol> {
        match self.metadata.resolve_symbol(token)? {
            Symbol::Method(method) => Ok(method),
            _ => Err(Error::MetadataResolution { token: token.0 }),
        }
    }

    /// Resolve a token that must name a field
    pub fn field(&self, token: Token) -> Result<FieldSymbol> {
        match self.metadata.resolve_symbol(token)? {
            Symbol::Field(field) => Ok(field),
            _ => Err(Error::MetadataResolution { token: token.0 }),
        }
    }

    /// Resolve a token that must name a type
    pub fn type_symbol(&self, token: Token) -> Result<TypeSymbol> {
        match self.metadata.resolve_symbol(token)? {
            Symbol::Type(ty) => Ok(ty),
            _ => Err(Error::MetadataResolution { token: token.0 }),
        }
    }

    /// Resolve a user-string token
    pub fn user_string(&self, token: Token) -> Result<String> {
        match self.metadata.resolve_symbol(token)? {
            Symbol::String(value) => Ok(value),
            _ => Err(Error::MetadataResolution { token: token.0 }),
        }
    }

    /// Whether a signature type is the given framework type
    pub fn type_is(&self, ty: &TypeSig, known: KnownType) -> bool {
        match ty {
            TypeSig::Primitive(p) => known.primitive() == Some(*p),
            TypeSig::Named(token) => match self.metadata.resolve_symbol(*token) {
                Ok(symbol) => self.types.is_known_type(&symbol, known),
                Err(_) => false,
            },
        }
    }

    /// Whether a method is declared on the given framework type
    pub fn declared_on(&self, method: &MethodSymbol, known: KnownType) -> bool {
        match method.declaring_type {
            Some(token) => self.type_is(&TypeSig::Named(token), known),
            None => false,
        }
    }

    /// Display name of a type signature
    pub fn type_name(&self, ty: &TypeSig) -> String {
        match ty {
            TypeSig::Primitive(p) => p.keyword().to_string(),
            TypeSig::Named(token) => match self.metadata.resolve_symbol(*token) {
                Ok(Symbol::Type(t)) => t.name.clone(),
                _ => format!("T{}", token),
            },
        }
    }

    /// Display name of the type declaring a member
    pub fn declaring_type_name(&self, declaring: Option<Token>) -> Option<String> {
        let token = declaring?;
        match self.metadata.resolve_symbol(token) {
            Ok(Symbol::Type(t)) => Some(t.name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_names_map_to_kinds() {
        assert_eq!(
            OperatorKind::from_method_name("op_Addition"),
            Some(OperatorKind::Addition)
        );
        assert_eq!(
            OperatorKind::from_method_name("op_Explicit"),
            Some(OperatorKind::Conversion(ConversionKind::Explicit))
        );
        assert_eq!(OperatorKind::from_method_name("Add"), None);
        assert!(OperatorKind::Increment.is_unary());
        assert!(!OperatorKind::Equality.is_unary());
    }
}
