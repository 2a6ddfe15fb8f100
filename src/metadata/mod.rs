//! Metadata interfaces
//!
//! The reconstruction core never reads PE files itself. Everything it needs
//! from an assembly comes through [`MetadataSource`] (method bodies, exception
//! regions, symbols) and [`TypeResolver`] (type facts). Both are read-only
//! after load so one instance can serve every in-flight method.

pub mod in_memory;
pub mod types;

pub use in_memory::{InMemoryMetadata, MethodBody, MethodDef};
pub use types::{
    ConversionKind, ConversionOperator, KnownType, OperatorKind, ResolverContext, TypeResolver,
};

use crate::error::Result;
use crate::il::Instruction;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata token (table in the high byte, row in the low 24 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub u32);

impl Token {
    pub const TYPE_REF: u8 = 0x01;
    pub const TYPE_DEF: u8 = 0x02;
    pub const FIELD: u8 = 0x04;
    pub const METHOD_DEF: u8 = 0x06;
    pub const MEMBER_REF: u8 = 0x0A;
    pub const USER_STRING: u8 = 0x70;

    pub fn new(table: u8, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    pub fn table(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn row(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Identifies a method with a body inside one metadata source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Built-in element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Void,
    Bool,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    IntPtr,
    UIntPtr,
    String,
    Object,
}

impl PrimitiveType {
    /// C# keyword for the type
    pub fn keyword(self) -> &'static str {
        match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Char => "char",
            PrimitiveType::I1 => "sbyte",
            PrimitiveType::U1 => "byte",
            PrimitiveType::I2 => "short",
            PrimitiveType::U2 => "ushort",
            PrimitiveType::I4 => "int",
            PrimitiveType::U4 => "uint",
            PrimitiveType::I8 => "long",
            PrimitiveType::U8 => "ulong",
            PrimitiveType::R4 => "float",
            PrimitiveType::R8 => "double",
            PrimitiveType::IntPtr => "nint",
            PrimitiveType::UIntPtr => "nuint",
            PrimitiveType::String => "string",
            PrimitiveType::Object => "object",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveType::Char
                | PrimitiveType::I1
                | PrimitiveType::U1
                | PrimitiveType::I2
                | PrimitiveType::U2
                | PrimitiveType::I4
                | PrimitiveType::U4
                | PrimitiveType::I8
                | PrimitiveType::U8
        )
    }
}

/// Type of a local, parameter, field or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSig {
    Primitive(PrimitiveType),
    Named(Token),
}

impl TypeSig {
    pub fn is_primitive(&self, primitive: PrimitiveType) -> bool {
        matches!(self, TypeSig::Primitive(p) if *p == primitive)
    }
}

/// Local variable slot of a method body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSig {
    #[serde(default)]
    pub name: Option<String>,
    pub ty: TypeSig,
}

/// Method parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSig {
    #[serde(default)]
    pub name: Option<String>,
    pub ty: TypeSig,
    /// Passed by reference and written by the callee before it returns
    #[serde(default)]
    pub is_out: bool,
}

/// Decoded method body as handed to the graph builder
#[derive(Debug, Clone)]
pub struct InstructionStream {
    pub method: MethodId,
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub locals: Vec<LocalSig>,
    pub parameters: Vec<ParamSig>,
    pub has_this: bool,
    pub returns_value: bool,
    /// Size of the IL in bytes
    pub code_size: u32,
}

/// Kind of an exception handler clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionRegionKind {
    Catch { exception_type: Option<Token> },
    Filter { filter_offset: u32 },
    Finally,
    Fault,
}

/// One protected range and its handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub kind: ExceptionRegionKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

impl ExceptionRegion {
    pub fn try_end(&self) -> u32 {
        self.try_offset + self.try_length
    }

    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }

    pub fn protects(&self, offset: u32) -> bool {
        offset >= self.try_offset && offset < self.try_end()
    }

    pub fn handler_contains(&self, offset: u32) -> bool {
        offset >= self.handler_offset && offset < self.handler_end()
    }
}

/// Type definition or reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSymbol {
    pub token: Token,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub is_value_type: bool,
}

impl TypeSymbol {
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// Method definition or reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSymbol {
    pub token: Token,
    pub name: String,
    #[serde(default)]
    pub declaring_type: Option<Token>,
    #[serde(default)]
    pub has_this: bool,
    #[serde(default)]
    pub parameters: Vec<ParamSig>,
    /// `None` for void methods
    #[serde(default)]
    pub return_type: Option<TypeSig>,
}

impl MethodSymbol {
    pub fn returns_value(&self) -> bool {
        !matches!(
            self.return_type,
            None | Some(TypeSig::Primitive(PrimitiveType::Void))
        )
    }
}

/// Field definition or reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSymbol {
    pub token: Token,
    pub name: String,
    #[serde(default)]
    pub declaring_type: Option<Token>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub ty: Option<TypeSig>,
}

/// Result of resolving a metadata token
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Type(TypeSymbol),
    Method(MethodSymbol),
    Field(FieldSymbol),
    String(String),
}

/// Read-only provider of method bodies and symbols
pub trait MetadataSource: Sync {
    /// Decoded instruction stream for a method
    fn get_method_body(&self, method: MethodId) -> Result<InstructionStream>;

    /// Exception clauses of a method, innermost first
    fn get_exception_regions(&self, method: MethodId) -> Result<Vec<ExceptionRegion>>;

    /// Resolve a token appearing in an instruction operand
    fn resolve_symbol(&self, token: Token) -> Result<Symbol>;

    /// Every method that has a body
    fn method_ids(&self) -> Vec<MethodId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_splits_table_and_row() {
        let token = Token::new(Token::METHOD_DEF, 0x12);
        assert_eq!(token.0, 0x0600_0012);
        assert_eq!(token.table(), Token::METHOD_DEF);
        assert_eq!(token.row(), 0x12);
        assert_eq!(token.to_string(), "0x06000012");
    }

    #[test]
    fn exception_region_ranges_are_half_open() {
        let region = ExceptionRegion {
            kind: ExceptionRegionKind::Finally,
            try_offset: 4,
            try_length: 10,
            handler_offset: 14,
            handler_length: 3,
        };
        assert!(region.protects(4));
        assert!(!region.protects(14));
        assert!(region.handler_contains(16));
        assert!(!region.handler_contains(17));
    }
}
