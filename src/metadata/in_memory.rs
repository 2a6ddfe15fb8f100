//! JSON-backed metadata source
//!
//! Used by the CLI and the test-suite. The document lists types, methods (with
//! raw IL bytes), fields and user strings; an index by token is rebuilt after
//! loading and never mutated afterwards.

use super::types::{type_symbol_is, ConversionKind, ConversionOperator, KnownType, TypeResolver};
use super::{
    ExceptionRegion, FieldSymbol, InstructionStream, LocalSig, MetadataSource, MethodId,
    MethodSymbol, Symbol, Token, TypeSig, TypeSymbol,
};
use crate::error::{Error, Result};
use crate::il::decoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Raw method body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodBody {
    pub il: Vec<u8>,
    #[serde(default)]
    pub locals: Vec<LocalSig>,
    #[serde(default)]
    pub exception_regions: Vec<ExceptionRegion>,
}

/// Method symbol plus its optional body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDef {
    #[serde(flatten)]
    pub symbol: MethodSymbol,
    #[serde(default)]
    pub body: Option<MethodBody>,
}

/// A user string literal (`ldstr` operand)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserString {
    pub token: Token,
    pub value: String,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Type(usize),
    Method(usize),
    Field(usize),
    String(usize),
}

/// In-memory metadata document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryMetadata {
    #[serde(default)]
    pub types: Vec<TypeSymbol>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    #[serde(default)]
    pub fields: Vec<FieldSymbol>,
    #[serde(default)]
    pub strings: Vec<UserString>,
    #[serde(skip)]
    index: HashMap<Token, Slot>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a metadata document
    pub fn from_json(text: &str) -> Result<Self> {
        let mut metadata: InMemoryMetadata = serde_json::from_str(text)?;
        metadata.rebuild_index();
        log::debug!(
            "Loaded metadata: {} types, {} methods, {} fields, {} strings",
            metadata.types.len(),
            metadata.methods.len(),
            metadata.fields.len(),
            metadata.strings.len()
        );
        Ok(metadata)
    }

    /// Load a metadata document from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize back to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }

    pub fn add_type(&mut self, ty: TypeSymbol) -> Token {
        let token = ty.token;
        self.index.insert(token, Slot::Type(self.types.len()));
        self.types.push(ty);
        token
    }

    pub fn add_method(&mut self, method: MethodDef) -> Token {
        let token = method.symbol.token;
        self.index.insert(token, Slot::Method(self.methods.len()));
        self.methods.push(method);
        token
    }

    pub fn add_field(&mut self, field: FieldSymbol) -> Token {
        let token = field.token;
        self.index.insert(token, Slot::Field(self.fields.len()));
        self.fields.push(field);
        token
    }

    pub fn add_string(&mut self, token: Token, value: impl Into<String>) -> Token {
        self.index.insert(token, Slot::String(self.strings.len()));
        self.strings.push(UserString {
            token,
            value: value.into(),
        });
        token
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, ty) in self.types.iter().enumerate() {
            self.index.insert(ty.token, Slot::Type(i));
        }
        for (i, method) in self.methods.iter().enumerate() {
            self.index.insert(method.symbol.token, Slot::Method(i));
        }
        for (i, field) in self.fields.iter().enumerate() {
            self.index.insert(field.token, Slot::Field(i));
        }
        for (i, string) in self.strings.iter().enumerate() {
            self.index.insert(string.token, Slot::String(i));
        }
    }

    fn method_def(&self, method: MethodId) -> Result<&MethodDef> {
        match self.index.get(&Token(method.0)) {
            Some(Slot::Method(i)) => Ok(&self.methods[*i]),
            _ => Err(Error::MissingMethodBody { method: method.0 }),
        }
    }

    fn qualified_name(&self, symbol: &MethodSymbol) -> String {
        let owner = symbol.declaring_type.and_then(|t| match self.index.get(&t) {
            Some(Slot::Type(i)) => Some(self.types[*i].name.clone()),
            _ => None,
        });
        match owner {
            Some(owner) => format!("{}::{}", owner, symbol.name),
            None => symbol.name.clone(),
        }
    }
}

impl MetadataSource for InMemoryMetadata {
    fn get_method_body(&self, method: MethodId) -> Result<InstructionStream> {
        let def = self.method_def(method)?;
        let body = def
            .body
            .as_ref()
            .ok_or(Error::MissingMethodBody { method: method.0 })?;
        let instructions = decoder::decode(&body.il)?;
        Ok(InstructionStream {
            method,
            name: self.qualified_name(&def.symbol),
            instructions,
            locals: body.locals.clone(),
            parameters: def.symbol.parameters.clone(),
            has_this: def.symbol.has_this,
            returns_value: def.symbol.returns_value(),
            code_size: body.il.len() as u32,
        })
    }

    fn get_exception_regions(&self, method: MethodId) -> Result<Vec<ExceptionRegion>> {
        let def = self.method_def(method)?;
        Ok(def
            .body
            .as_ref()
            .map(|b| b.exception_regions.clone())
            .unwrap_or_default())
    }

    fn resolve_symbol(&self, token: Token) -> Result<Symbol> {
        match self.index.get(&token) {
            Some(Slot::Type(i)) => Ok(Symbol::Type(self.types[*i].clone())),
            Some(Slot::Method(i)) => Ok(Symbol::Method(self.methods[*i].symbol.clone())),
            Some(Slot::Field(i)) => Ok(Symbol::Field(self.fields[*i].clone())),
            Some(Slot::String(i)) => Ok(Symbol::String(self.strings[*i].value.clone())),
            None => Err(Error::MetadataResolution { token: token.0 }),
        }
    }

    fn method_ids(&self) -> Vec<MethodId> {
        self.methods
            .iter()
            .filter(|m| m.body.is_some())
            .map(|m| MethodId(m.symbol.token.0))
            .collect()
    }
}

impl TypeResolver for InMemoryMetadata {
    fn is_known_type(&self, symbol: &Symbol, known: KnownType) -> bool {
        match symbol {
            Symbol::Type(ty) => type_symbol_is(ty, known),
            _ => false,
        }
    }

    fn get_conversion_operators(&self, ty: &TypeSig) -> Vec<ConversionOperator> {
        let TypeSig::Named(owner) = ty else {
            return Vec::new();
        };
        self.methods
            .iter()
            .filter(|m| m.symbol.declaring_type == Some(*owner) && !m.symbol.has_this)
            .filter_map(|m| {
                let kind = match m.symbol.name.as_str() {
                    "op_Implicit" => ConversionKind::Implicit,
                    "op_Explicit" => ConversionKind::Explicit,
                    _ => return None,
                };
                let source = m.symbol.parameters.first()?.ty.clone();
                let target = m.symbol.return_type.clone()?;
                Some(ConversionOperator {
                    method: m.symbol.token,
                    kind,
                    source,
                    target,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ParamSig, PrimitiveType};

    fn sample() -> InMemoryMetadata {
        let mut metadata = InMemoryMetadata::new();
        let owner = metadata.add_type(TypeSymbol {
            token: Token::new(Token::TYPE_DEF, 1),
            namespace: "Demo".into(),
            name: "Meters".into(),
            is_value_type: true,
        });
        metadata.add_method(MethodDef {
            symbol: MethodSymbol {
                token: Token::new(Token::METHOD_DEF, 1),
                name: "op_Explicit".into(),
                declaring_type: Some(owner),
                has_this: false,
                parameters: vec![ParamSig {
                    name: Some("m".into()),
                    ty: TypeSig::Named(owner),
                    is_out: false,
                }],
                return_type: Some(TypeSig::Primitive(PrimitiveType::I4)),
            },
            body: None,
        });
        metadata.add_string(Token::new(Token::USER_STRING, 1), "hello");
        metadata
    }

    #[test]
    fn resolves_strings_and_methods() {
        let metadata = sample();
        assert_eq!(
            metadata
                .resolve_symbol(Token::new(Token::USER_STRING, 1))
                .unwrap(),
            Symbol::String("hello".into())
        );
        assert!(matches!(
            metadata.resolve_symbol(Token::new(Token::METHOD_DEF, 1)),
            Ok(Symbol::Method(_))
        ));
        assert!(metadata.resolve_symbol(Token(0x0A00_0099)).is_err());
    }

    #[test]
    fn finds_conversion_operators_on_owner() {
        let metadata = sample();
        let ops =
            metadata.get_conversion_operators(&TypeSig::Named(Token::new(Token::TYPE_DEF, 1)));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, ConversionKind::Explicit);
        assert_eq!(ops[0].target, TypeSig::Primitive(PrimitiveType::I4));
    }

    #[test]
    fn json_round_trip_rebuilds_index() {
        let metadata = sample();
        let text = metadata.to_json().unwrap();
        let reloaded = InMemoryMetadata::from_json(&text).unwrap();
        assert!(reloaded
            .resolve_symbol(Token::new(Token::TYPE_DEF, 1))
            .is_ok());
        assert!(reloaded.method_ids().is_empty());
    }
}
