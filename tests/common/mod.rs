//! Shared helpers for the integration tests: a tiny CIL assembler with
//! symbolic labels and a metadata builder over `InMemoryMetadata`.

#![allow(dead_code)]

use cil_dec_rs::ast::printer::render_method;
use cil_dec_rs::metadata::in_memory::{MethodBody, MethodDef};
use cil_dec_rs::metadata::{
    ExceptionRegion, FieldSymbol, LocalSig, MethodSymbol, ParamSig, PrimitiveType, Token, TypeSig, TypeSymbol,
};
use cil_dec_rs::{Decompiler, DecompilerSettings, InMemoryMetadata, MethodAst, MethodId, ResolverContext};
use std::collections::HashMap;

struct Fixup {
    /// Position of the 4-byte displacement
    at: usize,
    /// Offset the displacement is relative to (end of the instruction)
    next: usize,
    label: &'static str,
}

/// Assembles long-form CIL with forward and backward label references
#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
    labels: HashMap<&'static str, usize>,
    fixups: Vec<Fixup>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&mut self, name: &'static str) -> &mut Self {
        assert!(
            self.labels.insert(name, self.code.len()).is_none(),
            "label {} defined twice",
            name
        );
        self
    }

    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn offset_of(&self, name: &str) -> u32 {
        self.labels[name] as u32
    }

    fn op(&mut self, byte: u8) -> &mut Self {
        self.code.push(byte);
        self
    }

    fn token_op(&mut self, byte: u8, token: Token) -> &mut Self {
        self.code.push(byte);
        self.code.extend_from_slice(&token.0.to_le_bytes());
        self
    }

    fn branch(&mut self, byte: u8, target: &'static str) -> &mut Self {
        self.code.push(byte);
        let at = self.code.len();
        self.code.extend_from_slice(&[0; 4]);
        self.fixups.push(Fixup {
            at,
            next: at + 4,
            label: target,
        });
        self
    }

    pub fn ldarg(&mut self, index: u8) -> &mut Self {
        match index {
            0..=3 => self.op(0x02 + index),
            _ => {
                self.code.extend_from_slice(&[0x0E, index]);
                self
            }
        }
    }

    pub fn ldloc(&mut self, index: u8) -> &mut Self {
        match index {
            0..=3 => self.op(0x06 + index),
            _ => {
                self.code.extend_from_slice(&[0x11, index]);
                self
            }
        }
    }

    pub fn stloc(&mut self, index: u8) -> &mut Self {
        match index {
            0..=3 => self.op(0x0A + index),
            _ => {
                self.code.extend_from_slice(&[0x13, index]);
                self
            }
        }
    }

    pub fn ldc(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=8 => self.op((0x16 + value) as u8),
            v if i8::try_from(v).is_ok() => {
                self.code.extend_from_slice(&[0x1F, v as i8 as u8]);
                self
            }
            v => {
                self.code.push(0x20);
                self.code.extend_from_slice(&v.to_le_bytes());
                self
            }
        }
    }

    pub fn ldnull(&mut self) -> &mut Self {
        self.op(0x14)
    }

    pub fn ldstr(&mut self, token: Token) -> &mut Self {
        self.token_op(0x72, token)
    }

    pub fn call(&mut self, token: Token) -> &mut Self {
        self.token_op(0x28, token)
    }

    pub fn callvirt(&mut self, token: Token) -> &mut Self {
        self.token_op(0x6F, token)
    }

    pub fn newobj(&mut self, token: Token) -> &mut Self {
        self.token_op(0x73, token)
    }

    pub fn ldsfld(&mut self, token: Token) -> &mut Self {
        self.token_op(0x7E, token)
    }

    pub fn stsfld(&mut self, token: Token) -> &mut Self {
        self.token_op(0x80, token)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.op(0x25)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.op(0x26)
    }

    pub fn add(&mut self) -> &mut Self {
        self.op(0x58)
    }

    pub fn sub(&mut self) -> &mut Self {
        self.op(0x59)
    }

    pub fn ret(&mut self) -> &mut Self {
        self.op(0x2A)
    }

    pub fn throw(&mut self) -> &mut Self {
        self.op(0x7A)
    }

    pub fn endfinally(&mut self) -> &mut Self {
        self.op(0xDC)
    }

    pub fn br(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x38, target)
    }

    pub fn brfalse(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x39, target)
    }

    pub fn brtrue(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x3A, target)
    }

    pub fn beq(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x3B, target)
    }

    pub fn bge(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x3C, target)
    }

    pub fn bgt(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x3D, target)
    }

    pub fn blt(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x3F, target)
    }

    pub fn bne(&mut self, target: &'static str) -> &mut Self {
        self.branch(0x40, target)
    }

    pub fn leave(&mut self, target: &'static str) -> &mut Self {
        self.branch(0xDD, target)
    }

    pub fn switch(&mut self, targets: &[&'static str]) -> &mut Self {
        self.code.push(0x45);
        self.code
            .extend_from_slice(&(targets.len() as u32).to_le_bytes());
        let table = self.code.len();
        let next = table + 4 * targets.len();
        for (i, target) in targets.iter().enumerate() {
            self.code.extend_from_slice(&[0; 4]);
            self.fixups.push(Fixup {
                at: table + 4 * i,
                next,
                label: target,
            });
        }
        self
    }

    /// Raw bytes, e.g. an invalid opcode
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut code = self.code.clone();
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(fixup.label)
                .unwrap_or_else(|| panic!("undefined label {}", fixup.label));
            let delta = target as i32 - fixup.next as i32;
            code[fixup.at..fixup.at + 4].copy_from_slice(&delta.to_le_bytes());
        }
        code
    }
}

pub fn int() -> TypeSig {
    TypeSig::Primitive(PrimitiveType::I4)
}

pub fn boolean() -> TypeSig {
    TypeSig::Primitive(PrimitiveType::Bool)
}

pub fn string() -> TypeSig {
    TypeSig::Primitive(PrimitiveType::String)
}

pub fn object() -> TypeSig {
    TypeSig::Primitive(PrimitiveType::Object)
}

/// A method to add to a [`Fixture`]
#[derive(Default)]
pub struct MethodSpec {
    pub name: &'static str,
    pub params: Vec<(&'static str, TypeSig)>,
    pub locals: Vec<(&'static str, TypeSig)>,
    pub returns: Option<TypeSig>,
    pub il: Vec<u8>,
    pub regions: Vec<ExceptionRegion>,
}

/// Metadata document under construction. Methods with bodies are declared
/// on `Demo.Sample`.
pub struct Fixture {
    pub metadata: InMemoryMetadata,
    owner: Token,
    type_rows: u32,
    ref_rows: u32,
    def_rows: u32,
    field_rows: u32,
    string_rows: u32,
}

impl Fixture {
    pub fn new() -> Self {
        let mut metadata = InMemoryMetadata::new();
        let owner = metadata.add_type(TypeSymbol {
            token: Token::new(Token::TYPE_DEF, 1),
            namespace: "Demo".into(),
            name: "Sample".into(),
            is_value_type: false,
        });
        Self {
            metadata,
            owner,
            type_rows: 0,
            ref_rows: 0,
            def_rows: 0,
            field_rows: 0,
            string_rows: 0,
        }
    }

    pub fn type_ref(&mut self, namespace: &str, name: &str) -> Token {
        self.type_rows += 1;
        self.metadata.add_type(TypeSymbol {
            token: Token::new(Token::TYPE_REF, self.type_rows),
            namespace: namespace.into(),
            name: name.into(),
            is_value_type: false,
        })
    }

    /// Static member reference
    pub fn function(
        &mut self,
        owner: Token,
        name: &str,
        params: Vec<TypeSig>,
        returns: Option<TypeSig>,
    ) -> Token {
        self.member(owner, name, false, params, returns)
    }

    /// Instance member reference
    pub fn instance(
        &mut self,
        owner: Token,
        name: &str,
        params: Vec<TypeSig>,
        returns: Option<TypeSig>,
    ) -> Token {
        self.member(owner, name, true, params, returns)
    }

    fn member(
        &mut self,
        owner: Token,
        name: &str,
        has_this: bool,
        params: Vec<TypeSig>,
        returns: Option<TypeSig>,
    ) -> Token {
        self.ref_rows += 1;
        self.metadata.add_method(MethodDef {
            symbol: MethodSymbol {
                token: Token::new(Token::MEMBER_REF, self.ref_rows),
                name: name.into(),
                declaring_type: Some(owner),
                has_this,
                parameters: params
                    .into_iter()
                    .map(|ty| ParamSig {
                        name: None,
                        ty,
                        is_out: false,
                    })
                    .collect(),
                return_type: returns,
            },
            body: None,
        })
    }

    pub fn static_field(&mut self, owner: Token, name: &str, ty: TypeSig) -> Token {
        self.field_rows += 1;
        self.metadata.add_field(FieldSymbol {
            token: Token::new(Token::FIELD, self.field_rows),
            name: name.into(),
            declaring_type: Some(owner),
            is_static: true,
            ty: Some(ty),
        })
    }

    pub fn user_string(&mut self, value: &str) -> Token {
        self.string_rows += 1;
        self.metadata
            .add_string(Token::new(Token::USER_STRING, self.string_rows), value)
    }

    pub fn method(&mut self, spec: MethodSpec) -> MethodId {
        self.def_rows += 1;
        let token = Token::new(Token::METHOD_DEF, self.def_rows);
        self.metadata.add_method(MethodDef {
            symbol: MethodSymbol {
                token,
                name: spec.name.into(),
                declaring_type: Some(self.owner),
                has_this: false,
                parameters: spec
                    .params
                    .into_iter()
                    .map(|(name, ty)| ParamSig {
                        name: Some(name.into()),
                        ty,
                        is_out: false,
                    })
                    .collect(),
                return_type: spec.returns,
            },
            body: Some(MethodBody {
                il: spec.il,
                locals: spec
                    .locals
                    .into_iter()
                    .map(|(name, ty)| LocalSig {
                        name: Some(name.into()),
                        ty,
                    })
                    .collect(),
                exception_regions: spec.regions,
            }),
        });
        MethodId(token.0)
    }

    pub fn decompile_with(&self, method: MethodId, settings: DecompilerSettings) -> MethodAst {
        let decompiler = Decompiler::new(
            ResolverContext::new(&self.metadata, &self.metadata),
            settings,
        );
        decompiler
            .decompile_method(method)
            .unwrap_or_else(|e| panic!("decompiling {} failed: {}", method, e))
    }

    pub fn decompile(&self, method: MethodId) -> MethodAst {
        self.decompile_with(method, DecompilerSettings::default())
    }

    pub fn render_with(&self, method: MethodId, settings: DecompilerSettings) -> String {
        let text = render_method(&self.decompile_with(method, settings));
        println!("{}", text);
        text
    }

    pub fn render(&self, method: MethodId) -> String {
        self.render_with(method, DecompilerSettings::default())
    }
}

/// Every `goto X;` in `text` has exactly one `X:` label line
pub fn assert_goto_targets_unique(text: &str) {
    for line in text.lines() {
        let Some(rest) = line.trim().strip_prefix("goto ") else {
            continue;
        };
        if rest.starts_with("case ") || rest.starts_with("default") {
            continue;
        }
        let label = rest.trim_end_matches(';');
        let definitions = text
            .lines()
            .filter(|l| {
                let l = l.trim();
                l == format!("{}:", label) || l == format!("{}:;", label)
            })
            .count();
        assert_eq!(definitions, 1, "label {} defined {} times in\n{}", label, definitions, text);
    }
}
