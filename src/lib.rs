//! cil-dec-rs: control-flow reconstruction core for decompiling .NET CIL
//!
//! This library turns CIL method bodies into structured statement trees:
//! basic-block graphs, switch recognition, loop and branch structuring,
//! `goto case` resolution and block normalization. Rendering the trees as
//! source text is left to an [`decompiler::AstConsumer`].

pub mod ast;
pub mod cfg;
pub mod cli;
pub mod config;
pub mod decompiler;
pub mod error;
pub mod il;
pub mod metadata;

pub use decompiler::{AstConsumer, CancellationToken, DecompileReport, Decompiler};
pub use error::{Error as DecompilerError, ErrorKind, Result as DecompilerResult};

// Re-export commonly used types
pub use ast::printer::DebugPrinter;
pub use ast::{Ast, MethodAst, Stmt, StmtId};
pub use cfg::{Block, Cfg};
pub use config::DecompilerSettings;
pub use metadata::{InMemoryMetadata, MetadataSource, MethodId, ResolverContext, TypeResolver};
