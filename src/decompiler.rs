//! Main decompiler module
//!
//! This module drives one method through the whole reconstruction pipeline
//! (graph, lifting, switch recognition, structuring, rewriting passes) and
//! runs many methods in parallel for whole-assembly jobs.

use crate::ast::control_flow::{structure_method, StructuredBody};
use crate::ast::instructions::lift_method;
use crate::ast::optimization::{default_passes, run_passes, PassContext};
use crate::ast::{MethodAst, MethodContext, Stmt};
use crate::cfg::conditional_analysis::fold_short_circuits;
use crate::cfg::switch_analysis::detect_switches;
use crate::cfg::Cfg;
use crate::config::DecompilerSettings;
use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{MethodId, ResolverContext, Token};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives each finished method tree
pub trait AstConsumer: Sync {
    fn emit(&self, method: &MethodAst) -> Result<()>;
}

/// Cooperative cancellation flag, checked between methods
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to each method of a batch
#[derive(Debug, Default)]
pub struct DecompileReport {
    pub succeeded: Vec<MethodId>,
    /// Methods aborted by a fatal error; a placeholder was emitted for each
    pub failures: Vec<(MethodId, Error)>,
    /// Methods not started because the job was cancelled
    pub skipped: Vec<MethodId>,
}

enum Outcome {
    Done,
    Failed(Error),
    Skipped,
}

/// Main decompiler struct
pub struct Decompiler<'r> {
    resolver: ResolverContext<'r>,
    settings: DecompilerSettings,
    cancellation: CancellationToken,
}

impl<'r> Decompiler<'r> {
    /// Create a new decompiler
    pub fn new(resolver: ResolverContext<'r>, settings: DecompilerSettings) -> Self {
        Self {
            resolver,
            settings,
            cancellation: CancellationToken::new(),
        }
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn settings(&self) -> &DecompilerSettings {
        &self.settings
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Decompile a single method
    pub fn decompile_method(&self, method: MethodId) -> Result<MethodAst> {
        let metadata = self.resolver.metadata;
        let stream = metadata.get_method_body(method)?;
        let regions = metadata.get_exception_regions(method)?;
        log::debug!(
            "Decompiling {} ({} instructions, {} exception regions)",
            stream.name,
            stream.instructions.len(),
            regions.len()
        );

        let mut context = MethodContext::new(&stream);
        let cfg = Cfg::build(&stream, &regions)?;
        let mut graph = lift_method(&cfg, &mut context, self.resolver)?;
        let mut diagnostics = detect_switches(&mut graph, &mut context, self.resolver, &self.settings);
        let folded = fold_short_circuits(&mut graph);
        log::trace!("{}: folded {} short-circuit conditions", stream.name, folded);

        let StructuredBody {
            mut ast,
            body,
            diagnostics: structuring,
        } = structure_method(graph, &mut context, self.resolver, &regions)?;
        diagnostics.extend(structuring);

        let mut passes = default_passes();
        let mut pass_context = PassContext {
            ast: &mut ast,
            body,
            context: &mut context,
            resolver: self.resolver,
            settings: &self.settings,
            diagnostics: &mut diagnostics,
        };
        run_passes(&mut pass_context, &mut passes)?;

        Ok(MethodAst {
            method,
            context,
            ast,
            body,
            diagnostics,
        })
    }

    /// Decompile a method and hand the result to `consumer`.
    ///
    /// A fatal error still emits a placeholder tree carrying the error as a
    /// comment, then returns the error.
    pub fn decompile_into(&self, method: MethodId, consumer: &dyn AstConsumer) -> Result<()> {
        match self.decompile_method(method) {
            Ok(tree) => consumer.emit(&tree),
            Err(error) => {
                log::warn!("Method {} failed: {}", method, error);
                let placeholder = self.placeholder(method, &error);
                if let Err(emit_error) = consumer.emit(&placeholder) {
                    log::warn!("Could not emit placeholder for {}: {}", method, emit_error);
                }
                Err(error)
            }
        }
    }

    /// Decompile every listed method on the rayon pool
    pub fn decompile_all(&self, methods: &[MethodId], consumer: &dyn AstConsumer) -> DecompileReport {
        let outcomes: Vec<(MethodId, Outcome)> = methods
            .par_iter()
            .map(|&method| {
                if self.cancellation.is_cancelled() {
                    return (method, Outcome::Skipped);
                }
                match self.decompile_into(method, consumer) {
                    Ok(()) => (method, Outcome::Done),
                    Err(e) if e.kind() == ErrorKind::Cancelled => (method, Outcome::Skipped),
                    Err(e) => (method, Outcome::Failed(e)),
                }
            })
            .collect();

        let mut report = DecompileReport::default();
        for (method, outcome) in outcomes {
            match outcome {
                Outcome::Done => report.succeeded.push(method),
                Outcome::Failed(e) => report.failures.push((method, e)),
                Outcome::Skipped => report.skipped.push(method),
            }
        }
        log::info!(
            "Decompiled {} methods, {} failed, {} skipped",
            report.succeeded.len(),
            report.failures.len(),
            report.skipped.len()
        );
        report
    }

    /// Every method the metadata source has a body for
    pub fn decompile_assembly(&self, consumer: &dyn AstConsumer) -> DecompileReport {
        let mut methods = self.resolver.metadata.method_ids();
        methods.sort();
        self.decompile_all(&methods, consumer)
    }

    fn placeholder(&self, method: MethodId, error: &Error) -> MethodAst {
        let name = self
            .resolver
            .method(Token(method.0))
            .map(|m| m.name)
            .unwrap_or_else(|_| method.to_string());
        let context = MethodContext {
            method,
            name,
            locals: Vec::new(),
            parameters: Vec::new(),
            has_this: false,
            returns_value: false,
        };
        let mut ast = crate::ast::Ast::new();
        let comment = ast.alloc(Stmt::Comment(format!("decompilation failed: {}", error)));
        let body = ast.block(vec![comment]);
        MethodAst {
            method,
            context,
            ast,
            body,
            diagnostics: vec![error.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{InMemoryMetadata, MethodBody, MethodDef, MethodSymbol};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<MethodId>>);

    impl AstConsumer for Collect {
        fn emit(&self, method: &MethodAst) -> Result<()> {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(method.method);
            }
            Ok(())
        }
    }

    fn metadata() -> InMemoryMetadata {
        let mut metadata = InMemoryMetadata::new();
        for (row, il) in [(1, vec![0x2a]), (2, vec![0xff])] {
            metadata.add_method(MethodDef {
                symbol: MethodSymbol {
                    token: Token::new(Token::METHOD_DEF, row),
                    name: format!("M{}", row),
                    declaring_type: None,
                    has_this: false,
                    parameters: Vec::new(),
                    return_type: None,
                },
                body: Some(MethodBody {
                    il,
                    ..MethodBody::default()
                }),
            });
        }
        metadata
    }

    #[test]
    fn failed_method_gets_placeholder_and_is_reported() {
        let metadata = metadata();
        let decompiler = Decompiler::new(
            ResolverContext::new(&metadata, &metadata),
            DecompilerSettings::default(),
        );
        let consumer = Collect::default();
        let methods = [MethodId(0x0600_0001), MethodId(0x0600_0002)];
        let report = decompiler.decompile_all(&methods, &consumer);
        assert_eq!(report.succeeded, vec![MethodId(0x0600_0001)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].1.kind(), ErrorKind::Decode);
        assert_eq!(consumer.0.lock().map(|v| v.len()).unwrap_or(0), 2);
    }

    #[test]
    fn cancelled_job_skips_every_method() {
        let metadata = metadata();
        let token = CancellationToken::new();
        let decompiler = Decompiler::new(
            ResolverContext::new(&metadata, &metadata),
            DecompilerSettings::default(),
        )
        .with_cancellation(token.clone());
        token.cancel();
        let consumer = Collect::default();
        let report = decompiler.decompile_all(&[MethodId(0x0600_0001)], &consumer);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.skipped, vec![MethodId(0x0600_0001)]);
    }
}
