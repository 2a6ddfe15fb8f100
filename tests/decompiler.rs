mod common;

use cil_dec_rs::{
    CancellationToken, DebugPrinter, Decompiler, DecompilerSettings, ErrorKind, MethodId,
    ResolverContext,
};
use common::{int, Asm, Fixture, MethodSpec};

fn batch() -> (Fixture, Vec<MethodId>) {
    let mut fixture = Fixture::new();
    let mut methods = Vec::new();
    for value in 0..8 {
        let mut asm = Asm::new();
        asm.ldarg(0).brtrue("yes");
        asm.ldc(value).ret();
        asm.label("yes").ldc(value + 100).ret();
        methods.push(fixture.method(MethodSpec {
            name: "Choose",
            params: vec![("flag", int())],
            returns: Some(int()),
            il: asm.finish(),
            ..MethodSpec::default()
        }));
    }
    (fixture, methods)
}

#[test]
fn test_parallel_batch_output_is_ordered_by_method() {
    let (fixture, methods) = batch();
    let decompiler = Decompiler::new(
        ResolverContext::new(&fixture.metadata, &fixture.metadata),
        DecompilerSettings::default(),
    );
    let printer = DebugPrinter::new();
    let report = decompiler.decompile_assembly(&printer);

    assert_eq!(report.succeeded.len(), methods.len());
    assert!(report.failures.is_empty());
    let output = printer.output();
    let mut last = 0;
    for value in 0..8 {
        let at = output
            .find(&format!("return {};", value + 100))
            .expect("every method is rendered");
        assert!(at >= last, "{}", output);
        last = at;
    }
    for &method in &methods {
        assert!(printer.get(method).is_some());
    }
}

#[test]
fn test_sequential_and_parallel_runs_agree() {
    let (fixture, methods) = batch();
    let decompiler = Decompiler::new(
        ResolverContext::new(&fixture.metadata, &fixture.metadata),
        DecompilerSettings::default(),
    );
    let printer = DebugPrinter::new();
    decompiler.decompile_all(&methods, &printer);
    for &method in &methods {
        let single = fixture.render(method);
        assert_eq!(printer.get(method).as_deref(), Some(single.as_str()));
    }
}

#[test]
fn test_decode_failure_emits_placeholder() {
    let mut fixture = Fixture::new();
    let broken = fixture.method(MethodSpec {
        name: "Broken",
        il: vec![0xFF],
        ..MethodSpec::default()
    });
    let mut asm = Asm::new();
    asm.ret();
    let fine = fixture.method(MethodSpec {
        name: "Fine",
        il: asm.finish(),
        ..MethodSpec::default()
    });

    let decompiler = Decompiler::new(
        ResolverContext::new(&fixture.metadata, &fixture.metadata),
        DecompilerSettings::default(),
    );
    let printer = DebugPrinter::new();
    let report = decompiler.decompile_all(&[broken, fine], &printer);

    assert_eq!(report.succeeded, vec![fine]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, broken);
    assert_eq!(report.failures[0].1.kind(), ErrorKind::Decode);
    let placeholder = printer.get(broken).expect("placeholder emitted");
    assert!(placeholder.contains("decompilation failed"), "{}", placeholder);
}

#[test]
fn test_cancelled_batch_skips_methods() {
    let (fixture, methods) = batch();
    let token = CancellationToken::new();
    let decompiler = Decompiler::new(
        ResolverContext::new(&fixture.metadata, &fixture.metadata),
        DecompilerSettings::default(),
    )
    .with_cancellation(token.clone());
    token.cancel();

    let printer = DebugPrinter::new();
    let report = decompiler.decompile_all(&methods, &printer);
    assert_eq!(report.skipped.len(), methods.len());
    assert!(printer.output().is_empty());
}

#[test]
fn test_cancelling_through_the_decompiler_token() {
    let (fixture, methods) = batch();
    let decompiler = Decompiler::new(
        ResolverContext::new(&fixture.metadata, &fixture.metadata),
        DecompilerSettings::default(),
    );
    decompiler.cancellation_token().cancel();

    let printer = DebugPrinter::new();
    let report = decompiler.decompile_all(&methods, &printer);
    assert!(report.succeeded.is_empty());
    assert_eq!(report.skipped, methods);
}

#[test]
fn test_dead_block_becomes_stub_with_warning() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldarg(0).brfalse("zero");
    asm.ldc(1).ret();
    asm.label("zero").ldc(0).ret();
    let dead = asm.offset();
    asm.ldc(2).ret();
    let method = fixture.method(MethodSpec {
        name: "Dead",
        params: vec![("flag", int())],
        returns: Some(int()),
        il: asm.finish(),
        ..MethodSpec::default()
    });

    let text = fixture.render(method);
    assert!(
        text.contains(&format!("// unreachable code at IL_{:04x}", dead)),
        "{}",
        text
    );
    assert!(
        text.contains(&format!("// warning: Block at IL_{:04x}", dead)),
        "{}",
        text
    );
    assert!(!text.contains("return 2;"), "{}", text);

    let tree = fixture.decompile(method);
    let kinds: Vec<ErrorKind> = tree.diagnostics.iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, vec![ErrorKind::UnreachableBlock]);
}

#[test]
fn test_missing_method_is_a_resolution_error() {
    let (fixture, _) = batch();
    let decompiler = Decompiler::new(
        ResolverContext::new(&fixture.metadata, &fixture.metadata),
        DecompilerSettings::default(),
    );
    let error = decompiler
        .decompile_method(MethodId(0x0600_0999))
        .err()
        .expect("no such method");
    assert_eq!(error.kind(), ErrorKind::MetadataResolution);
}
