mod common;

use cil_dec_rs::cfg::{Cfg, EdgeKind};
use cil_dec_rs::metadata::{ExceptionRegion, ExceptionRegionKind, MetadataSource};
use cil_dec_rs::{ErrorKind, MethodId};
use common::{boolean, int, Asm, Fixture, MethodSpec};

fn build(fixture: &Fixture, method: MethodId) -> Cfg {
    let stream = fixture
        .metadata
        .get_method_body(method)
        .expect("method body");
    let regions = fixture
        .metadata
        .get_exception_regions(method)
        .expect("regions");
    Cfg::build(&stream, &regions).expect("cfg")
}

fn simple(fixture: &mut Fixture, asm: &Asm) -> MethodId {
    fixture.method(MethodSpec {
        name: "M",
        params: vec![("x", int()), ("y", boolean())],
        locals: vec![("a", int()), ("b", int())],
        returns: Some(int()),
        il: asm.finish(),
        ..MethodSpec::default()
    })
}

#[test]
fn test_straight_line_is_one_block() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldarg(0).ldc(1).add().ret();
    let method = simple(&mut fixture, &asm);

    let cfg = build(&fixture, method);
    assert_eq!(cfg.block_count(), 1);
    let successors = cfg.successors(cfg.entry());
    assert_eq!(successors.len(), 1);
    assert_eq!(successors[0].0, cfg.exit());
}

#[test]
fn test_conditional_branch_has_true_and_false_edges() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldarg(1).brtrue("yes");
    asm.ldc(0).ret();
    asm.label("yes").ldc(1).ret();
    let yes = asm.offset_of("yes");
    let method = simple(&mut fixture, &asm);

    let cfg = build(&fixture, method);
    assert_eq!(cfg.block_count(), 3);
    let successors = cfg.successors(cfg.entry());
    let taken = successors
        .iter()
        .find(|(_, kind)| *kind == EdgeKind::True)
        .expect("taken edge");
    assert_eq!(Some(taken.0), cfg.block_at(yes));
    assert!(successors.iter().any(|(_, kind)| *kind == EdgeKind::False));
}

#[test]
fn test_switch_edges_carry_case_indices() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldarg(0).switch(&["c0", "c1"]);
    asm.ldc(-1).ret();
    asm.label("c0").ldc(10).ret();
    asm.label("c1").ldc(20).ret();
    let c1 = asm.offset_of("c1");
    let method = simple(&mut fixture, &asm);

    let cfg = build(&fixture, method);
    let successors = cfg.successors(cfg.entry());
    assert_eq!(successors.len(), 3);
    assert!(successors.iter().any(|(_, kind)| *kind == EdgeKind::Default));
    let second = successors
        .iter()
        .find(|(_, kind)| *kind == EdgeKind::Switch(1))
        .expect("case 1 edge");
    assert_eq!(Some(second.0), cfg.block_at(c1));
}

#[test]
fn test_natural_loop_is_found_at_condition_block() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldc(0).stloc(0);
    asm.br("cond");
    asm.label("body").ldloc(0).ldc(1).add().stloc(0);
    asm.label("cond").ldloc(0).ldarg(0).blt("body");
    asm.ldloc(0).ret();
    let body = asm.offset_of("body");
    let cond = asm.offset_of("cond");
    let method = simple(&mut fixture, &asm);

    let cfg = build(&fixture, method);
    let loops = cfg.find_natural_loops();
    assert_eq!(loops.loops.len(), 1);
    assert!(loops.irreducible_edges.is_empty());
    let found = &loops.loops[0];
    let header = cfg.block_at(cond).expect("condition block");
    let body = cfg.block_at(body).expect("body block");
    assert_eq!(found.header, header);
    assert!(found.contains(body));
    assert_eq!(found.latches().collect::<Vec<_>>(), vec![body]);
    assert!(loops.is_node_in_loop(body));
    assert_eq!(loops.get_loops_containing_node(body), &[0]);
    assert!(!loops.is_node_in_loop(cfg.entry()));
}

#[test]
fn test_cycle_with_two_entries_is_irreducible() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldarg(1).brtrue("b");
    asm.label("a").ldarg(1).brtrue("b");
    asm.ldc(0).ret();
    asm.label("b").ldarg(1).brtrue("a");
    asm.ldc(1).ret();
    let method = simple(&mut fixture, &asm);

    let cfg = build(&fixture, method);
    let loops = cfg.find_natural_loops();
    assert!(!loops.irreducible_edges.is_empty());
}

#[test]
fn test_exception_region_blocks_are_tagged() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.label("try").ldarg(0).stloc(0).leave("end");
    asm.label("handler").pop().ldc(-1).stloc(0).leave("end");
    asm.label("end").ldloc(0).ret();
    let region = ExceptionRegion {
        kind: ExceptionRegionKind::Catch {
            exception_type: None,
        },
        try_offset: 0,
        try_length: asm.offset_of("handler"),
        handler_offset: asm.offset_of("handler"),
        handler_length: asm.offset_of("end") - asm.offset_of("handler"),
    };
    let handler_offset = region.handler_offset;
    let method = fixture.method(MethodSpec {
        name: "Guarded",
        locals: vec![("a", int())],
        returns: Some(int()),
        il: asm.finish(),
        regions: vec![region],
        ..MethodSpec::default()
    });

    let cfg = build(&fixture, method);
    let entry = &cfg.graph()[cfg.entry()];
    assert_eq!(entry.protected_by.as_slice(), &[0]);
    let handler = cfg.block_at(handler_offset).expect("handler block");
    assert_eq!(cfg.graph()[handler].handler_of, Some(0));
    // The handler is reached through an exception edge only
    assert!(cfg
        .successors(cfg.entry())
        .iter()
        .all(|(target, _)| *target != handler));
}

#[test]
fn test_branch_into_instruction_is_rejected() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    // br +1 lands inside the ldc.i4 operand
    asm.raw(&[0x38, 0x01, 0x00, 0x00, 0x00]);
    asm.ldc(1000).ret();
    let method = simple(&mut fixture, &asm);

    let stream = fixture.metadata.get_method_body(method).expect("decodes");
    let error = Cfg::build(&stream, &[]).expect_err("bad target");
    assert_eq!(error.kind(), ErrorKind::InvalidControlFlow);
}

#[test]
fn test_falling_off_the_end_is_rejected() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldc(1).pop();
    let method = simple(&mut fixture, &asm);

    let stream = fixture.metadata.get_method_body(method).expect("decodes");
    let error = Cfg::build(&stream, &[]).expect_err("no terminator");
    assert_eq!(error.kind(), ErrorKind::InvalidControlFlow);
}

#[test]
fn test_dot_export_names_every_block() {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldarg(1).brtrue("yes");
    asm.ldc(0).ret();
    asm.label("yes").ldc(1).ret();
    let method = simple(&mut fixture, &asm);

    let dot = build(&fixture, method).to_dot();
    assert!(dot.starts_with("digraph"), "{}", dot);
    assert!(dot.contains("IL_0000"), "{}", dot);
}
