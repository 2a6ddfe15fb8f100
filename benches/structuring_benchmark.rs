use cil_dec_rs::metadata::{
    LocalSig, MethodBody, MethodDef, MethodSymbol, ParamSig, PrimitiveType, Token, TypeSig,
};
use cil_dec_rs::{DebugPrinter, Decompiler, DecompilerSettings, InMemoryMetadata, MethodId, ResolverContext};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// `switch (x) { case k: return k * 10; ... } return -1;` with `cases` labels
fn switch_il(cases: u32) -> Vec<u8> {
    let mut il = vec![0x02, 0x45];
    il.extend_from_slice(&cases.to_le_bytes());
    for k in 0..cases {
        // Case bodies start after the 5-byte `br`, 6 bytes each
        il.extend_from_slice(&(5 + 6 * k as i32).to_le_bytes());
    }
    il.push(0x38);
    il.extend_from_slice(&(6 * cases as i32).to_le_bytes());
    for k in 0..cases {
        il.push(0x20);
        il.extend_from_slice(&(k as i32 * 10).to_le_bytes());
        il.push(0x2A);
    }
    il.extend_from_slice(&[0x15, 0x2A]);
    il
}

/// `i = 0; while (i < x) { total = total + i; i = i + 1; } return total;`
fn loop_il() -> Vec<u8> {
    vec![
        0x16, 0x0A, // total = 0
        0x16, 0x0B, // i = 0
        0x38, 0x08, 0x00, 0x00, 0x00, // br cond
        0x06, 0x07, 0x58, 0x0A, // total += i
        0x07, 0x17, 0x58, 0x0B, // i += 1
        0x07, 0x02, 0x3F, 0xF1, 0xFF, 0xFF, 0xFF, // cond: blt body
        0x06, 0x2A, // return total
    ]
}

fn method(row: u32, name: &str, il: Vec<u8>, locals: usize) -> MethodDef {
    let int = TypeSig::Primitive(PrimitiveType::I4);
    MethodDef {
        symbol: MethodSymbol {
            token: Token::new(Token::METHOD_DEF, row),
            name: name.to_string(),
            declaring_type: None,
            has_this: false,
            parameters: vec![ParamSig {
                name: Some("x".into()),
                ty: int.clone(),
                is_out: false,
            }],
            return_type: Some(int.clone()),
        },
        body: Some(MethodBody {
            il,
            locals: (0..locals)
                .map(|_| LocalSig {
                    name: None,
                    ty: int.clone(),
                })
                .collect(),
            exception_regions: Vec::new(),
        }),
    }
}

fn assembly(methods: u32) -> InMemoryMetadata {
    let mut metadata = InMemoryMetadata::new();
    for row in 1..=methods {
        let def = if row % 2 == 0 {
            method(row, &format!("Dispatch{}", row), switch_il(16 + row % 16), 0)
        } else {
            method(row, &format!("Sum{}", row), loop_il(), 2)
        };
        metadata.add_method(def);
    }
    metadata
}

fn structuring_benchmark(c: &mut Criterion) {
    let metadata = assembly(2);
    let decompiler = Decompiler::new(
        ResolverContext::new(&metadata, &metadata),
        DecompilerSettings::default(),
    );
    c.bench_function("dense_switch_method", |b| {
        b.iter(|| black_box(decompiler.decompile_method(MethodId(0x0600_0002))));
    });
    c.bench_function("while_loop_method", |b| {
        b.iter(|| black_box(decompiler.decompile_method(MethodId(0x0600_0001))));
    });

    let metadata = assembly(256);
    let decompiler = Decompiler::new(
        ResolverContext::new(&metadata, &metadata),
        DecompilerSettings::default(),
    );
    c.bench_function("parallel_assembly_256", |b| {
        b.iter(|| {
            let printer = DebugPrinter::new();
            black_box(decompiler.decompile_assembly(&printer));
        });
    });
}

criterion_group!(benches, structuring_benchmark);
criterion_main!(benches);
