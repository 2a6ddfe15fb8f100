//! C#-like rendering of a finished statement tree
//!
//! Used by the CLI and the test-suite to look at what the structurer
//! produced. The output aims to be readable, not compilable: types that
//! metadata did not name are written as `var`.

use super::optimization::section_value;
use super::{
    Ast, CaseLabel, Constant, Expr, LocalId, LoopKind, MethodAst, MethodContext, Stmt, StmtId,
    SwitchConstruct, SwitchKind, UnaryOp, ValueSink,
};
use crate::decompiler::AstConsumer;
use crate::error::{Error, ErrorKind, Result};
use crate::metadata::{MethodId, TypeSig};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Mutex;

const INDENT: &str = "    ";

/// Binding strength of an assignment
const PREC_ASSIGN: u8 = 1;
/// Binding strength of `as` (relational)
const PREC_AS: u8 = 10;
/// Prefix operators and casts
const PREC_UNARY: u8 = 14;
/// Member access, calls, postfix operators, literals
const PREC_PRIMARY: u8 = 16;

/// Render one method: a header comment, its diagnostics and the body
pub fn render_method(method: &MethodAst) -> String {
    let mut writer = CSharpWriter::new(&method.ast, &method.context);
    let params: Vec<String> = (0..method.context.parameters.len())
        .map(|i| method.context.param_name(i as u16))
        .collect();
    writer.line(&format!("// {}({})", method.context.name, params.join(", ")));
    // A rejected switch candidate already reads as the if-chain it falls back to
    for diagnostic in method
        .diagnostics
        .iter()
        .filter(|d| d.kind() != ErrorKind::AmbiguousSwitchShape)
    {
        writer.line(&format!("// warning: {}", diagnostic));
    }
    writer.branch(method.body);
    writer.finish()
}

/// Render a statement subtree, mostly for tests
pub fn render_stmt(ast: &Ast, context: &MethodContext, id: StmtId) -> String {
    let mut writer = CSharpWriter::new(ast, context);
    writer.stmt(id);
    writer.finish()
}

/// Render a single expression
pub fn render_expr(expr: &Expr, context: &MethodContext) -> String {
    let ast = Ast::new();
    let mut writer = CSharpWriter::new(&ast, context);
    writer.expr(expr, 0);
    writer.finish()
}

struct CSharpWriter<'a> {
    ast: &'a Ast,
    context: &'a MethodContext,
    out: String,
    indent: usize,
}

impl<'a> CSharpWriter<'a> {
    fn new(ast: &'a Ast, context: &'a MethodContext) -> Self {
        Self {
            ast,
            context,
            out: String::new(),
            indent: 0,
        }
    }

    fn finish(self) -> String {
        self.out
    }

    fn start_line(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    fn line(&mut self, text: &str) {
        self.start_line();
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Start a line, let `f` write its text, end the line
    fn with_line(&mut self, f: impl FnOnce(&mut Self)) {
        self.start_line();
        f(self);
        self.out.push('\n');
    }

    fn local(&mut self, id: LocalId) {
        let name = self.context.local_name(id).to_string();
        self.out.push_str(&name);
    }

    // ---- statements ----

    /// A branch or body: braced block, or one indented embedded statement
    fn branch(&mut self, id: StmtId) {
        let ast = self.ast;
        if let Stmt::Block(items) = &ast[id] {
            self.line("{");
            self.indent += 1;
            self.items(items);
            self.indent -= 1;
            self.line("}");
        } else {
            self.indent += 1;
            self.stmt(id);
            self.indent -= 1;
        }
    }

    fn items(&mut self, items: &[StmtId]) {
        for (index, item) in items.iter().enumerate() {
            if let Stmt::Label(label) = self.ast[*item] {
                // A label needs a statement after it
                let last = items[index + 1..]
                    .iter()
                    .all(|i| matches!(self.ast[*i], Stmt::Nop));
                self.line(&format!("{}:{}", label, if last { ";" } else { "" }));
                continue;
            }
            self.stmt(*item);
        }
    }

    fn stmt(&mut self, id: StmtId) {
        let ast = self.ast;
        match &ast[id] {
            Stmt::Nop => {}
            Stmt::Expr(e) => self.with_line(|w| {
                w.expr(e, 0);
                w.out.push(';');
            }),
            Stmt::Declare { .. } => self.with_line(|w| {
                w.inline_stmt(id);
                w.out.push(';');
            }),
            Stmt::Block(_) => self.branch(id),
            Stmt::If { .. } => self.if_chain(id),
            Stmt::Loop(l) => {
                match l.kind {
                    LoopKind::DoWhile => {
                        self.line("do");
                        self.branch(l.body);
                        self.with_line(|w| {
                            w.out.push_str("while (");
                            w.condition(l.condition.as_ref());
                            w.out.push_str(");");
                        });
                        return;
                    }
                    LoopKind::While => self.with_line(|w| {
                        w.out.push_str("while (");
                        w.condition(l.condition.as_ref());
                        w.out.push(')');
                    }),
                    LoopKind::For => self.with_line(|w| {
                        w.out.push_str("for (");
                        if let Some(init) = l.initializer {
                            w.inline_stmt(init);
                        }
                        w.out.push_str("; ");
                        if let Some(c) = &l.condition {
                            w.expr(c, 0);
                        }
                        w.out.push_str("; ");
                        for (i, inc) in l.increment.iter().enumerate() {
                            if i > 0 {
                                w.out.push_str(", ");
                            }
                            w.expr(inc, 0);
                        }
                        w.out.push(')');
                    }),
                    LoopKind::Foreach => self.with_line(|w| {
                        w.out.push_str("foreach (");
                        if let Some(b) = &l.binding {
                            let ty = w.local_type(b.variable);
                            w.out.push_str(&ty);
                            w.out.push(' ');
                            w.local(b.variable);
                            w.out.push_str(" in ");
                            w.expr(&b.collection, 0);
                        }
                        w.out.push(')');
                    }),
                }
                self.branch(l.body);
            }
            Stmt::Switch(s) => self.switch(s),
            Stmt::Try(t) => {
                self.line("try");
                self.branch(t.body);
                for catch in &t.catches {
                    let mut header = String::from("catch");
                    match (&catch.exception_type, catch.variable) {
                        (Some(ty), Some(v)) => {
                            let _ = write!(header, " ({} {})", ty.name(), self.context.local_name(v));
                        }
                        (Some(ty), None) => {
                            let _ = write!(header, " ({})", ty.name());
                        }
                        (None, Some(v)) => {
                            let _ = write!(header, " (Exception {})", self.context.local_name(v));
                        }
                        (None, None) => {}
                    }
                    self.line(&header);
                    self.branch(catch.body);
                }
                if let Some(f) = t.finally {
                    self.line("finally");
                    self.branch(f);
                }
            }
            Stmt::Break => self.line("break;"),
            Stmt::Continue => self.line("continue;"),
            Stmt::Return(None) => self.line("return;"),
            Stmt::Return(Some(e)) => self.with_line(|w| {
                w.out.push_str("return ");
                w.expr(e, 0);
                w.out.push(';');
            }),
            Stmt::Throw(None) => self.line("throw;"),
            Stmt::Throw(Some(e)) => self.with_line(|w| {
                w.out.push_str("throw ");
                w.expr(e, 0);
                w.out.push(';');
            }),
            Stmt::Goto(label) => self.line(&format!("goto {};", label)),
            Stmt::GotoCase(label) => self.line(&format!("goto case {};", label)),
            Stmt::GotoDefault => self.line("goto default;"),
            Stmt::Label(label) => self.line(&format!("{}:;", label)),
            Stmt::Comment(text) => self.line(&format!("// {}", text)),
        }
    }

    /// Declaration or expression without its semicolon (`for` initializers)
    fn inline_stmt(&mut self, id: StmtId) {
        let ast = self.ast;
        match &ast[id] {
            Stmt::Declare { local, ty, init } => {
                let keyword = match (ty, init) {
                    (Some(ty), _) => ty.name().to_string(),
                    (None, Some(_)) => "var".to_string(),
                    (None, None) => self.local_type(*local),
                };
                self.out.push_str(&keyword);
                self.out.push(' ');
                self.local(*local);
                if let Some(init) = init {
                    self.out.push_str(" = ");
                    self.expr(init, PREC_ASSIGN);
                }
            }
            Stmt::Expr(e) => self.expr(e, 0),
            _ => {}
        }
    }

    /// Declared type of a variable as far as it can be written without metadata
    fn local_type(&self, id: LocalId) -> String {
        match &self.context.local(id).ty {
            Some(TypeSig::Primitive(p)) => p.keyword().to_string(),
            Some(TypeSig::Named(_)) => "var".to_string(),
            None => "object".to_string(),
        }
    }

    fn condition(&mut self, condition: Option<&Expr>) {
        match condition {
            Some(c) => self.expr(c, 0),
            None => self.out.push_str("true"),
        }
    }

    fn if_chain(&mut self, id: StmtId) {
        let ast = self.ast;
        let mut current = id;
        let mut prefix = "if";
        loop {
            let Stmt::If {
                condition,
                then_branch,
                else_branch,
            } = &ast[current]
            else {
                return;
            };
            self.with_line(|w| {
                w.out.push_str(prefix);
                w.out.push_str(" (");
                w.expr(condition, 0);
                w.out.push(')');
            });
            self.branch(*then_branch);
            match else_branch {
                Some(e) if matches!(self.ast[*e], Stmt::If { .. }) => {
                    current = *e;
                    prefix = "else if";
                }
                Some(e) => {
                    self.line("else");
                    self.branch(*e);
                    return;
                }
                None => return,
            }
        }
    }

    fn switch(&mut self, switch: &SwitchConstruct) {
        if let SwitchKind::ExpressionValue(sink) = &switch.kind {
            if switch
                .sections
                .iter()
                .all(|s| section_value(self.ast, s.body).is_some())
            {
                self.switch_expression(switch, sink);
                return;
            }
        }
        self.with_line(|w| {
            w.out.push_str("switch (");
            w.expr(&switch.discriminant, 0);
            w.out.push(')');
        });
        self.line("{");
        self.indent += 1;
        for section in &switch.sections {
            for label in &section.labels {
                match label {
                    CaseLabel::Default => self.line("default:"),
                    other => self.line(&format!("case {}:", other)),
                }
            }
            self.indent += 1;
            let items = self.ast.as_list(section.body);
            self.items(&items);
            self.indent -= 1;
        }
        self.indent -= 1;
        self.line("}");
    }

    fn switch_expression(&mut self, switch: &SwitchConstruct, sink: &ValueSink) {
        self.with_line(|w| {
            match sink {
                ValueSink::Return => w.out.push_str("return "),
                ValueSink::Assign(target) => {
                    w.expr(target, PREC_PRIMARY);
                    w.out.push_str(" = ");
                }
            }
            w.expr(&switch.discriminant, PREC_PRIMARY);
            w.out.push_str(" switch");
        });
        self.line("{");
        self.indent += 1;
        // The discard arm must come last
        let mut sections: Vec<_> = switch.sections.iter().collect();
        sections.sort_by_key(|s| s.is_default());
        for section in sections {
            let Some(value) = section_value(self.ast, section.body) else {
                continue;
            };
            self.with_line(|w| {
                if section.is_default() {
                    w.out.push('_');
                } else {
                    let labels: Vec<String> =
                        section.labels.iter().map(|l| l.to_string()).collect();
                    w.out.push_str(&labels.join(" or "));
                }
                w.out.push_str(" => ");
                w.expr(value, PREC_ASSIGN);
                w.out.push(',');
            });
        }
        self.indent -= 1;
        self.line("};");
    }

    // ---- expressions ----

    fn expr(&mut self, expr: &Expr, min: u8) {
        let prec = precedence(expr);
        let parens = prec < min;
        if parens {
            self.out.push('(');
        }
        self.expr_inner(expr, prec);
        if parens {
            self.out.push(')');
        }
    }

    fn expr_inner(&mut self, expr: &Expr, prec: u8) {
        match expr {
            Expr::Const(c) => self.constant(c),
            Expr::Local(id) => self.local(*id),
            Expr::Arg(i) => {
                let name = self.context.param_name(*i);
                self.out.push_str(&name);
            }
            Expr::This => self.out.push_str("this"),
            Expr::Binary {
                op, left, right, ..
            } => {
                self.expr(left, prec);
                let _ = write!(self.out, " {} ", op.symbol());
                self.expr(right, prec + 1);
            }
            Expr::Unary { op, operand, .. } => {
                self.out.push_str(op.symbol());
                // `- -x` must not read as `--x`
                let nested_minus = *op == UnaryOp::Neg
                    && (matches!(
                        operand.as_ref(),
                        Expr::Unary { op: UnaryOp::Neg, .. }
                            | Expr::IncDec { prefix: true, increment: false, .. }
                    ) || matches!(operand.as_ref(), Expr::Const(Constant::Int(v)) if *v < 0));
                if nested_minus {
                    self.out.push('(');
                    self.expr(operand, 0);
                    self.out.push(')');
                } else {
                    self.expr(operand, PREC_UNARY);
                }
            }
            Expr::Assign { target, value } => {
                self.expr(target, PREC_UNARY);
                self.out.push_str(" = ");
                self.expr(value, PREC_ASSIGN);
            }
            Expr::CompoundAssign { op, target, value } => {
                self.expr(target, PREC_UNARY);
                let _ = write!(self.out, " {}= ", op.symbol());
                self.expr(value, PREC_ASSIGN);
            }
            Expr::IncDec {
                target,
                increment,
                prefix,
            } => {
                let symbol = if *increment { "++" } else { "--" };
                if *prefix {
                    self.out.push_str(symbol);
                    self.expr(target, PREC_PRIMARY);
                } else {
                    self.expr(target, PREC_PRIMARY);
                    self.out.push_str(symbol);
                }
            }
            Expr::Call {
                method,
                receiver,
                args,
            } => {
                match receiver {
                    Some(r) => {
                        self.expr(r, PREC_PRIMARY);
                        self.out.push('.');
                    }
                    None => {
                        if let Some(owner) = &method.declaring_type {
                            self.out.push_str(owner);
                            self.out.push('.');
                        }
                    }
                }
                if let Some(property) = accessor(&method.name, "get_", args.len(), 0) {
                    self.out.push_str(property);
                } else if let Some(property) = accessor(&method.name, "set_", args.len(), 1) {
                    self.out.push_str(property);
                    self.out.push_str(" = ");
                    self.expr(&args[0], PREC_ASSIGN);
                } else {
                    self.out.push_str(&method.name);
                    self.args(args);
                }
            }
            Expr::New { ctor, args } => {
                self.out.push_str("new ");
                self.out
                    .push_str(ctor.declaring_type.as_deref().unwrap_or("object"));
                self.args(args);
            }
            Expr::NewArray { element, length } => {
                let _ = write!(self.out, "new {}[", element.name());
                self.expr(length, 0);
                self.out.push(']');
            }
            Expr::Field { receiver, field } => {
                match receiver {
                    Some(r) => {
                        self.expr(r, PREC_PRIMARY);
                        self.out.push('.');
                    }
                    None => {
                        if let Some(owner) = &field.declaring_type {
                            self.out.push_str(owner);
                            self.out.push('.');
                        }
                    }
                }
                self.out.push_str(&field.name);
            }
            Expr::ArrayElement { array, index } => {
                self.expr(array, PREC_PRIMARY);
                self.out.push('[');
                self.expr(index, 0);
                self.out.push(']');
            }
            Expr::ArrayLength(array) => {
                self.expr(array, PREC_PRIMARY);
                self.out.push_str(".Length");
            }
            Expr::AddressOf(inner) => {
                self.out.push_str("ref ");
                self.expr(inner, PREC_UNARY);
            }
            Expr::Out { target, declare } => {
                self.out.push_str(if *declare { "out var " } else { "out " });
                self.expr(target, PREC_UNARY);
            }
            Expr::Cast { ty, operand } => {
                let _ = write!(self.out, "({})", ty.name());
                self.expr(operand, PREC_UNARY);
            }
            Expr::As { ty, operand } => {
                self.expr(operand, PREC_AS);
                let _ = write!(self.out, " as {}", ty.name());
            }
            Expr::Default(ty) => {
                let _ = write!(self.out, "default({})", ty.name());
            }
        }
    }

    fn args(&mut self, args: &[Expr]) {
        self.out.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(arg, PREC_ASSIGN);
        }
        self.out.push(')');
    }

    fn constant(&mut self, constant: &Constant) {
        match constant {
            Constant::Null => self.out.push_str("null"),
            Constant::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Constant::Int(v) => {
                let _ = write!(self.out, "{}", v);
            }
            Constant::Float(v) => {
                let v = v.into_inner();
                if v.is_nan() {
                    self.out.push_str("double.NaN");
                } else if v.is_infinite() {
                    self.out.push_str(if v > 0.0 {
                        "double.PositiveInfinity"
                    } else {
                        "double.NegativeInfinity"
                    });
                } else if v.fract() == 0.0 && v.abs() < 1e15 {
                    let _ = write!(self.out, "{:.1}", v);
                } else {
                    let _ = write!(self.out, "{}", v);
                }
            }
            Constant::String(s) => {
                self.out.push('"');
                self.out.push_str(&escape(s));
                self.out.push('"');
            }
        }
    }
}

/// Property name of a `get_X()` / `set_X(v)` accessor call
fn accessor<'n>(name: &'n str, prefix: &str, args: usize, expected: usize) -> Option<&'n str> {
    if args != expected {
        return None;
    }
    name.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Assign { .. } | Expr::CompoundAssign { .. } => PREC_ASSIGN,
        Expr::Call { method, args, .. } if accessor(&method.name, "set_", args.len(), 1).is_some() => {
            PREC_ASSIGN
        }
        Expr::Binary { op, .. } => op.precedence(),
        Expr::As { .. } => PREC_AS,
        Expr::Unary { .. }
        | Expr::Cast { .. }
        | Expr::AddressOf(_)
        | Expr::Out { .. }
        | Expr::IncDec { prefix: true, .. } => PREC_UNARY,
        Expr::Const(Constant::Int(v)) if *v < 0 => PREC_UNARY,
        _ => PREC_PRIMARY,
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Consumer that renders every method it receives, keyed by method id so the
/// output order does not depend on scheduling
#[derive(Debug, Default)]
pub struct DebugPrinter {
    rendered: Mutex<BTreeMap<MethodId, String>>,
}

impl DebugPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of one method, if it was emitted
    pub fn get(&self, method: MethodId) -> Option<String> {
        self.rendered.lock().ok()?.get(&method).cloned()
    }

    /// Every emitted method in id order, separated by blank lines
    pub fn output(&self) -> String {
        match self.rendered.lock() {
            Ok(rendered) => rendered.values().cloned().collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        }
    }
}

impl AstConsumer for DebugPrinter {
    fn emit(&self, method: &MethodAst) -> Result<()> {
        let text = render_method(method);
        self.rendered
            .lock()
            .map_err(|_| Error::internal("printer output lock poisoned"))?
            .insert(method.method, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, SwitchSection, TypeRef};
    use crate::metadata::{InstructionStream, LocalSig, PrimitiveType};

    fn context() -> MethodContext {
        MethodContext::new(&InstructionStream {
            method: MethodId(1),
            name: "C::M".into(),
            instructions: Vec::new(),
            locals: vec![LocalSig {
                name: Some("x".into()),
                ty: TypeSig::Primitive(PrimitiveType::I4),
            }],
            parameters: Vec::new(),
            has_this: false,
            returns_value: true,
            code_size: 0,
        })
    }

    fn x() -> Expr {
        Expr::Local(LocalId(0))
    }

    #[test]
    fn precedence_adds_only_needed_parentheses() {
        let ctx = context();
        let sum = Expr::binary(BinaryOp::Add, x(), Expr::int(1));
        let product = Expr::binary(BinaryOp::Mul, sum.clone(), Expr::int(2));
        assert_eq!(render_expr(&product, &ctx), "(x + 1) * 2");
        let left_assoc = Expr::binary(BinaryOp::Sub, sum, Expr::int(3));
        assert_eq!(render_expr(&left_assoc, &ctx), "x + 1 - 3");
        let cast = Expr::Cast {
            ty: TypeRef::Primitive(PrimitiveType::I8),
            operand: Box::new(Expr::binary(BinaryOp::Add, x(), x())),
        };
        assert_eq!(render_expr(&cast, &ctx), "(long)(x + x)");
    }

    #[test]
    fn else_if_chain_and_embedded_statements() {
        let ctx = context();
        let mut ast = Ast::new();
        let a = ast.alloc(Stmt::Return(Some(Expr::int(1))));
        let b = ast.alloc(Stmt::Return(Some(Expr::int(2))));
        let inner = ast.alloc(Stmt::If {
            condition: Expr::binary(BinaryOp::Eq, x(), Expr::int(2)),
            then_branch: b,
            else_branch: None,
        });
        let outer = ast.alloc(Stmt::If {
            condition: Expr::binary(BinaryOp::Eq, x(), Expr::int(1)),
            then_branch: a,
            else_branch: Some(inner),
        });
        assert_eq!(
            render_stmt(&ast, &ctx, outer),
            "if (x == 1)\n    return 1;\nelse if (x == 2)\n    return 2;\n"
        );
    }

    #[test]
    fn return_switch_renders_as_switch_expression() {
        let ctx = context();
        let mut ast = Ast::new();
        let one = ast.alloc(Stmt::Return(Some(Expr::string("small"))));
        let other = ast.alloc(Stmt::Return(Some(Expr::string("large"))));
        let (b1, b2) = (ast.block(vec![one]), ast.block(vec![other]));
        let switch = ast.alloc(Stmt::Switch(SwitchConstruct {
            discriminant: x(),
            sections: vec![
                SwitchSection {
                    labels: [CaseLabel::Default].into_iter().collect(),
                    body: b2,
                },
                SwitchSection {
                    labels: [CaseLabel::Int(1), CaseLabel::Int(2)].into_iter().collect(),
                    body: b1,
                },
            ],
            kind: SwitchKind::ExpressionValue(ValueSink::Return),
        }));
        assert_eq!(
            render_stmt(&ast, &ctx, switch),
            "return x switch\n{\n    1 or 2 => \"small\",\n    _ => \"large\",\n};\n"
        );
    }

    #[test]
    fn trailing_label_gets_empty_statement() {
        let ctx = context();
        let mut ast = Ast::new();
        let jump = ast.alloc(Stmt::Goto(crate::ast::Label(0x1a)));
        let label = ast.alloc(Stmt::Label(crate::ast::Label(0x1a)));
        let root = ast.block(vec![jump, label]);
        assert_eq!(
            render_stmt(&ast, &ctx, root),
            "{\n    goto IL_001a;\n    IL_001a:;\n}\n"
        );
    }

    #[test]
    fn strings_are_escaped() {
        let ctx = context();
        assert_eq!(render_expr(&Expr::string("a\"b\n"), &ctx), "\"a\\\"b\\n\"");
    }
}
