//! Block lifting
//!
//! This module provides the BlockLifter that simulates the CIL evaluation stack
//! of every basic block and turns its instructions into expression statements
//! plus a [`Terminator`]. Values still on the stack at a block boundary are
//! written to stack-slot variables, so every lifted block starts empty and the
//! later stages never look at bytecode again.

use crate::ast::{Expr, LocalId, LocalKind, MethodContext};
use crate::cfg::{Cfg, FlowGraph, FlowNode, Terminator};
use crate::error::{Error, Result};
use crate::il::{Instruction, Offset, Opcode};
use crate::metadata::{ExceptionRegionKind, ResolverContext, Token, TypeSig};
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, VecDeque};

mod arithmetic;
mod constants;
mod functions;
mod jump;
mod objects;
mod variables;

use arithmetic::ArithmeticHelpers;
use constants::ConstantHelpers;
use functions::FunctionHelpers;
use jump::JumpHelpers;
use objects::ObjectHelpers;
use variables::VariableHelpers;

/// Result of lifting one instruction
#[derive(Debug)]
pub enum InstructionResult {
    /// The instruction only touched the stack or emitted statements
    None,
    /// The instruction ends the block
    Terminator(Terminator),
}

/// Lift every block of a method into a [`FlowGraph`] whose node indices match
/// the CFG's. The synthetic EXIT node is kept as a removed placeholder.
pub fn lift_method(
    cfg: &Cfg,
    context: &mut MethodContext,
    resolver: ResolverContext<'_>,
) -> Result<FlowGraph> {
    BlockLifter::new(cfg, context, resolver).run()
}

/// Converts the instructions of one method, block by block
pub struct BlockLifter<'a, 'r> {
    cfg: &'a Cfg,
    context: &'a mut MethodContext,
    resolver: ResolverContext<'r>,
    return_type: Option<TypeSig>,
    /// Stack-slot variables holding the incoming stack of each block
    entry_stacks: HashMap<NodeIndex, Vec<LocalId>>,
    next_slot: usize,
    stack: Vec<Expr>,
    statements: Vec<Expr>,
    /// Offset of the instruction being lifted
    offset: Offset,
}

impl<'a, 'r> BlockLifter<'a, 'r> {
    pub fn new(cfg: &'a Cfg, context: &'a mut MethodContext, resolver: ResolverContext<'r>) -> Self {
        let return_type = resolver
            .method(Token(context.method.0))
            .ok()
            .and_then(|m| m.return_type);
        Self {
            cfg,
            context,
            resolver,
            return_type,
            entry_stacks: HashMap::new(),
            next_slot: 0,
            stack: Vec::new(),
            statements: Vec::new(),
            offset: 0,
        }
    }

    /// Lift reachable blocks breadth-first so every block sees its incoming
    /// stack before it is lifted, then the unreachable rest with empty stacks
    pub fn run(mut self) -> Result<FlowGraph> {
        let cfg = self.cfg;
        let graph = cfg.graph();
        let mut nodes: Vec<Option<FlowNode>> = vec![None; graph.node_count()];
        let mut queue = VecDeque::new();

        self.entry_stacks.insert(cfg.entry(), Vec::new());
        queue.push_back(cfg.entry());
        for node in cfg.blocks_in_order() {
            if let Some(index) = graph[node].handler_of {
                let stack = self.handler_stack(index);
                self.entry_stacks.insert(node, stack);
                queue.push_back(node);
            }
        }

        while let Some(node) = queue.pop_front() {
            if nodes[node.index()].is_some() {
                continue;
            }
            let flow = self.lift_block(node)?;
            for succ in flow.terminator.successors() {
                if nodes[succ.index()].is_none() {
                    queue.push_back(succ);
                }
            }
            nodes[node.index()] = Some(flow);
        }

        for node in cfg.blocks_in_order() {
            if nodes[node.index()].is_some() {
                continue;
            }
            self.entry_stacks.entry(node).or_default();
            let flow = match self.lift_block(node) {
                Ok(flow) => flow,
                Err(e) => {
                    // Dead code is only ever rendered as a stub
                    log::debug!("Unreachable block at IL_{:04x} does not lift: {}", graph[node].start_offset, e);
                    FlowNode::new(graph[node].start_offset, Vec::new(), Terminator::Throw(None))
                }
            };
            nodes[node.index()] = Some(flow);
        }

        let mut exit = FlowNode::new(Offset::MAX, Vec::new(), Terminator::Return(None));
        exit.removed = true;
        let nodes: Vec<FlowNode> = nodes
            .into_iter()
            .map(|n| n.unwrap_or_else(|| exit.clone()))
            .collect();

        let mut flow = FlowGraph {
            nodes,
            entry: self.cfg.entry(),
        };
        let try_starts: Vec<Offset> = cfg.regions().iter().map(|r| r.try_offset).collect();
        flow.thread_forwarders(&try_starts);
        log::debug!(
            "Lifted {}: {} blocks, {} stack slots",
            self.context.name,
            self.cfg.block_count(),
            self.next_slot
        );
        Ok(flow)
    }

    /// Catch handlers start with the exception object on the stack
    fn handler_stack(&mut self, region: usize) -> Vec<LocalId> {
        match self.cfg.regions().get(region).map(|r| &r.kind) {
            Some(ExceptionRegionKind::Catch { exception_type }) => {
                let ty = exception_type.map(TypeSig::Named);
                vec![self.context.new_local(LocalKind::Exception, ty)]
            }
            Some(ExceptionRegionKind::Filter { .. }) => {
                vec![self.context.new_local(LocalKind::Exception, None)]
            }
            _ => Vec::new(),
        }
    }

    fn lift_block(&mut self, node: NodeIndex) -> Result<FlowNode> {
        let cfg = self.cfg;
        let block = &cfg.graph()[node];
        let entry = self.entry_stacks.get(&node).cloned().unwrap_or_default();
        self.stack = entry.iter().map(|l| Expr::Local(*l)).collect();
        self.statements = Vec::new();
        self.offset = block.start_offset;

        let mut terminator = None;
        for insn in &block.instructions {
            self.offset = insn.offset;
            if let InstructionResult::Terminator(t) = self.lift_instruction(insn)? {
                terminator = Some(t);
            }
        }
        let mut terminator = match terminator {
            Some(t) => t,
            None => {
                let next = block.end_offset;
                Terminator::Goto(self.target(next)?)
            }
        };
        self.finish_block(&mut terminator)?;

        let mut flow = FlowNode::new(
            block.start_offset,
            std::mem::take(&mut self.statements),
            terminator,
        );
        flow.handler_of = block.handler_of;
        Ok(flow)
    }

    /// Convert one instruction
    pub fn lift_instruction(&mut self, insn: &Instruction) -> Result<InstructionResult> {
        match &insn.opcode {
            Opcode::Nop | Opcode::Constrained(_) => {}

            // Variables
            Opcode::LdArg(i) => self.load_arg(*i)?,
            Opcode::LdArgA(i) => self.load_arg_address(*i)?,
            Opcode::StArg(i) => self.store_arg(*i)?,
            Opcode::LdLoc(i) => self.load_local(*i)?,
            Opcode::LdLocA(i) => self.load_local_address(*i)?,
            Opcode::StLoc(i) => self.store_local(*i)?,

            // Constants
            Opcode::LdNull => self.push(Expr::null()),
            Opcode::LdcI4(v) => self.push(Expr::int(*v as i64)),
            Opcode::LdcI8(v) => self.push(Expr::int(*v)),
            Opcode::LdcR4(v) => self.push_float(*v as f64),
            Opcode::LdcR8(v) => self.push_float(*v),
            Opcode::LdStr(token) => self.load_string(*token)?,

            // Stack
            Opcode::Dup => self.duplicate()?,
            Opcode::Pop => {
                let value = self.pop()?;
                if value.has_side_effects() {
                    self.emit(value);
                }
            }

            // Arithmetic
            Opcode::Arith(op) => self.create_binary_operation(*op)?,
            Opcode::Neg | Opcode::Not => self.create_unary_operation(&insn.opcode)?,
            Opcode::Conv(kind) => self.create_conversion(*kind)?,
            Opcode::Compare { cmp, unsigned } => self.create_comparison(*cmp, *unsigned)?,

            // Calls
            Opcode::Call(token) | Opcode::CallVirt(token) => self.create_call(*token)?,
            Opcode::NewObj(token) => self.create_new_object(*token)?,

            // Objects and arrays
            Opcode::LdFld(token) => self.load_field(*token, false)?,
            Opcode::LdFldA(token) => self.load_field(*token, true)?,
            Opcode::StFld(token) => self.store_field(*token)?,
            Opcode::LdSFld(token) => self.load_static_field(*token, false)?,
            Opcode::LdSFldA(token) => self.load_static_field(*token, true)?,
            Opcode::StSFld(token) => self.store_static_field(*token)?,
            Opcode::NewArr(token) => self.create_new_array(*token)?,
            Opcode::LdLen => {
                let array = self.pop()?;
                self.push(Expr::ArrayLength(Box::new(array)));
            }
            Opcode::LdElem => self.load_element(false)?,
            Opcode::LdElemA(_) => self.load_element(true)?,
            Opcode::StElem => self.store_element()?,
            Opcode::CastClass(token) | Opcode::UnboxAny(token) => self.create_cast(*token, false)?,
            Opcode::IsInst(token) => self.create_cast(*token, true)?,
            Opcode::Box(_) => {}
            Opcode::InitObj(token) => self.init_object(*token)?,

            // Control transfer
            Opcode::Br(target) => {
                return Ok(InstructionResult::Terminator(Terminator::Goto(self.target(*target)?)))
            }
            Opcode::BrTrue(target) => return self.build_truthiness_jump(*target, insn.next_offset(), true),
            Opcode::BrFalse(target) => return self.build_truthiness_jump(*target, insn.next_offset(), false),
            Opcode::BranchCmp {
                cmp,
                unsigned,
                target,
            } => return self.build_comparison_jump(*cmp, *unsigned, *target, insn.next_offset()),
            Opcode::Switch(targets) => return self.build_jump_table(targets, insn.next_offset()),
            Opcode::Ret => return self.build_return(),
            Opcode::Throw => {
                let exception = self.pop()?;
                return Ok(InstructionResult::Terminator(Terminator::Throw(Some(exception))));
            }
            Opcode::Rethrow => return Ok(InstructionResult::Terminator(Terminator::Throw(None))),
            Opcode::Leave(target) => {
                return Ok(InstructionResult::Terminator(Terminator::Leave(self.target(*target)?)))
            }
            Opcode::EndFinally => return Ok(InstructionResult::Terminator(Terminator::EndFinally)),
        }
        Ok(InstructionResult::None)
    }

    // ===== Stack =====

    pub(super) fn push(&mut self, value: Expr) {
        self.stack.push(value);
    }

    pub(super) fn pop(&mut self) -> Result<Expr> {
        self.stack
            .pop()
            .ok_or_else(|| Error::invalid_flow(self.offset, "evaluation stack underflow"))
    }

    /// Pop `count` values, returned in push order
    pub(super) fn pop_n(&mut self, count: usize) -> Result<Vec<Expr>> {
        if self.stack.len() < count {
            return Err(Error::invalid_flow(self.offset, "evaluation stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn duplicate(&mut self) -> Result<()> {
        let top = self.pop()?;
        let top = match top {
            Expr::Const(_) | Expr::Local(_) | Expr::Arg(_) | Expr::This => top,
            other => Expr::Local(self.spill(other)),
        };
        self.push(top.clone());
        self.push(top);
        Ok(())
    }

    /// Store a value in a fresh temporary
    pub(super) fn spill(&mut self, value: Expr) -> LocalId {
        let ty = self.context.expr_type(&value);
        let temp = self.context.new_local(LocalKind::Temporary, ty);
        self.statements.push(Expr::assign(Expr::Local(temp), value));
        temp
    }

    /// Append a statement, first spilling pending stack values it would
    /// otherwise reorder or clobber
    pub(super) fn emit(&mut self, statement: Expr) {
        let touches_memory = statement.any(&|e| matches!(e, Expr::Call { .. } | Expr::New { .. }))
            || matches!(
                statement.as_assignment(),
                Some((Expr::Field { .. } | Expr::ArrayElement { .. }, _))
            );
        let mut written: Vec<Expr> = Vec::new();
        if let Some((target, _)) = statement.as_assignment() {
            if matches!(target, Expr::Local(_) | Expr::Arg(_)) {
                written.push(target.clone());
            }
        }
        statement.walk(&mut |e| {
            if let Expr::AddressOf(inner) | Expr::Out { target: inner, .. } = e {
                if matches!(inner.as_ref(), Expr::Local(_) | Expr::Arg(_)) {
                    written.push((**inner).clone());
                }
            }
        });

        for i in 0..self.stack.len() {
            let entry = &self.stack[i];
            let conflict = entry.has_side_effects()
                || (touches_memory && reads_memory(entry))
                || written.iter().any(|w| entry.any(&|e| e == w));
            if conflict {
                let value = std::mem::replace(&mut self.stack[i], Expr::null());
                let temp = self.spill(value);
                self.stack[i] = Expr::Local(temp);
            }
        }
        self.statements.push(statement);
    }

    /// Hand the leftover stack to the successors through stack-slot variables
    fn finish_block(&mut self, terminator: &mut Terminator) -> Result<()> {
        let values = std::mem::take(&mut self.stack);
        if values.is_empty() {
            return Ok(());
        }
        let successors = match &*terminator {
            Terminator::Return(_) | Terminator::Throw(_) | Terminator::Leave(_) | Terminator::EndFinally => {
                // These empty the stack; keep effects only
                for value in values {
                    if value.has_side_effects() {
                        self.statements.push(value);
                    }
                }
                return Ok(());
            }
            other => other.successors(),
        };

        let mut slot_sets: Vec<Vec<LocalId>> = Vec::new();
        for succ in successors {
            let slots = match self.entry_stacks.get(&succ) {
                Some(slots) if slots.len() != values.len() => {
                    return Err(Error::invalid_flow(
                        self.offset,
                        format!(
                            "stack height {} does not match {} at IL_{:04x}",
                            values.len(),
                            slots.len(),
                            self.cfg.graph()[succ].start_offset
                        ),
                    ))
                }
                Some(slots) => slots.clone(),
                None => {
                    let slots: Vec<LocalId> = values
                        .iter()
                        .map(|v| {
                            let ty = self.context.expr_type(v);
                            let slot = self.next_slot;
                            self.next_slot += 1;
                            self.context.new_local(LocalKind::StackSlot(slot), ty)
                        })
                        .collect();
                    self.entry_stacks.insert(succ, slots.clone());
                    slots
                }
            };
            if !slot_sets.contains(&slots) {
                slot_sets.push(slots);
            }
        }
        let Some(first) = slot_sets.first().cloned() else {
            return Ok(());
        };

        let targets: Vec<LocalId> = slot_sets.iter().flatten().copied().collect();
        let reads_target = terminator
            .exprs()
            .iter()
            .any(|e| targets.iter().any(|t| e.reads_local(*t)));
        if reads_target {
            self.spill_terminator(terminator);
        }

        for (slot, value) in first.iter().zip(values) {
            if value.as_local() != Some(*slot) {
                self.statements.push(Expr::assign(Expr::Local(*slot), value));
            }
        }
        for other in &slot_sets[1..] {
            for (slot, source) in other.iter().zip(&first) {
                self.statements
                    .push(Expr::assign(Expr::Local(*slot), Expr::Local(*source)));
            }
        }
        Ok(())
    }

    fn spill_terminator(&mut self, terminator: &mut Terminator) {
        let value = match terminator {
            Terminator::Branch { condition, .. } => condition,
            Terminator::JumpTable { value, .. } => value,
            _ => return,
        };
        let taken = std::mem::replace(value, Expr::null());
        let temp = self.spill(taken);
        *value = Expr::Local(temp);
    }

    /// Block starting at an IL offset
    pub(super) fn target(&self, offset: Offset) -> Result<NodeIndex> {
        self.cfg.block_at(offset).ok_or_else(|| {
            Error::invalid_flow(self.offset, format!("no block starts at IL_{:04x}", offset))
        })
    }
}

/// Whether an expression reads state a call or store could change
fn reads_memory(expr: &Expr) -> bool {
    expr.any(&|e| {
        matches!(
            e,
            Expr::Field { .. } | Expr::ArrayElement { .. } | Expr::ArrayLength(_)
        )
    })
}

/// Receivers are written without the managed address taken by the IL
pub(super) fn strip_address(value: Expr) -> Expr {
    match value {
        Expr::AddressOf(inner) => *inner,
        other => other,
    }
}
