use log::{debug, trace, warn};

use crate::attribute_info::{
    CodeAttribute, LocalVariableTableAttribute, LocalVariableTypeTableAttribute, MethodParametersAttribute,
};
use crate::code_attribute::{
    ArithOp, BranchOperands, CondOp, FieldOp, InsnKind, Instruction, InvokeKind, StackOp, ValueKind,
};
use crate::error::{DecompileError, Result};
use crate::metadata::{Constant, MetadataTable};
use crate::method_info::MethodInfo;

use super::cfg_types::*;
use super::descriptor::*;
use super::expr::*;
use super::signature::parse_field_signature;

/// A LocalVariableTable row with its names resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopedName {
    pub start: u32,
    pub end: u32,
    pub slot: u16,
    pub name: String,
    pub ty: Option<JvmType>,
}

/// Everything about the enclosing method the simulator needs.
#[derive(Clone, Debug)]
pub struct MethodFrame {
    pub this_class: String,
    pub is_static: bool,
    pub ret: JvmType,
    pub max_locals: u16,
    /// Declared parameters, `this` excluded.
    pub params: Vec<LocalVar>,
    pub locals: Vec<ScopedName>,
}

impl MethodFrame {
    /// Variable named by the LocalVariableTable for `slot` at `pc`.
    pub fn scoped(&self, slot: u16, pc: u32) -> Option<&ScopedName> {
        self.locals
            .iter()
            .find(|l| l.slot == slot && l.start <= pc && pc < l.end)
    }
}

/// Reads the LocalVariableTable of a Code attribute. Rows also listed in the
/// LocalVariableTypeTable get their generic type. An unreadable table is skipped.
pub fn local_variable_table(meta: &MetadataTable, code: &CodeAttribute) -> Vec<ScopedName> {
    let table = match meta.interpret_attribute::<LocalVariableTableAttribute>(&code.attributes, "LocalVariableTable") {
        Some(Ok(table)) => table,
        Some(Err(err)) => {
            debug!("skipping LocalVariableTable: {err}");
            return Vec::new();
        }
        None => return Vec::new(),
    };
    let mut locals: Vec<ScopedName> = table
        .items
        .iter()
        .filter_map(|item| {
            let name = meta.utf8(item.name_index).ok()?;
            Some(ScopedName {
                start: item.start_pc as u32,
                end: item.start_pc as u32 + item.length as u32,
                slot: item.index,
                name: name.to_string(),
                ty: meta
                    .utf8(item.descriptor_index)
                    .ok()
                    .and_then(parse_type_descriptor),
            })
        })
        .collect();

    let generic = match meta
        .interpret_attribute::<LocalVariableTypeTableAttribute>(&code.attributes, "LocalVariableTypeTable")
    {
        Some(Ok(table)) => table.items,
        Some(Err(err)) => {
            debug!("skipping LocalVariableTypeTable: {err}");
            Vec::new()
        }
        None => Vec::new(),
    };
    for item in generic {
        let Some(ty) = meta.utf8(item.signature_index).ok().and_then(parse_field_signature) else {
            continue;
        };
        let start = item.start_pc as u32;
        if let Some(local) = locals
            .iter_mut()
            .find(|l| l.slot == item.index && l.start == start)
        {
            local.ty = Some(ty);
        }
    }
    locals
}

/// Parameter variables with their slots. Names come from the LocalVariableTable, then
/// the MethodParameters attribute, then `param{i}`.
pub fn parameter_vars(
    meta: &MetadataTable,
    method: &MethodInfo,
    descriptor: &MethodDescriptor,
    is_static: bool,
    locals: &[ScopedName],
) -> Vec<LocalVar> {
    let declared: Vec<Option<String>> =
        match meta.interpret_attribute::<MethodParametersAttribute>(&method.attributes, "MethodParameters") {
            Some(Ok(attr)) => attr
                .parameters
                .iter()
                .map(|p| match p.name_index {
                    0 => None,
                    index => meta.utf8(index).ok().map(str::to_string),
                })
                .collect(),
            _ => Vec::new(),
        };

    let mut slot: u16 = if is_static { 0 } else { 1 };
    let mut vars = Vec::with_capacity(descriptor.params.len());
    for (i, ty) in descriptor.params.iter().enumerate() {
        let name = locals
            .iter()
            .find(|l| l.slot == slot && l.start == 0)
            .map(|l| l.name.clone())
            .or_else(|| declared.get(i).cloned().flatten())
            .unwrap_or_else(|| format!("param{i}"));
        vars.push(LocalVar {
            slot,
            name,
            ty: ty.clone(),
        });
        slot += ty.slot_size();
    }
    vars
}

/// Result of simulating one basic block.
#[derive(Clone, Debug, Default)]
pub struct SimulatedBlock {
    pub statements: Vec<Stmt>,
    /// Condition under which a conditional branch is taken.
    pub condition: Option<Expr>,
    /// Value a switch dispatches on.
    pub selector: Option<Expr>,
    pub exit_stack: Vec<Expr>,
    /// Set on the condition block of a `?:` merge: control continues at this join.
    pub folded_into: Option<BlockId>,
    /// Set on the two value arms of a `?:` merge.
    pub absorbed: bool,
    /// Why the block could not be simulated. Its statements are then empty.
    pub failure: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Simulation {
    pub blocks: Vec<SimulatedBlock>,
    pub diagnostics: Vec<DecompileError>,
}

#[derive(Clone, Debug)]
struct Slot {
    kind: ValueKind,
    ty: JvmType,
    name: String,
}

#[derive(Default)]
struct BlockState {
    stack: Vec<Expr>,
    statements: Vec<Stmt>,
    condition: Option<Expr>,
    selector: Option<Expr>,
}

impl BlockState {
    fn pop(&mut self, offset: u32) -> Result<Expr> {
        self.stack.pop().ok_or(DecompileError::StackUnderflow { offset })
    }

    /// Pops `n` values, returned in push order.
    fn pop_n(&mut self, n: usize, offset: u32) -> Result<Vec<Expr>> {
        if self.stack.len() < n {
            return Err(DecompileError::StackUnderflow { offset });
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }
}

/// Simulate every block of `cfg` in offset order.
pub fn simulate(cfg: &ControlFlowGraph, frame: &MethodFrame) -> Simulation {
    let mut sim = Simulator::new(cfg, frame);
    for id in 0..cfg.len() {
        let entry = sim.entry_stack(id);
        let block = sim.run_block(id, entry);
        sim.blocks.push(block);
    }
    Simulation {
        blocks: sim.blocks,
        diagnostics: sim.diagnostics,
    }
}

struct Simulator<'a> {
    cfg: &'a ControlFlowGraph,
    frame: &'a MethodFrame,
    slots: Vec<Option<Slot>>,
    /// Slots written by some store anywhere in the method.
    assigned: Vec<bool>,
    blocks: Vec<SimulatedBlock>,
    diagnostics: Vec<DecompileError>,
    temps: usize,
}

impl<'a> Simulator<'a> {
    fn new(cfg: &'a ControlFlowGraph, frame: &'a MethodFrame) -> Self {
        let needed = frame
            .params
            .iter()
            .map(|p| p.slot + p.ty.slot_size())
            .max()
            .unwrap_or(0);
        let size = frame.max_locals.max(needed).max(1) as usize;
        let mut slots: Vec<Option<Slot>> = vec![None; size];
        if !frame.is_static {
            slots[0] = Some(Slot {
                kind: ValueKind::Reference,
                ty: JvmType::Reference(frame.this_class.clone()),
                name: "this".into(),
            });
        }
        for param in &frame.params {
            slots[param.slot as usize] = Some(Slot {
                kind: value_kind(&param.ty),
                ty: param.ty.clone(),
                name: param.name.clone(),
            });
        }

        let mut assigned = vec![false; size];
        for insn in &cfg.instructions {
            if let InsnKind::Store { slot, .. } = insn.kind {
                if let Some(flag) = assigned.get_mut(slot as usize) {
                    *flag = true;
                }
            }
        }

        Simulator {
            cfg,
            frame,
            slots,
            assigned,
            blocks: Vec::with_capacity(cfg.len()),
            diagnostics: Vec::new(),
            temps: 0,
        }
    }

    fn entry_stack(&mut self, id: BlockId) -> Vec<Expr> {
        if id == 0 {
            return Vec::new();
        }
        if let Some(handler) = self.cfg.handler_type(id) {
            return vec![Expr::CaughtException(handler.catch_type.clone())];
        }
        let preds: Vec<BlockId> = self
            .cfg
            .predecessors(id)
            .iter()
            .copied()
            .filter(|&p| p < id)
            .collect();
        let Some(&first) = preds.first() else {
            return Vec::new();
        };
        if let Some(stack) = self.ternary_join(id, &preds) {
            return stack;
        }

        let base = &self.blocks[first].exit_stack;
        if preds.iter().all(|&p| self.blocks[p].exit_stack == *base) {
            return base.clone();
        }
        debug!("block {id}: predecessors disagree on the operand stack");
        let shortest = preds
            .iter()
            .map(|&p| self.blocks[p].exit_stack.len())
            .min()
            .unwrap_or(0);
        (0..shortest)
            .map(|i| {
                let value = &base[i];
                if preds.iter().all(|&p| self.blocks[p].exit_stack[i] == *value) {
                    value.clone()
                } else {
                    Expr::Unresolved("merged stack value".into())
                }
            })
            .collect()
    }

    /// Recognizes `cond ? a : b`: two single-block value arms of one conditional branch
    /// that both flow into `join` with one extra value on the stack.
    fn ternary_join(&mut self, join: BlockId, preds: &[BlockId]) -> Option<Vec<Expr>> {
        let &[a, b] = preds else {
            return None;
        };
        let (&[ca], &[cb]) = (self.cfg.predecessors(a), self.cfg.predecessors(b)) else {
            return None;
        };
        if ca != cb {
            return None;
        }
        let cond_block = ca;
        let Terminator::Branch { taken, not_taken } = self.cfg.block(cond_block).terminator else {
            return None;
        };
        if !((taken == a && not_taken == b) || (taken == b && not_taken == a)) {
            return None;
        }
        for arm in [a, b] {
            let flows_to_join = matches!(
                self.cfg.block(arm).terminator,
                Terminator::FallThrough(t) | Terminator::Goto(t) if t == join
            );
            let sim = &self.blocks[arm];
            if !flows_to_join || !sim.statements.is_empty() || sim.failure.is_some() {
                return None;
            }
        }
        let condition = self.blocks[cond_block].condition.clone()?;
        let taken_stack = &self.blocks[taken].exit_stack;
        let not_taken_stack = &self.blocks[not_taken].exit_stack;
        let depth = taken_stack.len();
        if depth == 0
            || not_taken_stack.len() != depth
            || taken_stack[..depth - 1] != not_taken_stack[..depth - 1]
        {
            return None;
        }

        let mut stack = taken_stack[..depth - 1].to_vec();
        stack.push(Expr::Ternary {
            condition: Box::new(condition.negate()),
            then_value: Box::new(not_taken_stack[depth - 1].clone()),
            else_value: Box::new(taken_stack[depth - 1].clone()),
        });
        trace!("block {join}: ?: merge of blocks {a} and {b}");
        self.blocks[cond_block].folded_into = Some(join);
        self.blocks[a].absorbed = true;
        self.blocks[b].absorbed = true;
        Some(stack)
    }

    fn run_block(&mut self, id: BlockId, entry: Vec<Expr>) -> SimulatedBlock {
        let mut state = BlockState {
            stack: entry,
            ..BlockState::default()
        };
        for insn in self.cfg.instructions_of(id) {
            if matches!(insn.kind, InsnKind::Jsr { .. } | InsnKind::Ret { .. }) {
                warn!("unsupported instruction {} at offset {}", insn.mnemonic(), insn.offset);
                return SimulatedBlock {
                    failure: Some(format!("unsupported instruction {}", insn.mnemonic())),
                    ..SimulatedBlock::default()
                };
            }
            if let Err(err) = self.step(insn, &mut state) {
                warn!("block {id}: {err}");
                self.diagnostics.push(err.clone());
                return SimulatedBlock {
                    failure: Some(err.to_string()),
                    ..SimulatedBlock::default()
                };
            }
        }
        trace!(
            "block {id}: {} statements, exit stack depth {}",
            state.statements.len(),
            state.stack.len()
        );
        SimulatedBlock {
            statements: state.statements,
            condition: state.condition,
            selector: state.selector,
            exit_stack: state.stack,
            ..SimulatedBlock::default()
        }
    }

    fn step(&mut self, insn: &Instruction, st: &mut BlockState) -> Result<()> {
        let offset = insn.offset;
        match &insn.kind {
            InsnKind::Nop | InsnKind::Goto { .. } | InsnKind::Jsr { .. } | InsnKind::Ret { .. } => {}
            InsnKind::Null => st.stack.push(Expr::Null),
            InsnKind::Const(c) => st.stack.push(constant_expr(c)),
            InsnKind::Load { kind, slot } => {
                let value = self.load(*slot, *kind, offset)?;
                st.stack.push(value);
            }
            InsnKind::Store { kind, slot } => {
                let value = st.pop(offset)?;
                self.spill_mentions(*slot, st);
                let stmt = self.store(*slot, *kind, value, insn)?;
                st.statements.push(stmt);
            }
            InsnKind::Iinc { slot, delta } => {
                let var = match self.load(*slot, ValueKind::Int, offset)? {
                    Expr::Local(var) => var,
                    _ => return Err(DecompileError::UnresolvedSlot { offset, slot: *slot }),
                };
                self.spill_mentions(*slot, st);
                st.statements.push(Stmt::Iinc {
                    var,
                    delta: *delta as i32,
                });
            }
            InsnKind::ArrayLoad(_) => {
                let index = st.pop(offset)?;
                let array = st.pop(offset)?;
                st.stack.push(Expr::ArrayLoad {
                    array: Box::new(array),
                    index: Box::new(index),
                });
            }
            InsnKind::ArrayStore(_) => {
                let value = st.pop(offset)?;
                let index = st.pop(offset)?;
                let array = st.pop(offset)?;
                let value = match self.type_of(&array) {
                    JvmType::Array(element) => value.coerce(&element),
                    _ => value,
                };
                st.statements.push(Stmt::ArrayStore { array, index, value });
            }
            InsnKind::Stack(op) => self.stack_op(*op, st, offset)?,
            InsnKind::Arith { op, .. } => {
                let right = st.pop(offset)?;
                let left = st.pop(offset)?;
                st.stack.push(Expr::binary(bin_op(*op), left, right));
            }
            InsnKind::Neg(_) => {
                let operand = st.pop(offset)?;
                st.stack.push(Expr::Negate(Box::new(operand)));
            }
            InsnKind::Convert { to, .. } => {
                let operand = st.pop(offset)?;
                st.stack.push(Expr::Cast {
                    ty: to.to_type(),
                    operand: Box::new(operand),
                });
            }
            InsnKind::Compare(kind) => {
                let right = st.pop(offset)?;
                let left = st.pop(offset)?;
                st.stack.push(Expr::CmpResult {
                    kind: *kind,
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
            InsnKind::If { cond, operands, .. } => {
                let condition = match operands {
                    BranchOperands::IntZero => zero_test(*cond, st.pop(offset)?, self),
                    BranchOperands::IntPair | BranchOperands::RefPair => {
                        let right = st.pop(offset)?;
                        let left = st.pop(offset)?;
                        let right = right.coerce(&self.type_of(&left));
                        Expr::compare(*cond, left, right)
                    }
                    BranchOperands::RefNull => Expr::compare(*cond, st.pop(offset)?, Expr::Null),
                };
                st.condition = Some(condition);
            }
            InsnKind::TableSwitch { .. } | InsnKind::LookupSwitch { .. } => {
                st.selector = Some(st.pop(offset)?);
            }
            InsnKind::Return(None) => st.statements.push(Stmt::Return(None)),
            InsnKind::Return(Some(_)) => {
                let value = st.pop(offset)?.coerce(&self.frame.ret);
                st.statements.push(Stmt::Return(Some(value)));
            }
            InsnKind::Field { op, field } => {
                let ty = parse_type_descriptor(&field.descriptor).unwrap_or(JvmType::Unknown);
                match op {
                    FieldOp::GetStatic => st.stack.push(Expr::FieldGet {
                        object: None,
                        owner: field.owner.clone(),
                        name: field.name.clone(),
                        ty,
                    }),
                    FieldOp::GetField => {
                        let object = st.pop(offset)?;
                        st.stack.push(Expr::FieldGet {
                            object: Some(Box::new(object)),
                            owner: field.owner.clone(),
                            name: field.name.clone(),
                            ty,
                        });
                    }
                    FieldOp::PutStatic => {
                        let value = st.pop(offset)?.coerce(&ty);
                        st.statements.push(Stmt::FieldStore {
                            object: None,
                            owner: field.owner.clone(),
                            name: field.name.clone(),
                            value,
                        });
                    }
                    FieldOp::PutField => {
                        let value = st.pop(offset)?.coerce(&ty);
                        let object = st.pop(offset)?;
                        st.statements.push(Stmt::FieldStore {
                            object: Some(object),
                            owner: field.owner.clone(),
                            name: field.name.clone(),
                            value,
                        });
                    }
                }
            }
            InsnKind::Invoke { kind, method } => {
                let desc = parse_method_descriptor(&method.descriptor).ok_or_else(|| {
                    DecompileError::ClassFormat {
                        message: format!("bad method descriptor {}", method.descriptor),
                    }
                })?;
                let args = st
                    .pop_n(desc.params.len(), offset)?
                    .into_iter()
                    .zip(&desc.params)
                    .map(|(arg, ty)| arg.coerce(ty))
                    .collect::<Vec<_>>();
                let receiver = match kind {
                    InvokeKind::Static => None,
                    _ => Some(st.pop(offset)?),
                };

                if method.name == "<init>" {
                    match receiver {
                        Some(Expr::UninitNew(class)) => {
                            let created = Expr::New { class, args };
                            if !replace_uninit_new(&mut st.stack, &created) {
                                st.statements.push(Stmt::Expr(created));
                            }
                        }
                        Some(Expr::This) => st.statements.push(Stmt::Expr(Expr::ConstructorCall {
                            is_super: method.owner != self.frame.this_class,
                            args,
                        })),
                        other => st.statements.push(Stmt::Expr(Expr::Invoke {
                            kind: *kind,
                            object: other.map(Box::new),
                            owner: method.owner.clone(),
                            name: method.name.clone(),
                            args,
                            ret: JvmType::Void,
                        })),
                    }
                    return Ok(());
                }

                // invokespecial on a private method of this class is an ordinary call
                let kind = match kind {
                    InvokeKind::Special if method.owner == self.frame.this_class => InvokeKind::Virtual,
                    k => *k,
                };
                let call = Expr::Invoke {
                    kind,
                    object: receiver.map(Box::new),
                    owner: method.owner.clone(),
                    name: method.name.clone(),
                    args,
                    ret: desc.ret.clone(),
                };
                push_or_emit(call, &desc.ret, st);
            }
            InsnKind::InvokeDynamic { name, descriptor } => {
                let desc = parse_method_descriptor(descriptor).ok_or_else(|| DecompileError::ClassFormat {
                    message: format!("bad invokedynamic descriptor {descriptor}"),
                })?;
                let args = st.pop_n(desc.params.len(), offset)?;
                let call = Expr::InvokeDynamic {
                    name: name.clone(),
                    args,
                };
                push_or_emit(call, &desc.ret, st);
            }
            InsnKind::New(class) => st.stack.push(Expr::UninitNew(class.clone())),
            InsnKind::NewArray(element) => {
                let length = st.pop(offset)?;
                st.stack.push(Expr::NewArray {
                    element: element.clone(),
                    length: Box::new(length),
                });
            }
            InsnKind::MultiNewArray { ty, dimensions } => {
                let dimensions = st.pop_n(*dimensions as usize, offset)?;
                st.stack.push(Expr::NewMultiArray {
                    ty: ty.clone(),
                    dimensions,
                });
            }
            InsnKind::ArrayLength => {
                let array = st.pop(offset)?;
                st.stack.push(Expr::ArrayLength(Box::new(array)));
            }
            InsnKind::Throw => {
                let value = st.pop(offset)?;
                st.statements.push(Stmt::Throw(value));
            }
            InsnKind::CheckCast(ty) => {
                let operand = st.pop(offset)?;
                st.stack.push(Expr::Cast {
                    ty: ty.clone(),
                    operand: Box::new(operand),
                });
            }
            InsnKind::InstanceOf(ty) => {
                let operand = st.pop(offset)?;
                st.stack.push(Expr::InstanceOf {
                    operand: Box::new(operand),
                    ty: ty.clone(),
                });
            }
            InsnKind::MonitorEnter => {
                let lock = st.pop(offset)?;
                // `dup; astore n; monitorenter` locks the copy kept for monitorexit
                let lock = match st.statements.last() {
                    Some(Stmt::LocalStore { var, value, .. }) if *value == lock => Expr::Local(var.clone()),
                    _ => lock,
                };
                st.statements.push(Stmt::MonitorEnter(lock));
            }
            InsnKind::MonitorExit => {
                let lock = st.pop(offset)?;
                st.statements.push(Stmt::MonitorExit(lock));
            }
        }
        Ok(())
    }

    fn stack_op(&mut self, op: StackOp, st: &mut BlockState, offset: u32) -> Result<()> {
        match op {
            StackOp::Pop => {
                let value = st.pop(offset)?;
                discard(value, st);
            }
            StackOp::Pop2 => {
                let value = st.pop(offset)?;
                let wide = self.is_wide(&value);
                discard(value, st);
                if !wide {
                    let value = st.pop(offset)?;
                    discard(value, st);
                }
            }
            StackOp::Dup => {
                let v1 = st.pop(offset)?;
                let v1 = self.spill(v1, st);
                st.stack.extend([v1.clone(), v1]);
            }
            StackOp::DupX1 => {
                let v1 = st.pop(offset)?;
                let v2 = st.pop(offset)?;
                let v1 = self.spill(v1, st);
                st.stack.extend([v1.clone(), v2, v1]);
            }
            StackOp::DupX2 => {
                let v1 = st.pop(offset)?;
                let v2 = st.pop(offset)?;
                let v1 = self.spill(v1, st);
                if self.is_wide(&v2) {
                    st.stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v3 = st.pop(offset)?;
                    st.stack.extend([v1.clone(), v3, v2, v1]);
                }
            }
            StackOp::Dup2 => {
                let v1 = st.pop(offset)?;
                if self.is_wide(&v1) {
                    let v1 = self.spill(v1, st);
                    st.stack.extend([v1.clone(), v1]);
                } else {
                    let v2 = st.pop(offset)?;
                    let v2 = self.spill(v2, st);
                    let v1 = self.spill(v1, st);
                    st.stack.extend([v2.clone(), v1.clone(), v2, v1]);
                }
            }
            StackOp::Dup2X1 => {
                let v1 = st.pop(offset)?;
                if self.is_wide(&v1) {
                    let v2 = st.pop(offset)?;
                    let v1 = self.spill(v1, st);
                    st.stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v2 = st.pop(offset)?;
                    let v3 = st.pop(offset)?;
                    let v2 = self.spill(v2, st);
                    let v1 = self.spill(v1, st);
                    st.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                }
            }
            StackOp::Dup2X2 => {
                let v1 = st.pop(offset)?;
                if self.is_wide(&v1) {
                    let v2 = st.pop(offset)?;
                    let v1 = self.spill(v1, st);
                    if self.is_wide(&v2) {
                        st.stack.extend([v1.clone(), v2, v1]);
                    } else {
                        let v3 = st.pop(offset)?;
                        st.stack.extend([v1.clone(), v3, v2, v1]);
                    }
                } else {
                    let v2 = st.pop(offset)?;
                    let v3 = st.pop(offset)?;
                    let v2 = self.spill(v2, st);
                    let v1 = self.spill(v1, st);
                    if self.is_wide(&v3) {
                        st.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                    } else {
                        let v4 = st.pop(offset)?;
                        st.stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                    }
                }
            }
            StackOp::Swap => {
                let v1 = st.pop(offset)?;
                let v2 = st.pop(offset)?;
                st.stack.extend([v1, v2]);
            }
        }
        Ok(())
    }

    /// Binds a value with side effects to a fresh temporary so duplicating it does not
    /// repeat the effect.
    fn spill(&mut self, value: Expr, st: &mut BlockState) -> Expr {
        if !value.has_side_effects() {
            return value;
        }
        let var = self.fresh_temp(&value);
        st.statements.push(Stmt::LocalStore {
            var: var.clone(),
            value,
            declare: true,
        });
        Expr::Local(var)
    }

    /// Pending stack values that read `slot` must be evaluated before it is overwritten.
    fn spill_mentions(&mut self, slot: u16, st: &mut BlockState) {
        for i in 0..st.stack.len() {
            if st.stack[i].mentions_local(slot) {
                let value = std::mem::replace(&mut st.stack[i], Expr::Null);
                let var = self.fresh_temp(&value);
                st.statements.push(Stmt::LocalStore {
                    var: var.clone(),
                    value,
                    declare: true,
                });
                st.stack[i] = Expr::Local(var);
            }
        }
    }

    fn fresh_temp(&mut self, value: &Expr) -> LocalVar {
        let var = LocalVar {
            slot: u16::MAX,
            name: format!("tmp{}", self.temps),
            ty: self.type_of(value),
        };
        self.temps += 1;
        var
    }

    fn check_slot(&self, slot: u16, offset: u32) -> Result<()> {
        let bound = self.assigned.get(slot as usize).copied().unwrap_or(false)
            || self.slots.get(slot as usize).is_some_and(Option::is_some);
        if slot >= self.frame.max_locals || !bound {
            return Err(DecompileError::UnresolvedSlot { offset, slot });
        }
        Ok(())
    }

    fn load(&self, slot: u16, kind: ValueKind, offset: u32) -> Result<Expr> {
        self.check_slot(slot, offset)?;
        if !self.frame.is_static && slot == 0 && !self.assigned[0] {
            return Ok(Expr::This);
        }
        let current = self.slots[slot as usize]
            .as_ref()
            .filter(|s| s.kind == value_kind(&kind.to_type()));
        let (name, ty) = match (self.frame.scoped(slot, offset), current) {
            (Some(scoped), current) => (
                scoped.name.clone(),
                scoped
                    .ty
                    .clone()
                    .or_else(|| current.map(|c| c.ty.clone()))
                    .unwrap_or_else(|| kind.to_type()),
            ),
            (None, Some(current)) => (current.name.clone(), current.ty.clone()),
            (None, None) => (format!("var{slot}"), kind.to_type()),
        };
        Ok(Expr::Local(LocalVar { slot, name, ty }))
    }

    fn store(&mut self, slot: u16, kind: ValueKind, value: Expr, insn: &Instruction) -> Result<Stmt> {
        if slot >= self.frame.max_locals {
            return Err(DecompileError::UnresolvedSlot {
                offset: insn.offset,
                slot,
            });
        }
        let scoped = self.frame.scoped(slot, insn.next_offset()).cloned();
        let previous = self.slots[slot as usize]
            .as_ref()
            .filter(|s| s.kind == kind)
            .cloned();

        let ty = match (&scoped, &previous) {
            (Some(ScopedName { ty: Some(ty), .. }), _) => ty.clone(),
            (_, Some(prev)) => prev.ty.clone(),
            _ => self.infer_store_type(kind, &value),
        };
        let name = match (&scoped, &previous) {
            (Some(scoped), _) => scoped.name.clone(),
            (None, Some(prev)) => prev.name.clone(),
            (None, None) => format!("var{slot}"),
        };
        let declare = match &previous {
            Some(prev) => prev.name != name || prev.ty != ty,
            None => true,
        };

        let value = value.coerce(&ty);
        self.slots[slot as usize] = Some(Slot {
            kind,
            ty: ty.clone(),
            name: name.clone(),
        });
        Ok(Stmt::LocalStore {
            var: LocalVar { slot, name, ty },
            value,
            declare,
        })
    }

    fn infer_store_type(&self, kind: ValueKind, value: &Expr) -> JvmType {
        let ty = self.type_of(value);
        match kind {
            ValueKind::Reference if ty.is_reference() => ty,
            ValueKind::Reference => JvmType::Reference("java/lang/Object".into()),
            ValueKind::Int => match ty {
                JvmType::Boolean | JvmType::Char | JvmType::Byte | JvmType::Short => ty,
                _ => JvmType::Int,
            },
            other => other.to_type(),
        }
    }

    fn is_wide(&self, value: &Expr) -> bool {
        self.type_of(value).is_wide()
    }

    /// Static type of an expression, as far as printing needs it.
    fn type_of(&self, expr: &Expr) -> JvmType {
        match expr {
            Expr::IntLiteral(_) | Expr::CmpResult { .. } | Expr::ArrayLength(_) => JvmType::Int,
            Expr::LongLiteral(_) => JvmType::Long,
            Expr::FloatLiteral(_) => JvmType::Float,
            Expr::DoubleLiteral(_) => JvmType::Double,
            Expr::BoolLiteral(_)
            | Expr::Not(_)
            | Expr::Logical { .. }
            | Expr::Compare { .. }
            | Expr::InstanceOf { .. } => JvmType::Boolean,
            Expr::CharLiteral(_) => JvmType::Char,
            Expr::StringLiteral(_) => JvmType::Reference("java/lang/String".into()),
            Expr::ClassLiteral(_) => JvmType::Reference("java/lang/Class".into()),
            Expr::Local(var) => var.ty.clone(),
            Expr::This => JvmType::Reference(self.frame.this_class.clone()),
            Expr::CaughtException(ty) => {
                JvmType::Reference(ty.clone().unwrap_or_else(|| "java/lang/Throwable".into()))
            }
            Expr::Binary { op, left, right } => {
                let l = self.type_of(left);
                match op {
                    BinOp::Shl | BinOp::Shr | BinOp::Ushr => promote(l),
                    _ => wider(l, self.type_of(right)),
                }
            }
            Expr::Negate(operand) => promote(self.type_of(operand)),
            Expr::Cast { ty, .. } | Expr::FieldGet { ty, .. } | Expr::NewMultiArray { ty, .. } => ty.clone(),
            Expr::Invoke { ret, .. } => ret.clone(),
            Expr::Ternary {
                then_value,
                else_value,
                ..
            } => match self.type_of(then_value) {
                JvmType::Unknown => self.type_of(else_value),
                ty => ty,
            },
            Expr::New { class, .. } | Expr::UninitNew(class) => JvmType::Reference(class.clone()),
            Expr::NewArray { element, .. } => JvmType::Array(Box::new(element.clone())),
            Expr::ArrayLoad { array, .. } => match self.type_of(array) {
                JvmType::Array(element) => *element,
                _ => JvmType::Unknown,
            },
            Expr::ConstructorCall { .. } => JvmType::Void,
            Expr::Null | Expr::InvokeDynamic { .. } | Expr::Unresolved(_) => JvmType::Unknown,
        }
    }
}

/// Condition of `ifeq`..`ifle`. Booleans test themselves and `xcmp` results fold into a
/// direct comparison.
fn zero_test(cond: CondOp, value: Expr, sim: &Simulator<'_>) -> Expr {
    match value {
        Expr::CmpResult { left, right, .. } => Expr::Compare { op: cond, left, right },
        value if sim.type_of(&value) == JvmType::Boolean => match cond {
            CondOp::Ne => value,
            CondOp::Eq => value.negate(),
            _ => Expr::compare(cond, value, Expr::IntLiteral(0)),
        },
        value => Expr::compare(cond, value, Expr::IntLiteral(0)),
    }
}

fn discard(value: Expr, st: &mut BlockState) {
    if value.has_side_effects() {
        st.statements.push(Stmt::Expr(value));
    } else {
        trace!("dropping unused value {value}");
    }
}

fn push_or_emit(call: Expr, ret: &JvmType, st: &mut BlockState) {
    if *ret == JvmType::Void {
        st.statements.push(Stmt::Expr(call));
    } else {
        st.stack.push(call);
    }
}

/// Replaces the topmost pending `new C` left below the `dup` with the finished
/// construction. Returns false when nothing was waiting for it.
fn replace_uninit_new(stack: &mut [Expr], created: &Expr) -> bool {
    let Expr::New { class, .. } = created else {
        return false;
    };
    for item in stack.iter_mut().rev() {
        if matches!(item, Expr::UninitNew(pending) if pending == class) {
            *item = created.clone();
            return true;
        }
    }
    false
}

pub(crate) fn constant_expr(constant: &Constant) -> Expr {
    match constant {
        Constant::Int(v) => Expr::IntLiteral(*v),
        Constant::Long(v) => Expr::LongLiteral(*v),
        Constant::Float(v) => Expr::FloatLiteral(*v),
        Constant::Double(v) => Expr::DoubleLiteral(*v),
        Constant::String(s) => Expr::StringLiteral(s.clone()),
        Constant::Class(name) => Expr::ClassLiteral(class_operand_type(name)),
        Constant::MethodType(descriptor) => Expr::Unresolved(format!("MethodType {descriptor}")),
        Constant::MethodHandle { member, .. } => {
            Expr::Unresolved(format!("MethodHandle {}.{}", member.owner, member.name))
        }
        Constant::Dynamic { name, .. } => Expr::Unresolved(format!("dynamic constant {name}")),
    }
}

fn bin_op(op: ArithOp) -> BinOp {
    match op {
        ArithOp::Add => BinOp::Add,
        ArithOp::Sub => BinOp::Sub,
        ArithOp::Mul => BinOp::Mul,
        ArithOp::Div => BinOp::Div,
        ArithOp::Rem => BinOp::Rem,
        ArithOp::Shl => BinOp::Shl,
        ArithOp::Shr => BinOp::Shr,
        ArithOp::Ushr => BinOp::Ushr,
        ArithOp::And => BinOp::And,
        ArithOp::Or => BinOp::Or,
        ArithOp::Xor => BinOp::Xor,
    }
}

/// Computational kind a value of this type has on the operand stack.
fn value_kind(ty: &JvmType) -> ValueKind {
    match ty {
        JvmType::Long => ValueKind::Long,
        JvmType::Float => ValueKind::Float,
        JvmType::Double => ValueKind::Double,
        JvmType::Unknown => ValueKind::Reference,
        ty if ty.is_reference() => ValueKind::Reference,
        _ => ValueKind::Int,
    }
}

fn promote(ty: JvmType) -> JvmType {
    match ty {
        JvmType::Byte | JvmType::Char | JvmType::Short | JvmType::Boolean => JvmType::Int,
        other => other,
    }
}

fn wider(a: JvmType, b: JvmType) -> JvmType {
    use JvmType::*;
    match (a, b) {
        (Double, _) | (_, Double) => Double,
        (Float, _) | (_, Float) => Float,
        (Long, _) | (_, Long) => Long,
        (Boolean, Boolean) => Boolean,
        _ => Int,
    }
}
