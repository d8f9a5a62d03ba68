//! Recovers structured control flow from a simulated CFG.
//!
//! Structuring walks the graph from the entry block and follows edges until it reaches
//! the stop block of the current region. Conditionals reconverge at their immediate
//! post-dominator, loops are natural loops around back edges, and try ranges come from
//! the exception table. Anything that does not fit is emitted as an Unknown node.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};

use crate::code_attribute::{InsnKind, Instruction};
use crate::error::DecompileError;

use super::ast::*;
use super::cfg::{cleanup_matches, dominators, finally_cleanup, post_dominators};
use super::cfg_types::*;
use super::expr::{Expr, LogicalOp, Stmt};
use super::stack_sim::SimulatedBlock;

/// A structured method body and the problems met while building it.
#[derive(Clone, Debug, Default)]
pub struct StructuredBody {
    pub body: Vec<Node>,
    pub diagnostics: Vec<DecompileError>,
}

/// Structure a method body. `blocks` holds the simulation result for every block of `cfg`.
pub fn structure(cfg: &ControlFlowGraph, blocks: &[SimulatedBlock]) -> StructuredBody {
    if cfg.is_empty() {
        return StructuredBody::default();
    }
    let mut s = Structurer::new(cfg, blocks);
    let mut body = s.structure_seq(Some(0), &Region::default());

    for id in 0..cfg.len() {
        if !s.visited[id] {
            debug!("block {id} at offset {} left unstructured", cfg.block(id).start);
            s.visited[id] = true;
            body.push(Node::Unknown(UnknownNode {
                reason: format!("unstructured block at offset {}", cfg.block(id).start),
                instructions: cfg.instructions_of(id).to_vec(),
                undecoded: Vec::new(),
            }));
        }
    }
    StructuredBody {
        body,
        diagnostics: s.diagnostics,
    }
}

#[derive(Clone, Debug)]
struct LoopInfo {
    body: BTreeSet<BlockId>,
    latches: Vec<BlockId>,
}

#[derive(Clone, Debug)]
struct TryGroup {
    start: u32,
    end: u32,
    /// Indices into `ControlFlowGraph::handlers`, in table order.
    entries: Vec<usize>,
}

enum Frame {
    Loop {
        header: BlockId,
        follow: Option<BlockId>,
        /// Conditional latch of a do-while loop.
        latch: Option<BlockId>,
    },
    Switch {
        join: Option<BlockId>,
    },
}

/// The blocks a nested sequence may enter and the block that ends it.
#[derive(Clone, Debug, Default)]
struct Region {
    members: Option<BTreeSet<BlockId>>,
    stop: Option<BlockId>,
    /// Stops of enclosing regions. Reaching one of these needs a jump Java cannot express.
    inherited: Vec<BlockId>,
}

impl Region {
    fn contains(&self, id: BlockId) -> bool {
        self.members.as_ref().map_or(true, |m| m.contains(&id))
    }

    fn nested(&self, members: Option<BTreeSet<BlockId>>, stop: Option<BlockId>) -> Region {
        let mut inherited = self.inherited.clone();
        inherited.extend(self.stop);
        Region {
            members,
            stop,
            inherited,
        }
    }

    fn with_stop(&self, stop: Option<BlockId>) -> Region {
        self.nested(self.members.clone(), stop)
    }
}

struct Structurer<'a> {
    cfg: &'a ControlFlowGraph,
    blocks: &'a [SimulatedBlock],
    doms: DominatorTree,
    pdoms: DominatorTree,
    loops: BTreeMap<BlockId, LoopInfo>,
    active_loops: BTreeSet<BlockId>,
    try_groups: Vec<TryGroup>,
    entry_done: Vec<bool>,
    /// Inlined cleanup copies that were dropped, mapped to the block after them.
    skip: BTreeMap<BlockId, BlockId>,
    visited: Vec<bool>,
    frames: Vec<Frame>,
    diagnostics: Vec<DecompileError>,
}

impl<'a> Structurer<'a> {
    fn new(cfg: &'a ControlFlowGraph, blocks: &'a [SimulatedBlock]) -> Self {
        let doms = dominators(cfg);
        let pdoms = post_dominators(cfg);
        let loops = find_loops(cfg, &doms);
        let try_groups = group_handlers(cfg);
        Structurer {
            cfg,
            blocks,
            doms,
            pdoms,
            loops,
            active_loops: BTreeSet::new(),
            try_groups,
            entry_done: vec![false; cfg.handlers.len()],
            skip: BTreeMap::new(),
            visited: vec![false; cfg.len()],
            frames: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn structure_seq(&mut self, start: Option<BlockId>, region: &Region) -> Vec<Node> {
        let mut out = Vec::new();
        let mut current = start;
        while let Some(id) = current {
            current = self.structure_block(id, region, &mut out);
        }
        out
    }

    /// Emits the construct starting at `id` and returns where the sequence continues.
    fn structure_block(&mut self, id: BlockId, region: &Region, out: &mut Vec<Node>) -> Option<BlockId> {
        if self.visited[id] {
            return None;
        }
        let loop_pending = self.loops.contains_key(&id) && !self.active_loops.contains(&id);
        if let Some(group) = self.pending_try_at(id) {
            let hull_has_loop = !loop_pending
                || self.loops[&id]
                    .body
                    .iter()
                    .all(|&b| self.try_groups[group].covers(self.cfg.block(b).start));
            if hull_has_loop {
                return self.structure_try(group, region, out);
            }
        }
        if loop_pending {
            return self.structure_loop(id, region, out);
        }

        self.visited[id] = true;
        let blocks = self.blocks;
        let sim = &blocks[id];
        match &sim.failure {
            Some(reason) => out.push(Node::Unknown(UnknownNode {
                reason: reason.clone(),
                instructions: self.cfg.instructions_of(id).to_vec(),
                undecoded: Vec::new(),
            })),
            None => out.extend(sim.statements.iter().cloned().map(Node::Statement)),
        }

        if let Some(join) = sim.folded_into {
            for arm in self.cfg.successors(id) {
                self.visited[arm] = true;
            }
            return self.follow_edge(id, join, region, out);
        }
        if self.is_do_while_latch(id) {
            return None;
        }

        match self.cfg.block(id).terminator.clone() {
            Terminator::FallThrough(target) | Terminator::Goto(target) => self.follow_edge(id, target, region, out),
            Terminator::Branch { taken, not_taken } => {
                let condition = self.condition_of(id);
                self.structure_if(id, condition, taken, not_taken, region, out)
            }
            Terminator::Switch { default, cases } => self.structure_switch(id, default, &cases, region, out),
            Terminator::Return | Terminator::Throw | Terminator::Unsupported => None,
        }
    }

    fn condition_of(&self, id: BlockId) -> Expr {
        self.blocks[id]
            .condition
            .clone()
            .unwrap_or_else(|| Expr::Unresolved("unknown condition".into()))
    }

    /// Resolves an edge to `target`. Returns the block to continue with, or `None` after
    /// pushing whatever jump statement the edge needs.
    fn follow_edge(&mut self, from: BlockId, target: BlockId, region: &Region, out: &mut Vec<Node>) -> Option<BlockId> {
        let mut target = target;
        while region.stop != Some(target) {
            match self.skip.get(&target) {
                Some(&next) => target = next,
                None => break,
            }
        }
        if region.stop == Some(target) {
            return None;
        }
        if let Some(jump) = self.jump_to(target) {
            out.push(Node::Statement(jump));
            return None;
        }
        let end = self.jump_chain_end(target);
        if end != target && region.stop != Some(end) {
            if let Some(jump) = self.jump_to(end) {
                self.consume_jump_chain(target, end);
                out.push(Node::Statement(jump));
                return None;
            }
        }
        if region.inherited.contains(&target)
            || !region.contains(target)
            || self.visited[target]
            || self.is_enclosing_loop_target(target)
        {
            self.unstructured_jump(from, target, out);
            return None;
        }
        Some(target)
    }

    /// `continue` for the innermost loop header, `break` for the follow of the innermost
    /// breakable construct.
    fn jump_to(&self, target: BlockId) -> Option<Stmt> {
        let innermost_loop = self.frames.iter().rev().find_map(|f| match f {
            Frame::Loop { header, .. } => Some(*header),
            Frame::Switch { .. } => None,
        });
        if innermost_loop == Some(target) {
            return Some(Stmt::Continue);
        }
        self.break_target(target).then_some(Stmt::Break)
    }

    fn break_target(&self, target: BlockId) -> bool {
        match self.frames.last() {
            Some(Frame::Loop { follow, .. }) => *follow == Some(target),
            Some(Frame::Switch { join }) => *join == Some(target),
            None => false,
        }
    }

    fn is_enclosing_loop_target(&self, target: BlockId) -> bool {
        self.frames.iter().any(|f| match f {
            Frame::Loop { header, follow, .. } => *header == target || *follow == Some(target),
            Frame::Switch { join } => *join == Some(target),
        })
    }

    fn is_do_while_latch(&self, id: BlockId) -> bool {
        self.frames.iter().rev().find_map(|f| match f {
            Frame::Loop { latch, .. } => Some(*latch == Some(id)),
            Frame::Switch { .. } => None,
        }) == Some(true)
    }

    fn unstructured_jump(&mut self, from: BlockId, target: BlockId, out: &mut Vec<Node>) {
        let tail: Option<&Instruction> = self.cfg.instructions_of(from).last();
        let offset = tail.map_or(self.cfg.block(from).start, |insn| insn.offset);
        let instructions = tail
            .filter(|insn| {
                matches!(
                    insn.kind,
                    InsnKind::Goto { .. }
                        | InsnKind::If { .. }
                        | InsnKind::TableSwitch { .. }
                        | InsnKind::LookupSwitch { .. }
                )
            })
            .cloned()
            .into_iter()
            .collect();
        debug!("unstructurable jump from offset {offset} to block {target}");
        self.diagnostics
            .push(DecompileError::UnstructurableControlFlow { offset });
        out.push(Node::Unknown(UnknownNode {
            reason: format!("jump to offset {}", self.cfg.block(target).start),
            instructions,
            undecoded: Vec::new(),
        }));
    }

    /// The post-dominator where both arms of a branch at `id` meet, if usable here.
    fn join_of(&self, id: BlockId, region: &Region) -> Option<BlockId> {
        let join = self.pdoms.idom(id)?;
        let usable = region.stop == Some(join)
            || self.jump_to(join).is_some()
            || (region.contains(join) && !self.visited[join] && !region.inherited.contains(&join));
        usable.then_some(join)
    }

    fn structure_if(
        &mut self,
        id: BlockId,
        condition: Expr,
        taken: BlockId,
        not_taken: BlockId,
        region: &Region,
        out: &mut Vec<Node>,
    ) -> Option<BlockId> {
        let join = self.join_of(id, region);

        // `if (c) break;` when only one arm leaves the enclosing construct
        if join.map_or(true, |j| self.break_target(j)) {
            let leaves = |arm: BlockId| {
                if self.break_target(arm) {
                    return Some(arm);
                }
                let end = self.jump_chain_end(arm);
                self.break_target(end).then_some(end)
            };
            let exit = match (leaves(taken), leaves(not_taken)) {
                (Some(end), None) => Some((condition.clone(), taken, end, not_taken)),
                (None, Some(end)) => Some((condition.clone().negate(), not_taken, end, taken)),
                _ => None,
            };
            if let Some((condition, exit_arm, end, rest)) = exit {
                trace!("block {id}: conditional break");
                self.consume_jump_chain(exit_arm, end);
                out.push(Node::If(IfNode {
                    condition,
                    then_body: vec![Node::Statement(Stmt::Break)],
                    else_body: None,
                }));
                return self.follow_edge(id, rest, region, out);
            }
        }

        let join = join.unwrap_or(taken);
        trace!("block {id}: if with join block {join}");
        let arms = region.with_stop(Some(join));
        let then_body = self.arm(id, not_taken, &arms);
        let else_body = self.arm(id, taken, &arms);

        let node = match (then_body.is_empty(), else_body.is_empty()) {
            (_, true) => IfNode {
                condition: condition.negate(),
                then_body,
                else_body: None,
            },
            (true, false) => IfNode {
                condition,
                then_body: else_body,
                else_body: None,
            },
            (false, false) => IfNode {
                condition: condition.negate(),
                then_body,
                else_body: Some(else_body),
            },
        };
        out.push(Node::If(merge_short_circuit(node)));
        self.follow_edge(id, join, region, out)
    }

    /// One branch arm, up to the stop of `region`.
    fn arm(&mut self, from: BlockId, entry: BlockId, region: &Region) -> Vec<Node> {
        let mut out = Vec::new();
        if let Some(start) = self.follow_edge(from, entry, region, &mut out) {
            out.extend(self.structure_seq(Some(start), region));
        }
        out
    }

    fn structure_switch(
        &mut self,
        id: BlockId,
        default: BlockId,
        cases: &[(i32, BlockId)],
        region: &Region,
        out: &mut Vec<Node>,
    ) -> Option<BlockId> {
        let selector = self.blocks[id]
            .selector
            .clone()
            .unwrap_or_else(|| Expr::Unresolved("unknown selector".into()));
        let join = self.join_of(id, region);

        let mut targets: Vec<BlockId> = cases
            .iter()
            .map(|(_, t)| *t)
            .chain(std::iter::once(default))
            .filter(|t| Some(*t) != join)
            .collect();
        targets.sort_unstable();
        targets.dedup();

        self.frames.push(Frame::Switch { join });
        let mut case_nodes = Vec::new();
        for (i, &target) in targets.iter().enumerate() {
            let mut labels: Vec<Option<i32>> = cases
                .iter()
                .filter(|(_, t)| *t == target)
                .map(|(key, _)| Some(*key))
                .collect();
            labels.sort_unstable();
            if default == target {
                labels.push(None);
            }
            let stop = targets.get(i + 1).copied().or(join);
            let case_region = region.with_stop(stop);
            let body = self.arm(id, target, &case_region);
            case_nodes.push(Node::Case(CaseNode { labels, body }));
        }
        // keys sharing the join only matter when something else is the default
        if let Some(join) = join.filter(|&j| j != default) {
            let mut labels: Vec<Option<i32>> = cases
                .iter()
                .filter(|(_, t)| *t == join)
                .map(|(key, _)| Some(*key))
                .collect();
            if !labels.is_empty() {
                labels.sort_unstable();
                case_nodes.push(Node::Case(CaseNode {
                    labels,
                    body: vec![Node::Statement(Stmt::Break)],
                }));
            }
        }
        self.frames.pop();

        out.push(Node::Switch(SwitchNode {
            selector,
            cases: case_nodes,
        }));
        match join {
            Some(join) => self.follow_edge(id, join, region, out),
            None => None,
        }
    }

    fn structure_loop(&mut self, header: BlockId, region: &Region, out: &mut Vec<Node>) -> Option<BlockId> {
        let info = self.loops[&header].clone();
        let mut body_set = info.body.clone();
        let sim = &self.blocks[header];

        let bare_header = sim.statements.is_empty() && sim.failure.is_none() && sim.folded_into.is_none();
        let mut kind = LoopKind::Infinite;
        let mut follow = None;
        let mut latch = None;
        let mut start = header;

        if let Terminator::Branch { taken, not_taken } = self.cfg.block(header).terminator {
            if bare_header && body_set.contains(&taken) != body_set.contains(&not_taken) {
                let condition = self.condition_of(header);
                if body_set.contains(&taken) {
                    kind = LoopKind::PreTest(condition);
                    follow = Some(not_taken);
                    start = taken;
                } else {
                    kind = LoopKind::PreTest(condition.negate());
                    follow = Some(taken);
                    start = not_taken;
                }
            }
        }
        if matches!(kind, LoopKind::Infinite) {
            if let &[candidate] = info.latches.as_slice() {
                if let Terminator::Branch { taken, not_taken } = self.cfg.block(candidate).terminator {
                    let condition = self.condition_of(candidate);
                    if taken == header && !body_set.contains(&not_taken) {
                        kind = LoopKind::PostTest(condition);
                        follow = Some(not_taken);
                        latch = Some(candidate);
                    } else if not_taken == header && !body_set.contains(&taken) {
                        kind = LoopKind::PostTest(condition.negate());
                        follow = Some(taken);
                        latch = Some(candidate);
                    }
                }
            }
        }
        if follow.is_none() {
            follow = body_set
                .iter()
                .flat_map(|&b| self.cfg.successors(b))
                .filter(|s| !body_set.contains(s))
                .min();
        }
        if let Some(follow) = follow {
            self.absorb_dead_ends(header, follow, &mut body_set);
        }
        trace!("loop at block {header}: {kind:?}, follow {follow:?}");

        self.active_loops.insert(header);
        self.frames.push(Frame::Loop { header, follow, latch });
        let loop_region = region.nested(Some(body_set), None);
        let mut body = Vec::new();
        if start == header {
            body = self.structure_seq(Some(header), &loop_region);
        } else {
            self.visited[header] = true;
            if let Some(first) = self.follow_edge(header, start, &loop_region, &mut body) {
                body.extend(self.structure_seq(Some(first), &loop_region));
            }
        }
        self.frames.pop();

        if matches!(body.last(), Some(Node::Statement(Stmt::Continue))) {
            body.pop();
        }
        out.push(Node::Loop(LoopNode { kind, body }));
        follow.and_then(|f| self.follow_edge(header, f, region, out))
    }

    /// Adds blocks dominated by the header that never reach the follow, such as a
    /// `return` inside the loop, so they can be structured as part of the body.
    fn absorb_dead_ends(&self, header: BlockId, follow: BlockId, body: &mut BTreeSet<BlockId>) {
        let after_follow = reachable_from(self.cfg, follow);
        for b in 0..self.cfg.len() {
            if body.contains(&b) || after_follow.contains(&b) || !self.doms.dominates(header, b) {
                continue;
            }
            if !reachable_from(self.cfg, b).contains(&follow) {
                body.insert(b);
            }
        }
    }

    fn pending_try_at(&self, id: BlockId) -> Option<usize> {
        self.try_groups.iter().position(|g| {
            self.cfg.block_at(g.start) == Some(id) && g.entries.iter().any(|&e| !self.entry_done[e])
        })
    }

    fn structure_try(&mut self, group_index: usize, region: &Region, out: &mut Vec<Node>) -> Option<BlockId> {
        let cfg = self.cfg;
        let group = self.try_groups[group_index].clone();
        let start = cfg.block_at(group.start)?;
        let handlers: Vec<&ExceptionHandler> = group.entries.iter().map(|&e| &cfg.handlers[e]).collect();
        for &e in &group.entries {
            self.entry_done[e] = true;
        }

        let catch_all = handlers.iter().find(|h| h.catch_type.is_none()).map(|h| h.handler);
        let copy = catch_all.and_then(|h| self.normal_cleanup_copy(&group, h));

        let mut members: BTreeSet<BlockId> = cfg.blocks_in(group.start, group.end).collect();
        // handlers covering their own code belong to this construct, and so does every
        // row of a finally whose copies are dropped: those rows cover the catch bodies
        let handler_blocks: BTreeSet<BlockId> = handlers.iter().map(|h| h.handler).collect();
        for (i, h) in cfg.handlers.iter().enumerate() {
            let own_code = handler_blocks.contains(&h.handler)
                && cfg
                    .block_at(h.start)
                    .is_some_and(|b| self.doms.dominates(h.handler, b));
            let finally_row = copy.is_some() && Some(h.handler) == catch_all;
            if own_code || finally_row {
                self.entry_done[i] = true;
            }
        }

        let (try_stop, after, join) = match copy {
            Some((n, _)) => {
                members.remove(&n);
                let after = cfg.successors(n).first().copied();
                (Some(n), after, after.map(|a| self.jump_chain_end(a)))
            }
            None => {
                let exit = members
                    .iter()
                    .flat_map(|&b| cfg.successors(b))
                    .filter(|s| !members.contains(s))
                    .min();
                (exit, exit, exit.map(|e| self.jump_chain_end(e)))
            }
        };

        if let (Some((n, cleanup)), Some(handler)) = (&copy, catch_all) {
            self.drop_cleanup_copies(cleanup, *n, handler);
            for b in 0..cfg.len() {
                if self.doms.dominates(handler, b) {
                    self.visited[b] = true;
                }
            }
        }

        trace!("try [{}, {}) with {} handlers", group.start, group.end, handlers.len());
        let try_region = region.nested(Some(members), try_stop);
        let body = self.structure_seq(Some(start), &try_region);

        let mut catches = Vec::new();
        let mut seen = BTreeSet::new();
        for h in &handlers {
            if !seen.insert(h.handler) || (copy.is_some() && Some(h.handler) == catch_all) {
                continue;
            }
            let catch_members: BTreeSet<BlockId> = (0..cfg.len())
                .filter(|&b| self.doms.dominates(h.handler, b))
                .collect();
            let catch_region = region.nested(Some(catch_members), join);
            let mut catch_body = self.structure_seq(Some(h.handler), &catch_region);
            let var = take_catch_var(&mut catch_body).unwrap_or_else(|| "ex".to_string());
            let catch_type = h
                .catch_type
                .clone()
                .unwrap_or_else(|| "java/lang/Throwable".to_string());
            catches.push(CatchClause::new(catch_type, var, catch_body));
        }

        let blocks = self.blocks;
        let cleanup = copy.map(|(n, _)| {
            self.visited[n] = true;
            blocks[n].statements.iter().cloned().map(Node::Statement).collect::<Vec<_>>()
        });
        out.push(match cleanup {
            Some(cleanup) if catches.is_empty() => Node::ResourceScope(ResourceScopeNode {
                body,
                cleanup,
                deduplicated: true,
            }),
            finally => Node::Try(TryNode { body, catches, finally }),
        });

        let after = after?;
        let from = try_stop.unwrap_or(start);
        self.follow_edge(from, after, region, out)
    }

    /// The block holding the normal-path copy of a catch-all handler's cleanup, either
    /// right after the try range or as its last block.
    fn normal_cleanup_copy(&self, group: &TryGroup, handler: BlockId) -> Option<(BlockId, Vec<Instruction>)> {
        let first = self.cfg.block(handler).range.start;
        let cleanup = self.cfg.instructions[finally_cleanup(&self.cfg.instructions, first)?].to_vec();
        let len: u32 = cleanup.iter().map(Instruction::len).sum();
        let is_copy = |n: BlockId, end: u32| {
            let block = self.cfg.block(n);
            block.end == end && cleanup_matches(&self.cfg.instructions, block.range.start, &cleanup)
        };

        if let Some(n) = self.cfg.block_at(group.end) {
            if n != handler && is_copy(n, group.end + len) {
                return Some((n, cleanup));
            }
        }
        let before = self.cfg.block_at(group.end.checked_sub(len)?)?;
        (group.covers(self.cfg.block(before).start) && is_copy(before, group.end)).then_some((before, cleanup))
    }

    /// Drops the cleanup copies inlined where other entries of `handler` end. `normal` is
    /// the copy kept as the cleanup body.
    fn drop_cleanup_copies(&mut self, cleanup: &[Instruction], normal: BlockId, handler: BlockId) {
        let cfg = self.cfg;
        let len: u32 = cleanup.iter().map(Instruction::len).sum();
        for h in cfg.handlers.iter().filter(|h| h.handler == handler) {
            let (Some(copy), Some(next)) = (cfg.block_at(h.end), cfg.block_at(h.end + len)) else {
                continue;
            };
            if copy == normal || self.visited[copy] || cfg.block(copy).end != h.end + len {
                continue;
            }
            if cleanup_matches(&cfg.instructions, cfg.block(copy).range.start, cleanup) {
                trace!("dropping inlined cleanup copy at offset {}", h.end);
                self.visited[copy] = true;
                self.skip.insert(copy, next);
            }
        }
    }

    /// Marks the jump-only blocks leading from `id` to `end` as structured.
    fn consume_jump_chain(&mut self, mut id: BlockId, end: BlockId) {
        while id != end && !self.visited[id] {
            self.visited[id] = true;
            match self.cfg.block(id).terminator {
                Terminator::Goto(next) | Terminator::FallThrough(next) => id = next,
                _ => break,
            }
        }
    }

    /// Follows blocks that only jump elsewhere.
    fn jump_chain_end(&self, mut id: BlockId) -> BlockId {
        for _ in 0..self.cfg.len() {
            let sim = &self.blocks[id];
            let plain = sim.statements.is_empty()
                && sim.failure.is_none()
                && !self.loops.contains_key(&id)
                && !self.cfg.is_handler(id);
            match self.cfg.block(id).terminator {
                Terminator::Goto(next) | Terminator::FallThrough(next) if plain && next != id => id = next,
                _ => break,
            }
        }
        id
    }
}

impl TryGroup {
    fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Natural loops keyed by header. A back edge is an edge whose target dominates its source.
fn find_loops(cfg: &ControlFlowGraph, doms: &DominatorTree) -> BTreeMap<BlockId, LoopInfo> {
    let mut loops: BTreeMap<BlockId, LoopInfo> = BTreeMap::new();
    for latch in 0..cfg.len() {
        for header in cfg.successors(latch) {
            if !doms.dominates(header, latch) {
                continue;
            }
            let info = loops.entry(header).or_insert_with(|| LoopInfo {
                body: BTreeSet::from([header]),
                latches: Vec::new(),
            });
            info.latches.push(latch);
            let mut work = vec![latch];
            while let Some(b) = work.pop() {
                if !info.body.insert(b) {
                    continue;
                }
                work.extend(
                    cfg.predecessors(b)
                        .iter()
                        .copied()
                        .filter(|&p| doms.dominates(header, p)),
                );
            }
        }
    }
    loops
}

/// Exception table rows grouped by range. Groups with the same handlers are merged into
/// their hull unless they cover one of their handlers. Widest first, then by table order.
fn group_handlers(cfg: &ControlFlowGraph) -> Vec<TryGroup> {
    let mut by_range: Vec<TryGroup> = Vec::new();
    for (i, h) in cfg.handlers.iter().enumerate() {
        match by_range.iter_mut().find(|g| g.start == h.start && g.end == h.end) {
            Some(group) => group.entries.push(i),
            None => by_range.push(TryGroup {
                start: h.start,
                end: h.end,
                entries: vec![i],
            }),
        }
    }

    let signature = |g: &TryGroup| -> Vec<(BlockId, Option<String>)> {
        g.entries
            .iter()
            .map(|&e| (cfg.handlers[e].handler, cfg.handlers[e].catch_type.clone()))
            .collect()
    };
    // a row covering its own handler guards the cleanup, not the protected code
    let self_covering = |g: &TryGroup| {
        g.entries
            .iter()
            .any(|&e| g.covers(cfg.block(cfg.handlers[e].handler).start))
    };
    let mut merged: Vec<TryGroup> = Vec::new();
    for group in by_range {
        let sig = signature(&group);
        if self_covering(&group) {
            merged.push(group);
            continue;
        }
        match merged.iter_mut().find(|m| !self_covering(m) && signature(m) == sig) {
            Some(hull) => {
                hull.start = hull.start.min(group.start);
                hull.end = hull.end.max(group.end);
                let extra: Vec<usize> = group.entries.clone();
                hull.entries.extend(extra);
            }
            None => merged.push(group),
        }
    }
    for group in &mut merged {
        group.entries.sort_unstable();
    }
    merged.sort_by_key(|g| (std::cmp::Reverse(g.end - g.start), g.entries[0]));
    merged
}

fn reachable_from(cfg: &ControlFlowGraph, start: BlockId) -> BTreeSet<BlockId> {
    let mut seen = BTreeSet::new();
    let mut work = vec![start];
    while let Some(b) = work.pop() {
        if seen.insert(b) {
            work.extend(cfg.successors(b));
        }
    }
    seen
}

/// `if (a) { if (b) { .. } }` becomes `if (a && b) { .. }`.
fn merge_short_circuit(node: IfNode) -> IfNode {
    if node.else_body.is_some() || node.then_body.len() != 1 {
        return node;
    }
    match node.then_body.into_iter().next() {
        Some(Node::If(inner)) if inner.else_body.is_none() => IfNode {
            condition: Expr::logical(LogicalOp::And, node.condition, inner.condition),
            then_body: inner.then_body,
            else_body: None,
        },
        Some(other) => IfNode {
            condition: node.condition,
            then_body: vec![other],
            else_body: None,
        },
        None => IfNode {
            condition: node.condition,
            then_body: Vec::new(),
            else_body: None,
        },
    }
}

/// Removes the handler's store of the caught exception and returns the variable name.
fn take_catch_var(body: &mut Vec<Node>) -> Option<String> {
    match body.first() {
        Some(Node::Statement(Stmt::LocalStore {
            var,
            value: Expr::CaughtException(_),
            ..
        })) => {
            let name = var.name.clone();
            body.remove(0);
            Some(name)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute_info::ExceptionEntry;
    use crate::code_attribute::decode;
    use crate::decompile::cfg::build_cfg;
    use crate::decompile::descriptor::JvmType;
    use crate::decompile::expr::LocalVar;
    use crate::decompile::stack_sim::{simulate, MethodFrame};
    use crate::metadata::MetadataTable;
    use crate::types::ClassFile;

    fn empty_table() -> MetadataTable {
        let mut bytes = vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 52, 0, 1];
        bytes.extend_from_slice(&[0, 0x21, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        MetadataTable::new(ClassFile::parse(&bytes).unwrap())
    }

    fn structure_code(code: &[u8], table: &[ExceptionEntry], max_locals: u16) -> StructuredBody {
        let meta = empty_table();
        let cfg = build_cfg(decode(code, &meta).unwrap(), table, &meta);
        let frame = MethodFrame {
            this_class: "Test".into(),
            is_static: true,
            ret: JvmType::Void,
            max_locals,
            params: vec![LocalVar {
                slot: 0,
                name: "param0".into(),
                ty: JvmType::Int,
            }],
            locals: Vec::new(),
        };
        let sim = simulate(&cfg, &frame);
        structure(&cfg, &sim.blocks)
    }

    fn kinds(nodes: &[Node]) -> Vec<NodeKind> {
        nodes.iter().map(Node::kind).collect()
    }

    #[test]
    fn diamond_becomes_if_else() {
        // if (param0 != 0) var1 = 1; else var1 = 2; return;
        let out = structure_code(
            &[0x1a, 0x99, 0x00, 0x08, 0x04, 0x3c, 0xa7, 0x00, 0x05, 0x05, 0x3c, 0xb1],
            &[],
            2,
        );
        assert_eq!(kinds(&out.body), vec![NodeKind::If, NodeKind::Statement]);
        let Node::If(node) = &out.body[0] else { unreachable!() };
        assert_eq!(node.condition.to_string(), "param0 != 0");
        assert_eq!(node.then_body.len(), 1);
        assert_eq!(node.else_body.as_ref().map(Vec::len), Some(1));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn top_tested_loop() {
        // var1 = 0; while (var1 < 10) var1++; return;
        let out = structure_code(
            &[0x03, 0x3c, 0x1b, 0x10, 10, 0xa2, 0x00, 0x09, 0x84, 0x01, 0x01, 0xa7, 0xff, 0xf7, 0xb1],
            &[],
            2,
        );
        assert_eq!(
            kinds(&out.body),
            vec![NodeKind::Statement, NodeKind::Loop, NodeKind::Statement]
        );
        let Node::Loop(node) = &out.body[1] else { unreachable!() };
        assert!(matches!(&node.kind, LoopKind::PreTest(c) if c.to_string() == "var1 < 10"));
        assert_eq!(node.body.len(), 1);
        assert_eq!(node.body[0].to_string(), "var1++;");
    }

    #[test]
    fn finally_copy_is_kept_once() {
        // try { var1 = 1 } finally { var2 = 0 } return;
        let table = [ExceptionEntry {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 5,
            catch_type: 0,
        }];
        let out = structure_code(&[0x04, 0x3c, 0x03, 0x3d, 0xb1, 0x4e, 0x03, 0x3d, 0x2d, 0xbf], &table, 4);
        assert_eq!(kinds(&out.body), vec![NodeKind::ResourceScope, NodeKind::Statement]);
        let Node::ResourceScope(scope) = &out.body[0] else { unreachable!() };
        assert!(scope.deduplicated);
        assert_eq!(scope.body.len(), 1);
        assert_eq!(scope.cleanup.len(), 1);
        assert_eq!(scope.cleanup[0].to_string(), "int var2 = 0;");
    }

    #[test]
    fn nested_conditions_merge() {
        // if (param0 > 0 && param0 < 9) var1 = 1; return;
        // 0: iload_0, 1: ifle 12, 4: iload_0, 5: bipush 9, 7: if_icmpge 12, 10: iconst_1, 11: istore_1, 12: return
        let out = structure_code(
            &[0x1a, 0x9e, 0x00, 0x0b, 0x1a, 0x10, 0x09, 0xa2, 0x00, 0x05, 0x04, 0x3c, 0xb1],
            &[],
            2,
        );
        let Node::If(node) = &out.body[0] else { unreachable!() };
        assert_eq!(node.condition.to_string(), "param0 > 0 && param0 < 9");
        assert_eq!(node.then_body.len(), 1);
    }

    #[test]
    fn tableswitch_cases_break_to_join() {
        // switch (param0) { case 0: var1 = 1; break; case 1: var1 = 2; } return;
        let code = [
            0x1a, 0xaa, 0, 0, // iload_0, tableswitch + padding
            0, 0, 0, 30, 0, 0, 0, 0, 0, 0, 0, 1, // default 31, low 0, high 1
            0, 0, 0, 23, 0, 0, 0, 28, // 24, 29
            0x04, 0x3c, 0xa7, 0x00, 0x05, // 24: var1 = 1; goto 31
            0x05, 0x3c, // 29: var1 = 2
            0xb1, // 31: return
        ];
        let out = structure_code(&code, &[], 2);
        assert_eq!(kinds(&out.body), vec![NodeKind::Switch, NodeKind::Statement]);
        let Node::Switch(node) = &out.body[0] else { unreachable!() };
        assert_eq!(node.selector.to_string(), "param0");

        let cases: Vec<(Vec<Option<i32>>, Vec<String>)> = node
            .cases
            .iter()
            .map(|c| match c {
                Node::Case(case) => (case.labels.clone(), case.body.iter().map(Node::to_string).collect()),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            cases,
            vec![
                (vec![Some(0)], vec!["int var1 = 1;".to_string(), "break;".to_string()]),
                (vec![Some(1)], vec!["var1 = 2;".to_string()]),
            ]
        );
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn self_latch_is_post_tested() {
        // do { param0 -= 1; } while (param0 > 0); return;
        let out = structure_code(&[0x84, 0x00, 0xff, 0x1a, 0x9d, 0xff, 0xfc, 0xb1], &[], 1);
        assert_eq!(kinds(&out.body), vec![NodeKind::Loop, NodeKind::Statement]);
        let Node::Loop(node) = &out.body[0] else { unreachable!() };
        assert!(matches!(&node.kind, LoopKind::PostTest(c) if c.to_string() == "param0 > 0"));
        assert_eq!(node.body.len(), 1);
    }
}
