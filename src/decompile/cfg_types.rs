use std::collections::BTreeMap;
use std::ops::Range;

use crate::code_attribute::Instruction;

/// Index of a block in [`ControlFlowGraph::blocks`]. Blocks are stored in offset order.
pub type BlockId = usize;

/// How a basic block ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    FallThrough(BlockId),
    Goto(BlockId),
    /// Conditional branch. The condition holds when `taken` is followed.
    Branch { taken: BlockId, not_taken: BlockId },
    Switch {
        default: BlockId,
        cases: Vec<(i32, BlockId)>,
    },
    Return,
    Throw,
    /// `jsr`/`ret`, or code running off the end of the array.
    Unsupported,
}

/// A straight-line run of instructions.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub start: u32,
    /// Offset just past the last instruction.
    pub end: u32,
    /// Indices into [`ControlFlowGraph::instructions`].
    pub range: Range<usize>,
    pub terminator: Terminator,
}

/// One row of the exception table, resolved to blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start: u32,
    pub end: u32,
    pub handler: BlockId,
    /// Internal name of the caught class, `None` for a catch-all.
    pub catch_type: Option<String>,
    /// Position in the original exception table.
    pub index: usize,
}

/// The control flow graph of a single method.
#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    pub instructions: Vec<Instruction>,
    pub blocks: Vec<BasicBlock>,
    pub handlers: Vec<ExceptionHandler>,
    pub(crate) by_offset: BTreeMap<u32, BlockId>,
    pub(crate) preds: Vec<Vec<BlockId>>,
}

impl ControlFlowGraph {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn block_at(&self, offset: u32) -> Option<BlockId> {
        self.by_offset.get(&offset).copied()
    }

    pub fn instructions_of(&self, id: BlockId) -> &[Instruction] {
        &self.instructions[self.blocks[id].range.clone()]
    }

    /// Normal (non-exceptional) successors, without duplicates, in terminator order.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let mut succs = match &self.blocks[id].terminator {
            Terminator::FallThrough(target) | Terminator::Goto(target) => vec![*target],
            Terminator::Branch { taken, not_taken } => vec![*not_taken, *taken],
            Terminator::Switch { default, cases } => cases
                .iter()
                .map(|(_, target)| *target)
                .chain(std::iter::once(*default))
                .collect(),
            Terminator::Return | Terminator::Throw | Terminator::Unsupported => Vec::new(),
        };
        let mut seen = Vec::with_capacity(succs.len());
        succs.retain(|s| {
            if seen.contains(s) {
                false
            } else {
                seen.push(*s);
                true
            }
        });
        succs
    }

    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id]
    }

    pub fn is_handler(&self, id: BlockId) -> bool {
        self.handlers.iter().any(|h| h.handler == id)
    }

    /// Catch type of the first exception table row targeting `id`.
    pub fn handler_type(&self, id: BlockId) -> Option<&ExceptionHandler> {
        self.handlers.iter().find(|h| h.handler == id)
    }

    /// Blocks whose first instruction lies in `[start, end)`.
    pub fn blocks_in(&self, start: u32, end: u32) -> impl Iterator<Item = BlockId> + '_ {
        self.by_offset.range(start..end).map(|(_, &id)| id)
    }

    /// Generate a DOT graph for visualization.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph CFG {\n");
        for block in &self.blocks {
            dot.push_str(&format!(
                "  B{} [label=\"B{} @{} ({} instrs)\"];\n",
                block.id,
                block.id,
                block.start,
                block.range.len()
            ));
            for succ in self.successors(block.id) {
                dot.push_str(&format!("  B{} -> B{};\n", block.id, succ));
            }
        }
        for handler in &self.handlers {
            if let Some(from) = self.block_at(handler.start) {
                dot.push_str(&format!(
                    "  B{} -> B{} [style=dashed, label=\"catch\"];\n",
                    from, handler.handler
                ));
            }
        }
        dot.push_str("}\n");
        dot
    }
}

/// Immediate dominators over a graph with one extra virtual node at index `len`.
#[derive(Clone, Debug)]
pub struct DominatorTree {
    idom: Vec<Option<usize>>,
    root: usize,
}

impl DominatorTree {
    /// Immediate dominator of `node`, `None` for the root, unreachable nodes and nodes
    /// whose only dominator is the virtual root.
    pub fn idom(&self, node: BlockId) -> Option<BlockId> {
        match self.idom.get(node).copied().flatten() {
            Some(parent) if parent != self.root && node != self.root => Some(parent),
            _ => None,
        }
    }

    pub fn is_reachable(&self, node: BlockId) -> bool {
        self.idom.get(node).copied().flatten().is_some()
    }

    /// Reflexive dominance.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom[current] {
                Some(parent) if parent != current => current = parent,
                _ => return false,
            }
        }
    }

    pub(crate) fn from_parts(idom: Vec<Option<usize>>, root: usize) -> Self {
        DominatorTree { idom, root }
    }
}
