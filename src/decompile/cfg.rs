use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

use log::{trace, warn};

use crate::attribute_info::ExceptionEntry;
use crate::code_attribute::{InsnKind, Instruction, ValueKind};
use crate::metadata::MetadataTable;

use super::cfg_types::*;

/// Build a control flow graph from a decoded method body and its exception table.
pub fn build_cfg(
    instructions: Vec<Instruction>,
    exception_table: &[ExceptionEntry],
    meta: &MetadataTable,
) -> ControlFlowGraph {
    let index_of: HashMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, insn)| (insn.offset, i))
        .collect();
    let code_end = instructions.last().map(Instruction::next_offset).unwrap_or(0);

    let table: Vec<&ExceptionEntry> = exception_table
        .iter()
        .filter(|entry| {
            let valid = entry.start_pc < entry.end_pc
                && index_of.contains_key(&(entry.start_pc as u32))
                && index_of.contains_key(&(entry.handler_pc as u32))
                && (entry.end_pc as u32 == code_end || index_of.contains_key(&(entry.end_pc as u32)));
            if !valid {
                warn!(
                    "ignoring exception table entry [{}, {}) -> {}",
                    entry.start_pc, entry.end_pc, entry.handler_pc
                );
            }
            valid
        })
        .collect();

    // Step 1: block leaders
    let mut leaders = BTreeSet::new();
    if !instructions.is_empty() {
        leaders.insert(0u32);
    }
    for insn in &instructions {
        leaders.extend(insn.branch_targets());
        if insn.ends_block() {
            leaders.insert(insn.next_offset());
        }
    }
    for entry in &table {
        leaders.insert(entry.start_pc as u32);
        leaders.insert(entry.end_pc as u32);
        leaders.insert(entry.handler_pc as u32);
    }
    leaders.extend(cleanup_split_points(&instructions, &index_of, &table));
    leaders.retain(|offset| index_of.contains_key(offset));

    // Step 2: basic blocks
    let starts: Vec<u32> = leaders.into_iter().collect();
    let by_offset: BTreeMap<u32, BlockId> = starts.iter().enumerate().map(|(id, &s)| (s, id)).collect();
    let mut blocks = Vec::with_capacity(starts.len());
    for (id, &start) in starts.iter().enumerate() {
        let first = index_of[&start];
        let last = starts
            .get(id + 1)
            .map(|next| index_of[next])
            .unwrap_or(instructions.len());
        let range = first..last;
        let tail = &instructions[last - 1];
        let next_block = (id + 1 < starts.len()).then_some(id + 1);
        let terminator = build_terminator(tail, next_block, &by_offset).unwrap_or(Terminator::Unsupported);
        blocks.push(BasicBlock {
            id,
            start,
            end: tail.next_offset(),
            range,
            terminator,
        });
    }

    // Step 3: exception handlers
    let handlers = table
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let handler = *by_offset.get(&(entry.handler_pc as u32))?;
            let catch_type = match entry.catch_type {
                0 => None,
                type_index => Some(match meta.class_name(type_index) {
                    Ok(name) => name.to_string(),
                    Err(err) => {
                        warn!("unresolvable catch type: {err}");
                        "java/lang/Throwable".to_string()
                    }
                }),
            };
            Some(ExceptionHandler {
                start: entry.start_pc as u32,
                end: entry.end_pc as u32,
                handler,
                catch_type,
                index,
            })
        })
        .collect();

    let mut cfg = ControlFlowGraph {
        instructions,
        blocks,
        handlers,
        by_offset,
        preds: Vec::new(),
    };
    let mut preds = vec![Vec::new(); cfg.len()];
    for block in 0..cfg.len() {
        for succ in cfg.successors(block) {
            preds[succ].push(block);
        }
    }
    cfg.preds = preds;
    trace!("built cfg with {} blocks", cfg.len());
    cfg
}

fn build_terminator(
    tail: &Instruction,
    next_block: Option<BlockId>,
    by_offset: &BTreeMap<u32, BlockId>,
) -> Option<Terminator> {
    let block_at = |offset: &u32| by_offset.get(offset).copied();
    Some(match &tail.kind {
        InsnKind::If { target, .. } => Terminator::Branch {
            taken: block_at(target)?,
            not_taken: next_block?,
        },
        InsnKind::Goto { target } => Terminator::Goto(block_at(target)?),
        InsnKind::TableSwitch { default, low, targets } => Terminator::Switch {
            default: block_at(default)?,
            cases: targets
                .iter()
                .enumerate()
                .map(|(i, t)| Some((low.wrapping_add(i as i32), block_at(t)?)))
                .collect::<Option<Vec<_>>>()?,
        },
        InsnKind::LookupSwitch { default, pairs } => Terminator::Switch {
            default: block_at(default)?,
            cases: pairs
                .iter()
                .map(|(key, t)| Some((*key, block_at(t)?)))
                .collect::<Option<Vec<_>>>()?,
        },
        InsnKind::Return(_) => Terminator::Return,
        InsnKind::Throw => Terminator::Throw,
        InsnKind::Jsr { .. } | InsnKind::Ret { .. } => Terminator::Unsupported,
        _ => Terminator::FallThrough(next_block?),
    })
}

/// Instruction indices of a catch-all handler's cleanup: the code between the leading
/// `astore t` and the trailing `aload t; athrow`. `None` when the handler does not have
/// that straight-line shape or the cleanup is empty.
pub(crate) fn finally_cleanup(instructions: &[Instruction], handler: usize) -> Option<Range<usize>> {
    let slot = match instructions.get(handler)?.kind {
        InsnKind::Store {
            kind: ValueKind::Reference,
            slot,
        } => slot,
        _ => return None,
    };
    let mut i = handler + 1;
    while i + 1 < instructions.len() {
        if let (
            InsnKind::Load {
                kind: ValueKind::Reference,
                slot: loaded,
            },
            InsnKind::Throw,
        ) = (&instructions[i].kind, &instructions[i + 1].kind)
        {
            if *loaded == slot {
                return (i > handler + 1).then_some(handler + 1..i);
            }
        }
        if instructions[i].ends_block() {
            return None;
        }
        i += 1;
    }
    None
}

/// True if the instructions starting at index `at` repeat `cleanup` byte for byte.
pub(crate) fn cleanup_matches(instructions: &[Instruction], at: usize, cleanup: &[Instruction]) -> bool {
    instructions.len() >= at + cleanup.len()
        && instructions[at..at + cleanup.len()]
            .iter()
            .zip(cleanup)
            .all(|(a, b)| a.bytes == b.bytes)
}

/// Where a catch-all handler's cleanup ends inside an inlined copy of it. Splitting
/// there lets the copy be dropped as a block of its own.
fn cleanup_split_points(
    instructions: &[Instruction],
    index_of: &HashMap<u32, usize>,
    table: &[&ExceptionEntry],
) -> Vec<u32> {
    let mut points = Vec::new();
    for entry in table.iter().filter(|e| e.is_catch_all()) {
        let Some(cleanup) = index_of
            .get(&(entry.handler_pc as u32))
            .and_then(|&h| finally_cleanup(instructions, h))
        else {
            continue;
        };
        let cleanup = &instructions[cleanup];
        let cleanup_len: u32 = cleanup.iter().map(Instruction::len).sum();
        for sibling in table.iter().filter(|e| e.handler_pc == entry.handler_pc) {
            let Some(&at) = index_of.get(&(sibling.end_pc as u32)) else {
                continue;
            };
            if cleanup_matches(instructions, at, cleanup) {
                points.push(sibling.end_pc as u32 + cleanup_len);
            }
            // monitorexit-style scopes release inside the range, just before end_pc
            if let Some(&before) = (sibling.end_pc as u32)
                .checked_sub(cleanup_len)
                .and_then(|offset| index_of.get(&offset))
            {
                if cleanup_matches(instructions, before, cleanup) {
                    points.push(instructions[before].offset);
                }
            }
        }
    }
    points
}

/// Dominators. A virtual root precedes the method entry and every handler block, so
/// code reached only through exceptions is still covered.
pub fn dominators(cfg: &ControlFlowGraph) -> DominatorTree {
    let root = cfg.len();
    let mut succs: Vec<Vec<usize>> = (0..cfg.len()).map(|b| cfg.successors(b)).collect();
    let mut entries: Vec<usize> = cfg.handlers.iter().map(|h| h.handler).collect();
    if !cfg.is_empty() {
        entries.push(0);
    }
    entries.sort_unstable();
    entries.dedup();
    succs.push(entries);
    DominatorTree::from_parts(compute_idoms(&succs, root), root)
}

/// Post-dominators, computed on the reversed graph from a virtual exit that follows
/// every block without successors.
pub fn post_dominators(cfg: &ControlFlowGraph) -> DominatorTree {
    let exit = cfg.len();
    let mut succs: Vec<Vec<usize>> = (0..cfg.len()).map(|b| cfg.predecessors(b).to_vec()).collect();
    succs.push((0..cfg.len()).filter(|&b| cfg.successors(b).is_empty()).collect());
    DominatorTree::from_parts(compute_idoms(&succs, exit), exit)
}

/// Iterative dominator computation in reverse postorder (Cooper, Harvey, Kennedy).
fn compute_idoms(succs: &[Vec<usize>], root: usize) -> Vec<Option<usize>> {
    let n = succs.len();
    let mut order = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let mut stack = vec![(root, 0usize)];
    visited[root] = true;
    while let Some(top) = stack.last_mut() {
        let (node, child) = *top;
        if let Some(&next) = succs[node].get(child) {
            top.1 += 1;
            if !visited[next] {
                visited[next] = true;
                stack.push((next, 0));
            }
        } else {
            order.push(node);
            stack.pop();
        }
    }
    order.reverse();

    let mut rpo_index = vec![usize::MAX; n];
    for (i, &node) in order.iter().enumerate() {
        rpo_index[node] = i;
    }
    let mut preds = vec![Vec::new(); n];
    for (node, targets) in succs.iter().enumerate() {
        for &t in targets {
            preds[t].push(node);
        }
    }

    let mut idom: Vec<Option<usize>> = vec![None; n];
    idom[root] = Some(root);
    let mut changed = true;
    while changed {
        changed = false;
        for &b in order.iter().skip(1) {
            let mut new_idom = None;
            for &p in &preds[b] {
                if idom[p].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(current) => intersect(&idom, &rpo_index, current, p, root),
                });
            }
            if new_idom.is_some() && idom[b] != new_idom {
                idom[b] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

fn intersect(idom: &[Option<usize>], rpo_index: &[usize], mut a: usize, mut b: usize, root: usize) -> usize {
    while a != b {
        while rpo_index[a] > rpo_index[b] {
            a = match idom[a] {
                Some(parent) => parent,
                None => return root,
            };
        }
        while rpo_index[b] > rpo_index[a] {
            b = match idom[b] {
                Some(parent) => parent,
                None => return root,
            };
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_attribute::decode;
    use crate::types::ClassFile;

    fn empty_table() -> MetadataTable {
        let mut bytes = vec![0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 52, 0, 1];
        bytes.extend_from_slice(&[0, 0x21, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        MetadataTable::new(ClassFile::parse(&bytes).unwrap())
    }

    fn cfg_of(code: &[u8], table: &[ExceptionEntry]) -> ControlFlowGraph {
        let meta = empty_table();
        build_cfg(decode(code, &meta).unwrap(), table, &meta)
    }

    #[test]
    fn diamond_blocks_and_dominators() {
        // 0: iload_0, 1: ifeq 9, 4: iconst_1, 5: istore_1, 6: goto 11,
        // 9: iconst_2, 10: istore_1, 11: return
        let cfg = cfg_of(
            &[0x1a, 0x99, 0x00, 0x08, 0x04, 0x3c, 0xa7, 0x00, 0x05, 0x05, 0x3c, 0xb1],
            &[],
        );
        let starts: Vec<u32> = cfg.blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 4, 9, 11]);
        assert_eq!(cfg.block(0).terminator, Terminator::Branch { taken: 2, not_taken: 1 });
        assert_eq!(cfg.block(1).terminator, Terminator::Goto(3));
        assert_eq!(cfg.block(2).terminator, Terminator::FallThrough(3));
        assert_eq!(cfg.predecessors(3), &[1, 2]);

        let doms = dominators(&cfg);
        assert_eq!(doms.idom(3), Some(0));
        assert!(doms.dominates(0, 2));
        assert!(!doms.dominates(1, 3));

        let pdoms = post_dominators(&cfg);
        assert_eq!(pdoms.idom(0), Some(3));
        assert_eq!(pdoms.idom(3), None);
    }

    #[test]
    fn back_edge_target_dominates_source() {
        // i = 0; while (i < 10) i++;
        let cfg = cfg_of(
            &[0x03, 0x3c, 0x1b, 0x10, 10, 0xa2, 0x00, 0x09, 0x84, 0x01, 0x01, 0xa7, 0xff, 0xf7, 0xb1],
            &[],
        );
        assert_eq!(cfg.len(), 4);
        assert_eq!(cfg.block(2).terminator, Terminator::Goto(1));
        assert!(dominators(&cfg).dominates(1, 2));
        assert_eq!(post_dominators(&cfg).idom(1), Some(3));
    }

    #[test]
    fn finally_copy_is_split_off() {
        // try { x = 1 } finally { y = 0 }
        // 0: iconst_1, 1: istore_1, 2: iconst_0, 3: istore_2, 4: return,
        // 5: astore_3, 6: iconst_0, 7: istore_2, 8: aload_3, 9: athrow
        let table = [ExceptionEntry {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 5,
            catch_type: 0,
        }];
        let cfg = cfg_of(&[0x04, 0x3c, 0x03, 0x3d, 0xb1, 0x4e, 0x03, 0x3d, 0x2d, 0xbf], &table);
        let starts: Vec<u32> = cfg.blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 2, 4, 5]);
        assert_eq!(finally_cleanup(&cfg.instructions, 5), Some(6..8));
        assert_eq!(cfg.handlers[0].handler, 3);
        assert_eq!(cfg.handlers[0].catch_type, None);

        let doms = dominators(&cfg);
        assert!(doms.is_reachable(3));
        assert_eq!(doms.idom(3), None);
    }
}
