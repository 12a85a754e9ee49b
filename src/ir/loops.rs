//! Natural-loop analysis over a function's CFG.
//!
//! The lowering only ever asks a handful of structural questions about
//! loops; [`LoopQuery`] names exactly those, and [`LoopInfo`] answers them
//! from dominators computed with petgraph.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::{
    Direction,
    algo::dominators::simple_fast,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};

use super::{BlockId, Function};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(usize);

/// Loop-structure queries consumed by the lowering.
pub trait LoopQuery {
    /// Innermost loop containing `block`.
    fn loop_of(&self, block: BlockId) -> Option<LoopId>;
    fn header(&self, id: LoopId) -> BlockId;
    fn contains(&self, id: LoopId, block: BlockId) -> bool;
    /// Sources of the back edges into the header.
    fn latches(&self, id: LoopId) -> &[BlockId];
    fn preheader(&self, id: LoopId) -> Option<BlockId>;
    /// Blocks inside the loop with a successor outside of it.
    fn exiting_blocks(&self, id: LoopId) -> &[BlockId];
}

#[derive(Debug, Clone)]
struct Loop {
    header: BlockId,
    latches: Vec<BlockId>,
    body: BTreeSet<BlockId>,
    preheader: Option<BlockId>,
    exiting: Vec<BlockId>,
}

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    loops: Vec<Loop>,
    innermost: HashMap<BlockId, LoopId>,
}

impl LoopInfo {
    pub fn analyze(func: &Function) -> Self {
        let Some(entry) = func.entry() else {
            return Self::default();
        };

        let mut cfg = DiGraph::<BlockId, ()>::with_capacity(func.block_count(), 0);
        for block in func.block_ids() {
            cfg.add_node(block);
        }
        for block in func.block_ids() {
            for succ in func.successors(block) {
                cfg.update_edge(NodeIndex::new(block.index()), NodeIndex::new(succ.index()), ());
            }
        }

        let doms = simple_fast(&cfg, NodeIndex::new(entry.index()));
        let reachable = |node: NodeIndex| doms.dominators(node).is_some();
        let dominates = |a: NodeIndex, b: NodeIndex| {
            doms.dominators(b)
                .is_some_and(|mut chain| chain.any(|d| d == a))
        };

        // Back edges grouped by header: edge latch -> header where the
        // header dominates the latch.
        let mut back_edges: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        for edge in cfg.edge_references() {
            if dominates(edge.target(), edge.source()) {
                back_edges
                    .entry(cfg[edge.target()])
                    .or_default()
                    .push(cfg[edge.source()]);
            }
        }

        let mut loops = vec![];
        for (header, latches) in back_edges {
            let mut body = BTreeSet::from([header]);
            let mut worklist = latches.clone();
            while let Some(block) = worklist.pop() {
                let node = NodeIndex::new(block.index());
                if reachable(node) && body.insert(block) {
                    worklist.extend(
                        cfg.neighbors_directed(node, Direction::Incoming)
                            .map(|pred| cfg[pred]),
                    );
                }
            }

            let outside_preds: Vec<BlockId> = func
                .predecessors(header)
                .into_iter()
                .filter(|pred| !body.contains(pred))
                .collect();
            let preheader = match outside_preds.as_slice() {
                [pred] if func.successors(*pred) == [header] => Some(*pred),
                _ => None,
            };

            let exiting = body
                .iter()
                .copied()
                .filter(|&b| func.successors(b).iter().any(|s| !body.contains(s)))
                .collect();

            loops.push(Loop {
                header,
                latches,
                body,
                preheader,
                exiting,
            });
        }

        let mut innermost = HashMap::new();
        for block in func.block_ids() {
            let smallest = loops
                .iter()
                .enumerate()
                .filter(|(_, l)| l.body.contains(&block))
                .min_by_key(|(_, l)| l.body.len())
                .map(|(index, _)| LoopId(index));
            if let Some(id) = smallest {
                innermost.insert(block, id);
            }
        }

        Self { loops, innermost }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

impl LoopQuery for LoopInfo {
    fn loop_of(&self, block: BlockId) -> Option<LoopId> {
        self.innermost.get(&block).copied()
    }

    fn header(&self, id: LoopId) -> BlockId {
        self.loops[id.0].header
    }

    fn contains(&self, id: LoopId, block: BlockId) -> bool {
        self.loops[id.0].body.contains(&block)
    }

    fn latches(&self, id: LoopId) -> &[BlockId] {
        &self.loops[id.0].latches
    }

    fn preheader(&self, id: LoopId) -> Option<BlockId> {
        self.loops[id.0].preheader
    }

    fn exiting_blocks(&self, id: LoopId) -> &[BlockId] {
        &self.loops[id.0].exiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse;

    const NESTED: &str = r#"
define void @nested(i32 %n) {
entry:
  br label %outer.pre

outer.pre:
  br label %outer

outer:
  %i = phi i32 [ 0, %outer.pre ], [ %i.next, %outer.latch ]
  br label %inner

inner:
  %j = phi i32 [ 0, %outer ], [ %j.next, %inner ]
  %j.next = add i32 %j, 1
  %cj = icmp slt i32 %j.next, %n
  br i1 %cj, label %inner, label %outer.latch

outer.latch:
  %i.next = add i32 %i, 1
  %ci = icmp slt i32 %i.next, %n
  br i1 %ci, label %outer, label %exit

exit:
  ret void
}
"#;

    fn block(f: &Function, name: &str) -> BlockId {
        f.find_block(name).unwrap()
    }

    #[test]
    fn test_nested_loops() {
        let f = parse(NESTED).unwrap().functions.remove(0);
        let loops = LoopInfo::analyze(&f);
        assert_eq!(loops.len(), 2);

        let inner = loops.loop_of(block(&f, "inner")).unwrap();
        let outer = loops.loop_of(block(&f, "outer")).unwrap();
        assert_ne!(inner, outer);

        assert_eq!(loops.header(inner), block(&f, "inner"));
        assert_eq!(loops.latches(inner), &[block(&f, "inner")]);
        assert!(loops.contains(outer, block(&f, "inner")));
        assert!(!loops.contains(inner, block(&f, "outer.latch")));
        assert_eq!(loops.loop_of(block(&f, "outer.latch")), Some(outer));
        assert_eq!(loops.loop_of(block(&f, "exit")), None);
    }

    #[test]
    fn test_preheader_and_exits() {
        let f = parse(NESTED).unwrap().functions.remove(0);
        let loops = LoopInfo::analyze(&f);

        let outer = loops.loop_of(block(&f, "outer")).unwrap();
        assert_eq!(loops.preheader(outer), Some(block(&f, "outer.pre")));
        assert_eq!(loops.exiting_blocks(outer), &[block(&f, "outer.latch")]);

        // %outer only jumps to %inner.
        let inner = loops.loop_of(block(&f, "inner")).unwrap();
        assert_eq!(loops.preheader(inner), Some(block(&f, "outer")));
        assert_eq!(loops.exiting_blocks(inner), &[block(&f, "inner")]);
    }

    #[test]
    fn test_rotated_loop_has_no_preheader() {
        let src = r#"
define void @f(i32 %n) {
entry:
  %c = icmp sgt i32 %n, 0
  br i1 %c, label %body, label %exit

body:
  %i = phi i32 [ 0, %entry ], [ %i.next, %body ]
  %i.next = add i32 %i, 1
  %d = icmp slt i32 %i.next, %n
  br i1 %d, label %body, label %exit

exit:
  ret void
}
"#;
        let f = parse(src).unwrap().functions.remove(0);
        let loops = LoopInfo::analyze(&f);
        let id = loops.loop_of(block(&f, "body")).unwrap();
        assert_eq!(loops.preheader(id), None);
        assert_eq!(loops.exiting_blocks(id), &[block(&f, "body")]);
    }

    #[test]
    fn test_straight_line_has_no_loops() {
        let src = "define void @f() {\nentry:\n  br label %next\nnext:\n  ret void\n}\n";
        let f = parse(src).unwrap().functions.remove(0);
        assert!(LoopInfo::analyze(&f).is_empty());
    }
}
