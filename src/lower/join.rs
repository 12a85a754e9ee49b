//! Join points: phis become a `Merge`, or a `Carry` when loop-carried.

use std::collections::HashSet;

use log::warn;
use petgraph::stable_graph::NodeIndex;

use super::Lowering;
use crate::graph::OperatorKind;
use crate::ir::{BlockId, InstId, InstKind, LoopId, LoopQuery, Value};

impl<'f, L: LoopQuery> Lowering<'f, L> {
    pub(super) fn wire_join_points(&mut self) {
        let func = self.func;
        for (id, inst) in func.instructions() {
            let InstKind::Phi { incoming, .. } = &inst.kind else {
                continue;
            };
            let Some(join) = self.real_node(id) else {
                continue;
            };

            match self.carrying_loop(inst.block, incoming) {
                Some(lp) => self.lower_carry(id, join, lp, incoming),
                None => self.lower_merge(inst.block, join, incoming),
            }

            for user in func.users(&Value::Inst(id)) {
                if self.inst_kind(user).is_phi() {
                    continue;
                }
                if let Some(consumer) = self.real_node(user) {
                    self.graph.add_edge(join, consumer);
                }
            }
        }
    }

    /// The loop a join in `block` carries values around: `block` must be the
    /// header and some incoming edge must come from inside the loop.
    fn carrying_loop(&self, block: BlockId, incoming: &[(Value, BlockId)]) -> Option<LoopId> {
        let lp = self.loops.loop_of(block)?;
        let back_edge = incoming
            .iter()
            .any(|(_, pred)| self.loops.contains(lp, *pred));
        (self.loops.header(lp) == block && back_edge).then_some(lp)
    }

    fn lower_merge(&mut self, block: BlockId, join: NodeIndex, incoming: &[(Value, BlockId)]) {
        for (value, pred) in incoming {
            match self.controlling_steer(*pred, block) {
                Some(steer) => {
                    self.wire_value(value, steer);
                    self.graph.add_edge(steer, join);
                }
                None => self.wire_value(value, join),
            }
        }
    }

    /// Steer on the path `pred -> block`, if a conditional branch decides it.
    ///
    /// An unconditional edge is followed up through single-predecessor
    /// blocks when tracing is enabled.
    fn controlling_steer(&mut self, pred: BlockId, block: BlockId) -> Option<NodeIndex> {
        let mut from = pred;
        let mut to = block;
        let mut seen = HashSet::new();
        loop {
            let terminator = self.func.terminator(from)?;
            match self.inst_kind(terminator) {
                InstKind::CondBr { on_true, .. } => {
                    let pair = self.branch_steers(terminator)?;
                    return Some(pair.side(*on_true == to));
                }
                InstKind::Br { .. } if self.options.trace_controlling_branch => {
                    let [single] = self.func.predecessors(from)[..] else {
                        return None;
                    };
                    if !seen.insert(from) {
                        return None;
                    }
                    to = from;
                    from = single;
                }
                _ => return None,
            }
        }
    }

    fn lower_carry(
        &mut self,
        id: InstId,
        join: NodeIndex,
        lp: LoopId,
        incoming: &[(Value, BlockId)],
    ) {
        if let Some(node) = self.graph.node_mut(join) {
            node.kind = OperatorKind::Carry;
            node.label = "C".to_string();
            node.symbol.clear();
        }

        match self.loop_decider(lp) {
            Some(decider) => self.wire_value(decider, join),
            None => warn!(
                "@{}: no loop condition found for carry {}",
                self.func.name,
                self.func.value_name(&Value::Inst(id))
            ),
        }
        for (value, _) in incoming {
            self.wire_value(value, join);
        }
    }

    /// Condition deciding whether loop `lp` iterates again: the branch
    /// ending the preheader's single predecessor, else a branch leaving the
    /// loop.
    fn loop_decider(&self, lp: LoopId) -> Option<&'f Value> {
        let branch_cond = |block: BlockId| {
            let terminator = self.func.terminator(block)?;
            match self.inst_kind(terminator) {
                InstKind::CondBr { cond, .. } => Some(cond),
                _ => None,
            }
        };

        let from_preheader = self.loops.preheader(lp).and_then(|preheader| {
            match self.func.predecessors(preheader)[..] {
                [single] => branch_cond(single),
                _ => None,
            }
        });
        from_preheader.or_else(|| {
            self.loops
                .exiting_blocks(lp)
                .iter()
                .find_map(|&block| branch_cond(block))
        })
    }
}
