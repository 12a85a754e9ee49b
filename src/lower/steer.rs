//! Steer synthesis for conditional branches and selects.

use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;

use super::Lowering;
use crate::graph::OperatorKind;
use crate::ir::{BlockId, InstId, InstKind, LoopQuery, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteerPair {
    pub on_true: NodeIndex,
    pub on_false: NodeIndex,
}

impl SteerPair {
    #[must_use]
    pub fn side(&self, taken: bool) -> NodeIndex {
        if taken { self.on_true } else { self.on_false }
    }
}

/// Steer pairs keyed by the branch or select that produced them.
#[derive(Debug, Clone, Default)]
pub struct SteerRegistry {
    pairs: HashMap<InstId, SteerPair>,
}

impl SteerRegistry {
    pub fn register(&mut self, origin: InstId, pair: SteerPair) {
        self.pairs.insert(origin, pair);
    }

    #[must_use]
    pub fn get(&self, origin: InstId) -> Option<SteerPair> {
        self.pairs.get(&origin).copied()
    }
}

impl<L: LoopQuery> Lowering<'_, L> {
    /// Allocates a fresh steer pair for `origin`, gated by `cond` and feeding
    /// each side its value when one is given. The pair is registered before
    /// anything is wired into it.
    fn create_steers(
        &mut self,
        origin: InstId,
        cond: &Value,
        on_true: Option<&Value>,
        on_false: Option<&Value>,
    ) -> SteerPair {
        if let Some(decider) = self.graph.get_or_create(self.func, cond)
            && let Some(node) = self.graph.node_mut(decider)
            && node.kind == OperatorKind::Unknown
        {
            node.kind = OperatorKind::BasicBinaryOp;
        }

        let pair = SteerPair {
            on_true: self.graph.add_node(OperatorKind::TrueSteer, None, "T"),
            on_false: self.graph.add_node(OperatorKind::FalseSteer, None, "F"),
        };
        self.steers.register(origin, pair);

        self.wire_value(cond, pair.on_true);
        self.wire_value(cond, pair.on_false);
        if let Some(value) = on_true {
            self.wire_value(value, pair.on_true);
        }
        if let Some(value) = on_false {
            self.wire_value(value, pair.on_false);
        }
        pair
    }

    /// Steer pair of the conditional branch `id`, created on first request.
    pub(super) fn branch_steers(&mut self, id: InstId) -> Option<SteerPair> {
        if let Some(pair) = self.steers.get(id) {
            return Some(pair);
        }
        let InstKind::CondBr { cond, .. } = self.inst_kind(id) else {
            return None;
        };

        let pair = self.create_steers(id, cond, None, None);
        if self.options.entry_stream {
            let stream = self.entry_stream();
            self.graph.add_edge(stream, pair.on_true);
            self.graph.add_edge(stream, pair.on_false);
        }
        Some(pair)
    }

    /// Steer pair of the select `id`, created on first request. Whoever asks
    /// first, a branch condition or another select, gets the lowered pair.
    pub(super) fn select_steers(&mut self, id: InstId) -> Option<SteerPair> {
        if let Some(pair) = self.steers.get(id) {
            return Some(pair);
        }
        let InstKind::Select {
            cond,
            on_true,
            on_false,
            ..
        } = self.inst_kind(id)
        else {
            return None;
        };

        let pair = self.create_steers(id, cond, Some(on_true), Some(on_false));

        // Join points pick the select up through the resolver.
        let func = self.func;
        for user in func.users(&Value::Inst(id)) {
            if self.inst_kind(user).is_phi() {
                continue;
            }
            if let Some(node) = self.real_node(user) {
                self.graph.add_edge(pair.on_true, node);
                self.graph.add_edge(pair.on_false, node);
            }
        }
        Some(pair)
    }

    fn entry_stream(&mut self) -> NodeIndex {
        match self.entry_stream {
            Some(stream) => stream,
            None => {
                let stream = self.graph.add_node(OperatorKind::Stream, None, "STR");
                self.entry_stream = Some(stream);
                stream
            }
        }
    }

    pub(super) fn lower_branches(&mut self) {
        let branches: Vec<_> = self
            .func
            .instructions()
            .filter_map(|(id, inst)| match inst.kind {
                InstKind::CondBr {
                    on_true, on_false, ..
                } => Some((id, on_true, on_false)),
                _ => None,
            })
            .collect();

        for (id, on_true, on_false) in branches {
            let Some(pair) = self.branch_steers(id) else {
                continue;
            };
            let into_true = self.first_operator(on_true);
            let into_false = self.first_operator(on_false);
            if let Some(target) = into_true {
                self.graph.add_edge(pair.on_true, target);
            }
            if let Some(target) = into_false {
                self.graph.add_edge(pair.on_false, target);
            }
        }
    }

    /// First instruction of `block` that is a real operator, past any joins
    /// and instructions without a node of their own.
    fn first_operator(&self, block: BlockId) -> Option<NodeIndex> {
        self.func
            .block(block)
            .insts()
            .iter()
            .filter(|&&id| !self.inst_kind(id).is_phi())
            .find_map(|&id| self.real_node(id))
    }

    pub(super) fn lower_selects(&mut self) {
        let selects: Vec<_> = self
            .func
            .instructions()
            .filter(|(_, inst)| matches!(inst.kind, InstKind::Select { .. }))
            .map(|(id, _)| id)
            .collect();
        for id in selects {
            self.select_steers(id);
        }
    }
}
