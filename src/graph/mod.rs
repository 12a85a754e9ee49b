//! The dataflow graph produced by lowering.
//!
//! Nodes and edges live in a petgraph [`StableDiGraph`], so indices held by
//! the lowering stay valid across removals. Every source value maps to at
//! most one node.

mod node;

use std::collections::HashMap;

use log::warn;
use petgraph::{
    Direction,
    stable_graph::{NodeIndex, StableDiGraph},
    visit::{EdgeRef, IntoEdgeReferences},
};

pub use node::{Node, OperatorKind};

use crate::ir::{Function, InstKind, Value};

#[derive(Debug, Clone, Default)]
pub struct DataflowGraph {
    graph: StableDiGraph<Node, ()>,
    values: HashMap<Value, NodeIndex>,
}

impl DataflowGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node for `value`, creating it on first use.
    ///
    /// Parameters start out as `FunctionInput`, literals and globals as
    /// `Constant`, instructions as `Unknown` until classified. Callees,
    /// address computations, casts, selects and branches never get a node of
    /// their own and yield `None`.
    pub fn get_or_create(&mut self, func: &Function, value: &Value) -> Option<NodeIndex> {
        if let Some(existing) = self.find_node(value) {
            return Some(existing);
        }

        let (kind, label) = match value {
            Value::Function(_) => return None,
            Value::Param(index) => {
                let label = func
                    .params
                    .get(*index)
                    .map(|p| format!("{} {}", p.ty, func.value_name(value)))
                    .unwrap_or_default();
                (OperatorKind::FunctionInput, label)
            }
            Value::Const(c) => (OperatorKind::Constant, format!("{} {}", c.ty, c.literal)),
            Value::Global(_) => (OperatorKind::Constant, func.value_name(value)),
            Value::Inst(id) => match &func.inst(*id).kind {
                InstKind::GetElementPtr { .. }
                | InstKind::Cast { .. }
                | InstKind::Select { .. }
                | InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Ret { value: None }
                | InstKind::Unreachable => return None,
                _ => (OperatorKind::Unknown, String::new()),
            },
        };

        Some(self.add_node(kind, Some(value.clone()), label))
    }

    /// Unconditionally adds a node, mapping it to `origin` when given.
    pub fn add_node(
        &mut self,
        kind: OperatorKind,
        origin: Option<Value>,
        label: impl Into<String>,
    ) -> NodeIndex {
        let index = self.graph.add_node(Node::new(kind, origin.clone(), label));
        if let Some(value) = origin {
            self.values.insert(value, index);
        }
        index
    }

    /// Adds `source -> destination` unless it already exists. Returns whether
    /// the edge is present afterwards; a missing endpoint only warns.
    pub fn add_edge(
        &mut self,
        source: impl Into<Option<NodeIndex>>,
        destination: impl Into<Option<NodeIndex>>,
    ) -> bool {
        let (Some(source), Some(destination)) = (source.into(), destination.into()) else {
            warn!("add_edge called with a missing endpoint");
            return false;
        };
        if !self.graph.contains_node(source) || !self.graph.contains_node(destination) {
            warn!("add_edge called with a removed node ({source:?} -> {destination:?})");
            return false;
        }
        if self.graph.find_edge(source, destination).is_none() {
            self.graph.add_edge(source, destination, ());
        }
        true
    }

    /// Removes a node together with every edge touching it and its value
    /// mapping. Missing nodes are ignored.
    pub fn remove_node(&mut self, node: impl Into<Option<NodeIndex>>) -> Option<Node> {
        let Some(node) = node.into() else {
            warn!("remove_node called without a node");
            return None;
        };
        let removed = self.graph.remove_node(node)?;
        if let Some(value) = &removed.origin
            && self.values.get(value) == Some(&node)
        {
            self.values.remove(value);
        }
        Some(removed)
    }

    #[must_use]
    pub fn find_node(&self, value: &Value) -> Option<NodeIndex> {
        self.values.get(value).copied()
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.graph.node_weight(index)
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.graph.node_weight_mut(index)
    }

    #[must_use]
    pub fn kind(&self, index: NodeIndex) -> Option<OperatorKind> {
        self.node(index).map(|n| n.kind)
    }

    /// Nodes feeding `index`, in index order.
    #[must_use]
    pub fn inputs(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(index, Direction::Incoming)
    }

    /// Nodes fed by `index`, in index order.
    #[must_use]
    pub fn outputs(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(index, Direction::Outgoing)
    }

    fn neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut found: Vec<_> = self.graph.neighbors_directed(index, direction).collect();
        found.sort();
        found
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node)> {
        self.graph
            .node_indices()
            .filter_map(|index| self.graph.node_weight(index).map(|n| (index, n)))
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.graph.edge_references().map(|e| (e.source(), e.target()))
    }

    #[must_use]
    pub fn nodes_of_kind(&self, kind: OperatorKind) -> Vec<NodeIndex> {
        self.nodes()
            .filter(|(_, n)| n.kind == kind)
            .map(|(index, _)| index)
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn degree(&self, index: NodeIndex) -> usize {
        self.graph.edges_directed(index, Direction::Incoming).count()
            + self.graph.edges_directed(index, Direction::Outgoing).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Type, parse};

    fn sample() -> Function {
        parse(
            r#"
define i32 @f(ptr %p, i32 %n) {
entry:
  %q = getelementptr i32, ptr %p, i64 1
  %v = load i32, ptr %q
  %w = zext i32 %v to i64
  %x = add i32 %v, %n
  ret i32 %x
}
"#,
        )
        .unwrap()
        .functions
        .remove(0)
    }

    #[test]
    fn test_get_or_create_deduplicates() {
        let f = sample();
        let mut graph = DataflowGraph::new();
        let x = f.value_named("x").unwrap();

        let first = graph.get_or_create(&f, &x).unwrap();
        let second = graph.get_or_create(&f, &x).unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.find_node(&x), Some(first));
        assert_eq!(graph.node_count(), 1);

        let one = Value::constant(Type::Int(32), "1");
        let c1 = graph.get_or_create(&f, &one).unwrap();
        let c2 = graph
            .get_or_create(&f, &Value::constant(Type::Int(32), "1"))
            .unwrap();
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_initial_kinds_and_exclusions() {
        let f = sample();
        let mut graph = DataflowGraph::new();

        let n = graph.get_or_create(&f, &Value::Param(1)).unwrap();
        assert_eq!(graph.kind(n), Some(OperatorKind::FunctionInput));
        assert_eq!(graph.node(n).unwrap().label, "i32 %n");

        let c = graph
            .get_or_create(&f, &Value::constant(Type::Int(32), "7"))
            .unwrap();
        assert_eq!(graph.kind(c), Some(OperatorKind::Constant));

        let v = graph.get_or_create(&f, &f.value_named("v").unwrap()).unwrap();
        assert_eq!(graph.kind(v), Some(OperatorKind::Unknown));

        assert!(graph.get_or_create(&f, &f.value_named("q").unwrap()).is_none());
        assert!(graph.get_or_create(&f, &f.value_named("w").unwrap()).is_none());
        assert!(
            graph
                .get_or_create(&f, &Value::Function("g".to_string()))
                .is_none()
        );
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut graph = DataflowGraph::new();
        let a = graph.add_node(OperatorKind::Constant, None, "a");
        let b = graph.add_node(OperatorKind::BasicBinaryOp, None, "b");

        assert!(graph.add_edge(a, b));
        assert!(graph.add_edge(a, b));
        assert_eq!(graph.edge_count(), 1);

        // Reverse direction is a different edge.
        graph.add_edge(b, a);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_add_edge_with_missing_endpoint() {
        let mut graph = DataflowGraph::new();
        let a = graph.add_node(OperatorKind::Constant, None, "a");
        assert!(!graph.add_edge(a, None::<NodeIndex>));
        assert!(!graph.add_edge(None::<NodeIndex>, a));

        let b = graph.add_node(OperatorKind::Load, None, "b");
        graph.remove_node(b);
        assert!(!graph.add_edge(a, b));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_node_unlinks_everything() {
        let f = sample();
        let mut graph = DataflowGraph::new();
        let x = f.value_named("x").unwrap();

        let n = graph.get_or_create(&f, &Value::Param(1)).unwrap();
        let node = graph.get_or_create(&f, &x).unwrap();
        let out = graph.add_node(OperatorKind::FunctionOutput, None, "ret");
        graph.add_edge(n, node);
        graph.add_edge(node, out);

        let removed = graph.remove_node(node).unwrap();
        assert_eq!(removed.origin, Some(x.clone()));
        assert_eq!(graph.find_node(&x), None);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.edges().all(|(s, d)| s != node && d != node));
        assert!(graph.outputs(n).is_empty());
        assert!(graph.inputs(out).is_empty());

        // Removing twice, or removing nothing, is harmless.
        assert!(graph.remove_node(node).is_none());
        assert!(graph.remove_node(None::<NodeIndex>).is_none());
    }
}
