//! Operand resolution: finding the operator that really produces a value.

use std::collections::HashSet;

use log::debug;
use petgraph::stable_graph::NodeIndex;

use super::Lowering;
use crate::ir::{InstId, InstKind, LoopQuery, Value};

impl<L: LoopQuery> Lowering<'_, L> {
    /// Connects the producer of `value` to `destination`.
    ///
    /// Address computations and casts are looked through, a lowered select
    /// resolves to its steer pair, and an instruction without an operator of
    /// its own is skipped by wiring its operands instead. When none of that
    /// yields a producer the operand is dropped with a diagnostic.
    pub(super) fn wire_value(&mut self, value: &Value, destination: NodeIndex) {
        let mut visited = HashSet::new();
        if !self.resolve_into(value, destination, &mut visited) {
            debug!(
                "@{}: no producer for {} feeding {destination:?}",
                self.func.name,
                self.func.value_name(value)
            );
        }
    }

    fn resolve_into(
        &mut self,
        value: &Value,
        destination: NodeIndex,
        visited: &mut HashSet<InstId>,
    ) -> bool {
        let id = match value {
            Value::Function(_) => return false,
            Value::Param(_) | Value::Const(_) | Value::Global(_) => {
                let source = self.graph.get_or_create(self.func, value);
                return self.graph.add_edge(source, destination);
            }
            Value::Inst(id) => *id,
        };
        if !visited.insert(id) {
            return false;
        }

        if matches!(self.inst_kind(id), InstKind::Select { .. })
            && let Some(pair) = self.select_steers(id)
        {
            let on_true = self.graph.add_edge(pair.on_true, destination);
            let on_false = self.graph.add_edge(pair.on_false, destination);
            return on_true && on_false;
        }

        match self.inst_kind(id) {
            InstKind::GetElementPtr { base, indices, .. } => {
                let mut wired = self.resolve_into(base, destination, visited);
                for (_, index) in indices {
                    wired |= self.resolve_into(index, destination, visited);
                }
                wired
            }
            InstKind::Cast { value, .. } => self.resolve_into(value, destination, visited),
            kind => {
                if let Some(node) = self.real_node(id) {
                    return self.graph.add_edge(node, destination);
                }
                let mut wired = false;
                for operand in kind.operands() {
                    wired |= self.resolve_into(operand, destination, visited);
                }
                wired
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use petgraph::stable_graph::NodeIndex;

    use crate::graph::{DataflowGraph, OperatorKind};
    use crate::ir::{Function, LoopInfo, parse};
    use crate::lower::{LowerOptions, lower_function};

    fn lower(src: &str) -> (Function, DataflowGraph) {
        let func = parse(src).unwrap().functions.remove(0);
        let loops = LoopInfo::analyze(&func);
        let graph = lower_function(&func, &loops, &LowerOptions::default());
        (func, graph)
    }

    fn labels(graph: &DataflowGraph, nodes: &[NodeIndex]) -> Vec<String> {
        let mut found: Vec<_> = nodes
            .iter()
            .map(|&n| graph.node(n).unwrap().label.clone())
            .collect();
        found.sort();
        found
    }

    #[test]
    fn test_nested_address_computations_are_transparent() {
        let (f, graph) = lower(
            r#"
define i32 @f(ptr %base, i64 %i, i64 %j) {
entry:
  %a = getelementptr i32, ptr %base, i64 %i
  %b = getelementptr i32, ptr %a, i64 %j
  %c = getelementptr i32, ptr %b, i64 4
  %v = load i32, ptr %c
  ret i32 %v
}
"#,
        );
        for name in ["a", "b", "c"] {
            assert!(graph.find_node(&f.value_named(name).unwrap()).is_none());
        }
        let load = graph.find_node(&f.value_named("v").unwrap()).unwrap();
        assert_eq!(graph.kind(load), Some(OperatorKind::Load));
        assert_eq!(
            labels(&graph, &graph.inputs(load)),
            ["i64 %i", "i64 %j", "i64 4", "ptr %base"]
        );
    }

    #[test]
    fn test_cast_under_address_computation() {
        let (f, graph) = lower(
            r#"
define i32 @f(ptr %base, i32 %idx) {
entry:
  %wide = sext i32 %idx to i64
  %p = getelementptr i32, ptr %base, i64 %wide
  %v = load i32, ptr %p
  ret i32 %v
}
"#,
        );
        assert!(graph.find_node(&f.value_named("wide").unwrap()).is_none());
        assert!(graph.find_node(&f.value_named("p").unwrap()).is_none());
        let load = graph.find_node(&f.value_named("v").unwrap()).unwrap();
        assert_eq!(
            labels(&graph, &graph.inputs(load)),
            ["i32 %idx", "ptr %base"]
        );
    }

    #[test]
    fn test_unclassified_producer_is_skipped() {
        let (f, graph) = lower(
            r#"
define i32 @f(i32 %x) {
entry:
  %r = call i32 @opaque(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}
"#,
        );
        // The call is pruned, but its argument still reaches the add.
        assert!(graph.find_node(&f.value_named("r").unwrap()).is_none());
        assert!(graph.nodes_of_kind(OperatorKind::Unknown).is_empty());
        let add = graph.find_node(&f.value_named("s").unwrap()).unwrap();
        assert_eq!(labels(&graph, &graph.inputs(add)), ["i32 %x", "i32 1"]);
    }
}
