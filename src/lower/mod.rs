//! Control-flow to dataflow lowering.
//!
//! [`lower_function`] walks a function through a fixed sequence of
//! [`Stage`]s, each one a total pass over the graph built so far. Later
//! stages depend on earlier ones: join points are routed through the steer
//! pairs that branch lowering registered.

mod classify;
mod join;
mod resolve;
mod steer;

use std::fmt;

use log::debug;
use petgraph::stable_graph::NodeIndex;

pub use classify::{Classification, classify};
pub use steer::{SteerPair, SteerRegistry};

use crate::graph::{DataflowGraph, OperatorKind};
use crate::ir::{Function, InstId, InstKind, LoopQuery, Value};

/// Knobs for [`lower_function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowerOptions {
    /// Create one `Stream` node per function and feed it to every branch
    /// steer pair.
    pub entry_stream: bool,
    /// Wire the last store to every later load, in program order. This
    /// ignores aliasing entirely.
    pub memory_dependencies: bool,
    /// Route a join input arriving over an unconditional branch through the
    /// steer of the conditional branch that controls it, found by walking
    /// single-predecessor chains upwards.
    pub trace_controlling_branch: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            entry_stream: true,
            memory_dependencies: false,
            trace_controlling_branch: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ClassifyNodes,
    LowerBranchesAndSelects,
    WireArgumentsAndConstants,
    WireDataDependencies,
    WireJoinPoints,
    WireMemoryHeuristic,
    Done,
}

impl Stage {
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::ClassifyNodes => Some(Stage::LowerBranchesAndSelects),
            Stage::LowerBranchesAndSelects => Some(Stage::WireArgumentsAndConstants),
            Stage::WireArgumentsAndConstants => Some(Stage::WireDataDependencies),
            Stage::WireDataDependencies => Some(Stage::WireJoinPoints),
            Stage::WireJoinPoints => Some(Stage::WireMemoryHeuristic),
            Stage::WireMemoryHeuristic => Some(Stage::Done),
            Stage::Done => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ClassifyNodes => "CLASSIFY_NODES",
            Stage::LowerBranchesAndSelects => "LOWER_BRANCHES_AND_SELECTS",
            Stage::WireArgumentsAndConstants => "WIRE_ARGUMENTS_AND_CONSTANTS",
            Stage::WireDataDependencies => "WIRE_DATA_DEPENDENCIES_AND_SPECIAL_OPS",
            Stage::WireJoinPoints => "WIRE_JOIN_POINTS",
            Stage::WireMemoryHeuristic => "WIRE_MEMORY_HEURISTIC",
            Stage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Lowers one function body into a fresh dataflow graph.
///
/// Pure in its inputs: nothing is shared between calls, so functions can be
/// lowered independently.
pub fn lower_function<L: LoopQuery>(
    func: &Function,
    loops: &L,
    options: &LowerOptions,
) -> DataflowGraph {
    let mut lowering = Lowering::new(func, loops, options);
    let mut stage = Some(Stage::ClassifyNodes);
    while let Some(current) = stage {
        debug!("@{}: {current}", func.name);
        lowering.run(current);
        stage = current.next();
    }
    debug!(
        "@{}: {} nodes, {} edges",
        func.name,
        lowering.graph.node_count(),
        lowering.graph.edge_count()
    );
    lowering.graph
}

/// Per-function lowering state.
struct Lowering<'f, L> {
    func: &'f Function,
    loops: &'f L,
    options: &'f LowerOptions,
    graph: DataflowGraph,
    steers: SteerRegistry,
    entry_stream: Option<NodeIndex>,
}

impl<'f, L: LoopQuery> Lowering<'f, L> {
    fn new(func: &'f Function, loops: &'f L, options: &'f LowerOptions) -> Self {
        Self {
            func,
            loops,
            options,
            graph: DataflowGraph::new(),
            steers: SteerRegistry::default(),
            entry_stream: None,
        }
    }

    fn run(&mut self, stage: Stage) {
        match stage {
            Stage::ClassifyNodes => self.classify_nodes(),
            Stage::LowerBranchesAndSelects => {
                self.lower_branches();
                self.lower_selects();
            }
            Stage::WireArgumentsAndConstants => self.wire_arguments_and_constants(),
            Stage::WireDataDependencies => self.wire_data_dependencies(),
            Stage::WireJoinPoints => self.wire_join_points(),
            Stage::WireMemoryHeuristic => {
                if self.options.memory_dependencies {
                    self.wire_memory_heuristic();
                }
            }
            Stage::Done => self.prune_unknown(),
        }
    }

    fn classify_nodes(&mut self) {
        let func = self.func;
        for (id, inst) in func.instructions() {
            let Some(class) = classify(&inst.kind) else {
                continue;
            };
            let Some(index) = self.graph.get_or_create(func, &Value::Inst(id)) else {
                continue;
            };
            if let Some(node) = self.graph.node_mut(index) {
                if class.kind != OperatorKind::Unknown {
                    node.kind = class.kind;
                }
                node.label = class.label.to_string();
                node.symbol = class.symbol.to_string();
            }
        }
    }

    /// Node of a materialized, classified instruction.
    fn real_node(&self, id: InstId) -> Option<NodeIndex> {
        let index = self.graph.find_node(&Value::Inst(id))?;
        (self.graph.kind(index)? != OperatorKind::Unknown).then_some(index)
    }

    /// Instructions whose operands are wired straight into their own node.
    /// Phis are left to join-point lowering.
    fn operand_sinks(&self) -> Vec<(InstId, NodeIndex)> {
        self.func
            .instructions()
            .filter(|(_, inst)| !inst.kind.is_phi())
            .filter_map(|(id, _)| self.real_node(id).map(|node| (id, node)))
            .collect()
    }

    fn wire_arguments_and_constants(&mut self) {
        let func = self.func;
        for index in 0..func.params.len() {
            self.graph.get_or_create(func, &Value::Param(index));
        }
        for (_, inst) in func.instructions() {
            for operand in inst.kind.operands() {
                if is_leaf(operand) {
                    self.graph.get_or_create(func, operand);
                }
            }
        }

        for (id, sink) in self.operand_sinks() {
            for operand in func.inst(id).kind.operands() {
                if is_leaf(operand) {
                    let source = self.graph.find_node(operand);
                    self.graph.add_edge(source, sink);
                }
            }
        }
    }

    fn wire_data_dependencies(&mut self) {
        let func = self.func;
        for (id, sink) in self.operand_sinks() {
            for operand in func.inst(id).kind.operands() {
                if matches!(operand, Value::Inst(_)) {
                    self.wire_value(operand, sink);
                }
            }
        }
    }

    /// Every load depends on the most recent store before it in program
    /// order, regardless of address.
    fn wire_memory_heuristic(&mut self) {
        let mut last_store = None;
        for (id, _) in self.func.instructions() {
            let Some(node) = self.real_node(id) else {
                continue;
            };
            match self.graph.kind(node) {
                Some(OperatorKind::Store) => last_store = Some(node),
                Some(OperatorKind::Load) => {
                    if let Some(store) = last_store {
                        self.graph.add_edge(store, node);
                    }
                }
                _ => {}
            }
        }
    }

    /// Drops placeholders that never got a role. Their consumers were wired
    /// past them by the resolver.
    fn prune_unknown(&mut self) {
        let unknown = self.graph.nodes_of_kind(OperatorKind::Unknown);
        for node in &unknown {
            self.graph.remove_node(*node);
        }
        if !unknown.is_empty() {
            debug!("@{}: pruned {} unclassified nodes", self.func.name, unknown.len());
        }
    }

    fn inst_kind(&self, id: InstId) -> &'f InstKind {
        &self.func.inst(id).kind
    }
}

fn is_leaf(value: &Value) -> bool {
    matches!(value, Value::Param(_) | Value::Const(_) | Value::Global(_))
}
