use petgraph::graph::NodeIndex;

use super::{Flow, Shaped, render_graph};
use crate::ir::Function;

/// DOT text for the control-flow graph of `func`: one box per block listing
/// its instructions, one edge per successor.
#[must_use]
pub fn cfg_to_dot(func: &Function) -> String {
    let mut flow = Flow::new();
    for (_, block) in func.blocks() {
        let mut text = format!("{}:\n", block.name);
        for &id in block.insts() {
            text.push_str("  ");
            text.push_str(&func.display_inst(id));
            text.push('\n');
        }
        flow.add_node(Shaped::new(text, "box"));
    }
    for block in func.block_ids() {
        for succ in func.successors(block) {
            flow.update_edge(
                NodeIndex::new(block.index()),
                NodeIndex::new(succ.index()),
                "",
            );
        }
    }
    render_graph(&flow)
}
