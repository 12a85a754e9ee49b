mod cfg;

use std::collections::HashMap;
use std::fmt::{self, Write};
use std::path::Path;

use layout::backends::svg::SVGWriter;
use layout::gv::{DotParser, GraphBuilder};
use layout::topo::layout::VisualGraph;
use petgraph::Directed;
use petgraph::dot::{Config, Dot};
use petgraph::graph::Graph as PetGraph;
use petgraph::stable_graph::NodeIndex;

pub use cfg::cfg_to_dot;

use crate::Error;
use crate::graph::{DataflowGraph, Node, OperatorKind};

pub type Flow = PetGraph<Shaped, &'static str, Directed>;

/// A node as it appears in the exported graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shaped {
    pub label: String,
    pub shape: &'static str,
}

impl Shaped {
    fn new(label: impl Into<String>, shape: &'static str) -> Self {
        Self {
            label: label.into(),
            shape,
        }
    }
}

impl fmt::Display for Shaped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn shape_of(kind: OperatorKind) -> &'static str {
    match kind {
        OperatorKind::FunctionInput
        | OperatorKind::FunctionOutput
        | OperatorKind::Load
        | OperatorKind::Store => "ellipse",
        OperatorKind::TrueSteer => "triangle",
        OperatorKind::FalseSteer => "invtriangle",
        OperatorKind::Merge => "octagon",
        OperatorKind::Stream => "circle",
        _ => "box",
    }
}

/// Unconnected nodes are hidden, except for the ones that frame the
/// function or join values.
fn is_visible(graph: &DataflowGraph, index: NodeIndex, node: &Node) -> bool {
    graph.degree(index) > 0
        || matches!(
            node.kind,
            OperatorKind::FunctionInput
                | OperatorKind::FunctionOutput
                | OperatorKind::Merge
                | OperatorKind::Carry
        )
}

/// Copies the visible part of a dataflow graph into an export graph.
#[must_use]
pub fn to_flow(graph: &DataflowGraph) -> Flow {
    let mut flow = Flow::new();
    let mut exported = HashMap::new();
    for (index, node) in graph.nodes() {
        if is_visible(graph, index, node) {
            let shaped = Shaped::new(node.display_label(), shape_of(node.kind));
            exported.insert(index, flow.add_node(shaped));
        }
    }
    for (source, destination) in graph.edges() {
        if let (Some(&s), Some(&d)) = (exported.get(&source), exported.get(&destination)) {
            flow.add_edge(s, d, "");
        }
    }
    flow
}

pub fn render_graph(graph: &Flow) -> String {
    let mut buffer = String::new();
    let _ = write!(
        &mut buffer,
        "{}",
        Dot::with_attr_getters(
            graph,
            &[Config::EdgeNoLabel],
            &|_, _| String::new(),
            &|_, (_, node)| format!("shape = {}", node.shape),
        )
    );
    buffer
}

/// DOT text for a dataflow graph.
#[must_use]
pub fn to_dot(graph: &DataflowGraph) -> String {
    render_graph(&to_flow(graph))
}

pub fn render_to_svg(dot: &str) -> Result<String, Error> {
    let mut parser = DotParser::new(dot);

    let tree = parser
        .process()
        .map_err(|e| Error::Render(format!("Unable to parse the graph: {e}")))?;
    let mut gb = GraphBuilder::new();
    gb.visit_graph(&tree);
    let mut visual_graph = gb.get();
    Ok(generate_svg(&mut visual_graph))
}

fn generate_svg(graph: &mut VisualGraph) -> String {
    let mut svg = SVGWriter::new();
    graph.do_it(false, false, false, &mut svg);
    svg.finalize()
}

pub fn render_svg_to_pdf(svg: impl AsRef<str>, output: &Path) -> Result<(), Error> {
    use svg2pdf::{ConversionOptions, PageOptions};

    let output = output.with_extension("pdf");

    let mut options = svg2pdf::usvg::Options::default();
    options.fontdb_mut().load_system_fonts();
    let tree = svg2pdf::usvg::Tree::from_str(svg.as_ref(), &options)
        .map_err(|e| Error::Render(format!("Invalid SVG: {e}")))?;

    let pdf = svg2pdf::to_pdf(&tree, ConversionOptions::default(), PageOptions::default())
        .map_err(|e| Error::Render(format!("Failed to render PDF: {e}")))?;
    std::fs::write(&output, pdf).map_err(|source| Error::Io {
        path: output,
        source,
    })
}
