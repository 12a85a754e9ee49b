use std::fmt;

use crate::ir::Value;

/// Dataflow operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    /// Placeholder for an instruction whose role is not known yet.
    Unknown,
    FunctionInput,
    FunctionOutput,
    Constant,
    BasicBinaryOp,
    Load,
    Store,
    TrueSteer,
    FalseSteer,
    Merge,
    Carry,
    Invariant,
    Order,
    Stream,
}

impl OperatorKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::Unknown => "Unknown",
            OperatorKind::FunctionInput => "FunctionInput",
            OperatorKind::FunctionOutput => "FunctionOutput",
            OperatorKind::Constant => "Constant",
            OperatorKind::BasicBinaryOp => "BinOp",
            OperatorKind::Load => "Load",
            OperatorKind::Store => "Store",
            OperatorKind::TrueSteer => "TrueSteer",
            OperatorKind::FalseSteer => "FalseSteer",
            OperatorKind::Merge => "Merge",
            OperatorKind::Carry => "Carry",
            OperatorKind::Invariant => "Invariant",
            OperatorKind::Order => "Order",
            OperatorKind::Stream => "Stream",
        }
    }

    #[must_use]
    pub fn is_steer(self) -> bool {
        matches!(self, OperatorKind::TrueSteer | OperatorKind::FalseSteer)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One dataflow operator.
///
/// `origin` names the source value the node stands for, if any. Steers and
/// the entry stream are synthetic and have none.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: OperatorKind,
    pub origin: Option<Value>,
    pub label: String,
    /// Operator glyph such as `+` or `<=`; preferred over `label` when set.
    pub symbol: String,
}

impl Node {
    pub fn new(kind: OperatorKind, origin: Option<Value>, label: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            label: label.into(),
            symbol: String::new(),
        }
    }

    /// Text shown for the node: the symbol, else the label, else the kind.
    #[must_use]
    pub fn display_label(&self) -> &str {
        if !self.symbol.is_empty() {
            &self.symbol
        } else if !self.label.is_empty() {
            &self.label
        } else {
            self.kind.name()
        }
    }
}
