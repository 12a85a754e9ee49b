//! Which operator each instruction becomes.

use crate::graph::OperatorKind;
use crate::ir::passes::{LOAD_PREFIX, STORE_PREFIX};
use crate::ir::{BinaryOp, FloatPredicate, InstKind, IntPredicate, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: OperatorKind,
    pub label: &'static str,
    pub symbol: &'static str,
}

impl Classification {
    fn new(kind: OperatorKind, label: &'static str, symbol: &'static str) -> Self {
        Self {
            kind,
            label,
            symbol,
        }
    }
}

/// Classifies an instruction, or returns `None` for instructions that are
/// never materialized: address computations, casts, selects and control
/// transfers without a data payload.
///
/// Phis classify as `Merge`; whether a join is loop-carried is decided later
/// from the loop structure.
#[must_use]
pub fn classify(kind: &InstKind) -> Option<Classification> {
    let class = match kind {
        InstKind::Binary { op, .. } => {
            Classification::new(OperatorKind::BasicBinaryOp, op.name(), binary_symbol(*op))
        }
        InstKind::ICmp { pred, .. } => {
            Classification::new(OperatorKind::BasicBinaryOp, "icmp", int_symbol(*pred))
        }
        InstKind::FCmp { pred, .. } => {
            Classification::new(OperatorKind::BasicBinaryOp, "fcmp", float_symbol(*pred))
        }
        InstKind::Load { .. } => Classification::new(OperatorKind::Load, "ld", ""),
        InstKind::Store { .. } => Classification::new(OperatorKind::Store, "st", ""),
        InstKind::Phi { .. } => Classification::new(OperatorKind::Merge, "M", ""),
        InstKind::Call { callee, .. } => match callee {
            Value::Function(name) if name.starts_with(LOAD_PREFIX) => {
                Classification::new(OperatorKind::Load, "ld", "")
            }
            Value::Function(name) if name.starts_with(STORE_PREFIX) => {
                Classification::new(OperatorKind::Store, "st", "")
            }
            _ => Classification::new(OperatorKind::Unknown, "call", ""),
        },
        InstKind::Ret { value: Some(_) } => {
            Classification::new(OperatorKind::FunctionOutput, "ret", "")
        }
        InstKind::Alloca { .. } => Classification::new(OperatorKind::Unknown, "alloca", ""),
        InstKind::GetElementPtr { .. }
        | InstKind::Cast { .. }
        | InstKind::Select { .. }
        | InstKind::Br { .. }
        | InstKind::CondBr { .. }
        | InstKind::Ret { value: None }
        | InstKind::Unreachable => return None,
    };
    Some(class)
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add | BinaryOp::FAdd => "+",
        BinaryOp::Sub | BinaryOp::FSub => "-",
        BinaryOp::Mul | BinaryOp::FMul => "*",
        BinaryOp::UDiv | BinaryOp::SDiv | BinaryOp::FDiv => "/",
        BinaryOp::URem | BinaryOp::SRem | BinaryOp::FRem => "%",
        BinaryOp::Shl => "<<",
        BinaryOp::LShr | BinaryOp::AShr => ">>",
        BinaryOp::And => "&",
        BinaryOp::Or => "|",
        BinaryOp::Xor => "^",
    }
}

fn int_symbol(pred: IntPredicate) -> &'static str {
    match pred {
        IntPredicate::Eq => "==",
        IntPredicate::Ne => "!=",
        IntPredicate::Ult | IntPredicate::Slt => "<",
        IntPredicate::Ule | IntPredicate::Sle => "<=",
        IntPredicate::Ugt | IntPredicate::Sgt => ">",
        IntPredicate::Uge | IntPredicate::Sge => ">=",
    }
}

fn float_symbol(pred: FloatPredicate) -> &'static str {
    match pred {
        FloatPredicate::Oeq | FloatPredicate::Ueq => "==",
        FloatPredicate::One | FloatPredicate::Une => "!=",
        FloatPredicate::Olt | FloatPredicate::Ult => "<",
        FloatPredicate::Ole | FloatPredicate::Ule => "<=",
        FloatPredicate::Ogt | FloatPredicate::Ugt => ">",
        FloatPredicate::Oge | FloatPredicate::Uge => ">=",
        other => other.name(),
    }
}
