use std::collections::{HashMap, HashSet};

use crate::error::{ValidationError, ValidationErrorKind};
use crate::ir::{Function, InstId, InstKind, Value};

pub type ValidationResult<T = ()> = Result<T, Vec<ValidationError>>;

/// Checks the structural properties the lowering relies on and reports every
/// violation found, not just the first.
pub fn validate(func: &Function) -> ValidationResult {
    let mut errors = vec![];

    if let Err(blocks) = check_block_structure(func) {
        errors.extend(blocks);
    }

    if let Err(phis) = check_phi_incoming(func) {
        errors.extend(phis);
    }

    if let Err(circular) = check_circular_dependencies(func) {
        errors.extend(circular);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_block_structure(func: &Function) -> ValidationResult {
    let mut errors = vec![];

    for (id, block) in func.blocks() {
        if func.terminator(id).is_none() {
            errors.push(ValidationError::new(
                ValidationErrorKind::MissingTerminator,
                format!("@{}: block '{}' does not end in a terminator", func.name, block.name),
            ));
        }

        let mut seen_non_phi = false;
        let insts = block.insts();
        for (position, &inst) in insts.iter().enumerate() {
            let kind = &func.inst(inst).kind;
            if kind.is_terminator() && position + 1 != insts.len() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::MisplacedTerminator,
                    format!(
                        "@{}: terminator '{}' in the middle of block '{}'",
                        func.name,
                        func.display_inst(inst),
                        block.name
                    ),
                ));
            }
            if kind.is_phi() && seen_non_phi {
                errors.push(ValidationError::new(
                    ValidationErrorKind::MisplacedPhi,
                    format!(
                        "@{}: phi '{}' follows a non-phi instruction in block '{}'",
                        func.name,
                        func.display_inst(inst),
                        block.name
                    ),
                ));
            }
            seen_non_phi |= !kind.is_phi();
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_phi_incoming(func: &Function) -> ValidationResult {
    let mut errors = vec![];

    for (id, inst) in func.instructions() {
        let InstKind::Phi { incoming, .. } = &inst.kind else {
            continue;
        };
        let preds = func.predecessors(inst.block);
        for (_, block) in incoming {
            if !preds.contains(block) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidIncoming,
                    format!(
                        "@{}: '{}' lists '{}' which is not a predecessor of '{}'",
                        func.name,
                        func.display_inst(id),
                        func.block(*block).name,
                        func.block(inst.block).name
                    ),
                ));
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Def-use edges between non-phi instructions. Phis legitimately close loops,
/// everything else must form a DAG.
fn collect_dependencies(func: &Function) -> HashMap<InstId, Vec<InstId>> {
    func.instructions()
        .filter(|(_, inst)| !inst.kind.is_phi())
        .map(|(id, inst)| {
            let deps = inst
                .kind
                .operands()
                .into_iter()
                .filter_map(Value::as_inst)
                .filter(|dep| !func.inst(*dep).kind.is_phi())
                .collect();
            (id, deps)
        })
        .collect()
}

fn check_circular_dependencies(func: &Function) -> ValidationResult {
    let nodes = collect_dependencies(func);
    let mut errors = vec![];
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    for (id, _) in func.instructions() {
        if nodes.contains_key(&id)
            && !visited.contains(&id)
            && let Some(cycle) = detect_cycle(id, &nodes, &mut visited, &mut rec_stack, &mut vec![])
        {
            let names: Vec<String> = cycle
                .iter()
                .map(|inst| func.value_name(&Value::Inst(*inst)))
                .collect();
            errors.push(ValidationError::new(
                ValidationErrorKind::CircularDependency,
                format!("@{}: circular dependency: {}", func.name, names.join(" -> ")),
            ));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn detect_cycle(
    node: InstId,
    nodes: &HashMap<InstId, Vec<InstId>>,
    visited: &mut HashSet<InstId>,
    rec_stack: &mut HashSet<InstId>,
    path: &mut Vec<InstId>,
) -> Option<Vec<InstId>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(deps) = nodes.get(&node) {
        for &dep in deps {
            if !visited.contains(&dep) {
                if let Some(cycle) = detect_cycle(dep, nodes, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep) {
                let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    None
}
