use log::info;

use crate::ir::{BlockId, Function, InstKind, Value};

/// Folds every block that is reached only through an unconditional branch
/// into its predecessor, until no such pair is left.
pub fn merge_blocks(func: &mut Function) -> bool {
    let mut changed = false;

    while let Some((block, target)) = find_candidate(func) {
        info!(
            "merging block '{}' into '{}' in @{}",
            func.block(target).name,
            func.block(block).name,
            func.name
        );

        if let Some(branch) = func.terminator(block) {
            func.remove_inst(branch);
        }
        fold_single_incoming_phis(func, target);
        func.splice_block(target, block);
        func.replace_block_uses(target, block);
        func.remove_block(target);
        changed = true;
    }

    if changed {
        info!("@{} was modified", func.name);
    }
    changed
}

/// A block ending in `br label %target` where `target` is neither the block
/// itself nor the entry, and has no other predecessor.
fn find_candidate(func: &Function) -> Option<(BlockId, BlockId)> {
    let entry = func.entry()?;
    func.block_ids().find_map(|block| {
        let terminator = func.terminator(block)?;
        let InstKind::Br { target } = &func.inst(terminator).kind else {
            return None;
        };
        let target = *target;
        (target != block && target != entry && func.predecessors(target) == [block])
            .then_some((block, target))
    })
}

/// With a single predecessor every phi in `block` has exactly one live
/// incoming value.
fn fold_single_incoming_phis(func: &mut Function, block: BlockId) {
    let phis: Vec<_> = func
        .block(block)
        .insts()
        .iter()
        .copied()
        .filter(|&id| func.inst(id).kind.is_phi())
        .collect();

    for phi in phis {
        let InstKind::Phi { incoming, .. } = &func.inst(phi).kind else {
            continue;
        };
        let Some((value, _)) = incoming.first().cloned() else {
            continue;
        };
        func.replace_all_uses(&Value::Inst(phi), &value);
        func.remove_inst(phi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{parse, validate::validate};

    fn function(src: &str) -> Function {
        parse(src).unwrap().functions.remove(0)
    }

    #[test]
    fn test_merges_straight_line_chain() {
        let mut f = function(
            r#"
define i32 @f(i32 %a) {
entry:
  br label %one
one:
  %x = add i32 %a, 1
  br label %two
two:
  %y = phi i32 [ %x, %one ]
  %z = mul i32 %y, 2
  ret i32 %z
}
"#,
        );
        assert!(merge_blocks(&mut f));
        assert_eq!(f.block_count(), 1);
        assert!(validate(&f).is_ok());

        // The folded phi is gone and %z reads %x directly.
        assert!(f.value_named("y").is_none());
        let Some(Value::Inst(z)) = f.value_named("z") else {
            panic!("missing %z");
        };
        assert_eq!(f.inst(z).kind.operands()[0], &f.value_named("x").unwrap());
    }

    #[test]
    fn test_successor_phis_are_repointed() {
        let mut f = function(
            r#"
define i32 @f(i1 %c) {
entry:
  br i1 %c, label %a, label %join
a:
  br label %b
b:
  br label %join
join:
  %p = phi i32 [ 0, %entry ], [ 1, %b ]
  ret i32 %p
}
"#,
        );
        assert!(merge_blocks(&mut f));
        assert_eq!(f.block_count(), 3);
        assert!(validate(&f).is_ok());

        let a = f.find_block("a").unwrap();
        let Some(Value::Inst(p)) = f.value_named("p") else {
            panic!("missing %p");
        };
        let InstKind::Phi { incoming, .. } = &f.inst(p).kind else {
            panic!("%p is not a phi");
        };
        assert_eq!(incoming[1].1, a);
        assert!(f.display_inst(p).contains("[ 1, %a ]"));
    }

    #[test]
    fn test_leaves_loops_and_joins_alone() {
        let mut f = function(
            r#"
define void @f(i1 %c) {
entry:
  br label %loop
loop:
  br i1 %c, label %loop, label %exit
exit:
  ret void
}
"#,
        );
        assert!(!merge_blocks(&mut f));
        assert_eq!(f.block_count(), 3);
    }
}
