//! Load/store ordering through explicit tokens.
//!
//! Every load becomes `call @lso.load.<ty>(ptr, token)` and every store
//! becomes `%tok = call i1 @lso.store.<ty>(ptr, value)`. A load fires on the
//! last token produced before it; each store produces a fresh one. The entry
//! block starts from the constant `i1 true`, every other block from a phi
//! over the last token of each predecessor.

use std::collections::HashMap;

use log::info;

use crate::ir::{BlockId, Function, InstId, InstKind, Type, Value};

pub const LOAD_PREFIX: &str = "lso.load";
pub const STORE_PREFIX: &str = "lso.store";

pub fn enforce_memory_order(func: &mut Function) -> bool {
    let Some(entry) = func.entry() else {
        return false;
    };
    let token_ty = Type::bool();
    let entry_token = Value::constant(token_ty.clone(), "true");

    let mut token_phis: Vec<(BlockId, InstId)> = vec![];
    for block in func.block_ids() {
        if block == entry || func.predecessors(block).is_empty() {
            continue;
        }
        let name = func.unique_name("lso.token.phi");
        let phi = func.insert_inst(
            block,
            0,
            Some(name),
            InstKind::Phi {
                ty: token_ty.clone(),
                incoming: vec![],
            },
        );
        token_phis.push((block, phi));
    }
    let phi_of: HashMap<BlockId, InstId> = token_phis.iter().copied().collect();

    let mut rewritten = 0usize;
    let mut last_token: HashMap<BlockId, Value> = HashMap::new();
    for block in func.block_ids() {
        let mut token = phi_of
            .get(&block)
            .map_or_else(|| entry_token.clone(), |&phi| Value::Inst(phi));

        let memory: Vec<InstId> = func
            .block(block)
            .insts()
            .iter()
            .copied()
            .filter(|&id| {
                matches!(
                    func.inst(id).kind,
                    InstKind::Load { .. } | InstKind::Store { .. }
                )
            })
            .collect();

        for id in memory {
            match func.inst(id).kind.clone() {
                InstKind::Load { ty, ptr_ty, ptr } => {
                    func.inst_mut(id).kind = InstKind::Call {
                        callee: Value::Function(format!("{LOAD_PREFIX}.{ty}")),
                        ret_ty: ty,
                        args: vec![(ptr_ty, ptr), (token_ty.clone(), token.clone())],
                    };
                }
                InstKind::Store {
                    ty,
                    value,
                    ptr_ty,
                    ptr,
                } => {
                    let name = func.unique_name("lso.tok");
                    let inst = func.inst_mut(id);
                    inst.name = Some(name);
                    inst.kind = InstKind::Call {
                        ret_ty: token_ty.clone(),
                        callee: Value::Function(format!("{STORE_PREFIX}.{ty}")),
                        args: vec![(ptr_ty, ptr), (ty, value)],
                    };
                    token = Value::Inst(id);
                }
                _ => continue,
            }
            rewritten += 1;
        }

        last_token.insert(block, token);
    }

    for (block, phi) in token_phis {
        let incoming = func
            .predecessors(block)
            .into_iter()
            .map(|pred| {
                let token = last_token
                    .get(&pred)
                    .cloned()
                    .unwrap_or_else(|| entry_token.clone());
                (token, pred)
            })
            .collect();
        if let InstKind::Phi { incoming: slot, .. } = &mut func.inst_mut(phi).kind {
            *slot = incoming;
        }
    }

    if rewritten > 0 {
        info!(
            "threaded memory tokens through {rewritten} loads/stores in @{}",
            func.name
        );
    }
    rewritten > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{parse, validate::validate};

    const COPY: &str = r#"
define void @copy(ptr %dst, ptr %src, i32 %n) {
entry:
  store i32 0, ptr %dst, align 4
  br label %loop

loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %v = load i32, ptr %src, align 4
  store i32 %v, ptr %dst, align 4
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %n
  br i1 %c, label %loop, label %exit

exit:
  ret void
}
"#;

    #[test]
    fn test_rewrites_loads_and_stores() {
        let mut f = parse(COPY).unwrap().functions.remove(0);
        assert!(enforce_memory_order(&mut f));
        assert!(validate(&f).is_ok());

        let text = f.to_string();
        assert!(!text.contains(" load "));
        assert!(!text.contains("store i32"));
        assert!(text.contains("%lso.tok = call i1 @lso.store.i32(ptr %dst, i32 0)"));
        assert!(text.contains("%v = call i32 @lso.load.i32(ptr %src, i1 %lso.token.phi)"));
    }

    #[test]
    fn test_token_phis_merge_predecessor_tokens() {
        let mut f = parse(COPY).unwrap().functions.remove(0);
        enforce_memory_order(&mut f);

        let text = f.to_string();
        // Loop header: the entry store's token, then the loop's own store.
        assert!(text.contains(
            "%lso.token.phi = phi i1 [ %lso.tok, %entry ], [ %lso.tok1, %loop ]"
        ));
        // Exit only passes the loop's last token along.
        assert!(text.contains("%lso.token.phi1 = phi i1 [ %lso.tok1, %loop ]"));
    }

    #[test]
    fn test_without_memory_nothing_changes() {
        let src = "define i32 @f(i32 %a) {\nentry:\n  %x = add i32 %a, 1\n  ret i32 %x\n}\n";
        let mut f = parse(src).unwrap().functions.remove(0);
        assert!(!enforce_memory_order(&mut f));
    }
}
