use std::collections::HashMap;

use pest::{Parser, iterators::Pair};
use pest_derive::Parser;

use super::{
    BinaryOp, BlockId, CastOp, FloatPredicate, Function, InstId, InstKind, IntPredicate, Module,
    Param, Type, Value,
};
use crate::Error;

#[derive(Parser)]
#[grammar = "../grammar/ir.pest"]
struct IrParser;

/// Parses a textual IR module. Top-level lines other than `define` bodies
/// (`target`, `declare`, globals, attribute groups) are skipped.
pub fn parse(input: &str) -> Result<Module, Error> {
    let module = IrParser::parse(Rule::Module, input)
        .map_err(|e| Error::Parse(format!("IR: {e}")))?
        .next()
        .ok_or_else(|| Error::Parse("IR: empty input".to_string()))?;

    let functions = module
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::Function)
        .map(parse_function)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Module { functions })
}

/// Keywords, flags and attributes carry no meaning once the enclosing rule
/// has matched.
fn is_noise(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::KwDefine
            | Rule::KwLoad
            | Rule::KwStore
            | Rule::KwGep
            | Rule::KwICmp
            | Rule::KwFCmp
            | Rule::KwPhi
            | Rule::KwSelect
            | Rule::KwCall
            | Rule::KwAlloca
            | Rule::KwBr
            | Rule::KwLabel
            | Rule::KwRet
            | Rule::KwUnreachable
            | Rule::KwTo
            | Rule::DefineAttr
            | Rule::FnAttr
            | Rule::ParamAttr
            | Rule::Flag
            | Rule::AlignTrailer
            | Rule::MetadataTrailer
    )
}

/// Cursor over the meaningful children of a pair.
struct Fields<'i> {
    pairs: Vec<Pair<'i, Rule>>,
    cursor: usize,
}

impl<'i> Fields<'i> {
    fn new(pair: Pair<'i, Rule>) -> Self {
        Self {
            pairs: pair.into_inner().filter(|p| !is_noise(p.as_rule())).collect(),
            cursor: 0,
        }
    }

    fn next(&mut self, rule: Rule) -> Option<Pair<'i, Rule>> {
        let pair = self.pairs.get(self.cursor)?;
        if pair.as_rule() != rule {
            return None;
        }
        self.cursor += 1;
        Some(pair.clone())
    }

    fn next_is(&self, rule: Rule) -> bool {
        self.pairs
            .get(self.cursor)
            .is_some_and(|p| p.as_rule() == rule)
    }

    fn expect(&mut self, rule: Rule) -> Result<Pair<'i, Rule>, Error> {
        self.next(rule).ok_or_else(|| {
            let found = self
                .pairs
                .get(self.cursor)
                .map_or_else(|| "end of input".to_string(), |p| format!("{:?}", p.as_rule()));
            Error::Parse(format!("IR: expected {rule:?}, found {found}"))
        })
    }

    fn rest(&mut self, rule: Rule) -> Vec<Pair<'i, Rule>> {
        let mut out = vec![];
        while let Some(pair) = self.next(rule) {
            out.push(pair);
        }
        out
    }
}

/// Text of a `Local`, `Global` or `LabelDef` without sigils or quotes.
fn ident(pair: Pair<'_, Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|inner| inner.as_str().trim_matches('"').to_string())
        .unwrap_or_default()
}

fn parse_type(pair: Pair<'_, Rule>) -> Result<Type, Error> {
    let mut inner = pair.into_inner();
    let base = inner
        .next()
        .ok_or_else(|| Error::Parse("IR: empty type".to_string()))?;
    let text = base.as_str();

    let mut ty = match base.as_rule() {
        Rule::IntTy => Type::Int(
            text[1..]
                .parse()
                .map_err(|_| Error::Parse(format!("IR: bad integer type {text}")))?,
        ),
        Rule::FloatTy => match text {
            "half" => Type::Half,
            "bfloat" => Type::BFloat,
            "float" => Type::Float,
            "double" => Type::Double,
            "fp128" => Type::Fp128,
            _ => Type::X86Fp80,
        },
        Rule::PtrTy => Type::Ptr,
        Rule::VoidTy => Type::Void,
        rule @ (Rule::ArrayTy | Rule::VectorTy) => {
            let mut fields = Fields::new(base);
            let len_text = fields.expect(Rule::IntLit)?.as_str();
            let len = len_text
                .parse()
                .map_err(|_| Error::Parse(format!("IR: bad aggregate length {len_text}")))?;
            let elem = Box::new(parse_type(fields.expect(Rule::Ty)?)?);
            if rule == Rule::ArrayTy {
                Type::Array(len, elem)
            } else {
                Type::Vector(len, elem)
            }
        }
        rule => return Err(Error::Parse(format!("IR: unexpected {rule:?} in type"))),
    };

    for _ in inner.filter(|p| p.as_rule() == Rule::PtrSuffix) {
        ty = Type::Pointer(Box::new(ty));
    }
    Ok(ty)
}

/// Names visible inside one function body.
struct Scope {
    function: String,
    params: HashMap<String, usize>,
    insts: HashMap<String, InstId>,
    blocks: HashMap<String, BlockId>,
}

impl Scope {
    fn local(&self, pair: Pair<'_, Rule>) -> Result<Value, Error> {
        let name = ident(pair);
        if let Some(&index) = self.params.get(&name) {
            return Ok(Value::Param(index));
        }
        self.insts
            .get(&name)
            .map(|&id| Value::Inst(id))
            .ok_or_else(|| Error::Parse(format!("IR: unknown value %{name} in @{}", self.function)))
    }

    fn block(&self, pair: Pair<'_, Rule>) -> Result<BlockId, Error> {
        let name = ident(pair);
        self.blocks
            .get(&name)
            .copied()
            .ok_or_else(|| Error::Parse(format!("IR: unknown label %{name} in @{}", self.function)))
    }

    fn value(&self, pair: Pair<'_, Rule>, ty: &Type) -> Result<Value, Error> {
        let inner = pair
            .into_inner()
            .next()
            .ok_or_else(|| Error::Parse("IR: empty operand".to_string()))?;
        match inner.as_rule() {
            Rule::Local => self.local(inner),
            Rule::Global => Ok(Value::Global(ident(inner))),
            _ => Ok(Value::constant(ty.clone(), inner.as_str())),
        }
    }

    fn typed_value(&self, fields: &mut Fields<'_>) -> Result<(Type, Value), Error> {
        let ty = parse_type(fields.expect(Rule::Ty)?)?;
        let value = self.value(fields.expect(Rule::Value)?, &ty)?;
        Ok((ty, value))
    }

    fn define(&mut self, name: String, id: InstId) -> Result<(), Error> {
        if self.params.contains_key(&name) || self.insts.insert(name.clone(), id).is_some() {
            return Err(Error::Parse(format!(
                "IR: duplicate definition of %{name} in @{}",
                self.function
            )));
        }
        Ok(())
    }
}

fn parse_function(pair: Pair<'_, Rule>) -> Result<Function, Error> {
    let mut fields = Fields::new(pair);
    let ret_ty = parse_type(fields.expect(Rule::Ty)?)?;
    let name = ident(fields.expect(Rule::Global)?);

    // Unnamed parameters and an unlabelled entry block share one counter.
    let mut unnamed = 0usize;
    let mut params = vec![];
    if let Some(list) = fields.next(Rule::Params) {
        for param in list.into_inner() {
            let mut param_fields = Fields::new(param);
            let ty = parse_type(param_fields.expect(Rule::Ty)?)?;
            let name = match param_fields.next(Rule::Local) {
                Some(local) => {
                    let name = ident(local);
                    if let Ok(n) = name.parse::<usize>() {
                        unnamed = n + 1;
                    }
                    name
                }
                None => {
                    unnamed += 1;
                    (unnamed - 1).to_string()
                }
            };
            params.push(Param { name, ty });
        }
    }

    let mut scope = Scope {
        function: name.clone(),
        params: params
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect(),
        insts: HashMap::new(),
        blocks: HashMap::new(),
    };
    let mut function = Function::new(name, ret_ty, params);

    // First pass: block labels and result names, so that phis and branches
    // may refer forward.
    let mut bodies = vec![];
    let mut next_inst = 0usize;
    for block in fields.rest(Rule::Block) {
        let mut block_fields = Fields::new(block);
        let label = match block_fields.next(Rule::LabelDef) {
            Some(label) => ident(label),
            None => {
                unnamed += 1;
                (unnamed - 1).to_string()
            }
        };
        let id = function.add_block(label.clone());
        if scope.blocks.insert(label.clone(), id).is_some() {
            return Err(Error::Parse(format!(
                "IR: duplicate label %{label} in @{}",
                scope.function
            )));
        }

        let insts = block_fields.rest(Rule::Instruction);
        for inst in &insts {
            if let Some(first) = inst.clone().into_inner().next()
                && first.as_rule() == Rule::Local
            {
                scope.define(ident(first), InstId(next_inst))?;
            }
            next_inst += 1;
        }
        bodies.push((id, insts));
    }

    // Second pass: operands.
    for (block, insts) in bodies {
        for inst in insts {
            let (name, kind) = parse_instruction(inst, &scope)?;
            function.push_inst(block, name, kind);
        }
    }

    Ok(function)
}

fn parse_instruction(
    pair: Pair<'_, Rule>,
    scope: &Scope,
) -> Result<(Option<String>, InstKind), Error> {
    let mut parts = pair.into_inner().filter(|p| !is_noise(p.as_rule()));
    let mut body = parts
        .next()
        .ok_or_else(|| Error::Parse("IR: empty instruction".to_string()))?;
    let mut name = None;
    if body.as_rule() == Rule::Local {
        name = Some(ident(body));
        body = parts
            .next()
            .ok_or_else(|| Error::Parse("IR: missing instruction body".to_string()))?;
    }

    let rule = body.as_rule();
    let text = body.as_str().to_string();
    let mut f = Fields::new(body);
    let unknown = |what: &str, op: &str| Error::Parse(format!("IR: unknown {what} '{op}'"));

    let kind = match rule {
        Rule::Binary => {
            let op_text = f.expect(Rule::BinOp)?.as_str();
            let op = BinaryOp::from_name(op_text).ok_or_else(|| unknown("opcode", op_text))?;
            let (ty, lhs) = scope.typed_value(&mut f)?;
            let rhs = scope.value(f.expect(Rule::Value)?, &ty)?;
            InstKind::Binary { op, ty, lhs, rhs }
        }
        Rule::ICmp => {
            let pred_text = f.expect(Rule::IntPred)?.as_str();
            let pred =
                IntPredicate::from_name(pred_text).ok_or_else(|| unknown("predicate", pred_text))?;
            let (ty, lhs) = scope.typed_value(&mut f)?;
            let rhs = scope.value(f.expect(Rule::Value)?, &ty)?;
            InstKind::ICmp { pred, ty, lhs, rhs }
        }
        Rule::FCmp => {
            let pred_text = f.expect(Rule::FloatPred)?.as_str();
            let pred = FloatPredicate::from_name(pred_text)
                .ok_or_else(|| unknown("predicate", pred_text))?;
            let (ty, lhs) = scope.typed_value(&mut f)?;
            let rhs = scope.value(f.expect(Rule::Value)?, &ty)?;
            InstKind::FCmp { pred, ty, lhs, rhs }
        }
        Rule::Load => {
            let ty = parse_type(f.expect(Rule::Ty)?)?;
            let (ptr_ty, ptr) = scope.typed_value(&mut f)?;
            InstKind::Load { ty, ptr_ty, ptr }
        }
        Rule::Store => {
            let (ty, value) = scope.typed_value(&mut f)?;
            let (ptr_ty, ptr) = scope.typed_value(&mut f)?;
            InstKind::Store {
                ty,
                value,
                ptr_ty,
                ptr,
            }
        }
        Rule::Gep => {
            let source_ty = parse_type(f.expect(Rule::Ty)?)?;
            let (ptr_ty, base) = scope.typed_value(&mut f)?;
            let mut indices = vec![];
            while f.next_is(Rule::Ty) {
                indices.push(scope.typed_value(&mut f)?);
            }
            InstKind::GetElementPtr {
                source_ty,
                ptr_ty,
                base,
                indices,
            }
        }
        Rule::Cast => {
            let op_text = f.expect(Rule::CastOp)?.as_str();
            let op = CastOp::from_name(op_text).ok_or_else(|| unknown("cast", op_text))?;
            let (from, value) = scope.typed_value(&mut f)?;
            let to = parse_type(f.expect(Rule::Ty)?)?;
            InstKind::Cast {
                op,
                from,
                value,
                to,
            }
        }
        Rule::Phi => {
            let ty = parse_type(f.expect(Rule::Ty)?)?;
            let mut incoming = vec![];
            for arm in f.rest(Rule::Incoming) {
                let mut arm_fields = Fields::new(arm);
                let value = scope.value(arm_fields.expect(Rule::Value)?, &ty)?;
                let block = scope.block(arm_fields.expect(Rule::Local)?)?;
                incoming.push((value, block));
            }
            InstKind::Phi { ty, incoming }
        }
        Rule::Select => {
            let (_, cond) = scope.typed_value(&mut f)?;
            let (ty, on_true) = scope.typed_value(&mut f)?;
            let (_, on_false) = scope.typed_value(&mut f)?;
            InstKind::Select {
                cond,
                ty,
                on_true,
                on_false,
            }
        }
        Rule::Call => {
            let ret_ty = parse_type(f.expect(Rule::Ty)?)?;
            let callee = match f.next(Rule::Global) {
                Some(global) => Value::Function(ident(global)),
                None => scope.local(f.expect(Rule::Local)?)?,
            };
            let mut args = vec![];
            if let Some(list) = f.next(Rule::CallArgs) {
                for arg in list.into_inner() {
                    args.push(scope.typed_value(&mut Fields::new(arg))?);
                }
            }
            InstKind::Call {
                ret_ty,
                callee,
                args,
            }
        }
        Rule::Alloca => {
            let ty = parse_type(f.expect(Rule::Ty)?)?;
            let count = if f.next_is(Rule::Ty) {
                Some(scope.typed_value(&mut f)?)
            } else {
                None
            };
            InstKind::Alloca { ty, count }
        }
        Rule::Br => InstKind::Br {
            target: scope.block(f.expect(Rule::Local)?)?,
        },
        Rule::CondBr => {
            let (_, cond) = scope.typed_value(&mut f)?;
            let on_true = scope.block(f.expect(Rule::Local)?)?;
            let on_false = scope.block(f.expect(Rule::Local)?)?;
            InstKind::CondBr {
                cond,
                on_true,
                on_false,
            }
        }
        Rule::RetVoid => InstKind::Ret { value: None },
        Rule::Ret => InstKind::Ret {
            value: Some(scope.typed_value(&mut f)?),
        },
        Rule::Unreachable => InstKind::Unreachable,
        _ => return Err(Error::Parse(format!("IR: unsupported instruction '{text}'"))),
    };

    Ok((name, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOP: &str = r#"
; ModuleID = 'sum.c'
target triple = "x86_64-unknown-linux-gnu"

declare i32 @printf(ptr, ...)

define dso_local i32 @sum(ptr noundef %a, i32 noundef %n) #0 {
entry:
  %cmp0 = icmp sgt i32 %n, 0
  br i1 %cmp0, label %loop, label %exit

loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %acc = phi i32 [ 0, %entry ], [ %acc.next, %loop ]
  %idx = sext i32 %i to i64
  %p = getelementptr inbounds i32, ptr %a, i64 %idx
  %v = load i32, ptr %p, align 4
  %acc.next = add nsw i32 %acc, %v
  %i.next = add nuw nsw i32 %i, 1
  %c = icmp slt i32 %i.next, %n
  br i1 %c, label %loop, label %exit, !llvm.loop !5

exit:
  %r = phi i32 [ 0, %entry ], [ %acc.next, %loop ]
  ret i32 %r
}

attributes #0 = { nounwind }
"#;

    #[test]
    fn test_parse_loop_function() {
        let module = parse(LOOP).unwrap();
        assert_eq!(module.functions.len(), 1);

        let f = module.function("sum").unwrap();
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.block_count(), 3);

        let looped = f.find_block("loop").unwrap();
        let entry = f.entry().unwrap();
        assert_eq!(f.predecessors(looped), vec![entry, looped]);
        assert_eq!(f.instructions().count(), 13);

        // Forward reference through the phi resolves to the later add.
        let Some(Value::Inst(i)) = f.value_named("i") else {
            panic!("missing %i");
        };
        let InstKind::Phi { incoming, .. } = &f.inst(i).kind else {
            panic!("%i is not a phi");
        };
        assert_eq!(incoming[1].0, f.value_named("i.next").unwrap());
        assert_eq!(incoming[1].1, looped);
    }

    #[test]
    fn test_constants_are_uniqued() {
        let f = parse(LOOP).unwrap().functions.remove(0);
        let Some(Value::Inst(i)) = f.value_named("i") else {
            panic!("missing %i");
        };
        let Some(Value::Inst(acc)) = f.value_named("acc") else {
            panic!("missing %acc");
        };
        assert_eq!(
            f.inst(i).kind.operands()[0],
            f.inst(acc).kind.operands()[0]
        );
    }

    #[test]
    fn test_unlabelled_entry_is_numbered() {
        let src = "define i32 @f(i32 %0) {\n  %2 = add i32 %0, 1\n  br label %3\n3:\n  ret i32 %2\n}\n";
        let f = parse(src).unwrap().functions.remove(0);
        assert_eq!(f.block(BlockId::new(0)).name, "1");
        assert_eq!(f.block(BlockId::new(1)).name, "3");
    }

    #[test]
    fn test_unknown_value_is_reported() {
        let src = "define void @f() {\nentry:\n  %x = add i32 %y, 1\n  ret void\n}\n";
        let err = parse(src).unwrap_err();
        assert!(matches!(err, Error::Parse(msg) if msg.contains("%y")));
    }

    #[test]
    fn test_duplicate_definition_is_reported() {
        let src = "define void @f(i32 %x) {\nentry:\n  %x = add i32 1, 1\n  ret void\n}\n";
        assert!(matches!(parse(src), Err(Error::Parse(_))));
    }

    #[test]
    fn test_printed_ir_parses_again() {
        let module = parse(LOOP).unwrap();
        let printed = module.to_string();
        let reparsed = parse(&printed).unwrap();
        assert_eq!(reparsed.to_string(), printed);
    }

    #[test]
    fn test_call_and_select() {
        let src = r#"
define float @g(i1 %c, float %x) {
entry:
  %t = tail call float @llvm.fabs.f32(float %x) #3
  %s = select i1 %c, float %t, float 0.000000e+00
  call void @sink(float %s)
  ret float %s
}
"#;
        let f = parse(src).unwrap().functions.remove(0);
        let Some(Value::Inst(t)) = f.value_named("t") else {
            panic!("missing %t");
        };
        let InstKind::Call { callee, args, .. } = &f.inst(t).kind else {
            panic!("%t is not a call");
        };
        assert_eq!(callee, &Value::Function("llvm.fabs.f32".to_string()));
        assert_eq!(args.len(), 1);
        assert_eq!(f.inst(t).kind.operands(), vec![&Value::Param(1)]);
    }
}
