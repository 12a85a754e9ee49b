use std::fmt::{self, Display, Write};

use super::{BlockId, Function, InstId, InstKind, Module, Type, Value};

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Int(bits) => write!(f, "i{bits}"),
            Type::Half => f.write_str("half"),
            Type::BFloat => f.write_str("bfloat"),
            Type::Float => f.write_str("float"),
            Type::Double => f.write_str("double"),
            Type::Fp128 => f.write_str("fp128"),
            Type::X86Fp80 => f.write_str("x86_fp80"),
            Type::Ptr => f.write_str("ptr"),
            Type::Pointer(inner) => write!(f, "{inner}*"),
            Type::Array(len, inner) => write!(f, "[{len} x {inner}]"),
            Type::Vector(len, inner) => write!(f, "<{len} x {inner}>"),
        }
    }
}

fn symbol(sigil: char, name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || "._$-".contains(c)) {
        format!("{sigil}{name}")
    } else {
        format!("{sigil}\"{name}\"")
    }
}

fn local(name: &str) -> String {
    symbol('%', name)
}

impl Function {
    /// Textual operand form of `value`: `%x`, `@g`, or the literal.
    #[must_use]
    pub fn value_name(&self, value: &Value) -> String {
        match value {
            Value::Param(index) => self
                .params
                .get(*index)
                .map_or_else(|| format!("%arg{index}"), |p| local(&p.name)),
            Value::Inst(id) => match &self.inst(*id).name {
                Some(name) => local(name),
                None => format!("%{}", id.index()),
            },
            Value::Const(c) => c.literal.clone(),
            Value::Global(name) | Value::Function(name) => symbol('@', name),
        }
    }

    fn block_ref(&self, block: BlockId) -> String {
        local(&self.block(block).name)
    }

    /// Renders a single instruction in textual IR syntax.
    #[must_use]
    pub fn display_inst(&self, id: InstId) -> String {
        let inst = self.inst(id);
        let v = |value: &Value| self.value_name(value);
        let body = match &inst.kind {
            InstKind::Binary { op, ty, lhs, rhs } => {
                format!("{} {ty} {}, {}", op.name(), v(lhs), v(rhs))
            }
            InstKind::ICmp { pred, ty, lhs, rhs } => {
                format!("icmp {} {ty} {}, {}", pred.name(), v(lhs), v(rhs))
            }
            InstKind::FCmp { pred, ty, lhs, rhs } => {
                format!("fcmp {} {ty} {}, {}", pred.name(), v(lhs), v(rhs))
            }
            InstKind::Load { ty, ptr_ty, ptr } => format!("load {ty}, {ptr_ty} {}", v(ptr)),
            InstKind::Store {
                ty,
                value,
                ptr_ty,
                ptr,
            } => format!("store {ty} {}, {ptr_ty} {}", v(value), v(ptr)),
            InstKind::GetElementPtr {
                source_ty,
                ptr_ty,
                base,
                indices,
            } => {
                let mut text = format!("getelementptr {source_ty}, {ptr_ty} {}", v(base));
                for (ty, index) in indices {
                    let _ = write!(text, ", {ty} {}", v(index));
                }
                text
            }
            InstKind::Cast {
                op,
                from,
                value,
                to,
            } => format!("{} {from} {} to {to}", op.name(), v(value)),
            InstKind::Phi { ty, incoming } => {
                let arms = incoming
                    .iter()
                    .map(|(value, block)| format!("[ {}, {} ]", v(value), self.block_ref(*block)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("phi {ty} {arms}")
            }
            InstKind::Select {
                cond,
                ty,
                on_true,
                on_false,
            } => format!(
                "select i1 {}, {ty} {}, {ty} {}",
                v(cond),
                v(on_true),
                v(on_false)
            ),
            InstKind::Call {
                ret_ty,
                callee,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|(ty, arg)| format!("{ty} {}", v(arg)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("call {ret_ty} {}({args})", v(callee))
            }
            InstKind::Alloca { ty, count } => match count {
                Some((count_ty, count)) => format!("alloca {ty}, {count_ty} {}", v(count)),
                None => format!("alloca {ty}"),
            },
            InstKind::Br { target } => format!("br label {}", self.block_ref(*target)),
            InstKind::CondBr {
                cond,
                on_true,
                on_false,
            } => format!(
                "br i1 {}, label {}, label {}",
                v(cond),
                self.block_ref(*on_true),
                self.block_ref(*on_false)
            ),
            InstKind::Ret { value } => match value {
                Some((ty, value)) => format!("ret {ty} {}", v(value)),
                None => "ret void".to_string(),
            },
            InstKind::Unreachable => "unreachable".to_string(),
        };

        match inst.kind.result_ty() {
            Type::Void => body,
            _ => format!("{} = {body}", v(&Value::Inst(id))),
        }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.ty, local(&p.name)))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            f,
            "define {} {}({params}) {{",
            self.ret_ty,
            symbol('@', &self.name)
        )?;

        for (index, (_, block)) in self.blocks().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", &local(&block.name)[1..])?;
            for &id in block.insts() {
                writeln!(f, "  {}", self.display_inst(id))?;
            }
        }

        writeln!(f, "}}")
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, function) in self.functions.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{function}")?;
        }
        Ok(())
    }
}
