//! SSA intermediate representation consumed by the lowering.
//!
//! A [`Function`] owns an arena of [`Instruction`]s and a list of blocks that
//! name the instructions they contain, in program order. Instruction ids stay
//! valid for the whole life of the function: detaching an instruction from
//! its block leaves its arena slot behind, it simply stops being visited.

mod display;
pub mod loops;
mod parser;
pub mod passes;
pub mod validate;

use std::collections::HashSet;

pub use loops::{LoopId, LoopInfo, LoopQuery};
pub use parser::parse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(usize);

impl InstId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(u32),
    Half,
    BFloat,
    Float,
    Double,
    Fp128,
    X86Fp80,
    /// Opaque pointer (`ptr`).
    Ptr,
    /// Typed pointer (`i32*`), kept for older inputs.
    Pointer(Box<Type>),
    Array(u64, Box<Type>),
    Vector(u64, Box<Type>),
}

impl Type {
    #[must_use]
    pub fn bool() -> Self {
        Type::Int(1)
    }
}

/// A literal operand. Two constants with the same type and spelling are the
/// same value, so they share one dataflow node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: Type,
    pub literal: String,
}

/// Identity of anything an instruction can consume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Param(usize),
    Inst(InstId),
    Const(Constant),
    Global(String),
    /// A function symbol. Only ever appears in callee position.
    Function(String),
}

impl Value {
    #[must_use]
    pub fn constant(ty: Type, literal: impl Into<String>) -> Self {
        Value::Const(Constant {
            ty,
            literal: literal.into(),
        })
    }

    #[must_use]
    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }
}

macro_rules! opcode_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            #[must_use]
            pub fn from_name(text: &str) -> Option<Self> {
                match text {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

opcode_enum!(
    /// Arithmetic and bitwise binary opcodes.
    BinaryOp {
        Add => "add", Sub => "sub", Mul => "mul", UDiv => "udiv", SDiv => "sdiv",
        URem => "urem", SRem => "srem", FAdd => "fadd", FSub => "fsub", FMul => "fmul",
        FDiv => "fdiv", FRem => "frem", Shl => "shl", LShr => "lshr", AShr => "ashr",
        And => "and", Or => "or", Xor => "xor",
    }
);

opcode_enum!(IntPredicate {
    Eq => "eq", Ne => "ne", Ugt => "ugt", Uge => "uge", Ult => "ult",
    Ule => "ule", Sgt => "sgt", Sge => "sge", Slt => "slt", Sle => "sle",
});

opcode_enum!(FloatPredicate {
    False => "false", Oeq => "oeq", Ogt => "ogt", Oge => "oge", Olt => "olt",
    Ole => "ole", One => "one", Ord => "ord", Ueq => "ueq", Ugt => "ugt",
    Uge => "uge", Ult => "ult", Ule => "ule", Une => "une", Uno => "uno", True => "true",
});

opcode_enum!(
    /// Widening, narrowing and bit-reinterpreting casts. All of them are
    /// transparent to the dataflow graph.
    CastOp {
        Trunc => "trunc", ZExt => "zext", SExt => "sext", FPTrunc => "fptrunc",
        FPExt => "fpext", FPToUI => "fptoui", FPToSI => "fptosi", UIToFP => "uitofp",
        SIToFP => "sitofp", PtrToInt => "ptrtoint", IntToPtr => "inttoptr",
        BitCast => "bitcast", AddrSpaceCast => "addrspacecast",
    }
);

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinaryOp,
        ty: Type,
        lhs: Value,
        rhs: Value,
    },
    ICmp {
        pred: IntPredicate,
        ty: Type,
        lhs: Value,
        rhs: Value,
    },
    FCmp {
        pred: FloatPredicate,
        ty: Type,
        lhs: Value,
        rhs: Value,
    },
    Load {
        ty: Type,
        ptr_ty: Type,
        ptr: Value,
    },
    Store {
        ty: Type,
        value: Value,
        ptr_ty: Type,
        ptr: Value,
    },
    /// Address computation: `base` plus a list of typed indices.
    GetElementPtr {
        source_ty: Type,
        ptr_ty: Type,
        base: Value,
        indices: Vec<(Type, Value)>,
    },
    Cast {
        op: CastOp,
        from: Type,
        value: Value,
        to: Type,
    },
    /// Control-join point. Each incoming value is tagged with the
    /// predecessor block it arrives from.
    Phi {
        ty: Type,
        incoming: Vec<(Value, BlockId)>,
    },
    Select {
        cond: Value,
        ty: Type,
        on_true: Value,
        on_false: Value,
    },
    Call {
        ret_ty: Type,
        callee: Value,
        args: Vec<(Type, Value)>,
    },
    Alloca {
        ty: Type,
        count: Option<(Type, Value)>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        on_true: BlockId,
        on_false: BlockId,
    },
    Ret {
        value: Option<(Type, Value)>,
    },
    Unreachable,
}

impl InstKind {
    /// Data operands in source order. The callee of a call is not an operand.
    #[must_use]
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::GetElementPtr { base, indices, .. } => std::iter::once(base)
                .chain(indices.iter().map(|(_, v)| v))
                .collect(),
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Phi { incoming, .. } => incoming.iter().map(|(v, _)| v).collect(),
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![cond, on_true, on_false],
            InstKind::Call { args, .. } => args.iter().map(|(_, v)| v).collect(),
            InstKind::Alloca { count, .. } => count.iter().map(|(_, v)| v).collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret { value } => value.iter().map(|(_, v)| v).collect(),
            InstKind::Br { .. } | InstKind::Unreachable => vec![],
        }
    }

    fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::GetElementPtr { base, indices, .. } => std::iter::once(base)
                .chain(indices.iter_mut().map(|(_, v)| v))
                .collect(),
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Phi { incoming, .. } => incoming.iter_mut().map(|(v, _)| v).collect(),
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![cond, on_true, on_false],
            InstKind::Call { args, .. } => args.iter_mut().map(|(_, v)| v).collect(),
            InstKind::Alloca { count, .. } => count.iter_mut().map(|(_, v)| v).collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret { value } => value.iter_mut().map(|(_, v)| v).collect(),
            InstKind::Br { .. } | InstKind::Unreachable => vec![],
        }
    }

    fn block_refs_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            InstKind::Br { target } => vec![target],
            InstKind::CondBr {
                on_true, on_false, ..
            } => vec![on_true, on_false],
            InstKind::Phi { incoming, .. } => incoming.iter_mut().map(|(_, b)| b).collect(),
            _ => vec![],
        }
    }

    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            _ => vec![],
        }
    }

    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Address computations and casts never become dataflow nodes; their
    /// inputs flow straight to whoever consumes them.
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        matches!(self, InstKind::GetElementPtr { .. } | InstKind::Cast { .. })
    }

    #[must_use]
    pub fn result_ty(&self) -> Type {
        match self {
            InstKind::Binary { ty, .. } | InstKind::Load { ty, .. } => ty.clone(),
            InstKind::ICmp { .. } | InstKind::FCmp { .. } => Type::bool(),
            InstKind::GetElementPtr { ptr_ty, .. } => ptr_ty.clone(),
            InstKind::Cast { to, .. } => to.clone(),
            InstKind::Phi { ty, .. } | InstKind::Select { ty, .. } => ty.clone(),
            InstKind::Call { ret_ty, .. } => ret_ty.clone(),
            InstKind::Alloca { .. } => Type::Ptr,
            InstKind::Store { .. }
            | InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Ret { .. }
            | InstKind::Unreachable => Type::Void,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub name: Option<String>,
    pub kind: InstKind,
    pub block: BlockId,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    insts: Vec<InstId>,
}

impl Block {
    #[must_use]
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<Param>,
    blocks: Vec<Block>,
    insts: Vec<Instruction>,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<String>, ret_ty: Type, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            ret_ty,
            params,
            blocks: Vec::new(),
            insts: Vec::new(),
        }
    }

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        self.blocks.push(Block {
            name: name.into(),
            insts: Vec::new(),
        });
        BlockId(self.blocks.len() - 1)
    }

    /// Appends an instruction to the end of `block`.
    pub fn push_inst(&mut self, block: BlockId, name: Option<String>, kind: InstKind) -> InstId {
        let position = self.blocks[block.0].insts.len();
        self.insert_inst(block, position, name, kind)
    }

    /// Inserts an instruction at `position` within `block`.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        position: usize,
        name: Option<String>,
        kind: InstKind,
    ) -> InstId {
        let id = InstId(self.insts.len());
        self.insts.push(Instruction { name, kind, block });
        self.blocks[block.0].insts.insert(position, id);
        id
    }

    /// Detaches an instruction from its block. Its id stays valid but the
    /// instruction is no longer part of the program.
    pub fn remove_inst(&mut self, id: InstId) {
        let block = self.insts[id.0].block;
        self.blocks[block.0].insts.retain(|&i| i != id);
    }

    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        (!self.blocks.is_empty()).then_some(BlockId(0))
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId(i), b))
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + use<> {
        (0..self.blocks.len()).map(BlockId)
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    #[must_use]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.0]
    }

    /// Every live instruction in program order.
    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter().map(|&id| (id, &self.insts[id.0])))
    }

    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.blocks[block.0].insts.last()?;
        self.insts[last.0].kind.is_terminator().then_some(last)
    }

    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.insts[t.0].kind.successors())
            .unwrap_or_default()
    }

    /// Distinct predecessors of `block`, in block order.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.block_ids()
            .filter(|&b| self.successors(b).contains(&block))
            .collect()
    }

    /// Live instructions that consume `value` as a data operand.
    #[must_use]
    pub fn users(&self, value: &Value) -> Vec<InstId> {
        self.instructions()
            .filter(|(_, inst)| inst.kind.operands().contains(&value))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn replace_all_uses(&mut self, old: &Value, new: &Value) {
        let live: Vec<InstId> = self.instructions().map(|(id, _)| id).collect();
        for id in live {
            for operand in self.insts[id.0].kind.operands_mut() {
                if operand == old {
                    *operand = new.clone();
                }
            }
        }
    }

    /// Re-points every branch target and phi edge from `old` to `new`.
    pub fn replace_block_uses(&mut self, old: BlockId, new: BlockId) {
        let live: Vec<InstId> = self.instructions().map(|(id, _)| id).collect();
        for id in live {
            for block in self.insts[id.0].kind.block_refs_mut() {
                if *block == old {
                    *block = new;
                }
            }
        }
    }

    /// Moves every instruction of `from` to the end of `into`.
    pub fn splice_block(&mut self, from: BlockId, into: BlockId) {
        let moved = std::mem::take(&mut self.blocks[from.0].insts);
        for &id in &moved {
            self.insts[id.0].block = into;
        }
        self.blocks[into.0].insts.extend(moved);
    }

    /// Removes an empty, unreferenced block and compacts the block ids that
    /// follow it.
    pub fn remove_block(&mut self, block: BlockId) {
        debug_assert!(self.blocks[block.0].insts.is_empty());
        self.blocks.remove(block.0);
        let shift = |b: &mut BlockId| {
            if b.0 > block.0 {
                b.0 -= 1;
            }
        };
        for inst in &mut self.insts {
            shift(&mut inst.block);
            for target in inst.kind.block_refs_mut() {
                shift(target);
            }
        }
    }

    #[must_use]
    pub fn find_block(&self, name: &str) -> Option<BlockId> {
        self.blocks().find(|(_, b)| b.name == name).map(|(id, _)| id)
    }

    /// Resolves a local name (without the `%` sigil) to a parameter or a
    /// live instruction result.
    #[must_use]
    pub fn value_named(&self, name: &str) -> Option<Value> {
        if let Some(index) = self.params.iter().position(|p| p.name == name) {
            return Some(Value::Param(index));
        }
        self.instructions()
            .find(|(_, inst)| inst.name.as_deref() == Some(name))
            .map(|(id, _)| Value::Inst(id))
    }

    /// A local name derived from `base` that no parameter or instruction
    /// uses yet.
    #[must_use]
    pub fn unique_name(&self, base: &str) -> String {
        let taken: HashSet<&str> = self
            .params
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.insts.iter().filter_map(|i| i.name.as_deref()))
            .collect();
        if !taken.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
