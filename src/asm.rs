use std::fmt::Display;

use crate::{
    common::{InstrId, Label, RegClass, VReg},
    frame::PhyReg,
};

/// RV64 opcodes the backend emits. Mnemonics follow the assembler syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Mv,
    #[strum(serialize = "fmv.s")]
    FmvS,
    Li,
    La,
    Add,
    Addw,
    Addi,
    Sub,
    Mul,
    Div,
    #[strum(serialize = "fadd.s")]
    FaddS,
    #[strum(serialize = "fsub.s")]
    FsubS,
    #[strum(serialize = "fmul.s")]
    FmulS,
    #[strum(serialize = "fdiv.s")]
    FdivS,
    Slt,
    Ld,
    Lw,
    Flw,
    Sd,
    Sw,
    Fsw,
    Beq,
    Bne,
    Blt,
    Bge,
    J,
    Call,
    Ret,
}

/// The categories the allocator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeKind {
    Ordinary,
    /// Register-to-register copy within one class; coalescing candidate.
    Move,
    Call,
    Ret,
}

impl Opcode {
    pub fn kind(self) -> OpcodeKind {
        match self {
            Opcode::Mv | Opcode::FmvS => OpcodeKind::Move,
            Opcode::Call => OpcodeKind::Call,
            Opcode::Ret => OpcodeKind::Ret,
            _ => OpcodeKind::Ordinary,
        }
    }

    /// Spill stores and reloads are never inserted around these.
    pub fn is_boundary(self) -> bool {
        matches!(self.kind(), OpcodeKind::Call | OpcodeKind::Ret)
    }
}

/// An interference-graph node: either a free virtual register or a
/// precoloured physical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    Virtual(VReg),
    Physical(PhyReg),
}

impl Reg {
    pub fn class(self) -> RegClass {
        match self {
            Reg::Virtual(v) => v.class(),
            Reg::Physical(p) => p.class(),
        }
    }

    pub fn is_virtual(self) -> bool {
        matches!(self, Reg::Virtual(_))
    }

    pub fn is_physical(self) -> bool {
        matches!(self, Reg::Physical(_))
    }

    pub fn as_virtual(self) -> Option<VReg> {
        match self {
            Reg::Virtual(v) => Some(v),
            Reg::Physical(_) => None,
        }
    }
}

impl Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reg::Virtual(v) => v.fmt(f),
            Reg::Physical(p) => p.fmt(f),
        }
    }
}

impl From<VReg> for Reg {
    fn from(v: VReg) -> Self {
        Reg::Virtual(v)
    }
}

impl From<PhyReg> for Reg {
    fn from(p: PhyReg) -> Self {
        Reg::Physical(p)
    }
}

/// A base-plus-offset stack location. The base stays virtual until the
/// allocator has coloured it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackOperand {
    pub base: Reg,
    pub offset: i32,
}

impl Display for StackOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.offset, self.base)
    }
}

/// A symbol reference, optionally relative to a register that may itself
/// still be virtual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrOperand {
    pub symbol: String,
    pub base: Option<Reg>,
}

impl Display for AddrOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.base {
            Some(base) => write!(f, "{}({})", self.symbol, base),
            None => write!(f, "{}", self.symbol),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Stack(StackOperand),
    Imm(i64),
    Addr(AddrOperand),
}

impl Operand {
    pub fn as_reg(&self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    /// The register this operand mentions, if any, including the base
    /// registers of stack and address operands.
    pub fn mentioned_reg(&self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(*r),
            Operand::Stack(s) => Some(s.base),
            Operand::Addr(a) => a.base,
            Operand::Imm(_) => None,
        }
    }

    pub fn mentioned_reg_mut(&mut self) -> Option<&mut Reg> {
        match self {
            Operand::Reg(r) => Some(r),
            Operand::Stack(s) => Some(&mut s.base),
            Operand::Addr(a) => a.base.as_mut(),
            Operand::Imm(_) => None,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Reg(r) => r.fmt(f),
            Operand::Stack(s) => s.fmt(f),
            Operand::Imm(n) => n.fmt(f),
            Operand::Addr(a) => a.fmt(f),
        }
    }
}

impl From<Reg> for Operand {
    fn from(r: Reg) -> Self {
        Operand::Reg(r)
    }
}

impl From<VReg> for Operand {
    fn from(v: VReg) -> Self {
        Operand::Reg(Reg::Virtual(v))
    }
}

impl From<PhyReg> for Operand {
    fn from(p: PhyReg) -> Self {
        Operand::Reg(Reg::Physical(p))
    }
}

/// One machine instruction: an opcode, at most one def and an ordered
/// list of uses, all rewritable in place.
#[derive(Debug, Clone)]
pub struct Instruction {
    id: InstrId,
    pub opcode: Opcode,
    pub def: Option<Operand>,
    pub uses: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, def: Option<Operand>, uses: Vec<Operand>) -> Self {
        Self {
            id: InstrId::new(),
            opcode,
            def,
            uses,
        }
    }

    pub fn mv(dst: impl Into<Operand>, src: impl Into<Operand>) -> Self {
        Self::new(Opcode::Mv, Some(dst.into()), vec![src.into()])
    }

    pub fn id(&self) -> InstrId {
        self.id
    }

    pub fn def_reg(&self) -> Option<Reg> {
        self.def.as_ref().and_then(Operand::as_reg)
    }

    /// Every register read by this instruction, including stack and
    /// address bases.
    pub fn use_regs(&self) -> Vec<Reg> {
        self.uses.iter().filter_map(Operand::mentioned_reg).collect()
    }

    /// `(dst, src)` when this is a coalescable register-to-register copy.
    pub fn move_regs(&self) -> Option<(Reg, Reg)> {
        if self.opcode.kind() != OpcodeKind::Move {
            return None;
        }
        let dst = self.def.as_ref()?.as_reg()?;
        let src = self.uses.first()?.as_reg()?;
        Some((dst, src))
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        let mut sep = " ";
        if let Some(def) = &self.def {
            write!(f, "{}{}", sep, def)?;
            sep = ", ";
        }
        for operand in &self.uses {
            write!(f, "{}{}", sep, operand)?;
            sep = ", ";
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A basic block: ordered instructions plus the explicit successor edges
/// liveness runs over.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: Label,
    pub instrs: Vec<Instruction>,
    pub succs: Vec<BlockId>,
}

impl BasicBlock {
    fn new() -> Self {
        Self {
            label: Label::new(),
            instrs: Vec::new(),
            succs: Vec::new(),
        }
    }

    pub fn push(&mut self, instr: Instruction) {
        self.instrs.push(instr);
    }
}

/// A function body. Block 0 is the entry.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    pub fn push_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::new());
        BlockId(self.blocks.len() - 1)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.0].succs.push(to);
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instrs.iter())
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.label)?;
            for instr in &block.instrs {
                writeln!(f, "    {}", instr)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PhyReg;

    #[test]
    fn test_move_recognition() {
        let v = VReg::new(RegClass::Int);
        let mv = Instruction::mv(v, PhyReg::A0);
        assert_eq!(
            mv.move_regs(),
            Some((Reg::Virtual(v), Reg::Physical(PhyReg::A0)))
        );

        let add = Instruction::new(
            Opcode::Add,
            Some(v.into()),
            vec![PhyReg::A0.into(), Operand::Imm(1)],
        );
        assert_eq!(add.move_regs(), None);
        assert_eq!(add.use_regs(), vec![Reg::Physical(PhyReg::A0)]);
    }

    #[test]
    fn test_stack_base_is_a_use() {
        let base = VReg::new(RegClass::Int);
        let store = Instruction::new(
            Opcode::Sd,
            None,
            vec![
                PhyReg::A0.into(),
                Operand::Stack(StackOperand {
                    base: base.into(),
                    offset: -8,
                }),
            ],
        );
        assert_eq!(
            store.use_regs(),
            vec![Reg::Physical(PhyReg::A0), Reg::Virtual(base)]
        );
        assert_eq!(store.def_reg(), None);
    }

    #[test]
    fn test_display() {
        let store = Instruction::new(
            Opcode::Sd,
            None,
            vec![
                PhyReg::T0.into(),
                Operand::Stack(StackOperand {
                    base: PhyReg::S0.into(),
                    offset: -16,
                }),
            ],
        );
        assert_eq!(store.to_string(), "sd t0, -16(s0)");

        let fmv = Instruction::new(
            Opcode::FmvS,
            Some(PhyReg::Fa0.into()),
            vec![PhyReg::Fa1.into()],
        );
        assert_eq!(fmv.to_string(), "fmv.s fa0, fa1");
    }
}
