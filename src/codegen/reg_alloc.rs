use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{
    asm::{Function, Instruction, Opcode, Operand, Reg, StackOperand},
    common::{RegClass, VReg},
    frame::Frame,
};

use super::{
    color::{Colorer, Coloring},
    flow::Cfg,
    liveness, AllocError,
};

/// Assign a physical register to every virtual register of `func`,
/// rewriting the instruction stream in place: spill code is inserted
/// where the colouring demands it and identity moves are deleted.
///
/// One fixpoint iteration rebuilds liveness and the interference graph,
/// drains the worklists, and colours the select stack; any node left
/// uncoloured is spilled to the frame and the loop starts over.
pub fn alloc<F: Frame>(func: &mut Function, frame: &mut F) -> Result<Coloring, AllocError> {
    let mut already_spilled: HashMap<VReg, StackOperand> = HashMap::new();
    let mut round = 0u32;
    loop {
        round += 1;
        debug!(round, func = %func.name, "allocation round");
        let cfg = Cfg::compute(func);
        let live = liveness::analyze(func, &cfg);
        let spilled_before: HashSet<VReg> = already_spilled.keys().copied().collect();
        let mut colorer = Colorer::<F>::new(live, &spilled_before);
        colorer.run()?;

        if colorer.spilled().is_empty() {
            let coloring = colorer.into_coloring();
            rewrite_program(func, &coloring)?;
            return Ok(coloring);
        }

        let spilled: Vec<VReg> = colorer
            .spilled()
            .iter()
            .filter_map(|r| r.as_virtual())
            .collect();
        rewrite_spills(func, frame, &spilled, &mut already_spilled)?;
    }
}

/// Materialise the chosen spills: every def of a spilled register is
/// redirected through a fresh temporary stored right after it, every use
/// through a fresh temporary reloaded right before it. Call and return
/// instructions are never split around.
fn rewrite_spills<F: Frame>(
    func: &mut Function,
    frame: &mut F,
    spilled: &[VReg],
    already_spilled: &mut HashMap<VReg, StackOperand>,
) -> Result<(), AllocError> {
    for &v in spilled {
        // one frame slot per register for its whole lifetime
        already_spilled.entry(v).or_insert_with(|| frame.spill(v));
    }
    let spill_set: HashSet<VReg> = spilled.iter().copied().collect();

    for block in &mut func.blocks {
        let old = std::mem::take(&mut block.instrs);
        let mut rewritten = Vec::with_capacity(old.len());
        for mut instr in old {
            if instr.opcode.is_boundary() {
                rewritten.push(instr);
                continue;
            }

            for use_op in &mut instr.uses {
                let Some(v) = spilled_reg(use_op, &spill_set) else {
                    continue;
                };
                let slot = *already_spilled
                    .get(&v)
                    .ok_or(AllocError::MissingSpillSlot(v))?;
                let tmp = VReg::new(v.class());
                debug!(%v, %tmp, "reload before use");
                rewritten.push(reload_instr(tmp, slot));
                redirect(use_op, v, tmp);
            }

            let mut store = None;
            if let Some(def_op) = &mut instr.def {
                if let Some(v) = spilled_reg(def_op, &spill_set) {
                    let slot = *already_spilled
                        .get(&v)
                        .ok_or(AllocError::MissingSpillSlot(v))?;
                    let tmp = VReg::new(v.class());
                    debug!(%v, %tmp, "store after def");
                    redirect(def_op, v, tmp);
                    store = Some(store_instr(tmp, slot));
                }
            }

            rewritten.push(instr);
            rewritten.extend(store);
        }
        block.instrs = rewritten;
    }
    Ok(())
}

/// Replace every virtual occurrence with its colour, including registers
/// buried in stack and address operands, and drop moves that became
/// self-copies. Calls keep their rewritten operand lists but are never
/// deleted. A second run over already-rewritten code is a no-op.
fn rewrite_program(func: &mut Function, coloring: &Coloring) -> Result<(), AllocError> {
    for block in &mut func.blocks {
        let old = std::mem::take(&mut block.instrs);
        let mut kept = Vec::with_capacity(old.len());
        for mut instr in old {
            if let Some(def_op) = &mut instr.def {
                recolor(def_op, coloring)?;
            }
            for use_op in &mut instr.uses {
                recolor(use_op, coloring)?;
            }
            if let Some((dst, src)) = instr.move_regs() {
                if dst == src {
                    debug!(instr = %instr, "drop identity move");
                    continue;
                }
            }
            kept.push(instr);
        }
        block.instrs = kept;
    }
    Ok(())
}

fn spilled_reg(op: &Operand, spill_set: &HashSet<VReg>) -> Option<VReg> {
    op.mentioned_reg()
        .and_then(Reg::as_virtual)
        .filter(|v| spill_set.contains(v))
}

fn redirect(op: &mut Operand, from: VReg, to: VReg) {
    if let Some(reg) = op.mentioned_reg_mut() {
        if *reg == Reg::Virtual(from) {
            *reg = Reg::Virtual(to);
        }
    }
}

fn recolor(op: &mut Operand, coloring: &Coloring) -> Result<(), AllocError> {
    if let Some(reg) = op.mentioned_reg_mut() {
        if reg.is_virtual() {
            let phy = coloring
                .get(reg)
                .copied()
                .ok_or(AllocError::UncoloredNode(*reg))?;
            *reg = Reg::Physical(phy);
        }
    }
    Ok(())
}

fn store_instr(tmp: VReg, slot: StackOperand) -> Instruction {
    let opcode = match tmp.class() {
        RegClass::Int => Opcode::Sd,
        RegClass::Float => Opcode::Fsw,
    };
    Instruction::new(opcode, None, vec![tmp.into(), Operand::Stack(slot)])
}

fn reload_instr(tmp: VReg, slot: StackOperand) -> Instruction {
    let opcode = match tmp.class() {
        RegClass::Int => Opcode::Ld,
        RegClass::Float => Opcode::Flw,
    };
    Instruction::new(opcode, Some(tmp.into()), vec![Operand::Stack(slot)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        asm::AddrOperand,
        frame::{PhyReg, RiscvFrame},
    };

    #[test]
    fn test_uncolored_node_is_fatal() {
        let v = Reg::Virtual(VReg::new(RegClass::Int));
        let mut func = Function::new("broken");
        let b0 = func.push_block();
        func.block_mut(b0)
            .push(Instruction::new(Opcode::Ret, None, vec![v.into()]));

        let err = rewrite_program(&mut func, &Coloring::new()).unwrap_err();
        assert_eq!(err, AllocError::UncoloredNode(v));
    }

    #[test]
    fn test_spill_rewrite_inserts_store_and_reload() {
        let v = VReg::new(RegClass::Int);
        let w = VReg::new(RegClass::Int);
        let mut func = Function::new("spill");
        let b0 = func.push_block();
        let block = func.block_mut(b0);
        block.push(Instruction::new(
            Opcode::Li,
            Some(v.into()),
            vec![Operand::Imm(7)],
        ));
        block.push(Instruction::new(
            Opcode::Addi,
            Some(w.into()),
            vec![v.into(), Operand::Imm(1)],
        ));
        block.push(Instruction::new(Opcode::Ret, None, vec![]));

        let mut frame = RiscvFrame::new();
        let mut recorded = HashMap::new();
        rewrite_spills(&mut func, &mut frame, &[v], &mut recorded).unwrap();

        let slot = recorded[&v];
        let ops: Vec<Opcode> = func.block(b0).instrs.iter().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            vec![Opcode::Li, Opcode::Sd, Opcode::Ld, Opcode::Addi, Opcode::Ret]
        );

        // store and reload address the same frame slot through fresh temps
        let store = &func.block(b0).instrs[1];
        let reload = &func.block(b0).instrs[2];
        assert_eq!(store.uses[1], Operand::Stack(slot));
        assert_eq!(reload.uses[0], Operand::Stack(slot));
        assert_ne!(store.uses[0].as_reg(), Some(Reg::Virtual(v)));
        assert_ne!(reload.def_reg(), Some(Reg::Virtual(v)));

        // the spilled register itself no longer occurs
        assert!(func.instrs().all(|i| {
            i.def_reg() != Some(Reg::Virtual(v)) && !i.use_regs().contains(&Reg::Virtual(v))
        }));
    }

    #[test]
    fn test_float_spills_use_float_opcodes() {
        let v = VReg::new(RegClass::Float);
        let mut func = Function::new("fspill");
        let b0 = func.push_block();
        let block = func.block_mut(b0);
        block.push(Instruction::new(
            Opcode::FaddS,
            Some(v.into()),
            vec![PhyReg::Fa0.into(), PhyReg::Fa1.into()],
        ));
        block.push(Instruction::new(
            Opcode::FmvS,
            Some(PhyReg::Fa0.into()),
            vec![v.into()],
        ));

        let mut frame = RiscvFrame::new();
        let mut recorded = HashMap::new();
        rewrite_spills(&mut func, &mut frame, &[v], &mut recorded).unwrap();

        let ops: Vec<Opcode> = func.block(b0).instrs.iter().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            vec![Opcode::FaddS, Opcode::Fsw, Opcode::Flw, Opcode::FmvS]
        );
    }

    #[test]
    fn test_rewrite_reaches_indirect_operands_and_drops_identity_moves() {
        let v = Reg::Virtual(VReg::new(RegClass::Int));
        let w = Reg::Virtual(VReg::new(RegClass::Int));

        let mut func = Function::new("rewrite");
        let b0 = func.push_block();
        let block = func.block_mut(b0);
        block.push(Instruction::new(
            Opcode::Lw,
            Some(w.into()),
            vec![Operand::Stack(StackOperand {
                base: v,
                offset: 4,
            })],
        ));
        block.push(Instruction::new(
            Opcode::La,
            Some(w.into()),
            vec![Operand::Addr(AddrOperand {
                symbol: "table".into(),
                base: Some(v),
            })],
        ));
        block.push(Instruction::mv(w, v));

        let mut coloring = Coloring::new();
        coloring.insert(v, PhyReg::T0);
        coloring.insert(w, PhyReg::T0);
        rewrite_program(&mut func, &coloring).unwrap();

        // both resolved to t0, so the copy disappears
        let instrs = &func.block(b0).instrs;
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].to_string(), "lw t0, 4(t0)");
        assert_eq!(instrs[1].to_string(), "la t0, table(t0)");

        // a second pass changes nothing
        let before = func.to_string();
        rewrite_program(&mut func, &coloring).unwrap();
        assert_eq!(before, func.to_string());
    }
}
