use std::collections::{HashMap, HashSet};

use crate::{
    asm::{Function, Reg},
    common::InstrId,
};

use super::{flow::Cfg, graph::InterferenceGraph};

pub type LiveSet = HashSet<Reg>;

/// A register-to-register copy captured for coalescing.
#[derive(Debug, Clone, Copy)]
pub struct MoveInstr {
    pub id: InstrId,
    pub dst: Reg,
    pub src: Reg,
}

/// Everything one outer-loop iteration learns from the dataflow pass.
/// Rebuilt from scratch every time the program changes.
pub struct Liveness {
    /// Operands live immediately after each instruction.
    pub live_out: HashMap<InstrId, LiveSet>,
    /// Every node seen in the function.
    pub nodes: HashSet<Reg>,
    /// Physical-register nodes seen: the precoloured set.
    pub precolored: HashSet<Reg>,
    /// Moves eligible for coalescing, in program order.
    pub moves: Vec<MoveInstr>,
    /// Instruction count over which each node is live; spill-cost input.
    pub spans: HashMap<Reg, u32>,
    /// Interference relation derived from the live sets.
    pub graph: InterferenceGraph,
}

/// Backward dataflow to a fixpoint over the block graph, then a backward
/// in-block walk that derives per-instruction live-out sets, the
/// interference edges and the move list.
pub fn analyze(func: &Function, cfg: &Cfg) -> Liveness {
    let block_count = func.blocks.len();
    let mut use_sets = vec![LiveSet::new(); block_count];
    let mut def_sets = vec![LiveSet::new(); block_count];

    for id in func.block_ids() {
        let (uses, defs) = (&mut use_sets[id.index()], &mut def_sets[id.index()]);
        for instr in &func.block(id).instrs {
            for used in instr.use_regs() {
                if !defs.contains(&used) {
                    uses.insert(used);
                }
            }
            if let Some(def) = instr.def_reg() {
                defs.insert(def);
            }
        }
    }

    let mut live_in = vec![LiveSet::new(); block_count];
    let mut live_out_blocks = vec![LiveSet::new(); block_count];
    loop {
        let mut changed = false;
        for &id in cfg.postorder() {
            let i = id.index();
            let mut out = LiveSet::new();
            for &succ in &func.block(id).succs {
                out.extend(live_in[succ.index()].iter().copied());
            }
            let mut inn = use_sets[i].clone();
            inn.extend(out.difference(&def_sets[i]).copied());

            changed |= out != live_out_blocks[i];
            changed |= inn != live_in[i];
            live_out_blocks[i] = out;
            live_in[i] = inn;
        }
        if !changed {
            break;
        }
    }

    let mut live_out = HashMap::new();
    let mut nodes = HashSet::new();
    let mut moves = Vec::new();
    let mut spans: HashMap<Reg, u32> = HashMap::new();
    let mut graph = InterferenceGraph::new();

    for id in func.block_ids() {
        let mut live = live_out_blocks[id.index()].clone();
        for instr in func.block(id).instrs.iter().rev() {
            for &reg in &live {
                *spans.entry(reg).or_insert(0) += 1;
            }

            let mv = instr.move_regs();
            if let Some(def) = instr.def_reg() {
                // a move's def and source are coalescing candidates, not
                // interferers
                let exempt = mv.map(|(_, src)| src);
                for &other in &live {
                    if other != def && Some(other) != exempt {
                        graph.add_edge(def, other);
                    }
                }
            }
            if let Some((dst, src)) = mv {
                moves.push(MoveInstr {
                    id: instr.id(),
                    dst,
                    src,
                });
            }

            live_out.insert(instr.id(), live.clone());
            if let Some(def) = instr.def_reg() {
                live.remove(&def);
                nodes.insert(def);
                graph.ensure_node(def);
            }
            for used in instr.use_regs() {
                live.insert(used);
                nodes.insert(used);
                graph.ensure_node(used);
            }
        }
    }

    let precolored = nodes.iter().copied().filter(|r| r.is_physical()).collect();

    Liveness {
        live_out,
        nodes,
        precolored,
        moves,
        spans,
        graph,
    }
}
