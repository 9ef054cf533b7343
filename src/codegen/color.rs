use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    marker::PhantomData,
};

use itertools::Itertools;
use tracing::debug;

use crate::{
    asm::Reg,
    common::{InstrId, RegClass, VReg},
    frame::{Frame, PhyReg},
};

use super::{graph::InterferenceGraph, liveness::Liveness, AllocError};

/// Where a node currently lives. Every non-precoloured node is in exactly
/// one state; all transitions go through [`Colorer::transition`], so a
/// node can never sit in two worklists at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Initial,
    Simplify,
    Freeze,
    Spill,
    Selected,
    Coalesced,
    Colored,
    Spilled,
    Precolored,
}

pub type Coloring = HashMap<Reg, PhyReg>;

/// One outer-loop iteration's worth of allocator state. Dropping it and
/// building a fresh one is the between-iterations reset.
pub struct Colorer<'a, F: Frame> {
    graph: InterferenceGraph,
    state: HashMap<Reg, NodeState>,
    simplify_worklist: Vec<Reg>,
    freeze_worklist: HashSet<Reg>,
    spill_worklist: HashSet<Reg>,
    select_stack: Vec<Reg>,
    spilled_nodes: Vec<Reg>,
    coalesced_nodes: Vec<Reg>,
    alias: HashMap<Reg, Reg>,

    moves: HashMap<InstrId, (Reg, Reg)>,
    move_list: HashMap<Reg, HashSet<InstrId>>,
    worklist_moves: Vec<InstrId>,
    active_moves: HashSet<InstrId>,
    frozen_moves: HashSet<InstrId>,
    constrained_moves: HashSet<InstrId>,
    coalesced_moves: Vec<InstrId>,

    colors: Coloring,
    spans: HashMap<Reg, u32>,
    already_spilled: &'a HashSet<VReg>,
    _frame: PhantomData<F>,
}

impl<'a, F: Frame> Colorer<'a, F> {
    pub fn new(live: Liveness, already_spilled: &'a HashSet<VReg>) -> Self {
        let mut colorer = Self {
            graph: live.graph,
            state: HashMap::new(),
            simplify_worklist: Vec::new(),
            freeze_worklist: HashSet::new(),
            spill_worklist: HashSet::new(),
            select_stack: Vec::new(),
            spilled_nodes: Vec::new(),
            coalesced_nodes: Vec::new(),
            alias: HashMap::new(),
            moves: HashMap::new(),
            move_list: HashMap::new(),
            worklist_moves: Vec::new(),
            active_moves: HashSet::new(),
            frozen_moves: HashSet::new(),
            constrained_moves: HashSet::new(),
            coalesced_moves: Vec::new(),
            colors: Coloring::new(),
            spans: live.spans,
            already_spilled,
            _frame: PhantomData,
        };

        for &n in &live.nodes {
            if n.is_virtual() {
                colorer.state.insert(n, NodeState::Initial);
            }
        }
        for &p in &live.precolored {
            colorer.state.insert(p, NodeState::Precolored);
            if let Reg::Physical(phy) = p {
                colorer.colors.insert(p, phy);
            }
        }
        for mv in &live.moves {
            colorer.moves.insert(mv.id, (mv.dst, mv.src));
            colorer.move_list.entry(mv.dst).or_default().insert(mv.id);
            colorer.move_list.entry(mv.src).or_default().insert(mv.id);
            colorer.worklist_moves.push(mv.id);
        }

        colorer.make_worklist();
        colorer
    }

    /// Inner loop plus colour assignment. Afterwards either
    /// [`Colorer::spilled`] is empty and [`Colorer::into_coloring`] is
    /// total over the function's nodes, or the caller must rewrite the
    /// spills and start over.
    pub fn run(&mut self) -> Result<(), AllocError> {
        loop {
            if let Some(n) = self.simplify_worklist.pop() {
                self.simplify(n);
            } else if let Some(m) = self.worklist_moves.pop() {
                self.coalesce(m);
            } else if !self.freeze_worklist.is_empty() {
                self.freeze();
            } else if !self.spill_worklist.is_empty() {
                self.select_spill();
            } else {
                break;
            }
        }
        debug!(
            coalesced = self.coalesced_moves.len(),
            frozen = self.frozen_moves.len(),
            constrained = self.constrained_moves.len(),
            "worklists drained"
        );
        self.assign_colors()
    }

    pub fn spilled(&self) -> &[Reg] {
        &self.spilled_nodes
    }

    pub fn coloring(&self) -> &Coloring {
        &self.colors
    }

    pub fn into_coloring(self) -> Coloring {
        self.colors
    }

    fn k(class: RegClass) -> usize {
        F::registers(class).len()
    }

    fn state_of(&self, n: Reg) -> NodeState {
        if n.is_physical() {
            NodeState::Precolored
        } else {
            self.state
                .get(&n)
                .copied()
                .unwrap_or(NodeState::Initial)
        }
    }

    /// The single accessor for the node partition: files `n` under `to`,
    /// removing it from the container of its previous state.
    fn transition(&mut self, n: Reg, to: NodeState) {
        debug_assert!(n.is_virtual());
        let from = self.state.insert(n, to);
        match from {
            Some(NodeState::Simplify) => self.simplify_worklist.retain(|&m| m != n),
            Some(NodeState::Freeze) => {
                self.freeze_worklist.remove(&n);
            }
            Some(NodeState::Spill) => {
                self.spill_worklist.remove(&n);
            }
            _ => {}
        }
        match to {
            NodeState::Simplify => self.simplify_worklist.push(n),
            NodeState::Freeze => {
                self.freeze_worklist.insert(n);
            }
            NodeState::Spill => {
                self.spill_worklist.insert(n);
            }
            _ => {}
        }
    }

    fn make_worklist(&mut self) {
        let initial: Vec<Reg> = self
            .state
            .iter()
            .filter(|&(_, s)| *s == NodeState::Initial)
            .map(|(&n, _)| n)
            .sorted()
            .collect();
        for n in initial {
            if self.graph.degree(n) >= Self::k(n.class()) {
                self.transition(n, NodeState::Spill);
            } else if self.is_move_related(n) {
                self.transition(n, NodeState::Freeze);
            } else {
                self.transition(n, NodeState::Simplify);
            }
        }
    }

    /// Moves still eligible for coalescing that involve `n`.
    fn node_moves(&self, n: Reg) -> Vec<InstrId> {
        self.move_list
            .get(&n)
            .map(|moves| {
                moves
                    .iter()
                    .copied()
                    .filter(|m| self.active_moves.contains(m) || self.worklist_moves.contains(m))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_move_related(&self, n: Reg) -> bool {
        !self.node_moves(n).is_empty()
    }

    fn enable_moves(&mut self, nodes: impl IntoIterator<Item = Reg>) {
        for n in nodes {
            for m in self.node_moves(n) {
                if self.active_moves.remove(&m) {
                    self.worklist_moves.push(m);
                }
            }
        }
    }

    /// Neighbours still in the graph: select-stack and coalesced nodes no
    /// longer count.
    fn adjacent(&self, n: Reg) -> Vec<Reg> {
        self.graph
            .neighbors(n)
            .filter(|&w| {
                !matches!(
                    self.state_of(w),
                    NodeState::Selected | NodeState::Coalesced
                )
            })
            .collect()
    }

    fn get_alias(&mut self, n: Reg) -> Reg {
        let mut root = n;
        while let Some(&parent) = self.alias.get(&root) {
            root = parent;
        }
        // path compression
        let mut cur = n;
        while cur != root {
            let next = self.alias.insert(cur, root).unwrap_or(root);
            cur = next;
        }
        root
    }

    fn simplify(&mut self, n: Reg) {
        debug!(node = %n, "simplify");
        self.transition(n, NodeState::Selected);
        self.select_stack.push(n);
        for t in self.adjacent(n) {
            self.decrement_degree(t);
        }
    }

    fn decrement_degree(&mut self, t: Reg) {
        if t.is_physical() {
            return;
        }
        let old = self.graph.decrement_degree(t);
        if old == Self::k(t.class()) {
            // dropped to k-1: moves around t may be viable again
            let mut around = self.adjacent(t);
            around.push(t);
            self.enable_moves(around);
            if self.state_of(t) == NodeState::Spill {
                if self.is_move_related(t) {
                    self.transition(t, NodeState::Freeze);
                } else {
                    self.transition(t, NodeState::Simplify);
                }
            }
        }
    }

    fn coalesce(&mut self, m: InstrId) {
        let (dst, src) = self.moves[&m];
        let x = self.get_alias(dst);
        let y = self.get_alias(src);
        // a precoloured endpoint always takes the u seat
        let (u, v) = if y.is_physical() { (y, x) } else { (x, y) };
        if u == v {
            self.coalesced_moves.push(m);
            self.add_worklist(u);
        } else if v.is_physical() || self.graph.interferes(u, v) {
            self.constrained_moves.insert(m);
            self.add_worklist(u);
            self.add_worklist(v);
        } else if (u.is_physical() && self.george_check(u, v))
            || (!u.is_physical() && self.briggs_check(u, v))
        {
            self.coalesced_moves.push(m);
            self.combine(u, v);
            self.add_worklist(u);
        } else {
            self.active_moves.insert(m);
        }
    }

    /// Admit `u` to the simplify worklist once it is neither move-related
    /// nor over-constrained.
    fn add_worklist(&mut self, u: Reg) {
        if u.is_virtual()
            && self.state_of(u) == NodeState::Freeze
            && !self.is_move_related(u)
            && self.graph.degree(u) < Self::k(u.class())
        {
            self.transition(u, NodeState::Simplify);
        }
    }

    /// George: safe to fold `v` into precoloured `u` when every neighbour
    /// of `v` is insignificant, precoloured, or already clashes with `u`.
    fn george_check(&self, u: Reg, v: Reg) -> bool {
        self.adjacent(v).into_iter().all(|t| {
            t.is_physical()
                || self.graph.degree(t) < Self::k(t.class())
                || self.graph.interferes(t, u)
        })
    }

    /// Briggs: the merged node stays colourable when its combined
    /// neighbourhood has fewer than k significant-degree nodes.
    fn briggs_check(&self, u: Reg, v: Reg) -> bool {
        let mut combined: HashSet<Reg> = self.adjacent(u).into_iter().collect();
        combined.extend(self.adjacent(v));
        let significant = combined
            .into_iter()
            .filter(|&t| self.graph.degree(t) >= Self::k(t.class()))
            .count();
        significant < Self::k(u.class())
    }

    fn combine(&mut self, u: Reg, v: Reg) {
        debug!(%v, into = %u, "combine");
        self.transition(v, NodeState::Coalesced);
        self.coalesced_nodes.push(v);
        self.alias.insert(v, u);

        let v_moves = self.move_list.get(&v).cloned().unwrap_or_default();
        self.move_list.entry(u).or_default().extend(v_moves);

        let around = self.adjacent(v);
        self.enable_moves(around.iter().copied().chain([v]));
        for t in around {
            self.graph.add_edge(t, u);
            self.decrement_degree(t);
        }

        if self.graph.degree(u) >= Self::k(u.class()) && self.state_of(u) == NodeState::Freeze {
            self.transition(u, NodeState::Spill);
        }
    }

    fn freeze(&mut self) {
        // first available, in deterministic order
        let Some(n) = self.freeze_worklist.iter().copied().sorted().next() else {
            return;
        };
        debug!(node = %n, "freeze");
        self.transition(n, NodeState::Simplify);
        self.freeze_moves(n);
    }

    /// Give up coalescing anything involving `n`.
    fn freeze_moves(&mut self, n: Reg) {
        let n_alias = self.get_alias(n);
        for m in self.node_moves(n) {
            let (dst, src) = self.moves[&m];
            let other = if self.get_alias(src) == n_alias {
                self.get_alias(dst)
            } else {
                self.get_alias(src)
            };
            self.active_moves.remove(&m);
            self.frozen_moves.insert(m);
            if other.is_virtual()
                && self.state_of(other) == NodeState::Freeze
                && !self.is_move_related(other)
                && self.graph.degree(other) < Self::k(other.class())
            {
                self.transition(other, NodeState::Simplify);
            }
        }
    }

    fn select_spill(&mut self) {
        // highest degree x live-span weight among candidates not spilled
        // in an earlier round; ties go to the oldest register
        let pick = self
            .spill_worklist
            .iter()
            .copied()
            .filter(|r| match r {
                Reg::Virtual(v) => !self.already_spilled.contains(v),
                Reg::Physical(_) => false,
            })
            .max_by_key(|&r| (self.spill_weight(r), Reverse(r)))
            .or_else(|| self.spill_worklist.iter().copied().sorted().next());
        let Some(n) = pick else { return };
        debug!(node = %n, weight = self.spill_weight(n), "spill candidate");
        self.transition(n, NodeState::Simplify);
        self.freeze_moves(n);
    }

    fn spill_weight(&self, n: Reg) -> u64 {
        let span = self.spans.get(&n).copied().unwrap_or(1).max(1) as u64;
        self.graph.degree(n) as u64 * span
    }

    fn assign_colors(&mut self) -> Result<(), AllocError> {
        while let Some(n) = self.select_stack.pop() {
            let mut ok: Vec<PhyReg> = F::registers(n.class()).to_vec();
            let neighbors: Vec<Reg> = self.graph.neighbors(n).collect();
            for w in neighbors {
                let a = self.get_alias(w);
                if matches!(
                    self.state_of(a),
                    NodeState::Colored | NodeState::Precolored
                ) {
                    let taken = *self.colors.get(&a).ok_or(AllocError::UncoloredNode(a))?;
                    ok.retain(|&r| r != taken);
                }
            }
            if ok.is_empty() {
                debug!(node = %n, "actual spill");
                self.transition(n, NodeState::Spilled);
                self.spilled_nodes.push(n);
            } else {
                let chosen = self.select_phy_reg(n, &ok);
                debug!(node = %n, reg = %chosen, "assign");
                self.transition(n, NodeState::Colored);
                self.colors.insert(n, chosen);
            }
        }
        // coalesced nodes inherit their target's colour; a target that
        // went to actual spill leaves its partners for the next round
        for v in self.coalesced_nodes.clone() {
            let target = self.get_alias(v);
            if let Some(&c) = self.colors.get(&target) {
                self.colors.insert(v, c);
            }
        }
        Ok(())
    }

    /// Prefer a colour that kills a copy: any physical move partner of
    /// `n` that is still available, else the first free register in
    /// priority order.
    fn select_phy_reg(&self, n: Reg, ok: &[PhyReg]) -> PhyReg {
        let mut targets: HashSet<PhyReg> = HashSet::new();
        if let Some(moves) = self.move_list.get(&n) {
            for m in moves {
                let (dst, src) = self.moves[m];
                let other = if dst == n { src } else { dst };
                if let Reg::Physical(p) = other {
                    targets.insert(p);
                }
            }
        }
        for &r in ok {
            if targets.contains(&r) {
                return r;
            }
        }
        ok[0]
    }
}
