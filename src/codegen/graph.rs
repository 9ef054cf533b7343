use std::collections::{HashMap, HashSet};

use crate::asm::Reg;

/// Undirected interference relation with incrementally tracked degrees.
///
/// Physical registers are maximally constrained: they keep no adjacency
/// list and report `usize::MAX` degree, so they can never be simplified
/// or spilled.
#[derive(Debug, Default)]
pub struct InterferenceGraph {
    adj_set: HashSet<(Reg, Reg)>,
    adj_list: HashMap<Reg, HashSet<Reg>>,
    degree: HashMap<Reg, usize>,
}

impl InterferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node even if it never gains an edge.
    pub fn ensure_node(&mut self, n: Reg) {
        if n.is_virtual() {
            self.adj_list.entry(n).or_default();
            self.degree.entry(n).or_insert(0);
        }
    }

    pub fn add_edge(&mut self, u: Reg, v: Reg) {
        if u == v || self.adj_set.contains(&(u, v)) {
            return;
        }
        self.adj_set.insert((u, v));
        self.adj_set.insert((v, u));

        if u.is_virtual() {
            self.adj_list.entry(u).or_default().insert(v);
            *self.degree.entry(u).or_insert(0) += 1;
        }
        if v.is_virtual() {
            self.adj_list.entry(v).or_default().insert(u);
            *self.degree.entry(v).or_insert(0) += 1;
        }
    }

    pub fn interferes(&self, u: Reg, v: Reg) -> bool {
        self.adj_set.contains(&(u, v))
    }

    /// The full adjacency list of `n`; callers filter out removed nodes.
    pub fn neighbors(&self, n: Reg) -> impl Iterator<Item = Reg> + '_ {
        self.adj_list.get(&n).into_iter().flatten().copied()
    }

    pub fn degree(&self, n: Reg) -> usize {
        if n.is_physical() {
            usize::MAX
        } else {
            self.degree.get(&n).copied().unwrap_or(0)
        }
    }

    /// Decrement `n`'s degree and return the previous value. Physical
    /// nodes are left alone.
    pub fn decrement_degree(&mut self, n: Reg) -> usize {
        if n.is_physical() {
            return usize::MAX;
        }
        let slot = self.degree.entry(n).or_insert(0);
        let old = *slot;
        *slot = old.saturating_sub(1);
        old
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::{RegClass, VReg},
        frame::PhyReg,
    };

    #[test]
    fn test_edges_and_degrees() {
        let a = Reg::Virtual(VReg::new(RegClass::Int));
        let b = Reg::Virtual(VReg::new(RegClass::Int));
        let p = Reg::Physical(PhyReg::A0);

        let mut graph = InterferenceGraph::new();
        graph.add_edge(a, b);
        graph.add_edge(a, b); // idempotent
        graph.add_edge(a, p);
        graph.add_edge(a, a); // self edges are ignored

        assert!(graph.interferes(a, b));
        assert!(graph.interferes(b, a));
        assert!(!graph.interferes(b, p));

        assert_eq!(graph.degree(a), 2);
        assert_eq!(graph.degree(b), 1);
        assert_eq!(graph.degree(p), usize::MAX);

        // the physical node appears in adjacency but keeps no list itself
        assert!(graph.neighbors(a).any(|n| n == p));
        assert_eq!(graph.neighbors(p).count(), 0);

        assert_eq!(graph.decrement_degree(a), 2);
        assert_eq!(graph.degree(a), 1);
        assert_eq!(graph.decrement_degree(p), usize::MAX);
    }
}
