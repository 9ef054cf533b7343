use crate::asm::{BlockId, Function};

/// Block-level control-flow relation, derived from the explicit successor
/// lists carried by the function body.
pub struct Cfg {
    preds: Vec<Vec<BlockId>>,
    postorder: Vec<BlockId>,
}

impl Cfg {
    pub fn compute(func: &Function) -> Self {
        let mut preds = vec![Vec::new(); func.blocks.len()];
        for from in func.block_ids() {
            for &to in &func.block(from).succs {
                preds[to.index()].push(from);
            }
        }

        let mut visited = vec![false; func.blocks.len()];
        let mut postorder = Vec::with_capacity(func.blocks.len());
        if !func.blocks.is_empty() {
            dfs(func, func.entry(), &mut visited, &mut postorder);
        }
        // blocks unreachable from the entry still carry instructions the
        // rewrites must visit
        for id in func.block_ids() {
            if !visited[id.index()] {
                dfs(func, id, &mut visited, &mut postorder);
            }
        }

        Self { preds, postorder }
    }

    pub fn preds(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id.index()]
    }

    /// Backward-analysis order: successors tend to come first.
    pub fn postorder(&self) -> &[BlockId] {
        &self.postorder
    }

    pub fn reverse_postorder(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.postorder.iter().rev().copied()
    }
}

fn dfs(func: &Function, id: BlockId, visited: &mut [bool], out: &mut Vec<BlockId>) {
    if visited[id.index()] {
        return;
    }
    visited[id.index()] = true;
    for &succ in &func.block(id).succs {
        dfs(func, succ, visited, out);
    }
    out.push(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diamond() {
        //     b0
        //    /  \
        //   b1   b2
        //    \  /
        //     b3
        let mut func = Function::new("diamond");
        let b0 = func.push_block();
        let b1 = func.push_block();
        let b2 = func.push_block();
        let b3 = func.push_block();
        func.add_edge(b0, b1);
        func.add_edge(b0, b2);
        func.add_edge(b1, b3);
        func.add_edge(b2, b3);

        let cfg = Cfg::compute(&func);

        assert_eq!(cfg.preds(b0), &[]);
        assert_eq!(cfg.preds(b1), &[b0]);
        assert_eq!(cfg.preds(b2), &[b0]);
        assert_eq!(cfg.preds(b3), &[b1, b2]);

        let rpo: Vec<_> = cfg.reverse_postorder().collect();
        assert_eq!(rpo.len(), 4);
        assert_eq!(rpo[0], b0);
        assert_eq!(rpo[3], b3);
        assert_eq!(cfg.postorder()[0], b3);
    }

    #[test]
    fn test_unreachable_blocks_still_ordered() {
        let mut func = Function::new("unreachable");
        let b0 = func.push_block();
        let b1 = func.push_block();
        let orphan = func.push_block();
        func.add_edge(b0, b1);

        let cfg = Cfg::compute(&func);
        assert!(cfg.postorder().contains(&orphan));
        assert_eq!(cfg.postorder().len(), 3);
    }
}
