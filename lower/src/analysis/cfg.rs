// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::ops::Range;

use log::debug;

use anvil::{BlockId, Procedure};

/// The block graph of one procedure: which blocks can transfer control
/// to which, in what order a backward dataflow pass should visit them,
/// and how deeply each block is nested in loops.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    reverse_postorder: Vec<usize>,
    reachable: Vec<bool>,
    loop_depth: Vec<u32>,
}

impl ControlFlowGraph {
    #[must_use]
    pub fn new(procedure: &Procedure) -> Self {
        let block_count = procedure.blocks().len();

        let mut this = Self {
            successors: vec![Vec::new(); block_count],
            predecessors: vec![Vec::new(); block_count],
            reverse_postorder: Vec::new(),
            reachable: vec![false; block_count],
            loop_depth: vec![0; block_count],
        };

        this.collect_edges(procedure);
        this.visit_from_entry();
        this.analyze_loops();

        this
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.successors.len()
    }

    #[must_use]
    pub fn successors(&self, block: usize) -> &[usize] {
        &self.successors[block]
    }

    #[must_use]
    pub fn predecessors(&self, block: usize) -> &[usize] {
        &self.predecessors[block]
    }

    /// Reachable blocks in reverse post-order, entry first.
    #[must_use]
    pub fn reverse_postorder(&self) -> &[usize] {
        &self.reverse_postorder
    }

    #[must_use]
    pub fn is_reachable(&self, block: usize) -> bool {
        self.reachable[block]
    }

    /// How many loops enclose this block, by the back-edge ranges of
    /// the layout order.
    #[must_use]
    pub fn loop_depth(&self, block: usize) -> u32 {
        self.loop_depth[block]
    }

    #[allow(unused)]
    pub fn dump(&self) {
        debug!("Control flow graph:");
        for (block, successors) in self.successors.iter().enumerate() {
            debug!(
                "    b{block} -> {successors:?} (depth {}, reachable: {})",
                self.loop_depth[block], self.reachable[block]
            );
        }
    }
}

// private methods
impl ControlFlowGraph {
    fn position_of_block(procedure: &Procedure, id: BlockId) -> usize {
        procedure
            .blocks()
            .iter()
            .position(|block| block.id() == id)
            .unwrap_or_else(|| panic!("branch to unknown block {id}"))
    }

    fn collect_edges(&mut self, procedure: &Procedure) {
        for (index, block) in procedure.blocks().iter().enumerate() {
            let terminated = block
                .instructions()
                .last()
                .is_some_and(|instruction| instruction.is_terminator());

            if let Some(last) = block.instructions().last() {
                for target in last.branch_targets() {
                    let target = Self::position_of_block(procedure, target);
                    self.add_edge(index, target);
                }
            }

            // A block without a terminator falls through to the next
            // block in layout order.
            if !terminated && index + 1 < procedure.blocks().len() {
                self.add_edge(index, index + 1);
            }
        }
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if !self.successors[from].contains(&to) {
            self.successors[from].push(to);
            self.predecessors[to].push(from);
        }
    }

    fn visit_from_entry(&mut self) {
        if self.successors.is_empty() {
            return;
        }

        let mut postorder = Vec::new();
        let mut visited = vec![false; self.successors.len()];

        // Iterative depth-first search, successors in layout order.
        let mut stack = vec![(0usize, 0usize)];
        visited[0] = true;

        while let Some((block, next_successor)) = stack.pop() {
            self.reachable[block] = true;

            if let Some(&successor) = self.successors[block].get(next_successor) {
                stack.push((block, next_successor + 1));

                if !visited[successor] {
                    visited[successor] = true;
                    stack.push((successor, 0));
                }
            } else {
                postorder.push(block);
            }
        }

        postorder.reverse();
        self.reverse_postorder = postorder;
    }

    fn analyze_loops(&mut self) {
        let mut loops: Vec<Range<usize>> = Vec::new();

        for (from, successors) in self.successors.iter().enumerate() {
            for &to in successors {
                if to <= from {
                    loops.push(to..from + 1);
                }
            }
        }

        for (block, depth) in self.loop_depth.iter_mut().enumerate() {
            *depth = loops.iter().filter(|range| range.contains(&block)).count() as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil::{BinaryOperation, Immediate, ProcedureBuilder, TypeDescriptor};

    #[test]
    fn straight_line_procedure_has_no_loops() {
        let mut builder = ProcedureBuilder::new("straight");
        let a = builder.declare(TypeDescriptor::int32());
        builder.move_to(a, Immediate::Integer32(1));
        builder.ret(Some(a.into()));

        let cfg = ControlFlowGraph::new(&builder.build());
        assert_eq!(cfg.reverse_postorder(), &[0]);
        assert_eq!(cfg.loop_depth(0), 0);
    }

    #[test]
    fn back_edge_marks_the_loop_body() {
        let mut builder = ProcedureBuilder::new("loops");
        let counter = builder.declare(TypeDescriptor::int32());
        let body = builder.create_block();
        let exit = builder.create_block();

        builder.move_to(counter, Immediate::Integer32(10));
        builder.branch(body);

        builder.switch_to(body);
        builder.binary(BinaryOperation::Subtract, counter, counter, Immediate::Integer32(1));
        builder.branch_if(counter, body, exit);

        builder.switch_to(exit);
        builder.ret(None);

        let cfg = ControlFlowGraph::new(&builder.build());
        assert_eq!(cfg.loop_depth(0), 0);
        assert_eq!(cfg.loop_depth(1), 1);
        assert_eq!(cfg.loop_depth(2), 0);
        assert!(cfg.is_reachable(2));
    }
}
