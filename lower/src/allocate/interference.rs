// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use anvil::{Procedure, VarId};

use crate::{Liveness, ProgramPoint};

/// The "cannot share a location" relation between variables, derived
/// from overlapping live ranges. Nodes live in an arena ordered by
/// ascending variable id; edges are adjacency sets over node indices,
/// so the cyclic structure needs no linked nodes.
#[derive(Debug)]
pub struct InterferenceGraph {
    nodes: Vec<VarId>,
    index_of: BTreeMap<VarId, usize>,
    adjacency: Vec<BTreeSet<usize>>,
    moves: Vec<(usize, usize)>,
}

impl InterferenceGraph {
    /// Builds the graph over `eligible` (the variables that take part
    /// in coloring). Two variables interfere when they are live at a
    /// common program point; the two ends of a direct move that only
    /// meet at the move itself become a coalescing candidate instead.
    #[must_use]
    pub fn build(procedure: &Procedure, liveness: &Liveness, eligible: &BTreeSet<VarId>) -> Self {
        let nodes: Vec<VarId> = eligible.iter().copied().collect();
        let index_of: BTreeMap<VarId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, variable)| (*variable, index))
            .collect();

        let mut this = Self {
            adjacency: vec![BTreeSet::new(); nodes.len()],
            moves: Vec::new(),
            nodes,
            index_of,
        };

        for instruction in 0..procedure.point_count() {
            for point in [ProgramPoint::before(instruction), ProgramPoint::after(instruction)] {
                let live = liveness.live_at(point);

                for (position, a) in live.iter().enumerate() {
                    let Some(&a) = this.index_of.get(a) else { continue };

                    for b in &live[position + 1..] {
                        let Some(&b) = this.index_of.get(b) else { continue };
                        this.add_edge(a, b);
                    }
                }
            }
        }

        this.separate_move_candidates(procedure, liveness);
        this.dump();

        this
    }

    fn separate_move_candidates(&mut self, procedure: &Procedure, liveness: &Liveness) {
        for (_, instruction) in procedure.program_points() {
            let Some((destination, source)) = instruction.as_move_pair() else {
                continue;
            };

            if destination == source {
                continue;
            }

            let (Some(&dst), Some(&src)) = (
                self.index_of.get(&destination),
                self.index_of.get(&source),
            ) else {
                continue;
            };

            let (Some(dst_range), Some(src_range)) =
                (liveness.range(destination), liveness.range(source))
            else {
                continue;
            };

            // The copied value dies at the copy's read point and the
            // destination is born at its write point, so a benign copy
            // shows no overlap at all. If the ranges do meet, the two
            // values genuinely interfere and must not be merged.
            if dst_range.overlaps(src_range) {
                continue;
            }

            let candidate = (dst.min(src), dst.max(src));
            if !self.moves.contains(&candidate) {
                self.moves.push(candidate);
            }
        }

        self.moves.sort_unstable();
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }

        self.adjacency[a].insert(b);
        self.adjacency[b].insert(a);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn variable(&self, node: usize) -> VarId {
        self.nodes[node]
    }

    #[must_use]
    pub fn node_of(&self, variable: VarId) -> Option<usize> {
        self.index_of.get(&variable).copied()
    }

    #[must_use]
    pub fn neighbors(&self, node: usize) -> &BTreeSet<usize> {
        &self.adjacency[node]
    }

    #[must_use]
    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }

    #[must_use]
    pub fn interferes(&self, a: VarId, b: VarId) -> bool {
        let (Some(&a), Some(&b)) = (self.index_of.get(&a), self.index_of.get(&b)) else {
            return false;
        };

        self.adjacency[a].contains(&b)
    }

    /// Coalescing candidates as node index pairs, deterministic order.
    #[must_use]
    pub fn move_candidates(&self) -> &[(usize, usize)] {
        &self.moves
    }

    /// A mutable copy of the adjacency sets, for the allocator to
    /// contract and simplify without losing the original graph.
    #[must_use]
    pub fn adjacency_copy(&self) -> Vec<BTreeSet<usize>> {
        self.adjacency.clone()
    }

    #[allow(unused)]
    fn dump(&self) {
        debug!("Interference graph ({} nodes):", self.nodes.len());
        for (index, variable) in self.nodes.iter().enumerate() {
            let neighbors: Vec<VarId> = self.adjacency[index]
                .iter()
                .map(|&n| self.nodes[n])
                .collect();
            debug!("    {variable} interferes with {neighbors:?}");
        }
        debug!("    move candidates: {:?}", self.moves);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControlFlowGraph;
    use anvil::{BinaryOperation, Immediate, ProcedureBuilder, TypeDescriptor};

    fn eligible(procedure: &Procedure) -> BTreeSet<VarId> {
        procedure.variables().iter().map(|v| v.id()).collect()
    }

    #[test]
    fn simultaneously_live_variables_interfere() {
        let mut builder = ProcedureBuilder::new("overlap");
        let a = builder.declare(TypeDescriptor::int32());
        let b = builder.declare(TypeDescriptor::int32());
        let c = builder.declare(TypeDescriptor::int32());

        builder.move_to(a, Immediate::Integer32(1));
        builder.move_to(b, Immediate::Integer32(2));
        builder.binary(BinaryOperation::Add, c, a, b);
        builder.ret(Some(c.into()));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);
        let liveness = Liveness::analyze(&procedure, &cfg).unwrap();
        let graph = InterferenceGraph::build(&procedure, &liveness, &eligible(&procedure));

        assert!(graph.interferes(a, b));
        assert!(!graph.interferes(a, c));
        assert!(!graph.interferes(a, a));
    }

    #[test]
    fn a_copy_with_disjoint_lifetimes_becomes_a_candidate() {
        let mut builder = ProcedureBuilder::new("copy");
        let a = builder.declare(TypeDescriptor::int32());
        let b = builder.declare(TypeDescriptor::int32());

        builder.move_to(a, Immediate::Integer32(1));
        builder.move_to(b, a);
        builder.ret(Some(b.into()));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);
        let liveness = Liveness::analyze(&procedure, &cfg).unwrap();
        let graph = InterferenceGraph::build(&procedure, &liveness, &eligible(&procedure));

        assert!(!graph.interferes(a, b));
        assert_eq!(graph.move_candidates().len(), 1);
    }
}
