// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use anvil::{Attribute, Procedure, VarId, Variable};

use crate::{
    ConstraintReason, ControlFlowGraph, Liveness, LowerError, LowerWarning, PhysReg,
    TargetDescriptor,
};

use super::InterferenceGraph;

/// What the allocator decided for every variable of one procedure:
/// a register, membership of the spill-slot area, or membership of the
/// local-variable area (pinned). Byte offsets for the latter two are
/// fixed by the stack frame builder.
#[derive(Debug)]
pub struct Allocation {
    registers: BTreeMap<VarId, PhysReg>,
    spilled: Vec<VarId>,
    pinned: Vec<VarId>,
    used_callee_saved: Vec<PhysReg>,
    warnings: Vec<LowerWarning>,
}

impl Allocation {
    #[must_use]
    pub fn register_of(&self, variable: VarId) -> Option<PhysReg> {
        self.registers.get(&variable).copied()
    }

    #[must_use]
    pub fn registers(&self) -> &BTreeMap<VarId, PhysReg> {
        &self.registers
    }

    /// Variables demoted to a spill slot under register pressure,
    /// ascending by id.
    #[must_use]
    pub fn spilled(&self) -> &[VarId] {
        &self.spilled
    }

    #[must_use]
    pub fn is_spilled(&self, variable: VarId) -> bool {
        self.spilled.binary_search(&variable).is_ok()
    }

    /// Variables pinned to the local-variable area before coloring,
    /// ascending by id.
    #[must_use]
    pub fn pinned(&self) -> &[VarId] {
        &self.pinned
    }

    /// Callee-saved registers the coloring actually used; the frame
    /// builder reserves save space for exactly these.
    #[must_use]
    pub fn used_callee_saved(&self) -> &[PhysReg] {
        &self.used_callee_saved
    }

    #[must_use]
    pub fn warnings(&self) -> &[LowerWarning] {
        &self.warnings
    }
}

/// Graph-coloring register allocator with conservative coalescing and
/// spilling, in the Chaitin tradition: simplify low-degree nodes onto a
/// stack, demote the cheapest node when none qualifies, then color in
/// reverse removal order.
#[derive(Debug)]
pub struct Allocator<'a> {
    procedure: &'a Procedure,
    target: &'a TargetDescriptor,
    cfg: &'a ControlFlowGraph,
    liveness: &'a Liveness,
    block_of_point: Vec<usize>,
    warnings: Vec<LowerWarning>,
}

impl<'a> Allocator<'a> {
    pub fn run(
        procedure: &'a Procedure,
        target: &'a TargetDescriptor,
        cfg: &'a ControlFlowGraph,
        liveness: &'a Liveness,
    ) -> Result<Allocation, LowerError> {
        let mut block_of_point = Vec::with_capacity(procedure.point_count());
        for (index, block) in procedure.blocks().iter().enumerate() {
            block_of_point.extend(std::iter::repeat(index).take(block.instructions().len()));
        }

        let mut this = Self {
            procedure,
            target,
            cfg,
            liveness,
            block_of_point,
            warnings: Vec::new(),
        };

        this.validate_attributes()?;

        let pinned = this.pin_variables();
        let eligible: BTreeSet<VarId> = procedure
            .variables()
            .iter()
            .map(Variable::id)
            .filter(|id| !pinned.contains(id))
            .collect();

        this.check_register_support(&eligible)?;

        let graph = InterferenceGraph::build(procedure, liveness, &eligible);
        let (registers, spilled) = this.color(&graph);

        let used_callee_saved: Vec<PhysReg> = registers
            .values()
            .filter(|register| target.is_callee_saved(**register))
            .copied()
            .collect::<BTreeSet<PhysReg>>()
            .into_iter()
            .collect();

        Ok(Allocation {
            registers,
            spilled,
            pinned: pinned.into_iter().collect(),
            used_callee_saved,
            warnings: this.warnings,
        })
    }

    fn validate_attributes(&self) -> Result<(), LowerError> {
        for variable in self.procedure.variables() {
            let attributes = variable.attributes();

            if attributes.has_register_hint() && attributes.is_stack_forced() {
                return Err(LowerError::ConstraintConflict {
                    procedure: self.procedure.name().to_string(),
                    variable: variable.id(),
                    reason: ConstraintReason::IncompatibleAttributes {
                        first: Attribute::Register,
                        second: Attribute::Stack,
                    },
                });
            }

            if attributes.is_constant() && self.procedure.definition_count(variable.id()) > 1 {
                return Err(LowerError::ConstraintConflict {
                    procedure: self.procedure.name().to_string(),
                    variable: variable.id(),
                    reason: ConstraintReason::RedefinedConstant,
                });
            }
        }

        Ok(())
    }

    /// Decides, before coloring starts, which variables can never live
    /// in a register.
    fn pin_variables(&mut self) -> BTreeSet<VarId> {
        let mut pinned = BTreeSet::new();

        for variable in self.procedure.variables() {
            let mut keep_off_registers = variable.is_address_taken();

            for attribute in variable.attributes().iter() {
                keep_off_registers |= match attribute {
                    Attribute::Stack | Attribute::Volatile => true,
                    Attribute::Register | Attribute::Align(_) | Attribute::Constant => false,
                };
            }

            if let Some(width) = self.target.register_width(variable.ty().class()) {
                keep_off_registers |= variable.ty().width() > width;
            }

            if keep_off_registers {
                if variable.attributes().has_register_hint() {
                    self.soft_hint_miss(variable.id());
                }

                pinned.insert(variable.id());
            }
        }

        pinned
    }

    fn check_register_support(&self, eligible: &BTreeSet<VarId>) -> Result<(), LowerError> {
        for &variable in eligible {
            let class = self.procedure.variable(variable).ty().class();

            if self.target.allocatable_count(class) == 0 {
                debug!("{variable} needs {class} registers which {} lacks", self.target.name());

                return Err(LowerError::UnsupportedAllocation {
                    procedure: self.procedure.name().to_string(),
                    target: self.target.name().to_string(),
                    class,
                });
            }
        }

        Ok(())
    }

    fn color(&mut self, graph: &InterferenceGraph) -> (BTreeMap<VarId, PhysReg>, Vec<VarId>) {
        let node_count = graph.len();
        let mut adjacency = graph.adjacency_copy();
        let mut members: Vec<Vec<VarId>> = (0..node_count)
            .map(|node| vec![graph.variable(node)])
            .collect();
        let mut alias: Vec<usize> = (0..node_count).collect();
        let mut alive: BTreeSet<usize> = (0..node_count).collect();

        self.coalesce(graph, &mut adjacency, &mut members, &mut alias, &mut alive);

        // The contracted graph as the select phase needs it; simplify
        // destroys the working copy below.
        let select_adjacency = adjacency.clone();

        let weights: Vec<f64> = (0..node_count)
            .map(|node| self.weighted_access_count(&members[node]))
            .collect();

        let mut stack = Vec::new();
        let mut spilled_nodes = Vec::new();

        while !alive.is_empty() {
            let simplifiable = alive
                .iter()
                .filter(|&&node| adjacency[node].len() < self.color_count(graph, node))
                .min_by_key(|&&node| (adjacency[node].len(), graph.variable(node)))
                .copied();

            if let Some(node) = simplifiable {
                Self::detach(&mut adjacency, &mut alive, node);
                stack.push(node);
                continue;
            }

            // Everything left has significant degree; demote the node
            // with the lowest spill cost. Ties go to the lowest
            // variable id, i.e. declaration order.
            let Some(victim) = alive
                .iter()
                .copied()
                .min_by(|&x, &y| {
                    let x_cost = Self::spill_cost(weights[x], &adjacency[x]);
                    let y_cost = Self::spill_cost(weights[y], &adjacency[y]);

                    x_cost
                        .total_cmp(&y_cost)
                        .then_with(|| graph.variable(x).cmp(&graph.variable(y)))
                })
            else {
                break;
            };

            debug!("Spilling node of {} under register pressure", graph.variable(victim));
            Self::detach(&mut adjacency, &mut alive, victim);
            spilled_nodes.push(victim);
        }

        // Reinsert in reverse removal order, taking the lowest-numbered
        // register not used by an already-colored neighbor.
        let mut colors: BTreeMap<usize, PhysReg> = BTreeMap::new();

        while let Some(node) = stack.pop() {
            let class = self
                .procedure
                .variable(graph.variable(node))
                .ty()
                .class();

            let crossing = members[node]
                .iter()
                .any(|&member| self.liveness.crosses_call(member));

            let taken: BTreeSet<PhysReg> = select_adjacency[node]
                .iter()
                .filter_map(|neighbor| colors.get(neighbor))
                .copied()
                .collect();

            let color = self
                .target
                .allocatable(class)
                .into_iter()
                .filter(|register| !crossing || self.target.is_callee_saved(*register))
                .find(|register| !taken.contains(register));

            match color {
                Some(register) => {
                    colors.insert(node, register);
                }

                // Can only happen for call-crossing values once every
                // compatible callee-saved register is taken.
                None => spilled_nodes.push(node),
            }
        }

        let mut registers = BTreeMap::new();
        for (node, register) in &colors {
            for &member in &members[*node] {
                registers.insert(member, *register);
            }
        }

        let mut spilled = Vec::new();
        for node in spilled_nodes {
            for &member in &members[node] {
                if self.procedure.variable(member).attributes().has_register_hint() {
                    self.soft_hint_miss(member);
                }

                spilled.push(member);
            }
        }
        spilled.sort_unstable();

        (registers, spilled)
    }

    /// Merges non-interfering move pairs while the merged node is
    /// guaranteed to stay colorable (Briggs: fewer significant
    /// neighbors than there are colors).
    fn coalesce(
        &mut self,
        graph: &InterferenceGraph,
        adjacency: &mut [BTreeSet<usize>],
        members: &mut [Vec<VarId>],
        alias: &mut [usize],
        alive: &mut BTreeSet<usize>,
    ) {
        for &(x, y) in graph.move_candidates() {
            let a = Self::resolve(alias, x).min(Self::resolve(alias, y));
            let b = Self::resolve(alias, x).max(Self::resolve(alias, y));

            if a == b || adjacency[a].contains(&b) {
                continue;
            }

            let a_class = self.procedure.variable(graph.variable(a)).ty().class();
            let b_class = self.procedure.variable(graph.variable(b)).ty().class();
            if a_class != b_class {
                continue;
            }

            let colors = self.target.allocatable_count(a_class);
            let significant = adjacency[a]
                .union(&adjacency[b])
                .filter(|&&neighbor| adjacency[neighbor].len() >= colors)
                .count();

            if significant >= colors {
                continue;
            }

            debug!(
                "Coalescing {} into {}",
                graph.variable(b),
                graph.variable(a)
            );

            for neighbor in adjacency[b].clone() {
                adjacency[neighbor].remove(&b);

                if neighbor != a {
                    adjacency[neighbor].insert(a);
                    adjacency[a].insert(neighbor);
                }
            }
            adjacency[b].clear();

            let moved = std::mem::take(&mut members[b]);
            members[a].extend(moved);
            members[a].sort_unstable();

            alias[b] = a;
            alive.remove(&b);
        }
    }

    fn resolve(alias: &[usize], mut node: usize) -> usize {
        while alias[node] != node {
            node = alias[node];
        }
        node
    }

    fn detach(adjacency: &mut [BTreeSet<usize>], alive: &mut BTreeSet<usize>, node: usize) {
        for neighbor in adjacency[node].clone() {
            adjacency[neighbor].remove(&node);
        }
        adjacency[node].clear();
        alive.remove(&node);
    }

    fn color_count(&self, graph: &InterferenceGraph, node: usize) -> usize {
        let class = self.procedure.variable(graph.variable(node)).ty().class();
        self.target.allocatable_count(class)
    }

    /// Use/def occurrences, each weighted by 2 per enclosing loop
    /// nesting level of the instruction's block.
    fn weighted_access_count(&self, members: &[VarId]) -> f64 {
        let mut total = 0.0;
        let mut hinted = false;

        for &member in members {
            hinted |= self
                .procedure
                .variable(member)
                .attributes()
                .has_register_hint();

            for (index, instruction) in self.procedure.program_points() {
                let depth = self.cfg.loop_depth(self.block_of_point[index]).min(32);
                let weight = (1u64 << depth) as f64;

                let mut occurrences = instruction
                    .source_variables()
                    .iter()
                    .filter(|&&source| source == member)
                    .count();

                if instruction.destination() == Some(member) {
                    occurrences += 1;
                }

                total += occurrences as f64 * weight;
            }
        }

        // A register hint raises the node's priority: it becomes the
        // least attractive spill victim.
        if hinted {
            total *= 8.0;
        }

        total
    }

    fn spill_cost(weight: f64, neighbors: &BTreeSet<usize>) -> f64 {
        weight / neighbors.len().max(1) as f64
    }

    fn soft_hint_miss(&mut self, variable: VarId) {
        let warning = LowerWarning::SoftHintMiss {
            procedure: self.procedure.name().to_string(),
            variable,
        };

        warn!("{warning}");
        self.warnings.push(warning);
    }
}
