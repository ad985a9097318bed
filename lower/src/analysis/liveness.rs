// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use log::debug;

use anvil::{Procedure, VarId};

use crate::LowerError;

use super::ControlFlowGraph;

/// A position in the linearized instruction sequence of a procedure.
///
/// Every instruction spans two points: a `before` point at which its
/// operands are read, and an `after` point at which its result is
/// written. This keeps a value that dies at an instruction from
/// interfering with the value that instruction defines, so the two may
/// share a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramPoint {
    index: usize,
}

impl ProgramPoint {
    #[must_use]
    pub const fn before(instruction: usize) -> Self {
        Self { index: instruction * 2 }
    }

    #[must_use]
    pub const fn after(instruction: usize) -> Self {
        Self { index: instruction * 2 + 1 }
    }

    /// The linearized index of the instruction this point belongs to.
    #[must_use]
    pub const fn instruction(&self) -> usize {
        self.index / 2
    }

    #[must_use]
    pub const fn is_after(&self) -> bool {
        self.index % 2 == 1
    }

    /// Dense index usable for point-keyed tables; a procedure has
    /// `2 × point_count` of these.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl Display for ProgramPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            self.instruction(),
            if self.is_after() { "-post" } else { "-pre" }
        )
    }
}

/// The set of program points where a variable's current value may
/// still be read, including the write point of each definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveRange {
    points: Vec<ProgramPoint>,
}

impl LiveRange {
    #[must_use]
    pub fn from_points(mut points: Vec<ProgramPoint>) -> Self {
        points.sort_unstable();
        points.dedup();
        Self { points }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn points(&self) -> &[ProgramPoint] {
        &self.points
    }

    #[must_use]
    pub fn first(&self) -> Option<ProgramPoint> {
        self.points.first().copied()
    }

    #[must_use]
    pub fn last(&self) -> Option<ProgramPoint> {
        self.points.last().copied()
    }

    #[must_use]
    pub fn contains(&self, point: ProgramPoint) -> bool {
        self.points.binary_search(&point).is_ok()
    }

    /// Whether both values are live at some common program point.
    #[must_use]
    pub fn overlaps(&self, other: &LiveRange) -> bool {
        let mut lhs = self.points.iter().peekable();
        let mut rhs = other.points.iter().peekable();

        while let (Some(&&a), Some(&&b)) = (lhs.peek(), rhs.peek()) {
            if a == b {
                return true;
            } else if a < b {
                lhs.next();
            } else {
                rhs.next();
            }
        }

        false
    }
}

/// Result of the backward liveness dataflow over one procedure.
#[derive(Debug)]
pub struct Liveness {
    ranges: BTreeMap<VarId, LiveRange>,
    live_at_point: Vec<Vec<VarId>>,
    crosses_call: BTreeSet<VarId>,
}

impl Liveness {
    /// Runs the dataflow to a fixed point and materializes per-variable
    /// live ranges. The result is independent of block visitation
    /// order; walking blocks in post-order converges fastest because a
    /// block's successors are processed before the block itself.
    pub fn analyze(procedure: &Procedure, cfg: &ControlFlowGraph) -> Result<Self, LowerError> {
        let analysis = BlockSets::compute(procedure);
        let (live_in, live_out) = analysis.fixed_point(cfg);

        Self::check_reaching_definitions(procedure, &live_in)?;

        let mut this = Self {
            ranges: BTreeMap::new(),
            live_at_point: vec![Vec::new(); procedure.point_count() * 2],
            crosses_call: BTreeSet::new(),
        };

        this.materialize(procedure, &live_out);
        this.find_call_crossings(procedure);
        this.dump_result();

        Ok(this)
    }

    #[must_use]
    pub fn range(&self, variable: VarId) -> Option<&LiveRange> {
        self.ranges.get(&variable)
    }

    /// All ranges, keyed by ascending variable id.
    #[must_use]
    pub fn ranges(&self) -> &BTreeMap<VarId, LiveRange> {
        &self.ranges
    }

    /// Variables live at `point`, ascending.
    #[must_use]
    pub fn live_at(&self, point: ProgramPoint) -> &[VarId] {
        &self.live_at_point[point.index()]
    }

    /// Whether the variable's value must survive at least one call.
    #[must_use]
    pub fn crosses_call(&self, variable: VarId) -> bool {
        self.crosses_call.contains(&variable)
    }

    fn check_reaching_definitions(
        procedure: &Procedure,
        live_in: &[BTreeSet<VarId>],
    ) -> Result<(), LowerError> {
        // A variable that is live into the entry block is read on some
        // path before any definition. Parameters are defined at entry.
        if let Some(entry) = live_in.first() {
            for variable in entry {
                if !procedure.parameters().contains(variable) {
                    return Err(LowerError::UnresolvedReference {
                        procedure: procedure.name().to_string(),
                        variable: *variable,
                    });
                }
            }
        }

        // Uses in blocks unreachable from entry are not seen by the
        // check above; a variable that is read but defined nowhere at
        // all is malformed wherever it appears.
        for (_, instruction) in procedure.program_points() {
            for variable in instruction.source_variables() {
                if procedure.definition_count(variable) == 0 {
                    return Err(LowerError::UnresolvedReference {
                        procedure: procedure.name().to_string(),
                        variable,
                    });
                }
            }
        }

        Ok(())
    }

    fn materialize(&mut self, procedure: &Procedure, live_out: &[BTreeSet<VarId>]) {
        let starts = procedure.block_start_points();
        let mut points: BTreeMap<VarId, Vec<ProgramPoint>> = BTreeMap::new();

        for (index, block) in procedure.blocks().iter().enumerate() {
            let mut live = live_out[index].clone();

            for (offset, instruction) in block.instructions().iter().enumerate().rev() {
                let instruction_index = starts[index] + offset;

                // Everything still needed afterwards is live across
                // this instruction's write point.
                for variable in &live {
                    points
                        .entry(*variable)
                        .or_default()
                        .push(ProgramPoint::after(instruction_index));
                }

                if let Some(destination) = instruction.destination() {
                    // A definition occupies its location at the write
                    // point, even if the value is never read.
                    points
                        .entry(destination)
                        .or_default()
                        .push(ProgramPoint::after(instruction_index));
                    live.remove(&destination);
                }

                for source in instruction.source_variables() {
                    live.insert(source);
                }

                for variable in &live {
                    points
                        .entry(*variable)
                        .or_default()
                        .push(ProgramPoint::before(instruction_index));
                }
            }
        }

        // Once defined, a `constant` keeps its value observable for
        // the rest of the procedure, so no later value may take over
        // its location.
        for variable in procedure.variables() {
            if !variable.attributes().is_constant() {
                continue;
            }

            let Some(existing) = points.get_mut(&variable.id()) else {
                continue;
            };

            let Some(&first) = existing.iter().min() else {
                continue;
            };

            for instruction in first.instruction()..procedure.point_count() {
                for point in [ProgramPoint::before(instruction), ProgramPoint::after(instruction)] {
                    if point >= first {
                        existing.push(point);
                    }
                }
            }
        }

        for (variable, points) in points {
            let range = LiveRange::from_points(points);

            for point in range.points() {
                self.live_at_point[point.index()].push(variable);
            }

            self.ranges.insert(variable, range);
        }

        for live in &mut self.live_at_point {
            live.sort_unstable();
        }
    }

    fn find_call_crossings(&mut self, procedure: &Procedure) {
        for (index, instruction) in procedure.program_points() {
            if !instruction.is_call() {
                continue;
            }

            for variable in &self.live_at_point[ProgramPoint::after(index).index()] {
                if instruction.destination() != Some(*variable) {
                    self.crosses_call.insert(*variable);
                }
            }
        }
    }

    #[allow(unused)]
    fn dump_result(&self) {
        for (variable, range) in &self.ranges {
            debug!(
                "{variable} is live over {} points, first={} last={}{}",
                range.points().len(),
                range.first().map(|p| p.to_string()).unwrap_or_default(),
                range.last().map(|p| p.to_string()).unwrap_or_default(),
                if self.crosses_call.contains(variable) {
                    " (crosses a call)"
                } else {
                    ""
                },
            );
        }
    }
}

/// Per-block `use`/`def` sets feeding the dataflow.
#[derive(Debug)]
struct BlockSets {
    uses: Vec<BTreeSet<VarId>>,
    defs: Vec<BTreeSet<VarId>>,
}

impl BlockSets {
    fn compute(procedure: &Procedure) -> Self {
        let mut uses = Vec::with_capacity(procedure.blocks().len());
        let mut defs = Vec::with_capacity(procedure.blocks().len());

        for block in procedure.blocks() {
            let mut block_uses = BTreeSet::new();
            let mut block_defs = BTreeSet::new();

            for instruction in block.instructions() {
                for source in instruction.source_variables() {
                    if !block_defs.contains(&source) {
                        block_uses.insert(source);
                    }
                }

                if let Some(destination) = instruction.destination() {
                    block_defs.insert(destination);
                }
            }

            uses.push(block_uses);
            defs.push(block_defs);
        }

        Self { uses, defs }
    }

    /// Iterates `live-out = ∪ live-in(successors)` and
    /// `live-in = use ∪ (live-out − def)` until nothing changes.
    fn fixed_point(&self, cfg: &ControlFlowGraph) -> (Vec<BTreeSet<VarId>>, Vec<BTreeSet<VarId>>) {
        let block_count = self.uses.len();
        let mut live_in = vec![BTreeSet::new(); block_count];
        let mut live_out = vec![BTreeSet::new(); block_count];

        // Post-order (reversed RPO) first, then any unreachable blocks
        // in layout order so they still get sets.
        let mut order: Vec<usize> = cfg.reverse_postorder().iter().rev().copied().collect();
        for block in 0..block_count {
            if !cfg.is_reachable(block) {
                order.push(block);
            }
        }

        let mut changed = true;
        while changed {
            changed = false;

            for &block in &order {
                let mut out = BTreeSet::new();
                for &successor in cfg.successors(block) {
                    out.extend(live_in[successor].iter().copied());
                }

                let mut input = self.uses[block].clone();
                for variable in &out {
                    if !self.defs[block].contains(variable) {
                        input.insert(*variable);
                    }
                }

                if out != live_out[block] || input != live_in[block] {
                    changed = true;
                    live_out[block] = out;
                    live_in[block] = input;
                }
            }
        }

        (live_in, live_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil::{BinaryOperation, Immediate, ProcedureBuilder, TypeDescriptor, Value};
    use pretty_assertions::assert_eq;

    #[test]
    fn dying_input_does_not_overlap_the_output() {
        let mut builder = ProcedureBuilder::new("reuse");
        let a = builder.declare(TypeDescriptor::int32());
        let b = builder.declare(TypeDescriptor::int32());

        builder.move_to(a, Immediate::Integer32(1));
        builder.binary(BinaryOperation::Add, b, a, Immediate::Integer32(2));
        builder.ret(Some(b.into()));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);
        let liveness = Liveness::analyze(&procedure, &cfg).unwrap();

        let a_range = liveness.range(a).unwrap();
        let b_range = liveness.range(b).unwrap();

        assert!(!a_range.overlaps(b_range));
        assert_eq!(a_range.last(), Some(ProgramPoint::before(1)));
        assert_eq!(b_range.first(), Some(ProgramPoint::after(1)));
    }

    #[test]
    fn use_without_definition_is_unresolved() {
        let mut builder = ProcedureBuilder::new("undefined");
        let ghost = builder.declare(TypeDescriptor::int32());
        builder.ret(Some(ghost.into()));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);

        let error = Liveness::analyze(&procedure, &cfg).unwrap_err();
        assert!(matches!(error, LowerError::UnresolvedReference { variable, .. } if variable == ghost));
    }

    #[test]
    fn undefined_variable_in_unreachable_block_is_still_unresolved() {
        let mut builder = ProcedureBuilder::new("dead_code");
        let ghost = builder.declare(TypeDescriptor::int32());
        let dead = builder.create_block();

        builder.ret(None);
        builder.switch_to(dead);
        builder.ret(Some(ghost.into()));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);
        assert!(!cfg.is_reachable(1));

        let error = Liveness::analyze(&procedure, &cfg).unwrap_err();
        assert!(matches!(error, LowerError::UnresolvedReference { variable, .. } if variable == ghost));
    }

    #[test]
    fn parameters_are_defined_at_entry() {
        let mut builder = ProcedureBuilder::new("params");
        let p = builder.parameter(TypeDescriptor::int64());
        builder.ret(Some(p.into()));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);

        let liveness = Liveness::analyze(&procedure, &cfg).unwrap();
        assert!(liveness.range(p).unwrap().contains(ProgramPoint::before(0)));
    }

    #[test]
    fn value_live_over_a_call_crosses_it() {
        let mut builder = ProcedureBuilder::new("crossing");
        let kept = builder.declare(TypeDescriptor::int64());
        let result = builder.declare(TypeDescriptor::int64());
        let sum = builder.declare(TypeDescriptor::int64());

        builder.move_to(kept, Immediate::Integer64(41));
        builder.call("other", Vec::new(), Some(result));
        builder.binary(BinaryOperation::Add, sum, kept, result);
        builder.ret(Some(sum.into()));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);
        let liveness = Liveness::analyze(&procedure, &cfg).unwrap();

        assert!(liveness.crosses_call(kept));
        assert!(!liveness.crosses_call(result));
        assert!(!liveness.crosses_call(sum));
    }

    #[test]
    fn overlaps_are_unaffected_by_block_layout_order() {
        fn diamond(else_first: bool) -> Procedure {
            let mut builder = ProcedureBuilder::new("diamond");
            let p = builder.parameter(TypeDescriptor::int32());
            let x = builder.declare(TypeDescriptor::int32());
            let y = builder.declare(TypeDescriptor::int32());
            let r = builder.declare(TypeDescriptor::int32());

            let (then_block, else_block) = if else_first {
                let e = builder.create_block();
                (builder.create_block(), e)
            } else {
                let t = builder.create_block();
                (t, builder.create_block())
            };
            let join = builder.create_block();

            builder.move_to(x, Immediate::Integer32(1));
            builder.move_to(y, Immediate::Integer32(2));
            builder.branch_if(p, then_block, else_block);

            builder.switch_to(then_block);
            builder.binary(BinaryOperation::Add, r, x, Immediate::Integer32(1));
            builder.branch(join);

            builder.switch_to(else_block);
            builder.binary(BinaryOperation::Add, r, y, Immediate::Integer32(2));
            builder.branch(join);

            builder.switch_to(join);
            builder.ret(Some(r.into()));

            builder.build()
        }

        let analyze = |procedure: &Procedure| {
            let cfg = ControlFlowGraph::new(procedure);
            Liveness::analyze(procedure, &cfg).unwrap()
        };

        let first = analyze(&diamond(false));
        let second = analyze(&diamond(true));

        // The two procedures visit their branches in opposite layout
        // order; which values may share storage must not change.
        let variables: Vec<VarId> = (0..4).map(VarId::new).collect();
        for (position, &a) in variables.iter().enumerate() {
            for &b in &variables[position + 1..] {
                assert_eq!(
                    first.range(a).unwrap().overlaps(first.range(b).unwrap()),
                    second.range(a).unwrap().overlaps(second.range(b).unwrap()),
                    "{a} and {b} disagree between layouts",
                );
            }
        }
    }

    #[test]
    fn result_is_stable_for_looping_control_flow() {
        let mut builder = ProcedureBuilder::new("loop");
        let n = builder.parameter(TypeDescriptor::int32());
        let body = builder.create_block();
        let exit = builder.create_block();

        builder.branch(body);
        builder.switch_to(body);
        builder.binary(BinaryOperation::Subtract, n, n, Immediate::Integer32(1));
        builder.branch_if(n, body, exit);
        builder.switch_to(exit);
        builder.ret(Some(Value::Variable(n)));

        let procedure = builder.build();
        let cfg = ControlFlowGraph::new(&procedure);
        let liveness = Liveness::analyze(&procedure, &cfg).unwrap();

        // n is live throughout the loop body and into the exit block.
        let range = liveness.range(n).unwrap();
        assert!(range.contains(ProgramPoint::before(0)));
        assert!(range.contains(ProgramPoint::before(1)));
        assert!(range.contains(ProgramPoint::before(3)));
    }
}
