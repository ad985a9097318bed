// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::BTreeMap;
use std::fmt::Display;

use log::{debug, error};

use anvil::{Module, Procedure, VarId};

use crate::{
    abi::{outgoing_argument_bytes, AbiBinding},
    Allocation, Allocator, ControlFlowGraph, DebugMap, Liveness, Location, LowerError,
    LowerWarning, OutputRewriter, StackFrame, StackFrameBuilder, TargetDescriptor,
};

use crate::rewrite::LoweredBlock;

/// The downstream encoder's view of one successfully lowered
/// procedure: the rewritten instruction stream, the finished frame,
/// and the calling-convention binding.
#[derive(Debug)]
pub struct LoweredProcedure {
    name: String,
    blocks: Vec<LoweredBlock>,
    frame: StackFrame,
    abi: AbiBinding,
}

impl LoweredProcedure {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn blocks(&self) -> &[LoweredBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn frame(&self) -> &StackFrame {
        &self.frame
    }

    #[must_use]
    pub fn abi(&self) -> &AbiBinding {
        &self.abi
    }
}

impl Display for LoweredProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "procedure {}", self.name)?;
        write!(f, "{}", self.frame)?;

        for block in &self.blocks {
            writeln!(f, "{}:", block.id())?;
            for instruction in block.instructions() {
                writeln!(f, "    {instruction}")?;
            }
        }

        Ok(())
    }
}

/// Everything one procedure's pipeline run produced.
#[derive(Debug)]
pub struct ProcedureLowering {
    procedure: LoweredProcedure,
    debug_map: DebugMap,
    warnings: Vec<LowerWarning>,
}

impl ProcedureLowering {
    #[must_use]
    pub fn procedure(&self) -> &LoweredProcedure {
        &self.procedure
    }

    #[must_use]
    pub fn debug_map(&self) -> &DebugMap {
        &self.debug_map
    }

    #[must_use]
    pub fn warnings(&self) -> &[LowerWarning] {
        &self.warnings
    }
}

/// Runs the full pipeline over one procedure: liveness, interference,
/// allocation, frame layout, ABI binding, output rewriting, and the
/// debug map. Nothing is emitted when any stage fails.
pub fn lower_procedure(
    procedure: &Procedure,
    target: &TargetDescriptor,
) -> Result<ProcedureLowering, LowerError> {
    debug!("Lowering `{}` for target `{}`", procedure.name(), target.name());

    let cfg = ControlFlowGraph::new(procedure);
    cfg.dump();

    let liveness = Liveness::analyze(procedure, &cfg)?;
    let allocation = Allocator::run(procedure, target, &cfg, &liveness)?;
    let abi = AbiBinding::lower(procedure, target)?;

    let outgoing = outgoing_argument_bytes(procedure, target);
    let frame = StackFrameBuilder::new(target).lay_out(procedure, &allocation, outgoing);
    debug!("{frame}");

    let locations = resolve_locations(procedure, &allocation, &frame);
    let blocks = OutputRewriter::new(procedure, target, &allocation, &locations).rewrite();
    let debug_map = DebugMap::emit(procedure, &locations);

    Ok(ProcedureLowering {
        procedure: LoweredProcedure {
            name: procedure.name().to_string(),
            blocks,
            frame,
            abi,
        },
        debug_map,
        warnings: allocation.warnings().to_vec(),
    })
}

/// Combines the allocator's register choices with the frame builder's
/// byte offsets into the single location each variable is bound to.
fn resolve_locations(
    procedure: &Procedure,
    allocation: &Allocation,
    frame: &StackFrame,
) -> BTreeMap<VarId, Location> {
    let mut locations = BTreeMap::new();

    for (variable, register) in allocation.registers() {
        locations.insert(*variable, Location::Register(*register));
    }

    for &variable in allocation.pinned().iter().chain(allocation.spilled()) {
        let offset = frame
            .offset_of(variable)
            .unwrap_or_else(|| panic!("{variable} has no frame slot"));

        locations.insert(
            variable,
            Location::Stack {
                offset,
                size: procedure.variable(variable).ty().width().max(1),
            },
        );
    }

    locations
}

/// A procedure the pipeline had to give up on, and why.
#[derive(Debug)]
pub struct ProcedureFailure {
    procedure: String,
    error: LowerError,
}

impl ProcedureFailure {
    #[must_use]
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    #[must_use]
    pub fn error(&self) -> &LowerError {
        &self.error
    }
}

/// Per-module outcome: lowered procedures and per-procedure failures.
#[derive(Debug, Default)]
pub struct ModuleLowering {
    lowered: Vec<ProcedureLowering>,
    failures: Vec<ProcedureFailure>,
}

impl ModuleLowering {
    #[must_use]
    pub fn lowered(&self) -> &[ProcedureLowering] {
        &self.lowered
    }

    #[must_use]
    pub fn failures(&self) -> &[ProcedureFailure] {
        &self.failures
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Lowers every procedure of the module in declaration order.
/// Procedures are independent units of work: a fatal error aborts only
/// the procedure it occurred in.
#[must_use]
pub fn lower_module(module: &Module, target: &TargetDescriptor) -> ModuleLowering {
    let mut result = ModuleLowering::default();

    for procedure in module.procedures() {
        match lower_procedure(procedure, target) {
            Ok(lowering) => result.lowered.push(lowering),

            Err(lowering_error) => {
                error!("Lowering `{}` failed: {lowering_error}", procedure.name());

                result.failures.push(ProcedureFailure {
                    procedure: procedure.name().to_string(),
                    error: lowering_error,
                });
            }
        }
    }

    result
}
