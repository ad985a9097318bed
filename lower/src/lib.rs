// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

#![deny(elided_lifetimes_in_paths)]

mod abi;
mod allocate;
mod analysis;
mod debug_map;
mod error;
mod frame;
mod location;
mod pipeline;
mod rewrite;
mod target;

pub use self::{
    abi::{outgoing_argument_bytes, AbiBinding, ParameterBinding, ReturnPart},
    allocate::{Allocation, Allocator, InterferenceGraph},
    analysis::{ControlFlowGraph, LiveRange, Liveness, ProgramPoint},
    debug_map::{DebugMap, DebugMapEntry},
    error::{ConstraintReason, LowerError, LowerWarning},
    frame::{StackFrame, StackFrameBuilder},
    location::Location,
    pipeline::{
        lower_module, lower_procedure, LoweredProcedure, ModuleLowering, ProcedureFailure,
        ProcedureLowering,
    },
    rewrite::{LoweredBlock, LoweredInstruction, LoweredValue, OutputRewriter},
    target::{PhysReg, RegisterClassInfo, TargetDescriptor, TargetError},
};
