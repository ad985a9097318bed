// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod cfg;
mod liveness;

pub use self::{
    cfg::ControlFlowGraph,
    liveness::{LiveRange, Liveness, ProgramPoint},
};
