// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use anvil::{Attribute, RegClass, VarId};
use strum::AsRefStr;
use thiserror::Error;

/// A fatal lowering error. It aborts the affected procedure only;
/// other procedures of the same module are lowered independently.
#[derive(Debug, Clone, PartialEq, Error, AsRefStr)]
pub enum LowerError {
    #[error("{variable} in `{procedure}` is read without a reaching definition")]
    UnresolvedReference { procedure: String, variable: VarId },

    #[error("`{procedure}` needs {class} registers, but target `{target}` has none to allocate")]
    UnsupportedAllocation {
        procedure: String,
        target: String,
        class: RegClass,
    },

    #[error("{variable} in `{procedure}`: {reason}")]
    ConstraintConflict {
        procedure: String,
        variable: VarId,
        reason: ConstraintReason,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintReason {
    #[error("attribute `{first}` is incompatible with `{second}`")]
    IncompatibleAttributes { first: Attribute, second: Attribute },

    #[error("a `constant` variable is defined more than once")]
    RedefinedConstant,
}

/// A recoverable observation. Lowering proceeds; the caller decides
/// whether to surface it.
#[derive(Debug, Clone, PartialEq, Error, AsRefStr)]
pub enum LowerWarning {
    #[error("{variable} in `{procedure}` asked for a register but was placed on the stack")]
    SoftHintMiss { procedure: String, variable: VarId },
}
