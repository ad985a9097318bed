// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::{Display, Write};

use strum::IntoStaticStr;

use crate::{Value, VarId};

/// Identifies a basic block within its procedure. Block 0 is the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    id: usize,
}

impl BlockId {
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self { id }
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('b')?;
        self.id.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum BinaryOperation {
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Subtract,
    #[strum(serialize = "mul")]
    Multiply,
    #[strum(serialize = "div")]
    Divide,
    #[strum(serialize = "mod")]
    Modulo,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "shl")]
    ShiftLeft,
    #[strum(serialize = "shr")]
    ShiftRight,
    #[strum(serialize = "cmpeq")]
    CompareEqual,
    #[strum(serialize = "cmplt")]
    CompareLess,
}

impl Display for BinaryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(<&'static str>::from(self))
    }
}

/// One instruction of the intermediate language, with virtual-variable
/// operands. The storage-lowering pipeline never invents new virtual
/// variables; it only replaces these operands with physical locations.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Move {
        destination: VarId,
        source: Value,
    },

    Binary {
        operation: BinaryOperation,
        destination: VarId,
        lhs: Value,
        rhs: Value,
    },

    /// Materializes the storage address of `variable` into `destination`.
    AddressOf {
        destination: VarId,
        variable: VarId,
    },

    Load {
        destination: VarId,
        address: VarId,
        offset: i64,
    },

    Store {
        address: VarId,
        offset: i64,
        value: Value,
    },

    Call {
        target: String,
        arguments: Vec<Value>,
        result: Option<VarId>,
    },

    Branch {
        target: BlockId,
    },

    BranchIf {
        condition: VarId,
        then_target: BlockId,
        else_target: BlockId,
    },

    Return {
        value: Option<Value>,
    },
}

impl Instruction {
    /// The virtual variable this instruction defines, if any.
    #[must_use]
    pub fn destination(&self) -> Option<VarId> {
        match self {
            Self::Move { destination, .. } => Some(*destination),
            Self::Binary { destination, .. } => Some(*destination),
            Self::AddressOf { destination, .. } => Some(*destination),
            Self::Load { destination, .. } => Some(*destination),
            Self::Call { result, .. } => *result,
            Self::Store { .. } | Self::Branch { .. } | Self::BranchIf { .. } | Self::Return { .. } => None,
        }
    }

    /// All virtual variables this instruction reads, in operand order.
    #[must_use]
    pub fn source_variables(&self) -> Vec<VarId> {
        let mut sources = Vec::new();

        match self {
            Self::Move { source, .. } => {
                sources.extend(source.as_variable());
            }

            Self::Binary { lhs, rhs, .. } => {
                sources.extend(lhs.as_variable());
                sources.extend(rhs.as_variable());
            }

            Self::AddressOf { variable, .. } => {
                sources.push(*variable);
            }

            Self::Load { address, .. } => {
                sources.push(*address);
            }

            Self::Store { address, value, .. } => {
                sources.push(*address);
                sources.extend(value.as_variable());
            }

            Self::Call { arguments, .. } => {
                for argument in arguments {
                    sources.extend(argument.as_variable());
                }
            }

            Self::BranchIf { condition, .. } => {
                sources.push(*condition);
            }

            Self::Return { value } => {
                if let Some(value) = value {
                    sources.extend(value.as_variable());
                }
            }

            Self::Branch { .. } => (),
        }

        sources
    }

    /// A register-to-register copy, as (destination, source). These are
    /// the coalescing candidates of the interference graph.
    #[must_use]
    pub fn as_move_pair(&self) -> Option<(VarId, VarId)> {
        if let Self::Move { destination, source: Value::Variable(source) } = self {
            Some((*destination, *source))
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Branch { .. } | Self::BranchIf { .. } | Self::Return { .. })
    }

    /// Blocks this instruction may transfer control to. Empty for
    /// non-branches and for returns.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<BlockId> {
        match self {
            Self::Branch { target } => vec![*target],
            Self::BranchIf { then_target, else_target, .. } => vec![*then_target, *else_target],
            _ => Vec::new(),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Move { destination, source } => {
                write!(f, "{destination} = {source}")
            }

            Self::Binary { operation, destination, lhs, rhs } => {
                write!(f, "{destination} = {operation} {lhs}, {rhs}")
            }

            Self::AddressOf { destination, variable } => {
                write!(f, "{destination} = addr {variable}")
            }

            Self::Load { destination, address, offset } => {
                write!(f, "{destination} = load [{address} + {offset}]")
            }

            Self::Store { address, offset, value } => {
                write!(f, "store [{address} + {offset}], {value}")
            }

            Self::Call { target, arguments, result } => {
                if let Some(result) = result {
                    write!(f, "{result} = ")?;
                }
                write!(f, "call @{target}(")?;
                for (idx, argument) in arguments.iter().enumerate() {
                    if idx != 0 {
                        f.write_str(", ")?;
                    }
                    argument.fmt(f)?;
                }
                f.write_char(')')
            }

            Self::Branch { target } => {
                write!(f, "branch {target}")
            }

            Self::BranchIf { condition, then_target, else_target } => {
                write!(f, "branch-if {condition}, {then_target}, {else_target}")
            }

            Self::Return { value } => {
                f.write_str("return")?;
                if let Some(value) = value {
                    write!(f, " {value}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Immediate;

    #[test]
    fn move_from_variable_is_a_coalescing_candidate() {
        let instruction = Instruction::Move {
            destination: VarId::new(2),
            source: Value::Variable(VarId::new(1)),
        };

        assert_eq!(instruction.as_move_pair(), Some((VarId::new(2), VarId::new(1))));
    }

    #[test]
    fn move_from_immediate_is_not() {
        let instruction = Instruction::Move {
            destination: VarId::new(2),
            source: Value::Immediate(Immediate::Integer32(7)),
        };

        assert_eq!(instruction.as_move_pair(), None);
        assert_eq!(instruction.source_variables(), Vec::new());
    }
}
