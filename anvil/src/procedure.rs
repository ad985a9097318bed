// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use crate::{BlockId, Instruction, TypeDescriptor, Variable, VarId};

/// A straight-line instruction sequence. Control only enters at the
/// top; the last instruction is normally a terminator, and a block
/// without one falls through to the next block in layout order.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    id: BlockId,
    instructions: Vec<Instruction>,
}

impl Block {
    #[must_use]
    pub fn new(id: BlockId, instructions: Vec<Instruction>) -> Self {
        Self { id, instructions }
    }

    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

/// A procedure as produced by the upstream parser/typechecker: an
/// ordered sequence of basic blocks over virtual variables. This is the
/// unit of work of the storage-lowering pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    name: String,
    parameters: Vec<VarId>,
    return_type: Option<TypeDescriptor>,
    variables: Vec<Variable>,
    blocks: Vec<Block>,
}

impl Procedure {
    #[must_use]
    pub fn new(
        name: String,
        parameters: Vec<VarId>,
        return_type: Option<TypeDescriptor>,
        variables: Vec<Variable>,
        blocks: Vec<Block>,
    ) -> Self {
        Self {
            name,
            parameters,
            return_type,
            variables,
            blocks,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter variables, in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[VarId] {
        &self.parameters
    }

    #[must_use]
    pub const fn return_type(&self) -> Option<TypeDescriptor> {
        self.return_type
    }

    /// All declared variables, ordered by ascending id.
    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    #[must_use]
    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.number() as usize]
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Total number of program points, i.e. instructions across all
    /// blocks in layout order.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.blocks.iter().map(|block| block.instructions().len()).sum()
    }

    /// The global program point of the first instruction of each block,
    /// indexed by block position.
    #[must_use]
    pub fn block_start_points(&self) -> Vec<usize> {
        let mut starts = Vec::with_capacity(self.blocks.len());
        let mut point = 0;

        for block in &self.blocks {
            starts.push(point);
            point += block.instructions().len();
        }

        starts
    }

    /// Iterates every instruction with its global program point.
    pub fn program_points(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions().iter())
            .enumerate()
    }

    /// How many instructions define `variable`.
    #[must_use]
    pub fn definition_count(&self, variable: VarId) -> usize {
        let mut count = self
            .program_points()
            .filter(|(_, instruction)| instruction.destination() == Some(variable))
            .count();

        if self.parameters.contains(&variable) {
            count += 1;
        }

        count
    }
}

impl Display for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "procedure {}(", self.name)?;
        for (idx, parameter) in self.parameters.iter().enumerate() {
            if idx != 0 {
                f.write_str(", ")?;
            }
            self.variable(*parameter).fmt(f)?;
        }
        f.write_str(")")?;

        if let Some(return_type) = &self.return_type {
            write!(f, " -> {return_type}")?;
        }

        for block in &self.blocks {
            write!(f, "\n{}:", block.id())?;
            for instruction in block.instructions() {
                write!(f, "\n    {instruction}")?;
            }
        }

        f.write_str("\n")
    }
}

/// A compilation unit: the procedures of one input module. Procedures
/// are independent; a lowering failure in one never affects another.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    procedures: Vec<Procedure>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            procedures: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_procedure(&mut self, procedure: Procedure) {
        self.procedures.push(procedure);
    }

    #[must_use]
    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }
}
