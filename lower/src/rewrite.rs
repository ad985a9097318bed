// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::BTreeMap;
use std::fmt::Display;

use anvil::{BinaryOperation, BlockId, Immediate, Instruction, Procedure, RegClass, Value, VarId};

use crate::{Allocation, Location, PhysReg, TargetDescriptor};

/// An operand of the lowered instruction stream: every variable
/// reference has been replaced by a physical location.
#[derive(Debug, Clone, PartialEq)]
pub enum LoweredValue {
    Location(Location),
    Immediate(Immediate),
    Symbol(String),
}

impl Display for LoweredValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Location(location) => location.fmt(f),
            Self::Immediate(immediate) => immediate.fmt(f),
            Self::Symbol(name) => write!(f, "@{name}"),
        }
    }
}

/// The instruction stream handed to the downstream encoder. Shapes
/// mirror the input language; `Reload` and `Spill` are the only
/// instructions the rewriter invents, bracketing accesses to spilled
/// variables.
#[derive(Debug, Clone, PartialEq)]
pub enum LoweredInstruction {
    /// Load a spilled value from its frame slot into a scratch register.
    Reload { register: PhysReg, slot: Location },

    /// Store a scratch register back into a spilled variable's slot.
    Spill { register: PhysReg, slot: Location },

    Move {
        destination: Location,
        source: LoweredValue,
    },

    Binary {
        operation: BinaryOperation,
        destination: Location,
        lhs: LoweredValue,
        rhs: LoweredValue,
    },

    AddressOf {
        destination: Location,
        variable: Location,
    },

    Load {
        destination: Location,
        address: Location,
        offset: i64,
    },

    Store {
        address: Location,
        offset: i64,
        value: LoweredValue,
    },

    Call {
        target: String,
        arguments: Vec<LoweredValue>,
        result: Option<Location>,
    },

    Branch {
        target: BlockId,
    },

    BranchIf {
        condition: Location,
        then_target: BlockId,
        else_target: BlockId,
    },

    Return {
        value: Option<LoweredValue>,
    },
}

impl Display for LoweredInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reload { register, slot } => write!(f, "{register} = reload {slot}"),
            Self::Spill { register, slot } => write!(f, "spill {register}, {slot}"),
            Self::Move { destination, source } => write!(f, "{destination} = {source}"),
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
                f.write_str(")")
            }
            Self::Branch { target } => write!(f, "branch {target}"),
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

#[derive(Debug, Clone, PartialEq)]
pub struct LoweredBlock {
    id: BlockId,
    instructions: Vec<LoweredInstruction>,
}

impl LoweredBlock {
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub fn instructions(&self) -> &[LoweredInstruction] {
        &self.instructions
    }
}

/// Replaces every variable operand with its resolved location and
/// brackets spilled accesses with `Reload`/`Spill`, preserving
/// read-after-write order exactly as in the input program.
///
/// Calls and returns pass stack locations through untouched: moving
/// values into argument and return registers is the encoder's job,
/// guided by the calling-convention binding.
#[derive(Debug)]
pub struct OutputRewriter<'a> {
    procedure: &'a Procedure,
    target: &'a TargetDescriptor,
    allocation: &'a Allocation,
    locations: &'a BTreeMap<VarId, Location>,
}

impl<'a> OutputRewriter<'a> {
    #[must_use]
    pub fn new(
        procedure: &'a Procedure,
        target: &'a TargetDescriptor,
        allocation: &'a Allocation,
        locations: &'a BTreeMap<VarId, Location>,
    ) -> Self {
        Self {
            procedure,
            target,
            allocation,
            locations,
        }
    }

    #[must_use]
    pub fn rewrite(&self) -> Vec<LoweredBlock> {
        self.procedure
            .blocks()
            .iter()
            .map(|block| LoweredBlock {
                id: block.id(),
                instructions: {
                    let mut lowered = Vec::with_capacity(block.instructions().len());
                    for instruction in block.instructions() {
                        self.rewrite_instruction(instruction, &mut lowered);
                    }
                    lowered
                },
            })
            .collect()
    }

    fn rewrite_instruction(&self, instruction: &Instruction, out: &mut Vec<LoweredInstruction>) {
        let mut scratches = Scratches::new(self.target);

        match instruction {
            Instruction::Move { destination, source } => {
                let source = self.reload_value(source, &mut scratches, out);
                let destination = self.destination(*destination, &mut scratches);

                out.push(LoweredInstruction::Move { destination: destination.0, source });
                self.flush(destination, out);
            }

            Instruction::Binary { operation, destination, lhs, rhs } => {
                let lhs = self.reload_value(lhs, &mut scratches, out);
                let rhs = self.reload_value(rhs, &mut scratches, out);
                let destination = self.destination(*destination, &mut scratches);

                out.push(LoweredInstruction::Binary {
                    operation: *operation,
                    destination: destination.0,
                    lhs,
                    rhs,
                });
                self.flush(destination, out);
            }

            Instruction::AddressOf { destination, variable } => {
                // The operand is the slot itself, not its value, so it
                // is never reloaded.
                let variable = self.plain_location(*variable);
                let destination = self.destination(*destination, &mut scratches);

                out.push(LoweredInstruction::AddressOf { destination: destination.0, variable });
                self.flush(destination, out);
            }

            Instruction::Load { destination, address, offset } => {
                let address = self.reload_variable(*address, &mut scratches, out);
                let destination = self.destination(*destination, &mut scratches);

                out.push(LoweredInstruction::Load {
                    destination: destination.0,
                    address,
                    offset: *offset,
                });
                self.flush(destination, out);
            }

            Instruction::Store { address, offset, value } => {
                let address = self.reload_variable(*address, &mut scratches, out);
                let value = self.reload_value(value, &mut scratches, out);

                out.push(LoweredInstruction::Store {
                    address,
                    offset: *offset,
                    value,
                });
            }

            Instruction::Call { target, arguments, result } => {
                let arguments = arguments
                    .iter()
                    .map(|argument| self.plain_value(argument))
                    .collect();
                let result_location =
                    (*result).map(|result| self.destination(result, &mut scratches));

                out.push(LoweredInstruction::Call {
                    target: target.clone(),
                    arguments,
                    result: result_location.map(|(location, _)| location),
                });

                if let Some(destination) = result_location {
                    self.flush(destination, out);
                }
            }

            Instruction::Branch { target } => {
                out.push(LoweredInstruction::Branch { target: *target });
            }

            Instruction::BranchIf { condition, then_target, else_target } => {
                let condition = self.reload_variable(*condition, &mut scratches, out);

                out.push(LoweredInstruction::BranchIf {
                    condition,
                    then_target: *then_target,
                    else_target: *else_target,
                });
            }

            Instruction::Return { value } => {
                out.push(LoweredInstruction::Return {
                    value: value.as_ref().map(|value| self.plain_value(value)),
                });
            }
        }
    }

    /// The location of a variable as the allocator bound it, without
    /// any spill bracketing.
    fn plain_location(&self, variable: VarId) -> Location {
        self.locations[&variable]
    }

    fn plain_value(&self, value: &Value) -> LoweredValue {
        match value {
            Value::Variable(variable) => LoweredValue::Location(self.plain_location(*variable)),
            Value::Immediate(immediate) => LoweredValue::Immediate(*immediate),
            Value::Symbol(name) => LoweredValue::Symbol(name.clone()),
        }
    }

    /// Maps a read operand, reloading it into a scratch register first
    /// when the variable is spilled.
    fn reload_variable(
        &self,
        variable: VarId,
        scratches: &mut Scratches<'_>,
        out: &mut Vec<LoweredInstruction>,
    ) -> Location {
        if !self.allocation.is_spilled(variable) {
            return self.plain_location(variable);
        }

        let class = self.procedure.variable(variable).ty().class();
        let register = scratches.reserve(variable, class);
        let slot = self.plain_location(variable);

        if !scratches.already_loaded(variable) {
            out.push(LoweredInstruction::Reload { register, slot });
            scratches.mark_loaded(variable);
        }

        Location::Register(register)
    }

    fn reload_value(
        &self,
        value: &Value,
        scratches: &mut Scratches<'_>,
        out: &mut Vec<LoweredInstruction>,
    ) -> LoweredValue {
        match value {
            Value::Variable(variable) => {
                LoweredValue::Location(self.reload_variable(*variable, scratches, out))
            }
            Value::Immediate(immediate) => LoweredValue::Immediate(*immediate),
            Value::Symbol(name) => LoweredValue::Symbol(name.clone()),
        }
    }

    /// Maps a written operand. For a spilled destination the value is
    /// produced into a scratch register and `flush` stores it back.
    fn destination(
        &self,
        variable: VarId,
        scratches: &mut Scratches<'_>,
    ) -> (Location, Option<(PhysReg, Location)>) {
        if !self.allocation.is_spilled(variable) {
            return (self.plain_location(variable), None);
        }

        let class = self.procedure.variable(variable).ty().class();
        let register = scratches.reserve_for_write(variable, class);
        let slot = self.plain_location(variable);

        (Location::Register(register), Some((register, slot)))
    }

    fn flush(
        &self,
        destination: (Location, Option<(PhysReg, Location)>),
        out: &mut Vec<LoweredInstruction>,
    ) {
        if let Some((register, slot)) = destination.1 {
            out.push(LoweredInstruction::Spill { register, slot });
        }
    }
}

/// Hands out the per-class scratch registers of one instruction. A
/// variable keeps the same scratch for all its operand positions, so a
/// spilled read-modify-write round-trips through a single register.
#[derive(Debug)]
struct Scratches<'t> {
    target: &'t TargetDescriptor,
    assigned: BTreeMap<VarId, PhysReg>,
    loaded: Vec<VarId>,
    next_int: usize,
    next_float: usize,
    next_vector: usize,
}

impl<'t> Scratches<'t> {
    fn new(target: &'t TargetDescriptor) -> Self {
        Self {
            target,
            assigned: BTreeMap::new(),
            loaded: Vec::new(),
            next_int: 0,
            next_float: 0,
            next_vector: 0,
        }
    }

    fn reserve(&mut self, variable: VarId, class: RegClass) -> PhysReg {
        if let Some(register) = self.assigned.get(&variable) {
            return *register;
        }

        let pool = self.target.scratch_registers(class);
        let next = match class {
            RegClass::Int => &mut self.next_int,
            RegClass::Float => &mut self.next_float,
            RegClass::Vector => &mut self.next_vector,
        };

        // An instruction reads at most two spilled operands of one
        // class, and targets always reserve at least two scratches.
        let register = pool
            .get(*next)
            .copied()
            .unwrap_or_else(|| panic!("out of scratch registers for class {class}"));
        *next += 1;

        self.assigned.insert(variable, register);
        register
    }

    /// A scratch for a written operand. The value it held, if any, has
    /// been read by the instruction already, so falling back to the
    /// first pool register is safe once every scratch is handed out.
    fn reserve_for_write(&mut self, variable: VarId, class: RegClass) -> PhysReg {
        if let Some(register) = self.assigned.get(&variable) {
            return *register;
        }

        let pool = self.target.scratch_registers(class);

        let register = pool
            .iter()
            .copied()
            .find(|candidate| !self.assigned.values().any(|taken| taken == candidate))
            .or_else(|| pool.first().copied())
            .unwrap_or_else(|| panic!("no scratch registers for class {class}"));

        self.assigned.insert(variable, register);
        register
    }

    fn already_loaded(&self, variable: VarId) -> bool {
        self.loaded.contains(&variable)
    }

    fn mark_loaded(&mut self, variable: VarId) {
        self.loaded.push(variable);
    }
}
