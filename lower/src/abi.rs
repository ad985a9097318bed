// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;
use std::ops::Range;

use log::debug;

use anvil::{Immediate, Instruction, Procedure, RegClass, Value, VarId};

use crate::{Location, LowerError, PhysReg, TargetDescriptor};

/// Where one parameter arrives when the procedure is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    variable: VarId,
    location: Location,
}

impl ParameterBinding {
    #[must_use]
    pub const fn variable(&self) -> VarId {
        self.variable
    }

    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }
}

/// One piece of the return value: the byte range of the value it
/// covers and the location that carries it. A value wider than one
/// register is split over consecutive return registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnPart {
    bytes: Range<u32>,
    location: Location,
}

impl ReturnPart {
    #[must_use]
    pub fn bytes(&self) -> Range<u32> {
        self.bytes.clone()
    }

    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }
}

/// The procedure's signature mapped onto the target's calling
/// convention: per-parameter locations and the ordered return parts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AbiBinding {
    parameters: Vec<ParameterBinding>,
    return_parts: Vec<ReturnPart>,
}

impl AbiBinding {
    /// Classifies every parameter and the return value of `procedure`
    /// against the target's convention. Parameters take the next free
    /// convention register of their class in declaration order and
    /// overflow to the outgoing-parameter stack area in order.
    pub fn lower(procedure: &Procedure, target: &TargetDescriptor) -> Result<Self, LowerError> {
        let mut assigner = ArgumentAssigner::new(target);
        let mut parameters = Vec::with_capacity(procedure.parameters().len());

        for &parameter in procedure.parameters() {
            let ty = procedure.variable(parameter).ty();
            let location = assigner.assign(ty.class(), ty.width(), ty.alignment());

            debug!("Parameter {parameter} of `{}` arrives in {location}", procedure.name());

            parameters.push(ParameterBinding {
                variable: parameter,
                location,
            });
        }

        let mut return_parts = Vec::new();

        if let Some(return_type) = procedure.return_type() {
            let class = return_type.class();

            let return_registers: Vec<u32> = target
                .class(class)
                .map(|info| info.return_registers().to_vec())
                .unwrap_or_default();

            let register_width = target.register_width(class).unwrap_or(0);

            let unsupported = || LowerError::UnsupportedAllocation {
                procedure: procedure.name().to_string(),
                target: target.name().to_string(),
                class,
            };

            if return_registers.is_empty() || register_width == 0 {
                return Err(unsupported());
            }

            let parts = return_type.width().div_ceil(register_width) as usize;
            if parts > return_registers.len() {
                return Err(unsupported());
            }

            for part in 0..parts {
                let begin = part as u32 * register_width;
                let end = (begin + register_width).min(return_type.width());

                return_parts.push(ReturnPart {
                    bytes: begin..end,
                    location: Location::Register(PhysReg::new(class, return_registers[part])),
                });
            }
        }

        Ok(Self {
            parameters,
            return_parts,
        })
    }

    #[must_use]
    pub fn parameters(&self) -> &[ParameterBinding] {
        &self.parameters
    }

    #[must_use]
    pub fn return_parts(&self) -> &[ReturnPart] {
        &self.return_parts
    }
}

impl Display for AbiBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for binding in &self.parameters {
            writeln!(f, "parameter {} -> {}", binding.variable, binding.location)?;
        }

        for part in &self.return_parts {
            writeln!(
                f,
                "return bytes {}..{} -> {}",
                part.bytes.start, part.bytes.end, part.location
            )?;
        }

        Ok(())
    }
}

/// Bytes of outgoing-parameter stack area the procedure needs: the
/// largest stack overflow over all calls it makes.
#[must_use]
pub fn outgoing_argument_bytes(procedure: &Procedure, target: &TargetDescriptor) -> u32 {
    let mut largest = 0;

    for (_, instruction) in procedure.program_points() {
        let Instruction::Call { arguments, .. } = instruction else {
            continue;
        };

        let mut assigner = ArgumentAssigner::new(target);

        for argument in arguments {
            let (class, width, alignment) = classify_value(procedure, argument, target);
            assigner.assign(class, width, alignment);
        }

        largest = largest.max(assigner.stack_bytes());
    }

    largest
}

fn classify_value(
    procedure: &Procedure,
    value: &Value,
    target: &TargetDescriptor,
) -> (RegClass, u32, u32) {
    match value {
        Value::Variable(variable) => {
            let ty = procedure.variable(*variable).ty();
            (ty.class(), ty.width(), ty.alignment())
        }

        Value::Immediate(immediate) => match immediate {
            Immediate::Integer8(_) => (RegClass::Int, 1, 1),
            Immediate::Integer16(_) => (RegClass::Int, 2, 2),
            Immediate::Integer32(_) => (RegClass::Int, 4, 4),
            Immediate::Integer64(_) => (RegClass::Int, 8, 8),
            Immediate::Float32(_) => (RegClass::Float, 4, 4),
            Immediate::Float64(_) => (RegClass::Float, 8, 8),
        },

        Value::Symbol(_) => {
            let width = target.pointer_width();
            (RegClass::Int, width, width)
        }
    }
}

/// Walks the convention's argument registers per class, overflowing to
/// the stack area once a class is exhausted.
#[derive(Debug)]
struct ArgumentAssigner<'t> {
    target: &'t TargetDescriptor,
    next_int: usize,
    next_float: usize,
    next_vector: usize,
    stack_cursor: u32,
}

impl<'t> ArgumentAssigner<'t> {
    fn new(target: &'t TargetDescriptor) -> Self {
        Self {
            target,
            next_int: 0,
            next_float: 0,
            next_vector: 0,
            stack_cursor: 0,
        }
    }

    fn assign(&mut self, class: RegClass, width: u32, alignment: u32) -> Location {
        let position = match class {
            RegClass::Int => &mut self.next_int,
            RegClass::Float => &mut self.next_float,
            RegClass::Vector => &mut self.next_vector,
        };

        let registers: &[u32] = self
            .target
            .class(class)
            .map(|info| info.argument_registers())
            .unwrap_or_default();

        if let Some(&index) = registers.get(*position) {
            *position += 1;
            return Location::Register(PhysReg::new(class, index));
        }

        let alignment = alignment.max(1);
        let offset = self.stack_cursor.next_multiple_of(alignment);
        self.stack_cursor = offset + width.max(1).next_multiple_of(self.target.pointer_width());

        Location::Stack {
            offset,
            size: width,
        }
    }

    fn stack_bytes(&self) -> u32 {
        self.stack_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil::{ProcedureBuilder, TypeDescriptor};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn two_argument_register_target() -> TargetDescriptor {
        use crate::RegisterClassInfo;

        TargetDescriptor::new("tiny", 8, 16, true).with_class(
            RegClass::Int,
            RegisterClassInfo::new(8, 8)
                .with_arguments([0, 1])
                .with_returns([0])
                .with_scratch([6, 7]),
        )
    }

    #[test]
    fn third_parameter_overflows_to_the_area_start() {
        let mut builder = ProcedureBuilder::new("three_params");
        let _a = builder.parameter(TypeDescriptor::int64());
        let _b = builder.parameter(TypeDescriptor::int64());
        let c = builder.parameter(TypeDescriptor::int64());
        builder.ret(Some(c.into()));

        let procedure = builder.build();
        let binding = AbiBinding::lower(&procedure, &two_argument_register_target()).unwrap();

        assert_eq!(
            binding.parameters()[0].location(),
            Location::Register(PhysReg::new(RegClass::Int, 0))
        );
        assert_eq!(
            binding.parameters()[1].location(),
            Location::Register(PhysReg::new(RegClass::Int, 1))
        );
        assert_eq!(
            binding.parameters()[2].location(),
            Location::Stack { offset: 0, size: 8 }
        );
    }

    #[rstest]
    #[case(8, 1)]
    #[case(16, 2)]
    fn wide_returns_split_over_return_registers(#[case] width: u32, #[case] parts: usize) {
        let mut builder = ProcedureBuilder::new("wide");
        builder.set_return_type(TypeDescriptor::new(width, 8, RegClass::Int));
        let v = builder.declare(TypeDescriptor::new(width, 8, RegClass::Int));
        builder.move_to(v, anvil::Immediate::Integer64(1));
        builder.ret(Some(v.into()));

        let procedure = builder.build();
        let binding = AbiBinding::lower(&procedure, &TargetDescriptor::anvil64()).unwrap();

        assert_eq!(binding.return_parts().len(), parts);
        assert_eq!(binding.return_parts()[0].bytes(), 0..8);
    }

    #[test]
    fn vector_return_is_unsupported_on_anvil64() {
        let mut builder = ProcedureBuilder::new("vec");
        builder.set_return_type(TypeDescriptor::vector128());
        builder.ret(None);

        let procedure = builder.build();
        let error = AbiBinding::lower(&procedure, &TargetDescriptor::anvil64()).unwrap_err();

        assert!(matches!(
            error,
            LowerError::UnsupportedAllocation { class: RegClass::Vector, .. }
        ));
    }
}
