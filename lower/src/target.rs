// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;

use anvil::RegClass;
use serde::Deserialize;
use strum::AsRefStr;

/// A physical machine register: a class and an index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg {
    class: RegClass,
    index: u32,
}

impl PhysReg {
    #[must_use]
    pub const fn new(class: RegClass, index: u32) -> Self {
        Self { class, index }
    }

    #[must_use]
    pub const fn class(&self) -> RegClass {
        self.class
    }

    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl Display for PhysReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.class.letter(), self.index)
    }
}

/// One register class of a target: how many registers it has and which
/// of them play a role in the calling convention.
///
/// Register indices run from `0` to `registers - 1`. The `scratch`
/// registers are reserved for the output rewriter's spill loads and
/// stores and are never handed out by the allocator, so the allocator
/// sees `registers - scratch.len()` colors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterClassInfo {
    registers: u32,

    /// Width of one register of this class, in bytes.
    width: u32,

    #[serde(default)]
    argument: Vec<u32>,

    #[serde(default)]
    returns: Vec<u32>,

    #[serde(default)]
    callee_saved: Vec<u32>,

    #[serde(default)]
    scratch: Vec<u32>,
}

impl RegisterClassInfo {
    #[must_use]
    pub const fn new(registers: u32, width: u32) -> Self {
        Self {
            registers,
            width,
            argument: Vec::new(),
            returns: Vec::new(),
            callee_saved: Vec::new(),
            scratch: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_arguments(mut self, argument: impl Into<Vec<u32>>) -> Self {
        self.argument = argument.into();
        self
    }

    #[must_use]
    pub fn with_returns(mut self, returns: impl Into<Vec<u32>>) -> Self {
        self.returns = returns.into();
        self
    }

    #[must_use]
    pub fn with_callee_saved(mut self, callee_saved: impl Into<Vec<u32>>) -> Self {
        self.callee_saved = callee_saved.into();
        self
    }

    #[must_use]
    pub fn with_scratch(mut self, scratch: impl Into<Vec<u32>>) -> Self {
        self.scratch = scratch.into();
        self
    }

    #[must_use]
    pub const fn register_count(&self) -> u32 {
        self.registers
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn argument_registers(&self) -> &[u32] {
        &self.argument
    }

    #[must_use]
    pub fn return_registers(&self) -> &[u32] {
        &self.returns
    }

    #[must_use]
    pub fn callee_saved(&self) -> &[u32] {
        &self.callee_saved
    }

    #[must_use]
    pub fn scratch(&self) -> &[u32] {
        &self.scratch
    }
}

/// The immutable description of the machine we are lowering for.
/// Loaded once (programmatically or from a TOML file), then shared
/// read-only by every procedure's pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDescriptor {
    name: String,
    pointer_width: u32,
    stack_alignment: u32,
    return_address_on_stack: bool,
    classes: BTreeMap<RegClass, RegisterClassInfo>,
}

impl TargetDescriptor {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        pointer_width: u32,
        stack_alignment: u32,
        return_address_on_stack: bool,
    ) -> Self {
        Self {
            name: name.into(),
            pointer_width,
            stack_alignment,
            return_address_on_stack,
            classes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: RegClass, info: RegisterClassInfo) -> Self {
        self.classes.insert(class, info);
        self
    }

    /// The reference 64-bit machine used by the test suite and the
    /// documentation examples. It has no vector registers on purpose.
    #[must_use]
    pub fn anvil64() -> Self {
        Self::new("anvil64", 8, 16, true)
            .with_class(
                RegClass::Int,
                RegisterClassInfo::new(16, 8)
                    .with_arguments([0, 1, 2, 3, 4, 5])
                    .with_returns([0, 1])
                    .with_callee_saved([8, 9, 10, 11, 12, 13])
                    .with_scratch([14, 15]),
            )
            .with_class(
                RegClass::Float,
                RegisterClassInfo::new(8, 8)
                    .with_arguments([0, 1, 2, 3])
                    .with_returns([0, 1])
                    .with_callee_saved([4, 5])
                    .with_scratch([6, 7]),
            )
    }

    pub fn from_toml_str(input: &str) -> Result<Self, TargetError> {
        let descriptor: Self = toml::from_str(input)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn from_path(path: &Path) -> Result<Self, TargetError> {
        let input = std::fs::read_to_string(path)
            .map_err(|error| TargetError::UnreadableFile {
                path: path.display().to_string(),
                error: error.to_string(),
            })?;

        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), TargetError> {
        if self.stack_alignment == 0 || !self.stack_alignment.is_power_of_two() {
            return Err(TargetError::InvalidStackAlignment {
                value: self.stack_alignment,
            });
        }

        if self.pointer_width == 0 || !self.pointer_width.is_power_of_two() {
            return Err(TargetError::InvalidPointerWidth {
                value: self.pointer_width,
            });
        }

        for (class, info) in &self.classes {
            if info.registers == 0 {
                continue;
            }

            if info.width == 0 {
                return Err(TargetError::ZeroRegisterWidth { class: *class });
            }

            let lists = [
                &info.argument,
                &info.returns,
                &info.callee_saved,
                &info.scratch,
            ];

            for list in lists {
                for &index in list {
                    if index >= info.registers {
                        return Err(TargetError::RegisterOutOfRange {
                            class: *class,
                            index,
                        });
                    }
                }
            }

            if info.scratch.len() < 2 {
                return Err(TargetError::MissingScratch { class: *class });
            }

            for &index in &info.scratch {
                if info.callee_saved.contains(&index) {
                    return Err(TargetError::CalleeSavedScratch {
                        class: *class,
                        index,
                    });
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn pointer_width(&self) -> u32 {
        self.pointer_width
    }

    #[must_use]
    pub const fn stack_alignment(&self) -> u32 {
        self.stack_alignment
    }

    #[must_use]
    pub const fn return_address_on_stack(&self) -> bool {
        self.return_address_on_stack
    }

    #[must_use]
    pub fn class(&self, class: RegClass) -> Option<&RegisterClassInfo> {
        self.classes.get(&class)
    }

    /// Registers of `class` the allocator may hand out, ascending.
    #[must_use]
    pub fn allocatable(&self, class: RegClass) -> Vec<PhysReg> {
        let Some(info) = self.classes.get(&class) else {
            return Vec::new();
        };

        (0..info.registers)
            .filter(|index| !info.scratch.contains(index))
            .map(|index| PhysReg::new(class, index))
            .collect()
    }

    #[must_use]
    pub fn allocatable_count(&self, class: RegClass) -> usize {
        self.allocatable(class).len()
    }

    #[must_use]
    pub fn register_width(&self, class: RegClass) -> Option<u32> {
        self.classes.get(&class).map(RegisterClassInfo::width)
    }

    #[must_use]
    pub fn is_callee_saved(&self, register: PhysReg) -> bool {
        self.classes
            .get(&register.class())
            .is_some_and(|info| info.callee_saved.contains(&register.index()))
    }

    #[must_use]
    pub fn scratch_registers(&self, class: RegClass) -> Vec<PhysReg> {
        let Some(info) = self.classes.get(&class) else {
            return Vec::new();
        };

        info.scratch
            .iter()
            .map(|&index| PhysReg::new(class, index))
            .collect()
    }
}

#[derive(Debug, thiserror::Error, AsRefStr)]
pub enum TargetError {
    #[error("target file `{path}` could not be read: {error}")]
    UnreadableFile { path: String, error: String },

    #[error("target description is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("stack alignment {value} is not a power of two")]
    InvalidStackAlignment { value: u32 },

    #[error("pointer width {value} is not a power of two")]
    InvalidPointerWidth { value: u32 },

    #[error("register class {class} has registers of width zero")]
    ZeroRegisterWidth { class: RegClass },

    #[error("register index {index} is out of range for class {class}")]
    RegisterOutOfRange { class: RegClass, index: u32 },

    #[error("register class {class} reserves fewer than two scratch registers")]
    MissingScratch { class: RegClass },

    #[error("scratch register {class}{index} may not be callee-saved")]
    CalleeSavedScratch { class: RegClass, index: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn anvil64_is_valid() {
        assert!(TargetDescriptor::anvil64().validate().is_ok());
    }

    #[test]
    fn anvil64_exposes_fourteen_int_colors() {
        let target = TargetDescriptor::anvil64();
        assert_eq!(target.allocatable_count(RegClass::Int), 14);
        assert_eq!(target.allocatable_count(RegClass::Vector), 0);
    }

    #[rstest]
    #[case(0)]
    #[case(12)]
    fn bad_stack_alignment_is_rejected(#[case] alignment: u32) {
        let target = TargetDescriptor::new("broken", 8, alignment, true);
        assert!(matches!(
            target.validate(),
            Err(TargetError::InvalidStackAlignment { .. })
        ));
    }

    #[test]
    fn scratch_must_not_be_callee_saved() {
        let target = TargetDescriptor::new("broken", 8, 16, true).with_class(
            RegClass::Int,
            RegisterClassInfo::new(4, 8)
                .with_callee_saved([2, 3])
                .with_scratch([2, 3]),
        );

        assert!(matches!(
            target.validate(),
            Err(TargetError::CalleeSavedScratch { .. })
        ));
    }
}
