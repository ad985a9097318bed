// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use log::debug;

use anvil::{Procedure, VarId};

use crate::{Allocation, PhysReg, TargetDescriptor};

/// The finished frame layout of one procedure. Areas appear in fixed
/// order at ascending byte offsets: return-address slot, callee-saved
/// register saves, stack-resident locals, spill slots, outgoing
/// parameters. The total size is a multiple of the target's stack
/// alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    total_size: u32,
    alignment: u32,
    return_address: Option<(u32, u32)>,
    callee_saved: Vec<(PhysReg, u32)>,
    locals: Vec<(VarId, u32)>,
    spill_slots: Vec<(VarId, u32)>,
    outgoing: (u32, u32),
}

impl StackFrame {
    #[must_use]
    pub const fn total_size(&self) -> u32 {
        self.total_size
    }

    #[must_use]
    pub const fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Offset and size of the return-address slot, if the ABI stores
    /// the return address in the frame.
    #[must_use]
    pub const fn return_address(&self) -> Option<(u32, u32)> {
        self.return_address
    }

    /// Save slots for the callee-saved registers the allocator used.
    #[must_use]
    pub fn callee_saved_slots(&self) -> &[(PhysReg, u32)] {
        &self.callee_saved
    }

    #[must_use]
    pub fn local_offset(&self, variable: VarId) -> Option<u32> {
        self.locals
            .iter()
            .find(|(id, _)| *id == variable)
            .map(|(_, offset)| *offset)
    }

    #[must_use]
    pub fn spill_offset(&self, variable: VarId) -> Option<u32> {
        self.spill_slots
            .iter()
            .find(|(id, _)| *id == variable)
            .map(|(_, offset)| *offset)
    }

    /// The frame offset of a stack-resident variable, whether pinned
    /// local or spill slot.
    #[must_use]
    pub fn offset_of(&self, variable: VarId) -> Option<u32> {
        self.local_offset(variable).or_else(|| self.spill_offset(variable))
    }

    /// Offset and size of the outgoing-parameter area. The size is the
    /// stack overflow of the largest call in the procedure.
    #[must_use]
    pub const fn outgoing_area(&self) -> (u32, u32) {
        self.outgoing
    }
}

impl Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "frame of {} bytes (aligned to {})", self.total_size, self.alignment)?;

        if let Some((offset, size)) = self.return_address {
            writeln!(f, "    +{offset}: return address ({size} bytes)")?;
        }

        for (register, offset) in &self.callee_saved {
            writeln!(f, "    +{offset}: save {register}")?;
        }

        for (variable, offset) in &self.locals {
            writeln!(f, "    +{offset}: local {variable}")?;
        }

        for (variable, offset) in &self.spill_slots {
            writeln!(f, "    +{offset}: spill {variable}")?;
        }

        let (offset, size) = self.outgoing;
        if size != 0 {
            writeln!(f, "    +{offset}: outgoing parameters ({size} bytes)")?;
        }

        Ok(())
    }
}

/// Lays out all stack-resident storage of one procedure into a single
/// frame.
#[derive(Debug)]
pub struct StackFrameBuilder<'t> {
    target: &'t TargetDescriptor,
}

impl<'t> StackFrameBuilder<'t> {
    #[must_use]
    pub const fn new(target: &'t TargetDescriptor) -> Self {
        Self { target }
    }

    #[must_use]
    pub fn lay_out(
        &self,
        procedure: &Procedure,
        allocation: &Allocation,
        outgoing_bytes: u32,
    ) -> StackFrame {
        let mut cursor = 0u32;

        let return_address = if self.target.return_address_on_stack() {
            let size = self.target.pointer_width();
            cursor += size;
            debug!("Frame of `{}`: return address at +0 ({size} bytes)", procedure.name());
            Some((0, size))
        } else {
            None
        };

        let mut callee_saved = Vec::new();
        for &register in allocation.used_callee_saved() {
            let width = self.target.register_width(register.class()).unwrap_or(self.target.pointer_width());
            cursor = cursor.next_multiple_of(width);

            debug!("Frame of `{}`: {register} saved at +{cursor}", procedure.name());
            callee_saved.push((register, cursor));
            cursor += width;
        }

        // Descending alignment first so the widest locals cause no
        // internal padding; declaration order breaks ties.
        let mut pinned: Vec<VarId> = allocation.pinned().to_vec();
        pinned.sort_by_key(|&variable| {
            (std::cmp::Reverse(Self::effective_alignment(procedure, variable)), variable)
        });

        let mut locals = Vec::new();
        for variable in pinned {
            let alignment = Self::effective_alignment(procedure, variable);
            cursor = cursor.next_multiple_of(alignment);

            debug!("Frame of `{}`: local {variable} at +{cursor}", procedure.name());
            locals.push((variable, cursor));
            cursor += procedure.variable(variable).ty().width().max(1);
        }

        let mut spill_slots = Vec::new();
        for &variable in allocation.spilled() {
            let alignment = Self::effective_alignment(procedure, variable);
            cursor = cursor.next_multiple_of(alignment);

            debug!("Frame of `{}`: spill slot for {variable} at +{cursor}", procedure.name());
            spill_slots.push((variable, cursor));
            cursor += procedure.variable(variable).ty().width().max(1);
        }

        cursor = cursor.next_multiple_of(self.target.pointer_width());
        let outgoing = (cursor, outgoing_bytes);
        if outgoing_bytes != 0 {
            debug!("Frame of `{}`: outgoing parameters at +{cursor} ({outgoing_bytes} bytes)", procedure.name());
        }
        cursor += outgoing_bytes;

        let total_size = cursor.next_multiple_of(self.target.stack_alignment());

        StackFrame {
            total_size,
            alignment: self.target.stack_alignment(),
            return_address,
            callee_saved,
            locals,
            spill_slots,
            outgoing,
        }
    }

    fn effective_alignment(procedure: &Procedure, variable: VarId) -> u32 {
        let variable = procedure.variable(variable);

        variable
            .ty()
            .alignment()
            .max(variable.attributes().alignment().unwrap_or(1))
            .max(1)
    }
}
