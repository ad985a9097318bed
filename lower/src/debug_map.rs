// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::collections::BTreeMap;
use std::fmt::Display;

use anvil::{Procedure, VarId};

use crate::{Location, ProgramPoint};

/// One piece of a variable's whereabouts: the program-point range
/// (inclusive) over which it can be found at `location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugMapEntry {
    first: ProgramPoint,
    last: ProgramPoint,
    location: Location,
}

impl DebugMapEntry {
    #[must_use]
    pub const fn first(&self) -> ProgramPoint {
        self.first
    }

    #[must_use]
    pub const fn last(&self) -> ProgramPoint {
        self.last
    }

    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }

    #[must_use]
    pub fn covers(&self, point: ProgramPoint) -> bool {
        (self.first..=self.last).contains(&point)
    }
}

/// The final mapping from every original variable identity to its
/// physical location, for debuggers and the encoder's line tables.
/// Purely observational; emitted only for procedures that lowered
/// without a fatal error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugMap {
    entries: BTreeMap<VarId, Vec<DebugMapEntry>>,
}

impl DebugMap {
    /// Records one whole-procedure entry per located variable. The
    /// entry list form leaves room for range-split locations, which
    /// this allocator does not produce.
    #[must_use]
    pub fn emit(procedure: &Procedure, locations: &BTreeMap<VarId, Location>) -> Self {
        let last_instruction = procedure.point_count().saturating_sub(1);

        let entries = locations
            .iter()
            .map(|(variable, location)| {
                let entry = DebugMapEntry {
                    first: ProgramPoint::before(0),
                    last: ProgramPoint::after(last_instruction),
                    location: *location,
                };

                (*variable, vec![entry])
            })
            .collect();

        Self { entries }
    }

    #[must_use]
    pub fn entries_of(&self, variable: VarId) -> &[DebugMapEntry] {
        self.entries
            .get(&variable)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn location_at(&self, variable: VarId, point: ProgramPoint) -> Option<Location> {
        self.entries_of(variable)
            .iter()
            .find(|entry| entry.covers(point))
            .map(DebugMapEntry::location)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VarId, &Vec<DebugMapEntry>)> {
        self.entries.iter()
    }
}

impl Display for DebugMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (variable, entries) in &self.entries {
            for entry in entries {
                writeln!(
                    f,
                    "{variable} @ {}..{} -> {}",
                    entry.first, entry.last, entry.location
                )?;
            }
        }

        Ok(())
    }
}
