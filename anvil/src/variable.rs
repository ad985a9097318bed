// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use crate::{AttributeSet, BlockId, TypeDescriptor, VarId};

/// The lexical scope a variable was declared in. A variable's visible
/// lifetime never exceeds the extent of its declaring scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Procedure,
    Block(BlockId),
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Procedure => f.write_str("procedure"),
            Self::Block(block) => block.fmt(f),
        }
    }
}

/// A scope-declared virtual variable, not yet bound to a register or a
/// stack address.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    id: VarId,
    ty: TypeDescriptor,
    scope: Scope,
    attributes: AttributeSet,
    address_taken: bool,
}

impl Variable {
    #[must_use]
    pub fn new(id: VarId, ty: TypeDescriptor, scope: Scope, attributes: AttributeSet) -> Self {
        Self {
            id,
            ty,
            scope,
            attributes,
            address_taken: false,
        }
    }

    #[must_use]
    pub const fn id(&self) -> VarId {
        self.id
    }

    #[must_use]
    pub const fn ty(&self) -> TypeDescriptor {
        self.ty
    }

    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    #[must_use]
    pub const fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Whether an `AddressOf` instruction observes this variable's
    /// storage address somewhere in the procedure.
    #[must_use]
    pub const fn is_address_taken(&self) -> bool {
        self.address_taken
    }

    pub fn mark_address_taken(&mut self) {
        self.address_taken = true;
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.ty)?;

        if self.attributes.iter().next().is_some() {
            write!(f, " [{}]", self.attributes)?;
        }

        Ok(())
    }
}
