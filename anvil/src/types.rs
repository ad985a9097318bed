// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The kind of physical register a value naturally lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegClass {
    Int,
    Float,
    Vector,
}

impl RegClass {
    #[must_use]
    pub const fn letter(&self) -> char {
        match self {
            Self::Int => 'i',
            Self::Float => 'f',
            Self::Vector => 'v',
        }
    }
}

impl Display for RegClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Vector => f.write_str("vector"),
        }
    }
}

/// An opaque description of a variable's declared type, as handed to us
/// by the upstream typechecker: how wide it is, how it must be aligned,
/// and which register class its values belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    width: u32,
    alignment: u32,
    class: RegClass,
}

impl TypeDescriptor {
    #[must_use]
    pub const fn new(width: u32, alignment: u32, class: RegClass) -> Self {
        Self {
            width,
            alignment,
            class,
        }
    }

    #[must_use]
    pub const fn int8() -> Self {
        Self::new(1, 1, RegClass::Int)
    }

    #[must_use]
    pub const fn int16() -> Self {
        Self::new(2, 2, RegClass::Int)
    }

    #[must_use]
    pub const fn int32() -> Self {
        Self::new(4, 4, RegClass::Int)
    }

    #[must_use]
    pub const fn int64() -> Self {
        Self::new(8, 8, RegClass::Int)
    }

    #[must_use]
    pub const fn pointer() -> Self {
        Self::new(8, 8, RegClass::Int)
    }

    #[must_use]
    pub const fn float32() -> Self {
        Self::new(4, 4, RegClass::Float)
    }

    #[must_use]
    pub const fn float64() -> Self {
        Self::new(8, 8, RegClass::Float)
    }

    #[must_use]
    pub const fn vector128() -> Self {
        Self::new(16, 16, RegClass::Vector)
    }

    /// Width in bytes.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Natural alignment in bytes.
    #[must_use]
    pub const fn alignment(&self) -> u32 {
        self.alignment
    }

    #[must_use]
    pub const fn class(&self) -> RegClass {
        self.class
    }
}

impl Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.class.letter(), self.width * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn descriptor_accessors() {
        let ty = TypeDescriptor::new(16, 16, RegClass::Vector);
        assert_eq!(ty.width(), 16);
        assert_eq!(ty.alignment(), 16);
        assert_eq!(ty.class(), RegClass::Vector);
        assert_eq!(ty.to_string(), "v128");
    }

    #[rstest]
    #[case(TypeDescriptor::int8(), 1, RegClass::Int)]
    #[case(TypeDescriptor::int32(), 4, RegClass::Int)]
    #[case(TypeDescriptor::pointer(), 8, RegClass::Int)]
    #[case(TypeDescriptor::float64(), 8, RegClass::Float)]
    #[case(TypeDescriptor::vector128(), 16, RegClass::Vector)]
    fn builtin_descriptors(
        #[case] ty: TypeDescriptor,
        #[case] width: u32,
        #[case] class: RegClass,
    ) {
        assert_eq!(ty.width(), width);
        assert_eq!(ty.class(), class);
        assert_eq!(ty.alignment(), width);
    }
}
