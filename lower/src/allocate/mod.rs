// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

mod allocator;
mod interference;

pub use self::{
    allocator::{Allocation, Allocator},
    interference::InterferenceGraph,
};
