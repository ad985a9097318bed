//! Ensures target descriptors load from TOML and are validated.

use anvil_lower::{TargetDescriptor, TargetError};
use pretty_assertions::assert_eq;

#[test]
fn the_shipped_anvil64_description_matches_the_builtin() {
    let parsed = TargetDescriptor::from_toml_str(include_str!("../targets/anvil64.toml")).unwrap();

    assert_eq!(parsed, TargetDescriptor::anvil64());
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let error = TargetDescriptor::from_toml_str("name = [").unwrap_err();
    assert!(matches!(error, TargetError::Parse(..)));
}

#[test]
fn out_of_range_convention_registers_are_rejected() {
    let error = TargetDescriptor::from_toml_str(
        r#"
            name = "broken"
            pointer_width = 8
            stack_alignment = 16
            return_address_on_stack = true

            [classes.int]
            registers = 4
            width = 8
            argument = [0, 9]
            scratch = [2, 3]
        "#,
    )
    .unwrap_err();

    assert!(matches!(error, TargetError::RegisterOutOfRange { index: 9, .. }));
}

#[test]
fn classes_without_scratch_registers_are_rejected() {
    let error = TargetDescriptor::from_toml_str(
        r#"
            name = "broken"
            pointer_width = 8
            stack_alignment = 16
            return_address_on_stack = true

            [classes.int]
            registers = 4
            width = 8
        "#,
    )
    .unwrap_err();

    assert!(matches!(error, TargetError::MissingScratch { .. }));
}
