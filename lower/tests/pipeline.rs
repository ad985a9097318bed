//! End-to-end checks over the whole lowering pipeline: determinism,
//! spill bracketing, constants, and per-procedure failure isolation.

use anvil::{
    Attribute, AttributeSet, BinaryOperation, Immediate, Module, ProcedureBuilder, RegClass,
    TypeDescriptor,
};
use anvil_lower::{
    lower_module, lower_procedure, Location, LoweredInstruction, RegisterClassInfo,
    TargetDescriptor,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter(None, log::LevelFilter::max())
        .try_init();
}

fn single_register_target() -> TargetDescriptor {
    TargetDescriptor::new("single", 8, 16, true).with_class(
        RegClass::Int,
        RegisterClassInfo::new(3, 8)
            .with_arguments([0])
            .with_returns([0])
            .with_scratch([1, 2]),
    )
}

fn pressured_procedure() -> anvil::Procedure {
    let mut builder = ProcedureBuilder::new("pressure");
    let a = builder.declare(TypeDescriptor::int64());
    let b = builder.declare(TypeDescriptor::int64());
    let c = builder.declare(TypeDescriptor::int64());

    builder.move_to(a, Immediate::Integer64(1));
    builder.move_to(b, Immediate::Integer64(2));
    builder.binary(BinaryOperation::Add, c, a, b);
    builder.ret(Some(c.into()));

    builder.build()
}

#[test]
fn lowering_twice_is_byte_identical() {
    init_logging();

    let procedure = pressured_procedure();
    let target = single_register_target();

    let first = lower_procedure(&procedure, &target).unwrap();
    let second = lower_procedure(&procedure, &target).unwrap();

    assert_eq!(first.debug_map(), second.debug_map());
    assert_eq!(first.procedure().frame(), second.procedure().frame());
    assert_eq!(
        first.procedure().to_string(),
        second.procedure().to_string()
    );
}

#[test]
fn spilled_value_round_trips_through_its_slot() {
    init_logging();

    let procedure = pressured_procedure();
    let lowering = lower_procedure(&procedure, &single_register_target()).unwrap();

    let instructions: Vec<&LoweredInstruction> = lowering
        .procedure()
        .blocks()
        .iter()
        .flat_map(|block| block.instructions().iter())
        .collect();

    // Find the spill slot: the single value that ended up on the stack.
    let slot = lowering
        .debug_map()
        .iter()
        .map(|(_, entries)| entries[0].location())
        .find(Location::is_stack)
        .expect("one value must have been spilled");

    let first_touch = instructions
        .iter()
        .position(|instruction| matches!(
            instruction,
            LoweredInstruction::Spill { slot: touched, .. } if *touched == slot
        ))
        .expect("the spilled definition must store to its slot");

    let reload = instructions
        .iter()
        .position(|instruction| matches!(
            instruction,
            LoweredInstruction::Reload { slot: touched, .. } if *touched == slot
        ))
        .expect("the spilled use must load from its slot");

    assert!(
        first_touch < reload,
        "the store to the slot must precede the reload"
    );

    // No other instruction may write the slot in between: the reload
    // observes exactly the spilled definition.
    for instruction in &instructions[first_touch + 1..reload] {
        assert!(!matches!(
            instruction,
            LoweredInstruction::Spill { slot: touched, .. } if *touched == slot
        ));
    }
}

#[test]
fn constants_are_written_exactly_once() {
    init_logging();

    let mut builder = ProcedureBuilder::new("constants");
    let constant = builder.declare_with(
        TypeDescriptor::int64(),
        AttributeSet::new().with(Attribute::Constant),
    );
    let double = builder.declare(TypeDescriptor::int64());

    builder.move_to(constant, Immediate::Integer64(21));
    builder.binary(BinaryOperation::Add, double, constant, constant);
    builder.ret(Some(double.into()));

    let lowering = lower_procedure(&builder.build(), &TargetDescriptor::anvil64()).unwrap();
    let location = lowering.debug_map().entries_of(constant)[0].location();

    let mut writes = 0;
    for block in lowering.procedure().blocks() {
        for instruction in block.instructions() {
            let written = match instruction {
                LoweredInstruction::Move { destination, .. }
                | LoweredInstruction::Binary { destination, .. }
                | LoweredInstruction::AddressOf { destination, .. }
                | LoweredInstruction::Load { destination, .. } => Some(*destination),
                LoweredInstruction::Call { result, .. } => *result,
                LoweredInstruction::Reload { register, .. } => Some(Location::Register(*register)),
                LoweredInstruction::Spill { slot, .. } => Some(*slot),
                LoweredInstruction::Store { .. }
                | LoweredInstruction::Branch { .. }
                | LoweredInstruction::BranchIf { .. }
                | LoweredInstruction::Return { .. } => None,
            };

            if written == Some(location) {
                writes += 1;
            }
        }
    }

    assert_eq!(writes, 1, "the constant's location must only receive its initializer");
}

#[test]
fn redefined_constant_is_rejected() {
    init_logging();

    let mut builder = ProcedureBuilder::new("mutated");
    let constant = builder.declare_with(
        TypeDescriptor::int64(),
        AttributeSet::new().with(Attribute::Constant),
    );

    builder.move_to(constant, Immediate::Integer64(1));
    builder.move_to(constant, Immediate::Integer64(2));
    builder.ret(Some(constant.into()));

    let error = lower_procedure(&builder.build(), &TargetDescriptor::anvil64()).unwrap_err();
    assert!(matches!(
        error,
        anvil_lower::LowerError::ConstraintConflict { variable, .. } if variable == constant
    ));
}

#[test]
fn one_failing_procedure_does_not_stop_the_module() {
    init_logging();

    let mut module = Module::new("unit");

    let mut good = ProcedureBuilder::new("good");
    let value = good.declare(TypeDescriptor::int64());
    good.move_to(value, Immediate::Integer64(1));
    good.ret(Some(value.into()));
    module.add_procedure(good.build());

    let mut bad = ProcedureBuilder::new("bad");
    let ghost = bad.declare(TypeDescriptor::int64());
    bad.ret(Some(ghost.into()));
    module.add_procedure(bad.build());

    let mut also_good = ProcedureBuilder::new("also_good");
    also_good.ret(None);
    module.add_procedure(also_good.build());

    let result = lower_module(&module, &TargetDescriptor::anvil64());

    assert_eq!(result.lowered().len(), 2);
    assert_eq!(result.failures().len(), 1);
    assert_eq!(result.failures()[0].procedure(), "bad");
    assert!(!result.is_success());

    // Debug maps exist only for the procedures that completed.
    let names: Vec<&str> = result
        .lowered()
        .iter()
        .map(|lowering| lowering.procedure().name())
        .collect();
    assert_eq!(names, ["good", "also_good"]);
}

#[test]
fn branching_control_flow_lowers_end_to_end() {
    init_logging();

    let mut builder = ProcedureBuilder::new("diamond");
    let flag = builder.parameter(TypeDescriptor::int64());
    let then_block = builder.create_block();
    let else_block = builder.create_block();
    let join = builder.create_block();
    let result = builder.declare(TypeDescriptor::int64());

    builder.branch_if(flag, then_block, else_block);
    builder.switch_to(then_block);
    builder.move_to(result, Immediate::Integer64(1));
    builder.branch(join);
    builder.switch_to(else_block);
    builder.move_to(result, Immediate::Integer64(2));
    builder.branch(join);
    builder.switch_to(join);
    builder.ret(Some(result.into()));

    let procedure = builder.build();
    let target = TargetDescriptor::anvil64();

    let first = lower_procedure(&procedure, &target).unwrap();
    let second = lower_procedure(&procedure, &target).unwrap();

    let map = first.debug_map();
    assert!(map.entries_of(flag)[0].location().as_register().is_some());
    assert!(map.entries_of(result)[0].location().as_register().is_some());

    assert_eq!(first.procedure().frame().total_size() % target.stack_alignment(), 0);
    assert_eq!(first.debug_map(), second.debug_map());
}

#[test]
fn address_taken_variable_lands_on_the_stack() {
    init_logging();

    let mut builder = ProcedureBuilder::new("addressed");
    let value = builder.declare(TypeDescriptor::int64());
    let pointer = builder.declare(TypeDescriptor::pointer());
    let loaded = builder.declare(TypeDescriptor::int64());

    builder.move_to(value, Immediate::Integer64(99));
    builder.address_of(pointer, value);
    builder.load(loaded, pointer, 0);
    builder.ret(Some(loaded.into()));

    let lowering = lower_procedure(&builder.build(), &TargetDescriptor::anvil64()).unwrap();
    let map = lowering.debug_map();

    assert!(map.entries_of(value)[0].location().is_stack());
    assert!(map.entries_of(pointer)[0].location().as_register().is_some());
}
