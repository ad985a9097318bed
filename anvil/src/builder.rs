// Copyright (C) 2025 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{
    AttributeSet, BinaryOperation, Block, BlockId, Instruction, Procedure, Scope, TypeDescriptor,
    Value, Variable, VarId,
};

/// Builds a [`Procedure`] block by block. Upstream front ends use this
/// to hand procedures to the lowering pipeline; tests use it to write
/// procedures down without a parser.
#[derive(Debug)]
pub struct ProcedureBuilder {
    name: String,
    return_type: Option<TypeDescriptor>,
    parameters: Vec<VarId>,
    variables: Vec<Variable>,
    blocks: Vec<Vec<Instruction>>,
    current: usize,
}

impl ProcedureBuilder {
    /// Starts a new procedure with an empty entry block.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_type: None,
            parameters: Vec::new(),
            variables: Vec::new(),
            blocks: vec![Vec::new()],
            current: 0,
        }
    }

    pub fn set_return_type(&mut self, ty: TypeDescriptor) {
        self.return_type = Some(ty);
    }

    /// Declares the next parameter. Parameters are procedure-scoped and
    /// considered defined at entry.
    #[must_use]
    pub fn parameter(&mut self, ty: TypeDescriptor) -> VarId {
        let id = self.declare(ty);
        self.parameters.push(id);
        id
    }

    #[must_use]
    pub fn declare(&mut self, ty: TypeDescriptor) -> VarId {
        self.declare_with(ty, AttributeSet::new())
    }

    #[must_use]
    pub fn declare_with(&mut self, ty: TypeDescriptor, attributes: AttributeSet) -> VarId {
        self.declare_scoped(ty, attributes, Scope::Procedure)
    }

    /// Declares a variable scoped to the block currently being built.
    #[must_use]
    pub fn declare_in_block(&mut self, ty: TypeDescriptor, attributes: AttributeSet) -> VarId {
        self.declare_scoped(ty, attributes, Scope::Block(BlockId::new(self.current)))
    }

    fn declare_scoped(&mut self, ty: TypeDescriptor, attributes: AttributeSet, scope: Scope) -> VarId {
        let id = VarId::new(self.variables.len() as u32);
        self.variables.push(Variable::new(id, ty, scope, attributes));
        id
    }

    #[must_use]
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Vec::new());
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        debug_assert!(block.id() < self.blocks.len(), "cannot switch to an undeclared block");
        self.current = block.id();
    }

    pub fn move_to(&mut self, destination: VarId, source: impl Into<Value>) {
        self.emit(Instruction::Move {
            destination,
            source: source.into(),
        });
    }

    pub fn binary(
        &mut self,
        operation: BinaryOperation,
        destination: VarId,
        lhs: impl Into<Value>,
        rhs: impl Into<Value>,
    ) {
        self.emit(Instruction::Binary {
            operation,
            destination,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
    }

    pub fn address_of(&mut self, destination: VarId, variable: VarId) {
        self.variables[variable.number() as usize].mark_address_taken();

        self.emit(Instruction::AddressOf {
            destination,
            variable,
        });
    }

    pub fn load(&mut self, destination: VarId, address: VarId, offset: i64) {
        self.emit(Instruction::Load {
            destination,
            address,
            offset,
        });
    }

    pub fn store(&mut self, address: VarId, offset: i64, value: impl Into<Value>) {
        self.emit(Instruction::Store {
            address,
            offset,
            value: value.into(),
        });
    }

    pub fn call(&mut self, target: impl Into<String>, arguments: Vec<Value>, result: Option<VarId>) {
        self.emit(Instruction::Call {
            target: target.into(),
            arguments,
            result,
        });
    }

    pub fn branch(&mut self, target: BlockId) {
        self.emit(Instruction::Branch { target });
    }

    pub fn branch_if(&mut self, condition: VarId, then_target: BlockId, else_target: BlockId) {
        self.emit(Instruction::BranchIf {
            condition,
            then_target,
            else_target,
        });
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.emit(Instruction::Return { value });
    }

    fn emit(&mut self, instruction: Instruction) {
        self.blocks[self.current].push(instruction);
    }

    #[must_use]
    pub fn build(self) -> Procedure {
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(id, instructions)| Block::new(BlockId::new(id), instructions))
            .collect();

        Procedure::new(
            self.name,
            self.parameters,
            self.return_type,
            self.variables,
            blocks,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Immediate;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_procedure_has_one_block() {
        let procedure = ProcedureBuilder::new("empty").build();

        assert_eq!(procedure.blocks().len(), 1);
        assert_eq!(procedure.point_count(), 0);
    }

    #[test]
    fn address_of_marks_the_variable() {
        let mut builder = ProcedureBuilder::new("take_address");
        let value = builder.declare(TypeDescriptor::int32());
        let pointer = builder.declare(TypeDescriptor::pointer());

        builder.move_to(value, Immediate::Integer32(4));
        builder.address_of(pointer, value);
        builder.ret(None);

        let procedure = builder.build();
        assert!(procedure.variable(value).is_address_taken());
        assert!(!procedure.variable(pointer).is_address_taken());
    }

    #[test]
    fn block_scoped_declarations_remember_their_block() {
        let mut builder = ProcedureBuilder::new("scoped");
        let body = builder.create_block();

        builder.branch(body);
        builder.switch_to(body);
        let local = builder.declare_in_block(TypeDescriptor::int32(), AttributeSet::new());
        builder.move_to(local, Immediate::Integer32(3));
        builder.ret(None);

        let procedure = builder.build();
        assert_eq!(procedure.variable(local).scope(), Scope::Block(body));
    }

    #[test]
    fn program_points_are_global_across_blocks() {
        let mut builder = ProcedureBuilder::new("points");
        let a = builder.declare(TypeDescriptor::int32());
        let exit = builder.create_block();

        builder.move_to(a, Immediate::Integer32(1));
        builder.branch(exit);
        builder.switch_to(exit);
        builder.ret(Some(a.into()));

        let procedure = builder.build();
        assert_eq!(procedure.point_count(), 3);
        assert_eq!(procedure.block_start_points(), vec![0, 2]);
    }
}
