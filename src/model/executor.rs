use crate::instruction::{parse_address, parse_immediate, parse_target, Instruction, Opcode};
use crate::model::builder::FormulaBuilder;
use crate::model::memory::SymbolicMemory;
use crate::model::register::{Register, RegisterFile};
use crate::model::{ModelError, NodeRef, NodeType};
use log::{debug, trace, warn};

//
// Public Interface
//

/// Position of the first instruction. Instructions are numbered from one in
/// the order they were kept by the parser.
pub const INITIAL_PC: u32 = 1;

/// How instructions without a model are treated: unknown opcodes and
/// branch or jump targets that are not instruction positions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Policy {
    /// Treat the instruction as a no-op that falls through to the next one.
    #[default]
    Lenient,
    /// Abort modeling with an error.
    Strict,
}

#[derive(Clone, Debug, Default)]
pub struct ModelOptions {
    pub policy: Policy,
}

/// Registers, memory and program counter at one point of an execution.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    pub registers: RegisterFile,
    pub memory: SymbolicMemory,
    pub pc: NodeRef,
    prefixes: Vec<String>,
}

impl ExecutionState {
    /// Creates a fully symbolic state. Registers are named `<prefix>x<N>`,
    /// memory `<prefix>mem`, and the program counter starts at the first
    /// instruction.
    pub fn symbolic(builder: &mut FormulaBuilder, prefix: &str) -> Self {
        Self {
            registers: RegisterFile::symbolic(builder, prefix),
            memory: SymbolicMemory::symbolic(builder, &format!("{}mem", prefix)),
            pc: builder.new_const(INITIAL_PC),
            prefixes: Vec::new(),
        }
    }

    /// Prefixes of the executions that led to this state.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    fn record_prefix(&mut self, prefix: &str) {
        if !self.prefixes.iter().any(|p| p == prefix) {
            self.prefixes.push(prefix.to_string());
        }
    }
}

/// Models a whole program from `initial`, visiting every instruction exactly
/// once in order. Control flow only shows up in the program counter, which
/// becomes a conditional expression after the first branch.
///
/// Versioned variables created on the way are named with `prefix`, so two
/// executions from the same initial state never collide. Version numbers
/// start over, hence a prefix that already produced `initial` is rejected.
pub fn execute_program(
    builder: &mut FormulaBuilder,
    initial: &ExecutionState,
    prefix: &str,
    instructions: &[Instruction],
    options: &ModelOptions,
) -> Result<ExecutionState, ModelError> {
    debug!(
        "modeling {} instructions with prefix {:?}",
        instructions.len(),
        prefix
    );

    if initial.prefixes.iter().any(|p| p == prefix) {
        return Err(ModelError::PrefixReused(prefix.to_string()));
    }

    let mut state = initial.clone();
    state.registers.reset_versions();
    state.memory.reset_versions();
    state.record_prefix(prefix);

    let mut executor = Executor {
        builder,
        prefix,
        options,
        state,
    };

    time_debug!("finished modeling program", {
        for instruction in instructions {
            executor.step(instruction)?;
        }
    });

    Ok(executor.state)
}

/// Computes the state following a single instruction. Version numbers
/// continue from `state`, so stepping repeatedly with one prefix is fine.
pub fn execute_instruction(
    builder: &mut FormulaBuilder,
    state: &ExecutionState,
    prefix: &str,
    instruction: &Instruction,
    options: &ModelOptions,
) -> Result<ExecutionState, ModelError> {
    let mut next = state.clone();
    next.record_prefix(prefix);
    let mut executor = Executor {
        builder,
        prefix,
        options,
        state: next,
    };
    executor.step(instruction)?;
    Ok(executor.state)
}

//
// Private Implementation
//

struct Executor<'a> {
    builder: &'a mut FormulaBuilder,
    prefix: &'a str,
    options: &'a ModelOptions,
    state: ExecutionState,
}

type BinaryOp = fn(&mut FormulaBuilder, NodeRef, NodeRef) -> NodeRef;

impl<'a> Executor<'a> {
    fn step(&mut self, inst: &Instruction) -> Result<(), ModelError> {
        trace!("modeling {} at position {}", inst, inst.position);

        let next_pc = match inst.opcode() {
            Some(opcode) => self.translate_to_model(opcode, inst)?,
            None => self.skip(ModelError::UnsupportedOpcode {
                position: inst.position,
                mnemonic: inst.mnemonic.clone(),
            })?,
        };

        self.state.pc = next_pc;
        Ok(())
    }

    // Returns the program counter of the next instruction.
    fn translate_to_model(
        &mut self,
        opcode: Opcode,
        inst: &Instruction,
    ) -> Result<NodeRef, ModelError> {
        match opcode {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Sll
            | Opcode::Srl
            | Opcode::Sra => self.model_register_op(opcode, inst)?,
            Opcode::Addi
            | Opcode::Andi
            | Opcode::Ori
            | Opcode::Xori
            | Opcode::Slti
            | Opcode::Sltiu => self.model_immediate_op(opcode, inst)?,
            Opcode::Lui => self.model_lui(inst)?,
            Opcode::Lw => self.model_lw(inst)?,
            Opcode::Sw => self.model_sw(inst)?,
            Opcode::Beq => return self.model_branch(inst, FormulaBuilder::new_eq),
            Opcode::Bne => return self.model_branch(inst, FormulaBuilder::new_neq),
            Opcode::Blt => return self.model_branch(inst, FormulaBuilder::new_slt),
            Opcode::Bge => return self.model_branch(inst, FormulaBuilder::new_sgte),
            Opcode::Bltu => return self.model_branch(inst, FormulaBuilder::new_ult),
            Opcode::Bgeu => return self.model_branch(inst, FormulaBuilder::new_ugte),
            Opcode::Jal => return self.model_jal(inst),
            Opcode::Jalr => return self.model_jalr(inst),
        }
        Ok(self.fall_through())
    }

    fn fall_through(&mut self) -> NodeRef {
        let one = self.builder.new_const(1);
        self.builder.new_add(self.state.pc.clone(), one)
    }

    fn skip(&mut self, error: ModelError) -> Result<NodeRef, ModelError> {
        match self.options.policy {
            Policy::Strict => Err(error),
            Policy::Lenient => {
                warn!("treating instruction as no-op: {}", error);
                Ok(self.fall_through())
            }
        }
    }

    fn write_register(&mut self, reg: Register, value: NodeRef) {
        match reg {
            Register::Zero => trace!("discarding write to x0"),
            Register::General(gpr) => {
                self.state
                    .registers
                    .write(self.builder, self.prefix, gpr, value);
            }
        }
    }

    // Resolves a register name or an immediate literal to its value.
    fn value(&mut self, inst: &Instruction, text: &str) -> Result<NodeRef, ModelError> {
        if let Some(imm) = parse_immediate(text) {
            return Ok(self.builder.new_const(imm));
        }
        let reg = register(inst, text)?;
        Ok(self.state.registers.read(reg))
    }

    fn address(&mut self, inst: &Instruction, text: &str) -> Result<NodeRef, ModelError> {
        let address = parse_address(text).ok_or_else(|| ModelError::MalformedAddress {
            position: inst.position,
            text: text.to_string(),
        })?;
        let base = self.value(inst, address.base)?;
        Ok(self.offset(base, address.offset))
    }

    fn offset(&mut self, base: NodeRef, offset: u32) -> NodeRef {
        if offset == 0 {
            base
        } else {
            let offset_node = self.builder.new_const(offset);
            self.builder.new_add(base, offset_node)
        }
    }

    fn model_register_op(&mut self, opcode: Opcode, inst: &Instruction) -> Result<(), ModelError> {
        let operands = expect_operands(inst, 3)?;
        let dest = register(inst, &operands[0])?;
        let left = self.value(inst, &operands[1])?;
        let right = self.value(inst, &operands[2])?;
        let result = match opcode {
            Opcode::Add => self.builder.new_add(left, right),
            Opcode::Sub => self.builder.new_sub(left, right),
            Opcode::Mul => self.builder.new_mul(left, right),
            Opcode::Div => self.model_guarded_division(left, right, FormulaBuilder::new_div),
            Opcode::Rem => self.model_guarded_division(left, right, FormulaBuilder::new_rem),
            Opcode::And => self.builder.new_and_word(left, right),
            Opcode::Or => self.builder.new_or(left, right),
            Opcode::Xor => self.builder.new_xor(left, right),
            Opcode::Sll => self.builder.new_sll(left, right),
            Opcode::Srl => self.builder.new_srl(left, right),
            Opcode::Sra => self.builder.new_sra(left, right),
            _ => unreachable!("not a register-register operation: {}", opcode),
        };
        self.write_register(dest, result);
        Ok(())
    }

    // A zero divisor selects zero instead of relying on the solver's own
    // division-by-zero semantics.
    fn model_guarded_division(&mut self, left: NodeRef, right: NodeRef, f_op: BinaryOp) -> NodeRef {
        let zero = self.builder.new_const(0);
        let divisor_nonzero = self.builder.new_neq(right.clone(), zero.clone());
        let result = f_op(self.builder, left, right);
        self.builder
            .new_ite(divisor_nonzero, result, zero, NodeType::Word)
    }

    fn model_immediate_op(&mut self, opcode: Opcode, inst: &Instruction) -> Result<(), ModelError> {
        let operands = expect_operands(inst, 3)?;
        let dest = register(inst, &operands[0])?;
        let src = self.value(inst, &operands[1])?;
        let imm = immediate(inst, &operands[2])?;
        let imm_node = self.builder.new_const(imm);
        let result = match opcode {
            Opcode::Addi => self.builder.new_add(src, imm_node),
            Opcode::Andi => self.builder.new_and_word(src, imm_node),
            Opcode::Ori => self.builder.new_or(src, imm_node),
            Opcode::Xori => self.builder.new_xor(src, imm_node),
            Opcode::Slti => {
                let cond = self.builder.new_slt(src, imm_node);
                self.model_set_flag(cond)
            }
            Opcode::Sltiu => {
                let cond = self.builder.new_ult(src, imm_node);
                self.model_set_flag(cond)
            }
            _ => unreachable!("not a register-immediate operation: {}", opcode),
        };
        self.write_register(dest, result);
        Ok(())
    }

    fn model_set_flag(&mut self, cond: NodeRef) -> NodeRef {
        let one = self.builder.new_const(1);
        let zero = self.builder.new_const(0);
        self.builder.new_ite(cond, one, zero, NodeType::Word)
    }

    fn model_lui(&mut self, inst: &Instruction) -> Result<(), ModelError> {
        let operands = expect_operands(inst, 2)?;
        let dest = register(inst, &operands[0])?;
        let imm = immediate(inst, &operands[1])?;
        let const_node = self.builder.new_const(imm << 12);
        self.write_register(dest, const_node);
        Ok(())
    }

    fn model_lw(&mut self, inst: &Instruction) -> Result<(), ModelError> {
        let operands = expect_operands(inst, 2)?;
        let dest = register(inst, &operands[0])?;
        let address = self.address(inst, &operands[1])?;
        let load_node = self.state.memory.load(self.builder, address);
        self.write_register(dest, load_node);
        Ok(())
    }

    fn model_sw(&mut self, inst: &Instruction) -> Result<(), ModelError> {
        let operands = expect_operands(inst, 2)?;
        let value = self.value(inst, &operands[0])?;
        let address = self.address(inst, &operands[1])?;
        self.state
            .memory
            .store(self.builder, self.prefix, address, value);
        Ok(())
    }

    fn model_branch(
        &mut self,
        inst: &Instruction,
        f_new_cond: BinaryOp,
    ) -> Result<NodeRef, ModelError> {
        let operands = expect_operands(inst, 3)?;
        let target = match parse_target(&operands[2]) {
            Some(target) => target,
            None => return self.skip(unresolved(inst, &operands[2])),
        };
        let left = self.value(inst, &operands[0])?;
        let right = self.value(inst, &operands[1])?;
        let cond = f_new_cond(self.builder, left, right);
        let target_node = self.builder.new_const(target);
        let fall_through = self.fall_through();
        Ok(self
            .builder
            .new_ite(cond, target_node, fall_through, NodeType::Word))
    }

    fn model_jal(&mut self, inst: &Instruction) -> Result<NodeRef, ModelError> {
        let operands = expect_operands(inst, 2)?;
        let target = match parse_target(&operands[1]) {
            Some(target) => target,
            None => return self.skip(unresolved(inst, &operands[1])),
        };
        let dest = register(inst, &operands[0])?;
        let link_node = self.fall_through();
        self.write_register(dest, link_node);
        Ok(self.builder.new_const(target))
    }

    // The base register holds an instruction position directly, no
    // alignment mask is applied to the target.
    fn model_jalr(&mut self, inst: &Instruction) -> Result<NodeRef, ModelError> {
        let (dest, target) = match inst.operands.as_slice() {
            [dest, base] => (register(inst, dest)?, self.address(inst, base)?),
            [dest, base, offset] => {
                let dest = register(inst, dest)?;
                let base = self.value(inst, base)?;
                let offset = immediate(inst, offset)?;
                (dest, self.offset(base, offset))
            }
            operands => {
                return Err(ModelError::OperandCount {
                    position: inst.position,
                    mnemonic: inst.mnemonic.clone(),
                    expected: 2,
                    found: operands.len(),
                })
            }
        };
        let link_node = self.fall_through();
        self.write_register(dest, link_node);
        Ok(target)
    }
}

fn expect_operands(inst: &Instruction, expected: usize) -> Result<&[String], ModelError> {
    if inst.operands.len() == expected {
        Ok(&inst.operands)
    } else {
        Err(ModelError::OperandCount {
            position: inst.position,
            mnemonic: inst.mnemonic.clone(),
            expected,
            found: inst.operands.len(),
        })
    }
}

fn register(inst: &Instruction, text: &str) -> Result<Register, ModelError> {
    text.parse::<Register>()
        .map_err(|_| ModelError::UnknownRegister {
            position: inst.position,
            name: text.to_string(),
        })
}

fn immediate(inst: &Instruction, text: &str) -> Result<u32, ModelError> {
    parse_immediate(text).ok_or_else(|| ModelError::MalformedImmediate {
        position: inst.position,
        text: text.to_string(),
    })
}

fn unresolved(inst: &Instruction, target: &str) -> ModelError {
    ModelError::UnresolvedTarget {
        position: inst.position,
        target: target.to_string(),
    }
}
