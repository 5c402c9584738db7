//! Concrete evaluation of formula graphs.
//!
//! Given values for the initial variables, every node of a graph evaluates
//! to a single value using the same operator semantics the solver applies.
//! This is used to replay counterexamples through both programs and to test
//! the symbolic model against concrete expectations.

use crate::model::bitvec;
use crate::model::{get_operands, HashableNodeRef, Node, NodeRef, NodeType};
use log::trace;
use std::collections::HashMap;

//
// Public Interface
//

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bit(bool),
    Word(u32),
    Memory(MemoryValue),
}

/// A memory state as the initial array it started from plus all cells
/// written since.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryValue {
    initial: String,
    cells: HashMap<u32, u32>,
}

/// Values of initial variables. Anything left unset reads as zero.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    words: HashMap<String, u32>,
    memories: HashMap<String, HashMap<u32, u32>>,
}

pub struct Evaluator<'a> {
    environment: &'a Environment,
    cache: HashMap<HashableNodeRef, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_word(&mut self, name: &str, value: u32) {
        self.words.insert(name.to_string(), value);
    }

    pub fn set_memory(&mut self, name: &str, address: u32, value: u32) {
        self.memories
            .entry(name.to_string())
            .or_default()
            .insert(address, value);
    }

    pub fn word(&self, name: &str) -> u32 {
        self.words.get(name).copied().unwrap_or(0)
    }

    fn initial_cell(&self, name: &str, address: u32) -> u32 {
        self.memories
            .get(name)
            .and_then(|cells| cells.get(&address))
            .copied()
            .unwrap_or(0)
    }
}

impl<'a> Evaluator<'a> {
    pub fn new(environment: &'a Environment) -> Self {
        Self {
            environment,
            cache: HashMap::new(),
        }
    }

    /// Operands are evaluated before their users with an explicit stack, so
    /// `compute` only ever finds cached operands.
    pub fn evaluate(&mut self, node: &NodeRef) -> Value {
        let root = HashableNodeRef::from(node.clone());
        let mut pending = vec![node.clone()];

        while let Some(current) = pending.last().cloned() {
            let key = HashableNodeRef::from(current.clone());
            if self.cache.contains_key(&key) {
                pending.pop();
                continue;
            }
            let missing: Vec<NodeRef> = get_operands(&current)
                .into_iter()
                .filter(|operand| {
                    !self.cache.contains_key(&HashableNodeRef::from(operand.clone()))
                })
                .collect();
            if missing.is_empty() {
                let value = self.compute(&current);
                self.cache.insert(key, value);
                pending.pop();
            } else {
                pending.extend(missing);
            }
        }

        self.cache[&root].clone()
    }

    pub fn word(&mut self, node: &NodeRef) -> u32 {
        match self.evaluate(node) {
            Value::Word(word) => word,
            other => panic!("expected word, found {:?}", other),
        }
    }

    pub fn bit(&mut self, node: &NodeRef) -> bool {
        match self.evaluate(node) {
            Value::Bit(bit) => bit,
            other => panic!("expected bit, found {:?}", other),
        }
    }

    /// Reads one cell of a memory node.
    pub fn cell(&mut self, memory: &NodeRef, address: u32) -> u32 {
        let memory = self.memory(memory);
        self.read_cell(&memory, address)
    }
}

/// Evaluates a single node in a fresh evaluator.
pub fn evaluate(node: &NodeRef, environment: &Environment) -> Value {
    Evaluator::new(environment).evaluate(node)
}

//
// Private Implementation
//

impl<'a> Evaluator<'a> {
    fn memory(&mut self, node: &NodeRef) -> MemoryValue {
        match self.evaluate(node) {
            Value::Memory(memory) => memory,
            other => panic!("expected memory, found {:?}", other),
        }
    }

    fn read_cell(&self, memory: &MemoryValue, address: u32) -> u32 {
        match memory.cells.get(&address) {
            Some(value) => *value,
            None => self.environment.initial_cell(&memory.initial, address),
        }
    }

    fn word_op(&mut self, left: &NodeRef, right: &NodeRef, f: fn(u32, u32) -> u32) -> Value {
        let left = self.word(left);
        let right = self.word(right);
        Value::Word(f(left, right))
    }

    fn compare_op(&mut self, left: &NodeRef, right: &NodeRef, f: fn(u32, u32) -> bool) -> Value {
        let left = self.word(left);
        let right = self.word(right);
        Value::Bit(f(left, right))
    }

    fn compute(&mut self, node: &NodeRef) -> Value {
        match &*node.borrow() {
            Node::Const { sort: NodeType::Bit, imm, .. } => Value::Bit(*imm != 0),
            Node::Const { imm, .. } => Value::Word(*imm as u32),
            Node::Input { sort: NodeType::Memory, name, .. } => {
                Value::Memory(MemoryValue {
                    initial: name.clone(),
                    cells: HashMap::new(),
                })
            }
            Node::Input { name, .. } => {
                trace!("reading input {} = {}", name, self.environment.word(name));
                Value::Word(self.environment.word(name))
            }
            Node::Version { value, .. } => self.evaluate(value),
            Node::Read { memory, address, .. } => {
                let address = self.word(address);
                Value::Word(self.cell(memory, address))
            }
            Node::Write { memory, address, value, .. } => {
                let mut memory = self.memory(memory);
                let address = self.word(address);
                let value = self.word(value);
                memory.cells.insert(address, value);
                Value::Memory(memory)
            }
            Node::Add { left, right, .. } => self.word_op(left, right, bitvec::add),
            Node::Sub { left, right, .. } => self.word_op(left, right, bitvec::sub),
            Node::Mul { left, right, .. } => self.word_op(left, right, bitvec::mul),
            Node::Div { left, right, .. } => self.word_op(left, right, bitvec::sdiv),
            Node::Rem { left, right, .. } => self.word_op(left, right, bitvec::srem),
            Node::Sll { left, right, .. } => self.word_op(left, right, bitvec::sll),
            Node::Srl { left, right, .. } => self.word_op(left, right, bitvec::srl),
            Node::Sra { left, right, .. } => self.word_op(left, right, bitvec::sra),
            Node::Or { left, right, .. } => self.word_op(left, right, |a, b| a | b),
            Node::Xor { left, right, .. } => self.word_op(left, right, |a, b| a ^ b),
            Node::Slt { left, right, .. } => self.compare_op(left, right, bitvec::slt),
            Node::Ult { left, right, .. } => self.compare_op(left, right, bitvec::ult),
            Node::Eq { left, right, .. } => {
                let left = self.evaluate(left);
                let right = self.evaluate(right);
                Value::Bit(self.values_equal(&left, &right))
            }
            Node::And { sort: NodeType::Bit, left, right, .. } => {
                let left = self.bit(left);
                Value::Bit(left && self.bit(right))
            }
            Node::And { left, right, .. } => self.word_op(left, right, |a, b| a & b),
            Node::Not { sort: NodeType::Bit, value, .. } => Value::Bit(!self.bit(value)),
            Node::Not { value, .. } => Value::Word(!self.word(value)),
            Node::Ite { cond, left, right, .. } => {
                if self.bit(cond) {
                    self.evaluate(left)
                } else {
                    self.evaluate(right)
                }
            }
        }
    }

    // Memories are equal when every cell either of them touched agrees, all
    // other cells come from their initial arrays.
    fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Memory(l), Value::Memory(r)) => {
                l.initial == r.initial
                    && l.cells
                        .keys()
                        .chain(r.cells.keys())
                        .all(|address| self.read_cell(l, *address) == self.read_cell(r, *address))
            }
            (l, r) => l == r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::FormulaBuilder;

    #[test]
    fn evaluates_arithmetic_over_inputs() {
        let mut builder = FormulaBuilder::new();
        let x = builder.new_input("x".to_string(), NodeType::Word);
        let y = builder.new_input("y".to_string(), NodeType::Word);
        let sum = builder.new_add(x.clone(), y);
        let less = builder.new_slt(sum.clone(), x);

        let mut environment = Environment::new();
        environment.set_word("x", 5);
        environment.set_word("y", u32::MAX);

        let mut evaluator = Evaluator::new(&environment);
        assert_eq!(evaluator.word(&sum), 4);
        assert!(evaluator.bit(&less));
    }

    #[test]
    fn unset_inputs_read_as_zero() {
        let mut builder = FormulaBuilder::new();
        let x = builder.new_input("x".to_string(), NodeType::Word);
        assert_eq!(evaluate(&x, &Environment::new()), Value::Word(0));
    }

    #[test]
    fn memory_writes_shadow_initial_cells() {
        let mut builder = FormulaBuilder::new();
        let mem = builder.new_input("mem".to_string(), NodeType::Memory);
        let address = builder.new_const(8);
        let other = builder.new_const(12);
        let value = builder.new_const(42);
        let written = builder.new_write(mem.clone(), address.clone(), value);
        let hit = builder.new_read(written.clone(), address);
        let miss = builder.new_read(written.clone(), other);
        let unchanged = builder.new_eq(written, mem);

        let mut environment = Environment::new();
        environment.set_memory("mem", 12, 7);
        environment.set_memory("mem", 8, 1);

        let mut evaluator = Evaluator::new(&environment);
        assert_eq!(evaluator.word(&hit), 42);
        assert_eq!(evaluator.word(&miss), 7);
        assert!(!evaluator.bit(&unchanged));
    }

    #[test]
    fn storing_initial_value_keeps_memory_equal() {
        let mut builder = FormulaBuilder::new();
        let mem = builder.new_input("mem".to_string(), NodeType::Memory);
        let address = builder.new_const(8);
        let value = builder.new_const(3);
        let written = builder.new_write(mem.clone(), address, value);
        let unchanged = builder.new_eq(written, mem);

        let mut environment = Environment::new();
        environment.set_memory("mem", 8, 3);
        assert_eq!(evaluate(&unchanged, &environment), Value::Bit(true));
    }

    #[test]
    fn evaluates_long_version_chains() {
        let mut builder = FormulaBuilder::new();
        let mut current = builder.new_input("x".to_string(), NodeType::Word);
        let one = builder.new_const(1);
        for k in 1..=100_000 {
            let sum = builder.new_add(current, one.clone());
            current = builder.new_version(format!("p1_x1#{}", k), sum, NodeType::Word);
        }

        let mut environment = Environment::new();
        environment.set_word("x", 7);
        assert_eq!(Evaluator::new(&environment).word(&current), 100_007);
    }
}
