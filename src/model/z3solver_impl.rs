use crate::model::solver::{Assignment, Query, Solution, Solver};
use crate::model::{get_name, get_operands, HashableNodeRef, Node, NodeRef, NodeType, WORD_WIDTH};
use log::{debug, trace};
use std::collections::HashMap;
use std::time::Duration;
use z3_solver::{
    ast::{Array, Ast, Bool, Dynamic, BV},
    Config, Context, SatResult, Solver as Z3Solver, Sort,
};

pub struct Z3SolverWrapper {
    timeout: Option<Duration>,
}

impl Solver for Z3SolverWrapper {
    fn name() -> &'static str {
        "Z3"
    }

    fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    fn solve(&mut self, query: &Query) -> Solution {
        let mut config = Config::new();
        if let Some(timeout) = self.timeout {
            config.set_timeout_msec(timeout.as_millis() as u64);
        }
        let context = Context::new(&config);
        let solver = Z3Solver::new(&context);
        let mut translator = Translator::new(&context);

        for assertion in query.assertions.iter() {
            let z3_bool = translator.visit(assertion).as_bool().expect("bool");
            solver.assert(&z3_bool);
        }
        let observed: Vec<(String, BV)> = query
            .observed
            .iter()
            .filter_map(|node| {
                let name = get_name(node)?;
                let z3_bv = translator.visit(node).as_bv()?;
                Some((name, z3_bv))
            })
            .collect();
        for binding in translator.bindings.iter() {
            solver.assert(binding);
        }
        debug!(
            "asserting {} formulas and {} bindings",
            query.assertions.len(),
            translator.bindings.len()
        );

        match solver.check() {
            SatResult::Sat => match solver.get_model() {
                Some(model) => {
                    let assignment: Assignment = observed
                        .into_iter()
                        .filter_map(|(name, z3_bv)| {
                            let value = model.eval(&z3_bv, true)?.as_u64()?;
                            Some((name, value as u32))
                        })
                        .collect();
                    Solution::Sat(assignment)
                }
                None => Solution::Unknown("solver produced no model".to_string()),
            },
            SatResult::Unsat => Solution::Unsat,
            SatResult::Unknown => Solution::Unknown(
                solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        }
    }
}

// Translation lives as long as one context, every query gets a fresh one.
struct Translator<'ctx> {
    context: &'ctx Context,
    mapping: HashMap<HashableNodeRef, Dynamic<'ctx>>,
    bindings: Vec<Bool<'ctx>>,
    word_sort: Sort<'ctx>,
}

impl<'ctx> Translator<'ctx> {
    fn new(context: &'ctx Context) -> Self {
        Self {
            context,
            mapping: HashMap::new(),
            bindings: Vec::new(),
            word_sort: Sort::bitvector(context, WORD_WIDTH),
        }
    }

    // Operands are translated before their users, so `translate` only
    // visits nodes that are already mapped.
    fn visit(&mut self, node: &NodeRef) -> &Dynamic<'ctx> {
        let mut pending = vec![node.clone()];
        while let Some(current) = pending.last().cloned() {
            let key = HashableNodeRef::from(current.clone());
            if self.mapping.contains_key(&key) {
                pending.pop();
                continue;
            }
            let missing: Vec<NodeRef> = get_operands(&current)
                .into_iter()
                .filter(|operand| {
                    !self.mapping.contains_key(&HashableNodeRef::from(operand.clone()))
                })
                .collect();
            if missing.is_empty() {
                let value = self.translate(&current);
                assert!(!self.mapping.contains_key(&key));
                self.mapping.insert(key, value);
                pending.pop();
            } else {
                pending.extend(missing);
            }
        }
        &self.mapping[&HashableNodeRef::from(node.clone())]
    }

    fn visit_bv(&mut self, node: &NodeRef) -> BV<'ctx> {
        self.visit(node).as_bv().expect("bv")
    }

    fn visit_bool(&mut self, node: &NodeRef) -> Bool<'ctx> {
        self.visit(node).as_bool().expect("bool")
    }

    fn new_variable(&self, sort: &NodeType, name: &str) -> Dynamic<'ctx> {
        trace!("declaring {}", name);
        match sort {
            NodeType::Bit => Bool::new_const(self.context, name).into(),
            NodeType::Word => BV::new_const(self.context, name, WORD_WIDTH).into(),
            NodeType::Memory => Dynamic::from_ast(&Array::new_const(
                self.context,
                name,
                &self.word_sort,
                &self.word_sort,
            )),
        }
    }

    #[rustfmt::skip]
    fn translate(&mut self, node: &NodeRef) -> Dynamic<'ctx> {
        match &*node.borrow() {
            Node::Const { sort: NodeType::Bit, imm, .. } => {
                Bool::from_bool(self.context, *imm != 0).into()
            }
            Node::Const { imm, .. } => {
                BV::from_u64(self.context, *imm, WORD_WIDTH).into()
            }
            Node::Input { sort, name, .. } => self.new_variable(sort, name),
            Node::Version { sort, name, value, .. } => {
                let z3_value = self.visit(value).clone();
                let z3_variable = self.new_variable(sort, name);
                self.bindings.push(z3_variable._eq(&z3_value));
                z3_variable
            }
            Node::Read { memory, address, .. } => {
                let z3_memory = self.visit(memory).as_array().expect("array");
                let z3_address = self.visit_bv(address);
                z3_memory.select(&z3_address)
            }
            Node::Write { memory, address, value, .. } => {
                let z3_memory = self.visit(memory).as_array().expect("array");
                let z3_address = self.visit_bv(address);
                let z3_value = self.visit_bv(value);
                Dynamic::from_ast(&z3_memory.store(&z3_address, &z3_value))
            }
            Node::Add { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvadd(&z3_right).into()
            }
            Node::Sub { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvsub(&z3_right).into()
            }
            Node::Mul { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvmul(&z3_right).into()
            }
            Node::Div { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvsdiv(&z3_right).into()
            }
            Node::Rem { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvsrem(&z3_right).into()
            }
            Node::Sll { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvshl(&z3_right).into()
            }
            Node::Srl { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvlshr(&z3_right).into()
            }
            Node::Sra { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvashr(&z3_right).into()
            }
            Node::Slt { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvslt(&z3_right).into()
            }
            Node::Ult { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvult(&z3_right).into()
            }
            Node::Eq { left, right, .. } => {
                let z3_left = self.visit(left).clone();
                let z3_right = self.visit(right).clone();
                z3_left._eq(&z3_right).into()
            }
            Node::And { sort: NodeType::Bit, left, right, .. } => {
                let z3_left = self.visit_bool(left);
                let z3_right = self.visit_bool(right);
                Bool::and(self.context, &[&z3_left, &z3_right]).into()
            }
            Node::And { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvand(&z3_right).into()
            }
            Node::Or { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvor(&z3_right).into()
            }
            Node::Xor { left, right, .. } => {
                let z3_left = self.visit_bv(left);
                let z3_right = self.visit_bv(right);
                z3_left.bvxor(&z3_right).into()
            }
            Node::Not { sort: NodeType::Bit, value, .. } => {
                let z3_value = self.visit_bool(value);
                z3_value.not().into()
            }
            Node::Not { value, .. } => {
                let z3_value = self.visit_bv(value);
                z3_value.bvnot().into()
            }
            Node::Ite { cond, left, right, .. } => {
                let z3_cond = self.visit_bool(cond);
                let z3_left = self.visit(left).clone();
                let z3_right = self.visit(right).clone();
                z3_cond.ite(&z3_left, &z3_right)
            }
        }
    }
}
