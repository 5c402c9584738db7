use crate::instruction::Instruction;
use crate::model::builder::{get_constant, FormulaBuilder};
use crate::model::emulate::{Environment, Evaluator};
use crate::model::executor::{execute_program, ExecutionState, ModelOptions};
use crate::model::register::{Gpr, Register};
use crate::model::solver::{Assignment, Query, Solution, Solver};
use crate::model::{get_name, ModelError, NodeRef};
use log::{debug, info, warn};
use std::fmt;

//
// Public Interface
//

pub const INITIAL_PREFIX: &str = "init_";
pub const ORIGINAL_PREFIX: &str = "p1_";
pub const OPTIMIZED_PREFIX: &str = "p2_";

/// Initial values of `x1` to `x31` under which the two programs end in
/// different states.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Counterexample {
    values: Vec<(Gpr, u32)>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Equivalent,
    NotEquivalent(Counterexample),
    /// The solver could not decide, with the reason it gave.
    Unknown(String),
}

/// Both programs modeled from one shared initial state, together with the
/// query asking for a difference in their final states.
pub struct EquivalenceQuery {
    pub initial: ExecutionState,
    pub original: ExecutionState,
    pub optimized: ExecutionState,
    pub difference: NodeRef,
    // Declared last so it is dropped after every other handle into the graph.
    pub query: Query,
}

impl Counterexample {
    /// Collects the initial register values from a solver model. Registers
    /// the model leaves out are unconstrained and reported as zero.
    pub fn from_assignment(assignment: &Assignment) -> Self {
        let values = Gpr::all()
            .map(|gpr| {
                let name = format!("{}{}", INITIAL_PREFIX, gpr);
                (gpr, assignment.get(&name).copied().unwrap_or(0))
            })
            .collect();
        Self { values }
    }

    pub fn value(&self, gpr: Gpr) -> u32 {
        self.values
            .iter()
            .find(|(g, _)| *g == gpr)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    pub fn values(&self) -> &[(Gpr, u32)] {
        &self.values
    }

    pub fn environment(&self) -> Environment {
        let mut environment = Environment::new();
        for (gpr, value) in self.values.iter() {
            environment.set_word(&format!("{}{}", INITIAL_PREFIX, gpr), *value);
        }
        environment
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (gpr, value)) in self.values.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{} = {}", gpr, value)?;
        }
        Ok(())
    }
}

/// Models both programs from the same symbolic initial state and builds a
/// query that is satisfiable exactly if their final states can differ.
///
/// Final states are compared on `x1` to `x31`, memory and the program
/// counter. Both final `x0` values are asserted to be zero as well.
pub fn build_query(
    original: &[Instruction],
    optimized: &[Instruction],
    options: &ModelOptions,
) -> Result<EquivalenceQuery, ModelError> {
    let mut builder = FormulaBuilder::new();
    let initial = ExecutionState::symbolic(&mut builder, INITIAL_PREFIX);

    let first = execute_program(&mut builder, &initial, ORIGINAL_PREFIX, original, options)?;
    let second = execute_program(&mut builder, &initial, OPTIMIZED_PREFIX, optimized, options)?;

    let same = states_equal(&mut builder, &first, &second);
    let difference = builder.new_not_bit(same);
    let zero = builder.new_const(0);
    let first_zero = builder.new_eq(first.registers.read(Register::Zero), zero.clone());
    let second_zero = builder.new_eq(second.registers.read(Register::Zero), zero);

    let observed = Gpr::all()
        .map(|gpr| initial.registers.read(Register::General(gpr)))
        .collect();

    debug!("equivalence query has {} nodes", builder.lines().len());

    Ok(EquivalenceQuery {
        query: Query {
            lines: builder.lines().to_vec(),
            assertions: vec![difference.clone(), first_zero, second_zero],
            observed,
        },
        initial,
        original: first,
        optimized: second,
        difference,
    })
}

/// Decides whether two programs end in the same state for every initial
/// register and memory state.
pub fn check_equivalence<S: Solver>(
    original: &[Instruction],
    optimized: &[Instruction],
    options: &ModelOptions,
    solver: &mut S,
) -> Result<Verdict, ModelError> {
    let equivalence = build_query(original, optimized, options)?;
    Ok(decide(&equivalence, solver))
}

/// Runs the solver on an already built query. Differences that folded to a
/// constant are decided without it.
pub fn decide<S: Solver>(equivalence: &EquivalenceQuery, solver: &mut S) -> Verdict {
    match get_constant(&equivalence.difference) {
        Some(0) => {
            info!("final states are syntactically equal, skipping solver");
            return Verdict::Equivalent;
        }
        Some(_) => {
            info!("final states differ for every initial state, skipping solver");
            let counterexample = Counterexample::from_assignment(&Assignment::new());
            for difference in equivalence.replay(&counterexample).iter() {
                debug!("final states differ: {}", difference);
            }
            return Verdict::NotEquivalent(counterexample);
        }
        None => {}
    }

    let solution = time_info!(format!("solved query with {}", S::name()), {
        solver.solve(&equivalence.query)
    });

    match solution {
        Solution::Sat(assignment) => {
            let counterexample = Counterexample::from_assignment(&assignment);
            let differences = equivalence.replay(&counterexample);
            if differences.is_empty() {
                debug!("counterexample differs only with a particular initial memory");
            }
            for difference in differences.iter() {
                debug!("final states differ: {}", difference);
            }
            Verdict::NotEquivalent(counterexample)
        }
        Solution::Unsat => Verdict::Equivalent,
        Solution::Unknown(reason) => {
            warn!("solver {} gave up: {}", S::name(), reason);
            Verdict::Unknown(reason)
        }
    }
}

impl EquivalenceQuery {
    /// Evaluates both final states concretely under `counterexample`, with
    /// all-zero initial memory, and describes every register and program
    /// counter mismatch.
    pub fn replay(&self, counterexample: &Counterexample) -> Vec<String> {
        let environment = counterexample.environment();
        let mut evaluator = Evaluator::new(&environment);
        let mut differences = Vec::new();

        for gpr in Gpr::all() {
            let reg = Register::General(gpr);
            let first = self.original.registers.read(reg);
            let second = self.optimized.registers.read(reg);
            let (a, b) = (evaluator.word(&first), evaluator.word(&second));
            if a != b {
                differences.push(format!(
                    "{}: {} ({}) vs {} ({})",
                    gpr,
                    a,
                    describe(&first),
                    b,
                    describe(&second)
                ));
            }
        }

        let (a, b) = (
            evaluator.word(&self.original.pc),
            evaluator.word(&self.optimized.pc),
        );
        if a != b {
            differences.push(format!("pc: {} vs {}", a, b));
        }

        differences
    }
}

//
// Private Implementation
//

fn states_equal(
    builder: &mut FormulaBuilder,
    first: &ExecutionState,
    second: &ExecutionState,
) -> NodeRef {
    let mut same = builder.new_bool(true);
    for gpr in Gpr::all() {
        let reg = Register::General(gpr);
        let eq_node = builder.new_eq(first.registers.read(reg), second.registers.read(reg));
        same = builder.new_and_bit(same, eq_node);
    }
    let memory_eq = builder.new_eq(
        first.memory.current().clone(),
        second.memory.current().clone(),
    );
    same = builder.new_and_bit(same, memory_eq);
    let pc_eq = builder.new_eq(first.pc.clone(), second.pc.clone());
    builder.new_and_bit(same, pc_eq)
}

fn describe(node: &NodeRef) -> String {
    get_name(node).unwrap_or_else(|| "constant".to_string())
}
