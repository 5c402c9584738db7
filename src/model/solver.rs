use crate::model::NodeRef;
use std::collections::HashMap;
use std::time::Duration;

//
// Public Interface
//

/// Values of observed variables, keyed by variable name.
pub type Assignment = HashMap<String, u32>;

#[derive(Debug, Eq, PartialEq)]
pub enum Solution {
    /// The assertions are satisfiable, carrying a model of the observed
    /// variables.
    Sat(Assignment),
    Unsat,
    /// The solver gave up. The payload names the reason it reported.
    Unknown(String),
}

/// A satisfiability question over a node graph. All `assertions` must hold
/// at the same time. `observed` lists the variables whose values a
/// satisfying model reports.
#[derive(Debug)]
pub struct Query {
    pub lines: Vec<NodeRef>,
    pub assertions: Vec<NodeRef>,
    pub observed: Vec<NodeRef>,
}

impl Drop for Query {
    // Users come after their operands in `lines`. Releasing back to front,
    // once all roots are gone, frees one node at a time.
    fn drop(&mut self) {
        self.assertions.clear();
        self.observed.clear();
        while let Some(node) = self.lines.pop() {
            drop(node);
        }
    }
}

pub trait Solver {
    fn new(timeout: Option<Duration>) -> Self;
    fn name() -> &'static str;
    fn solve(&mut self, query: &Query) -> Solution;
}

//
// Private Implementation
//

pub mod none_impl {
    use crate::model::solver::{Query, Solution, Solver};
    use std::time::Duration;

    pub struct NoneSolver {}

    impl Solver for NoneSolver {
        fn name() -> &'static str {
            "None"
        }

        fn new(_timeout: Option<Duration>) -> Self {
            Self {}
        }

        fn solve(&mut self, _query: &Query) -> Solution {
            Solution::Unknown("no solver available".to_string())
        }
    }
}
