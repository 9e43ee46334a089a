use std::{collections::BTreeMap, io, panic, thread};

use crate::formula::{Cnf, Model, Variable};

mod dpll;
mod parallel;

pub use dpll::{DpllSolver, SearchStats};
pub use parallel::ParallelDpllSolver;

/// Stack size for threads running the recursive search.
/// The recursion depth grows with the number of variables.
pub const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Variable values fixed along one search path.
pub type PartialAssignment = BTreeMap<Variable, bool>;

/// How the literal to split on is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SplitStrategy {
    /// Uniformly at random among the literals of the current formula.
    Random,
    /// The least literal of the current formula.
    First,
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub strategy: SplitStrategy,
    /// Seed for [`SplitStrategy::Random`]. Drawn from the OS when `None`.
    pub seed: Option<u64>,
    /// Number of sub-formulas searched concurrently by [`ParallelDpllSolver`].
    pub jobs: usize,
    /// Remove clauses holding a literal and its negation before the search.
    pub drop_tautologies: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            strategy: SplitStrategy::Random,
            seed: None,
            jobs: 1,
            drop_tautologies: false,
        }
    }
}

pub trait Solver: Sized {
    /// Creates a new solver instance with the default configuration.
    fn new(formula: Cnf) -> Self {
        Self::with_config(formula, SolverConfig::default())
    }

    /// Creates a new solver instance.
    fn with_config(formula: Cnf, config: SolverConfig) -> Self;

    /// Solves a CNF SAT problem with the solver.
    /// Returns `Some(Model)` if satisfiable, `None` otherwise.
    fn solve(self) -> Option<Model>;

    /// Returns whether the formula is satisfiable.
    fn decide(self) -> bool {
        self.solve().is_some()
    }
}

/// Solves on a new thread with [`WORKER_STACK_SIZE`] of stack and waits for it.
/// A panic of the solver is resumed on the calling thread.
pub fn solve_on_worker<S>(solver: S) -> io::Result<Option<Model>>
where
    S: Solver + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("dpll-search".to_owned())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || solver.solve())?;

    match handle.join() {
        Ok(result) => Ok(result),
        Err(payload) => panic::resume_unwind(payload),
    }
}
