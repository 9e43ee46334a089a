use rand::{rngs::StdRng, seq::IteratorRandom, SeedableRng};

use crate::formula::{Cnf, Literal, Model};

use super::{PartialAssignment, Solver, SolverConfig, SplitStrategy};

/// Counters collected over one search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Splits performed.
    pub decisions: u64,
    /// Unit clauses propagated.
    pub propagations: u64,
    /// Pure literals eliminated.
    pub pure_literals: u64,
    /// Deepest split nesting reached.
    pub max_depth: usize,
}

/// Chooses the literal to split on.
#[derive(Debug)]
pub(crate) struct Brancher {
    strategy: SplitStrategy,
    rng: StdRng,
}

impl Brancher {
    pub fn new(strategy: SplitStrategy, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Brancher { strategy, rng }
    }

    /// Picks among the literals of the current clause set only, so variables fixed
    /// earlier on this path are never chosen again.
    fn pick(&mut self, formula: &Cnf) -> Option<Literal> {
        let literals = formula.literals();
        match self.strategy {
            SplitStrategy::First => literals.iter().next().copied(),
            SplitStrategy::Random => literals.iter().copied().choose(&mut self.rng),
        }
    }
}

/// One DPLL search. Every call to [`Search::decide`] owns its formula, so a branch never
/// observes the rewrites made by its sibling.
#[derive(Debug)]
pub(crate) struct Search {
    brancher: Brancher,
    stats: SearchStats,
}

impl Search {
    pub fn new(brancher: Brancher) -> Self {
        Search {
            brancher,
            stats: Default::default(),
        }
    }

    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Returns the assignment that satisfied `formula`, `None` if it is unsatisfiable.
    pub fn run(
        &mut self,
        formula: Cnf,
        assignment: PartialAssignment,
    ) -> Option<PartialAssignment> {
        self.decide(formula, assignment, 0)
    }

    fn decide(
        &mut self,
        mut formula: Cnf,
        mut assignment: PartialAssignment,
        depth: usize,
    ) -> Option<PartialAssignment> {
        self.stats.max_depth = self.stats.max_depth.max(depth);

        while let Some(unit) = formula.propagate_unit() {
            trace!("Propagated {} at depth {}", unit, depth);
            self.stats.propagations += 1;
            assignment.insert(unit.variable(), unit.positive());

            if formula.is_falsified() {
                trace!("Empty clause after propagating {}", unit);
                return None;
            }
        }

        loop {
            let pure = formula.eliminate_pure_literals();
            if pure.is_empty() {
                break;
            }

            trace!("Eliminated {} pure literals at depth {}", pure.len(), depth);
            self.stats.pure_literals += pure.len() as u64;
            for literal in pure {
                assignment.insert(literal.variable(), literal.positive());
            }
        }

        if formula.is_satisfied() {
            return Some(assignment);
        }

        if formula.is_falsified() {
            return None;
        }

        self.split(formula, assignment, depth)
    }

    fn split(
        &mut self,
        formula: Cnf,
        assignment: PartialAssignment,
        depth: usize,
    ) -> Option<PartialAssignment> {
        let literal = match self.brancher.pick(&formula) {
            Some(literal) => literal,
            // Neither satisfied nor falsified, so some clause has a literal.
            None => unreachable!(),
        };

        self.stats.decisions += 1;
        trace!("Splitting on {} at depth {}", literal, depth);

        self.decide(formula.with_literal(literal), assignment.clone(), depth + 1)
            .or_else(|| self.decide(formula.with_literal(!literal), assignment, depth + 1))
    }
}

/// Recursive copy-on-split DPLL with unit propagation and pure literal elimination.
#[derive(Debug)]
pub struct DpllSolver {
    formula: Cnf,
    config: SolverConfig,
}

impl DpllSolver {
    /// Runs the search and reports the counters alongside the result.
    pub fn solve_with_stats(self) -> (Option<Model>, SearchStats) {
        let mut working = self.formula.clone();
        if self.config.drop_tautologies {
            let dropped = working.drop_tautologies();
            debug!("Dropped {} tautological clauses", dropped);
        }

        let mut search = Search::new(Brancher::new(self.config.strategy, self.config.seed));
        let result = search.run(working, PartialAssignment::new());
        let stats = search.stats();
        debug!(
            "DPLL finished with {} decisions, {} propagations, {} pure literals, depth {}",
            stats.decisions, stats.propagations, stats.pure_literals, stats.max_depth
        );

        let model = result.map(|assignment| Model::from_partial(self.formula, &assignment));
        (model, stats)
    }
}

impl Solver for DpllSolver {
    fn with_config(formula: Cnf, config: SolverConfig) -> Self {
        DpllSolver { formula, config }
    }

    fn solve(self) -> Option<Model> {
        self.solve_with_stats().0
    }
}
