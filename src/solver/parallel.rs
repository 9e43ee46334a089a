use std::{io, panic, sync::mpsc::channel, thread};

use typed_index_collections::TiVec;

use crate::formula::{Clause, Cnf, Literal, Model, Variable};

use super::{
    dpll::{Brancher, Search},
    DpllSolver, PartialAssignment, Solver, SolverConfig, WORKER_STACK_SIZE,
};

type Cube = Vec<Literal>;

/// Variables ordered by descending occurrence count.
fn frequent_variables(formula: &Cnf) -> Vec<Variable> {
    let mut occurrences: TiVec<Variable, usize> = vec![0; formula.num_variables()].into();
    for literal in formula.clauses().flat_map(Clause::iter) {
        occurrences[literal.variable()] += 1;
    }

    let mut variables = occurrences
        .iter_enumerated()
        .filter(|(_, &count)| count > 0)
        .map(|(variable, &count)| (count, variable))
        .collect::<Vec<_>>();
    variables.sort_by(|a, b| b.cmp(a));
    variables.into_iter().map(|(_, variable)| variable).collect()
}

/// Splits the assignments of `variables` into `n` cubes that together cover every case.
fn cubes(variables: &[Variable], n: usize) -> Vec<Cube> {
    match n {
        0 => vec![],
        1 => vec![vec![]],
        _ => {
            let m = n / 2;
            let literal = Literal::new(variables[0], true);

            let mut left = cubes(&variables[1..], m);
            for cube in &mut left {
                cube.push(literal);
            }

            let mut right = cubes(&variables[1..], n - m);
            for cube in &mut right {
                cube.push(!literal);
            }

            left.extend(right);
            left
        }
    }
}

/// Runs DPLL on several sub-formulas at once.
///
/// The formula is split into cubes over its most frequent variables; it is satisfiable
/// iff one of the sub-formulas is. The first satisfiable worker wins and the others are
/// left to finish on their own.
#[derive(Debug)]
pub struct ParallelDpllSolver {
    formula: Cnf,
    config: SolverConfig,
}

impl Solver for ParallelDpllSolver {
    fn with_config(formula: Cnf, config: SolverConfig) -> Self {
        ParallelDpllSolver { formula, config }
    }

    fn solve(self) -> Option<Model> {
        if self.config.jobs <= 1 {
            return DpllSolver::with_config(self.formula, self.config).solve();
        }

        let mut working = self.formula.clone();
        if self.config.drop_tautologies {
            working.drop_tautologies();
        }

        let variables = frequent_variables(&working)
            .into_iter()
            .take(self.config.jobs)
            .collect::<Vec<_>>();
        // n cubes need at least log2(n) variables
        let jobs = match 1usize.checked_shl(variables.len() as u32) {
            Some(limit) => self.config.jobs.min(limit),
            None => self.config.jobs,
        };
        let cubes = cubes(&variables, jobs);
        debug!("Splitting into {} cubes over {} variables", cubes.len(), variables.len());

        let tasks = cubes
            .into_iter()
            .enumerate()
            .map(|(index, cube)| {
                let mut subformula = working.clone();
                for &literal in &cube {
                    subformula.add_clause(Clause::new(std::iter::once(literal)));
                }

                let seed = self.config.seed.map(|seed| seed.wrapping_add(index as u64));
                let mut search = Search::new(Brancher::new(self.config.strategy, seed));
                move || {
                    let result = search.run(subformula, PartialAssignment::new());
                    trace!("Cube {} finished: {}", index, result.is_some());
                    result
                }
            })
            .collect::<Vec<_>>();

        match first_some(tasks) {
            Ok(result) => result.map(|assignment| Model::from_partial(self.formula, &assignment)),
            Err(e) => {
                warn!("Failed to spawn a cube worker, solving sequentially: {}", e);
                DpllSolver::with_config(self.formula, self.config).solve()
            }
        }
    }
}

/// Runs every task on its own thread and returns the first `Some` to arrive.
///
/// Tasks still running when a result arrives are left to finish on their own. If no task
/// produced a result and one of them panicked, the panic is resumed on this thread.
fn first_some<T, F>(tasks: Vec<F>) -> io::Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Option<T> + Send + 'static,
{
    let (tx, rx) = channel();
    let mut handles = Vec::with_capacity(tasks.len());

    for (index, task) in tasks.into_iter().enumerate() {
        let worker_tx = tx.clone();
        let handle = thread::Builder::new()
            .name(format!("dpll-cube-{}", index))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                if let Some(result) = task() {
                    let _ = worker_tx.send(result);
                }
            })?;
        handles.push(handle);
    }

    // receiver blocks as long as some transmitter is alive
    drop(tx);

    if let Ok(result) = rx.recv() {
        return Ok(Some(result));
    }

    for handle in handles {
        if let Err(payload) = handle.join() {
            panic::resume_unwind(payload);
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cnf(clauses: &[&[i64]]) -> Cnf {
        clauses
            .iter()
            .map(|clause| Clause::from_dimacs(clause.iter().copied()).unwrap())
            .collect()
    }

    fn var(id: u32) -> Variable {
        Variable::new(id).unwrap()
    }

    fn parallel(jobs: usize) -> SolverConfig {
        SolverConfig {
            jobs,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn frequent_variables_order() {
        let formula = cnf(&[&[1, 3], &[-3, 2], &[3, -2], &[5]]);
        assert_eq!(frequent_variables(&formula)[..2], [var(3), var(2)]);
        assert_eq!(frequent_variables(&formula).len(), 4);
    }

    #[test]
    fn cubes_cover_all_cases() {
        let variables = [var(1), var(2)];
        assert_eq!(cubes(&variables, 1), vec![Vec::<Literal>::new()]);
        assert_eq!(cubes(&variables, 4).len(), 4);

        let three = cubes(&variables, 3);
        assert_eq!(three.len(), 3);
        assert_eq!(three[0], vec![Literal::new(var(1), true)]);
    }

    #[test]
    fn parallel_sat() {
        let formula = cnf(&[&[1, 2], &[-1, -2], &[2, 3], &[-3, 1]]);
        assert!(ParallelDpllSolver::with_config(formula, parallel(4)).solve().is_some());
    }

    #[test]
    fn parallel_unsat() {
        let formula = cnf(&[&[1, 2], &[1, -2], &[-1, 2], &[-1, -2]]);
        assert!(!ParallelDpllSolver::with_config(formula, parallel(4)).decide());
    }

    #[test]
    fn more_jobs_than_cubes() {
        let formula = cnf(&[&[1], &[-1, 2]]);
        assert!(ParallelDpllSolver::with_config(formula, parallel(64)).decide());

        assert!(ParallelDpllSolver::with_config(Cnf::new(), parallel(8)).decide());
        assert!(!ParallelDpllSolver::with_config(cnf(&[&[]]), parallel(8)).decide());
    }

    type Task = Box<dyn FnOnce() -> Option<u32> + Send>;

    #[test]
    fn first_some_returns_a_result() {
        let tasks: Vec<Task> = vec![Box::new(|| None), Box::new(|| Some(3)), Box::new(|| None)];
        assert_eq!(first_some(tasks).unwrap(), Some(3));

        let tasks: Vec<Task> = vec![Box::new(|| None), Box::new(|| None)];
        assert_eq!(first_some(tasks).unwrap(), None);
    }

    #[test]
    #[should_panic(expected = "cube search failed")]
    fn first_some_resumes_worker_panic() {
        let tasks: Vec<Task> = vec![
            Box::new(|| None),
            Box::new(|| -> Option<u32> { panic!("cube search failed") }),
        ];
        let _ = first_some(tasks);
    }
}
