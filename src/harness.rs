/*!
Batch runs over a corpus of DIMACS files.
*/

use std::{
    fmt::Display,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    process::Command,
    time::{Duration, Instant},
};

use crate::formula::Cnf;
use crate::parser::parse_file;
use crate::prelude::*;
use crate::report::one_line;
use crate::solver::{ParallelDpllSolver, Solver, SolverConfig, SplitStrategy};
use crate::supervisor::{self, decide_in_subprocess, decide_with_deadline, Supervised, Verdict};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to read input directory '{}'", path.display()))]
    ReadDir { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to supervise the solver on '{}'", path.display()))]
    Supervise {
        path: PathBuf,
        source: supervisor::Error,
    },
    #[snafu(display("Failed to write the report"))]
    WriteReport { source: io::Error },
    #[snafu(display("Process isolation needs the path of a solver executable"))]
    MissingProgram,
}

/// Where each decision runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Isolation {
    /// A worker thread of this process. Timed out workers cannot be stopped and keep
    /// running next to later decisions, so this is only suited to runs without timeouts.
    Thread,
    /// A child process running `check`. Timed out children are killed.
    Process,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub timeout: Duration,
    pub isolation: Isolation,
    pub solver: SolverConfig,
    /// Executable providing the `check` command. Required by [`Isolation::Process`].
    pub program: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            timeout: Duration::from_secs(10),
            isolation: Isolation::Process,
            solver: SolverConfig::default(),
            program: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Verdict(Verdict),
    /// The file could not be parsed. Holds the error chain.
    Error(String),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Verdict(verdict) => write!(f, "{}", verdict),
            Outcome::Error(_) => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub path: PathBuf,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl Record {
    fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_else(|| self.path.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub records: Vec<Record>,
}

impl Summary {
    pub fn count(&self, outcome: &Outcome) -> usize {
        self.records
            .iter()
            .filter(|record| &record.outcome == outcome)
            .count()
    }

    pub fn errors(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches!(record.outcome, Outcome::Error(_)))
            .count()
    }

    pub fn total_time(&self) -> Duration {
        self.records.iter().map(|record| record.elapsed).sum()
    }

    /// Writes `filename,result,runtime` rows, runtime in seconds.
    pub fn write_csv(&self, mut writer: impl Write) -> Result<(), Error> {
        writeln!(writer, "filename,result,runtime").context(WriteReport)?;
        for record in &self.records {
            writeln!(
                writer,
                "{},{},{:.6}",
                csv_field(&record.file_name()),
                record.outcome,
                record.elapsed.as_secs_f64()
            )
            .context(WriteReport)?;
        }
        writer.flush().context(WriteReport)
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files: {} SAT, {} UNSAT, {} TIMEOUT, {} ERROR in {:.2}s",
            self.records.len(),
            self.count(&Outcome::Verdict(Verdict::Sat)),
            self.count(&Outcome::Verdict(Verdict::Unsat)),
            self.count(&Outcome::Verdict(Verdict::Timeout)),
            self.errors(),
            self.total_time().as_secs_f64()
        )
    }
}

/// Quotes a field holding a separator, a quote, or a line break.
fn csv_field(field: &str) -> String {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Lists the `.cnf` files of `dir`, sorted by name.
pub fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).context(ReadDir { path: dir })? {
        let path = entry.context(ReadDir { path: dir })?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "cnf") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self, Error> {
        ensure!(
            config.isolation == Isolation::Thread || config.program.is_some(),
            MissingProgram
        );
        Ok(Harness { config })
    }

    /// Command line re-running this configuration on `path` in a child process.
    fn child_command(&self, program: &Path, path: &Path) -> Command {
        let solver = &self.config.solver;
        let mut command = Command::new(program);
        command.arg("check").arg(path).arg("--strategy").arg(match solver.strategy {
            SplitStrategy::Random => "random",
            SplitStrategy::First => "first",
        });
        command.arg("--jobs").arg(solver.jobs.to_string());
        if let Some(seed) = solver.seed {
            command.arg("--seed").arg(seed.to_string());
        }
        if solver.drop_tautologies {
            command.arg("--drop-tautologies");
        }
        command
    }

    fn supervise(&self, formula: Cnf, path: &Path) -> Result<Supervised, supervisor::Error> {
        let timeout = self.config.timeout;
        let solver = self.config.solver.clone();

        // Harness::new ensures process isolation has a program
        match &self.config.program {
            Some(program) if self.config.isolation == Isolation::Process => {
                decide_in_subprocess(self.child_command(program, path), timeout)
            }
            _ => {
                // A single job runs plain DPLL.
                decide_with_deadline(ParallelDpllSolver::with_config(formula, solver), timeout)
            }
        }
    }

    /// Decides one file. A parse failure is recorded, not returned.
    pub fn run_file(&self, path: &Path) -> Result<Record, Error> {
        let start = Instant::now();
        let formula = match parse_file(path) {
            Ok(formula) => formula,
            Err(e) => {
                let message = one_line(&e);
                error!("Skipping '{}': {}", path.display(), message);
                return Ok(Record {
                    path: path.to_owned(),
                    outcome: Outcome::Error(message),
                    elapsed: start.elapsed(),
                });
            }
        };
        debug!(
            "'{}': {} variables, {} clauses",
            path.display(),
            formula.num_variables(),
            formula.num_clauses()
        );

        let supervised = self
            .supervise(formula, path)
            .context(Supervise { path })?;
        info!(
            "{}: {} in {:.2}s",
            path.display(),
            supervised.verdict,
            supervised.elapsed.as_secs_f64()
        );

        Ok(Record {
            path: path.to_owned(),
            outcome: Outcome::Verdict(supervised.verdict),
            elapsed: supervised.elapsed,
        })
    }

    pub fn run_all(&self, paths: impl IntoIterator<Item = PathBuf>) -> Result<Summary, Error> {
        let mut summary = Summary::default();
        for path in paths {
            summary.records.push(self.run_file(&path)?);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn harness() -> Harness {
        Harness::new(HarnessConfig {
            timeout: Duration::from_secs(30),
            isolation: Isolation::Thread,
            solver: SolverConfig {
                seed: Some(1),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn collects_sorted_cnf_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.cnf", "p cnf 0 0\n");
        write(dir.path(), "a.cnf", "p cnf 0 0\n");
        write(dir.path(), "notes.txt", "not a formula\n");
        fs::create_dir(dir.path().join("nested.cnf")).unwrap();

        let inputs = collect_inputs(dir.path()).unwrap();
        let names = inputs
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a.cnf", "b.cnf"]);
    }

    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect_inputs(&dir.path().join("absent"));
        assert!(matches!(result, Err(Error::ReadDir { .. })));
    }

    #[test]
    fn records_each_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let sat = write(dir.path(), "sat.cnf", "p cnf 2 2\n1 2 0\n-1 -2 0\n");
        let unsat = write(dir.path(), "unsat.cnf", "p cnf 1 2\n1 0\n-1 0\n");
        let broken = write(dir.path(), "broken.cnf", "p cnf 1 1\n1\n");

        let summary = harness().run_all(vec![sat, unsat, broken]).unwrap();
        let outcomes = summary
            .records
            .iter()
            .map(|record| record.outcome.to_string())
            .collect::<Vec<_>>();
        assert_eq!(outcomes, ["SAT", "UNSAT", "ERROR"]);
        assert_eq!(summary.count(&Outcome::Verdict(Verdict::Sat)), 1);
        assert_eq!(summary.errors(), 1);

        match &summary.records[2].outcome {
            Outcome::Error(message) => assert!(message.contains("not terminated")),
            outcome => panic!("unexpected outcome {}", outcome),
        }
    }

    #[test]
    fn parallel_jobs_in_threads() {
        let dir = tempfile::tempdir().unwrap();
        let unsat = write(
            dir.path(),
            "full2.cnf",
            "p cnf 2 4\n1 2 0\n1 -2 0\n-1 2 0\n-1 -2 0\n",
        );

        let harness = Harness::new(HarnessConfig {
            isolation: Isolation::Thread,
            solver: SolverConfig {
                jobs: 4,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let record = harness.run_file(&unsat).unwrap();
        assert_eq!(record.outcome, Outcome::Verdict(Verdict::Unsat));
    }

    #[test]
    fn csv_report() {
        let summary = Summary {
            records: vec![
                Record {
                    path: PathBuf::from("corpus/aim-50.cnf"),
                    outcome: Outcome::Verdict(Verdict::Sat),
                    elapsed: Duration::from_millis(1500),
                },
                Record {
                    path: PathBuf::from("corpus/odd,name.cnf"),
                    outcome: Outcome::Verdict(Verdict::Timeout),
                    elapsed: Duration::from_secs(10),
                },
            ],
        };

        let mut buffer = Vec::new();
        summary.write_csv(&mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "filename,result,runtime\n\
             aim-50.cnf,SAT,1.500000\n\
             \"odd,name.cnf\",TIMEOUT,10.000000\n"
        );
        assert_eq!(
            summary.to_string(),
            "2 files: 1 SAT, 0 UNSAT, 1 TIMEOUT, 0 ERROR in 11.50s"
        );
    }

    #[test]
    fn process_isolation_requires_program() {
        assert_eq!(HarnessConfig::default().isolation, Isolation::Process);
        assert!(matches!(
            Harness::new(HarnessConfig::default()),
            Err(Error::MissingProgram)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn process_isolation_runs_program() {
        let dir = tempfile::tempdir().unwrap();
        let formula = write(dir.path(), "unit.cnf", "p cnf 2 2\n1 0\n-1 2 0\n");

        // `false` exits with 1, which is neither verdict
        let harness = Harness::new(HarnessConfig {
            program: Some(PathBuf::from("false")),
            ..Default::default()
        })
        .unwrap();
        let result = harness.run_file(&formula);
        assert!(matches!(
            result,
            Err(Error::Supervise {
                source: supervisor::Error::UnexpectedExit { .. },
                ..
            })
        ));
    }
}
