use std::{
    env,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    process,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use log::info;
use pretty_env_logger::formatted_builder;
use satire_dpll::{
    formula::Model,
    harness::{self, collect_inputs, Harness, HarnessConfig, Isolation},
    parser::{self, parse_file},
    prelude::*,
    report::Report,
    solver::{solve_on_worker, ParallelDpllSolver, Solver, SolverConfig, SplitStrategy},
    supervisor::{SAT_EXIT_CODE, UNSAT_EXIT_CODE},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse CNF file '{}'", path.display()))]
    ParserError { path: PathBuf, source: parser::Error },
    #[snafu(display("Batch run failed"))]
    HarnessError { source: harness::Error },
    #[snafu(display("Failed to locate the solver executable"))]
    CurrentExe { source: io::Error },
    #[snafu(display("Failed to create report file '{}'", path.display()))]
    CreateReport { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to spawn the solver thread"))]
    SpawnSolver { source: io::Error },
    #[snafu(display("Failed to write to stdout"))]
    Stdout { source: io::Error },
}

#[derive(Parser)]
#[command(name = "satire-dpll", version, about = "Decides DIMACS CNF formulas with DPLL")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decide one formula. Exits with 10 if satisfiable and 20 if not.
    Check {
        file: PathBuf,
        /// Print the satisfying assignment as DIMACS `v` lines
        #[arg(long)]
        model: bool,
        #[command(flatten)]
        solver: SolverArgs,
    },
    /// Decide every `.cnf` file of a directory under a deadline.
    Batch {
        dir: PathBuf,
        /// Seconds allowed per formula
        #[arg(long, default_value_t = 10)]
        timeout: u64,
        #[arg(long, value_enum, default_value_t = Isolation::Process)]
        isolation: Isolation,
        /// Write `filename,result,runtime` rows to this file
        #[arg(long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        solver: SolverArgs,
    },
}

#[derive(Args)]
struct SolverArgs {
    #[arg(long, value_enum, default_value_t = SplitStrategy::Random)]
    strategy: SplitStrategy,
    /// Seed for random splitting
    #[arg(long)]
    seed: Option<u64>,
    /// Sub-formulas searched in parallel
    #[arg(long, default_value_t = 1)]
    jobs: usize,
    /// Remove tautological clauses before the search
    #[arg(long)]
    drop_tautologies: bool,
}

impl From<SolverArgs> for SolverConfig {
    fn from(args: SolverArgs) -> Self {
        SolverConfig {
            strategy: args.strategy,
            seed: args.seed,
            jobs: args.jobs,
            drop_tautologies: args.drop_tautologies,
        }
    }
}

fn write_model(out: &mut impl Write, model: &Model) -> io::Result<()> {
    const PER_LINE: usize = 10;

    let literals = model.literals().collect::<Vec<_>>();
    for chunk in literals.chunks(PER_LINE) {
        write!(out, "v")?;
        for literal in chunk {
            write!(out, " {}", literal.to_dimacs())?;
        }
        writeln!(out)?;
    }
    writeln!(out, "v 0")
}

fn check(file: PathBuf, print_model: bool, config: SolverConfig) -> Result<i32, Error> {
    let formula = parse_file(&file).context(ParserError { path: file })?;
    let result = solve_on_worker(ParallelDpllSolver::with_config(formula, config))
        .context(SpawnSolver)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let code = match &result {
        Some(model) => {
            writeln!(out, "s SATISFIABLE").context(Stdout)?;
            if print_model {
                write_model(&mut out, model).context(Stdout)?;
            }
            SAT_EXIT_CODE
        }
        None => {
            writeln!(out, "s UNSATISFIABLE").context(Stdout)?;
            UNSAT_EXIT_CODE
        }
    };
    out.flush().context(Stdout)?;

    Ok(code)
}

fn batch(
    dir: PathBuf,
    timeout: u64,
    isolation: Isolation,
    output: Option<PathBuf>,
    solver: SolverConfig,
) -> Result<(), Error> {
    let program = match isolation {
        Isolation::Process => Some(env::current_exe().context(CurrentExe)?),
        Isolation::Thread => None,
    };
    let harness = Harness::new(HarnessConfig {
        timeout: Duration::from_secs(timeout),
        isolation,
        solver,
        program,
    })
    .context(HarnessError)?;

    let inputs = collect_inputs(&dir).context(HarnessError)?;
    info!("Running {} formulas from '{}'", inputs.len(), dir.display());
    let summary = harness.run_all(inputs).context(HarnessError)?;

    if let Some(path) = output {
        let file = File::create(&path).context(CreateReport { path: path.clone() })?;
        summary
            .write_csv(BufWriter::new(file))
            .context(HarnessError)?;
        info!("Wrote results to '{}'", path.display());
    }

    for record in &summary.records {
        println!(
            "{:<8} {:>9.3}s  {}",
            record.outcome.to_string(),
            record.elapsed.as_secs_f64(),
            record.path.display()
        );
    }
    println!("{}", summary);

    Ok(())
}

fn init_logger() {
    let mut builder = formatted_builder();

    if let Ok(s) = ::std::env::var("RUST_LOG") {
        builder.parse_filters(&s);
    } else {
        if cfg!(debug_assertions) {
            builder.parse_filters("satire_dpll=debug");
        } else {
            builder.parse_filters("satire_dpll=warn");
        }
    }

    builder.try_init().expect("Failed to initialize the logger");
}

fn main() -> Result<(), Report> {
    init_logger();

    let code = match Cli::parse().command {
        Command::Check {
            file,
            model,
            solver,
        } => check(file, model, solver.into())?,
        Command::Batch {
            dir,
            timeout,
            isolation,
            output,
            solver,
        } => {
            batch(dir, timeout, isolation, output, solver.into())?;
            0
        }
    };

    process::exit(code)
}
