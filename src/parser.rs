use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::formula::{Clause, Cnf, Header, Literal, LiteralParseError};
use crate::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to open CNF file '{}'", path.display()))]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("I/O error occurred while reading line {}", line_number))]
    ReadLine {
        line_number: usize,
        source: std::io::Error,
    },
    #[snafu(display("Problem line 'p cnf <num_variables> <num_clauses>' is not found"))]
    MissingProblemDefinition,
    #[snafu(display(
        "Malformed problem line '{}' on line {} - expected 'p cnf <num_variables> <num_clauses>'",
        line,
        line_number
    ))]
    MalformedProblemDefinition { line: String, line_number: usize },
    #[snafu(display("Clause found before the problem line on line {}", line_number))]
    ClauseBeforeProblemDefinition { line_number: usize },
    #[snafu(display("Invalid literal on line {}", line_number))]
    MalformedLiteral {
        line_number: usize,
        source: LiteralParseError,
    },
    #[snafu(display(
        "The last clause is not terminated with 0 ({} literals would be discarded)",
        pending
    ))]
    UnterminatedClause { pending: usize },
}

/// Parses `p cnf <num_variables> <num_clauses>`.
fn parse_problem_line(line: &str, line_number: usize) -> Result<Header, Error> {
    let splitted = line.split_whitespace().collect::<Vec<_>>();

    // We only support CNF DIMACS format
    ensure!(
        splitted.len() == 4 && splitted[0] == "p" && splitted[1] == "cnf",
        MalformedProblemDefinition { line, line_number }
    );

    match (splitted[2].parse::<usize>(), splitted[3].parse::<usize>()) {
        (Ok(num_variables), Ok(num_clauses)) => Ok(Header {
            num_variables,
            num_clauses,
        }),
        _ => MalformedProblemDefinition { line, line_number }.fail(),
    }
}

/// Parses a DIMACS CNF formula.
///
/// Clauses are read as a stream of literals terminated by `0`, so one clause may span
/// several lines and one line may hold several clauses. Reading stops at a line starting
/// with `%`. The counts in the problem line are only checked for diagnostics.
pub fn parse_reader(reader: impl BufRead) -> Result<Cnf, Error> {
    let mut header = None;
    let mut cnf = Cnf::new();
    let mut num_clauses = 0;
    let mut pending: Vec<Literal> = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.context(ReadLine { line_number })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('c') {
            // empty line, comment
            continue;
        }

        if header.is_none() {
            ensure!(
                trimmed.starts_with('p'),
                ClauseBeforeProblemDefinition { line_number }
            );
            header = Some(parse_problem_line(trimmed, line_number)?);
            continue;
        }

        if trimmed.starts_with('%') {
            break;
        }

        for token in trimmed.split_whitespace() {
            match token.parse::<Literal>() {
                Ok(literal) => pending.push(literal),
                Err(LiteralParseError::ZeroLiteral) => {
                    cnf.add_clause(Clause::new(pending.drain(..)));
                    num_clauses += 1;
                }
                Err(source) => {
                    return Err(Error::MalformedLiteral {
                        line_number,
                        source,
                    })
                }
            }
        }
    }

    let header = header.context(MissingProblemDefinition)?;
    ensure!(
        pending.is_empty(),
        UnterminatedClause {
            pending: pending.len()
        }
    );

    if num_clauses != header.num_clauses {
        warn!(
            "The number of clauses ({}) does not match the problem line ({})",
            num_clauses, header.num_clauses
        );
    }
    if cnf.num_variables() > header.num_variables {
        warn!(
            "Variable x{} exceeds the {} variables declared in the problem line",
            cnf.num_variables(),
            header.num_variables
        );
    }

    Ok(cnf.with_header(header))
}

/// Parses CNF formula from a file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Cnf, Error> {
    let path = path.as_ref();
    let file = File::open(path).context(OpenFile {
        path: path.to_owned(),
    })?;

    debug!("Parsing '{}'", path.display());
    parse_reader(BufReader::new(file))
}

impl FromStr for Cnf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reader(s.as_bytes())
    }
}
