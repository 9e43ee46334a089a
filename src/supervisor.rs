/*!
Runs one decision under a wall-clock deadline.

The search itself has no cancellation points, so the supervisor owns the deadline. A
worker thread cannot be stopped from outside: when it overruns, it is detached and keeps
its memory until it finishes. A child process is killed and reaped instead.
*/

use std::{
    fmt::Display,
    io,
    path::PathBuf,
    process::{Command, ExitStatus, Stdio},
    sync::mpsc::{channel, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use crate::prelude::*;
use crate::solver::{Solver, WORKER_STACK_SIZE};

/// Exit status of a satisfiable `check`, following the SAT competition convention.
pub const SAT_EXIT_CODE: i32 = 10;
/// Exit status of an unsatisfiable `check`.
pub const UNSAT_EXIT_CODE: i32 = 20;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to spawn the solver thread"))]
    SpawnThread { source: io::Error },
    #[snafu(display("The solver thread panicked"))]
    WorkerPanicked,
    #[snafu(display("Failed to spawn solver process '{}'", program.display()))]
    SpawnProcess { program: PathBuf, source: io::Error },
    #[snafu(display("Failed to wait for the solver process"))]
    WaitProcess { source: io::Error },
    #[snafu(display("The solver process exited with unexpected {}", status))]
    UnexpectedExit { status: ExitStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Sat,
    Unsat,
    Timeout,
}

impl Verdict {
    pub fn from_decision(satisfiable: bool) -> Self {
        if satisfiable {
            Verdict::Sat
        } else {
            Verdict::Unsat
        }
    }

    /// Maps a `check` exit code back to a verdict.
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            SAT_EXIT_CODE => Some(Verdict::Sat),
            UNSAT_EXIT_CODE => Some(Verdict::Unsat),
            _ => None,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Verdict::Sat => "SAT",
            Verdict::Unsat => "UNSAT",
            Verdict::Timeout => "TIMEOUT",
        };
        write!(f, "{}", name)
    }
}

/// A verdict and the wall-clock time spent reaching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervised {
    pub verdict: Verdict,
    pub elapsed: Duration,
}

/// Decides on a worker thread, giving up after `timeout`.
///
/// A panic inside the solver is reported as [`Error::WorkerPanicked`].
pub fn decide_with_deadline<S>(solver: S, timeout: Duration) -> Result<Supervised, Error>
where
    S: Solver + Send + 'static,
{
    let (tx, rx) = channel();
    let start = Instant::now();

    thread::Builder::new()
        .name("dpll-worker".to_owned())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || {
            let _ = tx.send(solver.decide());
        })
        .context(SpawnThread)?;

    match rx.recv_timeout(timeout) {
        Ok(satisfiable) => Ok(Supervised {
            verdict: Verdict::from_decision(satisfiable),
            elapsed: start.elapsed(),
        }),
        Err(RecvTimeoutError::Timeout) => {
            warn!("Abandoning the solver thread after {:?}", timeout);
            Ok(Supervised {
                verdict: Verdict::Timeout,
                elapsed: timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => WorkerPanicked.fail(),
    }
}

/// Runs `command` as a child process, reading the verdict from its exit code, and kills
/// it after `timeout`.
pub fn decide_in_subprocess(mut command: Command, timeout: Duration) -> Result<Supervised, Error> {
    let program = PathBuf::from(command.get_program());
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context(SpawnProcess { program })?;
    let start = Instant::now();

    loop {
        if let Some(status) = child.try_wait().context(WaitProcess)? {
            let verdict = status
                .code()
                .and_then(Verdict::from_exit_code)
                .context(UnexpectedExit { status })?;

            return Ok(Supervised {
                verdict,
                elapsed: start.elapsed(),
            });
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            debug!("Killing solver process {} after {:?}", child.id(), elapsed);
            // The child may exit between the poll and the kill; waiting reaps it either way.
            let _ = child.kill();
            child.wait().context(WaitProcess)?;

            return Ok(Supervised {
                verdict: Verdict::Timeout,
                elapsed: timeout,
            });
        }

        thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    }
}
