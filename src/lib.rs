#[macro_use]
extern crate log;

pub mod formula;
pub mod harness;
pub mod parser;
pub mod prelude;
pub mod report;
pub mod solver;
pub mod supervisor;
