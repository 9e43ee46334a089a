/*!
A module to represent conjunctive normal form formula and the rewrite rules of DPLL.
*/

use std::{
    collections::{BTreeMap, BTreeSet},
    convert::{TryFrom, TryInto},
    fmt::Display,
    iter::FromIterator,
    num::NonZeroU32,
    str::FromStr,
};

use typed_index_collections::TiVec;

use crate::prelude::*;
use crate::solver::{DpllSolver, Solver};

#[derive(Debug, Snafu)]
pub enum LiteralParseError {
    #[snafu(display("Failed to parse literal '{}'", token))]
    ParseIntError {
        token: String,
        source: std::num::ParseIntError,
    },
    #[snafu(display("Literal 0 is reserved as the clause terminator"))]
    ZeroLiteral,
    #[snafu(display(
        "Variable ID {} is out of range (must be within 1 to {})",
        num,
        Variable::MAX_VARIABLE_ID
    ))]
    RangeError { num: u64 },
}

/// Newtype wrapper for variable ID.
/// Invariant: 0 < ID <= MAX_VARIABLE_ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(NonZeroU32);

impl Variable {
    pub const MAX_VARIABLE_ID: usize = std::u32::MAX as usize;

    /// Creates a variable from its DIMACS ID. Returns `None` for 0.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Variable)
    }

    pub fn id(&self) -> u32 {
        self.0.get()
    }

    pub fn as_index(&self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Creates a variable from a raw index.
    /// Returns `None` if the index is invalid.
    pub fn from_index(index: usize) -> Option<Self> {
        let id = index.checked_add(1)?;
        if id > Variable::MAX_VARIABLE_ID {
            return None;
        }
        Variable::new(id.try_into().ok()?)
    }
}

impl From<usize> for Variable {
    fn from(index: usize) -> Self {
        Variable::from_index(index).expect("variable index out of range")
    }
}

impl From<Variable> for usize {
    fn from(variable: Variable) -> Self {
        variable.as_index()
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// A variable or its negation.
///
/// Literals order by variable first and polarity second, so `¬x1 < x1 < ¬x2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Literal {
    variable: Variable,
    positive: bool,
}

impl Literal {
    pub fn new(variable: Variable, positive: bool) -> Self {
        Literal { variable, positive }
    }

    /// Converts a signed DIMACS integer into a literal.
    pub fn from_dimacs(value: i64) -> Result<Self, LiteralParseError> {
        ensure!(value != 0, ZeroLiteral);

        let num = value.unsigned_abs();
        let variable = u32::try_from(num)
            .ok()
            .and_then(Variable::new)
            .context(RangeError { num })?;

        Ok(Literal::new(variable, value > 0))
    }

    pub fn to_dimacs(&self) -> i64 {
        let id = i64::from(self.variable.id());
        if self.positive {
            id
        } else {
            -id
        }
    }

    pub fn variable(&self) -> Variable {
        self.variable
    }

    pub fn positive(&self) -> bool {
        self.positive
    }
}

impl FromStr for Literal {
    type Err = LiteralParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.parse::<i64>().context(ParseIntError { token: s })?;
        Literal::from_dimacs(value)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", if self.positive { "" } else { "¬" }, self.variable)
    }
}

impl std::ops::Not for Literal {
    type Output = Literal;

    fn not(self) -> Self::Output {
        Literal {
            variable: self.variable,
            positive: !self.positive,
        }
    }
}

/// Disjunction of distinct literals.
///
/// Two clauses are equal iff they hold the same literals, regardless of insertion order.
/// A clause with both `l` and `¬l` is kept as-is; see [`Clause::is_tautology`].
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Clause {
    literals: BTreeSet<Literal>,
}

impl Clause {
    pub fn new(literals: impl IntoIterator<Item = Literal>) -> Self {
        Clause {
            literals: literals.into_iter().collect(),
        }
    }

    /// The empty clause, which no assignment satisfies.
    pub fn empty() -> Self {
        Default::default()
    }

    /// Builds a clause from signed DIMACS integers.
    pub fn from_dimacs(
        values: impl IntoIterator<Item = i64>,
    ) -> Result<Self, LiteralParseError> {
        values.into_iter().map(Literal::from_dimacs).collect()
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Returns the sole literal of a unit clause.
    pub fn unit_literal(&self) -> Option<Literal> {
        if self.literals.len() == 1 {
            self.literals.iter().next().copied()
        } else {
            None
        }
    }

    pub fn contains_literal(&self, literal: Literal) -> bool {
        self.literals.contains(&literal)
    }

    /// Removes `literal` if present and reports whether it was.
    pub fn remove_literal(&mut self, literal: Literal) -> bool {
        self.literals.remove(&literal)
    }

    /// A clause holding a literal and its negation is satisfied by every assignment.
    pub fn is_tautology(&self) -> bool {
        self.literals
            .iter()
            .any(|&literal| literal.positive() && self.literals.contains(&!literal))
    }

    pub fn iter(&self) -> impl Iterator<Item = Literal> + '_ {
        self.literals.iter().copied()
    }
}

impl FromIterator<Literal> for Clause {
    fn from_iter<T: IntoIterator<Item = Literal>>(iter: T) -> Self {
        Clause::new(iter)
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "□");
        }

        write!(f, "(")?;

        let mut iter = self.literals.iter();
        if let Some(first) = iter.next() {
            write!(f, "{}", first)?;
        }
        for literal in iter {
            write!(f, " ∨ {}", literal)?;
        }

        write!(f, ")")?;

        Ok(())
    }
}

/// Counts declared on the `p cnf` line.
/// Diagnostic only, never trusted over the clauses themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub num_variables: usize,
    pub num_clauses: usize,
}

/// Formula representation in Conjunctive Normal Form
///
/// The clauses form a set: duplicates collapse, and two formulas are equal iff their
/// clause sets are equal. The header is ignored by equality.
#[derive(Debug, Clone, Default)]
pub struct Cnf {
    clauses: BTreeSet<Clause>,
    header: Option<Header>,
}

impl PartialEq for Cnf {
    fn eq(&self, other: &Self) -> bool {
        self.clauses == other.clauses
    }
}

impl Eq for Cnf {}

impl Cnf {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_clauses(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Cnf {
            clauses: clauses.into_iter().collect(),
            header: None,
        }
    }

    /// Attaches the declared counts of the source file.
    pub fn with_header(mut self, header: Header) -> Self {
        self.header = Some(header);
        self
    }

    pub fn header(&self) -> Option<Header> {
        self.header
    }

    /// Adds a clause, returning `false` if an equal clause was already present.
    pub fn add_clause(&mut self, clause: Clause) -> bool {
        self.clauses.insert(clause)
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> + '_ {
        self.clauses.iter()
    }

    pub fn num_clauses(&self) -> usize {
        self.clauses.len()
    }

    /// Variables referenced by any clause.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.clauses
            .iter()
            .flat_map(Clause::iter)
            .map(|literal| literal.variable())
            .collect()
    }

    /// Highest variable ID referenced by any clause, 0 for a formula without literals.
    pub fn num_variables(&self) -> usize {
        self.clauses
            .iter()
            .flat_map(Clause::iter)
            .map(|literal| literal.variable().id() as usize)
            .max()
            .unwrap_or(0)
    }

    /// Every literal of the current clause set. Both polarities of a variable may appear.
    pub fn literals(&self) -> BTreeSet<Literal> {
        self.clauses.iter().flat_map(Clause::iter).collect()
    }

    /// An empty clause set is satisfied.
    pub fn is_satisfied(&self) -> bool {
        self.clauses.is_empty()
    }

    /// A formula holding the empty clause cannot be satisfied.
    pub fn is_falsified(&self) -> bool {
        // The empty clause is the least element of the set.
        self.clauses
            .iter()
            .next()
            .map_or(false, |clause| clause.is_empty())
    }

    /// Forces the literal of the first unit clause to true.
    ///
    /// Clauses containing the literal are dropped (the unit clause included) and its
    /// negation is removed from the rest, which may leave the empty clause behind.
    /// Returns the propagated literal, or `None` without touching the formula if there
    /// is no unit clause.
    pub fn propagate_unit(&mut self) -> Option<Literal> {
        let unit = self.clauses.iter().find_map(Clause::unit_literal)?;

        let clauses = std::mem::take(&mut self.clauses);
        self.clauses = clauses
            .into_iter()
            .filter_map(|mut clause| {
                if clause.contains_literal(unit) {
                    None
                } else {
                    clause.remove_literal(!unit);
                    Some(clause)
                }
            })
            .collect();

        Some(unit)
    }

    /// Drops every clause that contains a pure literal, one whose negation appears
    /// nowhere in the formula.
    ///
    /// Returns the pure literals, which an assignment may all set to true at once.
    /// An empty result means the formula was left untouched. One call does not reach a
    /// fixed point; callers repeat until nothing is returned.
    pub fn eliminate_pure_literals(&mut self) -> Vec<Literal> {
        let literals = self.literals();
        let pure = literals
            .iter()
            .copied()
            .filter(|&literal| !literals.contains(&!literal))
            .collect::<BTreeSet<_>>();

        if pure.is_empty() {
            return Vec::new();
        }

        self.clauses
            .retain(|clause| !clause.iter().any(|literal| pure.contains(&literal)));

        pure.into_iter().collect()
    }

    /// Returns an independent copy of this formula conjoined with the unit clause `{literal}`.
    pub fn with_literal(&self, literal: Literal) -> Cnf {
        let mut formula = self.clone();
        formula.add_clause(Clause::new(std::iter::once(literal)));
        formula
    }

    /// Removes tautological clauses and returns how many were removed.
    pub fn drop_tautologies(&mut self) -> usize {
        let before = self.clauses.len();
        self.clauses.retain(|clause| !clause.is_tautology());
        before - self.clauses.len()
    }

    /// Decides satisfiability with DPLL. Consumes the formula.
    pub fn decide(self) -> bool {
        DpllSolver::new(self).decide()
    }
}

impl FromIterator<Clause> for Cnf {
    fn from_iter<T: IntoIterator<Item = Clause>>(iter: T) -> Self {
        Cnf::from_clauses(iter)
    }
}

impl Display for Cnf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CNF with {} variables (", self.num_variables())?;

        let mut iter = self.clauses.iter();
        if let Some(first) = iter.next() {
            write!(f, "{}", first)?;
        }
        for clause in iter {
            write!(f, " ∧ {}", clause)?;
        }

        write!(f, ")")?;

        Ok(())
    }
}

/// Represents a satisfying assignment for a formula.
#[derive(Debug, Clone)]
pub struct Model {
    formula: Cnf,
    assignment: TiVec<Variable, bool>,
}

impl Model {
    /// Creates a new model from a formula and an assignment.
    ///
    /// # Panics
    ///
    /// Panics when `assignment` is invalid (e.g., too short, unsatisfying).
    pub fn new(formula: Cnf, assignment: TiVec<Variable, bool>) -> Self {
        assert!(assignment.len() >= formula.num_variables());
        assert!(
            formula.clauses().all(|clause| clause
                .iter()
                .any(|literal| assignment[literal.variable()] == literal.positive())),
            "assignment does not satisfy the formula"
        );

        Model {
            formula,
            assignment,
        }
    }

    /// Completes a partial assignment, setting every unassigned variable to true.
    ///
    /// The model spans the variables the clauses mention. The header count is not
    /// consulted, so variables only declared on the `p cnf` line are left out.
    ///
    /// # Panics
    ///
    /// Panics when the completed assignment does not satisfy `formula`.
    pub fn from_partial(formula: Cnf, partial: &BTreeMap<Variable, bool>) -> Self {
        let assignment = (0..formula.num_variables())
            .map(|index| {
                partial
                    .get(&Variable::from(index))
                    .copied()
                    .unwrap_or(true)
            })
            .collect::<Vec<_>>();

        Model::new(formula, TiVec::from(assignment))
    }

    pub fn formula(&self) -> &Cnf {
        &self.formula
    }

    pub fn assignment(&self) -> &TiVec<Variable, bool> {
        &self.assignment
    }

    /// Value of `variable`, `None` if it is outside the model.
    pub fn value(&self, variable: Variable) -> Option<bool> {
        self.assignment.get(variable).copied()
    }

    /// The assignment as true literals, in variable order.
    pub fn literals(&self) -> impl Iterator<Item = Literal> + '_ {
        self.assignment
            .iter_enumerated()
            .map(|(variable, &value)| Literal::new(variable, value))
    }
}

impl Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Model for {}\nAssignment:", self.formula)?;
        for (variable, &val) in self.assignment.iter_enumerated() {
            write!(f, "\n  {}: {}", variable, val)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(value: i64) -> Literal {
        Literal::from_dimacs(value).unwrap()
    }

    fn cnf(clauses: &[&[i64]]) -> Cnf {
        clauses
            .iter()
            .map(|clause| Clause::from_dimacs(clause.iter().copied()).unwrap())
            .collect()
    }

    #[test]
    fn literal_conversions() {
        assert_eq!(lit(-3).variable().id(), 3);
        assert!(!lit(-3).positive());
        assert_eq!(lit(7).to_dimacs(), 7);
        assert_eq!(!lit(7), lit(-7));
        assert_eq!("-12".parse::<Literal>().unwrap(), lit(-12));

        assert!(matches!(
            Literal::from_dimacs(0),
            Err(LiteralParseError::ZeroLiteral)
        ));
        assert!(matches!(
            Literal::from_dimacs(1 << 40),
            Err(LiteralParseError::RangeError { .. })
        ));
        assert!(matches!(
            "x1".parse::<Literal>(),
            Err(LiteralParseError::ParseIntError { .. })
        ));
    }

    #[test]
    fn clause_is_a_set() {
        let a = Clause::from_dimacs(vec![1, -2, 1]).unwrap();
        let b = Clause::from_dimacs(vec![-2, 1]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.unit_literal(), None);
        assert!(a.contains_literal(lit(-2)));
        assert!(!a.contains_literal(lit(2)));
    }

    #[test]
    fn clause_remove_literal() {
        let mut clause = Clause::from_dimacs(vec![4]).unwrap();
        assert_eq!(clause.unit_literal(), Some(lit(4)));

        assert!(!clause.remove_literal(lit(-4)));
        assert_eq!(clause.len(), 1);

        assert!(clause.remove_literal(lit(4)));
        assert!(clause.is_empty());
        assert_eq!(clause.to_string(), "□");
    }

    #[test]
    fn tautology_detection() {
        assert!(Clause::from_dimacs(vec![2, 3, -2]).unwrap().is_tautology());
        assert!(!Clause::from_dimacs(vec![2, 3]).unwrap().is_tautology());

        let mut formula = cnf(&[&[1, -1], &[2, 3], &[-3, 3]]);
        assert_eq!(formula.drop_tautologies(), 2);
        assert_eq!(formula, cnf(&[&[2, 3]]));
    }

    #[test]
    fn duplicate_clauses_collapse() {
        let formula = cnf(&[&[1, 2], &[2, 1], &[-1]]);
        assert_eq!(formula.num_clauses(), 2);
        assert_eq!(formula, cnf(&[&[1, 2], &[-1]]));
    }

    #[test]
    fn equality_ignores_header() {
        let plain = cnf(&[&[1, 2]]);
        let declared = cnf(&[&[1, 2]]).with_header(Header {
            num_variables: 10,
            num_clauses: 3,
        });
        assert_eq!(plain, declared);
    }

    #[test]
    fn literals_and_variables() {
        let formula = cnf(&[&[1, -2], &[2, 5]]);
        let literals = formula.literals().into_iter().collect::<Vec<_>>();
        assert_eq!(literals, vec![lit(1), lit(-2), lit(2), lit(5)]);
        assert_eq!(formula.variables().len(), 3);
        assert_eq!(formula.num_variables(), 5);
        assert_eq!(Cnf::new().num_variables(), 0);
    }

    #[test]
    fn base_cases() {
        assert!(Cnf::new().is_satisfied());
        assert!(!Cnf::new().is_falsified());

        let falsified = Cnf::from_clauses(vec![Clause::empty(), Clause::new(vec![lit(1)])]);
        assert!(falsified.is_falsified());
        assert!(!falsified.is_satisfied());
    }

    #[test]
    fn unit_propagation_rewrites() {
        let mut formula = cnf(&[&[1], &[1, 2], &[-1, 3], &[2, 3]]);
        assert_eq!(formula.propagate_unit(), Some(lit(1)));
        assert_eq!(formula, cnf(&[&[3], &[2, 3]]));
    }

    #[test]
    fn unit_propagation_produces_empty_clause() {
        let mut formula = cnf(&[&[1], &[-1]]);
        assert_eq!(formula.propagate_unit(), Some(lit(-1)));
        assert!(formula.is_falsified());
    }

    #[test]
    fn unit_propagation_without_unit_is_noop() {
        let mut formula = cnf(&[&[1, 2], &[-1, -2]]);
        let before = formula.clone();
        assert_eq!(formula.propagate_unit(), None);
        assert_eq!(formula, before);
    }

    #[test]
    fn pure_literal_elimination() {
        let mut formula = cnf(&[&[1, 2], &[-2, 3], &[1, 3]]);
        let pure = formula.eliminate_pure_literals();
        assert_eq!(pure, vec![lit(1), lit(3)]);
        assert!(formula.is_satisfied());
    }

    #[test]
    fn pure_literal_elimination_reaches_fixed_point() {
        // Only x3 is pure at first; dropping (¬x2 ∨ x3) leaves x2 pure.
        let mut formula = cnf(&[&[1, 2], &[-1, 2], &[-2, 3]]);
        let mut rounds = 0;
        while !formula.eliminate_pure_literals().is_empty() {
            rounds += 1;
        }
        assert_eq!(rounds, 2);
        assert!(formula.is_satisfied());
    }

    #[test]
    fn pure_literal_elimination_without_pure_is_noop() {
        let mut formula = cnf(&[&[1, 2], &[-1, -2]]);
        let before = formula.clone();
        assert!(formula.eliminate_pure_literals().is_empty());
        assert_eq!(formula, before);
    }

    #[test]
    fn with_literal_copies() {
        let formula = cnf(&[&[1, 2]]);
        let mut branch = formula.with_literal(lit(-1));
        assert_eq!(branch.num_clauses(), 2);
        assert_eq!(formula.num_clauses(), 1);

        branch.propagate_unit();
        assert_eq!(branch, cnf(&[&[2]]));
        assert_eq!(formula, cnf(&[&[1, 2]]));
    }

    #[test]
    fn model_from_partial_fills_defaults() {
        let formula = cnf(&[&[-1, 2], &[3]]).with_header(Header {
            num_variables: 4,
            num_clauses: 2,
        });
        let mut partial = BTreeMap::new();
        partial.insert(lit(1).variable(), false);

        let model = Model::from_partial(formula, &partial);
        assert_eq!(model.assignment().len(), 3);
        assert_eq!(model.value(lit(1).variable()), Some(false));
        assert_eq!(model.value(lit(2).variable()), Some(true));
        assert_eq!(model.value(lit(4).variable()), None);
        assert_eq!(
            model.literals().map(|l| l.to_dimacs()).collect::<Vec<_>>(),
            vec![-1, 2, 3]
        );
    }

    #[test]
    fn model_ignores_declared_variable_count() {
        let formula = cnf(&[&[1]]).with_header(Header {
            num_variables: usize::MAX,
            num_clauses: 1,
        });

        let model = Model::from_partial(formula, &BTreeMap::new());
        assert_eq!(model.assignment().len(), 1);
        assert_eq!(model.value(lit(1).variable()), Some(true));
    }

    #[test]
    #[should_panic(expected = "assignment does not satisfy the formula")]
    fn model_rejects_unsatisfying_assignment() {
        let formula = cnf(&[&[-1]]);
        Model::new(formula, TiVec::from(vec![true]));
    }
}
