//! Formula parsing, evaluation, and reference extraction.

pub mod eval;
pub mod parser;
pub mod refs;

use crate::error::FormulaError;
use crate::position::Position;

use self::eval::CellLookup;
use self::parser::Expr;

/// A parsed formula: the expression tree plus its pre-extracted, sorted and
/// deduplicated reference list.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
    refs: Vec<Position>,
}

impl Formula {
    /// Parse an expression (without the leading '=').
    ///
    /// Every cell reference is validated against the sheet bounds during
    /// tokenizing, so a `Formula` only ever refers to valid positions.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let expr = parser::parse(expression)?;
        let refs = refs::extract_positions(&expr);
        Ok(Self { expr, refs })
    }

    /// Canonical rendering without the leading '=': minimal parentheses,
    /// stable across parse/print round-trips.
    pub fn expression(&self) -> String {
        self.expr.to_string()
    }

    /// The cells this formula reads, sorted row-major, deduplicated.
    pub fn referenced_cells(&self) -> &[Position] {
        &self.refs
    }

    /// Evaluate against a lookup. An `Err` here is a value for the caller
    /// to store, not a control-flow failure.
    pub fn evaluate<L: CellLookup>(&self, lookup: &L) -> Result<f64, FormulaError> {
        eval::evaluate(&self.expr, lookup)
    }
}
