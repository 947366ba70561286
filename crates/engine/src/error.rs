//! Error types for the sheet API and formula evaluation.
//!
//! `SheetError` aborts a mutating call and leaves the sheet untouched.
//! `FormulaError` never escapes a cell boundary as a failure: evaluation
//! captures it as the cell's value, and dependent formulas see it through
//! the lookup and may produce their own.

use serde::{Deserialize, Serialize};

use crate::dep_graph::CycleReport;
use crate::position::Position;

/// Recoverable formula evaluation error, stored as a cell value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormulaError {
    /// Reference to a position outside the sheet bounds.
    Ref,
    /// Non-numeric text used arithmetically.
    Value,
    /// Division by zero, or arithmetic overflow/underflow.
    Div0,
}

impl FormulaError {
    /// Short display tag, as printed in value output.
    pub fn tag(self) -> &'static str {
        match self {
            FormulaError::Ref => "#REF!",
            FormulaError::Value => "#VALUE!",
            FormulaError::Div0 => "#DIV/0!",
        }
    }
}

impl std::fmt::Display for FormulaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl std::error::Error for FormulaError {}

/// Error returned by the mutating sheet API.
#[derive(Clone, Debug)]
pub enum SheetError {
    /// Position predicate failed at the API boundary.
    InvalidPosition(Position),
    /// The formula text did not parse. The cell is unchanged.
    FormulaSyntax(String),
    /// Installing the formula would close a dependency cycle. The cell and
    /// the graph are unchanged.
    CircularDependency(CycleReport),
}

impl std::fmt::Display for SheetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetError::InvalidPosition(pos) => {
                write!(f, "position {} is out of sheet range", pos)
            }
            SheetError::FormulaSyntax(msg) => write!(f, "formula syntax error: {}", msg),
            SheetError::CircularDependency(report) => write!(f, "{}", report),
        }
    }
}

impl std::error::Error for SheetError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_error_tags() {
        assert_eq!(FormulaError::Ref.to_string(), "#REF!");
        assert_eq!(FormulaError::Value.to_string(), "#VALUE!");
        assert_eq!(FormulaError::Div0.to_string(), "#DIV/0!");
    }

    #[test]
    fn test_sheet_error_display() {
        let err = SheetError::InvalidPosition(Position::new(Position::MAX_ROWS, 0));
        assert!(err.to_string().contains("out of sheet range"));

        let err = SheetError::FormulaSyntax("Unexpected character: ?".to_string());
        assert!(err.to_string().contains("syntax"));
    }
}
