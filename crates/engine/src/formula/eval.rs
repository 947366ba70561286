// Formula evaluator - evaluates expressions against a cell lookup

use crate::error::FormulaError;
use crate::position::Position;

use super::parser::{Expr, Op};

/// The seam between the evaluator and cell storage.
///
/// Implementations resolve a referenced position to the number arithmetic
/// sees; coercion and error propagation rules live behind this trait. The
/// sheet implements it; tests substitute fixtures.
pub trait CellLookup {
    fn numeric_value(&self, pos: Position) -> Result<f64, FormulaError>;
}

/// Evaluate an expression. Returns the number it produces, or the first
/// formula error encountered.
pub fn evaluate<L: CellLookup>(expr: &Expr, lookup: &L) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::CellRef(pos) => lookup.numeric_value(*pos),
        Expr::Neg(operand) => Ok(-evaluate(operand, lookup)?),
        Expr::BinaryOp { op, left, right } => {
            let l = evaluate(left, lookup)?;
            let r = evaluate(right, lookup)?;
            let result = match op {
                Op::Add => l + r,
                Op::Sub => l - r,
                Op::Mul => l * r,
                Op::Div => l / r,
            };
            // Division by zero and overflow/underflow all surface as Div0.
            if result.is_finite() {
                Ok(result)
            } else {
                Err(FormulaError::Div0)
            }
        }
    }
}
