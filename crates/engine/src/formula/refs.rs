//! Reference extraction from a formula AST.
//!
//! Produces the sorted, deduplicated list of positions an expression reads,
//! for dependency graph construction and the public reference-list contract.

use crate::position::Position;

use super::parser::Expr;

/// Extract every cell reference from an expression.
///
/// The result is sorted row-major and deduplicated, so callers get a
/// stable reference list regardless of how the formula is written.
pub fn extract_positions(expr: &Expr) -> Vec<Position> {
    let mut refs = Vec::new();
    collect(expr, &mut refs);
    refs.sort();
    refs.dedup();
    refs
}

fn collect(expr: &Expr, refs: &mut Vec<Position>) {
    match expr {
        Expr::Number(_) => {}
        Expr::CellRef(pos) => refs.push(*pos),
        Expr::Neg(operand) => collect(operand, refs),
        Expr::BinaryOp { left, right, .. } => {
            collect(left, refs);
            collect(right, refs);
        }
    }
}
