//! Sheet storage and the transactional edit pipeline.
//!
//! The sheet owns every cell and the dependency graph; graph edges and
//! value caches are maintained only here. `set_cell` is the single
//! mutation path:
//!
//! ```text
//! classify text → cycle check → invalidate reverse closure
//!     → install contents → auto-create referenced cells → swap edges
//! ```
//!
//! Any failure before "install contents" leaves the sheet untouched.
//! Reads are lazy: a value is computed on first read and memoised until a
//! rewrite of the cell, or of anything it transitively reads, clears it.

use std::io::{self, Write};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellContents, CellValue, ESCAPE_SIGIL};
use crate::dep_graph::DepGraph;
use crate::error::{FormulaError, SheetError};
use crate::formula::eval::CellLookup;
use crate::position::{Position, Size};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sheet {
    cells: FxHashMap<Position, Cell>,
    /// Derived from cell contents; not serialized. A deserialized sheet
    /// holds only literals (formulas don't serialize), so empty is right.
    #[serde(skip)]
    dep_graph: DepGraph,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `text` at `pos`.
    ///
    /// Empty text empties the cell; `'='`-prefixed text (longer than one
    /// character) installs a formula; anything else is literal text.
    /// Fails with `InvalidPosition`, `FormulaSyntax`, or
    /// `CircularDependency`; in every failure case the sheet is exactly
    /// as it was before the call.
    pub fn set_cell(&mut self, pos: Position, text: &str) -> Result<(), SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }

        let contents = CellContents::from_input(text).map_err(SheetError::FormulaSyntax)?;

        if let Some(report) = self
            .dep_graph
            .would_create_cycle(pos, contents.referenced_cells())
        {
            return Err(SheetError::CircularDependency(report));
        }

        // Validation passed; from here on the edit commits.
        self.invalidate_dependents(pos);

        let refs: Vec<Position> = contents.referenced_cells().to_vec();
        self.cells.entry(pos).or_default().install(contents);

        // Referenced cells must exist, so `=A999` is a live edge even when
        // A999 was never written. Auto-created cells are Empty and don't
        // contribute to the printable size.
        for &referenced in &refs {
            self.cells.entry(referenced).or_default();
        }

        self.dep_graph.replace_edges(pos, refs.into_iter().collect());
        Ok(())
    }

    /// Reset `pos` to Empty.
    ///
    /// A never-populated slot is a no-op. A populated slot keeps its place
    /// (and its dependents' reverse edges) so cells that reference it stay
    /// wired; only the contents and caches change.
    pub fn clear_cell(&mut self, pos: Position) -> Result<(), SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }
        if self.cells.contains_key(&pos) {
            self.set_cell(pos, "")?;
        }
        Ok(())
    }

    /// Borrow the cell at `pos`, or None if the slot was never populated.
    pub fn cell(&self, pos: Position) -> Result<Option<&Cell>, SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }
        Ok(self.cells.get(&pos))
    }

    /// Mutably borrow the cell at `pos`, or None if never populated.
    ///
    /// The handle only exposes reads; contents and edges change through
    /// `set_cell` alone.
    pub fn cell_mut(&mut self, pos: Position) -> Result<Option<&mut Cell>, SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }
        Ok(self.cells.get_mut(&pos))
    }

    /// The value at `pos`: cached if present, otherwise evaluated and
    /// memoised. A never-populated or Empty cell reads as `Text("")`.
    pub fn value(&self, pos: Position) -> Result<CellValue, SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }
        Ok(self.value_unchecked(pos))
    }

    /// The raw text at `pos`: `""` for Empty or never-populated cells, the
    /// stored string for text (escape sigil included), `'='` plus the
    /// canonical expression for formulas.
    pub fn text(&self, pos: Position) -> Result<String, SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }
        Ok(self.cells.get(&pos).map(Cell::text).unwrap_or_default())
    }

    /// Read-only view of the dependency graph.
    pub fn dep_graph(&self) -> &DepGraph {
        &self.dep_graph
    }

    /// Tight bounding rectangle of non-empty cells. Allocated-but-Empty
    /// cells (cleared or auto-created) don't count. Empty sheet → (0, 0).
    pub fn printable_size(&self) -> Size {
        let mut size = Size::default();
        for (pos, cell) in &self.cells {
            if cell.is_empty() {
                continue;
            }
            size.rows = size.rows.max(pos.row + 1);
            size.cols = size.cols.max(pos.col + 1);
        }
        size
    }

    /// Print evaluated values as a grid: tab between columns, newline after
    /// every row including the last. Errors print their tag, absent and
    /// Empty cells print nothing.
    pub fn print_values<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let size = self.printable_size();
        for row in 0..size.rows {
            for col in 0..size.cols {
                if col > 0 {
                    out.write_all(b"\t")?;
                }
                write!(out, "{}", self.value_unchecked(Position::new(row, col)))?;
            }
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Print raw cell texts in the same grid shape as `print_values`.
    pub fn print_texts<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let size = self.printable_size();
        for row in 0..size.rows {
            for col in 0..size.cols {
                if col > 0 {
                    out.write_all(b"\t")?;
                }
                if let Some(cell) = self.cells.get(&Position::new(row, col)) {
                    write!(out, "{}", cell.text())?;
                }
            }
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    fn value_unchecked(&self, pos: Position) -> CellValue {
        let Some(cell) = self.cells.get(&pos) else {
            return CellValue::Text(String::new());
        };
        if let Some(value) = cell.cached() {
            return value;
        }

        let value = match cell.contents() {
            CellContents::Empty => CellValue::Text(String::new()),
            CellContents::Text(text) => CellValue::Text(match text.strip_prefix(ESCAPE_SIGIL) {
                Some(rest) => rest.to_string(),
                None => text.clone(),
            }),
            CellContents::Formula(formula) => match formula.evaluate(self) {
                Ok(number) => CellValue::Number(number),
                Err(error) => CellValue::Error(error),
            },
        };

        cell.store_cache(value.clone());
        value
    }

    /// Clear memoised values over the reverse closure of `start`.
    ///
    /// Depth-first over dependent edges. A dependent whose cache is already
    /// absent is not descended into: everything above it is already stale.
    /// The start cell is always descended from, whatever its cache state.
    /// Stale reverse entries are harmless here: clearing an absent cache is
    /// a no-op.
    fn invalidate_dependents(&mut self, start: Position) {
        let mut visited = FxHashSet::default();
        let mut stack = vec![start];

        while let Some(pos) = stack.pop() {
            if !visited.insert(pos) {
                continue;
            }
            if let Some(cell) = self.cells.get(&pos) {
                let was_cached = cell.clear_cache();
                if !was_cached && pos != start {
                    continue;
                }
            }
            for dependent in self.dep_graph.dependents(pos) {
                stack.push(dependent);
            }
        }
    }
}

impl CellLookup for Sheet {
    /// Resolve a referenced position for formula arithmetic.
    ///
    /// Invalid position → Ref error. Missing or Empty cell → 0.0. Number
    /// as-is, Error propagated, text parsed as a number (empty text is
    /// 0.0, unparsable text is a Value error).
    fn numeric_value(&self, pos: Position) -> Result<f64, FormulaError> {
        if !pos.is_valid() {
            return Err(FormulaError::Ref);
        }
        match self.value_unchecked(pos) {
            CellValue::Number(n) => Ok(n),
            CellValue::Error(e) => Err(e),
            CellValue::Text(text) => {
                if text.is_empty() {
                    Ok(0.0)
                } else {
                    text.parse::<f64>().map_err(|_| FormulaError::Value)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(text: &str) -> Position {
        Position::parse(text).unwrap()
    }

    fn sheet_with(entries: &[(&str, &str)]) -> Sheet {
        let mut sheet = Sheet::new();
        for (at, text) in entries {
            sheet.set_cell(pos(at), text).unwrap();
        }
        sheet
    }

    #[test]
    fn test_empty_sheet_reads() {
        let sheet = Sheet::new();
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Text(String::new()));
        assert_eq!(sheet.text(pos("A1")).unwrap(), "");
        assert!(sheet.cell(pos("A1")).unwrap().is_none());
        assert_eq!(sheet.printable_size(), Size::default());
    }

    #[test]
    fn test_invalid_position_rejected_everywhere() {
        let mut sheet = Sheet::new();
        let bad = Position::new(Position::MAX_ROWS, 0);

        assert!(matches!(
            sheet.set_cell(bad, "1"),
            Err(SheetError::InvalidPosition(_))
        ));
        assert!(matches!(
            sheet.clear_cell(bad),
            Err(SheetError::InvalidPosition(_))
        ));
        assert!(matches!(sheet.cell(bad), Err(SheetError::InvalidPosition(_))));
        assert!(matches!(
            sheet.cell_mut(bad),
            Err(SheetError::InvalidPosition(_))
        ));
        assert!(matches!(sheet.value(bad), Err(SheetError::InvalidPosition(_))));
        assert!(matches!(sheet.text(bad), Err(SheetError::InvalidPosition(_))));
    }

    #[test]
    fn test_text_and_number_values() {
        let sheet = sheet_with(&[("A1", "hello"), ("A2", "42")]);
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Text("hello".into()));
        // Literal numbers are stored as text; coercion happens in formulas.
        assert_eq!(sheet.value(pos("A2")).unwrap(), CellValue::Text("42".into()));
        assert_eq!(sheet.text(pos("A2")).unwrap(), "42");
    }

    #[test]
    fn test_escape_sigil() {
        let sheet = sheet_with(&[("A1", "'=B1")]);
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Text("=B1".into()));
        assert_eq!(sheet.text(pos("A1")).unwrap(), "'=B1");
        // No dependency edge was created for the escaped text
        assert_eq!(sheet.dep_graph().formula_cell_count(), 0);
    }

    #[test]
    fn test_formula_value_and_text() {
        let sheet = sheet_with(&[("A1", "2"), ("B1", "= A1 * (3 + 1)")]);
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(8.0));
        assert_eq!(sheet.text(pos("B1")).unwrap(), "=A1*(3+1)");
    }

    #[test]
    fn test_formula_recomputes_after_edit() {
        let mut sheet = sheet_with(&[("A1", "1"), ("B1", "=A1+1")]);
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(2.0));

        sheet.set_cell(pos("A1"), "10").unwrap();
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(11.0));
    }

    #[test]
    fn test_memoised_value_survives_unrelated_edit() {
        let mut sheet = sheet_with(&[("A1", "1"), ("B1", "=A1+1")]);
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(2.0));
        assert!(sheet.cell(pos("B1")).unwrap().unwrap().cached().is_some());

        // Editing an unrelated cell leaves B1's cache in place
        sheet.set_cell(pos("D4"), "junk").unwrap();
        assert!(sheet.cell(pos("B1")).unwrap().unwrap().cached().is_some());
    }

    #[test]
    fn test_invalidation_walks_the_chain() {
        let mut sheet = sheet_with(&[("A1", "1"), ("A2", "=A1+1"), ("A3", "=A2+1")]);
        assert_eq!(sheet.value(pos("A3")).unwrap(), CellValue::Number(3.0));

        sheet.set_cell(pos("A1"), "5").unwrap();
        assert!(sheet.cell(pos("A2")).unwrap().unwrap().cached().is_none());
        assert!(sheet.cell(pos("A3")).unwrap().unwrap().cached().is_none());
        assert_eq!(sheet.value(pos("A3")).unwrap(), CellValue::Number(7.0));
    }

    #[test]
    fn test_auto_created_reference_cells() {
        let sheet = sheet_with(&[("A1", "=C3+1")]);
        // C3 exists (Empty) so the reverse edge has a home slot
        let c3 = sheet.cell(pos("C3")).unwrap().unwrap();
        assert!(c3.is_empty());
        // ...but doesn't affect the printable size
        assert_eq!(sheet.printable_size(), Size { rows: 1, cols: 1 });
        // Empty reads as zero in arithmetic
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Number(1.0));
    }

    #[test]
    fn test_clear_cell_keeps_slot_and_edges() {
        let mut sheet = sheet_with(&[("A1", "3"), ("B1", "=A1*2")]);
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(6.0));

        sheet.clear_cell(pos("A1")).unwrap();

        // Slot survives as Empty; B1 still reads it (as zero now)
        assert!(sheet.cell(pos("A1")).unwrap().unwrap().is_empty());
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(0.0));
        assert_eq!(
            sheet.dep_graph().dependents(pos("A1")).collect::<Vec<_>>(),
            vec![pos("B1")]
        );
    }

    #[test]
    fn test_clear_cell_never_populated_is_noop() {
        let mut sheet = Sheet::new();
        sheet.clear_cell(pos("J10")).unwrap();
        assert!(sheet.cell(pos("J10")).unwrap().is_none());
    }

    #[test]
    fn test_clearing_a_formula_drops_its_edges() {
        let mut sheet = sheet_with(&[("A1", "1"), ("B1", "=A1")]);
        assert_eq!(sheet.dep_graph().formula_cell_count(), 1);

        sheet.clear_cell(pos("B1")).unwrap();
        assert_eq!(sheet.dep_graph().formula_cell_count(), 0);
        assert_eq!(sheet.dep_graph().dependents(pos("A1")).count(), 0);
    }

    #[test]
    fn test_rewrite_formula_rewires_edges() {
        let mut sheet = sheet_with(&[("A1", "1"), ("A2", "2"), ("B1", "=A1")]);
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(1.0));

        sheet.set_cell(pos("B1"), "=A2").unwrap();
        assert_eq!(sheet.dep_graph().dependents(pos("A1")).count(), 0);
        assert_eq!(
            sheet.dep_graph().dependents(pos("A2")).collect::<Vec<_>>(),
            vec![pos("B1")]
        );
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(2.0));
    }

    #[test]
    fn test_syntax_error_leaves_cell_unchanged() {
        let mut sheet = sheet_with(&[("A1", "42")]);
        let err = sheet.set_cell(pos("A1"), "=1+").unwrap_err();
        assert!(matches!(err, SheetError::FormulaSyntax(_)));
        assert_eq!(sheet.text(pos("A1")).unwrap(), "42");
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Text("42".into()));
    }

    #[test]
    fn test_cycle_error_leaves_everything_unchanged() {
        let mut sheet = sheet_with(&[("A1", "=B1"), ("B1", "7")]);
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Number(7.0));

        let err = sheet.set_cell(pos("B1"), "=A1").unwrap_err();
        assert!(matches!(err, SheetError::CircularDependency(_)));

        // B1 kept its old contents and A1's cache was not touched
        assert_eq!(sheet.text(pos("B1")).unwrap(), "7");
        assert!(sheet.cell(pos("A1")).unwrap().unwrap().cached().is_some());
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Number(7.0));
    }

    #[test]
    fn test_printable_size_tracks_non_empty() {
        let mut sheet = sheet_with(&[("A1", "x"), ("C5", "y")]);
        assert_eq!(sheet.printable_size(), Size { rows: 5, cols: 3 });

        sheet.clear_cell(pos("C5")).unwrap();
        assert_eq!(sheet.printable_size(), Size { rows: 1, cols: 1 });

        sheet.clear_cell(pos("A1")).unwrap();
        assert_eq!(sheet.printable_size(), Size::default());
    }

    #[test]
    fn test_print_values() {
        let sheet = sheet_with(&[("A1", "1"), ("B1", "=A1+1"), ("A2", "hi")]);
        let mut out = Vec::new();
        sheet.print_values(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\t2\nhi\t\n");
    }

    #[test]
    fn test_print_texts() {
        let sheet = sheet_with(&[("A1", "1"), ("B1", "= A1 + 1"), ("A2", "'=x")]);
        let mut out = Vec::new();
        sheet.print_texts(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1\t=A1+1\n'=x\t\n");
    }

    #[test]
    fn test_print_empty_sheet_is_empty_output() {
        let sheet = Sheet::new();
        let mut out = Vec::new();
        sheet.print_values(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_error_value_is_stored_not_raised() {
        let sheet = sheet_with(&[("A1", "abc"), ("B1", "=A1+1")]);
        assert_eq!(
            sheet.value(pos("B1")).unwrap(),
            CellValue::Error(FormulaError::Value)
        );
        // Reading again hits the memoised error
        assert_eq!(
            sheet.value(pos("B1")).unwrap(),
            CellValue::Error(FormulaError::Value)
        );
    }

    #[test]
    fn test_escaped_number_coerces_through_escape() {
        // '3 evaluates to the text "3", which a formula can use as 3
        let sheet = sheet_with(&[("A1", "'3"), ("B1", "=A1+1")]);
        assert_eq!(sheet.value(pos("B1")).unwrap(), CellValue::Number(4.0));
    }

    #[test]
    fn test_formula_with_no_refs() {
        let sheet = sheet_with(&[("A1", "=1+2*3")]);
        assert_eq!(sheet.value(pos("A1")).unwrap(), CellValue::Number(7.0));
        assert_eq!(sheet.dep_graph().formula_cell_count(), 0);
        // Still a formula cell as far as text goes
        assert_eq!(sheet.text(pos("A1")).unwrap(), "=1+2*3");
    }

    #[test]
    fn test_lookup_contract() {
        let sheet = sheet_with(&[("A1", "2.5"), ("B1", ""), ("C1", "=1/0")]);

        assert_eq!(sheet.numeric_value(pos("A1")), Ok(2.5));
        // Empty and never-populated cells read as zero
        assert_eq!(sheet.numeric_value(pos("B1")), Ok(0.0));
        assert_eq!(sheet.numeric_value(pos("Z9")), Ok(0.0));
        // Errors propagate; invalid positions are Ref errors
        assert_eq!(sheet.numeric_value(pos("C1")), Err(FormulaError::Div0));
        assert_eq!(
            sheet.numeric_value(Position::new(Position::MAX_ROWS, 0)),
            Err(FormulaError::Ref)
        );
    }
}
