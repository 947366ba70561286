//! Cell contents and the per-cell value cache.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::FormulaError;
use crate::formula::Formula;
use crate::position::Position;

/// Formula sigil: input starting with this (and longer than one character)
/// is parsed as a formula.
pub const FORMULA_SIGIL: char = '=';

/// Escape sigil: text starting with this renders without it, so literal
/// text may begin with '='.
pub const ESCAPE_SIGIL: char = '\'';

/// A computed cell value, as seen by readers and by dependent formulas.
///
/// `Display` renders the printed form: text verbatim, numbers via the
/// shortest round-trip decimal, errors by their tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Error(FormulaError),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Error(e) => write!(f, "{}", e),
        }
    }
}

/// What a cell holds. Transitions are driven solely by `Sheet::set_cell`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum CellContents {
    #[default]
    Empty,
    Text(String),
    /// Parsed formulas don't serialize; a saved sheet holds only literals.
    #[serde(skip)]
    Formula(Formula),
}

impl CellContents {
    /// Classify raw input text.
    ///
    /// Empty input is Empty; `'='`-prefixed input longer than one character
    /// parses as a formula (the lone string `"="` is ordinary text);
    /// everything else is stored verbatim as text.
    pub fn from_input(input: &str) -> Result<Self, String> {
        if input.is_empty() {
            Ok(CellContents::Empty)
        } else if input.len() > 1 && input.starts_with(FORMULA_SIGIL) {
            Ok(CellContents::Formula(Formula::parse(&input[1..])?))
        } else {
            Ok(CellContents::Text(input.to_string()))
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellContents::Empty)
    }

    /// Raw text form: what an editor shows, and what `set_cell` accepts
    /// back unchanged. Formulas render canonically with the '=' sigil.
    pub fn text(&self) -> String {
        match self {
            CellContents::Empty => String::new(),
            CellContents::Text(s) => s.clone(),
            CellContents::Formula(formula) => {
                format!("{}{}", FORMULA_SIGIL, formula.expression())
            }
        }
    }

    /// Positions this cell reads. Non-empty only for formulas.
    pub fn referenced_cells(&self) -> &[Position] {
        match self {
            CellContents::Formula(formula) => formula.referenced_cells(),
            _ => &[],
        }
    }
}

/// One sheet slot: contents plus the memoised value of the latest read.
///
/// The cache is interior-mutable so reads can memoise through a shared
/// borrow; the engine is single-threaded by contract. An absent cache
/// means stale: the next read recomputes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Cell {
    contents: CellContents,
    #[serde(skip)]
    cache: RefCell<Option<CellValue>>,
}

impl Cell {
    pub fn contents(&self) -> &CellContents {
        &self.contents
    }

    pub fn text(&self) -> String {
        self.contents.text()
    }

    pub fn referenced_cells(&self) -> &[Position] {
        self.contents.referenced_cells()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Install new contents, dropping any memoised value.
    pub(crate) fn install(&mut self, contents: CellContents) {
        self.contents = contents;
        *self.cache.get_mut() = None;
    }

    pub(crate) fn cached(&self) -> Option<CellValue> {
        self.cache.borrow().clone()
    }

    pub(crate) fn store_cache(&self, value: CellValue) {
        *self.cache.borrow_mut() = Some(value);
    }

    /// Drop the memoised value; returns true if one was present.
    pub(crate) fn clear_cache(&self) -> bool {
        self.cache.borrow_mut().take().is_some()
    }
}
