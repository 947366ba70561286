//! Bidirectional dependency tracking between cells.
//!
//! Every formula edit funnels through `replace_edges`, which keeps two
//! mirrored adjacency maps in step: which cells a formula reads, and which
//! formulas read a given cell. The first map answers the cycle check that
//! gates an edit; the second drives cache invalidation once the edit lands.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::position::Position;

/// Who-reads-whom for the whole sheet.
///
/// `reads[c]` holds the cells that `c`'s formula mentions, and `read_by[c]`
/// holds the formula cells that mention `c`. The two maps always mirror
/// each other, an entry disappears the moment its set drains (so the maps
/// stay as sparse as the sheet), and membership is set-based: a formula
/// mentioning A1 twice stores one edge. Nothing but `replace_edges` (and
/// its `drop_edges` shorthand) writes to either map.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// Forward edges: formula cell to the cells its expression mentions.
    reads: FxHashMap<Position, FxHashSet<Position>>,

    /// Reverse edges: cell to the formula cells whose expressions mention it.
    read_by: FxHashMap<Position, FxHashSet<Position>>,
}

impl DepGraph {
    /// A graph with no edges at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cells that `cell`'s formula currently reads.
    pub fn precedents(&self, cell: Position) -> impl Iterator<Item = Position> + '_ {
        self.reads
            .get(&cell)
            .map(|set| set.iter().copied())
            .into_iter()
            .flatten()
    }

    /// Formula cells currently reading `cell`.
    pub fn dependents(&self, cell: Position) -> impl Iterator<Item = Position> + '_ {
        self.read_by
            .get(&cell)
            .map(|set| set.iter().copied())
            .into_iter()
            .flatten()
    }

    /// True when the graph tracks dependencies for `cell`.
    pub fn has_precedents(&self, cell: Position) -> bool {
        self.reads.contains_key(&cell)
    }

    /// How many cells currently hold tracked dependencies.
    pub fn formula_cell_count(&self) -> usize {
        self.reads.len()
    }

    /// How many cells are read by at least one formula.
    pub fn referenced_cell_count(&self) -> usize {
        self.read_by.len()
    }

    /// Point `cell` at a fresh set of sources, unhooking whatever it read
    /// before. Both maps move together here, which is what keeps them
    /// mirrored; an empty set takes the cell out of the graph entirely.
    pub fn replace_edges(&mut self, cell: Position, new_reads: FxHashSet<Position>) {
        let old_reads = self.reads.remove(&cell).unwrap_or_default();
        for source in old_reads {
            if let Some(readers) = self.read_by.get_mut(&source) {
                readers.remove(&cell);
                if readers.is_empty() {
                    self.read_by.remove(&source);
                }
            }
        }

        if new_reads.is_empty() {
            return;
        }
        for source in &new_reads {
            self.read_by.entry(*source).or_default().insert(cell);
        }
        self.reads.insert(cell, new_reads);
    }

    /// Detach `cell` from the graph, as when its formula goes away.
    pub fn drop_edges(&mut self, cell: Position) {
        self.replace_edges(cell, FxHashSet::default());
    }

    /// Decide whether pointing `cell` at `new_refs` would make it read
    /// itself, directly or through other formulas.
    ///
    /// Walks depends-on edges depth-first out of every candidate reference,
    /// sharing one visited set across all of them; finding `cell` on that
    /// walk means some candidate ultimately reads it back. Cells the graph
    /// doesn't track are leaves. Nothing is mutated, so the caller can
    /// reject the edit with the sheet untouched, and the installed edges of
    /// every other cell stay authoritative while the check runs.
    pub fn would_create_cycle(&self, cell: Position, new_refs: &[Position]) -> Option<CycleReport> {
        if new_refs.contains(&cell) {
            return Some(CycleReport { cell, via: cell });
        }

        let mut visited = FxHashSet::default();
        let mut pending: Vec<Position> = new_refs.to_vec();

        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            for next in self.precedents(current) {
                if next == cell {
                    // `current` reads the edited cell and is itself reachable
                    // from a candidate reference, so the new edge closes a loop.
                    return Some(CycleReport { cell, via: current });
                }
                if !visited.contains(&next) {
                    pending.push(next);
                }
            }
        }

        None
    }

    /// Test-only sanity check: the two maps must mirror each other exactly,
    /// with no drained sets left behind. Panics on the first violation.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (cell, sources) in &self.reads {
            assert!(!sources.is_empty(), "drained read set left behind for {}", cell);
            for source in sources {
                let mirrored = self
                    .read_by
                    .get(source)
                    .is_some_and(|readers| readers.contains(cell));
                assert!(mirrored, "{} reads {} but the reverse entry is gone", cell, source);
            }
        }

        for (cell, readers) in &self.read_by {
            assert!(!readers.is_empty(), "drained reader set left behind for {}", cell);
            for reader in readers {
                let mirrored = self
                    .reads
                    .get(reader)
                    .is_some_and(|sources| sources.contains(cell));
                assert!(mirrored, "{} is listed as reading {} but doesn't", reader, cell);
            }
        }
    }
}

/// Diagnostic for a rejected formula edit: installing it would have made
/// the cell read itself, directly or through other formulas.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// The cell whose edit was rejected.
    pub cell: Position,
    /// The reference the loop was detected through; equal to `cell` for a
    /// direct self-reference.
    pub via: Position,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cell == self.via {
            write!(f, "formula at {} refers to its own cell", self.cell)
        } else {
            write!(
                f,
                "formula at {} would depend on itself through {}",
                self.cell, self.via
            )
        }
    }
}

impl std::error::Error for CycleReport {}
