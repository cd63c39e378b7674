//! Dependency graph for formula cells.
//!
//! Tracks precedents (cells a formula reads) and dependents (cells whose
//! formulas read a given cell) for cycle detection and cache invalidation.
//!
//! # Invariants
//!
//! 1. **Bidirectional consistency:** If A ∈ preds[B] then B ∈ succs[A], and
//!    vice versa.
//! 2. **No dangling entries:** Empty sets are removed, not stored.
//! 3. **No duplicate edges:** Set semantics enforced by FxHashSet.
//! 4. **Atomic updates:** `replace_edges` is the only mutator that touches
//!    both maps.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::position::Position;

/// Persistent dependency graph over cell positions.
///
/// Maintains bidirectional adjacency for O(1) lookups:
/// - `preds[B]` = cells that B reads (precedents)
/// - `succs[A]` = cells that read A (dependents)
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// Precedents: for each formula cell B, the cells A it reads.
    preds: FxHashMap<Position, FxHashSet<Position>>,

    /// Dependents: for each referenced cell A, the formula cells B reading it.
    succs: FxHashMap<Position, FxHashSet<Position>>,
}

impl DepGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cells this formula cell reads (precedents).
    pub fn precedents(&self, cell: Position) -> impl Iterator<Item = Position> + '_ {
        self.preds
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Returns the cells that read this cell (dependents).
    pub fn dependents(&self, cell: Position) -> impl Iterator<Item = Position> + '_ {
        self.succs
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Replace all edges for a formula cell atomically.
    ///
    /// This is the primary mutation API. It:
    /// 1. Removes the cell from all its old precedents' dependent sets
    /// 2. Clears the cell's precedent set
    /// 3. Adds the cell to all new precedents' dependent sets
    /// 4. Stores the cell's new precedent set
    ///
    /// Pass an empty set to clear all edges for this cell.
    pub fn replace_edges(&mut self, formula_cell: Position, new_preds: FxHashSet<Position>) {
        // Step 1: Remove old edges
        if let Some(old_preds) = self.preds.remove(&formula_cell) {
            for pred in old_preds {
                if let Some(deps) = self.succs.get_mut(&pred) {
                    deps.remove(&formula_cell);
                    // Clean up empty entries (invariant: no dangling)
                    if deps.is_empty() {
                        self.succs.remove(&pred);
                    }
                }
            }
        }

        // Step 2: If no new precedents, we're done (not a formula or no refs)
        if new_preds.is_empty() {
            return;
        }

        // Step 3: Add new edges
        for pred in &new_preds {
            self.succs.entry(*pred).or_default().insert(formula_cell);
        }

        // Step 4: Store new precedents
        self.preds.insert(formula_cell, new_preds);
    }

    /// Clear all edges for a cell (formula removed or cell cleared).
    pub fn clear_cell(&mut self, cell: Position) {
        self.replace_edges(cell, FxHashSet::default());
    }

    /// Check if assigning `cell` a formula reading `new_preds` would create
    /// a cycle. Does not modify the graph.
    ///
    /// The prospective edges are supplied as the frontier while every other
    /// cell contributes its committed edges, so the check runs against the
    /// graph exactly as a successful commit would leave it. A cycle exists
    /// iff some prospective precedent already reaches `cell`, i.e. iff `cell`
    /// reaches a prospective precedent along dependent edges. Every dependent
    /// is followed; a visited set bounds the walk.
    pub fn would_create_cycle(&self, cell: Position, new_preds: &[Position]) -> Option<CycleReport> {
        // Self-reference check
        if new_preds.contains(&cell) {
            return Some(CycleReport::self_reference(cell));
        }

        let new_preds_set: FxHashSet<Position> = new_preds.iter().copied().collect();
        let mut visited = FxHashSet::default();
        let mut stack = vec![cell];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }

            if let Some(deps) = self.succs.get(&current) {
                for &dep in deps {
                    if new_preds_set.contains(&dep) {
                        // dep -> ... -> cell -> dep would close the loop
                        return Some(CycleReport::cycle(vec![dep, cell]));
                    }
                    stack.push(dep);
                }
            }
        }

        None
    }

    /// All cells whose formulas transitively read `cell`, in traversal order.
    /// `cell` itself is not included. This is the cache-invalidation closure;
    /// the visited set bounds the walk even under heavy fan-in.
    pub fn transitive_dependents(&self, cell: Position) -> Vec<Position> {
        let mut visited = FxHashSet::default();
        let mut stack: Vec<Position> = self.dependents(cell).collect();
        let mut closure = Vec::new();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            closure.push(current);
            stack.extend(self.dependents(current));
        }

        closure
    }

    /// Check all invariants. Panics if any are violated.
    ///
    /// Only available in test builds.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        // Invariant 1: Bidirectional consistency (preds → succs)
        for (formula_cell, preds) in &self.preds {
            for pred in preds {
                assert!(
                    self.succs.get(pred).map_or(false, |s| s.contains(formula_cell)),
                    "Missing succ edge: {} should have {} in dependents",
                    pred,
                    formula_cell
                );
            }
        }

        // Invariant 1: Bidirectional consistency (succs → preds)
        for (cell, dependents) in &self.succs {
            for dep in dependents {
                assert!(
                    self.preds.get(dep).map_or(false, |s| s.contains(cell)),
                    "Missing pred edge: {} should have {} in precedents",
                    dep,
                    cell
                );
            }
        }

        // Invariant 2: No empty sets stored
        for (cell, preds) in &self.preds {
            assert!(!preds.is_empty(), "Empty preds set stored for {}", cell);
        }
        for (cell, succs) in &self.succs {
            assert!(!succs.is_empty(), "Empty succs set stored for {}", cell);
        }
    }
}

// =============================================================================
// CycleReport
// =============================================================================

/// Report produced when cycle detection rejects an assignment.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cells participating in the cycle. May be a subset for large cycles.
    pub cells: Vec<Position>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    /// Create a cycle report for a self-referencing cell.
    pub fn self_reference(cell: Position) -> Self {
        Self {
            cells: vec![cell],
            message: format!("Cell {} references itself", cell),
        }
    }

    /// Create a cycle report for a multi-cell cycle.
    pub fn cycle(cells: Vec<Position>) -> Self {
        let cell_list: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        let message = format!("Circular reference: {}", cell_list.join(" -> "));
        Self { cells, message }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CycleReport {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    fn set(cells: &[Position]) -> FxHashSet<Position> {
        cells.iter().copied().collect()
    }

    #[test]
    fn test_empty_graph() {
        let graph = DepGraph::new();

        assert_eq!(graph.precedents(cell(0, 0)).count(), 0);
        assert_eq!(graph.dependents(cell(0, 0)).count(), 0);

        graph.assert_consistent();
    }

    #[test]
    fn test_single_edge() {
        // B1 = A1
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);

        graph.replace_edges(b1, set(&[a1]));
        graph.assert_consistent();

        assert_eq!(graph.precedents(b1).collect::<Vec<_>>(), vec![a1]);
        assert_eq!(graph.dependents(a1).collect::<Vec<_>>(), vec![b1]);
    }

    #[test]
    fn test_multiple_precedents() {
        // C1 = A1 + B1
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);
        let c1 = cell(0, 2);

        graph.replace_edges(c1, set(&[a1, b1]));
        graph.assert_consistent();

        let mut preds: Vec<_> = graph.precedents(c1).collect();
        preds.sort();
        assert_eq!(preds, vec![a1, b1]);

        assert_eq!(graph.dependents(a1).collect::<Vec<_>>(), vec![c1]);
        assert_eq!(graph.dependents(b1).collect::<Vec<_>>(), vec![c1]);
    }

    #[test]
    fn test_rewiring() {
        // B1 = A1, then change to B1 = A2
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let a2 = cell(1, 0);
        let b1 = cell(0, 1);

        graph.replace_edges(b1, set(&[a1]));
        graph.assert_consistent();

        graph.replace_edges(b1, set(&[a2]));
        graph.assert_consistent();

        assert_eq!(graph.precedents(b1).collect::<Vec<_>>(), vec![a2]);
        assert_eq!(graph.dependents(a2).collect::<Vec<_>>(), vec![b1]);
        assert_eq!(graph.dependents(a1).count(), 0);
    }

    #[test]
    fn test_unwiring() {
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);

        graph.replace_edges(b1, set(&[a1]));
        graph.clear_cell(b1);
        graph.assert_consistent();

        assert_eq!(graph.precedents(b1).count(), 0);
        assert_eq!(graph.dependents(a1).count(), 0);
    }

    #[test]
    fn test_diamond_dependency() {
        //     A1
        //    /  \
        //   B1   C1
        //    \  /
        //     D1
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);
        let c1 = cell(0, 2);
        let d1 = cell(0, 3);

        graph.replace_edges(b1, set(&[a1]));
        graph.replace_edges(c1, set(&[a1]));
        graph.replace_edges(d1, set(&[b1, c1]));
        graph.assert_consistent();

        let mut a1_deps: Vec<_> = graph.dependents(a1).collect();
        a1_deps.sort();
        assert_eq!(a1_deps, vec![b1, c1]);

        // D1 is reached once despite the two paths
        let mut closure = graph.transitive_dependents(a1);
        closure.sort();
        assert_eq!(closure, vec![b1, c1, d1]);
    }

    #[test]
    fn test_transitive_dependents_chain() {
        // B1 = A1, C1 = B1, D1 = C1
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);
        let c1 = cell(0, 2);
        let d1 = cell(0, 3);

        graph.replace_edges(b1, set(&[a1]));
        graph.replace_edges(c1, set(&[b1]));
        graph.replace_edges(d1, set(&[c1]));

        let mut closure = graph.transitive_dependents(a1);
        closure.sort();
        assert_eq!(closure, vec![b1, c1, d1]);

        assert!(graph.transitive_dependents(d1).is_empty());
    }

    #[test]
    fn test_cycle_self_reference() {
        let graph = DepGraph::new();
        let a1 = cell(0, 0);

        let report = graph.would_create_cycle(a1, &[a1]);
        assert!(report.is_some());
        assert!(report.unwrap().message.contains("references itself"));
    }

    #[test]
    fn test_cycle_two_cell() {
        // A1 = B1, then B1 = A1 (creates cycle)
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);

        graph.replace_edges(a1, set(&[b1]));

        assert!(graph.would_create_cycle(b1, &[a1]).is_some());
    }

    #[test]
    fn test_cycle_indirect() {
        // A → B → C, then C → A (creates cycle)
        let mut graph = DepGraph::new();
        let a = cell(0, 0);
        let b = cell(0, 1);
        let c = cell(0, 2);

        graph.replace_edges(b, set(&[a]));
        graph.replace_edges(c, set(&[b]));

        assert!(graph.would_create_cycle(a, &[c]).is_some());
    }

    #[test]
    fn test_cycle_through_later_reference() {
        // B1 = A1; assigning A1 = Z9+B1 must catch the cycle even though the
        // offending reference is not the first in the list.
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);
        let z9 = cell(8, 25);

        graph.replace_edges(b1, set(&[a1]));

        assert!(graph.would_create_cycle(a1, &[z9, b1]).is_some());
    }

    #[test]
    fn test_no_cycle_valid_graph() {
        // A → B → C (valid, no cycle)
        let mut graph = DepGraph::new();
        let a = cell(0, 0);
        let b = cell(0, 1);
        let c = cell(0, 2);

        graph.replace_edges(b, set(&[a]));
        graph.replace_edges(c, set(&[b]));

        let d = cell(0, 3);
        assert!(graph.would_create_cycle(d, &[c]).is_none());
        // Replacing an existing formula with a non-cyclic one is fine too
        assert!(graph.would_create_cycle(b, &[a, d]).is_none());
    }

    #[test]
    fn test_cycle_check_ignores_own_old_edges() {
        // B1 = A1; re-assigning B1 = C1 must not see B1's old precedents as
        // part of the prospective graph.
        let mut graph = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);
        let c1 = cell(0, 2);

        graph.replace_edges(b1, set(&[a1]));
        graph.replace_edges(a1, set(&[c1]));

        // B1 -> A1 -> C1 committed; B1 = C1 adds no cycle
        assert!(graph.would_create_cycle(b1, &[c1]).is_none());
    }
}
