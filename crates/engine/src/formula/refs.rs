//! Reference extraction from formula AST.
//!
//! Collects the cell positions a formula reads, as a sorted, deduplicated
//! list for dependency-graph construction. Out-of-range reference leaves are
//! skipped: they can never resolve, so they carry no edge.

use rustc_hash::FxHashSet;

use crate::position::Position;

use super::parser::Expr;

/// All in-bounds cell references of `expr`, ascending and deduplicated.
pub fn referenced_cells(expr: &Expr) -> Vec<Position> {
    let mut refs = FxHashSet::default();
    collect_refs(expr, &mut refs);
    let mut list: Vec<Position> = refs.into_iter().collect();
    list.sort_unstable();
    list
}

fn collect_refs(expr: &Expr, refs: &mut FxHashSet<Position>) {
    match expr {
        Expr::Number(_) | Expr::InvalidRef(_) => {}
        Expr::CellRef(pos) => {
            refs.insert(*pos);
        }
        Expr::Unary { operand, .. } => collect_refs(operand, refs),
        Expr::Binary { left, right, .. } => {
            collect_refs(left, refs);
            collect_refs(right, refs);
        }
    }
}
