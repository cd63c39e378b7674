use std::fmt;

use rustc_hash::FxHashMap;

use crate::cell::{Cell, CellValue, Value};
use crate::dep_graph::DepGraph;
use crate::error::SheetError;
use crate::formula::eval::{self, CellLookup, FormulaError};
use crate::position::{Position, Size};

/// A single sheet of cells plus the dependency graph between them.
///
/// Cells live in a sparse position-keyed map; a slot exists from its first
/// assignment (or from being referenced by a formula) until the sheet is
/// dropped. All mutation funnels through [`Sheet::set_cell`], which keeps the
/// graph edges, acyclicity, and formula caches consistent.
#[derive(Debug, Default)]
pub struct Sheet {
    cells: FxHashMap<Position, Cell>,
    deps: DepGraph,
}

impl Sheet {
    /// Create a ready-to-use empty sheet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `text` to the cell at `pos`.
    ///
    /// The observable sequence: classify and parse; materialize Empty cells
    /// for referenced-but-absent positions; reject cycles against the
    /// pre-commit graph; then swap in the new content, rewrite edges, and
    /// invalidate the caches of every transitive dependent. On a syntax or
    /// cycle error the cell keeps its previous content.
    pub fn set_cell(&mut self, pos: Position, text: &str) -> Result<(), SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }

        let value = CellValue::from_input(text).map_err(SheetError::FormulaSyntax)?;

        // Materialize referenced cells before the cycle check so the
        // traversal sees uniform, existing nodes.
        for &target in value.referenced_cells() {
            self.cells.entry(target).or_insert_with(Cell::empty);
        }

        if let Some(report) = self
            .deps
            .would_create_cycle(pos, value.referenced_cells())
        {
            return Err(SheetError::CircularDependency(report));
        }

        let new_preds = value.referenced_cells().iter().copied().collect();
        self.cells
            .entry(pos)
            .or_insert_with(Cell::empty)
            .replace(value);
        self.deps.replace_edges(pos, new_preds);

        for dependent in self.deps.transitive_dependents(pos) {
            if let Some(cell) = self.cells.get(&dependent) {
                cell.invalidate();
            }
        }

        Ok(())
    }

    /// The cell at `pos`, or `None` if the slot was never materialized.
    pub fn cell(&self, pos: Position) -> Result<Option<&Cell>, SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }
        Ok(self.cells.get(&pos))
    }

    /// Display value of the cell at `pos`, if the slot exists.
    pub fn value(&self, pos: Position) -> Result<Option<Value>, SheetError> {
        Ok(self.cell(pos)?.map(|cell| cell.value(self)))
    }

    /// Raw text of the cell at `pos`, if the slot exists.
    pub fn text(&self, pos: Position) -> Result<Option<String>, SheetError> {
        Ok(self.cell(pos)?.map(Cell::text))
    }

    /// Reset the cell at `pos` to Empty.
    ///
    /// The slot is kept (dependents may still reference it) and routed
    /// through the normal assignment path, so edges and dependent caches
    /// stay consistent. Clearing an absent cell is a no-op.
    pub fn clear_cell(&mut self, pos: Position) -> Result<(), SheetError> {
        if !pos.is_valid() {
            return Err(SheetError::InvalidPosition(pos));
        }
        if self.cells.contains_key(&pos) {
            self.set_cell(pos, "")?;
        }
        Ok(())
    }

    /// True when at least one formula currently reads `pos`.
    pub fn is_referenced(&self, pos: Position) -> bool {
        self.deps.dependents(pos).next().is_some()
    }

    /// Cells whose formulas read `pos` directly.
    pub fn dependents(&self, pos: Position) -> Vec<Position> {
        let mut cells: Vec<Position> = self.deps.dependents(pos).collect();
        cells.sort_unstable();
        cells
    }

    /// Cells the formula at `pos` reads directly.
    pub fn precedents(&self, pos: Position) -> Vec<Position> {
        let mut cells: Vec<Position> = self.deps.precedents(pos).collect();
        cells.sort_unstable();
        cells
    }

    /// Number of materialized cell slots, Empty placeholders included.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of formula cells.
    pub fn formula_cell_count(&self) -> usize {
        self.cells.values().filter(|c| c.is_formula()).count()
    }

    /// Minimal rectangle covering every non-Empty cell.
    ///
    /// Empty cells (cleared cells and placeholders materialized for
    /// references) never enlarge the rectangle.
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

    /// Write the printable rectangle as display values, tab-delimited.
    pub fn write_values<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        self.write_table(out, |cell| cell.value(self).to_string())
    }

    /// Write the printable rectangle as raw texts, tab-delimited.
    pub fn write_texts<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        self.write_table(out, Cell::text)
    }

    /// [`Sheet::write_values`] into a fresh String.
    pub fn print_values(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_values(&mut out);
        out
    }

    /// [`Sheet::write_texts`] into a fresh String.
    pub fn print_texts(&self) -> String {
        let mut out = String::new();
        let _ = self.write_texts(&mut out);
        out
    }

    /// Row-major emission: tab between columns, newline after every row
    /// (the last included), nothing for absent or Empty slots.
    fn write_table<W, F>(&self, out: &mut W, render: F) -> fmt::Result
    where
        W: fmt::Write,
        F: Fn(&Cell) -> String,
    {
        let size = self.printable_size();
        for row in 0..size.rows {
            for col in 0..size.cols {
                if col != 0 {
                    out.write_char('\t')?;
                }
                if let Some(cell) = self.cells.get(&Position::new(row, col)) {
                    if !cell.is_empty() {
                        out.write_str(&render(cell))?;
                    }
                }
            }
            out.write_char('\n')?;
        }
        Ok(())
    }
}

impl CellLookup for Sheet {
    /// Arithmetic view of a cell: absent and Empty read as zero, numbers pass
    /// through, text must satisfy the strict numeric grammar, and an erroring
    /// formula propagates its error. Recursion terminates because the
    /// reference graph is acyclic.
    fn number(&self, pos: Position) -> Result<f64, FormulaError> {
        let Some(cell) = self.cells.get(&pos) else {
            return Ok(0.0);
        };
        match cell.value(self) {
            Value::Number(n) => Ok(n),
            Value::Text(text) => eval::parse_cell_number(&text),
            Value::Error(e) => Err(e),
        }
    }
}
