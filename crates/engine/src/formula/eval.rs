//! Formula evaluation.
//!
//! Walks an [`Expr`] tree against a [`CellLookup`] that resolves cell
//! positions to numbers. Errors are ordinary values of [`FormulaError`];
//! they short-circuit outward in post-order, so when several subexpressions
//! fail, the first one encountered wins (callers must not rely on which).

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::position::Position;

use super::parser::{BinaryOp, Expr, UnaryOp};

// =============================================================================
// FormulaError: value-level calculation errors
// =============================================================================

/// Errors that can occur during formula calculation.
///
/// These surface inside cell values (never as `Err` at the sheet boundary)
/// and render bit-exact as `#REF!`, `#VALUE!`, `#DIV/0!`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormulaError {
    /// A reference to a cell with an out-of-range position
    Ref,
    /// A cell's text cannot be interpreted as a number
    Value,
    /// Division by zero, or any arithmetic result that is not finite
    Div0,
}

impl FormulaError {
    pub fn as_str(self) -> &'static str {
        match self {
            FormulaError::Ref => "#REF!",
            FormulaError::Value => "#VALUE!",
            FormulaError::Div0 => "#DIV/0!",
        }
    }
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CellLookup: the seam between evaluator and cell storage
// =============================================================================

/// Resolves a referenced position to the number arithmetic sees.
///
/// The sheet implements this with its coercion policy: absent or empty cells
/// read as `0.0`, numeric text parses under the strict grammar, anything else
/// is a `#VALUE!`, and an erroring dependency propagates its error unchanged.
pub trait CellLookup {
    fn number(&self, pos: Position) -> Result<f64, FormulaError>;
}

/// Evaluate an expression tree.
pub fn evaluate(expr: &Expr, ctx: &dyn CellLookup) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::CellRef(pos) => ctx.number(*pos),
        Expr::InvalidRef(_) => Err(FormulaError::Ref),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, ctx)?;
            Ok(match op {
                UnaryOp::Plus => value,
                UnaryOp::Minus => -value,
            })
        }
        Expr::Binary { op, left, right } => {
            let lhs = evaluate(left, ctx)?;
            let rhs = evaluate(right, ctx)?;
            let result = match op {
                BinaryOp::Add => lhs + rhs,
                BinaryOp::Sub => lhs - rhs,
                BinaryOp::Mul => lhs * rhs,
                BinaryOp::Div => lhs / rhs,
            };
            // ±inf and NaN both land here, which covers division by zero.
            if result.is_finite() {
                Ok(result)
            } else {
                Err(FormulaError::Div0)
            }
        }
    }
}

/// Parse a text cell's display value as a number, strictly.
///
/// Accepts only `-?(0|[1-9][0-9]*)(\.[0-9]+)?` — no exponents, no leading
/// zeros, no leading `+`, no bare `.5`. Anything else is `#VALUE!`.
pub fn parse_cell_number(text: &str) -> Result<f64, FormulaError> {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER_RE.get_or_init(|| {
        Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?$").expect("cell number regex must compile")
    });
    if !re.is_match(text) {
        return Err(FormulaError::Value);
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(FormulaError::Value),
    }
}
