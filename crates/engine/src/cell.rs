use serde::{Deserialize, Serialize};

use crate::formula::eval::{self, CellLookup, FormulaError};
use crate::formula::parser::{self, Expr};
use crate::formula::refs;
use crate::position::Position;

use std::fmt;

/// Text starting with this character (and longer than it alone) is a formula.
pub const FORMULA_SIGN: char = '=';
/// Leading apostrophe suppresses formula interpretation; stripped for display.
pub const ESCAPE_SIGN: char = '\'';

/// Visible value of a cell: literal text, a computed number, or a formula
/// error token.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Error(FormulaError),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Error(e) => write!(f, "{}", e),
        }
    }
}

/// Cell content variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Text(String),
    #[serde(skip)]
    Formula { expr: Expr, refs: Vec<Position> },
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl CellValue {
    /// Classify raw input text.
    ///
    /// Empty input is Empty; `=`-prefixed input longer than one character
    /// parses as a formula (`Err` carries the parser message and the caller
    /// must leave the cell untouched); everything else, a lone `=` included,
    /// is literal text.
    pub fn from_input(text: &str) -> Result<CellValue, String> {
        if text.is_empty() {
            return Ok(CellValue::Empty);
        }
        match text.strip_prefix(FORMULA_SIGN) {
            Some(body) if !body.is_empty() => {
                let expr = parser::parse(body)?;
                let refs = refs::referenced_cells(&expr);
                Ok(CellValue::Formula { expr, refs })
            }
            _ => Ok(CellValue::Text(text.to_string())),
        }
    }

    /// Positions this content reads, ascending and deduplicated.
    /// Empty for non-formula variants.
    pub fn referenced_cells(&self) -> &[Position] {
        match self {
            CellValue::Formula { refs, .. } => refs,
            _ => &[],
        }
    }
}

/// A single cell: content plus the memoized result of its last successful
/// formula evaluation.
///
/// The cache is interior-mutable so `value()` can memoize through the shared
/// references evaluation runs under. Only numeric results are stored; error
/// results are recomputed on every read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    value: CellValue,
    #[serde(skip)]
    cache: std::cell::Cell<Option<f64>>,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self {
            value,
            cache: std::cell::Cell::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The visible value. Empty cells read as numeric zero; text cells strip
    /// a leading escape sign; formula cells evaluate lazily against `ctx`.
    pub fn value(&self, ctx: &dyn CellLookup) -> Value {
        match &self.value {
            CellValue::Empty => Value::Number(0.0),
            CellValue::Text(text) => {
                let display = text.strip_prefix(ESCAPE_SIGN).unwrap_or(text);
                Value::Text(display.to_string())
            }
            CellValue::Formula { expr, .. } => {
                if let Some(cached) = self.cache.get() {
                    return Value::Number(cached);
                }
                match eval::evaluate(expr, ctx) {
                    Ok(number) => {
                        self.cache.set(Some(number));
                        Value::Number(number)
                    }
                    Err(error) => Value::Error(error),
                }
            }
        }
    }

    /// The raw text as if editing started: literal text verbatim (escape sign
    /// included), formulas as `=` plus their canonical expression.
    pub fn text(&self) -> String {
        match &self.value {
            CellValue::Empty => String::new(),
            CellValue::Text(text) => text.clone(),
            CellValue::Formula { expr, .. } => format!("{}{}", FORMULA_SIGN, expr.canonical()),
        }
    }

    pub fn referenced_cells(&self) -> &[Position] {
        self.value.referenced_cells()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.value, CellValue::Empty)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self.value, CellValue::Formula { .. })
    }

    /// Swap in new content. Drops the memo; the sheet invalidates dependents.
    pub(crate) fn replace(&mut self, value: CellValue) {
        self.value = value;
        self.cache.set(None);
    }

    pub(crate) fn invalidate(&self) {
        self.cache.set(None);
    }

    pub(crate) fn is_cached(&self) -> bool {
        self.cache.get().is_some()
    }
}
