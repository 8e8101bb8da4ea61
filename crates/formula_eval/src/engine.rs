//! Formula engine.
//!
//! Evaluation never throws for a missing function: it returns
//! [`Evaluation::Unsupported`] naming the first function the engine could not
//! compute, which is what the repair pass in [`crate::repair`] acts upon.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{FormulaError, Result};
use crate::functions;
use crate::parser::{parse_formula, BinaryOp, Expr};
use crate::workbook::{CellError, CellKey, CellValue, Workbook};

/// Outcome of evaluating one formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Evaluated(CellValue),
    /// The engine has no implementation for `function` (upper case, no `_xlfn.`).
    Unsupported { function: String },
}

/// Raised while walking an expression when a function is missing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Unsupported(pub String);

pub(crate) type Flow<T> = std::result::Result<T, Unsupported>;

/// Nesting of referenced formula cells evaluated on one stack. A deeper
/// chain is settled from its far end first.
const MAX_REFERENCE_DEPTH: usize = 64;

/// Per-pass memo of computed formula cells plus the cells on the current
/// evaluation path, used to cut reference cycles.
#[derive(Debug, Default)]
pub(crate) struct PassState {
    computed: HashMap<CellKey, CellValue>,
    visiting: HashSet<CellKey>,
    /// Settled cells without a computed value; they read their cached value.
    stale: HashSet<CellKey>,
    depth: usize,
    /// First cell met beyond [`MAX_REFERENCE_DEPTH`] in the current attempt.
    deferred: Option<CellKey>,
}

impl PassState {
    pub(crate) fn remember(&mut self, key: CellKey, value: CellValue) {
        self.computed.insert(key, value);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FormulaEngine;

impl FormulaEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluates `formula` as if it lived on sheet `sheet`.
    pub fn evaluate(&self, workbook: &Workbook, sheet: usize, formula: &str) -> Result<Evaluation> {
        if workbook.sheet(sheet).is_none() {
            return Err(FormulaError::SheetIndex(sheet));
        }
        let mut state = PassState::default();
        evaluate_settled(workbook, &mut state, sheet, formula)
    }

    /// Evaluates `formula` (the cell's own, or a fragment of it) in the
    /// context of the cell at `key`, sharing `state` with the rest of the pass.
    pub(crate) fn evaluate_at(
        &self,
        workbook: &Workbook,
        state: &mut PassState,
        key: CellKey,
        formula: &str,
    ) -> Result<Evaluation> {
        state.visiting.insert(key);
        let outcome = evaluate_settled(workbook, state, key.sheet, formula);
        state.visiting.remove(&key);
        outcome
    }
}

/// Evaluates `formula`, first settling any reference chain too deep to
/// follow on one stack, then evaluating again.
fn evaluate_settled(workbook: &Workbook, state: &mut PassState, sheet: usize, formula: &str) -> Result<Evaluation> {
    loop {
        let outcome = evaluate_in(workbook, state, sheet, formula);
        match state.deferred.take() {
            Some(deep) => settle(workbook, state, deep),
            None => return outcome,
        }
    }
}

/// Evaluates `first` from an empty stack, deepest deferred cell first, so
/// every cell of the chain ends up computed or stale.
fn settle(workbook: &Workbook, state: &mut PassState, first: CellKey) {
    let mut pending = vec![first];
    while let Some(&key) = pending.last() {
        let mut evaluator = Evaluator {
            workbook,
            state: &mut *state,
            sheet: key.sheet,
        };
        let _ = evaluator.cell_value(key);

        match state.deferred.take() {
            Some(deeper) => pending.push(deeper),
            None => {
                if !state.computed.contains_key(&key) {
                    state.stale.insert(key);
                }
                pending.pop();
            }
        }
    }
}

fn evaluate_in(workbook: &Workbook, state: &mut PassState, sheet: usize, formula: &str) -> Result<Evaluation> {
    let expr = parse_formula(formula).map_err(|message| FormulaError::Parse {
        formula: formula.to_string(),
        message,
    })?;

    let mut evaluator = Evaluator { workbook, state, sheet };
    match evaluator.eval(&expr) {
        // A formula that only points at an empty cell shows 0
        Ok(CellValue::Empty) => Ok(Evaluation::Evaluated(CellValue::Number(0.0))),
        Ok(value) => Ok(Evaluation::Evaluated(value)),
        Err(Unsupported(function)) => Ok(Evaluation::Unsupported { function }),
    }
}

/// A function argument after range expansion.
#[derive(Debug, Clone)]
pub(crate) enum ArgValue {
    /// Typed directly in the call, e.g. `SUM("1", TRUE)`.
    Direct(CellValue),
    /// Read from a referenced cell or range.
    Referenced(CellValue),
}

pub(crate) struct Evaluator<'a> {
    workbook: &'a Workbook,
    state: &'a mut PassState,
    sheet: usize,
}

impl Evaluator<'_> {
    pub(crate) fn eval(&mut self, expr: &Expr) -> Flow<CellValue> {
        match expr {
            Expr::Number(n) => Ok(CellValue::Number(*n)),
            Expr::Text(s) => Ok(CellValue::Text(s.clone())),
            Expr::Bool(b) => Ok(CellValue::Bool(*b)),
            Expr::Missing => Ok(CellValue::Empty),
            Expr::Reference(r) => {
                let Some(sheet) = self.resolve_sheet(r.sheet.as_deref()) else {
                    return Ok(CellValue::Error(CellError::Ref));
                };
                self.cell_value(CellKey::new(sheet, r.row, r.col))
            }
            // No implicit intersection
            Expr::Range(_) => Ok(CellValue::Error(CellError::Value)),
            Expr::Negate(inner) => {
                let v = self.eval(inner)?;
                Ok(numeric(to_number(&v).map(|n| -n)))
            }
            Expr::Percent(inner) => {
                let v = self.eval(inner)?;
                Ok(numeric(to_number(&v).map(|n| n / 100.0)))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                Ok(binary(*op, &l, &r))
            }
            Expr::Call { name, args } => functions::call(self, name, args),
        }
    }

    /// Expands references and ranges into the cell values they cover.
    pub(crate) fn expand(&mut self, expr: &Expr) -> Flow<Vec<ArgValue>> {
        match expr {
            Expr::Range(r) => {
                let Some(sheet) = self.resolve_sheet(r.sheet.as_deref()) else {
                    return Ok(vec![ArgValue::Direct(CellValue::Error(CellError::Ref))]);
                };
                // Cells past the populated area are empty and skipped by every function
                let workbook = self.workbook;
                let rows = workbook.sheet(sheet).map(|s| s.rows()).unwrap_or_default();
                let mut values = Vec::new();
                for row in r.start_row..=r.end_row.min(rows.len().saturating_sub(1)) {
                    let width = rows.get(row).map_or(0, Vec::len);
                    if width <= r.start_col {
                        continue;
                    }
                    for col in r.start_col..=r.end_col.min(width - 1) {
                        let value = self.cell_value(CellKey::new(sheet, row, col))?;
                        values.push(ArgValue::Referenced(value));
                    }
                }
                Ok(values)
            }
            Expr::Reference(_) => Ok(vec![ArgValue::Referenced(self.eval(expr)?)]),
            _ => Ok(vec![ArgValue::Direct(self.eval(expr)?)]),
        }
    }

    fn resolve_sheet(&self, name: Option<&str>) -> Option<usize> {
        match name {
            None => Some(self.sheet),
            Some(name) => self.workbook.sheet_index(name),
        }
    }

    fn cell_value(&mut self, key: CellKey) -> Flow<CellValue> {
        let Some(cell) = self.workbook.cell(key) else {
            return Ok(CellValue::Empty);
        };
        let Some(formula) = cell.formula.as_deref() else {
            return Ok(cell.value.clone());
        };
        if let Some(value) = self.state.computed.get(&key) {
            return Ok(value.clone());
        }
        if self.state.stale.contains(&key) {
            return Ok(cell.value.clone());
        }
        if self.state.visiting.contains(&key) {
            debug!("Circular reference through {:?}", key);
            return Ok(CellValue::Error(CellError::Ref));
        }
        if self.state.depth >= MAX_REFERENCE_DEPTH {
            debug!("Reference chain deeper than {} at {:?}, settling it first", MAX_REFERENCE_DEPTH, key);
            self.state.deferred.get_or_insert(key);
            return Ok(cell.value.clone());
        }

        self.state.visiting.insert(key);
        self.state.depth += 1;
        let outcome = evaluate_in(self.workbook, self.state, key.sheet, formula);
        self.state.depth -= 1;
        self.state.visiting.remove(&key);

        match outcome {
            // Values computed while a deeper cell was deferred are provisional
            Ok(Evaluation::Evaluated(value)) if self.state.deferred.is_some() => Ok(value),
            Ok(Evaluation::Evaluated(value)) => {
                self.state.remember(key, value.clone());
                Ok(value)
            }
            // Not memoised: the repair pass may still produce a better value
            Ok(Evaluation::Unsupported { function }) => {
                debug!("Cell {:?} uses unsupported {}, reading cached value", key, function);
                Ok(cell.value.clone())
            }
            Err(e) => {
                debug!("Cell {:?} cannot be evaluated, reading cached value: {}", key, e);
                Ok(cell.value.clone())
            }
        }
    }
}

fn numeric(n: std::result::Result<f64, CellError>) -> CellValue {
    match n {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        Ok(_) => CellValue::Error(CellError::Num),
        Err(e) => CellValue::Error(e),
    }
}

pub(crate) fn to_number(value: &CellValue) -> std::result::Result<f64, CellError> {
    match value {
        CellValue::Empty => Ok(0.0),
        CellValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        CellValue::Number(n) => Ok(*n),
        CellValue::Text(s) => s.trim().parse::<f64>().map_err(|_| CellError::Value),
        CellValue::Error(e) => Err(*e),
    }
}

pub(crate) fn to_bool(value: &CellValue) -> std::result::Result<bool, CellError> {
    match value {
        CellValue::Empty => Ok(false),
        CellValue::Bool(b) => Ok(*b),
        CellValue::Number(n) => Ok(*n != 0.0),
        CellValue::Text(s) if s.trim().eq_ignore_ascii_case("TRUE") => Ok(true),
        CellValue::Text(s) if s.trim().eq_ignore_ascii_case("FALSE") => Ok(false),
        CellValue::Text(_) => Err(CellError::Value),
        CellValue::Error(e) => Err(*e),
    }
}

pub(crate) fn to_text(value: &CellValue) -> std::result::Result<String, CellError> {
    match value {
        CellValue::Error(e) => Err(*e),
        other => Ok(other.display_text()),
    }
}

fn binary(op: BinaryOp, l: &CellValue, r: &CellValue) -> CellValue {
    if let CellValue::Error(e) = l {
        return CellValue::Error(*e);
    }
    if let CellValue::Error(e) = r {
        return CellValue::Error(*e);
    }

    match op {
        BinaryOp::Concat => match (to_text(l), to_text(r)) {
            (Ok(a), Ok(b)) => CellValue::Text(a + &b),
            (Err(e), _) | (_, Err(e)) => CellValue::Error(e),
        },
        BinaryOp::Eq => CellValue::Bool(compare(l, r) == Ordering::Equal),
        BinaryOp::Ne => CellValue::Bool(compare(l, r) != Ordering::Equal),
        BinaryOp::Lt => CellValue::Bool(compare(l, r) == Ordering::Less),
        BinaryOp::Le => CellValue::Bool(compare(l, r) != Ordering::Greater),
        BinaryOp::Gt => CellValue::Bool(compare(l, r) == Ordering::Greater),
        BinaryOp::Ge => CellValue::Bool(compare(l, r) != Ordering::Less),
        arithmetic => {
            let (a, b) = match (to_number(l), to_number(r)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return CellValue::Error(e),
            };
            match arithmetic {
                BinaryOp::Add => numeric(Ok(a + b)),
                BinaryOp::Sub => numeric(Ok(a - b)),
                BinaryOp::Mul => numeric(Ok(a * b)),
                BinaryOp::Div if b == 0.0 => CellValue::Error(CellError::Div0),
                BinaryOp::Div => numeric(Ok(a / b)),
                BinaryOp::Pow if a == 0.0 && b == 0.0 => CellValue::Error(CellError::Num),
                BinaryOp::Pow => numeric(Ok(a.powf(b))),
                _ => CellValue::Error(CellError::Value),
            }
        }
    }
}

/// Spreadsheet ordering: numbers < text < booleans, text case-insensitive,
/// an empty cell takes the zero value of the other side's type.
fn compare(l: &CellValue, r: &CellValue) -> Ordering {
    fn rank(v: &CellValue) -> u8 {
        match v {
            CellValue::Number(_) | CellValue::Empty | CellValue::Error(_) => 0,
            CellValue::Text(_) => 1,
            CellValue::Bool(_) => 2,
        }
    }

    let zero_like = |empty: &CellValue, other: &CellValue| match (empty, other) {
        (CellValue::Empty, CellValue::Text(_)) => CellValue::Text(String::new()),
        (CellValue::Empty, CellValue::Bool(_)) => CellValue::Bool(false),
        (CellValue::Empty, _) => CellValue::Number(0.0),
        (v, _) => v.clone(),
    };
    let l = zero_like(l, r);
    let r = zero_like(r, &l);

    match (&l, &r) {
        (CellValue::Number(a), CellValue::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (CellValue::Text(a), CellValue::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
        _ => rank(&l).cmp(&rank(&r)),
    }
}
