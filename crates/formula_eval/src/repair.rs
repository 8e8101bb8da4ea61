//! Repair of formulas the engine cannot compute.
//!
//! Reports produced by broker back offices wrap most computed cells in error
//! guards (`IFERROR(x, 0)`, `IFNA(x, "")`). The engine does not implement the
//! guards, so the pass rewrites each failing guard call into the argument the
//! guard would have returned and evaluates again. Any other unsupported
//! function is left as is and the cell gets a degraded value.

use tracing::{debug, info, warn};

use crate::engine::{Evaluation, FormulaEngine, PassState};
use crate::workbook::{CellError, CellKey, CellValue, Workbook};

/// Upper bound on guard rewrites inside one cell's formula.
const MAX_REWRITES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    IfError,
    IfNa,
}

impl Guard {
    fn from_function(name: &str) -> Option<Self> {
        match name {
            "IFERROR" => Some(Guard::IfError),
            "IFNA" => Some(Guard::IfNa),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Guard::IfError => "IFERROR",
            Guard::IfNa => "IFNA",
        }
    }

    fn catches(self, value: &CellValue) -> bool {
        match self {
            Guard::IfError => value.is_error(),
            Guard::IfNa => matches!(value, CellValue::Error(CellError::Na)),
        }
    }
}

/// Counters of one [`FormulaRepairEvaluator::evaluate_all`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSummary {
    /// Evaluated as written.
    pub evaluated: usize,
    /// Rewritten and evaluated.
    pub repaired: usize,
    /// Unsupported and not repairable; formula kept, value degraded.
    pub degraded: usize,
    /// Could not be parsed; cached value kept.
    pub failed: usize,
}

#[derive(Debug, Default, Clone)]
pub struct FormulaRepairEvaluator {
    engine: FormulaEngine,
}

impl FormulaRepairEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(engine: FormulaEngine) -> Self {
        Self { engine }
    }

    /// Evaluates every formula cell and caches the results in the workbook.
    ///
    /// A cell that fails never stops the pass.
    pub fn evaluate_all(&self, workbook: &mut Workbook) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();
        let mut state = PassState::default();

        for key in workbook.formula_cells() {
            let Some(formula) = workbook.cell(key).and_then(|c| c.formula.clone()) else {
                continue;
            };

            match self.engine.evaluate_at(workbook, &mut state, key, &formula) {
                Ok(Evaluation::Evaluated(value)) => {
                    store(workbook, &mut state, key, None, value);
                    summary.evaluated += 1;
                }
                Ok(Evaluation::Unsupported { function }) => {
                    if self.repair(workbook, &mut state, key, &function) {
                        summary.repaired += 1;
                    } else {
                        summary.degraded += 1;
                    }
                }
                Err(e) => {
                    warn!("Skipping formula in {:?}: {}", key, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Formula pass: {} evaluated, {} repaired, {} degraded, {} failed",
            summary.evaluated, summary.repaired, summary.degraded, summary.failed
        );
        summary
    }

    /// Repairs the cell at (`sheet`, `row`, `col`) whose evaluation reported
    /// `function` as unsupported. Returns `true` when the formula was
    /// rewritten and now evaluates, `false` when the cell was degraded.
    pub fn repair_cell(&self, workbook: &mut Workbook, sheet: usize, row: usize, col: usize, function: &str) -> bool {
        let mut state = PassState::default();
        self.repair(workbook, &mut state, CellKey::new(sheet, row, col), function)
    }

    fn repair(&self, workbook: &mut Workbook, state: &mut PassState, key: CellKey, function: &str) -> bool {
        let Some(original) = workbook.cell(key).and_then(|c| c.formula.clone()) else {
            return false;
        };

        if let Some((rewritten, value)) = self.resolve(workbook, state, key, &original, 0) {
            debug!("Repaired {:?}: '{}' -> '{}'", key, original, rewritten);
            store(workbook, state, key, Some(rewritten), value);
            return true;
        }

        let value = self.fallback_value(workbook, state, key, &original, function);
        debug!("Cannot repair {:?} '{}', using {}", key, original, value.display_text());
        store(workbook, state, key, None, value);
        false
    }

    /// Rewrites the guard calls of `text` until it evaluates, returning the
    /// rewritten text and its value. `None` when a function other than a
    /// guard is missing or the rewrites run out.
    fn resolve(
        &self,
        workbook: &Workbook,
        state: &mut PassState,
        key: CellKey,
        text: &str,
        nesting: usize,
    ) -> Option<(String, CellValue)> {
        if nesting > MAX_REWRITES {
            return None;
        }

        let mut text = text.to_string();
        for _ in 0..MAX_REWRITES {
            match self.engine.evaluate_at(workbook, state, key, &text) {
                Ok(Evaluation::Evaluated(value)) => return Some((text, value)),
                Ok(Evaluation::Unsupported { function }) => {
                    let guard = Guard::from_function(&function)?;
                    text = self.rewrite_guard(workbook, state, key, &text, guard, nesting)?;
                }
                Err(e) => {
                    debug!("'{}' in {:?} does not evaluate: {}", text, key, e);
                    return None;
                }
            }
        }
        None
    }

    /// Rewrites the first `guard` call of `formula` into the argument the guard
    /// returns. Guards inside the primary argument are resolved first. `None`
    /// when the call is malformed or its primary argument cannot be evaluated.
    fn rewrite_guard(
        &self,
        workbook: &Workbook,
        state: &mut PassState,
        key: CellKey,
        formula: &str,
        guard: Guard,
        nesting: usize,
    ) -> Option<String> {
        let call = GuardCall::find(formula, guard.name())?;

        let (primary, value) = self.resolve(workbook, state, key, call.primary, nesting + 1)?;
        let replacement = if guard.catches(&value) {
            call.fallback
        } else {
            primary.as_str()
        };

        let prefix = &formula[..call.start];
        let suffix = &formula[call.close + 1..];
        if prefix.trim().trim_start_matches('=').trim().is_empty() && suffix.trim().is_empty() {
            Some(replacement.to_string())
        } else {
            Some(format!("{}({}){}", prefix, replacement, suffix))
        }
    }

    /// Value of the guard's fallback argument, or `#NAME?`.
    fn fallback_value(
        &self,
        workbook: &Workbook,
        state: &mut PassState,
        key: CellKey,
        formula: &str,
        function: &str,
    ) -> CellValue {
        let fallback = Guard::from_function(function)
            .and_then(|guard| GuardCall::find(formula, guard.name()))
            .map(|call| call.fallback);

        match fallback.map(|text| self.engine.evaluate_at(workbook, state, key, text)) {
            Some(Ok(Evaluation::Evaluated(value))) => value,
            _ => CellValue::Error(CellError::Name),
        }
    }
}

fn store(workbook: &mut Workbook, state: &mut PassState, key: CellKey, formula: Option<String>, value: CellValue) {
    if let Some(cell) = workbook.cell_mut(key) {
        if let Some(formula) = formula {
            cell.formula = Some(formula);
        }
        cell.value = value.clone();
    }
    state.remember(key, value);
}

/// Byte layout of one `NAME(primary, fallback)` call inside a formula.
struct GuardCall<'a> {
    start: usize,
    close: usize,
    primary: &'a str,
    fallback: &'a str,
}

impl<'a> GuardCall<'a> {
    fn find(formula: &'a str, name: &str) -> Option<Self> {
        let (start, open) = find_function_call(formula, name)?;
        let close = index_of_close_brace(formula, open)?;
        let second = index_of_second_arg(formula, open)?;
        let second_end = end_of_arg(formula, second)?;

        let primary = formula[open + 1..second - 1].trim();
        let fallback = match formula[second..second_end].trim() {
            // IFERROR(x,) falls back to zero
            "" => "0",
            text => text,
        };

        Some(Self {
            start,
            close,
            primary,
            fallback,
        })
    }
}

/// Tracks whether a scan is inside a string literal or a quoted sheet name.
#[derive(Default)]
struct Quotes(Option<u8>);

impl Quotes {
    /// `true` when byte `b` is quoted text (or a quote delimiter).
    fn skip(&mut self, b: u8) -> bool {
        match self.0 {
            Some(q) => {
                if b == q {
                    self.0 = None;
                }
                true
            }
            None if b == b'"' || b == b'\'' => {
                self.0 = Some(b);
                true
            }
            None => false,
        }
    }
}

/// Offset of the `)` that balances the `(` at `open`, or `None` when the
/// formula ends first.
pub fn index_of_close_brace(formula: &str, open: usize) -> Option<usize> {
    let bytes = formula.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }

    let mut depth = 0usize;
    let mut quotes = Quotes::default();
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if quotes.skip(b) {
            continue;
        }
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Offset just past the first top-level comma of the call opened at `open`,
/// or `None` when the call has a single argument.
pub fn index_of_second_arg(formula: &str, open: usize) -> Option<usize> {
    let bytes = formula.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }

    let mut depth = 0usize;
    let mut quotes = Quotes::default();
    for (i, &b) in bytes.iter().enumerate().skip(open + 1) {
        if quotes.skip(b) {
            continue;
        }
        match b {
            b'(' => depth += 1,
            b')' if depth == 0 => return None,
            b')' => depth -= 1,
            b',' | b';' if depth == 0 => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Offset of the top-level `,` or `)` ending the argument starting at `start`.
fn end_of_arg(formula: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quotes = Quotes::default();
    for (i, &b) in formula.as_bytes().iter().enumerate().skip(start) {
        if quotes.skip(b) {
            continue;
        }
        match b {
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(i),
            b')' => depth -= 1,
            b',' | b';' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b >= 0x80
}

/// Finds the first call of function `name` outside quoted text and returns
/// (start of the name including any `_xlfn.` prefix, offset of its `(`).
fn find_function_call(formula: &str, name: &str) -> Option<(usize, usize)> {
    const PREFIX: &str = "_xlfn.";
    let bytes = formula.as_bytes();
    let mut quotes = Quotes::default();

    for (i, &b) in bytes.iter().enumerate() {
        if quotes.skip(b) {
            continue;
        }
        let matches_name = formula
            .get(i..i + name.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(name));
        if !matches_name || bytes.get(i + name.len()) != Some(&b'(') {
            continue;
        }

        let prefixed = i >= PREFIX.len()
            && formula
                .get(i - PREFIX.len()..i)
                .is_some_and(|p| p.eq_ignore_ascii_case(PREFIX));
        let start = if prefixed { i - PREFIX.len() } else { i };
        if start == 0 || !is_name_byte(bytes[start - 1]) {
            return Some((start, i + name.len()));
        }
    }
    None
}
