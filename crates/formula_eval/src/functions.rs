use crate::engine::{to_bool, to_number, to_text, ArgValue, Evaluator, Flow, Unsupported};
use crate::parser::Expr;
use crate::workbook::{CellError, CellValue};

/// Dispatches a call; names outside this table are reported as unsupported.
pub(crate) fn call(ev: &mut Evaluator<'_>, name: &str, args: &[Expr]) -> Flow<CellValue> {
    let value = match name {
        "SUM" => fold_numbers(ev, args, |ns| Ok(ns.iter().sum()))?,
        "PRODUCT" => fold_numbers(ev, args, |ns| {
            Ok(if ns.is_empty() { 0.0 } else { ns.iter().product() })
        })?,
        "MIN" => fold_numbers(ev, args, |ns| Ok(ns.iter().copied().reduce(f64::min).unwrap_or(0.0)))?,
        "MAX" => fold_numbers(ev, args, |ns| Ok(ns.iter().copied().reduce(f64::max).unwrap_or(0.0)))?,
        "AVERAGE" => fold_numbers(ev, args, |ns| {
            if ns.is_empty() {
                Err(CellError::Div0)
            } else {
                Ok(ns.iter().sum::<f64>() / ns.len() as f64)
            }
        })?,
        "COUNT" => count(ev, args)?,
        "ABS" => unary_number(ev, args, f64::abs)?,
        "ROUND" => round_with(ev, args, f64::round)?,
        "ROUNDUP" => round_with(ev, args, |x| x.abs().ceil().copysign(x))?,
        "ROUNDDOWN" => round_with(ev, args, f64::trunc)?,
        "IF" => conditional(ev, args)?,
        "AND" => logical(ev, args, true)?,
        "OR" => logical(ev, args, false)?,
        "NOT" => {
            if args.len() != 1 {
                return Ok(CellValue::Error(CellError::Value));
            }
            let v = ev.eval(&args[0])?;
            match to_bool(&v) {
                Ok(b) => CellValue::Bool(!b),
                Err(e) => CellValue::Error(e),
            }
        }
        "CONCATENATE" => {
            let mut out = String::new();
            for arg in args {
                let v = ev.eval(arg)?;
                match to_text(&v) {
                    Ok(s) => out.push_str(&s),
                    Err(e) => return Ok(CellValue::Error(e)),
                }
            }
            CellValue::Text(out)
        }
        other => return Err(Unsupported(other.to_string())),
    };
    Ok(value)
}

/// Collects numeric arguments the way aggregate functions do: direct values
/// are coerced, referenced text and booleans are skipped, errors win.
fn numbers(ev: &mut Evaluator<'_>, args: &[Expr]) -> Flow<Result<Vec<f64>, CellError>> {
    let mut out = Vec::new();
    for arg in args {
        for value in ev.expand(arg)? {
            match value {
                ArgValue::Direct(v) => match to_number(&v) {
                    Ok(n) => out.push(n),
                    Err(e) => return Ok(Err(e)),
                },
                ArgValue::Referenced(CellValue::Number(n)) => out.push(n),
                ArgValue::Referenced(CellValue::Error(e)) => return Ok(Err(e)),
                ArgValue::Referenced(_) => {}
            }
        }
    }
    Ok(Ok(out))
}

fn fold_numbers(
    ev: &mut Evaluator<'_>,
    args: &[Expr],
    fold: impl Fn(&[f64]) -> Result<f64, CellError>,
) -> Flow<CellValue> {
    let result = numbers(ev, args)?.and_then(|ns| fold(&ns));
    Ok(match result {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        Ok(_) => CellValue::Error(CellError::Num),
        Err(e) => CellValue::Error(e),
    })
}

fn count(ev: &mut Evaluator<'_>, args: &[Expr]) -> Flow<CellValue> {
    let mut n = 0usize;
    for arg in args {
        for value in ev.expand(arg)? {
            let counted = match value {
                ArgValue::Direct(CellValue::Error(_)) => false,
                ArgValue::Direct(v) => to_number(&v).is_ok() && !v.is_blank(),
                ArgValue::Referenced(v) => matches!(v, CellValue::Number(_)),
            };
            if counted {
                n += 1;
            }
        }
    }
    Ok(CellValue::Number(n as f64))
}

fn unary_number(ev: &mut Evaluator<'_>, args: &[Expr], f: fn(f64) -> f64) -> Flow<CellValue> {
    if args.len() != 1 {
        return Ok(CellValue::Error(CellError::Value));
    }
    let v = ev.eval(&args[0])?;
    Ok(match to_number(&v) {
        Ok(x) => CellValue::Number(f(x)),
        Err(e) => CellValue::Error(e),
    })
}

fn round_with(ev: &mut Evaluator<'_>, args: &[Expr], f: fn(f64) -> f64) -> Flow<CellValue> {
    if args.len() != 2 {
        return Ok(CellValue::Error(CellError::Value));
    }
    let x = ev.eval(&args[0])?;
    let digits = ev.eval(&args[1])?;
    let (x, digits) = match (to_number(&x), to_number(&digits)) {
        (Ok(x), Ok(d)) => (x, d.trunc() as i32),
        (Err(e), _) | (_, Err(e)) => return Ok(CellValue::Error(e)),
    };

    let rounded = if digits >= 0 {
        let factor = 10f64.powi(digits);
        f(x * factor) / factor
    } else {
        let factor = 10f64.powi(-digits);
        f(x / factor) * factor
    };
    Ok(if rounded.is_finite() {
        CellValue::Number(rounded)
    } else {
        CellValue::Error(CellError::Num)
    })
}

/// `IF` evaluates only the branch it takes.
fn conditional(ev: &mut Evaluator<'_>, args: &[Expr]) -> Flow<CellValue> {
    if args.len() < 2 || args.len() > 3 {
        return Ok(CellValue::Error(CellError::Value));
    }
    let condition = ev.eval(&args[0])?;
    let branch = match to_bool(&condition) {
        Ok(true) => &args[1],
        Ok(false) => match args.get(2) {
            Some(branch) => branch,
            None => return Ok(CellValue::Bool(false)),
        },
        Err(e) => return Ok(CellValue::Error(e)),
    };
    if matches!(branch, Expr::Missing) {
        return Ok(CellValue::Number(0.0));
    }
    ev.eval(branch)
}

fn logical(ev: &mut Evaluator<'_>, args: &[Expr], all: bool) -> Flow<CellValue> {
    let mut seen = false;
    let mut acc = all;
    for arg in args {
        for value in ev.expand(arg)? {
            let b = match value {
                ArgValue::Direct(v) => match to_bool(&v) {
                    Ok(b) => b,
                    Err(e) => return Ok(CellValue::Error(e)),
                },
                ArgValue::Referenced(CellValue::Bool(b)) => b,
                ArgValue::Referenced(CellValue::Number(n)) => n != 0.0,
                ArgValue::Referenced(CellValue::Error(e)) => return Ok(CellValue::Error(e)),
                ArgValue::Referenced(_) => continue,
            };
            seen = true;
            acc = if all { acc && b } else { acc || b };
        }
    }
    Ok(if seen { CellValue::Bool(acc) } else { CellValue::Error(CellError::Value) })
}
