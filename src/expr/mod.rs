//! Mathematical expression parsing and evaluation.

use crate::error::Result;
use lazy_static::lazy_static;
use regex::Regex;

pub mod v1;

/// Names the evaluator provides itself; they are never treated as symbols.
///
/// `e` is left out so it can be fitted like any other single letter constant.
pub const BUILTIN_CONSTANTS: &[&str] = &["pi"];

lazy_static! {
    static ref IDENT_RE: Regex = Regex::new(r"\b[A-Za-z][A-Za-z0-9_]*\b").unwrap();
}

/// A compiled, evaluable form of an expression.
///
/// Positional arguments follow the order of the symbols handed to [`Function::compile`].
pub trait Function: Sized {
    /// Compile the (already normalised) expression text, binding `symbols` positionally.
    fn compile(expr: &str, symbols: &[String]) -> Result<Self>;

    /// The number of output values a single evaluation produces.
    fn components(&self) -> usize;

    /// Evaluate every component, writing one value per component into `out`.
    ///
    /// Returns `None` if evaluation failed (eg an argument could not be bound).
    fn eval_into(&self, args: &[f64], out: &mut [f64]) -> Option<()>;

    /// Evaluate every component into a new vector.
    fn eval(&self, args: &[f64]) -> Option<Vec<f64>> {
        let mut out = vec![0.; self.components()];
        self.eval_into(args, &mut out)?;
        Some(out)
    }
}

/// Trim and rewrite `^` exponents as `**`.
pub fn format_eq(equation: &str) -> String {
    equation.trim().replace('^', "**")
}

/// Drop everything up to and including the first `=`, then [`format_eq`] the rest.
pub fn cut_off_lhs(equation: &str) -> String {
    match equation.find('=') {
        Some(i) => format_eq(&equation[i + 1..]),
        None => format_eq(equation),
    }
}

/// Split an expression on commas which are not nested inside parentheses.
pub fn split_components(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(expr[start..i].trim());
                start = i + 1;
            }
            _ => (),
        }
    }
    parts.push(expr[start..].trim());

    parts
}

/// Extract the unique symbols of `text`.
///
/// Symbols are identifiers starting with a letter. Identifiers directly followed by `(` are
/// function names and the builtin constant `pi` are skipped. Symbols found in `priority` are
/// moved to the front in `priority`'s order, the rest follow alphabetically.
pub fn extract_symbols<S: AsRef<str>>(text: &str, priority: &[S]) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();

    for m in IDENT_RE.find_iter(text) {
        let is_call = text[m.end()..].trim_start().starts_with('(');
        let name = m.as_str();
        if is_call || BUILTIN_CONSTANTS.contains(&name) {
            continue;
        }

        if !symbols.iter().any(|s| s == name) {
            symbols.push(name.to_string());
        }
    }

    let rank = |s: &str| priority.iter().position(|p| p.as_ref() == s);
    symbols.sort_by(|a, b| match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });

    symbols
}

/// Replace each symbol of `text` for which `value` returns a replacement.
///
/// Function names are left untouched, and so are identifiers merely containing a symbol name.
pub fn substitute<V>(text: &str, value: V) -> String
where
    V: Fn(&str) -> Option<String>,
{
    IDENT_RE
        .replace_all(text, |caps: &regex::Captures| {
            let m = caps.get(0).expect("group 0 always matches");
            let is_call = text[m.end()..].trim_start().starts_with('(');
            match value(m.as_str()) {
                Some(v) if !is_call => v,
                _ => m.as_str().to_string(),
            }
        })
        .into_owned()
}
