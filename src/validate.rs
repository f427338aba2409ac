//! Checks run on user input before fitting.
use crate::error::{Error, Result};
use crate::expr::{self, Function};
use crate::model::EquationModel;
use lazy_static::lazy_static;
use regex::Regex;
use simsearch::SimSearch;

lazy_static! {
    static ref VAR_SEP: Regex = Regex::new(r"[,;\s]+").unwrap();
}

/// The independent variable used when none are entered.
pub const DEFAULT_VAR: &str = "t";

/// Split a user entered list of independent variables, defaulting to `t` when blank.
pub fn parse_vars(text: &str) -> Vec<String> {
    let vars: Vec<String> = VAR_SEP
        .split(text.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if vars.is_empty() {
        vec![DEFAULT_VAR.to_string()]
    } else {
        vars
    }
}

/// Every declared independent variable must occur in the expression.
pub fn independent_vars_present<F: Function>(model: &EquationModel<F>) -> Result<()> {
    let found = expr::extract_symbols(model.expression(), model.independent_vars());

    for var in model.independent_vars() {
        if !found.contains(var) {
            return Err(Error::UnknownIndependentVariable {
                name: var.clone(),
                suggestion: suggest(&found, var),
            });
        }
    }

    Ok(())
}

/// The model needs at least one constant to fit.
pub fn has_constants<F: Function>(model: &EquationModel<F>) -> Result<()> {
    if model.constants().is_empty() {
        Err(Error::NothingToFit)
    } else {
        Ok(())
    }
}

/// A separately declared component count must match the model's.
pub fn components_match<F: Function>(model: &EquationModel<F>, declared: usize) -> Result<()> {
    let components = model.components();
    if components == declared {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{declared} components were declared but '{}' has {components}",
            model.expression()
        )))
    }
}

/// Run every check which applies.
pub fn check<F: Function>(model: &EquationModel<F>, components: Option<usize>) -> Result<()> {
    independent_vars_present(model)?;
    has_constants(model)?;
    if let Some(n) = components {
        components_match(model, n)?;
    }
    Ok(())
}

fn suggest(symbols: &[String], name: &str) -> Option<String> {
    let mut engine = SimSearch::new();
    for (i, s) in symbols.iter().enumerate() {
        engine.insert(i, s);
    }

    let found = engine
        .search(name)
        .into_iter()
        .filter_map(|i| symbols.get(i))
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>();

    if found.is_empty() {
        let all = symbols.join(", ");
        (!all.is_empty()).then(|| format!("the expression contains: {all}"))
    } else {
        Some(format!("did you mean {}?", found.join(" or ")))
    }
}
