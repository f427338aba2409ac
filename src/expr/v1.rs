use super::*;
use crate::error::Error;
use meval::{tokenizer::Token, Context, ContextProvider, Expr, FuncEvalError};

/*** A note on the implementation ***
 *
 * `meval` can bind an expression into a closure, but the closure borrows the variable names and
 * cannot be stored next to them. Rather than rebinding on every evaluation, `Eq` keeps the parsed
 * expressions and evaluates them against a small context which resolves symbols positionally and
 * defers everything else (functions and `pi`) to the builtin context.
 *
 * `meval` reads `^` as the power operator, so `**` is rewritten before parsing.
 */

/// An `meval` backed [`Function`].
pub struct Eq {
    /// Positional argument names.
    symbols: Vec<String>,

    /// One parsed expression per component.
    exprs: Vec<Expr>,

    /// Builtin functions and constants.
    builtins: Context<'static>,
}

struct Bindings<'a> {
    names: &'a [String],
    values: &'a [f64],
    builtins: &'a Context<'static>,
}

impl ContextProvider for Bindings<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        match self.names.iter().position(|n| n == name) {
            Some(i) => self.values.get(i).copied(),
            None => self.builtins.get_var(name),
        }
    }

    fn eval_func(&self, name: &str, args: &[f64]) -> Result<f64, FuncEvalError> {
        self.builtins.eval_func(name, args)
    }
}

impl Function for Eq {
    fn compile(expr: &str, symbols: &[String]) -> Result<Self> {
        let builtins = Context::new();

        let mut exprs = Vec::new();
        for component in split_components(expr) {
            if component.is_empty() {
                return Err(Error::invalid_expression(
                    expr,
                    "expression has an empty component".to_string(),
                ));
            }

            let e = component
                .replace("**", "^")
                .parse::<Expr>()
                .map_err(|e| Error::invalid_expression(expr, format!("parsing failed: {e}")))?;

            // every variable must be an argument or a builtin constant
            for t in e.iter() {
                if let Token::Var(n) = t {
                    if !symbols.contains(n) && builtins.get_var(n).is_none() {
                        return Err(Error::invalid_expression(
                            expr,
                            format!("'{n}' is not a recognised symbol"),
                        ));
                    }
                }
            }

            // a trial evaluation catches unknown functions and wrong argument counts
            let ones = vec![1.; symbols.len()];
            let ctx = Bindings {
                names: symbols,
                values: &ones,
                builtins: &builtins,
            };
            e.eval_with_context(ctx)
                .map_err(|e| Error::invalid_expression(expr, e.to_string()))?;

            exprs.push(e);
        }

        Ok(Self {
            symbols: symbols.to_vec(),
            exprs,
            builtins,
        })
    }

    fn components(&self) -> usize {
        self.exprs.len()
    }

    fn eval_into(&self, args: &[f64], out: &mut [f64]) -> Option<()> {
        if args.len() != self.symbols.len() || out.len() != self.exprs.len() {
            return None;
        }

        for (o, e) in out.iter_mut().zip(&self.exprs) {
            let ctx = Bindings {
                names: &self.symbols,
                values: args,
                builtins: &self.builtins,
            };
            *o = e.eval_with_context(ctx).ok()?;
        }

        Some(())
    }
}
