//! The equation model: raw text, derived symbols and the compiled function.
use crate::error::{Error, Result};
use crate::expr::{self, Function};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref SECOND_DERIVATIVE: Regex =
        Regex::new(r"\bd\^2([a-zA-Z]+)/d([a-zA-Z]+)\^2\b").unwrap();
    static ref FIRST_DERIVATIVE: Regex = Regex::new(r"\bd([a-zA-Z]+)/d([a-zA-Z]+)\b").unwrap();
    static ref PRIME_PRIME: Regex = Regex::new(r"([a-zA-Z]+)''").unwrap();
    static ref PRIME: Regex = Regex::new(r"([a-zA-Z]+)'").unwrap();
}

/// The derivative notation an ODE model was recognised by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OdeNotation {
    /// `d^2y/dt^2`
    SecondDerivative,
    /// `dy/dt`
    FirstDerivative,
    /// `y''`
    PrimePrime,
    /// `y'`
    Prime,
}

impl OdeNotation {
    /// Detect the notation in `text`, trying second derivative, first derivative, double prime
    /// then single prime. The first match wins.
    pub fn detect(text: &str) -> Option<Self> {
        Derivative::detect(text).map(|d| d.notation)
    }

    /// The derivative order, 1 or 2.
    pub fn order(self) -> usize {
        match self {
            OdeNotation::SecondDerivative | OdeNotation::PrimePrime => 2,
            OdeNotation::FirstDerivative | OdeNotation::Prime => 1,
        }
    }
}

/// The derivative written in an ODE model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub notation: OdeNotation,
    /// The differentiated variable, `y` in `dy/dt` or `y'`.
    pub dependent: String,
    /// The variable differentiated by. Only Leibniz notation names it.
    pub independent: Option<String>,
}

impl Derivative {
    /// Find the derivative in `text`, in the priority order of [`OdeNotation::detect`].
    pub fn detect(text: &str) -> Option<Self> {
        let leibniz = |re: &Regex, notation: OdeNotation| {
            re.captures_iter(text).find_map(|c| {
                let (y, t) = (c.get(1)?.as_str(), c.get(2)?.as_str());
                (y != t).then(|| Derivative {
                    notation,
                    dependent: y.to_string(),
                    independent: Some(t.to_string()),
                })
            })
        };
        let prime = |re: &Regex, notation: OdeNotation| {
            re.captures(text).and_then(|c| c.get(1)).map(|y| Derivative {
                notation,
                dependent: y.as_str().to_string(),
                independent: None,
            })
        };

        leibniz(&SECOND_DERIVATIVE, OdeNotation::SecondDerivative)
            .or_else(|| leibniz(&FIRST_DERIVATIVE, OdeNotation::FirstDerivative))
            .or_else(|| prime(&PRIME_PRIME, OdeNotation::PrimePrime))
            .or_else(|| prime(&PRIME, OdeNotation::Prime))
    }
}

/// The shape of a model once checked against its data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModelKind {
    /// A single component algebraic model.
    Regular,
    /// An algebraic model with more than one component.
    Vector { components: usize },
    /// A first or second order ODE in one dependent variable.
    Ode { notation: OdeNotation },
}

/// Fitted constants, in the order of [`EquationModel::constants`].
#[derive(Debug, Clone, PartialEq)]
pub struct FittedConstants(Vec<(String, f64)>);

impl Serialize for FittedConstants {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl FittedConstants {
    pub fn new<I, S>(iter: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find_map(|(k, v)| (k == name).then_some(*v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn values(&self) -> Vec<f64> {
        self.0.iter().map(|(_, v)| *v).collect()
    }
}

/// Write-once fit results.
#[derive(Debug, Clone)]
enum FitState {
    Unfitted,
    Constants(FittedConstants),
    Fitted {
        constants: FittedConstants,
        function: String,
    },
}

/// A model parsed from user text.
///
/// Everything is derived eagerly on construction; only the fit results are written later, once,
/// by the fitting engine.
///
/// The type parameter selects the expression evaluator and defaults to [`expr::v1::Eq`].
pub struct EquationModel<F = expr::v1::Eq> {
    raw: String,
    independent_vars: Vec<String>,
    expression: String,
    symbols: Vec<String>,
    constants: Vec<String>,
    function: F,
    ode: Option<Derivative>,
    state: FitState,
}

impl EquationModel {
    /// Build a model using the default evaluator.
    pub fn new<S: AsRef<str>>(raw: &str, independent_vars: &[S]) -> Result<Self> {
        Self::with_function(raw, independent_vars)
    }
}

impl<F: Function> EquationModel<F> {
    /// Build a model using evaluator `F`.
    pub fn with_function<S: AsRef<str>>(raw: &str, independent_vars: &[S]) -> Result<Self> {
        let expression = expr::cut_off_lhs(raw);
        if expression.is_empty() {
            return Err(Error::invalid_expression(
                raw,
                "expression is empty once the left hand side is removed".to_string(),
            ));
        }

        let independent_vars: Vec<String> = independent_vars
            .iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if independent_vars.is_empty() {
            return Err(Error::InvalidIndependentVariables);
        }

        // Independent variables are always leading arguments, even when the expression does not
        // mention them, so the argument layout is fixed by the declaration alone.
        let extracted = expr::extract_symbols(&expression, &independent_vars);
        let constants: Vec<String> = extracted
            .into_iter()
            .filter(|s| !independent_vars.contains(s))
            .collect();
        let symbols: Vec<String> = independent_vars
            .iter()
            .chain(&constants)
            .cloned()
            .collect();

        let function = F::compile(&expression, &symbols)?;

        let ode = Derivative::detect(raw);
        if let Some(d) = &ode {
            debug!(
                "'{}' classified as an ODE in '{}' by {:?} notation",
                raw.trim(),
                d.dependent,
                d.notation
            );
        }

        Ok(Self {
            raw: raw.to_string(),
            independent_vars,
            expression,
            symbols,
            constants,
            function,
            ode,
            state: FitState::Unfitted,
        })
    }

    /// The raw text, trimmed and with `^` as `**`, left hand side included.
    pub fn model_string(&self) -> String {
        expr::format_eq(&self.raw)
    }

    /// The text as entered.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn independent_vars(&self) -> &[String] {
        &self.independent_vars
    }

    /// The right hand side, normalised.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Positional argument names of [`EquationModel::function`]: independent variables first,
    /// then constants.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// The free parameters to fit.
    pub fn constants(&self) -> &[String] {
        &self.constants
    }

    pub fn function(&self) -> &F {
        &self.function
    }

    pub fn components(&self) -> usize {
        self.function.components()
    }

    pub fn is_ode(&self) -> bool {
        self.ode.is_some()
    }

    /// The derivative notation this model was recognised by, if it is an ODE.
    pub fn ode_notation(&self) -> Option<OdeNotation> {
        self.ode.as_ref().map(|d| d.notation)
    }

    pub fn derivative(&self) -> Option<&Derivative> {
        self.ode.as_ref()
    }

    pub fn is_vector(&self) -> Result<bool> {
        match self.components() {
            0 => Err(Error::invalid_state("model has no components")),
            n => Ok(n > 1),
        }
    }

    /// Check the model's shape against `columns` data columns and report whether it is a vector.
    pub fn is_valid_vector_for(&self, columns: usize) -> Result<bool> {
        let expected = self.components() + self.independent_vars.len();
        if expected != columns {
            return Err(Error::DimensionMismatch {
                expected,
                actual: columns,
            });
        }

        self.is_vector()
    }

    /// Classify the model against data with `columns` columns.
    ///
    /// ODE models always take two columns: the independent variable and the observed samples.
    pub fn classify(&self, columns: usize) -> Result<ModelKind> {
        if let Some(notation) = self.ode_notation() {
            if columns != 2 {
                return Err(Error::DimensionMismatch {
                    expected: 2,
                    actual: columns,
                });
            }
            return Ok(ModelKind::Ode { notation });
        }

        Ok(if self.is_valid_vector_for(columns)? {
            ModelKind::Vector {
                components: self.components(),
            }
        } else {
            ModelKind::Regular
        })
    }

    pub fn fitted_constants(&self) -> Option<&FittedConstants> {
        match &self.state {
            FitState::Unfitted => None,
            FitState::Constants(c) | FitState::Fitted { constants: c, .. } => Some(c),
        }
    }

    pub fn resulting_function(&self) -> Option<&str> {
        match &self.state {
            FitState::Fitted { function, .. } => Some(function),
            _ => None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, FitState::Fitted { .. })
    }

    /// Record the fitted constants. Only succeeds on an unfitted model.
    pub fn set_fitted_constants(&mut self, constants: FittedConstants) -> Result<()> {
        match self.state {
            FitState::Unfitted => {
                self.state = FitState::Constants(constants);
                Ok(())
            }
            _ => Err(Error::AlreadyFitted("fitted constants")),
        }
    }

    /// Record the display form of the fitted model. Requires the constants to be set first.
    pub fn set_resulting_function(&mut self, function: String) -> Result<()> {
        match std::mem::replace(&mut self.state, FitState::Unfitted) {
            FitState::Constants(constants) => {
                self.state = FitState::Fitted {
                    constants,
                    function,
                };
                Ok(())
            }
            FitState::Unfitted => Err(Error::InvalidInput(
                "fitted constants must be set before the resulting function".into(),
            )),
            s @ FitState::Fitted { .. } => {
                self.state = s;
                Err(Error::AlreadyFitted("resulting function"))
            }
        }
    }
}
