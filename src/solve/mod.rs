//! The fitting engine.
//!
//! [`fit`] classifies a model against its data, runs the matching strategy and writes the
//! fitted constants and the display form of the fitted model back onto the model.
use crate::data::SampleData;
use crate::error::{Error, Result};
use crate::expr::{self, Function};
use crate::model::{EquationModel, FittedConstants, ModelKind};
use crate::stats::Covariance;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod curve;
mod ode;

/// Which observed sample seeds the ODE initial condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitialSample {
    /// The sample at the first time point.
    #[default]
    First,
    /// The second sample, applied at the first time point.
    Second,
}

impl InitialSample {
    pub fn index(self) -> usize {
        match self {
            InitialSample::First => 0,
            InitialSample::Second => 1,
        }
    }
}

/// Tuning for the fitting strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Starting value of every constant.
    pub initial_guess: f64,
    pub ode_initial_sample: InitialSample,
    /// Relative tolerance of the ODE integrator.
    pub rtol: f64,
    /// Absolute tolerance of the ODE integrator.
    pub atol: f64,
    /// Iteration cap of the ODE minimiser.
    pub max_iterations: u64,
    /// Nelder-Mead stops once the standard deviation of the simplex costs drops below this.
    pub sd_tolerance: f64,
    /// Relative change of every constant under which a minimiser restart has settled.
    pub param_tolerance: f64,
    /// Factor applied to the initial condition when the integrator fails.
    pub retry_scale: f64,
    /// Deadline for the ODE minimiser.
    pub timeout: Option<Duration>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            initial_guess: 1.0,
            ode_initial_sample: InitialSample::First,
            rtol: 1e-8,
            atol: 1e-10,
            max_iterations: 5000,
            sd_tolerance: 1e-12,
            param_tolerance: 1e-6,
            retry_scale: 0.1,
            timeout: None,
        }
    }
}

/// Hooks into a fit in progress. All hooks default to doing nothing.
pub trait FitObserver {
    /// The model was classified against its data.
    fn classified(&self, _model: &str, _kind: ModelKind) {}

    /// The ODE integrator failed and is retried with a scaled initial condition.
    fn solver_retry(&self, _error: &str, _initial: f64) {}

    /// A solver gave up.
    fn solver_failed(&self, _error: &str) {}

    fn finished(&self, _report: &FitReport) {}
}

impl<T: FitObserver + ?Sized> FitObserver for &T {
    fn classified(&self, model: &str, kind: ModelKind) {
        (**self).classified(model, kind)
    }

    fn solver_retry(&self, error: &str, initial: f64) {
        (**self).solver_retry(error, initial)
    }

    fn solver_failed(&self, error: &str) {
        (**self).solver_failed(error)
    }

    fn finished(&self, report: &FitReport) {
        (**self).finished(report)
    }
}

/// Forwards fit events to the `log` facade.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogObserver;

impl FitObserver for LogObserver {
    fn classified(&self, model: &str, kind: ModelKind) {
        debug!("fitting '{model}' as {kind:?}");
    }

    fn solver_retry(&self, error: &str, initial: f64) {
        warn!("ODE integration failed ({error}), retrying with initial condition {initial}");
    }

    fn solver_failed(&self, error: &str) {
        debug!("solver failed: {error}");
    }

    fn finished(&self, report: &FitReport) {
        info!(
            "fitted {} constants to {} observations in {} iterations",
            report.constants.len(),
            report.n,
            report.iterations
        );
    }
}

/// The result of [`fit`].
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    /// How the model was fitted.
    pub kind: ModelKind,

    /// The fitted constants.
    pub constants: FittedConstants,

    /// The fitted model for display.
    pub resulting_function: String,

    /// Number of observations.
    pub n: usize,

    /// Sum of squared residuals at the solution.
    pub ssr: f64,

    /// Solver iterations.
    pub iterations: usize,

    /// Parameter covariance scaled by the residual variance. Only curve fits estimate it.
    pub covariance: Option<Covariance>,
}

/// What a strategy hands back.
struct Estimate {
    values: Vec<f64>,
    ssr: f64,
    iterations: usize,
    observations: usize,
    covariance: Option<Covariance>,
}

trait FitStrategy {
    fn estimate<F: Function>(
        &self,
        model: &EquationModel<F>,
        data: &SampleData,
        ctx: &Fitter,
    ) -> Result<Estimate>;
}

/// Runs fits with a set of options and an observer.
pub struct Fitter<'a> {
    opts: FitOptions,
    observer: Box<dyn FitObserver + 'a>,
}

impl Default for Fitter<'_> {
    fn default() -> Self {
        Self::new(FitOptions::default())
    }
}

impl<'a> Fitter<'a> {
    pub fn new(opts: FitOptions) -> Self {
        Self {
            opts,
            observer: Box::new(LogObserver),
        }
    }

    pub fn with_observer<O: FitObserver + 'a>(mut self, observer: O) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn options(&self) -> &FitOptions {
        &self.opts
    }

    fn observer(&self) -> &dyn FitObserver {
        self.observer.as_ref()
    }

    /// Fit `model` to `data`.
    ///
    /// On success the fitted constants and the resulting function are written onto the model.
    /// On failure the model is left untouched.
    pub fn fit<F: Function>(
        &self,
        model: &mut EquationModel<F>,
        data: &SampleData,
    ) -> Result<FitReport> {
        if model.fitted_constants().is_some() {
            return Err(Error::AlreadyFitted("fitted constants"));
        }

        if model.constants().is_empty() {
            return Err(Error::NothingToFit);
        }

        let kind = model.classify(data.width())?;
        self.observer().classified(model.raw().trim(), kind);

        if data.is_empty() {
            return Err(Error::InvalidInput("data has no observations".into()));
        }

        let est = match kind {
            ModelKind::Ode { notation } => ode::OdeFit {
                order: notation.order(),
            }
            .estimate(model, data, self),
            ModelKind::Regular | ModelKind::Vector { .. } => {
                curve::CurveFit.estimate(model, data, self)
            }
        }
        .map_err(|e| {
            self.observer().solver_failed(&e.to_string());
            e
        })?;

        let constants = FittedConstants::new(
            model
                .constants()
                .iter()
                .cloned()
                .zip(est.values.iter().copied()),
        );
        let resulting_function = resulting_function(model.expression(), &constants);

        model.set_fitted_constants(constants.clone())?;
        model.set_resulting_function(resulting_function.clone())?;

        let report = FitReport {
            kind,
            constants,
            resulting_function,
            n: est.observations,
            ssr: est.ssr,
            iterations: est.iterations,
            covariance: est.covariance,
        };
        self.observer().finished(&report);

        Ok(report)
    }
}

/// Fit an equation model using the input data and default options.
///
/// If you are using `modelfit` as a library, this is function to use!
///
/// ## Data
/// Columns are positional: one per independent variable, in declared order, followed by one per
/// model component. ODE models take the independent variable column and the observed samples.
///
/// # Example
/// Let's fit a line to noise free data:
///
/// ```rust
/// use modelfit::*;
///
/// let data = SampleData::new(vec![
///     vec![0., 1., 2., 3., 4.],
///     vec![1., 3., 5., 7., 9.],
/// ])
/// .unwrap();
///
/// let mut model = EquationModel::new("y = m*t + c", &["t"]).unwrap();
/// fit(&mut model, &data).unwrap();
///
/// let consts = model.fitted_constants().unwrap();
/// assert!((consts.get("m").unwrap() - 2.).abs() < 1e-6);
/// assert!((consts.get("c").unwrap() - 1.).abs() < 1e-6);
/// assert_eq!(model.resulting_function(), Some("2.00*t + 1.00"));
/// ```
pub fn fit<F: Function>(model: &mut EquationModel<F>, data: &SampleData) -> Result<FitReport> {
    Fitter::default().fit(model, data)
}

/// The expression with each constant replaced by its value to 2 decimal places, `**` as `^`
/// and spaced binary signs.
pub fn resulting_function(expression: &str, constants: &FittedConstants) -> String {
    let s = expr::substitute(expression, |n| constants.get(n).map(|v| format!("{v:.2}")))
        .split_whitespace()
        .collect::<String>()
        .replace("**", "^")
        .replace("+-", "-")
        .replace("--", "+");

    let mut out = String::with_capacity(s.len() + 8);
    let mut prev: Option<char> = None;
    // first character of the operand being written
    let mut start: Option<char> = None;
    for c in s.chars() {
        // a sign is binary when it follows an operand, but not inside a literal like `2.5e-3`
        let exponent = matches!(prev, Some('e' | 'E'))
            && matches!(start, Some(b) if b.is_ascii_digit() || b == '.');
        let binary =
            !exponent && matches!(prev, Some(p) if p == ')' || p == '_' || p.is_alphanumeric());
        match c {
            '+' | '-' if binary => {
                out.push(' ');
                out.push(c);
                out.push(' ');
            }
            ',' => out.push_str(", "),
            c => out.push(c),
        }
        let operand = |c: char| c.is_alphanumeric() || c == '_' || c == '.';
        if !operand(c) {
            start = None;
        } else if start.is_none() {
            start = Some(c);
        }
        prev = Some(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resulting_function_spacing() {
        let c = FittedConstants::new([("a", 1.437), ("b", -3.254), ("c", 5.)]);
        assert_eq!(
            resulting_function("a*t**2+b*t + c", &c),
            "1.44*t^2 - 3.25*t + 5.00"
        );
    }

    #[test]
    fn resulting_function_folds_signs() {
        let c = FittedConstants::new([("p", -2.), ("q", -0.5)]);
        assert_eq!(resulting_function("x + p*t - q", &c), "x - 2.00*t + 0.50");
    }

    #[test]
    fn resulting_function_leaves_functions_alone() {
        let c = FittedConstants::new([("a", 2.), ("k", 0.5)]);
        assert_eq!(resulting_function("a*exp(k*t)", &c), "2.00*exp(0.50*t)");
        assert_eq!(resulting_function("-a*exp(-k*t)", &c), "-2.00*exp(-0.50*t)");
        assert_eq!(resulting_function("a*t,k + t", &c), "2.00*t, 0.50 + t");
    }

    #[test]
    fn resulting_function_keeps_exponent_signs() {
        let c = FittedConstants::new([("a", 2.), ("k", 0.5)]);
        assert_eq!(resulting_function("a*t + 2.5e-3", &c), "2.00*t + 2.5e-3");
        assert_eq!(resulting_function("a*t-1E+2*k", &c), "2.00*t - 1E+2*0.50");
        assert_eq!(resulting_function("e-a", &c), "e - 2.00");
        assert_eq!(resulting_function("x2e-k", &c), "x2e - 0.50");
    }
}
