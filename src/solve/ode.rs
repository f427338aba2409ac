use super::*;
use crate::model::Derivative;
use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use ode_solvers::dop_shared::OutputType;
use ode_solvers::{dopri5::Dopri5, System, Vector2};
use std::time::Instant;

/// `(y, y')`
type OdeState = Vector2<f64>;

/// Relative size of the initial simplex steps.
const SIMPLEX_STEP: f64 = 0.05;

/// Nelder-Mead restarts allowed before the constants must have settled.
const MAX_RESTARTS: usize = 50;

/// Relative drop in cost below which a restart counts as standing still.
const COST_IMPROVEMENT: f64 = 1e-9;

/// Dopri5 step cap per sample interval.
const MAX_STEPS: u32 = 100_000;

/// Fits a first or second order ODE by minimising the squared error of its solved trajectory.
pub(super) struct OdeFit {
    pub order: usize,
}

/// Right hand side handed to the integrator.
struct Rhs<'a, F> {
    f: &'a F,
    /// Pass the integrator's time as the leading argument.
    with_time: bool,
    order: usize,
    consts: &'a [f64],
}

impl<F> Clone for Rhs<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for Rhs<'_, F> {}

impl<F: Function> Rhs<'_, F> {
    /// The highest derivative at `(t, y)`, NaN when the model cannot be evaluated.
    fn highest(&self, t: f64, y: f64) -> f64 {
        let mut args = Vec::with_capacity(2 + self.consts.len());
        if self.with_time {
            args.push(t);
        }
        args.push(y);
        args.extend_from_slice(self.consts);

        let mut out = [f64::NAN];
        match self.f.eval_into(&args, &mut out) {
            Some(()) => out[0],
            None => f64::NAN,
        }
    }
}

impl<F: Function> System<f64, OdeState> for Rhs<'_, F> {
    fn system(&self, t: f64, y: &OdeState, dy: &mut OdeState) {
        let d = self.highest(t, y[0]);
        if self.order == 2 {
            dy[0] = y[1];
            dy[1] = d;
        } else {
            dy[0] = d;
            dy[1] = 0.;
        }
    }
}

/// Sum of squared differences between the solved trajectory and the samples.
struct Objective<'a, F> {
    f: &'a F,
    with_time: bool,
    order: usize,
    ts: &'a [f64],
    ys: &'a [f64],
    initial: OdeState,
    opts: &'a FitOptions,
    observer: &'a dyn FitObserver,
}

impl<F: Function> Objective<'_, F> {
    /// Solve the trajectory at every sample time, starting from `initial` at the first one.
    fn trajectory(&self, consts: &[f64], initial: OdeState) -> Result<Vec<f64>, String> {
        let rhs = Rhs {
            f: self.f,
            with_time: self.with_time,
            order: self.order,
            consts,
        };

        if !rhs.highest(self.ts[0], initial[0]).is_finite() {
            return Err(format!(
                "derivative is not finite at t={}, y={}",
                self.ts[0], initial[0]
            ));
        }

        let mut state = initial;
        let mut out = Vec::with_capacity(self.ts.len());
        out.push(state[0]);

        for w in self.ts.windows(2) {
            let (t0, t1) = (w[0], w[1]);
            let mut stepper = Dopri5::from_param(
                rhs,
                t0,
                t1,
                0.,
                state,
                self.opts.rtol,
                self.opts.atol,
                0.9,
                0.04,
                0.2,
                10.,
                t1 - t0,
                0.,
                MAX_STEPS,
                1000,
                OutputType::Sparse,
            );
            stepper.integrate().map_err(|e| e.to_string())?;
            state = *stepper
                .y_out()
                .last()
                .ok_or_else(|| format!("no solution between t={t0} and t={t1}"))?;

            if !state[0].is_finite() {
                return Err(format!("solution diverged before t={t1}"));
            }
            out.push(state[0]);
        }

        Ok(out)
    }

    /// Solve, retrying once with a scaled initial condition.
    fn solve(&self, consts: &[f64]) -> Result<Vec<f64>> {
        match self.trajectory(consts, self.initial) {
            Ok(ys) => Ok(ys),
            Err(e) => {
                let scaled = self.initial * self.opts.retry_scale;
                self.observer.solver_retry(&e, scaled[0]);
                self.trajectory(consts, scaled).map_err(|e2| {
                    Error::fitting(format!(
                        "ODE integration failed for constants {consts:?}: {e}; \
                         retry with scaled initial condition failed: {e2}"
                    ))
                })
            }
        }
    }

    fn ssr(&self, consts: &[f64]) -> Result<f64> {
        let sol = self.solve(consts)?;
        let ssr = sol
            .iter()
            .zip(self.ys)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>();

        Ok(if ssr.is_finite() { ssr } else { f64::INFINITY })
    }
}

impl<F: Function> CostFunction for &Objective<'_, F> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.ssr(p)?)
    }
}

impl FitStrategy for OdeFit {
    fn estimate<F: Function>(
        &self,
        model: &EquationModel<F>,
        data: &SampleData,
        ctx: &Fitter,
    ) -> Result<Estimate> {
        let opts = ctx.options();

        if model.components() != 1 {
            return Err(Error::InvalidInput(
                "an ODE model must have a single component".into(),
            ));
        }

        let derivative = model
            .derivative()
            .ok_or_else(|| Error::invalid_state("ODE fit of a model without a derivative"))?;
        let with_time = state_binding(derivative, model.independent_vars())?;

        let (ts, ys) = match data.columns() {
            [ts, ys] => (ts.as_slice(), ys.as_slice()),
            cols => {
                return Err(Error::DimensionMismatch {
                    expected: 2,
                    actual: cols.len(),
                })
            }
        };

        if ts.len() < 2 {
            return Err(Error::InvalidInput(
                "an ODE fit needs at least two samples".into(),
            ));
        }
        if ts.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::InvalidInput(
                "independent variable samples must be strictly increasing".into(),
            ));
        }

        let y0 = ys[opts.ode_initial_sample.index()];
        let slope0 = (ys[1] - ys[0]) / (ts[1] - ts[0]);

        let objective = Objective {
            f: model.function(),
            with_time,
            order: self.order,
            ts,
            ys,
            initial: OdeState::new(y0, slope0),
            opts,
            observer: ctx.observer(),
        };

        minimise(&objective, vec![opts.initial_guess; model.constants().len()], opts).map(
            |(values, ssr, iterations)| Estimate {
                values,
                ssr,
                iterations,
                observations: ts.len(),
                covariance: None,
            },
        )
    }
}

/// Whether the integrator's time is passed ahead of the state.
///
/// The state is bound to the last declared independent variable, which must be the differentiated
/// one. A second declared variable in front of it is the time, and must match the variable
/// differentiated by when the notation names it.
fn state_binding(d: &Derivative, vars: &[String]) -> Result<bool> {
    let time_matches = |t: &String| d.independent.as_ref().map_or(true, |x| x == t);

    match vars {
        [y] if *y == d.dependent => Ok(false),
        [t, y] if *y == d.dependent && time_matches(t) => Ok(true),
        _ => Err(Error::InvalidInput(format!(
            "the ODE is in '{y}', declare the independent variables as '{y}' or '{t}, {y}', \
             found '{found}'",
            y = d.dependent,
            t = d.independent.as_deref().unwrap_or("t"),
            found = vars.join(", ")
        ))),
    }
}

/// Nelder-Mead from `guess`, restarted from the best vertex until the constants settle.
///
/// A single run stops once the simplex costs agree, which can happen with the vertices straddling
/// the minimum. Restarts alternate the step direction and finish after two in a row either leave
/// every constant within `param_tolerance` or no longer lower the cost.
fn minimise<F: Function>(
    objective: &Objective<F>,
    guess: Vec<f64>,
    opts: &FitOptions,
) -> Result<(Vec<f64>, f64, usize)> {
    let deadline = opts.timeout.map(|t| Instant::now() + t);

    let mut best = guess;
    let mut ssr = f64::INFINITY;
    let mut iterations = 0;
    let mut still = 0;

    for restart in 0..MAX_RESTARTS {
        let step = if restart % 2 == 0 {
            SIMPLEX_STEP
        } else {
            -SIMPLEX_STEP
        };
        let simplex = initial_simplex(&best, step);

        // the solver unwraps the starting costs, integration failures must surface here
        for v in &simplex {
            objective.ssr(v)?;
        }

        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(opts.sd_tolerance)
            .map_err(Error::fitting)?;

        let mut exec = Executor::new(objective, solver)
            .configure(|state| state.max_iters(opts.max_iterations));
        if let Some(deadline) = deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(Error::fitting("minimiser timed out"));
            }
            exec = exec.timeout(left);
        }

        // objective errors come back wrapped, unwrap them to keep their detail
        let res = exec
            .run()
            .map_err(|e| e.downcast::<Error>().unwrap_or_else(Error::fitting))?;
        let state = res.state();

        match state.get_termination_reason() {
            Some(TerminationReason::MaxItersReached) => {
                return Err(Error::fitting(format!(
                    "minimiser did not converge within {} iterations",
                    opts.max_iterations
                )))
            }
            Some(TerminationReason::Timeout) => {
                return Err(Error::fitting("minimiser timed out"))
            }
            _ => (),
        }

        iterations += state.get_iter() as usize;
        let cost = state.get_best_cost();
        let values = state
            .get_best_param()
            .cloned()
            .filter(|_| cost.is_finite())
            .ok_or_else(|| Error::fitting("minimiser found no finite solution"))?;

        let moved = values
            .iter()
            .zip(&best)
            .any(|(a, b)| (a - b).abs() > opts.param_tolerance * (1. + b.abs()));
        let improved = cost < ssr * (1. - COST_IMPROVEMENT);
        best = values;
        ssr = cost;

        if moved && improved {
            still = 0;
        } else {
            still += 1;
            if still == 2 {
                return Ok((best, ssr, iterations));
            }
        }
    }

    Err(Error::fitting(format!(
        "constants still moving after {MAX_RESTARTS} minimiser restarts, best ssr {ssr}"
    )))
}

/// The guess plus one vertex per axis, each stepped by `step` relative (or a fixed amount at 0).
fn initial_simplex(guess: &[f64], step: f64) -> Vec<Vec<f64>> {
    let mut simplex = vec![guess.to_vec()];
    for i in 0..guess.len() {
        let mut v = guess.to_vec();
        v[i] = if v[i] == 0. {
            0.005 * step
        } else {
            v[i] * (1. + step)
        };
        simplex.push(v);
    }
    simplex
}
