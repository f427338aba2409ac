use super::*;
use rmpfit::{MPError, MPFitter, MPResult};

/// Least squares fit of algebraic models, scalar or vector valued.
pub(super) struct CurveFit;

struct Residuals<'a, F> {
    f: &'a F,
    /// Independent variable columns.
    inputs: &'a [Vec<f64>],
    /// Observations, point major then component minor.
    targets: Vec<f64>,
    components: usize,
}

impl FitStrategy for CurveFit {
    fn estimate<F: Function>(
        &self,
        model: &EquationModel<F>,
        data: &SampleData,
        ctx: &Fitter,
    ) -> Result<Estimate> {
        let nvars = model.independent_vars().len();
        let components = model.components();
        let (inputs, results) = data.columns().split_at(nvars);

        // transpose the component columns into point rows, then flatten
        let targets = (0..data.len())
            .flat_map(|i| results.iter().map(move |col| col[i]))
            .collect::<Vec<_>>();

        let fitter = Residuals {
            f: model.function(),
            inputs,
            targets,
            components,
        };

        let mut params = vec![ctx.options().initial_guess; model.constants().len()];

        let status = fitter
            .mpfit(&mut params, None, &Default::default())
            .map_err(Error::fitting)?;

        if params.iter().any(|p| !p.is_finite()) {
            return Err(Error::fitting("solver returned non-finite constants"));
        }

        let m = fitter.number_of_points();
        let k = params.len();
        let ssr = status.best_norm;

        // rmpfit reports the covariance for unit weights, scale by the residual variance
        let covariance = if m > k {
            let covar = if status.covar.len() == k * k {
                status.covar
            } else {
                // no full matrix, rebuild the diagonal from the parameter errors
                let mut c = vec![0.; k * k];
                for (i, e) in status.xerror.iter().enumerate().take(k) {
                    c[i * k + i] = e * e;
                }
                c
            };
            let scale = ssr / (m - k) as f64;
            Some(
                Covariance::from_row_major(k, covar)
                    .map_err(Error::fitting)?
                    .scaled(scale),
            )
        } else {
            debug!("{m} residuals for {k} constants, no covariance");
            None
        };

        Ok(Estimate {
            values: params,
            ssr,
            iterations: status.n_iter as usize,
            observations: data.len(),
            covariance,
        })
    }
}

impl<F: Function> MPFitter for Residuals<'_, F> {
    fn number_of_points(&self) -> usize {
        self.targets.len()
    }

    fn eval(&self, params: &[f64], deviates: &mut [f64]) -> MPResult<()> {
        let nvars = self.inputs.len();

        let mut args = vec![0.; nvars + params.len()];
        args[nvars..].copy_from_slice(params);
        let mut out = vec![0.; self.components];

        let points = deviates
            .chunks_mut(self.components)
            .zip(self.targets.chunks(self.components));

        for (i, (devs, ys)) in points.enumerate() {
            for (a, col) in args.iter_mut().zip(self.inputs) {
                *a = col[i];
            }

            self.f.eval_into(&args, &mut out).ok_or(MPError::Eval)?;

            for ((d, y), f) in devs.iter_mut().zip(ys).zip(&out) {
                if f.is_finite() {
                    *d = y - f;
                } else {
                    *d = 1e13; // very large deviation
                }
            }
        }

        Ok(())
    }
}
