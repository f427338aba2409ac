//! Goodness of fit from a covariance matrix.
use crate::error::{Error, Result};
use serde::Serialize;

/// z value of a two sided 95% interval under normality.
const Z_95: f64 = 1.96;

/// A square parameter covariance matrix, stored row major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Covariance {
    n: usize,
    values: Vec<f64>,
}

impl Covariance {
    /// Build from a row major buffer of `n * n` values.
    pub fn from_row_major(n: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != n * n {
            return Err(Error::InvalidInput(format!(
                "covariance of {n} parameters needs {} values, got {}",
                n * n,
                values.len()
            )));
        }
        Ok(Self { n, values })
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        if let Some(r) = rows.iter().find(|r| r.len() != n) {
            return Err(Error::InvalidInput(format!(
                "covariance matrix must be square, found a row of {} in a {n} row matrix",
                r.len()
            )));
        }
        Self::from_row_major(n, rows.concat())
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        (row < self.n && col < self.n).then(|| self.values[row * self.n + col])
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.values[i * self.n + i]).collect()
    }

    /// Multiply every entry by `k`.
    pub fn scaled(mut self, k: f64) -> Self {
        self.values.iter_mut().for_each(|x| *x *= k);
        self
    }
}

/// Fit quality metrics derived from a covariance matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitMetrics {
    pub variances: Vec<f64>,
    pub std_devs: Vec<f64>,
    /// Half widths of the 95% confidence interval of each parameter.
    pub confidence_intervals: Vec<f64>,
    /// Mean of the variances.
    pub mse: f64,
    pub rmse: f64,
}

/// Evaluate the goodness of fit from the parameter covariance.
///
/// The confidence intervals assume normally distributed estimates.
pub fn evaluate_fit(pcov: Option<&Covariance>) -> Result<FitMetrics> {
    let pcov = pcov.ok_or_else(|| Error::InvalidInput("covariance matrix is missing".into()))?;

    let variances = pcov.diagonal();
    let std_devs: Vec<f64> = variances.iter().map(|v| v.sqrt()).collect();
    let confidence_intervals = std_devs.iter().map(|s| Z_95 * s).collect();

    let mse = if variances.is_empty() {
        f64::NAN
    } else {
        variances.iter().sum::<f64>() / variances.len() as f64
    };

    Ok(FitMetrics {
        variances,
        std_devs,
        confidence_intervals,
        mse,
        rmse: mse.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_of_rows() {
        let c = Covariance::from_rows(&[vec![1., 0.5], vec![0.5, 4.]]).unwrap();
        assert_eq!(c.dim(), 2);
        assert_eq!(c.diagonal(), [1., 4.]);
        assert_eq!(c.get(0, 1), Some(0.5));
        assert_eq!(c.get(2, 0), None);
    }

    #[test]
    fn non_square_rejected() {
        assert!(Covariance::from_rows(&[vec![1., 0.], vec![0.]]).is_err());
        assert!(Covariance::from_row_major(2, vec![1.]).is_err());
    }
}
