//! Multiplicative seasonal ARMA, fitted by conditional sum of squares.
//!
//! The model is
//!
//! ```text
//! φ(B) Φ(B^s) (y_t - μ) = θ(B) Θ(B^s) e_t
//! ```
//!
//! with `μ` the sample mean, zero pre-sample values and no differencing.
//! Coefficients are searched in an unconstrained space and mapped through
//! [`constrain_stationary`] so every candidate is stationary and invertible.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use super::optimizer::{constrain_stationary, nelder_mead, solve_least_squares, unconstrain_stationary};

/// Unconstrained starting values are kept inside this box.
const START_BOUND: f64 = 10.0;
const SIMPLEX_STEP: f64 = 0.5;
/// Order of the long autoregression used for the initial residual estimates.
const LONG_AR_MAX: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmaOrder {
    pub p: usize,
    pub q: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonalOrder {
    pub p: usize,
    pub q: usize,
    pub period: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub order: ArmaOrder,
    pub seasonal: Option<SeasonalOrder>,
}

impl ModelSpec {
    pub fn non_seasonal(p: usize, q: usize) -> Self {
        Self {
            order: ArmaOrder { p, q },
            seasonal: None,
        }
    }

    pub fn seasonal(order: ArmaOrder, seasonal: SeasonalOrder) -> Self {
        Self {
            order,
            seasonal: Some(seasonal),
        }
    }

    fn seasonal_p(&self) -> usize {
        self.seasonal.map_or(0, |s| s.p)
    }

    fn seasonal_q(&self) -> usize {
        self.seasonal.map_or(0, |s| s.q)
    }

    fn period(&self) -> usize {
        self.seasonal.map_or(1, |s| s.period)
    }

    pub fn parameter_count(&self) -> usize {
        self.order.p + self.order.q + self.seasonal_p() + self.seasonal_q()
    }

    /// Observations needed to estimate the coefficients, mean and variance.
    pub fn min_observations(&self) -> usize {
        self.parameter_count() + 2
    }

    /// Map an unconstrained parameter vector onto model coefficients.
    fn coefficients(&self, x: &[f64]) -> Coefficients {
        let (ar, rest) = x.split_at(self.order.p);
        let (sar, rest) = rest.split_at(self.seasonal_p());
        let (ma, sma) = rest.split_at(self.order.q);
        let invertible = |v: &[f64]| -> Vec<f64> {
            constrain_stationary(v).into_iter().map(|c| -c).collect()
        };
        Coefficients {
            ar: constrain_stationary(ar),
            seasonal_ar: constrain_stationary(sar),
            ma: invertible(ma),
            seasonal_ma: invertible(sma),
            period: self.period(),
        }
    }

    /// Inverse of [`ModelSpec::coefficients`], sanitised for use as a start point.
    fn unconstrained(&self, c: &Coefficients) -> Vec<f64> {
        let negated = |v: &[f64]| -> Vec<f64> { v.iter().map(|c| -c).collect() };
        let mut x = Vec::with_capacity(self.parameter_count());
        x.extend(unconstrain_stationary(&c.ar));
        x.extend(unconstrain_stationary(&c.seasonal_ar));
        x.extend(unconstrain_stationary(&negated(&c.ma)));
        x.extend(unconstrain_stationary(&negated(&c.seasonal_ma)));
        x.into_iter()
            .map(|v| if v.is_finite() { v.clamp(-START_BOUND, START_BOUND) } else { 0.0 })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("series too short: {len} observations, {required} required")]
    TooShort { len: usize, required: usize },

    #[error("series contains non-finite values")]
    NonFiniteInput,

    #[error("objective is not finite at the fitted parameters")]
    NonFiniteObjective,

    #[error("forecast diverged at step {0}")]
    NonFiniteForecast(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-8,
        }
    }
}

/// Factor coefficients. Sign convention:
/// AR polynomials are `1 - Σ c B^k`, MA polynomials `1 + Σ c B^k`.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    pub ar: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub seasonal_ma: Vec<f64>,
    pub period: usize,
}

impl Coefficients {
    /// Non-zero `(lag, a_lag)` of the expanded AR side, `z_t = Σ a_k z_{t-k} + ...`.
    fn ar_lags(&self) -> Vec<(usize, f64)> {
        let product = multiply(
            &lag_polynomial(&self.ar, 1, -1.0),
            &lag_polynomial(&self.seasonal_ar, self.period, -1.0),
        );
        sparse_lags(&product, -1.0)
    }

    /// Non-zero `(lag, m_lag)` of the expanded MA side, `... + e_t + Σ m_k e_{t-k}`.
    fn ma_lags(&self) -> Vec<(usize, f64)> {
        let product = multiply(
            &lag_polynomial(&self.ma, 1, 1.0),
            &lag_polynomial(&self.seasonal_ma, self.period, 1.0),
        );
        sparse_lags(&product, 1.0)
    }
}

/// `1 + sign * (c_1 B^stride + c_2 B^(2 stride) + ...)` as a dense coefficient vector.
fn lag_polynomial(coeffs: &[f64], stride: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coeffs.len() * stride + 1];
    poly[0] = 1.0;
    for (i, c) in coeffs.iter().enumerate() {
        poly[(i + 1) * stride] = sign * c;
    }
    poly
}

fn multiply(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

fn sparse_lags(poly: &[f64], sign: f64) -> Vec<(usize, f64)> {
    poly.iter()
        .enumerate()
        .skip(1)
        .filter(|(_, c)| **c != 0.0)
        .map(|(k, c)| (k, sign * c))
        .collect()
}

/// One-step residuals with zero pre-sample values.
fn residuals(z: &[f64], ar: &[(usize, f64)], ma: &[(usize, f64)]) -> Vec<f64> {
    let mut e = vec![0.0; z.len()];
    for t in 0..z.len() {
        let mut value = z[t];
        for &(k, a) in ar {
            if k <= t {
                value -= a * z[t - k];
            }
        }
        for &(k, m) in ma {
            if k <= t {
                value -= m * e[t - k];
            }
        }
        e[t] = value;
    }
    e
}

fn mean_square(e: &[f64]) -> f64 {
    e.iter().map(|v| v * v).sum::<f64>() / e.len() as f64
}

#[derive(Debug, Clone)]
pub struct FittedArma {
    spec: ModelSpec,
    coefficients: Coefficients,
    mean: f64,
    centred: Vec<f64>,
    residuals: Vec<f64>,
    sigma2: f64,
    converged: bool,
    iterations: usize,
}

impl FittedArma {
    pub fn spec(&self) -> ModelSpec {
        self.spec
    }

    #[cfg(test)]
    pub fn coefficients(&self) -> &Coefficients {
        &self.coefficients
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Point forecasts for the next `steps` periods; future shocks are zero.
    pub fn forecast(&self, steps: usize) -> Result<Vec<f64>, ModelError> {
        let ar = self.coefficients.ar_lags();
        let ma = self.coefficients.ma_lags();
        let n = self.centred.len();

        let mut z = self.centred.clone();
        z.reserve(steps);
        let shock = |t: usize| if t < n { self.residuals[t] } else { 0.0 };

        let mut out = Vec::with_capacity(steps);
        for h in 0..steps {
            let t = n + h;
            let mut value = 0.0;
            for &(k, a) in &ar {
                if k <= t {
                    value += a * z[t - k];
                }
            }
            for &(k, m) in &ma {
                if k <= t {
                    value += m * shock(t - k);
                }
            }
            if !value.is_finite() {
                return Err(ModelError::NonFiniteForecast(h + 1));
            }
            z.push(value);
            out.push(value + self.mean);
        }
        Ok(out)
    }
}

/// Fit `spec` to `values`.
///
/// Reaching the iteration cap is logged and the best point found is kept.
pub fn fit(values: &[f64], spec: ModelSpec, options: FitOptions) -> Result<FittedArma, ModelError> {
    let required = spec.min_observations();
    if values.len() < required {
        return Err(ModelError::TooShort {
            len: values.len(),
            required,
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteInput);
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let centred: Vec<f64> = values.iter().map(|v| v - mean).collect();

    let start = spec.unconstrained(&initial_coefficients(&centred, &spec));
    let objective = |x: &[f64]| {
        let c = spec.coefficients(x);
        mean_square(&residuals(&centred, &c.ar_lags(), &c.ma_lags()))
    };

    let minimum = nelder_mead(
        objective,
        &start,
        SIMPLEX_STEP,
        options.max_iterations,
        options.tolerance,
    );
    if !minimum.value.is_finite() {
        return Err(ModelError::NonFiniteObjective);
    }
    if !minimum.converged {
        warn!(
            "Model fit did not converge after {} iterations (objective {:.4})",
            minimum.iterations, minimum.value
        );
    }

    let coefficients = spec.coefficients(&minimum.x);
    let e = residuals(&centred, &coefficients.ar_lags(), &coefficients.ma_lags());
    debug!(
        "Fitted {:?}: ar={:?} sar={:?} ma={:?} sma={:?} sigma2={:.4}",
        spec,
        coefficients.ar,
        coefficients.seasonal_ar,
        coefficients.ma,
        coefficients.seasonal_ma,
        minimum.value
    );

    Ok(FittedArma {
        spec,
        coefficients,
        mean,
        centred,
        residuals: e,
        sigma2: minimum.value,
        converged: minimum.converged,
        iterations: minimum.iterations,
    })
}

/// Hannan-Rissanen style starting coefficients.
///
/// A long autoregression supplies residual estimates; the model's own lags
/// are then regressed on the series and those residuals. Seasonal terms are
/// left at zero when there are too few rows to estimate them.
fn initial_coefficients(z: &[f64], spec: &ModelSpec) -> Coefficients {
    let period = spec.period();
    let zeros = |n: usize| vec![0.0; n];
    let mut coefficients = Coefficients {
        ar: zeros(spec.order.p),
        seasonal_ar: zeros(spec.seasonal_p()),
        ma: zeros(spec.order.q),
        seasonal_ma: zeros(spec.seasonal_q()),
        period,
    };
    if spec.parameter_count() == 0 {
        return coefficients;
    }

    let long_order = (z.len() / 4).clamp(1, LONG_AR_MAX);
    let shocks = long_ar_residuals(z, long_order);

    for with_seasonal in [true, false] {
        let (sp, sq) = if with_seasonal {
            (spec.seasonal_p(), spec.seasonal_q())
        } else {
            (0, 0)
        };
        let z_lags: Vec<usize> = (1..=spec.order.p).chain((1..=sp).map(|i| i * period)).collect();
        let e_lags: Vec<usize> = (1..=spec.order.q).chain((1..=sq).map(|i| i * period)).collect();
        let columns = z_lags.len() + e_lags.len();
        if columns == 0 {
            continue;
        }

        let max_lag = z_lags.iter().chain(&e_lags).copied().max().unwrap_or(0);
        let first = if e_lags.is_empty() { max_lag } else { max_lag + long_order };
        if z.len() < first + 2 * columns + 1 {
            continue;
        }

        let rows = z.len() - first;
        let x = DMatrix::from_fn(rows, columns, |r, c| {
            let t = first + r;
            if c < z_lags.len() {
                z[t - z_lags[c]]
            } else {
                shocks[t - e_lags[c - z_lags.len()]]
            }
        });
        let y = DVector::from_fn(rows, |r, _| z[first + r]);
        let Some(beta) = solve_least_squares(&x, &y) else {
            continue;
        };

        let mut values = beta.iter().copied();
        let mut take = |n: usize| -> Vec<f64> { values.by_ref().take(n).collect() };
        coefficients.ar = take(spec.order.p);
        let sar = take(sp);
        coefficients.ma = take(spec.order.q);
        let sma = take(sq);
        if with_seasonal {
            coefficients.seasonal_ar = sar;
            coefficients.seasonal_ma = sma;
        }
        return coefficients;
    }
    coefficients
}

/// Residuals of an AR(`order`) least-squares fit; zero where undefined.
fn long_ar_residuals(z: &[f64], order: usize) -> Vec<f64> {
    let mut shocks = vec![0.0; z.len()];
    if z.len() <= 2 * order {
        return shocks;
    }
    let rows = z.len() - order;
    let x = DMatrix::from_fn(rows, order, |r, c| z[order + r - c - 1]);
    let y = DVector::from_fn(rows, |r, _| z[order + r]);
    let Some(beta) = solve_least_squares(&x, &y) else {
        return shocks;
    };
    let fitted = &x * &beta;
    for r in 0..rows {
        shocks[order + r] = y[r] - fitted[r];
    }
    shocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use rand_distr::Normal;

    fn simulate_ar1(phi: f64, level: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut z = 0.0;
        (0..n)
            .map(|_| {
                z = phi * z + noise.sample(&mut rng);
                level + z
            })
            .collect()
    }

    #[test]
    fn expands_multiplicative_lag_polynomials() {
        let c = Coefficients {
            ar: vec![0.5],
            seasonal_ar: vec![0.3],
            ma: vec![0.2],
            seasonal_ma: vec![],
            period: 4,
        };

        // (1 - 0.5B)(1 - 0.3B^4) = 1 - 0.5B - 0.3B^4 + 0.15B^5
        let ar = c.ar_lags();
        assert_eq!(ar.len(), 3);
        assert_eq!(ar[0], (1, 0.5));
        assert_eq!(ar[1].0, 4);
        assert!((ar[1].1 - 0.3).abs() < 1e-12);
        assert_eq!(ar[2].0, 5);
        assert!((ar[2].1 + 0.15).abs() < 1e-12);

        assert_eq!(c.ma_lags(), vec![(1, 0.2)]);
    }

    #[test]
    fn recovers_autoregressive_coefficient() {
        let values = simulate_ar1(0.6, 50.0, 500, 11);

        let fitted = fit(&values, ModelSpec::non_seasonal(1, 0), FitOptions::default()).unwrap();

        assert!((fitted.coefficients().ar[0] - 0.6).abs() < 0.15);
        assert!((fitted.mean() - 50.0).abs() < 1.0);
        assert!(fitted.sigma2() > 0.5 && fitted.sigma2() < 1.5);
    }

    #[test]
    fn fitted_coefficients_are_stationary_and_invertible() {
        let values = simulate_ar1(0.8, 1000.0, 200, 3);
        let spec = ModelSpec::seasonal(
            ArmaOrder { p: 1, q: 1 },
            SeasonalOrder { p: 1, q: 1, period: 12 },
        );

        let fitted = fit(&values, spec, FitOptions::default()).unwrap();
        let c = fitted.coefficients();
        for v in c.ar.iter().chain(&c.seasonal_ar).chain(&c.ma).chain(&c.seasonal_ma) {
            assert!(v.abs() <= 1.0);
        }
    }

    #[test]
    fn constant_series_forecasts_its_level() {
        let values = vec![1200.0; 30];

        let fitted = fit(&values, ModelSpec::non_seasonal(1, 1), FitOptions::default()).unwrap();
        let forecast = fitted.forecast(6).unwrap();

        assert_eq!(forecast.len(), 6);
        assert!(forecast.iter().all(|v| (v - 1200.0).abs() < 1e-9));
    }

    #[test]
    fn long_horizon_reverts_to_mean() {
        let values = simulate_ar1(0.5, 300.0, 300, 5);

        let fitted = fit(&values, ModelSpec::non_seasonal(1, 1), FitOptions::default()).unwrap();
        let forecast = fitted.forecast(60).unwrap();

        assert!((forecast[59] - fitted.mean()).abs() < 0.5);
    }

    #[test]
    fn rejects_short_or_non_finite_input() {
        let spec = ModelSpec::non_seasonal(1, 1);
        assert_eq!(
            fit(&[1.0, 2.0, 3.0], spec, FitOptions::default()).unwrap_err(),
            ModelError::TooShort { len: 3, required: 4 }
        );
        assert_eq!(
            fit(&[1.0, f64::NAN, 3.0, 4.0, 5.0], spec, FitOptions::default()).unwrap_err(),
            ModelError::NonFiniteInput
        );
    }
}
