//! Numerical helpers for model fitting.
//!
//! - [`nelder_mead`]: derivative-free minimiser used on the conditional sum of squares
//! - [`constrain_stationary`] / [`unconstrain_stationary`]: map unbounded
//!   optimiser coordinates onto stationary (or invertible) lag polynomials
//! - [`solve_least_squares`]: SVD least squares for the initial estimates

use nalgebra::{DMatrix, DVector};

/// Result of a minimisation.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimise `f` from `start` with an initial simplex of edge `step`.
///
/// Non-finite objective values are treated as `+inf` so the simplex moves
/// away from them. Converged when both the spread of values and the spread of
/// vertices fall under `tolerance` (values relative, vertices `sqrt`).
pub fn nelder_mead<F>(f: F, start: &[f64], step: f64, max_iterations: usize, tolerance: f64) -> Minimum
where
    F: Fn(&[f64]) -> f64,
{
    let eval = |x: &[f64]| {
        let v = f(x);
        if v.is_finite() { v } else { f64::INFINITY }
    };

    let n = start.len();
    if n == 0 {
        return Minimum {
            x: Vec::new(),
            value: f(start),
            iterations: 0,
            converged: true,
        };
    }

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(start.to_vec());
    for i in 0..n {
        let mut vertex = start.to_vec();
        vertex[i] += step;
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|x| eval(x)).collect();

    let x_tolerance = tolerance.sqrt();
    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let best = values[0];
        let worst = values[n];
        let value_spread = (worst - best).abs();
        let vertex_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if value_spread.is_finite()
            && value_spread <= tolerance * (1.0 + best.abs())
            && vertex_spread <= x_tolerance
        {
            converged = true;
            break;
        }
        iterations += 1;

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let towards = |coef: f64, from: &[f64]| -> Vec<f64> {
            centroid
                .iter()
                .zip(from)
                .map(|(c, x)| c + coef * (x - c))
                .collect()
        };

        let reflected = towards(-REFLECT, &simplex[n]);
        let reflected_value = eval(&reflected);

        if reflected_value < values[0] {
            let expanded = towards(EXPAND, &reflected);
            let expanded_value = eval(&expanded);
            if expanded_value < reflected_value {
                simplex[n] = expanded;
                values[n] = expanded_value;
            } else {
                simplex[n] = reflected;
                values[n] = reflected_value;
            }
            continue;
        }

        if reflected_value < values[n - 1] {
            simplex[n] = reflected;
            values[n] = reflected_value;
            continue;
        }

        let (contracted, accept_below) = if reflected_value < values[n] {
            (towards(CONTRACT, &reflected), reflected_value)
        } else {
            (towards(CONTRACT, &simplex[n]), values[n])
        };
        let contracted_value = eval(&contracted);
        if contracted_value < accept_below {
            simplex[n] = contracted;
            values[n] = contracted_value;
            continue;
        }

        let anchor = simplex[0].clone();
        for i in 1..=n {
            for (x, a) in simplex[i].iter_mut().zip(&anchor) {
                *x = a + SHRINK * (*x - a);
            }
            values[i] = eval(&simplex[i]);
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);
    Minimum {
        x: simplex[best].clone(),
        value: values[best],
        iterations,
        converged,
    }
}

/// Coefficients `c` such that `1 - c_1 B - ... - c_n B^n` is stationary.
pub fn constrain_stationary(unconstrained: &[f64]) -> Vec<f64> {
    let n = unconstrained.len();
    if n == 0 {
        return Vec::new();
    }
    let r: Vec<f64> = unconstrained
        .iter()
        .map(|x| x / (1.0 + x * x).sqrt())
        .collect();

    let mut y = vec![vec![0.0; n]; n];
    for k in 0..n {
        for i in 0..k {
            y[k][i] = y[k - 1][i] + r[k] * y[k - 1][k - i - 1];
        }
        y[k][k] = r[k];
    }
    y[n - 1].iter().map(|v| -v).collect()
}

/// Inverse of [`constrain_stationary`]. Non-stationary input gives non-finite output.
pub fn unconstrain_stationary(constrained: &[f64]) -> Vec<f64> {
    let n = constrained.len();
    if n == 0 {
        return Vec::new();
    }

    let mut y = vec![vec![0.0; n]; n];
    y[n - 1] = constrained.iter().map(|v| -v).collect();
    for k in (1..n).rev() {
        for i in 0..k {
            y[k - 1][i] = (y[k][i] - y[k][k] * y[k][k - i - 1]) / (1.0 - y[k][k] * y[k][k]);
        }
    }
    (0..n)
        .map(|k| {
            let r = y[k][k];
            r / (1.0 - r * r).sqrt()
        })
        .collect()
}

/// Singular values at or below these are treated as zero, strictest first.
const SVD_CUTOFFS: [f64; 3] = [1e-10, 1e-8, 1e-6];

/// Minimum-norm solution of `x β ≈ y`. Lagged regressors are often nearly
/// collinear, so the cutoff is loosened until the solution is finite.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    SVD_CUTOFFS
        .iter()
        .filter_map(|&eps| svd.solve(y, eps).ok())
        .find(|beta| beta.iter().all(|v| v.is_finite()))
}
