use tracing::{info, warn};

use crate::config::ForecastConfig;
use crate::forecast::arma::{self, ArmaOrder, FitOptions, ModelError, ModelSpec, SeasonalOrder};
use crate::forecast::types::{Forecast, ForecastResult, Horizon, ModelKind, PriceSeries};

const ORDER: ArmaOrder = ArmaOrder { p: 1, q: 1 };

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Model fitting failed: {0}")]
    ModelFitting(#[from] ModelError),
}

/// Fits one model per series and projects every [`Horizon`] from it.
#[derive(Debug, Clone)]
pub struct ForecastEngine {
    config: ForecastConfig,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    /// Seasonal (1,0,1)x(1,0,1,s) once a full season is observed, ARMA(1,1) otherwise.
    pub fn select_model(&self, periods: usize) -> (ModelKind, ModelSpec) {
        if periods >= self.config.seasonal_min_periods {
            let seasonal = SeasonalOrder {
                p: 1,
                q: 1,
                period: self.config.seasonal_period,
            };
            (ModelKind::Seasonal, ModelSpec::seasonal(ORDER, seasonal))
        } else {
            (ModelKind::NonSeasonal, ModelSpec::non_seasonal(ORDER.p, ORDER.q))
        }
    }

    /// CPU-bound; run it off the async executor.
    pub fn forecast(&self, series: &PriceSeries) -> Result<ForecastResult, ForecastError> {
        let (model, spec) = self.select_model(series.len());
        info!("Fitting {:?} model on {} periods", model, series.len());

        let options = FitOptions {
            max_iterations: self.config.max_iterations,
            tolerance: self.config.tolerance,
        };
        let fitted = arma::fit(series.values(), spec, options)?;
        if !fitted.converged() {
            warn!(
                "{:?} model kept best estimate after {} iterations",
                fitted.spec(),
                fitted.iterations()
            );
        }
        info!(
            "Model fitted: mean={:.2} sigma2={:.4} iterations={}",
            fitted.mean(),
            fitted.sigma2(),
            fitted.iterations()
        );

        let ceiling = (self.config.clamp_multiple * series.max()).max(0.0);
        let mut forecasts = Vec::with_capacity(Horizon::ALL.len());
        for horizon in Horizon::ALL {
            let steps = horizon.steps();
            let predicted_prices = fitted
                .forecast(steps)?
                .into_iter()
                .map(|v| v.clamp(0.0, ceiling))
                .collect();
            forecasts.push(Forecast {
                horizon,
                dates: series.future_dates(steps),
                predicted_prices,
            });
        }

        Ok(ForecastResult { model, forecasts })
    }
}
