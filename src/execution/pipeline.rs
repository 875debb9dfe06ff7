use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, SystemConfig};
use crate::data::browser::Browser;
use crate::data::extractor::RecordExtractor;
use crate::data::navigator::{NavigationError, Navigator};
use crate::data::types::{Query, RawRecord};
use crate::execution::persistence::RecordStore;
use crate::forecast::engine::{ForecastEngine, ForecastError};
use crate::forecast::normalizer::{SeriesError, SeriesNormalizer};
use crate::forecast::types::ForecastResult;
use crate::monitoring::logger::CsvRecordWriter;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No data found for the given parameters")]
    NoData,

    #[error("{0}")]
    InvalidInput(NavigationError),

    #[error("{0}")]
    InsufficientData(#[from] SeriesError),

    #[error("{0}")]
    ModelFailed(#[from] ForecastError),

    #[error("{0}")]
    ScrapeFailed(NavigationError),

    #[error("Scraping did not finish within {0:?}")]
    BudgetExceeded(Duration),

    #[error("Forecast task failed: {0}")]
    Internal(String),
}

impl From<NavigationError> for PipelineError {
    fn from(e: NavigationError) -> Self {
        if e.is_invalid_input() {
            PipelineError::InvalidInput(e)
        } else {
            PipelineError::ScrapeFailed(e)
        }
    }
}

impl PipelineError {
    /// Stable label, used as the stored run status.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NoData => "no_data",
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::InsufficientData(_) => "insufficient_data",
            PipelineError::ModelFailed(_) => "model_failed",
            PipelineError::ScrapeFailed(_) => "scrape_failed",
            PipelineError::BudgetExceeded(_) => "budget_exceeded",
            PipelineError::Internal(_) => "internal",
        }
    }
}

/// A successful run.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub query: Query,
    pub data_file: Option<PathBuf>,
    pub result: ForecastResult,
}

/// Navigator -> extractor -> normalizer -> engine, one query at a time.
///
/// Holds no per-query state, so one instance serves concurrent queries,
/// each in its own browser session.
pub struct PricePipeline<B: Browser> {
    navigator: Navigator<B>,
    extractor: RecordExtractor,
    normalizer: SeriesNormalizer,
    engine: ForecastEngine,
    exporter: Option<CsvRecordWriter>,
    store: Option<Arc<Mutex<RecordStore>>>,
    system: SystemConfig,
}

impl<B: Browser> PricePipeline<B> {
    pub fn new(browser: B, config: &Config) -> Result<Self> {
        let exporter = config
            .monitoring
            .csv_export
            .then(|| CsvRecordWriter::new(&config.system.output_dir));

        Ok(Self {
            navigator: Navigator::new(browser, config.portal.clone(), config.navigator.clone()),
            extractor: RecordExtractor::new(&config.portal)?,
            normalizer: SeriesNormalizer::new(&config.series),
            engine: ForecastEngine::new(config.forecast.clone()),
            exporter,
            store: None,
            system: config.system.clone(),
        })
    }

    pub fn with_store(mut self, store: RecordStore) -> Self {
        self.store = Some(Arc::new(Mutex::new(store)));
        self
    }

    fn reference_date(&self) -> NaiveDate {
        self.system
            .reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Forecast prices for the trailing window ending at the reference date.
    pub async fn predict(
        &self,
        region: &str,
        market: &str,
        commodity: &str,
    ) -> Result<Prediction, PipelineError> {
        let query = Query::trailing(
            region.trim(),
            market.trim(),
            commodity.trim(),
            self.reference_date(),
            self.system.lookback_days,
        );
        self.run(query).await
    }

    pub async fn run(&self, query: Query) -> Result<Prediction, PipelineError> {
        info!(%query, "Processing request");
        let run_id = self.begin_run(&query);

        let mut records = Vec::new();
        let outcome = self.execute(&query, &mut records).await;

        // No awaits from here on: a cancelled query leaves only its `running` entry.
        let data_file = self.export(&query, &records);
        self.finish_run(run_id, &outcome, &records);

        match outcome {
            Ok(result) => {
                info!(%query, records = records.len(), "Prediction complete");
                Ok(Prediction {
                    query,
                    data_file,
                    result,
                })
            }
            Err(e) => {
                error!(%query, kind = e.kind(), "Prediction failed: {}", e);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        query: &Query,
        records: &mut Vec<RawRecord>,
    ) -> Result<ForecastResult, PipelineError> {
        let budget = Duration::from_secs(self.system.scrape_budget_secs);
        let html = tokio::time::timeout(budget, self.navigator.fetch(query))
            .await
            .map_err(|_| PipelineError::BudgetExceeded(budget))??;

        *records = self.extractor.extract(&html, query);
        if records.is_empty() {
            return Err(PipelineError::NoData);
        }

        let series = self.normalizer.normalize(records)?;

        let engine = self.engine.clone();
        let result = tokio::task::spawn_blocking(move || engine.forecast(&series))
            .await
            .map_err(|e| PipelineError::Internal(e.to_string()))??;
        Ok(result)
    }

    fn export(&self, query: &Query, records: &[RawRecord]) -> Option<PathBuf> {
        if records.is_empty() {
            return None;
        }
        let exporter = self.exporter.as_ref()?;
        match exporter.write(query, records) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(%query, "CSV export failed: {:#}", e);
                None
            }
        }
    }

    fn begin_run(&self, query: &Query) -> Option<i64> {
        let store = self.store.as_ref()?;
        let guard = match store.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Record store lock poisoned; skipping run log");
                return None;
            }
        };
        match guard.begin_run(query) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(%query, "Could not log run start: {:#}", e);
                None
            }
        }
    }

    fn finish_run(
        &self,
        run_id: Option<i64>,
        outcome: &Result<ForecastResult, PipelineError>,
        records: &[RawRecord],
    ) {
        let (Some(store), Some(run_id)) = (self.store.as_ref(), run_id) else {
            return;
        };
        let (status, message) = match outcome {
            Ok(_) => ("success", None),
            Err(e) => (e.kind(), Some(e.to_string())),
        };
        let Ok(mut guard) = store.lock() else {
            warn!("Record store lock poisoned; run {} left open", run_id);
            return;
        };
        if let Err(e) = guard.finish_run(run_id, status, records, message.as_deref()) {
            warn!("Could not store run {}: {:#}", run_id, e);
        }
    }

    #[cfg(test)]
    fn store(&self) -> Option<std::sync::MutexGuard<'_, RecordStore>> {
        self.store.as_ref().and_then(|s| s.lock().ok())
    }
}
