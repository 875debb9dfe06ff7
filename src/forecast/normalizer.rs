use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::info;

use crate::config::SeriesConfig;
use crate::data::types::RawRecord;
use crate::forecast::types::{period_end, PriceSeries, PERIOD_DAYS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeriesError {
    #[error("Not enough data points for prediction: {count} usable records (minimum {required} required)")]
    InsufficientRawData { count: usize, required: usize },

    #[error("Not enough data points after filling gaps: {count} periods (minimum {required} required)")]
    InsufficientSeriesLength { count: usize, required: usize },
}

/// Scraped rows to a gap-free weekly series.
#[derive(Debug, Clone)]
pub struct SeriesNormalizer {
    min_records: usize,
    min_periods: usize,
}

impl SeriesNormalizer {
    pub fn new(config: &SeriesConfig) -> Self {
        Self {
            min_records: config.min_records,
            min_periods: config.min_periods,
        }
    }

    pub fn normalize(&self, records: &[RawRecord]) -> Result<PriceSeries, SeriesError> {
        let observations: Vec<(NaiveDate, f64)> = records
            .iter()
            .filter_map(|r| Some((r.date()?, r.modal()?)))
            .collect();
        info!("Raw data points after coercion: {}", observations.len());

        if observations.len() < self.min_records {
            return Err(SeriesError::InsufficientRawData {
                count: observations.len(),
                required: self.min_records,
            });
        }

        // Mean modal price per weekly period.
        let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
        for (date, price) in observations {
            let bucket = buckets.entry(period_end(date)).or_insert((0.0, 0));
            bucket.0 += price;
            bucket.1 += 1;
        }

        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            return Err(SeriesError::InsufficientRawData {
                count: 0,
                required: self.min_records,
            });
        };

        let periods = ((last - first).num_days() / PERIOD_DAYS) as usize + 1;
        let mut slots: Vec<Option<f64>> = vec![None; periods];
        for (date, (sum, count)) in &buckets {
            let index = ((*date - first).num_days() / PERIOD_DAYS) as usize;
            slots[index] = Some(sum / *count as f64);
        }

        let values = fill_gaps(&slots);
        info!("Processed data points after resampling: {}", values.len());

        if values.len() < self.min_periods {
            return Err(SeriesError::InsufficientSeriesLength {
                count: values.len(),
                required: self.min_periods,
            });
        }

        Ok(PriceSeries::new(first, values))
    }
}

/// Linear interpolation between known neighbours; edges copy the nearest
/// known value. All-unknown input yields an empty vector.
fn fill_gaps(slots: &[Option<f64>]) -> Vec<f64> {
    let known: Vec<(usize, f64)> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let (Some(&(first_i, first_v)), Some(&(last_i, last_v))) = (known.first(), known.last()) else {
        return Vec::new();
    };

    let mut filled = vec![0.0; slots.len()];
    filled[..first_i].fill(first_v);
    filled[last_i..].fill(last_v);
    for pair in known.windows(2) {
        let (i0, v0) = pair[0];
        let (i1, v1) = pair[1];
        let span = (i1 - i0) as f64;
        for (offset, slot) in filled[i0..i1].iter_mut().enumerate() {
            *slot = v0 + (v1 - v0) * offset as f64 / span;
        }
    }
    filled
}
