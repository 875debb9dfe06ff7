use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One extraction + forecast run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub region: String,
    pub market: String,
    pub commodity: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Query {
    pub fn new(
        region: impl Into<String>,
        market: impl Into<String>,
        commodity: impl Into<String>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Self {
        Self {
            region: region.into(),
            market: market.into(),
            commodity: commodity.into(),
            from,
            to,
        }
    }

    /// Trailing window of `lookback_days` ending at `reference`.
    pub fn trailing(
        region: impl Into<String>,
        market: impl Into<String>,
        commodity: impl Into<String>,
        reference: NaiveDate,
        lookback_days: i64,
    ) -> Self {
        let from = reference - chrono::Duration::days(lookback_days);
        Self::new(region, market, commodity, from, reference)
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in {}/{} [{} .. {}]",
            self.commodity, self.region, self.market, self.from, self.to
        )
    }
}

/// A scraped result-table row. Prices stay as captured text; `observed_date`
/// is ISO (`YYYY-MM-DD`) when the portal's format parsed, verbatim otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub sequence_no: String,
    pub market: String,
    pub commodity: String,
    pub min_price: String,
    pub max_price: String,
    pub modal_price: String,
    pub observed_date: String,
    pub region: String,
}

impl RawRecord {
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.observed_date.trim(), "%Y-%m-%d").ok()
    }

    pub fn modal(&self) -> Option<f64> {
        self.modal_price
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}
