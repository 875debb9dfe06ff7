use chrono::{Datelike, Duration, NaiveDate};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Days per sampling period (weekly, periods end on Sunday).
pub const PERIOD_DAYS: i64 = 7;

/// The Sunday closing the week that contains `date`.
pub fn period_end(date: NaiveDate) -> NaiveDate {
    let days_to_sunday = 6 - date.weekday().num_days_from_monday() as i64;
    date + Duration::days(days_to_sunday)
}

/// Weekly modal prices with no missing periods.
///
/// Dates are implicit: value `i` belongs to the period ending
/// `start + i * PERIOD_DAYS`, so the series is unique by date, ordered and
/// gap-free by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    start: NaiveDate,
    values: Vec<f64>,
}

impl PriceSeries {
    /// `start` is snapped to its period end.
    pub fn new(start: NaiveDate, values: Vec<f64>) -> Self {
        Self {
            start: period_end(start),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[cfg(test)]
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + Duration::days(PERIOD_DAYS * index as i64)
    }

    /// Last observed period; `start` for an empty series.
    pub fn end(&self) -> NaiveDate {
        self.date_at(self.values.len().saturating_sub(1))
    }

    #[cfg(test)]
    pub fn points(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (self.date_at(i), *v))
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// `steps` consecutive period ends following the last observation.
    pub fn future_dates(&self, steps: usize) -> Vec<NaiveDate> {
        let end = self.end();
        (1..=steps as i64)
            .map(|k| end + Duration::days(PERIOD_DAYS * k))
            .collect()
    }
}

/// Forecast lookahead, in sampling periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Horizon {
    OneWeek,
    OneMonth,
    ThreeMonths,
    SixMonths,
}

impl Horizon {
    pub const ALL: [Horizon; 4] = [
        Horizon::OneWeek,
        Horizon::OneMonth,
        Horizon::ThreeMonths,
        Horizon::SixMonths,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Horizon::OneWeek => "one_week",
            Horizon::OneMonth => "one_month",
            Horizon::ThreeMonths => "three_months",
            Horizon::SixMonths => "six_months",
        }
    }

    pub fn steps(&self) -> usize {
        match self {
            Horizon::OneWeek => 1,
            Horizon::OneMonth => 4,
            Horizon::ThreeMonths => 12,
            Horizon::SixMonths => 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    #[serde(skip)]
    pub horizon: Horizon,
    pub dates: Vec<NaiveDate>,
    pub predicted_prices: Vec<f64>,
}

/// Which model produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Seasonal,
    NonSeasonal,
}

/// All horizons of one query, serialised as `{horizon_name: forecast}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    pub model: ModelKind,
    pub forecasts: Vec<Forecast>,
}

impl ForecastResult {
    #[cfg(test)]
    pub fn get(&self, horizon: Horizon) -> Option<&Forecast> {
        self.forecasts.iter().find(|f| f.horizon == horizon)
    }
}

impl Serialize for ForecastResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.forecasts.len()))?;
        for forecast in &self.forecasts {
            map.serialize_entry(forecast.horizon.name(), forecast)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn periods_end_on_sunday() {
        // 2024-01-01 is a Monday.
        assert_eq!(period_end(day(2024, 1, 1)), day(2024, 1, 7));
        assert_eq!(period_end(day(2024, 1, 6)), day(2024, 1, 7));
        assert_eq!(period_end(day(2024, 1, 7)), day(2024, 1, 7));
        assert_eq!(period_end(day(2024, 1, 8)), day(2024, 1, 14));
    }

    #[test]
    fn future_dates_continue_weekly_after_last_period() {
        let series = PriceSeries::new(day(2024, 1, 7), vec![1.0, 2.0, 3.0]);

        assert_eq!(series.end(), day(2024, 1, 21));
        assert_eq!(
            series.future_dates(3),
            vec![day(2024, 1, 28), day(2024, 2, 4), day(2024, 2, 11)]
        );
    }

    #[test]
    fn result_serialises_as_ordered_horizon_map() {
        let result = ForecastResult {
            model: ModelKind::NonSeasonal,
            forecasts: vec![
                Forecast {
                    horizon: Horizon::OneWeek,
                    dates: vec![day(2025, 4, 6)],
                    predicted_prices: vec![1510.5],
                },
                Forecast {
                    horizon: Horizon::OneMonth,
                    dates: vec![day(2025, 4, 6), day(2025, 4, 13)],
                    predicted_prices: vec![1510.5, 1520.0],
                },
            ],
        };

        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"one_week":{"dates":["2025-04-06"],"predicted_prices":[1510.5]},"one_month":{"dates":["2025-04-06","2025-04-13"],"predicted_prices":[1510.5,1520.0]}}"#
        );
    }

    #[test]
    fn horizons_cover_week_to_half_year() {
        let steps: Vec<usize> = Horizon::ALL.iter().map(Horizon::steps).collect();
        assert_eq!(steps, vec![1, 4, 12, 24]);
        assert_eq!(Horizon::ThreeMonths.name(), "three_months");
    }
}
