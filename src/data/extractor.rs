use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};

use crate::config::PortalConfig;
use crate::data::types::{Query, RawRecord};

/// Fewer cells than this and a row is noise.
const MIN_COLUMNS: usize = 10;

const COL_SEQUENCE: usize = 0;
const COL_COMMODITY: usize = 3;
const COL_MIN_PRICE: usize = 6;
const COL_MAX_PRICE: usize = 7;
const COL_MODAL_PRICE: usize = 8;
const COL_DATE: usize = 9;

/// Turns the portal's rendered result table into [`RawRecord`]s.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    table: Selector,
    row: Selector,
    cell: Selector,
    date_format: String,
}

impl RecordExtractor {
    pub fn new(portal: &PortalConfig) -> Result<Self> {
        let table_css = format!("table[id=\"{}\"]", portal.result_table_id);
        Ok(Self {
            table: parse_selector(&table_css)?,
            row: parse_selector("tr")?,
            cell: parse_selector("td")?,
            date_format: portal.table_date_format.clone(),
        })
    }

    /// Records in table order. No table means no data, not an error.
    pub fn extract(&self, html: &str, query: &Query) -> Vec<RawRecord> {
        let document = Html::parse_document(html);
        let Some(table) = document.select(&self.table).next() else {
            warn!("No price table found for {}", query.market);
            return Vec::new();
        };

        let records: Vec<RawRecord> = table
            .select(&self.row)
            .skip(1)
            .filter_map(|row| {
                let cells: Vec<String> = row.select(&self.cell).map(cell_text).collect();
                (cells.len() >= MIN_COLUMNS).then(|| self.record(&cells, query))
            })
            .collect();

        info!("Completed data fetch for {}. Records collected: {}", query.market, records.len());
        records
    }

    fn record(&self, cells: &[String], query: &Query) -> RawRecord {
        let raw_date = &cells[COL_DATE];
        let observed_date = match NaiveDate::parse_from_str(raw_date, &self.date_format) {
            Ok(date) => date.format("%Y-%m-%d").to_string(),
            Err(_) => {
                warn!("Invalid date format: {}", raw_date);
                raw_date.clone()
            }
        };

        // The portal may abbreviate the market name, so keep the requested one.
        RawRecord {
            sequence_no: cells[COL_SEQUENCE].clone(),
            market: query.market.clone(),
            commodity: cells[COL_COMMODITY].clone(),
            min_price: cells[COL_MIN_PRICE].clone(),
            max_price: cells[COL_MAX_PRICE].clone(),
            modal_price: cells[COL_MODAL_PRICE].clone(),
            observed_date,
            region: query.region.clone(),
        }
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {}: {}", css, e))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> Query {
        Query::new(
            "Maharashtra",
            "Pune",
            "Onion",
            NaiveDate::from_ymd_opt(2022, 4, 4).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 3).unwrap(),
        )
    }

    fn extractor() -> RecordExtractor {
        RecordExtractor::new(&PortalConfig::default()).unwrap()
    }

    const PAGE: &str = r#"
        <html><body>
        <table id="otherTable"><tr><td>ignore me</td></tr></table>
        <table id="cphBody_GridPriceData">
          <tr><th>Sl no.</th><th>District</th><th>Market</th><th>Commodity</th><th>Variety</th>
              <th>Grade</th><th>Min</th><th>Max</th><th>Modal</th><th>Date</th></tr>
          <tr><td>1</td><td>Pune</td><td>Pune(Pimpri)</td><td> Onion </td><td>Red</td>
              <td>FAQ</td><td>1000</td><td>1800</td><td>1400</td><td>02 Jan 2024</td></tr>
          <tr><td colspan="10">No. of records: 2</td></tr>
          <tr><td>2</td><td>Pune</td><td>Pune(Pimpri)</td><td>Onion</td><td>Red</td>
              <td>FAQ</td><td>1100</td><td>1900</td><td>NR</td><td>2024/01/09</td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn reads_fixed_columns_and_skips_short_rows() {
        let records = extractor().extract(PAGE, &query());

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.sequence_no, "1");
        assert_eq!(first.commodity, "Onion");
        assert_eq!(first.min_price, "1000");
        assert_eq!(first.max_price, "1800");
        assert_eq!(first.modal_price, "1400");
        assert_eq!(first.observed_date, "2024-01-02");
        assert_eq!(first.market, "Pune");
        assert_eq!(first.region, "Maharashtra");
    }

    #[test]
    fn unparseable_dates_are_kept_verbatim() {
        let records = extractor().extract(PAGE, &query());

        assert_eq!(records[1].observed_date, "2024/01/09");
        assert_eq!(records[1].modal_price, "NR");
        assert!(records[1].date().is_none());
    }

    #[test]
    fn missing_table_yields_no_records() {
        let html = "<html><body><form id=\"form1\"></form></body></html>";
        assert!(extractor().extract(html, &query()).is_empty());
    }
}
