use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::data::types::{Query, RawRecord};

/// Outcome of one query as recorded in `query_runs`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: i64,
    pub region: String,
    pub market: String,
    pub commodity: String,
    pub status: String,
    pub record_count: usize,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Optional SQLite sink for scraped rows and per-query outcomes.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    pub fn new(db_path: &str) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS query_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                region TEXT NOT NULL,
                market TEXT NOT NULL,
                commodity TEXT NOT NULL,
                date_from TEXT NOT NULL,
                date_to TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                record_count INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                started_at TIMESTAMP NOT NULL,
                finished_at TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS price_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                sequence_no TEXT NOT NULL,
                market TEXT NOT NULL,
                commodity TEXT NOT NULL,
                min_price TEXT NOT NULL,
                max_price TEXT NOT NULL,
                modal_price TEXT NOT NULL,
                observed_date TEXT NOT NULL,
                region TEXT NOT NULL,
                FOREIGN KEY(run_id) REFERENCES query_runs(id)
            );

            CREATE INDEX IF NOT EXISTS idx_runs_status ON query_runs(status);
            CREATE INDEX IF NOT EXISTS idx_records_query ON price_records(region, market, commodity);
            "#,
        )?;

        Ok(Self { conn })
    }

    /// Open a `running` entry for `query`.
    pub fn begin_run(&self, query: &Query) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO query_runs (region, market, commodity, date_from, date_to, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'running', ?6)",
            params![
                query.region,
                query.market,
                query.commodity,
                query.from.to_string(),
                query.to.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a run and store its rows in one transaction.
    pub fn finish_run(
        &mut self,
        run_id: i64,
        status: &str,
        records: &[RawRecord],
        message: Option<&str>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO price_records
                 (run_id, sequence_no, market, commodity, min_price, max_price, modal_price, observed_date, region)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for r in records {
                insert.execute(params![
                    run_id,
                    r.sequence_no,
                    r.market,
                    r.commodity,
                    r.min_price,
                    r.max_price,
                    r.modal_price,
                    r.observed_date,
                    r.region,
                ])?;
            }
        }
        tx.execute(
            "UPDATE query_runs
             SET status = ?1, record_count = ?2, message = ?3, finished_at = ?4
             WHERE id = ?5",
            params![status, records.len(), message, Utc::now().to_rfc3339(), run_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Runs still `running` at startup were cut off; mark them so.
    pub fn mark_interrupted_runs(&self) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE query_runs SET status = 'interrupted', finished_at = ?1 WHERE status = 'running'",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(n)
    }

    /// Stored rows for a region/market/commodity across all runs.
    #[cfg(test)]
    pub fn count_records(&self, region: &str, market: &str, commodity: &str) -> Result<usize> {
        let count: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM price_records WHERE region = ?1 AND market = ?2 AND commodity = ?3",
            params![region, market, commodity],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, region, market, commodity, status, record_count, message, started_at
             FROM query_runs
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let runs = stmt.query_map(params![limit], |row| {
            let started_at: String = row.get(7)?;
            let started_at = DateTime::parse_from_rfc3339(&started_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
                })?;

            Ok(RunSummary {
                id: row.get(0)?,
                region: row.get(1)?,
                market: row.get(2)?,
                commodity: row.get(3)?,
                status: row.get(4)?,
                record_count: row.get(5)?,
                message: row.get(6)?,
                started_at,
            })
        })?;

        runs.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }
}

/// Startup housekeeping for a store left behind by a previous process.
pub fn recover_interrupted_runs(store: &RecordStore) -> Result<()> {
    let interrupted = store.mark_interrupted_runs()?;
    if interrupted > 0 {
        warn!("Marked {} unfinished query runs as interrupted", interrupted);
    }
    for run in store.recent_runs(5)? {
        info!(
            "Recent run #{}: {} in {}/{} -> {} ({} records)",
            run.id, run.commodity, run.region, run.market, run.status, run.record_count
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn query() -> Query {
        Query::new(
            "Maharashtra",
            "Pune",
            "Onion",
            NaiveDate::from_ymd_opt(2022, 4, 4).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 3).unwrap(),
        )
    }

    fn record(seq: usize) -> RawRecord {
        RawRecord {
            sequence_no: seq.to_string(),
            market: "Pune".to_string(),
            commodity: "Onion".to_string(),
            min_price: "1000".to_string(),
            max_price: "1800".to_string(),
            modal_price: "1400".to_string(),
            observed_date: "2024-01-02".to_string(),
            region: "Maharashtra".to_string(),
        }
    }

    #[test]
    fn finished_run_stores_rows_and_outcome() {
        let mut store = RecordStore::in_memory().unwrap();
        let id = store.begin_run(&query()).unwrap();
        let records: Vec<RawRecord> = (1..=3).map(record).collect();

        store.finish_run(id, "success", &records, None).unwrap();

        assert_eq!(store.count_records("Maharashtra", "Pune", "Onion").unwrap(), 3);
        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "success");
        assert_eq!(runs[0].record_count, 3);
        assert_eq!(runs[0].message, None);
    }

    #[test]
    fn failed_run_keeps_message_without_rows() {
        let mut store = RecordStore::in_memory().unwrap();
        let id = store.begin_run(&query()).unwrap();

        store.finish_run(id, "no_data", &[], Some("No data found")).unwrap();

        assert_eq!(store.count_records("Maharashtra", "Pune", "Onion").unwrap(), 0);
        let run = &store.recent_runs(1).unwrap()[0];
        assert_eq!(run.status, "no_data");
        assert_eq!(run.message.as_deref(), Some("No data found"));
    }

    #[test]
    fn unfinished_runs_are_marked_interrupted() {
        let mut store = RecordStore::in_memory().unwrap();
        let done = store.begin_run(&query()).unwrap();
        store.finish_run(done, "success", &[record(1)], None).unwrap();
        store.begin_run(&query()).unwrap();

        recover_interrupted_runs(&store).unwrap();

        let statuses: Vec<String> = store.recent_runs(10).unwrap().into_iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec!["interrupted".to_string(), "success".to_string()]);
        assert_eq!(store.mark_interrupted_runs().unwrap(), 0);
    }
}
