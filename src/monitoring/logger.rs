use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::MonitoringConfig;
use crate::data::types::{Query, RawRecord};
use crate::monitoring::safe_file_component;

const HEADER: &str = "sequence_no,market,commodity,min_price,max_price,modal_price,observed_date,region";

/// Writes each query's scraped rows to its own CSV file.
#[derive(Debug, Clone)]
pub struct CsvRecordWriter {
    output_dir: PathBuf,
}

impl CsvRecordWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn file_name(query: &Query) -> Result<String> {
        Ok(format!(
            "{}_{}_{}_{}_to_{}.csv",
            safe_file_component(&query.commodity)?,
            safe_file_component(&query.region)?,
            safe_file_component(&query.market)?,
            query.from.format("%Y-%m-%d"),
            query.to.format("%Y-%m-%d"),
        ))
    }

    /// Replace the query's file with `records`; returns where it landed.
    pub fn write(&self, query: &Query, records: &[RawRecord]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating {}", self.output_dir.display()))?;
        let path = self.output_dir.join(Self::file_name(query)?);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        writeln!(file, "{}", HEADER)?;
        for r in records {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{}",
                field(&r.sequence_no),
                field(&r.market),
                field(&r.commodity),
                field(&r.min_price),
                field(&r.max_price),
                field(&r.modal_price),
                field(&r.observed_date),
                field(&r.region),
            )?;
        }

        tracing::info!("Data saved to {} ({} rows)", path.display(), records.len());
        Ok(path)
    }
}

/// Quote fields containing separators, quotes or line breaks.
fn field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Install the global subscriber: stdout, or `log_file` when configured.
/// `RUST_LOG` wins over `log_level`.
pub fn init_tracing(config: &MonitoringConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.log_file {
        Some(path) => {
            let file = open_log_file(Path::new(path))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("tracing already initialised: {}", e))
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
