use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub navigator: NavigatorConfig,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// SQLite file for raw records; `None` disables the store.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Directory receiving the per-query CSV exports.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// End of the scraped window. Defaults to today.
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Overall budget for the scraping stage of one query.
    #[serde(default = "default_scrape_budget")]
    pub scrape_budget_secs: u64,
}

/// Layout of the external market portal. Only change these when the site does.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    #[serde(default = "default_portal_url")]
    pub url: String,
    #[serde(default = "default_overlay_class")]
    pub overlay_class: String,
    #[serde(default = "default_overlay_close_class")]
    pub overlay_close_class: String,
    #[serde(default = "default_commodity_select")]
    pub commodity_select_id: String,
    #[serde(default = "default_region_select")]
    pub region_select_id: String,
    #[serde(default = "default_market_select")]
    pub market_select_id: String,
    #[serde(default = "default_from_input")]
    pub from_date_input_id: String,
    #[serde(default = "default_to_input")]
    pub to_date_input_id: String,
    #[serde(default = "default_submit")]
    pub submit_id: String,
    #[serde(default = "default_result_table")]
    pub result_table_id: String,
    /// Format the date text inputs expect, e.g. `01-Apr-2025`.
    #[serde(default = "default_input_date_format")]
    pub input_date_format: String,
    /// Format of the arrival-date cells in the result table, e.g. `01 Apr 2025`.
    #[serde(default = "default_table_date_format")]
    pub table_date_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavigatorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_page_load_ms")]
    pub page_load_timeout_ms: u64,
    #[serde(default = "default_overlay_wait_ms")]
    pub overlay_wait_ms: u64,
    #[serde(default = "default_selector_wait_ms")]
    pub selector_wait_ms: u64,
    #[serde(default = "default_result_wait_ms")]
    pub result_wait_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Where rendered pages are dumped when the result table never appears.
    #[serde(default)]
    pub diagnostics_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesConfig {
    #[serde(default = "default_min_records")]
    pub min_records: usize,
    #[serde(default = "default_min_periods")]
    pub min_periods: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_seasonal_period")]
    pub seasonal_period: usize,
    /// Series at least this long get the seasonal model.
    #[serde(default = "default_seasonal_min_periods")]
    pub seasonal_min_periods: usize,
    /// Forecasts are capped at this multiple of the historical maximum.
    #[serde(default = "default_clamp_multiple")]
    pub clamp_multiple: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_true")]
    pub csv_export: bool,
}

fn default_output_dir() -> String { "output".to_string() }
fn default_lookback_days() -> i64 { 3 * 365 }
fn default_scrape_budget() -> u64 { 900 }
fn default_portal_url() -> String { "https://agmarknet.gov.in/".to_string() }
fn default_overlay_class() -> String { "popup-onload".to_string() }
fn default_overlay_close_class() -> String { "close".to_string() }
fn default_commodity_select() -> String { "ddlCommodity".to_string() }
fn default_region_select() -> String { "ddlState".to_string() }
fn default_market_select() -> String { "ddlMarket".to_string() }
fn default_from_input() -> String { "txtDate".to_string() }
fn default_to_input() -> String { "txtDateTo".to_string() }
fn default_submit() -> String { "btnGo".to_string() }
fn default_result_table() -> String { "cphBody_GridPriceData".to_string() }
fn default_input_date_format() -> String { "%d-%b-%Y".to_string() }
fn default_table_date_format() -> String { "%d %b %Y".to_string() }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 5_000 }
fn default_page_load_ms() -> u64 { 120_000 }
fn default_overlay_wait_ms() -> u64 { 5_000 }
fn default_selector_wait_ms() -> u64 { 30_000 }
fn default_result_wait_ms() -> u64 { 60_000 }
fn default_settle_ms() -> u64 { 2_000 }
fn default_min_records() -> usize { 10 }
fn default_min_periods() -> usize { 5 }
fn default_seasonal_period() -> usize { 52 }
fn default_seasonal_min_periods() -> usize { 52 }
fn default_clamp_multiple() -> f64 { 2.0 }
fn default_max_iterations() -> usize { 500 }
fn default_tolerance() -> f64 { 1e-8 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8000 }
fn default_allowed_origin() -> String { "http://localhost:3000".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            output_dir: default_output_dir(),
            reference_date: None,
            lookback_days: default_lookback_days(),
            scrape_budget_secs: default_scrape_budget(),
        }
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: default_portal_url(),
            overlay_class: default_overlay_class(),
            overlay_close_class: default_overlay_close_class(),
            commodity_select_id: default_commodity_select(),
            region_select_id: default_region_select(),
            market_select_id: default_market_select(),
            from_date_input_id: default_from_input(),
            to_date_input_id: default_to_input(),
            submit_id: default_submit(),
            result_table_id: default_result_table(),
            input_date_format: default_input_date_format(),
            table_date_format: default_table_date_format(),
        }
    }
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            page_load_timeout_ms: default_page_load_ms(),
            overlay_wait_ms: default_overlay_wait_ms(),
            selector_wait_ms: default_selector_wait_ms(),
            result_wait_ms: default_result_wait_ms(),
            settle_ms: default_settle_ms(),
            diagnostics_dir: None,
        }
    }
}

impl NavigatorConfig {
    pub fn backoff(&self) -> Duration { Duration::from_millis(self.backoff_ms) }
    pub fn page_load_timeout(&self) -> Duration { Duration::from_millis(self.page_load_timeout_ms) }
    pub fn overlay_wait(&self) -> Duration { Duration::from_millis(self.overlay_wait_ms) }
    pub fn selector_wait(&self) -> Duration { Duration::from_millis(self.selector_wait_ms) }
    pub fn result_wait(&self) -> Duration { Duration::from_millis(self.result_wait_ms) }
    pub fn settle(&self) -> Duration { Duration::from_millis(self.settle_ms) }
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            min_records: default_min_records(),
            min_periods: default_min_periods(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            seasonal_period: default_seasonal_period(),
            seasonal_min_periods: default_seasonal_min_periods(),
            clamp_multiple: default_clamp_multiple(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origin: default_allowed_origin(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            csv_export: true,
        }
    }
}

/// Deployment settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub webdriver_url: String,
    pub headless: bool,
    pub portal_url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Environment values win over the file.
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(url) = &env.portal_url {
            self.portal.url = url.clone();
        }
        if let Some(host) = &env.host {
            self.server.host = host.clone();
        }
        if let Some(port) = env.port {
            self.server.port = port;
        }
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = match std::env::var("PORT") {
            Ok(raw) => Some(raw.parse::<u16>().context("PORT must be a valid number")?),
            Err(_) => None,
        };

        Ok(Self {
            webdriver_url: std::env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:9515".to_string()),
            headless: std::env::var("BROWSER_HEADLESS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            portal_url: std::env::var("PORTAL_URL").ok(),
            host: std::env::var("HOST").ok(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_portal_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.portal.url, "https://agmarknet.gov.in/");
        assert_eq!(config.portal.result_table_id, "cphBody_GridPriceData");
        assert_eq!(config.navigator.max_attempts, 3);
        assert_eq!(config.navigator.result_wait(), Duration::from_secs(60));
        assert_eq!(config.series.min_records, 10);
        assert_eq!(config.forecast.seasonal_period, 52);
        assert!((config.forecast.clamp_multiple - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.system.lookback_days, 1095);
    }

    #[test]
    fn sections_override_individual_fields() {
        let config = Config::parse(
            r#"
            [system]
            reference_date = "2025-04-03"

            [navigator]
            max_attempts = 5
            backoff_ms = 10

            [forecast]
            clamp_multiple = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.system.reference_date, NaiveDate::from_ymd_opt(2025, 4, 3));
        assert_eq!(config.navigator.max_attempts, 5);
        assert_eq!(config.navigator.backoff(), Duration::from_millis(10));
        assert_eq!(config.navigator.selector_wait_ms, 30_000);
        assert!((config.forecast.clamp_multiple - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn example_file_parses() {
        let config = Config::parse(include_str!("../config.example.toml")).unwrap();

        assert_eq!(config.navigator.diagnostics_dir.as_deref(), Some("output/diagnostics"));
        assert_eq!(config.server.allowed_origin, "http://localhost:3000");
        assert!(config.monitoring.csv_export);
    }

    #[test]
    fn env_overrides_portal_and_listener() {
        let mut config = Config::default();
        let env = EnvConfig {
            webdriver_url: "http://driver:4444".to_string(),
            headless: true,
            portal_url: Some("http://mirror.local/".to_string()),
            host: Some("0.0.0.0".to_string()),
            port: Some(9000),
        };

        config.apply_env(&env);

        assert_eq!(config.portal.url, "http://mirror.local/");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
    }
}
