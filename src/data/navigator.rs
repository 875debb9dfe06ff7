//! Drives the market portal's search form.
//!
//! The form is globally stateful client-side JavaScript, so one attempt walks
//! the whole [`Step`] sequence in a fresh browser session and a failed attempt
//! is only ever retried from the top. Failures come in two classes:
//!
//! - invalid input (commodity, region or market not offered): surfaced at once
//! - transient (network, driver, slow rendering): retried after a fixed backoff

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

use crate::config::{NavigatorConfig, PortalConfig};
use crate::data::browser::{Browser, BrowserError, BrowserSession, Locator};
use crate::data::types::Query;
use crate::monitoring::diagnostics::PageDiagnostics;

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("Commodity '{0}' not available on the portal")]
    CommodityNotAvailable(String),

    #[error("Region '{0}' not available on the portal")]
    RegionNotAvailable(String),

    #[error("Market '{market}' not found. Available options: {available:?}")]
    MarketNotAvailable { market: String, available: Vec<String> },

    #[error("Portal unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Unexpected navigation failure: {0}")]
    Unexpected(String),
}

impl NavigationError {
    /// The query itself can never succeed.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            NavigationError::CommodityNotAvailable(_)
                | NavigationError::RegionNotAvailable(_)
                | NavigationError::MarketNotAvailable { .. }
        )
    }
}

#[derive(Debug)]
enum Failure {
    Transient(String),
    Fatal(NavigationError),
}

impl From<BrowserError> for Failure {
    fn from(e: BrowserError) -> Self {
        Failure::Transient(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    LoadPortal,
    DismissOverlay,
    SelectCommodity,
    SelectRegion,
    SelectMarket,
    EnterDates,
    Submit,
    AwaitResults,
}

enum Transition {
    Next(Step),
    Done(String),
}

pub struct Navigator<B: Browser> {
    browser: B,
    portal: PortalConfig,
    config: NavigatorConfig,
    diagnostics: PageDiagnostics,
}

impl<B: Browser> Navigator<B> {
    pub fn new(browser: B, portal: PortalConfig, config: NavigatorConfig) -> Self {
        let diagnostics = PageDiagnostics::new(config.diagnostics_dir.as_deref());
        Self {
            browser,
            portal,
            config,
            diagnostics,
        }
    }

    /// Fully rendered result page for `query`.
    pub async fn fetch(&self, query: &Query) -> Result<String, NavigationError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            info!(%query, attempt, max_attempts, "Loading portal {}", self.portal.url);

            match self.attempt(query, attempt).await {
                Ok(html) => {
                    info!(%query, attempt, "Price table loaded");
                    return Ok(html);
                }
                Err(Failure::Fatal(e)) => {
                    error!(%query, attempt, "Aborting without retry: {}", e);
                    return Err(e);
                }
                Err(Failure::Transient(reason)) => {
                    warn!(%query, attempt, "Attempt failed: {}", reason);
                    last = reason;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.backoff()).await;
                    }
                }
            }
        }

        error!(%query, "All {} attempts failed", max_attempts);
        Err(NavigationError::Exhausted {
            attempts: max_attempts,
            last,
        })
    }

    /// One session, opened and closed here whatever happens in between.
    async fn attempt(&self, query: &Query, attempt: u32) -> Result<String, Failure> {
        let mut session = self
            .browser
            .open()
            .await
            .map_err(|e| Failure::Transient(format!("could not start browser: {}", e)))?;

        let outcome = AssertUnwindSafe(self.drive(&mut session, query, attempt))
            .catch_unwind()
            .await;

        if let Err(e) = session.close().await {
            warn!(attempt, "Browser session did not close cleanly: {}", e);
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic in browser session".to_string());
                Err(Failure::Fatal(NavigationError::Unexpected(message)))
            }
        }
    }

    async fn drive(&self, session: &mut B::Session, query: &Query, attempt: u32) -> Result<String, Failure> {
        let mut step = Step::LoadPortal;
        loop {
            debug!(attempt, ?step, "Navigator step");
            match self.advance(step, session, query, attempt).await? {
                Transition::Next(next) => step = next,
                Transition::Done(html) => return Ok(html),
            }
        }
    }

    async fn advance(
        &self,
        step: Step,
        session: &mut B::Session,
        query: &Query,
        attempt: u32,
    ) -> Result<Transition, Failure> {
        let portal = &self.portal;

        match step {
            Step::LoadPortal => {
                session.goto(&portal.url).await?;
                Ok(Transition::Next(Step::DismissOverlay))
            }

            Step::DismissOverlay => {
                let overlay = Locator::class(&portal.overlay_class);
                let close = Locator::class(&portal.overlay_close_class);
                match session.wait_for(&overlay, self.config.overlay_wait()).await {
                    Ok(true) => match session.click(&overlay, Some(&close)).await {
                        Ok(()) => info!("Popup closed"),
                        Err(e) => info!("Popup present but not closed: {}", e),
                    },
                    Ok(false) | Err(_) => info!("No popup found"),
                }
                Ok(Transition::Next(Step::SelectCommodity))
            }

            Step::SelectCommodity => {
                let select = Locator::id(&portal.commodity_select_id);
                let invalid = || NavigationError::CommodityNotAvailable(query.commodity.clone());
                if !session.wait_for(&select, self.config.selector_wait()).await? {
                    return Err(Failure::Fatal(invalid()));
                }
                select_exact(session, &select, &query.commodity, invalid).await?;
                info!("Selected commodity: {}", query.commodity);
                Ok(Transition::Next(Step::SelectRegion))
            }

            Step::SelectRegion => {
                let select = Locator::id(&portal.region_select_id);
                let invalid = || NavigationError::RegionNotAvailable(query.region.clone());
                select_exact(session, &select, &query.region, invalid).await?;
                info!("Selected region: {}", query.region);
                // The market list is repopulated after the region changes.
                tokio::time::sleep(self.config.settle()).await;
                Ok(Transition::Next(Step::SelectMarket))
            }

            Step::SelectMarket => {
                let select = Locator::id(&portal.market_select_id);
                let labels = match session.option_labels(&select).await {
                    Ok(labels) => labels,
                    Err(BrowserError::NoSuchElement(_)) => Vec::new(),
                    Err(e) => return Err(e.into()),
                };
                let available: Vec<String> = labels
                    .iter()
                    .map(|label| normalize_label(label))
                    .filter(|label| !label.is_empty())
                    .collect();
                info!("Available markets for {}: {:?}", query.region, available);

                let Some(matched) = match_market(&labels, &query.market) else {
                    return Err(Failure::Fatal(NavigationError::MarketNotAvailable {
                        market: query.market.clone(),
                        available,
                    }));
                };
                session.select_by_label(&select, matched).await?;
                info!("Selected market: {}", matched);
                Ok(Transition::Next(Step::EnterDates))
            }

            Step::EnterDates => {
                let from = query.from.format(&portal.input_date_format).to_string();
                let to = query.to.format(&portal.input_date_format).to_string();

                tokio::time::sleep(self.config.settle()).await;
                session.type_text(&Locator::id(&portal.from_date_input_id), &from).await?;
                info!("Set From Date: {}", from);

                tokio::time::sleep(self.config.settle()).await;
                session.type_text(&Locator::id(&portal.to_date_input_id), &to).await?;
                info!("Set To Date: {}", to);
                Ok(Transition::Next(Step::Submit))
            }

            Step::Submit => {
                tokio::time::sleep(self.config.settle()).await;
                session.click(&Locator::id(&portal.submit_id), None).await?;
                info!("Form submitted");
                Ok(Transition::Next(Step::AwaitResults))
            }

            Step::AwaitResults => {
                let table = Locator::id(&portal.result_table_id);
                if session.wait_for(&table, self.config.result_wait()).await? {
                    return Ok(Transition::Done(session.page_source().await?));
                }

                error!(attempt, "Timeout waiting for price table");
                match session.page_source().await {
                    Ok(html) => {
                        self.diagnostics.capture(&query.to_string(), attempt, &html).await;
                    }
                    Err(e) => warn!("Could not capture page after timeout: {}", e),
                }
                Err(Failure::Transient(format!(
                    "result table {} did not appear within {:?}",
                    table,
                    self.config.result_wait()
                )))
            }
        }
    }
}

/// Exact-label selection where a missing control or option means bad input.
async fn select_exact<S: BrowserSession>(
    session: &mut S,
    select: &Locator,
    label: &str,
    invalid: impl Fn() -> NavigationError,
) -> Result<(), Failure> {
    match session.select_by_label(select, label).await {
        Ok(()) => Ok(()),
        Err(BrowserError::NoSuchOption { .. }) | Err(BrowserError::NoSuchElement(_)) => {
            Err(Failure::Fatal(invalid()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Trim and collapse internal whitespace.
fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The portal label matching `requested` case-insensitively, as rendered.
fn match_market<'a>(labels: &'a [String], requested: &str) -> Option<&'a str> {
    let wanted = normalize_label(requested).to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    labels
        .iter()
        .find(|label| normalize_label(label).to_lowercase() == wanted)
        .map(|label| label.trim())
}
