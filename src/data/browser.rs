//! Browser-automation capability consumed by the page navigator.
//!
//! The navigator never talks to a concrete driver: it receives a [`Browser`]
//! that hands out one exclusively-owned [`BrowserSession`] per attempt. The
//! production implementation is [`crate::data::webdriver::WebDriverBrowser`];
//! tests script an in-memory fake.

use std::future::Future;
use std::time::Duration;

/// How an element is found on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Class(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn class(class: impl Into<String>) -> Self {
        Locator::Class(class.into())
    }

    /// CSS selector equivalent, used by the WebDriver wire protocol.
    pub fn to_css(&self) -> String {
        match self {
            Locator::Id(id) => format!("[id=\"{}\"]", id),
            Locator::Class(class) => format!(".{}", class),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Class(class) => write!(f, ".{}", class),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Element not found: {0}")]
    NoSuchElement(String),

    #[error("Option '{label}' not available in {select}")]
    NoSuchOption { select: String, label: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Driver transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Driver protocol error: {0}")]
    Protocol(String),
}

/// One live browser. Must be [`close`](BrowserSession::close)d by its owner.
pub trait BrowserSession: Send {
    /// Load a document.
    fn goto(&mut self, url: &str) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// Bounded presence check: `Ok(false)` when the element never showed up.
    fn wait_for(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, BrowserError>> + Send;

    /// Click the first element matching `within`, then `target` inside it when given.
    fn click(
        &mut self,
        within: &Locator,
        target: Option<&Locator>,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// Visible labels of a `<select>` control's options, in page order.
    fn option_labels(
        &mut self,
        select: &Locator,
    ) -> impl Future<Output = Result<Vec<String>, BrowserError>> + Send;

    /// Choose the option whose visible label equals `label` exactly.
    fn select_by_label(
        &mut self,
        select: &Locator,
        label: &str,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// Clear a text input and type into it.
    fn type_text(
        &mut self,
        input: &Locator,
        text: &str,
    ) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// Fully rendered document.
    fn page_source(&mut self) -> impl Future<Output = Result<String, BrowserError>> + Send;

    /// Tear the session down.
    fn close(self) -> impl Future<Output = Result<(), BrowserError>> + Send;
}

/// Opens browser sessions.
pub trait Browser: Send + Sync {
    type Session: BrowserSession;

    fn open(&self) -> impl Future<Output = Result<Self::Session, BrowserError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_render_as_css() {
        assert_eq!(Locator::id("ddlMarket").to_css(), "[id=\"ddlMarket\"]");
        assert_eq!(Locator::class("popup-onload").to_css(), ".popup-onload");
        assert_eq!(Locator::id("btnGo").to_string(), "#btnGo");
    }
}
