//! Scripted in-memory portal used by navigator and pipeline tests.

use chrono::NaiveDate;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::PortalConfig;
use crate::data::browser::{Browser, BrowserError, BrowserSession, Locator};

/// What the fake portal offers and how it misbehaves.
#[derive(Debug, Clone, Default)]
pub struct PortalScript {
    pub commodities: Vec<String>,
    pub regions: Vec<String>,
    pub markets: Vec<String>,
    pub overlay: bool,
    /// The first `failing_loads` page loads fail like a dropped connection.
    pub failing_loads: u32,
    /// Table rendered after submit; `None` means it never appears.
    pub table_html: Option<String>,
    pub panic_on_submit: bool,
    /// The commodity select never renders.
    pub hide_commodity_select: bool,
}

/// Everything the sessions did, across all attempts.
#[derive(Debug, Default)]
pub struct PortalLog {
    pub opened: u32,
    pub closed: u32,
    /// Sessions dropped without `close`, e.g. by a cancelled query.
    pub abandoned: u32,
    pub loads: u32,
    pub overlay_dismissed: u32,
    pub selections: Vec<(String, String)>,
    pub typed: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct ScriptedBrowser {
    script: Arc<PortalScript>,
    log: Arc<Mutex<PortalLog>>,
    portal: Arc<PortalConfig>,
}

impl ScriptedBrowser {
    pub fn new(script: PortalScript) -> Self {
        Self {
            script: Arc::new(script),
            log: Arc::new(Mutex::new(PortalLog::default())),
            portal: Arc::new(PortalConfig::default()),
        }
    }

    pub fn log(&self) -> MutexGuard<'_, PortalLog> {
        self.log.lock().unwrap()
    }
}

impl Browser for ScriptedBrowser {
    type Session = ScriptedSession;

    async fn open(&self) -> Result<ScriptedSession, BrowserError> {
        self.log().opened += 1;
        Ok(ScriptedSession {
            browser: self.clone(),
            submitted: false,
            closed: false,
        })
    }
}

pub struct ScriptedSession {
    browser: ScriptedBrowser,
    submitted: bool,
    closed: bool,
}

impl ScriptedSession {
    fn options_for(&self, select: &Locator) -> Result<Vec<String>, BrowserError> {
        let portal = &self.browser.portal;
        let script = &self.browser.script;
        match select {
            Locator::Id(id) if *id == portal.commodity_select_id => Ok(script.commodities.clone()),
            Locator::Id(id) if *id == portal.region_select_id => Ok(script.regions.clone()),
            Locator::Id(id) if *id == portal.market_select_id => Ok(script.markets.clone()),
            other => Err(BrowserError::NoSuchElement(other.to_string())),
        }
    }

    fn control_id(locator: &Locator) -> String {
        match locator {
            Locator::Id(id) => id.clone(),
            other => other.to_string(),
        }
    }
}

impl BrowserSession for ScriptedSession {
    async fn goto(&mut self, _url: &str) -> Result<(), BrowserError> {
        let mut log = self.browser.log();
        log.loads += 1;
        if log.loads <= self.browser.script.failing_loads {
            return Err(BrowserError::Protocol("unknown error: net::ERR_CONNECTION_RESET".to_string()));
        }
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<bool, BrowserError> {
        let portal = &self.browser.portal;
        let script = &self.browser.script;
        let present = match locator {
            Locator::Class(class) if *class == portal.overlay_class => script.overlay,
            Locator::Id(id) if *id == portal.result_table_id => {
                let rendered = self.submitted && script.table_html.is_some();
                if !rendered {
                    tokio::time::sleep(timeout).await;
                }
                rendered
            }
            Locator::Id(id) if *id == portal.commodity_select_id => !script.hide_commodity_select,
            Locator::Id(id) => [
                &portal.commodity_select_id,
                &portal.region_select_id,
                &portal.market_select_id,
                &portal.from_date_input_id,
                &portal.to_date_input_id,
                &portal.submit_id,
            ]
            .contains(&id),
            _ => false,
        };
        Ok(present)
    }

    async fn click(&mut self, within: &Locator, _target: Option<&Locator>) -> Result<(), BrowserError> {
        let portal = &self.browser.portal;
        match within {
            Locator::Id(id) if *id == portal.submit_id => {
                if self.browser.script.panic_on_submit {
                    panic!("driver crashed");
                }
                self.submitted = true;
            }
            Locator::Class(class) if *class == portal.overlay_class => {
                self.browser.log().overlay_dismissed += 1;
            }
            other => return Err(BrowserError::NoSuchElement(other.to_string())),
        }
        Ok(())
    }

    async fn option_labels(&mut self, select: &Locator) -> Result<Vec<String>, BrowserError> {
        self.options_for(select)
    }

    async fn select_by_label(&mut self, select: &Locator, label: &str) -> Result<(), BrowserError> {
        let options = self.options_for(select)?;
        if !options.iter().any(|option| option.trim() == label.trim()) {
            return Err(BrowserError::NoSuchOption {
                select: select.to_string(),
                label: label.to_string(),
            });
        }
        self.browser
            .log()
            .selections
            .push((Self::control_id(select), label.to_string()));
        Ok(())
    }

    async fn type_text(&mut self, input: &Locator, text: &str) -> Result<(), BrowserError> {
        self.browser
            .log()
            .typed
            .push((Self::control_id(input), text.to_string()));
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let body = match (&self.browser.script.table_html, self.submitted) {
            (Some(table), true) => table.clone(),
            _ => "<form id=\"form1\"><div class=\"loading\"></div></form>".to_string(),
        };
        Ok(format!("<html><body>{}</body></html>", body))
    }

    async fn close(mut self) -> Result<(), BrowserError> {
        self.closed = true;
        self.browser.log().closed += 1;
        Ok(())
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Ok(mut log) = self.browser.log.lock() {
                log.abandoned += 1;
            }
        }
    }
}

/// A result table laid out like the portal's, one row per `(date, modal)`.
pub fn price_table(rows: &[(NaiveDate, f64)]) -> String {
    let mut html = String::from(
        "<table id=\"cphBody_GridPriceData\"><tr><th>Sl no.</th><th>District Name</th>\
         <th>Market Name</th><th>Commodity</th><th>Variety</th><th>Grade</th>\
         <th>Min Price (Rs./Quintal)</th><th>Max Price (Rs./Quintal)</th>\
         <th>Modal Price (Rs./Quintal)</th><th>Price Date</th></tr>",
    );
    for (i, (date, modal)) in rows.iter().enumerate() {
        html.push_str(&format!(
            "<tr><td>{}</td><td>Pune</td><td>Pune(Pimpri)</td><td>Onion</td><td>Red</td>\
             <td>FAQ</td><td>{:.0}</td><td>{:.0}</td><td>{:.0}</td><td>{}</td></tr>",
            i + 1,
            modal * 0.8,
            modal * 1.2,
            modal,
            date.format("%d %b %Y")
        ));
    }
    html.push_str("</table>");
    html
}
