use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::data::browser::{Browser, BrowserError, BrowserSession, Locator};

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Slack on top of the page-load timeout for a single driver command.
const COMMAND_MARGIN: Duration = Duration::from_secs(10);

/// Talks the W3C WebDriver protocol to a chromedriver-compatible endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverBrowser {
    client: Client,
    base_url: String,
    headless: bool,
    page_load_timeout: Duration,
    poll_interval: Duration,
}

impl WebDriverBrowser {
    /// Every driver command is bounded by the page-load timeout plus a margin
    /// (at most doubling it), so a hung driver fails the attempt instead of
    /// stalling it.
    pub fn new(
        base_url: impl Into<String>,
        headless: bool,
        page_load_timeout: Duration,
    ) -> Result<Self, BrowserError> {
        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if !page_load_timeout.is_zero() {
            builder = builder.timeout(page_load_timeout + COMMAND_MARGIN.min(page_load_timeout));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headless,
            page_load_timeout,
            poll_interval: Duration::from_millis(250),
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage"];
        if self.headless {
            args.push("--headless");
        }

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                    "timeouts": { "pageLoad": self.page_load_timeout.as_millis() as u64 }
                }
            }
        })
    }
}

impl Browser for WebDriverBrowser {
    type Session = WebDriverSession;

    async fn open(&self) -> Result<WebDriverSession, BrowserError> {
        let url = format!("{}/session", self.base_url);
        let value = send(&self.client, Method::POST, &url, Some(self.capabilities())).await?;

        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("session response without sessionId".to_string()))?
            .to_string();

        debug!(session = %session_id, "WebDriver session opened");

        Ok(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
            poll_interval: self.poll_interval,
            closed: false,
        })
    }
}

pub struct WebDriverSession {
    client: Client,
    session_url: String,
    poll_interval: Duration,
    closed: bool,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        let url = format!("{}{}", self.session_url, path);
        send(&self.client, method, &url, body).await
    }

    async fn find(&self, locator: &Locator) -> Result<String, BrowserError> {
        let value = self
            .command(Method::POST, "/element", Some(by_css(locator)))
            .await
            .map_err(|e| not_found_as(e, locator))?;
        element_id(&value)
    }

    async fn find_within(&self, parent: &str, locator: &Locator) -> Result<String, BrowserError> {
        let path = format!("/element/{}/element", parent);
        let value = self
            .command(Method::POST, &path, Some(by_css(locator)))
            .await
            .map_err(|e| not_found_as(e, locator))?;
        element_id(&value)
    }

    async fn find_all_within(&self, parent: &str, css: &str) -> Result<Vec<String>, BrowserError> {
        let path = format!("/element/{}/elements", parent);
        let body = json!({ "using": "css selector", "value": css });
        let value = self.command(Method::POST, &path, Some(body)).await?;

        value
            .as_array()
            .ok_or_else(|| BrowserError::Protocol("elements response is not an array".to_string()))?
            .iter()
            .map(element_id)
            .collect()
    }

    async fn text(&self, element: &str) -> Result<String, BrowserError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().trim().to_string())
    }

    async fn click_element(&self, element: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, &format!("/element/{}/click", element), Some(json!({})))
            .await?;
        Ok(())
    }

    /// Ends the remote session. Until this succeeds `Drop` still owns teardown.
    async fn delete(&mut self) -> Result<(), BrowserError> {
        send(&self.client, Method::DELETE, &self.session_url, None).await?;
        self.closed = true;
        debug!(session = %self.session_url, "WebDriver session closed");
        Ok(())
    }

    /// Option element ids paired with their visible labels.
    async fn options(&self, select: &Locator) -> Result<Vec<(String, String)>, BrowserError> {
        let select_id = self.find(select).await?;
        let mut labelled = Vec::new();
        for option in self.find_all_within(&select_id, "option").await? {
            let label = self.text(&option).await?;
            labelled.push((option, label));
        }
        Ok(labelled)
    }
}

impl BrowserSession for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<bool, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find(locator).await {
                Ok(_) => return Ok(true),
                Err(BrowserError::NoSuchElement(_)) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn click(&mut self, within: &Locator, target: Option<&Locator>) -> Result<(), BrowserError> {
        let mut element = self.find(within).await?;
        if let Some(target) = target {
            element = self.find_within(&element, target).await?;
        }
        self.click_element(&element).await
    }

    async fn option_labels(&mut self, select: &Locator) -> Result<Vec<String>, BrowserError> {
        Ok(self
            .options(select)
            .await?
            .into_iter()
            .map(|(_, label)| label)
            .collect())
    }

    async fn select_by_label(&mut self, select: &Locator, label: &str) -> Result<(), BrowserError> {
        let options = self.options(select).await?;
        let option = options
            .iter()
            .find(|(_, text)| text == label.trim())
            .map(|(id, _)| id.clone())
            .ok_or_else(|| BrowserError::NoSuchOption {
                select: select.to_string(),
                label: label.to_string(),
            })?;
        self.click_element(&option).await
    }

    async fn type_text(&mut self, input: &Locator, text: &str) -> Result<(), BrowserError> {
        let element = self.find(input).await?;
        self.command(Method::POST, &format!("/element/{}/clear", element), Some(json!({})))
            .await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", element),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "/source", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BrowserError::Protocol("page source is not a string".to_string()))
    }

    async fn close(mut self) -> Result<(), BrowserError> {
        self.delete().await
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Dropped mid-attempt (cancelled query): release the remote browser anyway.
        warn!(session = %self.session_url, "Session dropped without close, scheduling teardown");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let url = self.session_url.clone();
            handle.spawn(async move {
                if let Err(e) = client.delete(&url).send().await {
                    warn!("Deferred session teardown failed: {}", e);
                }
            });
        }
    }
}

async fn send(client: &Client, method: Method, url: &str, body: Option<Value>) -> Result<Value, BrowserError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await?;
    let status = response.status();
    let mut payload: Value = response.json().await?;

    if status.is_success() {
        Ok(payload["value"].take())
    } else {
        Err(classify_error(&payload))
    }
}

/// Maps a W3C error payload onto [`BrowserError`].
fn classify_error(payload: &Value) -> BrowserError {
    let error = payload["value"]["error"].as_str().unwrap_or("unknown error");
    let message = payload["value"]["message"].as_str().unwrap_or_default();

    match error {
        "no such element" => BrowserError::NoSuchElement(message.to_string()),
        "timeout" | "script timeout" => BrowserError::Timeout(message.to_string()),
        _ => BrowserError::Protocol(format!("{}: {}", error, message)),
    }
}

fn not_found_as(error: BrowserError, locator: &Locator) -> BrowserError {
    match error {
        BrowserError::NoSuchElement(_) => BrowserError::NoSuchElement(locator.to_string()),
        other => other,
    }
}

fn by_css(locator: &Locator) -> Value {
    json!({ "using": "css selector", "value": locator.to_css() })
}

fn element_id(value: &Value) -> Result<String, BrowserError> {
    value[ELEMENT_KEY]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BrowserError::Protocol("missing element reference".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_payloads_are_classified() {
        let missing = json!({ "value": { "error": "no such element", "message": "#ddlMarket" } });
        assert!(matches!(classify_error(&missing), BrowserError::NoSuchElement(m) if m == "#ddlMarket"));

        let slow = json!({ "value": { "error": "timeout", "message": "page load" } });
        assert!(matches!(classify_error(&slow), BrowserError::Timeout(_)));

        let crashed = json!({ "value": { "error": "unknown error", "message": "chrome not reachable" } });
        assert!(matches!(classify_error(&crashed), BrowserError::Protocol(m) if m.contains("chrome not reachable")));
    }

    #[test]
    fn element_references_use_w3c_key() {
        let value = json!({ "element-6066-11e4-a52e-4f735466cecf": "abc-123" });
        assert_eq!(element_id(&value).unwrap(), "abc-123");
        assert!(element_id(&json!({ "ELEMENT": "legacy" })).is_err());
    }

    #[test]
    fn headless_flag_controls_chrome_args() {
        let browser = WebDriverBrowser::new("http://localhost:9515/", true, Duration::from_secs(120)).unwrap();
        let caps = browser.capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();

        assert!(args.iter().any(|a| a == "--headless"));
        assert_eq!(caps["capabilities"]["alwaysMatch"]["timeouts"]["pageLoad"], 120_000);
        assert_eq!(browser.base_url, "http://localhost:9515");
    }

    /// Accepts connections and never answers.
    async fn silent_driver() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn hung_driver_fails_the_command_with_a_timeout() {
        let base = silent_driver().await;
        let browser = WebDriverBrowser::new(base, true, Duration::from_millis(200)).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(3), browser.open()).await;

        match outcome {
            Ok(Err(BrowserError::Transport(e))) => assert!(e.is_timeout()),
            Ok(Err(other)) => panic!("unexpected error: {other:?}"),
            Ok(Ok(_)) => panic!("silent driver produced a session"),
            Err(_) => panic!("open() was not bounded by the command timeout"),
        }
    }

    #[tokio::test]
    async fn failed_close_leaves_teardown_to_drop() {
        let base = silent_driver().await;
        let browser = WebDriverBrowser::new(base.clone(), true, Duration::from_millis(200)).unwrap();
        let mut session = WebDriverSession {
            client: browser.client.clone(),
            session_url: format!("{}/session/abc", base),
            poll_interval: browser.poll_interval,
            closed: false,
        };

        assert!(session.delete().await.is_err());
        assert!(!session.closed);
    }
}
