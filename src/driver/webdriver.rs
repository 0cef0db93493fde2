//! `PageDriver` over the W3C WebDriver HTTP protocol (chromedriver,
//! geckodriver, or a Selenium hub).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::page::{Connector, Element, PageDriver};
use crate::error::DriverError;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4d7dc2cc88bf";

/// Gap between find attempts while waiting for an element to appear.
const FIND_POLL: Duration = Duration::from_millis(200);

/// One live browser session.
pub struct WebDriverPage {
    http: Client,
    /// `<webdriver_url>/session/<id>`
    session_url: String,
    name: String,
}

impl WebDriverPage {
    /// Run one protocol command and return its `value` field.
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}{}", self.session_url, path);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let raw: Value = resp.json().await?;

        if !status.is_success() {
            let error = raw["value"]["error"].as_str().unwrap_or("unknown error");
            if error == "invalid session id" {
                return Err(DriverError::SessionLost);
            }
            return Err(DriverError::Protocol(format!("{} {}: {}", status, path, error)));
        }
        Ok(raw.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn find_now(&self, path: &str, selector: &str) -> Vec<Element> {
        let body = json!({ "using": "css selector", "value": selector });
        match self.command(Method::POST, path, Some(body)).await {
            Ok(Value::Array(items)) => items.iter().filter_map(element_ref).collect(),
            Ok(other) => element_ref(&other).into_iter().collect(),
            Err(e) => {
                debug!("find {} failed: {}", selector, e);
                Vec::new()
            }
        }
    }

    /// Retry a root-level find until it yields something or `timeout` passes.
    async fn find_polling(&self, path: &str, selector: &str, timeout: Duration) -> Vec<Element> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self.find_now(path, selector).await;
            if !found.is_empty() || Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(FIND_POLL).await;
        }
    }
}

fn element_ref(value: &Value) -> Option<Element> {
    value[ELEMENT_KEY].as_str().map(Element::new)
}

#[async_trait]
impl PageDriver for WebDriverPage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        info!("Navigating to {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn find_one(&self, selector: &str, timeout: Duration) -> Option<Element> {
        self.find_polling("/elements", selector, timeout)
            .await
            .into_iter()
            .next()
    }

    async fn find_all(&self, selector: &str, timeout: Duration) -> Vec<Element> {
        self.find_polling("/elements", selector, timeout).await
    }

    async fn find_within(&self, parent: &Element, selector: &str) -> Vec<Element> {
        let path = format!("/element/{}/elements", parent.id());
        self.find_now(&path, selector).await
    }

    async fn text(&self, element: &Element) -> Option<String> {
        let path = format!("/element/{}/text", element.id());
        match self.command(Method::GET, &path, None).await {
            Ok(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    async fn attribute(&self, element: &Element, name: &str) -> Option<String> {
        let path = format!("/element/{}/attribute/{}", element.id(), name);
        match self.command(Method::GET, &path, None).await {
            Ok(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    async fn click(&self, element: &Element) -> bool {
        let path = format!("/element/{}/click", element.id());
        match self.command(Method::POST, &path, Some(json!({}))).await {
            Ok(_) => true,
            Err(e) => {
                debug!("click failed: {}", e);
                false
            }
        }
    }

    async fn refresh(&self) -> bool {
        self.command(Method::POST, "/refresh", Some(json!({})))
            .await
            .is_ok()
    }

    async fn is_alive(&self) -> bool {
        self.command(Method::GET, "/url", None).await.is_ok()
    }

    async fn close(&self) {
        if let Err(e) = self.command(Method::DELETE, "", None).await {
            warn!("Failed to close WebDriver session: {}", e);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens new sessions against a WebDriver endpoint.
pub struct WebDriverConnector {
    http: Client,
    base: Url,
    headless: bool,
}

impl WebDriverConnector {
    pub fn new(base: Url, headless: bool) -> Result<Self, DriverError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(WebDriverConnector {
            http,
            base,
            headless,
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--window-size=1366,900", "--disable-gpu", "--no-sandbox"];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl Connector for WebDriverConnector {
    async fn connect(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        let base = self.base.as_str().trim_end_matches('/');
        let resp = self
            .http
            .post(format!("{}/session", base))
            .json(&self.capabilities())
            .send()
            .await?;

        let status = resp.status();
        let raw: Value = resp.json().await?;
        if !status.is_success() {
            return Err(DriverError::Protocol(format!(
                "session create failed {}: {}",
                status, raw["value"]["message"]
            )));
        }

        let session_id = raw["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| DriverError::Protocol("no sessionId in response".into()))?;
        info!(
            "🌐 WebDriver session {} opened ({})",
            session_id,
            if self.headless { "headless" } else { "visible" }
        );

        Ok(Arc::new(WebDriverPage {
            http: self.http.clone(),
            session_url: format!("{}/session/{}", base, session_id),
            name: format!("webdriver:{}", session_id),
        }))
    }
}
