//! Minimal W3C WebDriver client.
//!
//! Only the handful of commands the exporter needs: new session, navigate, page source,
//! find element, element attribute, execute script and delete session. Every command takes
//! `&mut self`; the browser is driven by exactly one caller at a time.

use crate::cmd;
use crate::config::WebDriverConfig;
use crate::{EngineError, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";
const POLL_INTERVAL_MS: u64 = 250;
const HTTP_TIMEOUT_SECS: u64 = 120;
const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

enum Method {
    Get,
    Post(Value),
    Delete,
}

pub struct WebDriverSession {
    agent: ureq::Agent,
    base_url: String,
    session_id: String,
    closed: bool,
    _driver: Option<DriverProcess>,
}

impl WebDriverSession {
    /// Starts (or attaches to) the WebDriver server and opens a browser session.
    ///
    /// Every failure here is a setup failure: without a browser there is nothing to export.
    pub fn start(config: &WebDriverConfig) -> Result<Self> {
        let base_url = config.url.trim_end_matches('/').to_string();
        let agent = build_http_agent(HTTP_TIMEOUT_SECS);

        let driver = match config.chromedriver_path.as_deref() {
            Some(binary) => {
                let process = DriverProcess::spawn(binary, &base_url)?;
                wait_until_ready(&agent, &base_url, Duration::from_secs(config.page_wait_secs))?;
                Some(process)
            }
            None => None,
        };

        let payload = json!({ "capabilities": { "alwaysMatch": chrome_capabilities(config) } });
        let value = send(&agent, &format!("{base_url}/session"), Method::Post(payload))
            .map_err(|e| EngineError::Setup(format!("could not create browser session: {e}")))?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::Setup("webdriver did not return a session id".to_string())
            })?
            .to_string();

        log::info!("browser session {session_id} started via {base_url}");
        Ok(Self {
            agent,
            base_url,
            session_id,
            closed: false,
            _driver: driver,
        })
    }

    pub fn navigate(&mut self, url: &str) -> Result<()> {
        self.command("/url", Method::Post(json!({ "url": url })))?;
        Ok(())
    }

    pub fn page_source(&mut self) -> Result<String> {
        let value = self.command("/source", Method::Get)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngineError::WebDriver {
                status: 200,
                message: "page source was not a string".to_string(),
            })
    }

    /// `Ok(None)` when nothing matches `css` right now.
    pub fn find_element(&mut self, css: &str) -> Result<Option<ElementId>> {
        let body = json!({ "using": "css selector", "value": css });
        match self.command("/element", Method::Post(body)) {
            Ok(value) => element_id_from_value(&value).map(Some).ok_or_else(|| {
                EngineError::WebDriver {
                    status: 200,
                    message: "element reference missing from response".to_string(),
                }
            }),
            Err(EngineError::WebDriver { message, .. }) if message.starts_with("no such element") => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Polls for `css` until it appears or `timeout` elapses.
    pub fn wait_for_element(&mut self, css: &str, timeout: Duration) -> Result<Option<ElementId>> {
        let started = Instant::now();
        loop {
            if let Some(element) = self.find_element(css)? {
                return Ok(Some(element));
            }
            if started.elapsed() >= timeout {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }

    pub fn element_attribute(&mut self, element: &ElementId, name: &str) -> Result<Option<String>> {
        let path = format!("/element/{}/attribute/{name}", element.0);
        let value = self.command(&path, Method::Get)?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Runs `script` synchronously; elements in `args` are passed as element references.
    pub fn execute(&mut self, script: &str, args: &[&ElementId]) -> Result<Value> {
        let args: Vec<Value> = args
            .iter()
            .map(|element| json!({ ELEMENT_KEY: element.0 }))
            .collect();
        self.command(
            "/execute/sync",
            Method::Post(json!({ "script": script, "args": args })),
        )
    }

    pub fn quit(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.command("", Method::Delete) {
            log::debug!("closing browser session {} failed: {err}", self.session_id);
        }
    }

    fn command(&mut self, path: &str, method: Method) -> Result<Value> {
        let url = format!("{}/session/{}{path}", self.base_url, self.session_id);
        send(&self.agent, &url, method)
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// A chromedriver child owned by the session; killed when the session goes away.
struct DriverProcess {
    child: Child,
}

impl DriverProcess {
    fn spawn(binary: &Path, base_url: &str) -> Result<Self> {
        let port = Url::parse(base_url)
            .ok()
            .and_then(|u| u.port_or_known_default())
            .ok_or_else(|| {
                EngineError::Setup(format!("webdriver url has no usable port: {base_url}"))
            })?;
        let child = cmd::command(binary)
            .arg(format!("--port={port}"))
            .arg("--silent")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| {
                EngineError::Setup(format!(
                    "could not start chromedriver at {}: {e}",
                    binary.display()
                ))
            })?;
        log::debug!("spawned chromedriver (pid {}) on port {port}", child.id());
        Ok(Self { child })
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn wait_until_ready(agent: &ureq::Agent, base_url: &str, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    loop {
        if let Ok(value) = send(agent, &format!("{base_url}/status"), Method::Get) {
            if value.get("ready").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(());
            }
        }
        if started.elapsed() >= timeout {
            return Err(EngineError::Setup(format!(
                "webdriver at {base_url} not ready after {}s",
                timeout.as_secs()
            )));
        }
        thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
}

/// Chrome capabilities: headless/silent flags, profile directory and browser binary.
pub fn chrome_capabilities(config: &WebDriverConfig) -> Value {
    let mut args: Vec<String> = Vec::new();
    if config.headless {
        args.push("--headless".to_string());
    }
    args.push("--silent".to_string());
    if let Some(dir) = config.user_data_dir.as_deref() {
        args.push(format!("user-data-dir={}", dir.to_string_lossy()));
    }

    let mut options = json!({ "args": args });
    if let Some(binary) = config.browser_binary.as_deref() {
        options["binary"] = Value::String(binary.to_string_lossy().to_string());
    }
    json!({ "browserName": "chrome", "goog:chromeOptions": options })
}

fn build_http_agent(timeout_secs: u64) -> ureq::Agent {
    let mut config = ureq::Agent::config_builder();
    config = config
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(timeout_secs.max(1))));
    config.build().into()
}

fn send(agent: &ureq::Agent, url: &str, method: Method) -> Result<Value> {
    let mut response = match method {
        Method::Get => agent.get(url).call()?,
        Method::Delete => agent.delete(url).call()?,
        Method::Post(body) => {
            let payload = serde_json::to_string(&body)?;
            agent
                .post(url)
                .header("Content-Type", "application/json; charset=utf-8")
                .send(payload.as_bytes())?
        }
    };

    let status = response.status().as_u16();
    let text = response
        .body_mut()
        .with_config()
        .limit(MAX_RESPONSE_BYTES)
        .read_to_string()?;
    decode_response(status, &text)
}

/// Unwraps the `value` member of a WebDriver response, turning error payloads into errors.
fn decode_response(status: u16, text: &str) -> Result<Value> {
    let parsed: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(text)?
    };
    let value = parsed.get("value").cloned().unwrap_or(Value::Null);
    if status >= 400 {
        let kind = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or("");
        return Err(EngineError::WebDriver {
            status,
            message: format!("{kind}: {}", message.lines().next().unwrap_or("")),
        });
    }
    Ok(value)
}

fn element_id_from_value(value: &Value) -> Option<ElementId> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(|id| ElementId(id.to_string()))
}
