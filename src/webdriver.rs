use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::{SessionTimeouts, SiteSelectors, SourceSettings};
use crate::domain::Partition;
use crate::error::HarvestError;
use crate::session::AutomationSession;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const STALE_ELEMENT: &str = "stale element reference";

pub struct WebDriverSession {
    client: Client,
    endpoint: String,
    session_id: String,
    selectors: SiteSelectors,
    timeouts: SessionTimeouts,
    download_dir: Utf8PathBuf,
    /// Option values as the page spells them, keyed by partition code.
    option_values: HashMap<Partition, String>,
}

impl WebDriverSession {
    /// Starts a browser whose downloads land in `download_dir` and opens the
    /// search page.
    pub fn connect(
        source: &SourceSettings,
        selectors: SiteSelectors,
        timeouts: SessionTimeouts,
        download_dir: &Utf8Path,
    ) -> Result<Self, HarvestError> {
        fs::create_dir_all(download_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let absolute = fs::canonicalize(download_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let client = Client::builder()
            .timeout(timeouts.page.max(Duration::from_secs(30)) * 2)
            .build()
            .map_err(|err| HarvestError::WebDriverHttp(err.to_string()))?;
        let endpoint = source.webdriver_url.trim_end_matches('/').to_string();

        let capabilities = new_session_body(&absolute.to_string_lossy(), source.headless);
        let url = format!("{endpoint}/session");
        let value = send(&client, Method::POST, &url, Some(capabilities))?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| HarvestError::Session("WebDriver returned no session id".to_string()))?
            .to_string();
        tracing::info!("browser session {session_id} started");

        let session = Self {
            client,
            endpoint,
            session_id,
            selectors,
            timeouts,
            download_dir: download_dir.to_path_buf(),
            option_values: HashMap::new(),
        };
        session.command(Method::POST, "url", Some(json!({ "url": source.url })))?;
        Ok(session)
    }

    fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, HarvestError> {
        let url = if path.is_empty() {
            format!("{}/session/{}", self.endpoint, self.session_id)
        } else {
            format!("{}/session/{}/{path}", self.endpoint, self.session_id)
        };
        send(&self.client, method, &url, body)
    }

    fn find_all(&self, xpath: &str) -> Result<Vec<String>, HarvestError> {
        let value = self.command(
            Method::POST,
            "elements",
            Some(json!({ "using": "xpath", "value": xpath })),
        )?;
        Ok(element_ids(&value))
    }

    fn attribute(&self, element: &str, name: &str) -> Result<Option<String>, HarvestError> {
        let path = format!("element/{element}/attribute/{name}");
        let value = self.command(Method::GET, &path, None)?;
        Ok(value.as_str().map(str::to_string))
    }

    fn flag(&self, element: &str, property: &str) -> Result<bool, HarvestError> {
        let value = self.command(Method::GET, &format!("element/{element}/{property}"), None)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn click(&self, element: &str) -> Result<(), HarvestError> {
        self.command(Method::POST, &format!("element/{element}/click"), Some(json!({})))?;
        Ok(())
    }

    /// First element matching `xpath` that is displayed and enabled.
    fn clickable(&self, xpath: &str) -> Result<Option<String>, HarvestError> {
        for element in self.find_all(xpath)? {
            match self.is_interactable(&element) {
                Ok(true) => return Ok(Some(element)),
                Ok(false) => {}
                Err(err) if is_stale(&err) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn is_interactable(&self, element: &str) -> Result<bool, HarvestError> {
        Ok(self.flag(element, "displayed")? && self.flag(element, "enabled")?)
    }

    fn wait_for<T, F>(&self, what: &str, timeout: Duration, mut probe: F) -> Result<T, HarvestError>
    where
        F: FnMut(&Self) -> Result<Option<T>, HarvestError>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = probe(self)? {
                return Ok(found);
            }
            if Instant::now() >= deadline {
                return Err(HarvestError::Timeout(what.to_string()));
            }
            thread::sleep(self.timeouts.poll);
        }
    }

    fn wait_clickable(&self, xpath: &str, timeout: Duration) -> Result<String, HarvestError> {
        self.wait_for(xpath, timeout, |session| session.clickable(xpath))
    }

    fn wait_present(&self, xpath: &str, timeout: Duration) -> Result<String, HarvestError> {
        self.wait_for(xpath, timeout, |session| {
            Ok(session.find_all(xpath)?.into_iter().next())
        })
    }

    fn wait_stale(&self, element: &str, timeout: Duration) -> Result<(), HarvestError> {
        self.wait_for("previous page to unload", timeout, |session| {
            match session.flag(element, "enabled") {
                Ok(_) => Ok(None),
                Err(err) if is_stale(&err) => Ok(Some(())),
                Err(err) => Err(err),
            }
        })
    }

    fn completed_downloads(&self) -> Result<BTreeSet<String>, HarvestError> {
        let entries = fs::read_dir(self.download_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            if let Some(name) = entry.file_name().to_str() {
                if is_completed_csv(name) {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Option<u64> {
        fs::metadata(self.download_dir.join(name).as_std_path())
            .ok()
            .map(|meta| meta.len())
    }
}

impl AutomationSession for WebDriverSession {
    fn enumerate_partitions(&mut self) -> Result<Vec<String>, HarvestError> {
        let select = self
            .wait_present(&self.selectors.partition_select, self.timeouts.element)
            .map_err(|err| HarvestError::Enumeration(err.to_string()))?;
        let value = self.command(
            Method::POST,
            &format!("element/{select}/elements"),
            Some(json!({ "using": "xpath", "value": ".//option" })),
        )?;

        let mut codes = Vec::new();
        for option in element_ids(&value) {
            let Some(raw) = self.attribute(&option, "value")? else {
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }
            if let Ok(partition) = raw.parse::<Partition>() {
                self.option_values.entry(partition).or_insert_with(|| raw.clone());
            }
            codes.push(raw);
        }
        tracing::info!("found {} partition option(s)", codes.len());
        Ok(codes)
    }

    fn select_partition(&mut self, partition: &Partition) -> Result<(), HarvestError> {
        let value = self
            .option_values
            .get(partition)
            .map(String::as_str)
            .unwrap_or(partition.as_str());
        let xpath = format!(
            "({})[1]//option[@value={}]",
            self.selectors.partition_select,
            xpath_literal(value)
        );
        let option = self.wait_present(&xpath, self.timeouts.element)?;
        self.click(&option)
    }

    fn submit_search(&mut self) -> Result<(), HarvestError> {
        let button = self.wait_clickable(&self.selectors.search_button, self.timeouts.element)?;
        self.click(&button)?;
        self.wait_present(&self.selectors.download_button, self.timeouts.page)?;
        Ok(())
    }

    fn is_paginated(&mut self) -> Result<bool, HarvestError> {
        Ok(!self.find_all(&self.selectors.page_links)?.is_empty())
    }

    fn download_current_page(&mut self) -> Result<Vec<u8>, HarvestError> {
        let before = self.completed_downloads()?;
        let button = self.wait_clickable(&self.selectors.download_button, self.timeouts.element)?;
        self.click(&button)?;

        let mut last_size: Option<(String, u64)> = None;
        let name = self.wait_for("CSV download", self.timeouts.download, |session| {
            let fresh = session
                .completed_downloads()?
                .into_iter()
                .find(|name| !before.contains(name));
            let Some(name) = fresh else {
                return Ok(None);
            };
            let size = session.file_size(&name);
            let settled = match (&last_size, size) {
                (Some((previous, previous_size)), Some(size)) => {
                    previous == &name && *previous_size == size && size > 0
                }
                _ => false,
            };
            last_size = size.map(|size| (name.clone(), size));
            Ok(settled.then_some(name))
        })?;

        let path = self.download_dir.join(&name);
        let content =
            fs::read(path.as_std_path()).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs::remove_file(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        tracing::debug!("picked up {name} ({} bytes)", content.len());
        Ok(content)
    }

    fn advance_to_next_page(&mut self) -> Result<bool, HarvestError> {
        let next = match self.wait_clickable(&self.selectors.next_page, self.timeouts.element) {
            Ok(next) => next,
            Err(HarvestError::Timeout(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        self.click(&next)?;
        self.wait_stale(&next, self.timeouts.page)?;
        thread::sleep(self.timeouts.settle);
        Ok(true)
    }

    fn reset_session(&mut self) -> Result<(), HarvestError> {
        let clear = self.wait_clickable(&self.selectors.clear_button, self.timeouts.element)?;
        self.click(&clear)?;
        thread::sleep(self.timeouts.settle);
        Ok(())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        match self.command(Method::DELETE, "", None) {
            Ok(_) => tracing::info!("browser session {} closed", self.session_id),
            Err(err) => tracing::warn!("closing browser session failed: {err}"),
        }
    }
}

fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, HarvestError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request
        .send()
        .map_err(|err| HarvestError::WebDriverHttp(err.to_string()))?;
    let status = response.status();
    let payload: Value = response
        .json()
        .map_err(|err| HarvestError::WebDriverHttp(err.to_string()))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(HarvestError::WebDriverStatus {
            status: status.as_u16(),
            message: error_message(&value),
        });
    }
    Ok(value)
}

fn new_session_body(download_dir: &str, headless: bool) -> Value {
    let mut args = vec!["--window-size=1400,1000".to_string()];
    if headless {
        args.push("--headless=new".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "prefs": {
                        "download.default_directory": download_dir,
                        "download.prompt_for_download": false,
                    }
                }
            }
        }
    })
}

fn element_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|elements| {
            elements
                .iter()
                .filter_map(|element| element.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn error_message(value: &Value) -> String {
    let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    match value.get("message").and_then(Value::as_str) {
        Some(message) if !message.is_empty() => format!("{error}: {message}"),
        _ => error.to_string(),
    }
}

fn is_stale(err: &HarvestError) -> bool {
    matches!(
        err,
        HarvestError::WebDriverStatus { message, .. } if message.starts_with(STALE_ELEMENT)
    )
}

/// Chrome writes `*.csv.crdownload` until the transfer finishes.
fn is_completed_csv(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}

/// Quotes `value` as an XPath 1.0 string literal.
fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value.split('\'').map(|part| format!("'{part}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}
