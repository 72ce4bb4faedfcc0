//! HTTP probing for the endpoint readiness categories.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::debug;

use crate::io::config::ProbeConfig;

/// What a single GET returned. `json` is `None` when the body was not JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
    pub json: Option<Value>,
}

impl ProbeResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            json: Some(body),
        }
    }

    /// HTTP 200 with a JSON body.
    pub fn is_operational(&self) -> bool {
        self.status == 200 && self.json.is_some()
    }

    /// Element count when the body is a JSON array, or an object wrapping
    /// one under `leads`/`data`.
    pub fn array_len(&self) -> Option<usize> {
        match self.json.as_ref()? {
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => ["leads", "data"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
                .map(Vec::len),
            _ => None,
        }
    }
}

/// Issues GET requests against the application under test. One request per
/// call, no retries.
pub trait Prober {
    fn get(&self, path: &str) -> Result<ProbeResponse>;
}

pub struct HttpProber {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpProber {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            bail!("probe.base_url is empty");
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Prober for HttpProber {
    fn get(&self, path: &str) -> Result<ProbeResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .with_context(|| format!("read body of {url}"))?;
        let json = serde_json::from_str(&body).ok();
        debug!(%url, status, json = json.is_some(), "probed");
        Ok(ProbeResponse { status, json })
    }
}
