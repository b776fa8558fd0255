use crate::error::{classify_status, classify_transport, GenerateError};
use anyhow::{anyhow, Context, Result};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const NO_RESPONSE: &str = "No response received";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub probe: Duration,
    pub list: Duration,
    pub generate: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(3),
            list: Duration::from_secs(5),
            generate: Duration::from_secs(60),
        }
    }
}

/// A model installed on the server, as listed by `/api/tags`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

impl Model {
    pub fn size_label(&self) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

        if self.size < 1000 {
            return format!("{} B", self.size);
        }

        let mut value = self.size as f64;
        let mut unit = 0;
        while value >= 1000.0 && unit < UNITS.len() - 1 {
            value /= 1000.0;
            unit += 1;
        }
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[derive(Deserialize, Debug)]
pub struct TagsResponse {
    pub models: Vec<Model>,
}

#[derive(Deserialize, Debug, Default)]
struct VersionResponse {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
}

#[derive(Deserialize, Debug, Default)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: Option<String>,
}

impl GenerateResponse {
    pub fn into_text(self) -> String {
        self.response
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| NO_RESPONSE.to_string())
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    timeouts: Timeouts,
}

impl OllamaClient {
    pub fn new(timeouts: Timeouts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Unable to build the HTTP client")?;

        Ok(Self { client, timeouts })
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Liveness probe. Any 2xx counts; the version string is informational.
    pub async fn version(&self, base_url: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .get(url(base_url, "/api/version"))
            .timeout(self.timeouts.probe)
            .send()
            .await
            .context("Version probe failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Version probe returned HTTP {}", resp.status()));
        }

        let body = resp.text().await.unwrap_or_default();
        let parsed: VersionResponse = serde_json::from_str(&body).unwrap_or_default();
        Ok(parsed.version)
    }

    pub async fn list_models(&self, base_url: &str) -> Result<Vec<Model>> {
        let resp = self
            .client
            .get(url(base_url, "/api/tags"))
            .timeout(self.timeouts.list)
            .send()
            .await
            .context("Model listing request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP error {status}: {body}"));
        }

        let tags: TagsResponse = resp
            .json()
            .await
            .context("Unreadable model listing (unexpected format)")?;

        debug!(count = tags.models.len(), "listed models");
        Ok(tags.models)
    }

    pub async fn generate(
        &self,
        base_url: &str,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, GenerateError> {
        let req = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        debug!(model, prompt_len = prompt.len(), "sending generate request");
        let resp = self
            .client
            .post(url(base_url, "/api/generate"))
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeouts.generate)
            .json(&req)
            .send()
            .await
            .map_err(|err| classify_transport(&err, base_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, model));
        }

        let out: GenerateResponse = resp
            .json()
            .await
            .map_err(|err| classify_transport(&err, base_url))?;

        Ok(out.into_text())
    }
}

pub fn url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim().trim_end_matches('/'), path)
}
