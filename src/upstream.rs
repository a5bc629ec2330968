//! Small JSON-over-HTTP client shared by the problem bank and problem generator.

use std::time::Duration;

use reqwest::{
  header::{CONTENT_TYPE, USER_AGENT},
  Method, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

#[derive(Clone, Debug)]
pub struct JsonClient {
  client: reqwest::Client,
  base_url: Url,
  service: &'static str,
}

impl JsonClient {
  pub fn new(service: &'static str, cfg: &UpstreamConfig) -> Result<Self, UpstreamError> {
    let base_url = Url::parse(&cfg.base_url)
      .map_err(|e| UpstreamError::Payload(format!("invalid {service} base url '{}': {e}", cfg.base_url)))?;
    let client = reqwest::Client::builder()
      .connect_timeout(Duration::from_secs(10))
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()?;
    Ok(Self { client, base_url, service })
  }

  /// Base url joined with percent-encoded path segments.
  pub fn url(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| UpstreamError::Payload(format!("{} base url cannot carry a path", self.service)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  pub async fn get<T: DeserializeOwned>(&self, segments: &[&str], query: &[(&str, String)]) -> Result<T, UpstreamError> {
    self.send::<(), T>(Method::GET, segments, query, None).await
  }

  pub async fn post<B: Serialize, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T, UpstreamError> {
    self.send(Method::POST, segments, &[], Some(body)).await
  }

  /// POST whose response body is ignored.
  pub async fn post_unit<B: Serialize>(&self, segments: &[&str], body: &B) -> Result<(), UpstreamError> {
    self.request(Method::POST, segments, &[], Some(body)).await?;
    Ok(())
  }

  async fn send<B: Serialize, T: DeserializeOwned>(
    &self,
    method: Method,
    segments: &[&str],
    query: &[(&str, String)],
    body: Option<&B>,
  ) -> Result<T, UpstreamError> {
    let res = self.request(method, segments, query, body).await?;
    let text = res.text().await?;
    serde_json::from_str(&text).map_err(|e| UpstreamError::Payload(format!("{}: {e}", self.service)))
  }

  #[instrument(level = "debug", skip(self, query, body), fields(service = self.service, %method))]
  async fn request<B: Serialize>(
    &self,
    method: Method,
    segments: &[&str],
    query: &[(&str, String)],
    body: Option<&B>,
  ) -> Result<reqwest::Response, UpstreamError> {
    let url = self.url(segments)?;
    let mut req = self
      .client
      .request(method, url.clone())
      .header(USER_AGENT, "math-tutor-backend/0.1")
      .header(CONTENT_TYPE, "application/json");
    if !query.is_empty() {
      req = req.query(query);
    }
    if let Some(body) = body {
      req = req.json(body);
    }

    let start = std::time::Instant::now();
    let res = req.send().await?;
    let status = res.status();
    debug!(target: "upstream", service = self.service, %url, status = status.as_u16(), elapsed = ?start.elapsed(), "Upstream call");

    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      if status.as_u16() != 404 {
        warn!(target: "upstream", service = self.service, %url, status = status.as_u16(), body = %crate::util::trunc_for_log(&body, 300), "Upstream error");
      }
      return Err(UpstreamError::Status { status: status.as_u16(), body });
    }
    Ok(res)
  }
}
