//! HTTP client for the render provider API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CorrelationId, ProviderError, RenderProvider, RenderSpec, RenderStatus, Result};
use crate::config::ProviderConfig;

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FormatsResponse {
    formats: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    seconds: f64,
}

/// Render provider reached over HTTP
///
/// Routes (relative to `base_url`):
/// - `POST /v1/renders` submit, `{ "id": .. }`
/// - `GET /v1/renders/{id}` status snapshot
/// - `DELETE /v1/renders/{id}` cancel
/// - `GET /v1/formats` supported formats
/// - `POST /v1/renders/estimate` duration estimate in seconds
pub struct HttpRenderProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRenderProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout.as_duration())
            .timeout(config.request_timeout.as_duration())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/v1/renders/{id}` with the id pushed as one escaped path segment
    fn render_url(&self, correlation_id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url("/v1/renders"))
            .map_err(|e| ProviderError::Protocol(format!("invalid provider url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Protocol(format!("provider url has no path: {}", self.base_url)))?
            .push(correlation_id);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Unavailable(format!("request timed out: {}", e))
            } else {
                ProviderError::Unavailable(e.to_string())
            }
        })
    }

    /// Map non-success statuses; `Ok` passes the response through
    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = if body.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), body)
        };

        Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ProviderError::InvalidSpec(detail)
            }
            StatusCode::NOT_FOUND => ProviderError::NotFound(format!("{}: {}", what, detail)),
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::Unavailable(detail)
            }
            _ => ProviderError::Protocol(detail),
        })
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Protocol(format!("invalid body: {}", e)))
    }
}

#[async_trait]
impl RenderProvider for HttpRenderProvider {
    async fn submit(&self, spec: &RenderSpec) -> Result<CorrelationId> {
        let request = self.client.post(self.url("/v1/renders")).json(spec);
        let response = Self::check(self.send(request).await?, "submit").await?;
        let body: SubmitResponse = Self::json(response).await?;

        debug!(spec_id = %spec.id, correlation_id = %body.id, "Render submitted");
        Ok(body.id)
    }

    async fn status(&self, correlation_id: &str) -> Result<RenderStatus> {
        let request = self.client.get(self.render_url(correlation_id)?);
        let response = Self::check(self.send(request).await?, correlation_id).await?;
        Self::json(response).await
    }

    async fn cancel(&self, correlation_id: &str) -> Result<bool> {
        let request = self.client.delete(self.render_url(correlation_id)?);
        let response = self.send(request).await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                warn!(correlation_id, status = %response.status(), "Render not cancellable");
                Ok(false)
            }
            _ => Self::check(response, correlation_id).await.map(|_| false),
        }
    }

    async fn supported_formats(&self) -> Result<Vec<String>> {
        let request = self.client.get(self.url("/v1/formats"));
        let response = Self::check(self.send(request).await?, "formats").await?;
        let body: FormatsResponse = Self::json(response).await?;
        Ok(body.formats)
    }

    async fn estimate_duration(&self, spec: &RenderSpec) -> Result<Duration> {
        let request = self.client.post(self.url("/v1/renders/estimate")).json(spec);
        let response = Self::check(self.send(request).await?, "estimate").await?;
        let body: EstimateResponse = Self::json(response).await?;

        Duration::try_from_secs_f64(body.seconds)
            .map_err(|e| ProviderError::Protocol(format!("invalid estimate {}: {}", body.seconds, e)))
    }
}
