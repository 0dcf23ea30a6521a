//! HTTP pipeline client speaking the Archivematica REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::PipelineConfig;

use super::{PipelineClient, PipelineClientError, PipelineJob, SubmitRequest, UnitStatus, UnitType};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HideResponse {
    #[serde(default)]
    removed: bool,
}

/// reqwest-based [`PipelineClient`].
pub struct HttpPipelineClient {
    client: Client,
    base_url: String,
    authorization: String,
}

impl HttpPipelineClient {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineClientError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            authorization: format!("ApiKey {}:{}", config.user, config.key),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PipelineClientError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineClientError::Timeout
            } else {
                PipelineClientError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PipelineClientError::Authentication);
        }

        let body = response.text().await.unwrap_or_default();
        Err(PipelineClientError::Http {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        })
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, PipelineClientError> {
        response
            .json()
            .await
            .map_err(|e| PipelineClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PipelineClient for HttpPipelineClient {
    async fn submit(&self, request: SubmitRequest) -> Result<String, PipelineClientError> {
        debug!(name = %request.name, path = %request.path, "Submitting package");
        let response = self
            .send(self.request(Method::POST, "api/v2beta/package/").json(&request))
            .await?;
        let body: SubmitResponse = Self::json(response).await?;
        Ok(body.id)
    }

    async fn transfer_status(&self, transfer_id: &str) -> Result<UnitStatus, PipelineClientError> {
        let path = format!(
            "api/transfer/status/{}/",
            urlencoding::encode(transfer_id)
        );
        let response = self.send(self.request(Method::GET, &path)).await?;
        Self::json(response).await
    }

    async fn ingest_status(&self, sip_id: &str) -> Result<UnitStatus, PipelineClientError> {
        let path = format!("api/ingest/status/{}/", urlencoding::encode(sip_id));
        let response = self.send(self.request(Method::GET, &path)).await?;
        Self::json(response).await
    }

    async fn jobs(&self, unit_id: &str) -> Result<Vec<PipelineJob>, PipelineClientError> {
        let path = format!("api/v2beta/jobs/{}", urlencoding::encode(unit_id));
        let response = self.send(self.request(Method::GET, &path)).await?;
        Self::json(response).await
    }

    async fn hide(&self, unit_id: &str, unit_type: UnitType) -> Result<(), PipelineClientError> {
        let path = format!(
            "api/{}/{}/delete/",
            unit_type.as_str(),
            urlencoding::encode(unit_id)
        );
        let response = self.send(self.request(Method::DELETE, &path)).await?;
        let body: HideResponse = Self::json(response).await?;
        if !body.removed {
            return Err(PipelineClientError::InvalidResponse(format!(
                "{} {} was not removed",
                unit_type.as_str(),
                unit_id
            )));
        }
        Ok(())
    }
}
