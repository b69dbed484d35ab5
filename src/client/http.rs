use super::{
    CatalogClient, ClientError, DeleteMode, DeleteRequest, DeleteResponse, SearchCriteria,
    SubmitRequest, SubmitResponse,
};
use crate::config::CatalogConfig;
use crate::model::{EntityRecord, Guid};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// JSON/HTTP client for the catalog's bulk write API.
#[derive(Clone)]
pub struct HttpCatalogClient {
    http: reqwest::Client,
    config: CatalogConfig,
}

impl HttpCatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("catalog-loader/0.1")
            .gzip(true)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            http: client,
            config,
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Service { status, body });
        }

        let body = response.bytes().await.map_err(ClientError::Http)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, ClientError> {
        log::debug!(
            "POST bulk write: {} entities ({:?})",
            request.entities.len(),
            request.mode
        );

        let response = self
            .authorize(self.http.post(self.endpoint("/api/entities/bulk")))
            .json(&request)
            .send()
            .await
            .map_err(ClientError::Http)?;

        Self::decode(response).await
    }

    async fn lookup_by_handle(&self, guid: &Guid) -> Result<Option<EntityRecord>, ClientError> {
        let response = self
            .authorize(
                self.http
                    .get(self.endpoint(&format!("/api/entities/{}", guid.as_str()))),
            )
            .send()
            .await
            .map_err(ClientError::Http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Self::decode(response).await.map(Some)
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<EntityRecord>, ClientError> {
        let response = self
            .authorize(self.http.post(self.endpoint("/api/search")))
            .json(criteria)
            .send()
            .await
            .map_err(ClientError::Http)?;

        Self::decode(response).await
    }

    async fn delete(&self, guids: &[Guid], mode: DeleteMode) -> Result<Vec<Guid>, ClientError> {
        if guids.is_empty() {
            return Ok(Vec::new());
        }

        let payload = DeleteRequest {
            guids: guids.to_vec(),
            mode,
        };

        let response = self
            .authorize(self.http.post(self.endpoint("/api/entities/delete")))
            .json(&payload)
            .send()
            .await
            .map_err(ClientError::Http)?;

        let parsed: DeleteResponse = Self::decode(response).await?;
        Ok(parsed.deleted)
    }
}
