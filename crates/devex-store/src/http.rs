//! REST client for the deployment API.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET /deployments`
//! - `GET /deployments/{id}`, `PUT /deployments/{id}/`
//! - `GET /applications/{id}`
//! - `GET /configurations/{id}`

use async_trait::async_trait;
use devex_core::{
    Application, Configuration, Deployment, DeploymentState, DeploymentStore, DeploymentUpdate,
    RecordId,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::{StoreError, StoreResult};

/// Deployment store backed by the HTTP API.
#[derive(Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> StoreResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(what.to_string())),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(StoreError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> StoreResult<T> {
        debug!(path = %path, "GET");
        let response = self.send(self.client.get(self.url(path)), what).await?;
        response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    pub async fn get_deployment(&self, id: RecordId) -> StoreResult<Deployment> {
        self.get_json(&format!("deployments/{}", id), &format!("deployment {}", id))
            .await
    }
}

/// The API may return definitions as embedded YAML text.
fn decode_definition(definition: Value) -> StoreResult<Value> {
    match definition {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
        Value::String(text) => {
            serde_yaml::from_str(&text).map_err(|e| StoreError::Decode(format!("definition: {}", e)))
        }
        other => Ok(other),
    }
}

#[async_trait]
impl DeploymentStore for HttpStore {
    async fn list_deployments(&self, state: DeploymentState) -> devex_core::Result<Vec<Deployment>> {
        let all: Vec<Deployment> = self.get_json("deployments", "deployments").await?;
        Ok(all.into_iter().filter(|d| d.state == state).collect())
    }

    async fn get_application(&self, id: RecordId) -> devex_core::Result<Application> {
        let mut application: Application = self
            .get_json(&format!("applications/{}", id), &format!("application {}", id))
            .await?;
        application.definition = decode_definition(application.definition)?;
        Ok(application)
    }

    async fn get_configuration(&self, id: RecordId) -> devex_core::Result<Configuration> {
        let mut configuration: Configuration = self
            .get_json(
                &format!("configurations/{}", id),
                &format!("configuration {}", id),
            )
            .await?;
        configuration.definition = decode_definition(configuration.definition)?;
        Ok(configuration)
    }

    /// The API replaces whole records, so the current record is read first.
    async fn update_deployment(
        &self,
        id: RecordId,
        update: &DeploymentUpdate,
    ) -> devex_core::Result<()> {
        let mut deployment = self.get_deployment(id).await?;
        deployment.state = update.state;
        if update.updated.is_some() {
            deployment.updated = update.updated;
        }

        let request = self
            .client
            .put(self.url(&format!("deployments/{}/", id)))
            .json(&deployment);
        self.send(request, &format!("deployment {}", id)).await?;
        debug!(deployment_id = %id, state = %update.state, "Persisted deployment state");
        Ok(())
    }
}
