//! Remote entity operations and the REST implementation.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tributo_core::{EntityId, RemoteError, SyncEntity};

/// Backend operations for one entity type.
#[async_trait]
pub trait RemoteEntityApi<T: SyncEntity>: Send + Sync {
    /// Read the full collection.
    async fn list(&self) -> Result<Vec<T>, RemoteError>;

    /// Create a record, returning it with its server-assigned id.
    async fn create(&self, payload: &Value) -> Result<T, RemoteError>;

    /// Apply `payload` to the record `id`, returning the stored result.
    async fn update(&self, id: EntityId, payload: &Value) -> Result<T, RemoteError>;

    async fn delete(&self, id: EntityId) -> Result<(), RemoteError>;
}

/// JSON-over-HTTP collection resource:
///
/// - `GET {base}/{path}` list
/// - `POST {base}/{path}` create
/// - `PUT {base}/{path}/{id}` update
/// - `DELETE {base}/{path}/{id}` delete
pub struct RestEntityApi<T> {
    client: reqwest::Client,
    collection_url: String,
    auth_header: HeaderMap,
    _entity: PhantomData<fn() -> T>,
}

impl<T: SyncEntity> RestEntityApi<T> {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        path: &str,
        bearer_token: Option<&str>,
    ) -> Result<Self, RemoteError> {
        let collection_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let auth_header = build_auth_header(&collection_url, bearer_token)?;
        Ok(Self {
            client,
            collection_url,
            auth_header,
            _entity: PhantomData,
        })
    }

    /// Build with a dedicated client bounded by `timeout`.
    pub fn with_timeout(
        base_url: &str,
        path: &str,
        bearer_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport {
                endpoint: T::ENTITY_TYPE.to_string(),
                reason: e.to_string(),
            })?;
        Self::new(client, base_url, path, bearer_token)
    }

    pub fn collection_url(&self) -> &str {
        &self.collection_url
    }

    fn item_url(&self, id: EntityId) -> String {
        format!("{}/{}", self.collection_url, id)
    }

    fn transport(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout {
                endpoint: self.collection_url.clone(),
            }
        } else if e.is_decode() {
            RemoteError::InvalidResponse {
                endpoint: self.collection_url.clone(),
                reason: e.to_string(),
            }
        } else {
            RemoteError::Transport {
                endpoint: self.collection_url.clone(),
                reason: e.to_string(),
            }
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = request
            .headers(self.auth_header.clone())
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            endpoint: self.collection_url.clone(),
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_response<R: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<R, RemoteError> {
        response.json::<R>().await.map_err(|e| self.transport(e))
    }
}

#[async_trait]
impl<T: SyncEntity> RemoteEntityApi<T> for RestEntityApi<T> {
    async fn list(&self) -> Result<Vec<T>, RemoteError> {
        let response = self.send(self.client.get(&self.collection_url)).await?;
        self.parse_response(response).await
    }

    async fn create(&self, payload: &Value) -> Result<T, RemoteError> {
        let response = self
            .send(self.client.post(&self.collection_url).json(payload))
            .await?;
        self.parse_response(response).await
    }

    async fn update(&self, id: EntityId, payload: &Value) -> Result<T, RemoteError> {
        let response = self
            .send(self.client.put(self.item_url(id)).json(payload))
            .await?;
        self.parse_response(response).await
    }

    async fn delete(&self, id: EntityId) -> Result<(), RemoteError> {
        self.send(self.client.delete(self.item_url(id))).await?;
        Ok(())
    }
}

fn build_auth_header(endpoint: &str, bearer_token: Option<&str>) -> Result<HeaderMap, RemoteError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            RemoteError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: format!("invalid bearer token: {}", e),
            }
        })?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}
