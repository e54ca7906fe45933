use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    AppendOutcome, AppendRequest, PersistentStore, QueryRequest, StoreError, StoreItem,
    deadline::DEFAULT_CALL_TIMEOUT,
    types::{AppendResponse, QueryResponse},
};

#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct HttpStore {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(StoreError::InvalidConfig(
                "store url cannot be empty".to_string(),
            ));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(StoreError::InvalidConfig(format!(
                "store url must be http(s): {base_url}"
            )));
        }

        Ok(Self {
            base_url,
            token: config.token,
            timeout: config.timeout,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn map_transport_error(&self, error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Unavailable(error.to_string())
        }
    }
}

#[async_trait]
impl PersistentStore for HttpStore {
    async fn append(&self, request: AppendRequest) -> Result<AppendOutcome, StoreError> {
        let response = self
            .authorize(self.client.post(self.endpoint("append")))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error))?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT {
            debug!(scope = %request.scope, "store reported dedupe conflict");
            return Ok(AppendOutcome::Conflict);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: AppendResponse = response
            .json()
            .await
            .map_err(|error| StoreError::Decode(format!("append response: {error}")))?;

        match payload.action.as_deref() {
            Some("updated") => Ok(AppendOutcome::Updated { id: payload.id }),
            _ => Ok(AppendOutcome::Created { id: payload.id }),
        }
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<StoreItem>, StoreError> {
        let limit = request.limit.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("scopePrefix", request.scope_prefix.as_str()),
            ("limit", limit.as_str()),
        ];
        if let Some(kind) = request.kind.as_deref() {
            params.push(("type", kind));
        }

        let response = self
            .authorize(self.client.get(self.endpoint("query")))
            .timeout(self.timeout)
            .query(&params)
            .send()
            .await
            .map_err(|error| self.map_transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: QueryResponse = response
            .json()
            .await
            .map_err(|error| StoreError::Decode(format!("query response: {error}")))?;

        Ok(payload.items)
    }
}
