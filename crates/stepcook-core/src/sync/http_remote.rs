//! HTTP client for a remote session document store.
//!
//! Wire contract:
//! - `GET  {base}/sessions/{id}` returns the snapshot JSON, or 404
//! - `PUT  {base}/sessions/{id}` stores the snapshot JSON and answers
//!   `{"sync_version": n}`; 409 means the remote already holds a newer copy

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::remote::RemoteSessionStore;
use super::types::SyncError;
use crate::session::CookingSession;

#[derive(Debug, Deserialize)]
struct PutResponse {
    sync_version: u64,
}

#[derive(Debug, Deserialize)]
struct ConflictResponse {
    stored_version: u64,
}

pub struct HttpRemoteStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpRemoteStore {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    /// `InvalidUrl` if the URL does not parse or cannot carry path segments.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, SyncError> {
        let base = Url::parse(base_url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!("{base_url} cannot be a base")));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn session_url(&self, session_id: &str) -> Result<Url, SyncError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push("sessions")
            .push(session_id);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteSessionStore for HttpRemoteStore {
    async fn get(&self, session_id: &str) -> Result<Option<CookingSession>, SyncError> {
        let url = self.session_url(session_id)?;
        debug!(%url, "fetching remote session");
        let response = self.authorize(self.client.get(url)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(SyncError::Remote {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn put(&self, session: &CookingSession) -> Result<u64, SyncError> {
        let url = self.session_url(&session.session_id)?;
        debug!(%url, sync_version = session.sync_version, "pushing session");
        let response = self
            .authorize(self.client.put(url).json(session))
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => {
                let body: ConflictResponse = response.json().await?;
                Err(SyncError::Conflict {
                    attempted: session.sync_version,
                    stored: body.stored_version,
                })
            }
            status if status.is_success() => {
                let body: PutResponse = response.json().await?;
                Ok(body.sync_version)
            }
            status => Err(SyncError::Remote {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
