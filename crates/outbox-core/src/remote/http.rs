//! REST implementation of the remote API.
//!
//! Layout: `{base}/entities/{id}`. `POST` creates, `GET` reads, `PUT` updates
//! with an `If-Match` header carrying the expected version, `DELETE` removes.
//! Write responses carry `{"version": "..."}`; reads carry
//! `{"version": "...", "payload": {...}}`.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, ETAG, IF_MATCH};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteApi, RemoteEntity, RemoteError, RemoteResult};
use crate::error::{Error, Result};
use crate::models::{EntityId, VersionMarker};
use crate::util::{error_excerpt, has_http_scheme, non_empty};

/// HTTP client for a REST entity endpoint
#[derive(Clone)]
pub struct HttpRemote {
    base: Url,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Build a client for `base_url`; `timeout` bounds every request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                Error::InvalidConfig(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn entity_url(&self, id: &EntityId) -> RemoteResult<Url> {
        entity_url(&self.base, id)
    }

    async fn send(
        &self,
        method: Method,
        id: &EntityId,
        payload: Option<&Value>,
        expected: Option<&VersionMarker>,
    ) -> RemoteResult<reqwest::Response> {
        let url = self.entity_url(id)?;
        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");
        if let Some(payload) = payload {
            request = request.json(payload);
        }
        if let Some(expected) = expected {
            request = request.header(IF_MATCH, expected.as_str());
        }
        request.send().await.map_err(map_transport_error)
    }

    async fn version_from(response: reqwest::Response) -> RemoteResult<VersionMarker> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(classify_failure(status, &headers, &body));
        }
        parse_version(&headers, &body)
    }
}

impl RemoteApi for HttpRemote {
    async fn create(&self, id: &EntityId, payload: &Value) -> RemoteResult<VersionMarker> {
        let response = self.send(Method::POST, id, Some(payload), None).await?;
        Self::version_from(response).await
    }

    async fn read(&self, id: &EntityId) -> RemoteResult<Option<RemoteEntity>> {
        let response = self.send(Method::GET, id, None, None).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(classify_failure(status, &headers, &body));
        }

        let parsed: EntityResponse = serde_json::from_str(&body).map_err(|error| {
            RemoteError::Rejected {
                status: status.as_u16(),
                message: format!("invalid entity response: {error}"),
            }
        })?;
        let version = parsed
            .version
            .map(VersionMarker::new)
            .or_else(|| etag_version(&headers))
            .ok_or_else(|| RemoteError::Rejected {
                status: status.as_u16(),
                message: "entity response did not include a version".to_string(),
            })?;
        Ok(Some(RemoteEntity {
            payload: parsed.payload,
            version,
        }))
    }

    async fn update(
        &self,
        id: &EntityId,
        payload: &Value,
        expected: Option<&VersionMarker>,
    ) -> RemoteResult<VersionMarker> {
        let response = self.send(Method::PUT, id, Some(payload), expected).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(id.clone()));
        }
        Self::version_from(response).await
    }

    async fn delete(&self, id: &EntityId) -> RemoteResult<()> {
        let response = self.send(Method::DELETE, id, None, None).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(id.clone()));
        }
        if status.is_success() {
            return Ok(());
        }
        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_transport_error)?;
        Err(classify_failure(status, &headers, &body))
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntityResponse {
    version: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    version: Option<String>,
}

fn normalize_base_url(raw: String) -> Result<Url> {
    let base = non_empty(Some(raw))
        .ok_or_else(|| Error::InvalidConfig("remote URL must not be empty".to_string()))?;
    if !has_http_scheme(&base) {
        return Err(Error::InvalidConfig(
            "remote URL must include http:// or https://".to_string(),
        ));
    }
    Url::parse(base.trim_end_matches('/'))
        .map_err(|error| Error::InvalidConfig(format!("invalid remote URL: {error}")))
}

fn entity_url(base: &Url, id: &EntityId) -> RemoteResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| RemoteError::Validation(format!("cannot build entity URL from {base}")))?
        .pop_if_empty()
        .extend(["entities", id.as_str()]);
    Ok(url)
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(error.to_string())
    }
}

fn etag_version(headers: &HeaderMap) -> Option<VersionMarker> {
    let raw = headers.get(ETAG)?.to_str().ok()?;
    let trimmed = raw.trim().trim_start_matches("W/").trim_matches('"');
    non_empty(Some(trimmed.to_string())).map(VersionMarker::new)
}

fn parse_version(headers: &HeaderMap, body: &str) -> RemoteResult<VersionMarker> {
    serde_json::from_str::<VersionResponse>(body)
        .ok()
        .and_then(|parsed| non_empty(parsed.version))
        .map(VersionMarker::new)
        .or_else(|| etag_version(headers))
        .ok_or_else(|| RemoteError::Rejected {
            status: 200,
            message: "write response did not include a version".to_string(),
        })
}

/// Map a non-success response onto the error taxonomy.
fn classify_failure(status: StatusCode, headers: &HeaderMap, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|payload| payload.message.clone().or_else(|| payload.error.clone()))
        .map_or_else(|| error_excerpt(body), |message| error_excerpt(&message));

    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => RemoteError::Conflict {
            current: parsed
                .and_then(|payload| non_empty(payload.version))
                .map(VersionMarker::new)
                .or_else(|| etag_version(headers)),
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Validation(if message.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                message
            })
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
        status if status.is_server_error() => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
        status => RemoteError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}
