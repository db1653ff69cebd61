//! REST client for the Tally backend.
//!
//! Every call carries `Authorization: Bearer <token>` when a credential is
//! set, and every failure is classified into an [`ApiError`] so the query
//! cache can decide whether to retry:
//!
//! | Outcome                          | Error                     |
//! |----------------------------------|---------------------------|
//! | connect failure, timeout, reset  | `ApiError::Network`       |
//! | 401, unsendable credential       | `ApiError::Unauthorized`  |
//! | other 4xx                        | `ApiError::Client`        |
//! | 5xx                              | `ApiError::Server`        |
//! | 2xx with a body that won't parse | `ApiError::Decode`        |
//! | request that cannot be built     | `ApiError::Decode`        |

mod identity;

pub use identity::HttpIdentityAuthority;
pub use reqwest::Method;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_types::{ApiError, Credential};
use thiserror::Error;
use url::Url;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

fn base_client_builder() -> reqwest::ClientBuilder {
    use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .user_agent(concat!("tally/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
}

/// Cheap to clone; clones share the connection pool and the credential.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    credential: Arc<RwLock<Option<Credential>>>,
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ClientError> {
        let http = base_client_builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            credential: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn set_credential(&self, credential: Option<Credential>) {
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credential;
    }

    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Send one request authorized with the current credential.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let credential = self.credential();
        self.send(method, path, body, credential.as_ref()).await
    }

    /// Send one request authorized with `credential` instead of the stored one.
    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        credential: Option<&Credential>,
    ) -> Result<T, ApiError> {
        let url = self.url(path)?;
        let mut builder = self.http.request(method.clone(), url);
        if let Some(credential) = credential {
            builder = builder.header(reqwest::header::AUTHORIZATION, authorization(credential)?);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| {
            tracing::debug!(method = %method, path, error = %err, "Request failed to complete");
            transport_error(&err)
        })?;

        let status = response.status();
        tracing::debug!(method = %method, path, status = status.as_u16(), "Response received");

        if !status.is_success() {
            let body = read_capped_error_body(response).await;
            return Err(ApiError::from_status(
                status.as_u16(),
                error_message(status, &body),
            ));
        }

        let bytes = response.bytes().await.map_err(|err| transport_error(&err))?;
        let payload: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes
        };
        serde_json::from_slice(payload)
            .map_err(|err| ApiError::decode(format!("{method} {path}: {err}")))
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiError::decode(format!("invalid request path {path:?}: {err}")))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// A token that cannot be sent as a header value can never be accepted.
fn authorization(credential: &Credential) -> Result<reqwest::header::HeaderValue, ApiError> {
    let mut value = reqwest::header::HeaderValue::from_str(&credential.bearer())
        .map_err(|_| ApiError::unauthorized("credential is not a valid header value"))?;
    value.set_sensitive(true);
    Ok(value)
}

fn transport_error(err: &reqwest::Error) -> ApiError {
    if err.is_builder() {
        ApiError::decode(format!("request could not be built: {err}"))
    } else if err.is_decode() {
        ApiError::decode(err.to_string())
    } else if err.is_timeout() {
        ApiError::network(format!("request timed out: {err}"))
    } else {
        ApiError::network(err.to_string())
    }
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Prefer a `message`/`error`/`detail` string from a JSON error body, then
/// the raw body, then the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        for name in ["message", "error", "detail"] {
            if let Some(Value::String(text)) = fields.get(name) {
                return text.clone();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}
