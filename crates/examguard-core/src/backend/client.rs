//! HTTP implementation of the backend and collector seams.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, CONTENT_TYPE, COOKIE, USER_AGENT};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    AssessmentBackend, BackendError, CodeAnalysis, CodeSubmission, CurrentUser, ExecutionResult,
    ReportRequest,
};
use crate::config::ApiConfig;
use crate::event::ProctorLogRecord;
use crate::telemetry::{CollectorTransport, TransportError};

/// Longest error body kept in a [`BackendError::Status`] message.
const MAX_ERROR_BODY: usize = 512;

/// Largest success body read before the response is rejected.
const MAX_RESPONSE_BODY: usize = 4 * 1024 * 1024;

const CLIENT_AGENT: &str = concat!("examguard/", env!("CARGO_PKG_VERSION"));

type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// JSON-over-HTTP client for the hiring backend.
///
/// Requests carry the configured session cookie, if any, the same way the
/// browser sends its credentials.
#[derive(Clone)]
pub struct HttpApi {
    config: ApiConfig,
    session_cookie: Option<String>,
    client: HttpsClient,
}

impl HttpApi {
    /// Creates a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidUrl`] if the base URL cannot be parsed.
    pub fn new(config: &ApiConfig) -> Result<Self, BackendError> {
        config
            .base_url
            .parse::<http::Uri>()
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {e}", config.base_url)))?;

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client: HttpsClient = Client::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            session_cookie: config.session_cookie(),
            config: config.clone(),
            client,
        })
    }

    /// Overrides the session cookie resolved from the environment.
    #[must_use]
    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, BackendError> {
        let url = self.url(path);
        let mut request = Request::builder()
            .method(method.clone())
            .uri(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_AGENT);
        if body.is_some() {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        if let Some(cookie) = &self.session_cookie {
            request = request.header(COOKIE, cookie.as_str());
        }
        let request = request
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| BackendError::InvalidUrl(e.to_string()))?;

        debug!(method = %method, url = %url, "backend request");

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let body = read_prefix(response.into_body(), MAX_ERROR_BODY).await?;
            let mut message = String::from_utf8_lossy(&body).into_owned();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            if message.is_empty() {
                message = format!("HTTP {status}");
            }
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Limited::new(response.into_body(), MAX_RESPONSE_BODY)
            .collect()
            .await
            .map(http_body_util::Collected::to_bytes)
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    BackendError::Decode(format!(
                        "response body exceeds {MAX_RESPONSE_BODY} bytes"
                    ))
                } else {
                    BackendError::Network(e.to_string())
                }
            })
    }

    async fn post_json<T, R>(&self, path: &str, payload: &T) -> Result<R, BackendError>
    where
        T: Serialize + Sync,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload).map_err(|e| BackendError::Encode(e.to_string()))?;
        let bytes = self.send(Method::POST, path, Some(body)).await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

impl fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.config.base_url)
            .field("has_session_cookie", &self.session_cookie.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AssessmentBackend for HttpApi {
    async fn execute_code(
        &self,
        submission: &CodeSubmission,
    ) -> Result<ExecutionResult, BackendError> {
        self.post_json(&self.config.execute_path, submission).await
    }

    async fn analyze_code(&self, submission: &CodeSubmission) -> Result<CodeAnalysis, BackendError> {
        self.post_json(&self.config.analyze_path, submission).await
    }

    async fn current_user(&self) -> Result<CurrentUser, BackendError> {
        let bytes = self
            .send(Method::GET, &self.config.identity_path, None)
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn generate_report(&self, report: &ReportRequest) -> Result<(), BackendError> {
        let body = serde_json::to_vec(report).map_err(|e| BackendError::Encode(e.to_string()))?;
        self.send(Method::POST, &self.config.report_path, Some(body))
            .await
            .map(drop)
    }
}

#[async_trait]
impl CollectorTransport for HttpApi {
    async fn deliver(&self, record: &ProctorLogRecord) -> Result<(), TransportError> {
        let body = serde_json::to_vec(record).map_err(|e| TransportError::Encode(e.to_string()))?;
        match self
            .send(Method::POST, &self.config.proctor_log_path, Some(body))
            .await
        {
            Ok(_) => Ok(()),
            Err(BackendError::Status { status, .. }) => Err(TransportError::Rejected { status }),
            Err(BackendError::Unauthorized) => Err(TransportError::Rejected {
                status: StatusCode::UNAUTHORIZED.as_u16(),
            }),
            Err(e) => Err(TransportError::Network(e.to_string())),
        }
    }
}

/// Reads at most `limit` bytes of `body` and drops the rest.
async fn read_prefix(mut body: Incoming, limit: usize) -> Result<Vec<u8>, BackendError> {
    let mut prefix = Vec::new();
    while prefix.len() < limit {
        let Some(frame) = body.frame().await else {
            break;
        };
        let frame = frame.map_err(|e| BackendError::Network(e.to_string()))?;
        if let Ok(data) = frame.into_data() {
            let take = data.len().min(limit - prefix.len());
            prefix.extend_from_slice(&data[..take]);
        }
    }
    Ok(prefix)
}
