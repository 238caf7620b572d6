//! HTTP bridge backend
//!
//! Talks JSON over HTTP to a sidecar process that owns the messaging
//! platform connection. Every request carries the identity's token in
//! `X-Bot-Token`; sessions are referenced by the id the sidecar assigns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use reqwest::{header::RETRY_AFTER, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    Connector, ExportedAuthorization, FileLocation, Result, SessionCredential, ShardId,
    ShardSession, StoredMessage, UpstreamClient, UpstreamError,
};

const TOKEN_HEADER: &str = "X-Bot-Token";

/// Flood wait applied when the sidecar signals one without a duration
const DEFAULT_FLOOD_WAIT_SECS: u64 = 2;

#[derive(Serialize)]
struct LoginRequest<'a> {
    api_id: i32,
    api_hash: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    home_shard: ShardId,
}

#[derive(Serialize)]
struct OpenSessionRequest {
    shard: ShardId,
    credential: SessionCredential,
}

#[derive(Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct ExportRequest {
    shard: ShardId,
}

/// Authorization as carried on the wire (base64 bytes)
#[derive(Serialize, Deserialize)]
struct WireAuthorization {
    id: i64,
    bytes: String,
}

#[derive(Serialize)]
struct ReadRequest<'a> {
    location: &'a FileLocation,
    offset: u64,
    limit: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BridgeErrorBody {
    code: Option<String>,
    message: Option<String>,
    retry_after: Option<u64>,
}

/// Logs identities in through the sidecar
pub struct BridgeConnector {
    http: reqwest::Client,
    base_url: String,
    api_id: i32,
    api_hash: String,
}

impl BridgeConnector {
    pub fn new(
        base_url: impl Into<String>,
        api_id: i32,
        api_hash: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| UpstreamError::Protocol(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_id,
            api_hash: api_hash.into(),
        })
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self, index: usize, token: &str) -> Result<Arc<dyn UpstreamClient>> {
        let http = Arc::new(BridgeHttp {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.to_string(),
        });

        let response = http
            .send(http.post("/v1/clients").json(&LoginRequest {
                api_id: self.api_id,
                api_hash: &self.api_hash,
            }))
            .await?;
        let login: LoginResponse = decode(response).await?;

        tracing::info!(client = index, home_shard = login.home_shard, "Bridge client logged in");

        Ok(Arc::new(BridgeClient {
            http,
            home_shard: login.home_shard,
        }))
    }
}

/// Shared request plumbing for one identity
struct BridgeHttp {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BridgeHttp {
    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header(TOKEN_HEADER, &self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header(TOKEN_HEADER, &self.token)
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.http
            .delete(format!("{}{}", self.base_url, path))
            .header(TOKEN_HEADER, &self.token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(map_transport)?;
        check_status(response).await
    }
}

/// One identity behind the sidecar
pub struct BridgeClient {
    http: Arc<BridgeHttp>,
    home_shard: ShardId,
}

#[async_trait]
impl UpstreamClient for BridgeClient {
    fn home_shard(&self) -> ShardId {
        self.home_shard
    }

    async fn get_message(&self, channel: i64, message_id: i64) -> Result<Option<StoredMessage>> {
        let request = self
            .http
            .get(&format!("/v1/channels/{}/messages/{}", channel, message_id));
        match self.http.send(request).await {
            Ok(response) => decode(response).await,
            Err(UpstreamError::Rpc { code: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_session(
        &self,
        shard: ShardId,
        credential: SessionCredential,
    ) -> Result<Arc<dyn ShardSession>> {
        let response = self
            .http
            .send(
                self.http
                    .post("/v1/sessions")
                    .json(&OpenSessionRequest { shard, credential }),
            )
            .await?;
        let opened: OpenSessionResponse = decode(response).await?;

        tracing::debug!(shard, session_id = %opened.session_id, "Opened bridge session");

        Ok(Arc::new(BridgeSession {
            http: self.http.clone(),
            shard,
            session_id: opened.session_id,
        }))
    }

    async fn export_authorization(&self, shard: ShardId) -> Result<ExportedAuthorization> {
        let response = self
            .http
            .send(self.http.post("/v1/auth/export").json(&ExportRequest { shard }))
            .await?;
        let wire: WireAuthorization = decode(response).await?;
        let bytes = BASE64
            .decode(wire.bytes.as_bytes())
            .map_err(|e| UpstreamError::Protocol(format!("Invalid authorization bytes: {}", e)))?;

        Ok(ExportedAuthorization { id: wire.id, bytes })
    }
}

/// Session handle held by the sidecar
pub struct BridgeSession {
    http: Arc<BridgeHttp>,
    shard: ShardId,
    session_id: String,
}

#[async_trait]
impl ShardSession for BridgeSession {
    fn shard(&self) -> ShardId {
        self.shard
    }

    async fn import_authorization(&self, authorization: &ExportedAuthorization) -> Result<()> {
        let body = WireAuthorization {
            id: authorization.id,
            bytes: BASE64.encode(&authorization.bytes),
        };
        self.http
            .send(
                self.http
                    .post(&format!("/v1/sessions/{}/auth/import", self.session_id))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn fetch(&self, location: &FileLocation, offset: u64, limit: u32) -> Result<Bytes> {
        let response = self
            .http
            .send(
                self.http
                    .post(&format!("/v1/sessions/{}/read", self.session_id))
                    .json(&ReadRequest {
                        location,
                        offset,
                        limit,
                    }),
            )
            .await?;
        response.bytes().await.map_err(map_transport)
    }

    async fn stop(&self) {
        let request = self.http.delete(&format!("/v1/sessions/{}", self.session_id));
        if let Err(e) = self.http.send(request).await {
            tracing::debug!(session_id = %self.session_id, "Failed to close bridge session: {}", e);
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| UpstreamError::Protocol(format!("Invalid bridge response: {}", e)))
}

fn map_transport(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        UpstreamError::Disconnected(err.to_string())
    } else {
        UpstreamError::Protocol(err.to_string())
    }
}

/// Map a non-success sidecar response onto the upstream error taxonomy
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_header = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body: BridgeErrorBody = response.json().await.unwrap_or_default();

    Err(classify_error(status, body, retry_header))
}

fn classify_error(status: StatusCode, body: BridgeErrorBody, retry_header: Option<u64>) -> UpstreamError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420 {
        let secs = body
            .retry_after
            .or(retry_header)
            .unwrap_or(DEFAULT_FLOOD_WAIT_SECS);
        return UpstreamError::FloodWait(Duration::from_secs(secs));
    }

    match body.code.as_deref() {
        Some("AUTH_BYTES_INVALID") => UpstreamError::AuthBytesInvalid,
        Some("FILE_REFERENCE_EXPIRED") => UpstreamError::FileReferenceExpired,
        _ => UpstreamError::Rpc {
            code: status.as_u16(),
            message: body
                .message
                .or(body.code)
                .unwrap_or_else(|| status.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: Option<&str>, retry_after: Option<u64>) -> BridgeErrorBody {
        BridgeErrorBody {
            code: code.map(str::to_string),
            message: None,
            retry_after,
        }
    }

    #[test]
    fn test_flood_wait_prefers_body_duration() {
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, body(None, Some(7)), Some(3));
        assert!(matches!(err, UpstreamError::FloodWait(d) if d == Duration::from_secs(7)));

        let err = classify_error(StatusCode::from_u16(420).unwrap(), body(None, None), Some(3));
        assert!(matches!(err, UpstreamError::FloodWait(d) if d == Duration::from_secs(3)));

        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, body(None, None), None);
        assert!(matches!(err, UpstreamError::FloodWait(d) if d == Duration::from_secs(2)));
    }

    #[test]
    fn test_error_codes() {
        let err = classify_error(StatusCode::UNAUTHORIZED, body(Some("AUTH_BYTES_INVALID"), None), None);
        assert!(matches!(err, UpstreamError::AuthBytesInvalid));

        let err = classify_error(StatusCode::BAD_REQUEST, body(Some("FILE_REFERENCE_EXPIRED"), None), None);
        assert!(matches!(err, UpstreamError::FileReferenceExpired));

        let err = classify_error(StatusCode::BAD_GATEWAY, body(Some("SHARD_DOWN"), None), None);
        assert!(matches!(err, UpstreamError::Rpc { code: 502, ref message } if message == "SHARD_DOWN"));
    }

    #[test]
    fn test_authorization_wire_format() {
        let wire = WireAuthorization {
            id: 4,
            bytes: BASE64.encode(b"secret"),
        };
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["bytes"], "c2VjcmV0");
    }
}
