//! Remote store client over the backend REST API

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;

use super::remote::{RemoteError, RemoteRecord, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{OperationKind, SyncOperation};
use crate::util::compact_text;

/// `RemoteStore` backed by `{base}/v1/{collection}` endpoints
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url: config.api_base_url.clone(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    fn endpoint(&self, operation: &SyncOperation) -> (Method, String) {
        let collection = operation.entity_type.collection();
        match operation.kind {
            OperationKind::Create => (
                Method::POST,
                format!("{}/v1/{collection}", self.base_url),
            ),
            OperationKind::Update => (
                Method::PUT,
                format!("{}/v1/{collection}/{}", self.base_url, operation.entity_id),
            ),
            OperationKind::Delete => (
                Method::DELETE,
                format!("{}/v1/{collection}/{}", self.base_url, operation.entity_id),
            ),
        }
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn apply(&self, operation: &SyncOperation) -> std::result::Result<RemoteRecord, RemoteError> {
        let (method, url) = self.endpoint(operation);
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.auth_token)
            .header("Accept", "application/json")
            .header("Idempotency-Key", operation.idempotency_key());
        if operation.kind != OperationKind::Delete {
            request = request.json(&operation.payload);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if operation.kind == OperationKind::Delete && status == StatusCode::NOT_FOUND {
            // Already gone remotely
            return Ok(RemoteRecord {
                id: operation.entity_id.as_str(),
                updated_at: None,
            });
        }
        classify_status(status, &body)?;

        Ok(serde_json::from_str::<RemoteRecord>(&body).unwrap_or_else(|_| RemoteRecord {
            id: operation.entity_id.as_str(),
            updated_at: None,
        }))
    }

    async fn ping(&self) -> std::result::Result<(), RemoteError> {
        let response = self
            .client
            .get(format!("{}/v1/health", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        classify_status(status, &body)
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(error.to_string())
    }
}

/// Map an HTTP status to success or a classified remote failure
pub(crate) fn classify_status(status: StatusCode, body: &str) -> std::result::Result<(), RemoteError> {
    if status.is_success() {
        return Ok(());
    }

    let message = parse_api_error(status, body);
    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Err(RemoteError::Conflict(message)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(RemoteError::Network(message))
        }
        status if status.is_server_error() => Err(RemoteError::Network(message)),
        _ => Err(RemoteError::Rejected(message)),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, EntityType};
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn store() -> HttpRemoteStore {
        let config = RemoteConfig::new("https://api.example.com/", "secret-token").unwrap();
        HttpRemoteStore::new(&config, Duration::from_secs(5)).unwrap()
    }

    fn operation(kind: OperationKind) -> SyncOperation {
        SyncOperation {
            id: 7,
            kind,
            entity_type: EntityType::Highlight,
            entity_id: EntityId::new(),
            payload: serde_json::json!({}),
            attempts: 0,
            created_at: 0,
            next_attempt_at: 0,
            in_flight: false,
            failure: None,
            last_error: None,
            revision: 0,
        }
    }

    #[test]
    fn classify_status_maps_conflicts() {
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, ""),
            Err(RemoteError::Conflict(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::PRECONDITION_FAILED, ""),
            Err(RemoteError::Conflict(_))
        ));
    }

    #[test]
    fn classify_status_treats_transient_errors_as_retryable() {
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            let error = classify_status(status, "").unwrap_err();
            assert!(error.is_retryable(), "{status} should be retryable");
        }
    }

    #[test]
    fn classify_status_rejects_other_client_errors() {
        let error = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"color is not supported"}"#,
        )
        .unwrap_err();
        assert_eq!(
            error,
            RemoteError::Rejected("color is not supported (422)".to_string())
        );
        assert!(classify_status(StatusCode::CREATED, "").is_ok());
    }

    #[test]
    fn endpoints_follow_collection_layout() {
        let store = store();
        let create = operation(OperationKind::Create);
        let update = operation(OperationKind::Update);
        let delete = operation(OperationKind::Delete);

        assert_eq!(
            store.endpoint(&create),
            (Method::POST, "https://api.example.com/v1/highlights".to_string())
        );
        assert_eq!(
            store.endpoint(&update),
            (
                Method::PUT,
                format!("https://api.example.com/v1/highlights/{}", update.entity_id)
            )
        );
        assert_eq!(store.endpoint(&delete).0, Method::DELETE);
    }

    /// Answer one request with a body shorter than its declared length
    async fn truncated_response_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0_u8; 1024];
            while !request.ends_with(b"{}") {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&chunk[..n]),
                }
            }
            socket
                .write_all(
                    b"HTTP/1.1 201 Created\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"id\":",
                )
                .await
                .unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn truncated_body_is_a_network_error() {
        let config = RemoteConfig::new(truncated_response_server().await, "secret-token").unwrap();
        let remote = HttpRemoteStore::new(&config, Duration::from_secs(5)).unwrap();

        let result = remote.apply(&operation(OperationKind::Create)).await;

        assert!(matches!(result, Err(RemoteError::Network(_))), "{result:?}");
    }

    #[test]
    fn idempotency_key_tracks_revision() {
        let mut sent = operation(OperationKind::Create);
        assert_eq!(sent.idempotency_key(), "selah-op-7-0");
        sent.revision = 1;
        assert_eq!(sent.idempotency_key(), "selah-op-7-1");
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", store());
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
