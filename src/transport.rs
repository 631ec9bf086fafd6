use async_trait::async_trait;
use std::fmt::Debug;

/// A single POST to the Edge Network (§6 wire protocol). The body is
/// whatever C4 serialized; the transport must send it byte-for-byte,
/// including on retry (§3 EdgeHit invariant).
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub url: String,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// `Retry-After`, parsed as whole seconds when present (§4.6).
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(#[from] anyhow::Error);

/// The seam C6 sends hits through (§6 "narrow interfaces"; Design Notes:
/// replace the transport's bytes-on-the-wire handling with a
/// constructor-injected collaborator rather than a global HTTP client).
/// `send` returning `Err` models "no response" (§4.6 "Transport failure");
/// any status code, including 5xx, is a successful `Ok`.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(feature = "client")]
pub mod reqwest_transport {
    use super::*;
    use reqwest::Client;

    /// Production transport, grounded in the teacher's `http_client.rs`
    /// (`reqwest::Client`, POST with a JSON content type, `Retry-After`
    /// read straight off the response headers).
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self { client: Client::new() }
        }
    }

    impl Default for ReqwestTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            let response = self
                .client
                .post(&request.url)
                .header("Content-Type", "application/json")
                .body(request.body)
                .send()
                .await
                .map_err(|e| TransportError(e.into()))?;

            let status = response.status().as_u16();
            let retry_after_seconds = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.bytes().await.map_err(|e| TransportError(e.into()))?.to_vec();

            Ok(TransportResponse {
                status,
                body,
                retry_after_seconds,
            })
        }
    }
}
