use thiserror::Error;

/// Errors that escape the dispatch core as values (the "Surfaced? Yes" rows
/// of the error taxonomy). Everything else — validation failures, consent
/// denials, parse errors on an otherwise-acknowledged response, handler
/// panics — is logged and swallowed at its boundary; see `error` docs on
/// the functions that produce them.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("request {request_id} failed with status {status}: {title}")]
    FatalHttp {
        request_id: String,
        status: u16,
        title: String,
    },
    #[error("request {request_id} returned a partial success with {error_count} error(s)")]
    PartialSuccess { request_id: String, error_count: usize },
    #[error("transport error sending request {request_id}: {source}")]
    Transport {
        request_id: String,
        #[source]
        source: anyhow::Error,
    },
}
