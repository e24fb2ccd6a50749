use crate::logging::MAX_BODY_BYTES;
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rtmon_common::signing::{self, HASH_HEADER};

/// `HashSHA256` middleware.
///
/// With a key configured, a request carrying the header must match the HMAC
/// of its body as received (still compressed) or it gets 400; requests
/// without the header pass. Successful responses are signed over their
/// uncompressed body. Without a key the middleware is a pass-through.
pub async fn verify_and_sign(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(key) = state.key.clone() else {
        return next.run(req).await;
    };

    let req = match req.headers().get(HASH_HEADER) {
        Some(value) => {
            let claimed = value.to_str().unwrap_or_default().to_string();
            let (parts, body) = req.into_parts();
            let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
            };
            if !signing::verify(&key, &bytes, &claimed) {
                tracing::warn!(path = %parts.uri.path(), "Request signature mismatch");
                return (StatusCode::BAD_REQUEST, "signature mismatch").into_response();
            }
            Request::from_parts(parts, Body::from(bytes))
        }
        None => req,
    };

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Cannot buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match signing::sign(&key, &bytes) {
        Ok(sig) => {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(HASH_HEADER.as_bytes()),
                HeaderValue::from_str(&sig),
            ) {
                parts.headers.insert(name, value);
            }
        }
        Err(e) => tracing::error!(error = %e, "Cannot sign response"),
    }
    Response::from_parts(parts, Body::from(bytes))
}
