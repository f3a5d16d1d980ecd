use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use pkg_constants::api::REQUEST_ID_HEADER;
use tracing::{Instrument, info_span};
use uuid::Uuid;

/// Middleware: runs the request inside an `api_request` span carrying a
/// fresh request id, and returns that id in `x-request-id`.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "api_request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
