use crate::config::{AccessConfig, OriginPolicy};
use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{convert::Infallible, sync::Arc, time::Duration};
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

pub const SECRET_HEADER: &str = "x-wb-secret";
const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86_400);

#[derive(Clone)]
pub struct AccessState {
    config: Arc<AccessConfig>,
}

impl AccessState {
    pub fn new(config: AccessConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn secret_matches(&self, presented: Option<&str>) -> bool {
        match self.config.shared_secret.as_deref() {
            None => true,
            Some(expected) => presented
                .is_some_and(|value| bool::from(value.as_bytes().ct_eq(expected.as_bytes()))),
        }
    }

    fn origin_refused(&self, origin: Option<&str>) -> bool {
        self.config.origin_policy == OriginPolicy::Reject
            && origin.is_some_and(|origin| !self.config.origin_allowed(origin))
    }
}

/// Gatekeeper for the reorder route: origin policy first, then the shared secret.
/// Only `POST` is checked; `OPTIONS` and wrong methods reach their handlers untouched,
/// so a wrong method answers 405 whatever the credentials.
pub async fn require_access(
    State(state): State<AccessState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    if request.method() != Method::POST {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();
    let origin = header_str(headers, http::header::ORIGIN);
    if state.origin_refused(origin) {
        warn!(target: "reorder.api", origin = origin.unwrap_or("-"), "origin_rejected");
        return Ok(error_response(
            StatusCode::FORBIDDEN,
            "origin_not_allowed",
            "Origin is not in the allow-list",
        ));
    }

    if !state.secret_matches(header_str(headers, HeaderName::from_static(SECRET_HEADER))) {
        warn!(target: "reorder.api", "shared_secret_mismatch");
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Missing or invalid X-WB-Secret header",
        ));
    }

    Ok(next.run(request).await)
}

/// CORS grants. An empty allow-list answers any origin without credentials;
/// otherwise only listed origins are echoed back, with credentials.
pub fn cors_layer(config: &AccessConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            http::header::CONTENT_TYPE,
            HeaderName::from_static(SECRET_HEADER),
        ])
        .max_age(PREFLIGHT_MAX_AGE);

    if config.allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(target: "reorder.api", origin = %origin, "allowed_origin_unusable");
                None
            }
        })
        .collect();
    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

fn header_str(headers: &http::HeaderMap, name: HeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}
