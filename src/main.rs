mod config;
mod discount;
mod http;
mod lock;
mod metrics;
mod models;
mod pipeline;
mod security;
mod shopify;
#[cfg(test)]
mod test_support;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::AppConfig;
use eyre::WrapErr;
use lock::RunLocks;
use models::{ApiError, ReorderReport};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AccessState, cors_layer, require_access};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const REORDER_ROUTE: &str = "/reorder-by-discount";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target: "reorder.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env().wrap_err("invalid configuration")?;
    let locks = RunLocks::from_config(&config.lock);
    let pipeline = Pipeline::new(&config, locks);
    if !pipeline.is_configured() {
        warn!(
            target: "reorder.api",
            "SHOP or ADMIN_TOKEN is not set; reorder requests will fail until configured"
        );
    }

    let addr: SocketAddr = ([0, 0, 0, 0], config.server.port).into();
    let app = build_app(AppState {
        pipeline,
        config: Arc::new(config),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    info!(target: "reorder.api", "listening on {addr}");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    config: Arc<AppConfig>,
}

fn build_app(state: AppState) -> Router {
    let access = AccessState::new(state.config.access.clone());
    let cors = cors_layer(&state.config.access);
    let body_limit = state.config.server.body_limit;

    let reorder = Router::new()
        .route(
            REORDER_ROUTE,
            post(reorder_by_discount)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route_layer(middleware::from_fn_with_state(access, require_access));

    Router::new()
        .route("/health", get(health))
        .route("/debug", get(debug))
        .merge(reorder)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Health check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
    }))
}

/// Reports which settings are present. Secret values are never echoed.
async fn debug(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    Json(json!({
        "shop_configured": config.shopify.shop.is_some(),
        "token_configured": config.shopify.access_token.is_some(),
        "endpoint_override": config.shopify.endpoint_override.is_some(),
        "ready": state.pipeline.is_configured(),
        "api_version": config.shopify.api_version,
        "position_base": config.shopify.position_base.offset(),
        "secret_configured": config.access.shared_secret.is_some(),
        "allowed_origins": config.access.allowed_origins.len(),
        "lock_backend": state.pipeline.lock_backend(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Rank a collection's products by discount and submit the new manual order.
///
/// - Method: `POST`
/// - Path: `/reorder-by-discount`
/// - Auth: `X-WB-Secret` when `WB_SECRET` is set
/// - Body: `{"collectionId": "gid://shopify/Collection/..", "dryRun": false}`
/// - Response: `ReorderReport`; `500` with the same body when the sort-mode change was refused
async fn reorder_by_discount(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<ReorderReport>), AppError> {
    crate::metrics::record_request(REORDER_ROUTE);
    let request = pipeline::parse_request(&body)?;
    info!(
        target: "reorder.api",
        collection_id = %request.collection_id,
        dry_run = request.dry_run,
        "reorder requested"
    );

    let report = state.pipeline.run(request).await?;
    let status = if report.mode_change_failed() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(report)))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> Response {
    let payload = ApiError {
        error: "method_not_allowed".into(),
        detail: Some(format!("use POST {REORDER_ROUTE}")),
    };
    (StatusCode::METHOD_NOT_ALLOWED, Json(payload)).into_response()
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
                    PipelineErrorKind::NotFound => StatusCode::NOT_FOUND,
                    PipelineErrorKind::Conflict => StatusCode::CONFLICT,
                    PipelineErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                };
                let payload = ApiError {
                    error: err.code().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "reorder.api", error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "reorder.api", error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(target: "reorder.api", "received shutdown signal, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessConfig, OriginPolicy, ShopifyConfig};
    use crate::test_support::{
        COLLECTION_ID, mount_page, mount_reorder, mount_set_manual, page, product, shopify_config,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{HeaderMap, Request, header},
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use wiremock::MockServer;

    fn app_with(shopify: ShopifyConfig, access: AccessConfig, locks: RunLocks) -> Router {
        let config = AppConfig {
            shopify,
            access,
            http: Default::default(),
            server: Default::default(),
            lock: Default::default(),
        };
        let pipeline = Pipeline::new(&config, locks);
        build_app(AppState {
            pipeline,
            config: Arc::new(config),
        })
    }

    fn app(shopify: ShopifyConfig) -> Router {
        app_with(shopify, AccessConfig::default(), RunLocks::in_process())
    }

    fn post_request() -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri(REORDER_ROUTE)
            .header(header::CONTENT_TYPE, "application/json")
    }

    fn reorder_body() -> String {
        json!({"collectionId": COLLECTION_ID}).to_string()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(app(ShopifyConfig::default()), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "discount-reorder");
    }

    #[tokio::test]
    async fn debug_never_echoes_secrets() {
        let shopify = ShopifyConfig {
            shop: Some("demo.myshopify.com".into()),
            access_token: Some("shpat_secret_value".into()),
            ..ShopifyConfig::default()
        };
        let request = Request::get("/debug").body(Body::empty()).unwrap();
        let (status, _, body) = send(app(shopify), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_configured"], true);
        assert_eq!(body["ready"], true);
        assert_eq!(body["lock_backend"], "local");
        assert!(!body.to_string().contains("shpat_secret_value"));
    }

    #[tokio::test]
    async fn other_methods_get_json_405() {
        let request = Request::get(REORDER_ROUTE).body(Body::empty()).unwrap();
        let (status, _, body) = send(app(ShopifyConfig::default()), request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "method_not_allowed");
    }

    #[tokio::test]
    async fn wrong_method_is_405_before_access_checks() {
        let access = AccessConfig {
            shared_secret: Some("s3cret".into()),
            allowed_origins: vec!["https://shop.example".into()],
            origin_policy: OriginPolicy::Reject,
        };
        let app = app_with(ShopifyConfig::default(), access, RunLocks::in_process());

        let get = Request::get(REORDER_ROUTE).body(Body::empty()).unwrap();
        let (status, _, body) = send(app.clone(), get).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "method_not_allowed");

        let put = Request::builder()
            .method("PUT")
            .uri(REORDER_ROUTE)
            .header(header::ORIGIN, "https://evil.example")
            .body(Body::from(reorder_body()))
            .unwrap();
        let (status, _, body) = send(app, put).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "method_not_allowed");
    }

    #[tokio::test]
    async fn plain_options_is_ok_even_with_a_secret() {
        let access = AccessConfig {
            shared_secret: Some("s3cret".into()),
            ..AccessConfig::default()
        };
        let request = Request::builder()
            .method("OPTIONS")
            .uri(REORDER_ROUTE)
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(
            app_with(ShopifyConfig::default(), access, RunLocks::in_process()),
            request,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn preflight_grants_listed_origin_with_credentials() {
        let access = AccessConfig {
            allowed_origins: vec!["https://shop.example".into()],
            ..AccessConfig::default()
        };
        let request = Request::builder()
            .method("OPTIONS")
            .uri(REORDER_ROUTE)
            .header(header::ORIGIN, "https://shop.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(
            app_with(ShopifyConfig::default(), access, RunLocks::in_process()),
            request,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://shop.example"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[tokio::test]
    async fn restrict_policy_serves_but_withholds_cors_grant() {
        let access = AccessConfig {
            allowed_origins: vec!["https://shop.example".into()],
            origin_policy: OriginPolicy::Restrict,
            ..AccessConfig::default()
        };
        let request = post_request()
            .header(header::ORIGIN, "https://evil.example")
            .body(Body::from("{}"))
            .unwrap();
        let (status, headers, body) = send(
            app_with(ShopifyConfig::default(), access, RunLocks::in_process()),
            request,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "collection_id_required");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn reject_policy_refuses_unlisted_origin() {
        let access = AccessConfig {
            allowed_origins: vec!["https://shop.example".into()],
            origin_policy: OriginPolicy::Reject,
            ..AccessConfig::default()
        };
        let request = post_request()
            .header(header::ORIGIN, "https://evil.example")
            .body(Body::from(reorder_body()))
            .unwrap();
        let (status, _, body) = send(
            app_with(ShopifyConfig::default(), access, RunLocks::in_process()),
            request,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "origin_not_allowed");
    }

    #[tokio::test]
    async fn shared_secret_is_enforced() {
        let access = AccessConfig {
            shared_secret: Some("s3cret".into()),
            ..AccessConfig::default()
        };
        let app = app_with(ShopifyConfig::default(), access, RunLocks::in_process());

        let missing = post_request().body(Body::from(reorder_body())).unwrap();
        let (status, _, body) = send(app.clone(), missing).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let wrong = post_request()
            .header("X-WB-Secret", "nope")
            .body(Body::from(reorder_body()))
            .unwrap();
        let (status, _, _) = send(app.clone(), wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Passes the gate, then stops at the missing connection settings.
        let right = post_request()
            .header("X-WB-Secret", "s3cret")
            .body(Body::from(reorder_body()))
            .unwrap();
        let (status, _, body) = send(app, right).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "configuration");
    }

    #[tokio::test]
    async fn malformed_bodies_are_rejected() {
        let app = app(ShopifyConfig::default());

        let bad = post_request().body(Body::from("{oops")).unwrap();
        let (status, _, body) = send(app.clone(), bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_json");

        let blank = post_request()
            .body(Body::from(r#"{"collectionId": "   "}"#))
            .unwrap();
        let (status, _, body) = send(app, blank).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "collection_id_required");
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let config = AppConfig {
            shopify: ShopifyConfig::default(),
            access: AccessConfig::default(),
            http: Default::default(),
            server: config::ServerConfig {
                port: 0,
                body_limit: 16,
            },
            lock: Default::default(),
        };
        let pipeline = Pipeline::new(&config, RunLocks::in_process());
        let app = build_app(AppState {
            pipeline,
            config: Arc::new(config),
        });
        let request = post_request().body(Body::from(reorder_body())).unwrap();
        let (status, _, _) = send(app, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn full_run_switches_mode_and_reorders() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            None,
            page(
                "BEST_SELLING",
                vec![
                    product("gid://shopify/Product/1", &[("50.00", Some("50.00"))]),
                    product("gid://shopify/Product/2", &[("80.00", Some("100.00"))]),
                ],
                Some("c1"),
            ),
        )
        .await;
        mount_page(
            &server,
            Some("c1"),
            page(
                "BEST_SELLING",
                vec![product("gid://shopify/Product/3", &[("25.00", Some("100.00"))])],
                None,
            ),
        )
        .await;
        mount_set_manual(&server, json!([]), 1).await;
        mount_reorder(&server, Some("gid://shopify/Job/77"), json!([]), 1).await;

        let request = post_request()
            .header(header::ORIGIN, "https://anywhere.example")
            .body(Body::from(reorder_body()))
            .unwrap();
        let (status, headers, body) = send(app(shopify_config(&server)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["moved"], 3);
        assert_eq!(body["job"], "gid://shopify/Job/77");
        assert_eq!(body["mode_change"]["previous"], "BEST_SELLING");
        assert_eq!(body["mode_change"]["succeeded"], true);
        assert_eq!(body["errors"], json!([]));
        assert_eq!(body["stages"].as_array().map(Vec::len), Some(4));
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn refused_mode_change_answers_500_with_report() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            None,
            page("ALPHA_ASC", vec![product("P", &[("1.00", Some("2.00"))])], None),
        )
        .await;
        mount_set_manual(
            &server,
            json!([{"field": ["sortOrder"], "message": "Access denied"}]),
            1,
        )
        .await;
        mount_reorder(&server, None, json!([]), 0).await;

        let request = post_request().body(Body::from(reorder_body())).unwrap();
        let (status, _, body) = send(app(shopify_config(&server)), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], false);
        assert_eq!(body["moved"], 0);
        assert_eq!(body["errors"][0]["message"], "Access denied");
    }

    #[tokio::test]
    async fn unknown_collection_is_404() {
        let server = MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"collection": null}})),
            )
            .mount(&server)
            .await;

        let request = post_request().body(Body::from(reorder_body())).unwrap();
        let (status, _, body) = send(app(shopify_config(&server)), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "collection_not_found");
    }

    #[tokio::test]
    async fn concurrent_run_on_same_collection_is_409() {
        let server = MockServer::start().await;
        let locks = RunLocks::in_process();
        let app = app_with(shopify_config(&server), AccessConfig::default(), locks.clone());
        let lease = locks.acquire(COLLECTION_ID).await.expect("lease");

        let request = post_request().body(Body::from(reorder_body())).unwrap();
        let (status, _, body) = send(app, request).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "reorder_in_progress");
        lease.release().await;
    }
}
