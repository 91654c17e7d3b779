use crate::config::{AppConfig, PositionBase};
use crate::discount::{self, Move, ProductRef};
use crate::http::build_client;
use crate::lock::RunLocks;
use crate::models::{ModeChange, PlannedMove, ReorderReport, ReorderRequest, StageReport};
use crate::shopify::{CollectionSnapshot, Paging, ShopifyClient, ShopifyError, UserError};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

const PREVIEW_SUMMARY_LEN: usize = 5;

/// A validated trigger: a non-empty collection id and the dry-run switch.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub collection_id: String,
    pub dry_run: bool,
}

/// Parses a raw request body. A body that is itself a JSON string holding the
/// object is unwrapped once.
pub fn parse_request(body: &[u8]) -> Result<RunRequest, PipelineError> {
    let missing_id = || {
        PipelineError::invalid_input("request", "collectionId is required")
            .with_code("collection_id_required")
    };
    let invalid_json = |err: serde_json::Error| {
        PipelineError::invalid_input("request", format!("invalid JSON: {err}"))
            .with_code("invalid_json")
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(missing_id());
    }
    let mut value: Value = serde_json::from_slice(body).map_err(invalid_json)?;
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner).map_err(invalid_json)?;
    }
    let request: ReorderRequest = serde_json::from_value(value).map_err(invalid_json)?;
    let collection_id = request
        .collection_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(missing_id)?;
    Ok(RunRequest {
        collection_id,
        dry_run: request.dry_run,
    })
}

#[derive(Clone)]
pub struct Pipeline {
    shopify: Option<Arc<ShopifyClient>>,
    position_base: PositionBase,
    locks: RunLocks,
}

impl Pipeline {
    pub fn new(config: &AppConfig, locks: RunLocks) -> Self {
        let shopify = config.shopify.connection().map(|connection| {
            Arc::new(ShopifyClient::new(
                build_client(&config.http),
                connection,
                Paging::from(&config.shopify),
            ))
        });
        Self {
            shopify,
            position_base: config.shopify.position_base,
            locks,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.shopify.is_some()
    }

    pub fn lock_backend(&self) -> &'static str {
        self.locks.backend()
    }

    /// Reads, ranks and reorders one collection.
    ///
    /// Remote user errors from either mutation come back inside an `ok: false` report.
    /// Everything else that stops the run is a [`PipelineError`].
    pub async fn run(&self, request: RunRequest) -> Result<ReorderReport, PipelineError> {
        let client = self.shopify.clone().ok_or_else(|| {
            PipelineError::configuration("config", "Missing SHOP or ADMIN_TOKEN environment variables")
        })?;
        let lease = self
            .locks
            .acquire(&request.collection_id)
            .await
            .map_err(|err| PipelineError::conflict("lock", err.to_string()))?;

        info!(
            target: "reorder.pipeline",
            collection_id = %request.collection_id,
            dry_run = request.dry_run,
            "reorder_run_started"
        );
        let result = self.run_locked(&client, &request).await;
        lease.release().await;

        match &result {
            Ok(report) => {
                crate::metrics::record_run(report.ok, report.moved);
                info!(
                    target: "reorder.pipeline",
                    collection_id = %report.collection_id,
                    ok = report.ok,
                    moved = report.moved,
                    job = report.job.as_deref().unwrap_or("-"),
                    "reorder_run_finished"
                );
            }
            Err(err) => {
                crate::metrics::record_run(false, 0);
                warn!(
                    target: "reorder.pipeline",
                    collection_id = %request.collection_id,
                    stage = err.stage(),
                    error = %err,
                    "reorder_run_failed"
                );
            }
        }
        result
    }

    async fn run_locked(
        &self,
        client: &ShopifyClient,
        request: &RunRequest,
    ) -> Result<ReorderReport, PipelineError> {
        let collection_id = request.collection_id.as_str();
        let mut stages = Vec::new();

        let snapshot = self
            .capture_stage("fetch_collection", &mut stages, async {
                stages::fetch_collection(client, collection_id).await
            })
            .await?;
        let mut mode_change = ModeChange::from_current(snapshot.sort_order);

        let ranked = self
            .capture_stage("rank_products", &mut stages, async move {
                stages::rank_products(snapshot.products)
            })
            .await?;

        let mut report = ReorderReport {
            ok: true,
            collection_id: collection_id.to_string(),
            moved: 0,
            mode_change: mode_change.clone(),
            errors: Vec::new(),
            job: None,
            dry_run: request.dry_run,
            preview: None,
            message: None,
            stages: Vec::new(),
        };

        if ranked.is_empty() {
            report.message = Some("No products found in collection".into());
            report.stages = stages;
            return Ok(report);
        }

        let moves = discount::build_moves(&ranked, self.position_base);

        if request.dry_run {
            report.preview = Some(
                ranked
                    .iter()
                    .zip(&moves)
                    .map(|(product, mv)| PlannedMove {
                        id: mv.id.clone(),
                        new_position: mv.new_position,
                        discount_percent: product.discount_percent,
                    })
                    .collect(),
            );
            report.message = Some(format!(
                "dry run: {} products ranked, no changes submitted",
                moves.len()
            ));
            report.stages = stages;
            return Ok(report);
        }

        if mode_change.needed {
            let user_errors = self
                .capture_stage("ensure_manual_sort", &mut stages, async {
                    stages::ensure_manual_sort(client, collection_id).await
                })
                .await?;
            if !user_errors.is_empty() {
                mode_change.succeeded = Some(false);
                report.ok = false;
                report.mode_change = mode_change;
                report.errors = user_errors;
                report.stages = stages;
                return Ok(report);
            }
            mode_change.succeeded = Some(true);
        }

        let outcome = self
            .capture_stage("reorder_products", &mut stages, async {
                stages::reorder_products(client, collection_id, &moves).await
            })
            .await?;

        report.ok = outcome.user_errors.is_empty();
        report.moved = moves.len();
        report.mode_change = mode_change;
        report.errors = outcome.user_errors;
        report.job = outcome.job_id;
        report.stages = stages;
        Ok(report)
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::record_stage(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

pub(crate) mod stages {
    use super::*;
    use crate::shopify::ReorderOutcome;

    pub async fn fetch_collection(
        client: &ShopifyClient,
        collection_id: &str,
    ) -> Result<StageOutcome<CollectionSnapshot>, PipelineError> {
        let snapshot = client
            .fetch_collection(collection_id)
            .await
            .map_err(|err| PipelineError::from_shopify("fetch_collection", err))?;
        let output = json!({
            "collection": snapshot.id,
            "sort_order": snapshot.sort_order,
            "pages": snapshot.pages,
            "products": snapshot.products.len(),
        });
        Ok(StageOutcome::new(snapshot, output))
    }

    pub fn rank_products(
        products: Vec<ProductRef>,
    ) -> Result<StageOutcome<Vec<ProductRef>>, PipelineError> {
        let ranked = discount::rank(products);
        let discounted = ranked
            .iter()
            .filter(|p| !p.discount_percent.is_zero())
            .count();
        let output = json!({
            "products": ranked.len(),
            "discounted": discounted,
            "top": ranked.iter().take(PREVIEW_SUMMARY_LEN).collect::<Vec<_>>(),
        });
        Ok(StageOutcome::new(ranked, output))
    }

    pub async fn ensure_manual_sort(
        client: &ShopifyClient,
        collection_id: &str,
    ) -> Result<StageOutcome<Vec<UserError>>, PipelineError> {
        let user_errors = client
            .set_manual_sort(collection_id)
            .await
            .map_err(|err| PipelineError::from_shopify("ensure_manual_sort", err))?;
        let output = json!({
            "accepted": user_errors.is_empty(),
            "user_errors": user_errors.len(),
        });
        Ok(StageOutcome::new(user_errors, output))
    }

    pub async fn reorder_products(
        client: &ShopifyClient,
        collection_id: &str,
        moves: &[Move],
    ) -> Result<StageOutcome<ReorderOutcome>, PipelineError> {
        let outcome = client
            .reorder_products(collection_id, moves)
            .await
            .map_err(|err| PipelineError::from_shopify("reorder_products", err))?;
        let output = json!({
            "moves": moves.len(),
            "job": outcome.job_id,
            "user_errors": outcome.user_errors.len(),
        });
        Ok(StageOutcome::new(outcome, output))
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    code: Option<&'static str>,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Configuration,
    NotFound,
    Conflict,
    Upstream,
}

impl PipelineError {
    fn with_kind(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            code: None,
            message: message.into(),
            kind,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::InvalidInput)
    }

    pub fn configuration(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Configuration)
    }

    pub fn conflict(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Conflict)
    }

    pub fn from_shopify(stage: &'static str, err: ShopifyError) -> Self {
        let kind = match err {
            ShopifyError::CollectionNotFound(_) => PipelineErrorKind::NotFound,
            _ => PipelineErrorKind::Upstream,
        };
        Self::with_kind(stage, err.to_string(), kind)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Machine-readable error tag for API responses.
    pub fn code(&self) -> &'static str {
        self.code.unwrap_or(match self.kind {
            PipelineErrorKind::InvalidInput => "invalid_request",
            PipelineErrorKind::Configuration => "configuration",
            PipelineErrorKind::NotFound => "collection_not_found",
            PipelineErrorKind::Conflict => "reorder_in_progress",
            PipelineErrorKind::Upstream => "upstream_error",
        })
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
