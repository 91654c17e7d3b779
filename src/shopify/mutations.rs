use super::queries::{REORDER_MUTATION, SET_MANUAL_MUTATION};
use super::types::{CollectionUpdateData, ReorderData, SortOrder, UserError};
use super::{ShopifyClient, ShopifyError};
use crate::discount::Move;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ReorderOutcome {
    pub job_id: Option<String>,
    pub user_errors: Vec<UserError>,
}

#[derive(Serialize)]
struct SetManualVars<'a> {
    input: CollectionSortInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionSortInput<'a> {
    id: &'a str,
    sort_order: SortOrder,
}

#[derive(Serialize)]
struct ReorderVars<'a> {
    id: &'a str,
    moves: &'a [Move],
}

impl ShopifyClient {
    /// Switches the collection to `MANUAL` sorting. Returns the payload's user errors;
    /// an empty list means the switch was accepted.
    pub async fn set_manual_sort(&self, collection_id: &str) -> Result<Vec<UserError>, ShopifyError> {
        let vars = SetManualVars {
            input: CollectionSortInput {
                id: collection_id,
                sort_order: SortOrder::Manual,
            },
        };
        let data: CollectionUpdateData = self.execute("SetManual", SET_MANUAL_MUTATION, vars).await?;
        let payload = data.collection_update.ok_or_else(|| ShopifyError::Decode {
            operation: "SetManual",
            reason: "collectionUpdate payload is null".into(),
        })?;
        if payload.user_errors.is_empty() {
            info!(target: "reorder.shopify", collection_id, "sort_order_set_manual");
        } else {
            warn!(
                target: "reorder.shopify",
                collection_id,
                errors = payload.user_errors.len(),
                "sort_order_change_rejected"
            );
        }
        Ok(payload.user_errors)
    }

    /// Submits every move in a single `collectionReorderProducts` call.
    ///
    /// The platform finishes the reorder asynchronously; the returned job id is
    /// handed back as-is and never polled.
    pub async fn reorder_products(
        &self,
        collection_id: &str,
        moves: &[Move],
    ) -> Result<ReorderOutcome, ShopifyError> {
        let vars = ReorderVars {
            id: collection_id,
            moves,
        };
        let data: ReorderData = self.execute("Reorder", REORDER_MUTATION, vars).await?;
        let payload = data
            .collection_reorder_products
            .ok_or_else(|| ShopifyError::Decode {
                operation: "Reorder",
                reason: "collectionReorderProducts payload is null".into(),
            })?;
        let outcome = ReorderOutcome {
            job_id: payload.job.map(|job| job.id),
            user_errors: payload.user_errors,
        };
        if outcome.user_errors.is_empty() {
            info!(
                target: "reorder.shopify",
                collection_id,
                moves = moves.len(),
                job_id = outcome.job_id.as_deref().unwrap_or("-"),
                "reorder_submitted"
            );
        } else {
            warn!(
                target: "reorder.shopify",
                collection_id,
                errors = outcome.user_errors.len(),
                "reorder_rejected"
            );
        }
        Ok(outcome)
    }
}
