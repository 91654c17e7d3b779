//! Admin GraphQL access for collection reordering.
//!
//! All three operations go through [`ShopifyClient::execute`], which decodes the
//! response into typed structs once at the boundary. A shape mismatch surfaces as
//! [`ShopifyError::Decode`] instead of being papered over downstream.

pub mod client;
pub mod collection;
pub mod mutations;
pub mod queries;
pub mod types;

pub use client::{Paging, ShopifyClient};
pub use collection::CollectionSnapshot;
pub use mutations::ReorderOutcome;
pub use types::{SortOrder, UserError};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShopifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("GraphQL errors: {}", format_graphql_errors(.0))]
    Graphql(Vec<GraphqlError>),

    #[error("could not decode {operation} response: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("pagination limit reached for {collection_id}: exceeded {max_pages} pages")]
    PaginationLimit {
        collection_id: String,
        max_pages: usize,
    },
}

/// Top-level GraphQL error (throttling, bad ids, schema mismatches).
#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<GraphqlErrorExtensions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlErrorExtensions {
    /// Machine code such as `THROTTLED` or `ACCESS_DENIED`.
    #[serde(default)]
    pub code: Option<String>,
}

impl GraphqlError {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.code.as_deref()
    }
}

fn format_graphql_errors(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|e| match e.code() {
            Some(code) => format!("{} ({code})", e.message),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
