use super::queries::COLLECTION_PRODUCTS_QUERY;
use super::types::{CollectionProductsData, SortOrder, VariantPrice};
use super::{ShopifyClient, ShopifyError};
use crate::discount::{ProductRef, max_discount};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

const OPERATION: &str = "CollectionProducts";

/// Every product of a collection, reduced to ranking signals, plus the sort mode
/// reported on the first page.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    pub id: String,
    pub sort_order: SortOrder,
    pub products: Vec<ProductRef>,
    pub pages: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectionProductsVars<'a> {
    id: &'a str,
    cursor: Option<&'a str>,
    first: u32,
    variants_first: u32,
}

impl ShopifyClient {
    /// Walks the collection's product connection until `hasNextPage` is false.
    ///
    /// Products keep API order. An id seen on an earlier page is skipped, so
    /// overlapping page boundaries never produce duplicates. Any failing page aborts
    /// the whole read and nothing collected so far is returned.
    pub async fn fetch_collection(
        &self,
        collection_id: &str,
    ) -> Result<CollectionSnapshot, ShopifyError> {
        let paging = self.paging;
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        let mut products = Vec::new();
        let mut first_page: Option<(String, SortOrder)> = None;
        let mut pages = 0usize;

        loop {
            if pages >= paging.max_pages {
                return Err(ShopifyError::PaginationLimit {
                    collection_id: collection_id.to_string(),
                    max_pages: paging.max_pages,
                });
            }

            let vars = CollectionProductsVars {
                id: collection_id,
                cursor: cursor.as_deref(),
                first: paging.page_size,
                variants_first: paging.variants_per_product,
            };
            let data: CollectionProductsData = self
                .execute(OPERATION, COLLECTION_PRODUCTS_QUERY, vars)
                .await?;
            let page = data
                .collection
                .ok_or_else(|| ShopifyError::CollectionNotFound(collection_id.to_string()))?;
            pages += 1;

            if first_page.is_none() {
                first_page = Some((page.id.clone(), page.sort_order));
            }

            let edge_count = page.products.edges.len();
            for edge in page.products.edges {
                let node = edge.node;
                if !seen.insert(node.id.clone()) {
                    debug!(target: "reorder.shopify", product_id = %node.id, "duplicate_product_skipped");
                    continue;
                }
                let discount_percent = max_discount(node.variants.nodes.iter().map(VariantPrice::pair));
                products.push(ProductRef {
                    id: node.id,
                    discount_percent,
                });
            }
            debug!(
                target: "reorder.shopify",
                collection_id,
                page = pages,
                edges = edge_count,
                total = products.len(),
                "collection_page_read"
            );

            let info = page.products.page_info;
            match (info.has_next_page, info.end_cursor) {
                (false, _) => break,
                (true, Some(next)) => cursor = Some(next),
                (true, None) => {
                    return Err(ShopifyError::Decode {
                        operation: OPERATION,
                        reason: "hasNextPage is true but endCursor is missing".into(),
                    });
                }
            }
        }

        let (id, sort_order) =
            first_page.unwrap_or_else(|| (collection_id.to_string(), SortOrder::Unknown));
        info!(
            target: "reorder.shopify",
            collection_id,
            pages,
            products = products.len(),
            sort_order = ?sort_order,
            "collection_read"
        );
        Ok(CollectionSnapshot {
            id,
            sort_order,
            products,
            pages,
        })
    }
}
