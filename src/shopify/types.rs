#![allow(dead_code)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A non-negative money amount as the Admin API reports it (a decimal string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub fn amount(self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = String;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value.is_sign_negative() && !value.is_zero() {
            Err(format!("negative money amount {value}"))
        } else {
            Ok(Self(value))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    Manual,
    BestSelling,
    AlphaAsc,
    AlphaDesc,
    PriceAsc,
    PriceDesc,
    Created,
    CreatedDesc,
    IdDesc,
    Relevance,
    #[serde(other)]
    Unknown,
}

impl SortOrder {
    pub fn is_manual(self) -> bool {
        matches!(self, SortOrder::Manual)
    }
}

#[derive(Debug, Deserialize)]
pub struct CollectionProductsData {
    pub collection: Option<CollectionPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPage {
    pub id: String,
    pub sort_order: SortOrder,
    pub products: ProductConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductConnection {
    pub edges: Vec<ProductEdge>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
pub struct ProductEdge {
    pub cursor: Option<String>,
    pub node: ProductNode,
}

#[derive(Debug, Deserialize)]
pub struct ProductNode {
    pub id: String,
    pub variants: VariantConnection,
}

#[derive(Debug, Deserialize)]
pub struct VariantConnection {
    pub nodes: Vec<VariantPrice>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantPrice {
    pub price: Price,
    pub compare_at_price: Option<Price>,
}

impl VariantPrice {
    pub fn pair(&self) -> (Decimal, Option<Decimal>) {
        (self.price.amount(), self.compare_at_price.map(Price::amount))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Field-level error attached to a mutation payload. Passed back to callers verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    #[serde(default)]
    pub field: Option<Vec<String>>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionUpdateData {
    pub collection_update: Option<CollectionUpdatePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionUpdatePayload {
    pub collection: Option<CollectionSortState>,
    pub user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSortState {
    pub id: String,
    pub sort_order: SortOrder,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderData {
    pub collection_reorder_products: Option<ReorderPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderPayload {
    pub job: Option<JobRef>,
    pub user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
pub struct JobRef {
    pub id: String,
}
