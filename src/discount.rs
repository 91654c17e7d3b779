//! Discount arithmetic and the ranking that drives a collection reorder.
//!
//! Everything here is pure: the collection reader feeds [`ProductRef`]s in, the
//! submitter takes [`Move`]s out.

use crate::config::PositionBase;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};

/// A product reduced to the one signal the ranking cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRef {
    pub id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount_percent: Decimal,
}

/// One position assignment inside a manually sorted collection.
///
/// `newPosition` is an `UnsignedInt64` on the platform side, which travels as a string.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    pub id: String,
    #[serde_as(as = "DisplayFromStr")]
    pub new_position: u64,
}

/// Percentage saved against the compare-at price.
///
/// Zero unless `compare_at_price` is strictly above both `price` and zero, so the
/// result is never negative.
pub fn discount_percent(price: Decimal, compare_at_price: Option<Decimal>) -> Decimal {
    match compare_at_price {
        Some(compare) if compare > price && compare > Decimal::ZERO => {
            (compare - price) / compare * Decimal::ONE_HUNDRED
        }
        _ => Decimal::ZERO,
    }
}

/// Best deal across a product's variants. A product without variants scores zero.
pub fn max_discount<I>(variants: I) -> Decimal
where
    I: IntoIterator<Item = (Decimal, Option<Decimal>)>,
{
    variants
        .into_iter()
        .map(|(price, compare)| discount_percent(price, compare))
        .max()
        .unwrap_or(Decimal::ZERO)
}

/// Orders products by discount, highest first.
///
/// The sort is stable: equal discounts keep the order the reader emitted them in,
/// which makes repeated runs over unchanged data produce the same ordering.
pub fn rank(mut products: Vec<ProductRef>) -> Vec<ProductRef> {
    products.sort_by(|a, b| b.discount_percent.cmp(&a.discount_percent));
    products
}

pub fn build_moves(ranked: &[ProductRef], base: PositionBase) -> Vec<Move> {
    ranked
        .iter()
        .enumerate()
        .map(|(index, product)| Move {
            id: product.id.clone(),
            new_position: index as u64 + base.offset(),
        })
        .collect()
}
