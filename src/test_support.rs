use crate::config::{PositionBase, ShopifyConfig};
use crate::http::build_client;
use crate::shopify::{Paging, ShopifyClient};
use serde_json::{Value, json};
use wiremock::matchers::{PathExactMatcher, body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const COLLECTION_ID: &str = "gid://shopify/Collection/4242";

pub fn graphql_path() -> PathExactMatcher {
    path("/graphql.json")
}

pub fn shopify_config(server: &MockServer) -> ShopifyConfig {
    ShopifyConfig {
        access_token: Some("shpat_test".into()),
        endpoint_override: Some(format!("{}/graphql.json", server.uri())),
        position_base: PositionBase::One,
        ..ShopifyConfig::default()
    }
}

pub fn test_client(server: &MockServer) -> ShopifyClient {
    test_client_with(&shopify_config(server))
}

pub fn test_client_with(config: &ShopifyConfig) -> ShopifyClient {
    let connection = config.connection().expect("test connection");
    ShopifyClient::new(
        build_client(&Default::default()),
        connection,
        Paging::from(config),
    )
}

pub fn product(id: &str, variants: &[(&str, Option<&str>)]) -> Value {
    let nodes: Vec<Value> = variants
        .iter()
        .map(|(price, compare)| json!({"price": price, "compareAtPrice": compare}))
        .collect();
    json!({
        "cursor": format!("cursor-{id}"),
        "node": {
            "id": id,
            "variants": {"nodes": nodes}
        }
    })
}

pub fn page(sort_order: &str, edges: Vec<Value>, next_cursor: Option<&str>) -> Value {
    json!({
        "data": {
            "collection": {
                "id": COLLECTION_ID,
                "sortOrder": sort_order,
                "products": {
                    "edges": edges,
                    "pageInfo": {
                        "hasNextPage": next_cursor.is_some(),
                        "endCursor": next_cursor,
                    }
                }
            }
        }
    })
}

/// Serves `body` for the products query issued with `after: cursor`.
pub async fn mount_page(server: &MockServer, cursor: Option<&str>, body: Value) {
    Mock::given(method("POST"))
        .and(graphql_path())
        .and(body_string_contains("CollectionProducts"))
        .and(body_partial_json(json!({"variables": {"cursor": cursor}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

pub async fn mount_set_manual(server: &MockServer, user_errors: Value, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(graphql_path())
        .and(body_string_contains("collectionUpdate"))
        .and(body_partial_json(
            json!({"variables": {"input": {"sortOrder": "MANUAL"}}}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "collectionUpdate": {
                    "collection": {"id": COLLECTION_ID, "sortOrder": "MANUAL"},
                    "userErrors": user_errors,
                }
            }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mount_reorder(
    server: &MockServer,
    job_id: Option<&str>,
    user_errors: Value,
    expected_calls: u64,
) {
    let job = job_id.map(|id| json!({"id": id}));
    Mock::given(method("POST"))
        .and(graphql_path())
        .and(body_string_contains("collectionReorderProducts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "collectionReorderProducts": {
                    "job": job,
                    "userErrors": user_errors,
                }
            }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}
