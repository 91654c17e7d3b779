use super::{GraphqlError, ShopifyError};
use crate::config::{ShopifyConfig, ShopifyConnection};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";
const ERROR_BODY_PREVIEW: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub page_size: u32,
    pub variants_per_product: u32,
    pub max_pages: usize,
}

impl From<&ShopifyConfig> for Paging {
    fn from(config: &ShopifyConfig) -> Self {
        Self {
            page_size: config.page_size,
            variants_per_product: config.variants_per_product,
            max_pages: config.max_pages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShopifyClient {
    http: Client,
    endpoint: String,
    access_token: String,
    pub(crate) paging: Paging,
}

#[derive(Serialize)]
struct GraphqlRequest<'a, V> {
    query: &'a str,
    variables: V,
}

#[derive(Deserialize)]
struct GraphqlEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

impl ShopifyClient {
    pub fn new(http: Client, connection: ShopifyConnection, paging: Paging) -> Self {
        Self {
            http,
            endpoint: connection.endpoint,
            access_token: connection.access_token,
            paging,
        }
    }

    /// Sends one GraphQL operation and decodes its `data` into `T`.
    ///
    /// Top-level `errors` win over `data`: a response carrying both is an error.
    pub async fn execute<V, T>(
        &self,
        operation: &'static str,
        query: &str,
        variables: V,
    ) -> Result<T, ShopifyError>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        debug!(target: "reorder.shopify", operation, "graphql_request");
        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .json(&GraphqlRequest { query, variables })
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes)
                .chars()
                .take(ERROR_BODY_PREVIEW)
                .collect::<String>();
            warn!(target: "reorder.shopify", operation, status = status.as_u16(), "graphql_http_error");
            return Err(ShopifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GraphqlEnvelope =
            serde_json::from_slice(&bytes).map_err(|err| ShopifyError::Decode {
                operation,
                reason: err.to_string(),
            })?;

        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            warn!(target: "reorder.shopify", operation, count = errors.len(), "graphql_errors");
            return Err(ShopifyError::Graphql(errors));
        }

        let data = envelope
            .data
            .filter(|data| !data.is_null())
            .ok_or_else(|| ShopifyError::Decode {
                operation,
                reason: "response has no data".into(),
            })?;

        serde_json::from_value(data).map_err(|err| ShopifyError::Decode {
            operation,
            reason: err.to_string(),
        })
    }
}
