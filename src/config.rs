use std::env;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_API_VERSION: &str = "2025-10";
pub const MAX_PAGE_SIZE: u32 = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: `{value}` ({expected})")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Everything the service needs, read once at startup and handed down by value.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub shopify: ShopifyConfig,
    pub access: AccessConfig,
    pub http: HttpConfig,
    pub server: ServerConfig,
    pub lock: LockConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let shopify = ShopifyConfig::from_env()?;
        let http = HttpConfig::from_env();
        let lock = LockConfig::from_env().covering(max_run_secs(&shopify, &http));
        Ok(Self {
            shopify,
            access: AccessConfig::from_env()?,
            http,
            server: ServerConfig::from_env(),
            lock,
        })
    }
}

/// Longest a run can take inside its bounds: every page read plus both mutations,
/// each at the full request timeout.
pub fn max_run_secs(shopify: &ShopifyConfig, http: &HttpConfig) -> u64 {
    (shopify.max_pages as u64)
        .saturating_add(2)
        .saturating_mul(http.timeout_secs)
}

#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub shop: Option<String>,
    pub access_token: Option<String>,
    pub api_version: String,
    pub endpoint_override: Option<String>,
    pub page_size: u32,
    pub variants_per_product: u32,
    pub max_pages: usize,
    pub position_base: PositionBase,
}

/// Connection settings that passed validation; only these reach the GraphQL client.
#[derive(Debug, Clone)]
pub struct ShopifyConnection {
    pub endpoint: String,
    pub access_token: String,
}

impl ShopifyConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let position_base = match non_empty_var("POSITION_BASE") {
            Some(raw) => PositionBase::parse(&raw).ok_or(ConfigError::Invalid {
                key: "POSITION_BASE",
                value: raw,
                expected: "0 or 1",
            })?,
            None => PositionBase::default(),
        };
        Ok(Self {
            shop: non_empty_var("SHOP"),
            access_token: non_empty_var("ADMIN_TOKEN"),
            api_version: non_empty_var("API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            endpoint_override: non_empty_var("SHOPIFY_GRAPHQL_URL"),
            page_size: parse_var::<u32>("PAGE_SIZE")
                .unwrap_or(MAX_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
            variants_per_product: parse_var::<u32>("VARIANTS_PER_PRODUCT")
                .unwrap_or(50)
                .clamp(1, MAX_PAGE_SIZE),
            max_pages: parse_var::<usize>("MAX_PAGES")
                .filter(|v| *v > 0)
                .unwrap_or(400),
            position_base,
        })
    }

    /// Returns `None` when `SHOP` or `ADMIN_TOKEN` is missing. An explicit endpoint
    /// override stands in for `SHOP`.
    pub fn connection(&self) -> Option<ShopifyConnection> {
        let access_token = self.access_token.clone()?;
        let endpoint = match (&self.endpoint_override, &self.shop) {
            (Some(url), _) => url.clone(),
            (None, Some(shop)) => format!(
                "https://{}/admin/api/{}/graphql.json",
                shop.trim_end_matches('/'),
                self.api_version
            ),
            (None, None) => return None,
        };
        Some(ShopifyConnection {
            endpoint,
            access_token,
        })
    }
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            shop: None,
            access_token: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            endpoint_override: None,
            page_size: MAX_PAGE_SIZE,
            variants_per_product: 50,
            max_pages: 400,
            position_base: PositionBase::default(),
        }
    }
}

/// Index of the first slot in a manual collection ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PositionBase {
    Zero,
    #[default]
    One,
}

impl PositionBase {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "0" => Some(Self::Zero),
            "1" => Some(Self::One),
            _ => None,
        }
    }

    pub fn offset(self) -> u64 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Serve the request but withhold CORS grants from unlisted origins.
    #[default]
    Restrict,
    /// Refuse requests from unlisted origins outright.
    Reject,
}

impl OriginPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "restrict" => Some(Self::Restrict),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccessConfig {
    pub shared_secret: Option<String>,
    pub allowed_origins: Vec<String>,
    pub origin_policy: OriginPolicy,
}

impl AccessConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let origin_policy = match non_empty_var("ORIGIN_POLICY") {
            Some(raw) => OriginPolicy::parse(&raw).ok_or(ConfigError::Invalid {
                key: "ORIGIN_POLICY",
                value: raw,
                expected: "restrict or reject",
            })?,
            None => OriginPolicy::default(),
        };
        Ok(Self {
            shared_secret: non_empty_var("WB_SECRET"),
            allowed_origins: parse_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_default()),
            origin_policy,
        })
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty()
            || self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl HttpConfig {
    fn from_env() -> Self {
        Self {
            timeout_secs: parse_var("HTTP_TIMEOUT_SECS").unwrap_or(30),
            connect_timeout_secs: parse_var("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub body_limit: usize,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            port: parse_var("PORT").unwrap_or(8000),
            body_limit: parse_var::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(64 * 1024),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            body_limit: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub redis_url: Option<String>,
    pub ttl_secs: u64,
}

impl LockConfig {
    fn from_env() -> Self {
        Self {
            redis_url: non_empty_var("REDIS_URL"),
            ttl_secs: parse_var::<u64>("LOCK_TTL_SECS")
                .filter(|v| *v > 0)
                .unwrap_or(300),
        }
    }
}

impl LockConfig {
    /// Raises the TTL to `max_run_secs` so a lease cannot lapse while its run is still
    /// within the page and timeout bounds.
    pub fn covering(mut self, max_run_secs: u64) -> Self {
        if self.ttl_secs < max_run_secs {
            warn!(
                target: "reorder.lock",
                configured = self.ttl_secs,
                effective = max_run_secs,
                "LOCK_TTL_SECS below MAX_PAGES x HTTP_TIMEOUT_SECS; raising it"
            );
            self.ttl_secs = max_run_secs;
        }
        self
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: 300,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
