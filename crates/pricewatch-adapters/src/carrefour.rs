use async_trait::async_trait;
use pricewatch_core::{CandidateRecord, TaskDescriptor};
use pricewatch_storage::{FetchRequest, HttpFetcher};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{AdapterError, FetchedPage, ParsedPage, SourceAdapter, SourceKind};

pub const CARREFOUR_SEARCH_URL: &str =
    "https://online.carrefour.com.tw/CarrefourECProduct/GetSearchJson";
pub const CARREFOUR_REFERER: &str = "https://online.carrefour.com.tw/search?key=+&categoryId=";
pub const CARREFOUR_ORIGIN: &str = "https://online.carrefour.com.tw";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: JsonValue,
    #[serde(default)]
    content: Option<SearchContent>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchContent {
    #[serde(rename = "Count", default)]
    count: u64,
    #[serde(rename = "ProductListModel", default)]
    products: Vec<Product>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Product {
    #[serde(rename = "Id")]
    id: Option<i64>,
    #[serde(rename = "Name", deserialize_with = "lenient_string")]
    name: String,
    #[serde(rename = "Price", deserialize_with = "lenient_string")]
    price: String,
    #[serde(rename = "PictureUrl", deserialize_with = "lenient_string")]
    picture_url: String,
    #[serde(rename = "Specification", deserialize_with = "lenient_string")]
    specification: String,
    #[serde(rename = "SeName", deserialize_with = "lenient_string")]
    se_name: String,
}

/// Accept strings, numbers and null for fields the API does not type consistently.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => s,
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn success_flag(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_i64() == Some(1),
        JsonValue::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

/// Structured-JSON listing adapter: form POST per page, explicit `success` flag and
/// item `Count` in the payload.
#[derive(Debug, Clone)]
pub struct CarrefourJsonAdapter {
    source_name: String,
    endpoint: String,
    referer: String,
    origin: String,
}

impl CarrefourJsonAdapter {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            endpoint: CARREFOUR_SEARCH_URL.to_string(),
            referer: CARREFOUR_REFERER.to_string(),
            origin: CARREFOUR_ORIGIN.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn request_body(page: u32, page_size: u32) -> String {
        format!("pageIndex={page}&pageSize={page_size}&OrderById=0")
    }

    pub fn request_for(&self, page: u32, page_size: u32) -> FetchRequest {
        FetchRequest::post_form(
            self.source_name.clone(),
            self.endpoint.clone(),
            Self::request_body(page, page_size),
        )
        .with_referer(self.referer.clone())
    }

    fn product_url(&self, se_name: &str) -> String {
        let path = se_name.trim().split('?').next().unwrap_or_default();
        if path.is_empty() {
            return String::new();
        }
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}{}", self.origin, path)
    }

    fn to_candidate(&self, product: Product) -> CandidateRecord {
        CandidateRecord {
            url: self.product_url(&product.se_name),
            name: product.name.trim().to_string(),
            image_ref: product.picture_url.trim().to_string(),
            raw_price: product.price.trim().to_string(),
            note: product.specification.trim().to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for CarrefourJsonAdapter {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::CarrefourJson
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        descriptor: &TaskDescriptor,
        page: u32,
    ) -> Result<FetchedPage, AdapterError> {
        let request = self.request_for(page, descriptor.page_size);
        debug!(source = %self.source_name, page, body = ?request.method, "requesting listing page");
        let response = http.fetch(&request).await?;
        Ok(FetchedPage::from_response(page, response))
    }

    fn parse_page(&self, page: &FetchedPage) -> Result<ParsedPage, AdapterError> {
        let decoded: SearchResponse = serde_json::from_slice(&page.body).map_err(|e| {
            AdapterError::Decode(format!("page {} (HTTP {}): {e}", page.page, page.status))
        })?;

        if !success_flag(&decoded.success) {
            warn!(
                source = %self.source_name,
                page = page.page,
                success = %decoded.success,
                "search response not successful; treating page as empty"
            );
            return Ok(ParsedPage::default());
        }

        let content = decoded.content.unwrap_or_default();
        let total_count = Some(content.count);
        let candidates = content
            .products
            .into_iter()
            .inspect(|p| {
                if p.se_name.trim().is_empty() {
                    debug!(
                        source = %self.source_name,
                        product_id = ?p.id,
                        "product without SeName"
                    );
                }
            })
            .map(|p| self.to_candidate(p))
            .collect::<Vec<_>>();

        Ok(ParsedPage {
            candidates,
            total_count,
        })
    }
}
