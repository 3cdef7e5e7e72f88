//! Source adapter contract + the retail site adapters (structured JSON and HTML listings).

mod carrefour;
mod rtmart;

use async_trait::async_trait;
use pricewatch_core::{CandidateRecord, TaskDescriptor};
use pricewatch_storage::{FetchError, FetchedResponse, HttpFetcher};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use carrefour::{
    CarrefourJsonAdapter, CARREFOUR_ORIGIN, CARREFOUR_REFERER, CARREFOUR_SEARCH_URL,
};
pub use rtmart::{strip_currency_glyph, RtMartHtmlAdapter, RTMART_SEARCH_URL};

pub const CRATE_NAME: &str = "pricewatch-adapters";

/// Which scraping strategy a configured source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    CarrefourJson,
    #[serde(rename = "rtmart-html")]
    RtMartHtml,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::CarrefourJson => "carrefour-json",
            SourceKind::RtMartHtml => "rtmart-html",
        }
    }
}

/// Raw upstream response for one listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub page: u32,
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn new(page: u32, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            page,
            url: url.into(),
            status: 200,
            body: body.into(),
        }
    }

    pub fn from_response(page: u32, response: FetchedResponse) -> Self {
        Self {
            page,
            url: response.final_url,
            status: response.status.as_u16(),
            body: response.body,
        }
    }
}

/// Candidates found on one page plus the item total when the page reports one.
/// `total_count == None` means the total is unknown and no further pages are planned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPage {
    pub candidates: Vec<CandidateRecord>,
    pub total_count: Option<u64>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

/// One upstream site: fetch a listing page and turn it into candidates.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &str;
    fn kind(&self) -> SourceKind;

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        descriptor: &TaskDescriptor,
        page: u32,
    ) -> Result<FetchedPage, AdapterError>;

    fn parse_page(&self, page: &FetchedPage) -> Result<ParsedPage, AdapterError>;

    async fn first_page(
        &self,
        http: &HttpFetcher,
        descriptor: &TaskDescriptor,
    ) -> Result<ParsedPage, AdapterError> {
        let fetched = self.fetch_page(http, descriptor, 1).await?;
        self.parse_page(&fetched)
    }

    async fn page(
        &self,
        http: &HttpFetcher,
        descriptor: &TaskDescriptor,
        page: u32,
    ) -> Result<Vec<CandidateRecord>, AdapterError> {
        let fetched = self.fetch_page(http, descriptor, page).await?;
        Ok(self.parse_page(&fetched)?.candidates)
    }
}

/// Build the adapter for a configured source. `endpoint` overrides the site's
/// default listing URL (mirrors, staging hosts).
pub fn adapter_for_source(
    kind: SourceKind,
    source_name: &str,
    endpoint: Option<&str>,
) -> Box<dyn SourceAdapter> {
    match (kind, endpoint) {
        (SourceKind::CarrefourJson, None) => Box::new(CarrefourJsonAdapter::new(source_name)),
        (SourceKind::CarrefourJson, Some(url)) => {
            Box::new(CarrefourJsonAdapter::new(source_name).with_endpoint(url))
        }
        (SourceKind::RtMartHtml, None) => Box::new(RtMartHtmlAdapter::new(source_name)),
        (SourceKind::RtMartHtml, Some(url)) => {
            Box::new(RtMartHtmlAdapter::new(source_name).with_endpoint(url))
        }
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn text_or_empty(value: String) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
