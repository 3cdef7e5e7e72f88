use async_trait::async_trait;
use pricewatch_core::{CandidateRecord, TaskDescriptor};
use pricewatch_storage::{FetchRequest, HttpFetcher};
use scraper::{ElementRef, Html};
use tracing::{debug, warn};

use crate::{
    selector, text_or_empty, AdapterError, FetchedPage, ParsedPage, SourceAdapter, SourceKind,
};

pub const RTMART_SEARCH_URL: &str =
    "http://www.rt-mart.com.tw/direct/index.php?action=product_search&prod_keyword=";

const LISTING_BLOCK: &str = "div.indexProList";
const TITLE_LINK: &str = "h5.for_proname > a";
const IMAGE: &str = "img";
const PRICE: &str = "div.for_pricebox > div";
const TOTAL_COUNT: &str = "span.t02";

/// Drop the currency glyph in front of a listed price, e.g. `$199` -> `199`.
pub fn strip_currency_glyph(text: &str) -> String {
    text.trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .trim()
        .to_string()
}

/// HTML listing adapter: GET per page, repeated product blocks, item total in a
/// separate text node on the page.
#[derive(Debug, Clone)]
pub struct RtMartHtmlAdapter {
    source_name: String,
    endpoint: String,
}

impl RtMartHtmlAdapter {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            endpoint: RTMART_SEARCH_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn page_url(&self, page: u32, page_size: u32) -> String {
        format!("{}&p_data_num={page_size}&page={page}", self.endpoint)
    }

    fn parse_total(&self, document: &Html, page: u32) -> Result<Option<u64>, AdapterError> {
        let total_sel = selector(TOTAL_COUNT)?;
        let text = document
            .select(&total_sel)
            .map(|n| n.text().collect::<String>())
            .collect::<String>();
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        match text.replace(',', "").parse::<u64>() {
            Ok(total) => Ok(Some(total)),
            Err(err) => {
                warn!(
                    source = %self.source_name,
                    page,
                    text,
                    error = %err,
                    "unreadable item total"
                );
                Ok(None)
            }
        }
    }
}

fn first_attr(block: &ElementRef<'_>, sel: &scraper::Selector, attr: &str) -> String {
    block
        .select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn first_text(block: &ElementRef<'_>, sel: &scraper::Selector) -> String {
    block
        .select(sel)
        .map(|n| text_or_empty(n.text().collect::<String>()))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

#[async_trait]
impl SourceAdapter for RtMartHtmlAdapter {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::RtMartHtml
    }

    async fn fetch_page(
        &self,
        http: &HttpFetcher,
        descriptor: &TaskDescriptor,
        page: u32,
    ) -> Result<FetchedPage, AdapterError> {
        let url = self.page_url(page, descriptor.page_size);
        debug!(source = %self.source_name, page, url = %url, "requesting listing page");
        let response = http.fetch(&FetchRequest::get(self.source_name.clone(), url)).await?;
        Ok(FetchedPage::from_response(page, response))
    }

    fn parse_page(&self, page: &FetchedPage) -> Result<ParsedPage, AdapterError> {
        let html = String::from_utf8_lossy(&page.body);
        let document = Html::parse_document(&html);

        let block_sel = selector(LISTING_BLOCK)?;
        let link_sel = selector(TITLE_LINK)?;
        let image_sel = selector(IMAGE)?;
        let price_sel = selector(PRICE)?;

        let candidates = document
            .select(&block_sel)
            .map(|block| CandidateRecord {
                url: first_attr(&block, &link_sel, "href"),
                name: first_text(&block, &link_sel),
                image_ref: first_attr(&block, &image_sel, "src"),
                raw_price: strip_currency_glyph(&first_text(&block, &price_sel)),
                note: String::new(),
            })
            .collect::<Vec<_>>();

        let total_count = self.parse_total(&document, page.page)?;

        Ok(ParsedPage {
            candidates,
            total_count,
        })
    }
}
