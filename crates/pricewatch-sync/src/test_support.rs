use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pricewatch_adapters::{AdapterError, FetchedPage, ParsedPage, SourceAdapter, SourceKind};
use pricewatch_core::{CandidateRecord, CatalogItem, TaskDescriptor};
use pricewatch_storage::{CatalogStore, HttpClientConfig, HttpFetcher, StoreError};

pub(crate) fn http() -> Arc<HttpFetcher> {
    Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap())
}

/// Adapter that serves canned pages and records which pages were requested.
#[derive(Default)]
pub(crate) struct ScriptedAdapter {
    pages: HashMap<u32, ParsedPage>,
    failing: Vec<u32>,
    requested: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedAdapter {
    pub(crate) fn with_page(mut self, page: u32, total: Option<u64>, urls: &[&str]) -> Self {
        let candidates = urls
            .iter()
            .map(|url| CandidateRecord {
                url: url.to_string(),
                name: format!("item {url}"),
                image_ref: String::new(),
                raw_price: "$10".to_string(),
                note: String::new(),
            })
            .collect();
        self.pages.insert(
            page,
            ParsedPage {
                candidates,
                total_count: total,
            },
        );
        self
    }

    pub(crate) fn failing_on(mut self, page: u32) -> Self {
        self.failing.push(page);
        self
    }

    pub(crate) fn requested(&self) -> Arc<Mutex<Vec<u32>>> {
        Arc::clone(&self.requested)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_name(&self) -> &str {
        "Scripted"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::RtMartHtml
    }

    async fn fetch_page(
        &self,
        _http: &HttpFetcher,
        _descriptor: &TaskDescriptor,
        page: u32,
    ) -> Result<FetchedPage, AdapterError> {
        self.requested.lock().unwrap().push(page);
        if self.failing.contains(&page) {
            return Err(AdapterError::Decode(format!("scripted failure on page {page}")));
        }
        Ok(FetchedPage::new(page, format!("scripted://{page}"), Vec::new()))
    }

    fn parse_page(&self, page: &FetchedPage) -> Result<ParsedPage, AdapterError> {
        Ok(self.pages.get(&page.page).cloned().unwrap_or_default())
    }
}

/// Store whose every call fails, as if the database went away.
pub(crate) struct BrokenStore;

#[async_trait]
impl CatalogStore for BrokenStore {
    async fn get_by_url(&self, _url: &str) -> Result<Option<CatalogItem>, StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }

    async fn insert(&self, _item: &CatalogItem) -> Result<(), StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }

    async fn update(&self, _item: &CatalogItem) -> Result<(), StoreError> {
        Err(StoreError::Backend("connection reset".to_string()))
    }
}
