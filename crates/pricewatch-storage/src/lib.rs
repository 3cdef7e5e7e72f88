//! Outbound HTTP fetch + catalog persistence for pricewatch.

mod catalog;

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{CONTENT_TYPE, REFERER, USER_AGENT};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

pub use catalog::{CatalogStore, MemoryCatalogStore, PgCatalogStore, StoreError, UpsertOutcome};

pub const CRATE_NAME: &str = "pricewatch-storage";

/// Desktop browser identity sent with every upstream request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/64.0.3282.186 Safari/537.36";

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Post {
        body: String,
        referer: Option<String>,
    },
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Get => "GET",
            FetchMethod::Post { .. } => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source: String,
    pub url: String,
    pub method: FetchMethod,
}

impl FetchRequest {
    pub fn get(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            method: FetchMethod::Get,
        }
    }

    /// Form-encoded POST. `body` must already be encoded.
    pub fn post_form(
        source: impl Into<String>,
        url: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
            method: FetchMethod::Post {
                body: body.into(),
                referer: None,
            },
        }
    }

    pub fn with_referer(mut self, value: impl Into<String>) -> Self {
        if let FetchMethod::Post { referer, .. } = &mut self.method {
            *referer = Some(value.into());
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url `{url}`: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Shared outbound client. One instance is created per process and handed to every
/// task runner; requests are never retried here.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            user_agent: config.user_agent,
        })
    }

    pub fn build_request(&self, request: &FetchRequest) -> Result<reqwest::Request, FetchError> {
        let url = reqwest::Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl {
            url: request.url.clone(),
            message: e.to_string(),
        })?;
        let builder = match &request.method {
            FetchMethod::Get => self.client.get(url),
            FetchMethod::Post { body, referer } => {
                let mut builder = self
                    .client
                    .post(url)
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .body(body.clone());
                if let Some(referer) = referer {
                    builder = builder.header(REFERER, referer.as_str());
                }
                builder
            }
        };

        Ok(builder.header(USER_AGENT, self.user_agent.as_str()).build()?)
    }

    /// Perform one request and return the body whatever the status code.
    /// Deciding whether a non-2xx body is usable is left to the caller's parser.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let span = info_span!(
            "http_fetch",
            source = %request.source,
            method = request.method.as_str(),
            url = %request.url
        );

        async move {
            let built = self.build_request(request)?;
            let resp = self.client.execute(built).await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                warn!(status = status.as_u16(), "upstream returned non-success status");
            }

            let body = resp.bytes().await?.to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "fetched");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}
