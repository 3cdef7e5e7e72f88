//! Core domain model for pricewatch: catalog items, per-cycle candidates, task descriptors.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "pricewatch-core";

/// Persisted, reconciled product record. `url` is the natural key across all sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub url: String,
    pub name: String,
    /// Smallest currency unit, no fractional part.
    pub price: i64,
    /// Latest price minus the previously stored price; 0 on first sighting.
    pub diff: i64,
    pub image_ref: String,
    pub source_name: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Fresh observation of a candidate as it would be inserted on first sighting.
    pub fn observed(
        candidate: &CandidateRecord,
        source_name: &str,
        price: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let now = truncate_to_seconds(now);
        Self {
            url: candidate.url.trim().to_string(),
            name: candidate.name.clone(),
            price,
            diff: 0,
            image_ref: candidate.image_ref.clone(),
            source_name: source_name.to_string(),
            note: candidate.note.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Carry this observation over an existing row: diff against the stored price,
    /// keep the original creation time.
    pub fn rebased_on(mut self, existing: &CatalogItem) -> Self {
        self.diff = self.price - existing.price;
        self.created_at = existing.created_at;
        self
    }
}

/// Adapter-normalized listing entry, discarded after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub url: String,
    pub name: String,
    pub image_ref: String,
    pub raw_price: String,
    pub note: String,
}

impl CandidateRecord {
    pub fn has_natural_key(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// How the page total reported by a source turns into a number of pages to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationPolicy {
    /// `total / page_size + 1`. On exact division this requests one trailing page
    /// that usually comes back empty; kept as the default because the upstream
    /// sites were tuned against it.
    #[default]
    OverFetch,
    /// `ceil(total / page_size)`.
    Exact,
}

impl PaginationPolicy {
    pub fn total_pages(self, total_count: u64, page_size: u32) -> u32 {
        if page_size == 0 {
            return 1;
        }
        let size = u64::from(page_size);
        let pages = match self {
            PaginationPolicy::OverFetch => total_count / size + 1,
            PaginationPolicy::Exact => total_count.div_ceil(size),
        };
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub interval_secs: u64,
    pub page_size: u32,
    #[serde(default)]
    pub pagination: PaginationPolicy,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, interval_secs: u64, page_size: u32) -> Self {
        Self {
            name: name.into(),
            interval_secs,
            page_size,
            pagination: PaginationPolicy::default(),
        }
    }

    pub fn with_pagination(mut self, pagination: PaginationPolicy) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn total_pages(&self, total_count: u64) -> u32 {
        self.pagination.total_pages(total_count, self.page_size)
    }
}

/// Parse a source price string into the smallest currency unit.
///
/// Leading currency glyphs (`$`, `NT$`, `¥`, ...) and thousands separators are
/// ignored. Fractional amounts are rejected.
pub fn parse_price(raw: &str) -> Option<i64> {
    let stripped = raw
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit() && c != '-')
        .replace(',', "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        return None;
    }
    stripped.parse::<i64>().ok()
}

pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(0)
}

/// Current time at whole-second precision.
pub fn now_seconds() -> DateTime<Utc> {
    truncate_to_seconds(Utc::now())
}
