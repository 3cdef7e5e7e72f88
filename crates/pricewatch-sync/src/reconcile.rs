use std::sync::Arc;

use chrono::{DateTime, Utc};
use pricewatch_core::{now_seconds, parse_price, CandidateRecord, CatalogItem};
use pricewatch_storage::{CatalogStore, StoreError, UpsertOutcome};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Candidate had no usable url; the store was not touched.
    Skipped,
    Inserted,
    Updated { diff: i64 },
}

/// Turns candidates into catalog upserts. Re-delivering the same candidate is
/// harmless: the second pass updates in place with `diff = 0`.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CatalogStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        candidate: &CandidateRecord,
        source_name: &str,
    ) -> Result<ReconcileOutcome, StoreError> {
        self.reconcile_at(candidate, source_name, now_seconds()).await
    }

    pub async fn reconcile_at(
        &self,
        candidate: &CandidateRecord,
        source_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, StoreError> {
        if !candidate.has_natural_key() {
            debug!(source = source_name, name = %candidate.name, "candidate without url skipped");
            return Ok(ReconcileOutcome::Skipped);
        }

        let price = match parse_price(&candidate.raw_price) {
            Some(price) => price,
            None => {
                debug!(
                    source = source_name,
                    url = %candidate.url,
                    raw_price = %candidate.raw_price,
                    "unparsable price, storing 0"
                );
                0
            }
        };

        let observed = CatalogItem::observed(candidate, source_name, price, now);
        Ok(match self.store.upsert_with_diff(observed).await? {
            UpsertOutcome::Inserted(_) => ReconcileOutcome::Inserted,
            UpsertOutcome::Updated(item) => ReconcileOutcome::Updated { diff: item.diff },
        })
    }
}
