use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use pricewatch_core::CatalogItem;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(CatalogItem),
    Updated(CatalogItem),
}

impl UpsertOutcome {
    pub fn item(&self) -> &CatalogItem {
        match self {
            UpsertOutcome::Inserted(item) | UpsertOutcome::Updated(item) => item,
        }
    }
}

/// Persistence collaborator keyed uniquely on `url`.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// `Ok(None)` is the not-found case and is not an error.
    async fn get_by_url(&self, url: &str) -> Result<Option<CatalogItem>, StoreError>;

    async fn insert(&self, item: &CatalogItem) -> Result<(), StoreError>;

    async fn update(&self, item: &CatalogItem) -> Result<(), StoreError>;

    /// Insert `observed` or, when its url already exists, overwrite the mutable
    /// fields with `diff` computed against the stored price.
    ///
    /// This provided version is lookup-then-branch. Two writers reconciling the same
    /// url concurrently can both miss on lookup (the second insert then fails on
    /// the unique key) or both diff against the same prior price. Last write wins.
    /// Stores that can do it in one statement override this.
    async fn upsert_with_diff(&self, observed: CatalogItem) -> Result<UpsertOutcome, StoreError> {
        match self.get_by_url(&observed.url).await? {
            None => {
                self.insert(&observed).await?;
                Ok(UpsertOutcome::Inserted(observed))
            }
            Some(existing) => {
                let item = observed.rebased_on(&existing);
                self.update(&item).await?;
                Ok(UpsertOutcome::Updated(item))
            }
        }
    }
}

/// Process-local catalog used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    items: RwLock<HashMap<String, CatalogItem>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All items ordered by url.
    pub fn snapshot(&self) -> Vec<CatalogItem> {
        let mut items = self
            .items
            .read()
            .map(|m| m.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        items.sort_by(|a, b| a.url.cmp(&b.url));
        items
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("catalog lock poisoned".to_string())
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get_by_url(&self, url: &str) -> Result<Option<CatalogItem>, StoreError> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(items.get(url).cloned())
    }

    async fn insert(&self, item: &CatalogItem) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        if items.contains_key(&item.url) {
            return Err(StoreError::Backend(format!("duplicate url {}", item.url)));
        }
        items.insert(item.url.clone(), item.clone());
        Ok(())
    }

    async fn update(&self, item: &CatalogItem) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        let Some(slot) = items.get_mut(&item.url) else {
            return Err(StoreError::Backend(format!("no row for url {}", item.url)));
        };
        slot.price = item.price;
        slot.diff = item.diff;
        slot.name = item.name.clone();
        slot.image_ref = item.image_ref.clone();
        slot.source_name = item.source_name.clone();
        slot.note = item.note.clone();
        slot.updated_at = item.updated_at;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("catalog migrations applied");
        Ok(())
    }
}

fn item_from_row(row: &PgRow) -> Result<CatalogItem, sqlx::Error> {
    Ok(CatalogItem {
        url: row.try_get("url")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        diff: row.try_get("diff")?,
        image_ref: row.try_get("imgsrc")?,
        source_name: row.try_get("source")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created")?,
        updated_at: row.try_get("updated")?,
    })
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn get_by_url(&self, url: &str) -> Result<Option<CatalogItem>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT price, diff, name, url, imgsrc, source, note, created, updated
              FROM item
             WHERE url = $1
             LIMIT 1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(item_from_row).transpose()?)
    }

    async fn insert(&self, item: &CatalogItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO item (price, diff, name, url, imgsrc, source, note, created, updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(item.price)
        .bind(item.diff)
        .bind(&item.name)
        .bind(&item.url)
        .bind(&item.image_ref)
        .bind(&item.source_name)
        .bind(&item.note)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, item: &CatalogItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE item
               SET price = $1,
                   diff = $2,
                   name = $3,
                   imgsrc = $4,
                   source = $5,
                   note = $6,
                   updated = $7
             WHERE url = $8
            "#,
        )
        .bind(item.price)
        .bind(item.diff)
        .bind(&item.name)
        .bind(&item.image_ref)
        .bind(&item.source_name)
        .bind(&item.note)
        .bind(item.updated_at)
        .bind(&item.url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_with_diff(&self, observed: CatalogItem) -> Result<UpsertOutcome, StoreError> {
        // SET expressions see the pre-update row, so diff uses the old price.
        let row = sqlx::query(
            r#"
            INSERT INTO item AS existing
                   (price, diff, name, url, imgsrc, source, note, created, updated)
            VALUES ($1, 0, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (url) DO UPDATE
               SET diff = EXCLUDED.price - existing.price,
                   price = EXCLUDED.price,
                   name = EXCLUDED.name,
                   imgsrc = EXCLUDED.imgsrc,
                   source = EXCLUDED.source,
                   note = EXCLUDED.note,
                   updated = EXCLUDED.updated
            RETURNING price, diff, name, url, imgsrc, source, note, created, updated,
                      (xmax = 0) AS inserted
            "#,
        )
        .bind(observed.price)
        .bind(&observed.name)
        .bind(&observed.url)
        .bind(&observed.image_ref)
        .bind(&observed.source_name)
        .bind(&observed.note)
        .bind(observed.created_at)
        .bind(observed.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let item = item_from_row(&row)?;
        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Inserted(item)
        } else {
            UpsertOutcome::Updated(item)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pricewatch_core::CandidateRecord;

    fn observed(url: &str, price: i64, day: u32) -> CatalogItem {
        let candidate = CandidateRecord {
            url: url.to_string(),
            name: format!("item {price}"),
            image_ref: "https://img.example/x.jpg".to_string(),
            raw_price: price.to_string(),
            note: String::new(),
        };
        let at = Utc.with_ymd_and_hms(2026, 4, day, 12, 0, 0).single().unwrap();
        CatalogItem::observed(&candidate, "RTmart", price, at)
    }

    #[tokio::test]
    async fn missing_url_is_not_found_not_error() {
        let store = MemoryCatalogStore::new();
        assert!(store.get_by_url("https://shop.example/none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryCatalogStore::new();
        let item = observed("https://shop.example/p/1", 10, 1);
        store.insert(&item).await.unwrap();
        let err = store.insert(&item).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_url_fails() {
        let store = MemoryCatalogStore::new();
        let err = store.update(&observed("https://shop.example/p/9", 10, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn provided_upsert_inserts_then_diffs() {
        let store = MemoryCatalogStore::new();

        let first = store
            .upsert_with_diff(observed("https://shop.example/p/1", 100, 1))
            .await
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));
        assert_eq!(first.item().diff, 0);

        let second = store
            .upsert_with_diff(observed("https://shop.example/p/1", 80, 2))
            .await
            .unwrap();
        let UpsertOutcome::Updated(item) = second else {
            panic!("expected update");
        };
        assert_eq!(item.price, 80);
        assert_eq!(item.diff, -20);

        let stored = store.get_by_url("https://shop.example/p/1").await.unwrap().unwrap();
        assert_eq!(stored.price, 80);
        assert_eq!(stored.diff, -20);
        assert_eq!(stored.name, "item 80");
        assert_eq!(stored.created_at, Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).single().unwrap());
        assert_eq!(stored.updated_at, Utc.with_ymd_and_hms(2026, 4, 2, 12, 0, 0).single().unwrap());
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_url() {
        let store = MemoryCatalogStore::new();
        store.insert(&observed("https://shop.example/p/b", 1, 1)).await.unwrap();
        store.insert(&observed("https://shop.example/p/a", 2, 1)).await.unwrap();
        let urls: Vec<_> = store.snapshot().into_iter().map(|i| i.url).collect();
        assert_eq!(urls, vec!["https://shop.example/p/a", "https://shop.example/p/b"]);
    }
}
