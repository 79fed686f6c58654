//! Catalog collaborator: the minimum the task core needs from novel storage.

use novel_dl_core::BatchReport;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use tracing::info;

use crate::{now_ts, Database, DbResult};

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub created_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for Resource {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A persisted unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUnit {
    pub id: String,
    pub resource_id: i64,
    pub index: i64,
    pub title: String,
    pub content: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredUnit {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            resource_id: row.try_get("novel_id")?,
            index: row.try_get("chapter_index")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
        })
    }
}

/// A persisted unit without its content, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitEntry {
    pub id: String,
    pub index: i64,
    pub title: String,
    pub fetched_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for UnitEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            index: row.try_get("chapter_index")?,
            title: row.try_get("title")?,
            fetched_at: row.try_get("fetched_at")?,
        })
    }
}

/// Insert a placeholder catalog row unless one exists. Usable inside a
/// transaction.
pub(crate) async fn insert_placeholder<'e, E>(
    executor: E,
    id: i64,
    title: &str,
    now: i64,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT OR IGNORE INTO novels (id, title, created_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(title)
        .bind(now)
        .execute(executor)
        .await?;
    Ok(())
}

impl Database {
    pub async fn resource_exists(&self, id: i64) -> DbResult<bool> {
        let row: (i64,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM novels WHERE id = ?)")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0 != 0)
    }

    pub async fn get_resource(&self, id: i64) -> DbResult<Option<Resource>> {
        let resource = sqlx::query_as("SELECT id, title, author, created_at FROM novels WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(resource)
    }

    /// Make sure a catalog row exists for `id`; an existing row is untouched.
    pub async fn ensure_placeholder(&self, id: i64, minimal_title: &str) -> DbResult<Resource> {
        let now = now_ts();
        insert_placeholder(self.pool(), id, minimal_title, now).await?;
        let resource = sqlx::query_as("SELECT id, title, author, created_at FROM novels WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(resource)
    }

    /// Write every retrieved unit of a batch, indexed by directory position.
    ///
    /// The catalog row must exist (see [`Database::ensure_placeholder`]).
    /// Re-running a task overwrites earlier copies of the same units. Returns
    /// the number of units written.
    pub async fn persist_units(&self, resource_id: i64, report: &BatchReport) -> DbResult<usize> {
        let now = now_ts();
        let mut tx = self.pool().begin().await?;

        let mut written = 0usize;
        for (index, unit_ref) in report.planned.iter().enumerate() {
            let Some(unit) = report.outcomes.get(&unit_ref.id).and_then(|o| o.unit()) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO chapters (id, novel_id, chapter_index, title, content, fetched_at) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET \
                     novel_id = excluded.novel_id, \
                     chapter_index = excluded.chapter_index, \
                     title = excluded.title, \
                     content = excluded.content, \
                     fetched_at = excluded.fetched_at",
            )
            .bind(&unit.id)
            .bind(resource_id)
            .bind(index as i64)
            .bind(&unit.label)
            .bind(&unit.content)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            written += 1;
        }

        tx.commit().await?;
        info!(resource_id, written, "Units persisted");
        Ok(written)
    }

    /// Stored units of a resource in directory order.
    pub async fn stored_units(&self, resource_id: i64) -> DbResult<Vec<StoredUnit>> {
        let units = sqlx::query_as(
            "SELECT id, novel_id, chapter_index, title, content FROM chapters \
             WHERE novel_id = ? ORDER BY chapter_index",
        )
        .bind(resource_id)
        .fetch_all(self.pool())
        .await?;
        Ok(units)
    }

    /// Units of a resource in directory order, without content.
    pub async fn unit_entries(&self, resource_id: i64) -> DbResult<Vec<UnitEntry>> {
        let entries = sqlx::query_as(
            "SELECT id, chapter_index, title, fetched_at FROM chapters \
             WHERE novel_id = ? ORDER BY chapter_index",
        )
        .bind(resource_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    pub async fn unit_count(&self, resource_id: i64) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chapters WHERE novel_id = ?")
            .bind(resource_id)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novel_dl_core::{FetchOutcome, Unit, UnitRef};
    use std::collections::HashMap;

    fn report() -> BatchReport {
        let planned = vec![
            UnitRef::new("c1", "Chapter 1"),
            UnitRef::new("c2", "Chapter 2"),
            UnitRef::new("c3", "Chapter 3"),
        ];
        let mut outcomes = HashMap::new();
        outcomes.insert(
            "c3".to_string(),
            FetchOutcome::Retrieved(Unit {
                id: "c3".into(),
                label: "第三章".into(),
                content: "three".into(),
            }),
        );
        outcomes.insert(
            "c2".to_string(),
            FetchOutcome::EmptyContent {
                label: "Chapter 2".into(),
            },
        );
        outcomes.insert(
            "c1".to_string(),
            FetchOutcome::Retrieved(Unit {
                id: "c1".into(),
                label: "第一章".into(),
                content: "one".into(),
            }),
        );
        BatchReport {
            planned,
            outcomes,
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn test_ensure_placeholder_is_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(!db.resource_exists(7).await.unwrap());

        let r = db.ensure_placeholder(7, "Novel 7").await.unwrap();
        assert_eq!(r.title, "Novel 7");
        assert!(db.resource_exists(7).await.unwrap());

        let again = db.ensure_placeholder(7, "Other").await.unwrap();
        assert_eq!(again.title, "Novel 7");
    }

    #[tokio::test]
    async fn test_persist_units_skips_failures_and_keeps_order() {
        let db = Database::new_in_memory().await.unwrap();
        db.ensure_placeholder(9, "Novel 9").await.unwrap();
        let written = db.persist_units(9, &report()).await.unwrap();
        assert_eq!(written, 2);

        let units = db.stored_units(9).await.unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
        assert_eq!(units[1].index, 2);
        assert_eq!(units[1].title, "第三章");

        // Second run overwrites instead of duplicating.
        assert_eq!(db.persist_units(9, &report()).await.unwrap(), 2);
        assert_eq!(db.stored_units(9).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persist_units_requires_catalog_row() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(db.persist_units(11, &report()).await.is_err());
        assert_eq!(db.unit_count(11).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unit_entries_and_count() {
        let db = Database::new_in_memory().await.unwrap();
        db.ensure_placeholder(9, "Novel 9").await.unwrap();
        db.persist_units(9, &report()).await.unwrap();

        assert_eq!(db.unit_count(9).await.unwrap(), 2);
        let entries = db.unit_entries(9).await.unwrap();
        let indexed: Vec<(&str, i64)> = entries.iter().map(|e| (e.id.as_str(), e.index)).collect();
        assert_eq!(indexed, vec![("c1", 0), ("c3", 2)]);
        assert!(db.unit_entries(10).await.unwrap().is_empty());
    }
}
