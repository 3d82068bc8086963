//! Durable attachment records in SQLite.
//!
//! Every mutating operation runs in its own transaction and returns a
//! [`PersistenceError`] after rolling back on failure. Once a mutation
//! commits, the live feeds of every affected owner are re-published.

use std::collections::BTreeSet;
use std::path::PathBuf;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::feeds::{AttachmentFeed, OwnerFeedRegistry};
use crate::models::AttachmentRecord;

pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

const SELECT_COLUMNS: &str = "SELECT a.id, a.owner_doc_id, a.display_name, a.mime_type, \
     a.size_bytes, a.content_hash, a.storage_path, a.source_uri, a.created_at \
     FROM attachments a";

const NEWEST_FIRST: &str = "ORDER BY a.created_at DESC, a.rowid DESC";

/// SQLite implementation of the attachment table.
pub struct AttachmentMetadataStore {
    pool: SqlitePool,
    feeds: OwnerFeedRegistry,
}

impl AttachmentMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feeds: OwnerFeedRegistry::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert(&self, record: &AttachmentRecord) -> StoreResult<()> {
        insert_row(&self.pool, record).await?;
        debug!(attachment_id = %record.id, "metadata: inserted");
        self.publish(record.owner_doc_id.iter().cloned()).await;
        Ok(())
    }

    /// Insert all records in one transaction. Nothing persists on failure.
    pub async fn insert_batch(&self, records: &[AttachmentRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            insert_row(&mut *tx, record).await?;
        }
        tx.commit().await?;

        debug!(count = records.len(), "metadata: batch inserted");
        self.publish(records.iter().filter_map(|r| r.owner_doc_id.clone()))
            .await;
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<AttachmentRecord>> {
        let row = sqlx::query(&format!("{} WHERE a.id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    /// Records bound to `doc_id`, newest first.
    pub async fn list_by_owner(&self, doc_id: &str) -> StoreResult<Vec<AttachmentRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE a.owner_doc_id = ? {}",
            SELECT_COLUMNS, NEWEST_FIRST
        ))
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Unbound records plus records whose owning document no longer exists.
    pub async fn list_orphans(&self) -> StoreResult<Vec<AttachmentRecord>> {
        let rows = sqlx::query(&format!(
            "{} LEFT JOIN documents d ON d.id = a.owner_doc_id \
             WHERE a.owner_doc_id IS NULL OR d.id IS NULL {}",
            SELECT_COLUMNS, NEWEST_FIRST
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn find_by_hash(&self, hash: &str) -> StoreResult<Vec<AttachmentRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE a.content_hash = ? {}",
            SELECT_COLUMNS, NEWEST_FIRST
        ))
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn list_all(&self) -> StoreResult<Vec<AttachmentRecord>> {
        let rows = sqlx::query(&format!("{} {}", SELECT_COLUMNS, NEWEST_FIRST))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Delete one record. Returns `false` if no such record existed.
    pub async fn delete_by_id(&self, id: &str) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let owner: Option<Option<String>> =
            sqlx::query_scalar("SELECT owner_doc_id FROM attachments WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(owner) = owner else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(attachment_id = %id, "metadata: deleted");
        self.publish(owner).await;
        Ok(true)
    }

    /// Delete every record bound to `doc_id`, returning how many went.
    pub async fn delete_by_owner(&self, doc_id: &str) -> StoreResult<u64> {
        let deleted = sqlx::query("DELETE FROM attachments WHERE owner_doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        debug!(owner = %doc_id, deleted, "metadata: deleted by owner");
        self.publish(std::iter::once(doc_id.to_string())).await;
        Ok(deleted)
    }

    /// Re-parent every listed record onto `doc_id`, all or nothing.
    ///
    /// Fails without changes if the document or any of the ids is unknown.
    /// Overlapping binds of the same id are last-writer-wins.
    pub async fn bind_to_owner(&self, ids: &[String], doc_id: &str) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let doc_exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(doc_id)
            .fetch_one(&mut *tx)
            .await?;
        if !doc_exists {
            return Err(PersistenceError::UnknownDocument(doc_id.to_string()));
        }

        let mut touched: BTreeSet<String> = BTreeSet::new();
        touched.insert(doc_id.to_string());

        for id in ids {
            let previous: Option<Option<String>> =
                sqlx::query_scalar("SELECT owner_doc_id FROM attachments WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            match previous {
                None => return Err(PersistenceError::UnknownAttachment(id.clone())),
                Some(Some(prev)) => {
                    touched.insert(prev);
                }
                Some(None) => {}
            }

            sqlx::query("UPDATE attachments SET owner_doc_id = ? WHERE id = ?")
                .bind(doc_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        debug!(owner = %doc_id, count = ids.len(), "metadata: bound");
        self.publish(touched).await;
        Ok(())
    }

    pub async fn count_by_owner(&self, doc_id: &str) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attachments WHERE owner_doc_id = ?")
            .bind(doc_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Live list of `doc_id`'s attachments, shared by all observers.
    pub async fn observe_by_owner(&self, doc_id: &str) -> StoreResult<AttachmentFeed> {
        self.feeds
            .subscribe(doc_id, || self.list_by_owner(doc_id))
            .await
    }

    async fn publish(&self, owners: impl IntoIterator<Item = String>) {
        for owner in owners {
            let result = self
                .feeds
                .refresh(&owner, || self.list_by_owner(&owner))
                .await;
            if let Err(e) = result {
                warn!(owner = %owner, error = %e, "metadata: feed refresh failed");
            }
        }
    }
}

async fn insert_row<'e, E>(executor: E, record: &AttachmentRecord) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO attachments (id, owner_doc_id, display_name, mime_type, size_bytes,
                                 content_hash, storage_path, source_uri, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.owner_doc_id)
    .bind(&record.display_name)
    .bind(&record.mime_type)
    .bind(record.size_bytes)
    .bind(&record.content_hash)
    .bind(record.storage_path.to_string_lossy().to_string())
    .bind(&record.source_uri)
    .bind(record.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

fn row_to_record(row: &SqliteRow) -> AttachmentRecord {
    let storage_path: String = row.get("storage_path");
    AttachmentRecord {
        id: row.get("id"),
        owner_doc_id: row.get("owner_doc_id"),
        display_name: row.get("display_name"),
        mime_type: row.get("mime_type"),
        size_bytes: row.get("size_bytes"),
        content_hash: row.get("content_hash"),
        storage_path: PathBuf::from(storage_path),
        source_uri: row.get("source_uri"),
        created_at: row.get("created_at"),
    }
}
