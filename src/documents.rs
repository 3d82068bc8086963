//! Minimal document directory.
//!
//! Attachment storage only needs to know whether a document exists and to
//! be told when one is deleted. These helpers cover that, plus enough
//! create/list support for the CLI and tests.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub attachment_count: i64,
}

pub async fn create_document(pool: &SqlitePool, title: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO documents (id, title, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(title)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn document_exists(pool: &SqlitePool, id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Delete the document row only. Its attachments become orphans until the
/// caller runs an eager cleanup or the next orphan sweep.
pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<bool> {
    let affected = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(affected > 0)
}

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<DocumentSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT d.id, d.title, d.created_at, COUNT(a.id) AS attachment_count
        FROM documents d
        LEFT JOIN attachments a ON a.owner_doc_id = d.id
        GROUP BY d.id
        ORDER BY d.created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DocumentSummary {
            id: row.get("id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            attachment_count: row.get("attachment_count"),
        })
        .collect())
}
