//! Vault statistics and health overview.
//!
//! Summarizes what is stored: attachment counts, bytes on record, how many
//! attachments are waiting for the orphan sweep, and how much content is
//! stored more than once. Used by `vault stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VaultStats {
    pub documents: i64,
    pub attachments: i64,
    pub total_bytes: i64,
    pub unbound: i64,
    pub orphaned: i64,
    /// Hashes shared by more than one attachment.
    pub duplicate_groups: i64,
    /// Bytes that would be freed if every duplicate group kept one copy.
    pub duplicate_bytes: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<VaultStats> {
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;

    let attachments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attachments")
        .fetch_one(pool)
        .await?;

    let total_bytes: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM attachments")
        .fetch_one(pool)
        .await?;

    let unbound: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM attachments WHERE owner_doc_id IS NULL")
            .fetch_one(pool)
            .await?;

    let orphaned: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM attachments a
        LEFT JOIN documents d ON d.id = a.owner_doc_id
        WHERE a.owner_doc_id IS NOT NULL AND d.id IS NULL
        "#,
    )
    .fetch_one(pool)
    .await?;

    let (duplicate_groups, duplicate_bytes): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(extra_bytes), 0) FROM (
            SELECT (COUNT(*) - 1) * MAX(size_bytes) AS extra_bytes
            FROM attachments
            GROUP BY content_hash
            HAVING COUNT(*) > 1
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(VaultStats {
        documents,
        attachments,
        total_bytes,
        unbound,
        orphaned,
        duplicate_groups,
        duplicate_bytes,
    })
}

pub fn print_stats(stats: &VaultStats) {
    println!("Attachment Vault — Stats");
    println!("========================");
    println!();
    println!("  Documents:        {}", stats.documents);
    println!("  Attachments:      {}", stats.attachments);
    println!("  Stored:           {}", format_bytes(stats.total_bytes.max(0) as u64));
    println!("  Unbound:          {}", stats.unbound);
    println!("  Orphaned:         {}", stats.orphaned);
    println!(
        "  Duplicates:       {} groups ({} reclaimable)",
        stats.duplicate_groups,
        format_bytes(stats.duplicate_bytes.max(0) as u64)
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
