//! # Attachment Vault CLI (`vault`)
//!
//! Imports, binds, inspects and garbage-collects document attachments.
//!
//! ## Usage
//!
//! ```bash
//! vault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vault init` | Create the database schema and storage root |
//! | `vault import <sources..>` | Import files, optionally attaching them to a document |
//! | `vault import-dir <dir>` | Import every matching file below a directory |
//! | `vault list <doc>` | List a document's attachments, newest first |
//! | `vault get <id>` | Show one attachment and its integrity |
//! | `vault bind <doc> <ids..>` | Attach imported files to a document |
//! | `vault delete <id>` | Delete an attachment's file and record |
//! | `vault delete-doc-attachments <doc>` | Remove every attachment of a document |
//! | `vault gc` | Sweep orphaned (or, with `--missing`, file-less) attachments |
//! | `vault verify` | Report records whose file is missing or altered |
//! | `vault dupes <hash>` | List attachments sharing a content hash |
//! | `vault doc create\|delete\|list` | Manage owning documents |
//! | `vault migrate <doc> <sources..>` | Copy external references into the vault |
//! | `vault stats` | Summary of stored content |

use attachment_vault::cancel::CancelFlag;
use attachment_vault::config;
use attachment_vault::documents;
use attachment_vault::migrate;
use attachment_vault::models::AttachmentRecord;
use attachment_vault::repository::AttachmentRepository;
use attachment_vault::scan;
use attachment_vault::source::SourceHandle;
use attachment_vault::stats;
use attachment_vault::status::{StatusMode, StatusSink};
use attachment_vault::use_cases::{self, ExternalReference};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Attachment Vault CLI — content-addressed attachment storage for a
/// personal document vault.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with `[db]`, `[storage]` and optional `[import]` sections.
#[derive(Parser)]
#[command(
    name = "vault",
    about = "Attachment Vault — content-addressed attachment storage for a personal document vault",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    /// Status output on stderr: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    status: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage root. Idempotent.
    Init,

    /// Import files (paths or `file://` URIs) into the vault.
    Import {
        sources: Vec<String>,

        /// Attach the imported files to this document.
        #[arg(long)]
        doc: Option<String>,
    },

    /// Import every file below a directory that matches `[import]` globs.
    ImportDir {
        dir: PathBuf,

        /// Attach the imported files to this document.
        #[arg(long)]
        doc: Option<String>,
    },

    /// List the attachments of a document.
    List { doc: String },

    /// Show one attachment.
    Get { id: String },

    /// Attach imported files to a document (all or nothing).
    Bind { doc: String, ids: Vec<String> },

    /// Delete an attachment's file and record.
    Delete { id: String },

    /// Remove every attachment bound to a document.
    DeleteDocAttachments { doc: String },

    /// Remove orphaned attachments.
    Gc {
        /// Instead, drop records whose file has disappeared.
        #[arg(long)]
        missing: bool,
    },

    /// Report attachments whose file is missing.
    Verify {
        /// Also re-hash every stored file and compare with its record.
        #[arg(long)]
        deep: bool,
    },

    /// List attachments sharing a content hash.
    Dupes { hash: String },

    /// Manage owning documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Copy a document's external references into the vault as one unit.
    Migrate { doc: String, sources: Vec<String> },

    /// Show vault statistics.
    Stats,
}

#[derive(Subcommand)]
enum DocAction {
    /// Create a document and print its id.
    Create { title: String },
    /// Delete a document and, by default, its attachments.
    Delete {
        id: String,
        /// Leave attachments for the next orphan sweep.
        #[arg(long)]
        keep_attachments: bool,
    },
    /// List documents with their attachment counts.
    List,
}

fn init_tracing() {
    // RUST_LOG   - standard env filter (default: "attachment_vault=warn")
    // LOG_FORMAT - "text" (default) or "json"
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "attachment_vault=warn".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn status_sink(flag: Option<&str>) -> anyhow::Result<Box<dyn StatusSink>> {
    let mode = match flag {
        Some(value) => StatusMode::parse(value).ok_or_else(|| {
            anyhow::anyhow!("Unknown status mode: '{}'. Must be human, json, or off.", value)
        })?,
        None => StatusMode::default_for_tty(),
    };
    Ok(mode.sink())
}

/// Cancel flag that flips on Ctrl-C so batch imports stop between items.
fn ctrl_c_flag() -> CancelFlag {
    let flag = CancelFlag::new();
    let handle = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    flag
}

fn handles(sources: &[String]) -> Vec<SourceHandle> {
    sources.iter().map(|s| SourceHandle::new(s.as_str())).collect()
}

fn print_record_line(record: &AttachmentRecord) {
    println!(
        "{}  {}  {:>10}  {}",
        record.id,
        short_hash(&record.content_hash),
        record.size_bytes,
        record.display_name
    );
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let status = status_sink(cli.status.as_deref())?;
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Vault initialized successfully.");
        return Ok(());
    }

    let repo = AttachmentRepository::open(&cfg).await?;
    let pool = repo.metadata_store().pool().clone();

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Import { sources, doc } => {
            let batch = use_cases::import_files(
                &repo,
                status.as_ref(),
                &handles(&sources),
                doc.as_deref(),
                &ctrl_c_flag(),
            )
            .await?;
            for record in &batch.records {
                print_record_line(record);
            }
            for failure in &batch.failures {
                eprintln!("failed: {}: {}", failure.source, failure.error);
            }
            println!("{}", use_cases::import_summary(&batch));
        }
        Commands::ImportDir { dir, doc } => {
            let sources = scan::scan_directory(&dir, &cfg.import)?;
            let batch = use_cases::import_files(
                &repo,
                status.as_ref(),
                &sources,
                doc.as_deref(),
                &ctrl_c_flag(),
            )
            .await?;
            for record in &batch.records {
                print_record_line(record);
            }
            println!("{}", use_cases::import_summary(&batch));
        }
        Commands::List { doc } => {
            let records = repo.get_attachments_by_doc(&doc).await;
            for record in &records {
                print_record_line(record);
            }
            println!("attachments: {}", records.len());
        }
        Commands::Get { id } => {
            let record = match repo.get_attachment(&id).await? {
                Some(r) => r,
                None => {
                    eprintln!("Error: attachment not found: {}", id);
                    std::process::exit(1);
                }
            };
            let intact = repo.validate_attachment_integrity(&record).await;

            println!("--- Attachment ---");
            println!("id:           {}", record.id);
            println!(
                "owner:        {}",
                record.owner_doc_id.as_deref().unwrap_or("(unbound)")
            );
            println!("name:         {}", record.display_name);
            println!("mime_type:    {}", record.mime_type);
            println!("size_bytes:   {}", record.size_bytes);
            println!("content_hash: {}", record.content_hash);
            println!("storage_path: {}", record.storage_path.display());
            println!("source_uri:   {}", record.source_uri);
            println!("created_at:   {}", format_ts_iso(record.created_at));
            println!("file_present: {}", intact);
        }
        Commands::Bind { doc, ids } => {
            repo.bind_attachments_to_doc(&ids, &doc).await?;
            println!("bound {} to {}", ids.len(), doc);
        }
        Commands::Delete { id } => {
            let removed = use_cases::delete_attachment(&repo, status.as_ref(), &id).await;
            println!("file removed: {}", removed);
        }
        Commands::DeleteDocAttachments { doc } => {
            let ok = use_cases::delete_document_attachments(&repo, status.as_ref(), &doc).await;
            println!("clean: {}", ok);
        }
        Commands::Gc { missing } => {
            let result = if missing {
                repo.purge_missing_files().await?
            } else {
                use_cases::cleanup_orphans(&repo, status.as_ref()).await?
            };
            println!("deleted files: {}", result.deleted_files);
            println!("deleted records: {}", result.deleted_records);
            println!("errors: {}", result.errors);
        }
        Commands::Verify { deep } => {
            let violations = repo.find_integrity_violations().await?;
            for v in &violations {
                println!("missing  {}  {}", v.attachment_id, v.storage_path.display());
            }

            let mut altered = 0usize;
            if deep {
                for record in repo.metadata_store().list_all().await? {
                    if let Ok(false) = repo.verify_content(&record).await {
                        println!("altered  {}  {}", record.id, record.storage_path.display());
                        altered += 1;
                    }
                }
            }

            println!("missing files: {}", violations.len());
            if deep {
                println!("altered files: {}", altered);
            }
        }
        Commands::Dupes { hash } => {
            let records = repo.find_duplicates(&hash).await?;
            for record in &records {
                println!(
                    "{}  {}  {}",
                    record.id,
                    record.owner_doc_id.as_deref().unwrap_or("(unbound)"),
                    record.display_name
                );
            }
            println!("matches: {}", records.len());
        }
        Commands::Doc { action } => match action {
            DocAction::Create { title } => {
                let id = documents::create_document(&pool, &title).await?;
                println!("{}", id);
            }
            DocAction::Delete {
                id,
                keep_attachments,
            } => {
                let deleted =
                    use_cases::delete_document(&repo, status.as_ref(), &id, !keep_attachments)
                        .await?;
                println!("deleted: {}", deleted);
            }
            DocAction::List => {
                for doc in documents::list_documents(&pool).await? {
                    println!("{}  {:>4}  {}", doc.id, doc.attachment_count, doc.title);
                }
            }
        },
        Commands::Migrate { doc, sources } => {
            let references = vec![ExternalReference {
                doc_id: doc,
                sources: handles(&sources),
            }];
            let report = use_cases::migrate_external_references(
                &repo,
                status.as_ref(),
                &references,
                &ctrl_c_flag(),
            )
            .await;
            for (_, records) in &report.migrated {
                for record in records {
                    print_record_line(record);
                }
            }
            for (doc_id, error) in &report.failed {
                eprintln!("failed: {}: {}", doc_id, error);
            }
            println!("migrated files: {}", report.file_count());
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Stats => {
            let summary = stats::collect_stats(&pool).await?;
            stats::print_stats(&summary);
        }
    }

    pool.close().await;
    Ok(())
}
