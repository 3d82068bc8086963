//! # Attachment Vault
//!
//! Content-addressed storage for the binary attachments (photos, PDFs) of a
//! local-first personal document vault.
//!
//! External files are streamed into a private storage root and hashed in
//! the same pass. Their metadata lives in SQLite next to the documents that
//! own them. Identical content is detectable by hash but never merged, and
//! attachments that lose their owning document are reclaimed by a garbage
//! collector.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   use cases ──▶ │  Repository  │ ──────────────┐
//!                 └──────┬───────┘               │
//!              ┌─────────┴─────────┐      ┌──────▼──────┐
//!              ▼                   ▼      │   Garbage   │
//!       ┌─────────────┐    ┌─────────────┐│  Collector  │
//!       │Content Store│    │Metadata Store│└─────────────┘
//!       │ files + hash│    │ SQLite+feeds │
//!       └─────────────┘    └──────┬──────┘
//!                                 ▼
//!                          per-owner watchers
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vault init                            # create database and storage root
//! vault doc create "Tax 2025"           # prints the document id
//! vault import ~/scans/*.pdf --doc <id> # import and attach
//! vault list <id>
//! vault gc                              # sweep orphaned attachments
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Attachment record and result types |
//! | [`error`] | Import, persistence and integrity errors |
//! | [`source`] | External source handles and resolvers |
//! | [`content_store`] | Physical files: streaming import, delete, open |
//! | [`metadata_store`] | SQLite attachment table and live feeds |
//! | [`feeds`] | Per-owner subscription registry |
//! | [`gc`] | Orphan and missing-file reconciliation |
//! | [`repository`] | Façade enforcing the file/record pairing |
//! | [`use_cases`] | Status-reporting orchestration |
//! | [`status`] | Status message sinks |
//! | [`documents`] | Minimal document directory |
//! | [`scan`] | Directory scanning for bulk import |
//! | [`stats`] | Vault statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cancel;
pub mod config;
pub mod content_store;
pub mod db;
pub mod documents;
pub mod error;
pub mod feeds;
pub mod gc;
pub mod metadata_store;
pub mod migrate;
pub mod models;
pub mod repository;
pub mod scan;
pub mod source;
pub mod stats;
pub mod status;
pub mod use_cases;
