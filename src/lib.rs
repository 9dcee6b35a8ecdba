//! # swimstats
//!
//! Incremental ingestion of swim-meet result PDFs published on an
//! ownCloud/Nextcloud share, into a local SQLite store for analysis.
//!
//! A sync walks a remote directory over WebDAV, compares every PDF against
//! the `(etag, size)` fingerprint stored for it, and reprocesses only new or
//! changed documents: download, decide whether the document is a results
//! sheet, extract one row per swimmer result, and replace that document's
//! rows in a single transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────────────┐   ┌──────────┐
//! │   WebDAV    │──▶│ detect → parse → store │──▶│  SQLite  │
//! │  (ownCloud) │   │  (per changed PDF)     │   │ files +  │
//! └─────────────┘   └───────────────────────┘   │ results  │
//!                                               └────┬─────┘
//!                                                    ▼
//!                                   ┌──────────────────────────┐
//!                                   │ query / analysis / report │
//!                                   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! swim init                              # create database
//! swim categories add "2. TENERIFE"      # register a sync scope
//! swim sync --tag 2024-25                # sync every enabled scope
//! swim report --sex FEM --yy 12 --swimmer-key "GARCIA ANA"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Core data types |
//! | [`normalize`] | Time and name normalization |
//! | [`events`] | Event header classification |
//! | [`detect`] | Results-document scoring |
//! | [`extract`] | Page text extraction |
//! | [`parse`] | Result line extraction |
//! | [`webdav`] | Remote listing and download |
//! | [`store`] | Persistence of documents and rows |
//! | [`ingest`] | Incremental sync |
//! | [`progress`] | Sync progress observers |
//! | [`query`] | Analytical queries |
//! | [`analysis`] | Percentile and rank math |
//! | [`report`] | Per-swimmer event report |
//! | [`stats`] | Database overview |

pub mod analysis;
pub mod config;
pub mod db;
pub mod detect;
pub mod events;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod parse;
pub mod progress;
pub mod query;
pub mod report;
pub mod stats;
pub mod store;
pub mod webdav;
