//! # RAG Advisor
//!
//! Tenant-scoped retrieval-augmented generation: ingest documents under a
//! `(userId, conversationId)` scope, retrieve only that scope's chunks, and
//! ground chat answers in them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Sources   │──▶│  Ingestion   │──▶│ Vector store │
//! │ http/file  │   │ id→split→tag │   │ SQLite / mem │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │ filtered search
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐        ┌─────────────┐
//!                 │   CLI    │        │ HTTP (axum) │
//!                 │  (rag)   │        │ advisors+LLM│
//!                 └──────────┘        └─────────────┘
//! ```
//!
//! Pure logic (identity, filters, splitter, advisors, traits) lives in the
//! `rag-advisor-core` crate; this crate adds I/O: configuration, SQLite,
//! provider HTTP clients, source fetching, extraction and the server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`http`] | Provider HTTP client and retry policy |
//! | [`embedding`] | Embedding providers |
//! | [`chat_model`] | Chat model providers |
//! | [`source`] | Document locator resolution |
//! | [`extract`] | Text extraction |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Tenant-filtered retrieval |
//! | [`service`] | Application wiring |
//! | [`models`] | HTTP API types |
//! | [`server`] | HTTP server |

pub mod chat_model;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod service;
pub mod source;
pub mod sqlite_store;
