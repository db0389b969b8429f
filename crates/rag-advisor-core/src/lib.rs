//! # rag-advisor core
//!
//! Pure logic shared by the `rag-advisor` service: document identity,
//! tenant-scoped filter construction, the filter expression language, the
//! token-budget splitter, the vector store and model traits, and the
//! advisor pipeline that injects retrieved chunks into a chat prompt.
//!
//! This crate performs no network, database, or filesystem I/O. The
//! application crate supplies concrete embedding models, chat models and
//! persistent stores through the traits defined here.

pub mod advisor;
pub mod chat;
pub mod chunk;
pub mod client;
pub mod embedding;
pub mod filter;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod output;
pub mod store;
pub mod tenant;

pub use identity::DocId;
pub use models::{Document, Metadata};
pub use tenant::TenantScope;
