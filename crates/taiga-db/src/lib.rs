#![forbid(unsafe_code)]

//! Database backends for the taiga estimation engine.
//!
//! Two engines serve FIA tables behind one [`Backend`] contract: a SQLite
//! row store (rusqlite) and a columnar parquet store scanned through
//! polars. The [`Fia`] handle owns one connection plus the active clip
//! state (EVALIDs, states, spatially-selected plots) and the instance
//! caches; the evaluation resolver picks recommended EVALIDs.

/// The version of the taiga-db crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backend;
pub mod columnar;
pub mod database;
pub mod resolver;
pub mod schema;
pub mod spatial;
pub mod sqlite;

pub use backend::{Backend, EngineKind};
pub use columnar::ColumnarBackend;
pub use database::Fia;
pub use resolver::{EvalidResolver, RecommendedEvalid};
pub use schema::SchemaMapper;
pub use spatial::SpatialPredicate;
pub use sqlite::SqliteBackend;
