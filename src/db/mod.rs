//! Engine-independent SQL building blocks.
//!
//! This module provides the pieces every adapter shares:
//! - Literal and identifier rendering
//! - Portable DDL generation
//! - SQLite table rebuild planning and `CREATE TABLE` text editing
//! - Statement classification
//! - Row decoding
//! - Dump formatting
//! - The per-adapter session handle

pub mod ddl;
pub mod export;
pub mod literal;
#[macro_use]
pub mod macros;
pub mod params;
pub mod rebuild;
pub mod session;
pub mod statement;
pub mod table_sql;
pub mod types;

pub use macros::Dialect;
pub use session::Session;
pub use statement::StatementKind;
pub use types::DecodeRow;
