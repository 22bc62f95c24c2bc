//! Fathom: an embeddable segment-based full-text index storage engine
//!
//! Documents are written through a single [`SegmentWriter`] per index into
//! immutable segments listed by a versioned TOC. Readers open a snapshot of
//! one TOC generation.

pub mod columns;
pub mod config;
pub mod error;
pub mod schema;
pub mod segment;
pub mod storage;

pub use columns::{Column, ColumnReader, ColumnWarning, Value};
pub use config::{WriterConfig, WriterProfile};
pub use error::{FathomError, Result};
pub use schema::{Analyzer, Document, FieldSpec, PostingFormat, Schema, Token};
pub use segment::{Index, IndexReader, MergeType, SegmentReader, SegmentWriter, Toc, WriterState};
pub use storage::{FileStorage, Storage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
