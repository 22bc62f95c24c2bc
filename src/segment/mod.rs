//! Segment files, the TOC and the writer that produces them
//!
//! # Layout
//!
//! - `PostingsWriter` / `Matcher`: block-structured postings and their cursor
//! - `TermIndex`: fst-backed map from `(field, term)` to `TermInfo`
//! - `PostingPool`: external sort of raw postings during a write session
//! - `Toc`: versioned list of live segments, replaced atomically per commit
//! - `SegmentWriter`: buffers documents, merges segments, publishes a TOC
//! - `Index` / `IndexReader`: handle and snapshot reader over the TOC

mod types;
mod bitpack;
mod block;
mod terminfo;
mod postings;
mod matcher;
mod term_dict;
mod pool;
mod toc;
mod merge;
mod compound;
mod field_writer;
mod reader;
mod writer;
mod index;

pub use types::*;
pub use bitpack::*;
pub use block::*;
pub use terminfo::*;
pub use postings::*;
pub use matcher::*;
pub use term_dict::*;
pub use pool::*;
pub use toc::*;
pub use merge::*;
pub use compound::*;
pub use field_writer::DocColumnReaders;
pub use reader::*;
pub use writer::*;
pub use index::*;
