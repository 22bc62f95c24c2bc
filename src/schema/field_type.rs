//! Field declarations
//!
//! A `FieldSpec` says how one named field is written: whether its values are
//! indexed into postings, stored verbatim, kept as per-document term vectors,
//! and which column (if any) holds its per-document value.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::analyzer::{Analyzer, KeywordAnalyzer, WhitespaceAnalyzer};
use crate::columns::Column;

/// Shape of the payloads carried by a field's postings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingFormat {
    /// Every payload has exactly this many bytes; `None` allows any length
    pub payload_size: Option<usize>,
}

impl PostingFormat {
    pub fn fixed(payload_size: usize) -> Self {
        Self {
            payload_size: Some(payload_size),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub indexed: bool,
    pub stored: bool,
    pub vectored: bool,
    pub format: PostingFormat,
    pub column: Option<Column>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl FieldSpec {
    fn new(name: impl Into<String>, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            name: name.into(),
            indexed: true,
            stored: false,
            vectored: false,
            format: PostingFormat::default(),
            column: None,
            analyzer,
        }
    }

    /// Indexed as one exact term per value
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(KeywordAnalyzer))
    }

    /// Indexed as whitespace-separated terms
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(WhitespaceAnalyzer))
    }

    /// Not indexed; only the column value is written
    pub fn column_only(name: impl Into<String>, column: Column) -> Self {
        let mut spec = Self::new(name, Arc::new(KeywordAnalyzer));
        spec.indexed = false;
        spec.column = Some(column);
        spec
    }

    /// Not indexed; only the raw value is stored
    pub fn stored_only(name: impl Into<String>) -> Self {
        let mut spec = Self::new(name, Arc::new(KeywordAnalyzer));
        spec.indexed = false;
        spec.stored = true;
        spec
    }

    pub fn with_stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    pub fn with_vectors(mut self, vectored: bool) -> Self {
        self.vectored = vectored;
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_format(mut self, format: PostingFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Whether the writer produces anything for this field
    pub fn is_written(&self) -> bool {
        self.indexed || self.stored || self.vectored || self.column.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{NumericColumn, NumericType};

    #[test]
    fn test_field_constructors() {
        let keyword = FieldSpec::keyword("tag").with_stored(true);
        assert!(keyword.indexed && keyword.stored && !keyword.vectored);

        let price = FieldSpec::column_only("price", Column::Numeric(NumericColumn::new(NumericType::F64)));
        assert!(!price.indexed);
        assert!(price.column.is_some());
        assert!(price.is_written());

        let body = FieldSpec::text("body")
            .with_vectors(true)
            .with_format(PostingFormat::fixed(4));
        assert_eq!(body.format.payload_size, Some(4));
    }
}
