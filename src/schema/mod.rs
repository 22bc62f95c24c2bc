//! Schema and document types
//!
//! This module defines what the writer needs to know about fields:
//! - Field declarations (indexed, stored, vectored, column type)
//! - The analyzer contract that produces term tuples
//! - Documents as a map of field name to value

mod analyzer;
mod field_type;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::columns::Value;
use crate::error::{FathomError, Result};

pub use analyzer::{Analyzer, KeywordAnalyzer, Token, WhitespaceAnalyzer};
pub(crate) use analyzer::fold_tokens;
pub use field_type::{FieldSpec, PostingFormat};

/// Ordered set of field declarations
#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier declaration with the same name
    pub fn with_field(mut self, spec: FieldSpec) -> Self {
        match self.by_name.get(&spec.name) {
            Some(&i) => self.fields[i] = spec,
            None => {
                self.by_name.insert(spec.name.clone(), self.fields.len());
                self.fields.push(spec);
            }
        }
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Reject documents naming undeclared fields
    pub fn check(&self, doc: &Document) -> Result<()> {
        for name in doc.fields.keys() {
            if !self.by_name.contains_key(name) {
                return Err(FathomError::schema(format!("unknown field '{}'", name)));
            }
        }
        Ok(())
    }
}

/// A document: field name to value
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
