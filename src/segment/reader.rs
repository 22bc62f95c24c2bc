//! Immutable segment reader
//!
//! Every file of the segment is read into memory when the reader is opened,
//! so a reader stays valid after a later commit deletes the files.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use roaring::RoaringBitmap;

use super::compound::CompoundReader;
use super::field_writer::DocColumnReaders;
use super::matcher::Matcher;
use super::term_dict::TermIndex;
use super::terminfo::TermInfo;
use super::toc::SegmentMeta;
use super::types::{ext, segment_file, DocNum, FieldId, SegmentId};
use crate::columns::{ColumnReader, Value};
use crate::error::{FathomError, Result};
use crate::schema::Schema;
use crate::storage::Storage;

/// Read every file a segment owns, unpacking a compound file
fn load_files(storage: &dyn Storage, meta: &SegmentMeta) -> Result<HashMap<String, Bytes>> {
    let mut files = HashMap::with_capacity(meta.files.len());
    if meta.compound {
        let compound = CompoundReader::open(storage.read_file(&segment_file(meta.id, ext::COMPOUND))?)?;
        for name in compound.names() {
            files.insert(name.to_string(), compound.get(name)?);
        }
    } else {
        for name in &meta.files {
            files.insert(name.clone(), storage.read_file(name)?);
        }
    }
    Ok(files)
}

pub struct SegmentReader {
    meta: SegmentMeta,
    /// Field numbering of the TOC the segment was read from
    fields: Arc<Vec<String>>,
    deleted: RoaringBitmap,
    terms: TermIndex,
    postings: Bytes,
    vectors: Bytes,
    docs: DocColumnReaders,
}

impl SegmentReader {
    pub fn open(
        storage: &dyn Storage,
        meta: &SegmentMeta,
        schema: &Schema,
        fields: Arc<Vec<String>>,
    ) -> Result<Self> {
        let files = load_files(storage, meta)?;
        let require = |extension: &str| {
            let name = segment_file(meta.id, extension);
            files
                .get(&name)
                .cloned()
                .ok_or_else(|| FathomError::format(format!("{} is missing {}", meta.id, name)))
        };
        let terms = TermIndex::open(require(ext::TERMS)?)?;
        let postings = require(ext::POSTINGS)?;
        let vectors = require(ext::VECTORS)?;
        let docs = DocColumnReaders::open(schema, meta.id, |name| files.get(name).cloned())?;

        Ok(Self {
            meta: meta.clone(),
            fields,
            deleted: meta.deleted_set()?,
            terms,
            postings,
            vectors,
            docs,
        })
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn id(&self) -> SegmentId {
        self.meta.id
    }

    pub fn doc_count_all(&self) -> u32 {
        self.meta.doc_count_all
    }

    /// Live documents
    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count_all - self.deleted.len() as u32
    }

    pub fn is_deleted(&self, docnum: DocNum) -> bool {
        self.deleted.contains(docnum)
    }

    pub fn deleted(&self) -> &RoaringBitmap {
        &self.deleted
    }

    pub fn field_id(&self, field: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|f| f == field)
            .map(|i| i as FieldId)
    }

    pub fn field_name(&self, field: FieldId) -> Option<&str> {
        self.fields.get(field as usize).map(String::as_str)
    }

    pub fn term_info(&self, field: &str, term: &[u8]) -> Result<Option<TermInfo>> {
        match self.field_id(field) {
            Some(id) => self.terms.get(id, term),
            None => Ok(None),
        }
    }

    /// Matcher over a term's postings; deleted documents are included
    pub fn postings(&self, field: &str, term: &[u8]) -> Result<Option<Matcher>> {
        match self.term_info(field, term)? {
            Some(info) => self.matcher(&info).map(Some),
            None => Ok(None),
        }
    }

    pub fn matcher(&self, info: &TermInfo) -> Result<Matcher> {
        Matcher::new(self.postings.clone(), info)
    }

    pub fn terms(&self, field: &str) -> Result<Vec<(Vec<u8>, TermInfo)>> {
        match self.field_id(field) {
            Some(id) => self.terms.terms(id),
            None => Ok(Vec::new()),
        }
    }

    pub fn all_terms(&self) -> Result<Vec<(FieldId, Vec<u8>, TermInfo)>> {
        self.terms.all_terms()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn column(&self, field: &str) -> Option<&dyn ColumnReader> {
        self.docs.column(field)
    }

    pub fn field_length(&self, field: &str, docnum: DocNum) -> Result<u32> {
        self.check_docnum(docnum)?;
        self.docs.field_length(field, docnum)
    }

    pub fn field_length_total(&self, field: &str) -> u64 {
        self.meta
            .field_length_totals
            .get(field)
            .copied()
            .unwrap_or(0)
    }

    pub fn stored_fields(&self, docnum: DocNum) -> Result<BTreeMap<String, Value>> {
        self.check_docnum(docnum)?;
        self.docs.stored_fields(docnum)
    }

    /// Term vector of one document: entries in term order
    pub fn vector(&self, field: &str, docnum: DocNum) -> Result<Option<Matcher>> {
        self.check_docnum(docnum)?;
        match self.docs.vector_offset(field, docnum)? {
            Some(offset) => Matcher::at_offset(self.vectors.clone(), offset).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn doc_columns(&self) -> &DocColumnReaders {
        &self.docs
    }

    pub(crate) fn vector_bytes(&self) -> &Bytes {
        &self.vectors
    }

    fn check_docnum(&self, docnum: DocNum) -> Result<()> {
        if docnum >= self.meta.doc_count_all {
            return Err(FathomError::DocumentOutOfRange {
                docnum,
                doc_count: self.meta.doc_count_all,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("id", &self.meta.id)
            .field("doc_count_all", &self.meta.doc_count_all)
            .field("deleted", &self.deleted.len())
            .field("terms", &self.terms.len())
            .finish()
    }
}
