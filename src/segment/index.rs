//! Index handle
//!
//! An `Index` owns the storage, the schema and the currently published TOC.
//! Readers are snapshots of one TOC generation and never observe a commit
//! that happens after they were opened.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info};

use super::pool::{IdAllocator, SequentialIdAllocator};
use super::reader::SegmentReader;
use super::toc::Toc;
use super::types::DocNum;
use super::writer::SegmentWriter;
use crate::columns::Value;
use crate::config::WriterConfig;
use crate::error::{FathomError, Result};
use crate::schema::Schema;
use crate::storage::{acquire_lock, Storage, WRITE_LOCK};

pub struct Index {
    storage: Arc<dyn Storage>,
    schema: Arc<Schema>,
    config: WriterConfig,
    toc: Arc<ArcSwap<Toc>>,
}

impl Index {
    /// Initialize an empty index: writes generation 0 of the TOC
    pub fn create(storage: Arc<dyn Storage>, schema: Schema, config: WriterConfig) -> Result<Self> {
        let _lock = acquire_lock(
            storage.as_ref(),
            WRITE_LOCK,
            config.lock_timeout,
            config.lock_retry_delay,
        )?;
        if !Toc::generations(storage.as_ref())?.is_empty() {
            return Err(FathomError::state("an index already exists in this storage"));
        }
        let mut toc = Toc::new();
        toc.ensure_fields(schema.fields().map(|f| f.name.as_str()))?;
        toc.write(storage.as_ref())?;
        info!(fields = toc.fields.len(), "Created index");

        Ok(Self {
            storage,
            schema: Arc::new(schema),
            config,
            toc: Arc::new(ArcSwap::from_pointee(toc)),
        })
    }

    pub fn open(storage: Arc<dyn Storage>, schema: Schema, config: WriterConfig) -> Result<Self> {
        let toc = Toc::read_latest(storage.as_ref())?
            .ok_or_else(|| FathomError::state("no index found in this storage"))?;
        debug!(
            generation = toc.generation,
            segments = toc.segments.len(),
            "Opened index"
        );
        Ok(Self {
            storage,
            schema: Arc::new(schema),
            config,
            toc: Arc::new(ArcSwap::from_pointee(toc)),
        })
    }

    pub fn open_or_create(
        storage: Arc<dyn Storage>,
        schema: Schema,
        config: WriterConfig,
    ) -> Result<Self> {
        if Toc::generations(storage.as_ref())?.is_empty() {
            Self::create(storage, schema, config)
        } else {
            Self::open(storage, schema, config)
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The TOC last published through this handle
    pub fn toc(&self) -> Arc<Toc> {
        self.toc.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.toc.load().generation
    }

    /// Pick up commits made through other handles
    pub fn refresh(&self) -> Result<Arc<Toc>> {
        if let Some(latest) = Toc::read_latest(self.storage.as_ref())? {
            if latest.generation != self.generation() {
                debug!(generation = latest.generation, "Refreshed TOC");
                self.toc.store(Arc::new(latest));
            }
        }
        Ok(self.toc())
    }

    /// Snapshot reader over the current TOC
    pub fn reader(&self) -> Result<IndexReader> {
        IndexReader::open(self.storage.as_ref(), &self.schema, self.toc())
    }

    /// Take the write lock and open a writer over the latest TOC
    pub fn writer(&self) -> Result<SegmentWriter> {
        self.writer_with_allocator(Box::new(SequentialIdAllocator::default()))
    }

    pub fn writer_with_allocator(&self, ids: Box<dyn IdAllocator>) -> Result<SegmentWriter> {
        let lock = acquire_lock(
            self.storage.as_ref(),
            WRITE_LOCK,
            self.config.lock_timeout,
            self.config.lock_retry_delay,
        )?;
        self.refresh()?;
        SegmentWriter::new(
            self.storage.clone(),
            self.schema.clone(),
            self.config.clone(),
            self.toc.clone(),
            lock,
            ids,
        )
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("storage", &self.storage)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Read-only view over every segment of one TOC generation. Document
/// numbers run across the segments in TOC order.
#[derive(Debug)]
pub struct IndexReader {
    toc: Arc<Toc>,
    segments: Vec<(DocNum, Arc<SegmentReader>)>,
}

impl IndexReader {
    pub fn open(storage: &dyn Storage, schema: &Schema, toc: Arc<Toc>) -> Result<Self> {
        let fields = Arc::new(toc.fields.clone());
        let mut segments = Vec::with_capacity(toc.segments.len());
        let mut base: DocNum = 0;
        for meta in &toc.segments {
            let reader = SegmentReader::open(storage, meta, schema, fields.clone())?;
            segments.push((base, Arc::new(reader)));
            base = base.checked_add(meta.doc_count_all).ok_or_else(|| {
                FathomError::format("document numbers overflow across segments")
            })?;
        }
        Ok(Self { toc, segments })
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn generation(&self) -> u64 {
        self.toc.generation
    }

    pub fn doc_count_all(&self) -> u64 {
        self.toc.doc_count_all()
    }

    pub fn doc_count(&self) -> u64 {
        self.toc.doc_count()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Arc<SegmentReader>> {
        self.segments.iter().map(|(_, reader)| reader)
    }

    /// Segment holding global `docnum`, with the segment-local number
    fn locate(&self, docnum: DocNum) -> Result<(&SegmentReader, DocNum)> {
        for (base, reader) in &self.segments {
            if docnum >= *base && docnum - base < reader.doc_count_all() {
                return Ok((reader, docnum - base));
            }
        }
        Err(FathomError::DocumentOutOfRange {
            docnum,
            doc_count: self.doc_count_all().min(u32::MAX as u64) as u32,
        })
    }

    pub fn is_deleted(&self, docnum: DocNum) -> Result<bool> {
        let (reader, local) = self.locate(docnum)?;
        Ok(reader.is_deleted(local))
    }

    /// Live documents containing `term`, in ascending order
    pub fn term_docs(&self, field: &str, term: &[u8]) -> Result<Vec<DocNum>> {
        let mut docs = Vec::new();
        for (base, reader) in &self.segments {
            if let Some(mut matcher) = reader.postings(field, term)? {
                docs.extend(
                    matcher
                        .all_ids()?
                        .into_iter()
                        .filter(|id| !reader.is_deleted(*id))
                        .map(|id| base + id),
                );
            }
        }
        Ok(docs)
    }

    pub fn doc_frequency(&self, field: &str, term: &[u8]) -> Result<u64> {
        Ok(self.term_docs(field, term)?.len() as u64)
    }

    pub fn stored_fields(&self, docnum: DocNum) -> Result<BTreeMap<String, Value>> {
        let (reader, local) = self.locate(docnum)?;
        reader.stored_fields(local)
    }

    /// Column value of a document; `None` when the field has no column
    pub fn column_value(&self, field: &str, docnum: DocNum) -> Result<Option<Value>> {
        let (reader, local) = self.locate(docnum)?;
        reader.column(field).map(|c| c.get(local)).transpose()
    }

    pub fn field_length(&self, field: &str, docnum: DocNum) -> Result<u32> {
        let (reader, local) = self.locate(docnum)?;
        reader.field_length(field, local)
    }

    /// Term vector entries `(term, weight, payload)` in term order
    pub fn vector(&self, field: &str, docnum: DocNum) -> Result<Vec<(Vec<u8>, f32, Vec<u8>)>> {
        let (reader, local) = self.locate(docnum)?;
        match reader.vector(field, local)? {
            Some(mut matcher) => matcher.all_terms(),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Document, FieldSpec};
    use crate::segment::MergeType;
    use crate::storage::FileStorage;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new()
            .with_field(FieldSpec::keyword("id").with_stored(true))
            .with_field(FieldSpec::text("body").with_vectors(true))
    }

    fn index(dir: &TempDir) -> Index {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        Index::open_or_create(storage, schema(), WriterConfig::default()).unwrap()
    }

    #[test]
    fn test_create_then_open() {
        let dir = TempDir::new().unwrap();
        let created = index(&dir);
        assert_eq!(created.generation(), 0);
        assert_eq!(created.toc().fields, vec!["id", "body"]);

        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        assert!(matches!(
            Index::create(storage.clone(), schema(), WriterConfig::default()),
            Err(FathomError::State(_))
        ));
        assert_eq!(Index::open(storage, schema(), WriterConfig::default()).unwrap().generation(), 0);
    }

    #[test]
    fn test_open_missing_index() {
        let dir = TempDir::new().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        assert!(Index::open(storage, schema(), WriterConfig::default()).is_err());
    }

    #[test]
    fn test_reader_is_a_snapshot() {
        let dir = TempDir::new().unwrap();
        let index = index(&dir);
        let mut writer = index.writer().unwrap();
        writer
            .add_document(&Document::new().with("id", Value::text("1")).with("body", Value::text("x y x")))
            .unwrap();
        writer.commit(MergeType::NoMerge).unwrap();

        let before = index.reader().unwrap();
        let mut writer = index.writer().unwrap();
        writer
            .add_document(&Document::new().with("id", Value::text("2")).with("body", Value::text("y")))
            .unwrap();
        writer.commit(MergeType::NoMerge).unwrap();

        assert_eq!(before.doc_count_all(), 1);
        assert_eq!(index.generation(), 2);
        let after = index.reader().unwrap();
        assert_eq!(after.doc_count_all(), 2);
        assert_eq!(after.term_docs("body", b"y").unwrap(), vec![0, 1]);
        assert_eq!(after.field_length("body", 0).unwrap(), 3);
        assert_eq!(
            after.stored_fields(1).unwrap().get("id"),
            Some(&Value::text("2"))
        );
        let vector = after.vector("body", 0).unwrap();
        let terms: Vec<&[u8]> = vector.iter().map(|(t, _, _)| t.as_slice()).collect();
        assert_eq!(terms, vec![&b"x"[..], &b"y"[..]]);
        assert!(after.stored_fields(2).is_err());
    }
}
