//! Segment writer
//!
//! One writer per index at a time, guarded by the advisory write lock.
//! Documents are analyzed as they are added: postings go to the posting
//! pool, per-document values to in-memory columns. Segments handed to
//! `add_reader` and then those chosen by the merge policy are folded into
//! the new segment ahead of the new documents. `commit` writes the segment
//! files, then publishes the next TOC.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use roaring::RoaringBitmap;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::compound::build_compound;
use super::field_writer::{
    copy_documents, encode_stored, write_postings, write_vector, DocColumnReaders, DocColumns,
};
use super::merge::MergeType;
use super::pool::{IdAllocator, Origin, PoolPosting, PostingPool};
use super::postings::PostingsWriter;
use super::reader::SegmentReader;
use super::term_dict::TermIndexWriter;
use super::toc::{SegmentMeta, Toc};
use super::types::{ext, segment_file, DocNum, FieldId, SegmentId, SEGMENT_FILE_PREFIX};
use crate::columns::ColumnWarning;
use crate::config::WriterConfig;
use crate::error::{FathomError, Result};
use crate::schema::{fold_tokens, Document, FieldSpec, Schema};
use crate::storage::{Storage, WriteLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Open,
    Committing,
    Closed,
    Cancelled,
}

/// Scratch state of an open writer, dropped on commit or cancel
struct Session {
    pool: PostingPool,
    new_docs: DocColumns,
    /// Rows copied from other segments, numbered from 0
    merged: DocColumns,
    merged_count: DocNum,
    vectors: PostingsWriter,
    temp: TempDir,
}

pub struct SegmentWriter {
    storage: Arc<dyn Storage>,
    schema: Arc<Schema>,
    config: WriterConfig,
    published: Arc<ArcSwap<Toc>>,
    /// TOC this writer started from, with the new segment id allocated
    toc: Toc,
    readers: Vec<Arc<SegmentReader>>,
    segment_id: SegmentId,
    state: WriterState,
    session: Option<Session>,
    lock: Option<WriteLock>,
    doc_count: u32,
    deletions: BTreeMap<SegmentId, RoaringBitmap>,
    warnings: Vec<ColumnWarning>,
}

impl SegmentWriter {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        schema: Arc<Schema>,
        config: WriterConfig,
        published: Arc<ArcSwap<Toc>>,
        lock: WriteLock,
        ids: Box<dyn IdAllocator>,
    ) -> Result<Self> {
        let mut toc = Toc::read_latest(storage.as_ref())?.unwrap_or_default();
        toc.ensure_fields(schema.fields().map(|f| f.name.as_str()))?;
        let fields = Arc::new(toc.fields.clone());
        let readers = toc
            .segments
            .iter()
            .map(|meta| {
                SegmentReader::open(storage.as_ref(), meta, &schema, fields.clone()).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let segment_id = toc.allocate_segment_id();

        let temp = storage.temp_dir()?;
        let session = Session {
            pool: PostingPool::new(temp.path(), config.pool_limit_bytes, ids),
            new_docs: DocColumns::new(&schema),
            merged: DocColumns::new(&schema),
            merged_count: 0,
            vectors: PostingsWriter::new(&config).without_inlining(),
            temp,
        };
        info!(
            segment = %segment_id,
            generation = toc.generation,
            segments = readers.len(),
            "Opened segment writer"
        );

        Ok(Self {
            storage,
            schema,
            config,
            published,
            toc,
            readers,
            segment_id,
            state: WriterState::Open,
            session: Some(session),
            lock: Some(lock),
            doc_count: 0,
            deletions: BTreeMap::new(),
            warnings: Vec::new(),
        })
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Documents added in this session
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Soft overflows recorded while writing columns
    pub fn warnings(&self) -> &[ColumnWarning] {
        &self.warnings
    }

    fn check_open(&self, operation: &str) -> Result<()> {
        if self.state != WriterState::Open {
            return Err(FathomError::state(format!(
                "{} called on a {:?} writer",
                operation, self.state
            )));
        }
        Ok(())
    }

    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        self.check_open("add_document")?;
        self.schema.check(doc)?;

        // Analyze and validate every field before buffering anything
        let mut analyzed = Vec::new();
        let mut scratch = Vec::new();
        for spec in self.schema.fields() {
            let value = match doc.get(&spec.name) {
                Some(value) => value,
                None => continue,
            };
            if let Some(column) = &spec.column {
                scratch.clear();
                column.encode_element(value, &mut scratch)?;
            }
            let tokens = if spec.indexed || spec.vectored {
                fold_tokens(spec.analyzer.analyze(value)?)
            } else {
                Vec::new()
            };
            analyzed.push((spec, value, tokens));
        }

        let docnum = self.doc_count;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| FathomError::state("writer has no open session"))?;
        let mut stored = BTreeMap::new();
        for (spec, value, tokens) in analyzed {
            let length: u32 = tokens.iter().map(|t| t.frequency).sum();
            if spec.indexed {
                let field = self.toc.field_id(&spec.name).ok_or_else(|| {
                    FathomError::state(format!("field '{}' has no id", spec.name))
                })?;
                for token in &tokens {
                    session.pool.add(PoolPosting {
                        field,
                        term: token.text.clone(),
                        origin: Origin::New,
                        docnum,
                        weight: token.weight,
                        payload: token.payload.clone(),
                        length,
                    })?;
                }
                session.new_docs.add_length(&spec.name, docnum, length)?;
            }
            if spec.vectored {
                let entries: Vec<_> = tokens
                    .into_iter()
                    .map(|t| (t.text, t.weight, t.payload))
                    .collect();
                let offset = write_vector(&mut session.vectors, spec.format, &entries)?;
                if offset != 0 {
                    session.new_docs.add_vector_offset(&spec.name, docnum, offset)?;
                }
            }
            if spec.column.is_some() {
                session.new_docs.add_column(&spec.name, docnum, value)?;
            }
            if spec.stored {
                stored.insert(spec.name.clone(), value.clone());
            }
        }
        if !stored.is_empty() {
            session.new_docs.add_stored(docnum, encode_stored(&stored)?)?;
        }
        self.doc_count += 1;
        Ok(())
    }

    /// Mark a document of the existing segments deleted. Document numbers
    /// run across the segments in TOC order.
    pub fn delete_document(&mut self, docnum: DocNum) -> Result<()> {
        self.check_open("delete_document")?;
        let mut base = 0u64;
        for reader in &self.readers {
            let count = reader.doc_count_all() as u64;
            if (docnum as u64) < base + count {
                let local = (docnum as u64 - base) as DocNum;
                if !reader.is_deleted(local) {
                    self.deletions.entry(reader.id()).or_default().insert(local);
                }
                return Ok(());
            }
            base += count;
        }
        Err(FathomError::DocumentOutOfRange {
            docnum,
            doc_count: base.min(u32::MAX as u64) as u32,
        })
    }

    /// Delete every existing document containing `term`; returns how many
    /// documents were newly marked
    pub fn delete_by_term(&mut self, field: &str, term: &[u8]) -> Result<u64> {
        self.check_open("delete_by_term")?;
        let mut count = 0;
        for reader in &self.readers {
            let mut matcher = match reader.postings(field, term)? {
                Some(matcher) => matcher,
                None => continue,
            };
            for id in matcher.all_ids()? {
                if !reader.is_deleted(id)
                    && self.deletions.entry(reader.id()).or_default().insert(id)
                {
                    count += 1;
                }
            }
        }
        debug!(field, deleted = count, "Deleted by term");
        Ok(count)
    }

    /// Whether a document of an existing segment is deleted, committed or
    /// pending
    pub fn is_deleted(&self, segment: SegmentId, docnum: DocNum) -> bool {
        let committed = self
            .readers
            .iter()
            .any(|r| r.id() == segment && r.is_deleted(docnum));
        committed
            || self
                .deletions
                .get(&segment)
                .map_or(false, |d| d.contains(docnum))
    }

    /// Copy the live documents of a segment into the new one, typically a
    /// segment of another index sharing this schema. They are numbered
    /// after earlier merged documents and before this session's new ones.
    /// The source segment is left as it is.
    pub fn add_reader(&mut self, reader: &SegmentReader) -> Result<()> {
        self.check_open("add_reader")?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| FathomError::state("writer has no open session"))?;
        fold_reader(&self.schema, &self.toc, session, reader, None)
    }

    pub fn commit(&mut self, merge: MergeType) -> Result<Arc<Toc>> {
        self.check_open("commit")?;
        self.state = WriterState::Committing;
        let session = self
            .session
            .take()
            .ok_or_else(|| FathomError::state("writer has no open session"))?;

        let result = self.finish(session, merge);
        self.lock = None;
        match result {
            Ok(toc) => {
                self.state = WriterState::Closed;
                info!(
                    generation = toc.generation,
                    segments = toc.segments.len(),
                    docs = toc.doc_count(),
                    "Committed"
                );
                Ok(toc)
            }
            Err(e) => {
                self.state = WriterState::Cancelled;
                warn!(error = %e, "Commit failed, previous TOC left in place");
                Err(e)
            }
        }
    }

    /// Discard everything added in this session
    pub fn cancel(&mut self) -> Result<()> {
        self.check_open("cancel")?;
        self.session = None;
        self.lock = None;
        self.state = WriterState::Cancelled;
        info!(segment = %self.segment_id, discarded = self.doc_count, "Cancelled writer");
        Ok(())
    }

    fn reader(&self, id: SegmentId) -> Result<Arc<SegmentReader>> {
        self.readers
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| FathomError::state(format!("{} is not in the writer's TOC", id)))
    }

    fn finish(&mut self, mut session: Session, merge: MergeType) -> Result<Arc<Toc>> {
        let mut metas = Vec::with_capacity(self.toc.segments.len());
        for meta in &self.toc.segments {
            let mut meta = meta.clone();
            if let Some(pending) = self.deletions.get(&meta.id) {
                let mut deleted = meta.deleted_set()?;
                deleted |= pending;
                meta.set_deleted(&deleted)?;
            }
            metas.push(meta);
        }
        let plan = merge.plan(&metas);

        for id in &plan.merge {
            let reader = self.reader(*id)?;
            fold_reader(
                &self.schema,
                &self.toc,
                &mut session,
                &reader,
                self.deletions.get(id),
            )?;
        }

        let Session {
            pool,
            new_docs,
            merged: mut output,
            merged_count,
            mut vectors,
            temp,
        } = session;

        // New documents follow the merged ones
        let buffered = new_docs.finish(self.segment_id, self.doc_count)?;
        self.warnings.extend(buffered.warnings);
        let files: HashMap<String, Bytes> = buffered
            .files
            .into_iter()
            .map(|(name, data)| (name, Bytes::from(data)))
            .collect();
        let buffered = DocColumnReaders::open(&self.schema, self.segment_id, |name| {
            files.get(name).cloned()
        })?;
        let map: Vec<Option<DocNum>> = (0..self.doc_count)
            .map(|d| Some(merged_count + d))
            .collect();
        copy_documents(&self.schema, &buffered, None, &mut output, &mut vectors, &map)?;

        let generation = self.toc.generation + 1;
        let mut segments: Vec<SegmentMeta> = metas
            .into_iter()
            .filter(|meta| plan.keep.contains(&meta.id))
            .collect();
        let doc_count_all = merged_count + self.doc_count;
        if doc_count_all > 0 {
            segments.push(self.write_segment(
                pool,
                vectors,
                output,
                merged_count,
                doc_count_all,
                generation,
            )?);
        }
        drop(temp);

        let mut toc = self.toc.clone();
        toc.generation = generation;
        toc.segments = segments;
        toc.write(self.storage.as_ref())?;
        self.remove_unreferenced(&toc);

        let toc = Arc::new(toc);
        self.published.store(toc.clone());
        Ok(toc)
    }

    fn write_segment(
        &mut self,
        pool: PostingPool,
        vectors: PostingsWriter,
        output: DocColumns,
        merged_count: DocNum,
        doc_count_all: u32,
        generation: u64,
    ) -> Result<SegmentMeta> {
        let id = self.segment_id;
        let mut postings = PostingsWriter::new(&self.config);
        let mut terms = TermIndexWriter::new();
        let schema = &self.schema;
        let fields = &self.toc.fields;
        let format_of = |field: FieldId| {
            fields
                .get(field as usize)
                .and_then(|name| schema.field(name))
                .map(|spec| spec.format)
                .unwrap_or_default()
        };
        let spilled = pool.run_count();
        let term_count = write_postings(
            pool.into_sorted()?,
            format_of,
            merged_count,
            &mut postings,
            &mut terms,
        )?;

        let docs = output.finish(id, doc_count_all)?;
        self.warnings.extend(docs.warnings);
        let mut files = vec![
            (segment_file(id, ext::TERMS), terms.finish()?),
            (segment_file(id, ext::POSTINGS), postings.into_bytes()?),
            (segment_file(id, ext::VECTORS), vectors.into_bytes()?),
        ];
        files.extend(docs.files);

        let mut meta = SegmentMeta::new(id, generation, doc_count_all);
        meta.field_length_totals = docs.length_totals;
        if self.config.compound {
            let data = build_compound(&files)?;
            let name = segment_file(id, ext::COMPOUND);
            self.storage.write_file(&name, &data)?;
            meta.compound = true;
            meta.size_bytes = data.len() as u64;
            meta.files = vec![name];
        } else {
            for (name, data) in &files {
                self.storage.write_file(name, data)?;
                meta.size_bytes += data.len() as u64;
                meta.files.push(name.clone());
            }
        }
        info!(
            segment = %id,
            docs = doc_count_all,
            merged = merged_count,
            terms = term_count,
            spilled_runs = spilled,
            bytes = meta.size_bytes,
            compound = meta.compound,
            "Wrote segment"
        );
        Ok(meta)
    }

    /// Delete segment files no segment of `toc` owns, and older TOCs
    fn remove_unreferenced(&self, toc: &Toc) {
        let referenced: HashSet<&str> = toc
            .segments
            .iter()
            .flat_map(|s| s.files.iter().map(String::as_str))
            .collect();
        let names = match self.storage.list() {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list index files for cleanup");
                return;
            }
        };
        for name in names {
            let stale = match Toc::parse_file_name(&name) {
                Some(generation) => generation < toc.generation,
                None => name.starts_with(SEGMENT_FILE_PREFIX) && !referenced.contains(name.as_str()),
            };
            if !stale {
                continue;
            }
            match self.storage.delete(&name) {
                Ok(()) => debug!(file = %name, "Deleted unreferenced file"),
                Err(e) => warn!(file = %name, error = %e, "Could not delete unreferenced file"),
            }
        }
    }
}

/// Fold the live documents of `reader` into the session's merged rows.
/// Field ids are translated by name, so the reader may come from another
/// index.
fn fold_reader(
    schema: &Schema,
    toc: &Toc,
    session: &mut Session,
    reader: &SegmentReader,
    pending: Option<&RoaringBitmap>,
) -> Result<()> {
    // Check everything against the schema before touching the session
    let mut terms = Vec::new();
    for (field, term, info) in reader.all_terms()? {
        let name = reader.field_name(field).ok_or_else(|| {
            FathomError::format(format!("{} uses unknown field id {}", reader.id(), field))
        })?;
        let indexed = schema.field(name).map_or(false, |spec| spec.indexed);
        let target = toc.field_id(name).filter(|_| indexed).ok_or_else(|| {
            FathomError::schema(format!(
                "{} has postings for field '{}', which is not indexed here",
                reader.id(),
                name
            ))
        })?;
        terms.push((target, name, term, info));
    }
    let source = reader.doc_columns();
    let checks: [(&str, Vec<&String>, fn(&FieldSpec) -> bool); 3] = [
        ("column", source.columns.keys().collect(), |spec| spec.column.is_some()),
        ("length", source.lengths.keys().collect(), |spec| spec.indexed),
        ("vector", source.vector_offsets.keys().collect(), |spec| spec.vectored),
    ];
    for (kind, names, fits) in checks {
        for name in names {
            if !schema.field(name).map_or(false, fits) {
                return Err(FathomError::schema(format!(
                    "{} has {} data for field '{}', which this schema lacks",
                    reader.id(),
                    kind,
                    name
                )));
            }
        }
    }

    let base = session.merged_count;
    let mut next = base;
    let mut map = Vec::with_capacity(reader.doc_count_all() as usize);
    for docnum in 0..reader.doc_count_all() {
        let deleted = reader.is_deleted(docnum) || pending.map_or(false, |p| p.contains(docnum));
        if deleted {
            map.push(None);
        } else {
            map.push(Some(next));
            next = next
                .checked_add(1)
                .ok_or_else(|| FathomError::state("merged segment exceeds u32 documents"))?;
        }
    }

    for (field, name, term, info) in terms {
        let mut matcher = reader.matcher(&info)?;
        while matcher.is_active() {
            let id = matcher.id()?;
            if let Some(docnum) = map.get(id as usize).copied().flatten() {
                session.pool.add(PoolPosting {
                    field,
                    term: term.clone(),
                    origin: Origin::Merged,
                    docnum,
                    weight: matcher.weight()?,
                    payload: matcher.payload()?.to_vec(),
                    length: source.field_length(name, id)?,
                })?;
            }
            matcher.next()?;
        }
    }

    copy_documents(
        schema,
        source,
        Some(reader.vector_bytes()),
        &mut session.merged,
        &mut session.vectors,
        &map,
    )?;
    session.merged_count = next;
    debug!(
        segment = %reader.id(),
        live = next - base,
        dropped = reader.doc_count_all() - (next - base),
        "Merged segment"
    );
    Ok(())
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            debug!(
                segment = %self.segment_id,
                discarded = self.doc_count,
                "Writer dropped without commit"
            );
        }
    }
}
