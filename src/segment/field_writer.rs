//! Per-segment output: document columns, term vectors and postings
//!
//! `DocColumns` holds one column writer per per-document file of a segment
//! (declared columns, field lengths, vector offsets and stored fields).
//! `DocColumnReaders` is the matching read side. Copying rows from readers
//! into writers is how both merged segments and the writer's buffered new
//! documents reach the final segment.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

use super::matcher::Matcher;
use super::pool::{Origin, PoolPosting};
use super::postings::PostingsWriter;
use super::term_dict::TermIndexWriter;
use super::types::{ext, field_file, segment_file, DocNum, FieldId, SegmentId};
use crate::columns::{
    ColumnReader, ColumnWarning, ColumnWriter, NumericColumn, NumericType, Value, VarBytesColumn,
};
use crate::error::{FathomError, Result};
use crate::schema::{PostingFormat, Schema};

fn lengths_column() -> NumericColumn {
    NumericColumn::new(NumericType::U32)
}

fn vector_offsets_column() -> NumericColumn {
    NumericColumn::new(NumericType::U64)
}

fn stored_column() -> VarBytesColumn {
    VarBytesColumn::new(Vec::new())
}

pub(crate) fn value_to_u64(value: &Value) -> Result<u64> {
    match value {
        Value::UInt(v) => Ok(*v),
        Value::Int(v) if *v >= 0 => Ok(*v as u64),
        other => Err(FathomError::format(format!(
            "expected an unsigned value, found {:?}",
            other
        ))),
    }
}

/// Writers for every per-document file of one segment
pub(crate) struct DocColumns {
    columns: BTreeMap<String, Box<dyn ColumnWriter>>,
    lengths: BTreeMap<String, Box<dyn ColumnWriter>>,
    vector_offsets: BTreeMap<String, Box<dyn ColumnWriter>>,
    stored: Box<dyn ColumnWriter>,
    length_totals: BTreeMap<String, u64>,
}

/// Files produced by `DocColumns::finish`
pub(crate) struct FinishedDocColumns {
    pub files: Vec<(String, Vec<u8>)>,
    pub warnings: Vec<ColumnWarning>,
    pub length_totals: BTreeMap<String, u64>,
}

impl DocColumns {
    pub fn new(schema: &Schema) -> Self {
        let mut columns = BTreeMap::new();
        let mut lengths = BTreeMap::new();
        let mut vector_offsets = BTreeMap::new();
        let mut length_totals = BTreeMap::new();
        for spec in schema.fields() {
            if let Some(column) = &spec.column {
                columns.insert(spec.name.clone(), column.writer());
            }
            if spec.indexed {
                lengths.insert(
                    spec.name.clone(),
                    Box::new(lengths_column().writer()) as Box<dyn ColumnWriter>,
                );
                length_totals.insert(spec.name.clone(), 0);
            }
            if spec.vectored {
                vector_offsets.insert(
                    spec.name.clone(),
                    Box::new(vector_offsets_column().writer()) as Box<dyn ColumnWriter>,
                );
            }
        }
        Self {
            columns,
            lengths,
            vector_offsets,
            stored: Box::new(stored_column().writer()),
            length_totals,
        }
    }

    /// Add a column value; fields without a declared column are ignored
    pub fn add_column(&mut self, field: &str, docnum: DocNum, value: &Value) -> Result<()> {
        match self.columns.get_mut(field) {
            Some(writer) => writer.add(docnum, value),
            None => Ok(()),
        }
    }

    pub fn add_length(&mut self, field: &str, docnum: DocNum, length: u32) -> Result<()> {
        if let Some(writer) = self.lengths.get_mut(field) {
            writer.add(docnum, &Value::UInt(length as u64))?;
            *self.length_totals.entry(field.to_string()).or_insert(0) += length as u64;
        }
        Ok(())
    }

    pub fn add_vector_offset(&mut self, field: &str, docnum: DocNum, offset: u64) -> Result<()> {
        match self.vector_offsets.get_mut(field) {
            Some(writer) => writer.add(docnum, &Value::UInt(offset)),
            None => Ok(()),
        }
    }

    pub fn add_stored(&mut self, docnum: DocNum, encoded: Vec<u8>) -> Result<()> {
        self.stored.add(docnum, &Value::Bytes(encoded))
    }

    pub fn finish(self, segment: SegmentId, doc_count: u32) -> Result<FinishedDocColumns> {
        let mut files = Vec::new();
        let mut warnings = Vec::new();
        let groups = [
            (self.columns, ext::COLUMN),
            (self.lengths, ext::LENGTHS),
            (self.vector_offsets, ext::VECTOR_OFFSETS),
        ];
        for (writers, extension) in groups {
            for (field, writer) in writers {
                let finished = writer.finish(doc_count)?;
                warnings.extend(finished.warnings);
                files.push((field_file(segment, &field, extension), finished.data));
            }
        }
        let stored = self.stored.finish(doc_count)?;
        files.push((segment_file(segment, ext::STORED), stored.data));
        Ok(FinishedDocColumns {
            files,
            warnings,
            length_totals: self.length_totals,
        })
    }
}

/// Readers for the per-document files of one segment. A file missing for
/// a field (declared after the segment was written) reads as absent.
#[derive(Default)]
pub struct DocColumnReaders {
    pub(crate) columns: HashMap<String, Box<dyn ColumnReader>>,
    pub(crate) lengths: HashMap<String, Box<dyn ColumnReader>>,
    pub(crate) vector_offsets: HashMap<String, Box<dyn ColumnReader>>,
    pub(crate) stored: Option<Box<dyn ColumnReader>>,
}

impl DocColumnReaders {
    pub fn open(
        schema: &Schema,
        segment: SegmentId,
        lookup: impl Fn(&str) -> Option<Bytes>,
    ) -> Result<Self> {
        let mut readers = Self::default();
        for spec in schema.fields() {
            if let Some(column) = &spec.column {
                if let Some(data) = lookup(&field_file(segment, &spec.name, ext::COLUMN)) {
                    readers
                        .columns
                        .insert(spec.name.clone(), column.reader(data)?);
                }
            }
            if spec.indexed {
                if let Some(data) = lookup(&field_file(segment, &spec.name, ext::LENGTHS)) {
                    readers.lengths.insert(
                        spec.name.clone(),
                        Box::new(lengths_column().reader(data)?),
                    );
                }
            }
            if spec.vectored {
                if let Some(data) = lookup(&field_file(segment, &spec.name, ext::VECTOR_OFFSETS)) {
                    readers.vector_offsets.insert(
                        spec.name.clone(),
                        Box::new(vector_offsets_column().reader(data)?),
                    );
                }
            }
        }
        if let Some(data) = lookup(&segment_file(segment, ext::STORED)) {
            readers.stored = Some(Box::new(stored_column().reader(data)?));
        }
        Ok(readers)
    }

    pub fn column(&self, field: &str) -> Option<&dyn ColumnReader> {
        self.columns.get(field).map(|r| r.as_ref())
    }

    pub fn field_length(&self, field: &str, docnum: DocNum) -> Result<u32> {
        match self.lengths.get(field) {
            Some(reader) => Ok(value_to_u64(&reader.get(docnum)?)? as u32),
            None => Ok(0),
        }
    }

    /// Offset of a document's term vector in the vectors file, if it has one
    pub fn vector_offset(&self, field: &str, docnum: DocNum) -> Result<Option<u64>> {
        match self.vector_offsets.get(field) {
            Some(reader) => match value_to_u64(&reader.get(docnum)?)? {
                0 => Ok(None),
                offset => Ok(Some(offset)),
            },
            None => Ok(None),
        }
    }

    pub fn stored_bytes(&self, docnum: DocNum) -> Result<Vec<u8>> {
        match &self.stored {
            Some(reader) => match reader.get(docnum)? {
                Value::Bytes(bytes) => Ok(bytes),
                other => Err(FathomError::format(format!(
                    "stored fields hold {:?}",
                    other
                ))),
            },
            None => Ok(Vec::new()),
        }
    }

    pub fn stored_fields(&self, docnum: DocNum) -> Result<BTreeMap<String, Value>> {
        decode_stored(&self.stored_bytes(docnum)?)
    }
}

pub(crate) fn encode_stored(fields: &BTreeMap<String, Value>) -> Result<Vec<u8>> {
    if fields.is_empty() {
        return Ok(Vec::new());
    }
    Ok(bincode::serialize(fields)?)
}

pub(crate) fn decode_stored(bytes: &[u8]) -> Result<BTreeMap<String, Value>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(bincode::deserialize(bytes)?)
}

/// Write one document's term vector; returns its offset, or 0 when empty
pub(crate) fn write_vector(
    vectors: &mut PostingsWriter,
    format: PostingFormat,
    entries: &[(Vec<u8>, f32, Vec<u8>)],
) -> Result<u64> {
    if entries.is_empty() {
        return Ok(0);
    }
    vectors.start_postings(format)?;
    for (term, weight, payload) in entries {
        vectors.add_posting(&term[..], *weight, payload, 1)?;
    }
    let info = vectors.finish_postings()?;
    info.extent()
        .map(|(offset, _)| offset)
        .ok_or_else(|| FathomError::state("term vector was inlined"))
}

/// Copy the rows named by `map` (old docnum to new docnum) from `source`
/// into `target`. With `source_vectors`, term vectors are re-encoded into
/// `vectors`; without, offsets are taken to already point into it.
pub(crate) fn copy_documents(
    schema: &Schema,
    source: &DocColumnReaders,
    source_vectors: Option<&Bytes>,
    target: &mut DocColumns,
    vectors: &mut PostingsWriter,
    map: &[Option<DocNum>],
) -> Result<()> {
    for (old, new) in map.iter().enumerate() {
        let (old, new) = match new {
            Some(new) => (old as DocNum, *new),
            None => continue,
        };
        for (field, reader) in &source.columns {
            target.add_column(field, new, &reader.get(old)?)?;
        }
        for field in source.lengths.keys() {
            target.add_length(field, new, source.field_length(field, old)?)?;
        }
        for field in source.vector_offsets.keys() {
            let offset = match source.vector_offset(field, old)? {
                Some(offset) => offset,
                None => continue,
            };
            let offset = match source_vectors {
                Some(data) => {
                    let entries = Matcher::at_offset(data.clone(), offset)?.all_terms()?;
                    let format = schema
                        .field(field)
                        .map(|spec| spec.format)
                        .unwrap_or_default();
                    write_vector(vectors, format, &entries)?
                }
                None => offset,
            };
            target.add_vector_offset(field, new, offset)?;
        }
        let stored = source.stored_bytes(old)?;
        if !stored.is_empty() {
            target.add_stored(new, stored)?;
        }
    }
    Ok(())
}

/// Drain sorted pool postings into the postings file and term index.
/// Returns the number of terms written.
pub(crate) fn write_postings(
    sorted: impl Iterator<Item = Result<PoolPosting>>,
    format_of: impl Fn(FieldId) -> PostingFormat,
    merged_count: u32,
    postings: &mut PostingsWriter,
    terms: &mut TermIndexWriter,
) -> Result<usize> {
    let mut current: Option<(FieldId, Vec<u8>)> = None;
    for posting in sorted {
        let posting = posting?;
        let same_term = matches!(
            &current,
            Some((field, term)) if *field == posting.field && *term == posting.term
        );
        if !same_term {
            if let Some((field, term)) = current.take() {
                terms.add(field, &term, &postings.finish_postings()?)?;
            }
            postings.start_postings(format_of(posting.field))?;
            current = Some((posting.field, posting.term.clone()));
        }
        let docnum = match posting.origin {
            Origin::Merged => posting.docnum,
            Origin::New => posting.docnum + merged_count,
        };
        postings.add_posting(docnum, posting.weight, &posting.payload, posting.length)?;
    }
    if let Some((field, term)) = current {
        terms.add(field, &term, &postings.finish_postings()?)?;
    }
    Ok(terms.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::Column;
    use crate::config::WriterConfig;
    use crate::schema::FieldSpec;
    use crate::segment::term_dict::TermIndex;

    fn schema() -> Schema {
        Schema::new()
            .with_field(
                FieldSpec::keyword("tag")
                    .with_column(Column::Numeric(NumericColumn::new(NumericType::I32)))
                    .with_vectors(true),
            )
            .with_field(FieldSpec::stored_only("raw"))
    }

    fn open(finished: &FinishedDocColumns, schema: &Schema, id: SegmentId) -> DocColumnReaders {
        let files: HashMap<String, Bytes> = finished
            .files
            .iter()
            .map(|(name, data)| (name.clone(), Bytes::from(data.clone())))
            .collect();
        DocColumnReaders::open(schema, id, |name| files.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_rows_copy_with_translation() {
        let schema = schema();
        let config = WriterConfig::default();
        let id = SegmentId::new(1);
        let mut vectors = PostingsWriter::new(&config).without_inlining();

        let mut source = DocColumns::new(&schema);
        for docnum in 0..3u32 {
            source.add_column("tag", docnum, &Value::Int(docnum as i64 * 10)).unwrap();
            source.add_length("tag", docnum, docnum + 1).unwrap();
            let entries = vec![(format!("t{}", docnum).into_bytes(), 1.0, Vec::new())];
            let offset = write_vector(&mut vectors, PostingFormat::default(), &entries).unwrap();
            source.add_vector_offset("tag", docnum, offset).unwrap();
        }
        let mut stored = BTreeMap::new();
        stored.insert("raw".to_string(), Value::text("hello"));
        source.add_stored(2, encode_stored(&stored).unwrap()).unwrap();
        let finished = source.finish(id, 3).unwrap();
        assert_eq!(finished.length_totals["tag"], 6);
        let readers = open(&finished, &schema, id);
        let source_vectors = Bytes::from(vectors.into_bytes().unwrap());

        // drop doc 1, shift the rest up by 5
        let mut target = DocColumns::new(&schema);
        let mut target_vectors = PostingsWriter::new(&config).without_inlining();
        let map = vec![Some(5), None, Some(6)];
        copy_documents(
            &schema,
            &readers,
            Some(&source_vectors),
            &mut target,
            &mut target_vectors,
            &map,
        )
        .unwrap();
        let copied = open(&target.finish(id, 7).unwrap(), &schema, id);
        let target_vectors = Bytes::from(target_vectors.into_bytes().unwrap());

        let column = copied.column("tag").unwrap();
        assert_eq!(column.get(0).unwrap(), Value::Int(0));
        assert_eq!(column.get(6).unwrap(), Value::Int(20));
        assert_eq!(copied.field_length("tag", 5).unwrap(), 1);
        assert_eq!(copied.field_length("tag", 6).unwrap(), 3);
        assert_eq!(copied.stored_fields(6).unwrap(), stored);
        assert!(copied.stored_fields(5).unwrap().is_empty());
        assert_eq!(copied.vector_offset("tag", 4).unwrap(), None);

        let offset = copied.vector_offset("tag", 6).unwrap().unwrap();
        let terms = Matcher::at_offset(target_vectors, offset)
            .unwrap()
            .all_terms()
            .unwrap();
        assert_eq!(terms[0].0, b"t2".to_vec());
    }

    #[test]
    fn test_postings_grouped_by_term() {
        let config = WriterConfig::default();
        let mut postings = PostingsWriter::new(&config);
        let mut terms = TermIndexWriter::new();
        let pool = vec![
            PoolPosting {
                field: 0,
                term: b"a".to_vec(),
                origin: Origin::Merged,
                docnum: 1,
                weight: 1.0,
                payload: Vec::new(),
                length: 1,
            },
            PoolPosting {
                field: 0,
                term: b"a".to_vec(),
                origin: Origin::New,
                docnum: 0,
                weight: 2.0,
                payload: Vec::new(),
                length: 1,
            },
            PoolPosting {
                field: 1,
                term: b"a".to_vec(),
                origin: Origin::New,
                docnum: 1,
                weight: 1.0,
                payload: Vec::new(),
                length: 1,
            },
        ];
        let written = write_postings(
            pool.into_iter().map(Ok),
            |_| PostingFormat::default(),
            3,
            &mut postings,
            &mut terms,
        )
        .unwrap();
        assert_eq!(written, 2);

        let data = Bytes::from(postings.into_bytes().unwrap());
        let index = TermIndex::open(Bytes::from(terms.finish().unwrap())).unwrap();
        let info = index.get(0, b"a").unwrap().unwrap();
        assert_eq!(info.doc_freq, 2);
        assert_eq!(Matcher::new(data.clone(), &info).unwrap().all_ids().unwrap(), vec![1, 3]);
        let info = index.get(1, b"a").unwrap().unwrap();
        assert_eq!(Matcher::new(data, &info).unwrap().all_ids().unwrap(), vec![4]);
    }
}
