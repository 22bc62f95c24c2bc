//! Posting pool: an external sorter for raw postings
//!
//! Postings are buffered in memory until the estimated size reaches the pool
//! budget, then sorted and spilled as a run file into the writer's temp
//! directory. Draining the pool k-way merges every run with the in-memory
//! remainder into one stream ordered by `(field, term, origin, docnum)`.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{DocNum, FieldId};
use crate::error::Result;

/// Source of unique names for temporary files
pub trait IdAllocator: Send + Debug {
    fn next_id(&mut self) -> u64;
}

#[derive(Debug, Default)]
pub struct SequentialIdAllocator {
    next: u64,
}

impl IdAllocator for SequentialIdAllocator {
    fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Where a pooled posting came from. Merged documents sort ahead of new ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    Merged,
    New,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolPosting {
    pub field: FieldId,
    pub term: Vec<u8>,
    pub origin: Origin,
    pub docnum: DocNum,
    pub weight: f32,
    pub payload: Vec<u8>,
    /// Field length of the posting's document
    pub length: u32,
}

impl PoolPosting {
    fn key(&self) -> (FieldId, &[u8], Origin, DocNum) {
        (self.field, &self.term, self.origin, self.docnum)
    }

    /// Rough in-memory footprint used against the pool budget
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.term.len() + self.payload.len()
    }
}

impl PartialEq for PoolPosting {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PoolPosting {}

impl PartialOrd for PoolPosting {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PoolPosting {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

pub struct PostingPool {
    dir: PathBuf,
    limit: usize,
    buffer: Vec<PoolPosting>,
    size: usize,
    runs: Vec<PathBuf>,
    ids: Box<dyn IdAllocator>,
    count: u64,
}

impl PostingPool {
    pub fn new(dir: &Path, limit: usize, ids: Box<dyn IdAllocator>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            limit,
            buffer: Vec::new(),
            size: 0,
            runs: Vec::new(),
            ids,
            count: 0,
        }
    }

    pub fn add(&mut self, posting: PoolPosting) -> Result<()> {
        self.size += posting.approx_size();
        self.buffer.push(posting);
        self.count += 1;
        if self.size >= self.limit {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_unstable();
        let path = self
            .dir
            .join(format!("run_{:06}.bin", self.ids.next_id()));
        let mut out = BufWriter::new(File::create(&path)?);
        bincode::serialize_into(&mut out, &(self.buffer.len() as u64))?;
        for posting in &self.buffer {
            bincode::serialize_into(&mut out, posting)?;
        }
        out.flush()?;

        debug!(
            postings = self.buffer.len(),
            bytes = self.size,
            run = %path.display(),
            "Spilled posting run"
        );
        self.runs.push(path);
        self.buffer.clear();
        self.size = 0;
        Ok(())
    }

    /// Total postings added
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Consume the pool into one sorted stream
    pub fn into_sorted(mut self) -> Result<SortedPostings> {
        self.buffer.sort_unstable();
        let mut sources = Vec::with_capacity(self.runs.len() + 1);
        for path in &self.runs {
            let mut reader = BufReader::new(File::open(path)?);
            let remaining: u64 = bincode::deserialize_from(&mut reader)?;
            sources.push(Source::Run { reader, remaining });
        }
        sources.push(Source::Memory(std::mem::take(&mut self.buffer).into_iter()));

        let mut sorted = SortedPostings {
            sources,
            heap: BinaryHeap::new(),
        };
        for index in 0..sorted.sources.len() {
            sorted.refill(index)?;
        }
        Ok(sorted)
    }
}

enum Source {
    Run {
        reader: BufReader<File>,
        remaining: u64,
    },
    Memory(std::vec::IntoIter<PoolPosting>),
}

impl Source {
    fn next(&mut self) -> Result<Option<PoolPosting>> {
        match self {
            Source::Run { reader, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                *remaining -= 1;
                Ok(Some(bincode::deserialize_from(reader)?))
            }
            Source::Memory(iter) => Ok(iter.next()),
        }
    }
}

/// Sorted stream over every pooled posting
pub struct SortedPostings {
    sources: Vec<Source>,
    heap: BinaryHeap<Reverse<(PoolPosting, usize)>>,
}

impl SortedPostings {
    fn refill(&mut self, index: usize) -> Result<()> {
        if let Some(posting) = self.sources[index].next()? {
            self.heap.push(Reverse((posting, index)));
        }
        Ok(())
    }
}

impl Iterator for SortedPostings {
    type Item = Result<PoolPosting>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((posting, index)) = self.heap.pop()?;
        if let Err(e) = self.refill(index) {
            return Some(Err(e));
        }
        Some(Ok(posting))
    }
}
