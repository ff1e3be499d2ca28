use thiserror::Error;

use super::target::Target;
use super::types::AlignedRead;

/// Errors raised by alignment sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Target sequence is not known to the source.
    #[error("alignment source has no sequence named '{0}'")]
    UnknownSequence(String),

    /// Backend failure (file, index or record decoding).
    #[error("alignment source error: {0}")]
    Backend(String),
}

/// Position-ordered stream of alignments that can jump to a target.
pub trait AlignmentSource {
    /// Reposition the stream at the first alignment overlapping `target`.
    fn jump(&mut self, target: &Target) -> Result<(), SourceError>;

    /// Next alignment in start-position order, or `None` when the region is exhausted.
    fn next_alignment(&mut self) -> Result<Option<AlignedRead>, SourceError>;
}

impl<T: AlignmentSource + ?Sized> AlignmentSource for Box<T> {
    fn jump(&mut self, target: &Target) -> Result<(), SourceError> {
        (**self).jump(target)
    }

    fn next_alignment(&mut self) -> Result<Option<AlignedRead>, SourceError> {
        (**self).next_alignment()
    }
}

/// In-memory alignment source, sorted by start position on construction.
#[derive(Debug, Clone, Default)]
pub struct VecAlignmentSource {
    reads: Vec<AlignedRead>,
    selected: Vec<usize>,
    cursor: usize,
}

impl VecAlignmentSource {
    /// Build a source from reads in any order.
    pub fn new(mut reads: Vec<AlignedRead>) -> Self {
        reads.sort_by_key(|read| read.pos);
        Self {
            reads,
            selected: Vec::new(),
            cursor: 0,
        }
    }

    /// Number of reads held.
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether the source holds no reads.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

impl AlignmentSource for VecAlignmentSource {
    fn jump(&mut self, target: &Target) -> Result<(), SourceError> {
        let start = target.start0();
        let last = target.last0();
        self.selected = self
            .reads
            .iter()
            .enumerate()
            .filter(|(_, read)| {
                read.chrom == target.chrom && read.pos <= last && read.end() > start
            })
            .map(|(idx, _)| idx)
            .collect();
        self.cursor = 0;
        Ok(())
    }

    fn next_alignment(&mut self) -> Result<Option<AlignedRead>, SourceError> {
        let Some(&idx) = self.selected.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(self.reads[idx].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{CigarOp, CigarOpKind};

    fn read(chrom: &str, pos: u32, len: u32) -> AlignedRead {
        AlignedRead::new(
            chrom,
            pos,
            60,
            vec![CigarOp::new(CigarOpKind::Match, len)],
            vec![b'A'; len as usize],
            vec![30; len as usize],
            false,
        )
    }

    #[test]
    fn jump_selects_overlapping_reads_in_order() {
        let mut source = VecAlignmentSource::new(vec![
            read("chr1", 30, 5),
            read("chr2", 12, 5),
            read("chr1", 5, 10),
            read("chr1", 0, 4),
        ]);
        let target = Target::new("chr1", 10, 31).unwrap();
        source.jump(&target).unwrap();

        let mut starts = Vec::new();
        while let Some(read) = source.next_alignment().unwrap() {
            starts.push(read.pos);
        }
        assert_eq!(starts, vec![5, 30]);
    }

    #[test]
    fn stream_is_empty_before_first_jump() {
        let mut source = VecAlignmentSource::new(vec![read("chr1", 0, 4)]);
        assert!(source.next_alignment().unwrap().is_none());
    }
}
