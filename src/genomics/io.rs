use anyhow::{Context, Result};
use rust_htslib::bam::{self, record::Aux, record::Cigar, FetchDefinition, Read};
use rust_htslib::faidx;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::reference::{ReferenceError, ReferenceProvider};
use super::source::{AlignmentSource, SourceError};
use super::target::{Target, TargetError};
use super::types::{AlignedRead, CigarOp, CigarOpKind};

/// Indexed BAM/CRAM file streamed one target at a time.
pub struct BamAlignmentSource {
    reader: bam::IndexedReader,
    record: bam::Record,
    chrom: Option<Arc<str>>,
}

impl BamAlignmentSource {
    /// Open an indexed alignment file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = bam::IndexedReader::from_path(path)
            .with_context(|| format!("failed to open indexed alignments {}", path.display()))?;
        Ok(Self {
            reader,
            record: bam::Record::new(),
            chrom: None,
        })
    }

    /// SAM header text, used to resolve read groups.
    pub fn header_text(&self) -> String {
        String::from_utf8_lossy(self.reader.header().as_bytes()).into_owned()
    }

    /// One whole-sequence target per `@SQ` entry, in header order.
    pub fn header_targets(&self) -> Result<Vec<Target>, TargetError> {
        let header = self.reader.header();
        let mut targets = Vec::new();
        for (tid, name) in header.target_names().into_iter().enumerate() {
            let name = String::from_utf8_lossy(name).into_owned();
            let length = header.target_len(tid as u32).unwrap_or(0);
            targets.push(Target::whole_sequence(name, length)?);
        }
        if targets.is_empty() {
            return Err(TargetError::Empty);
        }
        Ok(targets)
    }
}

impl fmt::Debug for BamAlignmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BamAlignmentSource")
            .field("chrom", &self.chrom)
            .finish_non_exhaustive()
    }
}

impl AlignmentSource for BamAlignmentSource {
    fn jump(&mut self, target: &Target) -> Result<(), SourceError> {
        let tid = self
            .reader
            .header()
            .tid(target.chrom.as_bytes())
            .ok_or_else(|| SourceError::UnknownSequence(target.chrom.to_string()))?;
        self.reader
            .fetch(FetchDefinition::Region(
                tid as i32,
                i64::from(target.start0()),
                i64::from(target.right),
            ))
            .map_err(|e| SourceError::Backend(e.to_string()))?;
        self.chrom = Some(Arc::clone(&target.chrom));
        Ok(())
    }

    fn next_alignment(&mut self) -> Result<Option<AlignedRead>, SourceError> {
        let Some(chrom) = &self.chrom else {
            return Ok(None);
        };
        match self.reader.read(&mut self.record) {
            None => Ok(None),
            Some(Err(e)) => Err(SourceError::Backend(e.to_string())),
            Some(Ok(())) => Ok(Some(to_aligned_read(&self.record, chrom))),
        }
    }
}

fn to_aligned_read(record: &bam::Record, chrom: &Arc<str>) -> AlignedRead {
    let mut cigar: Vec<CigarOp> = record.cigar().iter().filter_map(cigar_op).collect();
    let mut sequence = record.seq().as_bytes();
    let mut qualities = record.qual().to_vec();
    strip_clips(&mut cigar, &mut sequence, &mut qualities);

    let name = String::from_utf8_lossy(record.qname());
    let mut read = AlignedRead::new(
        Arc::clone(chrom),
        record.pos().max(0) as u32,
        record.mapq(),
        cigar,
        sequence,
        qualities,
        record.is_reverse(),
    )
    .with_name(name.as_ref())
    .with_duplicate(record.is_duplicate())
    .with_unmapped(record.is_unmapped());
    if let Ok(Aux::String(read_group)) = record.aux(b"RG") {
        read = read.with_read_group(read_group);
    }
    read
}

fn cigar_op(op: &Cigar) -> Option<CigarOp> {
    let (kind, len) = match *op {
        Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => (CigarOpKind::Match, len),
        Cigar::Ins(len) => (CigarOpKind::Insertion, len),
        Cigar::Del(len) => (CigarOpKind::Deletion, len),
        Cigar::RefSkip(len) => (CigarOpKind::RefSkip, len),
        Cigar::SoftClip(len) => (CigarOpKind::SoftClip, len),
        Cigar::HardClip(len) => (CigarOpKind::HardClip, len),
        Cigar::Pad(_) => return None,
    };
    Some(CigarOp::new(kind, len))
}

/// Drop clipping at both ends together with the soft-clipped bases.
///
/// BAM positions refer to the first aligned base, so leading clips must not
/// advance the genomic cursor.
fn strip_clips(cigar: &mut Vec<CigarOp>, sequence: &mut Vec<u8>, qualities: &mut Vec<u8>) {
    let is_clip = |op: &CigarOp| matches!(op.kind, CigarOpKind::SoftClip | CigarOpKind::HardClip);

    let leading = cigar.iter().take_while(|op| is_clip(op)).count();
    let leading_soft: usize = cigar[..leading]
        .iter()
        .filter(|op| op.kind == CigarOpKind::SoftClip)
        .map(|op| op.len as usize)
        .sum();
    cigar.drain(..leading);
    sequence.drain(..leading_soft.min(sequence.len()));
    qualities.drain(..leading_soft.min(qualities.len()));

    while let Some(op) = cigar.last().copied().filter(|op| is_clip(op)) {
        cigar.pop();
        if op.kind == CigarOpKind::SoftClip {
            sequence.truncate(sequence.len().saturating_sub(op.len as usize));
            qualities.truncate(qualities.len().saturating_sub(op.len as usize));
        }
    }
}

/// Reference backed by an indexed FASTA file (`.fai`).
pub struct FastaReference {
    reader: faidx::Reader,
    lengths: HashMap<String, u64>,
}

impl FastaReference {
    /// Open an indexed FASTA file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = faidx::Reader::from_path(path)
            .with_context(|| format!("failed to open indexed FASTA {}", path.display()))?;
        let names = reader
            .seq_names()
            .with_context(|| format!("failed to list sequences of {}", path.display()))?;
        let lengths = names
            .into_iter()
            .map(|name| {
                let length = reader.fetch_seq_len(&name);
                (name, length)
            })
            .collect();
        Ok(Self { reader, lengths })
    }

    /// Sequence names known to the index.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lengths.keys().map(String::as_str)
    }
}

impl fmt::Debug for FastaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastaReference")
            .field("sequences", &self.lengths.len())
            .finish_non_exhaustive()
    }
}

impl ReferenceProvider for FastaReference {
    fn subsequence(&self, name: &str, start: u64, length: u64) -> Result<Vec<u8>, ReferenceError> {
        let sequence_length = self.sequence_length(name)?;
        if start + length > sequence_length {
            return Err(ReferenceError::OutOfBounds {
                chrom: name.to_string(),
                start: start as i64,
                length,
                sequence_length,
            });
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        let bases = self
            .reader
            .fetch_seq_string(name, start as usize, (start + length - 1) as usize)
            .map_err(|e| ReferenceError::Provider(e.to_string()))?;
        Ok(bases.into_bytes().to_ascii_uppercase())
    }

    fn sequence_length(&self, name: &str) -> Result<u64, ReferenceError> {
        self.lengths
            .get(name)
            .copied()
            .ok_or_else(|| ReferenceError::UnknownSequence(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(pairs: &[(CigarOpKind, u32)]) -> Vec<CigarOp> {
        pairs.iter().map(|&(kind, len)| CigarOp::new(kind, len)).collect()
    }

    #[test]
    fn clips_are_stripped_with_their_bases() {
        let mut cigar = ops(&[
            (CigarOpKind::HardClip, 5),
            (CigarOpKind::SoftClip, 2),
            (CigarOpKind::Match, 3),
            (CigarOpKind::SoftClip, 1),
            (CigarOpKind::HardClip, 4),
        ]);
        let mut sequence = b"nnACGx".to_vec();
        let mut qualities = vec![1, 2, 30, 31, 32, 3];
        strip_clips(&mut cigar, &mut sequence, &mut qualities);

        assert_eq!(cigar, ops(&[(CigarOpKind::Match, 3)]));
        assert_eq!(sequence, b"ACG");
        assert_eq!(qualities, vec![30, 31, 32]);
    }

    #[test]
    fn unclipped_reads_are_untouched() {
        let mut cigar = ops(&[(CigarOpKind::Match, 2), (CigarOpKind::Deletion, 1), (CigarOpKind::Match, 2)]);
        let before = cigar.clone();
        let mut sequence = b"ACGT".to_vec();
        let mut qualities = vec![30; 4];
        strip_clips(&mut cigar, &mut sequence, &mut qualities);
        assert_eq!(cigar, before);
        assert_eq!(sequence, b"ACGT");
    }

    #[test]
    fn cigar_ops_map_onto_kinds() {
        assert_eq!(cigar_op(&Cigar::Equal(4)), Some(CigarOp::new(CigarOpKind::Match, 4)));
        assert_eq!(cigar_op(&Cigar::Diff(1)), Some(CigarOp::new(CigarOpKind::Match, 1)));
        assert_eq!(cigar_op(&Cigar::RefSkip(9)), Some(CigarOp::new(CigarOpKind::RefSkip, 9)));
        assert_eq!(cigar_op(&Cigar::Pad(2)), None);
    }
}
