use std::sync::Arc;

/// CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOpKind {
    /// Consuming match/mismatch.
    Match,
    /// Insertion relative to the reference.
    Insertion,
    /// Deletion relative to the reference.
    Deletion,
    /// Soft clipping (sequence present in read only).
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read).
    HardClip,
    /// Skipped reference region (spliced alignments).
    RefSkip,
}

impl CigarOpKind {
    /// Whether the operation consumes bases of the read sequence.
    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match | CigarOpKind::Insertion | CigarOpKind::SoftClip
        )
    }

    /// Whether the operation advances the sample/window cursors.
    pub fn advances_position(self) -> bool {
        !matches!(self, CigarOpKind::Insertion)
    }

    /// SAM single-letter code.
    pub fn code(self) -> char {
        match self {
            CigarOpKind::Match => 'M',
            CigarOpKind::Insertion => 'I',
            CigarOpKind::Deletion => 'D',
            CigarOpKind::SoftClip => 'S',
            CigarOpKind::HardClip => 'H',
            CigarOpKind::RefSkip => 'N',
        }
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

/// Aligned read with sequence and quality information.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Read (query) name.
    pub name: Arc<str>,
    /// Reference contig/chromosome name.
    pub chrom: Arc<str>,
    /// Read group identifier used to resolve the sample.
    pub read_group: Option<Arc<str>>,
    /// 0-based leftmost reference coordinate.
    pub pos: u32,
    /// Mapping quality (Phred-scaled).
    pub mapq: u8,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read sequence stored as uppercase ASCII.
    pub sequence: Arc<[u8]>,
    /// Per-base quality scores in Phred space.
    pub qualities: Arc<[u8]>,
    /// Whether the read maps to the reverse complement strand.
    pub is_reverse: bool,
    /// Whether the read is flagged as a PCR/optical duplicate.
    pub is_duplicate: bool,
    /// Whether the read is unmapped.
    pub is_unmapped: bool,
}

impl AlignedRead {
    /// Construct a new aligned read wrapper.
    pub fn new(
        chrom: impl Into<Arc<str>>,
        pos: u32,
        mapq: u8,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
        qualities: impl Into<Arc<[u8]>>,
        is_reverse: bool,
    ) -> Self {
        Self {
            name: Arc::from(""),
            chrom: chrom.into(),
            read_group: None,
            pos,
            mapq,
            cigar,
            sequence: sequence.into(),
            qualities: qualities.into(),
            is_reverse,
            is_duplicate: false,
            is_unmapped: false,
        }
    }

    /// Set the read name.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the read group identifier.
    pub fn with_read_group(mut self, read_group: impl Into<Arc<str>>) -> Self {
        self.read_group = Some(read_group.into());
        self
    }

    /// Mark the read as a duplicate.
    pub fn with_duplicate(mut self, is_duplicate: bool) -> Self {
        self.is_duplicate = is_duplicate;
        self
    }

    /// Mark the read as unmapped.
    pub fn with_unmapped(mut self, is_unmapped: bool) -> Self {
        self.is_unmapped = is_unmapped;
        self
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no bases.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Number of genomic positions walked by the CIGAR, clipped bases included.
    pub fn footprint(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| op.kind.advances_position())
            .map(|op| op.len)
            .sum()
    }

    /// Number of read bases the CIGAR expects the sequence to carry.
    pub fn cigar_read_len(&self) -> usize {
        self.cigar
            .iter()
            .filter(|op| op.kind.consumes_read())
            .map(|op| op.len as usize)
            .sum()
    }

    /// End position (half-open) of the alignment footprint.
    pub fn end(&self) -> u32 {
        self.pos + self.footprint()
    }

    /// Base at the provided read offset.
    pub fn base_at(&self, offset: usize) -> Option<u8> {
        self.sequence.get(offset).copied()
    }

    /// Quality score at the provided read offset.
    pub fn quality_at(&self, offset: usize) -> Option<u8> {
        self.qualities.get(offset).copied()
    }

    /// Mapping quality associated with the alignment.
    pub fn mapq(&self) -> u8 {
        self.mapq
    }

    /// CIGAR rendered in SAM notation.
    pub fn cigar_string(&self) -> String {
        self.cigar
            .iter()
            .map(|op| format!("{}{}", op.len, op.kind.code()))
            .collect()
    }
}
