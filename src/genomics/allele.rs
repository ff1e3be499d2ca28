//! Allele observations and their per-position derived state.
//!
//! An [`Allele`] is produced by decoding one alignment (or synthesised for
//! the reference / genotyping candidates). Its derived state (current base,
//! quality, masking) depends on the scan position and is refreshed with
//! [`Allele::update`], which receives the position explicitly instead of
//! reading shared engine state.

use std::fmt;
use std::sync::Arc;

use bitvec::prelude::*;

/// Kind of allele observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlleleType {
    /// Stretch of read bases matching the reference.
    Reference,
    /// Single-base substitution.
    Snp,
    /// Bases present in the read but not in the reference.
    Insertion,
    /// Reference bases absent from the read.
    Deletion,
}

impl AlleleType {
    /// Every allele type, in declaration order.
    pub const ALL: [AlleleType; 4] = [
        AlleleType::Reference,
        AlleleType::Snp,
        AlleleType::Insertion,
        AlleleType::Deletion,
    ];

    fn bit(self) -> u8 {
        match self {
            AlleleType::Reference => 1,
            AlleleType::Snp => 1 << 1,
            AlleleType::Insertion => 1 << 2,
            AlleleType::Deletion => 1 << 3,
        }
    }

    /// Lowercase label used in reports and logs.
    pub fn label(self) -> &'static str {
        match self {
            AlleleType::Reference => "reference",
            AlleleType::Snp => "snp",
            AlleleType::Insertion => "insertion",
            AlleleType::Deletion => "deletion",
        }
    }
}

impl fmt::Display for AlleleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Set of allele types a caller wants grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlleleTypeSet(u8);

impl AlleleTypeSet {
    /// Accept every type.
    pub const ALL: AlleleTypeSet = AlleleTypeSet(0b1111);
    /// Accept nothing.
    pub const NONE: AlleleTypeSet = AlleleTypeSet(0);

    /// Set containing a single type.
    pub fn only(kind: AlleleType) -> Self {
        Self(kind.bit())
    }

    /// Add a type to the set.
    pub fn with(self, kind: AlleleType) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Whether the set contains `kind`.
    pub fn contains(self, kind: AlleleType) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl Default for AlleleTypeSet {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromIterator<AlleleType> for AlleleTypeSet {
    fn from_iter<I: IntoIterator<Item = AlleleType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

/// Scan state an allele is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlleleContext {
    /// Current 0-based genomic position.
    pub position: u32,
    /// Reference base at `position`.
    pub reference_base: u8,
}

/// Derived state of an allele at a given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Quality of the observation at this position.
    pub quality: u8,
    /// Base lies within the indel-proximity mask.
    pub masked: bool,
    /// Observed base is not one of A/C/G/T.
    pub ambiguous: bool,
    /// Observed base equals the reference base.
    pub matches_reference: bool,
}

impl Observation {
    /// Whether the observation may be grouped given a base-quality floor.
    pub fn passes(&self, min_quality: u8) -> bool {
        self.quality >= min_quality && !self.masked && !self.ambiguous
    }
}

/// Equivalence-class key: type, observed base and canonical length.
///
/// Reference and SNP alleles always canonicalise to length 1.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlleleKey {
    /// Allele type.
    pub kind: AlleleType,
    /// Observed base string as grouped in samples.
    pub base: String,
    /// Canonical length.
    pub length: u32,
}

impl AlleleKey {
    /// Build a key, canonicalising the length of single-base types.
    pub fn new(kind: AlleleType, base: impl Into<String>, length: u32) -> Self {
        let length = match kind {
            AlleleType::Reference | AlleleType::Snp => 1,
            AlleleType::Insertion | AlleleType::Deletion => length,
        };
        Self {
            kind,
            base: base.into(),
            length,
        }
    }
}

impl fmt::Display for AlleleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.base, self.length)
    }
}

/// One observed or synthetic allele.
#[derive(Debug, Clone)]
pub struct Allele {
    /// Allele type.
    pub kind: AlleleType,
    /// Reference sequence name.
    pub chrom: Arc<str>,
    /// 0-based genomic position of the first affected reference base.
    pub position: u32,
    /// Reference bases consumed (0 for insertions).
    pub length: u32,
    /// Reference bases covered by the allele.
    pub reference_bases: Vec<u8>,
    /// Bases observed in the read.
    pub observed_bases: Vec<u8>,
    /// Sample the observation belongs to.
    pub sample: Arc<str>,
    /// Read the observation came from.
    pub read_name: Arc<str>,
    /// Read maps to the reverse strand.
    pub is_reverse: bool,
    /// Mapping quality of the source read.
    pub map_quality: u8,
    /// Base qualities aligned to `observed_bases` (flanking qualities for deletions).
    pub base_qualities: Vec<u8>,
    /// Derived quality; refreshed by [`Allele::update`] for reference alleles.
    pub quality: u8,
    /// Indel-proximity mask over the allele span; `None` means no masking.
    pub indel_mask: Option<BitVec>,
    /// Already filed into a sample grouping at the current position.
    pub processed: bool,
    /// Synthetic allele built as a genotyping candidate.
    pub genotype_allele: bool,
    current_base: String,
}

impl Allele {
    /// Construct a read-derived allele.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: AlleleType,
        chrom: Arc<str>,
        position: u32,
        length: u32,
        reference_bases: Vec<u8>,
        observed_bases: Vec<u8>,
        sample: Arc<str>,
        read_name: Arc<str>,
        is_reverse: bool,
        map_quality: u8,
        base_qualities: Vec<u8>,
        quality: u8,
    ) -> Self {
        let mut allele = Self {
            kind,
            chrom,
            position,
            length,
            reference_bases,
            observed_bases,
            sample,
            read_name,
            is_reverse,
            map_quality,
            base_qualities,
            quality,
            indel_mask: None,
            processed: false,
            genotype_allele: false,
            current_base: String::new(),
        };
        allele.current_base = allele.base_at(position);
        allele
    }

    /// Synthetic genotyping candidate not tied to any read.
    pub fn genotype(kind: AlleleType, base: impl Into<String>, length: u32) -> Self {
        let key = AlleleKey::new(kind, base, length);
        let observed = match kind {
            AlleleType::Reference | AlleleType::Snp => key.base.as_bytes().to_vec(),
            AlleleType::Insertion => key.base.trim_start_matches('I').as_bytes().to_vec(),
            AlleleType::Deletion => Vec::new(),
        };
        Self {
            kind,
            chrom: Arc::from(""),
            position: 0,
            length: key.length,
            reference_bases: Vec::new(),
            observed_bases: observed,
            sample: Arc::from(""),
            read_name: Arc::from(""),
            is_reverse: false,
            map_quality: 0,
            base_qualities: Vec::new(),
            quality: 0,
            indel_mask: None,
            processed: false,
            genotype_allele: true,
            current_base: key.base,
        }
    }

    /// Synthetic reference allele at the scan position, filed under the
    /// sequence name as its sample.
    pub fn synthetic_reference(
        chrom: Arc<str>,
        context: AlleleContext,
        map_quality: u8,
        base_quality: u8,
    ) -> Self {
        let mut allele = Self::new(
            AlleleType::Reference,
            Arc::clone(&chrom),
            context.position,
            1,
            vec![context.reference_base],
            vec![context.reference_base],
            Arc::clone(&chrom),
            chrom,
            false,
            map_quality,
            vec![base_quality],
            base_quality,
        );
        allele.genotype_allele = true;
        allele.update(context);
        allele
    }

    /// Number of positions the allele occupies for overlap tests.
    pub fn span(&self) -> u32 {
        self.length.max(1)
    }

    /// Whether the allele still overlaps `position` or lies ahead of it.
    pub fn overlaps(&self, position: u32) -> bool {
        position < self.position + self.span()
    }

    /// Whether the allele should be grouped at `position`.
    ///
    /// Reference alleles are active across their whole span; every other
    /// type only at its own position.
    pub fn is_active_at(&self, position: u32) -> bool {
        match self.kind {
            AlleleType::Reference => {
                position >= self.position && position < self.position + self.length
            }
            _ => position == self.position,
        }
    }

    /// Base string the allele contributes at the last updated position.
    pub fn current_base(&self) -> &str {
        &self.current_base
    }

    /// Equivalence-class key for the current base.
    pub fn key(&self) -> AlleleKey {
        AlleleKey::new(self.kind, self.current_base.clone(), self.length)
    }

    /// Refresh derived state for the scan position.
    pub fn update(&mut self, context: AlleleContext) -> Observation {
        self.current_base = self.base_at(context.position);
        if self.kind == AlleleType::Reference && !self.genotype_allele {
            if let Some(q) = self.offset(context.position).and_then(|o| self.base_qualities.get(o)) {
                self.quality = *q;
            }
        }

        let ambiguous = match self.kind {
            AlleleType::Reference | AlleleType::Snp => {
                !matches!(self.current_base.as_bytes(), [b'A' | b'C' | b'G' | b'T'])
            }
            AlleleType::Insertion => self
                .observed_bases
                .iter()
                .any(|b| !matches!(b, b'A' | b'C' | b'G' | b'T')),
            AlleleType::Deletion => false,
        };
        let matches_reference = self.current_base.as_bytes() == [context.reference_base];

        Observation {
            quality: self.quality,
            masked: self.masked_at(context.position),
            ambiguous,
            matches_reference,
        }
    }

    /// Whether the indel-proximity mask suppresses the allele at `position`.
    pub fn masked_at(&self, position: u32) -> bool {
        let Some(mask) = &self.indel_mask else {
            return false;
        };
        match self.kind {
            AlleleType::Reference => self
                .offset(position)
                .and_then(|o| mask.get(o).map(|bit| *bit))
                .unwrap_or(false),
            AlleleType::Snp => mask.first().map(|bit| *bit).unwrap_or(false),
            AlleleType::Insertion | AlleleType::Deletion => false,
        }
    }

    fn offset(&self, position: u32) -> Option<usize> {
        position.checked_sub(self.position).map(|o| o as usize)
    }

    fn base_at(&self, position: u32) -> String {
        match self.kind {
            AlleleType::Reference => self
                .offset(position)
                .and_then(|o| self.observed_bases.get(o))
                .map(|b| (*b as char).to_string())
                .unwrap_or_default(),
            AlleleType::Snp => String::from_utf8_lossy(&self.observed_bases).into_owned(),
            AlleleType::Insertion => {
                format!("I{}", String::from_utf8_lossy(&self.observed_bases))
            }
            AlleleType::Deletion => format!("D{}", self.length),
        }
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{} len={} {}/{} q={} {}:{}",
            self.kind,
            self.chrom,
            self.position + 1,
            self.length,
            String::from_utf8_lossy(&self.reference_bases),
            String::from_utf8_lossy(&self.observed_bases),
            self.quality,
            self.sample,
            self.read_name
        )
    }
}

/// Reference allele plus the three substitutions at a position, as
/// genotyping candidates.
pub fn possible_snp_alleles(reference_base: u8) -> Vec<Allele> {
    let reference_base = reference_base.to_ascii_uppercase();
    let mut alleles = vec![Allele::genotype(
        AlleleType::Reference,
        (reference_base as char).to_string(),
        1,
    )];
    alleles.extend(
        [b'A', b'C', b'G', b'T']
            .into_iter()
            .filter(|b| *b != reference_base)
            .map(|b| Allele::genotype(AlleleType::Snp, (b as char).to_string(), 1)),
    );
    alleles
}
