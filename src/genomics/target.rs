use std::fmt;
use std::io::BufRead;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::reference::{ReferenceError, ReferenceProvider};

/// Errors raised while building or validating target regions.
#[derive(Debug, Error)]
pub enum TargetError {
    /// Left bound below 1 or greater than the right bound.
    #[error("invalid target bounds {chrom}:{left}..{right}")]
    InvalidBounds {
        /// Sequence name.
        chrom: String,
        /// 1-based left bound.
        left: u64,
        /// 1-based right bound.
        right: u64,
    },

    /// Target extends past the end of its reference sequence.
    #[error("target {chrom}:{left}..{right} outside of reference sequence bounds (length {length})")]
    OutOfReference {
        /// Sequence name.
        chrom: String,
        /// 1-based left bound.
        left: u32,
        /// 1-based right bound.
        right: u32,
        /// Length of the reference sequence.
        length: u64,
    },

    /// Region string could not be parsed.
    #[error("malformed region '{0}'")]
    MalformedRegion(String),

    /// BED record could not be parsed.
    #[error("malformed BED record on line {line}: {reason}")]
    MalformedBed {
        /// 1-based line number.
        line: usize,
        /// What was wrong with the record.
        reason: String,
    },

    /// Target list is empty.
    #[error("no target regions loaded")]
    Empty,

    /// Reference lookup failed.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Reading the target list failed.
    #[error("failed to read targets: {0}")]
    Io(#[from] std::io::Error),
}

/// Genomic region to scan, 1-based and inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Target {
    /// Reference sequence name.
    pub chrom: Arc<str>,
    /// 1-based left bound (inclusive).
    pub left: u32,
    /// 1-based right bound (inclusive).
    pub right: u32,
    /// Optional label (BED name column).
    pub label: Option<Arc<str>>,
}

impl Target {
    /// Construct a target, rejecting `left < 1` and `left > right`.
    pub fn new(chrom: impl Into<Arc<str>>, left: u32, right: u32) -> Result<Self, TargetError> {
        let chrom = chrom.into();
        if left < 1 || left > right {
            return Err(TargetError::InvalidBounds {
                chrom: chrom.to_string(),
                left: left as u64,
                right: right as u64,
            });
        }
        Ok(Self {
            chrom,
            left,
            right,
            label: None,
        })
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Target covering an entire reference sequence.
    pub fn whole_sequence(chrom: impl Into<Arc<str>>, length: u64) -> Result<Self, TargetError> {
        let chrom = chrom.into();
        let right = u32::try_from(length).map_err(|_| TargetError::InvalidBounds {
            chrom: chrom.to_string(),
            left: 1,
            right: length,
        })?;
        Self::new(chrom, 1, right)
    }

    /// First 0-based position covered.
    pub fn start0(&self) -> u32 {
        self.left - 1
    }

    /// Last 0-based position covered.
    pub fn last0(&self) -> u32 {
        self.right - 1
    }

    /// Number of positions covered.
    pub fn len(&self) -> u32 {
        self.right - self.left + 1
    }

    /// Targets always cover at least one base.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check the target against the reference sequence length.
    pub fn validate<R: ReferenceProvider + ?Sized>(&self, reference: &R) -> Result<(), TargetError> {
        let length = reference.sequence_length(&self.chrom)?;
        if self.right as u64 > length {
            return Err(TargetError::OutOfReference {
                chrom: self.chrom.to_string(),
                left: self.left,
                right: self.right,
                length,
            });
        }
        Ok(())
    }

    /// Parse a region string: `chr`, `chr:pos` or `chr:left..right` (`-` also accepted).
    ///
    /// A bare sequence name covers the whole sequence; a single position covers
    /// `pos..pos+1`.
    pub fn parse_region<R: ReferenceProvider + ?Sized>(
        region: &str,
        reference: &R,
    ) -> Result<Self, TargetError> {
        let region = region.trim();
        if region.is_empty() {
            return Err(TargetError::MalformedRegion(region.to_string()));
        }
        let malformed = || TargetError::MalformedRegion(region.to_string());

        let target = match region.rsplit_once(':') {
            None => Self::whole_sequence(region, reference.sequence_length(region)?)?,
            Some((chrom, range)) => {
                let range = range.replace(',', "");
                let (left, right) = match range.split_once("..").or_else(|| range.split_once('-')) {
                    Some((l, r)) => (
                        l.parse::<u32>().map_err(|_| malformed())?,
                        r.parse::<u32>().map_err(|_| malformed())?,
                    ),
                    None => {
                        let pos = range.parse::<u32>().map_err(|_| malformed())?;
                        (pos, pos.checked_add(1).ok_or_else(malformed)?)
                    }
                };
                Self::new(chrom, left, right)?
            }
        };
        target.validate(reference)?;
        Ok(target)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.chrom, self.left, self.right)
    }
}

/// Parse BED records (0-based, half-open) into 1-based inclusive targets.
///
/// Comment, `track` and `browser` lines are skipped. Returns
/// [`TargetError::Empty`] when no record is found.
pub fn parse_bed<B: BufRead>(reader: B) -> Result<Vec<Target>, TargetError> {
    let mut targets = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("track")
            || trimmed.starts_with("browser")
        {
            continue;
        }
        let bad = |reason: &str| TargetError::MalformedBed {
            line: idx + 1,
            reason: reason.to_string(),
        };

        let mut fields = trimmed.split('\t');
        let chrom = fields.next().ok_or_else(|| bad("missing sequence name"))?;
        let start: u32 = fields
            .next()
            .ok_or_else(|| bad("missing start"))?
            .trim()
            .parse()
            .map_err(|_| bad("start is not an integer"))?;
        let end: u32 = fields
            .next()
            .ok_or_else(|| bad("missing end"))?
            .trim()
            .parse()
            .map_err(|_| bad("end is not an integer"))?;

        let first = start.checked_add(1).ok_or_else(|| bad("start out of range"))?;
        let mut target = Target::new(chrom, first, end)?;
        if let Some(name) = fields.next().map(str::trim).filter(|n| !n.is_empty()) {
            target = target.with_label(name);
        }
        targets.push(target);
    }

    if targets.is_empty() {
        return Err(TargetError::Empty);
    }
    debug!(targets = targets.len(), "parsed BED targets");
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::InMemoryReference;
    use test_case::test_case;

    fn reference() -> InMemoryReference {
        let mut reference = InMemoryReference::new();
        reference.insert("chr1", b"ACGTACGTACGTACGTACGT".to_vec());
        reference
    }

    #[test_case("chr1", 1, 20 ; "bare name covers whole sequence")]
    #[test_case("chr1:5", 5, 6 ; "single position")]
    #[test_case("chr1:3..9", 3, 9 ; "dotted range")]
    #[test_case("chr1:3-9", 3, 9 ; "dashed range")]
    fn parses_regions(region: &str, left: u32, right: u32) {
        let target = Target::parse_region(region, &reference()).unwrap();
        assert_eq!(target.chrom.as_ref(), "chr1");
        assert_eq!((target.left, target.right), (left, right));
    }

    #[test]
    fn rejects_out_of_reference_targets() {
        let err = Target::parse_region("chr1:10..25", &reference()).unwrap_err();
        assert!(matches!(err, TargetError::OutOfReference { length: 20, .. }));
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(matches!(
            Target::new("chr1", 9, 3),
            Err(TargetError::InvalidBounds { .. })
        ));
        assert!(matches!(
            Target::new("chr1", 0, 3),
            Err(TargetError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn unknown_sequence_is_reported() {
        let err = Target::parse_region("chrZ:1..2", &reference()).unwrap_err();
        assert!(matches!(
            err,
            TargetError::Reference(ReferenceError::UnknownSequence(_))
        ));
    }

    #[test]
    fn bed_records_become_one_based() {
        let bed = "# header\ntrack name=x\nchr1\t0\t10\tfirst\nchr1\t14\t15\n";
        let targets = parse_bed(bed.as_bytes()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!((targets[0].left, targets[0].right), (1, 10));
        assert_eq!(targets[0].label.as_deref(), Some("first"));
        assert_eq!((targets[1].left, targets[1].right), (15, 15));
        assert_eq!(targets[1].start0(), 14);
        assert_eq!(targets[1].last0(), 14);
    }

    #[test]
    fn empty_bed_is_an_error() {
        assert!(matches!(parse_bed("".as_bytes()), Err(TargetError::Empty)));
        assert!(matches!(
            parse_bed("chr1\tx\t10\n".as_bytes()),
            Err(TargetError::MalformedBed { line: 1, .. })
        ));
    }

    #[test]
    fn coordinates_at_the_u32_limit_are_malformed() {
        assert!(matches!(
            Target::parse_region("chr1:4294967295", &reference()),
            Err(TargetError::MalformedRegion(_))
        ));
        match parse_bed("chr1\t4294967295\t4294967295\n".as_bytes()) {
            Err(TargetError::MalformedBed { line, reason }) => {
                assert_eq!(line, 1);
                assert_eq!(reason, "start out of range");
            }
            other => panic!("expected malformed BED record, got {other:?}"),
        }
    }
}
