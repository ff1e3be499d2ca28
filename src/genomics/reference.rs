use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use super::target::Target;

/// Errors raised while fetching reference sequence.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// Sequence name not present in the reference.
    #[error("unknown reference sequence '{0}'")]
    UnknownSequence(String),

    /// Requested region exceeds the sequence bounds.
    #[error("region {chrom}:{start}+{length} exceeds reference sequence length {sequence_length}")]
    OutOfBounds {
        /// Sequence name.
        chrom: String,
        /// 0-based start of the request.
        start: i64,
        /// Number of bases requested.
        length: u64,
        /// Length of the sequence.
        sequence_length: u64,
    },

    /// Backend failure (index or file access).
    #[error("reference provider error: {0}")]
    Provider(String),
}

/// Source of reference sequence, addressed by 0-based coordinates.
pub trait ReferenceProvider {
    /// Fetch `length` bases starting at 0-based `start`, uppercased.
    fn subsequence(&self, name: &str, start: u64, length: u64) -> Result<Vec<u8>, ReferenceError>;

    /// Length of the named sequence.
    fn sequence_length(&self, name: &str) -> Result<u64, ReferenceError>;
}

impl<T: ReferenceProvider + ?Sized> ReferenceProvider for &T {
    fn subsequence(&self, name: &str, start: u64, length: u64) -> Result<Vec<u8>, ReferenceError> {
        (**self).subsequence(name, start, length)
    }

    fn sequence_length(&self, name: &str) -> Result<u64, ReferenceError> {
        (**self).sequence_length(name)
    }
}

/// Reference held entirely in memory, keyed by sequence name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReference {
    sequences: HashMap<String, Arc<[u8]>>,
}

impl InMemoryReference {
    /// Create an empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a sequence; bases are stored uppercased.
    pub fn insert(&mut self, name: impl Into<String>, sequence: impl AsRef<[u8]>) {
        let upper = sequence.as_ref().to_ascii_uppercase();
        self.sequences.insert(name.into(), Arc::from(upper.into_boxed_slice()));
    }

    /// Sequence names in arbitrary order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(String::as_str)
    }
}

impl ReferenceProvider for InMemoryReference {
    fn subsequence(&self, name: &str, start: u64, length: u64) -> Result<Vec<u8>, ReferenceError> {
        let sequence = self
            .sequences
            .get(name)
            .ok_or_else(|| ReferenceError::UnknownSequence(name.to_string()))?;
        let end = start + length;
        if end > sequence.len() as u64 {
            return Err(ReferenceError::OutOfBounds {
                chrom: name.to_string(),
                start: start as i64,
                length,
                sequence_length: sequence.len() as u64,
            });
        }
        Ok(sequence[start as usize..end as usize].to_vec())
    }

    fn sequence_length(&self, name: &str) -> Result<u64, ReferenceError> {
        self.sequences
            .get(name)
            .map(|s| s.len() as u64)
            .ok_or_else(|| ReferenceError::UnknownSequence(name.to_string()))
    }
}

/// Cached reference subsequence covering the current target plus padding.
///
/// The window spans `[target.start0() - bases_before, target.last0() + 1 + bases_after)`
/// and only ever grows to the right.
#[derive(Debug, Clone)]
pub struct ReferenceWindow {
    chrom: Arc<str>,
    origin: u32,
    bases_before: u32,
    bases_after: u32,
    bases: Vec<u8>,
}

impl ReferenceWindow {
    /// Load the window for `target` with the requested padding.
    pub fn load<R: ReferenceProvider + ?Sized>(
        reference: &R,
        target: &Target,
        bases_before: u32,
        bases_after: u32,
    ) -> Result<Self, ReferenceError> {
        let length = target.len() as u64 + bases_before as u64 + bases_after as u64;
        let origin = target
            .start0()
            .checked_sub(bases_before)
            .ok_or_else(|| ReferenceError::OutOfBounds {
                chrom: target.chrom.to_string(),
                start: target.start0() as i64 - bases_before as i64,
                length,
                sequence_length: 0,
            })?;

        check_bounds(reference, &target.chrom, origin as u64, length)?;
        let bases = reference.subsequence(&target.chrom, origin as u64, length)?;
        trace!(
            chrom = %target.chrom,
            origin,
            length,
            "loaded reference window"
        );

        Ok(Self {
            chrom: Arc::clone(&target.chrom),
            origin,
            bases_before,
            bases_after,
            bases,
        })
    }

    /// Append `extra` bases to the right end of the window.
    pub fn extend_right<R: ReferenceProvider + ?Sized>(
        &mut self,
        reference: &R,
        extra: u32,
    ) -> Result<(), ReferenceError> {
        if extra == 0 {
            return Ok(());
        }
        let start = self.end() as u64;
        check_bounds(reference, &self.chrom, start, extra as u64)?;
        let more = reference.subsequence(&self.chrom, start, extra as u64)?;
        self.bases.extend_from_slice(&more);
        self.bases_after += extra;
        trace!(chrom = %self.chrom, extra, end = self.end(), "extended reference window");
        Ok(())
    }

    /// Sequence the window was loaded from.
    pub fn chrom(&self) -> &Arc<str> {
        &self.chrom
    }

    /// Genomic coordinate of the first cached base.
    pub fn origin(&self) -> u32 {
        self.origin
    }

    /// Exclusive genomic end of the cached bases.
    pub fn end(&self) -> u32 {
        self.origin + self.bases.len() as u32
    }

    /// Padding loaded before the target start.
    pub fn bases_before(&self) -> u32 {
        self.bases_before
    }

    /// Padding loaded after the target end.
    pub fn bases_after(&self) -> u32 {
        self.bases_after
    }

    /// Cached bases.
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    /// Window offset of a genomic position.
    pub fn offset(&self, position: u32) -> Option<usize> {
        let offset = position.checked_sub(self.origin)? as usize;
        (offset < self.bases.len()).then_some(offset)
    }

    /// Reference base at a genomic position.
    pub fn base_at(&self, position: u32) -> Option<u8> {
        self.offset(position).map(|offset| self.bases[offset])
    }

    /// `length` reference bases starting at a genomic position.
    pub fn substring(&self, position: u32, length: u32) -> Option<&[u8]> {
        let start = position.checked_sub(self.origin)? as usize;
        self.bases.get(start..start + length as usize)
    }
}

fn check_bounds<R: ReferenceProvider + ?Sized>(
    reference: &R,
    chrom: &str,
    start: u64,
    length: u64,
) -> Result<(), ReferenceError> {
    let sequence_length = reference.sequence_length(chrom)?;
    if start + length > sequence_length {
        return Err(ReferenceError::OutOfBounds {
            chrom: chrom.to_string(),
            start: start as i64,
            length,
            sequence_length,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> InMemoryReference {
        let mut reference = InMemoryReference::new();
        reference.insert("chr1", b"aaccggttACGTACGTNNNN");
        reference
    }

    #[test]
    fn window_covers_target_and_padding() {
        let target = Target::new("chr1", 5, 8).unwrap();
        let window = ReferenceWindow::load(&reference(), &target, 2, 1).unwrap();
        assert_eq!(window.origin(), 2);
        assert_eq!(window.end(), 9);
        assert_eq!(window.bases(), b"CCGGTTA");
        assert_eq!(window.base_at(4), Some(b'G'));
        assert_eq!(window.base_at(1), None);
        assert_eq!(window.base_at(9), None);
        assert_eq!(window.substring(6, 3), Some(&b"TTA"[..]));
        assert_eq!(window.substring(7, 3), None);
    }

    #[test]
    fn extension_appends_and_tracks_padding() {
        let target = Target::new("chr1", 1, 4).unwrap();
        let reference = reference();
        let mut window = ReferenceWindow::load(&reference, &target, 0, 0).unwrap();
        assert_eq!(window.bases(), b"AACC");
        window.extend_right(&reference, 3).unwrap();
        assert_eq!(window.bases(), b"AACCGGT");
        assert_eq!(window.bases_after(), 3);
        assert_eq!(window.end(), 7);
    }

    #[test]
    fn extension_past_sequence_end_fails() {
        let target = Target::new("chr1", 15, 20).unwrap();
        let reference = reference();
        let mut window = ReferenceWindow::load(&reference, &target, 0, 0).unwrap();
        let err = window.extend_right(&reference, 1).unwrap_err();
        assert!(matches!(
            err,
            ReferenceError::OutOfBounds {
                sequence_length: 20,
                ..
            }
        ));
    }

    #[test]
    fn padding_before_sequence_start_fails() {
        let target = Target::new("chr1", 2, 4).unwrap();
        assert!(ReferenceWindow::load(&reference(), &target, 3, 0).is_err());
    }
}
