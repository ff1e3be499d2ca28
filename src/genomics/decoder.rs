//! CIGAR decomposition of one alignment into allele observations.
//!
//! Three cursors walk the alignment in lockstep: the read offset `rp`, the
//! genomic position `sp` and the reference-window offset `csp`. Every maximal
//! run of matching bases becomes one reference allele, every mismatch its own
//! SNP, and each insertion/deletion a single indel allele. Indels with a
//! countable quality seed an alignment-local proximity mask which, when an
//! exclusion window is configured, is widened and copied onto the alleles it
//! touches.

use std::ops::Range;
use std::sync::Arc;

use bitvec::prelude::*;
use thiserror::Error;
use tracing::trace;

use super::allele::{Allele, AlleleType};
use super::config::ParserConfig;
use super::reference::ReferenceWindow;
use super::types::{AlignedRead, CigarOpKind};
use super::window::RegisteredAlignment;

/// Errors raised while decoding an alignment.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// CIGAR consumes more read bases than the read carries.
    #[error("read {read}: CIGAR {cigar} needs {needed} bases but sequence has {available}")]
    ShortRead {
        /// Read name.
        read: String,
        /// CIGAR in SAM notation.
        cigar: String,
        /// Read bases required by the CIGAR.
        needed: usize,
        /// Read bases present.
        available: usize,
    },

    /// Alignment walks outside the cached reference window.
    #[error("read {read}: position {position} lies outside the reference window {origin}..{end}")]
    OutsideReference {
        /// Read name.
        read: String,
        /// Offending genomic position.
        position: u32,
        /// Window start.
        origin: u32,
        /// Window end (exclusive).
        end: u32,
    },
}

/// Turns alignments into ordered allele observations plus a mismatch count.
#[derive(Debug, Clone, Copy)]
pub struct AlleleDecoder {
    mismatch_base_quality: u8,
    indel_exclusion_window: Option<u32>,
}

impl AlleleDecoder {
    /// Create a decoder with a countable-mismatch threshold and optional
    /// indel exclusion window.
    pub fn new(mismatch_base_quality: u8, indel_exclusion_window: Option<u32>) -> Self {
        Self {
            mismatch_base_quality,
            indel_exclusion_window,
        }
    }

    /// Decoder configured from parser options.
    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new(config.mismatch_base_quality, config.indel_exclusion_window)
    }

    /// Decode `read`, attributing alleles to `sample`.
    pub fn decode(
        &self,
        read: AlignedRead,
        sample: Arc<str>,
        reference: &ReferenceWindow,
    ) -> Result<RegisteredAlignment, DecodeError> {
        let needed = read.cigar_read_len();
        if needed > read.len() {
            return Err(DecodeError::ShortRead {
                read: read.name.to_string(),
                cigar: read.cigar_string(),
                needed,
                available: read.len(),
            });
        }
        let outside = |position: u32| DecodeError::OutsideReference {
            read: read.name.to_string(),
            position,
            origin: reference.origin(),
            end: reference.end(),
        };

        let bases = reference.bases();
        let footprint = read.footprint() as usize;
        let mut mask = bitvec![0; footprint];
        let mut emit = Emitter {
            read: &read,
            sample,
            alleles: Vec::new(),
        };
        let mut mismatches = 0u32;

        let mut rp = 0usize;
        let mut sp = read.pos;
        let mut csp = reference.offset(read.pos).ok_or_else(|| outside(read.pos))?;

        for op in &read.cigar {
            let len = op.len;
            match op.kind {
                CigarOpKind::Match => {
                    let mut first_match = csp;
                    for _ in 0..len {
                        let b = read.sequence[rp].to_ascii_uppercase();
                        let q = read.quality_at(rp).unwrap_or(0);
                        let sb = *bases.get(csp).ok_or_else(|| outside(sp))?;

                        if b != sb {
                            if first_match < csp {
                                let length = csp - first_match;
                                emit.reference(sp, rp, &bases[first_match..csp], length);
                            }
                            if q >= self.mismatch_base_quality {
                                mismatches += 1;
                            }
                            emit.push(
                                AlleleType::Snp,
                                sp,
                                1,
                                vec![sb],
                                vec![b],
                                vec![q],
                                q,
                            );
                            first_match = csp + 1;
                        }

                        sp += 1;
                        csp += 1;
                        rp += 1;
                    }
                    if first_match < csp {
                        let length = csp - first_match;
                        emit.reference(sp, rp, &bases[first_match..csp], length);
                    }
                }
                CigarOpKind::Deletion => {
                    let flanking: Vec<u8> = rp
                        .checked_sub(1)
                        .and_then(|i| read.quality_at(i))
                        .into_iter()
                        .chain(read.quality_at(rp))
                        .collect();
                    let q = flanking.iter().copied().max().unwrap_or(0);
                    if q >= self.mismatch_base_quality {
                        mismatches += len;
                        let local = (sp - read.pos) as usize;
                        mark(&mut mask, local..local + len as usize);
                    }
                    let deleted = bases
                        .get(csp..csp + len as usize)
                        .ok_or_else(|| outside(sp))?
                        .to_vec();
                    emit.push(AlleleType::Deletion, sp, len, deleted, Vec::new(), flanking, q);

                    sp += len;
                    csp += len as usize;
                }
                CigarOpKind::Insertion => {
                    let span = rp..rp + len as usize;
                    let inserted = read.sequence[span.clone()].to_ascii_uppercase();
                    let quals = qualities(&read, span);
                    let q = quals.iter().copied().max().unwrap_or(0);
                    if q >= self.mismatch_base_quality {
                        mismatches += len;
                        let local = (sp - read.pos) as usize;
                        mark(&mut mask, local.saturating_sub(1)..local + 1);
                    }
                    emit.push(AlleleType::Insertion, sp, 0, Vec::new(), inserted, quals, q);

                    rp += len as usize;
                }
                CigarOpKind::SoftClip => {
                    rp += len as usize;
                    sp += len;
                    csp += len as usize;
                }
                CigarOpKind::HardClip | CigarOpKind::RefSkip => {
                    sp += len;
                    csp += len as usize;
                }
            }
        }

        let mut alleles = emit.alleles;
        if let Some(window) = self.indel_exclusion_window {
            widen(&mut mask, window as usize);
            for allele in &mut alleles {
                let start = (allele.position - read.pos) as usize;
                let end = (start + allele.length as usize).min(mask.len());
                if start < end && mask[start..end].any() {
                    allele.indel_mask = Some(mask[start..end].to_bitvec());
                }
            }
        }

        trace!(
            read = %read.name,
            cigar = %read.cigar_string(),
            alleles = alleles.len(),
            mismatches,
            "decoded alignment"
        );

        Ok(RegisteredAlignment {
            read,
            alleles,
            mismatches,
        })
    }
}

struct Emitter<'a> {
    read: &'a AlignedRead,
    sample: Arc<str>,
    alleles: Vec<Allele>,
}

impl Emitter<'_> {
    /// Reference allele for the `length` matching bases ending just before `sp`/`rp`.
    fn reference(&mut self, sp: u32, rp: usize, reference_bases: &[u8], length: usize) {
        let span = rp - length..rp;
        let observed = self.read.sequence[span.clone()].to_ascii_uppercase();
        let quals = qualities(self.read, span);
        let quality = quals.first().copied().unwrap_or(0);
        self.push(
            AlleleType::Reference,
            sp - length as u32,
            length as u32,
            reference_bases.to_vec(),
            observed,
            quals,
            quality,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        kind: AlleleType,
        position: u32,
        length: u32,
        reference_bases: Vec<u8>,
        observed_bases: Vec<u8>,
        base_qualities: Vec<u8>,
        quality: u8,
    ) {
        let allele = Allele::new(
            kind,
            Arc::clone(&self.read.chrom),
            position,
            length,
            reference_bases,
            observed_bases,
            Arc::clone(&self.sample),
            Arc::clone(&self.read.name),
            self.read.is_reverse,
            self.read.mapq,
            base_qualities,
            quality,
        );
        trace!(allele = %allele, "emitted allele");
        self.alleles.push(allele);
    }
}

fn qualities(read: &AlignedRead, span: Range<usize>) -> Vec<u8> {
    match read.qualities.get(span.clone()) {
        Some(quals) => quals.to_vec(),
        None => vec![0; span.len()],
    }
}

fn mark(mask: &mut BitVec, span: Range<usize>) {
    let end = span.end.min(mask.len());
    if span.start < end {
        mask[span.start..end].fill(true);
    }
}

/// Extend every marked base by `window` bases on both sides.
fn widen(mask: &mut BitVec, window: usize) {
    let seeds: Vec<usize> = mask.iter_ones().collect();
    for seed in seeds {
        mark(mask, seed.saturating_sub(window)..seed + window + 1);
    }
}
