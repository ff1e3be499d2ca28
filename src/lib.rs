//! # Streaming allele observations
//!
//! Converts a position-sorted stream of aligned reads into per-position,
//! per-sample groupings of typed allele observations (reference runs, SNPs,
//! insertions and deletions) ready for a genotyping stage.
//!
//! ## Pipeline
//!
//! 1. **Stepping**: walk every position of every target that has alignments
//! 2. **Windowing**: admit alignments starting at the position, evict those behind it
//! 3. **Decoding**: split each admitted alignment into alleles along its CIGAR
//! 4. **Grouping**: file the alleles active at the position by sample and base
//! 5. **Selection**: rank observed allele classes into genotyping candidates
//!
//! ## Usage Example
//!
//! ```ignore
//! use allele_stream::genomics::{AlleleParser, AlleleTypeSet, ParserConfig};
//!
//! let mut parser = AlleleParser::new(source, reference, read_groups, targets, ParserConfig::default())?;
//! while parser.next_alleles(AlleleTypeSet::ALL)? {
//!     for (sample, grouping) in parser.samples().iter() {
//!         println!("{sample}: {} observations", grouping.observation_count());
//!     }
//! }
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod genomics; // Allele parsing engine and its collaborators

pub use genomics::{
    Allele, AlleleParser, AlleleType, AlleleTypeSet, ParserConfig, ParserError, Target,
};
