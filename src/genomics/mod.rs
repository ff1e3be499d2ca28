//! Streaming allele observation engine.
//!
//! Components, leaves first: the [`ReferenceWindow`] cache, the
//! [`AlleleDecoder`] that splits alignments into typed alleles, the
//! [`AlignmentWindow`] of overlapping alignments, the [`AlleleRegistry`] that
//! groups live alleles per sample, the [`GenotypeCandidateSelector`], and the
//! [`PositionStepper`] that drives them through [`AlleleParser`].

mod allele;
mod candidates;
mod config;
mod decoder;
mod io;
mod parser;
mod read_groups;
mod reference;
mod registry;
mod report;
mod source;
mod stepper;
mod target;
mod types;
mod window;

pub use allele::{
    possible_snp_alleles, Allele, AlleleContext, AlleleKey, AlleleType, AlleleTypeSet,
    Observation,
};
pub use candidates::{
    homopolymer_run_left, homopolymer_run_right, GenotypeCandidateSelector, ScoredClass,
};
pub use config::{ConfigError, ParserConfig};
pub use decoder::{AlleleDecoder, DecodeError};
pub use io::{BamAlignmentSource, FastaReference};
pub use parser::{AlleleParser, ParserError, REFERENCE_PADDING};
pub use read_groups::{ReadGroupError, ReadGroups};
pub use reference::{InMemoryReference, ReferenceError, ReferenceProvider, ReferenceWindow};
pub use registry::{AlleleRef, AlleleRegistry, Sample, Samples};
pub use report::{
    render_reports, write_header, write_report, BaseSupport, PositionReport, SampleReport,
};
pub use source::{AlignmentSource, SourceError, VecAlignmentSource};
pub use stepper::{Advance, EngineState, PositionStepper, StepperPhase};
pub use target::{parse_bed, Target, TargetError};
pub use types::{AlignedRead, CigarOp, CigarOpKind};
pub use window::{Admission, AlignmentWindow, AlleleHandle, RegisteredAlignment};
