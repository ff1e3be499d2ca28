//! Streaming allele parser: the engine tying every component together.
//!
//! Each [`AlleleParser::step`] moves to the next position, admits alignments
//! starting at or before it, evicts those that ended and expires alleles that
//! no longer overlap. [`AlleleParser::group_alleles`] then files the alleles
//! active at the position by sample, and
//! [`AlleleParser::genotype_alleles`] ranks the observed classes into
//! genotyping candidates.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use super::allele::{Allele, AlleleKey, AlleleTypeSet};
use super::candidates::{homopolymer_run_left, homopolymer_run_right, GenotypeCandidateSelector};
use super::config::{ConfigError, ParserConfig};
use super::decoder::{AlleleDecoder, DecodeError};
use super::read_groups::{ReadGroupError, ReadGroups};
use super::reference::{ReferenceError, ReferenceProvider, ReferenceWindow};
use super::registry::{AlleleRef, AlleleRegistry, Samples};
use super::report::PositionReport;
use super::source::{AlignmentSource, SourceError};
use super::stepper::{Advance, EngineState, PositionStepper, StepperPhase};
use super::target::{Target, TargetError};
use super::window::{Admission, AlignmentWindow};

/// Reference bases cached beyond each side of a target when available.
pub const REFERENCE_PADDING: u32 = 10;

/// Fatal engine errors.
#[derive(Debug, Error)]
pub enum ParserError {
    /// Admitted alignment carries no read group.
    #[error("could not find read group for alignment {0}")]
    MissingReadGroup(String),

    /// No target has a single overlapping alignment.
    #[error("no alignments overlap any target region")]
    NoAlignments,

    /// Empty target list.
    #[error("no target regions to scan")]
    NoTargets,

    /// Operation needs a loaded target.
    #[error("no target is being scanned")]
    NoActiveTarget,

    /// Alignment could not be decoded against the reference.
    #[error("malformed alignment: {0}")]
    MalformedAlignment(#[from] DecodeError),

    /// Reference window could not be loaded or extended.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Target region is malformed.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// Alignment source failure.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Invalid options.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Read groups could not be resolved.
    #[error(transparent)]
    ReadGroups(#[from] ReadGroupError),
}

/// Pull-based allele parser over an alignment source and a reference.
#[derive(Debug)]
pub struct AlleleParser<S, R> {
    source: S,
    reference: R,
    read_groups: ReadGroups,
    config: ParserConfig,
    decoder: AlleleDecoder,
    selector: GenotypeCandidateSelector,
    stepper: PositionStepper,
    state: EngineState,
    window: AlignmentWindow,
    registry: AlleleRegistry,
    entered_any: bool,
}

impl<S, R> AlleleParser<S, R>
where
    S: AlignmentSource,
    R: ReferenceProvider,
{
    /// Validate options and targets, then build an idle parser.
    pub fn new(
        source: S,
        reference: R,
        read_groups: ReadGroups,
        targets: Vec<Target>,
        config: ParserConfig,
    ) -> Result<Self, ParserError> {
        config.validate()?;
        if targets.is_empty() {
            return Err(ParserError::NoTargets);
        }
        for target in &targets {
            target.validate(&reference)?;
        }
        debug!(
            targets = targets.len(),
            samples = read_groups.samples().len(),
            "initialized allele parser"
        );

        Ok(Self {
            source,
            reference,
            read_groups,
            decoder: AlleleDecoder::from_config(&config),
            selector: GenotypeCandidateSelector::from_config(&config),
            config,
            stepper: PositionStepper::new(targets),
            state: EngineState::default(),
            window: AlignmentWindow::new(),
            registry: AlleleRegistry::new(),
            entered_any: false,
        })
    }

    /// Advance to the next position; `Ok(false)` once every target is done.
    ///
    /// Fails with [`ParserError::NoAlignments`] when the very first search for
    /// a target with alignments comes up empty.
    pub fn step(&mut self) -> Result<bool, ParserError> {
        match self.stepper.advance(&mut self.state) {
            Advance::Position => {}
            Advance::NeedTarget => {
                if !self.to_next_target()? {
                    if !self.entered_any {
                        return Err(ParserError::NoAlignments);
                    }
                    return Ok(false);
                }
            }
            Advance::Finished => return Ok(false),
        }
        self.refresh()?;
        Ok(true)
    }

    /// Step and group alleles of the `allowed` types at the new position.
    pub fn next_alleles(&mut self, allowed: AlleleTypeSet) -> Result<bool, ParserError> {
        if !self.step()? {
            return Ok(false);
        }
        self.group_alleles(allowed)?;
        Ok(true)
    }

    /// Rebuild the per-sample grouping at the current position.
    pub fn group_alleles(&mut self, allowed: AlleleTypeSet) -> Result<(), ParserError> {
        let context = self.state.context().ok_or(ParserError::NoActiveTarget)?;
        let chrom = self
            .state
            .target
            .as_ref()
            .map(|target| Arc::clone(&target.chrom))
            .ok_or(ParserError::NoActiveTarget)?;
        let just_switched = std::mem::take(&mut self.state.just_switched);
        self.registry.group(
            &mut self.window,
            context,
            &chrom,
            &self.config,
            allowed,
            just_switched,
        );
        Ok(())
    }

    fn to_next_target(&mut self) -> Result<bool, ParserError> {
        while let Some(target) = self.stepper.next_candidate() {
            match self.source.jump(&target) {
                Ok(()) => {}
                Err(SourceError::UnknownSequence(chrom)) => {
                    debug!(target = %target, chrom = %chrom, "skipping target on a sequence the alignments lack");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            let Some(first) = self.source.next_alignment()? else {
                debug!(target = %target, "skipping target without alignments");
                continue;
            };

            let start = target.start0();
            let before = start
                .saturating_sub(first.pos)
                .max(start.min(REFERENCE_PADDING));
            let sequence_length = self.reference.sequence_length(&target.chrom)?;
            let after = sequence_length
                .saturating_sub(u64::from(target.right))
                .min(u64::from(REFERENCE_PADDING)) as u32;
            let reference = ReferenceWindow::load(&self.reference, &target, before, after)?;
            debug!(
                target = %target,
                first_alignment = first.pos,
                bases_before = before,
                bases_after = after,
                "loaded target"
            );

            self.window.clear();
            self.registry.clear();
            self.window.set_pending(Some(first));
            self.stepper.enter(&mut self.state, target, reference);
            self.entered_any = true;
            return Ok(true);
        }

        debug!("no more targets with alignments");
        self.stepper.finish(&mut self.state);
        Ok(false)
    }

    fn refresh(&mut self) -> Result<(), ParserError> {
        let position = self.state.position;
        let reference = self
            .state
            .reference
            .as_mut()
            .ok_or(ParserError::NoActiveTarget)?;
        let admission = Admission {
            provider: &self.reference,
            read_groups: &self.read_groups,
            decoder: &self.decoder,
            config: &self.config,
        };
        let handles = self
            .window
            .admit(position, &mut self.source, reference, &admission)?;
        let admitted = handles.len();
        let evicted = self.window.evict(position);
        self.registry.register(handles);
        let expired = self.registry.expire(position, &self.window);
        trace!(
            position,
            admitted,
            evicted,
            expired,
            alignments = self.window.len(),
            "advanced position"
        );
        Ok(())
    }

    /// Per-sample grouping at the current position.
    pub fn samples(&self) -> &Samples {
        self.registry.samples()
    }

    /// Resolve a grouped allele reference.
    pub fn resolve(&self, allele: AlleleRef) -> Option<&Allele> {
        self.registry.resolve(&self.window, allele)
    }

    /// Grouped alleles collected into equivalence classes.
    pub fn allele_groups(&self) -> BTreeMap<AlleleKey, Vec<&Allele>> {
        self.registry.equivalence_groups(&self.window)
    }

    /// Ranked genotyping candidates at the current position.
    pub fn genotype_alleles(&self, all_genotype_alleles: &[Allele]) -> Result<Vec<Allele>, ParserError> {
        let reference_base = self.reference_base().ok_or(ParserError::NoActiveTarget)?;
        Ok(self.selector.select(
            &self.allele_groups(),
            self.samples(),
            reference_base,
            all_genotype_alleles,
        ))
    }

    /// Homopolymer run of `base` left of the current position.
    pub fn homopolymer_run_left(&self, base: u8) -> Option<u32> {
        let reference = self.state.reference.as_ref()?;
        Some(homopolymer_run_left(reference, self.state.position, base))
    }

    /// Homopolymer run of `base` right of the current position.
    pub fn homopolymer_run_right(&self, base: u8) -> Option<u32> {
        let reference = self.state.reference.as_ref()?;
        Some(homopolymer_run_right(reference, self.state.position, base))
    }

    /// Summary of the current position, if a target is loaded.
    pub fn report(&self, all_genotype_alleles: &[Allele]) -> Option<PositionReport> {
        let target = self.state.target.as_ref()?;
        let reference = self.state.reference.as_ref()?;
        let position = self.state.position;
        let reference_base = reference.base_at(position)?;
        let candidates = self.genotype_alleles(all_genotype_alleles).ok()?;
        let homopolymer = (
            homopolymer_run_left(reference, position, reference_base),
            homopolymer_run_right(reference, position, reference_base),
        );
        Some(PositionReport::build(
            &target.chrom,
            position,
            reference_base,
            self.samples(),
            |allele| self.resolve(allele),
            &candidates,
            homopolymer,
        ))
    }
}

impl<S, R> AlleleParser<S, R> {
    /// Current 0-based position, if a target is loaded.
    pub fn position(&self) -> Option<u32> {
        self.state.target.as_ref().map(|_| self.state.position)
    }

    /// Target being scanned.
    pub fn target(&self) -> Option<&Target> {
        self.state.target.as_ref()
    }

    /// Reference base at the current position.
    pub fn reference_base(&self) -> Option<u8> {
        self.state.reference_base()
    }

    /// Reference cache of the current target.
    pub fn reference_window(&self) -> Option<&ReferenceWindow> {
        self.state.reference.as_ref()
    }

    /// Phase of the scan.
    pub fn phase(&self) -> StepperPhase {
        self.stepper.phase()
    }

    /// Alignments overlapping the current position.
    pub fn window(&self) -> &AlignmentWindow {
        &self.window
    }

    /// Options the parser runs with.
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Samples under analysis.
    pub fn sample_names(&self) -> &[Arc<str>] {
        self.read_groups.samples()
    }
}
