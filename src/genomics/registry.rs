//! Live allele index and per-sample grouping at the scan position.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use super::allele::{Allele, AlleleContext, AlleleKey, AlleleType, AlleleTypeSet};
use super::config::ParserConfig;
use super::window::{AlignmentWindow, AlleleHandle};

/// Non-owning reference to a grouped allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AlleleRef {
    /// Allele owned by an alignment in the window.
    Read(AlleleHandle),
    /// Synthetic reference allele owned by the registry.
    Reference,
}

/// Observations of one sample, keyed by observed base string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    groups: BTreeMap<String, Vec<AlleleRef>>,
}

impl Sample {
    /// Observations attributed to `base`.
    pub fn get(&self, base: &str) -> Option<&[AlleleRef]> {
        self.groups.get(base).map(Vec::as_slice)
    }

    /// Number of observations of `base`.
    pub fn count(&self, base: &str) -> usize {
        self.groups.get(base).map_or(0, Vec::len)
    }

    /// Total observations across all bases.
    pub fn observation_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Observed base strings in lexical order.
    pub fn bases(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// `(base, observations)` pairs in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AlleleRef])> {
        self.groups
            .iter()
            .map(|(base, refs)| (base.as_str(), refs.as_slice()))
    }

    /// Whether the sample holds no observations.
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }

    fn file(&mut self, base: &str, allele: AlleleRef) {
        self.groups.entry(base.to_string()).or_default().push(allele);
    }

    fn prune(&mut self) {
        self.groups.retain(|_, refs| !refs.is_empty());
    }
}

/// Samples keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Samples {
    samples: BTreeMap<Arc<str>, Sample>,
}

impl Samples {
    /// Grouping of one sample.
    pub fn get(&self, sample: &str) -> Option<&Sample> {
        self.samples.get(sample)
    }

    /// `(name, sample)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Sample)> {
        self.samples.iter()
    }

    /// Number of samples with observations.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample holds observations.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn file(&mut self, sample: &Arc<str>, base: &str, allele: AlleleRef) {
        self.samples
            .entry(Arc::clone(sample))
            .or_default()
            .file(base, allele);
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Flat index of window-resident alleles plus the current grouping.
#[derive(Debug, Default)]
pub struct AlleleRegistry {
    alleles: Vec<AlleleHandle>,
    reference_allele: Option<Allele>,
    samples: Samples,
}

impl AlleleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index newly admitted alleles.
    pub fn register(&mut self, handles: impl IntoIterator<Item = AlleleHandle>) {
        self.alleles.extend(handles);
    }

    /// Number of indexed alleles.
    pub fn len(&self) -> usize {
        self.alleles.len()
    }

    /// Whether no allele is indexed.
    pub fn is_empty(&self) -> bool {
        self.alleles.is_empty()
    }

    /// Drop alleles that no longer overlap `position` or whose alignment left the window.
    pub fn expire(&mut self, position: u32, window: &AlignmentWindow) -> usize {
        let before = self.alleles.len();
        self.alleles.retain(|&handle| {
            window
                .get(handle)
                .is_some_and(|allele| allele.overlaps(position))
        });
        before - self.alleles.len()
    }

    /// Forget everything, including the grouping.
    pub fn clear(&mut self) {
        self.alleles.clear();
        self.reference_allele = None;
        self.samples.clear();
    }

    /// Current per-sample grouping.
    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Synthetic reference allele at the current position, when enabled.
    pub fn reference_allele(&self) -> Option<&Allele> {
        self.reference_allele.as_ref()
    }

    /// Rebuild the per-sample grouping at `context.position`.
    ///
    /// Alleles already filed are re-evaluated from a snapshot of the previous
    /// grouping; those failing quality, mask or ambiguity checks are left
    /// unprocessed so a later position can pick them up again. Unprocessed
    /// alleles active at the position are then filed and marked processed.
    pub fn group(
        &mut self,
        window: &mut AlignmentWindow,
        context: AlleleContext,
        chrom: &Arc<str>,
        config: &ParserConfig,
        allowed: AlleleTypeSet,
        just_switched: bool,
    ) {
        let position = context.position;
        let min_quality = config.min_base_quality;
        let previous = std::mem::take(&mut self.samples);

        if !just_switched {
            for (sample, grouping) in previous.iter() {
                for (_, refs) in grouping.iter() {
                    for &allele_ref in refs {
                        let AlleleRef::Read(handle) = allele_ref else {
                            continue;
                        };
                        let Some(allele) = window.get_mut(handle) else {
                            continue;
                        };
                        if !allele.is_active_at(position) || !allowed.contains(allele.kind) {
                            allele.processed = false;
                            continue;
                        }
                        if allele.update(context).passes(min_quality) {
                            self.samples.file(sample, allele.current_base(), allele_ref);
                        } else {
                            trace!(allele = %allele, position, "filtered allele requeued");
                            allele.processed = false;
                        }
                    }
                }
            }
        }

        self.reference_allele = None;
        if config.use_reference_allele && allowed.contains(AlleleType::Reference) {
            let allele = Allele::synthetic_reference(
                Arc::clone(chrom),
                context,
                config.reference_mapping_quality,
                config.reference_base_quality,
            );
            self.samples
                .file(&allele.sample, allele.current_base(), AlleleRef::Reference);
            self.reference_allele = Some(allele);
        }

        for &handle in &self.alleles {
            let Some(allele) = window.get_mut(handle) else {
                continue;
            };
            if allele.processed || !allowed.contains(allele.kind) || !allele.is_active_at(position) {
                continue;
            }
            if allele.update(context).passes(min_quality) {
                allele.processed = true;
                self.samples
                    .file(&allele.sample, allele.current_base(), AlleleRef::Read(handle));
            }
        }

        for sample in self.samples.samples.values_mut() {
            sample.prune();
        }
        self.samples.samples.retain(|_, sample| !sample.is_empty());
    }

    /// Resolve a grouped reference.
    pub fn resolve<'a>(&'a self, window: &'a AlignmentWindow, allele: AlleleRef) -> Option<&'a Allele> {
        match allele {
            AlleleRef::Read(handle) => window.get(handle),
            AlleleRef::Reference => self.reference_allele.as_ref(),
        }
    }

    /// Grouped alleles collected into equivalence classes.
    pub fn equivalence_groups<'a>(
        &'a self,
        window: &'a AlignmentWindow,
    ) -> BTreeMap<AlleleKey, Vec<&'a Allele>> {
        let mut groups: BTreeMap<AlleleKey, Vec<&Allele>> = BTreeMap::new();
        for (_, sample) in self.samples.iter() {
            for (_, refs) in sample.iter() {
                for allele in refs.iter().filter_map(|r| self.resolve(window, *r)) {
                    groups.entry(allele.key()).or_default().push(allele);
                }
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{
        AlignedRead, AlleleDecoder, CigarOp, CigarOpKind, InMemoryReference, ReferenceWindow,
        Target,
    };

    struct Fixture {
        reference: ReferenceWindow,
        window: AlignmentWindow,
        registry: AlleleRegistry,
        chrom: Arc<str>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut provider = InMemoryReference::new();
            provider.insert("chr1", b"ACGTACGTACGTACGTACGT");
            let target = Target::new("chr1", 1, 20).unwrap();
            Self {
                reference: ReferenceWindow::load(&provider, &target, 0, 0).unwrap(),
                window: AlignmentWindow::new(),
                registry: AlleleRegistry::new(),
                chrom: Arc::from("chr1"),
            }
        }

        fn add(&mut self, sample: &str, bases: &[u8], quals: Vec<u8>) {
            let read = AlignedRead::new(
                "chr1",
                0,
                60,
                vec![CigarOp::new(CigarOpKind::Match, bases.len() as u32)],
                bases.to_vec(),
                quals,
                false,
            );
            let decoded = AlleleDecoder::new(20, None)
                .decode(read, Arc::from(sample), &self.reference)
                .unwrap();
            let handles = self.window.insert(decoded);
            self.registry.register(handles);
        }

        fn group(&mut self, position: u32, config: &ParserConfig) {
            let context = AlleleContext {
                position,
                reference_base: self.reference.base_at(position).unwrap(),
            };
            self.registry.expire(position, &self.window);
            self.registry.group(
                &mut self.window,
                context,
                &self.chrom,
                config,
                AlleleTypeSet::ALL,
                false,
            );
        }

        fn counts(&self) -> Vec<(String, String, usize)> {
            self.registry
                .samples()
                .iter()
                .flat_map(|(name, sample)| {
                    sample
                        .iter()
                        .map(move |(base, refs)| (name.to_string(), base.to_string(), refs.len()))
                })
                .collect()
        }
    }

    #[test]
    fn groups_by_sample_and_observed_base() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACGT", vec![30; 4]);
        fx.add("s2", b"ACTT", vec![30; 4]);
        fx.add("s2", b"ACGT", vec![30; 4]);
        fx.group(2, &ParserConfig::default());

        assert_eq!(
            fx.counts(),
            vec![
                ("s1".into(), "G".into(), 1),
                ("s2".into(), "G".into(), 1),
                ("s2".into(), "T".into(), 1),
            ]
        );
        let s2 = fx.registry.samples().get("s2").unwrap();
        assert_eq!(s2.observation_count(), 2);
        let snp = fx.registry.resolve(&fx.window, s2.get("T").unwrap()[0]).unwrap();
        assert_eq!(snp.kind, AlleleType::Snp);
    }

    #[test]
    fn regrouping_at_same_position_is_idempotent() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACGT", vec![30; 4]);
        fx.add("s1", b"ACTT", vec![30; 4]);
        let config = ParserConfig::default();
        fx.group(2, &config);
        let first = fx.registry.samples().clone();
        fx.group(2, &config);
        assert_eq!(fx.registry.samples(), &first);
    }

    #[test]
    fn reference_alleles_move_between_bases() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACGT", vec![30; 4]);
        let config = ParserConfig::default();
        fx.group(0, &config);
        assert_eq!(fx.counts(), vec![("s1".into(), "A".into(), 1)]);
        fx.group(1, &config);
        assert_eq!(fx.counts(), vec![("s1".into(), "C".into(), 1)]);
    }

    #[test]
    fn filtered_alleles_are_requeued() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACGT", vec![30, 5, 30, 30]);
        let config = ParserConfig::default().with_min_base_quality(20);

        fx.group(0, &config);
        assert_eq!(fx.counts(), vec![("s1".into(), "A".into(), 1)]);
        fx.group(1, &config);
        assert!(fx.registry.samples().is_empty());
        fx.group(2, &config);
        assert_eq!(fx.counts(), vec![("s1".into(), "G".into(), 1)]);
    }

    #[test]
    fn expired_alleles_leave_the_index() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACTT", vec![30; 4]);
        assert_eq!(fx.registry.len(), 3);
        fx.group(3, &ParserConfig::default());
        assert_eq!(fx.registry.len(), 1);
        fx.group(4, &ParserConfig::default());
        assert!(fx.registry.is_empty());
        assert!(fx.registry.samples().is_empty());
    }

    #[test]
    fn synthetic_reference_is_filed_under_sequence_name() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACTT", vec![30; 4]);
        let config = ParserConfig::default().with_reference_allele(true);
        fx.group(2, &config);
        assert_eq!(
            fx.counts(),
            vec![("chr1".into(), "G".into(), 1), ("s1".into(), "T".into(), 1)]
        );
        let groups = fx.registry.equivalence_groups(&fx.window);
        let reference = &groups[&AlleleKey::new(AlleleType::Reference, "G", 1)];
        assert!(reference[0].genotype_allele);
    }

    #[test]
    fn synthetic_reference_ignores_the_base_quality_floor() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACGT", vec![30; 4]);
        let config = ParserConfig::default()
            .with_reference_allele(true)
            .with_reference_qualities(100, 10)
            .with_min_base_quality(20);
        fx.group(1, &config);
        assert_eq!(
            fx.counts(),
            vec![("chr1".into(), "C".into(), 1), ("s1".into(), "C".into(), 1)]
        );
    }

    #[test]
    fn target_switch_discards_previous_grouping() {
        let mut fx = Fixture::new();
        fx.add("s1", b"ACGT", vec![30; 4]);
        let config = ParserConfig::default();
        fx.group(0, &config);
        let context = AlleleContext {
            position: 1,
            reference_base: b'C',
        };
        fx.registry.group(
            &mut fx.window,
            context,
            &fx.chrom,
            &config,
            AlleleTypeSet::ALL,
            true,
        );
        assert!(fx.registry.samples().is_empty());
    }
}
