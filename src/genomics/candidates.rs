//! Genotyping candidate selection and homopolymer context.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use tracing::trace;

use super::allele::{Allele, AlleleKey, AlleleType};
use super::config::ParserConfig;
use super::reference::ReferenceWindow;
use super::registry::Samples;

/// Equivalence class that survived support filtering, with its aggregate score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredClass {
    /// Class key.
    pub key: AlleleKey,
    /// Sum of contributing observation qualities.
    pub score: u64,
}

/// Turns the current grouping into a bounded list of genotyping alleles.
#[derive(Debug, Clone, Copy)]
pub struct GenotypeCandidateSelector {
    min_alt_count: usize,
    min_alt_fraction: f64,
    min_supporting_base_quality: u8,
    min_supporting_mapping_quality: u8,
    use_best_n_alleles: usize,
    force_reference_allele: bool,
}

impl GenotypeCandidateSelector {
    /// Selector configured from parser options.
    pub fn from_config(config: &ParserConfig) -> Self {
        Self {
            min_alt_count: config.min_alt_count,
            min_alt_fraction: config.min_alt_fraction,
            min_supporting_base_quality: config.min_supporting_base_quality,
            min_supporting_mapping_quality: config.min_supporting_mapping_quality,
            use_best_n_alleles: config.use_best_n_alleles,
            force_reference_allele: config.force_reference_allele,
        }
    }

    /// Score every class and keep those some sample supports, in key order.
    pub fn surviving_classes(
        &self,
        groups: &BTreeMap<AlleleKey, Vec<&Allele>>,
        samples: &Samples,
    ) -> Vec<ScoredClass> {
        groups
            .iter()
            .filter(|(key, alleles)| {
                let supported = alleles.iter().any(|a| {
                    a.quality >= self.min_supporting_base_quality
                        && a.map_quality >= self.min_supporting_mapping_quality
                });
                supported && self.sample_support(key, samples)
            })
            .map(|(key, alleles)| ScoredClass {
                key: key.clone(),
                score: alleles.iter().map(|a| u64::from(a.quality)).sum(),
            })
            .collect()
    }

    /// Whether at least one sample meets both the count and fraction thresholds for `key`.
    fn sample_support(&self, key: &AlleleKey, samples: &Samples) -> bool {
        samples.iter().any(|(_, sample)| {
            let total = sample.observation_count();
            let count = sample.count(&key.base);
            total > 0
                && count >= self.min_alt_count
                && count as f64 / total as f64 >= self.min_alt_fraction
        })
    }

    /// Ranked genotyping candidates for the current position.
    ///
    /// `all_genotype_alleles` supplies the reference allele when it has to be
    /// forced into a capped list; a synthetic one is built otherwise.
    pub fn select(
        &self,
        groups: &BTreeMap<AlleleKey, Vec<&Allele>>,
        samples: &Samples,
        reference_base: u8,
        all_genotype_alleles: &[Allele],
    ) -> Vec<Allele> {
        let mut classes = self.surviving_classes(groups, samples);

        if self.use_best_n_alleles == 0 {
            return classes.iter().map(|class| candidate(&class.key)).collect();
        }

        classes.sort_by(|a, b| {
            Reverse(a.score)
                .cmp(&Reverse(b.score))
                .then_with(|| a.key.base.cmp(&b.key.base))
                .then_with(|| a.key.kind.cmp(&b.key.kind))
                .then_with(|| a.key.length.cmp(&b.key.length))
        });
        classes.truncate(self.use_best_n_alleles);
        let mut selected: Vec<Allele> = classes.iter().map(|class| candidate(&class.key)).collect();

        let reference_key = AlleleKey::new(
            AlleleType::Reference,
            (reference_base.to_ascii_uppercase() as char).to_string(),
            1,
        );
        if self.force_reference_allele && !selected.iter().any(|a| a.key() == reference_key) {
            let forced = all_genotype_alleles
                .iter()
                .find(|a| a.key() == reference_key)
                .cloned()
                .unwrap_or_else(|| candidate(&reference_key));
            trace!(key = %reference_key, "forcing reference allele into candidates");
            selected.insert(0, forced);
            selected.truncate(self.use_best_n_alleles);
        }
        selected
    }
}

fn candidate(key: &AlleleKey) -> Allele {
    Allele::genotype(key.kind, key.base.clone(), key.length)
}

/// Run of `base` in the reference immediately left of `position`.
pub fn homopolymer_run_left(reference: &ReferenceWindow, position: u32, base: u8) -> u32 {
    let base = base.to_ascii_uppercase();
    let mut run = 0;
    let mut cursor = position;
    while let Some(previous) = cursor.checked_sub(1) {
        match reference.base_at(previous) {
            Some(b) if b.to_ascii_uppercase() == base => {
                run += 1;
                cursor = previous;
            }
            _ => break,
        }
    }
    run
}

/// Run of `base` in the reference immediately right of `position`.
pub fn homopolymer_run_right(reference: &ReferenceWindow, position: u32, base: u8) -> u32 {
    let base = base.to_ascii_uppercase();
    let mut run = 0;
    let mut cursor = position;
    while let Some(next) = cursor.checked_add(1) {
        match reference.base_at(next) {
            Some(b) if b.to_ascii_uppercase() == base => {
                run += 1;
                cursor = next;
            }
            _ => break,
        }
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{
        possible_snp_alleles, AlignedRead, AlignmentWindow, AlleleContext, AlleleDecoder,
        AlleleRegistry, AlleleTypeSet, CigarOp, CigarOpKind, InMemoryReference, Target,
    };
    use std::sync::Arc;
    use test_case::test_case;

    /// Window and registry grouped at position 2 of `ACGTACGT`, one read per `(sample, base)`.
    fn grouped(reads: &[(&str, u8, u8)]) -> (AlignmentWindow, AlleleRegistry) {
        let mut provider = InMemoryReference::new();
        provider.insert("chr1", b"ACGTACGT");
        let target = Target::new("chr1", 1, 8).unwrap();
        let reference = ReferenceWindow::load(&provider, &target, 0, 0).unwrap();
        let decoder = AlleleDecoder::new(20, None);
        let mut window = AlignmentWindow::new();
        let mut registry = AlleleRegistry::new();
        for &(sample, base, quality) in reads {
            let read = AlignedRead::new(
                "chr1",
                2,
                60,
                vec![CigarOp::new(CigarOpKind::Match, 1)],
                vec![base],
                vec![quality],
                false,
            );
            let decoded = decoder.decode(read, Arc::from(sample), &reference).unwrap();
            registry.register(window.insert(decoded));
        }
        let context = AlleleContext {
            position: 2,
            reference_base: b'G',
        };
        registry.group(
            &mut window,
            context,
            &Arc::from("chr1"),
            &ParserConfig::default(),
            AlleleTypeSet::ALL,
            false,
        );
        (window, registry)
    }

    fn keys(alleles: &[Allele]) -> Vec<String> {
        alleles.iter().map(|a| a.key().to_string()).collect()
    }

    fn two_sample_pileup() -> Vec<(&'static str, u8, u8)> {
        let mut reads = Vec::new();
        reads.extend(std::iter::repeat(("A", b'G', 30)).take(7));
        reads.extend(std::iter::repeat(("A", b'T', 30)).take(3));
        reads.extend(std::iter::repeat(("B", b'G', 30)).take(5));
        reads
    }

    #[test]
    fn minority_class_survives_through_one_sample() {
        let (window, registry) = grouped(&two_sample_pileup());
        let config = ParserConfig::default().with_min_alt(2, 0.2);
        let selector = GenotypeCandidateSelector::from_config(&config);
        let groups = registry.equivalence_groups(&window);
        let selected = selector.select(&groups, registry.samples(), b'G', &[]);
        assert_eq!(keys(&selected), vec!["reference:G:1", "snp:T:1"]);
        assert!(selected.iter().all(|a| a.genotype_allele));
    }

    #[test_case(3, 0.3, true ; "exact thresholds")]
    #[test_case(4, 0.2, false ; "count too high")]
    #[test_case(2, 0.31, false ; "fraction too high")]
    fn support_thresholds(count: usize, fraction: f64, survives: bool) {
        let (window, registry) = grouped(&two_sample_pileup());
        let config = ParserConfig::default().with_min_alt(count, fraction);
        let selector = GenotypeCandidateSelector::from_config(&config);
        let groups = registry.equivalence_groups(&window);
        let classes = selector.surviving_classes(&groups, registry.samples());
        let snp = AlleleKey::new(AlleleType::Snp, "T", 1);
        assert_eq!(classes.iter().any(|c| c.key == snp), survives);
    }

    #[test]
    fn scores_sum_qualities() {
        let (window, registry) = grouped(&[("A", b'T', 30), ("A", b'T', 25), ("B", b'G', 40)]);
        let selector = GenotypeCandidateSelector::from_config(&ParserConfig::default());
        let groups = registry.equivalence_groups(&window);
        let classes = selector.surviving_classes(&groups, registry.samples());
        let scores: Vec<_> = classes.iter().map(|c| (c.key.base.clone(), c.score)).collect();
        assert_eq!(scores, vec![("G".to_string(), 40), ("T".to_string(), 55)]);
    }

    #[test]
    fn best_n_ranks_by_score_and_forces_reference() {
        let (window, registry) = grouped(&[
            ("A", b'T', 40),
            ("A", b'T', 40),
            ("A", b'C', 35),
            ("A", b'G', 20),
        ]);
        let groups = registry.equivalence_groups(&window);

        let config = ParserConfig::default().with_best_n_alleles(2);
        let selected = GenotypeCandidateSelector::from_config(&config).select(
            &groups,
            registry.samples(),
            b'G',
            &[],
        );
        assert_eq!(keys(&selected), vec!["snp:T:1", "snp:C:1"]);

        let config = config.with_force_reference_allele(true);
        let possible = possible_snp_alleles(b'G');
        let selected = GenotypeCandidateSelector::from_config(&config).select(
            &groups,
            registry.samples(),
            b'G',
            &possible,
        );
        assert_eq!(keys(&selected), vec!["reference:G:1", "snp:T:1"]);
    }

    #[test]
    fn forced_reference_is_synthesised_when_unobserved() {
        let (window, registry) = grouped(&[("A", b'T', 40)]);
        let groups = registry.equivalence_groups(&window);
        let config = ParserConfig::default()
            .with_best_n_alleles(1)
            .with_force_reference_allele(true);
        let selected = GenotypeCandidateSelector::from_config(&config).select(
            &groups,
            registry.samples(),
            b'g',
            &[],
        );
        assert_eq!(keys(&selected), vec!["reference:G:1"]);
    }

    #[test]
    fn supporting_quality_floor_drops_weak_classes() {
        let (window, registry) = grouped(&[("A", b'T', 12), ("A", b'G', 35)]);
        let groups = registry.equivalence_groups(&window);
        let config = ParserConfig::default().with_min_supporting_base_quality(20);
        let selected = GenotypeCandidateSelector::from_config(&config).select(
            &groups,
            registry.samples(),
            b'G',
            &[],
        );
        assert_eq!(keys(&selected), vec!["reference:G:1"]);
    }

    #[test]
    fn homopolymer_runs_stop_at_mismatch_and_edges() {
        let mut provider = InMemoryReference::new();
        provider.insert("chr1", b"AAACAAAAGT");
        let target = Target::new("chr1", 1, 10).unwrap();
        let reference = ReferenceWindow::load(&provider, &target, 0, 0).unwrap();

        assert_eq!(homopolymer_run_left(&reference, 3, b'A'), 3);
        assert_eq!(homopolymer_run_right(&reference, 3, b'a'), 4);
        assert_eq!(homopolymer_run_left(&reference, 0, b'A'), 0);
        assert_eq!(homopolymer_run_right(&reference, 9, b'T'), 0);
        assert_eq!(homopolymer_run_right(&reference, 3, b'C'), 0);
    }
}
