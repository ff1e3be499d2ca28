use thiserror::Error;

/// Errors raised for invalid parser options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Fraction outside `[0, 1]`.
    #[error("minimum alternate fraction must lie in [0, 1], got {0}")]
    InvalidFraction(f64),
}

/// Options controlling admission, decoding, grouping and candidate selection.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ParserConfig {
    /// Minimum quality for an observation to be grouped (BQL0).
    pub min_base_quality: u8,
    /// A candidate class needs one observation at or above this quality (BQL1).
    pub min_supporting_base_quality: u8,
    /// Mismatches at or above this quality count against the read (BQL2).
    pub mismatch_base_quality: u8,
    /// Alignments below this mapping quality are not admitted (MQL0).
    pub min_mapping_quality: u8,
    /// A candidate class needs one observation at or above this mapping quality (MQL1).
    pub min_supporting_mapping_quality: u8,
    /// Alignments with more countable mismatches are discarded (RMU).
    pub max_mismatches: u32,
    /// Admit duplicate-flagged reads.
    pub use_duplicate_reads: bool,
    /// Bases around an indel to mask; `None` disables masking (IDW).
    pub indel_exclusion_window: Option<u32>,
    /// Minimum per-sample count supporting a candidate class.
    pub min_alt_count: usize,
    /// Minimum per-sample fraction supporting a candidate class.
    pub min_alt_fraction: f64,
    /// Keep at most this many candidate classes (0 = unlimited).
    pub use_best_n_alleles: usize,
    /// Always include the reference class when capping candidates.
    pub force_reference_allele: bool,
    /// Inject a synthetic reference observation at every position.
    pub use_reference_allele: bool,
    /// Mapping quality given to the synthetic reference observation (MQR).
    pub reference_mapping_quality: u8,
    /// Base quality given to the synthetic reference observation (BQR).
    pub reference_base_quality: u8,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_base_quality: 0,
            min_supporting_base_quality: 0,
            mismatch_base_quality: 10,
            min_mapping_quality: 0,
            min_supporting_mapping_quality: 0,
            max_mismatches: u32::MAX,
            use_duplicate_reads: false,
            indel_exclusion_window: None,
            min_alt_count: 1,
            min_alt_fraction: 0.0,
            use_best_n_alleles: 0,
            force_reference_allele: false,
            use_reference_allele: false,
            reference_mapping_quality: 100,
            reference_base_quality: 60,
        }
    }
}

impl ParserConfig {
    /// Reject option combinations the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_alt_fraction) {
            return Err(ConfigError::InvalidFraction(self.min_alt_fraction));
        }
        Ok(())
    }

    /// Set the grouping base-quality floor.
    pub fn with_min_base_quality(mut self, quality: u8) -> Self {
        self.min_base_quality = quality;
        self
    }

    /// Set the per-class supporting base-quality floor.
    pub fn with_min_supporting_base_quality(mut self, quality: u8) -> Self {
        self.min_supporting_base_quality = quality;
        self
    }

    /// Set the countable-mismatch quality threshold.
    pub fn with_mismatch_base_quality(mut self, quality: u8) -> Self {
        self.mismatch_base_quality = quality;
        self
    }

    /// Set the admission mapping-quality floor.
    pub fn with_min_mapping_quality(mut self, quality: u8) -> Self {
        self.min_mapping_quality = quality;
        self
    }

    /// Set the per-class supporting mapping-quality floor.
    pub fn with_min_supporting_mapping_quality(mut self, quality: u8) -> Self {
        self.min_supporting_mapping_quality = quality;
        self
    }

    /// Set the per-read mismatch ceiling.
    pub fn with_max_mismatches(mut self, mismatches: u32) -> Self {
        self.max_mismatches = mismatches;
        self
    }

    /// Admit or skip duplicate reads.
    pub fn with_duplicate_reads(mut self, enabled: bool) -> Self {
        self.use_duplicate_reads = enabled;
        self
    }

    /// Set the indel exclusion window.
    pub fn with_indel_exclusion_window(mut self, window: Option<u32>) -> Self {
        self.indel_exclusion_window = window;
        self
    }

    /// Set per-sample candidate support thresholds.
    pub fn with_min_alt(mut self, count: usize, fraction: f64) -> Self {
        self.min_alt_count = count;
        self.min_alt_fraction = fraction;
        self
    }

    /// Cap the candidate list.
    pub fn with_best_n_alleles(mut self, n: usize) -> Self {
        self.use_best_n_alleles = n;
        self
    }

    /// Force the reference class into capped candidate lists.
    pub fn with_force_reference_allele(mut self, enabled: bool) -> Self {
        self.force_reference_allele = enabled;
        self
    }

    /// Inject the synthetic reference observation.
    pub fn with_reference_allele(mut self, enabled: bool) -> Self {
        self.use_reference_allele = enabled;
        self
    }

    /// Qualities for the synthetic reference observation.
    pub fn with_reference_qualities(mut self, mapping_quality: u8, base_quality: u8) -> Self {
        self.reference_mapping_quality = mapping_quality;
        self.reference_base_quality = base_quality;
        self
    }
}
