use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

/// Errors raised while resolving read groups to samples.
#[derive(Debug, Error)]
pub enum ReadGroupError {
    /// `@RG` header line lacks a required tag.
    #[error("could not find {tag}: in @RG header line '{line}'")]
    MissingTag {
        /// Tag name (`ID` or `SM`).
        tag: &'static str,
        /// Offending header line.
        line: String,
    },

    /// Requested sample is not associated with any read group.
    #[error("sample '{0}' is not associated with any read group in the alignment header")]
    UnknownSample(String),

    /// No samples could be resolved.
    #[error("no sample names given and no @RG tags found in the alignment header")]
    NoSamples,
}

/// Mapping from read-group id to sample name.
#[derive(Debug, Clone, Default)]
pub struct ReadGroups {
    to_sample: HashMap<String, Arc<str>>,
    samples: Vec<Arc<str>>,
}

impl ReadGroups {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a read group with a sample.
    pub fn insert(&mut self, read_group: impl Into<String>, sample: impl AsRef<str>) {
        let sample = match self.samples.iter().find(|s| s.as_ref() == sample.as_ref()) {
            Some(existing) => Arc::clone(existing),
            None => {
                let sample: Arc<str> = Arc::from(sample.as_ref());
                self.samples.push(Arc::clone(&sample));
                sample
            }
        };
        self.to_sample.insert(read_group.into(), sample);
    }

    /// Builder-style [`ReadGroups::insert`].
    pub fn with(mut self, read_group: impl Into<String>, sample: impl AsRef<str>) -> Self {
        self.insert(read_group, sample);
        self
    }

    /// Parse `@RG` lines from SAM header text; each needs `ID:` and `SM:`.
    pub fn from_header_text(text: &str) -> Result<Self, ReadGroupError> {
        let mut groups = Self::new();
        for line in text.lines().filter(|line| line.starts_with("@RG")) {
            let mut id = None;
            let mut sample = None;
            for field in line.split(['\t', ' ']) {
                if let Some(value) = field.strip_prefix("ID:") {
                    id = Some(value);
                } else if let Some(value) = field.strip_prefix("SM:") {
                    sample = Some(value);
                }
            }
            let missing = |tag| ReadGroupError::MissingTag {
                tag,
                line: line.to_string(),
            };
            let sample = sample.filter(|s| !s.is_empty()).ok_or_else(|| missing("SM"))?;
            let id = id.filter(|s| !s.is_empty()).ok_or_else(|| missing("ID"))?;
            debug!(read_group = id, sample, "found read group");
            groups.insert(id, sample);
        }
        if groups.is_empty() {
            return Err(ReadGroupError::NoSamples);
        }
        Ok(groups)
    }

    /// Keep only read groups of the listed samples; each must be present.
    pub fn restrict_to<S: AsRef<str>>(self, samples: &[S]) -> Result<Self, ReadGroupError> {
        if samples.is_empty() {
            return Ok(self);
        }
        for sample in samples {
            if !self.samples.iter().any(|s| s.as_ref() == sample.as_ref()) {
                return Err(ReadGroupError::UnknownSample(sample.as_ref().to_string()));
            }
        }
        let keep = |name: &str| samples.iter().any(|s| s.as_ref() == name);
        Ok(Self {
            to_sample: self
                .to_sample
                .into_iter()
                .filter(|(_, sample)| keep(sample))
                .collect(),
            samples: self.samples.into_iter().filter(|s| keep(s)).collect(),
        })
    }

    /// Sample a read group belongs to, if it is under analysis.
    pub fn sample_for(&self, read_group: &str) -> Option<&Arc<str>> {
        self.to_sample.get(read_group)
    }

    /// Samples under analysis, in first-seen order.
    pub fn samples(&self) -> &[Arc<str>] {
        &self.samples
    }

    /// Number of read groups.
    pub fn len(&self) -> usize {
        self.to_sample.len()
    }

    /// Whether no read group is mapped.
    pub fn is_empty(&self) -> bool {
        self.to_sample.is_empty()
    }
}
