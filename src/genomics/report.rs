use anyhow::{anyhow, Result};
use std::io::Write;
use std::sync::Arc;

use super::allele::Allele;
use super::registry::{AlleleRef, Samples};

const HEADER: &str = "##source=allele-stream\n#CHROM\tPOS\tREF\tSAMPLES\tCANDIDATES\tHRUN\n";

/// Support for one observed base within a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BaseSupport {
    /// Observed base string (`A`, `IGG`, `D2`, ...).
    pub base: String,
    /// Number of observations.
    pub count: usize,
    /// Sum of observation qualities.
    pub quality_sum: u64,
}

/// Observations of one sample at a position.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleReport {
    /// Sample name.
    pub name: String,
    /// Total observations.
    pub depth: usize,
    /// Per-base support in lexical base order.
    pub bases: Vec<BaseSupport>,
}

/// Grouped observations and candidates at one position.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionReport {
    /// Sequence name.
    pub chrom: String,
    /// 1-based position.
    pub position: u32,
    /// Reference base.
    pub reference: char,
    /// Samples with observations, in name order.
    pub samples: Vec<SampleReport>,
    /// Genotyping candidates as `type:base:length` keys.
    pub candidates: Vec<String>,
    /// Reference-base homopolymer run to the left.
    pub homopolymer_left: u32,
    /// Reference-base homopolymer run to the right.
    pub homopolymer_right: u32,
}

impl PositionReport {
    /// Summarise a grouping; `position` is 0-based.
    pub fn build<'a, F>(
        chrom: &Arc<str>,
        position: u32,
        reference_base: u8,
        samples: &Samples,
        resolve: F,
        candidates: &[Allele],
        homopolymer: (u32, u32),
    ) -> Self
    where
        F: Fn(AlleleRef) -> Option<&'a Allele>,
    {
        let samples = samples
            .iter()
            .map(|(name, sample)| SampleReport {
                name: name.to_string(),
                depth: sample.observation_count(),
                bases: sample
                    .iter()
                    .map(|(base, refs)| BaseSupport {
                        base: base.to_string(),
                        count: refs.len(),
                        quality_sum: refs
                            .iter()
                            .filter_map(|r| resolve(*r))
                            .map(|a| u64::from(a.quality))
                            .sum(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            chrom: chrom.to_string(),
            position: position + 1,
            reference: reference_base as char,
            samples,
            candidates: candidates.iter().map(|a| a.key().to_string()).collect(),
            homopolymer_left: homopolymer.0,
            homopolymer_right: homopolymer.1,
        }
    }

    /// Tab-separated line without the trailing newline.
    pub fn to_line(&self) -> String {
        let samples = if self.samples.is_empty() {
            ".".to_string()
        } else {
            let mut out = String::new();
            for (idx, sample) in self.samples.iter().enumerate() {
                if idx > 0 {
                    out.push(';');
                }
                out.push_str(&sample.name);
                out.push(':');
                let bases: Vec<String> = sample
                    .bases
                    .iter()
                    .map(|b| format!("{}={}/{}", b.base, b.count, b.quality_sum))
                    .collect();
                out.push_str(&bases.join(","));
            }
            out
        };
        let candidates = if self.candidates.is_empty() {
            ".".to_string()
        } else {
            self.candidates.join(",")
        };

        format!(
            "{chrom}\t{pos}\t{reference}\t{samples}\t{candidates}\t{left},{right}",
            chrom = self.chrom,
            pos = self.position,
            reference = self.reference,
            left = self.homopolymer_left,
            right = self.homopolymer_right,
        )
    }
}

/// Write the column header.
pub fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(HEADER.as_bytes())?;
    Ok(())
}

/// Append one position line.
pub fn write_report<W: Write>(writer: &mut W, report: &PositionReport) -> Result<()> {
    writeln!(writer, "{}", report.to_line())?;
    Ok(())
}

/// Render reports with header into a string (useful for tests and snapshots).
pub fn render_reports(reports: &[PositionReport]) -> Result<String> {
    let mut buffer = Vec::new();
    write_header(&mut buffer)?;
    for report in reports {
        write_report(&mut buffer, report)?;
    }
    buffer.flush()?;
    String::from_utf8(buffer).map_err(|_| anyhow!("rendered report is not valid UTF-8"))
}
