use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use allele_stream::genomics::{
    parse_bed, possible_snp_alleles, write_header, write_report, AlleleParser, AlleleTypeSet,
    BamAlignmentSource, FastaReference, ParserConfig, ReadGroups, Target,
};

#[derive(Parser, Debug)]
#[command(
    name = "allele-stream",
    about = "Per-position allele observations from sorted alignments"
)]
struct Cli {
    /// Log target-level progress to stderr.
    #[arg(long, global = true)]
    debug: bool,
    /// Log every admitted alignment and emitted allele to stderr.
    #[arg(long, global = true)]
    trace: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan target regions and report grouped observations per position.
    Scan(ScanArgs),
    /// List read groups and the samples they belong to.
    Samples {
        /// Indexed BAM/CRAM file.
        bam: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Indexed BAM/CRAM file.
    #[arg(short = 'b', long)]
    bam: PathBuf,
    /// Indexed FASTA reference.
    #[arg(short = 'f', long)]
    fasta: PathBuf,
    /// Region to scan (`chr`, `chr:pos`, `chr:left..right`); repeatable.
    #[arg(short = 'r', long)]
    region: Vec<String>,
    /// BED file of target regions.
    #[arg(short = 't', long)]
    targets: Option<PathBuf>,
    /// Restrict analysis to these samples (comma separated).
    #[arg(short = 's', long, value_delimiter = ',')]
    samples: Vec<String>,
    /// Write the report here instead of stdout.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Also report positions without observations.
    #[arg(long)]
    all_positions: bool,
    #[command(flatten)]
    filters: FilterArgs,
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Minimum base quality for an observation to be grouped.
    #[arg(long, default_value_t = 0)]
    min_base_quality: u8,
    /// A candidate class needs one observation at or above this base quality.
    #[arg(long, default_value_t = 0)]
    min_supporting_base_quality: u8,
    /// Mismatches at or above this base quality count against a read.
    #[arg(long, default_value_t = 10)]
    mismatch_base_quality: u8,
    /// Minimum mapping quality for an alignment to be admitted.
    #[arg(long, default_value_t = 0)]
    min_mapping_quality: u8,
    /// A candidate class needs one observation at or above this mapping quality.
    #[arg(long, default_value_t = 0)]
    min_supporting_mapping_quality: u8,
    /// Discard alignments with more countable mismatches.
    #[arg(long)]
    max_mismatches: Option<u32>,
    /// Include duplicate-flagged reads.
    #[arg(long)]
    use_duplicate_reads: bool,
    /// Mask bases within this distance of an indel.
    #[arg(long)]
    indel_exclusion_window: Option<u32>,
    /// Minimum per-sample observations supporting a candidate.
    #[arg(long, default_value_t = 1)]
    min_alt_count: usize,
    /// Minimum per-sample fraction supporting a candidate.
    #[arg(long, default_value_t = 0.0)]
    min_alt_fraction: f64,
    /// Keep at most this many candidates (0 keeps all).
    #[arg(long, default_value_t = 0)]
    use_best_n_alleles: usize,
    /// Always keep the reference allele among capped candidates.
    #[arg(long)]
    force_reference_allele: bool,
    /// Add a synthetic reference observation at every position.
    #[arg(long)]
    use_reference_allele: bool,
    /// Mapping quality of the synthetic reference observation.
    #[arg(long, default_value_t = 100)]
    reference_mapping_quality: u8,
    /// Base quality of the synthetic reference observation.
    #[arg(long, default_value_t = 60)]
    reference_base_quality: u8,
}

impl FilterArgs {
    fn to_config(&self) -> ParserConfig {
        ParserConfig::default()
            .with_min_base_quality(self.min_base_quality)
            .with_min_supporting_base_quality(self.min_supporting_base_quality)
            .with_mismatch_base_quality(self.mismatch_base_quality)
            .with_min_mapping_quality(self.min_mapping_quality)
            .with_min_supporting_mapping_quality(self.min_supporting_mapping_quality)
            .with_max_mismatches(self.max_mismatches.unwrap_or(u32::MAX))
            .with_duplicate_reads(self.use_duplicate_reads)
            .with_indel_exclusion_window(self.indel_exclusion_window)
            .with_min_alt(self.min_alt_count, self.min_alt_fraction)
            .with_best_n_alleles(self.use_best_n_alleles)
            .with_force_reference_allele(self.force_reference_allele)
            .with_reference_allele(self.use_reference_allele)
            .with_reference_qualities(self.reference_mapping_quality, self.reference_base_quality)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.trace);

    match cli.command {
        Commands::Scan(args) => run_scan(args)?,
        Commands::Samples { bam } => run_samples(bam)?,
    }

    Ok(())
}

fn init_tracing(debug: bool, trace: bool) {
    let filter = if trace {
        EnvFilter::new("allele_stream=trace")
    } else if debug {
        EnvFilter::new("allele_stream=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_scan(args: ScanArgs) -> Result<()> {
    let reference = FastaReference::from_path(&args.fasta)?;
    let source = BamAlignmentSource::from_path(&args.bam)?;
    let read_groups = ReadGroups::from_header_text(&source.header_text())
        .context("failed to resolve samples from alignment header")?
        .restrict_to(&args.samples)
        .context("invalid sample selection")?;

    let targets = load_targets(&args, &source, &reference)?;
    info!(
        targets = targets.len(),
        samples = read_groups.samples().len(),
        "starting scan"
    );

    let config = args.filters.to_config();
    let mut parser = AlleleParser::new(source, reference, read_groups, targets, config)
        .context("failed to initialize allele parser")?;

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("failed to create output {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(sink);
    write_header(&mut writer)?;

    let mut positions = 0usize;
    while parser
        .next_alleles(AlleleTypeSet::ALL)
        .context("allele parsing failed")?
    {
        if parser.samples().is_empty() && !args.all_positions {
            continue;
        }
        let Some(reference_base) = parser.reference_base() else {
            continue;
        };
        if let Some(report) = parser.report(&possible_snp_alleles(reference_base)) {
            write_report(&mut writer, &report)?;
            positions += 1;
        }
    }
    writer.flush()?;
    debug!(positions, "scan complete");

    Ok(())
}

fn load_targets(
    args: &ScanArgs,
    source: &BamAlignmentSource,
    reference: &FastaReference,
) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    for region in &args.region {
        targets.push(
            Target::parse_region(region, reference)
                .with_context(|| format!("invalid region '{region}'"))?,
        );
    }
    if let Some(path) = &args.targets {
        let file = File::open(path)
            .with_context(|| format!("failed to open targets {}", path.display()))?;
        targets.extend(
            parse_bed(BufReader::new(file))
                .with_context(|| format!("failed to parse targets {}", path.display()))?,
        );
    }
    if targets.is_empty() {
        targets = source
            .header_targets()
            .context("no targets given and none derivable from the alignment header")?;
    }
    Ok(targets)
}

fn run_samples(bam: PathBuf) -> Result<()> {
    let source = BamAlignmentSource::from_path(&bam)?;
    let read_groups = ReadGroups::from_header_text(&source.header_text())
        .context("failed to resolve samples from alignment header")?;
    for sample in read_groups.samples() {
        println!("{sample}");
    }
    Ok(())
}
