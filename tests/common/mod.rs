#![allow(dead_code)]

use std::fs;
use std::path::Path;

use allele_stream::genomics::{
    possible_snp_alleles, AlignedRead, AlleleParser, AlleleTypeSet, CigarOp, CigarOpKind,
    InMemoryReference, ParserConfig, PositionReport, ReadGroups, Target, VecAlignmentSource,
};

const REGENERATE: &str = "ALLELE_STREAM_UPDATE_SNAPSHOTS";

/// Compare `actual` with `tests/snapshots/<name>` line by line.
///
/// With `ALLELE_STREAM_UPDATE_SNAPSHOTS` set the golden file is rewritten instead.
pub fn check_golden(name: &str, actual: &str) {
    let golden = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/snapshots")
        .join(name);
    if std::env::var_os(REGENERATE).is_some() {
        fs::create_dir_all(golden.parent().expect("golden files live in a directory"))
            .expect("create golden directory");
        fs::write(&golden, actual).expect("write golden file");
        return;
    }

    let expected = fs::read_to_string(&golden)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", golden.display()));
    let mut want = expected.lines();
    let mut got = actual.lines();
    for line in 1.. {
        match (want.next(), got.next()) {
            (None, None) => return,
            (w, g) if w == g => continue,
            (w, g) => panic!(
                "{} differs at line {line}\n  expected: {}\n  actual:   {}\n(rerun with {REGENERATE}=1 to accept)",
                golden.display(),
                w.unwrap_or("<end of file>"),
                g.unwrap_or("<end of output>"),
            ),
        }
    }
}

/// Parse a SAM-style CIGAR string (`3M2D3M`).
pub fn cigar(text: &str) -> Vec<CigarOp> {
    let mut ops = Vec::new();
    let mut len = 0u32;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = len * 10 + digit;
            continue;
        }
        let kind = match c {
            'M' => CigarOpKind::Match,
            'I' => CigarOpKind::Insertion,
            'D' => CigarOpKind::Deletion,
            'N' => CigarOpKind::RefSkip,
            'S' => CigarOpKind::SoftClip,
            'H' => CigarOpKind::HardClip,
            other => panic!("unsupported CIGAR op {other}"),
        };
        ops.push(CigarOp::new(kind, len));
        len = 0;
    }
    ops
}

/// Read with uniform base quality 30 and mapping quality 60.
pub fn aligned(name: &str, read_group: &str, pos: u32, cigar_text: &str, bases: &[u8]) -> AlignedRead {
    AlignedRead::new(
        "chr1",
        pos,
        60,
        cigar(cigar_text),
        bases.to_vec(),
        vec![30; bases.len()],
        false,
    )
    .with_name(name)
    .with_read_group(read_group)
}

pub const CHR1: &[u8] = b"AACCGGTTACGTACGTAAAA";

pub fn reference() -> InMemoryReference {
    let mut reference = InMemoryReference::new();
    reference.insert("chr1", CHR1);
    reference
}

pub fn read_groups() -> ReadGroups {
    ReadGroups::new().with("rgA", "alpha").with("rgB", "beta")
}

/// Two samples over `chr1:5..9`: a SNP and a clean read in `alpha`, a
/// deletion and an insertion in `beta`.
pub fn two_sample_reads() -> Vec<AlignedRead> {
    vec![
        aligned("r1", "rgA", 2, "8M", b"CCGGTTAC"),
        aligned("r2", "rgA", 4, "6M", b"GGATAC"),
        aligned("r3", "rgB", 3, "3M2D3M", b"CGGACG"),
        aligned("r4", "rgB", 5, "2M1I3M", b"GTCTAC"),
    ]
}

pub fn parser_for(
    reads: Vec<AlignedRead>,
    targets: Vec<Target>,
    config: ParserConfig,
) -> AlleleParser<VecAlignmentSource, InMemoryReference> {
    AlleleParser::new(
        VecAlignmentSource::new(reads),
        reference(),
        read_groups(),
        targets,
        config,
    )
    .expect("parser initialises")
}

/// Run the parser to completion, collecting a report per position with observations.
pub fn collect_reports(
    parser: &mut AlleleParser<VecAlignmentSource, InMemoryReference>,
) -> Vec<PositionReport> {
    let mut reports = Vec::new();
    while parser.next_alleles(AlleleTypeSet::ALL).expect("step succeeds") {
        if parser.samples().is_empty() {
            continue;
        }
        let reference_base = parser.reference_base().expect("reference base");
        reports.push(
            parser
                .report(&possible_snp_alleles(reference_base))
                .expect("report"),
        );
    }
    reports
}
