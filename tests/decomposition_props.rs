use std::sync::Arc;

use allele_stream::genomics::{
    AlignedRead, AlleleDecoder, AlleleType, CigarOp, CigarOpKind, InMemoryReference,
    ReferenceWindow, Target,
};
use proptest::prelude::*;

const REFERENCE_LEN: usize = 64;

fn base() -> impl Strategy<Value = u8> {
    prop_oneof![Just(b'A'), Just(b'C'), Just(b'G'), Just(b'T')]
}

fn op(kind: CigarOpKind) -> impl Strategy<Value = CigarOp> {
    (1u32..4).prop_map(move |len| CigarOp::new(kind, len))
}

/// `[H][S] M ((I|D|N) M)* [S][H]`, the shapes an aligner emits.
fn blocks() -> impl Strategy<Value = Vec<CigarOp>> {
    let gap = prop_oneof![
        op(CigarOpKind::Insertion),
        op(CigarOpKind::Deletion),
        op(CigarOpKind::RefSkip),
    ];
    (
        proptest::option::of(op(CigarOpKind::HardClip)),
        proptest::option::of(op(CigarOpKind::SoftClip)),
        1u32..7,
        proptest::collection::vec((gap, 1u32..7), 0..4),
        proptest::option::of(op(CigarOpKind::SoftClip)),
        proptest::option::of(op(CigarOpKind::HardClip)),
    )
        .prop_map(|(lead_hard, lead_soft, first, rest, trail_soft, trail_hard)| {
            let mut ops: Vec<CigarOp> = lead_hard.into_iter().chain(lead_soft).collect();
            ops.push(CigarOp::new(CigarOpKind::Match, first));
            for (gap, matched) in rest {
                ops.push(gap);
                ops.push(CigarOp::new(CigarOpKind::Match, matched));
            }
            ops.extend(trail_soft);
            ops.extend(trail_hard);
            ops
        })
}

fn cigar_len(cigar: &[CigarOp], kinds: &[CigarOpKind]) -> u32 {
    cigar
        .iter()
        .filter(|op| kinds.contains(&op.kind))
        .map(|op| op.len)
        .sum()
}

fn case() -> impl Strategy<Value = (Vec<u8>, u32, Vec<CigarOp>, Vec<u8>)> {
    (
        proptest::collection::vec(base(), REFERENCE_LEN),
        0u32..10,
        blocks(),
    )
        .prop_flat_map(|(reference, pos, cigar)| {
            let read_len = cigar
                .iter()
                .filter(|op| op.kind.consumes_read())
                .map(|op| op.len as usize)
                .sum::<usize>();
            (
                Just(reference),
                Just(pos),
                Just(cigar),
                proptest::collection::vec(base(), read_len),
            )
        })
}

fn window(reference: &[u8]) -> ReferenceWindow {
    let mut provider = InMemoryReference::new();
    provider.insert("chr1", reference);
    let target = Target::new("chr1", 1, REFERENCE_LEN as u32).expect("valid target");
    ReferenceWindow::load(&provider, &target, 0, 0).expect("window loads")
}

proptest! {
    #[test]
    fn decomposition_covers_read_and_footprint(
        (reference, pos, cigar, bases) in case(),
    ) {
        let read_len = bases.len();
        let unaligned = cigar_len(
            &cigar,
            &[CigarOpKind::SoftClip, CigarOpKind::HardClip, CigarOpKind::RefSkip],
        );
        let soft_clipped = cigar_len(&cigar, &[CigarOpKind::SoftClip]) as usize;
        let read = AlignedRead::new("chr1", pos, 60, cigar, bases, vec![30; read_len], false)
            .with_name("prop");
        let footprint = read.footprint();
        let decoded = AlleleDecoder::new(0, None)
            .decode(read, Arc::from("sample"), &window(&reference))
            .expect("decoding succeeds");

        let genomic: u32 = decoded
            .alleles
            .iter()
            .filter(|a| a.kind != AlleleType::Insertion)
            .map(|a| a.length)
            .sum();
        prop_assert_eq!(
            genomic,
            footprint - unaligned,
            "alleles must tile the aligned part of the footprint"
        );

        let observed: usize = decoded.alleles.iter().map(|a| a.observed_bases.len()).sum();
        prop_assert_eq!(
            observed,
            read_len - soft_clipped,
            "alleles must account for every aligned read base"
        );

        let mut cursor = pos;
        for allele in decoded.alleles.iter().filter(|a| a.kind != AlleleType::Insertion) {
            prop_assert!(allele.position >= cursor, "alleles must be ordered and disjoint");
            cursor = allele.position + allele.length;
        }
        prop_assert!(cursor <= pos + footprint);
    }

    #[test]
    fn matches_and_mismatches_are_minimal(
        (reference, pos, cigar, bases) in case(),
    ) {
        let read_len = bases.len();
        let indel_bases = cigar_len(&cigar, &[CigarOpKind::Insertion, CigarOpKind::Deletion]);
        let read = AlignedRead::new("chr1", pos, 60, cigar, bases, vec![30; read_len], false)
            .with_name("prop");
        let decoded = AlleleDecoder::new(0, None)
            .decode(read, Arc::from("sample"), &window(&reference))
            .expect("decoding succeeds");

        let mut snps = 0u32;
        for allele in &decoded.alleles {
            match allele.kind {
                AlleleType::Reference => {
                    prop_assert_eq!(&allele.observed_bases, &allele.reference_bases);
                    prop_assert_eq!(allele.length as usize, allele.observed_bases.len());
                }
                AlleleType::Snp => {
                    snps += 1;
                    prop_assert_eq!(allele.length, 1);
                    prop_assert_ne!(&allele.observed_bases, &allele.reference_bases);
                }
                AlleleType::Insertion => prop_assert_eq!(allele.length, 0),
                AlleleType::Deletion => prop_assert!(allele.observed_bases.is_empty()),
            }
        }
        for pair in decoded.alleles.windows(2) {
            // runs either side of a skipped region stay separate
            let touching = pair[0].position + pair[0].length == pair[1].position;
            prop_assert!(
                !(touching
                    && pair[0].kind == AlleleType::Reference
                    && pair[1].kind == AlleleType::Reference),
                "adjacent reference runs must be merged"
            );
        }
        prop_assert_eq!(decoded.mismatches, snps + indel_bases);
    }
}
