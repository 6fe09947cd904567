use std::sync::Arc;

use quill::core::types::DocId;
use quill::matching::{all_ids, Matcher};
use quill::postings::block::encode_block;
use quill::postings::{Posting, PostingFormat, PostingMatcher, BLOCK_CAPACITY};
use quill::storage::mmap_file::MmapFile;

/// Encode `postings` into consecutive fixed-capacity blocks and open a
/// matcher over them.
fn matcher_over(
    format: &PostingFormat,
    postings: &[Posting],
    max_weight: f32,
) -> PostingMatcher {
    let mut bytes = Vec::new();
    let mut blocks = 0;
    for chunk in postings.chunks(BLOCK_CAPACITY) {
        bytes.extend_from_slice(&encode_block(format, chunk).unwrap());
        blocks += 1;
    }
    PostingMatcher::open(
        Arc::new(MmapFile::from_vec(bytes)),
        0,
        blocks,
        *format,
        max_weight,
    )
    .unwrap()
}

fn id_postings(ids: &[u64]) -> Vec<Posting> {
    ids.iter().map(|&id| Posting::id_only(DocId(id))).collect()
}

#[test]
fn skip_to_matches_a_linear_scan() {
    let format = PostingFormat::existence();
    let ids: Vec<u64> = (0..400).map(|i| i * 3).collect(); // four blocks
    let postings = id_postings(&ids);

    for target in [0u64, 1, 5, 384, 385, 600, 900, 1197] {
        let mut skipper = matcher_over(&format, &postings, 1.0);
        skipper.skip_to(DocId(target)).unwrap();
        let skipped_rest = all_ids(&mut skipper).unwrap();

        let linear_rest: Vec<u64> = ids.iter().copied().filter(|&id| id >= target).collect();
        assert_eq!(skipped_rest, linear_rest, "target {}", target);
    }

    // Past the last id the matcher is exhausted.
    let mut skipper = matcher_over(&format, &postings, 1.0);
    skipper.skip_to(DocId(5000)).unwrap();
    assert!(!skipper.is_active());
}

#[test]
fn next_reports_block_boundaries() {
    let format = PostingFormat::existence();
    let ids: Vec<u64> = (0..(BLOCK_CAPACITY as u64 * 2)).collect();
    let mut matcher = matcher_over(&format, &id_postings(&ids), 1.0);

    let mut crossings = 0;
    while matcher.is_active() {
        if matcher.next().unwrap() {
            crossings += 1;
        }
    }
    assert_eq!(crossings, 2); // one per block, including the final one
}

#[test]
fn block_stats_expose_quality_bounds() {
    let format = PostingFormat::frequencies();
    let mut postings = Vec::new();
    for i in 0..(BLOCK_CAPACITY as u64 * 2) {
        let weight = if i < BLOCK_CAPACITY as u64 { 1.0 } else { 6.0 };
        postings.push(Posting {
            doc_id: DocId(i),
            length: Some(4),
            weight: Some(weight),
            positions: None,
            chars: None,
            payload: None,
        });
    }
    let matcher = matcher_over(&format, &postings, 6.0);
    assert_eq!(matcher.block_min_id().unwrap(), 0);
    assert_eq!(matcher.block_max_id().unwrap(), BLOCK_CAPACITY as u64 - 1);
    assert_eq!(matcher.block_max_weight().unwrap(), 1.0);
    assert_eq!(matcher.block_min_length().unwrap(), 4);
    assert_eq!(matcher.block_max_length().unwrap(), 4);
}

#[test]
fn skip_to_quality_steps_over_weak_blocks() {
    let format = PostingFormat::frequencies();
    let mut postings = Vec::new();
    for i in 0..(BLOCK_CAPACITY as u64 * 3) {
        let weight = if i < BLOCK_CAPACITY as u64 * 2 { 1.0 } else { 6.0 };
        postings.push(Posting {
            doc_id: DocId(i),
            length: Some(1),
            weight: Some(weight),
            positions: None,
            chars: None,
            payload: None,
        });
    }
    let mut matcher = matcher_over(&format, &postings, 6.0);

    let skipped = matcher.skip_to_quality(2.0).unwrap();
    assert_eq!(skipped, 2);
    assert!(matcher.is_active());
    assert_eq!(matcher.id(), DocId(BLOCK_CAPACITY as u64 * 2));
    assert_eq!(matcher.block_quality().unwrap(), 6.0);

    // Nothing can beat the ceiling: the matcher runs dry.
    let mut matcher = matcher_over(&format, &postings, 6.0);
    let skipped = matcher.skip_to_quality(6.0).unwrap();
    assert_eq!(skipped, 3);
    assert!(!matcher.is_active());
}

#[test]
fn features_decode_lazily_per_posting() {
    let format = PostingFormat::characters();
    let postings = vec![
        Posting {
            doc_id: DocId(2),
            length: Some(8),
            weight: Some(1.5),
            positions: Some(vec![0, 7]),
            chars: Some(vec![(0, 3), (30, 33)]),
            payload: Some(b"first".to_vec()),
        },
        Posting {
            doc_id: DocId(9),
            length: Some(3),
            weight: Some(2.5),
            positions: Some(vec![1]),
            chars: Some(vec![(10, 14)]),
            payload: Some(b"second".to_vec()),
        },
    ];
    let mut matcher = matcher_over(&format, &postings, 2.5);

    matcher.skip_to(DocId(9)).unwrap();
    assert_eq!(matcher.positions().unwrap(), vec![1]);
    assert_eq!(matcher.chars().unwrap(), vec![(10, 14)]);
    assert_eq!(matcher.payload().unwrap(), b"second".to_vec());
    assert_eq!(matcher.weight().unwrap(), 2.5);
}

#[test]
fn feature_access_without_the_feature_is_not_found() {
    let format = PostingFormat::existence();
    let mut matcher = matcher_over(&format, &id_postings(&[1, 2, 3]), 1.0);
    let err = matcher.positions().unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(matcher.weight().unwrap(), 1.0); // implicit weight
}
