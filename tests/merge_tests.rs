use std::collections::HashSet;

use quill::codec::SegmentId;
use quill::core::config::{MergeConfig, WriterConfig};
use quill::core::types::{DocId, FieldValue};
use quill::matching::all_ids;
use quill::postings::PostingFormat;
use quill::storage::layout::StorageLayout;
use quill::writing::{
    FieldContent, IndexedDocument, IndexWriter, MergeExecutor, PostingInput, SegmentStats,
    TieredMergeStrategy,
};
use tempfile::TempDir;

fn doc(unique: &str, terms: &[&str]) -> IndexedDocument {
    let mut doc = IndexedDocument::new();

    let mut id_field = FieldContent::new(PostingFormat::existence());
    id_field.stored = Some(FieldValue::Text(unique.to_string()));
    id_field.postings.push(PostingInput::term(unique.as_bytes()));
    doc.set_field("id", id_field);

    let mut body = FieldContent::new(PostingFormat::frequencies());
    for term in terms {
        body.postings.push(PostingInput::term(term.as_bytes()));
    }
    doc.set_field("body", body);
    doc
}

fn open_writer(layout: &StorageLayout) -> IndexWriter {
    IndexWriter::open(layout.clone(), WriterConfig::default(), MergeConfig::default()).unwrap()
}

#[test]
fn commit_publishes_documents_across_generations() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    let mut writer = open_writer(&layout);
    writer.add_document(doc("d0", &["alpha", "common"])).unwrap();
    writer.add_document(doc("d1", &["beta", "common"])).unwrap();
    let generation = writer.commit(false, false).unwrap();
    assert_eq!(generation, 1);

    writer.add_document(doc("d2", &["gamma", "common"])).unwrap();
    writer.commit(false, false).unwrap();

    let reader = writer.reader().unwrap();
    assert_eq!(reader.segments().len(), 2);
    assert_eq!(reader.doc_count(), 3);

    let mut total = 0;
    for segment in reader.segments() {
        let mut matcher = segment.matcher("body", b"common").unwrap();
        total += all_ids(matcher.as_mut()).unwrap().len();
    }
    assert_eq!(total, 3);
}

#[test]
fn delete_by_term_marks_documents_without_rewriting_segments() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    let mut writer = open_writer(&layout);
    for i in 0..4 {
        writer
            .add_document(doc(&format!("d{}", i), &["common"]))
            .unwrap();
    }
    writer.commit(false, false).unwrap();

    let marked = writer.delete_by_term("id", b"d2").unwrap();
    assert_eq!(marked, 1);
    writer.commit(false, false).unwrap();

    let reader = writer.reader().unwrap();
    assert_eq!(reader.doc_count_all(), 4);
    assert_eq!(reader.doc_count(), 3);
    let segment = &reader.segments()[0];
    assert!(segment.is_deleted(DocId(2)));
    assert!(!segment.is_deleted(DocId(1)));
}

#[test]
fn update_document_replaces_by_unique_field() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    let mut writer = open_writer(&layout);
    writer.add_document(doc("d0", &["old"])).unwrap();
    writer.commit(false, false).unwrap();

    writer.update_document(doc("d0", &["new"]), &["id"]).unwrap();
    writer.commit(false, false).unwrap();

    let reader = writer.reader().unwrap();
    assert_eq!(reader.doc_count(), 1);

    let mut live_terms = Vec::new();
    for segment in reader.segments() {
        for term in segment.terms_from("body", b"").unwrap() {
            let mut matcher = segment.matcher("body", &term).unwrap();
            while matcher.is_active() {
                if !segment.is_deleted(matcher.id()) {
                    live_terms.push(term.clone());
                }
                matcher.next().unwrap();
            }
        }
    }
    assert_eq!(live_terms, vec![b"new".to_vec()]);
}

#[test]
fn optimize_merges_everything_and_drops_deleted_docs() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    let mut writer = open_writer(&layout);
    // Three segments of three docs each.
    for s in 0..3 {
        for d in 0..3 {
            writer
                .add_document(doc(&format!("s{}d{}", s, d), &["common", "extra"]))
                .unwrap();
        }
        writer.commit(false, false).unwrap();
    }
    writer.delete_by_term("id", b"s1d1").unwrap();
    writer.delete_by_term("id", b"s2d0").unwrap();
    writer.commit(false, false).unwrap();

    let before = writer.reader().unwrap();
    assert_eq!(before.segments().len(), 3);
    let live_before = before.doc_count();
    assert_eq!(live_before, 7);

    writer.commit(true, true).unwrap();
    assert!(writer.merge_errors().is_empty());

    let after = writer.reader().unwrap();
    assert_eq!(after.segments().len(), 1);
    let merged = &after.segments()[0];

    // Deleted docs are dropped, not carried forward as tombstones.
    assert_eq!(merged.doc_count_all(), live_before);
    assert_eq!(merged.doc_count(), live_before);
    assert!(!merged.has_deletions());

    // The surviving document set is exactly the live originals.
    let mut survivors = HashSet::new();
    for docid in 0..merged.doc_count_all() {
        let stored = merged.stored_fields(DocId(docid)).unwrap();
        if let Some(FieldValue::Text(unique)) = stored.get_field("id") {
            survivors.insert(unique.clone());
        }
    }
    let expected: HashSet<String> = [
        "s0d0", "s0d1", "s0d2", "s1d0", "s1d2", "s2d1", "s2d2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(survivors, expected);

    // Posting content follows: "common" hits every live doc with correct
    // aggregate stats.
    let info = merged.term_info("body", b"common").unwrap();
    assert_eq!(info.doc_freq as u64, live_before);
    let mut matcher = merged.matcher("body", b"common").unwrap();
    let ids = all_ids(matcher.as_mut()).unwrap();
    assert_eq!(ids, (0..live_before).collect::<Vec<u64>>());

    // Merged-away segment files are gone.
    let leftover: Vec<_> = std::fs::read_dir(&layout.segments_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            !e.file_name()
                .to_string_lossy()
                .starts_with(&merged.id().0.to_string())
        })
        .collect();
    assert!(leftover.is_empty(), "stale files: {:?}", leftover);
}

#[test]
fn merge_without_deletions_takes_the_raw_copy_path() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    let mut writer = open_writer(&layout);
    for s in 0..2 {
        // Enough docs per term to push past the inline limit, so the merge
        // copies encoded blocks.
        for d in 0..8 {
            writer
                .add_document(doc(&format!("s{}d{}", s, d), &["common"]))
                .unwrap();
        }
        writer.commit(false, false).unwrap();
    }
    writer.commit(true, true).unwrap();
    assert!(writer.merge_errors().is_empty());

    let reader = writer.reader().unwrap();
    assert_eq!(reader.segments().len(), 1);
    let merged = &reader.segments()[0];
    assert_eq!(merged.doc_count_all(), 16);

    let info = merged.term_info("body", b"common").unwrap();
    assert_eq!(info.doc_freq, 16);
    assert_eq!(info.total_weight, 16.0);
    assert_eq!(info.min_id, 0);
    assert_eq!(info.max_id, 15);

    let mut matcher = merged.matcher("body", b"common").unwrap();
    assert_eq!(all_ids(matcher.as_mut()).unwrap(), (0..16).collect::<Vec<u64>>());
}

#[test]
fn background_executor_reports_over_the_channel() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    let mut writer = open_writer(&layout).with_executor(MergeExecutor::background(2).unwrap());
    for s in 0..3 {
        writer.add_document(doc(&format!("d{}", s), &["common"])).unwrap();
        writer.commit(false, false).unwrap();
    }
    writer.commit(true, true).unwrap();
    assert!(writer.merge_errors().is_empty());

    let reader = writer.reader().unwrap();
    assert_eq!(reader.segments().len(), 1);
    assert_eq!(reader.doc_count(), 3);
}

#[test]
fn uncommitted_work_is_invisible_and_cancel_removes_it() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    let mut writer = open_writer(&layout);
    writer.add_document(doc("d0", &["alpha"])).unwrap();
    writer.commit(false, false).unwrap();

    // Segment files exist before the table of contents is rewritten; a
    // reader still sees only the committed generation.
    writer.add_document(doc("d1", &["beta"])).unwrap();
    writer.flush_segment().unwrap();
    let reader = writer.reader().unwrap();
    assert_eq!(reader.doc_count(), 1);

    writer.cancel().unwrap();

    // After cancel the orphaned files are gone and the old state is intact.
    let reader = quill::writing::IndexReader::open(&layout).unwrap();
    assert_eq!(reader.doc_count(), 1);
    let stored = reader.segments()[0].stored_fields(DocId(0)).unwrap();
    assert_eq!(stored.get_field("id"), Some(&FieldValue::Text("d0".to_string())));
}

#[test]
fn second_index_writer_fails_fast() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    let writer = open_writer(&layout);
    let err = IndexWriter::open(
        layout.clone(),
        WriterConfig::default(),
        MergeConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind, quill::core::error::ErrorKind::LockConflict);
    drop(writer);
}

fn stats(id: SegmentId, size: u64, docs: u64, deleted: u64) -> SegmentStats {
    SegmentStats {
        id,
        size_bytes: size,
        doc_count_all: docs,
        deleted,
    }
}

#[test]
fn tiered_policy_merges_similar_sizes_first() {
    let strategy = TieredMergeStrategy::new(MergeConfig {
        per_tier: 2,
        max_at_once: 4,
        ..MergeConfig::default()
    });

    // Twelve equally-sized small segments: far more than allowed.
    let all: Vec<SegmentStats> = (0..12)
        .map(|_| stats(SegmentId::new(), 1024, 100, 0))
        .collect();
    let merges = strategy.plan(&all, &HashSet::new());
    assert!(!merges.is_empty());
    for merge in &merges {
        assert!(merge.segments.len() >= 2);
        assert!(merge.segments.len() <= 4);
    }

    // No segment is selected twice.
    let mut seen = HashSet::new();
    for merge in &merges {
        for sid in &merge.segments {
            assert!(seen.insert(*sid));
        }
    }
}

#[test]
fn tiered_policy_prefers_reclaiming_deletions() {
    let strategy = TieredMergeStrategy::new(MergeConfig {
        per_tier: 2,
        max_at_once: 2,
        ..MergeConfig::default()
    });

    let clean: Vec<SegmentStats> = (0..4)
        .map(|_| stats(SegmentId::new(), 4096, 100, 0))
        .collect();
    let dirty: Vec<SegmentStats> = (0..4)
        .map(|_| stats(SegmentId::new(), 4096, 100, 60))
        .collect();
    let dirty_ids: HashSet<SegmentId> = dirty.iter().map(|s| s.id).collect();

    let mut all = clean;
    all.extend(dirty);
    let merges = strategy.plan(&all, &HashSet::new());
    assert!(!merges.is_empty());

    // The best-scored merge reclaims deletions.
    let first = &merges[0];
    assert!(first.segments.iter().all(|sid| dirty_ids.contains(sid)));
}

#[test]
fn tiered_policy_never_selects_merging_segments() {
    let strategy = TieredMergeStrategy::new(MergeConfig {
        per_tier: 1,
        max_at_once: 3,
        ..MergeConfig::default()
    });

    let all: Vec<SegmentStats> = (0..6)
        .map(|_| stats(SegmentId::new(), 2048, 10, 0))
        .collect();
    let busy: HashSet<SegmentId> = all[..3].iter().map(|s| s.id).collect();

    let merges = strategy.plan(&all, &busy);
    for merge in &merges {
        for sid in &merge.segments {
            assert!(!busy.contains(sid));
        }
    }
}

#[test]
fn forced_plan_packs_toward_the_target() {
    let strategy = TieredMergeStrategy::new(MergeConfig {
        max_at_once: 4,
        ..MergeConfig::default()
    });
    let all: Vec<SegmentStats> = (0..9)
        .map(|i| stats(SegmentId::new(), 1000 + i, 10, 0))
        .collect();

    let merges = strategy.plan_forced(&all, &HashSet::new(), 1);
    assert!(!merges.is_empty());
    let grouped: usize = merges.iter().map(|m| m.segments.len()).sum();
    assert!(grouped >= 8); // at most one leftover below group size

    assert!(strategy.plan_forced(&all[..1], &HashSet::new(), 1).is_empty());
}
