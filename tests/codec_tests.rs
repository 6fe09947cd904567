use quill::codec::fieldwriter::FieldWriter;
use quill::codec::{SegmentId, SegmentReader};
use quill::core::config::WriterConfig;
use quill::core::error::ErrorKind;
use quill::core::types::{DocId, FieldValue};
use quill::matching::all_ids;
use quill::postings::{Posting, PostingFormat};
use quill::storage::layout::StorageLayout;
use quill::writing::{FieldContent, IndexedDocument, PostingInput, SegmentWriter};
use tempfile::TempDir;

fn doc_with_body(title: &str, terms: &[&str]) -> IndexedDocument {
    let mut doc = IndexedDocument::new();
    let mut body = FieldContent::new(PostingFormat::positions());
    body.stored = Some(FieldValue::Text(title.to_string()));
    for (position, term) in terms.iter().enumerate() {
        let mut input = PostingInput::term(term.as_bytes());
        input.positions = Some(vec![position as u32]);
        body.postings.push(input);
    }
    doc.set_field("body", body);
    doc
}

fn write_segment(layout: &StorageLayout, docs: Vec<IndexedDocument>) -> SegmentId {
    let mut writer = SegmentWriter::new(layout.clone(), WriterConfig::default());
    for doc in docs {
        writer.add_document(doc);
    }
    writer.flush().unwrap().unwrap().id
}

#[test]
fn segment_round_trip_terms_and_stored_fields() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    let id = write_segment(
        &layout,
        vec![
            doc_with_body("zero", &["common", "alpha"]),
            doc_with_body("one", &["common", "beta"]),
            doc_with_body("two", &["common", "alpha", "alpha"]),
        ],
    );

    let reader = SegmentReader::open(&layout, &id).unwrap();
    assert_eq!(reader.doc_count_all(), 3);
    assert_eq!(reader.doc_count(), 3);

    let info = reader.term_info("body", b"common").unwrap();
    assert_eq!(info.doc_freq, 3);
    assert_eq!(info.min_id, 0);
    assert_eq!(info.max_id, 2);

    let mut matcher = reader.matcher("body", b"common").unwrap();
    assert_eq!(all_ids(matcher.as_mut()).unwrap(), vec![0, 1, 2]);

    // "alpha" appears twice in doc two; occurrences collapse to one posting
    // with summed weight.
    let info = reader.term_info("body", b"alpha").unwrap();
    assert_eq!(info.doc_freq, 2);
    assert_eq!(info.max_weight, 2.0);

    let stored = reader.stored_fields(DocId(1)).unwrap();
    assert_eq!(
        stored.get_field("body"),
        Some(&FieldValue::Text("one".to_string()))
    );

    assert_eq!(reader.field_length(DocId(0), "body").unwrap(), 2);
    assert_eq!(reader.field_length(DocId(2), "body").unwrap(), 3);
}

#[test]
fn missing_terms_and_fields_are_not_found() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    let id = write_segment(&layout, vec![doc_with_body("zero", &["alpha"])]);

    let reader = SegmentReader::open(&layout, &id).unwrap();
    let err = reader.term_info("body", b"missing").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    let err = reader.term_info("nope", b"alpha").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    let err = reader.stored_fields(DocId(99)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[test]
fn terms_from_iterates_in_term_order() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    let id = write_segment(
        &layout,
        vec![doc_with_body("zero", &["apple", "apricot", "banana", "cherry"])],
    );

    let reader = SegmentReader::open(&layout, &id).unwrap();
    let all = reader.terms_from("body", b"").unwrap();
    assert_eq!(
        all,
        vec![
            b"apple".to_vec(),
            b"apricot".to_vec(),
            b"banana".to_vec(),
            b"cherry".to_vec()
        ]
    );
    let from_b = reader.terms_from("body", b"b").unwrap();
    assert_eq!(from_b, vec![b"banana".to_vec(), b"cherry".to_vec()]);
}

#[test]
fn positions_survive_the_round_trip() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    // Six docs of one term forces the on-disk block path past the inline
    // limit.
    let docs: Vec<IndexedDocument> = (0..6)
        .map(|i| {
            let mut doc = IndexedDocument::new();
            let mut body = FieldContent::new(PostingFormat::positions());
            let mut input = PostingInput::term(b"shared");
            input.positions = Some(vec![i as u32, i as u32 + 10]);
            body.postings.push(input);
            doc.set_field("body", body);
            doc
        })
        .collect();
    let id = write_segment(&layout, docs);

    let reader = SegmentReader::open(&layout, &id).unwrap();
    let mut matcher = reader.matcher("body", b"shared").unwrap();
    matcher.skip_to(DocId(4)).unwrap();
    assert_eq!(matcher.positions().unwrap(), vec![4, 14]);
}

#[test]
fn spelling_graph_supports_fuzzy_suggestions() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    let id = write_segment(
        &layout,
        vec![doc_with_body("zero", &["cat", "catalog", "cats"])],
    );

    let reader = SegmentReader::open(&layout, &id).unwrap();
    let hits = reader.suggest("body", b"cet", 1, 0).unwrap();
    assert_eq!(hits, vec![b"cat".to_vec()]);
}

#[test]
fn term_vectors_round_trip() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    let mut doc = IndexedDocument::new();
    let mut body = FieldContent::new(PostingFormat::frequencies());
    body.postings.push(PostingInput::weighted(b"beta", 2.0));
    body.postings.push(PostingInput::weighted(b"alpha", 1.0));
    body.vector = true;
    doc.set_field("body", body);
    let id = write_segment(&layout, vec![doc]);

    let reader = SegmentReader::open(&layout, &id).unwrap();
    let vector = reader.vector(DocId(0), "body").unwrap();
    assert_eq!(
        vector,
        vec![(b"alpha".to_vec(), 1.0), (b"beta".to_vec(), 2.0)]
    );
    let err = reader.vector(DocId(0), "other").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[test]
fn field_writer_enforces_sorted_order() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();

    // Fields must ascend.
    let mut fw = FieldWriter::new(&layout, SegmentId::new(), 4).unwrap();
    fw.start_field("beta", PostingFormat::existence()).unwrap();
    fw.finish_field().unwrap();
    let err = fw.start_field("alpha", PostingFormat::existence()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::OutOfOrder);

    // Terms must ascend within a field.
    let mut fw = FieldWriter::new(&layout, SegmentId::new(), 4).unwrap();
    fw.start_field("body", PostingFormat::existence()).unwrap();
    fw.start_term(b"m").unwrap();
    fw.add_posting(Posting::id_only(DocId(0))).unwrap();
    fw.finish_term().unwrap();
    let err = fw.start_term(b"a").unwrap_err();
    assert_eq!(err.kind, ErrorKind::OutOfOrder);

    // Doc ids must ascend within a term.
    let mut fw = FieldWriter::new(&layout, SegmentId::new(), 4).unwrap();
    fw.start_field("body", PostingFormat::existence()).unwrap();
    fw.start_term(b"t").unwrap();
    fw.add_posting(Posting::id_only(DocId(5))).unwrap();
    let err = fw.add_posting(Posting::id_only(DocId(5))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::OutOfOrder);
}

#[test]
fn zstd_stored_blocks_round_trip() {
    let dir = TempDir::new().unwrap();
    let layout = StorageLayout::new(dir.path()).unwrap();
    let config = WriterConfig {
        stored_compression: quill::codec::perdoc::CompressionType::Zstd,
        ..WriterConfig::default()
    };
    let mut writer = SegmentWriter::new(layout.clone(), config);
    writer.add_document(doc_with_body("compressed", &["alpha"]));
    let meta = writer.flush().unwrap().unwrap();

    let reader = SegmentReader::open(&layout, &meta.id).unwrap();
    let stored = reader.stored_fields(DocId(0)).unwrap();
    assert_eq!(
        stored.get_field("body"),
        Some(&FieldValue::Text("compressed".to_string()))
    );
}
