use criterion::{criterion_group, criterion_main, Criterion};
use quill::fst::{within, Cursor, GraphReader, GraphWriter, Value, ValuesType};
use tempfile::TempDir;

fn keys(count: usize) -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = (0..count)
        .map(|i| format!("term{:06}", i * 7).into_bytes())
        .collect();
    out.sort();
    out
}

fn build_graph(c: &mut Criterion) {
    let keys = keys(10_000);
    let dir = TempDir::new().unwrap();

    c.bench_function("graph_build_10k", |b| {
        let mut round = 0u32;
        b.iter(|| {
            let path = dir.path().join(format!("bench{}.fsg", round));
            round += 1;
            let mut writer = GraphWriter::create(&path, ValuesType::None).unwrap();
            writer.start_field("terms").unwrap();
            for key in &keys {
                writer.insert(key, Value::None).unwrap();
            }
            writer.finish_field().unwrap();
            writer.close().unwrap()
        })
    });
}

fn read_graph(c: &mut Criterion) {
    let keys = keys(10_000);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bench.fsg");
    let mut writer = GraphWriter::create(&path, ValuesType::None).unwrap();
    writer.start_field("terms").unwrap();
    for key in &keys {
        writer.insert(key, Value::None).unwrap();
    }
    writer.finish_field().unwrap();
    writer.close().unwrap();
    let reader = GraphReader::open(&path).unwrap();

    c.bench_function("graph_flatten_10k", |b| {
        b.iter(|| {
            Cursor::new(&reader, "terms")
                .unwrap()
                .flatten()
                .count()
        })
    });

    c.bench_function("graph_within_k1", |b| {
        b.iter(|| within(&reader, "terms", b"term000700", 1, 0).unwrap())
    });
}

criterion_group!(benches, build_graph, read_graph);
criterion_main!(benches);
