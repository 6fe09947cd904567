pub mod segment;
pub mod perdoc;
pub mod fieldwriter;
pub mod termsreader;
pub mod reader;

pub use fieldwriter::FieldWriter;
pub use perdoc::{PerDocReader, PerDocWriter};
pub use reader::SegmentReader;
pub use segment::{SegmentId, SegmentMeta};
pub use termsreader::TermsReader;

/// Term-dictionary key: big-endian field id then the raw term bytes, so the
/// store sorts by (field, term).
pub fn term_key(field_id: u16, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + term.len());
    key.extend_from_slice(&field_id.to_be_bytes());
    key.extend_from_slice(term);
    key
}
