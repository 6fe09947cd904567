pub mod block;
pub mod terminfo;
pub mod matcher;

pub use block::{BlockHeader, BlockReader, BLOCK_CAPACITY, HEADER_LEN};
pub use matcher::PostingMatcher;
pub use terminfo::{TermInfo, TermPostings};

use serde::{Deserialize, Serialize};

use crate::core::types::DocId;

/// One occurrence of a term in a document. Fields a format does not track
/// stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub doc_id: DocId,
    /// Field length of the document, for length-normalized scoring.
    pub length: Option<u32>,
    pub weight: Option<f32>,
    pub positions: Option<Vec<u32>>,
    /// Character ranges (start, end) of each occurrence.
    pub chars: Option<Vec<(u32, u32)>>,
    pub payload: Option<Vec<u8>>,
}

impl Posting {
    pub fn id_only(doc_id: DocId) -> Self {
        Posting {
            doc_id,
            length: None,
            weight: None,
            positions: None,
            chars: None,
            payload: None,
        }
    }

    pub fn weighted(doc_id: DocId, weight: f32) -> Self {
        Posting {
            doc_id,
            length: None,
            weight: Some(weight),
            positions: None,
            chars: None,
            payload: None,
        }
    }
}

/// Which per-posting features a field's posting file carries. Part of the
/// segment metadata; a raw block copy is only legal between equal formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingFormat {
    pub has_lengths: bool,
    pub has_weights: bool,
    pub has_positions: bool,
    pub has_chars: bool,
    pub has_payloads: bool,
}

impl PostingFormat {
    /// Document ids only.
    pub fn existence() -> Self {
        PostingFormat {
            has_lengths: false,
            has_weights: false,
            has_positions: false,
            has_chars: false,
            has_payloads: false,
        }
    }

    /// Ids, lengths and weights.
    pub fn frequencies() -> Self {
        PostingFormat {
            has_lengths: true,
            has_weights: true,
            has_positions: false,
            has_chars: false,
            has_payloads: false,
        }
    }

    /// Ids, lengths, weights and term positions.
    pub fn positions() -> Self {
        PostingFormat {
            has_lengths: true,
            has_weights: true,
            has_positions: true,
            has_chars: false,
            has_payloads: false,
        }
    }

    /// Everything, including character ranges and payloads.
    pub fn characters() -> Self {
        PostingFormat {
            has_lengths: true,
            has_weights: true,
            has_positions: true,
            has_chars: true,
            has_payloads: true,
        }
    }

    pub fn can_copy_raw_to(&self, other: &PostingFormat) -> bool {
        self == other
    }
}
