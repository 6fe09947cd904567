pub mod segment_writer;
pub mod merging;
pub mod writer;

pub use merging::{Merge, MergeExecutor, MergeOutcome, SegmentStats, TieredMergeStrategy};
pub use segment_writer::{FieldContent, IndexedDocument, PostingInput, SegmentWriter};
pub use writer::{IndexReader, IndexToc, IndexWriter};
