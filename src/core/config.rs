/// Tuning knobs for the index writer. Passed in explicitly, never read from
/// globals or the environment.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Buffered documents that trigger an automatic segment flush.
    pub doc_limit: usize,
    /// Buffered postings that trigger an automatic segment flush.
    pub post_limit: usize,
    /// Postings at or below this count stay inline in the term info.
    pub inline_limit: usize,
    /// Compression for stored-field blocks.
    pub stored_compression: crate::codec::perdoc::CompressionType,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            doc_limit: 10_000,
            post_limit: 1_000_000,
            inline_limit: 4,
            stored_compression: crate::codec::perdoc::CompressionType::Lz4,
        }
    }
}

/// Tuning knobs for the tiered merge strategy. The constants are empirical;
/// only the qualitative behavior is contractual.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Most segments combined in one merge.
    pub max_at_once: usize,
    /// Allowed segments per size tier before merging kicks in.
    pub per_tier: usize,
    /// Exponent rewarding merges that reclaim deleted documents.
    pub deletion_boost: f64,
    /// Segment sizes below this are rounded up when tiering.
    pub segment_size_floor: u64,
    /// Never plan a merge whose estimated output exceeds this.
    pub max_merged_size: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            max_at_once: 10,
            per_tier: 10,
            deletion_boost: 2.0,
            segment_size_floor: 2 * 1024 * 1024,
            max_merged_size: 5 * 1024 * 1024 * 1024,
        }
    }
}

/// Tuning knobs for a blueline key/value store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Target byte size of one region; flush merges smaller neighbors.
    pub region_size: usize,
    /// Realized regions kept in the LRU cache.
    pub cache_regions: usize,
    /// Precompute full key->index maps on region load (merge-scan workloads).
    pub preread: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            region_size: 128 * 1024,
            cache_regions: 64,
            preread: false,
        }
    }
}
