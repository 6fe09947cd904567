pub mod region;
pub mod toc;
pub mod cursor;
pub mod store;

pub use cursor::{BufferedCursor, KvCursor, RegionCursor, SuffixCursor};
pub use region::Region;
pub use store::{RegionStore, StoreCursor, StoreWriter};
pub use toc::{BlockRef, Toc};
