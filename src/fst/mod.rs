pub mod arc;
pub mod values;
pub mod builder;
pub mod reader;
pub mod cursor;
pub mod within;
pub mod combo;

pub use arc::GraphArc;
pub use builder::{GraphCounters, GraphWriter};
pub use cursor::Cursor;
pub use reader::GraphReader;
pub use values::{Value, ValuesType};
pub use within::within;
