pub mod reader;
pub mod record;
pub mod writer;

pub use reader::{IndexEntry, ReaderOptions, WarcReader};
pub use record::{HttpHead, RecordKind, RecordLocation, StoredRecord, WarcRecord};
pub use writer::{WarcInfo, WarcWriter};
