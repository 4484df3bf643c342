use time::format_description::FormatItem;
use time::macros::format_description;

pub mod cdxj;
pub mod record;
pub mod reader;
pub mod transform;
pub mod writer;

pub use cdxj::{CdxjIndex, CdxjRecord};
pub use reader::{read_record_from_slice, WarcReader};
pub use record::{WarcRecord, WarcRecordType, WarcVersion};
pub use writer::{generate_warc_fname, WarcWriter};

/// The 14-digit stamp shared by CDXJ lines, WARC filenames and WACZ filenames.
pub static TIMESTAMP_FMT: &[FormatItem<'_>] =
    format_description!("[year][month][day][hour repr:24][minute][second]");
