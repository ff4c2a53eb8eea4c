//! File Status Tracker: the per-file state machine, retry bookkeeping and
//! error taxonomy.

pub mod error_code;
pub mod file_tracker;
pub mod record;
pub mod status;

pub use error_code::{error_code_descriptions, ErrorCode, ErrorCodeDescription};
pub use file_tracker::{FileStatusTracker, RecordClaim, TransitionDetail};
pub use record::{
    status_descriptions, FileProcessingRecord, NewRecord, Pagination, ProcessingStats, RecordFilter,
    RecordPage, RecordSort, RecordSortField, StatusDescription,
};
pub use status::{FileStatus, TransitionCause};
