//! Row transformation and loading.
//!
//! - Record: typed row attributes and part records
//! - Pipeline: transactional whole-file loader and dry run

pub mod pipeline;
pub mod record;

pub use pipeline::{check_file, check_input, prepare_row, CheckReport, LoadState, Loader};
pub use record::{build_record, RowAttributes};
