//! Run results: the zip archive and the report summarizing it

pub mod archive;
pub mod summary;

pub use archive::ResultsArchive;
pub use summary::{ReportBuilder, RunReport};
