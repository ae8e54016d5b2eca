mod facade;
mod operation;
pub mod sanitize;

pub use facade::{DocumentService, INIT_FILE_NAME, IngestRequest, IngestionOutcome};
