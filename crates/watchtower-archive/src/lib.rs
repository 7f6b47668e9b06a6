pub mod db;
pub mod error;
pub mod store;

pub use error::ArchiveError;
pub use store::{ArchiveStore, BatchOutcome, Watermark};
