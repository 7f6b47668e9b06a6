pub mod error;
pub mod parse;
pub mod source;
pub mod worker;

pub use error::IngestError;
pub use source::{ContainerTailSource, TailSource};
pub use worker::IngestWorker;
