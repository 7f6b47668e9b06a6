pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigHandle, WatchtowerConfig};
pub use error::{ErrorKind, WatchtowerError};
pub use types::Event;
