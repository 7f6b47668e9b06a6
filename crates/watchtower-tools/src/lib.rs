pub mod catalog;
pub mod host;
pub mod server;

pub use host::ToolHost;
