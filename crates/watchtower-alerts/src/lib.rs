pub mod monitor;
pub mod notify;
pub mod render;

pub use monitor::{AlertMonitor, TickReport};
pub use notify::{Notifier, NotifyError};
