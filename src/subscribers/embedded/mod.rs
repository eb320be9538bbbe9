//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders lifecycle events through `tracing` (demo/debug).

mod log;

pub use log::LogWriter;
