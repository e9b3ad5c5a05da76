pub mod aggregation;
pub mod compact;
pub mod config;
pub mod error;
pub mod filter;
pub mod grading;
pub mod memo;
pub mod pipeline;
pub mod schema;
pub mod session;
pub mod students;

#[cfg(feature = "python")]
mod python;

pub use config::Config;
pub use error::{ReportError, Result};
pub use filter::{FilterState, LocalFilter};
pub use session::{Report, ReportSession};
