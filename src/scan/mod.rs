pub mod context;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod results;

pub use context::{ScanConfig, ScanFilters};
pub use orchestrator::Scanner;
