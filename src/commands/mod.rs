pub mod list;
pub mod scan;
pub mod validate;

pub use list::ListCommand;
pub use scan::{ScanCommand, ScanOptions};
pub use validate::ValidateCommand;
