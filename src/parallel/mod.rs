pub mod cancel;
pub mod scan;

pub use cancel::CancelToken;
pub use scan::{ScanEngine, ScanOptions, ScanOutput, ScanStats};
