pub mod engine;
pub mod memory_engine;
pub mod snapshot;
pub mod file_lock;
pub mod format;
