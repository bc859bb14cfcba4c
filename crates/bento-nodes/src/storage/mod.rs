//! Storage nodes
//!
//! Nodes for file I/O.

mod file_system;

pub use file_system::FileSystemExecutor;
