//! Persistence layer: in-memory and JSON-file backends.

pub mod json;
pub mod memory;
pub mod traits;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use traits::Store;
