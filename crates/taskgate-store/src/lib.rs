pub mod memory;
pub mod types;

pub use memory::{MemoryJobStore, MemoryKvStore};
pub use types::{JobStore, KeyValueStore};
