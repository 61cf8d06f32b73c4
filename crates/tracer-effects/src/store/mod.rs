//! Encounter stores and identifier batch persistence

mod batch;
mod filesystem;
mod memory;
mod table;

pub use batch::{FilesystemBatchStore, MemoryBatchStore};
pub use filesystem::FilesystemEncounterStore;
pub use memory::MemoryEncounterStore;
