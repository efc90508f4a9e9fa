//! Durable single-slot storage for the observation state.

mod file;
mod memory;
mod state_store;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use state_store::StateStore;
