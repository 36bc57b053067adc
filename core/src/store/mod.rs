pub mod factory;
pub mod jsonl;
pub mod memory;

pub use factory::create_store;
pub use jsonl::JsonlStore;
pub use memory::MemoryStore;
