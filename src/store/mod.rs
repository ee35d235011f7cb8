pub mod base;
pub mod file_store;
pub mod memory_store;

pub use base::{create_store, TokenStore};
pub use file_store::FileTokenStore;
pub use memory_store::MemoryTokenStore;
