mod persist;
mod store;

pub use store::{CacheConfig, CacheSnapshot, CacheStore};
