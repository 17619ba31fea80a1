mod cache;
mod repository;

pub use cache::{CacheEntry, QueryCache};
pub use repository::ContentRepository;
