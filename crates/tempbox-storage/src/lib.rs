mod backend;
mod error;
mod session;

pub use backend::{CacheBackend, MemoryCache, RedisCache};
pub use error::StorageError;
pub use session::{account_key, SessionStore};
