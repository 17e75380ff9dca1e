//! Versioned response cache.
//!
//! Responses live in named generations, one per deployed version tag:
//! - Entries are keyed by GET + URL (fragment stripped), hashed for storage
//! - Writes are last-write-wins, never merged
//! - A whole generation can be installed or deleted atomically

mod key;
mod storage;
mod traits;

pub use key::RequestKey;
pub use storage::SqliteCacheStore;
pub use traits::CacheStore;
