//! Core trait for cache generation storage.

use color_eyre::Result;

use super::key::RequestKey;
use crate::fetch::Response;

/// Versioned buckets of request → response entries.
///
/// A generation is named by a version tag. Writes are last-write-wins and
/// deleting a generation removes all of its entries in one step.
pub trait CacheStore: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, tag: &str) -> Result<()>;

  /// Look up a response. Missing generations behave like empty ones.
  fn get(&self, tag: &str, key: &RequestKey) -> Result<Option<Response>>;

  /// Store a response, replacing any previous entry for the key.
  /// Creates the generation when absent.
  fn put(&self, tag: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store a response only if the generation still exists. Returns whether
  /// it was written. Never recreates a deleted generation.
  fn put_existing(&self, tag: &str, key: &RequestKey, response: &Response) -> Result<bool>;

  /// Create the generation and store all entries atomically: either every
  /// entry is visible afterwards or the store is unchanged.
  fn install_generation(&self, tag: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Tags of all existing generations, oldest first.
  fn list_generation_tags(&self) -> Result<Vec<String>>;

  /// Delete a generation and its entries. Returns whether it existed.
  fn delete(&self, tag: &str) -> Result<bool>;
}
