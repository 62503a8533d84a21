//! The distinct-identity placeholder for intentionally absent construction
//! results.
//!
//! A per-name object cache cannot use `Option` alone to distinguish "not yet
//! computed" from "computed, and the computed value is absent": both would be
//! `None`. `NullSentinel` fills the second slot. Every instance carries a
//! unique token, so two sentinels are never equal to each other, but each one
//! reports logical absence and stringifies to the canonical `"null"` token.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::Instance;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// A distinct-identity stand-in for an absent construction result.
#[derive(Debug)]
pub struct NullSentinel {
  token: u64,
}

impl NullSentinel {
  pub fn new() -> Self {
    Self {
      token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
    }
  }

  /// The identity token. Unique per instance for the process lifetime.
  pub fn token(&self) -> u64 {
    self.token
  }

  /// Every sentinel stands for absence.
  pub fn is_absent(&self) -> bool {
    true
  }

  /// Turns an optional construction result into a cacheable instance,
  /// substituting a fresh sentinel for absence.
  pub fn erase(value: Option<Instance>) -> Instance {
    value.unwrap_or_else(|| Arc::new(NullSentinel::new()))
  }

  /// The inverse of [`erase`](Self::erase): maps a sentinel back to `None`
  /// and passes every other instance through.
  pub fn reveal(value: Instance) -> Option<Instance> {
    if Self::holds(&value) {
      None
    } else {
      Some(value)
    }
  }

  /// Whether the given instance is a sentinel.
  pub fn holds(value: &Instance) -> bool {
    value.downcast_ref::<NullSentinel>().is_some()
  }
}

impl Default for NullSentinel {
  fn default() -> Self {
    Self::new()
  }
}

// Identity equality: a sentinel equals itself and nothing else. Two distinct
// sentinels both stand for absence without being interchangeable cache
// entries.
impl PartialEq for NullSentinel {
  fn eq(&self, other: &Self) -> bool {
    self.token == other.token
  }
}

impl Eq for NullSentinel {}

impl fmt::Display for NullSentinel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("null")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn distinct_sentinels_are_not_equal() {
    let a = NullSentinel::new();
    let b = NullSentinel::new();
    assert_ne!(a, b);
    assert_eq!(a, a);
    assert!(a.is_absent() && b.is_absent());
  }

  #[test]
  fn erase_and_reveal_round_trip() {
    let erased = NullSentinel::erase(None);
    assert!(NullSentinel::holds(&erased));
    assert!(NullSentinel::reveal(erased).is_none());

    let value: Instance = Arc::new(7_u32);
    let kept = NullSentinel::erase(Some(value.clone()));
    assert!(Arc::ptr_eq(&kept, &value));
  }

  #[test]
  fn displays_canonical_token() {
    assert_eq!(NullSentinel::new().to_string(), "null");
  }
}
